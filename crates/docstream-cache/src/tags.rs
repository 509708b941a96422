//! Tag naming helpers.
//!
//! Tags are tenant-prefixed before they reach any tier so a tag name used by
//! two tenants can never cross-invalidate.

use uuid::Uuid;

pub const TAG_DOCUMENTS: &str = "documents";
pub const TAG_DOCUMENT_LISTS: &str = "document-lists";

pub fn scoped_tag(tenant_id: Uuid, tag: &str) -> String {
    format!("tenant:{}:{}", tenant_id, tag)
}

pub fn user_tag(user_id: Uuid) -> String {
    format!("user:{}", user_id)
}

pub fn collection_tag(collection_id: Uuid) -> String {
    format!("collection:{}", collection_id)
}

/// Standard tag set invalidated on any document mutation.
pub fn document_mutation_tags(user_id: Uuid, collection_id: Option<Uuid>) -> Vec<String> {
    let mut tags = vec![
        TAG_DOCUMENTS.to_string(),
        TAG_DOCUMENT_LISTS.to_string(),
        user_tag(user_id),
    ];
    if let Some(collection_id) = collection_id {
        tags.push(collection_tag(collection_id));
    }
    tags
}

/// Glob match supporting `*` wildcards, used by the L1 tier; Redis and
/// Postgres translate the same pattern natively.
pub fn glob_match(pattern: &str, key: &str) -> bool {
    fn inner(p: &[u8], k: &[u8]) -> bool {
        match (p.first(), k.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                inner(&p[1..], k) || (!k.is_empty() && inner(p, &k[1..]))
            }
            (Some(pc), Some(kc)) if pc == kc => inner(&p[1..], &k[1..]),
            _ => false,
        }
    }
    inner(pattern.as_bytes(), key.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scoped_tags_carry_tenant() {
        let tenant = Uuid::new_v4();
        let tag = scoped_tag(tenant, "documents");
        assert_eq!(tag, format!("tenant:{}:documents", tenant));
    }

    #[test]
    fn mutation_tags_include_collection_when_present() {
        let user = Uuid::new_v4();
        let collection = Uuid::new_v4();
        let tags = document_mutation_tags(user, Some(collection));
        assert!(tags.contains(&"documents".to_string()));
        assert!(tags.contains(&"document-lists".to_string()));
        assert!(tags.contains(&format!("user:{}", user)));
        assert!(tags.contains(&format!("collection:{}", collection)));

        let tags = document_mutation_tags(user, None);
        assert_eq!(tags.len(), 3);
    }

    #[test]
    fn glob_matching() {
        assert!(glob_match("documents:*", "documents:user:42:page:1"));
        assert!(glob_match("*", "anything"));
        assert!(glob_match("a*c", "abc"));
        assert!(glob_match("a*c", "ac"));
        assert!(!glob_match("documents:*", "sessions:1"));
        assert!(!glob_match("a*c", "abd"));
    }
}
