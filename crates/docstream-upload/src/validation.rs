use docstream_core::{AppError, UploadConfig};

/// Pure configuration-driven upload policy. No I/O.
#[derive(Clone)]
pub struct UploadValidator {
    config: UploadConfig,
}

impl UploadValidator {
    pub fn new(config: UploadConfig) -> Self {
        Self { config }
    }

    fn extension(name: &str) -> Option<String> {
        name.rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase())
            .filter(|ext| !ext.is_empty())
    }

    /// Checks one file against the type and size policy.
    pub fn validate_file(
        &self,
        name: &str,
        content_type: &str,
        size: u64,
    ) -> Result<(), AppError> {
        let extension = Self::extension(name).ok_or_else(|| {
            AppError::UnsupportedFileType(format!("'{}' has no file extension", name))
        })?;

        if !self.config.allowed_extensions.contains(&extension) {
            return Err(AppError::UnsupportedFileType(format!(
                "Extension '.{}' is not allowed",
                extension
            )));
        }

        let content_type = content_type.to_lowercase();
        if !self.config.allowed_content_types.contains(&content_type) {
            return Err(AppError::UnsupportedFileType(format!(
                "Content type '{}' is not allowed",
                content_type
            )));
        }

        if size == 0 {
            return Err(AppError::InvalidInput(format!("'{}' is empty", name)));
        }

        if size > self.config.max_file_size_bytes {
            return Err(AppError::PayloadTooLarge(format!(
                "'{}' is {} bytes, limit is {} bytes",
                name, size, self.config.max_file_size_bytes
            )));
        }

        Ok(())
    }

    /// Batch-level checks: the aggregate ceiling and the per-user quota are
    /// verified before any bytes are accepted.
    pub fn validate_batch(
        &self,
        files: &[(String, String, u64)],
        quota_used_bytes: u64,
    ) -> Result<(), AppError> {
        if files.is_empty() {
            return Err(AppError::InvalidInput("No files in batch".to_string()));
        }

        let total: u64 = files.iter().map(|(_, _, size)| size).sum();
        if total > self.config.max_total_upload_size_bytes {
            return Err(AppError::PayloadTooLarge(format!(
                "Batch is {} bytes, total upload limit is {} bytes",
                total, self.config.max_total_upload_size_bytes
            )));
        }

        if self.config.per_user_quota_bytes > 0
            && quota_used_bytes + total > self.config.per_user_quota_bytes
        {
            return Err(AppError::QuotaExceeded {
                resource: "upload bytes".to_string(),
                used: (quota_used_bytes + total) as i64,
                limit: self.config.per_user_quota_bytes as i64,
            });
        }

        Ok(())
    }

    pub fn needs_chunking(&self, size: u64) -> bool {
        size > self.config.chunking_threshold_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    fn validator() -> UploadValidator {
        UploadValidator::new(UploadConfig::default())
    }

    #[test]
    fn accepts_allowed_file() {
        assert!(validator()
            .validate_file("report.pdf", "application/pdf", 1024)
            .is_ok());
        assert!(validator()
            .validate_file("NOTES.TXT", "text/plain", 10)
            .is_ok());
    }

    #[test]
    fn rejects_disallowed_extension_and_type() {
        let v = validator();
        let err = v
            .validate_file("malware.exe", "application/pdf", 10)
            .unwrap_err();
        assert!(matches!(err, AppError::UnsupportedFileType(_)));

        let err = v
            .validate_file("data.pdf", "application/octet-stream", 10)
            .unwrap_err();
        assert!(matches!(err, AppError::UnsupportedFileType(_)));

        let err = v.validate_file("noext", "text/plain", 10).unwrap_err();
        assert!(matches!(err, AppError::UnsupportedFileType(_)));
    }

    #[test]
    fn rejects_oversized_and_empty_files() {
        let v = validator();
        let err = v
            .validate_file("big.pdf", "application/pdf", 150 * MIB)
            .unwrap_err();
        assert!(matches!(err, AppError::PayloadTooLarge(_)));

        let err = v.validate_file("empty.pdf", "application/pdf", 0).unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[test]
    fn batch_total_ceiling() {
        let v = validator();
        let files: Vec<(String, String, u64)> = (0..11)
            .map(|i| {
                (
                    format!("f{}.pdf", i),
                    "application/pdf".to_string(),
                    100 * MIB,
                )
            })
            .collect();
        let err = v.validate_batch(&files, 0).unwrap_err();
        assert!(matches!(err, AppError::PayloadTooLarge(_)));

        assert!(v.validate_batch(&files[..5], 0).is_ok());
    }

    #[test]
    fn quota_is_enforced_when_configured() {
        let config = UploadConfig {
            per_user_quota_bytes: 10 * MIB,
            ..Default::default()
        };
        let v = UploadValidator::new(config);
        let files = vec![(
            "a.pdf".to_string(),
            "application/pdf".to_string(),
            6 * MIB,
        )];

        assert!(v.validate_batch(&files, 0).is_ok());
        let err = v.validate_batch(&files, 5 * MIB).unwrap_err();
        assert!(matches!(err, AppError::QuotaExceeded { .. }));
    }

    #[test]
    fn chunking_threshold() {
        let v = validator();
        assert!(!v.needs_chunking(2 * 1024));
        assert!(v.needs_chunking(50 * MIB));
    }
}
