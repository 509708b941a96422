use docstream_core::ErrorCategory;
use reqwest::StatusCode;

/// Maps an engine HTTP status to the retry taxonomy.
pub fn classify_http_status(status: StatusCode) -> ErrorCategory {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ErrorCategory::Authentication,
        StatusCode::PAYLOAD_TOO_LARGE => ErrorCategory::FileSize,
        StatusCode::UNSUPPORTED_MEDIA_TYPE => ErrorCategory::FileFormat,
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => ErrorCategory::Validation,
        StatusCode::TOO_MANY_REQUESTS => ErrorCategory::RateLimit,
        s if s.is_server_error() => ErrorCategory::Transient,
        _ => ErrorCategory::Unknown,
    }
}

/// Maps a transport-level reqwest failure (no HTTP status) to a category.
pub fn classify_transport_error(error: &reqwest::Error) -> ErrorCategory {
    if error.is_timeout() || error.is_connect() {
        ErrorCategory::Transient
    } else if let Some(status) = error.status() {
        classify_http_status(status)
    } else {
        ErrorCategory::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(
            classify_http_status(StatusCode::UNAUTHORIZED),
            ErrorCategory::Authentication
        );
        assert_eq!(
            classify_http_status(StatusCode::FORBIDDEN),
            ErrorCategory::Authentication
        );
        assert_eq!(
            classify_http_status(StatusCode::PAYLOAD_TOO_LARGE),
            ErrorCategory::FileSize
        );
        assert_eq!(
            classify_http_status(StatusCode::UNSUPPORTED_MEDIA_TYPE),
            ErrorCategory::FileFormat
        );
        assert_eq!(
            classify_http_status(StatusCode::BAD_REQUEST),
            ErrorCategory::Validation
        );
        assert_eq!(
            classify_http_status(StatusCode::UNPROCESSABLE_ENTITY),
            ErrorCategory::Validation
        );
        assert_eq!(
            classify_http_status(StatusCode::TOO_MANY_REQUESTS),
            ErrorCategory::RateLimit
        );
        assert_eq!(
            classify_http_status(StatusCode::INTERNAL_SERVER_ERROR),
            ErrorCategory::Transient
        );
        assert_eq!(
            classify_http_status(StatusCode::BAD_GATEWAY),
            ErrorCategory::Transient
        );
        assert_eq!(
            classify_http_status(StatusCode::NOT_FOUND),
            ErrorCategory::Unknown
        );
    }
}
