//! Failure classification
//!
//! Status codes are authoritative when present. Errors without a usable status
//! keep any typed kind they were built with; only untyped errors fall back to
//! sniffing the message text.

use crate::error::{ApiError, ErrorKind};

const RETRYABLE_PATTERNS: &[(&str, ErrorKind)] = &[
    ("network", ErrorKind::Network),
    ("timeout", ErrorKind::Timeout),
    ("connection", ErrorKind::Network),
    ("econnreset", ErrorKind::Network),
    ("enotfound", ErrorKind::Network),
];

const CLIENT_PATTERNS: &[&str] = &["unauthorized", "forbidden", "invalid api key"];

/// Kind implied by an HTTP status, if the status decides it
fn kind_for_status(status: u16) -> Option<ErrorKind> {
    match status {
        429 => Some(ErrorKind::RateLimited),
        408 => Some(ErrorKind::Timeout),
        400..=499 => Some(ErrorKind::ClientError),
        500.. => Some(ErrorKind::ServerError),
        _ => None,
    }
}

/// Kind implied by message text alone
fn kind_for_message(message: &str) -> ErrorKind {
    let lowered = message.to_lowercase();

    if let Some((_, kind)) = RETRYABLE_PATTERNS
        .iter()
        .find(|(pattern, _)| lowered.contains(pattern))
    {
        return *kind;
    }

    if CLIENT_PATTERNS.iter().any(|pattern| lowered.contains(pattern)) {
        return ErrorKind::ClientError;
    }

    ErrorKind::Unknown
}

/// Classify a failure from its status (if any) and message
pub fn classify(status: Option<u16>, message: &str) -> ErrorKind {
    status
        .and_then(kind_for_status)
        .unwrap_or_else(|| kind_for_message(message))
}

/// Final kind for an error: status first, then a typed kind, then the message
pub fn kind_of(error: &ApiError) -> ErrorKind {
    if let Some(kind) = error.status.and_then(kind_for_status) {
        return kind;
    }
    match error.kind {
        ErrorKind::Unknown => kind_for_message(&error.message),
        kind => kind,
    }
}

/// Whether the orchestrator may retry after this error
pub fn is_retryable(error: &ApiError) -> bool {
    kind_of(error).is_retryable()
}

/// Resolve kind and retryability in place
pub(crate) fn resolve(mut error: ApiError) -> ApiError {
    let kind = kind_of(&error);
    error.kind = kind;
    error.retryable = kind.is_retryable();
    error
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(400, ErrorKind::ClientError, false ; "bad request")]
    #[test_case(401, ErrorKind::ClientError, false ; "unauthorized")]
    #[test_case(404, ErrorKind::ClientError, false ; "not found")]
    #[test_case(408, ErrorKind::Timeout, true ; "request timeout")]
    #[test_case(429, ErrorKind::RateLimited, true ; "too many requests")]
    #[test_case(500, ErrorKind::ServerError, true ; "internal error")]
    #[test_case(503, ErrorKind::ServerError, true ; "unavailable")]
    fn test_status_classification(status: u16, kind: ErrorKind, retryable: bool) {
        let err = ApiError::http(status, "whatever");
        assert_eq!(kind_of(&err), kind);
        assert_eq!(is_retryable(&err), retryable);
    }

    #[test_case("Network request failed", ErrorKind::Network ; "network")]
    #[test_case("socket TIMEOUT", ErrorKind::Timeout ; "timeout any case")]
    #[test_case("Connection refused", ErrorKind::Network ; "connection")]
    #[test_case("read ECONNRESET", ErrorKind::Network ; "econnreset")]
    #[test_case("getaddrinfo ENOTFOUND api.example.com", ErrorKind::Network ; "enotfound")]
    #[test_case("Unauthorized", ErrorKind::ClientError ; "unauthorized")]
    #[test_case("403 Forbidden", ErrorKind::ClientError ; "forbidden")]
    #[test_case("Invalid API key provided", ErrorKind::ClientError ; "invalid key")]
    #[test_case("something odd happened", ErrorKind::Unknown ; "fallback")]
    fn test_message_classification(message: &str, kind: ErrorKind) {
        assert_eq!(classify(None, message), kind);
    }

    #[test]
    fn test_status_beats_message() {
        // The message would read as retryable, the status says otherwise
        let err = ApiError::http(401, "network unauthorized");
        assert!(!is_retryable(&err));

        let err = ApiError::http(502, "unauthorized upstream");
        assert!(is_retryable(&err));
    }

    #[test]
    fn test_retryable_patterns_checked_before_client_patterns() {
        assert!(is_retryable(&ApiError::from_message(
            "connection closed: unauthorized"
        )));
    }

    #[test]
    fn test_unmatched_status_falls_back_to_message() {
        let mut err = ApiError::from_message("invalid api key");
        err.status = Some(302);
        assert_eq!(kind_of(&err), ErrorKind::ClientError);
    }

    #[test]
    fn test_typed_kind_preferred_over_message() {
        let err = ApiError::new(ErrorKind::ClientError, "connection string malformed");
        assert!(!is_retryable(&err));

        let err = ApiError::new(ErrorKind::CircuitOpen, "Circuit breaker is OPEN for x");
        assert!(is_retryable(&err));
    }

    #[test]
    fn test_resolve_sets_retryable_flag() {
        let mut err = ApiError::from_message("Forbidden");
        err.retryable = true;
        let err = resolve(err);
        assert_eq!(err.kind, ErrorKind::ClientError);
        assert!(!err.retryable);
    }
}
