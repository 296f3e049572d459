use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Login failed: {0}")]
    InvalidCredentials(String),

    #[error("Token refresh rejected: {0}")]
    RefreshFailed(String),

    #[error("Identity provider unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl AuthError {
    /// Truncate a response body to avoid logging excessive data
    pub(crate) fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            format!(
                "{}... (truncated, {} total bytes)",
                &body[..MAX_ERROR_BODY_LENGTH],
                body.len()
            )
        }
    }

    /// Build a `ServiceUnavailable` from a non-success admin/service response.
    pub(crate) fn service_failure(status: reqwest::StatusCode, body: &str) -> Self {
        AuthError::ServiceUnavailable(format!("status {}: {}", status, Self::truncate_body(body)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_body_short() {
        assert_eq!(AuthError::truncate_body("oops"), "oops");
    }

    #[test]
    fn test_truncate_body_long() {
        let body = "x".repeat(600);
        let truncated = AuthError::truncate_body(&body);
        assert!(truncated.starts_with(&"x".repeat(500)));
        assert!(truncated.contains("600 total bytes"));
    }
}
