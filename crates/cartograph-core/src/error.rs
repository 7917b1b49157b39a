use std::time::Duration;

/// Errors that can occur across cartograph.
///
/// Each variant wraps a specific error domain. Library crates use this type
/// directly; the binary crate converts to a `miette` report at the boundary.
///
/// # Examples
///
/// ```
/// use cartograph_core::CartographError;
///
/// let err = CartographError::Provider("repository not found".into());
/// assert!(err.to_string().contains("repository not found"));
/// ```
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum CartographError {
    /// Filesystem I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Repository data provider failure (network, auth, missing repository or file).
    #[error("repository provider error: {0}")]
    #[diagnostic(help("check the owner/repo reference and that GITHUB_TOKEN grants access"))]
    Provider(String),

    /// The repository host answered with a non-success HTTP status.
    #[error("repository provider error: HTTP {status}: {message}")]
    #[diagnostic(help("check the owner/repo reference and that GITHUB_TOKEN grants access"))]
    ProviderStatus {
        /// HTTP status code.
        status: u16,
        /// What was requested and the host's response body.
        message: String,
    },

    /// The repository host could not be reached (connection, DNS, TLS).
    #[error("repository provider unreachable: {0}")]
    ProviderUnreachable(String),

    /// Source parsing failure.
    #[error("parse error: {0}")]
    Parse(String),

    /// LLM API or response error.
    #[error("LLM error: {0}")]
    #[diagnostic(help("set OPENAI_API_KEY or [llm] api_key / base_url in .cartograph.toml"))]
    Llm(String),

    /// The operation was cancelled by its caller.
    #[error("operation cancelled")]
    Cancelled,

    /// The operation exceeded its time budget.
    #[error("{operation} timed out after {}s", .elapsed.as_secs())]
    Timeout {
        /// What was being waited on.
        operation: String,
        /// The budget that was exceeded.
        elapsed: Duration,
    },

    /// JSON serialization / deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML deserialization failure.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A node, tool, or other named entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

impl CartographError {
    /// Whether retrying the same call may succeed.
    ///
    /// # Examples
    ///
    /// ```
    /// use cartograph_core::CartographError;
    ///
    /// let throttled = CartographError::ProviderStatus { status: 429, message: "slow down".into() };
    /// assert!(throttled.is_transient());
    /// assert!(!CartographError::Cancelled.is_transient());
    /// assert!(!CartographError::NotFound("x".into()).is_transient());
    /// ```
    pub fn is_transient(&self) -> bool {
        match self {
            CartographError::Timeout { .. } | CartographError::ProviderUnreachable(_) => true,
            CartographError::ProviderStatus { status, .. } => {
                matches!(status, 429 | 500 | 502 | 503 | 504)
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: CartographError = io_err.into();
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn config_error_displays_message() {
        let err = CartographError::Config("bad value".into());
        assert_eq!(err.to_string(), "configuration error: bad value");
    }

    #[test]
    fn timeout_shows_operation_and_budget() {
        let err = CartographError::Timeout {
            operation: "fetch src/a.ts".into(),
            elapsed: Duration::from_secs(30),
        };
        assert_eq!(err.to_string(), "fetch src/a.ts timed out after 30s");
        assert!(err.is_transient());
    }

    fn status(status: u16) -> CartographError {
        CartographError::ProviderStatus {
            status,
            message: "GET /repos/o/r".into(),
        }
    }

    #[test]
    fn server_errors_are_transient() {
        for code in [429, 500, 502, 503, 504] {
            assert!(status(code).is_transient(), "{code}");
        }
        for code in [401, 403, 404, 422] {
            assert!(!status(code).is_transient(), "{code}");
        }
        assert!(CartographError::ProviderUnreachable("connection reset".into()).is_transient());
    }

    #[test]
    fn status_is_not_read_from_message_text() {
        // A permanent error whose text happens to mention a server status.
        let err = CartographError::Provider("file docs/ 503 notes.md is not valid UTF-8".into());
        assert!(!err.is_transient());
        let err = status(404);
        assert_eq!(err.to_string(), "repository provider error: HTTP 404: GET /repos/o/r");
    }
}
