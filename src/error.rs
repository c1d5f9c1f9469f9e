use reqwest::StatusCode;
use thiserror::Error;

const REDACTED_BODY_MAX_LEN: usize = 200;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("gmail api request failed: status={status} body={body}")]
    Api { status: u16, body: String },

    #[error("gmail api transport: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("decode gmail response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("authentication: {0}")]
    Auth(String),

    #[error("pagination for query '{query}' stalled after {pages} pages: {reason}")]
    PaginationStalled {
        query: String,
        pages: usize,
        reason: String,
    },

    #[error("filesystem: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Config(String),
}

impl MailError {
    pub fn api(status: StatusCode, body: &str) -> Self {
        Self::Api {
            status: status.as_u16(),
            body: redact_response_body(body),
        }
    }

    /// Whether repeating the same request could succeed: throttling, server
    /// errors and transport hiccups. Everything else needs a different request.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Api { status, .. } => *status == 429 || (500..=599).contains(status),
            Self::Transport(error) => error.is_timeout() || error.is_connect(),
            _ => false,
        }
    }

    /// Failures raised by the remote service or the path to it, as opposed to
    /// local misuse or setup problems.
    pub fn is_service_error(&self) -> bool {
        matches!(
            self,
            Self::Api { .. } | Self::Transport(_) | Self::Decode(_) | Self::PaginationStalled { .. }
        )
    }
}

pub fn redact_response_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.len() <= REDACTED_BODY_MAX_LEN {
        return trimmed.to_string();
    }

    let mut cut = REDACTED_BODY_MAX_LEN;
    while !trimmed.is_char_boundary(cut) {
        cut -= 1;
    }
    format!(
        "{}…[truncated {} bytes]",
        &trimmed[..cut],
        trimmed.len()
    )
}

#[cfg(test)]
mod tests {
    use super::{redact_response_body, MailError};

    #[test]
    fn throttling_and_server_errors_are_retryable() {
        let throttled = MailError::Api {
            status: 429,
            body: String::new(),
        };
        let unavailable = MailError::Api {
            status: 503,
            body: String::new(),
        };
        assert!(throttled.is_retryable());
        assert!(unavailable.is_retryable());
    }

    #[test]
    fn client_errors_are_fatal() {
        let bad_request = MailError::Api {
            status: 400,
            body: "invalid id".to_string(),
        };
        assert!(!bad_request.is_retryable());
        assert!(bad_request.is_service_error());
        assert!(!MailError::Auth("expired".to_string()).is_retryable());
        assert!(!MailError::Auth("expired".to_string()).is_service_error());
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = "x".repeat(500);
        let redacted = redact_response_body(&body);
        assert!(redacted.starts_with(&"x".repeat(200)));
        assert!(redacted.ends_with("[truncated 500 bytes]"));
        assert_eq!(redact_response_body("  short  "), "short");
    }
}
