use thiserror::Error;

pub type AcmeResult<T> = Result<T, AcmeError>;

/// Failure categories surfaced by the transport and the protocol engine.
#[derive(Debug, Error)]
pub enum AcmeError {
    #[error("transport: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("server answered {status}{}", .detail.as_deref().map(|d| format!(": {d}")).unwrap_or_default())]
    Status {
        status: u16,
        detail: Option<String>,
    },

    #[error("invalid json in response with status {status}: {source}")]
    Decode {
        status: u16,
        #[source]
        source: serde_json::Error,
    },

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing expected header {0}")]
    MissingHeader(&'static str),

    #[error("directory does not advertise resource {0}")]
    MissingResource(String),

    #[error("{0}")]
    Protocol(&'static str),

    #[error("polling gave up after the retry ceiling")]
    PollTimeout,

    #[error("account key rejected: {0}")]
    Key(String),

    #[error("timestamp formatting: {0}")]
    Time(#[from] time::error::Format),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl AcmeError {
    pub(crate) fn transport(err: reqwest::Error) -> Self {
        AcmeError::Transport(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_includes_detail() {
        let err = AcmeError::Status {
            status: 403,
            detail: Some("must agree to terms".to_string()),
        };
        assert_eq!(err.to_string(), "server answered 403: must agree to terms");

        let bare = AcmeError::Status {
            status: 500,
            detail: None,
        };
        assert_eq!(bare.to_string(), "server answered 500");
    }
}
