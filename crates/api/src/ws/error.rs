use tandem_core::protocol::{
    error_frame, ERR_CODE_AUTH, ERR_CODE_CONFLICT, ERR_CODE_FORBIDDEN, ERR_CODE_INTERNAL,
    ERR_CODE_NOT_FOUND, ERR_CODE_PROTOCOL, ERR_CODE_RATE_LIMITED,
};
use tandem_storage::StorageError;

/// Failure outcome of a single client action. Every variant maps to an
/// error envelope on the still-open connection; only `ConnectionLimit`
/// escalates to a close.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub(crate) enum ActionError {
    #[error("{0}")]
    Protocol(String),
    #[error("{0}")]
    Auth(&'static str),
    #[error("{0}")]
    Forbidden(&'static str),
    #[error("{0}")]
    NotFound(&'static str),
    #[error("{0}")]
    Conflict(&'static str),
    #[error("rate limit exceeded")]
    RateLimited,
    #[error("too many connections")]
    ConnectionLimit,
    #[error("internal error")]
    Internal(String),
}

impl ActionError {
    pub(crate) fn code(&self) -> u16 {
        match self {
            Self::Protocol(_) => ERR_CODE_PROTOCOL,
            Self::Auth(_) => ERR_CODE_AUTH,
            Self::Forbidden(_) => ERR_CODE_FORBIDDEN,
            Self::NotFound(_) => ERR_CODE_NOT_FOUND,
            Self::Conflict(_) | Self::ConnectionLimit => ERR_CODE_CONFLICT,
            Self::RateLimited => ERR_CODE_RATE_LIMITED,
            Self::Internal(_) => ERR_CODE_INTERNAL,
        }
    }

    pub(crate) fn to_frame(&self) -> String {
        // Internal detail stays in the log, not on the wire.
        let message = match self {
            Self::Internal(_) => "internal error".to_owned(),
            other => other.to_string(),
        };
        error_frame(self.code(), &message)
    }
}

impl From<StorageError> for ActionError {
    fn from(error: StorageError) -> Self {
        Self::Internal(error.to_string())
    }
}
