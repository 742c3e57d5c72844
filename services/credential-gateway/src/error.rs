use reqwest::StatusCode;
use thiserror::Error;

/// Failure of the resource endpoint call itself, as opposed to a rejection.
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("resource endpoint did not answer within the configured timeout")]
    Timeout,
    #[error("resource endpoint request failed: {0}")]
    Transport(reqwest::Error),
}

impl From<reqwest::Error> for ResourceError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            ResourceError::Timeout
        } else {
            ResourceError::Transport(error)
        }
    }
}

/// Why a token exchange produced no token.
///
/// Only ever logged; callers of the identity client see a bare "no token".
#[derive(Debug, Error)]
pub(crate) enum AcquireFailure {
    #[error("identity provider rejected the request ({status}): {error}: {description}")]
    Rejected {
        status: StatusCode,
        error: String,
        description: String,
    },
    #[error("identity provider unreachable: {0}")]
    Unreachable(reqwest::Error),
    #[error("identity provider returned an unusable response ({status}): {reason}")]
    Malformed { status: StatusCode, reason: String },
}

impl From<reqwest::Error> for AcquireFailure {
    fn from(error: reqwest::Error) -> Self {
        AcquireFailure::Unreachable(error)
    }
}
