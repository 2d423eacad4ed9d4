//! Error taxonomy for rotation and polling operations

use thiserror::Error;

/// Errors surfaced by the gateway, executor and poller.
///
/// The variants map one-to-one onto the recovery policies the scheduler
/// applies: `ReauthorizationRequired` auto-pauses the test and is never
/// retried, `QuotaExceeded` and `TransientPlatform` resolve themselves
/// at the next scheduled tick, `Persistence` fails the single operation
/// without partial application.
#[derive(Error, Debug)]
pub enum RotationError {
    #[error("reauthorization required for account {account_id}")]
    ReauthorizationRequired { account_id: String },

    #[error("daily quota exceeded: {used} of {budget} units spent")]
    QuotaExceeded { used: u64, budget: u64 },

    #[error("transient platform error: {message}")]
    TransientPlatform { message: String },

    #[error("persistence error: {0}")]
    Persistence(#[from] sqlx::Error),
}

impl RotationError {
    pub fn reauthorization_required(account_id: impl Into<String>) -> Self {
        Self::ReauthorizationRequired {
            account_id: account_id.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::TransientPlatform {
            message: message.into(),
        }
    }

    /// `true` when the next scheduled tick may simply try again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RotationError::TransientPlatform { .. } | RotationError::QuotaExceeded { .. }
        )
    }
}

/// Errors from the raw content-platform HTTP client, before the
/// gateway's credential/backoff handling maps them into [`RotationError`].
#[derive(Error, Debug)]
pub enum PlatformApiError {
    #[error("platform rejected credential (401/403)")]
    Unauthorized,

    #[error("platform rate limit hit (429)")]
    RateLimited,

    #[error("platform returned HTTP {status}")]
    Server { status: u16 },

    #[error("network error: {message}")]
    Network { message: String },

    #[error("response parse error: {message}")]
    Parse { message: String },
}

impl PlatformApiError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_and_quota_are_retryable() {
        assert!(RotationError::transient("socket closed").is_transient());
        assert!(RotationError::QuotaExceeded { used: 10, budget: 10 }.is_transient());
    }

    #[test]
    fn auth_and_persistence_are_not_retryable() {
        assert!(!RotationError::reauthorization_required("acct-1").is_transient());
        assert!(!RotationError::Persistence(sqlx::Error::RowNotFound).is_transient());
    }

    #[test]
    fn display_includes_account_for_reauth() {
        let err = RotationError::reauthorization_required("acct-42");
        assert!(err.to_string().contains("acct-42"));
    }
}
