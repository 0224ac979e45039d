use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::authority::{Authority, AuthorityError, EphemeralToken};

/// Upper bound for any single round trip to the upstream authority.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("user is not known to the upstream authority")]
    InvalidUser,
    #[error("upstream authority unavailable: {0}")]
    Unavailable(String),
    #[error("upstream authority did not answer within {0:?}")]
    Timeout(Duration),
}

impl From<AuthorityError> for BrokerError {
    fn from(err: AuthorityError) -> Self {
        match err {
            AuthorityError::Rejected { .. } => Self::InvalidUser,
            AuthorityError::Unavailable(message) => Self::Unavailable(message),
        }
    }
}

/// Outcome of probing whether a user id is still live upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validation {
    Valid,
    /// The authority explicitly rejected the id.
    Invalid,
    /// The authority could not answer (outage or timeout).
    Unreachable,
}

/// Mints ephemeral, user-bound tokens. Holds no cache: every call goes
/// upstream.
#[derive(Clone)]
pub struct TokenBroker {
    authority: Arc<dyn Authority>,
    request_timeout: Duration,
}

impl TokenBroker {
    pub fn new(authority: Arc<dyn Authority>) -> Self {
        Self::with_timeout(authority, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(authority: Arc<dyn Authority>, request_timeout: Duration) -> Self {
        Self {
            authority,
            request_timeout,
        }
    }

    pub fn authority(&self) -> &Arc<dyn Authority> {
        &self.authority
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub async fn mint(&self, user_id: &str) -> Result<EphemeralToken, BrokerError> {
        let issued = tokio::time::timeout(self.request_timeout, self.authority.issue_token(user_id))
            .await
            .map_err(|_| BrokerError::Timeout(self.request_timeout))??;
        debug!(
            user_id,
            expires_at_epoch_millis = issued.expires_at_epoch_millis,
            "ephemeral token minted"
        );
        Ok(issued)
    }

    /// The authority has no dedicated validation call, so validity is probed by
    /// minting a token and discarding it. A successful mint proves the id is
    /// live; the token is dropped here and never handed out.
    pub async fn validate(&self, user_id: &str) -> Validation {
        match self.mint(user_id).await {
            Ok(_probe) => Validation::Valid,
            Err(BrokerError::InvalidUser) => Validation::Invalid,
            Err(err) => {
                warn!(user_id, error = %err, "user validation probe could not reach authority");
                Validation::Unreachable
            }
        }
    }
}
