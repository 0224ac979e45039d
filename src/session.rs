use serde::Serialize;
use tracing::{info, warn};

use crate::authority::CreatedUser;
use crate::broker::{TokenBroker, Validation};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Upstream could not create an identity. Deliberately carries no upstream
    /// detail so nothing secret can reach the caller.
    #[error("session service unavailable")]
    Unavailable,
}

/// Resolved identity. Secrets are only present for a freshly created user.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionResolution {
    pub user_id: String,
    pub is_new: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapp_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mcp_endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    pub message: &'static str,
}

impl SessionResolution {
    fn reused(user_id: String) -> Self {
        Self {
            user_id,
            is_new: false,
            api_key: None,
            snapp_id: None,
            mcp_endpoint: None,
            created_at: None,
            message: "Using existing user ID",
        }
    }

    fn created(user: CreatedUser) -> Self {
        Self {
            user_id: user.user_id,
            is_new: true,
            api_key: Some(user.user_api_key),
            snapp_id: Some(user.snapp_id),
            mcp_endpoint: Some(user.mcp_endpoint),
            created_at: user.created_at,
            message: "Created new user",
        }
    }
}

#[derive(Clone)]
pub struct SessionManager {
    broker: TokenBroker,
}

impl SessionManager {
    pub fn new(broker: TokenBroker) -> Self {
        Self { broker }
    }

    pub async fn resolve(
        &self,
        existing_user_id: Option<&str>,
        force_new: bool,
    ) -> Result<SessionResolution, SessionError> {
        if force_new {
            info!("creating new user (forced)");
            return self.create().await;
        }

        if let Some(user_id) = existing_user_id.map(str::trim).filter(|id| !id.is_empty()) {
            match self.broker.validate(user_id).await {
                Validation::Valid => {
                    info!(user_id, "existing user validated");
                    return Ok(SessionResolution::reused(user_id.to_string()));
                }
                Validation::Invalid => {
                    info!(user_id, "existing user id invalid, creating new user");
                }
                Validation::Unreachable => {
                    warn!(
                        user_id,
                        "could not validate existing user id, creating new user"
                    );
                }
            }
        }

        self.create().await
    }

    async fn create(&self) -> Result<SessionResolution, SessionError> {
        let timeout = self.broker.request_timeout();
        let created = match tokio::time::timeout(timeout, self.broker.authority().create_user()).await
        {
            Ok(Ok(user)) => user,
            Ok(Err(err)) => {
                warn!(error = %err, "user creation failed");
                return Err(SessionError::Unavailable);
            }
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "user creation timed out");
                return Err(SessionError::Unavailable);
            }
        };
        info!(user_id = %created.user_id, "created new user");
        Ok(SessionResolution::created(created))
    }
}
