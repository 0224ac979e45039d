use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{debug, warn};
use url::Url;

const HTTP_CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum ClientApiError {
    #[error("no user ID available")]
    MissingUser,
    #[error("invalid API base URL: {0}")]
    InvalidUrl(String),
    #[error("request to {endpoint} failed: {message}")]
    Request { endpoint: String, message: String },
    #[error("request to {endpoint} failed: {status}")]
    Status { endpoint: String, status: u16 },
}

/// Static descriptor served by `GET /api/config`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    pub snapp_id: String,
    pub app_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,
}

/// Body of `POST /api/user/session` as seen by the client.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub user_id: String,
    pub is_new: bool,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub snapp_id: Option<String>,
    #[serde(default)]
    pub mcp_endpoint: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionRequest<'a> {
    existing_user_id: Option<&'a str>,
    force_new: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenRequest<'a> {
    user_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

/// Client for the snapp's own backend (`/api/*`).
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: Url,
    http: Client,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self, ClientApiError> {
        let mut base_url =
            Url::parse(base_url).map_err(|err| ClientApiError::InvalidUrl(err.to_string()))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let http = match Client::builder().timeout(HTTP_CLIENT_TIMEOUT).build() {
            Ok(client) => client,
            Err(err) => {
                warn!(error = %err, "failed to build configured HTTP client; falling back to default reqwest client");
                Client::new()
            }
        };
        Ok(Self { base_url, http })
    }

    pub async fn app_config(&self) -> Result<AppConfig, ClientApiError> {
        let url = self.endpoint("api/config")?;
        let response = self.http.get(url).send().await;
        decode("/api/config", response).await
    }

    pub async fn resolve_session(
        &self,
        existing_user_id: Option<&str>,
        force_new: bool,
    ) -> Result<SessionInfo, ClientApiError> {
        let url = self.endpoint("api/user/session")?;
        let response = self
            .http
            .post(url)
            .json(&SessionRequest {
                existing_user_id,
                force_new,
            })
            .send()
            .await;
        decode("/api/user/session", response).await
    }

    /// Fetch a fresh ephemeral token. Every call hits the backend.
    pub async fn ephemeral_token(&self, user_id: &str) -> Result<String, ClientApiError> {
        if user_id.trim().is_empty() {
            return Err(ClientApiError::MissingUser);
        }
        let url = self.endpoint("api/token")?;
        let response = self
            .http
            .post(url)
            .json(&TokenRequest { user_id })
            .send()
            .await;
        let body: TokenResponse = decode("/api/token", response).await?;
        debug!(user_id, "ephemeral token received");
        Ok(body.token)
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClientApiError> {
        self.base_url
            .join(path)
            .map_err(|err| ClientApiError::InvalidUrl(err.to_string()))
    }
}

async fn decode<T: DeserializeOwned>(
    endpoint: &str,
    response: reqwest::Result<reqwest::Response>,
) -> Result<T, ClientApiError> {
    let response = response.map_err(|err| ClientApiError::Request {
        endpoint: endpoint.to_string(),
        message: err.without_url().to_string(),
    })?;
    let status = response.status();
    if !status.is_success() {
        warn!(endpoint, status = %status, "API call failed");
        return Err(ClientApiError::Status {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
        });
    }
    response
        .json::<T>()
        .await
        .map_err(|err| ClientApiError::Request {
            endpoint: endpoint.to_string(),
            message: format!("invalid response body: {err}"),
        })
}
