use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    sync::Arc,
};

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::authority::{Authority, HttpAuthority};
use crate::broker::TokenBroker;
use crate::client::api::AppConfig;
use crate::config::ServerSettings;
use crate::session::{SessionManager, SessionResolution};

#[derive(Clone)]
pub struct ApiState {
    app: AppConfig,
    sessions: SessionManager,
    broker: TokenBroker,
}

impl ApiState {
    pub fn new(app: AppConfig, authority: Arc<dyn Authority>) -> Self {
        let broker = TokenBroker::new(authority);
        Self {
            app,
            sessions: SessionManager::new(broker.clone()),
            broker,
        }
    }

    pub fn from_settings(settings: &ServerSettings) -> Result<Self> {
        let base_url = settings.authority_base_url()?;
        let authority = HttpAuthority::new(settings.credentials.clone(), base_url);
        let app = AppConfig {
            snapp_id: settings.credentials.snapp_id.clone(),
            app_name: settings.app_name.clone(),
            server_url: settings.bridge_server_url.as_ref().map(|url| url.to_string()),
        };
        Ok(Self::new(app, Arc::new(authority)))
    }
}

#[derive(Debug, Clone)]
pub struct ApiBindOptions {
    pub host: IpAddr,
    pub port: u16,
    pub port_file: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: String,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionRequest {
    #[serde(default)]
    existing_user_id: Option<Value>,
    #[serde(default)]
    force_new: Option<Value>,
}

impl SessionRequest {
    fn existing_user_id(&self) -> Option<&str> {
        self.existing_user_id.as_ref().and_then(Value::as_str)
    }

    /// Anything other than `true` (missing, `null`, a string) means "reuse".
    fn force_new(&self) -> bool {
        self.force_new
            .as_ref()
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenRequest {
    #[serde(default)]
    user_id: Option<Value>,
}

#[derive(Debug, Serialize)]
struct TokenResponse {
    token: String,
}

struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/config", get(config))
        .route("/api/user/session", post(user_session))
        .route("/api/token", post(token))
        .with_state(state)
}

pub async fn run(bind: ApiBindOptions, state: ApiState, shutdown: CancellationToken) -> Result<()> {
    let ApiBindOptions {
        host,
        port,
        port_file,
    } = bind;
    let addr = SocketAddr::from((host, port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind API on {addr}"))?;
    let local_addr = listener
        .local_addr()
        .context("failed to resolve local address for API listener")?;
    if let Some(path) = port_file {
        tokio::fs::write(&path, format!("{}\n", local_addr.port()))
            .await
            .with_context(|| format!("failed to write API listener port to {}", path.display()))?;
    }

    info!(addr = %local_addr, snapp_id = %state.app.snapp_id, "API listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
        })
        .await
        .context("API server exited unexpectedly")
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

async fn config(State(state): State<ApiState>) -> Json<AppConfig> {
    Json(state.app.clone())
}

/// Bodies are parsed leniently. Fields are read one by one as raw JSON, so a
/// mistyped field never discards its siblings; only an empty or non-object
/// body falls back to "no fields".
fn parse_body<T: for<'de> Deserialize<'de> + Default>(body: &Bytes) -> T {
    if body.is_empty() {
        return T::default();
    }
    serde_json::from_slice(body).unwrap_or_default()
}

async fn user_session(
    State(state): State<ApiState>,
    body: Bytes,
) -> Result<Json<SessionResolution>, ApiError> {
    let request: SessionRequest = parse_body(&body);
    let force_new = request.force_new();
    let resolution = state
        .sessions
        .resolve(request.existing_user_id(), force_new)
        .await
        .map_err(|err| {
            error!(error = %err, force_new, "failed to manage user session");
            ApiError::internal("Failed to manage user session")
        })?;
    Ok(Json(resolution))
}

async fn token(
    State(state): State<ApiState>,
    body: Bytes,
) -> Result<Json<TokenResponse>, ApiError> {
    let request: TokenRequest = parse_body(&body);
    let Some(user_id) = request
        .user_id
        .as_ref()
        .and_then(Value::as_str)
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
    else {
        return Err(ApiError::bad_request("userId is required"));
    };

    let issued = state.broker.mint(&user_id).await.map_err(|err| {
        error!(error = %err, user_id = %user_id, "failed to generate token");
        ApiError::internal("Failed to generate token")
    })?;
    info!(
        user_id = %user_id,
        expires_at_epoch_millis = issued.expires_at_epoch_millis,
        "ephemeral token issued"
    );
    Ok(Json(TokenResponse {
        token: issued.token,
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode},
    };
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::{ApiState, router};
    use crate::authority::testing::MemoryAuthority;
    use crate::client::api::AppConfig;

    fn state(authority: Arc<MemoryAuthority>) -> ApiState {
        ApiState::new(
            AppConfig {
                snapp_id: "snapp-1".to_string(),
                app_name: "Hello World Snapp".to_string(),
                server_url: None,
            },
            authority,
        )
    }

    async fn send(state: ApiState, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(if body.is_null() {
                Body::empty()
            } else {
                Body::from(body.to_string())
            })
            .expect("request");
        let response = router(state).oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn config_omits_server_url_by_default() {
        let (status, body) = send(
            state(Arc::new(MemoryAuthority::default())),
            "GET",
            "/api/config",
            Value::Null,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({"snappId": "snapp-1", "appName": "Hello World Snapp"})
        );
    }

    #[tokio::test]
    async fn health_reports_timestamp() {
        let (status, body) = send(
            state(Arc::new(MemoryAuthority::default())),
            "GET",
            "/health",
            Value::Null,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        let timestamp = body["timestamp"].as_str().expect("timestamp");
        assert!(chrono::DateTime::parse_from_rfc3339(timestamp).is_ok());
    }

    #[tokio::test]
    async fn session_creates_then_reuses() {
        let authority = Arc::new(MemoryAuthority::default());
        let state = state(authority);

        let (status, created) = send(state.clone(), "POST", "/api/user/session", json!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(created["isNew"], true);
        assert_eq!(created["message"], "Created new user");
        assert!(created["apiKey"].is_string());
        let user_id = created["userId"].as_str().expect("user id").to_string();

        let (status, reused) = send(
            state,
            "POST",
            "/api/user/session",
            json!({"existingUserId": user_id}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reused["isNew"], false);
        assert_eq!(reused["userId"], user_id.as_str());
        assert_eq!(reused["message"], "Using existing user ID");
        assert!(reused.get("apiKey").is_none());
    }

    #[tokio::test]
    async fn session_reuses_id_when_other_fields_are_mistyped() {
        let authority = Arc::new(MemoryAuthority::default());
        authority.insert_user("u-live");

        for body in [
            json!({"existingUserId": "u-live", "forceNew": null}),
            json!({"existingUserId": "u-live", "forceNew": "yes"}),
            json!({"existingUserId": "u-live", "extra": [1, 2]}),
        ] {
            let (status, resolved) =
                send(state(authority.clone()), "POST", "/api/user/session", body).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(resolved["userId"], "u-live");
            assert_eq!(resolved["isNew"], false);
        }
    }

    #[tokio::test]
    async fn session_outage_maps_to_500() {
        let authority = Arc::new(MemoryAuthority::default());
        authority.set_offline(true);
        let (status, body) = send(state(authority), "POST", "/api/user/session", json!({})).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({"error": "Failed to manage user session"}));
    }

    #[tokio::test]
    async fn token_requires_user_id() {
        let authority = Arc::new(MemoryAuthority::default());
        for body in [json!({}), json!({"userId": ""}), json!({"userId": "  "}), Value::Null] {
            let (status, response) = send(state(authority.clone()), "POST", "/api/token", body).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(response, json!({"error": "userId is required"}));
        }
    }

    #[tokio::test]
    async fn token_is_minted_for_known_user() {
        let authority = Arc::new(MemoryAuthority::default());
        authority.insert_user("alice");
        let (status, body) = send(
            state(authority),
            "POST",
            "/api/token",
            json!({"userId": "alice"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["token"].as_str().expect("token").starts_with("tok-alice-"));
    }

    #[tokio::test]
    async fn token_failure_maps_to_500() {
        let (status, body) = send(
            state(Arc::new(MemoryAuthority::default())),
            "POST",
            "/api/token",
            json!({"userId": "ghost"}),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({"error": "Failed to generate token"}));
    }
}
