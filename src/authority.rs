use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

use crate::config::SnappCredentials;

const HTTP_CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Identity bundle returned by the upstream authority when a user is created.
///
/// `user_api_key` is only ever visible at creation time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CreatedUser {
    pub user_id: String,
    pub user_api_key: String,
    pub snapp_id: String,
    pub mcp_endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EphemeralToken {
    pub token: String,
    /// Expiry instant as epoch milliseconds.
    #[serde(rename = "expiresAt")]
    pub expires_at_epoch_millis: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthorityError {
    /// The authority answered that the user does not exist or the id is bad.
    #[error("upstream authority rejected the request with status {status}")]
    Rejected { status: u16 },
    /// The authority could not be reached or refused for reasons unrelated to
    /// the user (server fault, credentials, rate limiting).
    #[error("upstream authority unavailable: {0}")]
    Unavailable(String),
}

impl AuthorityError {
    /// Only statuses that speak about the user itself count as a rejection;
    /// auth and throttling failures must not discard a valid id.
    fn from_status(status: StatusCode) -> Self {
        match status {
            StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND | StatusCode::GONE => Self::Rejected {
                status: status.as_u16(),
            },
            _ => Self::Unavailable(format!("unexpected status {status}")),
        }
    }
}

/// The trusted upstream identity authority (the bridge operator's REST API).
pub trait Authority: Send + Sync {
    fn create_user(&self) -> BoxFuture<'_, Result<CreatedUser, AuthorityError>>;

    fn issue_token<'a>(
        &'a self,
        user_id: &'a str,
    ) -> BoxFuture<'a, Result<EphemeralToken, AuthorityError>>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenRequest<'a> {
    user_id: &'a str,
}

#[derive(Clone)]
pub struct HttpAuthority {
    credentials: SnappCredentials,
    base_url: Url,
    http: Client,
}

impl HttpAuthority {
    pub fn new(credentials: SnappCredentials, base_url: Url) -> Self {
        let http = match Client::builder().timeout(HTTP_CLIENT_TIMEOUT).build() {
            Ok(client) => client,
            Err(err) => {
                warn!(error = %err, "failed to build configured HTTP client; falling back to default reqwest client");
                Client::new()
            }
        };

        Self {
            credentials,
            base_url,
            http,
        }
    }

    fn snapp_url(&self, suffix: &str) -> Result<Url, AuthorityError> {
        let path = format!(
            "api/snapps/{snapp_id}/{suffix}",
            snapp_id = self.credentials.snapp_id
        );
        self.base_url
            .join(&path)
            .map_err(|err| AuthorityError::Unavailable(format!("invalid authority URL: {err}")))
    }

    async fn post_json<B, R>(&self, url: Url, body: &B) -> Result<R, AuthorityError>
    where
        B: Serialize + ?Sized,
        R: for<'de> Deserialize<'de>,
    {
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.credentials.api_key)
            .json(body)
            .send()
            .await
            .map_err(|err| AuthorityError::Unavailable(err.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthorityError::from_status(status));
        }

        response
            .json::<R>()
            .await
            .map_err(|err| AuthorityError::Unavailable(format!("invalid response body: {err}")))
    }
}

impl Authority for HttpAuthority {
    fn create_user(&self) -> BoxFuture<'_, Result<CreatedUser, AuthorityError>> {
        Box::pin(async move {
            let url = self.snapp_url("users")?;
            self.post_json(url, &serde_json::json!({})).await
        })
    }

    fn issue_token<'a>(
        &'a self,
        user_id: &'a str,
    ) -> BoxFuture<'a, Result<EphemeralToken, AuthorityError>> {
        Box::pin(async move {
            let url = self.snapp_url("tokens")?;
            self.post_json(url, &TokenRequest { user_id }).await
        })
    }
}


#[cfg(test)]
mod tests {
    use axum::{
        Json, Router,
        extract::Path,
        http::{HeaderMap, StatusCode, header::AUTHORIZATION},
        routing::post,
    };
    use serde_json::{Value, json};
    use url::Url;

    use super::{Authority, AuthorityError, HttpAuthority};
    use crate::config::SnappCredentials;

    fn credentials() -> SnappCredentials {
        SnappCredentials {
            snapp_id: "snapp-1".to_string(),
            api_key: "wak_secret".to_string(),
        }
    }

    fn authorized(headers: &HeaderMap) -> bool {
        headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            == Some("Bearer wak_secret")
    }

    async fn spawn_authority_server() -> (Url, tokio::task::JoinHandle<()>) {
        let app = Router::new()
            .route(
                "/api/snapps/{snapp}/users",
                post(
                    |Path(snapp): Path<String>, headers: HeaderMap| async move {
                        if !authorized(&headers) {
                            return (StatusCode::UNAUTHORIZED, Json(json!({"error": "denied"})));
                        }
                        (
                            StatusCode::OK,
                            Json(json!({
                                "userId": "u-created",
                                "userApiKey": "uak_created",
                                "snappId": snapp,
                                "mcpEndpoint": "https://bridge.example/mcp/u-created",
                                "createdAt": "2026-01-01T00:00:00Z"
                            })),
                        )
                    },
                ),
            )
            .route(
                "/api/snapps/{snapp}/tokens",
                post(
                    |headers: HeaderMap, Json(body): Json<Value>| async move {
                        if !authorized(&headers) {
                            return (StatusCode::UNAUTHORIZED, Json(json!({"error": "denied"})));
                        }
                        match body.get("userId").and_then(Value::as_str) {
                            Some("u-known") => (
                                StatusCode::OK,
                                Json(json!({"token": "eph-1", "expiresAt": 1_700_000_010_000u64})),
                            ),
                            Some("u-broken") => (
                                StatusCode::BAD_GATEWAY,
                                Json(json!({"error": "upstream down"})),
                            ),
                            Some("u-throttled") => (
                                StatusCode::TOO_MANY_REQUESTS,
                                Json(json!({"error": "slow down"})),
                            ),
                            Some("u-forbidden") => (
                                StatusCode::FORBIDDEN,
                                Json(json!({"error": "snapp suspended"})),
                            ),
                            _ => (StatusCode::NOT_FOUND, Json(json!({"error": "unknown user"}))),
                        }
                    },
                ),
            );

        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0))
            .await
            .expect("bind authority listener");
        let addr = listener.local_addr().expect("authority listener addr");
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let base = Url::parse(&format!("http://{addr}/")).expect("authority base url");
        (base, handle)
    }

    #[tokio::test]
    async fn create_user_decodes_identity_bundle() {
        let (base, handle) = spawn_authority_server().await;
        let authority = HttpAuthority::new(credentials(), base);

        let created = authority.create_user().await.expect("create should succeed");
        handle.abort();

        assert_eq!(created.user_id, "u-created");
        assert_eq!(created.user_api_key, "uak_created");
        assert_eq!(created.snapp_id, "snapp-1");
        assert_eq!(created.created_at.as_deref(), Some("2026-01-01T00:00:00Z"));
    }

    #[tokio::test]
    async fn issue_token_returns_token_for_known_user() {
        let (base, handle) = spawn_authority_server().await;
        let authority = HttpAuthority::new(credentials(), base);

        let token = authority
            .issue_token("u-known")
            .await
            .expect("token should be issued");
        handle.abort();

        assert_eq!(token.token, "eph-1");
        assert_eq!(token.expires_at_epoch_millis, 1_700_000_010_000);
    }

    #[tokio::test]
    async fn issue_token_classifies_rejection_and_outage() {
        let (base, handle) = spawn_authority_server().await;
        let authority = HttpAuthority::new(credentials(), base);

        let rejected = authority
            .issue_token("u-missing")
            .await
            .expect_err("unknown user must be rejected");
        assert!(matches!(rejected, AuthorityError::Rejected { status: 404 }));

        let outage = authority
            .issue_token("u-broken")
            .await
            .expect_err("server fault must fail");
        assert!(matches!(outage, AuthorityError::Unavailable(_)));
        handle.abort();
    }

    #[tokio::test]
    async fn issue_token_treats_auth_and_throttling_as_outage() {
        let (base, handle) = spawn_authority_server().await;
        let authority = HttpAuthority::new(credentials(), base);

        for user_id in ["u-throttled", "u-forbidden"] {
            let err = authority
                .issue_token(user_id)
                .await
                .expect_err("non-user failure must fail");
            assert!(
                matches!(err, AuthorityError::Unavailable(_)),
                "{user_id}: {err}"
            );
        }
        handle.abort();
    }

    #[test]
    fn only_user_statuses_are_rejections() {
        for status in [StatusCode::BAD_REQUEST, StatusCode::NOT_FOUND, StatusCode::GONE] {
            assert!(matches!(
                AuthorityError::from_status(status),
                AuthorityError::Rejected { .. }
            ));
        }
        for status in [
            StatusCode::UNAUTHORIZED,
            StatusCode::FORBIDDEN,
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::INTERNAL_SERVER_ERROR,
        ] {
            assert!(matches!(
                AuthorityError::from_status(status),
                AuthorityError::Unavailable(_)
            ));
        }
    }

    #[tokio::test]
    async fn unreachable_authority_is_unavailable() {
        let base = Url::parse("http://127.0.0.1:9/").expect("url");
        let authority = HttpAuthority::new(credentials(), base);

        let err = authority
            .create_user()
            .await
            .expect_err("closed port must fail");
        assert!(matches!(err, AuthorityError::Unavailable(_)));
        assert!(!err.to_string().contains("wak_secret"));
    }
}
