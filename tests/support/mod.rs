#![allow(dead_code)]

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use axum::{
    Json, Router,
    extract::{Path as UrlPath, State},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
    routing::post,
};
use serde_json::{Value, json};
use tokio::process::{Child, Command};

pub const SNAPP_ID: &str = "snapp-test";
pub const SNAPP_API_KEY: &str = "test-api-key";

/// Stand-in for the bridge operator's REST API.
#[derive(Clone, Default)]
pub struct MockAuthority {
    users: Arc<Mutex<HashSet<String>>>,
    offline: Arc<AtomicBool>,
    next_user: Arc<AtomicU64>,
    issued: Arc<AtomicU64>,
}

impl MockAuthority {
    pub fn tokens_issued(&self) -> u64 {
        self.issued.load(Ordering::SeqCst)
    }

    /// Make user creation fail with 503 until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn forget(&self, user_id: &str) {
        self.users.lock().expect("users lock").remove(user_id);
    }
}

pub async fn spawn_mock_authority() -> Result<(String, MockAuthority)> {
    let authority = MockAuthority::default();
    let app = Router::new()
        .route("/api/snapps/{snapp}/users", post(create_user))
        .route("/api/snapps/{snapp}/tokens", post(issue_token))
        .with_state(authority.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((format!("http://{addr}/"), authority))
}

fn authorized(headers: &HeaderMap, snapp: &str) -> bool {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    snapp == SNAPP_ID && bearer == format!("Bearer {SNAPP_API_KEY}")
}

async fn create_user(
    State(authority): State<MockAuthority>,
    UrlPath(snapp): UrlPath<String>,
    headers: HeaderMap,
) -> Response {
    if !authorized(&headers, &snapp) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if authority.offline.load(Ordering::SeqCst) {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let n = authority.next_user.fetch_add(1, Ordering::SeqCst);
    let user_id = format!("mock-user-{n}");
    authority
        .users
        .lock()
        .expect("users lock")
        .insert(user_id.clone());
    Json(json!({
        "userId": user_id,
        "userApiKey": format!("uak_{n}"),
        "snappId": snapp,
        "mcpEndpoint": format!("https://bridge.test/mcp/{user_id}"),
        "createdAt": "2026-01-01T00:00:00Z"
    }))
    .into_response()
}

async fn issue_token(
    State(authority): State<MockAuthority>,
    UrlPath(snapp): UrlPath<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !authorized(&headers, &snapp) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let user_id = body["userId"].as_str().unwrap_or_default().to_string();
    let known = authority
        .users
        .lock()
        .expect("users lock")
        .contains(&user_id);
    if !known {
        return (StatusCode::NOT_FOUND, Json(json!({"error": "unknown user"}))).into_response();
    }
    let n = authority.issued.fetch_add(1, Ordering::SeqCst);
    Json(json!({
        "token": format!("tok-{user_id}-{n}"),
        "expiresAt": 1_700_000_010_000u64
    }))
    .into_response()
}

/// Spawn `snapp-bridge serve` on an ephemeral port and wait for it to publish
/// the port.
pub async fn spawn_server(authority_url: &str, temp: &Path) -> Result<(Child, u16)> {
    let bin = env!("CARGO_BIN_EXE_snapp-bridge");
    let port_file = temp.join("api-port");
    let child = Command::new(bin)
        .arg("serve")
        .arg("--host")
        .arg("127.0.0.1")
        .arg("--port")
        .arg("0")
        .arg("--port-file")
        .arg(&port_file)
        .env("SNAPP_ID", SNAPP_ID)
        .env("SNAPP_API_KEY", SNAPP_API_KEY)
        .env("SNAPPJACK_BRIDGE_SERVER_URL", authority_url)
        .env_remove("SNAPP_APP_NAME")
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let port = wait_for_port(&port_file).await?;
    Ok((child, port))
}

pub async fn wait_for_port(port_file: &Path) -> Result<u16> {
    let port = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(contents) = tokio::fs::read_to_string(port_file).await
                && let Ok(port) = contents.trim().parse::<u16>()
            {
                return port;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await?;
    Ok(port)
}
