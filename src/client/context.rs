use std::sync::Arc;

use anyhow::{Context, Result};
use futures::FutureExt;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::api::{ApiClient, AppConfig, SessionInfo};
use super::bridge::{BridgeTransport, EventReceiver, TokenProvider, TransportError};
use super::descriptor::{McpConnection, render_client_config, server_label};
use super::machine::{ConnectionMachine, ConnectionState, UiNotification};
use super::profile::ProfileStore;

pub type NotificationSender = mpsc::UnboundedSender<UiNotification>;
pub type NotificationReceiver = mpsc::UnboundedReceiver<UiNotification>;

pub fn notification_channel() -> (NotificationSender, NotificationReceiver) {
    mpsc::unbounded_channel()
}

#[derive(Debug, thiserror::Error)]
pub enum ToggleError {
    #[error("no active bridge connection")]
    Unavailable,
    #[error("failed to update auth requirement: {0}")]
    Propagation(TransportError),
    #[error("auth requirement updated but reconnect failed: {0}")]
    Reconnect(TransportError),
}

/// Everything one client session needs: the resolved identity, the relay
/// transport and the connection state it drives.
pub struct SessionContext {
    api: ApiClient,
    app: AppConfig,
    session: SessionInfo,
    transport: Arc<dyn BridgeTransport>,
    machine: Arc<Mutex<ConnectionMachine>>,
    notifications: NotificationSender,
}

impl SessionContext {
    /// Load app config, resolve the session (reusing the stored id unless
    /// `force_new`), persist the id, then connect the transport.
    pub async fn bootstrap(
        api: ApiClient,
        profile: &ProfileStore,
        transport: Arc<dyn BridgeTransport>,
        notifications: NotificationSender,
        force_new: bool,
    ) -> Result<Self> {
        let machine = Arc::new(Mutex::new(ConnectionMachine::new()));
        Self::establish(api, profile, transport, machine, notifications, force_new).await
    }

    async fn establish(
        api: ApiClient,
        profile: &ProfileStore,
        transport: Arc<dyn BridgeTransport>,
        machine: Arc<Mutex<ConnectionMachine>>,
        notifications: NotificationSender,
        force_new: bool,
    ) -> Result<Self> {
        let app = match api.app_config().await {
            Ok(app) => app,
            Err(err) => {
                let _ = notifications.send(UiNotification::banner(format!(
                    "Failed to load app configuration: {err}"
                )));
                return Err(err).context("failed to load app configuration");
            }
        };

        let existing = if force_new {
            None
        } else {
            match profile.load_user_id() {
                Ok(existing) => existing,
                Err(err) => {
                    warn!(error = %err, "ignoring unreadable profile");
                    None
                }
            }
        };

        let session = match api.resolve_session(existing.as_deref(), force_new).await {
            Ok(session) => session,
            Err(err) => {
                warn!(error = %err, "session resolution failed");
                let _ = notifications.send(UiNotification::banner(format!(
                    "Failed to manage user session: {err}"
                )));
                return Err(err).context("failed to resolve user session");
            }
        };
        info!(
            user_id = %session.user_id,
            is_new = session.is_new,
            message = %session.message,
            "session resolved"
        );
        profile
            .save_user_id(&session.user_id)
            .context("failed to persist user id")?;

        let context = Self {
            api,
            app,
            session,
            transport,
            machine,
            notifications,
        };
        if let Err(err) = context.connect().await {
            context.notify(vec![UiNotification::banner(format!(
                "Failed to connect to bridge: {err}"
            ))]);
            return Err(err).context("failed to connect to bridge relay");
        }
        Ok(context)
    }

    pub fn app(&self) -> &AppConfig {
        &self.app
    }

    pub fn session(&self) -> &SessionInfo {
        &self.session
    }

    pub fn user_id(&self) -> &str {
        &self.session.user_id
    }

    pub async fn state(&self) -> ConnectionState {
        self.machine.lock().await.state()
    }

    pub async fn require_auth_header(&self) -> bool {
        self.machine.lock().await.require_auth_header()
    }

    pub async fn descriptor(&self) -> Option<McpConnection> {
        self.machine.lock().await.descriptor().cloned()
    }

    /// Pretty-printed MCP client configuration for the current descriptor.
    pub async fn client_config(&self) -> Option<String> {
        let descriptor = self.descriptor().await?;
        Some(render_client_config(
            &server_label(&self.app.app_name),
            &descriptor,
        ))
    }

    /// Provider handed to the transport; each call fetches a fresh token.
    pub fn token_provider(&self) -> TokenProvider {
        let api = self.api.clone();
        let user_id = self.session.user_id.clone();
        Arc::new(move || {
            let api = api.clone();
            let user_id = user_id.clone();
            async move { api.ephemeral_token(&user_id).await }.boxed()
        })
    }

    pub async fn connect(&self) -> Result<(), TransportError> {
        debug!(user_id = %self.session.user_id, "connecting to bridge relay");
        self.transport.connect(self.token_provider()).await
    }

    /// Apply relay events in arrival order until the sender side closes.
    pub fn spawn_event_pump(&self, mut events: EventReceiver) -> JoinHandle<()> {
        let machine = self.machine.clone();
        let notifications = self.notifications.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let emitted = machine.lock().await.apply(event);
                for notification in emitted {
                    if notifications.send(notification).is_err() {
                        debug!("notification receiver dropped; stopping event pump");
                        return;
                    }
                }
            }
            debug!("bridge event stream closed");
        })
    }

    /// Flip the currently displayed auth requirement.
    pub async fn toggle(&self) -> Result<bool, ToggleError> {
        let current = self.machine.lock().await.require_auth_header();
        self.set_requirement(!current).await
    }

    /// The relay must acknowledge the new value before anything local
    /// changes; a rejected update leaves the previous value in place.
    pub async fn set_requirement(&self, require_auth_header: bool) -> Result<bool, ToggleError> {
        if !self.machine.lock().await.has_connection() {
            warn!("auth toggle requested without an active connection");
            self.notify(vec![UiNotification::banner(
                "Cannot change auth requirement: not connected",
            )]);
            return Err(ToggleError::Unavailable);
        }

        if let Err(err) = self
            .transport
            .update_auth_requirement(require_auth_header)
            .await
        {
            warn!(error = %err, require_auth_header, "auth requirement update rejected");
            self.notify(vec![UiNotification::banner(format!(
                "Failed to update auth requirement: {err}"
            ))]);
            return Err(ToggleError::Propagation(err));
        }

        let emitted = self
            .machine
            .lock()
            .await
            .confirm_auth_requirement(require_auth_header);
        self.notify(emitted);
        info!(require_auth_header, "auth requirement updated; reconnecting");

        if let Err(err) = self.connect().await {
            self.notify(vec![UiNotification::banner(format!(
                "Failed to reconnect to bridge: {err}"
            ))]);
            return Err(ToggleError::Reconnect(err));
        }
        Ok(require_auth_header)
    }

    /// Tear this session down and bootstrap a brand new identity on the same
    /// transport and state machine. The stored id is cleared first, so a
    /// failed renewal never resurrects the discarded user.
    pub async fn renew(self, profile: &ProfileStore) -> Result<Self> {
        let Self {
            api,
            transport,
            machine,
            notifications,
            session,
            ..
        } = self;
        info!(user_id = %session.user_id, "discarding session for a new identity");
        if let Err(err) = profile.clear_user_id() {
            warn!(error = %err, "failed to clear stored user id");
        }
        let was_disconnected = {
            let mut guard = machine.lock().await;
            let was_disconnected = guard.state() == ConnectionState::Disconnected;
            guard.reset();
            was_disconnected
        };
        if !was_disconnected {
            let _ = notifications.send(UiNotification::StateChanged(
                ConnectionState::Disconnected,
            ));
        }
        Self::establish(api, profile, transport, machine, notifications, true).await
    }

    fn notify(&self, notifications: Vec<UiNotification>) {
        for notification in notifications {
            if self.notifications.send(notification).is_err() {
                debug!("notification receiver dropped");
                return;
            }
        }
    }
}
