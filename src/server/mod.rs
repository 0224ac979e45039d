pub mod api;

use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cli::ServeArgs;
use crate::config::ServerSettings;

pub use api::{ApiBindOptions, ApiState, router};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn serve(args: ServeArgs, settings: ServerSettings) -> Result<()> {
    info!(
        snapp_id = %settings.credentials.snapp_id,
        app_name = %settings.app_name,
        custom_bridge = settings.bridge_server_url.is_some(),
        "server settings resolved"
    );
    let state = ApiState::from_settings(&settings)?;
    let bind = ApiBindOptions {
        host: args.host,
        port: args.port,
        port_file: args.port_file,
    };

    let shutdown = CancellationToken::new();
    let mut server = tokio::spawn(api::run(bind, state, shutdown.child_token()));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
        }
        joined = &mut server => {
            return match joined {
                Ok(Ok(())) => {
                    info!("API task exited");
                    Ok(())
                }
                Ok(Err(err)) => {
                    error!(error = %err, "API task failed");
                    Err(err)
                }
                Err(err) => Err(anyhow::anyhow!(err).context("API task panicked")),
            };
        }
    }

    shutdown.cancel();
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut server).await {
        Ok(Ok(result)) => result,
        Ok(Err(err)) => Err(anyhow::anyhow!(err).context("API task panicked during shutdown")),
        Err(_) => {
            warn!("graceful shutdown timed out, exiting");
            server.abort();
            Ok(())
        }
    }
}
