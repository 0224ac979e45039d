use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use crate::client::api::ApiClient;
use crate::client::profile::ProfileStore;
use crate::config::{DEFAULT_APP_NAME, ServerSettings};
use crate::mcp::{self, ToolServer};
use crate::server;
use crate::tools::{SharedText, ToolRegistry};

const DEFAULT_API_URL: &str = "http://127.0.0.1:3001";

#[derive(Debug, Parser)]
#[command(
    name = "snapp-bridge",
    version,
    about = "Ephemeral credential service and bridge client for agent-driven snapps"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the HTTP API.
    Serve(ServeArgs),
    /// Resolve a session against a running API and remember the user id.
    Session(SessionArgs),
    /// Mint an ephemeral token for the remembered user id.
    Token(TokenArgs),
    /// Serve the shared textarea tools over MCP stdio.
    Tools(ToolsArgs),
}

#[derive(Debug, Clone, Args)]
pub struct ServeArgs {
    /// Listener address.
    #[arg(long, env = "HOST", default_value = "127.0.0.1")]
    pub host: IpAddr,
    /// Listener port.
    #[arg(long, env = "PORT", default_value_t = 3001)]
    pub port: u16,
    /// Optional file path to write the resolved listener port.
    #[arg(long, hide = true)]
    pub port_file: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct SessionArgs {
    /// Discard the remembered user and create a new one.
    #[arg(long, default_value_t = false)]
    force_new: bool,
    #[arg(long, default_value = DEFAULT_API_URL)]
    api_url: String,
}

#[derive(Debug, Args)]
struct TokenArgs {
    #[arg(long, default_value = DEFAULT_API_URL)]
    api_url: String,
}

#[derive(Debug, Args)]
struct ToolsArgs {
    /// Name reported to MCP clients.
    #[arg(long, env = "SNAPP_APP_NAME", default_value = DEFAULT_APP_NAME)]
    app_name: String,
    /// Initial textarea content.
    #[arg(long, default_value = "")]
    text: String,
}

pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Serve(args) => {
            let settings = ServerSettings::from_env()?;
            server::serve(args, settings).await
        }
        Commands::Session(args) => {
            let profile = ProfileStore::new_default()?;
            let api = ApiClient::new(&args.api_url)?;
            let existing = if args.force_new {
                None
            } else {
                profile.load_user_id()?
            };
            let session = api
                .resolve_session(existing.as_deref(), args.force_new)
                .await
                .context("failed to resolve user session")?;
            profile.save_user_id(&session.user_id)?;

            println!("{}\t{}", session.user_id, session.message);
            if let Some(endpoint) = &session.mcp_endpoint {
                println!("mcp endpoint: {endpoint}");
            }
            if let Some(api_key) = &session.api_key {
                println!("user api key (shown once): {api_key}");
            }
            Ok(())
        }
        Commands::Token(args) => {
            let profile = ProfileStore::new_default()?;
            let api = ApiClient::new(&args.api_url)?;
            let user_id = profile.load_user_id()?.unwrap_or_default();
            let token = api
                .ephemeral_token(&user_id)
                .await
                .context("failed to mint ephemeral token")?;
            println!("{token}");
            Ok(())
        }
        Commands::Tools(args) => {
            let text = Arc::new(SharedText::new(args.text));
            let registry = Arc::new(ToolRegistry::with_textarea(text)?);
            let shutdown = CancellationToken::new();
            let stop = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    stop.cancel();
                }
            });
            mcp::run_stdio(ToolServer::new(registry, args.app_name), shutdown).await
        }
    }
}
