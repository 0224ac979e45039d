use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use rmcp::{
    ErrorData as McpError, RoleServer, ServerHandler, ServiceExt,
    model::{
        CallToolRequestParams, CallToolResult, Content, ListToolsResult, PaginatedRequestParams,
        ServerCapabilities, ServerInfo, Tool,
    },
    service::RequestContext,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::tools::{ToolDescriptor, ToolRegistry, ToolResult};

/// Exposes a [`ToolRegistry`] as an MCP server so a local agent can drive the
/// same capabilities the bridge relay forwards.
#[derive(Clone)]
pub struct ToolServer {
    registry: Arc<ToolRegistry>,
    app_name: String,
}

impl ToolServer {
    pub fn new(registry: Arc<ToolRegistry>, app_name: impl Into<String>) -> Self {
        Self {
            registry,
            app_name: app_name.into(),
        }
    }
}

fn to_mcp_tool(descriptor: ToolDescriptor) -> Tool {
    Tool::new(
        descriptor.name,
        descriptor.description,
        Arc::new(descriptor.input_schema),
    )
}

fn to_call_result(result: ToolResult) -> CallToolResult {
    let content = result
        .content
        .into_iter()
        .map(|item| Content::text(item.text))
        .collect::<Vec<_>>();
    if result.is_error {
        CallToolResult::error(content)
    } else {
        CallToolResult::success(content)
    }
}

impl ServerHandler for ToolServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(format!(
                "{}: read and update the textarea shared with the user.",
                self.app_name
            )),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        Ok(ListToolsResult {
            meta: None,
            next_cursor: None,
            tools: self
                .registry
                .descriptors()
                .into_iter()
                .map(to_mcp_tool)
                .collect(),
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let result = self
            .registry
            .invoke(request.name.as_ref(), request.arguments)
            .await;
        Ok(to_call_result(result))
    }

    fn get_tool(&self, name: &str) -> Option<Tool> {
        self.registry
            .descriptors()
            .into_iter()
            .find(|tool| tool.name == name)
            .map(to_mcp_tool)
    }
}

pub async fn run_stdio(server: ToolServer, shutdown: CancellationToken) -> Result<()> {
    let service = server
        .serve(rmcp::transport::stdio())
        .await
        .context("failed to start MCP stdio server")?;
    info!("tool registry serving over MCP stdio");

    let cancellation = service.cancellation_token();
    let mut waiter = tokio::spawn(async move { service.waiting().await });

    tokio::select! {
        _ = shutdown.cancelled() => {
            cancellation.cancel();
            match tokio::time::timeout(Duration::from_secs(3), &mut waiter).await {
                Ok(joined) => handle_waiter_result(joined),
                Err(_) => Err(anyhow!("timed out waiting for MCP service shutdown")),
            }
        }
        joined = &mut waiter => handle_waiter_result(joined),
    }
}

fn handle_waiter_result(
    joined: Result<
        Result<rmcp::service::QuitReason, tokio::task::JoinError>,
        tokio::task::JoinError,
    >,
) -> Result<()> {
    match joined {
        Ok(Ok(reason)) => {
            warn!(reason = ?reason, "MCP service exited");
            Ok(())
        }
        Ok(Err(err)) => Err(anyhow!(err)).context("MCP service wait failed"),
        Err(err) => Err(anyhow!(err)).context("MCP waiter task failed"),
    }
}
