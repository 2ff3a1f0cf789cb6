//! MCP server implementation using rmcp.
//!
//! Exposes the execution engine as MCP tools. This layer only translates
//! parameters and renders outcomes; all behavior lives in the pipeline.

use std::sync::Arc;

use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, Content, Implementation, ServerCapabilities, ServerInfo};
use rmcp::schemars;
use rmcp::transport::stdio;
use rmcp::{tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler, ServiceExt};
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::info;

use crate::outcome::{ExecutionOutcome, ExecutionRequest};
use crate::pipeline::Executor;
use crate::process::ProcessRunner;

/// MCP server for code execution.
#[derive(Clone)]
pub struct ExecServer<R: Clone> {
    executor: Arc<Executor<R>>,
    tool_router: ToolRouter<Self>,
}

/// Parameters for the execute tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ExecuteParams {
    /// Language identifier (e.g., "python", "cpp", "rust").
    #[schemars(description = "Language identifier, e.g. 'python', 'cpp', 'rust', 'haskell', 'lean4'")]
    pub language: String,

    /// Source code of the program.
    #[schemars(description = "Complete source code of the program to run")]
    pub code: String,

    /// Text piped to the program's standard input.
    #[schemars(description = "Optional text passed to the program on stdin")]
    #[serde(default)]
    pub input_data: Option<String>,
}

#[tool_router]
impl<R: ProcessRunner + Clone + Send + Sync + 'static> ExecServer<R> {
    /// Create a new server around a shared executor.
    pub fn new(executor: Arc<Executor<R>>) -> Self {
        Self {
            executor,
            tool_router: Self::tool_router(),
        }
    }

    /// Compile (if needed) and run a program.
    #[tool(description = "Compile if needed and run a code snippet, returning its output")]
    async fn execute(
        &self,
        Parameters(params): Parameters<ExecuteParams>,
    ) -> Result<CallToolResult, McpError> {
        let registry = self.executor.registry();
        if !registry.contains(&params.language) {
            return Err(McpError::invalid_params(
                format!(
                    "Unsupported language: '{}'. Available: {:?}",
                    params.language,
                    registry.languages()
                ),
                None,
            ));
        }

        info!(language = %params.language, code_len = params.code.len(), "Executing code");

        let request = ExecutionRequest {
            language: params.language,
            code: params.code,
            input_data: params.input_data,
        };
        let outcome = self.executor.execute(&request).await;

        let content = vec![Content::text(render(&outcome))];
        if outcome.is_success() {
            Ok(CallToolResult::success(content))
        } else {
            Ok(CallToolResult::error(content))
        }
    }

    /// List supported languages.
    #[tool(description = "List the language identifiers accepted by 'execute'")]
    async fn supported_languages(&self) -> Result<CallToolResult, McpError> {
        let languages = self.executor.registry().languages();
        let body = serde_json::json!({ "languages": languages });
        Ok(CallToolResult::success(vec![Content::text(body.to_string())]))
    }
}

/// Combine output and error into a single text block.
fn render(outcome: &ExecutionOutcome) -> String {
    match &outcome.error {
        None => outcome.output.clone(),
        Some(error) if outcome.output.is_empty() => error.clone(),
        Some(error) => format!("{}\n--- error ---\n{}", outcome.output, error),
    }
}

#[tool_handler]
impl<R: ProcessRunner + Clone + Send + Sync + 'static> ServerHandler for ExecServer<R> {
    fn get_info(&self) -> ServerInfo {
        let languages = self.executor.registry().languages();

        ServerInfo {
            protocol_version: rmcp::model::ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "polyexec".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                title: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(format!(
                "Compile and run code snippets. Not a security sandbox: only a time limit \
                 and a memory ceiling are enforced.\n\
                 Supported languages: {languages:?}\n\
                 \n\
                 Use the 'execute' tool with:\n\
                 - language: one of {languages:?}\n\
                 - code: the complete program\n\
                 - input_data (optional): text for stdin"
            )),
        }
    }
}

/// Serve the execution server over stdio.
pub async fn serve_stdio<R: ProcessRunner + Clone + Send + Sync + 'static>(
    executor: Arc<Executor<R>>,
) -> anyhow::Result<()> {
    let server = ExecServer::new(executor);

    info!("Starting MCP server on stdio");

    let service = server
        .serve(stdio())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to start MCP server: {e}"))?;

    service
        .waiting()
        .await
        .map_err(|e| anyhow::anyhow!("MCP server error: {e}"))?;

    Ok(())
}
