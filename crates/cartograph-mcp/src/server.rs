//! MCP server setup and lifecycle.
//!
//! Provides [`run_server`] which starts the stdio-based MCP server,
//! registering the graph tools and blocking until the client disconnects.

use cartograph_core::{CartographConfig, CartographError};
use cartograph_graph::RepoSource;
use rmcp::{model::*, tool_handler, transport::stdio, ServerHandler, ServiceExt};

use crate::tools::CartographServer;

const SERVER_INSTRUCTIONS: &str = "\
cartograph builds a code knowledge graph of one repository (symbols, calls, imports, \
inheritance, communities, execution flows). The graph is built on the first tool call.\n\
- graph_overview: start here for counts, communities, flows and hot symbols\n\
- search_graph: find node ids by name, word, or path\n\
- node_context: callers, callees, community, flows and imports of one node\n\
- impact_analysis: blast radius and risk level of changing symbols";

#[tool_handler]
impl ServerHandler for CartographServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "cartograph".to_string(),
                title: Some("Cartograph Code Graph".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: Some("Code knowledge graph: search, context and impact analysis".to_string()),
                icons: None,
                website_url: None,
            },
            instructions: Some(SERVER_INSTRUCTIONS.to_string()),
        }
    }
}

/// Start the MCP server on stdio transport.
///
/// This is called by the `cartograph mcp` CLI subcommand. It blocks until
/// the client closes stdin, then cancels any graph build still running.
///
/// # Errors
///
/// Returns [`CartographError`] if the server fails to initialize or encounters
/// a transport error.
///
/// # Examples
///
/// ```no_run
/// use std::path::PathBuf;
/// use cartograph_core::CartographConfig;
/// use cartograph_graph::RepoSource;
///
/// # async fn example() -> Result<(), cartograph_core::CartographError> {
/// cartograph_mcp::server::run_server(CartographConfig::default(), RepoSource::Local(PathBuf::from("."))).await?;
/// # Ok(())
/// # }
/// ```
pub async fn run_server(config: CartographConfig, source: RepoSource) -> Result<(), CartographError> {
    let server = CartographServer::new(config, source)?;
    let cancel = server.cancellation();
    tracing::info!("starting MCP server on stdio");
    let service = server
        .serve(stdio())
        .await
        .map_err(|e| CartographError::Config(format!("MCP server failed to start: {e}")))?;

    let outcome = service
        .waiting()
        .await
        .map_err(|e| CartographError::Config(format!("MCP server error: {e}")));
    cancel.cancel();
    outcome?;

    Ok(())
}
