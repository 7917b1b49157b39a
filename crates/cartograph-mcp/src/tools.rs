//! Tool implementations for the cartograph MCP server.
//!
//! Four tools are exposed: `search_graph`, `node_context`, `impact_analysis`,
//! and `graph_overview`. Each reads the repository graph (built on first
//! call) and returns markdown, or JSON when `format` is `"json"`.

use std::sync::Arc;

use cartograph_agent::{GraphOverview, NodeContext};
use cartograph_core::{CartographConfig, CartographError, CodeGraph, OutputFormat};
use cartograph_graph::index::GraphIndex;
use cartograph_graph::provider::Credential;
use cartograph_graph::{GraphService, RepoSource};
use cartograph_search::CodeSearchEngine;
use rmcp::{
    handler::server::{tool::ToolRouter, wrapper::Parameters},
    model::*,
    schemars, tool, tool_router, ErrorData as McpError,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

const DEFAULT_LIMIT: usize = 10;
const MAX_LIMIT: usize = 100;

/// MCP server exposing graph queries for one repository.
///
/// # Examples
///
/// ```
/// use std::path::PathBuf;
/// use cartograph_core::CartographConfig;
/// use cartograph_graph::RepoSource;
/// use cartograph_mcp::tools::CartographServer;
///
/// let server = CartographServer::new(CartographConfig::default(), RepoSource::Local(PathBuf::from("."))).unwrap();
/// ```
#[derive(Clone)]
pub struct CartographServer {
    pub(crate) state: Arc<ServerState>,
    pub(crate) tool_router: ToolRouter<Self>,
}

pub(crate) struct ServerState {
    config: CartographConfig,
    source: RepoSource,
    credential: Credential,
    service: GraphService,
    cancel: CancellationToken,
}

// --- Parameter structs ---

/// Parameters for the `search_graph` tool.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct SearchGraphParams {
    /// Search query (identifiers, words, or paths).
    pub query: String,
    /// Maximum results (default: 10).
    pub limit: Option<usize>,
    /// "markdown" (default) or "json".
    pub format: Option<String>,
}

/// Parameters for the `node_context` tool.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct NodeContextParams {
    /// Node id, e.g. `function:src/auth.ts::handleLogin`.
    pub node_id: String,
    /// "markdown" (default) or "json".
    pub format: Option<String>,
}

/// Parameters for the `impact_analysis` tool.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ImpactAnalysisParams {
    /// Ids of the changed symbols.
    pub symbol_ids: Vec<String>,
    /// "markdown" (default) or "json".
    pub format: Option<String>,
}

/// Parameters for the `graph_overview` tool.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct GraphOverviewParams {
    /// "markdown" (default) or "json".
    pub format: Option<String>,
}

// --- Response structs ---

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    query: String,
    results: Vec<cartograph_search::SearchResult>,
    total: usize,
}

fn mcp_err(msg: impl Into<String>) -> McpError {
    McpError::internal_error(msg.into(), None)
}

fn graph_err(e: CartographError) -> McpError {
    match e {
        CartographError::NotFound(what) => McpError::invalid_params(format!("not found: {what}"), None),
        other => mcp_err(other.to_string()),
    }
}

fn output_format(format: &Option<String>) -> Result<OutputFormat, McpError> {
    match format {
        None => Ok(OutputFormat::Markdown),
        Some(f) => f
            .parse()
            .map_err(|e: String| McpError::invalid_params(e, None)),
    }
}

fn respond<T: Serialize>(
    format: OutputFormat,
    value: &T,
    markdown: impl FnOnce(&T) -> String,
) -> Result<CallToolResult, McpError> {
    let text = match format {
        OutputFormat::Json => {
            serde_json::to_string_pretty(value).map_err(|e| mcp_err(e.to_string()))?
        }
        OutputFormat::Markdown | OutputFormat::Text => markdown(value),
    };
    Ok(CallToolResult::success(vec![Content::text(text)]))
}

#[tool_router]
impl CartographServer {
    /// Create a server for `source`.
    ///
    /// # Errors
    ///
    /// Returns [`CartographError`] if the data provider cannot be created.
    pub fn new(config: CartographConfig, source: RepoSource) -> Result<Self, CartographError> {
        let service = GraphService::for_source(&source, &config)?;
        let credential = source.credential(&config);
        Ok(Self {
            state: Arc::new(ServerState {
                config,
                source,
                credential,
                service,
                cancel: CancellationToken::new(),
            }),
            tool_router: Self::tool_router(),
        })
    }

    /// Token that aborts in-flight graph builds.
    pub fn cancellation(&self) -> CancellationToken {
        self.state.cancel.clone()
    }

    async fn graph(&self) -> Result<Arc<CodeGraph>, McpError> {
        let state = &self.state;
        state
            .service
            .graph_for(&state.source, &state.credential, &state.cancel)
            .await
            .map_err(|e| mcp_err(format!("Failed to build graph for {}: {e}", state.source.repo())))
    }

    #[tool(
        name = "search_graph",
        description = "Hybrid keyword search (BM25 + term overlap, fused with reciprocal rank fusion) over every function, class, interface, type and file in the repository's code graph. Returns ranked node ids to pass to node_context or impact_analysis."
    )]
    pub async fn search_graph(
        &self,
        Parameters(params): Parameters<SearchGraphParams>,
    ) -> Result<CallToolResult, McpError> {
        let format = output_format(&params.format)?;
        let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let graph = self.graph().await?;
        let engine = CodeSearchEngine::new(&graph, &self.state.config.search);
        let results = engine.search(&params.query, limit);

        let response = SearchResponse {
            query: params.query,
            total: results.len(),
            results,
        };
        respond(format, &response, |r| {
            cartograph_search::search::format_markdown(&r.query, &r.results)
        })
    }

    #[tool(
        name = "node_context",
        description = "Everything the graph knows about one node: callers and callees with confidence, its community, the execution flows it appears in, and the files its file imports or is imported by."
    )]
    pub async fn node_context(
        &self,
        Parameters(params): Parameters<NodeContextParams>,
    ) -> Result<CallToolResult, McpError> {
        let format = output_format(&params.format)?;
        let graph = self.graph().await?;
        let index = GraphIndex::from_graph(&graph);
        let context = NodeContext::build(&graph, &index, &params.node_id).map_err(graph_err)?;
        respond(format, &context, NodeContext::to_markdown)
    }

    #[tool(
        name = "impact_analysis",
        description = "Blast radius of changing the given symbols: dependents at depth 1, 2 and 3 via reverse calls/imports/extends edges, a risk level (LOW, MEDIUM, HIGH, CRITICAL) from the number of direct dependents, and the execution flows affected. Use before refactoring."
    )]
    pub async fn impact_analysis(
        &self,
        Parameters(params): Parameters<ImpactAnalysisParams>,
    ) -> Result<CallToolResult, McpError> {
        let format = output_format(&params.format)?;
        if params.symbol_ids.is_empty() {
            return Err(McpError::invalid_params(
                "symbol_ids must name at least one node",
                None,
            ));
        }
        let graph = self.graph().await?;
        let result = cartograph_impact::analyze_graph(&params.symbol_ids, &graph);
        respond(format, &result, cartograph_impact::format_markdown)
    }

    #[tool(
        name = "graph_overview",
        description = "Repository summary: node and edge counts by type, languages, the largest communities with cohesion, the longest execution flows, and the most-called symbols. A good first call."
    )]
    pub async fn graph_overview(
        &self,
        Parameters(params): Parameters<GraphOverviewParams>,
    ) -> Result<CallToolResult, McpError> {
        let format = output_format(&params.format)?;
        let graph = self.graph().await?;
        let overview = GraphOverview::build(&graph);
        respond(format, &overview, GraphOverview::to_markdown)
    }
}
