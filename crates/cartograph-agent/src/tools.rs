//! Graph tools callable by the language model.
//!
//! Tool calls arrive as `(name, json arguments)` pairs and are parsed into a
//! [`GraphTool`] before dispatch. A [`ToolRegistry`] owns the manifest sent
//! to the model and exactly one handler per declared tool.

use std::collections::BTreeMap;

use cartograph_core::{CartographError, CodeGraph};
use cartograph_graph::index::GraphIndex;
use cartograph_search::{search::format_markdown as search_markdown, CodeSearchEngine};
use serde::Deserialize;

use crate::context::NodeContext;
use crate::llm::ToolSpec;
use crate::overview::GraphOverview;

const DEFAULT_SEARCH_RESULTS: usize = 10;
const MAX_SEARCH_RESULTS: usize = 50;

/// Everything a tool handler can read.
pub struct GraphWorkspace<'g> {
    pub graph: &'g CodeGraph,
    pub index: GraphIndex<'g>,
    pub search: &'g CodeSearchEngine,
}

impl<'g> GraphWorkspace<'g> {
    pub fn new(graph: &'g CodeGraph, search: &'g CodeSearchEngine) -> Self {
        Self {
            graph,
            index: GraphIndex::from_graph(graph),
            search,
        }
    }
}

/// A parsed tool invocation.
///
/// # Examples
///
/// ```
/// use cartograph_agent::GraphTool;
///
/// let tool = GraphTool::parse("impact", r#"{"symbolIds": ["function:a.ts::f"]}"#).unwrap();
/// assert_eq!(tool, GraphTool::Impact { symbol_ids: vec!["function:a.ts::f".into()] });
/// assert_eq!(tool.name(), "impact");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum GraphTool {
    Search { query: String, top_k: Option<usize> },
    Context { node_id: String },
    Impact { symbol_ids: Vec<String> },
    Overview,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchArgs {
    query: String,
    #[serde(default, alias = "top_k")]
    top_k: Option<usize>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContextArgs {
    #[serde(alias = "node_id")]
    node_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImpactArgs {
    #[serde(alias = "symbol_ids")]
    symbol_ids: Vec<String>,
}

impl GraphTool {
    /// Names of every tool variant.
    pub const NAMES: [&'static str; 4] = ["search", "context", "impact", "overview"];

    /// Parse a tool call. Empty argument strings are treated as `{}`.
    ///
    /// # Errors
    ///
    /// Returns [`CartographError::NotFound`] for an unknown tool name and
    /// [`CartographError::Serialization`] for malformed arguments.
    pub fn parse(name: &str, arguments: &str) -> Result<Self, CartographError> {
        let arguments = if arguments.trim().is_empty() { "{}" } else { arguments };
        match name {
            "search" => {
                let args: SearchArgs = serde_json::from_str(arguments)?;
                Ok(GraphTool::Search {
                    query: args.query,
                    top_k: args.top_k,
                })
            }
            "context" => {
                let args: ContextArgs = serde_json::from_str(arguments)?;
                Ok(GraphTool::Context {
                    node_id: args.node_id,
                })
            }
            "impact" => {
                let args: ImpactArgs = serde_json::from_str(arguments)?;
                Ok(GraphTool::Impact {
                    symbol_ids: args.symbol_ids,
                })
            }
            "overview" => Ok(GraphTool::Overview),
            other => Err(CartographError::NotFound(format!("tool {other}"))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            GraphTool::Search { .. } => "search",
            GraphTool::Context { .. } => "context",
            GraphTool::Impact { .. } => "impact",
            GraphTool::Overview => "overview",
        }
    }
}

/// Executes one kind of [`GraphTool`], returning markdown.
pub type ToolHandler = fn(&GraphWorkspace<'_>, GraphTool) -> Result<String, CartographError>;

/// Manifest plus name → handler map.
///
/// # Examples
///
/// ```
/// use cartograph_agent::ToolRegistry;
///
/// let registry = ToolRegistry::standard();
/// registry.verify().unwrap();
/// assert_eq!(registry.manifest().len(), 4);
/// ```
pub struct ToolRegistry {
    specs: Vec<ToolSpec>,
    handlers: BTreeMap<String, ToolHandler>,
}

impl ToolRegistry {
    pub fn empty() -> Self {
        Self {
            specs: Vec::new(),
            handlers: BTreeMap::new(),
        }
    }

    /// The four graph tools.
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        let standard: [(ToolSpec, ToolHandler); 4] = [
            (search_spec(), run_search),
            (context_spec(), run_context),
            (impact_spec(), run_impact),
            (overview_spec(), run_overview),
        ];
        for (spec, handler) in standard {
            // Names are distinct literals.
            let _ = registry.register(spec, handler);
        }
        registry
    }

    /// Add a tool.
    ///
    /// # Errors
    ///
    /// Returns [`CartographError::Config`] if the name is already registered.
    pub fn register(&mut self, spec: ToolSpec, handler: ToolHandler) -> Result<(), CartographError> {
        if self.handlers.contains_key(&spec.name) {
            return Err(CartographError::Config(format!(
                "tool {} registered twice",
                spec.name
            )));
        }
        self.handlers.insert(spec.name.clone(), handler);
        self.specs.push(spec);
        Ok(())
    }

    /// Tool declarations sent to the model.
    pub fn manifest(&self) -> &[ToolSpec] {
        &self.specs
    }

    /// Check that every [`GraphTool`] variant is declared and handled.
    ///
    /// # Errors
    ///
    /// Returns [`CartographError::Config`] naming the first uncovered tool.
    pub fn verify(&self) -> Result<(), CartographError> {
        for name in GraphTool::NAMES {
            if !self.specs.iter().any(|s| s.name == name) {
                return Err(CartographError::Config(format!("tool {name} is not declared")));
            }
            if !self.handlers.contains_key(name) {
                return Err(CartographError::Config(format!("tool {name} has no handler")));
            }
        }
        if let Some(extra) = self
            .specs
            .iter()
            .find(|s| !GraphTool::NAMES.iter().any(|name| *name == s.name))
        {
            return Err(CartographError::Config(format!(
                "tool {} has no variant",
                extra.name
            )));
        }
        Ok(())
    }

    /// Parse and run one tool call.
    ///
    /// # Errors
    ///
    /// Propagates parse errors and handler failures.
    pub fn dispatch(
        &self,
        workspace: &GraphWorkspace<'_>,
        name: &str,
        arguments: &str,
    ) -> Result<String, CartographError> {
        let tool = GraphTool::parse(name, arguments)?;
        let handler = self
            .handlers
            .get(tool.name())
            .ok_or_else(|| CartographError::NotFound(format!("handler for {}", tool.name())))?;
        tracing::debug!(tool = tool.name(), "running graph tool");
        handler(workspace, tool)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

fn mismatch(expected: &str, tool: &GraphTool) -> CartographError {
    CartographError::Config(format!(
        "{expected} handler received a {} call",
        tool.name()
    ))
}

fn search_spec() -> ToolSpec {
    ToolSpec::new(
        "search",
        "Hybrid keyword search over every symbol and file in the graph. Returns ranked node ids.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "Natural-language or identifier query"},
                "topK": {"type": "integer", "description": "Maximum results (default 10)"}
            },
            "required": ["query"]
        }),
    )
}

fn context_spec() -> ToolSpec {
    ToolSpec::new(
        "context",
        "Callers, callees, community, execution flows and file imports of one node.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "nodeId": {"type": "string", "description": "Node id as returned by search"}
            },
            "required": ["nodeId"]
        }),
    )
}

fn impact_spec() -> ToolSpec {
    ToolSpec::new(
        "impact",
        "Blast radius of changing the given symbols: dependents at depth 1-3, risk level, affected flows.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "symbolIds": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["symbolIds"]
        }),
    )
}

fn overview_spec() -> ToolSpec {
    ToolSpec::new(
        "overview",
        "Repository summary: counts, languages, largest communities, longest flows, most-called symbols.",
        serde_json::json!({"type": "object", "properties": {}}),
    )
}

fn run_search(workspace: &GraphWorkspace<'_>, tool: GraphTool) -> Result<String, CartographError> {
    let (query, top_k) = match tool {
        GraphTool::Search { query, top_k } => (query, top_k),
        other => return Err(mismatch("search", &other)),
    };
    let top_k = top_k
        .unwrap_or(DEFAULT_SEARCH_RESULTS)
        .clamp(1, MAX_SEARCH_RESULTS);
    let results = workspace.search.search(&query, top_k);
    Ok(search_markdown(&query, &results))
}

fn run_context(workspace: &GraphWorkspace<'_>, tool: GraphTool) -> Result<String, CartographError> {
    let node_id = match tool {
        GraphTool::Context { node_id } => node_id,
        other => return Err(mismatch("context", &other)),
    };
    Ok(NodeContext::build(workspace.graph, &workspace.index, &node_id)?.to_markdown())
}

fn run_impact(workspace: &GraphWorkspace<'_>, tool: GraphTool) -> Result<String, CartographError> {
    let symbol_ids = match tool {
        GraphTool::Impact { symbol_ids } => symbol_ids,
        other => return Err(mismatch("impact", &other)),
    };
    let result = cartograph_impact::analyze_graph(&symbol_ids, workspace.graph);
    Ok(cartograph_impact::format_markdown(&result))
}

fn run_overview(workspace: &GraphWorkspace<'_>, tool: GraphTool) -> Result<String, CartographError> {
    if tool != GraphTool::Overview {
        return Err(mismatch("overview", &tool));
    }
    Ok(GraphOverview::build(workspace.graph).to_markdown())
}
