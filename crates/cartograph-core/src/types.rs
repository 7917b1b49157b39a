use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of a graph vertex.
///
/// # Examples
///
/// ```
/// use cartograph_core::NodeType;
///
/// assert_eq!(NodeType::Function.to_string(), "function");
/// assert_eq!(serde_json::to_string(&NodeType::Interface).unwrap(), "\"interface\"");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    File,
    Function,
    Class,
    Interface,
    Type,
    Variable,
}

impl NodeType {
    /// Lower-case name used in node ids and documents.
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::File => "file",
            NodeType::Function => "function",
            NodeType::Class => "class",
            NodeType::Interface => "interface",
            NodeType::Type => "type",
            NodeType::Variable => "variable",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One declared symbol or file.
///
/// Ids are a pure function of `(type, filePath, name)`, so re-parsing the
/// same content yields the same ids.
///
/// # Examples
///
/// ```
/// use cartograph_core::{CodeNode, NodeType};
///
/// let node = CodeNode::symbol(NodeType::Function, "handleLogin", "src/auth/login.ts", "typescript", 3, 9);
/// assert_eq!(node.id, "function:src/auth/login.ts::handleLogin");
/// assert_eq!(node.directory, "src/auth");
///
/// let file = CodeNode::file("src/auth/login.ts", "typescript");
/// assert_eq!(file.id, "file:src/auth/login.ts");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeNode {
    /// Deterministic key, unique within a graph.
    pub id: String,
    /// Vertex kind.
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Display name (symbol name, or file name for file nodes).
    pub label: String,
    /// Repository-relative path of the declaring file.
    pub file_path: String,
    /// Parent directory of `file_path` (empty at the repository root).
    pub directory: String,
    /// Source language (`typescript`, `javascript`, `python`).
    pub language: String,
    /// First line of the declaration (1-based).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_start: Option<u32>,
    /// Last line of the declaration (1-based, estimated).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_end: Option<u32>,
    /// Community assigned during the build.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub community_id: Option<String>,
}

impl CodeNode {
    /// Id of the file node for `file_path`.
    pub fn file_id(file_path: &str) -> String {
        format!("file:{file_path}")
    }

    /// Id of a symbol node.
    pub fn symbol_id(node_type: NodeType, file_path: &str, name: &str) -> String {
        format!("{node_type}:{file_path}::{name}")
    }

    /// Build a file node.
    pub fn file(file_path: &str, language: &str) -> Self {
        let label = file_path.rsplit('/').next().unwrap_or(file_path).to_string();
        Self {
            id: Self::file_id(file_path),
            node_type: NodeType::File,
            label,
            file_path: file_path.to_string(),
            directory: parent_directory(file_path),
            language: language.to_string(),
            line_start: None,
            line_end: None,
            community_id: None,
        }
    }

    /// Build a symbol node.
    pub fn symbol(
        node_type: NodeType,
        name: &str,
        file_path: &str,
        language: &str,
        line_start: u32,
        line_end: u32,
    ) -> Self {
        Self {
            id: Self::symbol_id(node_type, file_path, name),
            node_type,
            label: name.to_string(),
            file_path: file_path.to_string(),
            directory: parent_directory(file_path),
            language: language.to_string(),
            line_start: Some(line_start),
            line_end: Some(line_end.max(line_start)),
            community_id: None,
        }
    }

    /// Whether this is a file vertex rather than a symbol.
    pub fn is_file(&self) -> bool {
        self.node_type == NodeType::File
    }

    /// Whether `line` falls inside this node's declared range.
    pub fn contains_line(&self, line: u32) -> bool {
        match (self.line_start, self.line_end) {
            (Some(start), Some(end)) => start <= line && line <= end,
            _ => false,
        }
    }
}

fn parent_directory(file_path: &str) -> String {
    match file_path.rsplit_once('/') {
        Some((dir, _)) => dir.to_string(),
        None => String::new(),
    }
}

/// Kind of a directed relationship.
///
/// # Examples
///
/// ```
/// use cartograph_core::EdgeType;
///
/// assert_eq!(EdgeType::DefinedIn.to_string(), "defined_in");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    Imports,
    Calls,
    DefinedIn,
    Extends,
    Implements,
}

impl EdgeType {
    /// Snake-case name used in edge ids.
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::Imports => "imports",
            EdgeType::Calls => "calls",
            EdgeType::DefinedIn => "defined_in",
            EdgeType::Extends => "extends",
            EdgeType::Implements => "implements",
        }
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A directed relationship between two nodes.
///
/// Edges are immutable once created; `weight` and `confidence` are clamped
/// to `[0, 1]`.
///
/// # Examples
///
/// ```
/// use cartograph_core::{CodeEdge, EdgeType};
///
/// let edge = CodeEdge::new("function:a.ts::foo", "function:b.ts::bar", EdgeType::Calls, 0.9, "import-resolved");
/// assert_eq!(edge.id, "calls:function:a.ts::foo->function:b.ts::bar");
/// assert_eq!(edge.weight, 0.9);
///
/// let clamped = CodeEdge::new("a", "b", EdgeType::Calls, 1.7, "test");
/// assert_eq!(clamped.confidence, 1.0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeEdge {
    /// `{type}:{source}->{target}`.
    pub id: String,
    /// Source node id.
    pub source: String,
    /// Target node id.
    pub target: String,
    /// Relationship kind.
    #[serde(rename = "type")]
    pub edge_type: EdgeType,
    /// Ranking strength in `[0, 1]`.
    pub weight: f64,
    /// Resolution certainty in `[0, 1]`.
    pub confidence: f64,
    /// Provenance tag (e.g. `import-resolved`, `fuzzy-global-multiple`).
    pub reason: String,
}

impl CodeEdge {
    /// Create an edge with a deterministic id.
    pub fn new(
        source: &str,
        target: &str,
        edge_type: EdgeType,
        confidence: f64,
        reason: &str,
    ) -> Self {
        let confidence = confidence.clamp(0.0, 1.0);
        let weight = match edge_type {
            EdgeType::DefinedIn => 0.5,
            EdgeType::Imports => 0.8,
            EdgeType::Calls | EdgeType::Extends | EdgeType::Implements => confidence,
        };
        Self {
            id: Self::make_id(edge_type, source, target),
            source: source.to_string(),
            target: target.to_string(),
            edge_type,
            weight,
            confidence,
            reason: reason.to_string(),
        }
    }

    /// Id an edge of this kind between `source` and `target` would have.
    pub fn make_id(edge_type: EdgeType, source: &str, target: &str) -> String {
        format!("{edge_type}:{source}->{target}")
    }
}

/// A cluster of symbol nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Community {
    /// Stable id (`community:{n}` or `community:other`).
    pub id: String,
    /// `{dominant-directory-basename}/{top-keyword}`.
    pub name: String,
    /// Member-label tokens ranked by frequency.
    pub keywords: Vec<String>,
    /// Internal edge density in `[0, 1]`.
    pub cohesion: f64,
    /// Number of member symbols.
    pub symbol_count: usize,
    /// Member node ids.
    pub member_ids: Vec<String>,
}

/// One traced execution path through `calls` edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessFlow {
    pub id: String,
    /// `{entryLabel} → {terminalLabel}`.
    pub name: String,
    pub entry_point: String,
    pub terminal_point: String,
    /// Ordered node ids, no repeats.
    pub steps: Vec<String>,
    pub step_count: usize,
    /// Whether the steps span more than one community.
    pub cross_community: bool,
}

/// The aggregate root: one immutable snapshot of a repository at a branch.
///
/// # Examples
///
/// ```
/// use cartograph_core::{CodeGraph, CodeNode};
///
/// let mut graph = CodeGraph::new("octocat", "hello", "main");
/// graph.nodes.push(CodeNode::file("src/index.ts", "typescript"));
/// assert_eq!(graph.repo_key(), "octocat/hello");
/// assert_eq!(graph.stats().total_nodes, 1);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeGraph {
    pub owner: String,
    pub name: String,
    pub branch: String,
    pub fetched_at: DateTime<Utc>,
    pub nodes: Vec<CodeNode>,
    pub edges: Vec<CodeEdge>,
    pub communities: Vec<Community>,
    pub processes: Vec<ProcessFlow>,
}

impl CodeGraph {
    /// Create an empty graph for a repository snapshot.
    pub fn new(owner: &str, name: &str, branch: &str) -> Self {
        Self {
            owner: owner.to_string(),
            name: name.to_string(),
            branch: branch.to_string(),
            fetched_at: Utc::now(),
            nodes: Vec::new(),
            edges: Vec::new(),
            communities: Vec::new(),
            processes: Vec::new(),
        }
    }

    /// Cache key for this repository (`owner/name`).
    pub fn repo_key(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    /// Iterate over non-file nodes.
    pub fn symbols(&self) -> impl Iterator<Item = &CodeNode> {
        self.nodes.iter().filter(|n| !n.is_file())
    }

    /// Count nodes and edges by kind.
    pub fn stats(&self) -> GraphStats {
        let mut nodes_by_type = BTreeMap::new();
        let mut languages = BTreeMap::new();
        for node in &self.nodes {
            *nodes_by_type.entry(node.node_type).or_insert(0) += 1;
            if node.is_file() {
                *languages.entry(node.language.clone()).or_insert(0) += 1;
            }
        }
        let mut edges_by_type = BTreeMap::new();
        for edge in &self.edges {
            *edges_by_type.entry(edge.edge_type).or_insert(0) += 1;
        }
        GraphStats {
            total_nodes: self.nodes.len(),
            total_edges: self.edges.len(),
            nodes_by_type,
            edges_by_type,
            languages,
            communities: self.communities.len(),
            processes: self.processes.len(),
        }
    }
}

/// Summary counts for a [`CodeGraph`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphStats {
    pub total_nodes: usize,
    pub total_edges: usize,
    pub nodes_by_type: BTreeMap<NodeType, usize>,
    pub edges_by_type: BTreeMap<EdgeType, usize>,
    /// File count per language.
    pub languages: BTreeMap<String, usize>,
    pub communities: usize,
    pub processes: usize,
}

/// Output format for CLI and tool responses.
///
/// # Examples
///
/// ```
/// use cartograph_core::OutputFormat;
///
/// let fmt: OutputFormat = "json".parse().unwrap();
/// assert_eq!(fmt, OutputFormat::Json);
///
/// let fmt: OutputFormat = "md".parse().unwrap();
/// assert_eq!(fmt, OutputFormat::Markdown);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable tables and summaries.
    #[default]
    Text,
    /// Machine-readable JSON with camelCase keys.
    Json,
    /// Markdown-formatted output.
    Markdown,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Markdown => write!(f, "markdown"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_ids_are_deterministic() {
        let a = CodeNode::symbol(NodeType::Class, "User", "src/models/user.ts", "typescript", 1, 20);
        let b = CodeNode::symbol(NodeType::Class, "User", "src/models/user.ts", "typescript", 5, 40);
        assert_eq!(a.id, b.id);
        assert_eq!(a.id, "class:src/models/user.ts::User");
    }

    #[test]
    fn root_level_file_has_empty_directory() {
        let node = CodeNode::file("main.py", "python");
        assert_eq!(node.directory, "");
        assert_eq!(node.label, "main.py");
    }

    #[test]
    fn line_end_never_precedes_start() {
        let node = CodeNode::symbol(NodeType::Function, "f", "a.py", "python", 10, 3);
        assert_eq!(node.line_end, Some(10));
        assert!(node.contains_line(10));
        assert!(!node.contains_line(11));
    }

    #[test]
    fn node_serializes_camel_case_with_type_key() {
        let node = CodeNode::symbol(NodeType::Function, "run", "src/app.ts", "typescript", 1, 2);
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["type"], "function");
        assert_eq!(json["filePath"], "src/app.ts");
        assert_eq!(json["lineStart"], 1);
        assert!(json.get("communityId").is_none());
    }

    #[test]
    fn edge_weights_stay_in_unit_interval() {
        for edge_type in [
            EdgeType::Imports,
            EdgeType::Calls,
            EdgeType::DefinedIn,
            EdgeType::Extends,
            EdgeType::Implements,
        ] {
            let edge = CodeEdge::new("a", "b", edge_type, -0.5, "test");
            assert!((0.0..=1.0).contains(&edge.weight));
            assert!((0.0..=1.0).contains(&edge.confidence));
        }
    }

    #[test]
    fn stats_count_by_type() {
        let mut graph = CodeGraph::new("o", "r", "main");
        graph.nodes.push(CodeNode::file("a.ts", "typescript"));
        graph.nodes.push(CodeNode::file("b.py", "python"));
        graph
            .nodes
            .push(CodeNode::symbol(NodeType::Function, "f", "a.ts", "typescript", 1, 3));
        graph.edges.push(CodeEdge::new(
            "function:a.ts::f",
            "file:a.ts",
            EdgeType::DefinedIn,
            1.0,
            "declaration",
        ));
        let stats = graph.stats();
        assert_eq!(stats.total_nodes, 3);
        assert_eq!(stats.nodes_by_type[&NodeType::File], 2);
        assert_eq!(stats.edges_by_type[&EdgeType::DefinedIn], 1);
        assert_eq!(stats.languages["python"], 1);
    }

    #[test]
    fn output_format_from_str() {
        assert_eq!("text".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert!("xml".parse::<OutputFormat>().is_err());
    }
}
