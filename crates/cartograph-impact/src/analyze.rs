use std::collections::HashSet;
use std::fmt;
use std::fmt::Write as _;

use cartograph_core::{CodeEdge, CodeGraph, CodeNode, EdgeType, NodeType, ProcessFlow};
use cartograph_graph::index::GraphIndex;
use petgraph::graph::NodeIndex;
use serde::{Deserialize, Serialize};

/// Edge types followed backwards when computing dependents.
const DEPENDENCY_EDGES: [EdgeType; 3] = [EdgeType::Calls, EdgeType::Imports, EdgeType::Extends];

/// Number of hops reported.
const MAX_DEPTH: usize = 3;

/// Categorical risk of a change, from the number of direct dependents.
///
/// # Examples
///
/// ```
/// use cartograph_impact::RiskLevel;
///
/// assert_eq!(RiskLevel::from_direct_dependents(2), RiskLevel::Low);
/// assert_eq!(RiskLevel::from_direct_dependents(3), RiskLevel::Medium);
/// assert_eq!(RiskLevel::from_direct_dependents(6), RiskLevel::High);
/// assert_eq!(RiskLevel::from_direct_dependents(11), RiskLevel::Critical);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    /// At most 2 direct dependents.
    Low,
    /// 3 to 5.
    Medium,
    /// 6 to 10.
    High,
    /// More than 10.
    Critical,
}

impl RiskLevel {
    pub fn from_direct_dependents(count: usize) -> Self {
        if count > 10 {
            RiskLevel::Critical
        } else if count > 5 {
            RiskLevel::High
        } else if count > 2 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "LOW"),
            RiskLevel::Medium => write!(f, "MEDIUM"),
            RiskLevel::High => write!(f, "HIGH"),
            RiskLevel::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// A node reached by the reverse walk.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpactNode {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub file_path: String,
    /// Edge that first reached this node.
    pub via: EdgeType,
    pub confidence: f64,
}

/// Blast radius of a change.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpactResult {
    pub changed: Vec<String>,
    /// Changed ids that are not in the graph.
    pub unknown: Vec<String>,
    /// Direct dependents of the changed set.
    pub depth1: Vec<ImpactNode>,
    pub depth2: Vec<ImpactNode>,
    pub depth3: Vec<ImpactNode>,
    pub risk_level: RiskLevel,
    /// Flows whose steps touch the changed set, depth 1 or depth 2.
    pub affected_processes: Vec<ProcessFlow>,
}

impl ImpactResult {
    pub fn total_affected(&self) -> usize {
        self.depth1.len() + self.depth2.len() + self.depth3.len()
    }
}

/// Compute the blast radius of `changed` symbol ids.
///
/// The three depth tiers are disjoint and never contain a changed id.
/// Unknown ids are reported in [`ImpactResult::unknown`] and otherwise
/// ignored.
///
/// # Examples
///
/// ```
/// use cartograph_core::{CodeEdge, CodeNode, EdgeType, NodeType};
/// use cartograph_impact::{analyze, RiskLevel};
///
/// let nodes = vec![
///     CodeNode::symbol(NodeType::Function, "save", "db.ts", "typescript", 1, 4),
///     CodeNode::symbol(NodeType::Function, "handler", "api.ts", "typescript", 1, 9),
/// ];
/// let edges = vec![CodeEdge::new(&nodes[1].id, &nodes[0].id, EdgeType::Calls, 0.9, "import-resolved")];
///
/// let result = analyze(&[nodes[0].id.clone()], &nodes, &edges, &[]);
/// assert_eq!(result.depth1[0].label, "handler");
/// assert_eq!(result.risk_level, RiskLevel::Low);
/// ```
pub fn analyze(
    changed: &[String],
    nodes: &[CodeNode],
    edges: &[CodeEdge],
    processes: &[ProcessFlow],
) -> ImpactResult {
    let index = GraphIndex::new(nodes, edges);

    let mut seen: HashSet<NodeIndex> = HashSet::new();
    let mut frontier: Vec<NodeIndex> = Vec::new();
    let mut unknown = Vec::new();
    let mut changed_ids: Vec<String> = Vec::new();
    for id in changed {
        if changed_ids.contains(id) {
            continue;
        }
        changed_ids.push(id.clone());
        match index.index_of(id) {
            Some(ix) => {
                if seen.insert(ix) {
                    frontier.push(ix);
                }
            }
            None => unknown.push(id.clone()),
        }
    }

    let mut tiers: Vec<Vec<ImpactNode>> = Vec::with_capacity(MAX_DEPTH);
    for _ in 0..MAX_DEPTH {
        let mut next = Vec::new();
        let mut tier = Vec::new();
        for &ix in &frontier {
            for (source, edge) in index.incoming(ix, &DEPENDENCY_EDGES) {
                if !seen.insert(source) {
                    continue;
                }
                let node = index.node(source);
                tier.push(ImpactNode {
                    id: node.id.clone(),
                    label: node.label.clone(),
                    node_type: node.node_type,
                    file_path: node.file_path.clone(),
                    via: edge.edge_type,
                    confidence: edge.confidence,
                });
                next.push(source);
            }
        }
        tiers.push(tier);
        frontier = next;
    }

    let depth3 = tiers.pop().unwrap_or_default();
    let depth2 = tiers.pop().unwrap_or_default();
    let depth1 = tiers.pop().unwrap_or_default();

    let touched: HashSet<&str> = changed_ids
        .iter()
        .map(String::as_str)
        .chain(depth1.iter().map(|n| n.id.as_str()))
        .chain(depth2.iter().map(|n| n.id.as_str()))
        .collect();
    let affected_processes: Vec<ProcessFlow> = processes
        .iter()
        .filter(|p| p.steps.iter().any(|s| touched.contains(s.as_str())))
        .cloned()
        .collect();

    let risk_level = RiskLevel::from_direct_dependents(depth1.len());
    tracing::debug!(
        changed = changed_ids.len(),
        depth1 = depth1.len(),
        depth2 = depth2.len(),
        depth3 = depth3.len(),
        risk = %risk_level,
        "impact analysis complete"
    );

    ImpactResult {
        changed: changed_ids,
        unknown,
        depth1,
        depth2,
        depth3,
        risk_level,
        affected_processes,
    }
}

/// [`analyze`] over a whole graph snapshot.
pub fn analyze_graph(changed: &[String], graph: &CodeGraph) -> ImpactResult {
    analyze(changed, &graph.nodes, &graph.edges, &graph.processes)
}

/// Render an impact result as markdown.
///
/// # Examples
///
/// ```
/// use cartograph_impact::{analyze, format_markdown};
///
/// let result = analyze(&["function:a.ts::gone".to_string()], &[], &[], &[]);
/// let md = format_markdown(&result);
/// assert!(md.contains("**Risk:** LOW"));
/// assert!(md.contains("function:a.ts::gone"));
/// ```
pub fn format_markdown(result: &ImpactResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "## Impact Analysis\n");
    let _ = writeln!(out, "**Risk:** {}", result.risk_level);
    let _ = writeln!(
        out,
        "**Changed:** {}",
        result
            .changed
            .iter()
            .map(|id| format!("`{id}`"))
            .collect::<Vec<_>>()
            .join(", ")
    );
    if !result.unknown.is_empty() {
        let _ = writeln!(
            out,
            "**Not in graph:** {}",
            result
                .unknown
                .iter()
                .map(|id| format!("`{id}`"))
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
    out.push('\n');

    let tiers = [
        ("Depth 1 (direct dependents)", &result.depth1),
        ("Depth 2", &result.depth2),
        ("Depth 3", &result.depth3),
    ];
    for (title, nodes) in tiers {
        let _ = writeln!(out, "### {title}: {}\n", nodes.len());
        for node in nodes.iter() {
            let _ = writeln!(
                out,
                "- **{}** ({}) `{}` via {} ({:.2})",
                node.label, node.node_type, node.file_path, node.via, node.confidence
            );
        }
        if !nodes.is_empty() {
            out.push('\n');
        }
    }

    if !result.affected_processes.is_empty() {
        let _ = writeln!(
            out,
            "### Affected flows: {}\n",
            result.affected_processes.len()
        );
        for process in &result.affected_processes {
            let _ = writeln!(out, "- {} ({} steps)", process.name, process.step_count);
        }
    }
    out
}
