//! Whole-graph summary.

use std::collections::HashMap;
use std::fmt::Write as _;

use cartograph_core::{CodeGraph, EdgeType, GraphStats, NodeType};
use serde::Serialize;

const TOP_COMMUNITIES: usize = 10;
const TOP_PROCESSES: usize = 10;
const TOP_CALLED: usize = 10;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunitySummary {
    pub id: String,
    pub name: String,
    pub symbol_count: usize,
    pub cohesion: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSummary {
    pub id: String,
    pub name: String,
    pub step_count: usize,
    pub cross_community: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalledSymbol {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub file_path: String,
    pub callers: usize,
}

/// Summary of a graph snapshot.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphOverview {
    pub repository: String,
    pub branch: String,
    pub stats: GraphStats,
    /// Largest communities first.
    pub communities: Vec<CommunitySummary>,
    /// Longest flows first.
    pub processes: Vec<ProcessSummary>,
    /// Symbols with the most distinct callers.
    pub most_called: Vec<CalledSymbol>,
}

impl GraphOverview {
    /// Summarize `graph`.
    ///
    /// # Examples
    ///
    /// ```
    /// use cartograph_core::{CodeGraph, CodeNode};
    /// use cartograph_agent::GraphOverview;
    ///
    /// let mut graph = CodeGraph::new("octocat", "hello", "main");
    /// graph.nodes.push(CodeNode::file("src/index.ts", "typescript"));
    /// let overview = GraphOverview::build(&graph);
    /// assert_eq!(overview.repository, "octocat/hello");
    /// assert_eq!(overview.stats.total_nodes, 1);
    /// ```
    pub fn build(graph: &CodeGraph) -> Self {
        let mut communities: Vec<CommunitySummary> = graph
            .communities
            .iter()
            .map(|c| CommunitySummary {
                id: c.id.clone(),
                name: c.name.clone(),
                symbol_count: c.symbol_count,
                cohesion: c.cohesion,
            })
            .collect();
        communities.sort_by(|a, b| b.symbol_count.cmp(&a.symbol_count).then_with(|| a.id.cmp(&b.id)));
        communities.truncate(TOP_COMMUNITIES);

        let mut processes: Vec<ProcessSummary> = graph
            .processes
            .iter()
            .map(|p| ProcessSummary {
                id: p.id.clone(),
                name: p.name.clone(),
                step_count: p.step_count,
                cross_community: p.cross_community,
            })
            .collect();
        processes.sort_by(|a, b| b.step_count.cmp(&a.step_count).then_with(|| a.id.cmp(&b.id)));
        processes.truncate(TOP_PROCESSES);

        let mut caller_counts: HashMap<&str, usize> = HashMap::new();
        for edge in graph.edges.iter().filter(|e| e.edge_type == EdgeType::Calls) {
            *caller_counts.entry(edge.target.as_str()).or_insert(0) += 1;
        }
        let mut most_called: Vec<CalledSymbol> = graph
            .nodes
            .iter()
            .filter_map(|node| {
                let callers = *caller_counts.get(node.id.as_str())?;
                Some(CalledSymbol {
                    id: node.id.clone(),
                    label: node.label.clone(),
                    node_type: node.node_type,
                    file_path: node.file_path.clone(),
                    callers,
                })
            })
            .collect();
        most_called.sort_by(|a, b| b.callers.cmp(&a.callers).then_with(|| a.id.cmp(&b.id)));
        most_called.truncate(TOP_CALLED);

        Self {
            repository: graph.repo_key(),
            branch: graph.branch.clone(),
            stats: graph.stats(),
            communities,
            processes,
            most_called,
        }
    }

    /// Render as markdown.
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        let stats = &self.stats;
        let _ = writeln!(out, "## {} @ {}\n", self.repository, self.branch);
        let _ = writeln!(
            out,
            "**{}** nodes, **{}** edges, **{}** communities, **{}** execution flows\n",
            stats.total_nodes, stats.total_edges, stats.communities, stats.processes
        );

        if !stats.nodes_by_type.is_empty() {
            let parts: Vec<String> = stats
                .nodes_by_type
                .iter()
                .map(|(kind, count)| format!("{kind}: {count}"))
                .collect();
            let _ = writeln!(out, "- **Nodes:** {}", parts.join(", "));
        }
        if !stats.edges_by_type.is_empty() {
            let parts: Vec<String> = stats
                .edges_by_type
                .iter()
                .map(|(kind, count)| format!("{kind}: {count}"))
                .collect();
            let _ = writeln!(out, "- **Edges:** {}", parts.join(", "));
        }
        if !stats.languages.is_empty() {
            let parts: Vec<String> = stats
                .languages
                .iter()
                .map(|(lang, count)| format!("{lang}: {count}"))
                .collect();
            let _ = writeln!(out, "- **Languages:** {}", parts.join(", "));
        }
        out.push('\n');

        if !self.communities.is_empty() {
            let _ = writeln!(out, "### Communities\n");
            let _ = writeln!(out, "| Name | Symbols | Cohesion |");
            let _ = writeln!(out, "|------|---------|----------|");
            for c in &self.communities {
                let _ = writeln!(out, "| {} | {} | {:.2} |", c.name, c.symbol_count, c.cohesion);
            }
            out.push('\n');
        }

        if !self.processes.is_empty() {
            let _ = writeln!(out, "### Execution flows\n");
            for p in &self.processes {
                let marker = if p.cross_community { " (cross-community)" } else { "" };
                let _ = writeln!(out, "- {} ({} steps){marker}", p.name, p.step_count);
            }
            out.push('\n');
        }

        if !self.most_called.is_empty() {
            let _ = writeln!(out, "### Most called\n");
            for s in &self.most_called {
                let _ = writeln!(
                    out,
                    "- **{}** `{}` ({} callers)",
                    s.label, s.file_path, s.callers
                );
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cartograph_core::{CodeEdge, CodeNode, Community, ProcessFlow};

    fn func(name: &str) -> CodeNode {
        CodeNode::symbol(NodeType::Function, name, "src/app.ts", "typescript", 1, 2)
    }

    fn community(id: &str, size: usize) -> Community {
        Community {
            id: id.into(),
            name: format!("src/{id}"),
            keywords: Vec::new(),
            cohesion: 0.5,
            symbol_count: size,
            member_ids: Vec::new(),
        }
    }

    #[test]
    fn ranks_communities_processes_and_callees() {
        let mut graph = CodeGraph::new("o", "r", "main");
        let (a, b, c) = (func("a"), func("b"), func("c"));
        graph.edges = vec![
            CodeEdge::new(&a.id, &c.id, EdgeType::Calls, 0.85, "same-file"),
            CodeEdge::new(&b.id, &c.id, EdgeType::Calls, 0.85, "same-file"),
            CodeEdge::new(&a.id, &b.id, EdgeType::Calls, 0.85, "same-file"),
        ];
        graph.nodes = vec![CodeNode::file("src/app.ts", "typescript"), a.clone(), b, c.clone()];
        graph.communities = vec![community("community:1", 2), community("community:0", 5)];
        graph.processes = vec![ProcessFlow {
            id: "process:0".into(),
            name: "a → c".into(),
            entry_point: a.id.clone(),
            terminal_point: c.id.clone(),
            steps: vec![a.id.clone(), c.id.clone()],
            step_count: 2,
            cross_community: true,
        }];

        let overview = GraphOverview::build(&graph);
        assert_eq!(overview.communities[0].id, "community:0");
        assert_eq!(overview.most_called[0].label, "c");
        assert_eq!(overview.most_called[0].callers, 2);
        assert_eq!(overview.stats.languages.get("typescript"), Some(&1));

        let md = overview.to_markdown();
        assert!(md.contains("## o/r @ main"));
        assert!(md.contains("| src/community:0 | 5 | 0.50 |"));
        assert!(md.contains("a → c (2 steps) (cross-community)"));
        assert!(md.contains("**c** `src/app.ts` (2 callers)"));
    }

    #[test]
    fn serializes_camel_case() {
        let graph = CodeGraph::new("o", "r", "main");
        let json = serde_json::to_value(GraphOverview::build(&graph)).unwrap();
        assert!(json.get("mostCalled").is_some());
        assert_eq!(json["stats"]["totalNodes"], 0);
    }
}
