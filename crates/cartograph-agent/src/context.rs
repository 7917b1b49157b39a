//! 360° view of a single node.

use std::fmt::Write as _;

use cartograph_core::{
    CartographError, CodeEdge, CodeGraph, CodeNode, Community, EdgeType, NodeType, ProcessFlow,
};
use cartograph_graph::index::GraphIndex;
use serde::Serialize;

/// A node adjacent to the context subject.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Neighbour {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub file_path: String,
    pub confidence: f64,
    pub reason: String,
}

impl Neighbour {
    fn new(node: &CodeNode, edge: &CodeEdge) -> Self {
        Self {
            id: node.id.clone(),
            label: node.label.clone(),
            node_type: node.node_type,
            file_path: node.file_path.clone(),
            confidence: edge.confidence,
            reason: edge.reason.clone(),
        }
    }
}

/// Everything the graph knows about one node.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeContext {
    pub node: CodeNode,
    pub callers: Vec<Neighbour>,
    pub callees: Vec<Neighbour>,
    pub community: Option<Community>,
    pub processes: Vec<ProcessFlow>,
    /// Files the owning file imports.
    pub imports: Vec<String>,
    /// Files that import the owning file.
    pub imported_by: Vec<String>,
}

impl NodeContext {
    /// Assemble the context of `node_id`.
    ///
    /// Import relationships are read from the node's owning file node.
    ///
    /// # Errors
    ///
    /// Returns [`CartographError::NotFound`] if the id is not in the graph.
    ///
    /// # Examples
    ///
    /// ```
    /// use cartograph_core::{CodeEdge, CodeGraph, CodeNode, EdgeType, NodeType};
    /// use cartograph_graph::index::GraphIndex;
    /// use cartograph_agent::NodeContext;
    ///
    /// let mut graph = CodeGraph::new("o", "r", "main");
    /// let a = CodeNode::symbol(NodeType::Function, "a", "x.ts", "typescript", 1, 3);
    /// let b = CodeNode::symbol(NodeType::Function, "b", "x.ts", "typescript", 5, 7);
    /// graph.edges.push(CodeEdge::new(&a.id, &b.id, EdgeType::Calls, 0.85, "same-file"));
    /// graph.nodes.extend([a, b]);
    ///
    /// let index = GraphIndex::from_graph(&graph);
    /// let ctx = NodeContext::build(&graph, &index, "function:x.ts::b").unwrap();
    /// assert_eq!(ctx.callers[0].label, "a");
    /// ```
    pub fn build(
        graph: &CodeGraph,
        index: &GraphIndex<'_>,
        node_id: &str,
    ) -> Result<Self, CartographError> {
        let ix = index
            .index_of(node_id)
            .ok_or_else(|| CartographError::NotFound(format!("node {node_id}")))?;
        let node = index.node(ix);

        let callers = index
            .incoming(ix, &[EdgeType::Calls])
            .into_iter()
            .map(|(other, edge)| Neighbour::new(index.node(other), edge))
            .collect();
        let callees = index
            .outgoing(ix, &[EdgeType::Calls])
            .into_iter()
            .map(|(other, edge)| Neighbour::new(index.node(other), edge))
            .collect();

        let community = node
            .community_id
            .as_deref()
            .and_then(|id| graph.communities.iter().find(|c| c.id == id))
            .cloned();

        let processes = graph
            .processes
            .iter()
            .filter(|p| p.steps.iter().any(|s| s == node_id))
            .cloned()
            .collect();

        let file_path = |(other, _): (_, &CodeEdge)| index.node(other).file_path.clone();
        let (imports, imported_by) = match index.owning_file(ix) {
            Some(file) => (
                index
                    .outgoing(file, &[EdgeType::Imports])
                    .into_iter()
                    .map(file_path)
                    .collect(),
                index
                    .incoming(file, &[EdgeType::Imports])
                    .into_iter()
                    .map(file_path)
                    .collect(),
            ),
            None => (Vec::new(), Vec::new()),
        };

        Ok(Self {
            node: node.clone(),
            callers,
            callees,
            community,
            processes,
            imports,
            imported_by,
        })
    }

    /// Render as markdown.
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        let node = &self.node;
        let _ = writeln!(out, "## {} ({})\n", node.label, node.node_type);
        let _ = writeln!(out, "- **id:** `{}`", node.id);
        match (node.line_start, node.line_end) {
            (Some(start), Some(end)) => {
                let _ = writeln!(out, "- **location:** `{}:{start}-{end}`", node.file_path);
            }
            _ => {
                let _ = writeln!(out, "- **location:** `{}`", node.file_path);
            }
        }
        let _ = writeln!(out, "- **language:** {}", node.language);
        if let Some(community) = &self.community {
            let _ = writeln!(
                out,
                "- **community:** {} ({} symbols, cohesion {:.2})",
                community.name, community.symbol_count, community.cohesion
            );
        }
        out.push('\n');

        write_neighbours(&mut out, "Callers", &self.callers);
        write_neighbours(&mut out, "Callees", &self.callees);

        if !self.processes.is_empty() {
            let _ = writeln!(out, "### Execution flows ({})\n", self.processes.len());
            for process in &self.processes {
                let _ = writeln!(out, "- {} ({} steps)", process.name, process.step_count);
            }
            out.push('\n');
        }
        write_files(&mut out, "Imports", &self.imports);
        write_files(&mut out, "Imported by", &self.imported_by);
        out
    }
}

fn write_neighbours(out: &mut String, title: &str, neighbours: &[Neighbour]) {
    let _ = writeln!(out, "### {title} ({})\n", neighbours.len());
    for n in neighbours {
        let _ = writeln!(
            out,
            "- **{}** `{}` confidence {:.2} ({})",
            n.label, n.file_path, n.confidence, n.reason
        );
    }
    out.push('\n');
}

fn write_files(out: &mut String, title: &str, files: &[String]) {
    if files.is_empty() {
        return;
    }
    let _ = writeln!(out, "### {title} ({})\n", files.len());
    for file in files {
        let _ = writeln!(out, "- `{file}`");
    }
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CodeGraph {
        let mut graph = CodeGraph::new("o", "r", "main");
        let auth_file = CodeNode::file("src/auth.ts", "typescript");
        let db_file = CodeNode::file("src/db.ts", "typescript");
        let mut login = CodeNode::symbol(NodeType::Function, "login", "src/auth.ts", "typescript", 1, 9);
        login.community_id = Some("community:0".into());
        let save = CodeNode::symbol(NodeType::Function, "save", "src/db.ts", "typescript", 1, 4);
        let route = CodeNode::symbol(NodeType::Function, "route", "src/auth.ts", "typescript", 11, 14);

        graph.edges = vec![
            CodeEdge::new(&auth_file.id, &db_file.id, EdgeType::Imports, 0.95, "import-resolved"),
            CodeEdge::new(&login.id, &save.id, EdgeType::Calls, 0.9, "import-resolved"),
            CodeEdge::new(&route.id, &login.id, EdgeType::Calls, 0.85, "same-file"),
        ];
        graph.communities.push(Community {
            id: "community:0".into(),
            name: "src/login".into(),
            keywords: vec!["login".into()],
            cohesion: 1.0,
            symbol_count: 3,
            member_ids: vec![login.id.clone(), save.id.clone(), route.id.clone()],
        });
        graph.processes.push(ProcessFlow {
            id: "process:0".into(),
            name: "route → save".into(),
            entry_point: route.id.clone(),
            terminal_point: save.id.clone(),
            steps: vec![route.id.clone(), login.id.clone(), save.id.clone()],
            step_count: 3,
            cross_community: false,
        });
        graph.nodes = vec![auth_file, db_file, login, save, route];
        graph
    }

    #[test]
    fn gathers_all_relationships() {
        let graph = sample();
        let index = GraphIndex::from_graph(&graph);
        let ctx = NodeContext::build(&graph, &index, "function:src/auth.ts::login").unwrap();

        assert_eq!(ctx.callers.len(), 1);
        assert_eq!(ctx.callers[0].label, "route");
        assert_eq!(ctx.callers[0].confidence, 0.85);
        assert_eq!(ctx.callees[0].label, "save");
        assert_eq!(ctx.community.as_ref().map(|c| c.name.as_str()), Some("src/login"));
        assert_eq!(ctx.processes.len(), 1);
        assert_eq!(ctx.imports, vec!["src/db.ts"]);
        assert!(ctx.imported_by.is_empty());
    }

    #[test]
    fn imported_by_comes_from_owning_file() {
        let graph = sample();
        let index = GraphIndex::from_graph(&graph);
        let ctx = NodeContext::build(&graph, &index, "function:src/db.ts::save").unwrap();
        assert_eq!(ctx.imported_by, vec!["src/auth.ts"]);
        assert!(ctx.community.is_none());
    }

    #[test]
    fn unknown_node_is_not_found() {
        let graph = sample();
        let index = GraphIndex::from_graph(&graph);
        let err = NodeContext::build(&graph, &index, "function:nope.ts::x").unwrap_err();
        assert!(matches!(err, CartographError::NotFound(_)));
    }

    #[test]
    fn markdown_includes_sections() {
        let graph = sample();
        let index = GraphIndex::from_graph(&graph);
        let md = NodeContext::build(&graph, &index, "function:src/auth.ts::login")
            .unwrap()
            .to_markdown();
        assert!(md.starts_with("## login (function)"));
        assert!(md.contains("`src/auth.ts:1-9`"));
        assert!(md.contains("### Callers (1)"));
        assert!(md.contains("route → save"));
        assert!(md.contains("### Imports (1)"));
    }
}
