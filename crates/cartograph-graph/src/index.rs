//! Dense integer index over a graph's string ids.
//!
//! Nodes are inserted in slice order, so a [`NodeIndex`] is also the node's
//! position in the backing `nodes` slice. Edges whose endpoints are unknown
//! are left out.

use std::collections::HashMap;

use cartograph_core::{CodeEdge, CodeGraph, CodeNode, EdgeType};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

/// Arena view over borrowed nodes and edges.
///
/// # Examples
///
/// ```
/// use cartograph_core::{CodeEdge, CodeNode, EdgeType, NodeType};
/// use cartograph_graph::index::GraphIndex;
///
/// let nodes = vec![
///     CodeNode::symbol(NodeType::Function, "a", "x.ts", "typescript", 1, 3),
///     CodeNode::symbol(NodeType::Function, "b", "x.ts", "typescript", 5, 7),
/// ];
/// let edges = vec![CodeEdge::new(&nodes[0].id, &nodes[1].id, EdgeType::Calls, 0.85, "same-file")];
/// let index = GraphIndex::new(&nodes, &edges);
///
/// let a = index.index_of("function:x.ts::a").unwrap();
/// let callees = index.outgoing(a, &[EdgeType::Calls]);
/// assert_eq!(index.node(callees[0].0).label, "b");
/// ```
pub struct GraphIndex<'g> {
    nodes: &'g [CodeNode],
    edges: &'g [CodeEdge],
    graph: DiGraph<(), usize>,
    by_id: HashMap<&'g str, NodeIndex>,
}

impl<'g> GraphIndex<'g> {
    /// Index `nodes` and every edge between them.
    pub fn new(nodes: &'g [CodeNode], edges: &'g [CodeEdge]) -> Self {
        let mut graph = DiGraph::with_capacity(nodes.len(), edges.len());
        let mut by_id = HashMap::with_capacity(nodes.len());
        for node in nodes {
            let ix = graph.add_node(());
            by_id.entry(node.id.as_str()).or_insert(ix);
        }
        for (position, edge) in edges.iter().enumerate() {
            let (Some(&from), Some(&to)) = (
                by_id.get(edge.source.as_str()),
                by_id.get(edge.target.as_str()),
            ) else {
                continue;
            };
            graph.add_edge(from, to, position);
        }
        Self {
            nodes,
            edges,
            graph,
            by_id,
        }
    }

    /// Index a whole [`CodeGraph`].
    pub fn from_graph(graph: &'g CodeGraph) -> Self {
        Self::new(&graph.nodes, &graph.edges)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn index_of(&self, id: &str) -> Option<NodeIndex> {
        self.by_id.get(id).copied()
    }

    pub fn node(&self, ix: NodeIndex) -> &'g CodeNode {
        &self.nodes[ix.index()]
    }

    /// Look a node up by id.
    pub fn get(&self, id: &str) -> Option<&'g CodeNode> {
        self.index_of(id).map(|ix| self.node(ix))
    }

    pub fn node_indices(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.node_indices()
    }

    /// Targets of `ix`'s outgoing edges of the given types, in edge order.
    pub fn outgoing(&self, ix: NodeIndex, types: &[EdgeType]) -> Vec<(NodeIndex, &'g CodeEdge)> {
        self.neighbours(ix, Direction::Outgoing, types)
    }

    /// Sources of `ix`'s incoming edges of the given types, in edge order.
    pub fn incoming(&self, ix: NodeIndex, types: &[EdgeType]) -> Vec<(NodeIndex, &'g CodeEdge)> {
        self.neighbours(ix, Direction::Incoming, types)
    }

    fn neighbours(
        &self,
        ix: NodeIndex,
        direction: Direction,
        types: &[EdgeType],
    ) -> Vec<(NodeIndex, &'g CodeEdge)> {
        let mut found: Vec<(usize, NodeIndex)> = self
            .graph
            .edges_directed(ix, direction)
            .filter(|e| types.contains(&self.edges[*e.weight()].edge_type))
            .map(|e| {
                let other = match direction {
                    Direction::Outgoing => e.target(),
                    Direction::Incoming => e.source(),
                };
                (*e.weight(), other)
            })
            .collect();
        found.sort_by_key(|(position, _)| *position);
        found
            .into_iter()
            .map(|(position, other)| (other, &self.edges[position]))
            .collect()
    }

    /// The file node that declares `ix` (itself when `ix` is a file).
    pub fn owning_file(&self, ix: NodeIndex) -> Option<NodeIndex> {
        let node = self.node(ix);
        if node.is_file() {
            return Some(ix);
        }
        self.index_of(&CodeNode::file_id(&node.file_path))
    }
}
