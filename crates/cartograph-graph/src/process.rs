//! Execution-flow tracing from scored entry points.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::OnceLock;

use cartograph_core::{CodeEdge, CodeNode, Community, EdgeType, NodeType, ProcessFlow};
use petgraph::graph::NodeIndex;
use regex::Regex;

use crate::index::GraphIndex;

const MAX_CANDIDATES: usize = 30;
const MAX_DEPTH: usize = 10;
const MAX_BRANCHING: usize = 4;
const MIN_CONFIDENCE: f64 = 0.5;
const MAX_PROCESSES: usize = 75;
/// Bound on BFS pops per entry point; queued paths are closed when it runs out.
const MAX_EXPANSIONS: usize = 512;

struct NamePattern {
    regex: Regex,
    bonus: f64,
}

fn name_patterns() -> &'static [NamePattern] {
    static PATTERNS: OnceLock<Vec<NamePattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            // Program entry and bootstrap.
            (r"(?i)^(main|run|start|serve|bootstrap|app)$", 2.5),
            // HTTP verbs and request handlers.
            (r"(?i)^(get|post|put|patch|delete|head|options)$", 2.0),
            (r"^handle[A-Z_]|(?i)handler$", 2.0),
            // Routers, controllers, RPC.
            (r"(?i)(controller|router|route|endpoint|resolver|rpc)", 1.5),
            // Initialization.
            (r"(?i)^(init|initialize|setup|bootstrap|start|create_?app|register)", 1.5),
            // Middleware and hooks.
            (r"(?i)middleware|^use[A-Z]", 1.0),
            // Event handlers.
            (r"^on[A-Z_]|(?i)^on_", 1.0),
            // Lifecycle methods.
            (
                r"^(componentDidMount|componentWillUnmount|ngOnInit|ngOnDestroy|mounted|created|__init__|__call__|teardown|dispose)$",
                1.0,
            ),
        ]
        .into_iter()
        .map(|(pattern, bonus)| NamePattern {
            regex: Regex::new(pattern).expect("static pattern is valid"),
            bonus,
        })
        .collect()
    })
}

/// Entry-point naming bonus: the largest matching pattern's bonus, or 0.
///
/// # Examples
///
/// ```
/// use cartograph_graph::process::name_bonus;
///
/// assert_eq!(name_bonus("main"), 2.5);
/// assert_eq!(name_bonus("handleRequest"), 2.0);
/// assert_eq!(name_bonus("onClick"), 1.0);
/// assert_eq!(name_bonus("formatDate"), 0.0);
/// ```
pub fn name_bonus(name: &str) -> f64 {
    name_patterns()
        .iter()
        .filter(|p| p.regex.is_match(name))
        .map(|p| p.bonus)
        .fold(0.0, f64::max)
}

/// Score every function and class as a potential flow entry point.
///
/// Returns `(node, score)` pairs, best first, limited to the top 30.
pub fn score_entry_points(index: &GraphIndex<'_>) -> Vec<(NodeIndex, f64)> {
    let mut scored: Vec<(NodeIndex, f64)> = index
        .node_indices()
        .filter(|&ix| {
            matches!(
                index.node(ix).node_type,
                NodeType::Function | NodeType::Class
            )
        })
        .map(|ix| {
            let outgoing = index.outgoing(ix, &[EdgeType::Calls]).len();
            let incoming = index.incoming(ix, &[EdgeType::Calls]).len();
            let mut score = 0.5 * outgoing as f64 + name_bonus(&index.node(ix).label);
            if outgoing > 0 && incoming == 0 {
                score += 2.0;
            }
            (ix, score)
        })
        .filter(|(_, score)| *score > 0.0)
        .collect();

    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| index.node(a.0).id.cmp(&index.node(b.0).id))
    });
    scored.truncate(MAX_CANDIDATES);
    scored
}

/// Trace representative execution flows.
///
/// # Examples
///
/// ```
/// use cartograph_core::{CodeEdge, CodeNode, EdgeType, NodeType};
/// use cartograph_graph::process::detect;
///
/// let main = CodeNode::symbol(NodeType::Function, "main", "app.ts", "typescript", 1, 5);
/// let load = CodeNode::symbol(NodeType::Function, "load", "app.ts", "typescript", 7, 9);
/// let edges = vec![CodeEdge::new(&main.id, &load.id, EdgeType::Calls, 0.85, "same-file")];
/// let flows = detect(&[main, load], &edges, &[]);
/// assert_eq!(flows.len(), 1);
/// assert_eq!(flows[0].name, "main → load");
/// assert_eq!(flows[0].step_count, 2);
/// ```
pub fn detect(nodes: &[CodeNode], edges: &[CodeEdge], communities: &[Community]) -> Vec<ProcessFlow> {
    let index = GraphIndex::new(nodes, edges);
    let candidates = score_entry_points(&index);

    let mut paths: Vec<Vec<NodeIndex>> = Vec::new();
    for (entry, _) in &candidates {
        paths.extend(trace_from(&index, *entry));
    }

    let kept = dedupe(&index, paths);

    let community_of: HashMap<&str, &str> = communities
        .iter()
        .flat_map(|c| c.member_ids.iter().map(move |m| (m.as_str(), c.id.as_str())))
        .collect();

    kept.into_iter()
        .take(MAX_PROCESSES)
        .enumerate()
        .map(|(n, path)| {
            let steps: Vec<String> = path.iter().map(|&ix| index.node(ix).id.clone()).collect();
            let spanned: HashSet<&str> = steps
                .iter()
                .filter_map(|s| community_of.get(s.as_str()).copied())
                .collect();
            let entry = index.node(path[0]);
            let terminal = index.node(path[path.len() - 1]);
            ProcessFlow {
                id: format!("process:{n}"),
                name: format!("{} → {}", entry.label, terminal.label),
                entry_point: entry.id.clone(),
                terminal_point: terminal.id.clone(),
                step_count: steps.len(),
                steps,
                cross_community: spanned.len() > 1,
            }
        })
        .collect()
}

/// Breadth-first path enumeration from one entry point.
fn trace_from(index: &GraphIndex<'_>, entry: NodeIndex) -> Vec<Vec<NodeIndex>> {
    let mut finished = Vec::new();
    let mut queue: VecDeque<Vec<NodeIndex>> = VecDeque::from([vec![entry]]);
    let mut expansions = 0;

    while let Some(path) = queue.pop_front() {
        if expansions >= MAX_EXPANSIONS {
            finished.push(path);
            continue;
        }
        expansions += 1;

        let Some(&last) = path.last() else {
            continue;
        };
        let depth = path.len() - 1;
        let next = if depth >= MAX_DEPTH {
            Vec::new()
        } else {
            branches(index, last, &path)
        };

        if next.is_empty() {
            finished.push(path);
            continue;
        }
        for target in next {
            let mut extended = path.clone();
            extended.push(target);
            queue.push_back(extended);
        }
    }

    finished.retain(|p| p.len() >= 2);
    finished
}

/// Up to four unvisited callees, strongest edges first.
fn branches(index: &GraphIndex<'_>, from: NodeIndex, path: &[NodeIndex]) -> Vec<NodeIndex> {
    let mut callees: Vec<(NodeIndex, f64)> = Vec::new();
    for (target, edge) in index.outgoing(from, &[EdgeType::Calls]) {
        if edge.confidence < MIN_CONFIDENCE || path.contains(&target) {
            continue;
        }
        if callees.iter().any(|(t, _)| *t == target) {
            continue;
        }
        callees.push((target, edge.confidence));
    }
    callees.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| index.node(a.0).id.cmp(&index.node(b.0).id))
    });
    callees.into_iter().take(MAX_BRANCHING).map(|(t, _)| t).collect()
}

/// Longest first; drop strict subsets of kept paths and repeated endpoint pairs.
fn dedupe(index: &GraphIndex<'_>, mut paths: Vec<Vec<NodeIndex>>) -> Vec<Vec<NodeIndex>> {
    paths.sort_by(|a, b| {
        b.len().cmp(&a.len()).then_with(|| {
            let ids_a = a.iter().map(|&ix| index.node(ix).id.as_str());
            let ids_b = b.iter().map(|&ix| index.node(ix).id.as_str());
            ids_a.cmp(ids_b)
        })
    });

    let mut kept: Vec<(Vec<NodeIndex>, HashSet<NodeIndex>)> = Vec::new();
    let mut endpoints: HashSet<(NodeIndex, NodeIndex)> = HashSet::new();
    for path in paths {
        let (first, last) = (path[0], path[path.len() - 1]);
        if endpoints.contains(&(first, last)) {
            continue;
        }
        let set: HashSet<NodeIndex> = path.iter().copied().collect();
        let subsumed = kept
            .iter()
            .any(|(k, kset)| k.len() > path.len() && set.is_subset(kset));
        if subsumed {
            continue;
        }
        endpoints.insert((first, last));
        kept.push((path, set));
    }
    kept.into_iter().map(|(path, _)| path).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn func(name: &str) -> CodeNode {
        CodeNode::symbol(NodeType::Function, name, "src/app.ts", "typescript", 1, 2)
    }

    fn call(from: &CodeNode, to: &CodeNode, confidence: f64) -> CodeEdge {
        CodeEdge::new(&from.id, &to.id, EdgeType::Calls, confidence, "test")
    }

    #[test]
    fn cycles_never_repeat_steps() {
        let a = func("main");
        let b = func("step");
        let c = func("loop");
        let edges = vec![call(&a, &b, 0.9), call(&b, &c, 0.9), call(&c, &b, 0.9), call(&c, &a, 0.9)];
        let flows = detect(&[a, b, c], &edges, &[]);
        assert!(!flows.is_empty());
        for flow in &flows {
            let unique: HashSet<&String> = flow.steps.iter().collect();
            assert_eq!(unique.len(), flow.steps.len());
            assert_eq!(flow.steps[0], flow.entry_point);
            assert_eq!(flow.steps.last(), Some(&flow.terminal_point));
            assert_eq!(flow.step_count, flow.steps.len());
        }
    }

    #[test]
    fn low_confidence_calls_are_not_followed() {
        let a = func("main");
        let b = func("helper");
        let edges = vec![call(&a, &b, 0.3)];
        assert!(detect(&[a, b], &edges, &[]).is_empty());
    }

    #[test]
    fn subsumed_paths_are_dropped() {
        // main -> a -> b is traced from main; a -> b alone is a strict subset.
        let main = func("main");
        let a = func("handleRequest");
        let b = func("save");
        let edges = vec![call(&main, &a, 0.9), call(&a, &b, 0.9)];
        let flows = detect(&[main.clone(), a, b], &edges, &[]);
        assert_eq!(flows.len(), 1);
        assert_eq!(flows[0].entry_point, main.id);
        assert_eq!(flows[0].step_count, 3);
    }

    #[test]
    fn branching_is_capped_at_four() {
        let root = func("main");
        let leaves: Vec<CodeNode> = (0..6).map(|i| func(&format!("leaf{i}"))).collect();
        let mut nodes = vec![root.clone()];
        nodes.extend(leaves.iter().cloned());
        let edges: Vec<CodeEdge> = leaves
            .iter()
            .enumerate()
            .map(|(i, leaf)| call(&root, leaf, 0.9 - i as f64 * 0.05))
            .collect();
        let flows = detect(&nodes, &edges, &[]);
        assert_eq!(flows.len(), 4);
        let terminals: HashSet<&str> = flows.iter().map(|f| f.terminal_point.as_str()).collect();
        assert!(terminals.contains(leaves[0].id.as_str()));
        assert!(!terminals.contains(leaves[5].id.as_str()));
    }

    #[test]
    fn depth_is_bounded() {
        let chain: Vec<CodeNode> = (0..15).map(|i| func(&format!("f{i}"))).collect();
        let edges: Vec<CodeEdge> = chain.windows(2).map(|w| call(&w[0], &w[1], 0.9)).collect();
        let flows = detect(&chain, &edges, &[]);
        assert!(flows.iter().all(|f| f.step_count <= MAX_DEPTH + 1));
        assert!(flows.iter().any(|f| f.step_count == MAX_DEPTH + 1));
    }

    #[test]
    fn cross_community_flag() {
        let a = func("main");
        let b = func("persist");
        let communities = vec![
            Community {
                id: "community:0".into(),
                name: "x".into(),
                keywords: vec![],
                cohesion: 1.0,
                symbol_count: 1,
                member_ids: vec![a.id.clone()],
            },
            Community {
                id: "community:1".into(),
                name: "y".into(),
                keywords: vec![],
                cohesion: 1.0,
                symbol_count: 1,
                member_ids: vec![b.id.clone()],
            },
        ];
        let edges = vec![call(&a, &b, 0.9)];
        let flows = detect(&[a, b], &edges, &communities);
        assert!(flows[0].cross_community);
    }

    #[test]
    fn entry_scoring_prefers_roots() {
        let nodes = vec![func("main"), func("helper"), func("util")];
        let edges = vec![call(&nodes[0], &nodes[1], 0.9), call(&nodes[1], &nodes[2], 0.9)];
        let index = GraphIndex::new(&nodes, &edges);
        let scored = score_entry_points(&index);
        assert_eq!(index.node(scored[0].0).label, "main");
        // main: 0.5 outgoing + 2.5 name + 2.0 root
        assert_eq!(scored[0].1, 5.0);
    }
}
