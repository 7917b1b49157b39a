//! Functional community detection with the Louvain method.
//!
//! Clusters symbol nodes over the undirected `calls`/`extends`/`implements`
//! subgraph (confidence >= 0.5, weight = confidence). Clusters of one are
//! pooled into a catch-all "Other" community, so every symbol ends up in
//! exactly one community.

use std::collections::{BTreeMap, HashMap, HashSet};

use cartograph_core::{CodeEdge, CodeNode, Community, EdgeType};

/// Id of the catch-all community for unclustered symbols.
pub const OTHER_COMMUNITY_ID: &str = "community:other";

const MIN_CONFIDENCE: f64 = 0.5;
const LARGE_GRAPH_SYMBOLS: usize = 500;
const LARGE_GRAPH_RESOLUTION: f64 = 1.5;
const MAX_LEVELS: usize = 16;
const MAX_PASSES: usize = 50;
const MAX_KEYWORDS: usize = 5;

/// Partition the symbol nodes into communities.
///
/// Never fails: when there are no qualifying edges, or the clustering
/// cannot run, all symbols land in a single community with cohesion 1.0.
///
/// # Examples
///
/// ```
/// use cartograph_core::{CodeNode, NodeType};
/// use cartograph_graph::community::detect;
///
/// let nodes = vec![
///     CodeNode::file("src/a.ts", "typescript"),
///     CodeNode::symbol(NodeType::Function, "parseConfig", "src/a.ts", "typescript", 1, 4),
///     CodeNode::symbol(NodeType::Function, "loadConfig", "src/a.ts", "typescript", 6, 9),
/// ];
/// let communities = detect(&nodes, &[]);
/// assert_eq!(communities.len(), 1);
/// assert_eq!(communities[0].symbol_count, 2);
/// assert_eq!(communities[0].cohesion, 1.0);
/// assert_eq!(communities[0].name, "src/config");
/// ```
pub fn detect(nodes: &[CodeNode], edges: &[CodeEdge]) -> Vec<Community> {
    let symbols: Vec<&CodeNode> = nodes.iter().filter(|n| !n.is_file()).collect();
    if symbols.is_empty() {
        return Vec::new();
    }
    let local: HashMap<&str, usize> = symbols
        .iter()
        .enumerate()
        .map(|(i, n)| (n.id.as_str(), i))
        .collect();

    let mut pair_weights: BTreeMap<(usize, usize), f64> = BTreeMap::new();
    for edge in edges {
        if !matches!(
            edge.edge_type,
            EdgeType::Calls | EdgeType::Extends | EdgeType::Implements
        ) || edge.confidence < MIN_CONFIDENCE
        {
            continue;
        }
        let (Some(&a), Some(&b)) = (
            local.get(edge.source.as_str()),
            local.get(edge.target.as_str()),
        ) else {
            continue;
        };
        if a == b {
            continue;
        }
        *pair_weights.entry((a.min(b), a.max(b))).or_insert(0.0) += edge.confidence;
    }

    if pair_weights.is_empty() {
        return vec![single_community(&symbols)];
    }

    let resolution = if symbols.len() > LARGE_GRAPH_SYMBOLS {
        LARGE_GRAPH_RESOLUTION
    } else {
        1.0
    };
    let weighted: Vec<(usize, usize, f64)> =
        pair_weights.iter().map(|(&(a, b), &w)| (a, b, w)).collect();

    let Some(assignment) = louvain(symbols.len(), &weighted, resolution) else {
        tracing::warn!(
            symbols = symbols.len(),
            edges = weighted.len(),
            "community detection failed, using a single community"
        );
        return vec![single_community(&symbols)];
    };

    let mut clusters: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (member, &cluster) in assignment.iter().enumerate() {
        clusters.entry(cluster).or_default().push(member);
    }

    let mut kept: Vec<Vec<usize>> = Vec::new();
    let mut other: Vec<usize> = Vec::new();
    for members in clusters.into_values() {
        if members.len() < 2 {
            other.extend(members);
        } else {
            kept.push(members);
        }
    }
    kept.sort_by(|a, b| {
        b.len()
            .cmp(&a.len())
            .then_with(|| symbols[a[0]].id.cmp(&symbols[b[0]].id))
    });

    let pairs: HashSet<(usize, usize)> = pair_weights.keys().copied().collect();
    let mut communities: Vec<Community> = kept
        .iter()
        .enumerate()
        .map(|(n, members)| {
            let member_nodes: Vec<&CodeNode> = members.iter().map(|&i| symbols[i]).collect();
            let keywords = label_keywords(&member_nodes);
            Community {
                id: format!("community:{n}"),
                name: community_name(&member_nodes, &keywords),
                cohesion: cohesion(members, &pairs),
                symbol_count: members.len(),
                member_ids: member_nodes.iter().map(|n| n.id.clone()).collect(),
                keywords,
            }
        })
        .collect();

    if !other.is_empty() {
        other.sort_unstable();
        let member_nodes: Vec<&CodeNode> = other.iter().map(|&i| symbols[i]).collect();
        communities.push(Community {
            id: OTHER_COMMUNITY_ID.to_string(),
            name: "Other".to_string(),
            keywords: label_keywords(&member_nodes),
            cohesion: cohesion(&other, &pairs),
            symbol_count: other.len(),
            member_ids: member_nodes.iter().map(|n| n.id.clone()).collect(),
        });
    }

    communities
}

/// Write each community id onto its member nodes.
pub fn assign(nodes: &mut [CodeNode], communities: &[Community]) {
    let membership: HashMap<&str, &str> = communities
        .iter()
        .flat_map(|c| c.member_ids.iter().map(move |m| (m.as_str(), c.id.as_str())))
        .collect();
    for node in nodes.iter_mut().filter(|n| !n.is_file()) {
        node.community_id = Some(
            membership
                .get(node.id.as_str())
                .copied()
                .unwrap_or(OTHER_COMMUNITY_ID)
                .to_string(),
        );
    }
}

fn single_community(symbols: &[&CodeNode]) -> Community {
    let keywords = label_keywords(symbols);
    Community {
        id: "community:0".to_string(),
        name: community_name(symbols, &keywords),
        cohesion: 1.0,
        symbol_count: symbols.len(),
        member_ids: symbols.iter().map(|n| n.id.clone()).collect(),
        keywords,
    }
}

/// Distinct internal pairs over the maximum possible, clamped to `[0, 1]`.
fn cohesion(members: &[usize], pairs: &HashSet<(usize, usize)>) -> f64 {
    let n = members.len();
    if n < 2 {
        return 1.0;
    }
    let set: HashSet<usize> = members.iter().copied().collect();
    let internal = pairs
        .iter()
        .filter(|(a, b)| set.contains(a) && set.contains(b))
        .count();
    let possible = n * (n - 1) / 2;
    (internal as f64 / possible as f64).clamp(0.0, 1.0)
}

fn community_name(members: &[&CodeNode], keywords: &[String]) -> String {
    let mut dirs: BTreeMap<&str, usize> = BTreeMap::new();
    for node in members {
        *dirs.entry(node.directory.as_str()).or_insert(0) += 1;
    }
    // BTreeMap iteration + strict comparison keeps the lexicographically first on ties.
    let mut dominant = "";
    let mut best = 0;
    for (dir, count) in dirs {
        if count > best {
            best = count;
            dominant = dir;
        }
    }
    let base = match dominant.rsplit('/').next() {
        Some(b) if !b.is_empty() => b,
        _ => "root",
    };
    let keyword = keywords.first().map(String::as_str).unwrap_or("misc");
    format!("{base}/{keyword}")
}

/// Rank member-label tokens by frequency (ties alphabetical).
fn label_keywords(members: &[&CodeNode]) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for node in members {
        for token in split_identifier(&node.label) {
            if token.chars().count() > 2 {
                *counts.entry(token).or_insert(0) += 1;
            }
        }
    }
    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked
        .into_iter()
        .take(MAX_KEYWORDS)
        .map(|(token, _)| token)
        .collect()
}

/// Split on camelCase, acronym and snake_case boundaries, lower-cased.
///
/// # Examples
///
/// ```
/// use cartograph_graph::community::split_identifier;
///
/// assert_eq!(split_identifier("handleLoginAttempt"), vec!["handle", "login", "attempt"]);
/// assert_eq!(split_identifier("parse_http_header"), vec!["parse", "http", "header"]);
/// assert_eq!(split_identifier("HTTPServer"), vec!["http", "server"]);
/// ```
pub fn split_identifier(identifier: &str) -> Vec<String> {
    let chars: Vec<char> = identifier.chars().collect();
    let mut tokens = Vec::new();
    let mut current = String::new();
    for (i, &c) in chars.iter().enumerate() {
        if !c.is_alphanumeric() {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            continue;
        }
        if c.is_uppercase() && !current.is_empty() {
            let prev = chars[i - 1];
            let next_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            if prev.is_lowercase() || prev.is_ascii_digit() || (prev.is_uppercase() && next_lower) {
                tokens.push(std::mem::take(&mut current));
            }
        }
        current.extend(c.to_lowercase());
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Weighted undirected graph for one Louvain level.
struct LevelGraph {
    adj: Vec<Vec<(usize, f64)>>,
    self_loops: Vec<f64>,
    degree: Vec<f64>,
    two_m: f64,
}

impl LevelGraph {
    fn new(n: usize, edges: &[(usize, usize, f64)], self_loops: Vec<f64>) -> Self {
        let mut adj = vec![Vec::new(); n];
        let mut degree: Vec<f64> = self_loops.iter().map(|w| 2.0 * w).collect();
        for &(a, b, w) in edges {
            adj[a].push((b, w));
            adj[b].push((a, w));
            degree[a] += w;
            degree[b] += w;
        }
        let two_m = degree.iter().sum();
        Self {
            adj,
            self_loops,
            degree,
            two_m,
        }
    }

    /// Greedy local moving. Returns the assignment and whether anything moved.
    fn local_moving(&self, resolution: f64) -> (Vec<usize>, bool) {
        let n = self.adj.len();
        let mut community: Vec<usize> = (0..n).collect();
        let mut sigma_tot = self.degree.clone();
        let mut improved = false;

        for _ in 0..MAX_PASSES {
            let mut moved = false;
            for node in 0..n {
                let current = community[node];
                let k_i = self.degree[node];

                let mut links: BTreeMap<usize, f64> = BTreeMap::new();
                for &(neighbour, w) in &self.adj[node] {
                    *links.entry(community[neighbour]).or_insert(0.0) += w;
                }

                sigma_tot[current] -= k_i;
                let gain = |c: usize, k_in: f64, sigma: &[f64]| {
                    k_in - resolution * sigma[c] * k_i / self.two_m
                };

                let mut best = current;
                let mut best_gain = gain(current, links.get(&current).copied().unwrap_or(0.0), &sigma_tot);
                for (&candidate, &k_in) in &links {
                    let g = gain(candidate, k_in, &sigma_tot);
                    if g > best_gain + 1e-12 {
                        best_gain = g;
                        best = candidate;
                    }
                }

                sigma_tot[best] += k_i;
                community[node] = best;
                if best != current {
                    moved = true;
                    improved = true;
                }
            }
            if !moved {
                break;
            }
        }
        (community, improved)
    }

    /// Collapse each community into one node.
    fn aggregate(&self, community: &[usize], count: usize) -> LevelGraph {
        let mut self_loops = vec![0.0; count];
        let mut between: BTreeMap<(usize, usize), f64> = BTreeMap::new();
        for (node, &c) in community.iter().enumerate() {
            self_loops[c] += self.self_loops[node];
            for &(neighbour, w) in &self.adj[node] {
                // Each undirected edge is seen from both ends.
                if neighbour < node {
                    continue;
                }
                let d = community[neighbour];
                if c == d {
                    self_loops[c] += w;
                } else {
                    *between.entry((c.min(d), c.max(d))).or_insert(0.0) += w;
                }
            }
        }
        let edges: Vec<(usize, usize, f64)> =
            between.into_iter().map(|((a, b), w)| (a, b, w)).collect();
        LevelGraph::new(count, &edges, self_loops)
    }
}

/// Multi-level Louvain. `None` when the weights cannot be optimized.
fn louvain(n: usize, edges: &[(usize, usize, f64)], resolution: f64) -> Option<Vec<usize>> {
    if edges.iter().any(|&(a, b, w)| a >= n || b >= n || !w.is_finite() || w < 0.0) {
        return None;
    }
    let mut level = LevelGraph::new(n, edges, vec![0.0; n]);
    if !(level.two_m.is_finite() && level.two_m > 0.0) {
        return None;
    }

    let mut membership: Vec<usize> = (0..n).collect();
    for _ in 0..MAX_LEVELS {
        let (community, improved) = level.local_moving(resolution);
        if !improved {
            break;
        }
        let mut renumber: HashMap<usize, usize> = HashMap::new();
        let compact: Vec<usize> = community
            .iter()
            .map(|c| {
                let next = renumber.len();
                *renumber.entry(*c).or_insert(next)
            })
            .collect();
        for m in membership.iter_mut() {
            *m = compact[*m];
        }
        level = level.aggregate(&compact, renumber.len());
    }
    Some(membership)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cartograph_core::NodeType;

    fn func(name: &str, path: &str) -> CodeNode {
        CodeNode::symbol(NodeType::Function, name, path, "typescript", 1, 2)
    }

    fn call(a: &CodeNode, b: &CodeNode, confidence: f64) -> CodeEdge {
        CodeEdge::new(&a.id, &b.id, EdgeType::Calls, confidence, "test")
    }

    #[test]
    fn louvain_separates_two_cliques() {
        let edges = vec![
            (0, 1, 0.9),
            (0, 2, 0.9),
            (1, 2, 0.9),
            (3, 4, 0.9),
            (3, 5, 0.9),
            (4, 5, 0.9),
            (2, 3, 0.1),
        ];
        let assignment = louvain(6, &edges, 1.0).unwrap();
        assert_eq!(assignment[0], assignment[1]);
        assert_eq!(assignment[1], assignment[2]);
        assert_eq!(assignment[3], assignment[4]);
        assert_eq!(assignment[4], assignment[5]);
        assert_ne!(assignment[0], assignment[3]);
    }

    #[test]
    fn louvain_rejects_bad_weights() {
        assert!(louvain(2, &[(0, 1, f64::NAN)], 1.0).is_none());
        assert!(louvain(2, &[(0, 5, 1.0)], 1.0).is_none());
    }

    #[test]
    fn every_symbol_gets_exactly_one_community() {
        let auth = [
            func("login", "src/auth/login.ts"),
            func("logout", "src/auth/login.ts"),
            func("verifyToken", "src/auth/token.ts"),
        ];
        let db = [
            func("query", "src/db/pool.ts"),
            func("connect", "src/db/pool.ts"),
            func("release", "src/db/pool.ts"),
        ];
        let lonely = func("unused", "src/misc.ts");
        let mut nodes = vec![CodeNode::file("src/auth/login.ts", "typescript")];
        nodes.extend(auth.iter().cloned());
        nodes.extend(db.iter().cloned());
        nodes.push(lonely.clone());

        let edges = vec![
            call(&auth[0], &auth[2], 0.9),
            call(&auth[1], &auth[2], 0.9),
            call(&auth[0], &auth[1], 0.85),
            call(&db[0], &db[1], 0.85),
            call(&db[0], &db[2], 0.85),
            call(&db[1], &db[2], 0.85),
            // Below the confidence floor: ignored.
            call(&auth[0], &db[0], 0.3),
        ];

        let communities = detect(&nodes, &edges);
        let mut seen: HashMap<&str, usize> = HashMap::new();
        for c in &communities {
            assert_eq!(c.symbol_count, c.member_ids.len());
            for m in &c.member_ids {
                *seen.entry(m.as_str()).or_insert(0) += 1;
            }
        }
        for node in nodes.iter().filter(|n| !n.is_file()) {
            assert_eq!(seen.get(node.id.as_str()), Some(&1), "{}", node.id);
        }

        let other = communities
            .iter()
            .find(|c| c.id == OTHER_COMMUNITY_ID)
            .unwrap();
        assert_eq!(other.member_ids, vec![lonely.id.clone()]);

        let db_community = communities
            .iter()
            .find(|c| c.member_ids.contains(&db[0].id))
            .unwrap();
        assert_eq!(db_community.cohesion, 1.0);
        assert!(db_community.name.starts_with("db/"));
    }

    #[test]
    fn assign_backfills_nodes() {
        let a = func("alpha", "a.ts");
        let b = func("beta", "a.ts");
        let mut nodes = vec![CodeNode::file("a.ts", "typescript"), a.clone(), b.clone()];
        let edges = vec![call(&a, &b, 0.9)];
        let communities = detect(&nodes, &edges);
        assign(&mut nodes, &communities);
        assert!(nodes[0].community_id.is_none());
        assert_eq!(nodes[1].community_id, nodes[2].community_id);
        assert!(nodes[1].community_id.is_some());
    }

    #[test]
    fn keywords_drop_short_tokens() {
        let nodes = [
            func("getUserById", "x.ts"),
            func("get_user_name", "x.ts"),
        ];
        let refs: Vec<&CodeNode> = nodes.iter().collect();
        assert_eq!(label_keywords(&refs), vec!["get", "user", "name"]);
    }

    #[test]
    fn root_directory_names_as_root() {
        let nodes = [func("startServer", "main.ts")];
        let refs: Vec<&CodeNode> = nodes.iter().collect();
        assert_eq!(community_name(&refs, &label_keywords(&refs)), "root/server");
    }

    #[test]
    fn no_symbols_no_communities() {
        let nodes = vec![CodeNode::file("a.ts", "typescript")];
        assert!(detect(&nodes, &[]).is_empty());
    }
}
