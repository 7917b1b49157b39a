//! BM25 + term-overlap search fused with Reciprocal Rank Fusion (RRF).

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

use cartograph_core::{CodeGraph, CodeNode, SearchConfig};
use serde::Serialize;

use crate::tokenize::tokenize;

/// Weight of a partial (substring) term match in the overlap scorer.
const PARTIAL_WEIGHT: f64 = 0.3;
/// Each ranking contributes this many candidates per requested result.
const FUSION_DEPTH: usize = 3;

/// Which ranking produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchSource {
    Bm25,
    Semantic,
}

/// One ranked node.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub node: CodeNode,
    pub score: f64,
    /// Rankings that contributed, in fixed order (BM25 first).
    pub sources: Vec<SearchSource>,
}

/// A scored document position before it is turned into a result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    pub doc: usize,
    pub score: f64,
}

/// RRF output for one document.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedHit {
    pub doc: usize,
    pub score: f64,
    pub sources: Vec<SearchSource>,
}

struct Document {
    node: CodeNode,
    length: usize,
    terms: HashSet<String>,
}

/// Search index over one graph snapshot's nodes.
///
/// Documents are addressed by dense position; postings map each term to
/// `(document, term frequency)` pairs.
///
/// # Examples
///
/// ```
/// use cartograph_core::{CodeGraph, CodeNode, NodeType, SearchConfig};
/// use cartograph_search::CodeSearchEngine;
///
/// let mut graph = CodeGraph::new("o", "r", "main");
/// graph.nodes.push(CodeNode::symbol(NodeType::Function, "handleLogin", "src/auth.ts", "typescript", 1, 5));
/// graph.nodes.push(CodeNode::symbol(NodeType::Function, "renderChart", "src/ui.ts", "typescript", 1, 5));
///
/// let engine = CodeSearchEngine::new(&graph, &SearchConfig::default());
/// let results = engine.search("login", 5);
/// assert_eq!(results[0].node.label, "handleLogin");
/// ```
pub struct CodeSearchEngine {
    documents: Vec<Document>,
    postings: HashMap<String, Vec<(usize, usize)>>,
    average_length: f64,
    k1: f64,
    b: f64,
    rrf_k: usize,
}

impl CodeSearchEngine {
    /// Index every node of `graph`.
    pub fn new(graph: &CodeGraph, config: &SearchConfig) -> Self {
        Self::from_nodes(&graph.nodes, config)
    }

    pub fn from_nodes(nodes: &[CodeNode], config: &SearchConfig) -> Self {
        let mut documents = Vec::with_capacity(nodes.len());
        let mut postings: HashMap<String, Vec<(usize, usize)>> = HashMap::new();
        let mut total_length = 0usize;

        for (doc, node) in nodes.iter().enumerate() {
            let tokens = tokenize(&document_text(node));
            let mut frequencies: HashMap<&str, usize> = HashMap::new();
            for token in &tokens {
                *frequencies.entry(token.as_str()).or_insert(0) += 1;
            }
            for (term, tf) in &frequencies {
                postings.entry(term.to_string()).or_default().push((doc, *tf));
            }
            total_length += tokens.len();
            documents.push(Document {
                node: node.clone(),
                length: tokens.len(),
                terms: frequencies.keys().map(|t| t.to_string()).collect(),
            });
        }

        let average_length = if documents.is_empty() {
            0.0
        } else {
            total_length as f64 / documents.len() as f64
        };
        tracing::debug!(
            documents = documents.len(),
            terms = postings.len(),
            "built search index"
        );

        Self {
            documents,
            postings,
            average_length,
            k1: config.bm25_k1,
            b: config.bm25_b,
            rrf_k: config.rrf_k,
        }
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Keyword ranking (BM25).
    pub fn search_bm25(&self, query: &str, top_k: usize) -> Vec<SearchResult> {
        self.to_results(self.bm25_hits(query, top_k), SearchSource::Bm25)
    }

    /// Term-overlap ranking: exact shared terms plus 0.3 per partial
    /// (substring) match, over the number of distinct query terms.
    pub fn search_semantic(&self, query: &str, top_k: usize) -> Vec<SearchResult> {
        self.to_results(self.overlap_hits(query, top_k), SearchSource::Semantic)
    }

    /// Hybrid ranking: both lists (3 × `top_k` deep) fused with RRF.
    ///
    /// # Examples
    ///
    /// ```
    /// use cartograph_core::{CodeNode, NodeType, SearchConfig};
    /// use cartograph_search::{CodeSearchEngine, SearchSource};
    ///
    /// let nodes = vec![
    ///     CodeNode::symbol(NodeType::Function, "connectPool", "src/db/pool.ts", "typescript", 1, 9),
    ///     CodeNode::symbol(NodeType::Class, "ConnectionError", "src/db/errors.ts", "typescript", 1, 3),
    /// ];
    /// let engine = CodeSearchEngine::from_nodes(&nodes, &SearchConfig::default());
    /// let results = engine.search("connect pool", 10);
    /// assert_eq!(results[0].node.label, "connectPool");
    /// assert_eq!(results[0].sources, vec![SearchSource::Bm25, SearchSource::Semantic]);
    /// ```
    pub fn search(&self, query: &str, top_k: usize) -> Vec<SearchResult> {
        if top_k == 0 {
            return Vec::new();
        }
        let depth = top_k.saturating_mul(FUSION_DEPTH);
        let bm25 = self.bm25_hits(query, depth);
        let semantic = self.overlap_hits(query, depth);

        let mut fused = reciprocal_rank_fusion(&bm25, &semantic, self.rrf_k);
        self.order_fused(&mut fused);
        fused
            .into_iter()
            .take(top_k)
            .map(|hit| SearchResult {
                node: self.documents[hit.doc].node.clone(),
                score: hit.score,
                sources: hit.sources,
            })
            .collect()
    }

    /// Highest fused score first; ties go to the shorter document, then the lower id.
    fn order_fused(&self, fused: &mut [FusedHit]) {
        fused.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| self.documents[a.doc].length.cmp(&self.documents[b.doc].length))
                .then_with(|| self.documents[a.doc].node.id.cmp(&self.documents[b.doc].node.id))
        });
    }

    fn bm25_hits(&self, query: &str, top_k: usize) -> Vec<Hit> {
        let terms: HashSet<String> = tokenize(query).into_iter().collect();
        if terms.is_empty() || self.documents.is_empty() {
            return Vec::new();
        }
        let n = self.documents.len() as f64;
        let mut scores: HashMap<usize, f64> = HashMap::new();

        for term in &terms {
            let Some(posting) = self.postings.get(term) else {
                continue;
            };
            let df = posting.len() as f64;
            let idf = (1.0 + (n - df + 0.5) / (df + 0.5)).ln();
            for &(doc, tf) in posting {
                let tf = tf as f64;
                let length_ratio = if self.average_length > 0.0 {
                    self.documents[doc].length as f64 / self.average_length
                } else {
                    1.0
                };
                let norm = tf + self.k1 * (1.0 - self.b + self.b * length_ratio);
                *scores.entry(doc).or_insert(0.0) += idf * tf * (self.k1 + 1.0) / norm;
            }
        }
        self.rank(scores, top_k)
    }

    fn overlap_hits(&self, query: &str, top_k: usize) -> Vec<Hit> {
        let terms: HashSet<String> = tokenize(query).into_iter().collect();
        if terms.is_empty() {
            return Vec::new();
        }
        let scores: HashMap<usize, f64> = self
            .documents
            .iter()
            .enumerate()
            .filter_map(|(doc, document)| {
                let mut exact = 0usize;
                let mut partial = 0usize;
                for term in &terms {
                    if document.terms.contains(term) {
                        exact += 1;
                    } else if document
                        .terms
                        .iter()
                        .any(|t| t.contains(term.as_str()) || term.contains(t.as_str()))
                    {
                        partial += 1;
                    }
                }
                let score = (exact as f64 + PARTIAL_WEIGHT * partial as f64) / terms.len() as f64;
                (score > 0.0).then_some((doc, score))
            })
            .collect();
        self.rank(scores, top_k)
    }

    /// Sort descending; ties go to the shorter document, then the smaller id.
    fn rank(&self, scores: HashMap<usize, f64>, top_k: usize) -> Vec<Hit> {
        let mut hits: Vec<Hit> = scores
            .into_iter()
            .filter(|(_, score)| *score > 0.0)
            .map(|(doc, score)| Hit { doc, score })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| self.documents[a.doc].length.cmp(&self.documents[b.doc].length))
                .then_with(|| self.documents[a.doc].node.id.cmp(&self.documents[b.doc].node.id))
        });
        hits.truncate(top_k);
        hits
    }

    fn to_results(&self, hits: Vec<Hit>, source: SearchSource) -> Vec<SearchResult> {
        hits.into_iter()
            .map(|hit| SearchResult {
                node: self.documents[hit.doc].node.clone(),
                score: hit.score,
                sources: vec![source],
            })
            .collect()
    }
}

/// Synthetic document: label, type, path, directory, language.
fn document_text(node: &CodeNode) -> String {
    format!(
        "{} {} {} {} {}",
        node.label, node.node_type, node.file_path, node.directory, node.language
    )
}

/// Combine BM25 and overlap rankings: each list adds `1 / (k + rank)` (rank
/// from 1) to every document it contains.
///
/// # Examples
///
/// ```
/// use cartograph_search::reciprocal_rank_fusion;
///
/// let results = reciprocal_rank_fusion(&[], &[], 60);
/// assert!(results.is_empty());
/// ```
pub fn reciprocal_rank_fusion(bm25: &[Hit], semantic: &[Hit], k: usize) -> Vec<FusedHit> {
    let mut fused: Vec<FusedHit> = Vec::new();
    let mut position: HashMap<usize, usize> = HashMap::new();

    for (hits, source) in [(bm25, SearchSource::Bm25), (semantic, SearchSource::Semantic)] {
        for (rank, hit) in hits.iter().enumerate() {
            let contribution = 1.0 / (k as f64 + rank as f64 + 1.0);
            match position.get(&hit.doc) {
                Some(&i) => {
                    fused[i].score += contribution;
                    if !fused[i].sources.contains(&source) {
                        fused[i].sources.push(source);
                    }
                }
                None => {
                    position.insert(hit.doc, fused.len());
                    fused.push(FusedHit {
                        doc: hit.doc,
                        score: contribution,
                        sources: vec![source],
                    });
                }
            }
        }
    }

    fused.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    fused
}

/// Render results as a markdown list.
pub fn format_markdown(query: &str, results: &[SearchResult]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "## Search: {query}\n");
    if results.is_empty() {
        out.push_str("No matching symbols.\n");
        return out;
    }
    for (i, result) in results.iter().enumerate() {
        let node = &result.node;
        let location = match node.line_start {
            Some(line) => format!("{}:{line}", node.file_path),
            None => node.file_path.clone(),
        };
        let sources: Vec<&str> = result
            .sources
            .iter()
            .map(|s| match s {
                SearchSource::Bm25 => "bm25",
                SearchSource::Semantic => "semantic",
            })
            .collect();
        let _ = writeln!(
            out,
            "{}. **{}** ({}) `{location}` score {:.4} [{}]\n   id: `{}`",
            i + 1,
            node.label,
            node.node_type,
            result.score,
            sources.join("+"),
            node.id,
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use cartograph_core::NodeType;

    fn func(name: &str, path: &str) -> CodeNode {
        CodeNode::symbol(NodeType::Function, name, path, "typescript", 1, 2)
    }

    fn engine(nodes: &[CodeNode]) -> CodeSearchEngine {
        CodeSearchEngine::from_nodes(nodes, &SearchConfig::default())
    }

    fn hit(doc: usize) -> Hit {
        Hit { doc, score: 1.0 }
    }

    #[test]
    fn exact_token_ranks_at_or_above_partial_match() {
        let nodes = vec![
            func("handleLoginAttempt", "src/auth/attempts.ts"),
            func("handleLogin", "src/auth/session.ts"),
        ];
        let results = engine(&nodes).search_semantic("login", 10);
        let pos = |label: &str| results.iter().position(|r| r.node.label == label).unwrap();
        assert!(pos("handleLogin") <= pos("handleLoginAttempt"));
        assert!(results[pos("handleLogin")].score >= results[pos("handleLoginAttempt")].score);
    }

    #[test]
    fn partial_matches_are_discounted() {
        let nodes = vec![func("logout", "a.ts"), func("logging", "b.ts")];
        let results = engine(&nodes).search_semantic("logout", 10);
        assert_eq!(results[0].node.label, "logout");
        assert_eq!(results[0].score, 1.0);
        assert!(results.iter().all(|r| r.node.label != "logging"));

        let results = engine(&nodes).search_semantic("log", 10);
        assert_eq!(results.len(), 2);
        assert!((results[0].score - 0.3).abs() < 1e-9);
    }

    #[test]
    fn bm25_prefers_rarer_terms() {
        let nodes = vec![
            func("parseConfig", "src/config.ts"),
            func("parseArgs", "src/cli.ts"),
            func("parseHeaders", "src/http.ts"),
            func("loadConfig", "src/config.ts"),
        ];
        let results = engine(&nodes).search_bm25("parse args", 10);
        assert_eq!(results[0].node.label, "parseArgs");
        assert!(results.iter().all(|r| r.sources == vec![SearchSource::Bm25]));
    }

    #[test]
    fn rrf_rewards_presence_in_both_lists() {
        let fused = reciprocal_rank_fusion(&[hit(1), hit(2)], &[hit(3), hit(2)], 60);
        assert_eq!(fused.len(), 3);
        assert_eq!(fused[0].doc, 2);
        assert_eq!(fused[0].sources, vec![SearchSource::Bm25, SearchSource::Semantic]);
        let expected = 2.0 / 62.0;
        assert!((fused[0].score - expected).abs() < 1e-12);
        let single = fused.iter().find(|f| f.doc == 1).unwrap();
        assert!((single.score - 1.0 / 61.0).abs() < 1e-12);
    }

    #[test]
    fn equal_fused_scores_prefer_shorter_document() {
        let nodes = vec![
            func("sessionStoreCleanupHandler", "src/session/store/cleanup.ts"),
            func("session", "src/s.ts"),
        ];
        let engine = engine(&nodes);
        assert!(engine.documents[1].length < engine.documents[0].length);

        let mut fused = reciprocal_rank_fusion(&[hit(0), hit(1)], &[hit(1), hit(0)], 60);
        assert_eq!(fused[0].score, fused[1].score);
        engine.order_fused(&mut fused);
        assert_eq!(fused[0].doc, 1);
        assert_eq!(fused[1].doc, 0);
    }

    #[test]
    fn hybrid_truncates_to_top_k() {
        let nodes: Vec<CodeNode> = (0..20).map(|i| func(&format!("handler{i}"), "src/h.ts")).collect();
        let results = engine(&nodes).search("handler", 5);
        assert_eq!(results.len(), 5);
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn empty_queries_and_indexes() {
        assert!(engine(&[]).search("anything", 5).is_empty());
        let nodes = vec![func("a", "x.ts")];
        assert!(engine(&nodes).search("", 5).is_empty());
        assert!(engine(&nodes).search("x", 0).is_empty());
    }

    #[test]
    fn markdown_lists_results() {
        let nodes = vec![func("handleLogin", "src/auth.ts")];
        let results = engine(&nodes).search("login", 5);
        let md = format_markdown("login", &results);
        assert!(md.contains("**handleLogin**"));
        assert!(md.contains("`src/auth.ts:1`"));
        assert!(md.contains("bm25+semantic"));
    }
}
