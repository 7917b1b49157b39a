//! Graph construction: fetch, parse, resolve, cluster, trace.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use cartograph_core::{
    AmbiguityPolicy, BuildConfig, CartographError, CodeEdge, CodeGraph, CodeNode, EdgeType,
    NodeType,
};
use futures::future::join_all;
use tokio_util::sync::CancellationToken;

use crate::filter::TreeFilter;
use crate::parser::{self, Language, ParsedFile};
use crate::provider::{Credential, RepositoryProvider};
use crate::resolve::resolve_import;
use crate::{community, process};

/// Confidence of a call resolved through this file's imports.
pub const IMPORT_RESOLVED: f64 = 0.9;
/// Confidence of a call to a symbol declared in the same file.
pub const SAME_FILE: f64 = 0.85;
/// Confidence of a call matched to the only symbol with that name.
pub const GLOBAL_SINGLE: f64 = 0.5;
/// Confidence of a call matched among several same-named symbols.
pub const GLOBAL_MULTIPLE: f64 = 0.3;
const SPLIT_FLOOR: f64 = 0.05;
const DEFINED_IN: f64 = 1.0;
const IMPORTS: f64 = 0.95;
const SUPERTYPE: f64 = 0.9;

/// One retained file after the fetch stage.
#[derive(Debug, Clone)]
pub struct FileParse {
    pub path: String,
    pub language: Language,
    /// `None` when the fetch failed; the file node is kept, its contents are not.
    pub parsed: Option<ParsedFile>,
}

impl FileParse {
    /// Parse `content` as the file at `path`. `None` for unsupported languages.
    pub fn from_source(path: &str, content: &str) -> Option<Self> {
        Some(Self {
            path: path.to_string(),
            language: Language::from_path(path)?,
            parsed: Some(parser::parse(content, path)),
        })
    }
}

/// Builds [`CodeGraph`]s from a repository provider.
pub struct GraphBuilder {
    provider: Arc<dyn RepositoryProvider>,
    config: BuildConfig,
}

impl GraphBuilder {
    pub fn new(provider: Arc<dyn RepositoryProvider>, config: BuildConfig) -> Self {
        Self { provider, config }
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Build the graph for `owner/repo` at `branch` (default branch when `None`).
    ///
    /// Individual file failures are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`CartographError::Provider`] if the repository metadata or
    /// tree cannot be fetched, and [`CartographError::Cancelled`] if `cancel`
    /// fires before the build completes.
    pub async fn build(
        &self,
        credential: &Credential,
        owner: &str,
        repo: &str,
        branch: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<CodeGraph, CartographError> {
        let branch = match branch {
            Some(b) => b.to_string(),
            None => {
                let info = tokio::select! {
                    _ = cancel.cancelled() => return Err(CartographError::Cancelled),
                    info = self.provider.repo_info(credential, owner, repo) => info?,
                };
                info.default_branch
            }
        };

        let tree = tokio::select! {
            _ = cancel.cancelled() => return Err(CartographError::Cancelled),
            tree = self.provider.list_tree(credential, owner, repo, &branch) => tree?,
        };

        let filtered = TreeFilter::from_config(&self.config).filter(tree);
        for skipped in &filtered.skipped {
            tracing::trace!(path = %skipped.path, reason = %skipped.reason, "skipping file");
        }
        tracing::debug!(
            kept = filtered.kept.len(),
            skipped = filtered.skipped.len(),
            "filtered repository tree"
        );

        let paths: Vec<String> = filtered.kept.into_iter().map(|e| e.path).collect();
        let branch_ref = branch.as_str();
        let mut files = Vec::with_capacity(paths.len());
        for batch in paths.chunks(self.config.concurrency.max(1)) {
            if cancel.is_cancelled() {
                return Err(CartographError::Cancelled);
            }
            let fetches = batch.iter().map(|path| async move {
                let result = self
                    .provider
                    .file_content(credential, owner, repo, path, branch_ref)
                    .await;
                (path, result)
            });
            let results = tokio::select! {
                _ = cancel.cancelled() => return Err(CartographError::Cancelled),
                results = join_all(fetches) => results,
            };

            for (path, result) in results {
                let Some(language) = Language::from_path(path) else {
                    continue;
                };
                let parsed = match result {
                    Ok(content) => Some(parser::parse(&content, path)),
                    Err(e) => {
                        tracing::warn!(path = %path, error = %e, "failed to fetch file, skipping");
                        None
                    }
                };
                files.push(FileParse {
                    path: path.clone(),
                    language,
                    parsed,
                });
            }
        }

        let graph = assemble(owner, repo, &branch, files, self.config.ambiguity);
        tracing::info!(
            owner,
            repo,
            branch = %graph.branch,
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            communities = graph.communities.len(),
            processes = graph.processes.len(),
            "built code graph"
        );
        Ok(graph)
    }
}

/// Assemble a graph from already-parsed files. Pure and deterministic.
///
/// # Examples
///
/// ```
/// use cartograph_core::{AmbiguityPolicy, EdgeType};
/// use cartograph_graph::builder::{assemble, FileParse};
///
/// let files = vec![
///     FileParse::from_source("src/a.ts", "import { bar } from './b';\nexport function foo() {\n  return bar();\n}\n").unwrap(),
///     FileParse::from_source("src/b.ts", "export function bar() {\n  return 1;\n}\n").unwrap(),
/// ];
/// let graph = assemble("octocat", "demo", "main", files, AmbiguityPolicy::FirstMatch);
/// let call = graph.edges.iter().find(|e| e.edge_type == EdgeType::Calls).unwrap();
/// assert_eq!(call.source, "function:src/a.ts::foo");
/// assert_eq!(call.target, "function:src/b.ts::bar");
/// assert_eq!(call.reason, "import-resolved");
/// ```
pub fn assemble(
    owner: &str,
    repo: &str,
    branch: &str,
    mut files: Vec<FileParse>,
    policy: AmbiguityPolicy,
) -> CodeGraph {
    files.sort_by(|a, b| a.path.cmp(&b.path));
    files.dedup_by(|a, b| a.path == b.path);

    let mut graph = CodeGraph::new(owner, repo, branch);
    let mut edges = EdgeSet::default();
    let mut node_ids: HashSet<String> = HashSet::new();

    for file in &files {
        let node = CodeNode::file(&file.path, file.language.as_str());
        node_ids.insert(node.id.clone());
        graph.nodes.push(node);
    }

    // Symbols and their file membership.
    let mut symbols_by_file: HashMap<&str, Vec<CodeNode>> = HashMap::new();
    for file in &files {
        let Some(parsed) = &file.parsed else {
            continue;
        };
        let file_id = CodeNode::file_id(&file.path);
        let mut declared = Vec::new();
        for symbol in &parsed.symbols {
            let node = CodeNode::symbol(
                symbol.kind,
                &symbol.name,
                &file.path,
                file.language.as_str(),
                symbol.line_start,
                symbol.line_end,
            );
            if !node_ids.insert(node.id.clone()) {
                continue;
            }
            edges.add(CodeEdge::new(&node.id, &file_id, EdgeType::DefinedIn, DEFINED_IN, "declaration"));
            declared.push(node);
        }
        symbols_by_file.insert(file.path.as_str(), declared);
    }

    let names = NameIndex::new(&symbols_by_file);
    let file_set: HashSet<String> = files.iter().map(|f| f.path.clone()).collect();

    for file in &files {
        let Some(parsed) = &file.parsed else {
            continue;
        };
        let file_id = CodeNode::file_id(&file.path);
        let declared = symbols_by_file
            .get(file.path.as_str())
            .map(Vec::as_slice)
            .unwrap_or_default();

        // Imports: file -> file edges and the name -> file map for call resolution.
        let mut import_map: HashMap<&str, String> = HashMap::new();
        for import in &parsed.imports {
            let Some(target) = resolve_import(&file.path, &import.module, &file_set) else {
                continue;
            };
            if target == file.path {
                continue;
            }
            edges.add(CodeEdge::new(
                &file_id,
                &CodeNode::file_id(&target),
                EdgeType::Imports,
                IMPORTS,
                "import-resolved",
            ));
            for name in &import.names {
                import_map.insert(name.as_str(), target.clone());
            }
        }

        // Supertypes.
        for symbol in &parsed.symbols {
            let source = CodeNode::symbol_id(symbol.kind, &file.path, &symbol.name);
            let supertypes = symbol
                .extends
                .iter()
                .map(|n| (n, EdgeType::Extends))
                .chain(symbol.implements.iter().map(|n| (n, EdgeType::Implements)));
            for (name, edge_type) in supertypes {
                let target = names
                    .type_in_file(&file.path, name)
                    .or_else(|| {
                        import_map
                            .get(name.as_str())
                            .and_then(|f| names.type_in_file(f, name))
                    })
                    .or_else(|| names.first_type(name));
                if let Some(target) = target {
                    if target != source {
                        edges.add(CodeEdge::new(&source, target, edge_type, SUPERTYPE, "supertype"));
                    }
                }
            }
        }

        // Calls, in strict priority order.
        for call in &parsed.calls {
            let caller = declared
                .iter()
                .filter(|n| n.node_type == NodeType::Function && n.contains_line(call.line))
                .max_by_key(|n| n.line_start)
                .map(|n| n.id.clone())
                .unwrap_or_else(|| file_id.clone());
            let callee = call.callee.as_str();

            if let Some(target) = import_map
                .get(callee)
                .and_then(|f| names.callable_in_file(f, callee))
            {
                edges.add_call(&caller, target, IMPORT_RESOLVED, "import-resolved");
            } else if let Some(target) = names.callable_in_file(&file.path, callee) {
                edges.add_call(&caller, target, SAME_FILE, "same-file");
            } else {
                match names.callables(callee) {
                    [] => {}
                    [only] => edges.add_call(&caller, only, GLOBAL_SINGLE, "fuzzy-global-single"),
                    [first, ..] if policy == AmbiguityPolicy::FirstMatch => {
                        edges.add_call(&caller, first, GLOBAL_MULTIPLE, "fuzzy-global-multiple")
                    }
                    all => {
                        let confidence = (GLOBAL_MULTIPLE / all.len() as f64).max(SPLIT_FLOOR);
                        for target in all {
                            edges.add_call(&caller, target, confidence, "fuzzy-global-split");
                        }
                    }
                }
            }
        }
    }

    for file in &files {
        if let Some(declared) = symbols_by_file.remove(file.path.as_str()) {
            graph.nodes.extend(declared);
        }
    }
    graph.edges = edges.into_edges();

    graph.communities = community::detect(&graph.nodes, &graph.edges);
    graph.processes = process::detect(&graph.nodes, &graph.edges, &graph.communities);
    community::assign(&mut graph.nodes, &graph.communities);
    graph
}

/// Edge list that drops self-edges and repeated ids.
#[derive(Default)]
struct EdgeSet {
    edges: Vec<CodeEdge>,
    ids: HashSet<String>,
}

impl EdgeSet {
    fn add(&mut self, edge: CodeEdge) {
        if edge.source == edge.target || self.ids.contains(&edge.id) {
            return;
        }
        self.ids.insert(edge.id.clone());
        self.edges.push(edge);
    }

    fn add_call(&mut self, caller: &str, target: &str, confidence: f64, reason: &str) {
        self.add(CodeEdge::new(caller, target, EdgeType::Calls, confidence, reason));
    }

    fn into_edges(self) -> Vec<CodeEdge> {
        self.edges
    }
}

/// Name lookups over declared symbols. Candidate lists are sorted by id.
#[derive(Default)]
struct NameIndex<'a> {
    /// file -> name -> callable ids (functions before classes).
    callable_by_file: HashMap<&'a str, HashMap<&'a str, Vec<&'a str>>>,
    /// file -> name -> class/interface ids.
    types_by_file: HashMap<&'a str, HashMap<&'a str, Vec<&'a str>>>,
    callable: BTreeMap<&'a str, Vec<&'a str>>,
    types: BTreeMap<&'a str, Vec<&'a str>>,
}

impl<'a> NameIndex<'a> {
    fn new(symbols_by_file: &'a HashMap<&'a str, Vec<CodeNode>>) -> Self {
        let mut index = NameIndex::default();
        for (&path, nodes) in symbols_by_file {
            for node in nodes {
                let name = node.label.as_str();
                let id = node.id.as_str();
                if matches!(node.node_type, NodeType::Function | NodeType::Class) {
                    index
                        .callable_by_file
                        .entry(path)
                        .or_default()
                        .entry(name)
                        .or_default()
                        .push(id);
                    index.callable.entry(name).or_default().push(id);
                }
                if matches!(node.node_type, NodeType::Class | NodeType::Interface) {
                    index
                        .types_by_file
                        .entry(path)
                        .or_default()
                        .entry(name)
                        .or_default()
                        .push(id);
                    index.types.entry(name).or_default().push(id);
                }
            }
        }

        let rank = |id: &str| if id.starts_with("function:") { 0 } else { 1 };
        for ids in index.callable_by_file.values_mut().flat_map(|m| m.values_mut()) {
            ids.sort_by(|a, b| rank(*a).cmp(&rank(*b)).then_with(|| a.cmp(b)));
        }
        for ids in index.types_by_file.values_mut().flat_map(|m| m.values_mut()) {
            ids.sort_unstable();
        }
        for ids in index.callable.values_mut().chain(index.types.values_mut()) {
            ids.sort_unstable();
        }
        index
    }

    fn lookup(
        map: &HashMap<&'a str, HashMap<&'a str, Vec<&'a str>>>,
        path: &str,
        name: &str,
    ) -> Option<&'a str> {
        map.get(path)
            .and_then(|names| names.get(name))
            .and_then(|ids| ids.first().copied())
    }

    fn callable_in_file(&self, path: &str, name: &str) -> Option<&'a str> {
        Self::lookup(&self.callable_by_file, path, name)
    }

    fn callables(&self, name: &str) -> &[&'a str] {
        self.callable.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    fn type_in_file(&self, path: &str, name: &str) -> Option<&'a str> {
        Self::lookup(&self.types_by_file, path, name)
    }

    fn first_type(&self, name: &str) -> Option<&'a str> {
        self.types.get(name).and_then(|ids| ids.first().copied())
    }
}
