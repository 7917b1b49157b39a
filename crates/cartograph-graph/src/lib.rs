//! Code knowledge graph construction.
//!
//! Fetches a repository through a [`provider::RepositoryProvider`], parses
//! sources with pattern-based scanning, resolves imports and calls into
//! confidence-scored edges, clusters symbols into communities (Louvain),
//! traces execution flows, and caches the resulting snapshots.

pub mod builder;
pub mod cache;
pub mod community;
pub mod filter;
pub mod index;
pub mod parser;
pub mod process;
pub mod provider;
pub mod resolve;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use cartograph_core::{CartographConfig, CartographError, CodeGraph};
use tokio_util::sync::CancellationToken;

use crate::builder::GraphBuilder;
use crate::cache::{CacheStore, GraphCache, InMemoryStore};
use crate::provider::{
    parse_repo_reference, Credential, GitHubProvider, LocalProvider, RepositoryProvider,
};

/// Owner reported for repositories served from disk.
pub const LOCAL_OWNER: &str = "local";

/// Where a graph's sources come from.
///
/// # Examples
///
/// ```
/// use cartograph_graph::RepoSource;
///
/// let source = RepoSource::github("octocat/hello-world@dev").unwrap();
/// assert_eq!(source.owner(), "octocat");
/// assert_eq!(source.repo(), "hello-world");
/// assert_eq!(source.branch(), Some("dev"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoSource {
    /// A checked-out directory.
    Local(PathBuf),
    /// A GitHub repository, on its default branch unless one is given.
    GitHub {
        owner: String,
        repo: String,
        branch: Option<String>,
    },
}

impl RepoSource {
    /// Parse an `owner/repo[@branch]` reference.
    ///
    /// # Errors
    ///
    /// Returns [`CartographError::Config`] for malformed references.
    pub fn github(reference: &str) -> Result<Self, CartographError> {
        let (owner, repo, branch) = parse_repo_reference(reference)?;
        Ok(RepoSource::GitHub {
            owner,
            repo,
            branch,
        })
    }

    pub fn owner(&self) -> &str {
        match self {
            RepoSource::Local(_) => LOCAL_OWNER,
            RepoSource::GitHub { owner, .. } => owner,
        }
    }

    pub fn repo(&self) -> String {
        match self {
            RepoSource::Local(path) => LocalProvider::new(path.clone()).repo_name(),
            RepoSource::GitHub { repo, .. } => repo.clone(),
        }
    }

    pub fn branch(&self) -> Option<&str> {
        match self {
            RepoSource::Local(_) => None,
            RepoSource::GitHub { branch, .. } => branch.as_deref(),
        }
    }

    /// Credential for this source: the configured GitHub token, if any.
    pub fn credential(&self, config: &CartographConfig) -> Credential {
        match (self, &config.github.token) {
            (RepoSource::GitHub { .. }, Some(token)) => Credential::new(token.clone()),
            _ => Credential::anonymous(),
        }
    }

    /// Data provider serving this source.
    ///
    /// # Errors
    ///
    /// Returns [`CartographError::Provider`] if the HTTP client cannot be built.
    pub fn provider(
        &self,
        config: &CartographConfig,
    ) -> Result<Arc<dyn RepositoryProvider>, CartographError> {
        Ok(match self {
            RepoSource::Local(path) => Arc::new(LocalProvider::new(path.clone())),
            RepoSource::GitHub { .. } => Arc::new(GitHubProvider::new(
                &config.github,
                Duration::from_secs(config.build.fetch_timeout_secs),
                config.build.fetch_retries,
            )?),
        })
    }
}

/// Builder plus cache: the entry point for callers that want a graph.
///
/// # Examples
///
/// ```no_run
/// use std::path::PathBuf;
/// use std::sync::Arc;
/// use cartograph_core::CartographConfig;
/// use cartograph_graph::GraphService;
/// use cartograph_graph::builder::GraphBuilder;
/// use cartograph_graph::cache::GraphCache;
/// use cartograph_graph::provider::{Credential, LocalProvider};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> Result<(), cartograph_core::CartographError> {
/// let config = CartographConfig::default();
/// let provider = Arc::new(LocalProvider::new(PathBuf::from(".")));
/// let service = GraphService::new(
///     GraphBuilder::new(provider, config.build.clone()),
///     GraphCache::in_memory(&config.cache),
/// );
/// let graph = service
///     .graph(&Credential::anonymous(), "local", "demo", None, &CancellationToken::new())
///     .await?;
/// println!("{} nodes", graph.nodes.len());
/// # Ok(())
/// # }
/// ```
pub struct GraphService<S: CacheStore = InMemoryStore> {
    builder: GraphBuilder,
    cache: GraphCache<S>,
}

impl GraphService<InMemoryStore> {
    /// Service over `source` with an in-memory cache.
    ///
    /// # Errors
    ///
    /// See [`RepoSource::provider`].
    pub fn for_source(
        source: &RepoSource,
        config: &CartographConfig,
    ) -> Result<Self, CartographError> {
        Ok(Self::new(
            GraphBuilder::new(source.provider(config)?, config.build.clone()),
            GraphCache::in_memory(&config.cache),
        ))
    }
}

impl<S: CacheStore> GraphService<S> {
    pub fn new(builder: GraphBuilder, cache: GraphCache<S>) -> Self {
        Self { builder, cache }
    }

    /// Return the cached graph for `owner/repo`, building it on miss or expiry.
    ///
    /// # Errors
    ///
    /// Propagates build failures; see [`GraphBuilder::build`].
    pub async fn graph(
        &self,
        credential: &Credential,
        owner: &str,
        repo: &str,
        branch: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Arc<CodeGraph>, CartographError> {
        self.cache
            .get_or_build(owner, repo, branch, || {
                self.builder.build(credential, owner, repo, branch, cancel)
            })
            .await
    }

    /// [`GraphService::graph`] for a [`RepoSource`].
    ///
    /// # Errors
    ///
    /// Propagates build failures.
    pub async fn graph_for(
        &self,
        source: &RepoSource,
        credential: &Credential,
        cancel: &CancellationToken,
    ) -> Result<Arc<CodeGraph>, CartographError> {
        let repo = source.repo();
        self.graph(credential, source.owner(), &repo, source.branch(), cancel)
            .await
    }

    pub fn cache(&self) -> &GraphCache<S> {
        &self.cache
    }
}
