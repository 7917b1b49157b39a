//! Core types, configuration, and error handling for cartograph.
//!
//! This crate provides the shared foundation used by all other cartograph crates:
//! - [`CartographError`]: unified error type using `thiserror`
//! - [`CartographConfig`]: configuration loaded from `.cartograph.toml`
//! - The graph data model: [`CodeNode`], [`CodeEdge`], [`Community`],
//!   [`ProcessFlow`], and the aggregate [`CodeGraph`]

mod config;
mod error;
mod types;

pub use config::{
    AgentConfig, AmbiguityPolicy, BuildConfig, CacheConfig, CartographConfig, GitHubConfig,
    LlmConfig, SearchConfig,
};
pub use error::CartographError;
pub use types::{
    CodeEdge, CodeGraph, CodeNode, Community, EdgeType, GraphStats, NodeType, OutputFormat,
    ProcessFlow,
};

/// A convenience `Result` type for cartograph operations.
pub type Result<T> = std::result::Result<T, CartographError>;
