//! MCP server interface exposing the code graph to IDEs and agents.
//!
//! Implements a Model Context Protocol server using rmcp that exposes
//! `search_graph`, `node_context`, `impact_analysis`, and `graph_overview`
//! over stdio transport. The repository graph is built on first use and
//! served from the cache afterwards.
//!
//! # Examples
//!
//! ```no_run
//! use std::path::PathBuf;
//! use cartograph_core::CartographConfig;
//! use cartograph_graph::RepoSource;
//!
//! # async fn example() -> Result<(), cartograph_core::CartographError> {
//! cartograph_mcp::server::run_server(CartographConfig::default(), RepoSource::Local(PathBuf::from("."))).await?;
//! # Ok(())
//! # }
//! ```

pub mod server;
pub mod tools;
