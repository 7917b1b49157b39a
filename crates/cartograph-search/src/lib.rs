//! Hybrid code search over a graph snapshot.
//!
//! BM25 keyword ranking and a term-overlap ranking are computed over the
//! same per-node documents and fused with Reciprocal Rank Fusion.

pub mod search;
pub mod tokenize;

pub use search::{reciprocal_rank_fusion, CodeSearchEngine, SearchResult, SearchSource};
pub use tokenize::tokenize;
