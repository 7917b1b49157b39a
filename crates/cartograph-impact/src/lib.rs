//! Blast-radius analysis over a code graph.
//!
//! Given a set of changed symbols, walks reverse `calls`, `imports` and
//! `extends` edges up to three hops and classifies the change risk by the
//! number of direct dependents.

pub mod analyze;

pub use analyze::{analyze, analyze_graph, format_markdown, ImpactNode, ImpactResult, RiskLevel};
