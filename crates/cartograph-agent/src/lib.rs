//! Natural-language querying of a code graph.
//!
//! A [`agent::GraphAgent`] drives a tool-calling language model over a bounded
//! number of rounds. The model can call four graph tools (search, context,
//! impact, overview) dispatched through a typed [`tools::ToolRegistry`].

pub mod agent;
pub mod context;
pub mod llm;
pub mod overview;
pub mod tools;

pub use agent::{chat_with_graph, ChatResponse, GraphAgent, ToolTrace};
pub use context::NodeContext;
pub use llm::{ChatMessage, LanguageModel, LlmClient, Role, ToolCall, ToolSpec};
pub use overview::GraphOverview;
pub use tools::{GraphTool, GraphWorkspace, ToolRegistry};
