//! Bounded tool-calling loop over a code graph.

use std::time::Duration;

use cartograph_core::{AgentConfig, CartographError, CodeGraph};
use cartograph_search::CodeSearchEngine;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::llm::{ChatMessage, LanguageModel, Role};
use crate::tools::{GraphWorkspace, ToolRegistry};

/// Tool results longer than this are cut down in the closing summary.
const SUMMARY_EXCERPT_CHARS: usize = 600;

const SYSTEM_PROMPT: &str = "\
You answer questions about a software repository using its code knowledge graph.\n\
Available tools:\n\
- search: find symbols and files by keyword; returns node ids\n\
- context: callers, callees, community, execution flows and imports of one node id\n\
- impact: blast radius of changing a set of symbol ids\n\
- overview: repository-wide summary\n\
Call tools to gather facts before answering. Cite node ids and file paths. \
When you have enough information, answer without calling tools.";

/// One executed tool call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolTrace {
    pub round: usize,
    pub call_id: String,
    pub name: String,
    pub arguments: String,
    pub result: String,
    pub is_error: bool,
}

/// Final assistant message plus the tool trace that produced it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub message: ChatMessage,
    pub tool_calls: Vec<ToolTrace>,
    pub rounds: usize,
    /// The round budget ran out before the model produced a final answer.
    pub exhausted: bool,
}

/// Query agent: a language model plus the graph tool registry.
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use cartograph_core::{AgentConfig, CodeGraph, LlmConfig, SearchConfig};
/// use cartograph_search::CodeSearchEngine;
/// use cartograph_agent::{ChatMessage, GraphAgent, LlmClient};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example(graph: CodeGraph) -> Result<(), cartograph_core::CartographError> {
/// let model = LlmClient::new(&LlmConfig::default(), Duration::from_secs(120))?;
/// let agent = GraphAgent::new(model, AgentConfig::default());
/// let search = CodeSearchEngine::new(&graph, &SearchConfig::default());
/// let response = agent
///     .chat(vec![ChatMessage::user("What calls the database layer?")], &graph, &search, &CancellationToken::new())
///     .await?;
/// println!("{}", response.message.content);
/// # Ok(())
/// # }
/// ```
pub struct GraphAgent<M: LanguageModel> {
    model: M,
    registry: ToolRegistry,
    config: AgentConfig,
}

impl<M: LanguageModel> GraphAgent<M> {
    pub fn new(model: M, config: AgentConfig) -> Self {
        Self {
            model,
            registry: ToolRegistry::standard(),
            config,
        }
    }

    /// Replace the tool registry.
    ///
    /// # Errors
    ///
    /// Returns [`CartographError::Config`] if the registry fails
    /// [`ToolRegistry::verify`].
    pub fn with_registry(mut self, registry: ToolRegistry) -> Result<Self, CartographError> {
        registry.verify()?;
        self.registry = registry;
        Ok(self)
    }

    /// Answer the conversation, calling graph tools for up to
    /// `max_rounds` model turns.
    ///
    /// A system prompt is prepended unless the conversation already starts
    /// with one. Tool failures are reported back to the model as tool
    /// results rather than aborting the loop. When the round budget runs out
    /// a closing message summarising the gathered tool output is returned
    /// with `exhausted` set.
    ///
    /// # Errors
    ///
    /// Returns [`CartographError::Cancelled`] if `cancel` fires,
    /// [`CartographError::Timeout`] if a model call exceeds the configured
    /// budget, or the model's own error.
    pub async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        graph: &CodeGraph,
        search: &CodeSearchEngine,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse, CartographError> {
        let workspace = GraphWorkspace::new(graph, search);
        let mut conversation = Vec::with_capacity(messages.len() + 1);
        if messages.first().map(|m| m.role) != Some(Role::System) {
            conversation.push(ChatMessage::system(SYSTEM_PROMPT));
        }
        conversation.extend(messages);

        let mut trace: Vec<ToolTrace> = Vec::new();
        let budget = Duration::from_secs(self.config.timeout_secs);

        for round in 1..=self.config.max_rounds {
            tracing::debug!(round, messages = conversation.len(), "agent round");
            let reply = self.call_model(&conversation, budget, cancel).await?;

            if reply.tool_calls.is_empty() {
                return Ok(ChatResponse {
                    message: reply,
                    tool_calls: trace,
                    rounds: round,
                    exhausted: false,
                });
            }

            let calls = reply.tool_calls.clone();
            conversation.push(reply);
            for call in calls {
                if cancel.is_cancelled() {
                    return Err(CartographError::Cancelled);
                }
                let name = call.function.name.as_str();
                let arguments = call.function.arguments.as_str();
                let (result, is_error) = match self.registry.dispatch(&workspace, name, arguments) {
                    Ok(output) => (output, false),
                    Err(e) => (format!("Error: {e}"), true),
                };
                tracing::debug!(round, tool = name, is_error, bytes = result.len(), "tool call");
                conversation.push(ChatMessage::tool_result(&call.id, &result));
                trace.push(ToolTrace {
                    round,
                    call_id: call.id.clone(),
                    name: name.to_string(),
                    arguments: arguments.to_string(),
                    result,
                    is_error,
                });
            }
        }

        tracing::debug!(
            rounds = self.config.max_rounds,
            tool_calls = trace.len(),
            "agent round budget exhausted"
        );
        Ok(ChatResponse {
            message: ChatMessage::assistant(closing_summary(self.config.max_rounds, &trace)),
            tool_calls: trace,
            rounds: self.config.max_rounds,
            exhausted: true,
        })
    }

    async fn call_model(
        &self,
        conversation: &[ChatMessage],
        budget: Duration,
        cancel: &CancellationToken,
    ) -> Result<ChatMessage, CartographError> {
        let call = self
            .model
            .complete(conversation, self.registry.manifest(), self.config.max_tokens);
        tokio::select! {
            _ = cancel.cancelled() => Err(CartographError::Cancelled),
            outcome = tokio::time::timeout(budget, call) => match outcome {
                Ok(result) => result,
                Err(_) => Err(CartographError::Timeout {
                    operation: "language model call".into(),
                    elapsed: budget,
                }),
            },
        }
    }
}

/// Run one conversation with a fresh [`GraphAgent`].
///
/// # Errors
///
/// See [`GraphAgent::chat`].
pub async fn chat_with_graph<M: LanguageModel>(
    model: M,
    config: AgentConfig,
    messages: Vec<ChatMessage>,
    graph: &CodeGraph,
    search: &CodeSearchEngine,
    cancel: &CancellationToken,
) -> Result<ChatResponse, CartographError> {
    GraphAgent::new(model, config)
        .chat(messages, graph, search, cancel)
        .await
}

fn closing_summary(rounds: usize, trace: &[ToolTrace]) -> String {
    let mut out = format!(
        "I reached the limit of {rounds} tool rounds before reaching a final answer. \
         Here is what the graph returned so far:\n"
    );
    let useful: Vec<&ToolTrace> = trace.iter().filter(|t| !t.is_error).collect();
    if useful.is_empty() {
        out.push_str("\nNo tool call returned usable results.\n");
        return out;
    }
    for t in useful {
        out.push_str(&format!("\n### {} {}\n\n", t.name, t.arguments));
        out.push_str(&excerpt(&t.result, SUMMARY_EXCERPT_CHARS));
        out.push('\n');
    }
    out
}

fn excerpt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use cartograph_core::{CodeEdge, CodeNode, EdgeType, NodeType, SearchConfig};
    use parking_lot::Mutex;

    use crate::llm::{ToolCall, ToolSpec};

    /// Replays canned replies and records what it was sent.
    struct ScriptedModel {
        replies: Mutex<VecDeque<ChatMessage>>,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
        delay: Option<Duration>,
    }

    impl ScriptedModel {
        fn new(replies: Vec<ChatMessage>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                seen: Mutex::new(Vec::new()),
                delay: None,
            }
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn complete(
            &self,
            messages: &[ChatMessage],
            tools: &[ToolSpec],
            _max_tokens: u32,
        ) -> Result<ChatMessage, CartographError> {
            assert_eq!(tools.len(), 4);
            self.seen.lock().push(messages.to_vec());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.replies
                .lock()
                .pop_front()
                .ok_or_else(|| CartographError::Llm("script exhausted".into()))
        }
    }

    fn calling(id: &str, name: &str, args: &str) -> ChatMessage {
        ChatMessage {
            tool_calls: vec![ToolCall::new(id, name, args)],
            ..ChatMessage::assistant("")
        }
    }

    fn graph() -> CodeGraph {
        let mut graph = CodeGraph::new("o", "r", "main");
        let login = CodeNode::symbol(NodeType::Function, "handleLogin", "src/auth.ts", "typescript", 1, 5);
        let save = CodeNode::symbol(NodeType::Function, "saveSession", "src/db.ts", "typescript", 1, 5);
        graph.edges.push(CodeEdge::new(&login.id, &save.id, EdgeType::Calls, 0.9, "import-resolved"));
        graph.nodes = vec![login, save];
        graph
    }

    fn config(max_rounds: usize) -> AgentConfig {
        AgentConfig {
            max_rounds,
            ..AgentConfig::default()
        }
    }

    #[tokio::test]
    async fn answers_after_tool_round() {
        let graph = graph();
        let search = CodeSearchEngine::new(&graph, &SearchConfig::default());
        let model = ScriptedModel::new(vec![
            calling("c1", "search", r#"{"query": "login"}"#),
            ChatMessage::assistant("handleLogin lives in src/auth.ts"),
        ]);
        let agent = GraphAgent::new(model, config(5));

        let response = agent
            .chat(vec![ChatMessage::user("where is login?")], &graph, &search, &CancellationToken::new())
            .await
            .unwrap();

        assert!(!response.exhausted);
        assert_eq!(response.rounds, 2);
        assert_eq!(response.message.content, "handleLogin lives in src/auth.ts");
        assert_eq!(response.tool_calls.len(), 1);
        assert!(response.tool_calls[0].result.contains("handleLogin"));

        let seen = agent.model.seen.lock();
        assert_eq!(seen[0][0].role, Role::System);
        let second = &seen[1];
        let last = second.last().unwrap();
        assert_eq!(last.role, Role::Tool);
        assert_eq!(last.tool_call_id.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn exhausted_budget_returns_summary_and_trace() {
        let graph = graph();
        let search = CodeSearchEngine::new(&graph, &SearchConfig::default());
        let replies = (0..5)
            .map(|i| calling(&format!("c{i}"), "overview", "{}"))
            .collect();
        let agent = GraphAgent::new(ScriptedModel::new(replies), config(5));

        let response = agent
            .chat(vec![ChatMessage::user("tell me everything")], &graph, &search, &CancellationToken::new())
            .await
            .unwrap();

        assert!(response.exhausted);
        assert_eq!(response.rounds, 5);
        assert_eq!(response.tool_calls.len(), 5);
        assert_eq!(response.message.role, Role::Assistant);
        assert!(response.message.content.contains("limit of 5 tool rounds"));
        assert!(response.message.content.contains("## o/r @ main"));
        assert_eq!(agent.model.seen.lock().len(), 5);
    }

    #[tokio::test]
    async fn tool_errors_are_fed_back() {
        let graph = graph();
        let search = CodeSearchEngine::new(&graph, &SearchConfig::default());
        let model = ScriptedModel::new(vec![
            calling("c1", "context", r#"{"nodeId": "function:nope.ts::x"}"#),
            calling("c2", "drop_tables", "{}"),
            ChatMessage::assistant("could not find it"),
        ]);
        let agent = GraphAgent::new(model, config(5));

        let response = agent
            .chat(vec![ChatMessage::user("?")], &graph, &search, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response.tool_calls.len(), 2);
        assert!(response.tool_calls.iter().all(|t| t.is_error));
        assert!(response.tool_calls[0].result.contains("not found"));
    }

    #[tokio::test]
    async fn keeps_caller_system_prompt() {
        let graph = graph();
        let search = CodeSearchEngine::new(&graph, &SearchConfig::default());
        let agent = GraphAgent::new(ScriptedModel::new(vec![ChatMessage::assistant("ok")]), config(5));
        agent
            .chat(
                vec![ChatMessage::system("be brief"), ChatMessage::user("hi")],
                &graph,
                &search,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        let seen = agent.model.seen.lock();
        assert_eq!(seen[0].len(), 2);
        assert_eq!(seen[0][0].content, "be brief");
    }

    #[tokio::test]
    async fn cancellation_aborts_model_call() {
        let graph = graph();
        let search = CodeSearchEngine::new(&graph, &SearchConfig::default());
        let mut model = ScriptedModel::new(vec![ChatMessage::assistant("late")]);
        model.delay = Some(Duration::from_secs(30));
        let agent = GraphAgent::new(model, config(5));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = agent
            .chat(vec![ChatMessage::user("?")], &graph, &search, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, CartographError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_model_times_out() {
        let graph = graph();
        let search = CodeSearchEngine::new(&graph, &SearchConfig::default());
        let mut model = ScriptedModel::new(vec![ChatMessage::assistant("late")]);
        model.delay = Some(Duration::from_secs(10));
        let agent = GraphAgent::new(
            model,
            AgentConfig {
                timeout_secs: 1,
                ..AgentConfig::default()
            },
        );

        let err = agent
            .chat(vec![ChatMessage::user("?")], &graph, &search, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CartographError::Timeout { .. }));
    }

    #[tokio::test]
    async fn model_errors_propagate() {
        let graph = graph();
        let search = CodeSearchEngine::new(&graph, &SearchConfig::default());
        let response = chat_with_graph(
            ScriptedModel::new(Vec::new()),
            config(5),
            vec![ChatMessage::user("?")],
            &graph,
            &search,
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(response, Err(CartographError::Llm(_))));
    }

    #[test]
    fn excerpt_respects_char_boundaries() {
        assert_eq!(excerpt("héllo", 2), "hé…");
        assert_eq!(excerpt("short", 10), "short");
    }
}
