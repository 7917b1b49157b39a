use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use cartograph_agent::llm::{ChatMessage, LanguageModel, Role, ToolCall, ToolSpec};
use cartograph_agent::{chat_with_graph, GraphOverview};
use cartograph_core::{AgentConfig, AmbiguityPolicy, CartographError, CodeGraph, SearchConfig};
use cartograph_graph::builder::{assemble, FileParse};
use cartograph_search::CodeSearchEngine;
use tokio_util::sync::CancellationToken;

const AUTH: &str = r#"import { saveSession } from "./db";

export function handleLogin(user: string) {
  validate(user);
  saveSession(user);
}

function validate(user: string) {
  return user.length > 0;
}
"#;

const DB: &str = r#"export function saveSession(user: string) {
  return writeRow(user);
}

function writeRow(row: string) {
  return row;
}
"#;

const ROUTES: &str = r#"import { handleLogin } from "./auth";

export function loginRoute(req: any) {
  handleLogin(req.user);
}
"#;

fn sample_graph() -> CodeGraph {
    let files = [("src/auth.ts", AUTH), ("src/db.ts", DB), ("src/routes.ts", ROUTES)]
        .into_iter()
        .filter_map(|(path, content)| FileParse::from_source(path, content))
        .collect();
    assemble("acme", "shop", "main", files, AmbiguityPolicy::FirstMatch)
}

/// Picks its next tool call from the previous tool output, then answers.
struct Investigator {
    plan: Mutex<VecDeque<(&'static str, String)>>,
    transcript: Mutex<Vec<String>>,
}

#[async_trait]
impl LanguageModel for Investigator {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
        _max_tokens: u32,
    ) -> Result<ChatMessage, CartographError> {
        let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["search", "context", "impact", "overview"]);

        if let Some(last) = messages.last().filter(|m| m.role == Role::Tool) {
            self.transcript.lock().unwrap().push(last.content.clone());
        }
        let next = self.plan.lock().unwrap().pop_front();
        Ok(match next {
            Some((name, args)) => ChatMessage {
                tool_calls: vec![ToolCall::new(format!("call-{name}"), name, args)],
                ..ChatMessage::assistant("")
            },
            None => ChatMessage::assistant("saveSession is reached from loginRoute via handleLogin."),
        })
    }
}

#[tokio::test]
async fn agent_walks_search_context_impact() {
    let graph = sample_graph();
    let search = CodeSearchEngine::new(&graph, &SearchConfig::default());

    let save_id = "function:src/db.ts::saveSession".to_string();
    assert!(graph.nodes.iter().any(|n| n.id == save_id));

    let model = Investigator {
        plan: Mutex::new(VecDeque::from(vec![
            ("search", r#"{"query": "save session"}"#.to_string()),
            ("context", format!(r#"{{"nodeId": "{save_id}"}}"#)),
            ("impact", format!(r#"{{"symbolIds": ["{save_id}"]}}"#)),
        ])),
        transcript: Mutex::new(Vec::new()),
    };

    let response = chat_with_graph(
        model,
        AgentConfig::default(),
        vec![ChatMessage::user("What breaks if saveSession changes?")],
        &graph,
        &search,
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert!(!response.exhausted);
    assert_eq!(response.rounds, 4);
    let names: Vec<&str> = response.tool_calls.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["search", "context", "impact"]);
    assert!(response.tool_calls.iter().all(|t| !t.is_error));

    let search_out = &response.tool_calls[0].result;
    assert!(search_out.contains(&save_id));

    let context_out = &response.tool_calls[1].result;
    assert!(context_out.contains("**handleLogin**"));
    assert!(context_out.contains("`src/auth.ts`"));

    let impact_out = &response.tool_calls[2].result;
    assert!(impact_out.contains("### Depth 1 (direct dependents): 1"));
    assert!(impact_out.contains("**loginRoute**"));
}

#[tokio::test]
async fn small_round_budget_exhausts_gracefully() {
    let graph = sample_graph();
    let search = CodeSearchEngine::new(&graph, &SearchConfig::default());
    let model = Investigator {
        plan: Mutex::new(VecDeque::from(vec![
            ("overview", "{}".to_string()),
            ("search", r#"{"query": "login"}"#.to_string()),
            ("overview", "{}".to_string()),
        ])),
        transcript: Mutex::new(Vec::new()),
    };
    let config = AgentConfig {
        max_rounds: 2,
        ..AgentConfig::default()
    };

    let response = chat_with_graph(
        model,
        config,
        vec![ChatMessage::user("summarize")],
        &graph,
        &search,
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert!(response.exhausted);
    assert_eq!(response.tool_calls.len(), 2);
    assert!(response.message.content.contains("limit of 2 tool rounds"));
}

#[test]
fn overview_of_sample_graph() {
    let graph = sample_graph();
    let overview = GraphOverview::build(&graph);
    assert_eq!(overview.repository, "acme/shop");
    assert_eq!(overview.stats.languages.get("typescript"), Some(&3));
    assert!(overview.most_called.iter().any(|s| s.label == "saveSession"));
}
