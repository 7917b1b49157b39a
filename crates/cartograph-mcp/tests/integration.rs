use std::fs;
use std::path::Path;

use cartograph_core::CartographConfig;
use cartograph_graph::RepoSource;
use cartograph_mcp::tools::{
    CartographServer, GraphOverviewParams, ImpactAnalysisParams, NodeContextParams,
    SearchGraphParams,
};
use rmcp::{handler::server::wrapper::Parameters, model::*, ServerHandler};

fn write(root: &Path, path: &str, content: &str) {
    let full = root.join(path);
    fs::create_dir_all(full.parent().unwrap()).unwrap();
    fs::write(full, content).unwrap();
}

fn sample_repo() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "src/db.ts",
        "export function saveSession(user: string) {\n  return user;\n}\n",
    );
    write(
        dir.path(),
        "src/auth.ts",
        "import { saveSession } from \"./db\";\n\nexport function handleLogin(user: string) {\n  saveSession(user);\n}\n",
    );
    write(
        dir.path(),
        "src/routes.ts",
        "import { handleLogin } from \"./auth\";\n\nexport function loginRoute(req: any) {\n  handleLogin(req.user);\n}\n",
    );
    write(dir.path(), "node_modules/lib/index.js", "function vendored() {}\n");
    dir
}

fn server(dir: &tempfile::TempDir) -> CartographServer {
    CartographServer::new(
        CartographConfig::default(),
        RepoSource::Local(dir.path().to_path_buf()),
    )
    .unwrap()
}

fn extract_text(result: &CallToolResult) -> &str {
    match &result.content[0].raw {
        RawContent::Text(t) => &t.text,
        _ => panic!("expected text content"),
    }
}

#[test]
fn server_info_is_correct() {
    let dir = sample_repo();
    let info = server(&dir).get_info();

    assert_eq!(info.server_info.name, "cartograph");
    assert_eq!(info.server_info.version, env!("CARGO_PKG_VERSION"));
    let instructions = info.instructions.unwrap();
    for tool in ["search_graph", "node_context", "impact_analysis", "graph_overview"] {
        assert!(instructions.contains(tool), "missing {tool}");
    }
}

#[tokio::test]
async fn search_graph_json() {
    let dir = sample_repo();
    let result = server(&dir)
        .search_graph(Parameters(SearchGraphParams {
            query: "login".into(),
            limit: Some(5),
            format: Some("json".into()),
        }))
        .await
        .unwrap();
    let parsed: serde_json::Value = serde_json::from_str(extract_text(&result)).unwrap();
    assert!(parsed["total"].as_u64().unwrap() > 0);
    let labels: Vec<&str> = parsed["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["node"]["label"].as_str().unwrap())
        .collect();
    assert!(labels.contains(&"handleLogin"));
    assert!(!labels.contains(&"vendored"));
}

#[tokio::test]
async fn node_context_markdown() {
    let dir = sample_repo();
    let result = server(&dir)
        .node_context(Parameters(NodeContextParams {
            node_id: "function:src/auth.ts::handleLogin".into(),
            format: None,
        }))
        .await
        .unwrap();
    let text = extract_text(&result);
    assert!(text.starts_with("## handleLogin (function)"));
    assert!(text.contains("**loginRoute**"));
    assert!(text.contains("**saveSession**"));
}

#[tokio::test]
async fn node_context_unknown_id() {
    let dir = sample_repo();
    let err = server(&dir)
        .node_context(Parameters(NodeContextParams {
            node_id: "function:src/none.ts::ghost".into(),
            format: None,
        }))
        .await
        .unwrap_err();
    assert!(err.message.contains("not found"));
}

#[tokio::test]
async fn impact_analysis_json() {
    let dir = sample_repo();
    let result = server(&dir)
        .impact_analysis(Parameters(ImpactAnalysisParams {
            symbol_ids: vec!["function:src/db.ts::saveSession".into()],
            format: Some("json".into()),
        }))
        .await
        .unwrap();
    let parsed: serde_json::Value = serde_json::from_str(extract_text(&result)).unwrap();
    assert_eq!(parsed["riskLevel"], "LOW");
    assert_eq!(parsed["depth1"][0]["label"], "handleLogin");
    assert_eq!(parsed["depth2"][0]["label"], "loginRoute");
}

#[tokio::test]
async fn impact_analysis_requires_ids() {
    let dir = sample_repo();
    let err = server(&dir)
        .impact_analysis(Parameters(ImpactAnalysisParams {
            symbol_ids: Vec::new(),
            format: None,
        }))
        .await
        .unwrap_err();
    assert!(err.message.contains("symbol_ids"));
}

#[tokio::test]
async fn overview_reuses_cached_graph() {
    let dir = sample_repo();
    let server = server(&dir);
    let first = server
        .graph_overview(Parameters(GraphOverviewParams { format: None }))
        .await
        .unwrap();
    assert!(extract_text(&first).contains("execution flows"));

    // A file added after the first build is not visible until the cache expires.
    write(dir.path(), "src/late.ts", "export function lateArrival() {}\n");
    let second = server
        .graph_overview(Parameters(GraphOverviewParams {
            format: Some("json".into()),
        }))
        .await
        .unwrap();
    let parsed: serde_json::Value = serde_json::from_str(extract_text(&second)).unwrap();
    assert_eq!(parsed["stats"]["languages"]["typescript"], 3);
}
