use std::fs;
use std::path::Path;
use std::process::{Command, Output};

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
    dir
}

fn cartograph(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_cartograph"))
        .args(args)
        .arg("--path")
        .arg(dir)
        .current_dir(dir)
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

#[test]
fn build_prints_graph_as_json() {
    let dir = sample_repo();
    let output = cartograph(dir.path(), &["build", "--format", "json"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let graph: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let labels: Vec<&str> = graph["nodes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["label"].as_str().unwrap())
        .collect();
    assert!(labels.contains(&"saveSession"));
    assert!(labels.contains(&"handleLogin"));
}

#[test]
fn context_of_unknown_node_fails() {
    let dir = sample_repo();
    let output = cartograph(dir.path(), &["context", "function:src/none.ts::ghost"]);
    assert!(!output.status.success());
}

#[test]
fn impact_fail_on_threshold() {
    let dir = sample_repo();
    let id = "function:src/db.ts::saveSession";

    let low = cartograph(dir.path(), &["impact", id, "--fail-on", "low"]);
    assert_eq!(low.status.code(), Some(1));

    let high = cartograph(dir.path(), &["impact", id, "--fail-on", "high"]);
    assert!(high.status.success());
    let stdout = String::from_utf8_lossy(&high.stdout);
    assert!(stdout.contains("Risk: LOW"));
    assert!(stdout.contains("handleLogin"));
}
