use std::process::Command;

#[test]
fn init_creates_valid_toml() {
    let dir = tempfile::tempdir().unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_cartograph"))
        .arg("init")
        .current_dir(dir.path())
        .output()
        .unwrap();

    assert!(
        output.status.success(),
        "cartograph init failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let config_path = dir.path().join(".cartograph.toml");
    assert!(config_path.exists(), ".cartograph.toml should exist");

    let content = std::fs::read_to_string(&config_path).unwrap();
    for section in ["[build]", "[cache]", "[search]", "[agent]", "[llm]", "[github]"] {
        assert!(content.contains(section), "missing {section}");
    }

    // Every value is commented out, so parsing yields the defaults.
    let config: cartograph_core::CartographConfig = toml::from_str(&content).unwrap();
    assert_eq!(config.cache.capacity, 20);
    assert_eq!(config.agent.max_rounds, 5);
}

#[test]
fn init_refuses_if_exists() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(".cartograph.toml"), "# existing").unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_cartograph"))
        .arg("init")
        .current_dir(dir.path())
        .output()
        .unwrap();

    assert!(!output.status.success());
    let content = std::fs::read_to_string(dir.path().join(".cartograph.toml")).unwrap();
    assert_eq!(content, "# existing");
}
