// Integration test for loading fleet files from disk

use flotilla::config::SpecStore;
use flotilla::error::FlotillaError;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_load_toml_fleet() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("fleet.toml");

    let toml_content = r#"
        [[apps]]
        name = "game-server-8000"
        script = "/bin/sleep"
        args = "30"
        autorestart = true
        max_memory_restart = "512M"
        kill_timeout = 3000

        [[apps]]
        name = "chat-server-8100"
        script = "/bin/sleep"
        args = ["30"]
        env = { PORT = 8100 }
        out_file = "logs/chat-8100.out"
    "#;
    fs::write(&config_path, toml_content).unwrap();

    let store = SpecStore::from_file(&config_path).unwrap();
    assert_eq!(store.names(), vec!["game-server-8000", "chat-server-8100"]);

    let game = store.get("game-server-8000").unwrap();
    assert_eq!(game.args, vec!["30"]);
    assert!(game.autorestart);
    assert_eq!(game.max_memory_restart, Some(512 * 1024 * 1024));
    assert_eq!(game.kill_timeout, Some(Duration::from_secs(3)));
    assert_eq!(game.stop_signal, "SIGTERM");

    let chat = store.get("chat-server-8100").unwrap();
    assert!(!chat.autorestart);
    assert_eq!(chat.max_memory_restart, None);
    assert_eq!(chat.env.get("PORT").map(String::as_str), Some("8100"));
    assert!(chat.ports().contains(&8100));

    // Relative paths resolve against the file's directory
    assert_eq!(chat.cwd, temp_dir.path());
    assert_eq!(
        chat.out_file,
        Some(temp_dir.path().join("logs/chat-8100.out"))
    );
}

#[test]
fn test_load_json_fleet() {
    let temp_dir = TempDir::new().unwrap();
    fs::create_dir(temp_dir.path().join("srv")).unwrap();
    let config_path = temp_dir.path().join("ecosystem.json");

    let json_content = r#"{
        "apps": [
            {
                "name": "worker",
                "script": "worker.py",
                "interpreter": "python3",
                "cwd": "srv",
                "args": "--queue 'high priority'",
                "stop_signal": "sigint",
                "restart_delay": 250
            }
        ]
    }"#;
    fs::write(&config_path, json_content).unwrap();

    let store = SpecStore::from_file(&config_path).unwrap();
    let worker = store.get("worker").unwrap();

    assert_eq!(worker.script, "worker.py");
    assert_eq!(worker.interpreter.as_deref(), Some("python3"));
    assert_eq!(worker.args, vec!["--queue", "high priority"]);
    assert_eq!(worker.cwd, temp_dir.path().join("srv"));
    assert_eq!(worker.stop_signal, "SIGINT");
    assert_eq!(worker.restart_delay, Duration::from_millis(250));
    assert_eq!(worker.max_restarts, 10);
}

#[test]
fn test_duplicate_name_keeps_first_entry() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("fleet.toml");

    fs::write(
        &config_path,
        r#"
        [[apps]]
        name = "api"
        script = "/bin/sleep"

        [[apps]]
        name = "api"
        script = "/bin/true"
        "#,
    )
    .unwrap();

    let store = SpecStore::from_file(&config_path).unwrap();
    assert_eq!(store.names(), vec!["api"]);
    assert_eq!(store.get("api").unwrap().script, "/bin/sleep");
    assert!(store.rejected()[0].contains("duplicate process name: api"));
}

#[test]
fn test_port_collision_drops_later_entry() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("fleet.json");

    fs::write(
        &config_path,
        r#"{"apps": [
            {"name": "chat-server-8100", "script": "/bin/sleep", "env": {"PORT": "8100"}},
            {"name": "chat-server-copy", "script": "/bin/sleep", "args": ["--port", "8100"]}
        ]}"#,
    )
    .unwrap();

    let store = SpecStore::from_file(&config_path).unwrap();
    assert_eq!(store.names(), vec!["chat-server-8100"]);
    assert_eq!(store.rejected().len(), 1);
    assert!(store.rejected()[0].contains("port 8100"));
    assert!(store.rejected()[0].contains("chat-server-copy"));
}

#[test]
fn test_invalid_entry_leaves_siblings_loaded() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("fleet.toml");

    fs::write(
        &config_path,
        r#"
        [[apps]]
        name = "game-server-8000"
        script = "/bin/sleep"
        env = { PORT = 8000 }

        [[apps]]
        name = "bad"

        [[apps]]
        name = "chat-server-8100"
        script = "/bin/sleep"
        max_memory_restart = "0"
        "#,
    )
    .unwrap();

    let store = SpecStore::from_file(&config_path).unwrap();
    assert_eq!(store.names(), vec!["game-server-8000"]);
    assert_eq!(
        store.rejected().to_vec(),
        vec![
            "Validation error: bad: missing required field 'script'",
            "Validation error: chat-server-8100: invalid max_memory_restart: must be a positive quantity",
        ]
    );
}

#[test]
fn test_unreadable_fleet_is_fatal() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("fleet.toml");
    fs::write(&config_path, "[[apps]\nname = ").unwrap();

    assert!(matches!(
        SpecStore::from_file(&config_path),
        Err(FlotillaError::ConfigError(_))
    ));
}

#[test]
fn test_unsupported_extension_and_missing_file() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("fleet.yaml");
    fs::write(&config_path, "apps: []").unwrap();

    assert!(matches!(
        SpecStore::from_file(&config_path),
        Err(FlotillaError::ConfigError(_))
    ));
    assert!(matches!(
        SpecStore::from_file(&PathBuf::from("/nonexistent/fleet.toml")),
        Err(FlotillaError::ConfigError(_))
    ));
}
