// Integration test driving a daemon through its control socket

use flotilla::config::{ProcessSpec, SpecStore};
use flotilla::daemon::Daemon;
use flotilla::error::FlotillaError;
use flotilla::ipc::{Command, IpcClient, Outcome, ResponseData};
use flotilla::process::{Supervisor, SupervisorConfig};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

fn create_test_spec(name: &str) -> ProcessSpec {
    ProcessSpec {
        name: name.to_string(),
        script: "/bin/sleep".to_string(),
        args: vec!["30".to_string()],
        interpreter: None,
        cwd: PathBuf::from("/tmp"),
        env: BTreeMap::new(),
        instances: 1,
        autorestart: false,
        watch: false,
        max_memory_restart: None,
        log_file: None,
        error_file: None,
        out_file: None,
        time: false,
        stop_signal: "SIGTERM".to_string(),
        kill_timeout: Some(Duration::from_secs(2)),
        max_restarts: 10,
        restart_delay: Duration::from_millis(100),
    }
}

async fn wait_for_socket(path: &Path) {
    for _ in 0..100 {
        if path.exists() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("daemon never bound {}", path.display());
}

/// Run a blocking client request off the runtime's worker
async fn request(socket: &Path, command: Command) -> Result<ResponseData, FlotillaError> {
    let socket = socket.to_path_buf();
    tokio::task::spawn_blocking(move || IpcClient::with_socket_path(socket).request(command))
        .await
        .unwrap()
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|n| n.to_string()).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_operator_session() {
    let temp_dir = TempDir::new().unwrap();
    let socket = temp_dir.path().join("flotilla.sock");

    let store = SpecStore::from_specs(vec![
        create_test_spec("game-server-8000"),
        create_test_spec("chat-server-8100"),
    ])
    .unwrap();
    let supervisor = Supervisor::new(&store, SupervisorConfig::default());
    let daemon = Daemon::new(supervisor, &socket);

    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let handle = tokio::spawn(daemon.run(async move {
        let _ = rx.await;
    }));
    wait_for_socket(&socket).await;

    match request(&socket, Command::Ping).await.unwrap() {
        ResponseData::Pong { .. } => {}
        other => panic!("unexpected response {:?}", other),
    }

    match request(&socket, Command::Start { names: vec![] }).await.unwrap() {
        ResponseData::Report(report) => {
            assert!(!report.has_failures());
            assert_eq!(report.entries.len(), 2);
        }
        other => panic!("unexpected response {:?}", other),
    }

    // Double launch keeps the original instance
    match request(&socket, Command::Start { names: names(&["game-server-8000"]) })
        .await
        .unwrap()
    {
        ResponseData::Report(report) => assert!(matches!(
            report.get("game-server-8000"),
            Some(Outcome::AlreadyRunning { .. })
        )),
        other => panic!("unexpected response {:?}", other),
    }

    match request(&socket, Command::Stop { names: names(&["chat-server-8100"]) })
        .await
        .unwrap()
    {
        ResponseData::Report(report) => assert!(matches!(
            report.get("chat-server-8100"),
            Some(Outcome::Stopped { .. })
        )),
        other => panic!("unexpected response {:?}", other),
    }

    match request(&socket, Command::Status { names: vec![] }).await.unwrap() {
        ResponseData::Status(infos) => {
            assert_eq!(infos.len(), 2);
            assert_eq!(infos[0].name, "game-server-8000");
            assert!(infos[0].pid.is_some());
            assert_eq!(infos[1].pid, None);
        }
        other => panic!("unexpected response {:?}", other),
    }

    match request(&socket, Command::Delete { names: names(&["chat-server-8100"]) })
        .await
        .unwrap()
    {
        ResponseData::Report(report) => {
            assert_eq!(report.get("chat-server-8100"), Some(&Outcome::Deleted))
        }
        other => panic!("unexpected response {:?}", other),
    }

    match request(&socket, Command::Status { names: names(&["chat-server-8100"]) }).await {
        Err(FlotillaError::NotFound(name)) => assert_eq!(name, "chat-server-8100"),
        other => panic!("Expected NotFound, got {:?}", other),
    }

    tx.send(()).unwrap();
    handle.await.unwrap().unwrap();
    assert!(!socket.exists());

    assert!(matches!(
        request(&socket, Command::Ping).await,
        Err(FlotillaError::DaemonNotRunning)
    ));
}

#[tokio::test]
async fn test_second_daemon_refuses_live_socket() {
    let temp_dir = TempDir::new().unwrap();
    let socket = temp_dir.path().join("flotilla.sock");
    let store = SpecStore::from_specs(vec![create_test_spec("api")]).unwrap();

    let first = Daemon::new(Supervisor::new(&store, SupervisorConfig::default()), &socket);
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let handle = tokio::spawn(first.run(async move {
        let _ = rx.await;
    }));
    wait_for_socket(&socket).await;

    let second = Daemon::new(Supervisor::new(&store, SupervisorConfig::default()), &socket);
    let result = second.run(std::future::pending()).await;
    assert!(matches!(result, Err(FlotillaError::IpcError(_))));
    assert!(socket.exists());

    tx.send(()).unwrap();
    handle.await.unwrap().unwrap();
}
