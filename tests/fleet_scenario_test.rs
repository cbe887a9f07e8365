// Integration test for a small game-server fleet under one supervisor

use flotilla::config::{ProcessSpec, SpecStore};
use flotilla::ipc::{Outcome, ProcessInfo};
use flotilla::process::{ExitReason, ProcessState, Supervisor, SupervisorConfig};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

const FLEET: [&str; 4] = [
    "game-server-8000",
    "chat-server-8100",
    "chat-server-8101",
    "chat-server-8102",
];

fn create_test_spec(name: &str) -> ProcessSpec {
    let port = name.rsplit('-').next().unwrap_or("0").to_string();
    ProcessSpec {
        name: name.to_string(),
        script: "/bin/sleep".to_string(),
        args: vec!["30".to_string()],
        interpreter: None,
        cwd: PathBuf::from("/tmp"),
        env: BTreeMap::from([("PORT".to_string(), port)]),
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

fn create_fleet(autorestart: &[&str]) -> Supervisor {
    let specs = FLEET
        .iter()
        .map(|name| {
            let mut spec = create_test_spec(name);
            spec.autorestart = autorestart.contains(name);
            spec
        })
        .collect();
    let store = SpecStore::from_specs(specs).unwrap();
    Supervisor::new(&store, SupervisorConfig::default())
}

async fn info(supervisor: &Supervisor, name: &str) -> ProcessInfo {
    supervisor
        .status(&[name.to_string()])
        .await
        .unwrap()
        .remove(0)
}

/// Drive health checks until `name` satisfies `predicate`
async fn wait_for<F>(supervisor: &Supervisor, name: &str, predicate: F) -> ProcessInfo
where
    F: Fn(&ProcessInfo) -> bool,
{
    for _ in 0..100 {
        supervisor.check_health().await;
        let current = info(supervisor, name).await;
        if predicate(&current) {
            return current;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("{} never reached the expected state", name);
}

#[tokio::test]
async fn test_external_kill_leaves_rest_of_fleet_running() {
    let supervisor = create_fleet(&[]);

    let report = supervisor.start(&[]).await.unwrap();
    assert!(!report.has_failures());
    for name in FLEET {
        assert!(matches!(report.get(name), Some(Outcome::Started { .. })));
    }

    supervisor.check_health().await;
    let before = supervisor.status(&[]).await.unwrap();
    assert!(before.iter().all(|p| p.state == ProcessState::Running));

    let victim = info(&supervisor, "chat-server-8101").await.pid.unwrap();
    kill(Pid::from_raw(victim as i32), Signal::SIGKILL).unwrap();

    let crashed = wait_for(&supervisor, "chat-server-8101", |p| p.pid.is_none()).await;
    assert_eq!(crashed.state, ProcessState::Crashed);
    let exit = crashed.last_exit.unwrap();
    assert_eq!(exit.reason, ExitReason::Crashed);
    assert_eq!(exit.signal, Some(9));

    supervisor.check_health().await;
    assert_eq!(
        info(&supervisor, "chat-server-8101").await.state,
        ProcessState::Stopped
    );

    // No relaunch, even after several restart delays
    tokio::time::sleep(Duration::from_millis(400)).await;
    supervisor.check_health().await;
    let after = info(&supervisor, "chat-server-8101").await;
    assert_eq!(after.state, ProcessState::Stopped);
    assert_eq!(after.pid, None);
    assert_eq!(after.restarts, 0);

    for survivor in before.iter().filter(|p| p.name != "chat-server-8101") {
        let now = info(&supervisor, &survivor.name).await;
        assert_eq!(now.state, ProcessState::Running, "{}", survivor.name);
        assert_eq!(now.pid, survivor.pid);
    }

    // An explicit start brings it back
    let report = supervisor
        .start(&["chat-server-8101".to_string()])
        .await
        .unwrap();
    assert!(matches!(
        report.get("chat-server-8101"),
        Some(Outcome::Started { .. })
    ));

    let report = supervisor.shutdown().await;
    assert_eq!(report.entries.len(), FLEET.len());
    assert!(!report.has_failures());
}

#[tokio::test]
async fn test_external_kill_with_autorestart_relaunches() {
    let supervisor = create_fleet(&["chat-server-8101"]);
    supervisor.start(&[]).await.unwrap();
    supervisor.check_health().await;

    let victim = info(&supervisor, "chat-server-8101").await.pid.unwrap();
    kill(Pid::from_raw(victim as i32), Signal::SIGKILL).unwrap();

    let relaunched = wait_for(&supervisor, "chat-server-8101", |p| {
        p.pid.is_some() && p.pid != Some(victim)
    })
    .await;
    assert!(relaunched.state.is_active());
    assert_eq!(relaunched.restarts, 1);
    assert_eq!(relaunched.last_exit.unwrap().reason, ExitReason::Crashed);

    let others = supervisor.status(&[]).await.unwrap();
    assert!(others
        .iter()
        .filter(|p| p.name != "chat-server-8101")
        .all(|p| p.restarts == 0 && p.state.is_active()));

    supervisor.shutdown().await;
}

#[tokio::test]
async fn test_unknown_name_rejects_whole_command() {
    let supervisor = create_fleet(&[]);

    let names = vec!["game-server-8000".to_string(), "lobby-9000".to_string()];
    assert!(supervisor.start(&names).await.is_err());

    // Nothing was launched
    let game = info(&supervisor, "game-server-8000").await;
    assert_eq!(game.state, ProcessState::Stopped);
    assert_eq!(game.pid, None);
}

#[tokio::test]
async fn test_delete_all() {
    let supervisor = create_fleet(&[]);
    supervisor.start(&["chat-server-8100".to_string()]).await.unwrap();

    let report = supervisor.delete(&["all".to_string()]).await.unwrap();
    assert_eq!(report.entries.len(), FLEET.len());
    assert!(report.entries.iter().all(|e| e.outcome == Outcome::Deleted));

    assert!(supervisor.status(&[]).await.unwrap().is_empty());
}
