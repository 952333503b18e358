use std::time::Duration;

use super::fake_server::FakeServer;
use crate::{ProcessLifecycleManager, ProcessState, ServerSpec, TriplestoreError};

const NO_SUCH_SERVER: &str = "definitely-not-a-triplestore-server";

#[tokio::test]
async fn reachable_server_is_adopted_without_spawning() {
    let server = FakeServer::start().await;
    let spec = ServerSpec::new("fake", NO_SUCH_SERVER, format!("{}/$/ping", server.base_url()));
    let mut manager = ProcessLifecycleManager::new(spec).unwrap();

    manager.ensure_running().await.unwrap();

    assert_eq!(manager.state(), ProcessState::Ready);
    assert!(!manager.owns_process());
    assert_eq!(manager.pid(), None);
    assert_eq!(server.only("GET", "/$/ping").method, "GET");

    manager.stop().await;
    manager.stop().await;
    assert_eq!(manager.state(), ProcessState::Stopped);
}

#[tokio::test]
async fn server_errors_do_not_count_as_ready() {
    let server = FakeServer::start().await;
    server.reply("GET", "/health", 503, "text/plain", "starting");
    let manager = ProcessLifecycleManager::new(ServerSpec::new(
        "fake",
        NO_SUCH_SERVER,
        format!("{}/health", server.base_url()),
    ))
    .unwrap();

    assert!(!manager.probe().await);
    let reason = manager.check_ready().await.unwrap_err();
    assert!(reason.contains("/health"), "{reason}");
    assert!(reason.contains("503"), "{reason}");
}

#[tokio::test]
async fn unreachable_readiness_url_is_explained() {
    let manager =
        ProcessLifecycleManager::new(ServerSpec::new("fake", NO_SUCH_SERVER, "http://127.0.0.1:9/ping"))
            .unwrap();

    let reason = manager.check_ready().await.unwrap_err();
    assert!(reason.contains("http://127.0.0.1:9/ping"), "{reason}");
}

#[tokio::test]
async fn unreachable_server_without_executable_explains_install() {
    let mut spec = ServerSpec::new("fake", NO_SUCH_SERVER, "http://127.0.0.1:9/ping");
    spec.install_guidance = "Install the fake server.".to_string();
    let mut manager = ProcessLifecycleManager::new(spec).unwrap();

    let error = manager.ensure_running().await.unwrap_err();
    assert!(matches!(error, TriplestoreError::ExecutableNotFound { .. }));
    assert!(error.to_string().contains("Install the fake server."));
    assert_eq!(manager.state(), ProcessState::NotStarted);
}

#[cfg(unix)]
#[tokio::test]
async fn server_that_never_answers_times_out_and_is_reaped() {
    let mut spec = ServerSpec::new("sleeper", "sleep", "http://127.0.0.1:9/ping");
    spec.args = vec!["30".into()];
    spec.startup_timeout = Duration::from_millis(500);
    spec.poll_interval = Duration::from_millis(100);
    spec.grace_period = Duration::from_secs(2);
    let mut manager = ProcessLifecycleManager::new(spec).unwrap();

    let error = manager.ensure_running().await.unwrap_err();
    assert!(matches!(error, TriplestoreError::StartupTimeout { server: "sleeper", .. }));
    assert_eq!(manager.state(), ProcessState::Failed);
    assert!(!manager.owns_process());

    manager.stop().await;
    manager.stop().await;
    assert_eq!(manager.state(), ProcessState::Failed);
}

#[cfg(unix)]
#[tokio::test]
async fn spawn_failure_names_server_and_executable() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let executable = dir.path().join("stub-server");
    std::fs::write(&executable, "#!/bin/sh\n").unwrap();
    std::fs::set_permissions(&executable, std::fs::Permissions::from_mode(0o644)).unwrap();

    let mut spec = ServerSpec::new("stub", "stub-server", "http://127.0.0.1:9/ping");
    spec.search_dirs = vec![dir.path().to_path_buf()];
    let mut manager = ProcessLifecycleManager::new(spec).unwrap();

    let error = manager.ensure_running().await.unwrap_err();
    assert!(matches!(error, TriplestoreError::Io { backend: "stub", .. }), "{error:?}");
    let message = error.to_string();
    assert!(message.starts_with("[stub] spawning "), "{message}");
    assert!(message.contains(&executable.display().to_string()), "{message}");
    assert!(!manager.owns_process());
}

#[cfg(unix)]
#[tokio::test]
async fn stop_terminates_a_spawned_server_gracefully() {
    let mut spec = ServerSpec::new("sleeper", "sleep", "http://127.0.0.1:9/ping");
    spec.args = vec!["30".into()];
    spec.startup_timeout = Duration::from_millis(300);
    spec.poll_interval = Duration::from_millis(100);
    spec.grace_period = Duration::from_secs(5);
    let mut manager = ProcessLifecycleManager::new(spec).unwrap();

    let started = std::time::Instant::now();
    assert!(manager.ensure_running().await.is_err());
    // `sleep` exits on SIGTERM, well inside the grace period.
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(manager.state(), ProcessState::Failed);
}
