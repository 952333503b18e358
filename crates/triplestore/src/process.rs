//! Lifecycle of triplestore servers that run as child processes.
//!
//! `NotStarted -> Starting -> Ready -> Stopped`, with `Starting -> Failed`
//! when the readiness probe does not succeed in time. A server that already
//! answers its readiness URL is adopted as `Ready` without spawning anything.

use std::{
    env,
    ffi::OsString,
    path::{Path, PathBuf},
    process::Stdio,
    time::{Duration, Instant},
};

use reqwest::Client;
use tokio::process::{Child, Command};

use crate::error::{Result, TriplestoreError};

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    NotStarted,
    Starting,
    Ready,
    Stopped,
    Failed,
}

/// How to find, launch and probe one server.
#[derive(Debug, Clone)]
pub struct ServerSpec {
    /// Display name used in logs and errors
    pub server: &'static str,
    /// Executable file name looked up in `search_dirs`, under `home_env` and on `PATH`
    pub executable: &'static str,
    /// Directories checked before anything else
    pub search_dirs: Vec<PathBuf>,
    /// Environment variable naming the install directory
    pub home_env: Option<&'static str>,
    /// Directory below the install directory that holds the executable
    pub home_subdir: &'static str,
    pub install_guidance: String,
    pub args: Vec<OsString>,
    pub current_dir: Option<PathBuf>,
    pub envs: Vec<(String, String)>,
    pub readiness_url: String,
    pub show_output: bool,
    pub startup_timeout: Duration,
    pub poll_interval: Duration,
    pub grace_period: Duration,
}

impl ServerSpec {
    pub fn new(server: &'static str, executable: &'static str, readiness_url: impl Into<String>) -> Self {
        Self {
            server,
            executable,
            search_dirs: Vec::new(),
            home_env: None,
            home_subdir: "",
            install_guidance: String::new(),
            args: Vec::new(),
            current_dir: None,
            envs: Vec::new(),
            readiness_url: readiness_url.into(),
            show_output: false,
            startup_timeout: Duration::from_secs(20),
            poll_interval: Duration::from_secs(1),
            grace_period: Duration::from_secs(5),
        }
    }

    /// Resolve the executable path, if it can be found anywhere.
    pub fn locate(&self) -> Option<PathBuf> {
        self.search_dirs
            .iter()
            .find_map(|dir| candidate_in(dir, self.executable))
            .or_else(|| locate_executable(self.executable, self.home_env, self.home_subdir))
    }
}

/// A spawned server, exclusively owned by the manager that launched it.
///
/// The child is spawned with `kill_on_drop`, so an abandoned handle does not
/// outlive the owning process.
#[derive(Debug)]
pub struct ManagedProcess {
    child: Child,
    pid: Option<u32>,
    readiness_url: String,
}

impl ManagedProcess {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn readiness_url(&self) -> &str {
        &self.readiness_url
    }
}

pub struct ProcessLifecycleManager {
    spec: ServerSpec,
    client: Client,
    state: ProcessState,
    process: Option<ManagedProcess>,
}

impl ProcessLifecycleManager {
    pub fn new(spec: ServerSpec) -> Result<Self> {
        let client = Client::builder()
            .timeout(PROBE_TIMEOUT)
            .connect_timeout(PROBE_TIMEOUT)
            .build()
            .map_err(|source| TriplestoreError::Request {
                backend: spec.server,
                operation: "readiness client setup",
                source,
            })?;

        Ok(Self {
            spec,
            client,
            state: ProcessState::NotStarted,
            process: None,
        })
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn spec(&self) -> &ServerSpec {
        &self.spec
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(ManagedProcess::pid)
    }

    /// Whether this manager spawned the server it is tracking.
    pub fn owns_process(&self) -> bool {
        self.process.is_some()
    }

    /// Probe the readiness URL once. Any answer below 500 counts as up.
    pub async fn probe(&self) -> bool {
        match self.check_ready().await {
            Ok(()) => true,
            Err(reason) => {
                tracing::debug!(
                    server = %self.spec.server,
                    url = %self.spec.readiness_url,
                    reason = %reason,
                    "Readiness probe failed"
                );
                false
            }
        }
    }

    /// Probe once, keeping the reason a server does not count as up.
    pub async fn check_ready(&self) -> std::result::Result<(), String> {
        let url = &self.spec.readiness_url;
        match self.client.get(url).timeout(PROBE_TIMEOUT).send().await {
            Ok(response) if response.status().is_server_error() => {
                Err(format!("{url} answered {}", response.status()))
            }
            Ok(_) => Ok(()),
            Err(error) => Err(format!("{url} unreachable: {error}")),
        }
    }

    /// Make sure the server answers, spawning and polling it if needed.
    pub async fn ensure_running(&mut self) -> Result<()> {
        if self.state == ProcessState::Ready && self.probe().await {
            return Ok(());
        }

        if self.process.is_none() && self.probe().await {
            tracing::info!(
                server = %self.spec.server,
                url = %self.spec.readiness_url,
                "Server already reachable, not spawning"
            );
            self.state = ProcessState::Ready;
            return Ok(());
        }

        if self.process.is_none() {
            self.spawn()?;
        }
        self.wait_until_ready().await
    }

    fn spawn(&mut self) -> Result<()> {
        let executable = self.spec.locate().ok_or_else(|| TriplestoreError::ExecutableNotFound {
            server: self.spec.server,
            executable: self.spec.executable.to_string(),
            guidance: self.spec.install_guidance.clone(),
        })?;

        let mut command = Command::new(&executable);
        command
            .args(&self.spec.args)
            .envs(self.spec.envs.iter().map(|(key, value)| (key, value)))
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &self.spec.current_dir {
            command.current_dir(dir);
        }
        if self.spec.show_output {
            command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        } else {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        }

        let child = command.spawn().map_err(TriplestoreError::io(
            self.spec.server,
            format!("spawning {}", executable.display()),
        ))?;
        let pid = child.id();
        tracing::info!(
            server = %self.spec.server,
            executable = %executable.display(),
            pid = ?pid,
            "Spawned server process"
        );

        self.process = Some(ManagedProcess {
            child,
            pid,
            readiness_url: self.spec.readiness_url.clone(),
        });
        self.state = ProcessState::Starting;
        Ok(())
    }

    async fn wait_until_ready(&mut self) -> Result<()> {
        let started = Instant::now();
        loop {
            let probed = self.check_ready().await;
            if probed.is_ok() {
                tracing::info!(
                    server = %self.spec.server,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Server is up"
                );
                self.state = ProcessState::Ready;
                return Ok(());
            }

            let elapsed = started.elapsed();
            if elapsed >= self.spec.startup_timeout {
                tracing::warn!(
                    server = %self.spec.server,
                    url = %self.spec.readiness_url,
                    timeout_secs = self.spec.startup_timeout.as_secs(),
                    last_error = %probed.err().unwrap_or_default(),
                    "Server did not become ready"
                );
                self.terminate().await;
                self.state = ProcessState::Failed;
                return Err(TriplestoreError::StartupTimeout {
                    server: self.spec.server,
                    elapsed,
                });
            }

            tokio::time::sleep(self.spec.poll_interval).await;
        }
    }

    /// Terminate the spawned server: graceful first, forced after the grace period.
    ///
    /// No-op when nothing was spawned; calling it twice is fine.
    pub async fn stop(&mut self) {
        if self.state == ProcessState::NotStarted {
            return;
        }
        self.terminate().await;
        if self.state != ProcessState::Failed {
            self.state = ProcessState::Stopped;
        }
    }

    async fn terminate(&mut self) {
        let Some(mut process) = self.process.take() else {
            return;
        };

        if let Ok(Some(_)) = process.child.try_wait() {
            return;
        }

        request_graceful_exit(&mut process.child).await;
        match tokio::time::timeout(self.spec.grace_period, process.child.wait()).await {
            Ok(_) => {
                tracing::info!(server = %self.spec.server, pid = ?process.pid, "Server stopped");
            }
            Err(_) => {
                tracing::warn!(
                    server = %self.spec.server,
                    pid = ?process.pid,
                    "Server ignored terminate, killing"
                );
                if let Err(error) = process.child.kill().await {
                    tracing::warn!(server = %self.spec.server, error = %error, "Failed to kill server");
                }
            }
        }
    }
}

#[cfg(unix)]
async fn request_graceful_exit(child: &mut Child) {
    use nix::{
        sys::signal::{Signal, kill},
        unistd::Pid,
    };

    let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    if let Err(error) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
        tracing::debug!(pid, error = %error, "SIGTERM failed, killing instead");
        let _ = child.start_kill();
    }
}

#[cfg(not(unix))]
async fn request_graceful_exit(child: &mut Child) {
    let _ = child.start_kill();
}

/// Find `name` under `$home_env/subdir`, then on `PATH`.
pub fn locate_executable(name: &str, home_env: Option<&str>, subdir: &str) -> Option<PathBuf> {
    if let Some(home) = home_env.and_then(env::var_os) {
        let dir = expand_home(Path::new(&home)).join(subdir);
        if let Some(found) = candidate_in(&dir, name) {
            return Some(found);
        }
    }

    let path = env::var_os("PATH")?;
    env::split_paths(&path).find_map(|dir| candidate_in(&dir, name))
}

fn candidate_in(dir: &Path, name: &str) -> Option<PathBuf> {
    let extensions: &[&str] = if cfg!(windows) {
        &["", ".exe", ".bat", ".cmd"]
    } else {
        &[""]
    };
    extensions
        .iter()
        .map(|ext| dir.join(format!("{name}{ext}")))
        .find(|candidate| candidate.is_file())
}

/// Replace a leading `~` with the user's home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}

pub(crate) fn home_dir() -> Option<PathBuf> {
    env::var_os("HOME")
        .or_else(|| env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn expand_home_only_touches_tilde_prefix() {
        assert_eq!(expand_home(Path::new("/opt/mdb")), PathBuf::from("/opt/mdb"));
        if let Some(home) = home_dir() {
            assert_eq!(expand_home(Path::new("~/mdb")), home.join("mdb"));
        }
    }

    #[test]
    fn missing_executable_is_not_found() {
        assert!(locate_executable("definitely-not-a-triplestore-server", None, "").is_none());
    }

    #[cfg(unix)]
    #[test]
    fn finds_executables_on_path() {
        assert!(locate_executable("sh", None, "").is_some());
    }

    #[tokio::test]
    async fn stop_before_start_is_a_no_op() {
        let mut manager = ProcessLifecycleManager::new(ServerSpec::new(
            "test",
            "definitely-not-a-triplestore-server",
            "http://127.0.0.1:9/ping",
        ))
        .unwrap();

        manager.stop().await;
        manager.stop().await;
        assert_eq!(manager.state(), ProcessState::NotStarted);
        assert!(!manager.owns_process());
    }
}
