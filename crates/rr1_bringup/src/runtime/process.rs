//! Managed child process: spawn, output routing, exit polling, stop

use crate::config::OutputMode;
use crate::runtime::node::NodeCommand;
use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

/// Process status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Not started yet (waiting on its trigger, or never triggered)
    Pending,
    /// Process is running
    Running,
    /// Process has exited; `None` when killed by a signal
    Stopped(Option<i32>),
    /// Process could not be spawned
    Failed,
}

impl ProcessStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, ProcessStatus::Running)
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, ProcessStatus::Stopped(_) | ProcessStatus::Failed)
    }

    /// Exited on its own with status 0
    pub fn is_clean_exit(&self) -> bool {
        matches!(self, ProcessStatus::Stopped(Some(0)))
    }
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessStatus::Pending => write!(f, "pending"),
            ProcessStatus::Running => write!(f, "running"),
            ProcessStatus::Stopped(Some(code)) => write!(f, "exited ({})", code),
            ProcessStatus::Stopped(None) => write!(f, "killed"),
            ProcessStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Configuration for spawning a process
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    /// Process name (for logging)
    pub name: String,
    /// Executable path
    pub executable: String,
    /// Command line arguments
    pub args: Vec<String>,
    /// Environment variables
    pub env: IndexMap<String, String>,
    /// Working directory
    pub working_dir: Option<PathBuf>,
    /// Output routing
    pub output: OutputMode,
    /// Log file for `log` and `both` output
    pub log_file: Option<PathBuf>,
}

impl ProcessConfig {
    /// Build from a resolved command, logging to `<log_dir>/<name>.log` when needed
    pub fn from_command(command: &NodeCommand, output: OutputMode, log_dir: &Path) -> Self {
        Self {
            name: command.name.clone(),
            executable: command.executable.clone(),
            args: command.args.clone(),
            env: command.env.clone(),
            working_dir: command.working_dir.clone(),
            output,
            log_file: output
                .to_file()
                .then(|| log_dir.join(format!("{}.log", command.name))),
        }
    }
}

/// Event emitted by a managed process
#[derive(Debug, Clone)]
pub enum ProcessEvent {
    /// Process started
    Started { pid: u32 },
    /// Output line routed to the screen
    Output { line: String, is_stderr: bool },
    /// Process exited
    Exited { code: Option<i32> },
    /// Process failed to start
    Failed { error: String },
}

/// A managed child process
pub struct ManagedProcess {
    /// Process configuration
    pub config: ProcessConfig,
    /// Current status
    pub status: ProcessStatus,
    /// Process ID (if running)
    pub pid: Option<u32>,
    /// Child process handle
    child: Option<Child>,
    /// Event sender
    event_tx: Option<mpsc::UnboundedSender<(String, ProcessEvent)>>,
}

impl ManagedProcess {
    pub fn new(config: ProcessConfig) -> Self {
        Self {
            config,
            status: ProcessStatus::Pending,
            pid: None,
            child: None,
            event_tx: None,
        }
    }

    /// Set the event sender for this process
    pub fn with_event_sender(
        mut self,
        tx: mpsc::UnboundedSender<(String, ProcessEvent)>,
    ) -> Self {
        self.event_tx = Some(tx);
        self
    }

    fn emit(&self, event: ProcessEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send((self.config.name.clone(), event));
        }
    }

    /// Start the process
    pub async fn start(&mut self) -> Result<u32, ProcessError> {
        if self.status.is_running() {
            return Err(ProcessError::AlreadyRunning(self.config.name.clone()));
        }

        log::info!(
            "[{}] Starting: {} {}",
            self.config.name,
            self.config.executable,
            self.config.args.join(" ")
        );

        let mut cmd = Command::new(&self.config.executable);
        cmd.args(&self.config.args)
            .envs(&self.config.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.status = ProcessStatus::Failed;
                log::error!("[{}] Failed to spawn process: {}", self.config.name, e);
                self.emit(ProcessEvent::Failed {
                    error: e.to_string(),
                });
                return Err(ProcessError::SpawnFailed {
                    name: self.config.name.clone(),
                    source: e,
                });
            }
        };

        let pid = child.id().unwrap_or(0);
        self.pid = Some(pid);
        self.status = ProcessStatus::Running;
        self.emit(ProcessEvent::Started { pid });

        if let Some(stdout) = child.stdout.take() {
            self.spawn_reader(stdout, false);
        }
        if let Some(stderr) = child.stderr.take() {
            self.spawn_reader(stderr, true);
        }

        self.child = Some(child);
        Ok(pid)
    }

    /// Forward one output stream line by line to the screen and/or the log file
    fn spawn_reader<R>(&self, stream: R, is_stderr: bool)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let name = self.config.name.clone();
        let tx = self
            .event_tx
            .clone()
            .filter(|_| self.config.output.to_screen());
        let log_file = self.config.log_file.clone();

        tokio::spawn(async move {
            let mut file = match &log_file {
                Some(path) => match open_log(path).await {
                    Ok(file) => Some(file),
                    Err(e) => {
                        log::warn!("[{}] Cannot open {}: {}", name, path.display(), e);
                        None
                    }
                },
                None => None,
            };

            let mut lines = BufReader::new(stream).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(f) = file.as_mut() {
                    let _ = f.write_all(format!("{}\n", line).as_bytes()).await;
                    let _ = f.flush().await;
                }
                if let Some(tx) = &tx {
                    let _ = tx.send((name.clone(), ProcessEvent::Output { line, is_stderr }));
                }
            }
        });
    }

    /// Stop the process gracefully (SIGTERM, then SIGKILL after timeout)
    pub async fn stop(&mut self, timeout: Duration) -> Result<(), ProcessError> {
        let Some(mut child) = self.child.take() else {
            return Err(ProcessError::NotRunning(self.config.name.clone()));
        };

        log::info!("[{}] Stopping process...", self.config.name);

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if let Some(pid) = self.pid {
                let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
            }
        }

        #[cfg(not(unix))]
        {
            let _ = child.start_kill();
        }

        let code = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => status.code(),
            Ok(Err(e)) => {
                log::error!("[{}] Error waiting for process: {}", self.config.name, e);
                None
            }
            Err(_) => {
                log::warn!(
                    "[{}] Process did not exit within {:?}, forcing kill",
                    self.config.name,
                    timeout
                );
                child.kill().await.map_err(|e| ProcessError::KillFailed {
                    name: self.config.name.clone(),
                    source: e,
                })?;
                None
            }
        };

        log::info!("[{}] Process stopped (code: {:?})", self.config.name, code);
        self.status = ProcessStatus::Stopped(code);
        self.pid = None;
        self.emit(ProcessEvent::Exited { code });
        Ok(())
    }

    /// Poll the child; returns the status after the poll
    pub fn check_status(&mut self) -> ProcessStatus {
        if let Some(child) = &mut self.child {
            match child.try_wait() {
                Ok(Some(status)) => {
                    let code = status.code();
                    self.status = ProcessStatus::Stopped(code);
                    self.pid = None;
                    self.child = None;
                    self.emit(ProcessEvent::Exited { code });
                }
                Ok(None) => {}
                Err(e) => {
                    log::error!(
                        "[{}] Error checking process status: {}",
                        self.config.name,
                        e
                    );
                }
            }
        }

        self.status
    }
}

async fn open_log(path: &Path) -> std::io::Result<tokio::fs::File> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
}

/// Errors that can occur with managed processes
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Process '{0}' is already running")]
    AlreadyRunning(String),

    #[error("Failed to spawn process '{name}': {source}")]
    SpawnFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to kill process '{name}': {source}")]
    KillFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Process '{0}' is not running")]
    NotRunning(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell(
        name: &str,
        script: &str,
        output: OutputMode,
        log_file: Option<PathBuf>,
    ) -> ProcessConfig {
        ProcessConfig {
            name: name.to_string(),
            executable: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            env: IndexMap::new(),
            working_dir: None,
            output,
            log_file,
        }
    }

    async fn wait_stopped(process: &mut ManagedProcess) -> ProcessStatus {
        for _ in 0..200 {
            let status = process.check_status();
            if status.is_stopped() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("process '{}' did not exit", process.config.name);
    }

    #[tokio::test]
    async fn test_exit_code_is_reported() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut process = ManagedProcess::new(shell("fail", "exit 3", OutputMode::Screen, None))
            .with_event_sender(tx);

        process.start().await.unwrap();
        assert_eq!(
            wait_stopped(&mut process).await,
            ProcessStatus::Stopped(Some(3))
        );
        assert!(!process.status.is_clean_exit());

        let (name, event) = rx.recv().await.unwrap();
        assert_eq!(name, "fail");
        assert!(matches!(event, ProcessEvent::Started { .. }));
    }

    #[tokio::test]
    async fn test_screen_output_is_forwarded() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut process =
            ManagedProcess::new(shell("talker", "echo hello", OutputMode::Screen, None))
                .with_event_sender(tx);

        process.start().await.unwrap();
        assert!(wait_stopped(&mut process).await.is_clean_exit());

        let mut lines = Vec::new();
        while let Ok(Some((_, event))) =
            tokio::time::timeout(Duration::from_secs(1), rx.recv()).await
        {
            if let ProcessEvent::Output { line, is_stderr } = event {
                assert!(!is_stderr);
                lines.push(line);
            }
            if !lines.is_empty() {
                break;
            }
        }
        assert_eq!(lines, vec!["hello"]);
    }

    #[tokio::test]
    async fn test_log_output_goes_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let log_file = dir.path().join("logger.log");
        let mut process = ManagedProcess::new(shell(
            "logger",
            "echo one; echo two >&2",
            OutputMode::Log,
            Some(log_file.clone()),
        ));

        process.start().await.unwrap();
        assert!(wait_stopped(&mut process).await.is_clean_exit());

        let mut content = String::new();
        for _ in 0..100 {
            content = std::fs::read_to_string(&log_file).unwrap_or_default();
            if content.lines().count() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let mut lines: Vec<_> = content.lines().collect();
        lines.sort_unstable();
        assert_eq!(lines, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let mut config = shell("ghost", "", OutputMode::Screen, None);
        config.executable = "/nonexistent/rr1_bringup_test_binary".to_string();
        let mut process = ManagedProcess::new(config);

        let result = process.start().await;
        assert!(matches!(result, Err(ProcessError::SpawnFailed { .. })));
        assert_eq!(process.status, ProcessStatus::Failed);
    }

    #[tokio::test]
    async fn test_stop_running_process() {
        let mut process =
            ManagedProcess::new(shell("sleeper", "sleep 30", OutputMode::Screen, None));

        process.start().await.unwrap();
        assert!(process.check_status().is_running());

        process.stop(Duration::from_secs(2)).await.unwrap();
        assert!(process.status.is_stopped());
        assert!(!process.status.is_clean_exit());
        assert!(matches!(
            process.stop(Duration::from_secs(1)).await,
            Err(ProcessError::NotRunning(_))
        ));
    }

    #[test]
    fn test_log_file_follows_output_mode() {
        let command = NodeCommand {
            name: "rsp".to_string(),
            executable: "robot_state_publisher".to_string(),
            args: Vec::new(),
            env: IndexMap::new(),
            working_dir: None,
            parameters: IndexMap::new(),
            params_file: None,
        };
        let dir = Path::new("/tmp/run");

        let both = ProcessConfig::from_command(&command, OutputMode::Both, dir);
        assert_eq!(both.log_file, Some(dir.join("rsp.log")));
        let screen = ProcessConfig::from_command(&command, OutputMode::Screen, dir);
        assert_eq!(screen.log_file, None);
    }
}
