//! Launch executor: plan resolution, process start-up and exit-triggered chaining

use crate::config::{
    AmentIndex, LaunchDescription, LaunchFileError, OutputMode, SubstitutionContext,
    SubstitutionError,
};
use crate::runtime::dependency::{DependencyError, DependencyGraph};
use crate::runtime::node::{NodeCommand, NodeError};
use crate::runtime::process::{ManagedProcess, ProcessConfig, ProcessEvent, ProcessStatus};
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Launch executor configuration
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Run directory for process logs and parameter files
    pub log_dir: PathBuf,
    /// Time allowed between SIGTERM and SIGKILL
    pub shutdown_timeout: Duration,
    /// How often running processes are polled for exit
    pub poll_interval: Duration,
    /// Package lookup for nodes and $(find-pkg-share)
    pub ament: AmentIndex,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_root().join(run_dir_name()),
            shutdown_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(100),
            ament: AmentIndex::from_env(),
        }
    }
}

impl ExecutorConfig {
    pub fn with_log_dir(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.log_dir = log_dir.into();
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_ament(mut self, ament: AmentIndex) -> Self {
        self.ament = ament;
        self
    }
}

/// `$ROS_LOG_DIR`, `$ROS_HOME/log` or `~/.ros/log`
pub fn default_log_root() -> PathBuf {
    if let Some(dir) = std::env::var_os("ROS_LOG_DIR").filter(|v| !v.is_empty()) {
        return PathBuf::from(dir);
    }
    if let Some(home) = std::env::var_os("ROS_HOME").filter(|v| !v.is_empty()) {
        return PathBuf::from(home).join("log");
    }
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".ros")
        .join("log")
}

fn run_dir_name() -> String {
    format!(
        "{}-{}",
        chrono::Local::now().format("%Y-%m-%d-%H-%M-%S-%6f"),
        std::process::id()
    )
}

/// One entry of the launch timeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LaunchEvent {
    /// Process spawned
    Started { process: String, pid: u32 },
    /// Process exited; `code` is `None` after a signal
    Exited { process: String, code: Option<i32> },
    /// `target`'s clean exit started `process`
    Triggered { target: String, process: String },
    /// Process could not be started
    Failed { process: String, error: String },
}

/// Launch plan for dry-run mode
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LaunchPlan {
    /// Launch configurations after overrides
    pub args: IndexMap<String, String>,
    /// Description-level environment
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub env: IndexMap<String, String>,
    /// Processes in launch order
    pub processes: Vec<LaunchPlanNode>,
}

/// A process in the launch plan
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LaunchPlanNode {
    /// Start wave (0 = at launch)
    pub stage: usize,
    /// Process whose clean exit starts this one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
    /// Processes started by this one's clean exit
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub on_exit: Vec<String>,
    pub output: OutputMode,
    #[serde(flatten)]
    pub command: NodeCommand,
}

impl LaunchPlan {
    pub fn get(&self, name: &str) -> Option<&LaunchPlanNode> {
        self.processes.iter().find(|p| p.command.name == name)
    }

    /// Number of start waves
    pub fn stage_count(&self) -> usize {
        self.processes
            .iter()
            .map(|p| p.stage + 1)
            .max()
            .unwrap_or(0)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Launch executor state
pub struct Executor {
    /// Configuration
    config: ExecutorConfig,
    /// Trigger graph of the description
    graph: DependencyGraph,
    /// Launch configurations after overrides, in declaration order
    args: IndexMap<String, String>,
    /// Resolved description-level environment
    env: IndexMap<String, String>,
    /// Substitution context
    subst_ctx: SubstitutionContext,
    /// Resolved commands, filled in by `launch`
    commands: IndexMap<String, NodeCommand>,
    /// Managed processes in launch order
    processes: IndexMap<String, ManagedProcess>,
    /// Processes in the order they were started
    started: Vec<String>,
    /// Launch timeline
    history: Vec<LaunchEvent>,
    /// Event channel
    event_tx: mpsc::UnboundedSender<(String, ProcessEvent)>,
    event_rx: mpsc::UnboundedReceiver<(String, ProcessEvent)>,
}

impl Executor {
    /// Create a new executor
    pub fn new(
        description: LaunchDescription,
        config: ExecutorConfig,
        arg_overrides: HashMap<String, String>,
    ) -> Result<Self, ExecutorError> {
        description.validate()?;
        let graph = DependencyGraph::build(&description)?;

        let mut args: IndexMap<String, String> = description
            .args
            .iter()
            .map(|(name, def)| (name.clone(), def.default.as_str()))
            .collect();

        let mut overrides: Vec<_> = arg_overrides.into_iter().collect();
        overrides.sort();
        for (name, value) in overrides {
            match args.get_mut(&name) {
                Some(slot) => *slot = value,
                None => return Err(ExecutorError::UnknownArgument(name)),
            }
        }

        let base_ctx = SubstitutionContext::new()
            .with_args(args.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .with_ament(config.ament.clone());

        let mut env = IndexMap::new();
        for (key, value) in &description.env {
            let resolved =
                base_ctx
                    .substitute(value)
                    .map_err(|e| ExecutorError::SubstitutionFailed {
                        context: format!("env '{}'", key),
                        source: e,
                    })?;
            env.insert(key.clone(), resolved);
        }

        let subst_ctx = base_ctx.with_envs(env.clone());
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Ok(Self {
            config,
            graph,
            args,
            env,
            subst_ctx,
            commands: IndexMap::new(),
            processes: IndexMap::new(),
            started: Vec::new(),
            history: Vec::new(),
            event_tx,
            event_rx,
        })
    }

    fn params_dir(&self) -> PathBuf {
        self.config.log_dir.join("params")
    }

    /// Generate a launch plan without running anything.
    ///
    /// Command substitutions stay unexpanded so the plan can be rendered on a
    /// machine without the robot's tools installed.
    pub fn plan(&self) -> Result<LaunchPlan, ExecutorError> {
        let ctx = self.subst_ctx.deferring_commands();
        let params_dir = self.params_dir();

        let mut processes = Vec::with_capacity(self.graph.processes.len());
        for process in self.graph.launch_order() {
            let command = NodeCommand::resolve(&process.name, &process.spec, &ctx, &params_dir)?;
            processes.push(LaunchPlanNode {
                stage: process.stage,
                trigger: process.trigger.clone(),
                on_exit: self.graph.on_exit(&process.name).to_vec(),
                output: process.spec.output,
                command,
            });
        }

        Ok(LaunchPlan {
            args: self.args.clone(),
            env: self.env.clone(),
            processes,
        })
    }

    /// Start the roots, then chain the rest on clean exits until nothing is
    /// running or shutdown is requested
    pub async fn launch(&mut self, shutdown_rx: watch::Receiver<()>) -> Result<(), ExecutorError> {
        std::fs::create_dir_all(&self.config.log_dir).map_err(|e| ExecutorError::LogDir {
            path: self.config.log_dir.clone(),
            source: e,
        })?;
        log::info!("Logging to {}", self.config.log_dir.display());

        let params_dir = self.params_dir();
        for process in self.graph.launch_order() {
            let command =
                NodeCommand::resolve(&process.name, &process.spec, &self.subst_ctx, &params_dir)?;
            let config =
                ProcessConfig::from_command(&command, process.spec.output, &self.config.log_dir);
            self.processes.insert(
                process.name.clone(),
                ManagedProcess::new(config).with_event_sender(self.event_tx.clone()),
            );
            self.commands.insert(process.name.clone(), command);
        }

        let roots: Vec<String> = self.graph.roots().map(|p| p.name.clone()).collect();
        log::info!(
            "Launching {} processes ({} at start)...",
            self.processes.len(),
            roots.len()
        );

        for name in &roots {
            if shutdown_rx.has_changed().unwrap_or(false) {
                log::info!("Shutdown requested, aborting launch");
                return Ok(());
            }
            self.start_process(name).await;
        }

        self.event_loop(shutdown_rx).await;
        Ok(())
    }

    async fn start_process(&mut self, name: &str) {
        let Some(process) = self.processes.get_mut(name) else {
            return;
        };

        if let Some(command) = self.commands.get(name) {
            if let Err(e) = command.write_params_file() {
                log::error!("[{}] {}", name, e);
                process.status = ProcessStatus::Failed;
                self.history.push(LaunchEvent::Failed {
                    process: name.to_string(),
                    error: e.to_string(),
                });
                return;
            }
        }

        match process.start().await {
            Ok(pid) => {
                self.started.push(name.to_string());
                self.history.push(LaunchEvent::Started {
                    process: name.to_string(),
                    pid,
                });
            }
            Err(e) => self.history.push(LaunchEvent::Failed {
                process: name.to_string(),
                error: e.to_string(),
            }),
        }
    }

    /// Process events and poll for exits until nothing runs or shutdown
    async fn event_loop(&mut self, mut shutdown_rx: watch::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    log::info!("Shutdown signal received");
                    break;
                }

                Some((name, event)) = self.event_rx.recv() => {
                    log_process_event(&name, event);
                }

                _ = ticker.tick() => {
                    for (name, code) in self.poll_exits() {
                        self.handle_exit(&name, code).await;
                    }
                    if !self.processes.values().any(|p| p.status.is_running()) {
                        log::info!("All processes have stopped");
                        break;
                    }
                }
            }
        }

        while let Ok((name, event)) = self.event_rx.try_recv() {
            log_process_event(&name, event);
        }
    }

    fn poll_exits(&mut self) -> Vec<(String, Option<i32>)> {
        let mut exited = Vec::new();
        for (name, process) in self.processes.iter_mut() {
            if !process.status.is_running() {
                continue;
            }
            if let ProcessStatus::Stopped(code) = process.check_status() {
                exited.push((name.clone(), code));
            }
        }
        exited
    }

    async fn handle_exit(&mut self, name: &str, code: Option<i32>) {
        self.history.push(LaunchEvent::Exited {
            process: name.to_string(),
            code,
        });

        let next = self.graph.on_exit(name).to_vec();
        if code != Some(0) {
            log::warn!("[{}] Process exited with code: {:?}", name, code);
            if !next.is_empty() {
                log::warn!("[{}] Not starting: {}", name, next.join(", "));
            }
            return;
        }

        log::info!("[{}] Process exited cleanly", name);
        for launched in next {
            log::info!("[{}] Exit triggers '{}'", name, launched);
            self.history.push(LaunchEvent::Triggered {
                target: name.to_string(),
                process: launched.clone(),
            });
            self.start_process(&launched).await;
        }
    }

    /// Stop running processes in reverse start order
    pub async fn shutdown(&mut self) {
        log::info!("Shutting down all processes...");

        for name in self.started.clone().into_iter().rev() {
            if let Some(process) = self.processes.get_mut(&name) {
                if process.check_status().is_running() {
                    if let Err(e) = process.stop(self.config.shutdown_timeout).await {
                        log::error!("[{}] Error stopping process: {}", name, e);
                    }
                }
            }
        }

        log::info!("All processes shut down");
    }

    /// Launch timeline so far
    pub fn history(&self) -> &[LaunchEvent] {
        &self.history
    }

    /// Get process status summary
    pub fn status(&self) -> Vec<(&str, ProcessStatus)> {
        self.processes
            .iter()
            .map(|(name, proc)| (name.as_str(), proc.status))
            .collect()
    }
}

fn log_process_event(name: &str, event: ProcessEvent) {
    match event {
        ProcessEvent::Output { line, is_stderr } => {
            if is_stderr {
                log::warn!("[{}] {}", name, line);
            } else {
                log::info!("[{}] {}", name, line);
            }
        }
        ProcessEvent::Started { pid } => {
            log::info!("[{}] Process started with PID: {}", name, pid);
        }
        ProcessEvent::Exited { code } => {
            log::debug!("[{}] Exit observed (code: {:?})", name, code);
        }
        ProcessEvent::Failed { error } => {
            log::error!("[{}] Process failed: {}", name, error);
        }
    }
}

/// Errors that can occur in the executor
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("Unknown argument: {0}")]
    UnknownArgument(String),

    #[error("Invalid launch description: {0}")]
    InvalidDescription(#[from] LaunchFileError),

    #[error("Dependency error: {0}")]
    Dependency(#[from] DependencyError),

    #[error("Substitution failed in {context}: {source}")]
    SubstitutionFailed {
        context: String,
        #[source]
        source: SubstitutionError,
    },

    #[error(transparent)]
    Node(#[from] NodeError),

    #[error("Cannot create log directory {}: {source}", .path.display())]
    LogDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Display the launch plan in a human-readable format
impl std::fmt::Display for LaunchPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Launch Plan")?;
        writeln!(f, "===========")?;
        writeln!(f)?;

        if !self.args.is_empty() {
            writeln!(f, "Arguments:")?;
            for (key, value) in &self.args {
                writeln!(f, "  {}: {}", key, value)?;
            }
            writeln!(f)?;
        }

        if !self.env.is_empty() {
            writeln!(f, "Global Environment:")?;
            for (key, value) in &self.env {
                writeln!(f, "  {}={}", key, value)?;
            }
            writeln!(f)?;
        }

        for stage in 0..self.stage_count() {
            if stage == 0 {
                writeln!(f, "Stage 0 (at launch):")?;
            } else {
                writeln!(f, "Stage {} (on exit):", stage)?;
            }

            for node in self.processes.iter().filter(|p| p.stage == stage) {
                let command = &node.command;
                writeln!(f)?;
                writeln!(f, "  {} [output: {:?}]", command.name, node.output)?;
                if let Some(trigger) = &node.trigger {
                    writeln!(f, "     After: {} exits cleanly", trigger)?;
                }
                writeln!(f, "     Command: {}", command.command_line())?;

                if !command.parameters.is_empty() {
                    writeln!(f, "     Parameters:")?;
                    for (key, value) in &command.parameters {
                        writeln!(f, "       {}: {}", key, display_yaml(value))?;
                    }
                }

                if !node.on_exit.is_empty() {
                    writeln!(f, "     On exit: {}", node.on_exit.join(", "))?;
                }
            }
            writeln!(f)?;
        }

        Ok(())
    }
}

fn display_yaml(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}
