//! Launch description schema: arguments, processes and exit handlers

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;

/// Root launch description
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LaunchDescription {
    /// Launch file format version
    #[serde(default = "default_version")]
    pub version: String,

    /// Declared launch arguments with defaults
    #[serde(default)]
    pub args: IndexMap<String, ArgDefinition>,

    /// Environment variables (applied to all processes)
    #[serde(default)]
    pub env: IndexMap<String, String>,

    /// Process declarations (ordered map for deterministic launch order)
    #[serde(default)]
    pub processes: IndexMap<String, ProcessSpec>,

    /// Handlers that start processes in reaction to other processes' events,
    /// written as `- on_process_exit: {...}` maps
    #[serde(default, with = "serde_yaml::with::singleton_map_recursive")]
    pub event_handlers: Vec<EventHandler>,
}

fn default_version() -> String {
    "1.0".to_string()
}

/// Argument definition with default value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgDefinition {
    /// Default value for the argument
    pub default: ArgValue,
    /// Optional description
    #[serde(default)]
    pub description: Option<String>,
}

impl ArgDefinition {
    pub fn new(default: ArgValue) -> Self {
        Self {
            default,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Argument values can be strings, booleans, or numbers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl ArgValue {
    /// Convert to string representation
    pub fn as_str(&self) -> String {
        match self {
            ArgValue::Bool(b) => b.to_string(),
            ArgValue::Int(i) => i.to_string(),
            ArgValue::Float(f) => f.to_string(),
            ArgValue::String(s) => s.clone(),
        }
    }
}

/// Parameter values passed to a ROS node.
///
/// Strings may carry substitutions and are typed again after resolution,
/// so `"$(var use_sim_time)"` ends up as a YAML boolean.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl From<&str> for ParameterValue {
    fn from(s: &str) -> Self {
        ParameterValue::String(s.to_string())
    }
}

impl From<String> for ParameterValue {
    fn from(s: String) -> Self {
        ParameterValue::String(s)
    }
}

impl From<bool> for ParameterValue {
    fn from(b: bool) -> Self {
        ParameterValue::Bool(b)
    }
}

/// Where a process' stdout/stderr goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Echo to the launcher's log
    Screen,
    /// Append to the per-process log file (default)
    #[default]
    Log,
    /// Both of the above
    Both,
}

impl OutputMode {
    pub fn to_screen(&self) -> bool {
        matches!(self, OutputMode::Screen | OutputMode::Both)
    }

    pub fn to_file(&self) -> bool {
        matches!(self, OutputMode::Log | OutputMode::Both)
    }
}

/// A single process declaration.
///
/// Either a ROS node (`package` + `executable`) or a plain command (`cmd`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessSpec {
    /// ROS package providing the executable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,

    /// Executable name within the package's lib directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executable: Option<String>,

    /// Direct command (for non-ROS executables)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<String>,

    /// Node name remap (`__node`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Node namespace remap (`__ns`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Arguments placed before `--ros-args`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<String>,

    /// Node parameters
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub parameters: IndexMap<String, ParameterValue>,

    /// Environment variables specific to this process
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub env: IndexMap<String, String>,

    /// Output routing
    #[serde(default)]
    pub output: OutputMode,

    /// Working directory for the process
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
}

impl ProcessSpec {
    /// Declare a ROS node from a package executable
    pub fn node(package: impl Into<String>, executable: impl Into<String>) -> Self {
        Self {
            package: Some(package.into()),
            executable: Some(executable.into()),
            ..Default::default()
        }
    }

    /// Declare a plain command
    pub fn command(cmd: impl Into<String>) -> Self {
        Self {
            cmd: Some(cmd.into()),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_arguments<I, S>(mut self, arguments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.arguments.extend(arguments.into_iter().map(Into::into));
        self
    }

    pub fn with_parameter(
        mut self,
        name: impl Into<String>,
        value: impl Into<ParameterValue>,
    ) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    pub fn with_output(mut self, output: OutputMode) -> Self {
        self.output = output;
        self
    }

    fn validate(&self, name: &str) -> Result<(), LaunchFileError> {
        match (&self.package, &self.executable, &self.cmd) {
            (Some(_), Some(_), None) => {}
            (None, None, Some(_)) => {
                let ros_only = [
                    ("name", self.name.is_some()),
                    ("namespace", self.namespace.is_some()),
                    ("parameters", !self.parameters.is_empty()),
                ];
                if let Some((field, _)) = ros_only.iter().find(|(_, set)| *set) {
                    return Err(LaunchFileError::Validation(format!(
                        "Process '{}': '{}' only applies to ROS nodes",
                        name, field
                    )));
                }
            }
            (Some(_), None, None) => {
                return Err(LaunchFileError::Validation(format!(
                    "Process '{}': 'package' requires 'executable' to be specified",
                    name
                )));
            }
            (None, Some(_), None) => {
                return Err(LaunchFileError::Validation(format!(
                    "Process '{}': 'executable' requires 'package' to be specified",
                    name
                )));
            }
            (_, _, Some(_)) => {
                return Err(LaunchFileError::Validation(format!(
                    "Process '{}': cannot specify both 'package'/'executable' and 'cmd'",
                    name
                )));
            }
            (None, None, None) => {
                return Err(LaunchFileError::Validation(format!(
                    "Process '{}': must specify either 'package'+'executable' or 'cmd'",
                    name
                )));
            }
        }
        Ok(())
    }
}

/// Event handler registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventHandler {
    /// Start `on_exit` once `target_action` has exited
    OnProcessExit {
        target_action: String,
        on_exit: Vec<String>,
    },
}

impl EventHandler {
    pub fn on_process_exit<I, S>(target_action: impl Into<String>, on_exit: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        EventHandler::OnProcessExit {
            target_action: target_action.into(),
            on_exit: on_exit.into_iter().map(Into::into).collect(),
        }
    }

    /// The process whose event fires this handler
    pub fn target(&self) -> &str {
        match self {
            EventHandler::OnProcessExit { target_action, .. } => target_action,
        }
    }

    /// Processes started when the handler fires
    pub fn launches(&self) -> &[String] {
        match self {
            EventHandler::OnProcessExit { on_exit, .. } => on_exit,
        }
    }
}

impl fmt::Display for EventHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventHandler::OnProcessExit {
                target_action,
                on_exit,
            } => write!(f, "OnProcessExit({} -> {})", target_action, on_exit.join(", ")),
        }
    }
}

impl LaunchDescription {
    pub fn new() -> Self {
        Self {
            version: default_version(),
            ..Default::default()
        }
    }

    /// Declare a launch argument
    pub fn declare_argument(mut self, name: impl Into<String>, def: ArgDefinition) -> Self {
        self.args.insert(name.into(), def);
        self
    }

    /// Declare a process
    pub fn add_process(mut self, name: impl Into<String>, spec: ProcessSpec) -> Self {
        self.processes.insert(name.into(), spec);
        self
    }

    /// Register an event handler
    pub fn register_event_handler(mut self, handler: EventHandler) -> Self {
        self.event_handlers.push(handler);
        self
    }

    /// Load launch description from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, LaunchFileError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| LaunchFileError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_yaml(&content)
    }

    /// Parse launch description from YAML string
    pub fn from_yaml(content: &str) -> Result<Self, LaunchFileError> {
        let description: LaunchDescription =
            serde_yaml::from_str(content).map_err(LaunchFileError::Parse)?;
        description.validate()?;
        Ok(description)
    }

    /// Validate process declarations and handler references
    pub fn validate(&self) -> Result<(), LaunchFileError> {
        for (name, spec) in &self.processes {
            spec.validate(name)?;
        }

        let mut triggers: HashMap<&str, &str> = HashMap::new();
        for handler in &self.event_handlers {
            let target = handler.target();
            if !self.processes.contains_key(target) {
                return Err(LaunchFileError::Validation(format!(
                    "{}: unknown target process '{}'",
                    handler, target
                )));
            }
            for entry in handler.launches() {
                if !self.processes.contains_key(entry) {
                    return Err(LaunchFileError::Validation(format!(
                        "{}: launches unknown process '{}'",
                        handler, entry
                    )));
                }
                if entry == target {
                    return Err(LaunchFileError::Validation(format!(
                        "{}: process '{}' cannot be triggered by its own exit",
                        handler, entry
                    )));
                }
                if triggers.insert(entry, target).is_some() {
                    return Err(LaunchFileError::Validation(format!(
                        "Process '{}' is launched by more than one event handler",
                        entry
                    )));
                }
            }
        }

        // each process has at most one trigger, so a cycle is a trigger chain
        // longer than the number of processes
        for name in self.processes.keys() {
            let mut current = name.as_str();
            for _ in 0..self.processes.len() {
                match triggers.get(current) {
                    Some(&target) => current = target,
                    None => break,
                }
            }
            if triggers.contains_key(current) {
                return Err(LaunchFileError::Validation(format!(
                    "Process '{}' is caught in an exit handler cycle",
                    name
                )));
            }
        }

        Ok(())
    }

    /// Number of argument and process declarations
    pub fn declaration_count(&self) -> usize {
        self.args.len() + self.processes.len()
    }

    /// All (trigger, launched) pairs across event handlers
    pub fn event_handler_bindings(&self) -> Vec<(&str, &str)> {
        self.event_handlers
            .iter()
            .flat_map(|h| h.launches().iter().map(move |l| (h.target(), l.as_str())))
            .collect()
    }

    /// Processes not started by any handler
    pub fn roots(&self) -> Vec<&str> {
        let launched: HashSet<&str> = self
            .event_handlers
            .iter()
            .flat_map(|h| h.launches().iter().map(String::as_str))
            .collect();
        self.processes
            .keys()
            .map(String::as_str)
            .filter(|name| !launched.contains(name))
            .collect()
    }

    /// Serialize back to YAML
    pub fn to_yaml(&self) -> Result<String, LaunchFileError> {
        serde_yaml::to_string(self).map_err(LaunchFileError::Serialize)
    }
}

/// Errors that can occur when loading a launch description
#[derive(Debug, thiserror::Error)]
pub enum LaunchFileError {
    #[error("Failed to read launch file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse launch file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Failed to serialize launch file: {0}")]
    Serialize(#[source] serde_yaml::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_launch_file() {
        let yaml = r#"
version: "1.0"
args:
  use_sim_time:
    default: true
processes:
  publisher:
    package: robot_state_publisher
    executable: robot_state_publisher
    namespace: rr1
    parameters:
      use_sim_time: "$(var use_sim_time)"
  spawn:
    cmd: "/bin/true"
  broadcaster:
    package: controller_manager
    executable: spawner
    arguments: [joint_state_broadcaster]
event_handlers:
  - on_process_exit:
      target_action: spawn
      on_exit: [broadcaster]
"#;
        let description = LaunchDescription::from_yaml(yaml).unwrap();
        assert_eq!(description.processes.len(), 3);
        assert_eq!(description.declaration_count(), 4);
        assert_eq!(
            description.event_handler_bindings(),
            vec![("spawn", "broadcaster")]
        );
        assert_eq!(description.roots(), vec!["publisher", "spawn"]);
        assert_eq!(
            description.processes["publisher"].parameters["use_sim_time"],
            ParameterValue::String("$(var use_sim_time)".to_string())
        );
        assert_eq!(description.processes["publisher"].output, OutputMode::Log);
    }

    #[test]
    fn test_validation_missing_executable() {
        let yaml = r#"
processes:
  bad:
    package: some_package
"#;
        let err = LaunchDescription::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, LaunchFileError::Validation(_)));
        assert!(err.to_string().contains("requires 'executable'"));
    }

    #[test]
    fn test_validation_ros_fields_on_command() {
        let yaml = r#"
processes:
  script:
    cmd: "/bin/true"
    namespace: rr1
"#;
        let err = LaunchDescription::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("'namespace' only applies to ROS nodes"));
    }

    #[test]
    fn test_validation_unknown_handler_target() {
        let description = LaunchDescription::new()
            .add_process("a", ProcessSpec::command("/bin/true"))
            .register_event_handler(EventHandler::on_process_exit("missing", ["a"]));
        let err = description.validate().unwrap_err();
        assert!(err.to_string().contains("unknown target process 'missing'"));
    }

    #[test]
    fn test_validation_launched_twice() {
        let description = LaunchDescription::new()
            .add_process("a", ProcessSpec::command("/bin/true"))
            .add_process("b", ProcessSpec::command("/bin/true"))
            .add_process("c", ProcessSpec::command("/bin/true"))
            .register_event_handler(EventHandler::on_process_exit("a", ["c"]))
            .register_event_handler(EventHandler::on_process_exit("b", ["c"]));
        let err = description.validate().unwrap_err();
        assert!(err.to_string().contains("more than one event handler"));
    }

    #[test]
    fn test_validation_self_trigger() {
        let description = LaunchDescription::new()
            .add_process("a", ProcessSpec::command("/bin/true"))
            .register_event_handler(EventHandler::on_process_exit("a", ["a"]));
        assert!(description.validate().is_err());
    }

    #[test]
    fn test_validation_cycle() {
        let description = LaunchDescription::new()
            .add_process("a", ProcessSpec::command("/bin/true"))
            .add_process("b", ProcessSpec::command("/bin/true"))
            .register_event_handler(EventHandler::on_process_exit("a", ["b"]))
            .register_event_handler(EventHandler::on_process_exit("b", ["a"]));
        assert!(description.roots().is_empty());
        let err = description.validate().unwrap_err();
        assert!(err.to_string().contains("exit handler cycle"));
    }

    #[test]
    fn test_validation_chain_without_cycle() {
        let description = LaunchDescription::new()
            .add_process("a", ProcessSpec::command("/bin/true"))
            .add_process("b", ProcessSpec::command("/bin/true"))
            .add_process("c", ProcessSpec::command("/bin/true"))
            .register_event_handler(EventHandler::on_process_exit("a", ["b"]))
            .register_event_handler(EventHandler::on_process_exit("b", ["c"]));
        assert!(description.validate().is_ok());
    }

    #[test]
    fn test_yaml_roundtrip_keeps_order() {
        let description = LaunchDescription::new()
            .add_process("z", ProcessSpec::command("/bin/true"))
            .add_process("a", ProcessSpec::node("pkg", "exe").with_output(OutputMode::Both))
            .register_event_handler(EventHandler::on_process_exit("z", ["a"]));
        let yaml = description.to_yaml().unwrap();
        assert!(yaml.contains("- on_process_exit:"));
        assert!(!yaml.contains('!'));
        let parsed = LaunchDescription::from_yaml(&yaml).unwrap();
        assert_eq!(parsed, description);
        assert_eq!(
            parsed.processes.keys().collect::<Vec<_>>(),
            vec!["z", "a"]
        );
    }
}
