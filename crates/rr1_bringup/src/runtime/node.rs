//! Command-line and parameter file generation for declared processes

use crate::config::{ParameterValue, ProcessSpec, SubstitutionContext, SubstitutionError};
use indexmap::IndexMap;
use serde::Serialize;
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};

/// Fully resolved command for one declared process
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeCommand {
    /// Process name from the launch description
    pub name: String,
    /// Executable path (or command name for plain commands)
    pub executable: String,
    /// Arguments, including the `--ros-args` section for nodes
    pub args: Vec<String>,
    /// Environment: description-level entries overridden by process entries
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub env: IndexMap<String, String>,
    /// Working directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    /// Typed node parameters
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub parameters: IndexMap<String, Value>,
    /// Where `parameters` are written before start
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params_file: Option<PathBuf>,
}

impl NodeCommand {
    /// Resolve a process declaration against a substitution context.
    ///
    /// Parameter files are placed under `params_dir` but only written by
    /// [`NodeCommand::write_params_file`].
    pub fn resolve(
        name: &str,
        spec: &ProcessSpec,
        ctx: &SubstitutionContext,
        params_dir: &Path,
    ) -> Result<Self, NodeError> {
        let subst = |value: &str, field: &str| {
            ctx.substitute(value).map_err(|e| NodeError::Substitution {
                context: format!("process '{}' {}", name, field),
                source: e,
            })
        };

        let (executable, mut args) = match (&spec.package, &spec.executable, &spec.cmd) {
            (Some(package), Some(executable), _) => {
                let package = subst(package.as_str(), "package")?;
                let executable = subst(executable.as_str(), "executable")?;
                (Self::locate_executable(ctx, &package, &executable)?, Vec::new())
            }
            (_, _, Some(cmd)) => {
                let cmd = subst(cmd.as_str(), "cmd")?;
                let mut parts = cmd.split_whitespace().map(str::to_string);
                let executable = parts
                    .next()
                    .ok_or_else(|| NodeError::EmptyCommand(name.to_string()))?;
                (executable, parts.collect())
            }
            _ => return Err(NodeError::EmptyCommand(name.to_string())),
        };

        for arg in &spec.arguments {
            args.push(subst(arg.as_str(), "arguments")?);
        }

        let mut parameters = IndexMap::new();
        for (key, value) in &spec.parameters {
            let value = match value {
                ParameterValue::String(s) => {
                    string_to_yaml_value(&subst(s.as_str(), key.as_str())?)
                }
                ParameterValue::Bool(b) => Value::Bool(*b),
                ParameterValue::Int(i) => Value::Number((*i).into()),
                ParameterValue::Float(f) => Value::Number((*f).into()),
            };
            parameters.insert(key.clone(), value);
        }

        let params_file =
            (!parameters.is_empty()).then(|| params_dir.join(format!("{}.yaml", name)));

        let mut ros_args = Vec::new();
        if let Some(node_name) = &spec.name {
            ros_args.push("-r".to_string());
            ros_args.push(format!("__node:={}", subst(node_name.as_str(), "name")?));
        }
        if let Some(namespace) = &spec.namespace {
            ros_args.push("-r".to_string());
            ros_args.push(format!(
                "__ns:={}",
                absolute_namespace(&subst(namespace.as_str(), "namespace")?)
            ));
        }
        if let Some(path) = &params_file {
            ros_args.push("--params-file".to_string());
            ros_args.push(path.display().to_string());
        }
        if !ros_args.is_empty() {
            args.push("--ros-args".to_string());
            args.extend(ros_args);
        }

        let mut env: IndexMap<String, String> = ctx
            .env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        env.sort_keys();
        for (key, value) in &spec.env {
            let field = format!("env '{}'", key);
            env.insert(key.clone(), subst(value.as_str(), field.as_str())?);
        }

        let working_dir = spec
            .working_dir
            .as_deref()
            .map(|dir| subst(dir, "working_dir").map(PathBuf::from))
            .transpose()?;

        Ok(Self {
            name: name.to_string(),
            executable,
            args,
            env,
            working_dir,
            parameters,
            params_file,
        })
    }

    fn locate_executable(
        ctx: &SubstitutionContext,
        package: &str,
        executable: &str,
    ) -> Result<String, NodeError> {
        match ctx.ament.package_executable(package, executable) {
            Some(path) => Ok(path.to_string_lossy().into_owned()),
            // Plans are rendered on machines without the robot packages
            None if ctx.defer_commands => Ok(format!(
                "$(find-pkg-prefix {})/lib/{}/{}",
                package, package, executable
            )),
            None => Err(NodeError::ExecutableNotFound {
                package: package.to_string(),
                executable: executable.to_string(),
            }),
        }
    }

    /// Parameter file contents: `{/**: {ros__parameters: {...}}}`
    pub fn params_yaml(&self) -> Result<String, NodeError> {
        let mut ros_parameters = Mapping::new();
        for (key, value) in &self.parameters {
            ros_parameters.insert(Value::String(key.clone()), value.clone());
        }

        let mut node = Mapping::new();
        node.insert(
            Value::String("ros__parameters".to_string()),
            Value::Mapping(ros_parameters),
        );

        let mut root = Mapping::new();
        root.insert(Value::String("/**".to_string()), Value::Mapping(node));

        serde_yaml::to_string(&Value::Mapping(root)).map_err(NodeError::ParamsSerialize)
    }

    /// Write the parameter file, if the process has parameters
    pub fn write_params_file(&self) -> Result<Option<&Path>, NodeError> {
        let Some(path) = &self.params_file else {
            return Ok(None);
        };

        let io_err = |e: std::io::Error| NodeError::ParamsFile {
            path: path.clone(),
            source: e,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        std::fs::write(path, self.params_yaml()?).map_err(io_err)?;

        log::debug!("[{}] Wrote parameters to {}", self.name, path.display());
        Ok(Some(path))
    }

    /// Command line as a single string, for display
    pub fn command_line(&self) -> String {
        std::iter::once(self.executable.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// `rr1` and `/rr1/` both become `/rr1`
fn absolute_namespace(namespace: &str) -> String {
    format!("/{}", namespace.trim().trim_matches('/'))
}

/// Convert a resolved string to the YAML scalar it spells
fn string_to_yaml_value(s: &str) -> Value {
    match s {
        "true" | "True" => return Value::Bool(true),
        "false" | "False" => return Value::Bool(false),
        _ => {}
    }

    if let Ok(n) = s.parse::<i64>() {
        return Value::Number(n.into());
    }

    if let Ok(n) = s.parse::<f64>() {
        if n.is_finite() {
            return Value::Number(n.into());
        }
    }

    Value::String(s.to_string())
}

/// Errors that can occur while building a process command
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("Substitution failed in {context}: {source}")]
    Substitution {
        context: String,
        #[source]
        source: SubstitutionError,
    },

    #[error("Executable '{executable}' not found in package '{package}'")]
    ExecutableNotFound { package: String, executable: String },

    #[error("Process '{0}' has an empty command")]
    EmptyCommand(String),

    #[error("Failed to write parameter file {}: {source}", .path.display())]
    ParamsFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize parameters: {0}")]
    ParamsSerialize(#[source] serde_yaml::Error),
}
