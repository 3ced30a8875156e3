//! Command-line interface for rr1_bringup

use crate::bringup::{spawn_description, RobotDescription};
use crate::config::{LaunchDescription, LaunchFileError, RobotConfig, RobotConfigError};
use argh::FromArgs;
use std::collections::HashMap;
use std::path::PathBuf;

/// Bring up the rr1 robot in simulation: robot_state_publisher, spawn, controllers
#[derive(FromArgs, Debug)]
pub struct LaunchArgs {
    /// launch file to run instead of the built-in rr1 bringup
    #[argh(option)]
    pub launch_file: Option<PathBuf>,

    /// robot config (YAML: robot, namespace, description package, spawn pose)
    #[argh(option)]
    pub config: Option<PathBuf>,

    /// robot name (overrides the config)
    #[argh(option)]
    pub robot: Option<String>,

    /// robot namespace (overrides the config)
    #[argh(option)]
    pub namespace: Option<String>,

    /// override launch arguments (format: key:=value)
    #[argh(option, short = 'a', from_str_fn(parse_arg_override))]
    pub arg: Vec<(String, String)>,

    /// show launch plan without executing
    #[argh(switch)]
    pub dry_run: bool,

    /// write the launch plan as JSON to this path and exit
    #[argh(option)]
    pub record: Option<PathBuf>,

    /// validate the launch description and exit
    #[argh(switch)]
    pub validate: bool,

    /// log level (error, warn, info, debug, trace)
    #[argh(option, short = 'l', default = "String::from(\"info\")")]
    pub log_level: String,
}

/// Parse argument override in format "key:=value"
fn parse_arg_override(s: &str) -> Result<(String, String), String> {
    match s.split_once(":=") {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!(
            "Invalid argument format '{}'. Expected 'key:=value'",
            s
        )),
    }
}

impl LaunchArgs {
    /// Convert argument overrides to a HashMap
    pub fn arg_overrides(&self) -> HashMap<String, String> {
        self.arg.iter().cloned().collect()
    }

    /// Log filter, falling back to `info` for unknown levels
    pub fn log_filter(&self) -> &'static str {
        match self.log_level.to_lowercase().as_str() {
            "error" => "error",
            "warn" => "warn",
            "debug" => "debug",
            "trace" => "trace",
            _ => "info",
        }
    }

    /// Robot config from `--config`, with `--robot`/`--namespace` applied
    pub fn robot_config(&self) -> Result<RobotConfig, RobotConfigError> {
        let mut config = match &self.config {
            Some(path) => RobotConfig::from_file(path)?,
            None => RobotConfig::default(),
        };
        if let Some(robot) = &self.robot {
            config.robot = robot.clone();
        }
        if let Some(namespace) = &self.namespace {
            config.namespace = namespace.clone();
        }
        config.validate()?;
        Ok(config)
    }

    /// The launch file if given, otherwise the built-in bringup for `config`
    pub fn description(&self, config: &RobotConfig) -> Result<LaunchDescription, LaunchFileError> {
        match &self.launch_file {
            Some(path) => LaunchDescription::from_file(path),
            None => Ok(spawn_description(config)),
        }
    }

    /// The templated robot description the built-in bringup renders
    pub fn robot_description(&self, config: &RobotConfig) -> Option<RobotDescription> {
        match self.launch_file {
            Some(_) => None,
            None => Some(RobotDescription::from_config(config)),
        }
    }

    /// Robot options given alongside `--launch-file`, which has no use for them
    pub fn ignored_robot_options(&self) -> Vec<&'static str> {
        if self.launch_file.is_none() {
            return Vec::new();
        }
        [
            ("--config", self.config.is_some()),
            ("--robot", self.robot.is_some()),
            ("--namespace", self.namespace.is_some()),
        ]
        .into_iter()
        .filter_map(|(option, set)| set.then_some(option))
        .collect()
    }

    /// Where the description came from, for log messages
    pub fn source(&self) -> String {
        self.launch_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "built-in rr1 bringup".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bringup;

    fn parse(args: &[&str]) -> LaunchArgs {
        LaunchArgs::from_args(&["rr1_bringup"], args).unwrap()
    }

    #[test]
    fn test_parse_arg_override() {
        let result = parse_arg_override("use_sim_time:=false");
        assert_eq!(
            result,
            Ok(("use_sim_time".to_string(), "false".to_string()))
        );
    }

    #[test]
    fn test_parse_arg_override_with_equals() {
        let result = parse_arg_override("url:=http://localhost:8080");
        assert_eq!(
            result,
            Ok(("url".to_string(), "http://localhost:8080".to_string()))
        );
    }

    #[test]
    fn test_parse_arg_override_invalid() {
        assert!(parse_arg_override("invalid").is_err());
        assert!(parse_arg_override(":=value").is_err());
    }

    #[test]
    fn test_defaults() {
        let args = parse(&[]);
        assert!(!args.dry_run);
        assert_eq!(args.log_filter(), "info");
        assert_eq!(args.source(), "built-in rr1 bringup");

        let config = args.robot_config().unwrap();
        assert_eq!(config, RobotConfig::default());
        let description = args.description(&config).unwrap();
        assert_eq!(description.declaration_count(), 6);
    }

    #[test]
    fn test_namespace_override() {
        let args = parse(&["--namespace", "arm", "-a", "use_sim_time:=false", "-l", "DEBUG"]);
        assert_eq!(args.log_filter(), "debug");
        assert_eq!(
            args.arg_overrides(),
            HashMap::from([("use_sim_time".to_string(), "false".to_string())])
        );

        let config = args.robot_config().unwrap();
        let description = args.description(&config).unwrap();
        let spawner = &description.processes[bringup::JOINT_STATE_BROADCASTER];
        assert!(spawner
            .arguments
            .contains(&"/arm/controller_manager".to_string()));
    }

    #[test]
    fn test_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("robot.yaml");
        std::fs::write(&path, "namespace: left\nposition: [1.0, 0.0, 0.5]\n").unwrap();

        let args = parse(&["--config", path.to_str().unwrap(), "--robot", "rr2"]);
        let config = args.robot_config().unwrap();
        assert_eq!(config.robot, "rr2");
        assert_eq!(config.namespace, "left");
        assert_eq!(config.position, [1.0, 0.0, 0.5]);
    }

    #[test]
    fn test_robot_options_with_launch_file() {
        let args = parse(&["--namespace", "arm"]);
        assert!(args.ignored_robot_options().is_empty());
        assert!(args.robot_description(&RobotConfig::default()).is_some());

        let args = parse(&[
            "--launch-file",
            "launch/spawn_rr1.launch.yaml",
            "--robot",
            "rr2",
            "--namespace",
            "arm",
        ]);
        assert_eq!(args.ignored_robot_options(), vec!["--robot", "--namespace"]);
        assert!(args.robot_description(&RobotConfig::default()).is_none());
    }

    #[test]
    fn test_invalid_namespace_override() {
        let args = parse(&["--namespace", "r r"]);
        assert!(matches!(
            args.robot_config(),
            Err(RobotConfigError::Validation(_))
        ));
    }
}
