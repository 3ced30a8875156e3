//! Robot bringup configuration

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Which robot to bring up and where to place it in the world.
///
/// Every field has a default, so a config file only needs the values that
/// differ from the stock rr1 setup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotConfig {
    /// Robot name, used for the spawned entity
    pub robot: String,
    /// ROS namespace for the robot's nodes and controller manager
    pub namespace: String,
    /// Package holding the robot description
    pub description_package: String,
    /// Xacro file under `<share>/urdf/`; defaults to `<robot>.urdf.xacro`
    pub description_file: Option<String>,
    /// Package providing `spawn_entity.py`
    pub simulator_package: String,
    /// Spawn position (x, y, z) in meters
    pub position: [f64; 3],
    /// Spawn orientation (roll, pitch, yaw) in radians
    pub orientation: [f64; 3],
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            robot: "rr1".to_string(),
            namespace: "rr1".to_string(),
            description_package: "rr1_description".to_string(),
            description_file: None,
            simulator_package: "gazebo_ros".to_string(),
            position: [0.0; 3],
            orientation: [0.0; 3],
        }
    }
}

impl RobotConfig {
    /// Load from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RobotConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| RobotConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, RobotConfigError> {
        let config: RobotConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), RobotConfigError> {
        if self.robot.trim().is_empty() {
            return Err(RobotConfigError::Validation(
                "robot name must not be empty".to_string(),
            ));
        }
        if self.namespace.contains(char::is_whitespace) {
            return Err(RobotConfigError::Validation(format!(
                "namespace '{}' must not contain whitespace",
                self.namespace
            )));
        }
        if self
            .position
            .iter()
            .chain(self.orientation.iter())
            .any(|v| !v.is_finite())
        {
            return Err(RobotConfigError::Validation(
                "spawn pose must be finite".to_string(),
            ));
        }
        Ok(())
    }

    /// Description file name, `<robot>.urdf.xacro` unless overridden
    pub fn description_file(&self) -> String {
        self.description_file
            .clone()
            .unwrap_or_else(|| format!("{}.urdf.xacro", self.robot))
    }

    /// Namespace without surrounding slashes
    pub fn bare_namespace(&self) -> &str {
        self.namespace.trim().trim_matches('/')
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RobotConfigError {
    #[error("Failed to read robot config '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse robot config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid robot config: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_rr1() {
        let config = RobotConfig::default();
        assert_eq!(config.robot, "rr1");
        assert_eq!(config.namespace, "rr1");
        assert_eq!(config.description_file(), "rr1.urdf.xacro");
        assert_eq!(config.simulator_package, "gazebo_ros");
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = RobotConfig::from_yaml(
            r#"
namespace: arm_left
position: [1.0, -0.5, 0.2]
"#,
        )
        .unwrap();
        assert_eq!(config.robot, "rr1");
        assert_eq!(config.namespace, "arm_left");
        assert_eq!(config.position, [1.0, -0.5, 0.2]);
        assert_eq!(config.orientation, [0.0; 3]);
    }

    #[test]
    fn test_bare_namespace() {
        let config = RobotConfig {
            namespace: "/rr1/".to_string(),
            ..Default::default()
        };
        assert_eq!(config.bare_namespace(), "rr1");
    }

    #[test]
    fn test_invalid_namespace() {
        let result = RobotConfig::from_yaml("namespace: \"rr 1\"");
        assert!(matches!(result, Err(RobotConfigError::Validation(_))));
    }
}
