//! The rr1 simulation bringup.
//!
//! Starts `robot_state_publisher` and the simulator spawn together, then
//! chains the controller spawners on process exit:
//!
//! ```text
//! robot_state_publisher
//! spawn_entity ──exit──▶ joint_state_broadcaster ──exit──▶ forward_position_controller (inactive)
//!                                                   └─────▶ joint_trajectory_controller
//! ```

use crate::config::{
    AmentIndex, ArgDefinition, ArgValue, EventHandler, LaunchDescription, OutputMode,
    ProcessSpec, RobotConfig,
};
use std::path::PathBuf;

pub const USE_SIM_TIME: &str = "use_sim_time";

pub const ROBOT_STATE_PUBLISHER: &str = "robot_state_publisher";
pub const SPAWN_ENTITY: &str = "spawn_entity";
pub const JOINT_STATE_BROADCASTER: &str = "joint_state_broadcaster";
pub const FORWARD_POSITION_CONTROLLER: &str = "forward_position_controller";
pub const JOINT_TRAJECTORY_CONTROLLER: &str = "joint_trajectory_controller";

/// Templated robot description located through a package share directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RobotDescription {
    pub package: String,
    pub file: String,
}

impl RobotDescription {
    pub fn from_config(config: &RobotConfig) -> Self {
        Self {
            package: config.description_package.clone(),
            file: config.description_file(),
        }
    }

    /// Path expression, resolved when the plan is built
    pub fn path_expr(&self) -> String {
        format!("$(find-pkg-share {})/urdf/{}", self.package, self.file)
    }

    /// Xacro invocation rendering the description for `namespace`
    pub fn xacro_command(&self, namespace: &str) -> String {
        format!("$(command xacro {} ns:={})", self.path_expr(), namespace)
    }

    /// Find the description file on disk
    pub fn locate(&self, ament: &AmentIndex) -> Result<PathBuf, BringupError> {
        let share = ament
            .package_share(&self.package)
            .ok_or_else(|| BringupError::PackageNotFound(self.package.clone()))?;
        let path = share.join("urdf").join(&self.file);
        if !path.is_file() {
            return Err(BringupError::DescriptionMissing(path));
        }
        Ok(path)
    }
}

/// `/<namespace>/controller_manager`
pub fn controller_manager_path(namespace: &str) -> String {
    let ns = namespace.trim().trim_matches('/');
    if ns.is_empty() {
        "/controller_manager".to_string()
    } else {
        format!("/{}/controller_manager", ns)
    }
}

/// A `controller_manager` spawner for one controller
pub fn spawner(controller: &str, namespace: &str, inactive: bool) -> ProcessSpec {
    let mut arguments = Vec::with_capacity(4);
    if inactive {
        arguments.push("--inactive".to_string());
    }
    arguments.push(controller.to_string());
    arguments.push("--controller-manager".to_string());
    arguments.push(controller_manager_path(namespace));

    ProcessSpec::node("controller_manager", "spawner").with_arguments(arguments)
}

fn spawn_entity(config: &RobotConfig) -> ProcessSpec {
    let ns = config.bare_namespace();
    let [x, y, z] = config.position;
    let [roll, pitch, yaw] = config.orientation;

    let mut arguments = vec![
        "-entity".to_string(),
        format!("{}-{}", config.robot, ns),
    ];
    for (flag, value) in [
        ("-x", x),
        ("-y", y),
        ("-z", z),
        ("-R", roll),
        ("-P", pitch),
        ("-Y", yaw),
    ] {
        arguments.push(flag.to_string());
        arguments.push(format!("{:?}", value));
    }
    arguments.push("-topic".to_string());
    arguments.push(format!("/{}/robot_description", ns));

    ProcessSpec::node(&config.simulator_package, "spawn_entity.py")
        .with_name(SPAWN_ENTITY)
        .with_output(OutputMode::Screen)
        .with_arguments(arguments)
}

/// Build the launch description for one robot
pub fn spawn_description(config: &RobotConfig) -> LaunchDescription {
    let ns = config.bare_namespace();
    let description = RobotDescription::from_config(config);

    let robot_state_publisher = ProcessSpec::node(ROBOT_STATE_PUBLISHER, ROBOT_STATE_PUBLISHER)
        .with_namespace(ns)
        .with_output(OutputMode::Both)
        .with_parameter(USE_SIM_TIME, format!("$(var {})", USE_SIM_TIME))
        .with_parameter("robot_description", description.xacro_command(ns));

    LaunchDescription::new()
        .declare_argument(
            USE_SIM_TIME,
            ArgDefinition::new(ArgValue::Bool(true))
                .with_description("Use simulation (Gazebo) clock if true"),
        )
        .add_process(ROBOT_STATE_PUBLISHER, robot_state_publisher)
        .add_process(SPAWN_ENTITY, spawn_entity(config))
        .add_process(
            JOINT_STATE_BROADCASTER,
            spawner(JOINT_STATE_BROADCASTER, ns, false),
        )
        .add_process(
            FORWARD_POSITION_CONTROLLER,
            spawner(FORWARD_POSITION_CONTROLLER, ns, true),
        )
        .add_process(
            JOINT_TRAJECTORY_CONTROLLER,
            spawner(JOINT_TRAJECTORY_CONTROLLER, ns, false),
        )
        .register_event_handler(EventHandler::on_process_exit(
            SPAWN_ENTITY,
            [JOINT_STATE_BROADCASTER],
        ))
        .register_event_handler(EventHandler::on_process_exit(
            JOINT_STATE_BROADCASTER,
            [FORWARD_POSITION_CONTROLLER],
        ))
        .register_event_handler(EventHandler::on_process_exit(
            JOINT_STATE_BROADCASTER,
            [JOINT_TRAJECTORY_CONTROLLER],
        ))
}

#[derive(Debug, thiserror::Error)]
pub enum BringupError {
    #[error("Description package '{0}' not found. Ensure the package is installed and sourced.")]
    PackageNotFound(String),

    #[error("Robot description not found at {}", .0.display())]
    DescriptionMissing(PathBuf),
}
