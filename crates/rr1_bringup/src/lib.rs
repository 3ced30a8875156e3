//! rr1 simulation bringup
//!
//! Starts the rr1 robot in Gazebo the way a ROS 2 launch file would:
//! `robot_state_publisher` and the simulator spawn run from the start, and
//! the controller spawners are chained on process exit.
//!
//! # Overview
//!
//! - Declare the launch plan as data ([`LaunchDescription`]), built in
//!   ([`bringup::spawn_description`]) or loaded from YAML
//! - Resolve `$(var)`, `$(env)`, `$(find-pkg-share)` and `$(command)`
//!   substitutions
//! - Render the plan without running anything (dry-run, JSON record)
//! - Spawn the processes and start each one's dependents when it exits cleanly
//!
//! # Example Launch File
//!
//! ```yaml
//! version: "1.0"
//!
//! args:
//!   use_sim_time:
//!     default: true
//!
//! processes:
//!   spawn_entity:
//!     package: gazebo_ros
//!     executable: spawn_entity.py
//!     arguments: ["-entity", "rr1-rr1", "-topic", "/rr1/robot_description"]
//!     output: screen
//!
//!   joint_state_broadcaster:
//!     package: controller_manager
//!     executable: spawner
//!     arguments: ["joint_state_broadcaster", "--controller-manager", "/rr1/controller_manager"]
//!
//! event_handlers:
//!   - on_process_exit:
//!       target_action: spawn_entity
//!       on_exit: [joint_state_broadcaster]
//! ```

pub mod bringup;
pub mod cli;
pub mod config;
pub mod runtime;

pub use bringup::{spawn_description, BringupError, RobotDescription};
pub use cli::LaunchArgs;
pub use config::{
    AmentIndex, LaunchDescription, LaunchFileError, ProcessSpec, RobotConfig, RobotConfigError,
    SubstitutionContext, SubstitutionError,
};
pub use runtime::{
    DependencyError, DependencyGraph, Executor, ExecutorConfig, ExecutorError, LaunchEvent,
    LaunchPlan, ManagedProcess, NodeCommand, NodeError, ProcessConfig, ProcessError,
    ProcessEvent, ProcessStatus,
};
