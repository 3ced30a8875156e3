//! Launch description, robot configuration and substitution

mod ament;
mod launch_file;
mod robot;
mod substitution;

pub use ament::*;
pub use launch_file::*;
pub use robot::*;
pub use substitution::*;
