//! Runtime components for process management

pub mod dependency;
pub mod executor;
pub mod node;
pub mod process;

pub use dependency::*;
pub use executor::*;
pub use node::*;
pub use process::*;
