//! Virtual controller emulation daemon
//!
//! Assembles the workspace crates into a running emulator: four TCP
//! interfaces (control, command, link, low-energy link), a serialized
//! execution context for every callback, and a text control protocol for
//! steering the run. The controller itself is injected behind
//! [`ControllerModel`]; [`SimController`] is the in-tree recording model.

pub mod config;
pub mod environment;
pub mod model;

pub use config::Config;
pub use environment::Environment;
pub use model::{ControllerModel, SharedModel, SimController};
