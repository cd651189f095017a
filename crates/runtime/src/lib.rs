//! Repeater agent runtime.
//!
//! Wires the control channel to the request runners and drives the agent
//! through connect, deploy and serve.

pub mod config;
pub mod executor;
pub mod launcher;
pub mod logging;
pub mod status;

pub use config::{load_config, ConfigError, RepeaterConfig};
pub use executor::RequestExecutor;
pub use launcher::{LaunchError, RepeaterLauncher};
pub use logging::init_logging;
pub use status::RunningStatus;
