//! Protocol runners that execute remote requests against local targets,
//! and the hub that picks one per request.

pub mod command_hub;
pub mod http;
pub mod runner;
pub mod ws;

pub use command_hub::{CommandError, CommandHub};
pub use http::{HttpRunner, HttpRunnerOptions};
pub use runner::RequestRunner;
pub use ws::{WsRunner, WsRunnerOptions};
