//! Control channel between the agent and the orchestration service.
//!
//! One authenticated WebSocket carries lifecycle frames, the deploy
//! handshake, liveness pings and inbound "execute request" events. The
//! channel reconnects on its own; callers observe that through
//! [`ChannelEvent`]s.

pub mod backoff;
pub mod channel;
pub mod connector;
pub mod events;
pub mod protocol;
pub mod server;
pub mod ws_connector;

pub use backoff::Backoff;
pub use channel::{ChannelError, ChannelOptions, RepeaterChannel};
pub use connector::{ConnectError, ConnectParams, Connector};
pub use events::{ChannelEvent, ChannelEventKind};
pub use protocol::{CloseCause, DeployOptions, Deployed, Envelope, Link, LinkEvent, RuntimeInfo};
pub use server::RepeaterServer;
pub use ws_connector::WsConnector;
