//! Frames exchanged over the control channel.
//!
//! Every frame is one JSON text message tagged by `type`. Named events
//! may carry an `ack` id; the peer answers those with an `ack` frame
//! holding the same id.

use repeater_core::ServerError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

pub const EVENT_DEPLOY: &str = "deploy";
pub const EVENT_DEPLOYED: &str = "deployed";
pub const EVENT_ERROR: &str = "error";
pub const EVENT_PING: &str = "ping";
pub const EVENT_REQUEST: &str = "request";
pub const EVENT_UPDATE_AVAILABLE: &str = "update-available";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    Connected,
    ConnectError {
        error: ServerError,
    },
    Event {
        event: String,
        #[serde(default)]
        data: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ack: Option<u64>,
    },
    Ack {
        ack: u64,
        #[serde(default)]
        data: Value,
    },
    Disconnect {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl Envelope {
    pub fn event(event: impl Into<String>, data: Value) -> Self {
        Envelope::Event {
            event: event.into(),
            data,
            ack: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseCause {
    /// The service ended the session on purpose.
    Server(Option<String>),
    /// The socket failed underneath us.
    Transport(String),
}

#[derive(Debug)]
pub enum LinkEvent {
    Message(Envelope),
    Closed(CloseCause),
}

/// One open session. Dropping `outbound` or sending
/// [`Envelope::Disconnect`] closes it.
#[derive(Debug)]
pub struct Link {
    pub outbound: mpsc::UnboundedSender<Envelope>,
    pub inbound: mpsc::UnboundedReceiver<LinkEvent>,
}

impl Link {
    /// Paired link for in-process peers: the returned ends belong to the
    /// remote side.
    pub fn pair() -> (
        Self,
        mpsc::UnboundedReceiver<Envelope>,
        mpsc::UnboundedSender<LinkEvent>,
    ) {
        let (outbound, remote_rx) = mpsc::unbounded_channel();
        let (remote_tx, inbound) = mpsc::unbounded_channel();
        (Self { outbound, inbound }, remote_rx, remote_tx)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployOptions {
    pub repeater_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployed {
    pub repeater_id: String,
}

/// Build information announced with every deploy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeInfo {
    pub version: String,
    pub os: String,
    pub arch: String,
}

impl RuntimeInfo {
    pub fn current(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct DeployPayload<'a> {
    pub repeater_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime: Option<&'a RuntimeInfo>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UpdateAvailable {
    pub version: String,
}
