//! Lifecycle and business events raised by the channel.

use repeater_core::{ServerError, WireRequest, WireResponse};
use repeater_events::Event;

#[derive(Debug, Clone)]
pub enum ChannelEvent {
    Connected,
    Disconnected,
    Error(ServerError),
    ReconnectAttempt { attempt: u32, max_attempts: u32 },
    ReconnectionFailed { error: String },
    ReconnectionSucceeded,
    UpdateAvailable { version: String },
    /// Remote call to execute. Answered through the reply sink.
    Request(WireRequest),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelEventKind {
    Connected,
    Disconnected,
    Error,
    ReconnectAttempt,
    ReconnectionFailed,
    ReconnectionSucceeded,
    UpdateAvailable,
    Request,
}

impl Event for ChannelEvent {
    type Kind = ChannelEventKind;
    type Reply = WireResponse;

    fn kind(&self) -> ChannelEventKind {
        match self {
            ChannelEvent::Connected => ChannelEventKind::Connected,
            ChannelEvent::Disconnected => ChannelEventKind::Disconnected,
            ChannelEvent::Error(_) => ChannelEventKind::Error,
            ChannelEvent::ReconnectAttempt { .. } => ChannelEventKind::ReconnectAttempt,
            ChannelEvent::ReconnectionFailed { .. } => ChannelEventKind::ReconnectionFailed,
            ChannelEvent::ReconnectionSucceeded => ChannelEventKind::ReconnectionSucceeded,
            ChannelEvent::UpdateAvailable { .. } => ChannelEventKind::UpdateAvailable,
            ChannelEvent::Request(_) => ChannelEventKind::Request,
        }
    }
}
