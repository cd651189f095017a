use crate::channel::ChannelError;
use crate::events::{ChannelEvent, ChannelEventKind};
use crate::protocol::{DeployOptions, Deployed, RuntimeInfo};
use async_trait::async_trait;
use repeater_events::{EventHandler, SubscriptionId};
use std::sync::Arc;

/// What the agent needs from its connection to the orchestration service.
#[async_trait]
pub trait RepeaterServer: Send + Sync {
    /// Open the channel for `repeater_id` and keep it alive until
    /// [`RepeaterServer::disconnect`].
    async fn connect(&self, repeater_id: &str) -> Result<(), ChannelError>;

    /// Close the channel, cancel timers and drop every subscription.
    async fn disconnect(&self);

    async fn deploy(
        &self,
        options: DeployOptions,
        runtime: Option<RuntimeInfo>,
    ) -> Result<Deployed, ChannelError>;

    fn on(
        &self,
        kind: ChannelEventKind,
        handler: Arc<dyn EventHandler<ChannelEvent>>,
    ) -> SubscriptionId;

    fn off(&self, id: SubscriptionId);
}
