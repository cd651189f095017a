//! Agent orchestration: connect, deploy, serve, and shut down on faults
//! the agent cannot recover from.

use crate::config::{ConfigError, RepeaterConfig};
use crate::executor::RequestExecutor;
use crate::status::RunningStatus;
use parking_lot::Mutex;
use repeater_core::server_error::ErrorCode;
use repeater_core::{ServerError, WireResponse};
use repeater_events::{EventHandler, HandlerError, SubscriptionId};
use repeater_runners::{CommandHub, HttpRunner, WsRunner};
use repeater_transport::{
    ChannelError, ChannelEvent, ChannelEventKind, DeployOptions, Deployed, RepeaterChannel,
    RepeaterServer, RuntimeInfo, WsConnector,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("Repeater is already active")]
    AlreadyActive,

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Repeater was stopped during startup")]
    Stopped,
}

const SUBSCRIBED_EVENTS: [ChannelEventKind; 8] = [
    ChannelEventKind::Connected,
    ChannelEventKind::Disconnected,
    ChannelEventKind::Error,
    ChannelEventKind::ReconnectAttempt,
    ChannelEventKind::ReconnectionFailed,
    ChannelEventKind::ReconnectionSucceeded,
    ChannelEventKind::UpdateAvailable,
    ChannelEventKind::Request,
];

/// Server errors after which the agent shuts down.
pub fn is_critical(code: &ErrorCode) -> bool {
    matches!(
        code,
        ErrorCode::RepeaterDeactivated
            | ErrorCode::RepeaterNoLongerSupported
            | ErrorCode::RepeaterUnauthorized
            | ErrorCode::RepeaterAlreadyStarted
            | ErrorCode::RepeaterNotPermitted
            | ErrorCode::UnexpectedError
    )
}

pub struct RepeaterLauncher {
    server: Arc<dyn RepeaterServer>,
    executor: RequestExecutor,
    runtime: RuntimeInfo,
    status: Mutex<RunningStatus>,
    repeater_id: Mutex<Option<String>>,
    subscriptions: Mutex<Vec<SubscriptionId>>,
    /// `Connected` events seen since the last `connect`.
    sessions: AtomicU64,
}

impl RepeaterLauncher {
    pub fn new(server: Arc<dyn RepeaterServer>, executor: RequestExecutor) -> Arc<Self> {
        Arc::new(Self {
            server,
            executor,
            runtime: RuntimeInfo::current(env!("CARGO_PKG_VERSION")),
            status: Mutex::new(RunningStatus::Off),
            repeater_id: Mutex::new(None),
            subscriptions: Mutex::new(Vec::new()),
            sessions: AtomicU64::new(0),
        })
    }

    /// Build the WebSocket channel, both runners and the command hub.
    ///
    /// # Errors
    /// Returns error if the configuration holds an invalid URL.
    pub fn from_config(config: &RepeaterConfig) -> Result<Arc<Self>, ConfigError> {
        let channel = RepeaterChannel::new(config.channel_options()?, Arc::new(WsConnector::new()));

        let mut hub = CommandHub::new();
        hub.register(Arc::new(HttpRunner::new(config.http_runner_options()?)))
            .register(Arc::new(WsRunner::new(config.ws_runner_options()?)));

        Ok(Self::new(Arc::new(channel), RequestExecutor::new(hub)))
    }

    pub fn status(&self) -> RunningStatus {
        *self.status.lock()
    }

    pub fn repeater_id(&self) -> Option<String> {
        self.repeater_id.lock().clone()
    }

    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    /// Same as [`RepeaterLauncher::connect`].
    pub async fn start(self: &Arc<Self>, repeater_id: &str) -> Result<(), LaunchError> {
        self.connect(repeater_id).await
    }

    /// Connect and deploy. Any failure stops the agent again and is
    /// returned.
    ///
    /// # Errors
    /// Returns [`LaunchError::AlreadyActive`] unless the agent is off.
    pub async fn connect(self: &Arc<Self>, repeater_id: &str) -> Result<(), LaunchError> {
        {
            let mut status = self.status.lock();
            if *status != RunningStatus::Off {
                return Err(LaunchError::AlreadyActive);
            }
            *status = RunningStatus::Starting;
        }
        *self.repeater_id.lock() = Some(repeater_id.to_string());
        self.sessions.store(0, Ordering::SeqCst);

        info!("Starting repeater {}", repeater_id);
        self.subscribe();

        if let Err(e) = self.bring_up(repeater_id).await {
            error!("Failed to start repeater {}: {}", repeater_id, e);
            self.stop().await;
            return Err(e);
        }

        {
            let mut status = self.status.lock();
            if *status != RunningStatus::Starting {
                return Err(LaunchError::Stopped);
            }
            *status = RunningStatus::Running;
        }
        info!("Repeater {} is running", repeater_id);
        Ok(())
    }

    async fn bring_up(&self, repeater_id: &str) -> Result<(), LaunchError> {
        self.server.connect(repeater_id).await?;
        self.deploy(repeater_id).await?;
        Ok(())
    }

    async fn deploy(&self, repeater_id: &str) -> Result<Deployed, LaunchError> {
        let options = DeployOptions {
            repeater_id: repeater_id.to_string(),
        };
        Ok(self
            .server
            .deploy(options, Some(self.runtime.clone()))
            .await?)
    }

    /// Disconnect and drop subscriptions. Calling it again is a no-op.
    pub async fn stop(&self) {
        let previous = std::mem::replace(&mut *self.status.lock(), RunningStatus::Off);
        if previous == RunningStatus::Off {
            debug!("Repeater is already stopped");
            return;
        }

        let subscriptions = std::mem::take(&mut *self.subscriptions.lock());
        for id in subscriptions {
            self.server.off(id);
        }
        self.server.disconnect().await;
        info!("Repeater stopped");
    }

    fn subscribe(self: &Arc<Self>) {
        let launcher = Arc::downgrade(self);
        let handler: Arc<dyn EventHandler<ChannelEvent>> =
            Arc::new(move |event: ChannelEvent| dispatch(launcher.clone(), event));

        let ids: Vec<SubscriptionId> = SUBSCRIBED_EVENTS
            .iter()
            .map(|kind| self.server.on(*kind, handler.clone()))
            .collect();
        self.subscriptions.lock().extend(ids);
    }

    async fn handle(&self, event: ChannelEvent) -> Result<Option<WireResponse>, HandlerError> {
        match event {
            ChannelEvent::Connected => self.on_connected().await,
            ChannelEvent::Disconnected => warn!("Disconnected from the server"),
            ChannelEvent::Error(server_error) => self.on_server_error(server_error).await,
            ChannelEvent::ReconnectAttempt {
                attempt,
                max_attempts,
            } => warn!("Reconnecting to the server ({}/{})", attempt, max_attempts),
            ChannelEvent::ReconnectionFailed { error } => {
                error!(critical = true, "Unable to reconnect to the server: {}", error);
                self.stop().await;
            }
            ChannelEvent::ReconnectionSucceeded => info!("Reconnected to the server"),
            ChannelEvent::UpdateAvailable { version } => warn!(
                "A new Repeater version ({}) is available, please update the agent",
                version
            ),
            ChannelEvent::Request(request) => {
                let response = self.executor.execute(request).await?;
                return Ok(Some(response));
            }
        }
        Ok(None)
    }

    /// A new session loses the server-side registration, so every
    /// reconnection deploys again. The first session is deployed by
    /// `connect`, whenever its event arrives.
    async fn on_connected(&self) {
        if self.sessions.fetch_add(1, Ordering::SeqCst) == 0 {
            debug!("Initial session is deployed by connect");
            return;
        }
        if self.status() != RunningStatus::Running {
            debug!("Connected while starting up");
            return;
        }
        let Some(repeater_id) = self.repeater_id() else {
            return;
        };

        match self.deploy(&repeater_id).await {
            Ok(deployed) => info!("Repeater {} redeployed", deployed.repeater_id),
            Err(e) => error!("Failed to redeploy repeater {}: {}", repeater_id, e),
        }
    }

    async fn on_server_error(&self, server_error: ServerError) {
        let remediation = server_error.remediation.as_deref().unwrap_or_default();
        if is_critical(&server_error.code) {
            error!(
                critical = true,
                code = %server_error.code,
                remediation,
                "{}",
                server_error.message
            );
            self.stop().await;
        } else {
            error!(code = %server_error.code, remediation, "{}", server_error.message);
        }
    }
}

async fn dispatch(
    launcher: Weak<RepeaterLauncher>,
    event: ChannelEvent,
) -> Result<Option<WireResponse>, HandlerError> {
    match launcher.upgrade() {
        Some(launcher) => launcher.handle(event).await,
        None => Ok(None),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_critical_codes() {
        for code in [
            "REPEATER_DEACTIVATED",
            "REPEATER_NO_LONGER_SUPPORTED",
            "REPEATER_UNAUTHORIZED",
            "REPEATER_ALREADY_STARTED",
            "REPEATER_NOT_PERMITTED",
            "UNEXPECTED_ERROR",
        ] {
            assert!(is_critical(&ErrorCode::from(code)), "{} should be critical", code);
        }
        assert!(!is_critical(&ErrorCode::UnknownError));
        assert!(!is_critical(&ErrorCode::from("RATE_LIMITED")));
    }
}
