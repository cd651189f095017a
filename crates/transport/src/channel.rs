//! Reconnecting control channel.
//!
//! A supervisor task owns the session and both retry counters. It emits
//! lifecycle events through the channel's [`EventHub`] and answers inbound
//! request events with whatever the subscribed handler replies.

use crate::backoff::Backoff;
use crate::connector::{ConnectError, ConnectParams, Connector};
use crate::events::{ChannelEvent, ChannelEventKind};
use crate::protocol::{
    CloseCause, DeployOptions, DeployPayload, Deployed, Envelope, Link, LinkEvent, RuntimeInfo,
    UpdateAvailable, EVENT_DEPLOY, EVENT_DEPLOYED, EVENT_ERROR, EVENT_PING, EVENT_REQUEST,
    EVENT_UPDATE_AVAILABLE,
};
use crate::server::RepeaterServer;
use async_trait::async_trait;
use parking_lot::Mutex;
use repeater_core::server_error::ErrorCode;
use repeater_core::{Protocol, ServerError, WireRequest, WireResponse};
use repeater_events::{EventHandler, EventHub, Reply, SubscriptionId};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_RECONNECT_DELAY_MAX: Duration = Duration::from_secs(86_400);
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 20;
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_DEPLOY_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Channel is already connected")]
    AlreadyConnected,

    #[error("Channel is not connected")]
    NotConnected,

    #[error("A deployment is already in progress")]
    DeployInFlight,

    #[error("No deployment acknowledgement within {0:?}")]
    DeployTimeout(Duration),

    #[error("Connection rejected: {0}")]
    Rejected(ServerError),

    #[error("Reconnection failed: {0}")]
    ReconnectionFailed(String),

    #[error("Channel closed")]
    Closed,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct ChannelOptions {
    pub uri: Url,
    pub token: String,
    pub connect_timeout: Duration,
    pub reconnect_delay: Duration,
    pub reconnect_delay_max: Duration,
    /// Cap shared by coded rejections and transport drops.
    pub reconnect_attempts: u32,
    pub ping_interval: Duration,
    pub deploy_timeout: Duration,
    pub proxy_url: Option<Url>,
}

impl ChannelOptions {
    pub fn new(uri: Url, token: impl Into<String>) -> Self {
        Self {
            uri,
            token: token.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            reconnect_delay_max: DEFAULT_RECONNECT_DELAY_MAX,
            reconnect_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            ping_interval: DEFAULT_PING_INTERVAL,
            deploy_timeout: DEFAULT_DEPLOY_TIMEOUT,
            proxy_url: None,
        }
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.reconnect_delay, self.reconnect_delay_max)
    }
}

#[derive(Default)]
struct ChannelState {
    supervisor: Option<JoinHandle<()>>,
    ping: Option<JoinHandle<()>>,
    outbound: Option<mpsc::UnboundedSender<Envelope>>,
    pending_deploy: Option<oneshot::Sender<Deployed>>,
}

pub struct RepeaterChannel {
    options: ChannelOptions,
    connector: Arc<dyn Connector>,
    events: Arc<EventHub<ChannelEvent>>,
    state: Arc<Mutex<ChannelState>>,
}

impl RepeaterChannel {
    pub fn new(options: ChannelOptions, connector: Arc<dyn Connector>) -> Self {
        Self {
            options,
            connector,
            events: Arc::new(EventHub::new()),
            state: Arc::new(Mutex::new(ChannelState::default())),
        }
    }

    pub fn options(&self) -> &ChannelOptions {
        &self.options
    }

    pub fn events(&self) -> &Arc<EventHub<ChannelEvent>> {
        &self.events
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().outbound.is_some()
    }

    pub fn is_pinging(&self) -> bool {
        self.state
            .lock()
            .ping
            .as_ref()
            .is_some_and(|ping| !ping.is_finished())
    }

    fn start_ping(&self) {
        let mut state = self.state.lock();
        let Some(outbound) = state.outbound.clone() else {
            return;
        };
        if let Some(previous) = state.ping.take() {
            previous.abort();
        }

        let every = self.options.ping_interval;
        if every.is_zero() {
            warn!("Ping interval is zero, liveness ping disabled");
            return;
        }
        state.ping = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if outbound.send(Envelope::event(EVENT_PING, Value::Null)).is_err() {
                    break;
                }
            }
        }));
    }
}

#[async_trait]
impl RepeaterServer for RepeaterChannel {
    async fn connect(&self, repeater_id: &str) -> Result<(), ChannelError> {
        let (ready_tx, ready_rx) = oneshot::channel();
        {
            let mut state = self.state.lock();
            if state
                .supervisor
                .as_ref()
                .is_some_and(|supervisor| !supervisor.is_finished())
            {
                return Err(ChannelError::AlreadyConnected);
            }

            let supervisor = Supervisor {
                params: ConnectParams {
                    uri: self.options.uri.clone(),
                    token: self.options.token.clone(),
                    repeater_id: repeater_id.to_string(),
                    proxy_url: self.options.proxy_url.clone(),
                },
                options: self.options.clone(),
                connector: self.connector.clone(),
                events: self.events.clone(),
                state: self.state.clone(),
                ready: Some(ready_tx),
            };
            state.supervisor = Some(tokio::spawn(supervisor.run()));
        }

        info!("Connecting to {}", self.options.uri);
        ready_rx.await.map_err(|_| ChannelError::Closed)?
    }

    async fn disconnect(&self) {
        let (supervisor, ping, outbound) = {
            let mut state = self.state.lock();
            state.pending_deploy = None;
            (
                state.supervisor.take(),
                state.ping.take(),
                state.outbound.take(),
            )
        };

        if let Some(ping) = ping {
            ping.abort();
        }
        if let Some(supervisor) = supervisor {
            supervisor.abort();
        }
        if let Some(outbound) = outbound {
            let _ = outbound.send(Envelope::Disconnect {
                reason: Some("client disconnect".to_string()),
            });
        }
        self.events.remove_all();
        info!("Disconnected from {}", self.options.uri);
    }

    async fn deploy(
        &self,
        options: DeployOptions,
        runtime: Option<RuntimeInfo>,
    ) -> Result<Deployed, ChannelError> {
        let data = serde_json::to_value(DeployPayload {
            repeater_id: &options.repeater_id,
            runtime: runtime.as_ref(),
        })?;

        let (deployed_tx, deployed_rx) = oneshot::channel();
        {
            let mut state = self.state.lock();
            let outbound = state.outbound.clone().ok_or(ChannelError::NotConnected)?;
            if state
                .pending_deploy
                .as_ref()
                .is_some_and(|pending| !pending.is_closed())
            {
                return Err(ChannelError::DeployInFlight);
            }
            outbound
                .send(Envelope::event(EVENT_DEPLOY, data))
                .map_err(|_| ChannelError::NotConnected)?;
            state.pending_deploy = Some(deployed_tx);
        }

        debug!("Deploying repeater {}", options.repeater_id);
        let deployed = match tokio::time::timeout(self.options.deploy_timeout, deployed_rx).await {
            Ok(Ok(deployed)) => deployed,
            Ok(Err(_)) => return Err(ChannelError::Closed),
            Err(_) => {
                self.state.lock().pending_deploy = None;
                return Err(ChannelError::DeployTimeout(self.options.deploy_timeout));
            }
        };

        info!("Repeater {} deployed", deployed.repeater_id);
        self.start_ping();
        Ok(deployed)
    }

    fn on(
        &self,
        kind: ChannelEventKind,
        handler: Arc<dyn EventHandler<ChannelEvent>>,
    ) -> SubscriptionId {
        self.events.on(kind, handler)
    }

    fn off(&self, id: SubscriptionId) {
        self.events.off(id);
    }
}

/// Rejections that are reported but never retried from here.
fn is_suppressed(code: &ErrorCode) -> bool {
    matches!(
        code,
        ErrorCode::RepeaterUnauthorized | ErrorCode::RepeaterNotPermitted
    )
}

struct Supervisor {
    params: ConnectParams,
    options: ChannelOptions,
    connector: Arc<dyn Connector>,
    events: Arc<EventHub<ChannelEvent>>,
    state: Arc<Mutex<ChannelState>>,
    ready: Option<oneshot::Sender<Result<(), ChannelError>>>,
}

impl Supervisor {
    async fn run(mut self) {
        let backoff = self.options.backoff();
        let max_attempts = self.options.reconnect_attempts;
        // Scheduled after coded rejections.
        let mut attempts: u32 = 0;
        // Scheduled after transport failures.
        let mut drops: u32 = 0;

        loop {
            let failure = match self.open().await {
                Ok(link) => {
                    attempts = 0;
                    if drops > 0 {
                        info!("Reconnected after {} attempt(s)", drops);
                        self.events.emit(ChannelEvent::ReconnectionSucceeded, None);
                        drops = 0;
                    }
                    match self.serve(link).await {
                        CloseCause::Server(reason) => {
                            info!(
                                "Server closed the channel ({}), reconnecting",
                                reason.as_deref().unwrap_or("no reason")
                            );
                            continue;
                        }
                        CloseCause::Transport(reason) => {
                            warn!("Channel dropped: {}", reason);
                            reason
                        }
                    }
                }
                Err(ConnectError::Rejected(server_error)) => {
                    warn!("Connection rejected: {}", server_error);
                    self.events
                        .emit(ChannelEvent::Error(server_error.clone()), None);

                    if is_suppressed(&server_error.code) {
                        self.resolve(Err(ChannelError::Rejected(server_error)));
                        return;
                    }
                    if attempts >= max_attempts {
                        self.give_up(server_error.to_string());
                        return;
                    }

                    let delay = backoff.delay(attempts);
                    attempts += 1;
                    debug!(
                        "Next connection attempt ({}/{}) in {:?}",
                        attempts, max_attempts, delay
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                Err(ConnectError::Transport(reason)) => {
                    warn!("Connection failed: {}", reason);
                    reason
                }
            };

            if drops >= max_attempts {
                self.give_up(failure);
                return;
            }
            let delay = backoff.delay(drops);
            drops += 1;
            self.events.emit(
                ChannelEvent::ReconnectAttempt {
                    attempt: drops,
                    max_attempts,
                },
                None,
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn open(&self) -> Result<Link, ConnectError> {
        match tokio::time::timeout(self.options.connect_timeout, self.connector.open(&self.params))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(ConnectError::Transport(format!(
                "Connection timed out after {:?}",
                self.options.connect_timeout
            ))),
        }
    }

    async fn serve(&mut self, link: Link) -> CloseCause {
        let Link {
            outbound,
            mut inbound,
        } = link;

        self.state.lock().outbound = Some(outbound.clone());
        self.resolve(Ok(()));
        info!("Connected to {}", self.params.uri);
        self.events.emit(ChannelEvent::Connected, None);

        let cause = loop {
            match inbound.recv().await {
                Some(LinkEvent::Message(envelope)) => self.handle(envelope, &outbound),
                Some(LinkEvent::Closed(cause)) => break cause,
                None => break CloseCause::Transport("link closed".into()),
            }
        };

        {
            let mut state = self.state.lock();
            state.outbound = None;
            state.pending_deploy = None;
            if let Some(ping) = state.ping.take() {
                ping.abort();
            }
        }
        self.events.emit(ChannelEvent::Disconnected, None);
        cause
    }

    fn handle(&self, envelope: Envelope, outbound: &mpsc::UnboundedSender<Envelope>) {
        let Envelope::Event { event, data, ack } = envelope else {
            debug!("Ignoring frame {:?}", envelope);
            return;
        };

        match event.as_str() {
            EVENT_DEPLOYED => match serde_json::from_value::<Deployed>(data) {
                Ok(deployed) => match self.state.lock().pending_deploy.take() {
                    Some(pending) => {
                        let _ = pending.send(deployed);
                    }
                    None => debug!("Unsolicited deployed event for {}", deployed.repeater_id),
                },
                Err(e) => warn!("Malformed deployed event: {}", e),
            },
            EVENT_ERROR => match serde_json::from_value::<ServerError>(data) {
                Ok(server_error) => self.events.emit(ChannelEvent::Error(server_error), None),
                Err(e) => warn!("Malformed error event: {}", e),
            },
            EVENT_UPDATE_AVAILABLE => match serde_json::from_value::<UpdateAvailable>(data) {
                Ok(update) => self.events.emit(
                    ChannelEvent::UpdateAvailable {
                        version: update.version,
                    },
                    None,
                ),
                Err(e) => warn!("Malformed update-available event: {}", e),
            },
            EVENT_REQUEST => self.handle_request(data, ack, outbound),
            other => debug!("Ignoring unknown event '{}'", other),
        }
    }

    fn handle_request(
        &self,
        data: Value,
        ack: Option<u64>,
        outbound: &mpsc::UnboundedSender<Envelope>,
    ) {
        let Some(ack) = ack else {
            warn!("Dropping request event without acknowledgement id");
            return;
        };

        let request = match serde_json::from_value::<WireRequest>(data.clone()) {
            Ok(request) => request,
            Err(e) => {
                warn!("Malformed request event: {}", e);
                let protocol = data
                    .get("protocol")
                    .and_then(|p| serde_json::from_value::<Protocol>(p.clone()).ok())
                    .unwrap_or(Protocol::Http);
                send_ack(
                    outbound,
                    ack,
                    WireResponse::failed(protocol, "EINVAL", e.to_string()),
                );
                return;
            }
        };

        let (reply, answer) = Reply::channel();
        self.events.emit(ChannelEvent::Request(request), Some(reply));

        let outbound = outbound.clone();
        tokio::spawn(async move {
            match answer.await {
                Ok(response) => send_ack(&outbound, ack, response),
                Err(_) => warn!("Request {} finished without a response", ack),
            }
        });
    }

    fn resolve(&mut self, result: Result<(), ChannelError>) {
        if let Some(ready) = self.ready.take() {
            let _ = ready.send(result);
        }
    }

    fn give_up(&mut self, reason: String) {
        error!("Giving up reconnecting: {}", reason);
        self.events.emit(
            ChannelEvent::ReconnectionFailed {
                error: reason.clone(),
            },
            None,
        );
        self.resolve(Err(ChannelError::ReconnectionFailed(reason)));
    }
}

fn send_ack(outbound: &mpsc::UnboundedSender<Envelope>, ack: u64, response: WireResponse) {
    match serde_json::to_value(&response) {
        Ok(data) => {
            if outbound.send(Envelope::Ack { ack, data }).is_err() {
                debug!("Channel closed before request {} was acknowledged", ack);
            }
        }
        Err(e) => error!("Cannot serialize response for request {}: {}", ack, e),
    }
}
