//! Event hub with per-handler failure isolation and request/reply support.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::error;

/// A typed event carried by an [`EventHub`].
pub trait Event: Clone + fmt::Debug + Send + Sync + 'static {
    /// Discriminant handlers subscribe to.
    type Kind: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static;
    /// Value a handler may return to acknowledge the event.
    type Reply: Send + 'static;

    fn kind(&self) -> Self::Kind;
}

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

#[async_trait]
pub trait EventHandler<E: Event>: Send + Sync {
    /// Handle one event. `Ok(Some(_))` answers the event's reply sink, if any.
    async fn handle(&self, event: E) -> Result<Option<E::Reply>, HandlerError>;
}

#[async_trait]
impl<E, F, Fut> EventHandler<E> for F
where
    E: Event,
    F: Fn(E) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<E::Reply>, HandlerError>> + Send + 'static,
{
    async fn handle(&self, event: E) -> Result<Option<E::Reply>, HandlerError> {
        (self)(event).await
    }
}

/// Acknowledgement sink travelling with an event.
pub struct Reply<R> {
    tx: oneshot::Sender<R>,
}

impl<R> Reply<R> {
    pub fn channel() -> (Self, oneshot::Receiver<R>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }
}

impl<R> fmt::Debug for Reply<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Reply")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Debug)]
pub enum FailureCause {
    Error(HandlerError),
    Panicked(String),
    Cancelled,
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::Error(e) => write!(f, "{}", e),
            FailureCause::Panicked(msg) => write!(f, "handler panicked: {}", msg),
            FailureCause::Cancelled => f.write_str("handler cancelled"),
        }
    }
}

/// A handler failure as delivered to the error sink.
#[derive(Debug)]
pub struct HandlerFailure<E: Event> {
    pub kind: E::Kind,
    pub event: E,
    pub cause: FailureCause,
}

pub type ErrorSink<E> = Arc<dyn Fn(HandlerFailure<E>) + Send + Sync>;

struct Registration<E: Event> {
    id: SubscriptionId,
    kind: E::Kind,
    handler: Arc<dyn EventHandler<E>>,
}

pub struct EventHub<E: Event> {
    registrations: RwLock<Vec<Registration<E>>>,
    next_id: AtomicU64,
    error_sink: RwLock<ErrorSink<E>>,
}

impl<E: Event> EventHub<E> {
    pub fn new() -> Self {
        Self::with_error_sink(Arc::new(log_failure::<E>))
    }

    pub fn with_error_sink(sink: ErrorSink<E>) -> Self {
        Self {
            registrations: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            error_sink: RwLock::new(sink),
        }
    }

    pub fn set_error_sink(&self, sink: ErrorSink<E>) {
        *self.error_sink.write() = sink;
    }

    pub fn on(&self, kind: E::Kind, handler: Arc<dyn EventHandler<E>>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.registrations.write().push(Registration { id, kind, handler });
        id
    }

    /// Remove one subscription. Returns whether it was registered.
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut registrations = self.registrations.write();
        let before = registrations.len();
        registrations.retain(|r| r.id != id);
        before != registrations.len()
    }

    pub fn remove_all(&self) {
        self.registrations.write().clear();
    }

    pub fn listener_count(&self, kind: E::Kind) -> usize {
        self.registrations
            .read()
            .iter()
            .filter(|r| r.kind == kind)
            .count()
    }

    /// Deliver `event` in the background. Must be called inside a Tokio runtime.
    pub fn emit(&self, event: E, reply: Option<Reply<E::Reply>>) {
        let handlers = self.handlers_for(event.kind());
        let sink = self.error_sink.read().clone();
        tokio::spawn(deliver(handlers, sink, event, reply));
    }

    /// Deliver `event` and wait until every handler has finished.
    pub async fn dispatch(&self, event: E, reply: Option<Reply<E::Reply>>) {
        let handlers = self.handlers_for(event.kind());
        let sink = self.error_sink.read().clone();
        deliver(handlers, sink, event, reply).await;
    }

    fn handlers_for(&self, kind: E::Kind) -> Vec<Arc<dyn EventHandler<E>>> {
        self.registrations
            .read()
            .iter()
            .filter(|r| r.kind == kind)
            .map(|r| r.handler.clone())
            .collect()
    }
}

impl<E: Event> Default for EventHub<E> {
    fn default() -> Self {
        Self::new()
    }
}

async fn deliver<E: Event>(
    handlers: Vec<Arc<dyn EventHandler<E>>>,
    sink: ErrorSink<E>,
    event: E,
    reply: Option<Reply<E::Reply>>,
) {
    // The first handler to produce a value answers the reply.
    let reply = Arc::new(Mutex::new(reply.map(|r| r.tx)));

    let tasks: Vec<_> = handlers
        .into_iter()
        .map(|handler| {
            let event = event.clone();
            let reply = reply.clone();
            tokio::spawn(async move {
                let value = handler.handle(event).await?;
                if let Some(value) = value {
                    if let Some(tx) = reply.lock().take() {
                        let _ = tx.send(value);
                    }
                }
                Ok::<(), HandlerError>(())
            })
        })
        .collect();

    for task in tasks {
        let cause = match task.await {
            Ok(Ok(())) => continue,
            Ok(Err(e)) => FailureCause::Error(e),
            Err(join) if join.is_panic() => FailureCause::Panicked(panic_message(join.into_panic())),
            Err(_) => FailureCause::Cancelled,
        };
        sink(HandlerFailure {
            kind: event.kind(),
            event: event.clone(),
            cause,
        });
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn log_failure<E: Event>(failure: HandlerFailure<E>) {
    error!(
        event = ?failure.kind,
        payload = ?failure.event,
        "Event handler failed: {}",
        failure.cause
    );
}
