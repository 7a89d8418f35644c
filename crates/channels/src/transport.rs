use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    tokio::sync::mpsc,
};

/// Identity of the logged-in account, available once the session is ready.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub id: String,
    pub display_name: String,
    pub platform: String,
}

/// Asynchronous notifications raised by a running transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A fresh pairing payload to be rendered as a QR code.
    Qr(String),
    Authenticated,
    Ready,
    Disconnected(String),
}

/// An event tagged with the epoch of the transport instance that raised it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StampedEvent {
    pub epoch: u64,
    pub event: TransportEvent,
}

/// Where a transport delivers its events.
///
/// Each call to [`Transport::initialize`] receives a sink stamped with a new
/// epoch, so the consumer can drop events from instances it already tore down.
#[derive(Debug, Clone)]
pub struct EventSink {
    epoch: u64,
    tx: mpsc::UnboundedSender<StampedEvent>,
}

impl EventSink {
    pub fn new(epoch: u64, tx: mpsc::UnboundedSender<StampedEvent>) -> Self {
        Self { epoch, tx }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Deliver an event. Returns false once the consumer has gone away.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx
            .send(StampedEvent {
                epoch: self.epoch,
                event,
            })
            .is_ok()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport is not running")]
    NotRunning,

    /// The client reported that its page/session is not fully settled yet.
    #[error("client not settled: {0}")]
    NotSettled(String),

    #[error("{0}")]
    Remote(String),

    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("transport closed: {0}")]
    Closed(String),

    #[error("transport i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed transport payload: {0}")]
    Protocol(String),
}

/// Long-lived, stateful connection to the messaging network.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Start (or restart) the client. Events are delivered to `events` until
    /// the next [`destroy`](Transport::destroy).
    async fn initialize(&self, events: EventSink) -> Result<(), TransportError>;

    /// Send a text message to a transport-addressable chat id.
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), TransportError>;

    /// Tear the client down. Must be safe to call when nothing is running.
    async fn destroy(&self) -> Result<(), TransportError>;

    /// Unlink the device from the account.
    async fn logout(&self) -> Result<(), TransportError>;

    async fn info(&self) -> Result<ClientInfo, TransportError>;
}
