//! The RFC 3261 transaction layer.
//!
//! Every live transaction runs as its own task consuming a private event
//! queue, so a state machine never needs internal locking. The
//! [`TxLayer`] creates transactions, routes incoming messages to them and
//! publishes everything that happens outside a transaction on its four
//! event streams.

use crate::error::{Error, Result};
use crate::{Request, Response, SipMessage};
use bytesstr::BytesStr;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

mod client;
mod client_inv;
mod key;
mod layer;
mod registry;
mod server;
mod server_inv;

pub mod consts {
    use std::time::Duration;

    pub const T1: Duration = Duration::from_millis(500);
    pub const T2: Duration = Duration::from_secs(4);
    pub const T4: Duration = Duration::from_secs(5);

    /// Window after which an INVITE server transaction answers with a
    /// 100 Trying on its own
    pub const TIMER_1XX: Duration = Duration::from_millis(200);

    /// Time an INVITE client transaction stays around to absorb
    /// retransmissions of a negative final response
    pub const TIMER_D: Duration = Duration::from_secs(32);

    pub const RFC3261_BRANCH_PREFIX: &str = "z9hG4bK";
}

pub use key::TxKey;
pub use layer::{IncomingRequest, TxLayer, TxLayerEvents};

pub(crate) use registry::{TxEntry, TxKind, TxRegistry};

/// Generate a new RFC 3261 branch parameter
pub(crate) fn generate_branch() -> BytesStr {
    use rand::distributions::Alphanumeric;
    use rand::{thread_rng, Rng};

    consts::RFC3261_BRANCH_PREFIX
        .bytes()
        .chain(thread_rng().sample_iter(Alphanumeric).take(23))
        .map(char::from)
        .collect::<String>()
        .into()
}

/// Event delivered into a transaction's event queue
#[derive(Debug)]
pub(crate) enum TxEvent {
    /// A message from the transport was matched to this transaction
    Message(SipMessage),
    /// The user wants to send a response inside this transaction. The
    /// send result is reported back through the oneshot, whose receiver
    /// may already be gone.
    Respond(Response, oneshot::Sender<Result<()>>),
    /// A CANCEL matched this transaction. Only an INVITE server
    /// transaction that has not sent a final response reacts, by
    /// answering the original request with 487.
    Cancelled,
    /// The transport delivered a fatal error. The transaction
    /// terminates; client transactions that still owe their user a
    /// final response report the failure on their event stream first.
    TransportError(String),
    /// Force the transaction into the Terminated state
    Terminate,
}

/// Internal: registers a transaction inside the registry on creation and
/// removes it again when the transaction terminates and drops this.
#[derive(Debug)]
pub(crate) struct TxRegistration {
    key: TxKey,
    registry: Arc<TxRegistry>,
    events: mpsc::UnboundedReceiver<TxEvent>,
}

impl TxRegistration {
    pub(crate) fn key(&self) -> &TxKey {
        &self.key
    }

    pub(crate) async fn receive(&mut self) -> TxEvent {
        // the registry owns a sender for as long as this is registered,
        // so a closed channel only happens during teardown
        self.events.recv().await.unwrap_or(TxEvent::Terminate)
    }
}

impl Drop for TxRegistration {
    fn drop(&mut self) {
        self.registry.remove(&self.key);
    }
}

/// Handle to a live server transaction, used to send responses inside it
#[derive(Debug, Clone)]
pub struct ServerTxHandle {
    key: TxKey,
    origin: Arc<Request>,
    events: mpsc::UnboundedSender<TxEvent>,
}

impl ServerTxHandle {
    pub(crate) fn new(
        key: TxKey,
        origin: Arc<Request>,
        events: mpsc::UnboundedSender<TxEvent>,
    ) -> Self {
        Self {
            key,
            origin,
            events,
        }
    }

    pub fn key(&self) -> &TxKey {
        &self.key
    }

    /// The request that created this transaction
    pub fn origin(&self) -> &Arc<Request> {
        &self.origin
    }

    /// Send a response inside this transaction
    pub async fn respond(&self, response: Response) -> Result<()> {
        let (result, result_rx) = oneshot::channel();

        self.events
            .send(TxEvent::Respond(response, result))
            .map_err(|_| Error::NoMatchingTransaction)?;

        result_rx.await.map_err(|_| Error::NoMatchingTransaction)?
    }
}

/// Handle to a live client transaction.
///
/// Responses and transaction errors are delivered in receive order on a
/// single event stream; the stream ends when the transaction terminates.
#[derive(Debug)]
pub struct ClientTxHandle {
    key: TxKey,
    request: Arc<Request>,
    events: mpsc::UnboundedReceiver<Result<Response>>,
    sender: mpsc::UnboundedSender<TxEvent>,
}

impl ClientTxHandle {
    pub fn key(&self) -> &TxKey {
        &self.key
    }

    /// The request this transaction sent, as it went onto the wire
    pub fn request(&self) -> &Arc<Request> {
        &self.request
    }

    /// Receive the next response or transaction error. Returns `None`
    /// once the transaction has terminated.
    pub async fn receive(&mut self) -> Option<Result<Response>> {
        self.events.recv().await
    }

    /// Force the transaction into the Terminated state, dropping all
    /// further events
    pub fn cancel(&self) {
        let _ = self.sender.send(TxEvent::Terminate);
    }
}
