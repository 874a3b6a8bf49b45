use super::client::ClientTx;
use super::client_inv::InviteClientTx;
use super::server::ServerTx;
use super::server_inv::InviteServerTx;
use super::{
    ClientTxHandle, ServerTxHandle, TxEntry, TxEvent, TxKey, TxKind, TxRegistration, TxRegistry,
};
use crate::error::{Error, Result};
use crate::transport::{TpHandle, TransportEvent};
use crate::{Request, Response, SipMessage};
use sip_types::{Code, Method};
use std::io;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

const STREAM_CAPACITY: usize = 32;

/// A request that opened a new server transaction
#[derive(Debug)]
pub struct IncomingRequest {
    pub request: Arc<Request>,
    pub tx: ServerTxHandle,
}

/// Consumer side of the four transaction layer streams.
///
/// `requests` carries every request that opened a new server transaction,
/// `acks` the ACKs to 2XX responses (stateless at this layer),
/// `responses` the responses without a live client transaction (the late
/// 2XX retransmission path) and `errors` everything that went wrong
/// outside the caller's view.
pub struct TxLayerEvents {
    pub requests: mpsc::Receiver<IncomingRequest>,
    pub acks: mpsc::Receiver<Request>,
    pub responses: mpsc::Receiver<Response>,
    pub errors: mpsc::UnboundedReceiver<Error>,
}

/// The transaction layer.
///
/// Receives every message of the transport, creates or routes to the
/// matching transaction and demultiplexes everything transactions emit
/// onto the [`TxLayerEvents`] streams.
#[derive(Clone)]
pub struct TxLayer {
    inner: Arc<Inner>,
}

struct Inner {
    transport: TpHandle,
    registry: Arc<TxRegistry>,
    requests: mpsc::Sender<IncomingRequest>,
    acks: mpsc::Sender<Request>,
    responses: mpsc::Sender<Response>,
    errors: mpsc::UnboundedSender<Error>,
    cancelled: CancellationToken,
    tasks: TaskTracker,
}

impl TxLayer {
    /// Create the layer on top of a transport and the stream its
    /// incoming traffic arrives on
    pub fn new(
        transport: TpHandle,
        events: mpsc::Receiver<TransportEvent>,
    ) -> (Self, TxLayerEvents) {
        let (requests_tx, requests_rx) = mpsc::channel(STREAM_CAPACITY);
        let (acks_tx, acks_rx) = mpsc::channel(STREAM_CAPACITY);
        let (responses_tx, responses_rx) = mpsc::channel(STREAM_CAPACITY);
        let (errors_tx, errors_rx) = mpsc::unbounded_channel();

        let layer = Self {
            inner: Arc::new(Inner {
                transport,
                registry: Arc::new(TxRegistry::default()),
                requests: requests_tx,
                acks: acks_tx,
                responses: responses_tx,
                errors: errors_tx,
                cancelled: CancellationToken::new(),
                tasks: TaskTracker::new(),
            }),
        };

        layer.inner.tasks.spawn(layer.clone().receive_loop(events));

        let events = TxLayerEvents {
            requests: requests_rx,
            acks: acks_rx,
            responses: responses_rx,
            errors: errors_rx,
        };

        (layer, events)
    }

    pub fn transport(&self) -> &TpHandle {
        &self.inner.transport
    }

    /// Token that fires when the layer is cancelled
    pub fn cancelled(&self) -> CancellationToken {
        self.inner.cancelled.clone()
    }

    /// Send a request inside a new client transaction. The request must
    /// already carry its top Via with the transaction branch.
    #[tracing::instrument(name = "tx_request", level = "debug", skip(self, request), fields(line = %request.line))]
    pub async fn request(&self, request: Request) -> Result<ClientTxHandle> {
        if self.inner.cancelled.is_cancelled() {
            return Err(Error::ServerStopped);
        }

        if request.line.method == Method::ACK {
            return Err(Error::MalformedMessage(
                "ACK does not open a client transaction",
            ));
        }

        let key = TxKey::client(&request.base)?;
        let invite = request.line.method == Method::INVITE;

        let origin = Arc::new(request);
        let kind = if invite {
            TxKind::InviteClient
        } else {
            TxKind::Client
        };

        let (sender, registration) = self.register(key.clone(), kind, origin.clone())?;
        let (user_tx, user_rx) = mpsc::unbounded_channel();

        if invite {
            self.inner.tasks.spawn(
                InviteClientTx {
                    registration,
                    transport: self.inner.transport.clone(),
                    errors: self.inner.errors.clone(),
                    user: user_tx,
                    request: origin.clone(),
                }
                .run(),
            );
        } else {
            self.inner.tasks.spawn(
                ClientTx {
                    registration,
                    transport: self.inner.transport.clone(),
                    errors: self.inner.errors.clone(),
                    user: user_tx,
                    request: origin.clone(),
                }
                .run(),
            );
        }

        Ok(ClientTxHandle {
            key,
            request: origin,
            events: user_rx,
            sender,
        })
    }

    /// Send a response inside the server transaction its headers belong
    /// to, failing if no live transaction owns them
    pub async fn respond(&self, response: Response) -> Result<ServerTxHandle> {
        if self.inner.cancelled.is_cancelled() {
            return Err(Error::ServerStopped);
        }

        let key = TxKey::server(&response.base)?;

        let entry = self
            .inner
            .registry
            .get(&key)
            .ok_or(Error::NoMatchingTransaction)?;

        let handle = ServerTxHandle::new(key, entry.origin, entry.sender);
        handle.respond(response).await?;

        Ok(handle)
    }

    /// A fatal transport error: report it, deliver it into every live
    /// transaction so each one terminates, then tear the layer down
    fn fail(&self, error: io::Error) {
        let message = error.to_string();

        log::error!("transport failed, terminating all transactions: {}", message);

        let _ = self
            .inner
            .errors
            .send(Error::TransportFailed(message.clone()));

        for sender in self.inner.registry.senders() {
            let _ = sender.send(TxEvent::TransportError(message.clone()));
        }

        self.cancel();
    }

    /// Cancel the layer: every live transaction is forced into the
    /// Terminated state and the event streams shut down
    pub fn cancel(&self) {
        self.inner.cancelled.cancel();

        for sender in self.inner.registry.senders() {
            let _ = sender.send(TxEvent::Terminate);
        }

        self.inner.tasks.close();
    }

    /// Resolves once every transaction and the receive loop have shut
    /// down after [`TxLayer::cancel`]
    pub async fn done(&self) {
        self.inner.tasks.wait().await
    }

    #[cfg(test)]
    pub(crate) fn registry(&self) -> &TxRegistry {
        &self.inner.registry
    }

    async fn receive_loop(self, mut events: mpsc::Receiver<TransportEvent>) {
        loop {
            tokio::select! {
                _ = self.inner.cancelled.cancelled() => break,
                event = events.recv() => match event {
                    None => break,
                    Some(TransportEvent::Message(message)) => self.receive(message).await,
                    Some(TransportEvent::Error(error)) => self.fail(error),
                }
            }
        }
    }

    async fn receive(&self, message: SipMessage) {
        match message {
            SipMessage::Request(request) => {
                if request.line.method == Method::ACK {
                    self.receive_ack(request).await
                } else {
                    self.receive_request(request).await
                }
            }
            SipMessage::Response(response) => self.receive_response(response).await,
        }
    }

    async fn receive_request(&self, request: Request) {
        let key = match TxKey::server(&request.base) {
            Ok(key) => key,
            Err(e) => {
                let _ = self.inner.errors.send(e);
                return;
            }
        };

        if let Some(entry) = self.inner.registry.get(&key) {
            // retransmission of the request of a live transaction
            let _ = entry.sender.send(TxEvent::Message(request.into()));
            return;
        }

        if request.line.method == Method::CANCEL && self.shortcut_cancel(&key, &request) {
            return;
        }

        let kind = if request.line.method == Method::INVITE {
            TxKind::InviteServer
        } else {
            TxKind::Server
        };

        let request = Arc::new(request);

        let (sender, registration) = match self.register(key.clone(), kind, request.clone()) {
            Ok(registered) => registered,
            // lost the race against a retransmission
            Err(_) => return,
        };

        self.spawn_server_tx(kind, registration, request.clone());

        self.publish_request(IncomingRequest {
            request: request.clone(),
            tx: ServerTxHandle::new(key, request, sender),
        })
        .await;
    }

    async fn receive_ack(&self, ack: Request) {
        let key = match TxKey::server(&ack.base) {
            Ok(key) => key,
            Err(e) => {
                let _ = self.inner.errors.send(e);
                return;
            }
        };

        if let Some(entry) = self.inner.registry.get(&key) {
            if entry.kind == TxKind::InviteServer {
                // non-2XX ACK, confirms the INVITE transaction
                let _ = entry.sender.send(TxEvent::Message(ack.into()));
                return;
            }
        }

        // ACK to a 2XX, stateless at this layer
        tokio::select! {
            _ = self.inner.cancelled.cancelled() => {}
            _ = self.inner.acks.send(ack) => {}
        }
    }

    async fn receive_response(&self, response: Response) {
        let key = match TxKey::client(&response.base) {
            Ok(key) => key,
            Err(e) => {
                let _ = self.inner.errors.send(e);
                return;
            }
        };

        if let Some(entry) = self.inner.registry.get(&key) {
            let _ = entry.sender.send(TxEvent::Message(response.into()));
            return;
        }

        // no live transaction, pass it up so the dispatch layer can ACK
        // remembered late 2XX retransmissions
        tokio::select! {
            _ = self.inner.cancelled.cancelled() => {}
            _ = self.inner.responses.send(response) => {}
        }
    }

    /// A CANCEL whose key matches a live INVITE server transaction is
    /// answered here: 200 to the CANCEL through its own transaction and
    /// 487 into the INVITE transaction. It never reaches the handlers.
    fn shortcut_cancel(&self, cancel_key: &TxKey, request: &Request) -> bool {
        let invite_key = cancel_key.invite_target();

        let Some(invite_entry) = self.inner.registry.get(&invite_key) else {
            return false;
        };

        if invite_entry.kind != TxKind::InviteServer {
            return false;
        }

        log::debug!("answering CANCEL matching transaction {}", invite_key);

        let request = Arc::new(request.clone());

        if let Ok((sender, registration)) =
            self.register(cancel_key.clone(), TxKind::Server, request.clone())
        {
            self.spawn_server_tx(TxKind::Server, registration, request.clone());

            let ok = Response::from_request(&request, Code::OK, None);
            let (result, _) = tokio::sync::oneshot::channel();
            let _ = sender.send(TxEvent::Respond(ok, result));
        }

        let _ = invite_entry.sender.send(TxEvent::Cancelled);

        true
    }

    fn register(
        &self,
        key: TxKey,
        kind: TxKind,
        origin: Arc<Request>,
    ) -> Result<(mpsc::UnboundedSender<TxEvent>, TxRegistration)> {
        let (sender, receiver) = mpsc::unbounded_channel();

        self.inner.registry.put_if_absent(
            key.clone(),
            TxEntry {
                kind,
                origin,
                sender: sender.clone(),
            },
        )?;

        Ok((
            sender,
            TxRegistration {
                key,
                registry: self.inner.registry.clone(),
                events: receiver,
            },
        ))
    }

    fn spawn_server_tx(&self, kind: TxKind, registration: TxRegistration, origin: Arc<Request>) {
        if kind == TxKind::InviteServer {
            self.inner.tasks.spawn(
                InviteServerTx {
                    registration,
                    transport: self.inner.transport.clone(),
                    errors: self.inner.errors.clone(),
                    origin,
                }
                .run(),
            );
        } else {
            self.inner.tasks.spawn(
                ServerTx {
                    registration,
                    transport: self.inner.transport.clone(),
                    errors: self.inner.errors.clone(),
                }
                .run(),
            );
        }
    }

    async fn publish_request(&self, incoming: IncomingRequest) {
        tokio::select! {
            _ = self.inner.cancelled.cancelled() => {}
            _ = self.inner.requests.send(incoming) => {}
        }
    }
}
