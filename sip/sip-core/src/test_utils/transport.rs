use crate::transport::{TpHandle, Transport, TransportEvent};
use crate::SipMessage;
use sip_types::HostPort;
use std::io;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// In-memory transport capturing everything the stack sends
#[derive(Debug)]
struct MockTransport {
    reliable: bool,
    sent: mpsc::UnboundedSender<SipMessage>,
    cancelled: CancellationToken,
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    fn name(&self) -> &'static str {
        if self.reliable {
            "TCP"
        } else {
            "UDP"
        }
    }

    fn reliable(&self) -> bool {
        self.reliable
    }

    fn sent_by(&self) -> HostPort {
        HostPort::from("server.example.com:5060")
    }

    async fn send(&self, message: SipMessage) -> io::Result<()> {
        self.sent
            .send(message)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer is gone"))
    }

    async fn listen(&self, _network: &str, _addr: &str) -> io::Result<()> {
        Ok(())
    }

    fn cancel(&self) {
        self.cancelled.cancel();
    }

    async fn closed(&self) {
        self.cancelled.cancelled().await
    }
}

/// The remote side of a mock transport: injects incoming traffic and
/// observes what the stack puts on the wire
pub(crate) struct Peer {
    incoming: mpsc::Sender<TransportEvent>,
    sent: mpsc::UnboundedReceiver<SipMessage>,
}

impl Peer {
    pub(crate) async fn inject<M>(&self, message: M)
    where
        M: Into<SipMessage>,
    {
        self.incoming
            .send(TransportEvent::Message(message.into()))
            .await
            .expect("transaction layer is gone");
    }

    pub(crate) async fn inject_error(&self, error: io::Error) {
        self.incoming
            .send(TransportEvent::Error(error))
            .await
            .expect("transaction layer is gone");
    }

    pub(crate) async fn outgoing(&mut self) -> SipMessage {
        self.sent.recv().await.expect("transport closed")
    }

    pub(crate) fn try_outgoing(&mut self) -> Option<SipMessage> {
        self.sent.try_recv().ok()
    }
}

pub(crate) fn mock(reliable: bool) -> (TpHandle, mpsc::Receiver<TransportEvent>, Peer) {
    let (incoming_tx, incoming_rx) = mpsc::channel(32);
    let (sent_tx, sent_rx) = mpsc::unbounded_channel();

    let transport: TpHandle = Arc::new(MockTransport {
        reliable,
        sent: sent_tx,
        cancelled: CancellationToken::new(),
    });

    let peer = Peer {
        incoming: incoming_tx,
        sent: sent_rx,
    };

    (transport, incoming_rx, peer)
}
