//! The transport contract the transaction core is built on.
//!
//! Concrete transports (UDP/TCP/TLS listeners, framing, DNS resolution)
//! live outside this crate. Anything that can move [`SipMessage`]s and
//! deliver incoming traffic as a [`TransportEvent`] stream can drive an
//! [`Endpoint`](crate::Endpoint).

use crate::SipMessage;
use sip_types::HostPort;
use std::fmt::Debug;
use std::io;
use std::sync::Arc;

/// Event delivered by a transport to the transaction layer
#[derive(Debug)]
pub enum TransportEvent {
    /// A parsed incoming message
    Message(SipMessage),
    /// The transport failed. Fatal errors terminate the layer's
    /// transactions, the error is surfaced on the error stream.
    Error(io::Error),
}

/// Abstraction over a bidirectional SIP message channel.
///
/// The transport does not interpret protocol semantics beyond framing.
/// Incoming messages and transport errors are delivered through the
/// [`TransportEvent`] receiver handed to the transaction layer at
/// construction.
#[async_trait::async_trait]
pub trait Transport: Debug + Send + Sync + 'static {
    /// Name of the transport as printed in Via headers (e.g. `UDP`)
    fn name(&self) -> &'static str;

    /// Is the transport reliable, changes how retransmissions in
    /// transactions are handled.
    fn reliable(&self) -> bool;

    /// The address peers can reach this endpoint from
    fn sent_by(&self) -> HostPort;

    /// Send a message to its destination
    async fn send(&self, message: SipMessage) -> io::Result<()>;

    /// Start serving listeners on the provided address
    async fn listen(&self, network: &str, addr: &str) -> io::Result<()>;

    /// Stop the transport. Must cause [`Transport::closed`] to resolve.
    fn cancel(&self);

    /// Resolves once the transport has fully shut down
    async fn closed(&self);
}

/// Cheap to clone handle to a transport
pub type TpHandle = Arc<dyn Transport>;
