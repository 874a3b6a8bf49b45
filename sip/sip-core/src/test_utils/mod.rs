//! Shared test helpers: an in-memory transport and message builders.

pub(crate) mod msg;
pub(crate) mod transport;

pub(crate) use transport::Peer;

use crate::transaction::{TxLayer, TxLayerEvents};
use crate::{Endpoint, Request, Response, SipMessage};

/// A transaction layer over a mock transport plus the peer driving it
pub(crate) fn test_layer(reliable: bool) -> (TxLayer, TxLayerEvents, Peer) {
    let (transport, events, peer) = transport::mock(reliable);
    let (layer, layer_events) = TxLayer::new(transport, events);

    (layer, layer_events, peer)
}

/// A fully built endpoint over a mock transport
pub(crate) fn test_endpoint(reliable: bool) -> (Endpoint, Peer) {
    let (transport, events, peer) = transport::mock(reliable);
    let endpoint = Endpoint::builder().build(transport, events);

    (endpoint, peer)
}

pub(crate) fn expect_request(message: SipMessage) -> Request {
    match message {
        SipMessage::Request(request) => request,
        SipMessage::Response(response) => {
            panic!("expected a request but the stack sent {}", response.line)
        }
    }
}

pub(crate) fn expect_response(message: SipMessage) -> Response {
    match message {
        SipMessage::Response(response) => response,
        SipMessage::Request(request) => {
            panic!("expected a response but the stack sent {}", request.line)
        }
    }
}
