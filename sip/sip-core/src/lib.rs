//! Transaction and dispatch core of the vireo SIP stack.
//!
//! This crate drives the four RFC 3261 transaction state machines (INVITE
//! and non-INVITE, client and server side) on top of a pluggable message
//! [`Transport`] and multiplexes incoming requests to user registered
//! handlers through the [`Endpoint`].
//!
//! Message grammar/parsing, concrete network transports and DNS resolution
//! are external collaborators; the types this crate operates on live in
//! `vireo-sip-types`.
//!
//! [`Transport`]: transport::Transport

use bytes::Bytes;
use bytesstr::BytesStr;
use sip_types::header::typed::{CSeq, CallId, FromTo, Via};
use sip_types::msg::{MessageLine, RequestLine, StatusLine};
use sip_types::{Code, Headers, Method};
use std::fmt;
use std::sync::Arc;
use transaction::ServerTxHandle;

mod auth;
mod endpoint;
mod error;
#[cfg(test)]
mod test_utils;
pub mod transaction;
pub mod transport;

pub use auth::Authorizer;
pub use endpoint::{Endpoint, EndpointBuilder};
pub use error::{Error, RequestError, Result};

/// Parsed SIP headers that are part of every message
#[derive(Debug, Clone, PartialEq)]
pub struct BaseHeaders {
    /// All Via hops, topmost first. May be empty on user-built requests
    /// until the endpoint prepares them for sending.
    pub via: Vec<Via>,
    pub from: FromTo,
    pub to: FromTo,
    pub call_id: CallId,
    pub cseq: CSeq,
}

impl BaseHeaders {
    pub fn top_via(&self) -> Option<&Via> {
        self.via.first()
    }
}

/// Basic request
#[derive(Debug, Clone)]
pub struct Request {
    pub line: RequestLine,
    pub base: BaseHeaders,
    pub headers: Headers,
    pub body: Bytes,
}

impl Request {
    pub fn new(method: Method, uri: BytesStr, base: BaseHeaders) -> Self {
        Self {
            line: RequestLine { method, uri },
            base,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Short description of the request used in logs and errors
    pub fn short(&self) -> BytesStr {
        BytesStr::from(format!(
            "{} (Call-ID: {})",
            self.line, self.base.call_id
        ))
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\r\n", self.line)?;
        print_message(f, &self.base, &self.headers, &self.body)
    }
}

/// Basic response
#[derive(Debug, Clone)]
pub struct Response {
    pub line: StatusLine,
    pub base: BaseHeaders,
    pub headers: Headers,
    pub body: Bytes,
}

impl Response {
    /// Create a response to `request`, copying the headers RFC 3261
    /// requires a UAS to mirror
    pub fn from_request(request: &Request, code: Code, reason: Option<BytesStr>) -> Self {
        Self {
            line: StatusLine::new(code, reason),
            base: request.base.clone(),
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\r\n", self.line)?;
        print_message(f, &self.base, &self.headers, &self.body)
    }
}

fn print_message(
    f: &mut fmt::Formatter<'_>,
    base: &BaseHeaders,
    headers: &Headers,
    body: &Bytes,
) -> fmt::Result {
    for via in &base.via {
        write!(f, "Via: {}\r\n", via)?;
    }

    write!(f, "From: {}\r\n", base.from)?;
    write!(f, "To: {}\r\n", base.to)?;
    write!(f, "Call-ID: {}\r\n", base.call_id)?;
    write!(f, "CSeq: {}\r\n", base.cseq)?;

    write!(f, "{}", headers)?;

    write!(f, "Content-Length: {}\r\n\r\n", body.len())?;

    if !body.is_empty() {
        f.write_str(&String::from_utf8_lossy(body))?;
    }

    Ok(())
}

/// A request or a response
#[derive(Debug, Clone)]
pub enum SipMessage {
    Request(Request),
    Response(Response),
}

impl SipMessage {
    pub fn line(&self) -> MessageLine {
        match self {
            SipMessage::Request(request) => MessageLine::Request(request.line.clone()),
            SipMessage::Response(response) => MessageLine::Response(response.line.clone()),
        }
    }

    pub fn base(&self) -> &BaseHeaders {
        match self {
            SipMessage::Request(request) => &request.base,
            SipMessage::Response(response) => &response.base,
        }
    }
}

impl fmt::Display for SipMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SipMessage::Request(request) => write!(f, "{}", request),
            SipMessage::Response(response) => write!(f, "{}", response),
        }
    }
}

impl From<Request> for SipMessage {
    fn from(request: Request) -> Self {
        SipMessage::Request(request)
    }
}

impl From<Response> for SipMessage {
    fn from(response: Response) -> Self {
        SipMessage::Response(response)
    }
}

/// A callback invoked for every incoming request of the method it was
/// registered for.
///
/// Handlers run in their own task, a slow handler never stalls the
/// endpoints event loop. The transaction handle is `None` for ACKs to a
/// 2XX response, which arrive outside any transaction.
#[async_trait::async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    async fn receive(
        &self,
        endpoint: &Endpoint,
        request: Arc<Request>,
        tx: Option<ServerTxHandle>,
    );
}

#[async_trait::async_trait]
impl<F, Fut> RequestHandler for F
where
    F: Fn(Endpoint, Arc<Request>, Option<ServerTxHandle>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    async fn receive(
        &self,
        endpoint: &Endpoint,
        request: Arc<Request>,
        tx: Option<ServerTxHandle>,
    ) {
        (self)(endpoint.clone(), request, tx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::msg;

    #[test]
    fn print_request() {
        let invite = msg::invite("z9hG4bKabc");

        let printed = invite.to_string();

        assert!(printed.starts_with("INVITE sip:bob@example.com SIP/2.0\r\n"));
        assert!(printed.contains("Via: SIP/2.0/UDP client.example.com:5060;branch=z9hG4bKabc\r\n"));
        assert!(printed.contains("CSeq: 1 INVITE\r\n"));
        assert!(printed.ends_with("Content-Length: 0\r\n\r\n"));
    }

    #[test]
    fn print_response() {
        let invite = msg::invite("z9hG4bKabc");
        let ok = Response::from_request(&invite, Code::OK, None);

        let printed = ok.to_string();

        assert!(printed.starts_with("SIP/2.0 200 OK\r\n"));
        assert!(printed.contains("Via: SIP/2.0/UDP client.example.com:5060;branch=z9hG4bKabc\r\n"));
        assert!(printed.contains("CSeq: 1 INVITE\r\n"));
    }
}
