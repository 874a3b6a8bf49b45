use crate::auth::Authorizer;
use crate::error::{Error, RequestError, Result};
use crate::transaction::{
    generate_branch, ClientTxHandle, IncomingRequest, ServerTxHandle, TxKey, TxLayer,
    TxLayerEvents,
};
use crate::transport::{TpHandle, TransportEvent};
use crate::{BaseHeaders, Request, RequestHandler, Response, SipMessage};
use bytes::Bytes;
use bytesstr::BytesStr;
use parking_lot::RwLock;
use sip_types::header::typed::{CSeq, Via};
use sip_types::msg::RequestLine;
use sip_types::{Code, CodeKind, Header, HostPort, Method, Name};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// How long the originating request of an answered INVITE is remembered
/// so retransmissions of the 2XX can still be acknowledged
const INVITE_MEMO_TTL: Duration = Duration::from_secs(60);

/// Methods that get the Allow/Supported headers appended automatically
const AUTO_ALLOW_METHODS: [Method; 5] = [
    Method::INVITE,
    Method::REGISTER,
    Method::OPTIONS,
    Method::REFER,
    Method::NOTIFY,
];

/// The endpoint is the centerpiece of the stack. It consumes the
/// transaction layer's event streams, fans incoming requests out to the
/// registered handlers and drives client requests from creation over
/// re-authentication to the final response.
///
/// It is a cheap to clone wrapper around shared state and can be stored
/// wherever needed.
#[derive(Clone)]
pub struct Endpoint {
    inner: Arc<Inner>,
}

struct Inner {
    user_agent: BytesStr,
    extensions: Vec<BytesStr>,
    host: HostPort,

    transport: TpHandle,
    tx_layer: TxLayer,

    /// Registered handlers in registration order
    handlers: RwLock<Vec<(Method, Vec<Arc<dyn RequestHandler>>)>>,

    /// Originating INVITE requests remembered for late 2XX ACKs
    invites: RwLock<HashMap<TxKey, Arc<Request>>>,

    shutting_down: AtomicBool,
    handler_tasks: TaskTracker,
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("inner_refcount", &Arc::strong_count(&self.inner))
            .finish_non_exhaustive()
    }
}

impl Endpoint {
    /// Construct a new [`EndpointBuilder`]
    pub fn builder() -> EndpointBuilder {
        EndpointBuilder::new()
    }

    /// Register a handler for requests of the given method.
    ///
    /// Registering the same handler value (the same `Arc`) twice for one
    /// method fails.
    pub fn on_request(&self, method: Method, handler: Arc<dyn RequestHandler>) -> Result<()> {
        let mut handlers = self.inner.handlers.write();

        match handlers.iter_mut().find(|(m, _)| *m == method) {
            Some((_, list)) => {
                if list.iter().any(|h| Arc::ptr_eq(h, &handler)) {
                    return Err(Error::AlreadyRegistered);
                }

                list.push(handler);
            }
            None => handlers.push((method, vec![handler])),
        }

        Ok(())
    }

    /// Send a request inside a new client transaction
    pub async fn request(&self, mut request: Request) -> Result<ClientTxHandle> {
        if self.shutting_down() {
            return Err(Error::ServerStopped);
        }

        self.prepare_request(&mut request);

        self.inner.tx_layer.request(request).await
    }

    /// Send a request and drive it to its conclusion: provisional
    /// responses are consumed, a 401/407 challenge is retried once
    /// through the authorizer, a 2XX to an INVITE is acknowledged.
    ///
    /// Cancelling the token sends a CANCEL if only provisional responses
    /// have arrived so far and fails the call with a 487
    /// [`RequestError`].
    #[tracing::instrument(name = "request_with_context", level = "debug", skip_all, fields(line = %request.line))]
    pub async fn request_with_context(
        &self,
        cancel: CancellationToken,
        mut request: Request,
        authorizer: Option<Arc<dyn Authorizer>>,
    ) -> Result<Response> {
        let mut authorizer = authorizer;

        loop {
            let mut tx = self.request(request.clone()).await?;

            // keep the prepared form (with its Via) so CANCEL, ACK and
            // the re-authentication retry work on what actually got sent
            request = (**tx.request()).clone();

            let mut provisional = false;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        if provisional {
                            self.cancel_request(&request).await;
                        }

                        // dropping the handle leaves the transaction
                        // running so it can still acknowledge the 487
                        return Err(RequestError {
                            code: Code::REQUEST_TERMINATED,
                            reason: Some(BytesStr::from_static("Request Terminated")),
                            request: request.short(),
                        }
                        .into());
                    }
                    event = tx.receive() => match event {
                        None => {
                            // terminated without a final response
                            return Err(RequestError {
                                code: Code::REQUEST_TERMINATED,
                                reason: Some(BytesStr::from_static("Request Terminated")),
                                request: request.short(),
                            }
                            .into());
                        }
                        Some(Err(e)) => return Err(e),
                        Some(Ok(response)) => match response.line.code.kind() {
                            CodeKind::Provisional => provisional = true,
                            CodeKind::Success => {
                                if request.line.method == Method::INVITE {
                                    self.ack_invite_request(&request, &response).await;
                                    self.remember_invite_request(tx.key().clone(), tx.request().clone());

                                    // acknowledge every further 2XX the
                                    // transaction may still deliver
                                    let endpoint = self.clone();
                                    tokio::spawn(async move {
                                        while let Some(event) = tx.receive().await {
                                            if let Ok(retransmit) = event {
                                                if retransmit.line.code.kind() == CodeKind::Success {
                                                    endpoint
                                                        .ack_invite_request(tx.request(), &retransmit)
                                                        .await;
                                                }
                                            }
                                        }
                                    });
                                }

                                return Ok(response);
                            }
                            _ => {
                                let code = response.line.code.into_u16();

                                if (code == 401 || code == 407) && authorizer.is_some() {
                                    let auth = authorizer.take().expect("checked above");

                                    auth.authorize_request(&mut request, &response).await?;

                                    // the retry is a new transaction
                                    if let Some(via) = request.base.via.first_mut() {
                                        via.params.push_or_edit("branch", generate_branch());
                                    }

                                    break;
                                }

                                return Err(RequestError {
                                    code: response.line.code,
                                    reason: response.line.reason.clone(),
                                    request: request.short(),
                                }
                                .into());
                            }
                        }
                    }
                }
            }
        }
    }

    /// Send a response inside the server transaction it belongs to
    pub async fn respond(&self, mut response: Response) -> Result<ServerTxHandle> {
        if self.shutting_down() {
            return Err(Error::ServerStopped);
        }

        self.prepare_response(&mut response);

        self.inner.tx_layer.respond(response).await
    }

    /// Build a response to `request` with the given status and send it
    /// inside the matching server transaction
    pub async fn respond_on_request(
        &self,
        request: &Request,
        code: Code,
        reason: Option<BytesStr>,
        body: Bytes,
        headers: Vec<Header>,
    ) -> Result<ServerTxHandle> {
        let mut response = Response::from_request(request, code, reason);
        response.body = body;

        for header in headers {
            response.headers.push(header.name, header.value);
        }

        self.respond(response).await
    }

    /// Send a message outside any transaction, directly via the transport
    pub async fn send(&self, message: SipMessage) -> Result<()> {
        if self.shutting_down() {
            return Err(Error::ServerStopped);
        }

        let message = match message {
            SipMessage::Request(mut request) => {
                self.prepare_request(&mut request);
                request.into()
            }
            SipMessage::Response(mut response) => {
                self.prepare_response(&mut response);
                response.into()
            }
        };

        self.inner.transport.send(message).await?;

        Ok(())
    }

    /// Start serving listeners on the provided address
    pub async fn listen(&self, network: &str, addr: &str) -> Result<()> {
        self.inner.transport.listen(network, addr).await?;

        Ok(())
    }

    /// Gracefully shut down: terminate all transactions, then the
    /// transport, then wait for in-flight handlers to finish. Every send
    /// operation afterwards fails with [`Error::ServerStopped`].
    pub async fn shutdown(&self) {
        if self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }

        self.inner.tx_layer.cancel();
        self.inner.tx_layer.done().await;

        self.inner.transport.cancel();
        self.inner.transport.closed().await;

        self.inner.handler_tasks.close();
        self.inner.handler_tasks.wait().await;
    }

    pub fn transport(&self) -> &TpHandle {
        &self.inner.transport
    }

    fn shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }

    /// Main loop over the four transaction layer streams
    async fn run(self, mut events: TxLayerEvents) {
        let cancelled = self.inner.tx_layer.cancelled();

        loop {
            tokio::select! {
                _ = cancelled.cancelled() => break,
                Some(incoming) = events.requests.recv() => {
                    let IncomingRequest { request, tx } = incoming;
                    self.dispatch_request(request, Some(tx));
                }
                Some(ack) = events.acks.recv() => {
                    self.dispatch_request(Arc::new(ack), None);
                }
                Some(response) = events.responses.recv() => {
                    self.handle_unmatched_response(response);
                }
                Some(error) = events.errors.recv() => {
                    log::error!("transaction error: {}", error);
                }
                else => break,
            }
        }
    }

    /// Spawn one task per registered handler; requests without any
    /// handler are answered with 405
    fn dispatch_request(&self, request: Arc<Request>, tx: Option<ServerTxHandle>) {
        log::info!("handling incoming {} request", request.line.method);

        let handlers: Vec<_> = self
            .inner
            .handlers
            .read()
            .iter()
            .find(|(m, _)| *m == request.line.method)
            .map(|(_, list)| list.clone())
            .unwrap_or_default();

        if handlers.is_empty() {
            log::warn!("no handler registered for {} request", request.line.method);

            let Some(tx) = tx else { return };

            let endpoint = self.clone();
            self.inner.handler_tasks.spawn(async move {
                let mut response =
                    Response::from_request(tx.origin(), Code::METHOD_NOT_ALLOWED, None);
                response
                    .headers
                    .push(Name::Allow, endpoint.allowed_methods_value());
                endpoint.prepare_response(&mut response);

                if let Err(e) = tx.respond(response).await {
                    log::error!("failed to respond to unsupported request: {}", e);
                }
            });

            return;
        }

        for handler in handlers {
            let endpoint = self.clone();
            let request = request.clone();
            let tx = tx.clone();

            self.inner.handler_tasks.spawn(async move {
                handler.receive(&endpoint, request, tx).await;
            });
        }
    }

    /// A response without a live client transaction: if it is a 2XX
    /// retransmission of a remembered INVITE, acknowledge it again;
    /// everything else is an orphan.
    fn handle_unmatched_response(&self, response: Response) {
        let key = match TxKey::client(&response.base) {
            Ok(key) => key,
            Err(e) => {
                log::warn!("received unmatchable response: {}", e);
                return;
            }
        };

        let invite = self.inner.invites.read().get(&key).cloned();

        match invite {
            Some(request) => {
                if response.line.code.kind() == CodeKind::Success {
                    let endpoint = self.clone();
                    tokio::spawn(async move {
                        endpoint.ack_invite_request(&request, &response).await;
                    });
                }
            }
            None => log::warn!("dropping response: {}", Error::OrphanResponse),
        }
    }

    fn remember_invite_request(&self, key: TxKey, request: Arc<Request>) {
        self.inner.invites.write().insert(key.clone(), request);

        let endpoint = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(INVITE_MEMO_TTL).await;
            endpoint.inner.invites.write().remove(&key);
        });
    }

    /// Acknowledge a 2XX response to an INVITE. This ACK is a new
    /// transaction: fresh branch, To tag taken from the response.
    async fn ack_invite_request(&self, request: &Request, response: &Response) {
        let Some(via) = request.base.top_via() else {
            log::error!("can not ack INVITE without Via");
            return;
        };

        let mut via = via.clone();
        via.params.push_or_edit("branch", generate_branch());

        let ack = Request {
            line: RequestLine {
                method: Method::ACK,
                uri: request.line.uri.clone(),
            },
            base: BaseHeaders {
                via: vec![via],
                from: request.base.from.clone(),
                to: response.base.to.clone(),
                call_id: request.base.call_id.clone(),
                cseq: CSeq::new(request.base.cseq.cseq, Method::ACK),
            },
            headers: Default::default(),
            body: Bytes::new(),
        };

        if let Err(e) = self.send(ack.into()).await {
            log::error!("ack of the request failed: {}", e);
        }
    }

    /// Send a CANCEL for a request that has only been answered
    /// provisionally so far. It reuses the INVITE's top Via and branch.
    async fn cancel_request(&self, request: &Request) {
        let Some(via) = request.base.top_via() else {
            log::error!("can not cancel a request without Via");
            return;
        };

        let cancel = Request {
            line: RequestLine {
                method: Method::CANCEL,
                uri: request.line.uri.clone(),
            },
            base: BaseHeaders {
                via: vec![via.clone()],
                from: request.base.from.clone(),
                to: request.base.to.clone(),
                call_id: request.base.call_id.clone(),
                cseq: CSeq::new(request.base.cseq.cseq, Method::CANCEL),
            },
            headers: Default::default(),
            body: Bytes::new(),
        };

        if let Err(e) = self.send(cancel.into()).await {
            log::error!("cancel of the request failed: {}", e);
        }
    }

    /// Make sure the request has a top Via with a branch and the
    /// automatic headers. Idempotent when a branch is already present.
    fn prepare_request(&self, request: &mut Request) {
        match request.base.via.first_mut() {
            Some(via) => {
                if !via.params.has("branch") {
                    via.params.push_or_edit("branch", generate_branch());
                }
            }
            None => {
                let via = Via::new(
                    self.inner.transport.name(),
                    self.inner.host.clone(),
                    generate_branch(),
                );

                request.base.via.insert(0, via);
            }
        }

        let method = request.line.method.clone();
        self.append_auto_headers(Some(&method), &mut request.headers);
    }

    fn prepare_response(&self, response: &mut Response) {
        let method = (response.line.code.kind() != CodeKind::Provisional)
            .then(|| response.base.cseq.method.clone());

        self.append_auto_headers(method.as_ref(), &mut response.headers);
    }

    /// Append Allow/Supported/User-Agent, each only when not present yet
    fn append_auto_headers(&self, method: Option<&Method>, headers: &mut sip_types::Headers) {
        if let Some(method) = method {
            if AUTO_ALLOW_METHODS.contains(method) {
                if !headers.contains(&Name::Allow) {
                    headers.push(Name::Allow, self.allowed_methods_value());
                }

                if !headers.contains(&Name::Supported) {
                    let supported = self
                        .inner
                        .extensions
                        .iter()
                        .map(BytesStr::as_str)
                        .collect::<Vec<_>>()
                        .join(", ");

                    headers.push(Name::Supported, supported);
                }
            }
        }

        if !headers.contains(&Name::UserAgent) {
            headers.push(Name::UserAgent, self.inner.user_agent.clone());
        }
    }

    /// The built-in methods plus every method with a registered handler,
    /// in registration order
    fn allowed_methods(&self) -> Vec<Method> {
        let mut methods = vec![Method::INVITE, Method::ACK, Method::CANCEL];

        for (method, _) in self.inner.handlers.read().iter() {
            if !methods.contains(method) {
                methods.push(method.clone());
            }
        }

        methods
    }

    fn allowed_methods_value(&self) -> String {
        self.allowed_methods()
            .iter()
            .map(Method::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Builder instance for [`Endpoint`]
pub struct EndpointBuilder {
    user_agent: BytesStr,
    host: Option<HostPort>,
    extensions: Vec<BytesStr>,
}

impl Default for EndpointBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EndpointBuilder {
    pub fn new() -> Self {
        Self {
            user_agent: BytesStr::from_static("vireo"),
            host: None,
            extensions: vec![],
        }
    }

    /// Public address or domain name advertised in generated Via
    /// headers. Falls back to local interface discovery, then to the
    /// transport's own address.
    pub fn host(&mut self, host: HostPort) -> &mut Self {
        self.host = Some(host);
        self
    }

    /// The product token used for generated User-Agent headers
    pub fn user_agent<U>(&mut self, user_agent: U) -> &mut Self
    where
        U: Into<BytesStr>,
    {
        self.user_agent = user_agent.into();
        self
    }

    /// Add an extension token to the generated Supported header
    pub fn add_extension<E>(&mut self, extension: E) -> &mut Self
    where
        E: Into<BytesStr>,
    {
        self.extensions.push(extension.into());
        self
    }

    /// Complete building the endpoint on top of a transport and the
    /// stream its incoming traffic arrives on
    pub fn build(
        &mut self,
        transport: TpHandle,
        transport_events: mpsc::Receiver<TransportEvent>,
    ) -> Endpoint {
        let (tx_layer, tx_events) = TxLayer::new(transport.clone(), transport_events);

        let host = match self.host.take() {
            Some(host) => host,
            None => match local_ip_address::local_ip() {
                Ok(ip) => HostPort::new(ip.into(), transport.sent_by().port),
                Err(_) => transport.sent_by(),
            },
        };

        let endpoint = Endpoint {
            inner: Arc::new(Inner {
                user_agent: self.user_agent.clone(),
                extensions: std::mem::take(&mut self.extensions),
                host,
                transport,
                tx_layer,
                handlers: RwLock::new(Vec::new()),
                invites: RwLock::new(HashMap::new()),
                shutting_down: AtomicBool::new(false),
                handler_tasks: TaskTracker::new(),
            }),
        };

        endpoint
            .on_request(Method::ACK, Arc::new(AckHandler))
            .expect("fresh handler table");
        endpoint
            .on_request(Method::CANCEL, Arc::new(CancelHandler))
            .expect("fresh handler table");

        tokio::spawn(endpoint.clone().run(tx_events));

        endpoint
    }
}

/// Default handler for 2XX ACKs, which arrive outside any transaction
struct AckHandler;

#[async_trait::async_trait]
impl RequestHandler for AckHandler {
    async fn receive(
        &self,
        _endpoint: &Endpoint,
        request: Arc<Request>,
        _tx: Option<ServerTxHandle>,
    ) {
        log::info!("received ACK request: {}", request.line);
    }
}

/// Default handler answering CANCELs that match no INVITE transaction.
/// Matching CANCELs are short-circuited by the transaction layer and
/// never get here.
struct CancelHandler;

#[async_trait::async_trait]
impl RequestHandler for CancelHandler {
    async fn receive(
        &self,
        endpoint: &Endpoint,
        request: Arc<Request>,
        tx: Option<ServerTxHandle>,
    ) {
        let Some(tx) = tx else { return };

        let mut response = Response::from_request(
            &request,
            Code::CALL_OR_TRANSACTION_DOES_NOT_EXIST,
            None,
        );
        endpoint.prepare_response(&mut response);

        if let Err(e) = tx.respond(response).await {
            log::error!("failed to send response: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{expect_request, expect_response, msg, test_endpoint};
    use std::sync::atomic::AtomicUsize;
    use tokio::time::sleep;

    struct CSeqBumpAuthorizer {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Authorizer for CSeqBumpAuthorizer {
        async fn authorize_request(
            &self,
            request: &mut Request,
            _response: &Response,
        ) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            request.base.cseq.cseq += 1;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unhandled_method_is_answered_with_405() {
        let (endpoint, mut peer) = test_endpoint(false);

        peer.inject(msg::request(Method::MESSAGE, "z9hG4bKabc")).await;

        let response = expect_response(peer.outgoing().await);
        assert_eq!(response.line.code, Code::METHOD_NOT_ALLOWED);
        assert_eq!(
            response.headers.get(&Name::Allow).unwrap().as_str(),
            "INVITE, ACK, CANCEL"
        );

        // registered methods join the Allow listing
        endpoint
            .on_request(
                Method::OPTIONS,
                Arc::new(|_: Endpoint, _: Arc<Request>, _: Option<ServerTxHandle>| async {}),
            )
            .unwrap();

        peer.inject(msg::request(Method::MESSAGE, "z9hG4bKdef")).await;

        let response = expect_response(peer.outgoing().await);
        assert_eq!(
            response.headers.get(&Name::Allow).unwrap().as_str(),
            "INVITE, ACK, CANCEL, OPTIONS"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn registering_the_same_handler_twice_fails() {
        let (endpoint, _peer) = test_endpoint(false);

        let handler: Arc<dyn RequestHandler> =
            Arc::new(|_: Endpoint, _: Arc<Request>, _: Option<ServerTxHandle>| async {});

        endpoint
            .on_request(Method::OPTIONS, handler.clone())
            .unwrap();

        assert!(matches!(
            endpoint.on_request(Method::OPTIONS, handler),
            Err(Error::AlreadyRegistered)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn handlers_respond_through_the_transaction() {
        let (endpoint, mut peer) = test_endpoint(false);

        endpoint
            .on_request(
                Method::OPTIONS,
                Arc::new(
                    |endpoint: Endpoint, request: Arc<Request>, _: Option<ServerTxHandle>| async move {
                        endpoint
                            .respond_on_request(&request, Code::OK, None, Bytes::new(), vec![])
                            .await
                            .unwrap();
                    },
                ),
            )
            .unwrap();

        peer.inject(msg::request(Method::OPTIONS, "z9hG4bKabc")).await;

        let response = expect_response(peer.outgoing().await);
        assert_eq!(response.line.code, Code::OK);
        assert_eq!(response.base.cseq.method, Method::OPTIONS);
    }

    #[tokio::test(start_paused = true)]
    async fn request_with_context_retries_once_after_a_challenge() {
        let (endpoint, mut peer) = test_endpoint(false);

        let authorizer = Arc::new(CSeqBumpAuthorizer {
            calls: AtomicUsize::new(0),
        });

        let call = {
            let endpoint = endpoint.clone();
            let authorizer = authorizer.clone();
            tokio::spawn(async move {
                endpoint
                    .request_with_context(
                        CancellationToken::new(),
                        msg::invite("z9hG4bKabc"),
                        Some(authorizer),
                    )
                    .await
            })
        };

        let invite1 = expect_request(peer.outgoing().await);
        assert_eq!(invite1.base.cseq.cseq, 1);

        peer.inject(msg::response(&invite1, Code::UNAUTHORIZED)).await;

        // the challenged transaction is acknowledged and the request is
        // resent with an incremented CSeq under a new branch
        let (ack, invite2) = {
            let first = expect_request(peer.outgoing().await);
            let second = expect_request(peer.outgoing().await);

            if first.line.method == Method::ACK {
                (first, second)
            } else {
                (second, first)
            }
        };

        assert_eq!(ack.line.method, Method::ACK);
        assert_eq!(
            ack.base.top_via().unwrap().branch(),
            invite1.base.top_via().unwrap().branch()
        );

        assert_eq!(invite2.line.method, Method::INVITE);
        assert_eq!(invite2.base.cseq.cseq, 2);
        assert_eq!(invite2.base.call_id, invite1.base.call_id);
        assert_ne!(
            invite2.base.top_via().unwrap().branch(),
            invite1.base.top_via().unwrap().branch()
        );

        let mut ok = msg::response(&invite2, Code::OK);
        ok.base.to.tag = Some("to-tag-1".into());
        peer.inject(ok).await;

        let response = call.await.unwrap().unwrap();
        assert_eq!(response.line.code, Code::OK);
        assert_eq!(authorizer.calls.load(Ordering::SeqCst), 1);

        // exactly one ACK with a fresh branch and the responses To tag
        let ack2 = expect_request(peer.outgoing().await);
        assert_eq!(ack2.line.method, Method::ACK);
        assert_ne!(
            ack2.base.top_via().unwrap().branch(),
            invite2.base.top_via().unwrap().branch()
        );
        assert_eq!(ack2.base.to.tag.as_ref().unwrap().as_str(), "to-tag-1");

        sleep(Duration::from_millis(10)).await;
        assert!(peer.try_outgoing().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_the_context_cancels_the_request() {
        let (endpoint, mut peer) = test_endpoint(false);

        let token = CancellationToken::new();

        let call = {
            let endpoint = endpoint.clone();
            let token = token.clone();
            tokio::spawn(async move {
                endpoint
                    .request_with_context(token, msg::invite("z9hG4bKabc"), None)
                    .await
            })
        };

        let invite = expect_request(peer.outgoing().await);

        peer.inject(msg::response(&invite, Code::RINGING)).await;
        sleep(Duration::from_millis(1)).await;

        token.cancel();

        let cancel = expect_request(peer.outgoing().await);
        assert_eq!(cancel.line.method, Method::CANCEL);
        assert_eq!(
            cancel.base.top_via().unwrap().branch(),
            invite.base.top_via().unwrap().branch()
        );
        assert_eq!(cancel.base.cseq.cseq, invite.base.cseq.cseq);

        let error = call.await.unwrap().unwrap_err();
        match error {
            Error::Request(e) => assert_eq!(e.code, Code::REQUEST_TERMINATED),
            other => panic!("expected a 487 request error, got {}", other),
        }

        // the transaction is still alive to acknowledge the peers 487
        peer.inject(msg::response(&invite, Code::REQUEST_TERMINATED)).await;

        let ack = expect_request(peer.outgoing().await);
        assert_eq!(ack.line.method, Method::ACK);
        assert_eq!(
            ack.base.top_via().unwrap().branch(),
            invite.base.top_via().unwrap().branch()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn late_2xx_retransmissions_are_acknowledged() {
        let (endpoint, mut peer) = test_endpoint(false);

        let call = {
            let endpoint = endpoint.clone();
            tokio::spawn(async move {
                endpoint
                    .request_with_context(
                        CancellationToken::new(),
                        msg::invite("z9hG4bKabc"),
                        None,
                    )
                    .await
            })
        };

        let invite = expect_request(peer.outgoing().await);

        let mut ok = msg::response(&invite, Code::OK);
        ok.base.to.tag = Some("to-tag-1".into());
        peer.inject(ok.clone()).await;

        let response = call.await.unwrap().unwrap();
        assert_eq!(response.line.code, Code::OK);

        let ack1 = expect_request(peer.outgoing().await);
        assert_eq!(ack1.line.method, Method::ACK);

        // the client transaction is gone, the retransmission is matched
        // against the remembered INVITE
        peer.inject(ok).await;

        let ack2 = expect_request(peer.outgoing().await);
        assert_eq!(ack2.line.method, Method::ACK);
        assert_eq!(ack2.base.to.tag.as_ref().unwrap().as_str(), "to-tag-1");
        assert!(ack2
            .base
            .top_via()
            .unwrap()
            .branch()
            .unwrap()
            .starts_with("z9hG4bK"));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_fails_all_further_sends() {
        let (endpoint, _peer) = test_endpoint(false);

        endpoint.shutdown().await;

        assert!(matches!(
            endpoint.request(msg::invite("z9hG4bKabc")).await,
            Err(Error::ServerStopped)
        ));

        let invite = msg::invite("z9hG4bKabc");
        assert!(matches!(
            endpoint.respond(msg::response(&invite, Code::OK)).await,
            Err(Error::ServerStopped)
        ));
        assert!(matches!(
            endpoint.send(invite.into()).await,
            Err(Error::ServerStopped)
        ));

        // shutting down twice is a no-op
        endpoint.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn auto_headers_are_appended_but_never_duplicated() {
        let (endpoint, mut peer) = test_endpoint(false);

        endpoint.send(msg::invite("z9hG4bKabc").into()).await.unwrap();

        let sent = expect_request(peer.outgoing().await);
        assert_eq!(
            sent.base.top_via().unwrap().branch().unwrap().as_str(),
            "z9hG4bKabc"
        );
        assert!(sent.headers.contains(&Name::Allow));
        assert!(sent.headers.contains(&Name::Supported));
        assert_eq!(sent.headers.get(&Name::UserAgent).unwrap().as_str(), "vireo");

        // user provided headers win
        let mut invite = msg::invite("z9hG4bKdef");
        invite.headers.push(Name::Allow, "INVITE");
        invite.headers.push(Name::UserAgent, "probe");
        endpoint.send(invite.into()).await.unwrap();

        let sent = expect_request(peer.outgoing().await);
        assert_eq!(sent.headers.iter().filter(|h| h.name == Name::Allow).count(), 1);
        assert_eq!(sent.headers.get(&Name::Allow).unwrap().as_str(), "INVITE");
        assert_eq!(sent.headers.get(&Name::UserAgent).unwrap().as_str(), "probe");
    }

    #[tokio::test(start_paused = true)]
    async fn transport_errors_terminate_live_transactions() {
        let (endpoint, mut peer) = test_endpoint(false);

        endpoint.listen("udp", "0.0.0.0:5060").await.unwrap();

        let mut tx = endpoint
            .request(msg::request(Method::OPTIONS, "z9hG4bKabc"))
            .await
            .unwrap();
        let _ = expect_request(peer.outgoing().await);

        peer.inject_error(std::io::Error::new(std::io::ErrorKind::Other, "icmp unreachable"))
            .await;

        // the failure reaches the in-flight transaction, which terminates
        let received = tx.receive().await.unwrap();
        assert!(matches!(received, Err(Error::TransportFailed(_))));
        assert!(tx.receive().await.is_none());

        // a fatal transport error tears the whole layer down
        assert!(matches!(
            endpoint.request(msg::invite("z9hG4bKdef")).await,
            Err(Error::ServerStopped)
        ));
    }
}
