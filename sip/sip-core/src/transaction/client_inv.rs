use super::consts::{T1, TIMER_D};
use super::{TxEvent, TxRegistration};
use crate::error::{Error, Result};
use crate::transport::TpHandle;
use crate::{BaseHeaders, Request, Response, SipMessage};
use bytes::Bytes;
use sip_types::header::typed::CSeq;
use sip_types::msg::RequestLine;
use sip_types::{CodeKind, Headers, Method};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};

/// INVITE client transaction (RFC 3261 section 17.1.1).
///
/// Calling -> Proceeding -> Completed -> Terminated. The ACK to a
/// negative final response is generated here with the INVITE's branch and
/// repeated for every retransmitted final response; the ACK to a 2XX is
/// the dispatch layer's job.
pub(crate) struct InviteClientTx {
    pub(crate) registration: TxRegistration,
    pub(crate) transport: TpHandle,
    pub(crate) errors: mpsc::UnboundedSender<Error>,
    pub(crate) user: mpsc::UnboundedSender<Result<Response>>,
    pub(crate) request: Arc<Request>,
}

impl InviteClientTx {
    #[tracing::instrument(name = "tx_inv_client", level = "debug", skip(self), fields(key = %self.registration.key()))]
    pub(crate) async fn run(self) {
        let InviteClientTx {
            mut registration,
            transport,
            errors,
            user,
            request,
        } = self;

        let reliable = transport.reliable();

        // Calling. Send the request, retransmit on timer A until a
        // response arrives, give up when timer B fires.
        if let Err(e) = transport.send((*request).clone().into()).await {
            let _ = user.send(Err(e.into()));
            return;
        }

        let timer_b = sleep(T1 * 64);
        tokio::pin!(timer_b);

        let mut retransmit_delta = T1;
        let timer_a = sleep(retransmit_delta);
        tokio::pin!(timer_a);

        let mut proceeding = false;

        let final_response = loop {
            tokio::select! {
                _ = &mut timer_b => {
                    let _ = user.send(Err(Error::RequestTimedOut));
                    let _ = errors.send(Error::RequestTimedOut);
                    return;
                }
                _ = &mut timer_a, if !reliable && !proceeding => {
                    if let Err(e) = transport.send((*request).clone().into()).await {
                        let _ = user.send(Err(e.into()));
                        return;
                    }

                    retransmit_delta *= 2;
                    timer_a.as_mut().reset(Instant::now() + retransmit_delta);
                }
                event = registration.receive() => match event {
                    TxEvent::Message(SipMessage::Response(response)) => {
                        match response.line.code.kind() {
                            CodeKind::Provisional => {
                                proceeding = true;
                                let _ = user.send(Ok(response));
                            }
                            CodeKind::Success => {
                                let _ = user.send(Ok(response));
                                return;
                            }
                            _ => {
                                let _ = user.send(Ok(response.clone()));
                                break response;
                            }
                        }
                    }
                    TxEvent::Message(SipMessage::Request(_)) => {}
                    TxEvent::Cancelled => {}
                    TxEvent::TransportError(message) => {
                        let _ = user.send(Err(Error::TransportFailed(message)));
                        return;
                    }
                    TxEvent::Respond(_, result) => {
                        let _ = result.send(Err(Error::NoMatchingTransaction));
                    }
                    TxEvent::Terminate => return,
                }
            }
        };

        // Completed. Acknowledge the negative final response and repeat
        // the ACK for every retransmission of it during the timer D
        // window; zero wait on reliable transports.
        let ack = create_ack(&request, &final_response);

        if let Err(e) = transport.send(ack.clone().into()).await {
            let _ = errors.send(e.into());
            return;
        }

        if reliable {
            return;
        }

        let timer_d = sleep(TIMER_D);
        tokio::pin!(timer_d);

        loop {
            tokio::select! {
                _ = &mut timer_d => return,
                event = registration.receive() => match event {
                    TxEvent::Message(SipMessage::Response(response)) => {
                        if response.line.code.is_final()
                            && response.line.code.kind() != CodeKind::Success
                        {
                            if let Err(e) = transport.send(ack.clone().into()).await {
                                let _ = errors.send(e.into());
                                return;
                            }
                        }
                    }
                    TxEvent::Message(SipMessage::Request(_)) => {}
                    TxEvent::Cancelled => {}
                    TxEvent::TransportError(_) => return,
                    TxEvent::Respond(_, result) => {
                        let _ = result.send(Err(Error::NoMatchingTransaction));
                    }
                    TxEvent::Terminate => return,
                }
            }
        }
    }
}

/// Build the ACK for a negative final response. It reuses the INVITE's
/// top Via (same branch), From, Call-ID and CSeq number; the To is taken
/// from the response to carry its tag.
fn create_ack(request: &Request, response: &Response) -> Request {
    Request {
        line: RequestLine {
            method: Method::ACK,
            uri: request.line.uri.clone(),
        },
        base: BaseHeaders {
            via: request.base.top_via().cloned().into_iter().collect(),
            from: request.base.from.clone(),
            to: response.base.to.clone(),
            call_id: request.base.call_id.clone(),
            cseq: CSeq::new(request.base.cseq.cseq, Method::ACK),
        },
        headers: Headers::new(),
        body: Bytes::new(),
    }
}
