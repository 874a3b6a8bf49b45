use super::consts::{T1, T2, T4};
use super::{TxEvent, TxRegistration};
use crate::error::{Error, Result};
use crate::transport::TpHandle;
use crate::{Request, Response, SipMessage};
use sip_types::CodeKind;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};

/// Non-INVITE client transaction (RFC 3261 section 17.1.2).
///
/// Trying -> Proceeding -> Completed -> Terminated.
pub(crate) struct ClientTx {
    pub(crate) registration: TxRegistration,
    pub(crate) transport: TpHandle,
    pub(crate) errors: mpsc::UnboundedSender<Error>,
    pub(crate) user: mpsc::UnboundedSender<Result<Response>>,
    pub(crate) request: Arc<Request>,
}

impl ClientTx {
    #[tracing::instrument(name = "tx_client", level = "debug", skip(self), fields(key = %self.registration.key()))]
    pub(crate) async fn run(self) {
        let ClientTx {
            mut registration,
            transport,
            errors,
            user,
            request,
        } = self;

        let reliable = transport.reliable();

        // Trying. Send the request, retransmit on timer E, give up when
        // timer F fires.
        if let Err(e) = transport.send((*request).clone().into()).await {
            let _ = user.send(Err(e.into()));
            return;
        }

        let timer_f = sleep(T1 * 64);
        tokio::pin!(timer_f);

        let mut retransmit_delta = T1;
        let timer_e = sleep(retransmit_delta);
        tokio::pin!(timer_e);

        let mut proceeding = false;

        loop {
            tokio::select! {
                _ = &mut timer_f => {
                    let _ = user.send(Err(Error::RequestTimedOut));
                    let _ = errors.send(Error::RequestTimedOut);
                    return;
                }
                _ = &mut timer_e, if !reliable => {
                    if let Err(e) = transport.send((*request).clone().into()).await {
                        let _ = user.send(Err(e.into()));
                        return;
                    }

                    // once a provisional response has arrived
                    // retransmissions continue at a flat T2 pace
                    retransmit_delta = if proceeding {
                        T2
                    } else {
                        (retransmit_delta * 2).min(T2)
                    };
                    timer_e.as_mut().reset(Instant::now() + retransmit_delta);
                }
                event = registration.receive() => match event {
                    TxEvent::Message(SipMessage::Response(response)) => {
                        let kind = response.line.code.kind();
                        let _ = user.send(Ok(response));

                        if kind == CodeKind::Provisional {
                            proceeding = true;
                        } else {
                            break;
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
        }

        // Completed. Absorb retransmitted final responses until timer K
        // fires; zero wait on reliable transports.
        if reliable {
            return;
        }

        let timer_k = sleep(T4);
        tokio::pin!(timer_k);

        loop {
            tokio::select! {
                _ = &mut timer_k => return,
                event = registration.receive() => match event {
                    TxEvent::Terminate => return,
                    TxEvent::TransportError(_) => return,
                    TxEvent::Respond(_, result) => {
                        let _ = result.send(Err(Error::NoMatchingTransaction));
                    }
                    // retransmitted final responses are absorbed
                    _ => {}
                }
            }
        }
    }
}
