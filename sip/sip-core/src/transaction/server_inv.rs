use super::consts::{T1, T2, T4, TIMER_1XX};
use super::{TxEvent, TxRegistration};
use crate::error::Error;
use crate::transport::TpHandle;
use crate::{Request, Response, SipMessage};
use sip_types::{Code, CodeKind, Method};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};

/// INVITE server transaction (RFC 3261 section 17.2.1).
///
/// Proceeding -> Completed -> Confirmed -> Terminated. A 2XX response
/// terminates the transaction immediately, its retransmissions are owned
/// by the layer above. The ACK to a 2XX never traverses this transaction,
/// it carries a fresh branch and arrives as a standalone message.
pub(crate) struct InviteServerTx {
    pub(crate) registration: TxRegistration,
    pub(crate) transport: TpHandle,
    pub(crate) errors: mpsc::UnboundedSender<Error>,
    pub(crate) origin: Arc<Request>,
}

impl InviteServerTx {
    #[tracing::instrument(name = "tx_inv_server", level = "debug", skip(self), fields(key = %self.registration.key()))]
    pub(crate) async fn run(self) {
        let InviteServerTx {
            mut registration,
            transport,
            errors,
            origin,
        } = self;

        let reliable = transport.reliable();
        let mut last_response: Option<Response> = None;

        // Proceeding. If the user has not produced any response within
        // the 1xx window, answer with a 100 Trying on their behalf.
        let auto_trying = sleep(TIMER_1XX);
        tokio::pin!(auto_trying);

        loop {
            tokio::select! {
                _ = &mut auto_trying, if last_response.is_none() => {
                    let trying = Response::from_request(&origin, Code::TRYING, None);

                    if let Err(e) = transport.send(trying.clone().into()).await {
                        let _ = errors.send(e.into());
                        return;
                    }

                    last_response = Some(trying);
                }
                event = registration.receive() => match event {
                    TxEvent::Message(SipMessage::Request(request)) => {
                        if request.line.method != Method::INVITE {
                            continue;
                        }

                        // retransmission, repeat the last provisional response
                        if let Some(response) = &last_response {
                            if let Err(e) = transport.send(response.clone().into()).await {
                                let _ = errors.send(e.into());
                                return;
                            }
                        }
                    }
                    TxEvent::Message(SipMessage::Response(_)) => {}
                    TxEvent::Respond(response, result) => {
                        let kind = response.line.code.kind();

                        let sent = transport.send(response.clone().into()).await;
                        let failed = sent.is_err();
                        let _ = result.send(sent.map_err(Error::from));

                        if failed {
                            return;
                        }

                        match kind {
                            CodeKind::Provisional => last_response = Some(response),
                            // the layer above owns 2XX retransmissions
                            CodeKind::Success => return,
                            _ => {
                                last_response = Some(response);
                                break;
                            }
                        }
                    }
                    TxEvent::Cancelled => {
                        // a matching CANCEL arrived before any final
                        // response, answer the INVITE with 487
                        let terminated =
                            Response::from_request(&origin, Code::REQUEST_TERMINATED, None);

                        if let Err(e) = transport.send(terminated.clone().into()).await {
                            let _ = errors.send(e.into());
                            return;
                        }

                        last_response = Some(terminated);
                        break;
                    }
                    TxEvent::TransportError(_) => return,
                    TxEvent::Terminate => return,
                }
            }
        }

        // Completed. Retransmit the final response until the ACK arrives
        // or the ACK wait expires.
        let mut response = match last_response {
            Some(response) => response,
            None => return,
        };

        let timer_h = sleep(T1 * 64);
        tokio::pin!(timer_h);

        let mut retransmit_delta = T1;
        let timer_g = sleep(retransmit_delta);
        tokio::pin!(timer_g);

        loop {
            tokio::select! {
                _ = &mut timer_h => {
                    let _ = errors.send(Error::RequestTimedOut);
                    return;
                }
                _ = &mut timer_g, if !reliable => {
                    if let Err(e) = transport.send(response.clone().into()).await {
                        let _ = errors.send(e.into());
                        return;
                    }

                    retransmit_delta = (retransmit_delta * 2).min(T2);
                    timer_g.as_mut().reset(Instant::now() + retransmit_delta);
                }
                event = registration.receive() => match event {
                    TxEvent::Message(SipMessage::Request(request)) => {
                        if request.line.method == Method::ACK {
                            break;
                        }

                        if request.line.method == Method::INVITE {
                            if let Err(e) = transport.send(response.clone().into()).await {
                                let _ = errors.send(e.into());
                                return;
                            }
                        }
                    }
                    TxEvent::Message(SipMessage::Response(_)) => {}
                    TxEvent::Respond(new_response, result) => {
                        // a newer response supersedes the pending retransmission
                        let sent = transport.send(new_response.clone().into()).await;
                        let failed = sent.is_err();
                        let _ = result.send(sent.map_err(Error::from));

                        if failed {
                            return;
                        }

                        response = new_response;
                    }
                    // a final response is already being retransmitted
                    TxEvent::Cancelled => {}
                    TxEvent::TransportError(_) => return,
                    TxEvent::Terminate => return,
                }
            }
        }

        // Confirmed. Absorb ACK retransmissions until timer I fires;
        // zero wait on reliable transports.
        if reliable {
            return;
        }

        let timer_i = sleep(T4);
        tokio::pin!(timer_i);

        loop {
            tokio::select! {
                _ = &mut timer_i => return,
                event = registration.receive() => match event {
                    TxEvent::Terminate => return,
                    TxEvent::TransportError(_) => return,
                    TxEvent::Respond(_, result) => {
                        let _ = result.send(Err(Error::NoMatchingTransaction));
                    }
                    // ACK retransmissions are ignored
                    _ => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::test_utils::{expect_response, msg, test_layer};
    use crate::transaction::consts::{T1, T4, TIMER_1XX};
    use crate::transaction::TxKey;
    use crate::Error;
    use sip_types::{Code, Method};
    use std::time::Duration;
    use tokio::time::{sleep, Instant};

    #[tokio::test(start_paused = true)]
    async fn automatic_trying_after_1xx_window() {
        let (layer, mut events, mut peer) = test_layer(false);

        let started = Instant::now();
        peer.inject(msg::invite("z9hG4bKabc")).await;

        let incoming = events.requests.recv().await.unwrap();
        assert_eq!(incoming.request.line.method, Method::INVITE);

        let trying = expect_response(peer.outgoing().await);
        assert_eq!(trying.line.code, Code::TRYING);
        assert!(started.elapsed() >= TIMER_1XX);

        // the transaction terminates on a 2XX, a fresh-branch ACK then
        // arrives outside of it
        incoming
            .tx
            .respond(msg::response(incoming.tx.origin(), Code::OK))
            .await
            .unwrap();

        let ok = expect_response(peer.outgoing().await);
        assert_eq!(ok.line.code, Code::OK);

        peer.inject(msg::request(Method::ACK, "z9hG4bKfresh")).await;

        let ack = events.acks.recv().await.unwrap();
        assert_eq!(ack.line.method, Method::ACK);
        assert!(layer.registry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn user_provisional_suppresses_the_automatic_trying() {
        let (_layer, mut events, mut peer) = test_layer(false);

        peer.inject(msg::invite("z9hG4bKabc")).await;
        let incoming = events.requests.recv().await.unwrap();

        incoming
            .tx
            .respond(msg::response(incoming.tx.origin(), Code::RINGING))
            .await
            .unwrap();

        let ringing = expect_response(peer.outgoing().await);
        assert_eq!(ringing.line.code, Code::RINGING);

        sleep(TIMER_1XX * 2).await;
        assert!(peer.try_outgoing().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn failure_response_is_retransmitted_and_acknowledged() {
        let (layer, mut events, mut peer) = test_layer(false);

        peer.inject(msg::invite("z9hG4bKabc")).await;
        let incoming = events.requests.recv().await.unwrap();

        incoming
            .tx
            .respond(msg::response(incoming.tx.origin(), Code::NOT_FOUND))
            .await
            .unwrap();
        assert_eq!(expect_response(peer.outgoing().await).line.code, Code::NOT_FOUND);

        // timer G fires at T1, then doubles
        sleep(T1 + Duration::from_millis(1)).await;
        assert_eq!(expect_response(peer.outgoing().await).line.code, Code::NOT_FOUND);

        sleep(T1 * 2 + Duration::from_millis(1)).await;
        assert_eq!(expect_response(peer.outgoing().await).line.code, Code::NOT_FOUND);

        // a duplicate INVITE is answered with the cached response
        peer.inject(msg::invite("z9hG4bKabc")).await;
        assert_eq!(expect_response(peer.outgoing().await).line.code, Code::NOT_FOUND);

        // the ACK confirms the transaction and stops retransmissions
        peer.inject(msg::non2xx_ack(&msg::invite("z9hG4bKabc"))).await;
        sleep(T1 * 8).await;
        assert!(peer.try_outgoing().is_none());

        // timer I tears the transaction down
        sleep(T4).await;
        let key = TxKey::server(&msg::invite("z9hG4bKabc").base).unwrap();
        assert!(!layer.registry().contains(&key));
    }

    #[tokio::test(start_paused = true)]
    async fn ack_wait_timeout_reports_an_error() {
        let (layer, mut events, mut peer) = test_layer(false);

        peer.inject(msg::invite("z9hG4bKabc")).await;
        let incoming = events.requests.recv().await.unwrap();

        incoming
            .tx
            .respond(msg::response(incoming.tx.origin(), Code::BUSY_HERE))
            .await
            .unwrap();

        // drain the response and every timer G retransmission until
        // timer H gives up
        let deadline = Instant::now() + T1 * 64;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => break,
                _ = peer.outgoing() => {}
            }
        }

        let error = events.errors.recv().await.unwrap();
        assert!(matches!(error, Error::RequestTimedOut));

        sleep(Duration::from_millis(1)).await;
        assert!(layer.registry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn no_retransmissions_on_reliable_transports() {
        let (layer, mut events, mut peer) = test_layer(true);

        peer.inject(msg::invite("z9hG4bKabc")).await;
        let incoming = events.requests.recv().await.unwrap();

        incoming
            .tx
            .respond(msg::response(incoming.tx.origin(), Code::NOT_FOUND))
            .await
            .unwrap();
        assert_eq!(expect_response(peer.outgoing().await).line.code, Code::NOT_FOUND);

        sleep(T1 * 4).await;
        assert!(peer.try_outgoing().is_none());

        // the ACK terminates the transaction without a timer I wait
        peer.inject(msg::non2xx_ack(&msg::invite("z9hG4bKabc"))).await;
        sleep(Duration::from_millis(1)).await;
        assert!(layer.registry().is_empty());
    }
}
