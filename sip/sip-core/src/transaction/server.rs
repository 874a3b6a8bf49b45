use super::consts::T1;
use super::{TxEvent, TxRegistration};
use crate::error::Error;
use crate::transport::TpHandle;
use crate::{Response, SipMessage};
use sip_types::CodeKind;
use tokio::sync::mpsc;
use tokio::time::sleep;

/// Non-INVITE server transaction (RFC 3261 section 17.2.2).
///
/// Trying -> Proceeding -> Completed -> Terminated.
pub(crate) struct ServerTx {
    pub(crate) registration: TxRegistration,
    pub(crate) transport: TpHandle,
    pub(crate) errors: mpsc::UnboundedSender<Error>,
}

impl ServerTx {
    #[tracing::instrument(name = "tx_server", level = "debug", skip(self), fields(key = %self.registration.key()))]
    pub(crate) async fn run(self) {
        let ServerTx {
            mut registration,
            transport,
            errors,
        } = self;

        let reliable = transport.reliable();

        // Trying and Proceeding. Retransmissions are discarded until a
        // provisional response has been sent.
        let mut last_response: Option<Response> = None;

        loop {
            match registration.receive().await {
                TxEvent::Message(SipMessage::Request(_)) => {
                    if let Some(response) = &last_response {
                        if let Err(e) = transport.send(response.clone().into()).await {
                            let _ = errors.send(e.into());
                            return;
                        }
                    }
                }
                TxEvent::Message(SipMessage::Response(_)) => {}
                TxEvent::Cancelled => {}
                TxEvent::Respond(response, result) => {
                    let kind = response.line.code.kind();

                    let sent = transport.send(response.clone().into()).await;
                    let failed = sent.is_err();
                    let _ = result.send(sent.map_err(Error::from));

                    if failed {
                        return;
                    }

                    last_response = Some(response);

                    if kind != CodeKind::Provisional {
                        break;
                    }
                }
                TxEvent::TransportError(_) => return,
                TxEvent::Terminate => return,
            }
        }

        // Completed. Answer request retransmissions with the final
        // response until timer J fires; zero wait on reliable transports.
        if reliable {
            return;
        }

        let mut response = match last_response {
            Some(response) => response,
            None => return,
        };

        let timer_j = sleep(T1 * 64);
        tokio::pin!(timer_j);

        loop {
            tokio::select! {
                _ = &mut timer_j => return,
                event = registration.receive() => match event {
                    TxEvent::Message(SipMessage::Request(_)) => {
                        if let Err(e) = transport.send(response.clone().into()).await {
                            let _ = errors.send(e.into());
                            return;
                        }
                    }
                    TxEvent::Message(SipMessage::Response(_)) => {}
                    TxEvent::Cancelled => {}
                    TxEvent::Respond(new_response, result) => {
                        let sent = transport.send(new_response.clone().into()).await;
                        let failed = sent.is_err();
                        let _ = result.send(sent.map_err(Error::from));

                        if failed {
                            return;
                        }

                        response = new_response;
                    }
                    TxEvent::TransportError(_) => return,
                    TxEvent::Terminate => return,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::test_utils::{expect_response, msg, test_layer};
    use crate::transaction::consts::T1;
    use sip_types::{Code, Method};
    use std::time::Duration;
    use tokio::time::sleep;

    #[tokio::test(start_paused = true)]
    async fn provisional_then_final() {
        let (layer, mut events, mut peer) = test_layer(false);

        peer.inject(msg::request(Method::OPTIONS, "z9hG4bKabc")).await;
        let incoming = events.requests.recv().await.unwrap();

        // retransmissions in Trying are discarded
        peer.inject(msg::request(Method::OPTIONS, "z9hG4bKabc")).await;
        sleep(Duration::from_millis(1)).await;
        assert!(peer.try_outgoing().is_none());

        incoming
            .tx
            .respond(msg::response(incoming.tx.origin(), Code::TRYING))
            .await
            .unwrap();
        assert_eq!(expect_response(peer.outgoing().await).line.code, Code::TRYING);

        // in Proceeding retransmissions are answered with the last response
        peer.inject(msg::request(Method::OPTIONS, "z9hG4bKabc")).await;
        assert_eq!(expect_response(peer.outgoing().await).line.code, Code::TRYING);

        incoming
            .tx
            .respond(msg::response(incoming.tx.origin(), Code::OK))
            .await
            .unwrap();
        assert_eq!(expect_response(peer.outgoing().await).line.code, Code::OK);

        // Completed answers retransmissions with the final response
        peer.inject(msg::request(Method::OPTIONS, "z9hG4bKabc")).await;
        assert_eq!(expect_response(peer.outgoing().await).line.code, Code::OK);

        // timer J removes the transaction
        sleep(T1 * 64 + Duration::from_millis(1)).await;
        assert!(layer.registry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn reliable_transport_terminates_on_final() {
        let (layer, mut events, mut peer) = test_layer(true);

        peer.inject(msg::request(Method::MESSAGE, "z9hG4bKabc")).await;
        let incoming = events.requests.recv().await.unwrap();

        incoming
            .tx
            .respond(msg::response(incoming.tx.origin(), Code::OK))
            .await
            .unwrap();
        assert_eq!(expect_response(peer.outgoing().await).line.code, Code::OK);

        sleep(Duration::from_millis(1)).await;
        assert!(layer.registry().is_empty());
    }
}
