use crate::{BaseHeaders, Request, Response};
use bytes::Bytes;
use sip_types::header::typed::{CSeq, CallId, FromTo, Via};
use sip_types::msg::RequestLine;
use sip_types::{Code, Headers, HostPort, Method};

pub(crate) fn base_headers(method: Method, branch: &str) -> BaseHeaders {
    BaseHeaders {
        via: vec![Via::new(
            "UDP",
            HostPort::from("client.example.com:5060"),
            branch,
        )],
        from: FromTo::new("sip:alice@example.com", Some("from-tag-1".into())),
        to: FromTo::new("sip:bob@example.com", None),
        call_id: CallId::new("call-1@example.com"),
        cseq: CSeq::new(1, method),
    }
}

pub(crate) fn request(method: Method, branch: &str) -> Request {
    Request::new(
        method.clone(),
        "sip:bob@example.com".into(),
        base_headers(method, branch),
    )
}

pub(crate) fn invite(branch: &str) -> Request {
    request(Method::INVITE, branch)
}

/// The ACK to a negative final response: same branch as the INVITE
pub(crate) fn non2xx_ack(invite: &Request) -> Request {
    Request {
        line: RequestLine {
            method: Method::ACK,
            uri: invite.line.uri.clone(),
        },
        base: BaseHeaders {
            via: invite.base.top_via().cloned().into_iter().collect(),
            from: invite.base.from.clone(),
            to: invite.base.to.clone(),
            call_id: invite.base.call_id.clone(),
            cseq: CSeq::new(invite.base.cseq.cseq, Method::ACK),
        },
        headers: Headers::new(),
        body: Bytes::new(),
    }
}

pub(crate) fn response(request: &Request, code: Code) -> Response {
    Response::from_request(request, code, None)
}
