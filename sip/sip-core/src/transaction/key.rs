use super::consts::RFC3261_BRANCH_PREFIX;
use crate::error::{Error, Result};
use crate::BaseHeaders;
use bytesstr::BytesStr;
use sip_types::{HostPort, Method};
use std::fmt;

static EMPTY: BytesStr = BytesStr::empty();

/// Transaction key, used to match a message to an ongoing transaction
/// (RFC 3261 sections 17.1.3 and 17.2.3)
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct TxKey(Repr);

impl fmt::Display for TxKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_server() {
            write!(f, "server:")?;
        } else {
            write!(f, "client:")?;
        }

        let method = match &self.0 {
            Repr::RFC3261(repr) => repr.method.as_ref().unwrap_or(&Method::INVITE),
            Repr::RFC2543(repr) => repr.method.as_ref().unwrap_or(&Method::INVITE),
        };

        write!(f, "{}:{}", self.branch(), method)
    }
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
enum Repr {
    RFC3261(Rfc3261),
    RFC2543(Box<Rfc2543>),
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct Rfc3261 {
    role: Role,
    branch: BytesStr,
    method: Option<Method>,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct Rfc2543 {
    role: Role,
    method: Option<Method>,
    cseq: u32,
    from_tag: BytesStr,
    call_id: BytesStr,
    via_host_port: HostPort,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
enum Role {
    Server,
    Client,
}

// INVITE and ACK are represented as None so transaction-level ACK
// requests match their INVITE transaction. A 2xx ACK carries a fresh
// branch and forms a new key regardless.
fn filter_method(method: &Method) -> Option<Method> {
    Some(method)
        .filter(|&m| !(matches!(m, &Method::INVITE | &Method::ACK)))
        .cloned()
}

impl TxKey {
    /// Derive the server transaction key of a received request or of a
    /// response that is to be sent inside a server transaction
    pub fn server(base: &BaseHeaders) -> Result<Self> {
        Self::from_base(base, Role::Server)
    }

    /// Derive the client transaction key of a received response or of
    /// the request that created the transaction
    pub fn client(base: &BaseHeaders) -> Result<Self> {
        Self::from_base(base, Role::Client)
    }

    /// Key of the INVITE server transaction a CANCEL request targets
    pub(crate) fn invite_target(&self) -> Self {
        let mut key = self.clone();

        match &mut key.0 {
            Repr::RFC3261(repr) => repr.method = None,
            Repr::RFC2543(repr) => repr.method = None,
        }

        key
    }

    #[inline]
    pub fn is_server(&self) -> bool {
        match &self.0 {
            Repr::RFC3261(repr) => repr.role == Role::Server,
            Repr::RFC2543(repr) => repr.role == Role::Server,
        }
    }

    /// Is this the key of an INVITE transaction (or of an ACK matching one)
    #[inline]
    pub fn is_invite(&self) -> bool {
        match &self.0 {
            Repr::RFC3261(repr) => repr.method.is_none(),
            Repr::RFC2543(repr) => repr.method.is_none(),
        }
    }

    #[inline]
    pub fn branch(&self) -> &BytesStr {
        match &self.0 {
            Repr::RFC3261(repr) => &repr.branch,
            Repr::RFC2543(_) => &EMPTY,
        }
    }

    fn from_base(base: &BaseHeaders, role: Role) -> Result<Self> {
        let via = base
            .top_via()
            .ok_or(Error::MalformedMessage("missing Via header"))?;

        let branch = via.branch().unwrap_or(&EMPTY);

        let method = filter_method(&base.cseq.method);

        let repr = if branch.starts_with(RFC3261_BRANCH_PREFIX) {
            Repr::RFC3261(Rfc3261 {
                role,
                branch: branch.clone(),
                method,
            })
        } else {
            // pre-RFC 3261 peer, fall back to matching over the dialog
            // identifiers. The To tag is deliberately left out so that
            // responses still match the transaction created from the
            // tag-less request.
            Repr::RFC2543(Box::new(Rfc2543 {
                role,
                method,
                cseq: base.cseq.cseq,
                from_tag: base
                    .from
                    .tag
                    .clone()
                    .ok_or(Error::MalformedMessage("missing From tag"))?,
                call_id: base.call_id.0.clone(),
                via_host_port: via.sent_by.clone(),
            }))
        };

        Ok(TxKey(repr))
    }
}
