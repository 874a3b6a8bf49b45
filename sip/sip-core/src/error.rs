use bytesstr::BytesStr;
use sip_types::Code;
use std::{fmt, io};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("malformed message, {0}")]
    MalformedMessage(&'static str),
    #[error("no matching transaction")]
    NoMatchingTransaction,
    #[error("transaction already exists")]
    DuplicateTransaction,
    #[error("request timed out")]
    RequestTimedOut,
    #[error("transport failed, {0}")]
    TransportFailed(String),
    #[error("response does not match any transaction")]
    OrphanResponse,
    #[error("handler already registered for this method")]
    AlreadyRegistered,
    #[error("can not send through stopped server")]
    ServerStopped,
    #[error("authorization failed, {0}")]
    AuthorizationFailed(String),
    #[error(transparent)]
    Request(#[from] RequestError),
}

/// A request was answered with a final non-2XX response, or was terminated
/// before one arrived
#[derive(Debug, Clone)]
pub struct RequestError {
    pub code: Code,
    pub reason: Option<BytesStr>,
    /// Short description of the request the error belongs to
    pub request: BytesStr,
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "request '{}' failed with {}", self.request, self.code.into_u16())?;

        if let Some(reason) = &self.reason {
            write!(f, " ({})", reason)?;
        }

        Ok(())
    }
}

impl std::error::Error for RequestError {}
