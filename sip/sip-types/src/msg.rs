//! Request and status lines

use crate::code::Code;
use crate::method::Method;
use bytesstr::BytesStr;
use std::fmt;

/// Request line of a SIP request
#[derive(Debug, Clone, PartialEq)]
pub struct RequestLine {
    pub method: Method,
    pub uri: BytesStr,
}

impl fmt::Display for RequestLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} SIP/2.0", self.method, self.uri)
    }
}

/// Status line of a SIP response
#[derive(Debug, Clone, PartialEq)]
pub struct StatusLine {
    pub code: Code,
    pub reason: Option<BytesStr>,
}

impl StatusLine {
    /// Create a status line, defaulting the reason phrase for known codes
    pub fn new(code: Code, reason: Option<BytesStr>) -> Self {
        Self {
            reason: reason.or_else(|| code.text().map(BytesStr::from_static)),
            code,
        }
    }
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SIP/2.0 {}", self.code.into_u16())?;

        if let Some(reason) = &self.reason {
            write!(f, " {}", reason)?;
        }

        Ok(())
    }
}

/// Either a request or a status line
#[derive(Debug, Clone, PartialEq)]
pub enum MessageLine {
    Request(RequestLine),
    Response(StatusLine),
}

impl MessageLine {
    pub fn is_request(&self) -> bool {
        matches!(self, MessageLine::Request(_))
    }
}

impl fmt::Display for MessageLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageLine::Request(line) => write!(f, "{}", line),
            MessageLine::Response(line) => write!(f, "{}", line),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn request_line() {
        let line = RequestLine {
            method: Method::INVITE,
            uri: "sip:bob@example.com".into(),
        };

        assert_eq!(line.to_string(), "INVITE sip:bob@example.com SIP/2.0");
    }

    #[test]
    fn status_line_default_reason() {
        assert_eq!(
            StatusLine::new(Code::TRYING, None).to_string(),
            "SIP/2.0 100 Trying"
        );
        assert_eq!(StatusLine::new(Code::from(299), None).to_string(), "SIP/2.0 299");
    }
}
