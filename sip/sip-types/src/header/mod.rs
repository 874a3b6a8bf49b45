//! Header storage and the typed headers the transaction layer works with

use bytesstr::BytesStr;
use std::fmt;
use std::hash::{Hash, Hasher};

pub mod typed;

/// Case-insensitive SIP header name.
///
/// Well known names are provided as constants; anything else is carried
/// verbatim in the `Other` variant.
#[derive(Debug, Clone, Eq)]
pub enum Name {
    Via,
    From,
    To,
    CallId,
    CSeq,
    Contact,
    Route,
    RecordRoute,
    MaxForwards,
    Expires,
    Allow,
    Supported,
    UserAgent,
    ContentLength,
    ContentType,
    WwwAuthenticate,
    ProxyAuthenticate,
    Authorization,
    ProxyAuthorization,
    Other(BytesStr),
}

impl Name {
    /// The canonical print name of the header
    pub fn as_print_str(&self) -> &str {
        match self {
            Name::Via => "Via",
            Name::From => "From",
            Name::To => "To",
            Name::CallId => "Call-ID",
            Name::CSeq => "CSeq",
            Name::Contact => "Contact",
            Name::Route => "Route",
            Name::RecordRoute => "Record-Route",
            Name::MaxForwards => "Max-Forwards",
            Name::Expires => "Expires",
            Name::Allow => "Allow",
            Name::Supported => "Supported",
            Name::UserAgent => "User-Agent",
            Name::ContentLength => "Content-Length",
            Name::ContentType => "Content-Type",
            Name::WwwAuthenticate => "WWW-Authenticate",
            Name::ProxyAuthenticate => "Proxy-Authenticate",
            Name::Authorization => "Authorization",
            Name::ProxyAuthorization => "Proxy-Authorization",
            Name::Other(name) => name,
        }
    }
}

impl From<&str> for Name {
    fn from(s: &str) -> Self {
        const KNOWN: &[Name] = &[
            Name::Via,
            Name::From,
            Name::To,
            Name::CallId,
            Name::CSeq,
            Name::Contact,
            Name::Route,
            Name::RecordRoute,
            Name::MaxForwards,
            Name::Expires,
            Name::Allow,
            Name::Supported,
            Name::UserAgent,
            Name::ContentLength,
            Name::ContentType,
            Name::WwwAuthenticate,
            Name::ProxyAuthenticate,
            Name::Authorization,
            Name::ProxyAuthorization,
        ];

        for known in KNOWN {
            if s.eq_ignore_ascii_case(known.as_print_str()) {
                return known.clone();
            }
        }

        Name::Other(BytesStr::from(s))
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        self.as_print_str()
            .eq_ignore_ascii_case(other.as_print_str())
    }
}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for b in self.as_print_str().bytes() {
            state.write_u8(b.to_ascii_lowercase());
        }
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_print_str())
    }
}

/// A plain name/value header
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub name: Name,
    pub value: BytesStr,
}

impl Header {
    pub fn new<V>(name: Name, value: V) -> Self
    where
        V: Into<BytesStr>,
    {
        Self {
            name,
            value: value.into(),
        }
    }
}

/// Ordered collection of auxiliary headers of a message.
///
/// Base headers (Via, From, To, Call-ID, CSeq) are stored typed beside this
/// collection and never appear in it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Headers(Vec<Header>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns the value of the first header with the given name
    pub fn get(&self, name: &Name) -> Option<&BytesStr> {
        self.0.iter().find(|h| &h.name == name).map(|h| &h.value)
    }

    pub fn contains(&self, name: &Name) -> bool {
        self.get(name).is_some()
    }

    /// Append a header
    pub fn push<V>(&mut self, name: Name, value: V)
    where
        V: Into<BytesStr>,
    {
        self.0.push(Header::new(name, value));
    }

    /// Remove every header with the given name
    pub fn remove(&mut self, name: &Name) {
        self.0.retain(|h| &h.name != name);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.0.iter()
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for header in &self.0 {
            write!(f, "{}: {}\r\n", header.name, header.value)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn name_case_insensitive() {
        assert_eq!(Name::from("call-id"), Name::CallId);
        assert_eq!(Name::from("X-Custom"), Name::from("x-custom"));
        assert_ne!(Name::from("X-Custom"), Name::from("X-Other"));
    }

    #[test]
    fn headers_lookup() {
        let mut headers = Headers::new();
        headers.push(Name::Allow, "INVITE, ACK");
        headers.push(Name::from("X-Custom"), "1");

        assert!(headers.contains(&Name::Allow));
        assert_eq!(headers.get(&Name::from("x-custom")).unwrap().as_str(), "1");
        assert!(!headers.contains(&Name::Supported));

        headers.remove(&Name::Allow);
        assert!(!headers.contains(&Name::Allow));
    }

    #[test]
    fn headers_print() {
        let mut headers = Headers::new();
        headers.push(Name::UserAgent, "vireo");

        assert_eq!(headers.to_string(), "User-Agent: vireo\r\n");
    }
}
