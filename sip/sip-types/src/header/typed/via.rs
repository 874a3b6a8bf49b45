use crate::host::HostPort;
use bytesstr::BytesStr;
use std::fmt;

/// A single `name` or `name=value` parameter
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Param {
    pub name: BytesStr,
    pub value: Option<BytesStr>,
}

/// Ordered `;`-separated parameter list as found in Via headers and URIs
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Params(Vec<Param>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_val(&self, name: &str) -> Option<&BytesStr> {
        self.0
            .iter()
            .find(|p| p.name.as_str().eq_ignore_ascii_case(name))
            .and_then(|p| p.value.as_ref())
    }

    pub fn has(&self, name: &str) -> bool {
        self.0
            .iter()
            .any(|p| p.name.as_str().eq_ignore_ascii_case(name))
    }

    /// Set `name` to `value`, replacing an existing parameter of that name
    pub fn push_or_edit<V>(&mut self, name: &str, value: V)
    where
        V: Into<BytesStr>,
    {
        let value = Some(value.into());

        if let Some(param) = self
            .0
            .iter_mut()
            .find(|p| p.name.as_str().eq_ignore_ascii_case(name))
        {
            param.value = value;
        } else {
            self.0.push(Param {
                name: BytesStr::from(name),
                value,
            });
        }
    }
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for param in &self.0 {
            match &param.value {
                Some(value) => write!(f, ";{}={}", param.name, value)?,
                None => write!(f, ";{}", param.name)?,
            }
        }

        Ok(())
    }
}

/// Typed `Via` header (one hop)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Via {
    /// Transport identifier as printed after `SIP/2.0/` (e.g. `UDP`)
    pub transport: BytesStr,
    pub sent_by: HostPort,
    pub params: Params,
}

impl Via {
    /// Create a new Via hop carrying the given branch parameter
    pub fn new<T, B>(transport: T, sent_by: HostPort, branch: B) -> Self
    where
        T: Into<BytesStr>,
        B: Into<BytesStr>,
    {
        let mut params = Params::new();
        params.push_or_edit("branch", branch.into());

        Self {
            transport: transport.into(),
            sent_by,
            params,
        }
    }

    pub fn branch(&self) -> Option<&BytesStr> {
        self.params.get_val("branch")
    }
}

impl fmt::Display for Via {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SIP/2.0/{} {}{}", self.transport, self.sent_by, self.params)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn print() {
        let via = Via::new("UDP", HostPort::from("example.com:5060"), "z9hG4bKabc");

        assert_eq!(
            via.to_string(),
            "SIP/2.0/UDP example.com:5060;branch=z9hG4bKabc"
        );
    }

    #[test]
    fn edit_params() {
        let mut via = Via::new("UDP", HostPort::from("example.com"), "z9hG4bKabc");

        via.params.push_or_edit("received", "192.0.2.1");
        via.params.push_or_edit("branch", "z9hG4bKdef");

        assert_eq!(via.branch().unwrap().as_str(), "z9hG4bKdef");
        assert_eq!(via.params.get_val("received").unwrap().as_str(), "192.0.2.1");
    }
}
