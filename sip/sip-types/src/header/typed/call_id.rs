use bytesstr::BytesStr;
use std::fmt;

/// Typed `Call-ID` header
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallId(pub BytesStr);

impl CallId {
    pub fn new<V>(value: V) -> Self
    where
        V: Into<BytesStr>,
    {
        Self(value.into())
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
