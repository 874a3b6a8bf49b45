use bytesstr::BytesStr;
use std::fmt;

/// Typed `From`/`To` header: an addr-spec with an optional tag
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FromTo {
    pub uri: BytesStr,
    pub tag: Option<BytesStr>,
}

impl FromTo {
    pub fn new<U>(uri: U, tag: Option<BytesStr>) -> Self
    where
        U: Into<BytesStr>,
    {
        Self {
            uri: uri.into(),
            tag,
        }
    }
}

impl fmt::Display for FromTo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.uri)?;

        if let Some(tag) = &self.tag {
            write!(f, ";tag={}", tag)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn print() {
        let from = FromTo::new("sip:alice@example.com", Some("a48s".into()));

        assert_eq!(from.to_string(), "<sip:alice@example.com>;tag=a48s");
    }

    #[test]
    fn print_without_tag() {
        let to = FromTo::new("sip:bob@example.com", None);

        assert_eq!(to.to_string(), "<sip:bob@example.com>");
    }
}
