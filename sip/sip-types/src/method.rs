use bytesstr::BytesStr;
use std::fmt;

/// Represents a SIP-Method.
///
/// Well known methods are provided as constants:
///
/// ```
/// use vireo_sip_types::Method;
///
/// let _invite = Method::INVITE;
///
/// // custom methods can also be used:
/// let _custom = Method::from("HELLO");
/// ```
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Method(Repr);

macro_rules! methods {
    ($($print:literal, $ident:ident;)+) => {
        #[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
        #[allow(clippy::upper_case_acronyms)]
        enum Repr {
            $($ident,)+
            Other(BytesStr),
        }

        impl Method {
            $(pub const $ident: Self = Self(Repr::$ident);)+

            fn from_str(s: &str) -> Self {
                $(
                if s.eq_ignore_ascii_case($print) {
                    return Self(Repr::$ident);
                }
                )+

                Self(Repr::Other(BytesStr::from(s)))
            }
        }

        impl fmt::Display for Method {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match &self.0 {
                    $(Repr::$ident => f.write_str($print),)+
                    Repr::Other(other) => f.write_str(other),
                }
            }
        }
    };
}

methods! {
    "INVITE",    INVITE;
    "ACK",       ACK;
    "CANCEL",    CANCEL;
    "BYE",       BYE;
    "REGISTER",  REGISTER;
    "OPTIONS",   OPTIONS;
    "SUBSCRIBE", SUBSCRIBE;
    "NOTIFY",    NOTIFY;
    "REFER",     REFER;
    "MESSAGE",   MESSAGE;
    "INFO",      INFO;
    "UPDATE",    UPDATE;
    "PRACK",     PRACK;
}

impl From<&str> for Method {
    fn from(s: &str) -> Self {
        Self::from_str(s)
    }
}
