//! [HostPort] and [Host] types found in URIs and [Via] headers
//!
//! [Via]: crate::header::typed::Via

use bytesstr::BytesStr;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// Either IP address or FQDN
#[derive(Debug, Clone, PartialEq, Hash, Eq)]
pub enum Host {
    IP6(Ipv6Addr),
    IP4(Ipv4Addr),
    Name(BytesStr),
}

impl From<IpAddr> for Host {
    fn from(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(addr) => Host::IP4(addr),
            IpAddr::V6(addr) => Host::IP6(addr),
        }
    }
}

impl From<Ipv4Addr> for Host {
    fn from(addr: Ipv4Addr) -> Self {
        Host::IP4(addr)
    }
}

impl From<Ipv6Addr> for Host {
    fn from(addr: Ipv6Addr) -> Self {
        Host::IP6(addr)
    }
}

impl From<&str> for Host {
    fn from(name: &str) -> Self {
        let bare = name.trim_start_matches('[').trim_end_matches(']');

        if let Ok(addr) = bare.parse::<IpAddr>() {
            addr.into()
        } else {
            Host::Name(BytesStr::from(name))
        }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Host::IP6(addr) => write!(f, "[{}]", addr),
            Host::IP4(addr) => write!(f, "{}", addr),
            Host::Name(name) => f.write_str(name),
        }
    }
}

/// [Host] with an optional port
#[derive(Debug, Clone, PartialEq, Hash, Eq)]
pub struct HostPort {
    pub host: Host,
    pub port: Option<u16>,
}

impl HostPort {
    pub fn new(host: Host, port: Option<u16>) -> Self {
        Self { host, port }
    }
}

impl From<Host> for HostPort {
    fn from(host: Host) -> Self {
        Self { host, port: None }
    }
}

impl From<SocketAddr> for HostPort {
    fn from(addr: SocketAddr) -> Self {
        Self {
            host: addr.ip().into(),
            port: Some(addr.port()),
        }
    }
}

impl From<&str> for HostPort {
    fn from(s: &str) -> Self {
        // IPv6 literals keep the colon-split away from the address itself
        let split = if s.starts_with('[') {
            s.rfind("]:").map(|i| i + 1)
        } else {
            s.rfind(':')
        };

        match split {
            Some(i) => match s[i + 1..].parse::<u16>() {
                Ok(port) => Self {
                    host: Host::from(&s[..i]),
                    port: Some(port),
                },
                Err(_) => Self {
                    host: Host::from(s),
                    port: None,
                },
            },
            None => Self {
                host: Host::from(s),
                port: None,
            },
        }
    }
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(port) = self.port {
            write!(f, "{}:{}", self.host, port)
        } else {
            write!(f, "{}", self.host)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn host_port_from_str() {
        let hp = HostPort::from("example.com:5060");
        assert_eq!(hp.host, Host::Name("example.com".into()));
        assert_eq!(hp.port, Some(5060));

        let hp = HostPort::from("192.168.0.1");
        assert_eq!(hp.host, Host::IP4("192.168.0.1".parse().unwrap()));
        assert_eq!(hp.port, None);
    }

    #[test]
    fn host_port_display() {
        assert_eq!(HostPort::from("example.com:5060").to_string(), "example.com:5060");
        assert_eq!(HostPort::from("[::1]:5060").to_string(), "[::1]:5060");
    }
}
