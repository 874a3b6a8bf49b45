//! SIP message types used by the vireo transaction core.
//!
//! This crate holds the data model the core operates on: methods, status
//! codes, hosts, header storage and the typed headers the transaction layer
//! inspects. Messages print to their RFC 3261 wire form via [`Display`];
//! parsing wire text back into these types is the job of a transport/parser
//! crate and is not provided here.
//!
//! [`Display`]: std::fmt::Display

mod code;
pub mod header;
mod host;
mod method;
pub mod msg;

pub use code::{Code, CodeKind};
pub use header::{Header, Headers, Name};
pub use host::{Host, HostPort};
pub use method::Method;
