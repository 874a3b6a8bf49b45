//! Typed representations of the headers the transaction layer inspects

mod call_id;
mod cseq;
mod from_to;
mod via;

pub use call_id::CallId;
pub use cseq::CSeq;
pub use from_to::FromTo;
pub use via::{Param, Params, Via};
