//! The RESP wire protocol: request parsing and reply encoding.

pub mod resp;

pub use resp::{parse, ParseOutcome, Reply, RespError};
