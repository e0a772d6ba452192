//! Hop protocol and client runtime.
//!
//! Hop is a versioned key-value RPC protocol spoken over a single TCP
//! connection. Requests are correlated with responses by 16-bit tags, so
//! any number of operations can be in flight at once; the `Client` runs
//! a reader/writer thread pair that pipelines requests and dispatches
//! replies to the callers that are waiting on them.

pub mod buffer;
pub mod client;
mod conv;
pub mod error;
mod fmt;
pub mod logging;
pub mod msg;
pub mod tagpool;

pub use crate::client::{Client, ClientConfig};
pub use crate::error::{HopError, Result};
pub use crate::msg::{version, AtomicOp, Msg, MsgType, NOTAG};
pub use crate::tagpool::TagPool;
