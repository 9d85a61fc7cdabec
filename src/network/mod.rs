//! Network Module Implementation
//!
//! Socketmap wire handling: netstring framing of requests and responses and
//! the per-connection read buffer.
//!
//! # Components
//!
//! - `Connection`: buffers reads from a TCP connection and yields complete requests
//! - `RequestFrame`: parsing and validation of one netstring request
//! - `NetstringCodec`: client side decoder for responses
//!
//! Requests may arrive fragmented over several reads or coalesced into one;
//! both are handled by parsing the buffer incrementally.

pub use connection::Connection;
pub use frame::{format_response, NetstringCodec, RequestFrame};
mod connection;
mod frame;
