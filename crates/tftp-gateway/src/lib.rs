//! TFTP to HTTP Gateway
//!
//! A read-only TFTP server whose files live on an HTTP origin. Every read
//! request becomes exactly one GET:
//!
//! - the filename is appended to a base URL, segment by segment and
//!   percent-encoded, or ignored when path appending is disabled
//! - `X-TFTP-IP`, `X-TFTP-Port` and `X-TFTP-File` tell the origin who asked
//!   for what
//! - a 200 body is streamed into the transfer, with its `Content-Length`
//!   reported as the TFTP transfer size
//! - a 404 becomes TFTP "file not found"; any other failure a generic error
//!
//! Protocol handling (sockets, option negotiation, retransmission) lives in
//! the [`tftp`] crate; this crate plugs into it as a [`tftp::ReadHandler`].

pub mod config;
pub mod error;
pub mod fetch;
pub mod handler;
pub mod resolve;

pub use config::*;
pub use error::*;
pub use fetch::{ForwardHeaders, HttpOrigin, Origin, OriginBody, OriginResponse};
pub use handler::Gateway;
pub use resolve::resolve;
