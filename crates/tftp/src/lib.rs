//! TFTP (Trivial File Transfer Protocol) Server
//!
//! A read-only TFTP server whose file content comes from a pluggable
//! [`ReadHandler`] instead of a directory. Supports:
//! - Read requests (RRQ); write requests are refused
//! - Binary (octet) transfer mode
//! - Block size negotiation (RFC 2348)
//! - Timeout and transfer size options (RFC 2349), with the size supplied by
//!   the handler while it streams
//! - Concurrent transfers, one task and one socket each
//!
//! # Serving content
//!
//! ```rust,no_run
//! use tftp::{OutgoingTransfer, ReadHandler, TftpError, TftpServer, TftpServerConfig};
//!
//! struct Motd;
//!
//! impl ReadHandler for Motd {
//!     async fn handle_read<T: OutgoingTransfer>(&self, filename: &str, transfer: &mut T) -> Result<(), TftpError> {
//!         if filename != "motd.txt" {
//!             return Err(TftpError::file_not_found());
//!         }
//!         let body = b"hello from tftp\n";
//!         transfer.set_size(body.len() as u64);
//!         transfer.write(body).await.map_err(|e| TftpError::undefined(e.to_string()))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = TftpServerConfig {
//!         bind_address: "127.0.0.1:6969".to_string(),
//!         ..Default::default()
//!     };
//!     TftpServer::new(config, Motd).run().await
//! }
//! ```

mod handler;
mod protocol;
mod server;
mod transfer;

pub use handler::*;
pub use protocol::*;
pub use server::*;
pub use transfer::*;
