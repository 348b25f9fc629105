//! Read Handler Contract
//!
//! The server owns sockets, option negotiation and retransmission. What a
//! transfer actually contains is decided by a [`ReadHandler`], which the
//! server calls once per accepted read request with an [`OutgoingTransfer`]
//! to write into.

use std::future::Future;
use std::net::SocketAddr;

use anyhow::Result;

use crate::protocol::TftpError;

/// The sending side of one TFTP read transfer
pub trait OutgoingTransfer: Send {
    /// Address of the requesting client
    fn remote_addr(&self) -> SocketAddr;

    /// Report the total transfer size (RFC 2349 `tsize`)
    ///
    /// Only honoured once and only before the first byte is written; later
    /// calls are ignored.
    fn set_size(&mut self, size: u64);

    /// Append bytes to the transfer
    ///
    /// Full blocks are sent as soon as they are buffered. An error means the
    /// transfer has been abandoned by the client or timed out.
    fn write(&mut self, data: &[u8]) -> impl Future<Output = Result<()>> + Send;
}

/// Callback invoked for every read request the server accepts
///
/// Each invocation runs in its own task; implementations are shared between
/// concurrent transfers and must not rely on per-transfer mutable state.
pub trait ReadHandler: Send + Sync + 'static {
    /// Produce the content of `filename` into `transfer`
    ///
    /// Returning an error aborts the transfer and sends the error to the
    /// client as an ERROR packet.
    fn handle_read<T: OutgoingTransfer>(
        &self,
        filename: &str,
        transfer: &mut T,
    ) -> impl Future<Output = Result<(), TftpError>> + Send;
}
