//! TFTP Read Transfer
//!
//! [`UdpTransfer`] is the [`OutgoingTransfer`] handed to read handlers. It
//! owns the per-transfer socket, negotiates options lazily (so a size set by
//! the handler can still be reported) and turns the byte stream written into
//! it into acknowledged DATA blocks.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tokio::net::UdpSocket;
use tokio::time::{Instant, timeout_at};

use crate::handler::OutgoingTransfer;
use crate::protocol::{
    BlockSizeConfig, TftpError, TftpErrorCode, TftpOpcode, TftpRequest, build_data, build_error, build_oack,
    get_tftp_opcode, parse_ack, parse_error, parse_timeout_option,
};

const TIMEOUT_SECS: u64 = 5;
const MAX_RETRIES: usize = 8;

/// Transfer session configuration
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// How long to wait for each acknowledgement before retransmitting
    pub timeout: Duration,
    /// Sends per packet before giving up; zero is treated as one
    pub max_retries: usize,
    /// Local address for transfer sockets; unspecified if `None`
    pub local_bind: Option<IpAddr>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(TIMEOUT_SECS),
            max_retries: MAX_RETRIES,
            local_bind: None,
        }
    }
}

/// One read transfer to one client, over its own ephemeral socket
#[derive(Debug)]
pub struct UdpTransfer {
    sock: UdpSocket,
    client: SocketAddr,
    options: HashMap<String, String>,
    wants_size: bool,
    timeout: Duration,
    max_retries: usize,
    size: Option<u64>,
    block_size: usize,
    negotiated: bool,
    block: u16,
    buffer: Vec<u8>,
    bytes_sent: u64,
}

impl UdpTransfer {
    /// Bind the transfer socket for `request` from `client`
    pub async fn open(client: SocketAddr, request: &TftpRequest, config: &TransferConfig) -> Result<Self> {
        let sock = create_ephemeral_socket(client, config.local_bind).await?;

        Ok(Self {
            sock,
            client,
            options: request.options.clone(),
            wants_size: request.wants_transfer_size(),
            timeout: config.timeout,
            max_retries: config.max_retries.max(1),
            size: None,
            block_size: BlockSizeConfig::DEFAULT,
            negotiated: false,
            block: 0,
            buffer: Vec::new(),
            bytes_sent: 0,
        })
    }

    /// Local address of the transfer socket (the server's TID)
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.sock.local_addr().context("failed to get transfer socket address")
    }

    /// Send whatever is buffered as the final block and wait for its ACK
    ///
    /// Returns the number of payload bytes delivered.
    pub async fn finish(mut self) -> Result<u64> {
        if !self.negotiated {
            self.negotiate().await?;
        }

        let last = std::mem::take(&mut self.buffer);
        self.send_block(&last).await?;
        Ok(self.bytes_sent)
    }

    /// Abort the transfer by sending `error` to the client
    pub async fn reject(self, error: &TftpError) -> Result<()> {
        self.sock
            .send_to(&error.to_packet(), self.client)
            .await
            .context("failed to send error packet")?;
        Ok(())
    }

    /// Answer the options the client requested, if any, and wait for ACK(0)
    async fn negotiate(&mut self) -> Result<()> {
        self.negotiated = true;

        let accepted = self.accepted_options();
        if accepted.is_empty() {
            return Ok(());
        }

        tracing::debug!("Sending OACK to {}: {:?}", self.client, accepted);
        let oack = build_oack(&accepted);
        self.send_and_wait_ack(&oack, 0)
            .await
            .context("option negotiation failed")
    }

    /// Work out the OACK contents and apply the negotiated values
    fn accepted_options(&mut self) -> HashMap<String, String> {
        let mut accepted = HashMap::new();

        if self.wants_size
            && let Some(size) = self.size
        {
            accepted.insert("tsize".to_string(), size.to_string());
        }

        if let Some(block_size) = self.options.get("blksize").and_then(|v| BlockSizeConfig::from_option(v)) {
            self.block_size = block_size.size;
            accepted.insert("blksize".to_string(), block_size.to_string());
        }

        // Only lock-step transfers are implemented.
        if self.options.contains_key("windowsize") {
            accepted.insert("windowsize".to_string(), "1".to_string());
        }

        // TianoCore rejects an OACK that drops a requested timeout, so echo it.
        if let Some(value) = self.options.get("timeout")
            && let Some(timeout) = parse_timeout_option(value)
        {
            self.timeout = timeout;
            accepted.insert("timeout".to_string(), value.clone());
        }

        accepted
    }

    /// Send one DATA block carrying `payload` under the next block number
    async fn send_block(&mut self, payload: &[u8]) -> Result<()> {
        self.block = self.block.wrapping_add(1);
        let packet = build_data(self.block, payload);
        self.send_and_wait_ack(&packet, self.block).await?;
        self.bytes_sent += payload.len() as u64;
        Ok(())
    }

    /// Send `packet` until the client acknowledges `expected_ack`
    async fn send_and_wait_ack(&self, packet: &[u8], expected_ack: u16) -> Result<()> {
        for _ in 0..self.max_retries {
            self.sock.send_to(packet, self.client).await?;

            let deadline = Instant::now() + self.timeout;
            loop {
                let response = match timeout_at(deadline, self.recv_from_client()).await {
                    Ok(response) => response?,
                    // Retransmit
                    Err(_) => break,
                };

                match get_tftp_opcode(&response) {
                    Some(TftpOpcode::Acknowledgment) => {
                        if parse_ack(&response).is_ok_and(|block| block == expected_ack) {
                            return Ok(());
                        }
                        // Duplicate ACK for an earlier block; keep waiting.
                    }
                    Some(TftpOpcode::Error) => {
                        return match parse_error(&response) {
                            Ok((code, msg)) => Err(anyhow!("Client error: {} - {}", code, msg)),
                            Err(_) => Err(anyhow!("Client returned error")),
                        };
                    }
                    _ => {
                        tracing::debug!("Ignoring unexpected packet from {}", self.client);
                    }
                }
            }
        }

        Err(anyhow!(
            "No ACK received for block {} after {} attempts",
            expected_ack,
            self.max_retries
        ))
    }

    /// Receive a packet from the transfer's client
    ///
    /// Packets from any other source get an "Unknown transfer ID" error and
    /// are otherwise ignored.
    async fn recv_from_client(&self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; 1500]; // MTU size buffer

        loop {
            let (n, src) = self.sock.recv_from(&mut buf).await?;

            if src == self.client {
                buf.truncate(n);
                return Ok(buf);
            }

            tracing::debug!("Packet from unknown transfer ID {} on transfer to {}", src, self.client);
            let error = build_error(
                TftpErrorCode::UnknownTransferId.as_u16(),
                TftpErrorCode::UnknownTransferId.default_message(),
            );
            let _ = self.sock.send_to(&error, src).await;
        }
    }
}

impl OutgoingTransfer for UdpTransfer {
    fn remote_addr(&self) -> SocketAddr {
        self.client
    }

    fn set_size(&mut self, size: u64) {
        if self.negotiated || self.size.is_some() {
            tracing::warn!("Ignoring late transfer size {} for {}", size, self.client);
            return;
        }
        self.size = Some(size);
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        if !self.negotiated {
            self.negotiate().await?;
        }

        self.buffer.extend_from_slice(data);
        while self.buffer.len() >= self.block_size {
            let block: Vec<u8> = self.buffer.drain(..self.block_size).collect();
            self.send_block(&block).await?;
        }

        Ok(())
    }
}

/// Create an ephemeral UDP socket appropriate for the client address family
async fn create_ephemeral_socket(client: SocketAddr, local_bind: Option<IpAddr>) -> Result<UdpSocket> {
    let ip = local_bind.unwrap_or(match client {
        SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    });

    let sock = UdpSocket::bind(SocketAddr::new(ip, 0))
        .await
        .context("failed to bind ephemeral socket")?;

    tracing::debug!("Transfer socket bound to {}", sock.local_addr()?);
    Ok(sock)
}
