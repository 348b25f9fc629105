//! TFTP Server Implementation
//!
//! The main server loop: receives requests on the well-known socket and
//! hands each read request to the configured [`ReadHandler`] in its own task.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use tokio::net::UdpSocket;

use crate::handler::ReadHandler;
use crate::protocol::{TftpError, TftpOpcode, TftpRequest, get_tftp_opcode, parse_request};
use crate::transfer::{TransferConfig, UdpTransfer};

/// TFTP Server configuration
#[derive(Debug, Clone)]
pub struct TftpServerConfig {
    pub bind_address: String,
    pub transfer_config: TransferConfig,
}

impl Default for TftpServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:69".to_string(),
            transfer_config: TransferConfig::default(),
        }
    }
}

/// Read-only TFTP server dispatching requests to a [`ReadHandler`]
#[derive(Debug)]
pub struct TftpServer<H> {
    config: TftpServerConfig,
    handler: Arc<H>,
    socket: Option<UdpSocket>,
}

impl<H: ReadHandler> TftpServer<H> {
    pub fn new(config: TftpServerConfig, handler: H) -> Self {
        Self {
            config,
            handler: Arc::new(handler),
            socket: None,
        }
    }

    /// Get the server's configuration
    pub fn config(&self) -> &TftpServerConfig {
        &self.config
    }

    /// Get the local address the server is bound to (if bound)
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Bind the server socket without serving yet
    pub async fn bind(&mut self) -> Result<SocketAddr> {
        let socket = UdpSocket::bind(&self.config.bind_address)
            .await
            .with_context(|| format!("Failed to bind TFTP server socket on {}", self.config.bind_address))?;

        let local_addr = socket.local_addr().context("Failed to get local address")?;
        self.socket = Some(socket);
        Ok(local_addr)
    }

    /// Bind (unless already bound) and run the main loop
    pub async fn run(&mut self) -> Result<()> {
        if self.socket.is_none() {
            self.bind().await?;
        }

        if let Some(addr) = self.local_addr() {
            tracing::info!("TFTP server listening on {}", addr);
        }
        self.serve().await
    }

    /// Main server loop
    async fn serve(&self) -> Result<()> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| anyhow!("Server must be bound before serving"))?;

        let mut buffer = [0u8; 2048];

        loop {
            let (len, client_addr) = socket.recv_from(&mut buffer).await?;
            tracing::debug!("Received packet from {}", client_addr);

            let packet = &buffer[..len];

            match get_tftp_opcode(packet) {
                Some(TftpOpcode::ReadRequest) => self.dispatch_read_request(packet, client_addr),
                Some(TftpOpcode::WriteRequest) => {
                    tracing::info!("Refusing write request from {}", client_addr);
                    let error = TftpError::illegal_operation("Write requests are not supported");
                    if let Err(e) = socket.send_to(&error.to_packet(), client_addr).await {
                        tracing::debug!("Failed to refuse write request from {}: {}", client_addr, e);
                    }
                }
                Some(opcode) => {
                    tracing::debug!("Ignoring unexpected {} from {}", opcode, client_addr);
                }
                None => {
                    tracing::debug!("Received malformed packet from {}", client_addr);
                }
            }
        }
    }

    /// Parse an RRQ and spawn its transfer
    fn dispatch_read_request(&self, packet: &[u8], client: SocketAddr) {
        let request = match parse_request(packet) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("Failed to parse RRQ from {}: {}", client, e);
                return;
            }
        };

        tracing::info!(
            "RRQ for '{}' in {} mode from {} (options: {:?})",
            request.filename,
            request.mode,
            client,
            request.options
        );

        let handler = Arc::clone(&self.handler);
        let config = self.config.transfer_config.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_read_request(handler.as_ref(), client, &request, &config).await {
                tracing::warn!("Failed to transfer '{}' to {}: {:#}", request.filename, client, e);
            }
        });
    }
}

/// Run one read transfer from socket setup to the final block
pub async fn serve_read_request<H: ReadHandler>(
    handler: &H,
    client: SocketAddr,
    request: &TftpRequest,
    config: &TransferConfig,
) -> Result<()> {
    let mut transfer = UdpTransfer::open(client, request, config).await?;

    if !request.mode.is_supported() {
        let error = TftpError::illegal_operation(format!("Transfer mode '{}' not supported", request.mode));
        return transfer.reject(&error).await;
    }

    match handler.handle_read(&request.filename, &mut transfer).await {
        Ok(()) => {
            let bytes = transfer.finish().await?;
            tracing::info!("Transferred '{}' ({} bytes) to {}", request.filename, bytes, client);
            Ok(())
        }
        Err(error) => {
            tracing::debug!("Read handler refused '{}' for {}: {}", request.filename, client, error);
            transfer.reject(&error).await
        }
    }
}
