//! Read request handling
//!
//! [`Gateway`] is the [`ReadHandler`] the TFTP server calls for every read
//! request: resolve the URL, fetch it once, report the size and stream the
//! body into the transfer.

use futures::StreamExt;
use tftp::{OutgoingTransfer, ReadHandler, TftpError};
use tokio::time::timeout;

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::fetch::{ForwardHeaders, Origin, OriginResponse};
use crate::resolve::resolve;

/// TFTP read handler serving files from an HTTP origin
#[derive(Debug)]
pub struct Gateway<O> {
    config: GatewayConfig,
    origin: O,
}

impl<O: Origin> Gateway<O> {
    pub fn new(config: GatewayConfig, origin: O) -> Self {
        Self { config, origin }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Serve `filename` into `transfer`, returning the number of bytes copied
    pub async fn transfer<T: OutgoingTransfer>(&self, filename: &str, transfer: &mut T) -> Result<u64, GatewayError> {
        let peer = transfer.remote_addr();
        tracing::info!("New TFTP request ({}) from {}", filename, peer.ip());

        let url = resolve(&self.config.base_url, self.config.append_path, filename)?;
        tracing::debug!("Fetching {} for {}", url, peer);

        let headers = ForwardHeaders::new(peer, filename);
        let response = timeout(self.config.origin_timeout, self.origin.fetch(url, &headers))
            .await
            .map_err(|_| GatewayError::Transport("timed out waiting for the origin to respond".into()))??;

        self.copy(response, transfer).await
    }

    /// Stream an origin body into the transfer
    ///
    /// The size hint goes out before the first byte. The body is dropped on
    /// return, whatever the outcome.
    async fn copy<T: OutgoingTransfer>(&self, response: OriginResponse, transfer: &mut T) -> Result<u64, GatewayError> {
        let OriginResponse { size_hint, mut body } = response;

        if let Some(size) = size_hint {
            transfer.set_size(size);
        }

        let mut copied: u64 = 0;
        loop {
            let chunk = match timeout(self.config.origin_timeout, body.next()).await {
                Ok(Some(chunk)) => chunk?,
                Ok(None) => break,
                Err(_) => return Err(GatewayError::Stream("origin stopped sending data".to_string())),
            };

            transfer
                .write(&chunk)
                .await
                .map_err(|e| GatewayError::Stream(format!("{e:#}")))?;
            copied += chunk.len() as u64;
        }

        if let Some(expected) = size_hint
            && copied != expected
        {
            return Err(GatewayError::Stream(format!(
                "origin sent {copied} bytes but announced {expected}"
            )));
        }

        Ok(copied)
    }
}

impl<O: Origin> ReadHandler for Gateway<O> {
    async fn handle_read<T: OutgoingTransfer>(&self, filename: &str, transfer: &mut T) -> Result<(), TftpError> {
        let peer = transfer.remote_addr();

        match self.transfer(filename, transfer).await {
            Ok(bytes) => {
                tracing::debug!("Copied {} bytes of '{}' for {}", bytes, filename, peer);
                Ok(())
            }
            Err(GatewayError::NotFound) => {
                tracing::info!("File '{}' requested by {} not found at origin", filename, peer);
                Err(TftpError::file_not_found())
            }
            Err(err) => {
                tracing::warn!("Request for '{}' from {} failed: {}", filename, peer, err);
                Err(err.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Mutex;
    use std::time::Duration;

    use anyhow::{Result, anyhow};
    use bytes::Bytes;
    use reqwest::{StatusCode, Url};
    use tftp::TftpErrorCode;

    use super::*;

    #[derive(Debug, Clone)]
    enum Reply {
        Body { chunks: Vec<&'static [u8]>, size: Option<u64> },
        Status(StatusCode),
        Refused,
        Hang,
        /// Sends the first chunk, then goes silent with the body still open
        Stall { first: &'static [u8], size: u64 },
    }

    /// Scripted origin that records every fetch it receives
    #[derive(Debug)]
    struct FakeOrigin {
        reply: Reply,
        requests: Mutex<Vec<(Url, ForwardHeaders)>>,
    }

    impl FakeOrigin {
        fn new(reply: Reply) -> Self {
            Self {
                reply,
                requests: Mutex::new(Vec::new()),
            }
        }

        fn body(data: &'static [u8], size: Option<u64>) -> Self {
            Self::new(Reply::Body {
                chunks: data.chunks(100).collect(),
                size,
            })
        }

        fn requests(&self) -> Vec<(Url, ForwardHeaders)> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl Origin for FakeOrigin {
        async fn fetch(&self, url: Url, headers: &ForwardHeaders) -> Result<OriginResponse, GatewayError> {
            self.requests.lock().unwrap().push((url, headers.clone()));

            match self.reply.clone() {
                Reply::Body { chunks, size } => Ok(OriginResponse {
                    size_hint: size,
                    body: futures::stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from_static(c)))).boxed(),
                }),
                Reply::Status(StatusCode::NOT_FOUND) => Err(GatewayError::NotFound),
                Reply::Status(status) => Err(GatewayError::Origin { status }),
                Reply::Refused => Err(GatewayError::Transport("connection refused".into())),
                Reply::Hang => std::future::pending().await,
                Reply::Stall { first, size } => Ok(OriginResponse {
                    size_hint: Some(size),
                    body: futures::stream::once(async move { Ok(Bytes::from_static(first)) })
                        .chain(futures::stream::pending())
                        .boxed(),
                }),
            }
        }
    }

    /// In-memory transfer that records the order of size and data calls
    #[derive(Debug)]
    struct FakeTransfer {
        peer: SocketAddr,
        sizes: Vec<u64>,
        size_before_data: bool,
        data: Vec<u8>,
        fail_after: Option<usize>,
    }

    impl FakeTransfer {
        fn new() -> Self {
            Self {
                peer: "192.0.2.10:1069".parse().unwrap(),
                sizes: Vec::new(),
                size_before_data: true,
                data: Vec::new(),
                fail_after: None,
            }
        }
    }

    impl OutgoingTransfer for FakeTransfer {
        fn remote_addr(&self) -> SocketAddr {
            self.peer
        }

        fn set_size(&mut self, size: u64) {
            self.size_before_data &= self.data.is_empty();
            self.sizes.push(size);
        }

        async fn write(&mut self, data: &[u8]) -> Result<()> {
            if self.fail_after.is_some_and(|limit| self.data.len() >= limit) {
                return Err(anyhow!("No ACK received for block 2 after 8 attempts"));
            }
            self.data.extend_from_slice(data);
            Ok(())
        }
    }

    fn gateway(base_url: &str, append_path: bool, origin: FakeOrigin) -> Gateway<FakeOrigin> {
        let mut config = GatewayConfig::new(base_url).unwrap();
        config.append_path = append_path;
        config.origin_timeout = Duration::from_millis(200);
        Gateway::new(config, origin)
    }

    static IMAGE: [u8; 1024] = [0x5a; 1024];

    #[tokio::test]
    async fn test_success_sets_size_before_streaming() {
        let gateway = gateway("http://10.0.0.1/tftp/", true, FakeOrigin::body(&IMAGE, Some(1024)));
        let mut transfer = FakeTransfer::new();

        gateway.handle_read("boot/pxelinux.0", &mut transfer).await.unwrap();

        assert_eq!(transfer.sizes, vec![1024]);
        assert!(transfer.size_before_data);
        assert_eq!(transfer.data, IMAGE);

        let requests = gateway.origin.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].0.as_str(), "http://10.0.0.1/tftp/boot/pxelinux.0");
    }

    #[tokio::test]
    async fn test_success_without_length_sets_no_size() {
        let gateway = gateway("http://10.0.0.1/tftp/", true, FakeOrigin::body(&IMAGE, None));
        let mut transfer = FakeTransfer::new();

        let copied = gateway.transfer("pxelinux.0", &mut transfer).await.unwrap();

        assert_eq!(copied, 1024);
        assert!(transfer.sizes.is_empty());
        assert_eq!(transfer.data, IMAGE);
    }

    #[tokio::test]
    async fn test_forward_headers_describe_request() {
        let gateway = gateway("http://10.0.0.1/tftp/", true, FakeOrigin::body(b"x", Some(1)));
        let mut transfer = FakeTransfer::new();

        gateway.handle_read("/boot/a b.cfg", &mut transfer).await.unwrap();

        let (url, headers) = gateway.origin.requests().remove(0);
        assert_eq!(url.as_str(), "http://10.0.0.1/tftp/boot/a%20b.cfg");
        assert_eq!(headers.peer, transfer.peer);
        assert_eq!(headers.filename, "/boot/a b.cfg");
    }

    #[tokio::test]
    async fn test_append_disabled_fetches_base_url() {
        let gateway = gateway("http://10.0.0.1/image.bin", false, FakeOrigin::body(b"img", Some(3)));

        for filename in ["pxelinux.0", "../../etc/passwd"] {
            let mut transfer = FakeTransfer::new();
            gateway.handle_read(filename, &mut transfer).await.unwrap();
        }

        for (url, _) in gateway.origin.requests() {
            assert_eq!(url.as_str(), "http://10.0.0.1/image.bin");
        }
    }

    #[tokio::test]
    async fn test_not_found_maps_to_file_not_found() {
        let gateway = gateway(
            "http://10.0.0.1/tftp/",
            true,
            FakeOrigin::new(Reply::Status(StatusCode::NOT_FOUND)),
        );
        let mut transfer = FakeTransfer::new();

        let err = gateway.handle_read("missing.bin", &mut transfer).await.unwrap_err();

        assert_eq!(err.code, TftpErrorCode::FileNotFound);
        assert!(transfer.data.is_empty());
    }

    #[tokio::test]
    async fn test_origin_error_is_generic() {
        let gateway = gateway(
            "http://10.0.0.1/tftp/",
            true,
            FakeOrigin::new(Reply::Status(StatusCode::BAD_GATEWAY)),
        );
        let mut transfer = FakeTransfer::new();

        let err = gateway.handle_read("pxelinux.0", &mut transfer).await.unwrap_err();

        assert_eq!(err.code, TftpErrorCode::NotDefined);
        assert!(err.message.contains("502"));
    }

    #[tokio::test]
    async fn test_transport_error_is_generic() {
        let gateway = gateway("http://10.0.0.1/tftp/", true, FakeOrigin::new(Reply::Refused));
        let mut transfer = FakeTransfer::new();

        let err = gateway.handle_read("pxelinux.0", &mut transfer).await.unwrap_err();
        assert_eq!(err.code, TftpErrorCode::NotDefined);
    }

    #[tokio::test]
    async fn test_unresponsive_origin_times_out() {
        let gateway = gateway("http://10.0.0.1/tftp/", true, FakeOrigin::new(Reply::Hang));
        let mut transfer = FakeTransfer::new();

        let err = gateway.transfer("pxelinux.0", &mut transfer).await.unwrap_err();
        assert!(matches!(err, GatewayError::Transport(_)));
    }

    #[tokio::test]
    async fn test_stalled_body_times_out() {
        let gateway = gateway(
            "http://10.0.0.1/tftp/",
            true,
            FakeOrigin::new(Reply::Stall {
                first: &IMAGE[..100],
                size: 1024,
            }),
        );
        let mut transfer = FakeTransfer::new();

        let err = gateway.transfer("pxelinux.0", &mut transfer).await.unwrap_err();

        assert!(matches!(err, GatewayError::Stream(ref msg) if msg.contains("stopped sending")), "{err}");
        assert_eq!(transfer.sizes, vec![1024]);
        assert_eq!(transfer.data, &IMAGE[..100]);
    }

    #[tokio::test]
    async fn test_traversal_never_reaches_origin() {
        let gateway = gateway("http://10.0.0.1/tftp/", true, FakeOrigin::body(b"secret", Some(6)));
        let mut transfer = FakeTransfer::new();

        let err = gateway.handle_read("../../etc/shadow", &mut transfer).await.unwrap_err();

        assert_eq!(err.code, TftpErrorCode::NotDefined);
        assert!(gateway.origin.requests().is_empty());
    }

    #[tokio::test]
    async fn test_write_failure_aborts_transfer() {
        let gateway = gateway("http://10.0.0.1/tftp/", true, FakeOrigin::body(&IMAGE, Some(1024)));
        let mut transfer = FakeTransfer::new();
        transfer.fail_after = Some(200);

        let err = gateway.transfer("pxelinux.0", &mut transfer).await.unwrap_err();

        assert!(matches!(err, GatewayError::Stream(_)));
        // Bytes already handed over stay delivered.
        assert_eq!(transfer.data.len(), 200);
    }

    #[tokio::test]
    async fn test_short_body_is_stream_error() {
        let gateway = gateway("http://10.0.0.1/tftp/", true, FakeOrigin::body(&IMAGE[..10], Some(1024)));
        let mut transfer = FakeTransfer::new();

        let err = gateway.transfer("pxelinux.0", &mut transfer).await.unwrap_err();
        assert!(matches!(err, GatewayError::Stream(_)));
    }
}
