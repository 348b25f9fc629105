//! Origin fetching
//!
//! One HTTP GET per read request. The response is classified before any
//! byte reaches the TFTP client, so a missing file can still be reported as
//! "file not found".

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Response, StatusCode, Url};

use crate::config::GatewayConfig;
use crate::error::GatewayError;

pub const HEADER_TFTP_IP: &str = "x-tftp-ip";
pub const HEADER_TFTP_PORT: &str = "x-tftp-port";
pub const HEADER_TFTP_FILE: &str = "x-tftp-file";

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Body of a successful origin response
pub type OriginBody = BoxStream<'static, Result<Bytes, GatewayError>>;

/// A 200 response, ready to be streamed
pub struct OriginResponse {
    /// Announced body length, if the origin sent one
    pub size_hint: Option<u64>,
    pub body: OriginBody,
}

impl fmt::Debug for OriginResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OriginResponse")
            .field("size_hint", &self.size_hint)
            .finish_non_exhaustive()
    }
}

/// Informational headers describing the TFTP request behind a fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardHeaders {
    pub peer: SocketAddr,
    /// The filename exactly as the client sent it
    pub filename: String,
}

impl ForwardHeaders {
    pub fn new(peer: SocketAddr, filename: impl Into<String>) -> Self {
        Self {
            peer,
            filename: filename.into(),
        }
    }

    /// `X-TFTP-IP`, `X-TFTP-Port` and `X-TFTP-File`
    ///
    /// Fails only for filenames with control characters, which cannot be
    /// carried in a header value.
    pub fn to_header_map(&self) -> Result<HeaderMap, GatewayError> {
        let invalid = |what: &str| GatewayError::construction(&self.filename, format!("{what} is not a valid header value"));

        let ip = HeaderValue::from_str(&self.peer.ip().to_string()).map_err(|_| invalid("peer address"))?;
        let file = HeaderValue::from_bytes(self.filename.as_bytes()).map_err(|_| invalid("filename"))?;

        let mut headers = HeaderMap::with_capacity(3);
        headers.insert(HeaderName::from_static(HEADER_TFTP_IP), ip);
        headers.insert(HeaderName::from_static(HEADER_TFTP_PORT), HeaderValue::from(self.peer.port()));
        headers.insert(HeaderName::from_static(HEADER_TFTP_FILE), file);
        Ok(headers)
    }
}

/// Where file content comes from
///
/// Implementations are shared by all concurrent transfers.
pub trait Origin: Send + Sync + 'static {
    /// GET `url`, returning the body on 200 and a classified error otherwise
    fn fetch(
        &self,
        url: Url,
        headers: &ForwardHeaders,
    ) -> impl Future<Output = Result<OriginResponse, GatewayError>> + Send;
}

/// [`Origin`] backed by a pooled `reqwest` client
#[derive(Debug, Clone)]
pub struct HttpOrigin {
    client: Client,
}

impl HttpOrigin {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build the shared client for `config`
    pub fn from_config(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(config.origin_timeout)
            .build()
            .map_err(|e| GatewayError::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self::new(client))
    }
}

impl Origin for HttpOrigin {
    async fn fetch(&self, url: Url, headers: &ForwardHeaders) -> Result<OriginResponse, GatewayError> {
        let response = self.client.get(url).headers(headers.to_header_map()?).send().await?;
        classify(response)
    }
}

/// Map an origin response onto the gateway's outcomes
///
/// Anything but a 200 is dropped here, releasing its connection.
fn classify(response: Response) -> Result<OriginResponse, GatewayError> {
    match response.status() {
        StatusCode::OK => Ok(OriginResponse {
            size_hint: response.content_length(),
            body: response
                .bytes_stream()
                .map_err(|e| GatewayError::Stream(format!("origin body: {e}")))
                .boxed(),
        }),
        StatusCode::NOT_FOUND => {
            tracing::debug!("Origin {} returned 404", response.url());
            Err(GatewayError::NotFound)
        }
        status => Err(GatewayError::Origin { status }),
    }
}
