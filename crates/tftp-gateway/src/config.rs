//! Gateway configuration
//!
//! Built once at startup and shared read-only by every transfer.

use std::time::Duration;

use reqwest::Url;
use tftp::{TftpServerConfig, TransferConfig};

use crate::error::GatewayError;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1/tftp";
pub const DEFAULT_BIND_ADDRESS: &str = ":69";
pub const DEFAULT_TFTP_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_RETRIES: usize = 8;

/// Immutable gateway configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Absolute http(s) URL of the origin
    pub base_url: Url,
    /// Append the requested filename to `base_url`
    pub append_path: bool,
    /// TFTP retransmission timeout
    pub timeout: Duration,
    pub max_retries: usize,
    /// Bound on connecting to the origin and on each wait for body data
    pub origin_timeout: Duration,
    /// UDP address to listen on
    pub bind_address: String,
}

impl GatewayConfig {
    /// Configuration with defaults for everything but the base URL
    pub fn new(base_url: &str) -> Result<Self, GatewayError> {
        Ok(Self {
            base_url: parse_base_url(base_url)?,
            append_path: true,
            timeout: DEFAULT_TFTP_TIMEOUT,
            max_retries: DEFAULT_RETRIES,
            origin_timeout: DEFAULT_HTTP_TIMEOUT,
            bind_address: normalize_bind_address(DEFAULT_BIND_ADDRESS),
        })
    }

    /// Settings for the TFTP server this gateway runs behind
    pub fn server_config(&self) -> TftpServerConfig {
        TftpServerConfig {
            bind_address: self.bind_address.clone(),
            transfer_config: TransferConfig {
                timeout: self.timeout,
                max_retries: self.max_retries,
                local_bind: None,
            },
        }
    }
}

/// Parse and validate the origin base URL
///
/// The URL must be absolute, use http or https and name a host.
pub fn parse_base_url(value: &str) -> Result<Url, GatewayError> {
    let url = Url::parse(value).map_err(|e| GatewayError::Configuration(format!("invalid base URL '{value}': {e}")))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(GatewayError::Configuration(format!(
            "base URL '{value}' must use http or https, not '{}'",
            url.scheme()
        )));
    }

    if url.host_str().is_none_or(str::is_empty) {
        return Err(GatewayError::Configuration(format!("base URL '{value}' has no host")));
    }

    Ok(url)
}

/// Expand a host-less `:port` bind address to all IPv4 interfaces
///
/// ```
/// use tftp_gateway::normalize_bind_address;
///
/// assert_eq!(normalize_bind_address(":69"), "0.0.0.0:69");
/// assert_eq!(normalize_bind_address("[::]:69"), "[::]:69");
/// ```
pub fn normalize_bind_address(value: &str) -> String {
    if value.starts_with(':') {
        format!("0.0.0.0{value}")
    } else {
        value.to_string()
    }
}

/// Parse a duration such as `5s`, `250ms`, `2m` or `1h`; bare numbers are seconds
pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let value = value.trim();
    let split = value.find(|c: char| !c.is_ascii_digit()).unwrap_or(value.len());
    let (number, unit) = value.split_at(split);

    let amount: u64 = number
        .parse()
        .map_err(|_| format!("invalid duration '{value}': expected a number with an optional unit"))?;

    let duration = match unit {
        "" | "s" => Duration::from_secs(amount),
        "ms" => Duration::from_millis(amount),
        "m" => Duration::from_secs(amount.saturating_mul(60)),
        "h" => Duration::from_secs(amount.saturating_mul(3600)),
        other => return Err(format!("invalid duration '{value}': unknown unit '{other}'")),
    };

    if duration.is_zero() {
        return Err(format!("invalid duration '{value}': must be greater than zero"));
    }

    Ok(duration)
}
