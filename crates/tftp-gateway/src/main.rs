//! TFTP Gateway - Main executable
//!
//! Serves TFTP read requests from an HTTP origin.

use std::time::Duration;

use anyhow::{Context, Result};
use argh::FromArgs;
use tftp::TftpServer;
use tftp_gateway::{
    DEFAULT_BASE_URL, DEFAULT_BIND_ADDRESS, DEFAULT_HTTP_TIMEOUT, DEFAULT_RETRIES, DEFAULT_TFTP_TIMEOUT, Gateway,
    GatewayConfig, HttpOrigin, normalize_bind_address, parse_base_url, parse_duration,
};
use tracing_subscriber::EnvFilter;

#[derive(FromArgs, Debug)]
#[argh(
    description = "TFTP server that fetches every requested file from an HTTP origin",
    example = "Serve http://10.0.0.1/tftp/<filename>:\n  {command_name} --http-base-url http://10.0.0.1/tftp/",
    example = "Serve one image for every request:\n  {command_name} --http-base-url http://10.0.0.1/image.bin --http-append-path false",
    example = "Unprivileged port:\n  {command_name} --tftp-bind-address 127.0.0.1:6969"
)]
struct CliConfig {
    #[argh(
        option,
        description = "http base URL",
        default = "DEFAULT_BASE_URL.to_string()"
    )]
    http_base_url: String,

    #[argh(option, description = "append the TFTP filename to the base URL", default = "true")]
    http_append_path: bool,

    #[argh(
        option,
        description = "origin connect and read timeout (e.g. 30s)",
        from_str_fn(parse_duration),
        default = "DEFAULT_HTTP_TIMEOUT"
    )]
    http_timeout: Duration,

    #[argh(
        option,
        description = "tftp retransmission timeout (e.g. 5s, 500ms)",
        from_str_fn(parse_duration),
        default = "DEFAULT_TFTP_TIMEOUT"
    )]
    tftp_timeout: Duration,

    #[argh(option, description = "tftp retransmissions per packet", default = "DEFAULT_RETRIES")]
    tftp_retries: usize,

    #[argh(
        option,
        description = "udp address to listen on",
        default = "DEFAULT_BIND_ADDRESS.to_string()"
    )]
    tftp_bind_address: String,
}

impl CliConfig {
    fn into_gateway_config(self) -> Result<GatewayConfig> {
        let base_url = parse_base_url(&self.http_base_url).context("Invalid --http-base-url")?;

        Ok(GatewayConfig {
            base_url,
            append_path: self.http_append_path,
            timeout: self.tftp_timeout,
            max_retries: self.tftp_retries,
            origin_timeout: self.http_timeout,
            bind_address: normalize_bind_address(&self.tftp_bind_address),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli_config: CliConfig = argh::from_env();
    let config = cli_config.into_gateway_config()?;

    tracing::info!(
        "Serving TFTP on {} from {} (append path: {})",
        config.bind_address,
        config.base_url,
        config.append_path
    );

    let origin = HttpOrigin::from_config(&config)?;
    let mut server = TftpServer::new(config.server_config(), Gateway::new(config, origin));
    server.run().await
}
