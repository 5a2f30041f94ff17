use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

use super::{
    generate_pull_get_holdings_request, generate_pull_set_holding_request,
    generate_pull_set_holdings_request, parse_modbus_header, parse_pull_get_holdings,
    parse_pull_set_holdings, RegisterClient, MBAP_HEADER_LEN,
};
use crate::{core::config::MonitorConfig, protocol::error::BridgeError};

/// Modbus/TCP holding-register client
pub struct TcpRegisterClient {
    host: String,
    port: u16,
    unit_id: u8,
    timeout: Duration,
    stream: Option<TcpStream>,
}

impl TcpRegisterClient {
    pub fn new(host: impl Into<String>, port: u16, unit_id: u8, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            unit_id,
            timeout,
            stream: None,
        }
    }

    pub fn from_config(config: &MonitorConfig) -> Self {
        Self::new(
            config.host.clone(),
            config.port,
            config.unit_id,
            config.request_timeout(),
        )
    }

    /// Send one request frame and read back the complete response frame.
    ///
    /// Any transport failure drops the stream so later calls report
    /// `NotConnected` instead of reusing a half-broken socket.
    async fn transact(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        let timeout = self.timeout;
        let stream = self.stream.as_mut().ok_or(BridgeError::NotConnected)?;

        let exchange = async {
            stream.write_all(request).await?;
            stream.flush().await?;

            let mut header = [0u8; MBAP_HEADER_LEN];
            stream.read_exact(&mut header).await?;
            let total = parse_modbus_header(header)?;

            let mut frame = header.to_vec();
            frame.resize(total, 0);
            stream.read_exact(&mut frame[MBAP_HEADER_LEN..]).await?;
            Ok::<_, anyhow::Error>(frame)
        };

        let outcome = match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(anyhow!(
                "No response within {}ms",
                timeout.as_millis()
            )),
        };

        if outcome.is_err() {
            self.stream = None;
        }
        outcome
    }
}

#[async_trait]
impl RegisterClient for TcpRegisterClient {
    async fn connect(&mut self) -> Result<()> {
        let addr = format!("{}:{}", self.host, self.port);
        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| anyhow!("Connection to {addr} timed out"))?
            .with_context(|| format!("Failed to connect to {addr}"))?;
        stream.set_nodelay(true)?;
        self.stream = Some(stream);
        log::info!("Connected to Modbus server {addr}");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn read(&mut self, address: u16, count: u16) -> Result<Vec<u16>> {
        let (mut request, raw) = generate_pull_get_holdings_request(self.unit_id, address, count)?;
        let response = self.transact(&raw).await?;
        parse_pull_get_holdings(&mut request, &response)
    }

    async fn write(&mut self, address: u16, value: u16) -> Result<()> {
        let (mut request, raw) = generate_pull_set_holding_request(self.unit_id, address, value)?;
        let response = self.transact(&raw).await?;
        parse_pull_set_holdings(&mut request, &response)
    }

    async fn write_many(&mut self, address: u16, values: &[u16]) -> Result<()> {
        let (mut request, raw) = generate_pull_set_holdings_request(self.unit_id, address, values)?;
        let response = self.transact(&raw).await?;
        parse_pull_set_holdings(&mut request, &response)
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(err) = stream.shutdown().await {
                log::debug!("Error while closing Modbus stream: {err}");
            }
        }
    }

    fn describe(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
