mod header;
mod pull_get_holdings;
mod pull_set_holdings;
mod simulated;
mod tcp;

use anyhow::Result;
use async_trait::async_trait;

pub use header::{parse_modbus_header, MBAP_HEADER_LEN};
pub use pull_get_holdings::{generate_pull_get_holdings_request, parse_pull_get_holdings};
pub use pull_set_holdings::{
    generate_pull_set_holding_request, generate_pull_set_holdings_request,
    parse_pull_set_holdings,
};
pub use simulated::SimulatedRegisterClient;
pub use tcp::TcpRegisterClient;

/// Transport capability used by the monitor engine.
///
/// Every call may fail independently; the engine treats a failure as "this
/// operation is skipped" and never as a reason to stop polling.
#[async_trait]
pub trait RegisterClient: Send {
    async fn connect(&mut self) -> Result<()>;

    fn is_connected(&self) -> bool;

    async fn read(&mut self, address: u16, count: u16) -> Result<Vec<u16>>;

    async fn write(&mut self, address: u16, value: u16) -> Result<()>;

    async fn write_many(&mut self, address: u16, values: &[u16]) -> Result<()>;

    async fn close(&mut self);

    /// Human readable endpoint used in log lines
    fn describe(&self) -> String;
}
