use anyhow::{anyhow, Result};

use rmodbus::{client::ModbusRequest, ModbusProto};

/// Build a frame to write a single holding register (function 0x06)
pub fn generate_pull_set_holding_request(
    unit_id: u8,
    address: u16,
    value: u16,
) -> Result<(ModbusRequest, Vec<u8>)> {
    let mut request = ModbusRequest::new(unit_id, ModbusProto::TcpUdp);
    let mut raw = Vec::new();
    request.generate_set_holding(address, value, &mut raw)?;
    Ok((request, raw))
}

/// Build a frame to write a block of holding registers (function 0x10)
pub fn generate_pull_set_holdings_request(
    unit_id: u8,
    address: u16,
    values: &[u16],
) -> Result<(ModbusRequest, Vec<u8>)> {
    let mut request = ModbusRequest::new(unit_id, ModbusProto::TcpUdp);
    let mut raw = Vec::new();
    request.generate_set_holdings_bulk(address, values, &mut raw)?;
    Ok((request, raw))
}

/// Check that the controller acknowledged a write
pub fn parse_pull_set_holdings(request: &mut ModbusRequest, response: &[u8]) -> Result<()> {
    request
        .parse_ok(response)
        .map_err(|err| anyhow!("Write rejected: {err:?}"))
}
