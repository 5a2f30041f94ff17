use anyhow::{anyhow, Result};

/// Bytes of an MBAP header that precede the length-counted part of a frame
/// (transaction id, protocol id, length).
pub const MBAP_HEADER_LEN: usize = 6;

/// Largest length field a Modbus/TCP frame may announce (unit id + 253 byte PDU)
const MAX_MBAP_LENGTH: usize = 254;

/// Total frame length announced by a Modbus/TCP header
pub fn parse_modbus_header(buf: [u8; MBAP_HEADER_LEN]) -> Result<usize> {
    let protocol_id = u16::from_be_bytes([buf[2], buf[3]]);
    if protocol_id != 0 {
        return Err(anyhow!("Unexpected MBAP protocol id {protocol_id}"));
    }
    let length = usize::from(u16::from_be_bytes([buf[4], buf[5]]));
    if length < 2 || length > MAX_MBAP_LENGTH {
        return Err(anyhow!("Invalid MBAP length field {length}"));
    }
    Ok(MBAP_HEADER_LEN + length)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_range_read_length() {
        // 125 registers: unit + func + byte count + 250 data bytes
        let header = [0x00, 0x01, 0x00, 0x00, 0x00, 253];
        assert_eq!(parse_modbus_header(header).unwrap(), 259);
    }

    #[test]
    fn test_rejects_foreign_protocol() {
        assert!(parse_modbus_header([0, 1, 0, 7, 0, 6]).is_err());
    }

    #[test]
    fn test_rejects_bad_length() {
        assert!(parse_modbus_header([0, 1, 0, 0, 0, 1]).is_err());
        assert!(parse_modbus_header([0, 1, 0, 0, 1, 0]).is_err());
    }
}
