//! Failure taxonomy shared by the monitor and socket workers.
//!
//! None of these are fatal to a worker loop. They exist so that every log
//! line produced for a failed operation carries the register/value context
//! needed to diagnose it.

use derive_more::{Display, Error};

#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum BridgeError {
    /// The register client has no live connection.
    #[display("Modbus connection is not active")]
    NotConnected,
    #[display("Read of register {address} (count {count}) failed: {reason}")]
    Read {
        address: u16,
        count: u16,
        reason: String,
    },
    #[display("Write of value {value} to register {address} failed: {reason}")]
    Write {
        address: u16,
        value: u16,
        reason: String,
    },
    #[display("Parse error: {reason}")]
    Parse { reason: String },
    #[display("{phase} exceeded its {budget_ms}ms budget")]
    Timeout { phase: String, budget_ms: u64 },
}

impl BridgeError {
    pub fn read(address: u16, count: u16, err: &anyhow::Error) -> Self {
        Self::Read {
            address,
            count,
            reason: format!("{err:#}"),
        }
    }

    pub fn write(address: u16, value: u16, err: &anyhow::Error) -> Self {
        Self::Write {
            address,
            value,
            reason: format!("{err:#}"),
        }
    }

    pub fn parse(reason: impl Into<String>) -> Self {
        Self::Parse {
            reason: reason.into(),
        }
    }
}
