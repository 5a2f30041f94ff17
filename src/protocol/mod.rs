pub mod error;
pub mod modbus;
pub mod monitor;
pub mod socket;
