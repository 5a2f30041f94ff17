//! regwatch: register monitor and robot socket bridge
//!
//! The crate polls a controller's holding registers over Modbus/TCP, reports
//! changes, keeps a heartbeat counter alive in one register and receives
//! structured pose messages from a robot over a plain TCP socket.
//!
//! Each connection runs on its own worker thread with a single-threaded
//! runtime. Consumers talk to workers only through the command/event
//! channels in [`core::bus`], usually via [`MonitorHandle`],
//! [`SocketServerHandle`] and [`SocketClientHandle`].

#[doc(hidden)]
pub mod boot;
#[doc(hidden)]
pub mod cli;
pub mod core;
pub mod protocol;
pub mod utils;

pub use protocol::{
    error::BridgeError,
    modbus::{RegisterClient, SimulatedRegisterClient, TcpRegisterClient},
    monitor::{MonitorHandle, PollEngine},
    socket::{SocketClientHandle, SocketServerHandle},
};
