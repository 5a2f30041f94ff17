//! Wall-clock stamps for console annotation

use chrono::{DateTime, Local};
use std::net::SocketAddr;

/// `HH:MM:SS` in local time
pub fn clock_stamp(at: &DateTime<Local>) -> String {
    at.format("%H:%M:%S").to_string()
}

/// `[HH:MM:SS] peer`, the header printed above a received message
pub fn peer_header(at: &DateTime<Local>, peer: &SocketAddr) -> String {
    format!("[{}] {peer}", clock_stamp(at))
}
