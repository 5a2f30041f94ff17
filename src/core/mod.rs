//! UI-independent plumbing shared by every worker and consumer:
//! - Command/event bus between consumer and worker threads
//! - Consumer-facing log entries
//! - Configuration loading
//! - Consumer-side register board
//! - Worker thread management
pub mod bus;
pub mod config;
pub mod logs;
pub mod registers;
pub mod task_manager;

pub use bus::{
    channel_pair, ClientCommand, ClientEvent, ConsumerBus, MonitorCommand, MonitorEvent,
    ServerCommand, ServerEvent, WorkerBus,
};
pub use config::{AppConfig, ClientConfig, HeartbeatConfig, MonitorConfig, RegisterRange, ServerConfig};
pub use logs::{LogBuffer, LogEntry, LogLevel};
pub use registers::{RegisterBoard, RegisterRow};
pub use task_manager::{join_worker, spawn_worker, WorkerHandle};
