//! Register monitor: change detection, heartbeat and the poll loop.

pub mod changes;
pub mod engine;
pub mod heartbeat;

pub use changes::{detect_changes, ChangeSet, RegisterSnapshot};
pub use engine::PollEngine;
pub use heartbeat::Heartbeat;

use anyhow::Result;
use flume::Receiver;

use crate::{
    core::{
        bus::{channel_pair, MonitorCommand, MonitorEvent},
        config::MonitorConfig,
        task_manager::{spawn_worker, WorkerHandle},
    },
    protocol::modbus::{RegisterClient, TcpRegisterClient},
};

/// Consumer-side handle of a running monitor worker.
///
/// Every method only enqueues a command and returns immediately. Dropping the
/// handle stops the worker and waits for it.
pub struct MonitorHandle {
    worker: WorkerHandle<MonitorCommand, MonitorEvent>,
}

impl MonitorHandle {
    /// Start a monitor over an arbitrary register client.
    pub fn spawn(config: MonitorConfig, client: Box<dyn RegisterClient>) -> Result<Self> {
        config.validate()?;
        let (bus, worker_bus) = channel_pair();
        let worker = spawn_worker("regwatch-monitor", move || async move {
            PollEngine::new(config, client, worker_bus).run().await;
        })?;
        Ok(Self {
            worker: WorkerHandle::new(bus, worker, MonitorCommand::Stop),
        })
    }

    /// Start a monitor talking Modbus/TCP to the configured controller.
    pub fn connect(config: MonitorConfig) -> Result<Self> {
        let client = TcpRegisterClient::from_config(&config);
        Self::spawn(config, Box::new(client))
    }

    pub fn add_monitored(&self, address: u16) {
        self.worker.send(MonitorCommand::AddMonitored(address));
    }

    pub fn remove_monitored(&self, address: u16) {
        self.worker.send(MonitorCommand::RemoveMonitored(address));
    }

    pub fn write_register(&self, address: u16, value: u16) {
        self.worker
            .send(MonitorCommand::WriteRegister { address, value });
    }

    pub fn request_reset(&self) {
        self.worker.send(MonitorCommand::RequestReset);
    }

    pub fn set_heartbeat(&self, active: bool) {
        self.worker.send(MonitorCommand::SetHeartbeat(active));
    }

    pub fn poll_once(&self) {
        self.worker.send(MonitorCommand::PollOnce);
    }

    pub fn events(&self) -> &Receiver<MonitorEvent> {
        self.worker.events()
    }

    /// Ask the worker to stop and wait until it has closed the connection.
    pub fn stop(&mut self) {
        self.worker.stop();
    }
}
