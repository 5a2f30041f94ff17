use std::collections::BTreeSet;
use tokio::time::{sleep_until, Instant};

use super::{
    changes::{detect_changes, ChangeSet, RegisterSnapshot},
    heartbeat::Heartbeat,
};
use crate::{
    core::{
        bus::{MonitorCommand, MonitorEvent, WorkerBus},
        config::{MonitorConfig, RegisterRange},
        logs::LogEntry,
    },
    protocol::{error::BridgeError, modbus::RegisterClient},
};

/// What woke the engine while it was idle between cycles
enum Wake {
    Command(Option<MonitorCommand>),
    Heartbeat,
    CycleDue,
}

/// Register monitor state machine.
///
/// The engine owns the client, the snapshot and the monitored/pending sets.
/// It is driven from exactly one task; consumers reach it only through the
/// command channel.
///
/// The sweep, the monitored refresh, manual polls and write read-backs all
/// store into the same snapshot. Whichever path observed an address most
/// recently wins.
pub struct PollEngine {
    config: MonitorConfig,
    client: Box<dyn RegisterClient>,
    bus: WorkerBus<MonitorCommand, MonitorEvent>,
    snapshot: RegisterSnapshot,
    monitored: BTreeSet<u16>,
    pending: BTreeSet<u16>,
    reset_requested: bool,
    heartbeat: Heartbeat,
    /// Set once a lost link has been reported, cleared on reconnect.
    link_down_reported: bool,
    running: bool,
}

impl PollEngine {
    pub fn new(
        config: MonitorConfig,
        client: Box<dyn RegisterClient>,
        bus: WorkerBus<MonitorCommand, MonitorEvent>,
    ) -> Self {
        let heartbeat = Heartbeat::new(config.heartbeat.clone());
        Self {
            config,
            client,
            bus,
            snapshot: RegisterSnapshot::new(),
            monitored: BTreeSet::new(),
            pending: BTreeSet::new(),
            reset_requested: false,
            heartbeat,
            link_down_reported: false,
            running: true,
        }
    }

    pub fn cached(&self, address: u16) -> Option<u16> {
        self.snapshot.get(&address).copied()
    }

    pub fn monitored(&self) -> &BTreeSet<u16> {
        &self.monitored
    }

    pub fn pending(&self) -> &BTreeSet<u16> {
        &self.pending
    }

    pub fn heartbeat(&self) -> &Heartbeat {
        &self.heartbeat
    }

    fn info(&self, message: impl Into<String>) {
        self.bus.emit(MonitorEvent::Log(LogEntry::info(message)));
    }

    fn warning(&self, message: impl Into<String>) {
        let entry = LogEntry::warning(message);
        log::warn!("{}", entry.message);
        self.bus.emit(MonitorEvent::Log(entry));
    }

    fn error(&self, error: &BridgeError) {
        log::warn!("{error}");
        self.bus.emit(MonitorEvent::Log(LogEntry::error(error.to_string())));
    }

    fn updated(&self, address: u16, value: u16) {
        self.bus
            .emit(MonitorEvent::RegisterUpdated { address, value });
    }

    /// Connect the client and register the configured initial addresses.
    pub async fn start(&mut self) {
        match self.client.connect().await {
            Ok(()) => self.info(format!(
                "Modbus server connected ({})",
                self.client.describe()
            )),
            Err(err) => {
                self.warning(format!(
                    "Modbus connection to {} failed: {err:#}",
                    self.client.describe()
                ));
                self.link_down_reported = true;
            }
        }

        for address in self.config.initial_monitored.clone() {
            self.add_monitored(address);
        }
    }

    /// Run until a stop command arrives or every command sender is dropped.
    pub async fn run(mut self) {
        self.start().await;

        let period = self.config.poll_interval();
        while self.running {
            let cycle_started = Instant::now();
            self.run_cycle().await;
            self.idle_until(cycle_started + period).await;
        }

        self.shutdown().await;
    }

    /// Service commands and heartbeat beats until `deadline`.
    async fn idle_until(&mut self, deadline: Instant) {
        let commands = self.bus.commands.clone();
        while self.running {
            let beat_at = self.heartbeat.next_due();
            let wake = tokio::select! {
                biased;
                command = commands.recv_async() => Wake::Command(command.ok()),
                _ = sleep_until(beat_at.unwrap_or(deadline)), if beat_at.is_some() => Wake::Heartbeat,
                _ = sleep_until(deadline) => Wake::CycleDue,
            };

            match wake {
                Wake::Command(Some(command)) => self.handle_command(command).await,
                Wake::Command(None) => {
                    log::info!("Command channel closed, stopping monitor");
                    self.running = false;
                }
                Wake::Heartbeat => self.beat_if_due().await,
                Wake::CycleDue => return,
            }
        }
    }

    pub async fn handle_command(&mut self, command: MonitorCommand) {
        match command {
            MonitorCommand::AddMonitored(address) => self.add_monitored(address),
            MonitorCommand::RemoveMonitored(address) => self.remove_monitored(address),
            MonitorCommand::WriteRegister { address, value } => {
                self.write_register(address, value).await
            }
            MonitorCommand::RequestReset => self.reset_requested = true,
            MonitorCommand::SetHeartbeat(active) => self.set_heartbeat(active),
            MonitorCommand::PollOnce => self.poll_once().await,
            MonitorCommand::Stop => self.running = false,
        }
    }

    pub fn add_monitored(&mut self, address: u16) {
        if self.monitored.insert(address) {
            self.pending.insert(address);
            self.info(format!("Register {address} monitoring started"));
        }
        self.snapshot.remove(&address);
    }

    pub fn remove_monitored(&mut self, address: u16) {
        if self.monitored.remove(&address) {
            self.info(format!("Register {address} monitoring stopped"));
        }
        self.pending.remove(&address);
        self.snapshot.remove(&address);
    }

    pub fn set_heartbeat(&mut self, active: bool) {
        match (active, self.heartbeat.is_active()) {
            (true, false) => {
                self.heartbeat.activate(Instant::now());
                self.info(format!(
                    "Heartbeat started on register {}",
                    self.heartbeat.register()
                ));
            }
            (false, true) => {
                self.heartbeat.deactivate();
                self.info("Heartbeat stopped");
            }
            _ => {}
        }
    }

    /// One poll cycle: pending reset, monitored refresh, first reads, sweep.
    pub async fn run_cycle(&mut self) {
        let connected = self.ensure_connected().await;

        if self.reset_requested {
            self.reset_registers().await;
            self.reset_requested = false;
        }

        if !connected {
            log::debug!("Skipping poll cycle: {}", BridgeError::NotConnected);
            return;
        }

        self.refresh_monitored().await;
        self.service_pending().await;
        self.sweep().await;
    }

    /// Reconnect a dropped client. Only the first failure after the link went
    /// down is reported to the consumer.
    async fn ensure_connected(&mut self) -> bool {
        if self.client.is_connected() {
            return true;
        }

        match self.client.connect().await {
            Ok(()) => {
                self.link_down_reported = false;
                self.info(format!(
                    "Modbus server reconnected ({})",
                    self.client.describe()
                ));
                true
            }
            Err(err) if self.link_down_reported => {
                log::debug!("Reconnect to {} failed: {err:#}", self.client.describe());
                false
            }
            Err(err) => {
                self.link_down_reported = true;
                self.warning(format!(
                    "Modbus connection to {} lost, retrying every cycle: {err:#}",
                    self.client.describe()
                ));
                false
            }
        }
    }

    async fn refresh_monitored(&mut self) {
        let addresses: Vec<u16> = self.monitored.iter().copied().collect();
        for address in addresses {
            match self.client.read(address, 1).await {
                Ok(values) => {
                    let Some(&value) = values.first() else {
                        self.warning(format!("Register {address} returned no data"));
                        continue;
                    };
                    if self.snapshot.insert(address, value) != Some(value) {
                        self.updated(address, value);
                    }
                }
                Err(err) => self.error(&BridgeError::read(address, 1, &err)),
            }
        }
    }

    /// First reads for newly monitored addresses. Each gets exactly one attempt.
    async fn service_pending(&mut self) {
        let addresses = std::mem::take(&mut self.pending);
        for address in addresses {
            match self.client.read(address, 1).await {
                Ok(values) => match values.first() {
                    Some(&value) => {
                        self.snapshot.insert(address, value);
                        self.updated(address, value);
                    }
                    None => self.warning(format!("Register {address} returned no data")),
                },
                Err(err) => self.error(&BridgeError::read(address, 1, &err)),
            }
        }
    }

    /// Read every sweep range within the sweep budget.
    ///
    /// Ranges that finished before the budget ran out are returned; the range
    /// in flight at the deadline is dropped whole.
    async fn read_sweep_ranges(&mut self) -> Vec<(RegisterRange, Vec<u16>)> {
        let budget = self.config.sweep_timeout();
        let ranges = self.config.sweep_ranges.clone();
        let mut completed = Vec::with_capacity(ranges.len());

        let sweep = read_ranges(self.client.as_mut(), &self.bus, &ranges, &mut completed);
        if tokio::time::timeout(budget, sweep).await.is_err() {
            let timeout = BridgeError::Timeout {
                phase: "Register sweep".to_string(),
                budget_ms: self.config.sweep_timeout_ms,
            };
            log::debug!("{timeout}; {} range(s) completed", completed.len());
        }
        completed
    }

    async fn sweep(&mut self) {
        let completed = self.read_sweep_ranges().await;

        let mut changes = ChangeSet::new();
        for (range, values) in &completed {
            changes.extend(detect_changes(
                &mut self.snapshot,
                values,
                range.start,
                &self.config.excluded,
            ));
        }
        if changes.is_empty() {
            return;
        }

        self.info("");
        for (address, value) in changes {
            self.info(format!("Register {address}: {value}"));
            if self.monitored.contains(&address) {
                self.updated(address, value);
            }
        }
    }

    /// Manual full sweep: logs every value, refreshes monitored addresses,
    /// bypasses change detection.
    pub async fn poll_once(&mut self) {
        if !self.client.is_connected() {
            self.error(&BridgeError::NotConnected);
            return;
        }

        let completed = self.read_sweep_ranges().await;
        for (range, values) in completed {
            for (address, value) in range.addresses().zip(values) {
                self.info(format!("Register {address}: {value}"));
                if self.monitored.contains(&address) {
                    self.snapshot.insert(address, value);
                    self.updated(address, value);
                }
            }
        }
    }

    pub async fn write_register(&mut self, address: u16, value: u16) {
        if !self.client.is_connected() {
            self.warning(format!(
                "{}. Write of {value} to register {address} failed.",
                BridgeError::NotConnected
            ));
            self.bus.emit(MonitorEvent::WriteResult {
                address,
                success: false,
            });
            return;
        }

        if let Err(err) = self.client.write(address, value).await {
            self.error(&BridgeError::write(address, value, &err));
            self.bus.emit(MonitorEvent::WriteResult {
                address,
                success: false,
            });
            return;
        }

        self.info(format!("Wrote value {value} to register {address}"));
        match self.client.read(address, 1).await {
            Ok(values) => {
                if let Some(&read_back) = values.first() {
                    self.info(format!("Register {address} read back: {read_back}"));
                    self.snapshot.insert(address, read_back);
                    self.updated(address, read_back);
                }
            }
            Err(err) => self.error(&BridgeError::read(address, 1, &err)),
        }
        self.bus.emit(MonitorEvent::WriteResult {
            address,
            success: true,
        });
    }

    /// Zero the reset range, bulk first and per register on failure.
    async fn reset_registers(&mut self) {
        if !self.client.is_connected() {
            self.error(&BridgeError::NotConnected);
            return;
        }

        let range = self.config.reset_range;
        let (first, last) = (range.start, range.last());
        self.info(format!("Resetting registers {first}-{last}..."));

        let zeros = vec![0u16; usize::from(range.count)];
        match self.client.write_many(range.start, &zeros).await {
            Ok(()) => self.info(format!("Registers {first}-{last} reset in one bulk write")),
            Err(err) => {
                self.warning(format!(
                    "Bulk reset failed, falling back to per-register writes: {err:#}"
                ));
                let mut failures = 0usize;
                for address in range.addresses() {
                    if let Err(err) = self.client.write(address, 0).await {
                        failures += 1;
                        self.error(&BridgeError::write(address, 0, &err));
                    }
                }
                self.info(format!(
                    "Per-register reset finished with {failures} failure(s)"
                ));
            }
        }

        self.info("Register reset complete");
    }

    /// Perform one heartbeat read-modify-write if a beat is due.
    pub async fn beat_if_due(&mut self) {
        if !self.heartbeat.is_due(Instant::now()) {
            return;
        }

        let register = self.heartbeat.register();
        let current = match self.client.read(register, 1).await {
            Ok(values) => values.first().copied().unwrap_or(0),
            Err(err) => {
                log::debug!("Heartbeat read failed, assuming 0: {err:#}");
                0
            }
        };

        let value = self.heartbeat.next_value(current);
        let succeeded = match self.client.write(register, value).await {
            Ok(()) => true,
            Err(err) => {
                self.warning(format!(
                    "Heartbeat error: {}",
                    BridgeError::write(register, value, &err)
                ));
                false
            }
        };
        self.heartbeat.reschedule(Instant::now(), succeeded);
    }

    async fn shutdown(&mut self) {
        self.heartbeat.deactivate();
        self.client.close().await;
        self.info("Monitor stopped");
        self.bus.emit(MonitorEvent::Stopped);
    }
}

/// Read each range in order, collecting only fully read ranges.
async fn read_ranges(
    client: &mut dyn RegisterClient,
    bus: &WorkerBus<MonitorCommand, MonitorEvent>,
    ranges: &[RegisterRange],
    completed: &mut Vec<(RegisterRange, Vec<u16>)>,
) {
    for range in ranges {
        match client.read(range.start, range.count).await {
            Ok(values) => completed.push((*range, values)),
            Err(err) => {
                log::warn!("Range read error ({}-{}): {err:#}", range.start, range.last());
                bus.emit(MonitorEvent::Log(LogEntry::error(format!(
                    "Range read error ({}-{}): {err:#}",
                    range.start,
                    range.last()
                ))));
            }
        }
    }
}
