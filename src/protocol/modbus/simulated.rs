use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use super::RegisterClient;
use crate::protocol::error::BridgeError;

#[derive(Debug, Default)]
struct SimulatedState {
    registers: HashMap<u16, u16>,
    connected: bool,
    refuse_connect: bool,
    failing_reads: HashSet<u16>,
    failing_writes: HashSet<u16>,
    reject_bulk_writes: bool,
    read_latency: Option<Duration>,
    reads: usize,
    writes: usize,
    bulk_writes: usize,
}

/// In-memory register file implementing [`RegisterClient`].
///
/// Clones share one register file, so a test can keep a clone while the
/// engine owns another and inspect or mutate the controller side at will.
#[derive(Debug, Clone, Default)]
pub struct SimulatedRegisterClient {
    state: Arc<Mutex<SimulatedState>>,
}

impl SimulatedRegisterClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Controller-side value; unset registers read as zero.
    pub fn value(&self, address: u16) -> u16 {
        self.state
            .lock()
            .registers
            .get(&address)
            .copied()
            .unwrap_or(0)
    }

    /// Controller-side mutation that bypasses failure injection
    pub fn set_value(&self, address: u16, value: u16) {
        self.state.lock().registers.insert(address, value);
    }

    pub fn set_values(&self, start: u16, values: &[u16]) {
        let mut state = self.state.lock();
        for (offset, value) in values.iter().enumerate() {
            state.registers.insert(start + offset as u16, *value);
        }
    }

    pub fn refuse_connect(&self, refuse: bool) {
        self.state.lock().refuse_connect = refuse;
    }

    pub fn disconnect(&self) {
        self.state.lock().connected = false;
    }

    pub fn fail_reads_at(&self, address: u16) {
        self.state.lock().failing_reads.insert(address);
    }

    pub fn fail_writes_at(&self, address: u16) {
        self.state.lock().failing_writes.insert(address);
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.failing_reads.clear();
        state.failing_writes.clear();
        state.reject_bulk_writes = false;
    }

    pub fn reject_bulk_writes(&self, reject: bool) {
        self.state.lock().reject_bulk_writes = reject;
    }

    /// Delay applied to every read, used to push a sweep past its budget
    pub fn set_read_latency(&self, latency: Option<Duration>) {
        self.state.lock().read_latency = latency;
    }

    pub fn read_count(&self) -> usize {
        self.state.lock().reads
    }

    pub fn write_count(&self) -> usize {
        self.state.lock().writes
    }

    pub fn bulk_write_count(&self) -> usize {
        self.state.lock().bulk_writes
    }
}

#[async_trait]
impl RegisterClient for SimulatedRegisterClient {
    async fn connect(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        if state.refuse_connect {
            return Err(anyhow!("Connection refused"));
        }
        state.connected = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    async fn read(&mut self, address: u16, count: u16) -> Result<Vec<u16>> {
        let latency = self.state.lock().read_latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.lock();
        if !state.connected {
            return Err(BridgeError::NotConnected.into());
        }
        state.reads += 1;
        let addresses = (0..count).map(|offset| address.wrapping_add(offset));
        if let Some(bad) = addresses.clone().find(|a| state.failing_reads.contains(a)) {
            return Err(anyhow!("Illegal data address {bad}"));
        }
        Ok(addresses
            .map(|a| state.registers.get(&a).copied().unwrap_or(0))
            .collect())
    }

    async fn write(&mut self, address: u16, value: u16) -> Result<()> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(BridgeError::NotConnected.into());
        }
        if state.failing_writes.contains(&address) {
            return Err(anyhow!("Write to register {address} rejected"));
        }
        state.writes += 1;
        state.registers.insert(address, value);
        Ok(())
    }

    async fn write_many(&mut self, address: u16, values: &[u16]) -> Result<()> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(BridgeError::NotConnected.into());
        }
        if state.reject_bulk_writes {
            return Err(anyhow!("Illegal function: bulk write not supported"));
        }
        state.bulk_writes += 1;
        for (offset, value) in values.iter().enumerate() {
            state.registers.insert(address + offset as u16, *value);
        }
        Ok(())
    }

    async fn close(&mut self) {
        self.state.lock().connected = false;
    }

    fn describe(&self) -> String {
        "simulated".to_string()
    }
}
