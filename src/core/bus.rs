//! Command/result queues between a consumer thread and the workers.
//!
//! Everything crossing these channels is plain data. A consumer never holds a
//! reference into worker state; it enqueues a command and later learns the
//! outcome from an event.

use chrono::{DateTime, Local};
use flume::{Receiver, Sender};
use std::net::SocketAddr;

use super::logs::LogEntry;
use crate::protocol::socket::PoseReport;

/// Messages sent from the consumer to the register monitor worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorCommand {
    AddMonitored(u16),
    RemoveMonitored(u16),
    WriteRegister { address: u16, value: u16 },
    RequestReset,
    SetHeartbeat(bool),
    /// Manual full sweep that logs every value.
    PollOnce,
    Stop,
}

/// Messages sent from the register monitor worker back to the consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    Log(LogEntry),
    RegisterUpdated { address: u16, value: u16 },
    WriteResult { address: u16, success: bool },
    /// The worker loop has exited; no further events follow.
    Stopped,
}

/// Messages sent from the consumer to the socket server worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerCommand {
    Stop,
}

/// Messages sent from the socket server worker back to the consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Log(LogEntry),
    Listening(SocketAddr),
    /// A complete non-structured message from one client.
    Message {
        peer: SocketAddr,
        text: String,
        received_at: DateTime<Local>,
    },
    Poses {
        peer: SocketAddr,
        report: PoseReport,
    },
    Stopped,
}

/// Messages sent from the consumer to the socket client worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    Send(String),
    Disconnect,
}

/// Messages sent from the socket client worker back to the consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Log(LogEntry),
    Connected(bool),
    Received {
        text: String,
        received_at: DateTime<Local>,
    },
    Stopped,
}

/// Both ends of one worker's channel pair, as seen from the worker side.
#[derive(Debug)]
pub struct WorkerBus<C, E> {
    pub commands: Receiver<C>,
    pub events: Sender<E>,
}

/// Both ends of one worker's channel pair, as seen from the consumer side.
#[derive(Debug)]
pub struct ConsumerBus<C, E> {
    pub commands: Sender<C>,
    pub events: Receiver<E>,
}

impl<C, E> Clone for ConsumerBus<C, E> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            events: self.events.clone(),
        }
    }
}

/// Create the unbounded channel pair linking a consumer and a worker.
pub fn channel_pair<C, E>() -> (ConsumerBus<C, E>, WorkerBus<C, E>) {
    let (cmd_tx, cmd_rx) = flume::unbounded();
    let (evt_tx, evt_rx) = flume::unbounded();
    (
        ConsumerBus {
            commands: cmd_tx,
            events: evt_rx,
        },
        WorkerBus {
            commands: cmd_rx,
            events: evt_tx,
        },
    )
}

impl<C, E> WorkerBus<C, E> {
    /// Send an event, ignoring a consumer that has gone away.
    pub fn emit(&self, event: E) {
        if self.events.send(event).is_err() {
            log::debug!("Event dropped: consumer channel closed");
        }
    }
}

impl<C: std::fmt::Debug, E> ConsumerBus<C, E> {
    /// Fire-and-forget enqueue; a dead worker is logged, not reported.
    pub fn send(&self, command: C) {
        if let Err(err) = self.commands.send(command) {
            log::warn!("Worker is not running, dropped command {:?}", err.into_inner());
        }
    }
}
