use anyhow::Result;
use chrono::Local;
use flume::{Receiver, Sender};
use std::net::SocketAddr;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    task::JoinSet,
};

use super::{
    frame::{is_structured, FrameReassembler},
    pose::parse_poses,
};
use crate::core::{
    bus::{channel_pair, ServerCommand, ServerEvent, WorkerBus},
    config::ServerConfig,
    logs::LogEntry,
    task_manager::{spawn_worker, WorkerHandle},
};

/// Line-oriented TCP server receiving robot messages.
///
/// Every accepted client gets its own session task and its own
/// [`FrameReassembler`]. Stopping the server aborts all sessions.
pub struct SocketServer {
    config: ServerConfig,
    bus: WorkerBus<ServerCommand, ServerEvent>,
}

impl SocketServer {
    pub fn new(config: ServerConfig, bus: WorkerBus<ServerCommand, ServerEvent>) -> Self {
        Self { config, bus }
    }

    fn log(&self, entry: LogEntry) {
        self.bus.emit(ServerEvent::Log(entry));
    }

    pub async fn run(self) {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(err) => {
                log::error!("Failed to bind socket server on {addr}: {err}");
                self.log(LogEntry::error(format!(
                    "Socket server failed to start: {err}. The address ({}) may be invalid or already in use.",
                    self.config.host
                )));
                self.bus.emit(ServerEvent::Stopped);
                return;
            }
        };

        let local = listener.local_addr().ok();
        match local {
            Some(local) => {
                self.log(LogEntry::info(format!("Socket server started {local}")));
                self.bus.emit(ServerEvent::Listening(local));
            }
            None => self.log(LogEntry::info(format!("Socket server started {addr}"))),
        }

        let commands = self.bus.commands.clone();
        let mut sessions = JoinSet::new();
        loop {
            tokio::select! {
                command = commands.recv_async() => match command {
                    Ok(ServerCommand::Stop) | Err(_) => break,
                },
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        sessions.spawn(run_session(
                            stream,
                            peer,
                            self.config.clone(),
                            self.bus.events.clone(),
                        ));
                    }
                    Err(err) => log::warn!("Failed to accept socket client: {err}"),
                },
                Some(finished) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(err) = finished {
                        if err.is_panic() {
                            log::error!("Socket session panicked: {err}");
                        }
                    }
                }
            }
        }

        sessions.abort_all();
        while sessions.join_next().await.is_some() {}
        drop(listener);

        self.log(LogEntry::info("Socket server stopped"));
        self.bus.emit(ServerEvent::Stopped);
    }
}

fn send(events: &Sender<ServerEvent>, event: ServerEvent) {
    if events.send(event).is_err() {
        log::debug!("Event dropped: consumer channel closed");
    }
}

async fn run_session(
    mut stream: TcpStream,
    peer: SocketAddr,
    config: ServerConfig,
    events: Sender<ServerEvent>,
) {
    send(
        &events,
        ServerEvent::Log(LogEntry::info(format!("Client connected: {peer}"))),
    );

    let mut frames = FrameReassembler::new(config.max_buffered);
    let mut chunk = vec![0u8; config.read_chunk.max(1)];
    loop {
        match stream.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                for message in frames.feed(&chunk[..n]) {
                    surface(&events, peer, message);
                }
            }
            Err(err) => {
                send(
                    &events,
                    ServerEvent::Log(LogEntry::warning(format!(
                        "Connection error from {peer}: {err}"
                    ))),
                );
                break;
            }
        }
    }

    if let Err(err) = stream.shutdown().await {
        log::debug!("Error while closing session {peer}: {err}");
    }
    send(
        &events,
        ServerEvent::Log(LogEntry::info(format!("Client disconnected: {peer}"))),
    );
}

/// Route one complete message to the consumer.
fn surface(events: &Sender<ServerEvent>, peer: SocketAddr, message: String) {
    if is_structured(&message) {
        if let Some(report) = parse_poses(&message) {
            for err in &report.rejected {
                send(
                    events,
                    ServerEvent::Log(LogEntry::warning(format!("Pose line parse error: {err}"))),
                );
            }
            if !report.blocks.is_empty() {
                send(events, ServerEvent::Poses { peer, report });
            }
            return;
        }
    }

    if message.trim().is_empty() {
        return;
    }
    send(
        events,
        ServerEvent::Message {
            peer,
            text: message,
            received_at: Local::now(),
        },
    );
}

/// Consumer-side handle of a running socket server worker.
pub struct SocketServerHandle {
    worker: WorkerHandle<ServerCommand, ServerEvent>,
}

impl SocketServerHandle {
    pub fn spawn(config: ServerConfig) -> Result<Self> {
        let (bus, worker_bus) = channel_pair();
        let worker = spawn_worker("regwatch-socket-server", move || async move {
            SocketServer::new(config, worker_bus).run().await;
        })?;
        Ok(Self {
            worker: WorkerHandle::new(bus, worker, ServerCommand::Stop),
        })
    }

    pub fn events(&self) -> &Receiver<ServerEvent> {
        self.worker.events()
    }

    pub fn stop(&mut self) {
        self.worker.stop();
    }
}
