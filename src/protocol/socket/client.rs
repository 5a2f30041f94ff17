use anyhow::Result;
use chrono::Local;
use flume::Receiver;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

use crate::core::{
    bus::{channel_pair, ClientCommand, ClientEvent, WorkerBus},
    config::ClientConfig,
    logs::LogEntry,
    task_manager::{spawn_worker, WorkerHandle},
};

/// Outgoing text gets exactly one trailing newline.
pub fn with_newline(text: impl Into<String>) -> String {
    let mut line = text.into();
    if !line.ends_with('\n') {
        line.push('\n');
    }
    line
}

pub struct SocketClient {
    config: ClientConfig,
    bus: WorkerBus<ClientCommand, ClientEvent>,
}

impl SocketClient {
    pub fn new(config: ClientConfig, bus: WorkerBus<ClientCommand, ClientEvent>) -> Self {
        Self { config, bus }
    }

    fn log(&self, entry: LogEntry) {
        self.bus.emit(ClientEvent::Log(entry));
    }

    pub async fn run(self) {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let stream = match TcpStream::connect(&addr).await {
            Ok(stream) => stream,
            Err(err) => {
                self.log(LogEntry::error(format!("Server connection failed: {err}")));
                self.bus.emit(ClientEvent::Connected(false));
                self.bus.emit(ClientEvent::Stopped);
                return;
            }
        };
        self.log(LogEntry::info(format!("Server connected: {addr}")));
        self.bus.emit(ClientEvent::Connected(true));

        let (mut reader, mut writer) = stream.into_split();
        let commands = self.bus.commands.clone();
        let mut chunk = vec![0u8; self.config.read_chunk.max(1)];
        loop {
            tokio::select! {
                command = commands.recv_async() => match command {
                    Ok(ClientCommand::Send(text)) => {
                        let line = with_newline(text);
                        if let Err(err) = writer.write_all(line.as_bytes()).await {
                            self.log(LogEntry::error(format!("Send failed: {err}")));
                            break;
                        }
                        log::debug!("Sent {} bytes to {addr}", line.len());
                    }
                    Ok(ClientCommand::Disconnect) | Err(_) => break,
                },
                read = reader.read(&mut chunk) => match read {
                    Ok(0) => {
                        self.log(LogEntry::info("Connection closed."));
                        break;
                    }
                    Ok(n) => self.bus.emit(ClientEvent::Received {
                        text: String::from_utf8_lossy(&chunk[..n]).into_owned(),
                        received_at: Local::now(),
                    }),
                    Err(err) => {
                        self.log(LogEntry::error(format!("Receive error: {err}")));
                        break;
                    }
                },
            }
        }

        if let Err(err) = writer.shutdown().await {
            log::debug!("Error while closing connection to {addr}: {err}");
        }
        self.log(LogEntry::info("Disconnected from server"));
        self.bus.emit(ClientEvent::Connected(false));
        self.bus.emit(ClientEvent::Stopped);
    }
}

/// Consumer-side handle of a running socket client worker.
pub struct SocketClientHandle {
    worker: WorkerHandle<ClientCommand, ClientEvent>,
}

impl SocketClientHandle {
    pub fn spawn(config: ClientConfig) -> Result<Self> {
        let (bus, worker_bus) = channel_pair();
        let worker = spawn_worker("regwatch-socket-client", move || async move {
            SocketClient::new(config, worker_bus).run().await;
        })?;
        Ok(Self {
            worker: WorkerHandle::new(bus, worker, ClientCommand::Disconnect),
        })
    }

    pub fn send(&self, text: impl Into<String>) {
        self.worker.send(ClientCommand::Send(text.into()));
    }

    pub fn events(&self) -> &Receiver<ClientEvent> {
        self.worker.events()
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    pub fn disconnect(&mut self) {
        self.worker.stop();
    }
}
