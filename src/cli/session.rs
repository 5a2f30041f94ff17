use anyhow::{Context, Result};
use flume::{Receiver, TryRecvError};
use std::{io::BufRead, time::Duration};

use super::{ConsoleCommand, Options, USAGE};
use crate::{
    core::{
        bus::{ClientEvent, MonitorEvent, ServerEvent},
        logs::{LogBuffer, LogEntry, LogLevel},
        registers::RegisterBoard,
    },
    protocol::{
        monitor::MonitorHandle,
        socket::{SocketClientHandle, SocketServerHandle},
    },
    utils::{clock_stamp, peer_header},
};

const IDLE_DELAY: Duration = Duration::from_millis(20);

/// Forward stdin lines to the console loop. The channel closes on EOF.
fn spawn_stdin_reader() -> Result<Receiver<String>> {
    let (tx, rx) = flume::unbounded();
    std::thread::Builder::new()
        .name("regwatch-stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        log::warn!("Failed to read stdin: {err}");
                        break;
                    }
                }
            }
        })
        .context("Failed to spawn stdin reader")?;
    Ok(rx)
}

fn print_entry(entry: &LogEntry) {
    let stamp = clock_stamp(&entry.timestamp);
    match entry.level {
        LogLevel::Info if entry.message.is_empty() => println!(),
        LogLevel::Info => println!("[{stamp}] {}", entry.message),
        LogLevel::Warning => println!("[{stamp}] WARN {}", entry.message),
        LogLevel::Error => println!("[{stamp}] ERROR {}", entry.message),
    }
}

struct Session {
    monitor: MonitorHandle,
    server: Option<SocketServerHandle>,
    client: Option<SocketClientHandle>,
    board: RegisterBoard,
    logs: LogBuffer,
}

impl Session {
    fn record(&mut self, entry: LogEntry) {
        print_entry(&entry);
        self.logs.push(entry);
    }

    /// Drain every worker's events. Returns false once the monitor is gone.
    fn drain_events(&mut self) -> bool {
        let mut monitor_alive = true;

        let monitor_events: Vec<_> = self.monitor.events().try_iter().collect();
        for event in monitor_events {
            match event {
                MonitorEvent::Log(entry) => self.record(entry),
                MonitorEvent::RegisterUpdated { address, value } => {
                    if self.board.apply_update(address, value) {
                        log::debug!("Board updated: register {address} = {value}");
                    }
                }
                MonitorEvent::WriteResult { address, success } => {
                    let outcome = if success { "succeeded" } else { "failed" };
                    println!("Write to register {address} {outcome}");
                }
                MonitorEvent::Stopped => monitor_alive = false,
            }
        }

        let server_events: Vec<_> = self
            .server
            .as_ref()
            .map(|server| server.events().try_iter().collect())
            .unwrap_or_default();
        for event in server_events {
            match event {
                ServerEvent::Log(entry) => self.record(entry),
                ServerEvent::Listening(addr) => log::info!("Socket server bound to {addr}"),
                ServerEvent::Message {
                    peer,
                    text,
                    received_at,
                } => println!("\n{}\n{text}\n", peer_header(&received_at, &peer)),
                ServerEvent::Poses { report, .. } => println!("\n{}", report.render()),
                ServerEvent::Stopped => self.server = None,
            }
        }

        let client_events: Vec<_> = self
            .client
            .as_ref()
            .map(|client| client.events().try_iter().collect())
            .unwrap_or_default();
        for event in client_events {
            match event {
                ClientEvent::Log(entry) => self.record(entry),
                ClientEvent::Connected(connected) => {
                    log::info!("Socket client connected: {connected}")
                }
                ClientEvent::Received { text, received_at } => {
                    println!("[{}] Received: {text}", clock_stamp(&received_at))
                }
                ClientEvent::Stopped => self.client = None,
            }
        }

        monitor_alive
    }

    /// Returns false when the session should end.
    fn dispatch(&mut self, command: ConsoleCommand) -> bool {
        match command {
            ConsoleCommand::Add(address) => {
                self.board.add(address);
                self.monitor.add_monitored(address);
            }
            ConsoleCommand::Remove(address) => {
                self.board.remove(address);
                self.monitor.remove_monitored(address);
            }
            ConsoleCommand::Set { address, input } => {
                let submitted = self
                    .board
                    .set_input(address, input)
                    .and_then(|_| self.board.submit(address));
                match submitted {
                    Ok((address, value)) => self.monitor.write_register(address, value),
                    Err(err) => println!("{err}"),
                }
            }
            ConsoleCommand::Reset => self.monitor.request_reset(),
            ConsoleCommand::Heartbeat(active) => self.monitor.set_heartbeat(active),
            ConsoleCommand::Poll => self.monitor.poll_once(),
            ConsoleCommand::Send(text) => match &self.client {
                Some(client) => client.send(text),
                None => println!("Socket client is not connected (start with --connect HOST:PORT)"),
            },
            ConsoleCommand::Show => {
                if self.board.is_empty() {
                    println!("No registers monitored");
                } else {
                    println!("{}", self.board.render());
                }
            }
            ConsoleCommand::Help => println!("{USAGE}"),
            ConsoleCommand::Quit => return false,
        }
        true
    }

    fn shutdown(mut self) {
        if let Some(mut client) = self.client.take() {
            client.disconnect();
        }
        if let Some(mut server) = self.server.take() {
            server.stop();
        }
        self.monitor.stop();
        self.drain_events();
        log::info!("Session ended with {} log entries", self.logs.len());
    }
}

/// Run the interactive console until `quit`, stdin EOF or the monitor exits.
pub fn run(options: Options) -> Result<()> {
    let Options {
        config,
        heartbeat,
        serve,
        connect,
    } = options;

    let mut board = RegisterBoard::new();
    for address in &config.monitor.initial_monitored {
        board.add(*address);
    }

    let monitor = MonitorHandle::connect(config.monitor.clone())?;
    if heartbeat {
        monitor.set_heartbeat(true);
    }
    let server = if serve {
        Some(SocketServerHandle::spawn(config.server.clone())?)
    } else {
        None
    };
    let client = connect.map(SocketClientHandle::spawn).transpose()?;

    let mut session = Session {
        monitor,
        server,
        client,
        board,
        logs: LogBuffer::default(),
    };
    let input = spawn_stdin_reader()?;
    println!("{USAGE}");

    loop {
        if !session.drain_events() {
            log::warn!("Monitor worker exited");
            break;
        }

        match input.try_recv() {
            Ok(line) if line.trim().is_empty() => {}
            Ok(line) => match line.parse::<ConsoleCommand>() {
                Ok(command) => {
                    if !session.dispatch(command) {
                        break;
                    }
                }
                Err(err) => println!("{err}\n{USAGE}"),
            },
            Err(TryRecvError::Empty) => std::thread::sleep(IDLE_DELAY),
            Err(TryRecvError::Disconnected) => break,
        }
    }

    session.shutdown();
    Ok(())
}
