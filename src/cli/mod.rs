pub mod console;
pub mod session;

use anyhow::{anyhow, Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;

use crate::core::config::{AppConfig, ClientConfig};

pub use console::{ConsoleCommand, USAGE};
pub use session::run;

pub fn build_command() -> Command {
    Command::new("regwatch")
        .about("Watch controller registers over Modbus/TCP and bridge robot socket traffic")
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .help("TOML configuration file")
                .value_name("FILE")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("host")
                .long("host")
                .help("Modbus server host, overrides the configuration")
                .value_name("HOST"),
        )
        .arg(
            Arg::new("port")
                .long("port")
                .short('p')
                .help("Modbus server port, overrides the configuration")
                .value_name("PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("monitor")
                .long("monitor")
                .short('m')
                .help("Register to monitor from the start (repeatable)")
                .value_name("ADDR")
                .value_parser(clap::value_parser!(u16))
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("heartbeat")
                .long("heartbeat")
                .help("Start the heartbeat immediately")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("serve")
                .long("serve")
                .short('s')
                .help("Start the robot socket server")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("connect")
                .long("connect")
                .help("Connect the socket client to HOST:PORT")
                .value_name("HOST:PORT"),
        )
}

/// Parse command line arguments and return ArgMatches.
pub fn parse_args() -> ArgMatches {
    build_command().get_matches()
}

/// Everything the console session needs, resolved from flags and config file.
#[derive(Debug, Clone)]
pub struct Options {
    pub config: AppConfig,
    pub heartbeat: bool,
    pub serve: bool,
    pub connect: Option<ClientConfig>,
}

impl Options {
    pub fn from_matches(matches: &ArgMatches) -> Result<Self> {
        let mut config = match matches.get_one::<PathBuf>("config") {
            Some(path) => AppConfig::from_file(path)?,
            None => AppConfig::default(),
        };

        if let Some(host) = matches.get_one::<String>("host") {
            config.monitor.host = host.clone();
        }
        if let Some(port) = matches.get_one::<u16>("port") {
            config.monitor.port = *port;
        }
        if let Some(addresses) = matches.get_many::<u16>("monitor") {
            config.monitor.initial_monitored = addresses.copied().collect();
        }

        let connect = matches
            .get_one::<String>("connect")
            .map(|target| client_target(target, &config.client))
            .transpose()?;

        Ok(Self {
            config,
            heartbeat: matches.get_flag("heartbeat"),
            serve: matches.get_flag("serve"),
            connect,
        })
    }
}

/// Apply a `HOST:PORT` target on top of the configured client settings.
fn client_target(target: &str, base: &ClientConfig) -> Result<ClientConfig> {
    let (host, port) = target
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("Expected HOST:PORT, got '{target}'"))?;
    let port = port
        .parse::<u16>()
        .with_context(|| format!("Invalid port in '{target}'"))?;
    Ok(ClientConfig {
        host: host.to_string(),
        port,
        ..base.clone()
    })
}
