use anyhow::{anyhow, Context, Result};
use std::str::FromStr;

pub const USAGE: &str = "Commands:
  add N        start monitoring register N
  rm N         stop monitoring register N
  set N V      write value V to monitored register N
  reset        zero the reset range
  hb on|off    toggle the heartbeat
  poll         read and print every swept register once
  send TEXT    send a line through the socket client
  show         print the monitored registers
  quit         stop all workers and exit";

/// One line typed on the console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Add(u16),
    Remove(u16),
    /// Raw value text; validated by the register board on submit
    Set { address: u16, input: String },
    Reset,
    Heartbeat(bool),
    Poll,
    Send(String),
    Show,
    Help,
    Quit,
}

fn parse_address(word: Option<&str>) -> Result<u16> {
    let word = word.ok_or_else(|| anyhow!("Missing register address"))?;
    word.parse::<u16>()
        .with_context(|| format!("Invalid register address '{word}'"))
}

impl FromStr for ConsoleCommand {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let line = line.trim();
        let (verb, rest) = line
            .split_once(char::is_whitespace)
            .map(|(verb, rest)| (verb, rest.trim()))
            .unwrap_or((line, ""));
        let mut args = rest.split_whitespace();

        let command = match verb.to_ascii_lowercase().as_str() {
            "add" => Self::Add(parse_address(args.next())?),
            "rm" | "remove" => Self::Remove(parse_address(args.next())?),
            "set" => {
                let address = parse_address(args.next())?;
                let input = args
                    .next()
                    .ok_or_else(|| anyhow!("Missing value for register {address}"))?;
                Self::Set {
                    address,
                    input: input.to_string(),
                }
            }
            "reset" => Self::Reset,
            "hb" | "heartbeat" => match args.next() {
                Some("on") => Self::Heartbeat(true),
                Some("off") => Self::Heartbeat(false),
                other => return Err(anyhow!("Expected 'on' or 'off', got {other:?}")),
            },
            "poll" => Self::Poll,
            // Keep the text verbatim, inner whitespace included
            "send" if !rest.is_empty() => Self::Send(rest.to_string()),
            "send" => return Err(anyhow!("Nothing to send")),
            "show" => Self::Show,
            "help" | "?" => Self::Help,
            "quit" | "exit" => Self::Quit,
            "" => return Err(anyhow!("Empty command")),
            other => return Err(anyhow!("Unknown command '{other}'")),
        };
        Ok(command)
    }
}
