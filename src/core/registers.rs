use anyhow::{anyhow, Result};
use std::collections::BTreeMap;

/// Display-side state of one monitored register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterRow {
    pub address_label: String,
    /// Last value reported by the monitor, `--` until the first update
    pub display_value: String,
    /// Value the user is typing for the next write
    pub input_buffer: String,
    /// Set when the last submit failed to parse
    pub invalid: bool,
}

impl RegisterRow {
    pub const PLACEHOLDER: &'static str = "--";

    fn new(address: u16) -> Self {
        Self {
            address_label: format!("Register {address}"),
            display_value: Self::PLACEHOLDER.to_string(),
            input_buffer: String::new(),
            invalid: false,
        }
    }
}

/// Consumer-side view of the monitored set.
///
/// It mirrors what the monitor reports and never talks to the controller
/// itself; writes leave the board as `(address, value)` requests.
#[derive(Debug, Default)]
pub struct RegisterBoard {
    rows: BTreeMap<u16, RegisterRow>,
}

impl RegisterBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the address already had a row.
    pub fn add(&mut self, address: u16) -> bool {
        if self.rows.contains_key(&address) {
            return false;
        }
        self.rows.insert(address, RegisterRow::new(address));
        true
    }

    pub fn remove(&mut self, address: u16) -> Option<RegisterRow> {
        self.rows.remove(&address)
    }

    pub fn row(&self, address: u16) -> Option<&RegisterRow> {
        self.rows.get(&address)
    }

    pub fn rows(&self) -> impl Iterator<Item = (u16, &RegisterRow)> {
        self.rows.iter().map(|(address, row)| (*address, row))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Show a reported value. Updates for addresses without a row are ignored.
    pub fn apply_update(&mut self, address: u16, value: u16) -> bool {
        match self.rows.get_mut(&address) {
            Some(row) => {
                row.display_value = value.to_string();
                true
            }
            None => false,
        }
    }

    pub fn set_input(&mut self, address: u16, text: impl Into<String>) -> Result<()> {
        let row = self
            .rows
            .get_mut(&address)
            .ok_or_else(|| anyhow!("Register {address} is not monitored"))?;
        row.input_buffer = text.into();
        row.invalid = false;
        Ok(())
    }

    /// Turn the row's input buffer into a write request.
    ///
    /// On success the buffer is cleared. A buffer that is not a valid u16
    /// marks the row invalid and is left in place for correction.
    pub fn submit(&mut self, address: u16) -> Result<(u16, u16)> {
        let row = self
            .rows
            .get_mut(&address)
            .ok_or_else(|| anyhow!("Register {address} is not monitored"))?;

        match row.input_buffer.trim().parse::<u16>() {
            Ok(value) => {
                row.input_buffer.clear();
                row.invalid = false;
                Ok((address, value))
            }
            Err(err) => {
                row.invalid = true;
                Err(anyhow!(
                    "Invalid value '{}' for register {address}: {err}",
                    row.input_buffer
                ))
            }
        }
    }

    /// Multi-line text rendering, one row per address
    pub fn render(&self) -> String {
        self.rows
            .values()
            .map(|row| {
                let mark = if row.invalid { " (invalid input)" } else { "" };
                format!("{}: {}{mark}", row.address_label, row.display_value)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
