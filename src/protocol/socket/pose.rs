use std::{fmt, str::FromStr};
use strum::{AsRefStr, EnumIter, EnumString, IntoEnumIterator};

use crate::protocol::error::BridgeError;

/// Structured fields the robot controller sends
#[derive(EnumIter, EnumString, AsRefStr, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoseField {
    #[strum(serialize = "A_prepos_l")]
    PreparePoses,
    #[strum(serialize = "A_touch_p")]
    TouchPoints,
}

impl fmt::Display for PoseField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

impl PoseField {
    /// True if `line` opens a new field, e.g. `A_touch_p: ...`
    fn opens(line: &str) -> bool {
        Self::iter().any(|field| {
            line.strip_prefix(field.as_ref())
                .is_some_and(|rest| rest.starts_with(':'))
        })
    }
}

/// Semantic names of pose slots 1..=13. Slot 0 and anything past the table
/// are unnamed.
const POSE_LABELS: [&str; 13] = [
    "A_VL1",
    "A_VL2",
    "A_VR1",
    "A_VR2",
    "A_HOR_L",
    "A_HOR_ML",
    "A_HOR_R",
    "A_HOR_MR",
    "A_HOR_M",
    "A_VL1_END",
    "A_VL2_END",
    "A_VR1_END",
    "A_VR2_END",
];

pub fn pose_label(index: usize) -> String {
    index
        .checked_sub(1)
        .and_then(|slot| POSE_LABELS.get(slot))
        .map(|label| label.to_string())
        .unwrap_or_else(|| format!("unused ({index})"))
}

/// One field's poses, in slot order.
#[derive(Debug, Clone, PartialEq)]
pub struct PoseBlock {
    pub field: PoseField,
    pub poses: Vec<Vec<f64>>,
}

impl PoseBlock {
    /// `(label, values)` for every slot that is not all zero
    pub fn labelled(&self) -> Vec<(String, &[f64])> {
        self.poses
            .iter()
            .enumerate()
            .filter(|(_, pose)| pose.iter().any(|v| *v != 0.0))
            .map(|(index, pose)| (pose_label(index), pose.as_slice()))
            .collect()
    }

    pub fn render(&self) -> String {
        let mut lines = vec![format!("=== {} ===", self.field)];
        for (label, values) in self.labelled() {
            lines.push(format!("{label}: {}", render_values(values)));
        }
        lines.join("\n")
    }
}

fn render_values(values: &[f64]) -> String {
    let parts: Vec<String> = values.iter().map(|v| v.to_string()).collect();
    format!("[{}]", parts.join(", "))
}

/// Everything decoded from one structured message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoseReport {
    pub blocks: Vec<PoseBlock>,
    /// Lines of a recognized field whose payload could not be decoded
    pub rejected: Vec<BridgeError>,
}

impl PoseReport {
    pub fn block(&self, field: PoseField) -> Option<&PoseBlock> {
        self.blocks.iter().find(|block| block.field == field)
    }

    pub fn render(&self) -> String {
        self.blocks
            .iter()
            .map(PoseBlock::render)
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Decode a structured message into pose blocks.
///
/// Returns `None` when the message holds no recognized field at all. A
/// recognized line that fails to decode is recorded in
/// [`PoseReport::rejected`] and the remaining lines are still processed.
pub fn parse_poses(message: &str) -> Option<PoseReport> {
    let mut report = PoseReport::default();
    let mut seen_field = false;

    for line in logical_lines(message) {
        let Some((name, payload)) = line.split_once(':') else {
            continue;
        };
        let Ok(field) = PoseField::from_str(name.trim()) else {
            continue;
        };
        seen_field = true;

        match parse_payload(payload) {
            Ok(poses) => report.blocks.push(PoseBlock { field, poses }),
            Err(err) => {
                log::warn!("Dropping {field} line: {err}");
                report.rejected.push(err);
            }
        }
    }

    seen_field.then_some(report)
}

/// Split on newlines and glue continuation lines onto the field line they
/// belong to.
fn logical_lines(message: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for raw in message.trim().lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        match lines.last_mut() {
            Some(current) if !PoseField::opens(line) => {
                current.push(' ');
                current.push_str(line);
            }
            _ => lines.push(line.to_string()),
        }
    }
    lines
}

fn parse_payload(payload: &str) -> Result<Vec<Vec<f64>>, BridgeError> {
    let collapsed = payload.split_whitespace().collect::<Vec<_>>().join(" ");
    let literal = normalize_literal(&collapsed.replace("p[", "["));
    serde_json::from_str::<Vec<Vec<f64>>>(&literal)
        .map_err(|err| BridgeError::parse(format!("{err} in `{literal}`")))
}

/// Rewrite controller literal forms into JSON: tuples become lists, bare-dot
/// floats (`.5`, `1.`) gain their zero, unary `+` and trailing commas go.
fn normalize_literal(literal: &str) -> String {
    let chars: Vec<char> = literal.chars().collect();
    let mut out = String::with_capacity(literal.len() + 8);
    for (i, &c) in chars.iter().enumerate() {
        match c {
            '(' => out.push('['),
            ')' => out.push(']'),
            ',' if next_significant(&chars[i + 1..]).is_some_and(|n| n == ']' || n == ')') => {}
            '+' if !out.ends_with(['e', 'E']) => {}
            '.' => {
                if !out.ends_with(|p: char| p.is_ascii_digit()) {
                    out.push('0');
                }
                out.push('.');
                if !chars.get(i + 1).is_some_and(char::is_ascii_digit) {
                    out.push('0');
                }
            }
            _ => out.push(c),
        }
    }
    out
}

fn next_significant(rest: &[char]) -> Option<char> {
    rest.iter().copied().find(|c| !c.is_whitespace())
}
