use bytes::BytesMut;

/// Marker that opens a structured (pose) message
pub const STRUCTURED_PREFIX: &str = "A_";

pub const DEFAULT_MAX_BUFFERED: usize = 64 * 1024;

/// Reassembles raw socket chunks into complete application messages.
///
/// Two framing rules apply, in this order:
///
/// 1. A buffer holding the structured marker and at least one `[` is a single
///    structured message once its `[` and `]` counts balance. While `[`
///    outnumbers `]` it is held back, even across newlines.
/// 2. Everything else, including a buffer with more `]` than `[`, is newline
///    delimited. The trailing partial line stays
///    buffered.
///
/// Bytes are buffered undecoded so a UTF-8 sequence split across reads is
/// decoded intact once the message completes.
#[derive(Debug)]
pub struct FrameReassembler {
    buffer: BytesMut,
    max_buffered: usize,
}

impl Default for FrameReassembler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BUFFERED)
    }
}

impl FrameReassembler {
    pub fn new(max_buffered: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_buffered,
        }
    }

    /// Append a chunk and return every message it completed, in order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        if self.holds_structured() {
            match bracket_balance(&self.buffer) {
                0 => {
                    let frame = self.buffer.split();
                    return vec![decode(&frame)];
                }
                // Surplus `]` cannot be closed by later bytes.
                depth if depth < 0 => {}
                _ if self.buffer.len() <= self.max_buffered => return Vec::new(),
                _ => log::warn!(
                    "Structured message exceeded {} bytes without balanced brackets, splitting on newlines",
                    self.max_buffered
                ),
            }
        }

        self.split_lines()
    }

    /// Bytes received but not yet part of a complete message
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    fn holds_structured(&self) -> bool {
        let marker = STRUCTURED_PREFIX.as_bytes();
        self.buffer.contains(&b'[') && self.buffer.windows(marker.len()).any(|w| w == marker)
    }

    fn split_lines(&mut self) -> Vec<String> {
        let mut messages = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line = self.buffer.split_to(pos + 1);
            messages.push(decode(&line));
        }
        messages
    }
}

/// Count of `[` minus count of `]`
fn bracket_balance(bytes: &[u8]) -> isize {
    bytes.iter().fold(0, |depth, &b| match b {
        b'[' => depth + 1,
        b']' => depth - 1,
        _ => depth,
    })
}

fn decode(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches(['\r', '\n'])
        .to_string()
}

pub fn is_structured(message: &str) -> bool {
    message.starts_with(STRUCTURED_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structured_message_spans_reads() {
        let mut frames = FrameReassembler::default();
        assert!(frames.feed(b"A_prepos_l: p[[1,2,3]").is_empty());

        let messages = frames.feed(b",[4,5,6]]\n");
        assert_eq!(messages, vec!["A_prepos_l: p[[1,2,3],[4,5,6]]".to_string()]);
        assert!(frames.buffered().is_empty());
    }

    #[test]
    fn test_newline_framing_keeps_partial_tail() {
        let mut frames = FrameReassembler::default();
        let messages = frames.feed(b"line1\nline2\npart");
        assert_eq!(messages, vec!["line1".to_string(), "line2".to_string()]);
        assert_eq!(frames.buffered(), b"part");

        assert_eq!(frames.feed(b"ial\r\n"), vec!["partial".to_string()]);
    }

    #[test]
    fn test_unbalanced_structured_message_waits_across_newlines() {
        let mut frames = FrameReassembler::default();
        assert!(frames.feed(b"A_touch_p: p[[0,0,0],\n").is_empty());
        assert!(frames.feed(b"[1,2,3]").is_empty());
        let messages = frames.feed(b"]");
        assert_eq!(messages.len(), 1);
        assert!(messages[0].starts_with("A_touch_p"));
    }

    #[test]
    fn test_marker_without_bracket_is_line_framed() {
        let mut frames = FrameReassembler::default();
        assert_eq!(frames.feed(b"A_status ok\n"), vec!["A_status ok".to_string()]);
    }

    #[test]
    fn test_oversized_structured_message_is_flushed() {
        let mut frames = FrameReassembler::new(16);
        assert!(frames.feed(b"A_x: [[1,2").is_empty());
        let messages = frames.feed(b",3,4,5,6,7,8\nrest");
        assert_eq!(messages, vec!["A_x: [[1,2,3,4,5,6,7,8".to_string()]);
        assert_eq!(frames.buffered(), b"rest");
    }

    #[test]
    fn test_surplus_closing_bracket_falls_back_to_lines() {
        let mut frames = FrameReassembler::default();
        assert_eq!(
            frames.feed(b"A_status: [ok]]\n"),
            vec!["A_status: [ok]]".to_string()]
        );
        assert_eq!(
            frames.feed(b"ready\nnext\n"),
            vec!["ready".to_string(), "next".to_string()]
        );
        assert!(frames.buffered().is_empty());
    }

    #[test]
    fn test_split_utf8_sequence_is_decoded_whole() {
        let mut frames = FrameReassembler::default();
        let text = "안녕\n".as_bytes();
        assert!(frames.feed(&text[..2]).is_empty());
        assert_eq!(frames.feed(&text[2..]), vec!["안녕".to_string()]);
    }
}
