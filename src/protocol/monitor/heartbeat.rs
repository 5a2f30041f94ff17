use tokio::time::Instant;

use crate::core::config::{HeartbeatConfig, HEARTBEAT_COUNTER_MASK};

/// Rotating liveness counter packed into the low nibble of one register.
///
/// This type only holds the schedule and counter; the engine performs the
/// read-modify-write on its own loop whenever [`Heartbeat::is_due`] says so.
#[derive(Debug, Clone)]
pub struct Heartbeat {
    config: HeartbeatConfig,
    active: bool,
    counter: u8,
    next_due: Option<Instant>,
}

impl Heartbeat {
    pub fn new(config: HeartbeatConfig) -> Self {
        Self {
            config,
            active: false,
            counter: 1,
            next_due: None,
        }
    }

    pub fn register(&self) -> u16 {
        self.config.register
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn counter(&self) -> u8 {
        self.counter
    }

    /// Idle -> Beating. Restarts the counter at 1 and schedules an immediate beat.
    pub fn activate(&mut self, now: Instant) {
        self.active = true;
        self.counter = 1;
        self.next_due = Some(now);
    }

    /// Beating -> Idle. A beat already scheduled becomes a no-op.
    pub fn deactivate(&mut self) {
        self.active = false;
        self.next_due = None;
    }

    /// When the next beat should fire, if any
    pub fn next_due(&self) -> Option<Instant> {
        if self.active {
            self.next_due
        } else {
            None
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.next_due().is_some_and(|due| due <= now)
    }

    /// Merge the counter into `current`, keeping the reserved bits of other
    /// producers, and advance the counter.
    pub fn next_value(&mut self, current: u16) -> u16 {
        let value = compose(current, self.config.reserved_mask, self.counter);
        self.counter = (self.counter + 1) % 16;
        value
    }

    /// Schedule the following beat after a completed attempt.
    pub fn reschedule(&mut self, now: Instant, succeeded: bool) {
        if !self.active {
            self.next_due = None;
            return;
        }
        let delay = if succeeded {
            self.config.interval()
        } else {
            self.config.backoff()
        };
        self.next_due = Some(now + delay);
    }
}

/// Keep only the reserved bits of `current` and place the counter nibble.
pub fn compose(current: u16, reserved_mask: u16, counter: u8) -> u16 {
    (current & reserved_mask & !HEARTBEAT_COUNTER_MASK) | (u16::from(counter) & HEARTBEAT_COUNTER_MASK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;

    fn heartbeat() -> Heartbeat {
        Heartbeat::new(HeartbeatConfig::default())
    }

    #[test]
    fn test_counter_sequence_wraps() {
        let mut hb = heartbeat();
        hb.activate(Instant::now());

        let nibbles: Vec<u16> = (0..18).map(|_| hb.next_value(0) & 0x000F).collect();
        let mut expected: Vec<u16> = (1..16).collect();
        expected.extend([0, 1, 2]);
        assert_eq!(nibbles, expected);
    }

    #[test]
    fn test_activation_resets_counter() {
        let mut hb = heartbeat();
        let now = Instant::now();
        hb.activate(now);
        hb.next_value(0);
        hb.next_value(0);
        hb.deactivate();
        hb.activate(now);
        assert_eq!(hb.counter(), 1);
        assert!(hb.is_due(now));
    }

    #[test]
    fn test_preserves_reserved_bits() {
        let mut hb = heartbeat();
        hb.activate(Instant::now());
        assert_eq!(hb.next_value(0xABC7), 0xABC1);
    }

    #[test]
    fn test_deactivated_beat_is_noop() {
        let mut hb = heartbeat();
        let now = Instant::now();
        hb.activate(now);
        hb.deactivate();
        assert!(!hb.is_due(now + Duration::from_secs(10)));

        hb.reschedule(now, true);
        assert_eq!(hb.next_due(), None);
    }

    #[test]
    fn test_failure_uses_backoff() {
        let mut hb = heartbeat();
        let now = Instant::now();
        hb.activate(now);

        hb.reschedule(now, true);
        assert_eq!(hb.next_due(), Some(now + Duration::from_millis(500)));
        hb.reschedule(now, false);
        assert_eq!(hb.next_due(), Some(now + Duration::from_millis(1000)));
    }

    proptest! {
        #[test]
        fn prop_only_counter_bits_change(current in any::<u16>(), counter in 0u8..=255) {
            let written = compose(current, 0xFFF0, counter);
            prop_assert_eq!(written & 0xFFF0, current & 0xFFF0);
            prop_assert_eq!(written & 0x000F, u16::from(counter) & 0x000F);
        }

        #[test]
        fn prop_bits_outside_mask_and_nibble_are_cleared(current in any::<u16>(), mask in any::<u16>()) {
            let written = compose(current, mask, 3);
            prop_assert_eq!(written & !(mask | 0x000F), 0);
        }
    }
}
