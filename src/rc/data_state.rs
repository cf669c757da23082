//! Per-value freshness and acknowledgment tracking.
//!
//! Every control channel and telemetry slot carries a [`DataState`]. The
//! substream feeder always picks the unacknowledged value with the highest
//! staleness score, which yields: newest data preferred, no retransmission
//! loops, graceful degradation under loss.

use crate::util::time::TimeMicros;

#[derive(Debug, Clone, Copy, Default)]
pub struct DataState {
    has_value: bool,
    ack_received: bool,
    last_update: Option<TimeMicros>,
    last_sent: Option<TimeMicros>,
    last_sent_seq: Option<u8>,
}

impl DataState {
    pub fn new() -> DataState {
        DataState::default()
    }

    /// Records a value update. A changed value invalidates any pending or
    /// received acknowledgment: an ack only ever covers the latest value.
    pub fn update(&mut self, changed: bool, now: TimeMicros) {
        self.has_value = true;
        self.last_update = Some(now);
        if changed {
            self.ack_received = false;
            self.last_sent_seq = None;
        }
    }

    /// Records that the value was queued for transmission. `seq` is the
    /// frame sequence that will carry the item's last byte, or `None` when
    /// the transport has no acknowledgments (RX → FC flushes).
    pub fn sent(&mut self, seq: Option<u8>, now: TimeMicros) {
        self.last_sent = Some(now);
        self.last_sent_seq = seq;
    }

    /// Marks the value acknowledged iff `seq` matches the sequence it was
    /// sent under. Returns true only on the transition.
    pub fn update_ack_received(&mut self, seq: u8) -> bool {
        if !self.ack_received && self.last_sent_seq == Some(seq) {
            self.ack_received = true;
            return true;
        }
        false
    }

    /// Clears the acknowledged flag so the value becomes eligible for
    /// retransmission (used when recovering from failsafe).
    pub fn reset_ack(&mut self) {
        self.ack_received = false;
    }

    /// Abandons a pending acknowledgment after a lost downlink: the echo
    /// for this sequence will never arrive.
    pub fn stop_ack(&mut self) {
        self.last_sent_seq = None;
    }

    pub fn has_value(&self) -> bool {
        self.has_value
    }

    /// When the value was last updated.
    pub fn last_update(&self) -> Option<TimeMicros> {
        self.last_update
    }

    /// When the value was last queued for transmission.
    pub fn last_sent(&self) -> Option<TimeMicros> {
        self.last_sent
    }

    pub fn is_ack_received(&self) -> bool {
        self.ack_received
    }

    /// A value is dirty while it has not been acknowledged at its latest
    /// state.
    pub fn is_dirty(&self) -> bool {
        self.has_value && !self.ack_received
    }

    /// Staleness score used by the substream feeder. Zero means "do not
    /// send" (no value, or already acknowledged at the latest value).
    /// Never-sent values always outrank stale ones.
    pub fn score(&self, now: TimeMicros) -> u32 {
        if !self.has_value || self.ack_received {
            return 0;
        }
        match self.last_sent {
            None => u32::MAX,
            Some(sent) => now.micros_since(sent).min(u32::MAX as u64 - 1) as u32 + 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_value_scores_zero() {
        let ds = DataState::new();
        assert_eq!(ds.score(TimeMicros(1_000_000)), 0);
    }

    #[test]
    fn test_never_sent_outranks_stale() {
        let now = TimeMicros(10_000_000);
        let mut never_sent = DataState::new();
        never_sent.update(true, TimeMicros(0));
        let mut stale = DataState::new();
        stale.update(true, TimeMicros(0));
        stale.sent(Some(3), TimeMicros(1));
        assert!(never_sent.score(now) > stale.score(now));
        assert!(stale.score(now) > 0);
    }

    #[test]
    fn test_acked_scores_zero() {
        let mut ds = DataState::new();
        ds.update(true, TimeMicros(0));
        ds.sent(Some(5), TimeMicros(1));
        assert!(ds.update_ack_received(5));
        assert_eq!(ds.score(TimeMicros(100)), 0);
    }

    #[test]
    fn test_ack_transition_happens_once() {
        let mut ds = DataState::new();
        ds.update(true, TimeMicros(0));
        ds.sent(Some(5), TimeMicros(1));
        assert!(ds.update_ack_received(5));
        assert!(!ds.update_ack_received(5));
    }

    #[test]
    fn test_ack_for_wrong_seq_ignored() {
        let mut ds = DataState::new();
        ds.update(true, TimeMicros(0));
        ds.sent(Some(5), TimeMicros(1));
        assert!(!ds.update_ack_received(6));
        assert!(!ds.is_ack_received());
    }

    #[test]
    fn test_change_invalidates_pending_ack() {
        let mut ds = DataState::new();
        ds.update(true, TimeMicros(0));
        ds.sent(Some(5), TimeMicros(1));
        // Value changes before the echo arrives
        ds.update(true, TimeMicros(2));
        assert!(!ds.update_ack_received(5));
        assert_eq!(ds.score(TimeMicros(100)), u32::MAX);
    }

    #[test]
    fn test_stop_ack_abandons_pending() {
        let mut ds = DataState::new();
        ds.update(true, TimeMicros(0));
        ds.sent(Some(5), TimeMicros(1));
        ds.stop_ack();
        assert!(!ds.update_ack_received(5));
    }

    #[test]
    fn test_reset_ack_makes_eligible_again() {
        let mut ds = DataState::new();
        ds.update(true, TimeMicros(0));
        ds.sent(Some(5), TimeMicros(1));
        ds.update_ack_received(5);
        ds.reset_ack();
        assert!(ds.score(TimeMicros(100)) > 0);
    }
}
