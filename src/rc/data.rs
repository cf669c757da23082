//! The shared RC data model.
//!
//! Inputs feed this structure, which in turn feeds the outputs: on the TX
//! a handset source updates the channels and the engine drains them; on
//! the RX the engine updates them and an FC sink drains them. Telemetry
//! flows the opposite way in each case.

use log::debug;

use crate::rc::channels::{CHANNELS_NUM, CHANNEL_CENTER_VALUE, CHANNEL_MAX_VALUE, CHANNEL_MIN_VALUE};
use crate::rc::data_state::DataState;
use crate::rc::failsafe::Failsafe;
use crate::rc::telemetry::{Telemetry, TelemetryId, TelemetryValue, DOWNLINK_IDS, UPLINK_IDS};
use crate::util::time::TimeMicros;

/// One control channel: the current value plus its send/ack bookkeeping.
#[derive(Debug, Clone, Copy)]
pub struct ControlChannel {
    pub value: u16,
    pub data_state: DataState,
}

impl Default for ControlChannel {
    fn default() -> Self {
        ControlChannel {
            value: CHANNEL_CENTER_VALUE,
            data_state: DataState::new(),
        }
    }
}

/// Channels, telemetry tables and failsafe state shared between an input
/// and an output side.
#[derive(Debug, Clone)]
pub struct RcData {
    channels: [ControlChannel; CHANNELS_NUM],
    /// Channels actually in use. Might be lower than [`CHANNELS_NUM`] if
    /// the other end supports fewer channels, never higher.
    channels_num: usize,
    ready: bool,
    telemetry_uplink: [Telemetry; UPLINK_IDS.len()],
    telemetry_downlink: [Telemetry; DOWNLINK_IDS.len()],
    /// Failsafe of the side feeding channels in (handset on TX, air on RX).
    pub input_failsafe: Failsafe,
    /// Failsafe of the side carrying channels out (air on TX).
    pub output_failsafe: Failsafe,
}

impl Default for RcData {
    fn default() -> Self {
        RcData::new()
    }
}

impl RcData {
    pub fn new() -> RcData {
        RcData {
            channels: Default::default(),
            channels_num: CHANNELS_NUM,
            ready: false,
            telemetry_uplink: Default::default(),
            telemetry_downlink: Default::default(),
            input_failsafe: Failsafe::new(),
            output_failsafe: Failsafe::new(),
        }
    }

    pub fn channels_num(&self) -> usize {
        self.channels_num
    }

    /// Caps the number of channels in use (peer supports fewer).
    pub fn set_channels_num(&mut self, num: usize) {
        self.channels_num = num.min(CHANNELS_NUM);
    }

    pub fn channel(&self, ch: usize) -> Option<&ControlChannel> {
        self.channels[..self.channels_num].get(ch)
    }

    pub fn channel_mut(&mut self, ch: usize) -> Option<&mut ControlChannel> {
        let num = self.channels_num;
        self.channels[..num].get_mut(ch)
    }

    pub fn channel_value(&self, ch: usize) -> u16 {
        self.channel(ch).map(|c| c.value).unwrap_or(0)
    }

    /// Stores a clamped channel value and updates its freshness state.
    /// Updates beyond the configured channel count are ignored.
    pub fn update_channel(&mut self, ch: usize, value: u16, now: TimeMicros) {
        if ch >= self.channels_num {
            debug!("Ignoring update for unused channel {ch}");
            return;
        }
        let value = value.clamp(CHANNEL_MIN_VALUE, CHANNEL_MAX_VALUE);
        let channel = &mut self.channels[ch];
        let changed = channel.value != value;
        channel.value = value;
        channel.data_state.update(changed, now);
    }

    /// True once every channel in use has received a value.
    pub fn is_ready(&mut self) -> bool {
        if !self.ready {
            if self.channels[..self.channels_num]
                .iter()
                .any(|ch| !ch.data_state.has_value())
            {
                return false;
            }
            self.ready = true;
        }
        true
    }

    pub fn has_dirty_channels(&mut self) -> bool {
        self.is_ready()
            && self.channels[..self.channels_num]
                .iter()
                .any(|ch| ch.data_state.is_dirty())
    }

    /// Marks all channels flushed to a local sink. No sequence is
    /// recorded: differential acknowledged updates only happen over the
    /// air.
    pub fn channels_sent(&mut self, now: TimeMicros) {
        for ch in &mut self.channels[..self.channels_num] {
            ch.data_state.sent(None, now);
        }
    }

    pub fn telemetry(&self, id: TelemetryId) -> &Telemetry {
        if id.is_uplink() {
            &self.telemetry_uplink[id.index()]
        } else {
            &self.telemetry_downlink[id.index()]
        }
    }

    pub fn telemetry_mut(&mut self, id: TelemetryId) -> &mut Telemetry {
        if id.is_uplink() {
            &mut self.telemetry_uplink[id.index()]
        } else {
            &mut self.telemetry_downlink[id.index()]
        }
    }

    /// Stores a telemetry value; returns whether it changed.
    pub fn set_telemetry(&mut self, id: TelemetryId, value: TelemetryValue, now: TimeMicros) -> bool {
        self.telemetry_mut(id).set(value, now)
    }

    /// Iterates uplink telemetry slots together with their ids.
    pub fn uplink_telemetry_iter(
        &mut self,
    ) -> impl Iterator<Item = (TelemetryId, &mut Telemetry)> + '_ {
        UPLINK_IDS.into_iter().zip(self.telemetry_uplink.iter_mut())
    }

    /// Iterates downlink telemetry slots together with their ids.
    pub fn downlink_telemetry_iter(
        &mut self,
    ) -> impl Iterator<Item = (TelemetryId, &mut Telemetry)> + '_ {
        DOWNLINK_IDS
            .into_iter()
            .zip(self.telemetry_downlink.iter_mut())
    }

    /// Clears the ack state of everything the TX schedules over the air.
    pub fn reset_air_acks(&mut self) {
        for ch in &mut self.channels {
            ch.data_state.reset_ack();
        }
        for t in &mut self.telemetry_uplink {
            t.data_state.reset_ack();
        }
    }

    /// Abandons pending acks after a lost downlink frame.
    pub fn stop_air_acks(&mut self) {
        for ch in &mut self.channels {
            ch.data_state.stop_ack();
        }
        for t in &mut self.telemetry_uplink {
            t.data_state.stop_ack();
        }
    }

    /// Marks every item sent under `seq` as acknowledged.
    pub fn ack_air_seq(&mut self, seq: u8) {
        for ch in &mut self.channels {
            ch.data_state.update_ack_received(seq);
        }
        for t in &mut self.telemetry_uplink {
            t.data_state.update_ack_received(seq);
        }
    }

    pub fn pilot_name(&self) -> Option<&str> {
        self.telemetry(TelemetryId::PilotName)
            .value()
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    }

    pub fn craft_name(&self) -> Option<&str> {
        self.telemetry(TelemetryId::CraftName)
            .value()
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    }
}

/// Source of channel values (the handset side on a TX).
pub trait ChannelSource {
    /// Polls for new channel values; returns true when anything updated.
    /// Implementations reset `data.input_failsafe` while the source is
    /// alive.
    fn poll(&mut self, data: &mut RcData, now: TimeMicros) -> bool;
}

/// Sink for recovered channel values (the FC side on an RX).
pub trait ChannelSink {
    /// Flushes current channels; `failsafe` reports link loss.
    fn write(&mut self, data: &mut RcData, failsafe: bool, now: TimeMicros);
}

/// Deterministic channel source that sweeps all channels through their
/// range. Stands in for a handset in tests and the CLI simulator.
pub struct FakeChannelSource {
    interval: u64,
    next_update: TimeMicros,
    value: u16,
    rising: bool,
}

impl FakeChannelSource {
    pub fn new(interval_micros: u64) -> Self {
        FakeChannelSource {
            interval: interval_micros,
            next_update: TimeMicros::ZERO,
            value: CHANNEL_CENTER_VALUE,
            rising: true,
        }
    }
}

impl ChannelSource for FakeChannelSource {
    fn poll(&mut self, data: &mut RcData, now: TimeMicros) -> bool {
        if now < self.next_update {
            return false;
        }
        self.next_update = now + self.interval;

        // Triangle sweep, one step per poll
        let step = 8;
        if self.rising {
            self.value = (self.value + step).min(CHANNEL_MAX_VALUE);
            if self.value == CHANNEL_MAX_VALUE {
                self.rising = false;
            }
        } else {
            self.value = self.value.saturating_sub(step).max(CHANNEL_MIN_VALUE);
            if self.value == CHANNEL_MIN_VALUE {
                self.rising = true;
            }
        }
        for ch in 0..data.channels_num() {
            // Offset per channel so the values differ
            let offset = (ch as u16 * 13) % 200;
            data.update_channel(ch, self.value.saturating_sub(offset), now);
        }
        data.input_failsafe.reset_interval(now);
        true
    }
}
