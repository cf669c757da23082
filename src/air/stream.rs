//! # Air Stream Multiplexer
//!
//! A byte-oriented substream carried in the 2-byte (uplink) or 3-byte
//! (downlink) data area of each frame. It multiplexes channel updates,
//! telemetry values and commands, in FIFO order, across as many frames as
//! each item needs.
//!
//! ## Framing
//!
//! Every item starts with the sentinel `0x7E`; the item's bytes follow,
//! byte-stuffed: `0x7D` escapes any payload byte equal to the sentinel or
//! the escape, with the following byte XORed by `0x20`. An item ends at
//! the next sentinel. Frames with nothing to carry send bare sentinels,
//! which decode as empty items and are ignored.
//!
//! Because an item's end is only marked by the next sentinel, the decoder
//! can resynchronize after any number of lost frames: whatever partial
//! item it was accumulating is dropped at the next sentinel and decoding
//! continues cleanly.
//!
//! ## Items
//!
//! ```text
//! channel:    header=0x01, u16 LE = value | channel << 9
//! telemetry:  header=0x02 (uplink) / 0x03 (downlink), id, value bytes
//! command:    header=0x10 | opcode, payload...
//! ```
//!
//! Command opcodes ride in the header byte itself, which keeps the
//! critical mode-switch ACK item at two raw bytes: together with its
//! sentinel it always fits into a single downlink frame.

use std::collections::VecDeque;

use log::{debug, warn};

use crate::air::cmd::AirCmd;
use crate::constants::{STREAM_ESCAPE, STREAM_START_STOP, STREAM_XOR};
use crate::rc::telemetry::{TelemetryId, TelemetryValue};
use crate::util::time::TimeMicros;

const ITEM_CHANNEL: u8 = 0x01;
const ITEM_TELEMETRY_UPLINK: u8 = 0x02;
const ITEM_TELEMETRY_DOWNLINK: u8 = 0x03;
/// Commands carry their opcode in the header's low nibble.
const ITEM_CMD_BASE: u8 = 0x10;
const ITEM_CMD_MAX: u8 = 0x1F;

/// Longest unstuffed item: header plus a full RMP datagram.
const MAX_ITEM_SIZE: usize = 192;

/// A decoded substream item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Channel update for channels not carried in the frame header.
    Channel { channel: u8, value: u16 },
    /// Telemetry value; the id tells the direction.
    Telemetry {
        id: TelemetryId,
        value: TelemetryValue,
    },
    /// Command with its raw payload.
    Cmd { cmd: AirCmd, payload: Vec<u8> },
}

/// The substream encoder/decoder owned by one engine.
#[derive(Debug, Default)]
pub struct AirStream {
    /// Stuffed bytes waiting to be drained into frame data areas.
    output: VecDeque<u8>,
    /// Unstuffed bytes of the item currently being received.
    input: Vec<u8>,
    input_escaped: bool,
    /// False until the first sentinel: bytes of an item whose start we
    /// never saw must be discarded.
    input_synced: bool,
    last_input_seq: u8,
}

impl AirStream {
    pub fn new() -> AirStream {
        AirStream::default()
    }

    /// Number of stuffed bytes waiting in the output buffer.
    pub fn output_count(&self) -> usize {
        self.output.len()
    }

    /// Pops one byte for the data area of an outgoing frame.
    pub fn pop_output(&mut self) -> Option<u8> {
        self.output.pop_front()
    }

    /// Empties the output buffer. Only used to guarantee a mode-switch
    /// ACK fits in the next frame.
    pub fn reset_output(&mut self) {
        self.output.clear();
    }

    /// Queues a channel update; returns the number of raw bytes pushed.
    pub fn feed_output_channel(&mut self, channel: u8, value: u16) -> usize {
        let packed = (value & 0x1FF) | ((channel as u16) << 9);
        let mut item = [0u8; 3];
        item[0] = ITEM_CHANNEL;
        item[1..3].copy_from_slice(&packed.to_le_bytes());
        self.push_item(&item)
    }

    /// Queues an uplink telemetry value.
    pub fn feed_output_uplink_telemetry(&mut self, id: TelemetryId, value: &TelemetryValue) -> usize {
        self.feed_output_telemetry(ITEM_TELEMETRY_UPLINK, id, value)
    }

    /// Queues a downlink telemetry value.
    pub fn feed_output_downlink_telemetry(
        &mut self,
        id: TelemetryId,
        value: &TelemetryValue,
    ) -> usize {
        self.feed_output_telemetry(ITEM_TELEMETRY_DOWNLINK, id, value)
    }

    fn feed_output_telemetry(&mut self, kind: u8, id: TelemetryId, value: &TelemetryValue) -> usize {
        let mut item = vec![kind, id as u8];
        item.extend_from_slice(&value.to_bytes());
        self.push_item(&item)
    }

    /// Queues a command with an optional payload.
    pub fn feed_output_cmd(&mut self, cmd: AirCmd, payload: &[u8]) -> usize {
        let mut item = vec![ITEM_CMD_BASE | cmd as u8];
        item.extend_from_slice(payload);
        self.push_item(&item)
    }

    fn push_item(&mut self, item: &[u8]) -> usize {
        let before = self.output.len();
        self.output.push_back(STREAM_START_STOP);
        for &byte in item {
            if byte == STREAM_START_STOP || byte == STREAM_ESCAPE {
                self.output.push_back(STREAM_ESCAPE);
                self.output.push_back(byte ^ STREAM_XOR);
            } else {
                self.output.push_back(byte);
            }
        }
        self.output.len() - before
    }

    /// Decodes the data bytes of a received frame, returning the items
    /// completed by them in order. Timestamps for decoded values are
    /// applied by the caller.
    pub fn feed_input(&mut self, seq: u8, data: &[u8], _now: TimeMicros) -> Vec<StreamEvent> {
        self.last_input_seq = seq;
        let mut events = Vec::new();
        for &byte in data {
            if byte == STREAM_START_STOP {
                if self.input_synced && !self.input.is_empty() {
                    if let Some(event) = self.parse_item() {
                        events.push(event);
                    }
                }
                self.input.clear();
                self.input_escaped = false;
                self.input_synced = true;
                continue;
            }
            if !self.input_synced {
                continue;
            }
            let value = if self.input_escaped {
                self.input_escaped = false;
                byte ^ STREAM_XOR
            } else if byte == STREAM_ESCAPE {
                self.input_escaped = true;
                continue;
            } else {
                byte
            };
            if self.input.len() >= MAX_ITEM_SIZE {
                // Oversized garbage; drop it and wait for the next sentinel
                warn!("Dropping oversized stream item");
                self.input.clear();
                self.input_synced = false;
                continue;
            }
            self.input.push(value);
        }
        events
    }

    fn parse_item(&mut self) -> Option<StreamEvent> {
        let item = &self.input;
        match item[0] {
            ITEM_CHANNEL => {
                if item.len() != 3 {
                    debug!("Dropping malformed channel item ({} bytes)", item.len());
                    return None;
                }
                let packed = u16::from_le_bytes([item[1], item[2]]);
                let channel = (packed >> 9) as u8;
                if channel as usize >= crate::rc::channels::CHANNELS_NUM {
                    debug!("Dropping channel item for unknown channel {channel}");
                    return None;
                }
                Some(StreamEvent::Channel {
                    channel,
                    value: packed & 0x1FF,
                })
            }
            kind @ (ITEM_TELEMETRY_UPLINK | ITEM_TELEMETRY_DOWNLINK) => {
                if item.len() < 2 {
                    return None;
                }
                let id = TelemetryId::from_u8(item[1])?;
                let uplink = kind == ITEM_TELEMETRY_UPLINK;
                if id.is_uplink() != uplink {
                    debug!("Dropping telemetry item with mismatched direction");
                    return None;
                }
                let value = TelemetryValue::parse(id.kind(), &item[2..])?;
                Some(StreamEvent::Telemetry { id, value })
            }
            header @ ITEM_CMD_BASE..=ITEM_CMD_MAX => {
                let cmd = AirCmd::from_u8(header & 0x0F)?;
                Some(StreamEvent::Cmd {
                    cmd,
                    payload: item[1..].to_vec(),
                })
            }
            header => {
                debug!("Dropping stream item with unknown header 0x{header:02X}");
                None
            }
        }
    }

    /// Sequence number of the last frame fed into the decoder.
    pub fn last_input_seq(&self) -> u8 {
        self.last_input_seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(stream: &mut AirStream) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(b) = stream.pop_output() {
            out.push(b);
        }
        out
    }

    fn decode_all(bytes: &[u8]) -> Vec<StreamEvent> {
        let mut rx = AirStream::new();
        let mut events = rx.feed_input(0, bytes, TimeMicros::ZERO);
        // Terminating sentinel flushes the last item
        events.extend(rx.feed_input(0, &[STREAM_START_STOP], TimeMicros::ZERO));
        events
    }

    #[test]
    fn test_channel_round_trip() {
        let mut tx = AirStream::new();
        let n = tx.feed_output_channel(7, 0x1FF);
        assert!(n >= 3);
        let events = decode_all(&drain(&mut tx));
        assert_eq!(
            events,
            vec![StreamEvent::Channel {
                channel: 7,
                value: 0x1FF
            }]
        );
    }

    #[test]
    fn test_items_delivered_in_order() {
        let mut tx = AirStream::new();
        tx.feed_output_channel(4, 100);
        tx.feed_output_cmd(AirCmd::RejectMode, &[3]);
        tx.feed_output_channel(5, 200);
        let events = decode_all(&drain(&mut tx));
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], StreamEvent::Channel { channel: 4, .. }));
        assert!(matches!(events[1], StreamEvent::Cmd { .. }));
        assert!(matches!(events[2], StreamEvent::Channel { channel: 5, .. }));
    }

    #[test]
    fn test_sentinel_bytes_in_payload_survive() {
        // 0x7E and 0x7D appear in the packed channel value
        let mut tx = AirStream::new();
        let value = 0x017E & 0x1FF;
        tx.feed_output_channel(0, value);
        let wire = drain(&mut tx);
        let events = decode_all(&wire);
        assert_eq!(
            events,
            vec![StreamEvent::Channel {
                channel: 0,
                value
            }]
        );
    }

    #[test]
    fn test_filler_sentinels_are_noops() {
        let mut rx = AirStream::new();
        let events = rx.feed_input(1, &[STREAM_START_STOP, STREAM_START_STOP], TimeMicros::ZERO);
        assert!(events.is_empty());
    }

    #[test]
    fn test_split_across_frames() {
        let mut tx = AirStream::new();
        tx.feed_output_telemetry(
            ITEM_TELEMETRY_DOWNLINK,
            TelemetryId::BatVoltage,
            &TelemetryValue::U16(1470),
        );
        let wire = drain(&mut tx);
        let mut rx = AirStream::new();
        let mut events = Vec::new();
        // Feed in 3-byte downlink chunks
        for chunk in wire.chunks(3) {
            events.extend(rx.feed_input(0, chunk, TimeMicros::ZERO));
        }
        events.extend(rx.feed_input(0, &[STREAM_START_STOP], TimeMicros::ZERO));
        assert_eq!(
            events,
            vec![StreamEvent::Telemetry {
                id: TelemetryId::BatVoltage,
                value: TelemetryValue::U16(1470)
            }]
        );
    }

    #[test]
    fn test_resync_after_lost_chunk() {
        let mut tx = AirStream::new();
        // This value byte-stuffs to 9 bytes plus the sentinel, crossing
        // four 3-byte downlink frames
        tx.feed_output_telemetry(
            ITEM_TELEMETRY_DOWNLINK,
            TelemetryId::GpsLat,
            &TelemetryValue::I32(0x7E7D_007E),
        );
        tx.feed_output_telemetry(
            ITEM_TELEMETRY_DOWNLINK,
            TelemetryId::BatVoltage,
            &TelemetryValue::U16(1680),
        );
        let wire = drain(&mut tx);
        let chunks: Vec<&[u8]> = wire.chunks(3).collect();
        let mut rx = AirStream::new();
        let mut events = Vec::new();
        for (i, chunk) in chunks.iter().enumerate() {
            if i == 1 {
                continue; // lost frame
            }
            events.extend(rx.feed_input(0, chunk, TimeMicros::ZERO));
        }
        events.extend(rx.feed_input(0, &[STREAM_START_STOP], TimeMicros::ZERO));
        // First item truncated and dropped, second decodes cleanly
        assert_eq!(
            events,
            vec![StreamEvent::Telemetry {
                id: TelemetryId::BatVoltage,
                value: TelemetryValue::U16(1680)
            }]
        );
    }

    #[test]
    fn test_switch_mode_ack_fits_one_downlink_frame() {
        use crate::air::cmd::SwitchModeAck;
        use crate::air::mode::AirMode;
        use crate::constants::DOWNLINK_DATA_BYTES;

        let ack = SwitchModeAck {
            mode: AirMode::Mode4,
            at_tx_seq: 9,
        };
        let mut tx = AirStream::new();
        let n = tx.feed_output_cmd(AirCmd::SwitchModeAck, &ack.encode());
        assert!(n <= DOWNLINK_DATA_BYTES, "ACK item is {n} bytes");
    }

    #[test]
    fn test_reset_output() {
        let mut tx = AirStream::new();
        tx.feed_output_channel(4, 100);
        assert!(tx.output_count() > 0);
        tx.reset_output();
        assert_eq!(tx.output_count(), 0);
    }

    #[test]
    fn test_unsynced_bytes_discarded() {
        let mut rx = AirStream::new();
        // Mid-item garbage before any sentinel
        let events = rx.feed_input(0, &[0x01, 0x55, 0x66], TimeMicros::ZERO);
        assert!(events.is_empty());
        // A clean item afterwards decodes
        let mut tx = AirStream::new();
        tx.feed_output_channel(6, 42);
        let mut wire = drain(&mut tx);
        wire.push(STREAM_START_STOP);
        let events = rx.feed_input(0, &wire, TimeMicros::ZERO);
        assert_eq!(
            events,
            vec![StreamEvent::Channel {
                channel: 6,
                value: 42
            }]
        );
    }
}
