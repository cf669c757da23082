//! # Air Frame Codecs
//!
//! Wire codecs for the two steady-state link frames. Both are fixed size
//! and carry a CRC-8/DVB-S2 keyed with the pairing key, so frames from a
//! foreign pairing fail validation instead of being misaccepted.
//!
//! ## Uplink frame (8 bytes)
//!
//! ```text
//! ┌─────────┬──────────────────────────┬───────────┬───────┐
//! │ seq     │ channels 0..3            │ data      │ crc   │
//! │ 4 bits  │ 4 × 9 bits               │ 2 bytes   │ 1 B   │
//! └─────────┴──────────────────────────┴───────────┴───────┘
//! ```
//!
//! The 40 header bits are packed least-significant-bit first into the
//! first five bytes.
//!
//! ## Downlink frame (5 bytes)
//!
//! ```text
//! ┌────────┬─────────┬───────────┬───────┐
//! │ seq    │ tx_seq  │ data      │ crc   │
//! │ 4 bits │ 4 bits  │ 3 bytes   │ 1 B   │
//! └────────┴─────────┴───────────┴───────┘
//! ```
//!
//! `tx_seq` echoes the last accepted uplink sequence so the TX can mark
//! substream items carried in that frame as acknowledged.

use crate::air::addr::AirKey;
use crate::constants::{
    BIND_SYNC_WORD, CHANNEL_BITS, DOWNLINK_DATA_BYTES, SEQ_COUNT, UPLINK_DATA_BYTES,
};
use crate::error::FrameError;
use crate::util::crc::{crc8_dvb_s2, crc8_dvb_s2_keyed};

const SEQ_MASK: u8 = SEQ_COUNT - 1;
const CHANNEL_MASK: u64 = (1 << CHANNEL_BITS) - 1;

/// Uplink (TX → RX) control frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxPacket {
    /// 4-bit sequence number; also selects the hop slot.
    pub seq: u8,
    /// The first four control channels, 9 bits each.
    pub channels: [u16; 4],
    /// Substream payload.
    pub data: [u8; UPLINK_DATA_BYTES],
}

impl TxPacket {
    pub const SIZE: usize = 8;

    /// Serializes the frame and writes the keyed CRC.
    pub fn encode(&self, key: AirKey) -> [u8; Self::SIZE] {
        let mut bits: u64 = (self.seq & SEQ_MASK) as u64;
        for (i, &ch) in self.channels.iter().enumerate() {
            bits |= (ch as u64 & CHANNEL_MASK) << (4 + i as u64 * CHANNEL_BITS as u64);
        }
        let mut buf = [0u8; Self::SIZE];
        buf[0..5].copy_from_slice(&bits.to_le_bytes()[0..5]);
        buf[5] = self.data[0];
        buf[6] = self.data[1];
        buf[7] = crc8_dvb_s2_keyed(key, &buf[0..7]);
        buf
    }

    /// Parses and validates a received frame.
    pub fn decode(buf: &[u8], key: AirKey) -> Result<TxPacket, FrameError> {
        if buf.len() != Self::SIZE {
            return Err(FrameError::InvalidSize {
                expected: Self::SIZE,
                got: buf.len(),
            });
        }
        if crc8_dvb_s2_keyed(key, &buf[0..7]) != buf[7] {
            return Err(FrameError::InvalidCrc);
        }
        let mut raw = [0u8; 8];
        raw[0..5].copy_from_slice(&buf[0..5]);
        let bits = u64::from_le_bytes(raw);
        let mut channels = [0u16; 4];
        for (i, ch) in channels.iter_mut().enumerate() {
            *ch = ((bits >> (4 + i as u64 * CHANNEL_BITS as u64)) & CHANNEL_MASK) as u16;
        }
        Ok(TxPacket {
            seq: (bits as u8) & SEQ_MASK,
            channels,
            data: [buf[5], buf[6]],
        })
    }
}

/// Downlink (RX → TX) response frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxPacket {
    /// 4-bit sequence number of the RX side.
    pub seq: u8,
    /// Echo of the uplink sequence this frame acknowledges.
    pub tx_seq: u8,
    /// Substream payload.
    pub data: [u8; DOWNLINK_DATA_BYTES],
}

impl RxPacket {
    pub const SIZE: usize = 5;

    /// Serializes the frame and writes the keyed CRC.
    pub fn encode(&self, key: AirKey) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = (self.seq & SEQ_MASK) | ((self.tx_seq & SEQ_MASK) << 4);
        buf[1..4].copy_from_slice(&self.data);
        buf[4] = crc8_dvb_s2_keyed(key, &buf[0..4]);
        buf
    }

    /// Parses and validates a received frame.
    pub fn decode(buf: &[u8], key: AirKey) -> Result<RxPacket, FrameError> {
        if buf.len() != Self::SIZE {
            return Err(FrameError::InvalidSize {
                expected: Self::SIZE,
                got: buf.len(),
            });
        }
        if crc8_dvb_s2_keyed(key, &buf[0..4]) != buf[4] {
            return Err(FrameError::InvalidCrc);
        }
        Ok(RxPacket {
            seq: buf[0] & SEQ_MASK,
            tx_seq: buf[0] >> 4,
            data: [buf[1], buf[2], buf[3]],
        })
    }
}

/// Derives the transceiver sync word for a pairing.
///
/// The sync word rejects foreign transmissions at the radio level before
/// any CRC check runs. It must never collide with the fixed bind-channel
/// sync word, so paired traffic cannot leak into a bind rendezvous.
pub fn sync_word(key: AirKey) -> u8 {
    let word = crc8_dvb_s2(0, &key.to_le_bytes());
    if word == BIND_SYNC_WORD {
        word ^ 0xFF
    } else {
        word
    }
}
