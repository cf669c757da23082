//! # Protocol Constants
//!
//! Wire-level constants of the air protocol. Frame layouts are defined next
//! to their codecs in `air::frame` and `air::bind`; this module holds the
//! values shared between components.

/// ASCII tag carried at the start of every bind packet.
pub const PROTOCOL_PREFIX: [u8; 3] = *b"RCL";

/// Highest protocol version this implementation speaks. A TX must accept
/// all past versions.
pub const PROTOCOL_VERSION: u8 = 1;

/// Length of a node address in bytes.
pub const ADDR_LENGTH: usize = 6;

/// Maximum length of a human-readable node name (excluding the NUL pad).
pub const MAX_NAME_LENGTH: usize = 32;

/// Largest frame used anywhere in the protocol: the bind packet.
pub const MAX_PACKET_SIZE: usize = 64;

/// Bits in a frame sequence number.
pub const SEQ_BITS: u32 = 4;

/// Number of distinct sequence values; also the hopping-table size.
pub const SEQ_COUNT: u8 = 1 << SEQ_BITS;

/// Number of entries in the frequency-hopping table. Loss recovery in the
/// RX engine relies on this being equal to the sequence count.
pub const NUM_HOPPING_FREQS: usize = SEQ_COUNT as usize;

/// Bits per control channel value on the wire.
pub const CHANNEL_BITS: u32 = 9;

/// Substream payload bytes per uplink frame.
pub const UPLINK_DATA_BYTES: usize = 2;

/// Substream payload bytes per downlink frame.
pub const DOWNLINK_DATA_BYTES: usize = 3;

/// Substream item delimiter.
pub const STREAM_START_STOP: u8 = 0x7E;

/// Substream escape byte; the byte after it is XORed with [`STREAM_XOR`].
pub const STREAM_ESCAPE: u8 = 0x7D;

/// XOR mask applied to escaped substream bytes.
pub const STREAM_XOR: u8 = 0x20;

/// Interval between bind packet transmissions on the TX side.
pub const BIND_PACKET_INTERVAL_MS: u64 = 500;

/// How long a received bind packet stays valid.
pub const BIND_PACKET_EXPIRATION_MS: u64 = 2000;

/// Fixed, well-known sync word used on the bind channel. Paired traffic
/// derives its sync word from the pairing key and never uses this value.
pub const BIND_SYNC_WORD: u8 = 0x12;

/// The sequence number at which the last byte of an item queued now will be
/// transmitted, given `count` bytes already queued and `per_packet` data
/// bytes per frame. Used to schedule acknowledgment tracking.
pub const fn seq_to_send(seq: u8, count: usize, per_packet: usize) -> u8 {
    (seq as usize + (count + per_packet - 1) / per_packet) as u8 % SEQ_COUNT
}

/// [`seq_to_send`] for the 2-byte uplink data area.
pub const fn seq_to_send_uplink(seq: u8, count: usize) -> u8 {
    seq_to_send(seq, count, UPLINK_DATA_BYTES)
}

/// [`seq_to_send`] for the 3-byte downlink data area.
pub const fn seq_to_send_downlink(seq: u8, count: usize) -> u8 {
    seq_to_send(seq, count, DOWNLINK_DATA_BYTES)
}
