//! Substream command opcodes.
//!
//! Commands ride the byte-stuffed substream next to channel and telemetry
//! items. Mode switches are the critical ones: they are scheduled by
//! sequence number so both ends retune on exactly the same logical frame.

use crate::air::mode::AirMode;

/// Command opcodes carried in substream command items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AirCmd {
    /// TX → RX: request switching to the given mode.
    SwitchMode1 = 0x01,
    SwitchMode2 = 0x02,
    SwitchMode3 = 0x03,
    SwitchMode4 = 0x04,
    SwitchMode5 = 0x05,
    /// RX → TX: confirm a switch, carrying the mode and the uplink
    /// sequence at which it applies.
    SwitchModeAck = 0x06,
    /// RX → TX: the proposed mode is not supported; payload is the
    /// offending mode byte.
    RejectMode = 0x07,
    /// Tunneled MSP chunk.
    Msp = 0x08,
    /// Tunneled reliable-messaging datagram.
    Rmp = 0x09,
}

impl AirCmd {
    pub fn from_u8(value: u8) -> Option<AirCmd> {
        match value {
            0x01 => Some(AirCmd::SwitchMode1),
            0x02 => Some(AirCmd::SwitchMode2),
            0x03 => Some(AirCmd::SwitchMode3),
            0x04 => Some(AirCmd::SwitchMode4),
            0x05 => Some(AirCmd::SwitchMode5),
            0x06 => Some(AirCmd::SwitchModeAck),
            0x07 => Some(AirCmd::RejectMode),
            0x08 => Some(AirCmd::Msp),
            0x09 => Some(AirCmd::Rmp),
            _ => None,
        }
    }

    /// The switch request opcode for a mode.
    pub fn switch_mode(mode: AirMode) -> AirCmd {
        match mode {
            AirMode::Mode1 => AirCmd::SwitchMode1,
            AirMode::Mode2 => AirCmd::SwitchMode2,
            AirMode::Mode3 => AirCmd::SwitchMode3,
            AirMode::Mode4 => AirCmd::SwitchMode4,
            AirMode::Mode5 => AirCmd::SwitchMode5,
        }
    }

    /// The mode a switch request opcode asks for, if it is one.
    pub fn requested_mode(self) -> Option<AirMode> {
        match self {
            AirCmd::SwitchMode1 => Some(AirMode::Mode1),
            AirCmd::SwitchMode2 => Some(AirMode::Mode2),
            AirCmd::SwitchMode3 => Some(AirMode::Mode3),
            AirCmd::SwitchMode4 => Some(AirMode::Mode4),
            AirCmd::SwitchMode5 => Some(AirMode::Mode5),
            _ => None,
        }
    }
}

/// Payload of [`AirCmd::SwitchModeAck`]: the agreed mode and the uplink
/// sequence number at which both sides apply it.
///
/// Packed into a single byte (mode in the high nibble, sequence in the
/// low nibble) so the whole ACK item always fits in one downlink frame.
/// The RX relies on that: it flushes its output buffer and re-feeds the
/// ACK on every response until the switch applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchModeAck {
    pub mode: AirMode,
    pub at_tx_seq: u8,
}

impl SwitchModeAck {
    pub const WIRE_SIZE: usize = 1;

    /// True when the agreed-upon sequence has arrived and the switch must
    /// be applied before handling this frame.
    pub fn proceed(&self, seq: u8) -> bool {
        self.at_tx_seq == seq
    }

    pub fn encode(&self) -> [u8; Self::WIRE_SIZE] {
        [((self.mode as u8) << 4) | (self.at_tx_seq & 0x0F)]
    }

    pub fn decode(buf: &[u8]) -> Option<SwitchModeAck> {
        if buf.len() != Self::WIRE_SIZE {
            return None;
        }
        Some(SwitchModeAck {
            mode: AirMode::from_u8(buf[0] >> 4)?,
            at_tx_seq: buf[0] & 0x0F,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_switch_mode_mapping() {
        for mode in [
            AirMode::Mode1,
            AirMode::Mode2,
            AirMode::Mode3,
            AirMode::Mode4,
            AirMode::Mode5,
        ] {
            assert_eq!(AirCmd::switch_mode(mode).requested_mode(), Some(mode));
        }
        assert_eq!(AirCmd::Msp.requested_mode(), None);
    }

    #[test]
    fn test_ack_round_trip() {
        for mode in 1..=5u8 {
            for seq in 0..16u8 {
                let ack = SwitchModeAck {
                    mode: AirMode::from_u8(mode).unwrap(),
                    at_tx_seq: seq,
                };
                assert_eq!(SwitchModeAck::decode(&ack.encode()), Some(ack));
            }
        }
        let ack = SwitchModeAck {
            mode: AirMode::Mode3,
            at_tx_seq: 12,
        };
        assert!(ack.proceed(12));
        assert!(!ack.proceed(13));
    }

    #[test]
    fn test_ack_rejects_garbage() {
        // Invalid mode nibble
        assert_eq!(SwitchModeAck::decode(&[0x04]), None);
        assert_eq!(SwitchModeAck::decode(&[0x64]), None);
        // Wrong size
        assert_eq!(SwitchModeAck::decode(&[0x34, 0x01]), None);
        assert_eq!(SwitchModeAck::decode(&[]), None);
    }

    #[test]
    fn test_ack_never_needs_stuffing() {
        // The packed byte's high nibble is the mode (1..=5), so it can
        // never collide with the substream sentinel or escape bytes
        for mode in 1..=5u8 {
            for seq in 0..16u8 {
                let byte = SwitchModeAck {
                    mode: AirMode::from_u8(mode).unwrap(),
                    at_tx_seq: seq,
                }
                .encode()[0];
                assert_ne!(byte, 0x7E);
                assert_ne!(byte, 0x7D);
            }
        }
    }
}
