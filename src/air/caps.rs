//! Node capabilities and the per-peer info block.
//!
//! Exchanged inside the bind packet and persisted next to the pairing so
//! each side knows what the other end supports without re-binding.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::air::mode::SupportedModes;

bitflags! {
    /// Hardware and band capabilities advertised by a node. Serde impls
    /// come from the bitflags `serde` feature.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct Capabilities: u32 {
        const FREQUENCY_433MHZ = 1 << 0;
        const FREQUENCY_868MHZ = 1 << 1;
        const FREQUENCY_915MHZ = 1 << 2;

        /// 2.4 GHz peer-to-peer sidechannel, unrestricted.
        const P2P_2_4GHZ = 1 << 9;
        /// 2.4 GHz sidechannel restricted to valid raw WiFi packets.
        const P2P_2_4GHZ_WIFI = 1 << 10;

        /// Node has an on-board battery.
        const BATTERY = 1 << 24;
        /// Node has a screen.
        const SCREEN = 1 << 25;
        /// Node has buttons (might be a single button).
        const BUTTON = 1 << 26;
        /// Node has antenna diversity for the air protocol.
        const ANTENNA_DIVERSITY = 1 << 27;
        /// Node has at least two transceivers for the air protocol.
        const TRUE_DIVERSITY = 1 << 28;
    }
}

impl Capabilities {
    /// Nodes without screen and button cannot ask the user anything, so
    /// they accept bind requests automatically.
    pub fn needs_bind_confirmation(self) -> bool {
        self.intersects(Capabilities::SCREEN | Capabilities::BUTTON)
    }
}

/// Peer info carried in the bind packet and persisted per pairing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AirInfo {
    pub capabilities: Capabilities,
    /// Maximum TX power for the air protocol, in dBm.
    pub max_tx_power: u8,
    /// Number of control channels the node supports.
    pub channels: u8,
    /// Raw [`SupportedModes`] discriminant.
    pub modes: u8,
}

impl AirInfo {
    pub const WIRE_SIZE: usize = 7;

    pub fn new(capabilities: Capabilities, max_tx_power: u8, channels: u8, modes: SupportedModes) -> Self {
        Self {
            capabilities,
            max_tx_power,
            channels,
            modes: modes as u8,
        }
    }

    /// The node's mode policy, if the advertised byte is known.
    pub fn supported_modes(&self) -> Option<SupportedModes> {
        SupportedModes::from_u8(self.modes)
    }

    pub fn write_to(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.capabilities.bits().to_le_bytes());
        buf[4] = self.max_tx_power;
        buf[5] = self.channels;
        buf[6] = self.modes;
    }

    pub fn parse(buf: &[u8]) -> AirInfo {
        AirInfo {
            capabilities: Capabilities::from_bits_truncate(u32::from_le_bytes([
                buf[0], buf[1], buf[2], buf[3],
            ])),
            max_tx_power: buf[4],
            channels: buf[5],
            modes: buf[6],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_round_trip() {
        let info = AirInfo::new(
            Capabilities::FREQUENCY_868MHZ | Capabilities::SCREEN,
            20,
            16,
            SupportedModes::Modes2To5,
        );
        let mut buf = [0u8; AirInfo::WIRE_SIZE];
        info.write_to(&mut buf);
        assert_eq!(AirInfo::parse(&buf), info);
    }

    #[test]
    fn test_bind_confirmation_policy() {
        assert!(Capabilities::SCREEN.needs_bind_confirmation());
        assert!(Capabilities::BUTTON.needs_bind_confirmation());
        assert!(!Capabilities::BATTERY.needs_bind_confirmation());
        assert!(!Capabilities::empty().needs_bind_confirmation());
    }

    #[test]
    fn test_supported_modes_parse() {
        let info = AirInfo::new(Capabilities::empty(), 17, 8, SupportedModes::Fixed4);
        assert_eq!(info.supported_modes(), Some(SupportedModes::Fixed4));
        let bad = AirInfo {
            modes: 99,
            ..Default::default()
        };
        assert_eq!(bad.supported_modes(), None);
    }
}
