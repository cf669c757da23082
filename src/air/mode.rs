//! Air modes and mode masks.
//!
//! The link runs in one of five modes. Mode 1 is FSK at 200 kbps; modes
//! 2 through 5 are LoRa with growing spreading factor. A smaller mode
//! number means a shorter cycle and shorter range. Each side advertises a
//! [`SupportedModes`] setting during bind; the running link is restricted
//! to the intersection of both sides' packed masks, further reduced by any
//! modes the RX rejects during the session.

use serde::{Deserialize, Serialize};

/// One of the five link modes. Ordered: faster (shorter range) first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum AirMode {
    /// FSK 200 kbps, ~6.7 ms cycle.
    Mode1 = 1,
    /// LoRa SF7 BW500, 20 ms cycle.
    Mode2 = 2,
    /// LoRa SF8 BW500, 33 ms cycle.
    Mode3 = 3,
    /// LoRa SF9 BW500, 66 ms cycle.
    Mode4 = 4,
    /// LoRa SF10 BW500, 115 ms cycle.
    Mode5 = 5,
}

impl AirMode {
    pub const FASTEST: AirMode = AirMode::Mode1;
    pub const LONGEST: AirMode = AirMode::Mode5;
    pub const COUNT: usize = 5;

    pub fn from_u8(value: u8) -> Option<AirMode> {
        match value {
            1 => Some(AirMode::Mode1),
            2 => Some(AirMode::Mode2),
            3 => Some(AirMode::Mode3),
            4 => Some(AirMode::Mode4),
            5 => Some(AirMode::Mode5),
            _ => None,
        }
    }

    /// The next faster mode, ignoring support masks.
    fn step_faster(self) -> Option<AirMode> {
        AirMode::from_u8(self as u8 - 1)
    }

    /// The next longer-range mode, ignoring support masks.
    fn step_longer(self) -> Option<AirMode> {
        AirMode::from_u8(self as u8 + 1)
    }
}

/// Bitmask over [`AirMode`]s: mode `n` sets bit `n`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AirModeMask(pub u16);

impl AirModeMask {
    pub const EMPTY: AirModeMask = AirModeMask(0);

    pub fn contains(self, mode: AirMode) -> bool {
        self.0 & (1 << mode as u8) != 0
    }

    #[must_use]
    pub fn with(self, mode: AirMode) -> AirModeMask {
        AirModeMask(self.0 | (1 << mode as u8))
    }

    #[must_use]
    pub fn remove(self, mode: AirMode) -> AirModeMask {
        AirModeMask(self.0 & !(1 << mode as u8))
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Nearest supported mode faster than `mode`, if any.
    pub fn faster(self, mode: AirMode) -> Option<AirMode> {
        let mut cursor = mode;
        while let Some(faster) = cursor.step_faster() {
            if self.contains(faster) {
                return Some(faster);
            }
            cursor = faster;
        }
        None
    }

    /// Nearest supported mode longer than `mode`, if any.
    pub fn longer(self, mode: AirMode) -> Option<AirMode> {
        let mut cursor = mode;
        while let Some(longer) = cursor.step_longer() {
            if self.contains(longer) {
                return Some(longer);
            }
            cursor = longer;
        }
        None
    }

    /// Fastest supported mode.
    pub fn fastest(self) -> Option<AirMode> {
        [
            AirMode::Mode1,
            AirMode::Mode2,
            AirMode::Mode3,
            AirMode::Mode4,
            AirMode::Mode5,
        ]
        .into_iter()
        .find(|m| self.contains(*m))
    }

    /// Longest-range supported mode.
    pub fn longest(self) -> Option<AirMode> {
        [
            AirMode::Mode5,
            AirMode::Mode4,
            AirMode::Mode3,
            AirMode::Mode2,
            AirMode::Mode1,
        ]
        .into_iter()
        .find(|m| self.contains(*m))
    }
}

/// The configured mode policy of a node, advertised during bind.
///
/// The wire carries the raw discriminant in the bind packet's info block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum SupportedModes {
    Fixed1 = 1,
    Fixed2 = 2,
    Fixed3 = 3,
    Fixed4 = 4,
    Fixed5 = 5,
    Modes1To5 = 32,
    Modes2To5 = 33,
}

impl SupportedModes {
    pub fn from_u8(value: u8) -> Option<SupportedModes> {
        match value {
            1 => Some(SupportedModes::Fixed1),
            2 => Some(SupportedModes::Fixed2),
            3 => Some(SupportedModes::Fixed3),
            4 => Some(SupportedModes::Fixed4),
            5 => Some(SupportedModes::Fixed5),
            32 => Some(SupportedModes::Modes1To5),
            33 => Some(SupportedModes::Modes2To5),
            _ => None,
        }
    }

    /// Expands the policy into a mode mask.
    pub fn pack(self) -> AirModeMask {
        let mut mask = AirModeMask::EMPTY;
        match self {
            SupportedModes::Fixed1 => mask = mask.with(AirMode::Mode1),
            SupportedModes::Fixed2 => mask = mask.with(AirMode::Mode2),
            SupportedModes::Fixed3 => mask = mask.with(AirMode::Mode3),
            SupportedModes::Fixed4 => mask = mask.with(AirMode::Mode4),
            SupportedModes::Fixed5 => mask = mask.with(AirMode::Mode5),
            SupportedModes::Modes1To5 => {
                for m in [
                    AirMode::Mode1,
                    AirMode::Mode2,
                    AirMode::Mode3,
                    AirMode::Mode4,
                    AirMode::Mode5,
                ] {
                    mask = mask.with(m);
                }
            }
            SupportedModes::Modes2To5 => {
                for m in [
                    AirMode::Mode2,
                    AirMode::Mode3,
                    AirMode::Mode4,
                    AirMode::Mode5,
                ] {
                    mask = mask.with(m);
                }
            }
        }
        mask
    }

    /// Intersection of two policies; `None` when the sides share no mode.
    pub fn intersect(self, other: SupportedModes) -> Option<AirModeMask> {
        let mask = AirModeMask(self.pack().0 & other.pack().0);
        if mask.is_empty() {
            None
        } else {
            Some(mask)
        }
    }
}
