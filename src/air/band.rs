//! Operating bands.
//!
//! The link runs centered on one of a fixed set of sub-GHz band centers.
//! The hop table spreads around the center; binding always happens at the
//! exact center frequency.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// A supported sub-GHz band, identified by its center frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum AirBand {
    Band147 = 1,
    Band169 = 2,
    Band315 = 3,
    Band433 = 4,
    Band470 = 5,
    Band868 = 6,
    Band915 = 7,
}

impl AirBand {
    pub const ALL: [AirBand; 7] = [
        AirBand::Band147,
        AirBand::Band169,
        AirBand::Band315,
        AirBand::Band433,
        AirBand::Band470,
        AirBand::Band868,
        AirBand::Band915,
    ];

    /// Band center frequency in Hz.
    pub fn frequency(self) -> u64 {
        const MHZ: u64 = 1_000_000;
        match self {
            AirBand::Band147 => 147 * MHZ,
            AirBand::Band169 => 169 * MHZ,
            AirBand::Band315 => 315 * MHZ,
            AirBand::Band433 => 433 * MHZ,
            AirBand::Band470 => 470 * MHZ,
            AirBand::Band868 => 868 * MHZ,
            AirBand::Band915 => 915 * MHZ,
        }
    }

    pub fn from_u8(value: u8) -> Option<AirBand> {
        AirBand::ALL.iter().copied().find(|b| *b as u8 == value)
    }

    fn bit(self) -> AirBandMask {
        AirBandMask::from_bits_truncate(1 << (self as u8))
    }
}

bitflags! {
    /// Set of locally enabled bands. The RX cycles through these while
    /// scanning for a binding TX. Serde impls come from the bitflags
    /// `serde` feature.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AirBandMask: u16 {
        const BAND_147 = 1 << 1;
        const BAND_169 = 1 << 2;
        const BAND_315 = 1 << 3;
        const BAND_433 = 1 << 4;
        const BAND_470 = 1 << 5;
        const BAND_868 = 1 << 6;
        const BAND_915 = 1 << 7;
    }
}

impl AirBandMask {
    /// The `index`-th enabled band, counting from the lowest frequency.
    pub fn band_at(self, index: usize) -> Option<AirBand> {
        AirBand::ALL
            .iter()
            .copied()
            .filter(|b| self.contains(b.bit()))
            .nth(index)
    }
}

impl From<AirBand> for AirBandMask {
    fn from(band: AirBand) -> Self {
        band.bit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_band_frequencies() {
        assert_eq!(AirBand::Band868.frequency(), 868_000_000);
        assert_eq!(AirBand::Band433.frequency(), 433_000_000);
    }

    #[test]
    fn test_mask_indexing() {
        let mask = AirBandMask::BAND_433 | AirBandMask::BAND_868;
        assert_eq!(mask.band_at(0), Some(AirBand::Band433));
        assert_eq!(mask.band_at(1), Some(AirBand::Band868));
        assert_eq!(mask.band_at(2), None);
    }

    #[test]
    fn test_from_u8() {
        assert_eq!(AirBand::from_u8(6), Some(AirBand::Band868));
        assert_eq!(AirBand::from_u8(0), None);
        assert_eq!(AirBand::from_u8(8), None);
    }
}
