//! # Canonical Mode Parameters
//!
//! The modulation tuple, cycle time and failsafe interval for each air
//! mode, plus the SNR heuristics that drive dynamic mode switching.
//!
//! | Mode | Modulation        | Cycle   | Failsafe |
//! |------|-------------------|---------|----------|
//! | 1    | FSK 200 kbps      | 6.7 ms  | 250 ms   |
//! | 2    | LoRa SF7  BW500   | 20 ms   | 300 ms   |
//! | 3    | LoRa SF8  BW500   | 33 ms   | 400 ms   |
//! | 4    | LoRa SF9  BW500   | 66 ms   | 500 ms   |
//! | 5    | LoRa SF10 BW500   | 115 ms  | 700 ms   |

use crate::air::mode::AirMode;
use crate::rc::telemetry::TELEMETRY_SNR_MULTIPLIER;
use crate::util::time::millis_to_micros;

/// LoRa coding rate selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodingRate {
    Cr4_5,
    Cr4_6,
    Cr4_7,
    Cr4_8,
}

/// Modulation parameters applied by [`Radio::set_mode`](crate::radio::Radio::set_mode).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modulation {
    Fsk {
        /// Data rate in bits per second.
        bitrate: u32,
        /// Frequency deviation in Hz.
        fdev: u32,
        /// Receiver bandwidth in Hz.
        rx_bandwidth: u32,
        preamble_len: u16,
    },
    LoRa {
        spreading_factor: u8,
        /// Signal bandwidth in kHz.
        bandwidth_khz: u32,
        coding_rate: CodingRate,
        preamble_len: u16,
    },
}

/// The modulation tuple for a mode.
pub fn modulation(mode: AirMode) -> Modulation {
    match mode {
        // FDEV + BR/2 must stay within the receiver bandwidth and
        // 0.5 <= 2*FDEV/BR <= 10 must hold for the FSK demodulator
        AirMode::Mode1 => Modulation::Fsk {
            bitrate: 200_000,
            fdev: 125_000,
            rx_bandwidth: 250_000,
            preamble_len: 5,
        },
        AirMode::Mode2 => Modulation::LoRa {
            spreading_factor: 7,
            bandwidth_khz: 500,
            coding_rate: CodingRate::Cr4_6,
            preamble_len: 6,
        },
        AirMode::Mode3 => Modulation::LoRa {
            spreading_factor: 8,
            bandwidth_khz: 500,
            coding_rate: CodingRate::Cr4_6,
            preamble_len: 6,
        },
        AirMode::Mode4 => Modulation::LoRa {
            spreading_factor: 9,
            bandwidth_khz: 500,
            coding_rate: CodingRate::Cr4_6,
            preamble_len: 6,
        },
        AirMode::Mode5 => Modulation::LoRa {
            spreading_factor: 10,
            bandwidth_khz: 500,
            coding_rate: CodingRate::Cr4_8,
            preamble_len: 6,
        },
    }
}

/// Length of one uplink-then-downlink cycle in microseconds.
pub fn cycle_time(mode: AirMode) -> u64 {
    match mode {
        AirMode::Mode1 => 6_666,
        AirMode::Mode2 => millis_to_micros(20),
        AirMode::Mode3 => millis_to_micros(33),
        AirMode::Mode4 => millis_to_micros(66),
        AirMode::Mode5 => millis_to_micros(115),
    }
}

/// Whether the cycle for `seq` carries a downlink stage.
///
/// Always true today; both engines assume every cycle is answered.
// TODO: mode 1 could skip the downlink on most cycles to push the update
// rate further; needs ack scheduling support in both engines first.
pub fn cycle_is_full(_mode: AirMode, _seq: u8) -> bool {
    true
}

/// Time without a valid uplink before the RX declares failsafe.
pub fn rx_failsafe_interval(mode: AirMode) -> u64 {
    match mode {
        AirMode::Mode1 => millis_to_micros(250),
        AirMode::Mode2 => millis_to_micros(300),
        AirMode::Mode3 => millis_to_micros(400),
        AirMode::Mode4 => millis_to_micros(500),
        AirMode::Mode5 => millis_to_micros(700),
    }
}

/// Time without a valid downlink before the TX declares failsafe.
pub fn tx_failsafe_interval(mode: AirMode) -> u64 {
    rx_failsafe_interval(mode)
}

/// Consecutive positive SNR observations required before a mode switch is
/// proposed: 4 per mode of distance from the longest, capped at 15.
pub fn confirmations_for_switch(current: AirMode) -> u8 {
    (4 * (AirMode::LONGEST as u8 + 1 - current as u8)).min(15)
}

/// Whether the reported SNR (0.25 dB units) asks for a longer-range mode.
///
/// FSK needs 5 dB to stay reliable; the LoRa modes hold until 1.5 dB.
pub fn should_switch_to_longer(current: AirMode, snr: i8) -> bool {
    let threshold = if current == AirMode::Mode1 {
        5 * TELEMETRY_SNR_MULTIPLIER
    } else {
        (1.5 * TELEMETRY_SNR_MULTIPLIER as f32) as i32
    };
    (snr as i32) <= threshold
}

/// Whether the reported SNR (0.25 dB units) allows a faster mode: 4 dB of
/// margin per mode step.
pub fn should_switch_to_faster(current: AirMode, faster: AirMode, snr: i8) -> bool {
    let steps = current as i32 - faster as i32;
    (snr as i32) >= 4 * steps * TELEMETRY_SNR_MULTIPLIER
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_times_grow_with_mode() {
        let mut prev = 0;
        for mode in [
            AirMode::Mode1,
            AirMode::Mode2,
            AirMode::Mode3,
            AirMode::Mode4,
            AirMode::Mode5,
        ] {
            let cycle = cycle_time(mode);
            assert!(cycle > prev);
            prev = cycle;
        }
    }

    #[test]
    fn test_confirmations() {
        assert_eq!(confirmations_for_switch(AirMode::Mode5), 4);
        assert_eq!(confirmations_for_switch(AirMode::Mode4), 8);
        assert_eq!(confirmations_for_switch(AirMode::Mode3), 12);
        assert_eq!(confirmations_for_switch(AirMode::Mode2), 15);
        assert_eq!(confirmations_for_switch(AirMode::Mode1), 15);
    }

    #[test]
    fn test_longer_thresholds() {
        // 5 dB in FSK
        assert!(should_switch_to_longer(AirMode::Mode1, 20));
        assert!(!should_switch_to_longer(AirMode::Mode1, 21));
        // 1.5 dB in LoRa
        assert!(should_switch_to_longer(AirMode::Mode3, 6));
        assert!(!should_switch_to_longer(AirMode::Mode3, 7));
    }

    #[test]
    fn test_faster_needs_margin_per_step() {
        // One step: 4 dB = 16 quarter-dB
        assert!(should_switch_to_faster(AirMode::Mode3, AirMode::Mode2, 16));
        assert!(!should_switch_to_faster(AirMode::Mode3, AirMode::Mode2, 15));
        // Two steps: 8 dB
        assert!(should_switch_to_faster(AirMode::Mode3, AirMode::Mode1, 32));
        assert!(!should_switch_to_faster(AirMode::Mode3, AirMode::Mode1, 31));
    }

    #[test]
    fn test_every_cycle_is_full() {
        for seq in 0..16 {
            assert!(cycle_is_full(AirMode::Mode1, seq));
            assert!(cycle_is_full(AirMode::Mode5, seq));
        }
    }
}
