//! # Radio Abstraction
//!
//! The [`Radio`] trait drives an FSK/LoRa half-duplex transceiver. The
//! engines own exactly one radio each and poll the completion flags on
//! every tick; completions originate in the driver's interrupt handling
//! and surface here as plain booleans.
//!
//! Hardware I/O failures are considered fatal inside implementations (a
//! broken SPI bus is not recoverable from the protocol layer); a corrupted
//! received packet simply yields bytes that fail CRC validation upstream.

pub mod mock;
pub mod params;

use crate::air::mode::AirMode;

pub use mock::{MockRadio, SharedMedium};
pub use params::{CodingRate, Modulation};

/// Signal readings taken after a successful receive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkSignal {
    /// RSSI in dBm.
    pub rssi: i16,
    /// SNR in 0.25 dB units.
    pub snr: i8,
    /// Link quality 0..=100.
    pub lq: u8,
}

/// A half-duplex FSK/LoRa transceiver.
pub trait Radio {
    /// Brings the hardware up. Called once before any other operation.
    fn init(&mut self);

    /// Enters the lowest-power state. Also used as a FIFO reset before
    /// transmissions on some hardware.
    fn sleep(&mut self);

    /// Powers the transceiver down for good.
    fn shutdown(&mut self);

    /// Runs image/RSSI calibration for the given center frequency.
    fn calibrate(&mut self, center_freq: u64);

    /// Applies the modulation tuple of the given mode.
    fn set_mode(&mut self, mode: AirMode);

    /// Configures the bind channel: mode-2 parameters, the fixed bind
    /// sync word, bind-packet payload size and low TX power.
    fn set_bind_mode(&mut self);

    /// Tunes to `freq − error_hint` Hz. Blocks briefly for PLL lock.
    fn set_frequency(&mut self, freq: u64, error_hint: i32);

    fn set_sync_word(&mut self, word: u8);

    fn set_tx_power(&mut self, dbm: i8);

    /// Fixed payload size for subsequent transfers (implicit headers).
    fn set_payload_size(&mut self, size: usize);

    /// Enters continuous receive.
    fn start_rx(&mut self);

    /// Transmits `buf`. Completion is reported through [`Radio::is_tx_done`].
    fn send(&mut self, buf: &[u8]);

    /// Drains the most recent packet into `buf`, returning its length.
    fn read(&mut self, buf: &mut [u8]) -> usize;

    fn is_tx_done(&mut self) -> bool;

    fn is_rx_done(&mut self) -> bool;

    /// True while a frame is currently being received; lets the caller
    /// extend its deadline instead of hopping away mid-frame.
    fn is_rx_in_progress(&mut self) -> bool;

    /// Signal readings for the last received packet.
    fn link_signal(&mut self) -> LinkSignal;

    /// Frequency offset measured on the last received packet, in Hz.
    fn frequency_error(&mut self) -> i32;
}
