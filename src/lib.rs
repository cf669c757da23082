//! # rclink-rs - A Rust Crate for Long-Range RC Link Communication
//!
//! The rclink-rs crate implements the core of a bidirectional, half-duplex
//! RC (remote control) link built on top of semtech-style sub-GHz
//! LoRa/FSK transceivers. A transmitter encodes control channels into
//! short fixed-size frames and drives the transceiver through a
//! frequency-hopping, mode-adaptive protocol; a receiver recovers the
//! channels and answers each frame with telemetry.
//!
//! ## Features
//!
//! - Fixed-size uplink (8 B) and downlink (5 B) frame codecs with a
//!   pairing-keyed CRC-8/DVB-S2
//! - Key-derived 16-slot frequency-hopping table
//! - A byte-stuffed substream multiplexing channels, telemetry, commands,
//!   MSP and RMP over the 2–3 spare bytes of each frame
//! - Rendezvous binding on a fixed channel with capability exchange
//! - Dynamic mode negotiation across five FSK/LoRa modes driven by
//!   reported SNR
//! - Failsafe tracking with automatic fallback to the longest common mode
//! - RMP, an addressed and optionally signed datagram layer for settings
//!   and MSP tunneling
//! - An in-memory mock radio for tests and simulation
//!
//! ## Usage
//!
//! ```rust,no_run
//! use rclink_rs::air::{AirAddr, AirInfo, AirPairing};
//! use rclink_rs::link::{AirConfig, LinkEngine, TxEngine};
//! use rclink_rs::radio::SharedMedium;
//! use rclink_rs::rc::RcData;
//! use rclink_rs::util::TimeMicros;
//! use rclink_rs::air::{AirBand, AirBandMask, SupportedModes};
//!
//! let medium = SharedMedium::new();
//! let config = AirConfig {
//!     band: AirBand::Band868,
//!     bands: AirBandMask::BAND_868,
//!     modes: SupportedModes::Modes1To5,
//! };
//! let mut data = RcData::new();
//! let mut tx = TxEngine::new(medium.radio(), config, AirAddr::generate());
//! tx.bind(
//!     AirPairing::new(AirAddr([1, 2, 3, 4, 5, 6]), 0xDEAD_BEEF),
//!     AirInfo::default(),
//! );
//! tx.open(&mut data, TimeMicros::ZERO).unwrap();
//! loop {
//!     // feed channels, then:
//!     tx.update(&mut data, TimeMicros(0 /* current micros */));
//! }
//! ```

pub mod air;
pub mod constants;
pub mod error;
pub mod link;
pub mod logging;
pub mod radio;
pub mod rc;
pub mod rmp;
pub mod store;
pub mod util;

pub use crate::error::{FrameError, RcLinkError};
pub use crate::logging::{init_logger, log_info};

// Core protocol types
pub use air::{
    generate_key, AirAddr, AirBand, AirBandMask, AirInfo, AirKey, AirMode, AirModeMask,
    AirPairing, AirRole, BindPacket, Capabilities, RxPacket, SupportedModes, TxPacket,
};
pub use link::{AirConfig, LinkEngine, RxBinder, RxEngine, TxBinder, TxEngine};
pub use radio::{LinkSignal, MockRadio, Radio, SharedMedium};
pub use rc::{FakeChannelSource, RcData, TelemetryId, TelemetryValue};
pub use rmp::{Rmp, RmpMsg};
pub use store::{MemoryPairingStore, PairingStore, PeerEntry};
pub use util::TimeMicros;
