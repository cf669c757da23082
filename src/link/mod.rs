//! # Link Engines
//!
//! The four cooperative state machines of the protocol: the TX engine
//! (uplink initiator), the RX engine (downlink responder) and the two
//! binders. Each engine owns its radio and is driven by `update()` calls
//! from a single control loop; no engine ever blocks.

pub mod bind_rx;
pub mod bind_tx;
pub mod rx;
pub mod tx;

use crate::air::band::{AirBand, AirBandMask};
use crate::air::mode::SupportedModes;
use crate::error::RcLinkError;
use crate::rc::data::RcData;
use crate::util::time::TimeMicros;

pub use bind_rx::RxBinder;
pub use bind_tx::TxBinder;
pub use rx::RxEngine;
pub use tx::TxEngine;

/// Static air configuration of a node, injected into every engine.
#[derive(Debug, Clone, Copy)]
pub struct AirConfig {
    /// Operating band (for an RX: the band learned during bind).
    pub band: AirBand,
    /// Bands this hardware can use; the RX binder scans these.
    pub bands: AirBandMask,
    /// Mode policy of this node.
    pub modes: SupportedModes,
}

/// Common engine lifecycle. `open` is the only fallible operation; the
/// update loop surfaces liveness through failsafe flags instead of errors.
pub trait LinkEngine {
    /// Validates configuration and brings the radio up.
    fn open(&mut self, data: &mut RcData, now: TimeMicros) -> Result<(), RcLinkError>;

    /// Runs one tick; returns true when `data` received new values.
    fn update(&mut self, data: &mut RcData, now: TimeMicros) -> bool;

    /// Tears the engine down and puts the radio to sleep.
    fn close(&mut self);
}
