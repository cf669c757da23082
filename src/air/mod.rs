//! # Air Protocol Layer
//!
//! Everything that defines the protocol on the wire: addresses and
//! pairings, bands and modes, the frame and bind-packet codecs, the
//! key-derived frequency-hopping table, the byte-stuffed substream and the
//! per-pairing link state.

pub mod addr;
pub mod band;
pub mod bind;
pub mod caps;
pub mod cmd;
pub mod frame;
pub mod freq;
pub mod io;
pub mod mode;
pub mod stream;

pub use addr::{generate_key, AirAddr, AirKey, AirPairing};
pub use band::{AirBand, AirBandMask};
pub use bind::{AirRole, BindPacket};
pub use caps::{AirInfo, Capabilities};
pub use cmd::{AirCmd, SwitchModeAck};
pub use frame::{sync_word, RxPacket, TxPacket};
pub use freq::FreqTable;
pub use io::AirIo;
pub use mode::{AirMode, AirModeMask, SupportedModes};
pub use stream::{AirStream, StreamEvent};
