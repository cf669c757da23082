//! # Link Error Handling
//!
//! This module defines the RcLinkError enum, which represents the different
//! error types that can occur in the rclink-rs crate.
//!
//! Per the link design, only `open()` and configuration-level operations
//! fail with an error. The engines never propagate errors from their update
//! loops: transient decode failures drop the frame, extended loss surfaces
//! as a failsafe flag.

use thiserror::Error;

/// Represents the different error types that can occur in the link crate.
#[derive(Debug, Error)]
pub enum RcLinkError {
    /// The engine has no pairing; bind first.
    #[error("engine is not bound to a peer")]
    NotBound,

    /// The local and peer supported-mode sets do not intersect.
    #[error("no common air modes with peer")]
    NoCommonModes,

    /// The band mask enables no bands.
    #[error("no air bands enabled")]
    NoBands,

    /// A wire frame failed to decode.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// All RMP port slots are in use.
    #[error("all RMP ports are in use")]
    PortsExhausted,

    /// The requested RMP port number is already open.
    #[error("RMP port 0x{0:02X} is already open")]
    PortInUse(u8),

    /// Invalid address string (expected `aa:bb:cc:dd:ee:ff`).
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

/// Errors produced by the fixed-size frame codecs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Buffer length does not match the wire size of the frame.
    #[error("invalid frame size: expected {expected}, got {got}")]
    InvalidSize { expected: usize, got: usize },

    /// The (possibly keyed) CRC did not match.
    #[error("invalid CRC")]
    InvalidCrc,

    /// Bind packet does not carry the protocol prefix.
    #[error("invalid protocol prefix")]
    InvalidPrefix,

    /// Bind packet advertises a protocol version newer than ours.
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    /// Bind packet carries an unknown role byte.
    #[error("invalid role: 0x{0:02X}")]
    InvalidRole(u8),
}
