//! Node addresses and pairings.
//!
//! Every endpoint carries a stable 6-byte address generated once at first
//! boot. A pairing bonds two addresses through a 32-bit key chosen by the
//! TX during bind; the key drives the hopping table, the sync word and the
//! frame CRCs.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::constants::ADDR_LENGTH;
use crate::error::RcLinkError;

/// 32-bit pairing key.
pub type AirKey = u32;

/// A 6-byte endpoint address.
///
/// The all-zero address is invalid (unset), the all-0xFF address is the
/// broadcast address.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Zeroize,
)]
pub struct AirAddr(pub [u8; ADDR_LENGTH]);

impl AirAddr {
    pub const INVALID: AirAddr = AirAddr([0; ADDR_LENGTH]);
    pub const BROADCAST: AirAddr = AirAddr([0xFF; ADDR_LENGTH]);

    /// Generates a fresh random address. Called once at first boot; the
    /// result is persisted by the caller.
    pub fn generate() -> AirAddr {
        let mut addr = [0u8; ADDR_LENGTH];
        rand::thread_rng().fill(&mut addr[..]);
        AirAddr(addr)
    }

    fn is_byte(&self, b: u8) -> bool {
        self.0.iter().all(|&x| x == b)
    }

    /// True iff the address is not all zeros.
    pub fn is_valid(&self) -> bool {
        !self.is_byte(0)
    }

    pub fn is_broadcast(&self) -> bool {
        self.is_byte(0xFF)
    }
}

impl fmt::Display for AirAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|b| hex::encode([*b])).collect();
        write!(f, "{}", parts.join(":"))
    }
}

impl FromStr for AirAddr {
    type Err = RcLinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.replace(':', ""))
            .map_err(|_| RcLinkError::InvalidAddress(s.to_string()))?;
        if bytes.len() != ADDR_LENGTH {
            return Err(RcLinkError::InvalidAddress(s.to_string()));
        }
        let mut addr = [0u8; ADDR_LENGTH];
        addr.copy_from_slice(&bytes);
        Ok(AirAddr(addr))
    }
}

/// Generates a fresh random pairing key. Zero is reserved for "no key".
pub fn generate_key() -> AirKey {
    loop {
        let key: AirKey = rand::thread_rng().gen();
        if key != 0 {
            return key;
        }
    }
}

/// A persisted TX↔RX bond: the peer address and the shared key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Zeroize)]
pub struct AirPairing {
    pub addr: AirAddr,
    pub key: AirKey,
}

impl AirPairing {
    pub fn new(addr: AirAddr, key: AirKey) -> Self {
        Self { addr, key }
    }

    /// A pairing is usable iff its peer address is set.
    pub fn is_valid(&self) -> bool {
        self.addr.is_valid()
    }
}

impl fmt::Display for AirPairing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (key {:08x})", self.addr, self.key)
    }
}
