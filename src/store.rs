//! # Pairing Persistence Seam
//!
//! The settings store itself lives outside this crate; the core only
//! defines the interface it consumes and a simple in-memory
//! implementation with JSON save/load, used by tests and the CLI
//! simulator.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::air::addr::{AirAddr, AirPairing};
use crate::air::band::AirBand;
use crate::air::caps::AirInfo;

/// Per-peer info persisted next to a pairing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeerEntry {
    pub name: String,
    pub info: AirInfo,
    pub band: Option<AirBand>,
}

/// Storage interface the engines' surroundings implement.
pub trait PairingStore {
    /// The single TX an RX is paired with.
    fn paired_tx(&self) -> Option<AirPairing>;

    /// The `idx`-th paired RX, most recently used first.
    fn paired_rx(&self, idx: usize) -> Option<AirPairing>;

    /// Adds (or refreshes) a paired RX, making it the most recent.
    fn add_paired_rx(&mut self, pairing: AirPairing);

    /// Sets the single paired TX.
    fn set_paired_tx(&mut self, pairing: AirPairing);

    /// Persisted info for a peer.
    fn air_info(&self, addr: &AirAddr) -> Option<PeerEntry>;

    /// Stores info for a peer.
    fn set_air_info(&mut self, addr: AirAddr, entry: PeerEntry);
}

/// In-memory store with JSON persistence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryPairingStore {
    /// Own address, generated at first boot.
    pub addr: AirAddr,
    paired_tx: Option<AirPairing>,
    /// Most recently used first.
    paired_rx: Vec<AirPairing>,
    peers: HashMap<String, PeerEntry>,
}

impl MemoryPairingStore {
    pub fn new(addr: AirAddr) -> MemoryPairingStore {
        MemoryPairingStore {
            addr,
            ..Default::default()
        }
    }

    /// Loads a store from a JSON file, or creates a fresh one (with a
    /// newly generated address) when the file does not exist.
    pub fn load_or_create(path: &Path) -> io::Result<MemoryPairingStore> {
        match fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Ok(MemoryPairingStore::new(AirAddr::generate()))
            }
            Err(e) => Err(e),
        }
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(path, contents)
    }
}

impl PairingStore for MemoryPairingStore {
    fn paired_tx(&self) -> Option<AirPairing> {
        self.paired_tx
    }

    fn paired_rx(&self, idx: usize) -> Option<AirPairing> {
        self.paired_rx.get(idx).copied()
    }

    fn add_paired_rx(&mut self, pairing: AirPairing) {
        self.paired_rx.retain(|p| p.addr != pairing.addr);
        self.paired_rx.insert(0, pairing);
    }

    fn set_paired_tx(&mut self, pairing: AirPairing) {
        self.paired_tx = Some(pairing);
    }

    fn air_info(&self, addr: &AirAddr) -> Option<PeerEntry> {
        self.peers.get(&addr.to_string()).cloned()
    }

    fn set_air_info(&mut self, addr: AirAddr, entry: PeerEntry) {
        self.peers.insert(addr.to_string(), entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paired_rx_recency() {
        let mut store = MemoryPairingStore::new(AirAddr([1; 6]));
        let a = AirPairing::new(AirAddr([2; 6]), 10);
        let b = AirPairing::new(AirAddr([3; 6]), 20);
        store.add_paired_rx(a);
        store.add_paired_rx(b);
        assert_eq!(store.paired_rx(0), Some(b));
        assert_eq!(store.paired_rx(1), Some(a));
        // Re-adding moves to the front without duplicating
        store.add_paired_rx(a);
        assert_eq!(store.paired_rx(0), Some(a));
        assert_eq!(store.paired_rx(2), None);
    }

    #[test]
    fn test_air_info_round_trip() {
        let mut store = MemoryPairingStore::new(AirAddr([1; 6]));
        let addr = AirAddr([9; 6]);
        let entry = PeerEntry {
            name: "craft".into(),
            info: AirInfo::default(),
            band: Some(AirBand::Band868),
        };
        store.set_air_info(addr, entry.clone());
        assert_eq!(store.air_info(&addr), Some(entry));
        assert_eq!(store.air_info(&AirAddr([8; 6])), None);
    }
}
