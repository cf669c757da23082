//! Frame codec properties: keyed CRC round trips, cross-key rejection
//! bounds and wire-size invariants.

use proptest::prelude::*;

use rclink_rs::air::{sync_word, RxPacket, TxPacket};
use rclink_rs::constants::BIND_SYNC_WORD;
use rclink_rs::error::FrameError;

proptest! {
    #[test]
    fn prop_tx_packet_round_trip(
        key in any::<u32>(),
        seq in 0u8..16,
        ch in proptest::array::uniform4(0u16..512),
        data in proptest::array::uniform2(any::<u8>()),
    ) {
        let pkt = TxPacket { seq, channels: ch, data };
        let wire = pkt.encode(key);
        prop_assert_eq!(wire.len(), TxPacket::SIZE);
        prop_assert_eq!(TxPacket::decode(&wire, key).unwrap(), pkt);
    }

    #[test]
    fn prop_rx_packet_round_trip(
        key in any::<u32>(),
        seq in 0u8..16,
        tx_seq in 0u8..16,
        data in proptest::array::uniform3(any::<u8>()),
    ) {
        let pkt = RxPacket { seq, tx_seq, data };
        let wire = pkt.encode(key);
        prop_assert_eq!(wire.len(), RxPacket::SIZE);
        prop_assert_eq!(RxPacket::decode(&wire, key).unwrap(), pkt);
    }

    #[test]
    fn prop_single_bit_corruption_rejected(
        key in any::<u32>(),
        seq in 0u8..16,
        byte in 0usize..8,
        bit in 0u8..8,
    ) {
        let pkt = TxPacket { seq, channels: [100, 200, 300, 400], data: [1, 2] };
        let mut wire = pkt.encode(key);
        wire[byte] ^= 1 << bit;
        prop_assert_eq!(TxPacket::decode(&wire, key), Err(FrameError::InvalidCrc));
    }

    #[test]
    fn prop_sync_word_deterministic(key in any::<u32>()) {
        prop_assert_eq!(sync_word(key), sync_word(key));
        prop_assert_ne!(sync_word(key), BIND_SYNC_WORD);
    }
}

/// Frames prepared under one key must not validate under another: over a
/// large sample the cross-acceptance rate has to stay within the 8-bit
/// CRC bound of 1/256 (with margin for sampling noise).
#[test]
fn test_foreign_key_rejection_rate() {
    let key_ours = 0x1111_2222;
    let key_theirs = 0x3333_4444;
    let mut accepted = 0u32;
    const SAMPLES: u32 = 10_000;
    for i in 0..SAMPLES {
        let pkt = TxPacket {
            seq: (i % 16) as u8,
            channels: [
                (i % 512) as u16,
                ((i * 7) % 512) as u16,
                ((i * 13) % 512) as u16,
                ((i * 29) % 512) as u16,
            ],
            data: [(i % 256) as u8, ((i >> 8) % 256) as u8],
        };
        let wire = pkt.encode(key_theirs);
        if TxPacket::decode(&wire, key_ours).is_ok() {
            accepted += 1;
        }
    }
    // Expected acceptance ~ SAMPLES/256 ≈ 39; require well under 2x that
    assert!(
        accepted < SAMPLES / 128,
        "{accepted} foreign frames accepted out of {SAMPLES}"
    );
}

#[test]
fn test_sync_words_spread_over_keys() {
    // The sync word is one byte, so collisions exist, but keys must not
    // systematically collide
    let mut distinct = std::collections::HashSet::new();
    for key in 0u32..256 {
        distinct.insert(sync_word(key));
    }
    assert!(distinct.len() > 100, "only {} distinct words", distinct.len());
}
