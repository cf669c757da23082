//! Bind packet codec properties.

use proptest::prelude::*;

use rclink_rs::air::{AirAddr, AirInfo, AirRole, BindPacket, Capabilities, SupportedModes};

fn role_strategy() -> impl Strategy<Value = AirRole> {
    prop_oneof![
        Just(AirRole::Tx),
        Just(AirRole::Rx),
        Just(AirRole::RxAwaitingConfirmation),
    ]
}

fn modes_strategy() -> impl Strategy<Value = SupportedModes> {
    prop_oneof![
        Just(SupportedModes::Fixed1),
        Just(SupportedModes::Fixed5),
        Just(SupportedModes::Modes1To5),
        Just(SupportedModes::Modes2To5),
    ]
}

proptest! {
    #[test]
    fn prop_round_trip(
        addr in proptest::array::uniform6(any::<u8>()),
        key in any::<u32>(),
        role in role_strategy(),
        caps in any::<u32>(),
        power in any::<u8>(),
        channels in 1u8..17,
        modes in modes_strategy(),
        name in "[a-zA-Z0-9 _-]{0,32}",
    ) {
        let packet = BindPacket::new(
            AirAddr(addr),
            key,
            role,
            AirInfo::new(Capabilities::from_bits_truncate(caps), power, channels, modes),
            &name,
        );
        let wire = packet.encode();
        prop_assert_eq!(wire.len(), BindPacket::SIZE);
        let decoded = BindPacket::decode(&wire).unwrap();
        prop_assert_eq!(decoded, packet);
    }

    /// Corrupting any single byte of the prefix, the version or the CRC
    /// makes validation fail.
    #[test]
    fn prop_header_corruption_rejected(
        key in any::<u32>(),
        offset in prop_oneof![0usize..4, Just(63usize)],
        flip in 1u8..=255,
    ) {
        let packet = BindPacket::new(
            AirAddr([1, 2, 3, 4, 5, 6]),
            key,
            AirRole::Tx,
            AirInfo::new(Capabilities::FREQUENCY_868MHZ, 20, 16, SupportedModes::Modes1To5),
            "some-node",
        );
        let mut wire = packet.encode();
        wire[offset] ^= flip;
        prop_assert!(BindPacket::decode(&wire).is_err());
    }

    /// Any single-byte corruption anywhere in the packet is caught by
    /// prefix, version, role or CRC checks.
    #[test]
    fn prop_body_corruption_rejected(
        offset in 4usize..63,
        flip in 1u8..=255,
    ) {
        let packet = BindPacket::new(
            AirAddr([9, 8, 7, 6, 5, 4]),
            0xCAFE_F00D,
            AirRole::Rx,
            AirInfo::default(),
            "craft",
        );
        let mut wire = packet.encode();
        wire[offset] ^= flip;
        prop_assert!(BindPacket::decode(&wire).is_err());
    }
}

#[test]
fn test_wrong_size_rejected() {
    let packet = BindPacket::new(
        AirAddr([1; 6]),
        1,
        AirRole::Tx,
        AirInfo::default(),
        "x",
    );
    let wire = packet.encode();
    assert!(BindPacket::decode(&wire[..63]).is_err());
}
