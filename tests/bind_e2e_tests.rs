//! Cold-bind scenario: a TX and an RX with no pairings rendezvous on the
//! bind channel, exchange pairings and capabilities, and the resulting
//! pairing carries a working link.

mod common;

use common::{node_info, RX_ADDR, TX_ADDR};
use rclink_rs::air::{AirBand, AirBandMask, AirInfo, AirRole, Capabilities, SupportedModes};
use rclink_rs::link::{AirConfig, LinkEngine, RxBinder, RxEngine, TxBinder, TxEngine};
use rclink_rs::radio::SharedMedium;
use rclink_rs::rc::{RcData, TelemetryId, TelemetryValue};
use rclink_rs::util::TimeMicros;

const TICK: u64 = 200;

fn config(bands: AirBandMask) -> AirConfig {
    AirConfig {
        band: AirBand::Band868,
        bands,
        modes: SupportedModes::Fixed1,
    }
}

#[test]
fn test_cold_bind_and_first_frames() {
    let medium = SharedMedium::new();
    let mut tx_data = RcData::new();
    let mut rx_data = RcData::new();
    tx_data.set_telemetry(
        TelemetryId::PilotName,
        TelemetryValue::Str("bind-pilot".into()),
        TimeMicros(1),
    );
    rx_data.set_telemetry(
        TelemetryId::CraftName,
        TelemetryValue::Str("bind-craft".into()),
        TimeMicros(1),
    );

    let tx_radio = medium.radio();
    let rx_radio = medium.radio();
    let mut tx_binder = TxBinder::new(
        tx_radio,
        config(AirBandMask::BAND_868),
        TX_ADDR,
        node_info(SupportedModes::Fixed1),
    );
    // No screen, no button: the RX accepts automatically
    let rx_info = AirInfo::new(Capabilities::empty(), 17, 16, SupportedModes::Fixed1);
    let mut rx_binder = RxBinder::new(rx_radio, config(AirBandMask::BAND_868), RX_ADDR, rx_info);

    let mut now = TimeMicros(1_000);
    tx_binder.open(&mut tx_data, now).unwrap();
    rx_binder.open(&mut rx_data, now).unwrap();

    // Two bind cadences are ample for request + reply + confirmation
    let mut bound = false;
    for _ in 0..(1_000_000 / TICK) {
        now += TICK;
        tx_binder.update(&mut tx_data, now);
        rx_binder.update(&mut rx_data, now);
        if rx_binder.is_complete() && tx_binder.accepted_pairing(now).is_some() {
            bound = true;
            break;
        }
    }
    assert!(bound, "bind did not complete");

    let (tx_pairing, rx_peer_info, tx_band) = tx_binder.accepted_pairing(now).unwrap();
    let (rx_pairing, tx_peer_info, rx_band) = rx_binder.pairing().unwrap();

    // Each side holds the other's address and the same key
    assert_eq!(tx_pairing.addr, RX_ADDR);
    assert_eq!(rx_pairing.addr, TX_ADDR);
    assert_eq!(tx_pairing.key, rx_pairing.key);
    assert_ne!(tx_pairing.key, 0);
    assert_eq!(tx_band, AirBand::Band868);
    assert_eq!(rx_band, AirBand::Band868);
    assert_eq!(tx_peer_info.supported_modes(), Some(SupportedModes::Fixed1));

    // The TX learned whether the RX still needs a confirmation
    let request = tx_binder.bind_request(now).unwrap();
    assert_eq!(request.packet.role, AirRole::Rx);
    assert!(!request.needs_confirmation);
    assert_eq!(request.packet.name, "bind-craft");

    tx_binder.close();
    rx_binder.close();

    // The pairing carries a live link at the mode-1 cycle time
    let mut tx = TxEngine::new(medium.radio(), config(AirBandMask::BAND_868), TX_ADDR);
    tx.bind(tx_pairing, rx_peer_info);
    let mut rx = RxEngine::new(medium.radio(), config(AirBandMask::BAND_868), RX_ADDR);
    rx.bind(rx_pairing, tx_peer_info);
    tx.open(&mut tx_data, now).unwrap();
    rx.open(&mut rx_data, now).unwrap();

    for _ in 0..(200_000 / TICK) {
        now += TICK;
        tx.update(&mut tx_data, now);
        rx.update(&mut rx_data, now);
    }
    let (success, _) = rx.rx_stats();
    // Mode 1 cycles every ~6.7ms; 200ms must carry well over a dozen
    assert!(success > 15, "only {success} frames over the new pairing");
}

#[test]
fn test_rx_binder_waits_for_confirmation() {
    let medium = SharedMedium::new();
    let mut tx_data = RcData::new();
    let mut rx_data = RcData::new();

    let mut tx_binder = TxBinder::new(
        medium.radio(),
        config(AirBandMask::BAND_868),
        TX_ADDR,
        node_info(SupportedModes::Fixed1),
    );
    // A button means the user must confirm
    let rx_info = AirInfo::new(Capabilities::BUTTON, 17, 16, SupportedModes::Fixed1);
    let mut rx_binder = RxBinder::new(
        medium.radio(),
        config(AirBandMask::BAND_868),
        RX_ADDR,
        rx_info,
    );

    let mut now = TimeMicros(1_000);
    tx_binder.open(&mut tx_data, now).unwrap();
    rx_binder.open(&mut rx_data, now).unwrap();

    // Run past one full cadence: the TX must see an unconfirmed reply
    for _ in 0..(600_000 / TICK) {
        now += TICK;
        tx_binder.update(&mut tx_data, now);
        rx_binder.update(&mut rx_data, now);
    }
    assert!(!rx_binder.is_complete());
    let request = tx_binder.bind_request(now).expect("reply expected");
    assert_eq!(request.packet.role, AirRole::RxAwaitingConfirmation);
    assert!(request.needs_confirmation);
    assert!(tx_binder.accepted_pairing(now).is_none());

    // User confirms on the RX side; the next reply completes the bind
    rx_binder.accept();
    let mut done = false;
    for _ in 0..(1_200_000 / TICK) {
        now += TICK;
        tx_binder.update(&mut tx_data, now);
        rx_binder.update(&mut rx_data, now);
        if rx_binder.is_complete() && tx_binder.accepted_pairing(now).is_some() {
            done = true;
            break;
        }
    }
    assert!(done, "confirmation round did not complete");
}

#[test]
fn test_rx_binder_rotates_bands() {
    let medium = SharedMedium::new();
    let mut rx_data = RcData::new();
    let rx_info = AirInfo::new(Capabilities::empty(), 17, 16, SupportedModes::Fixed1);
    let mut rx_binder = RxBinder::new(
        medium.radio(),
        config(AirBandMask::BAND_433 | AirBandMask::BAND_868),
        RX_ADDR,
        rx_info,
    );
    let mut now = TimeMicros(1_000);
    rx_binder.open(&mut rx_data, now).unwrap();
    assert_eq!(medium.tuned_frequency(0), AirBand::Band433.frequency());

    // With nothing on the air the binder hops to the next band after 2s
    for _ in 0..(2_500_000 / TICK) {
        now += TICK;
        rx_binder.update(&mut rx_data, now);
    }
    assert_eq!(medium.tuned_frequency(0), AirBand::Band868.frequency());

    // And wraps back around
    for _ in 0..(2_000_000 / TICK) {
        now += TICK;
        rx_binder.update(&mut rx_data, now);
    }
    assert_eq!(medium.tuned_frequency(0), AirBand::Band433.frequency());
}
