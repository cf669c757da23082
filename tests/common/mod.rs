//! Shared harness for link integration tests: a TX and an RX engine wired
//! to the two ends of a mock air medium, driven by a deterministic
//! microsecond clock.

use rclink_rs::air::{
    AirAddr, AirBand, AirBandMask, AirInfo, AirKey, AirPairing, Capabilities, SupportedModes,
};
use rclink_rs::link::{AirConfig, LinkEngine, RxEngine, TxEngine};
use rclink_rs::radio::{LinkSignal, MockRadio, SharedMedium};
use rclink_rs::rc::{RcData, TelemetryId, TelemetryValue};
use rclink_rs::util::TimeMicros;

pub const TX_ADDR: AirAddr = AirAddr([0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
pub const RX_ADDR: AirAddr = AirAddr([0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F]);
pub const KEY: AirKey = 0xDEAD_BEEF;

/// Simulation tick.
pub const TICK_MICROS: u64 = 200;

/// Endpoint indexes on the shared medium.
pub const TX_ENDPOINT: usize = 0;
pub const RX_ENDPOINT: usize = 1;

pub fn node_info(modes: SupportedModes) -> AirInfo {
    AirInfo::new(Capabilities::FREQUENCY_868MHZ, 20, 16, modes)
}

pub struct LinkHarness {
    pub medium: SharedMedium,
    pub tx: TxEngine<MockRadio>,
    pub rx: RxEngine<MockRadio>,
    pub tx_data: RcData,
    pub rx_data: RcData,
    pub now: TimeMicros,
    /// Report the RX's filtered link state as downlink telemetry every
    /// 100 ms, the way a real RX application does.
    pub report_rx_telemetry: bool,
    next_rx_telemetry: TimeMicros,
}

impl LinkHarness {
    /// A bound, opened TX/RX pair on 868 MHz with the given mode policy.
    pub fn new(modes: SupportedModes) -> LinkHarness {
        let medium = SharedMedium::new();
        let config = AirConfig {
            band: AirBand::Band868,
            bands: AirBandMask::BAND_868,
            modes,
        };
        let tx_radio = medium.radio();
        let rx_radio = medium.radio();
        // Comfortable default signal: 3 dB SNR asks for no mode change
        medium.set_signal(
            TX_ENDPOINT,
            LinkSignal {
                rssi: -70,
                snr: 12,
                lq: 100,
            },
        );
        medium.set_signal(
            RX_ENDPOINT,
            LinkSignal {
                rssi: -65,
                snr: 12,
                lq: 100,
            },
        );

        let mut tx = TxEngine::new(tx_radio, config, TX_ADDR);
        tx.bind(AirPairing::new(RX_ADDR, KEY), node_info(modes));
        let mut rx = RxEngine::new(rx_radio, config, RX_ADDR);
        rx.bind(AirPairing::new(TX_ADDR, KEY), node_info(modes));

        let mut harness = LinkHarness {
            medium,
            tx,
            rx,
            tx_data: RcData::new(),
            rx_data: RcData::new(),
            now: TimeMicros(1_000),
            report_rx_telemetry: true,
            next_rx_telemetry: TimeMicros(1_000),
        };
        harness
            .tx
            .open(&mut harness.tx_data, harness.now)
            .expect("tx open");
        harness
            .rx
            .open(&mut harness.rx_data, harness.now)
            .expect("rx open");
        harness
    }

    /// Sets the SNR (0.25 dB units) the RX measures on uplink frames.
    pub fn set_rx_snr(&self, snr: i8) {
        self.medium.set_signal(
            RX_ENDPOINT,
            LinkSignal {
                rssi: -65,
                snr,
                lq: 100,
            },
        );
    }

    pub fn step(&mut self) {
        self.now += TICK_MICROS;
        self.tx.update(&mut self.tx_data, self.now);
        self.rx.update(&mut self.rx_data, self.now);

        if self.report_rx_telemetry && self.now >= self.next_rx_telemetry {
            self.next_rx_telemetry = self.now + 100_000;
            let rssi = self.rx.air().rssi().round().clamp(-128.0, 127.0) as i8;
            let snr = self.rx.air().snr().round().clamp(-128.0, 127.0) as i8;
            let lq = self.rx.air().lq().round().clamp(0.0, 100.0) as i8;
            self.rx_data
                .set_telemetry(TelemetryId::RxRssiAnt1, TelemetryValue::I8(rssi), self.now);
            self.rx_data
                .set_telemetry(TelemetryId::RxSnr, TelemetryValue::I8(snr), self.now);
            self.rx_data.set_telemetry(
                TelemetryId::RxLinkQuality,
                TelemetryValue::I8(lq),
                self.now,
            );
        }
    }

    pub fn run_millis(&mut self, millis: u64) {
        for _ in 0..(millis * 1000 / TICK_MICROS) {
            self.step();
        }
    }

    /// Steps until `predicate` holds, failing after `timeout_millis`.
    pub fn run_until(&mut self, timeout_millis: u64, mut predicate: impl FnMut(&mut Self) -> bool) {
        for _ in 0..(timeout_millis * 1000 / TICK_MICROS) {
            self.step();
            if predicate(self) {
                return;
            }
        }
        panic!("condition not reached within {timeout_millis} ms");
    }
}
