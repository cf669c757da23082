//! Per-pairing link state.
//!
//! [`AirIo`] groups what both engines track about the peer they are bound
//! to: the pairing itself, the peer's advertised info, low-pass filtered
//! RSSI/SNR/link-quality and the filtered inter-frame interval.

use crate::air::addr::{AirAddr, AirPairing};
use crate::air::caps::AirInfo;
use crate::util::lpf::Lpf;
use crate::util::time::TimeMicros;

#[derive(Debug)]
pub struct AirIo {
    addr: AirAddr,
    pairing: Option<AirPairing>,
    pairing_info: AirInfo,
    rssi: Lpf,
    snr: Lpf,
    lq: Lpf,
    average_frame_interval: Lpf,
    last_frame_received: Option<TimeMicros>,
}

impl AirIo {
    pub fn new(addr: AirAddr) -> AirIo {
        AirIo {
            addr,
            pairing: None,
            pairing_info: AirInfo::default(),
            rssi: Lpf::new(0.1),
            snr: Lpf::new(0.1),
            lq: Lpf::new(0.5),
            average_frame_interval: Lpf::new(1.0),
            last_frame_received: None,
        }
    }

    pub fn addr(&self) -> AirAddr {
        self.addr
    }

    /// Installs the pairing and the peer's persisted info.
    pub fn bind(&mut self, pairing: AirPairing, info: AirInfo) {
        self.pairing = Some(pairing);
        self.pairing_info = info;
    }

    pub fn is_bound(&self) -> bool {
        self.pairing.map(|p| p.is_valid()).unwrap_or(false)
    }

    pub fn pairing(&self) -> Option<AirPairing> {
        self.pairing.filter(|p| p.is_valid())
    }

    pub fn bound_addr(&self) -> Option<AirAddr> {
        self.pairing().map(|p| p.addr)
    }

    pub fn pairing_info(&self) -> &AirInfo {
        &self.pairing_info
    }

    /// Records a decoded frame for the inter-frame interval estimate.
    pub fn on_frame(&mut self, now: TimeMicros) {
        if let Some(last) = self.last_frame_received {
            let interval = now.micros_since(last) as f32 * 1e-6;
            self.average_frame_interval.update(interval, now);
        }
        self.last_frame_received = Some(now);
    }

    /// Feeds new signal readings into the filters.
    pub fn update_rssi(&mut self, rssi: i16, snr: i8, lq: u8, now: TimeMicros) {
        self.rssi.update(rssi as f32, now);
        self.snr.update(snr as f32, now);
        self.lq.update(lq as f32, now);
    }

    /// Restarts the filters at the given readings (after a mode change the
    /// first frame must not be averaged with the old mode's signal).
    pub fn reset_rssi(&mut self, rssi: i16, snr: i8, lq: u8, now: TimeMicros) {
        self.rssi.reset(rssi as f32);
        self.snr.reset(snr as f32);
        self.lq.reset(lq as f32);
        self.rssi.update(rssi as f32, now);
        self.snr.update(snr as f32, now);
        self.lq.update(lq as f32, now);
    }

    /// Zeroes the filters; used when the link is lost.
    pub fn invalidate_rssi(&mut self) {
        self.rssi.reset(0.0);
        self.snr.reset(0.0);
        self.lq.reset(0.0);
    }

    pub fn rssi(&self) -> f32 {
        self.rssi.value()
    }

    pub fn snr(&self) -> f32 {
        self.snr.value()
    }

    pub fn lq(&self) -> f32 {
        self.lq.value()
    }

    pub fn last_frame_received(&self) -> Option<TimeMicros> {
        self.last_frame_received
    }

    /// Filtered frame rate in Hz, zero before any estimate exists.
    pub fn update_frequency(&self) -> u32 {
        let value = self.average_frame_interval.value();
        if value > 0.0 {
            (1.0 / value).round() as u32
        } else {
            0
        }
    }
}
