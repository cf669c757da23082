//! # RX-side Binder
//!
//! Scans the locally enabled bands for a TX in bind mode, rotating bands
//! every two seconds. When a valid request arrives it replies within
//! 10 ms, advertising role "awaiting confirmation" until the user accepts
//! (units without screen and button accept automatically), then confirms
//! with role RX and completes once that transmission is out.

use log::{info, warn};

use crate::air::addr::{AirAddr, AirPairing};
use crate::air::band::AirBand;
use crate::air::bind::{AirRole, BindPacket};
use crate::air::caps::AirInfo;
use crate::constants::BIND_PACKET_EXPIRATION_MS;
use crate::error::RcLinkError;
use crate::link::{AirConfig, LinkEngine};
use crate::radio::Radio;
use crate::rc::data::RcData;
use crate::util::time::{millis_to_micros, TimeMicros};

/// Band rotation interval while scanning.
const BAND_SWITCH_INTERVAL: u64 = millis_to_micros(2000);

/// Delay between receiving a bind request and answering it.
const RESPONSE_DELAY: u64 = millis_to_micros(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BindState {
    Rx,
    Tx,
}

/// The bind-mode engine of an RX node.
pub struct RxBinder<R: Radio> {
    radio: R,
    config: AirConfig,
    addr: AirAddr,
    own_info: AirInfo,
    state: BindState,
    band_index: usize,
    current_band: Option<AirBand>,
    switch_band_at: TimeMicros,
    bind_packet: Option<BindPacket>,
    bind_packet_expires: TimeMicros,
    send_response_at: TimeMicros,
    bind_accepted: bool,
    bind_confirmation_sent: bool,
    bind_completed: bool,
    is_open: bool,
}

impl<R: Radio> RxBinder<R> {
    pub fn new(radio: R, config: AirConfig, addr: AirAddr, own_info: AirInfo) -> RxBinder<R> {
        RxBinder {
            radio,
            config,
            addr,
            own_info,
            state: BindState::Rx,
            band_index: 0,
            current_band: None,
            switch_band_at: TimeMicros::ZERO,
            bind_packet: None,
            bind_packet_expires: TimeMicros::ZERO,
            send_response_at: TimeMicros::MAX,
            bind_accepted: false,
            bind_confirmation_sent: false,
            bind_completed: false,
            is_open: false,
        }
    }

    /// The pending TX request, if one is held and unexpired.
    pub fn bind_request(&self, now: TimeMicros) -> Option<(BindPacket, AirBand)> {
        let packet = self.bind_packet.as_ref()?;
        if now >= self.bind_packet_expires {
            return None;
        }
        Some((packet.clone(), self.current_band?))
    }

    /// Accepts the pending request; the confirmation goes out with the
    /// next reply. Returns whether the bind is already complete.
    pub fn accept(&mut self) -> bool {
        self.bind_accepted = true;
        self.bind_completed
    }

    pub fn is_complete(&self) -> bool {
        self.bind_completed
    }

    /// The pairing to persist once complete: the TX's address and key,
    /// its info and the band the bind happened on (which becomes the
    /// operating band).
    pub fn pairing(&self) -> Option<(AirPairing, AirInfo, AirBand)> {
        if !self.bind_completed {
            return None;
        }
        let packet = self.bind_packet.as_ref()?;
        Some((packet.pairing(), packet.info, self.current_band?))
    }

    fn update_band(&mut self) -> bool {
        let band = match self.config.bands.band_at(self.band_index) {
            Some(band) => band,
            None => {
                if self.band_index == 0 {
                    return false;
                }
                self.band_index = 0;
                match self.config.bands.band_at(0) {
                    Some(band) => band,
                    None => return false,
                }
            }
        };
        self.current_band = Some(band);
        self.radio.set_frequency(band.frequency(), 0);
        true
    }

    fn send_response(&mut self, data: &RcData) {
        let role = if self.bind_accepted {
            self.bind_confirmation_sent = true;
            AirRole::Rx
        } else {
            AirRole::RxAwaitingConfirmation
        };
        let key = match &self.bind_packet {
            Some(packet) => packet.key,
            None => return,
        };
        let name = data.craft_name().unwrap_or("");
        let packet = BindPacket::new(self.addr, key, role, self.own_info, name);
        info!("Sending bind response");
        self.state = BindState::Tx;
        self.radio.send(&packet.encode());
    }
}

impl<R: Radio> LinkEngine for RxBinder<R> {
    fn open(&mut self, data: &mut RcData, now: TimeMicros) -> Result<(), RcLinkError> {
        let _ = data;
        info!("Open");
        self.state = BindState::Rx;
        self.bind_packet = None;
        self.bind_packet_expires = TimeMicros::ZERO;
        self.send_response_at = TimeMicros::MAX;
        // Without a way to ask the user, accept automatically
        self.bind_accepted = !self.own_info.capabilities.needs_bind_confirmation();
        self.bind_confirmation_sent = false;
        self.bind_completed = false;
        self.band_index = 0;
        self.switch_band_at = now + BAND_SWITCH_INTERVAL;
        self.radio.init();
        self.radio.set_bind_mode();
        if !self.update_band() {
            warn!("No air bands enabled");
            return Err(RcLinkError::NoBands);
        }
        self.radio.start_rx();
        self.is_open = true;
        Ok(())
    }

    fn update(&mut self, data: &mut RcData, now: TimeMicros) -> bool {
        if !self.is_open {
            return false;
        }
        match self.state {
            BindState::Rx => {
                if self.radio.is_rx_done() {
                    let mut buf = [0u8; BindPacket::SIZE];
                    let n = self.radio.read(&mut buf);
                    match BindPacket::decode(&buf[..n]) {
                        Ok(packet) if packet.role == AirRole::Tx => {
                            info!("Got bind request");
                            self.bind_packet = Some(packet);
                            self.bind_packet_expires =
                                now + millis_to_micros(BIND_PACKET_EXPIRATION_MS);
                            // Wait 10ms before answering
                            self.send_response_at = now + RESPONSE_DELAY;
                        }
                        _ => {}
                    }
                    // We always answer, but restarting RX keeps us
                    // listening until the response is due
                    self.radio.sleep();
                    self.radio.start_rx();
                } else if now > self.send_response_at {
                    self.send_response_at = TimeMicros::MAX;
                    self.send_response(data);
                } else if now > self.switch_band_at {
                    if now > self.bind_packet_expires {
                        // Request expired; try the next band
                        self.band_index += 1;
                        self.update_band();
                        self.radio.start_rx();
                    }
                    self.switch_band_at = now + BAND_SWITCH_INTERVAL;
                }
            }
            BindState::Tx => {
                if self.radio.is_tx_done() {
                    if self.bind_accepted && self.bind_confirmation_sent {
                        // The confirmation is out; we're bound
                        self.bind_completed = true;
                    } else {
                        // Informative reply sent; keep binding
                        self.radio.sleep();
                        self.radio.start_rx();
                        self.state = BindState::Rx;
                    }
                }
            }
        }
        false
    }

    fn close(&mut self) {
        self.radio.sleep();
        self.is_open = false;
    }
}
