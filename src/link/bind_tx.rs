//! # TX-side Binder
//!
//! Advertises a fresh pairing key on the bind channel every 500 ms and
//! listens for RX replies in between. A reply with the offered key is
//! surfaced to the caller, who confirms it (or it is auto-confirmed once
//! the RX reports role RX, meaning the user accepted on the RX side).

use log::{info, warn};

use zeroize::Zeroize;

use crate::air::addr::{generate_key, AirAddr, AirKey, AirPairing};
use crate::air::band::AirBand;
use crate::air::bind::{AirRole, BindPacket};
use crate::air::caps::AirInfo;
use crate::constants::{BIND_PACKET_EXPIRATION_MS, BIND_PACKET_INTERVAL_MS};
use crate::error::RcLinkError;
use crate::link::{AirConfig, LinkEngine};
use crate::radio::Radio;
use crate::rc::data::RcData;
use crate::util::time::{millis_to_micros, TimeMicros};

/// A bind reply held for the caller to inspect.
#[derive(Debug, Clone)]
pub struct BindRequest {
    pub packet: BindPacket,
    pub band: AirBand,
    /// True while the RX is still waiting for its user to confirm.
    pub needs_confirmation: bool,
}

/// The bind-mode engine of a TX node.
pub struct TxBinder<R: Radio> {
    radio: R,
    config: AirConfig,
    addr: AirAddr,
    own_info: AirInfo,
    binding_key: AirKey,
    next_bind_offer: TimeMicros,
    is_listening: bool,
    bind_response: Option<BindPacket>,
    bind_packet_expires: TimeMicros,
    is_open: bool,
}

impl<R: Radio> TxBinder<R> {
    pub fn new(radio: R, config: AirConfig, addr: AirAddr, own_info: AirInfo) -> TxBinder<R> {
        TxBinder {
            radio,
            config,
            addr,
            own_info,
            binding_key: 0,
            next_bind_offer: TimeMicros::ZERO,
            is_listening: false,
            bind_response: None,
            bind_packet_expires: TimeMicros::ZERO,
            is_open: false,
        }
    }

    /// The RX reply currently held, if it has not expired.
    pub fn bind_request(&self, now: TimeMicros) -> Option<BindRequest> {
        let packet = self.bind_response.as_ref()?;
        if now >= self.bind_packet_expires {
            return None;
        }
        Some(BindRequest {
            packet: packet.clone(),
            band: self.config.band,
            needs_confirmation: packet.role != AirRole::Rx,
        })
    }

    /// The pairing to persist once the RX has confirmed: the RX's address
    /// with the key this binder offered.
    pub fn accepted_pairing(&self, now: TimeMicros) -> Option<(AirPairing, AirInfo, AirBand)> {
        let request = self.bind_request(now)?;
        if request.needs_confirmation {
            return None;
        }
        Some((
            AirPairing::new(request.packet.addr, self.binding_key),
            request.packet.info,
            request.band,
        ))
    }
}

impl<R: Radio> LinkEngine for TxBinder<R> {
    fn open(&mut self, data: &mut RcData, _now: TimeMicros) -> Result<(), RcLinkError> {
        let _ = data;
        info!("Start bind");
        self.next_bind_offer = TimeMicros::ZERO;
        self.binding_key = generate_key();
        self.bind_response = None;
        self.bind_packet_expires = TimeMicros::ZERO;
        self.is_listening = false;
        self.radio.init();
        self.radio.set_bind_mode();
        self.radio
            .set_frequency(self.config.band.frequency(), 0);
        self.is_open = true;
        Ok(())
    }

    fn update(&mut self, data: &mut RcData, now: TimeMicros) -> bool {
        if !self.is_open {
            return false;
        }
        if self.next_bind_offer < now {
            if !self.radio.is_tx_done() {
                warn!("TX not finished before sending next bind packet");
            }
            self.is_listening = false;

            let name = data.pilot_name().unwrap_or("");
            let packet = BindPacket::new(
                self.addr,
                self.binding_key,
                AirRole::Tx,
                self.own_info,
                name,
            );
            info!("Sending bind packet");
            self.radio.send(&packet.encode());
            self.next_bind_offer = now + millis_to_micros(BIND_PACKET_INTERVAL_MS);
        } else if !self.is_listening {
            if self.radio.is_tx_done() {
                self.radio.sleep();
                self.radio.start_rx();
                self.is_listening = true;
            }
        } else if self.radio.is_rx_done() {
            let mut buf = [0u8; BindPacket::SIZE];
            let n = self.radio.read(&mut buf);
            match BindPacket::decode(&buf[..n]) {
                Ok(packet) if packet.key == self.binding_key => {
                    // The RX might be informing us it awaits confirmation
                    // or confirming the bind
                    info!(
                        "Got bind response (accepted: {})",
                        if packet.role == AirRole::Rx { "Y" } else { "N" }
                    );
                    self.bind_packet_expires =
                        now + millis_to_micros(BIND_PACKET_EXPIRATION_MS);
                    self.bind_response = Some(packet);
                }
                Ok(_) => {}
                Err(_) => {}
            }
        }
        false
    }

    fn close(&mut self) {
        self.radio.sleep();
        self.binding_key.zeroize();
        self.is_open = false;
    }
}
