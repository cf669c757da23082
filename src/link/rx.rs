//! # RX Engine
//!
//! The downlink responder. It listens on the hop slot where the next
//! uplink is expected, answers every accepted frame with a downlink frame
//! carrying telemetry, and tracks the TX across hops by sequence number.
//!
//! Loss recovery: under normal loss it keeps hopping forward to where the
//! TX will be next; after half the hopping table is missed it slows down
//! and walks backwards from the expected slot to re-acquire a restarted
//! or drifted TX.

use std::sync::{Arc, Mutex};

use log::{debug, info, warn};

use crate::air::addr::{AirAddr, AirPairing};
use crate::air::caps::AirInfo;
use crate::air::cmd::{AirCmd, SwitchModeAck};
use crate::air::frame::{sync_word, RxPacket, TxPacket};
use crate::air::freq::FreqTable;
use crate::air::io::AirIo;
use crate::air::mode::{AirMode, AirModeMask};
use crate::air::stream::{AirStream, StreamEvent};
use crate::constants::{CHANNEL_BITS, DOWNLINK_DATA_BYTES, SEQ_COUNT, STREAM_START_STOP};
use crate::error::RcLinkError;
use crate::link::{AirConfig, LinkEngine};
use crate::radio::{params, Radio};
use crate::rc::channels::channel_decode;
use crate::rc::data::RcData;
use crate::rc::telemetry::TelemetryId;
use crate::rmp::{Rmp, RmpAirCodec, RmpTransport};
use crate::util::time::TimeMicros;

/// Extra fraction of the cycle time to wait before declaring a frame lost.
const CYCLE_TIME_WAIT_FACTOR: u64 = 10; // percent

/// Maximum number of lost packets while still jumping forward.
const MAX_LOST_PACKETS_JUMPING_FORWARD: u32 = SEQ_COUNT as u32 / 2;

/// Telemetry fed before an MSP reply so big MSP responses cannot push the
/// link-state report out of the downlink.
const TELEMETRY_FED_BEFORE_MSP: [TelemetryId; 4] = [
    TelemetryId::RxRssiAnt1,
    TelemetryId::RxRssiAnt2,
    TelemetryId::RxLinkQuality,
    TelemetryId::RxSnr,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RxState {
    /// Listening.
    Rx,
    /// Transmitting the response.
    Tx,
}

/// The downlink engine of an RX node.
pub struct RxEngine<R: Radio> {
    radio: R,
    config: AirConfig,
    air: AirIo,
    stream: AirStream,
    rmp: Option<Arc<Mutex<Rmp>>>,
    rmp_codec: RmpAirCodec,
    freq_table: Option<FreqTable>,
    common_modes: AirModeMask,
    air_mode: AirMode,
    air_mode_longest: AirMode,
    state: RxState,
    seq: u8,
    tx_seq: u8,
    consecutive_lost: u32,
    freq_index: Option<usize>,
    cycle_time: u64,
    next_packet_expected: TimeMicros,
    next_packet_deadline: TimeMicros,
    deadline_extended: bool,
    switch_ack: Option<SwitchModeAck>,
    rx_errors: u64,
    rx_success: u64,
    telemetry_fed_index: usize,
    reset_rssi: bool,
    msp_inbound: Vec<Vec<u8>>,
    peer_name_update: Option<String>,
    is_open: bool,
}

impl<R: Radio> RxEngine<R> {
    pub fn new(radio: R, config: AirConfig, addr: AirAddr) -> RxEngine<R> {
        RxEngine {
            radio,
            config,
            air: AirIo::new(addr),
            stream: AirStream::new(),
            rmp: None,
            rmp_codec: RmpAirCodec::new(addr),
            freq_table: None,
            common_modes: AirModeMask::EMPTY,
            air_mode: AirMode::LONGEST,
            air_mode_longest: AirMode::LONGEST,
            state: RxState::Rx,
            seq: 0,
            tx_seq: 0,
            consecutive_lost: 0,
            freq_index: None,
            cycle_time: 0,
            next_packet_expected: TimeMicros::ZERO,
            next_packet_deadline: TimeMicros::MAX,
            deadline_extended: false,
            switch_ack: None,
            rx_errors: 0,
            rx_success: 0,
            telemetry_fed_index: 0,
            reset_rssi: true,
            msp_inbound: Vec::new(),
            peer_name_update: None,
            is_open: false,
        }
    }

    /// Attaches the node's RMP endpoint.
    pub fn attach_rmp(&mut self, rmp: Arc<Mutex<Rmp>>) {
        self.rmp = Some(rmp);
    }

    /// Installs the persisted pairing before `open`.
    pub fn bind(&mut self, pairing: AirPairing, info: AirInfo) {
        self.rmp_codec.set_bound_addr(Some(pairing.addr));
        if let Some(rmp) = &self.rmp {
            rmp.lock().unwrap().set_pairing(Some(pairing));
        }
        self.air.bind(pairing, info);
    }

    /// Queues an MSP chunk for the peer, preceded by one link-state
    /// telemetry value (a pending mode-switch ACK takes priority).
    pub fn send_msp(&mut self, data: &mut RcData, chunk: &[u8]) {
        if self.switch_ack.is_none() {
            let id = TELEMETRY_FED_BEFORE_MSP[self.telemetry_fed_index];
            self.telemetry_fed_index =
                (self.telemetry_fed_index + 1) % TELEMETRY_FED_BEFORE_MSP.len();
            if let Some(value) = data.telemetry(id).value().cloned() {
                self.stream.feed_output_downlink_telemetry(id, &value);
            }
        }
        self.stream.feed_output_cmd(AirCmd::Msp, chunk);
    }

    /// MSP chunks received from the peer.
    pub fn take_msp_inbound(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.msp_inbound)
    }

    /// A changed pilot name received from the peer.
    pub fn take_peer_name_update(&mut self) -> Option<String> {
        self.peer_name_update.take()
    }

    pub fn air(&self) -> &AirIo {
        &self.air
    }

    pub fn current_mode(&self) -> AirMode {
        self.air_mode
    }

    pub fn consecutive_lost(&self) -> u32 {
        self.consecutive_lost
    }

    pub fn rx_stats(&self) -> (u64, u64) {
        (self.rx_success, self.rx_errors)
    }

    /// Sequence number of the last accepted uplink frame.
    pub fn last_tx_seq(&self) -> u8 {
        self.tx_seq
    }

    fn key(&self) -> u32 {
        self.air.pairing().map(|p| p.key).unwrap_or(0)
    }

    fn update_air_frequency(&mut self, index: usize) {
        let index = index % SEQ_COUNT as usize;
        self.freq_index = Some(index);
        let table = self.freq_table.as_ref().expect("engine not open");
        let freq = table.freq(index);
        let error = table.abs_error(index);
        self.radio.set_frequency(freq, error);
        self.radio.start_rx();
    }

    fn update_air_mode(&mut self, data: &mut RcData) {
        self.radio.set_mode(self.air_mode);
        self.switch_ack = None;
        self.cycle_time = params::cycle_time(self.air_mode);
        data.input_failsafe
            .set_max_interval(params::rx_failsafe_interval(self.air_mode));
        self.reset_rssi = true;
    }

    fn start(&mut self, data: &mut RcData, now: TimeMicros) {
        let key = self.key();
        let center_freq = self.config.band.frequency();
        self.radio.init();
        self.radio.calibrate(center_freq);
        self.radio.set_sync_word(sync_word(key));
        self.freq_table = Some(FreqTable::new(key, center_freq));
        // Fixed response power; the RX does not negotiate TX power
        self.radio.set_tx_power(17);
        self.update_air_mode(data);
        self.radio.sleep();
        self.radio.set_payload_size(TxPacket::SIZE);
        self.update_air_frequency(0);
        self.rx_errors = 0;
        self.rx_success = 0;
        self.state = RxState::Rx;
        self.tx_seq = 0;
        self.next_packet_deadline = TimeMicros::MAX;
        self.deadline_extended = false;
        data.input_failsafe.reset_interval(now);
    }

    fn next_expected_tx_seq(&self) -> u8 {
        ((self.tx_seq as u32 + 1 + self.consecutive_lost) % SEQ_COUNT as u32) as u8
    }

    /// Retunes for the next expected uplink; returns whether the
    /// frequency changed.
    fn prepare_next_receive(&mut self, data: &mut RcData) -> bool {
        if let Some(ack) = self.switch_ack {
            if ack.proceed(self.next_expected_tx_seq()) {
                info!(
                    "Switch to mode {} for TX seq {}",
                    ack.mode as u8, ack.at_tx_seq
                );
                self.air_mode = ack.mode;
                self.update_air_mode(data);
            }
        }

        // Start hopping in reverse if the loss run becomes too long; the
        // TX might have been restarted
        let freq_at = if self.consecutive_lost > MAX_LOST_PACKETS_JUMPING_FORWARD {
            // Dwell 4x as long on each frequency while sweeping back
            let decrease = (self.consecutive_lost - MAX_LOST_PACKETS_JUMPING_FORWARD) / 4;
            (self.tx_seq as i64 + MAX_LOST_PACKETS_JUMPING_FORWARD as i64 - decrease as i64)
                .rem_euclid(SEQ_COUNT as i64) as u8
        } else {
            // Works because there are as many frequencies as sequence
            // numbers
            self.next_expected_tx_seq()
        };
        if Some(freq_at as usize) != self.freq_index {
            self.update_air_frequency(freq_at as usize);
            return true;
        }
        false
    }

    fn feed_stream_ack(&mut self) -> usize {
        if let Some(ack) = self.switch_ack {
            // Empty the output buffer so the ACK is guaranteed to fit in
            // the next packet. It has priority over everything else.
            self.stream.reset_output();
            return self
                .stream
                .feed_output_cmd(AirCmd::SwitchModeAck, &ack.encode());
        }
        0
    }

    /// Queues the stalest downlink telemetry value, if any.
    fn feed_stream(&mut self, data: &mut RcData, now: TimeMicros) -> usize {
        let mut best: Option<TelemetryId> = None;
        let mut max_score = 0u32;
        for (id, telemetry) in data.downlink_telemetry_iter() {
            if !telemetry.has_value() {
                continue;
            }
            let score = telemetry.data_state.score(now);
            if score > max_score {
                best = Some(id);
                max_score = score;
            }
        }
        if let Some(id) = best {
            let value = data.telemetry(id).value().cloned().expect("has value");
            data.telemetry_mut(id).data_state.sent(None, now);
            return self.stream.feed_output_downlink_telemetry(id, &value);
        }
        0
    }

    fn send_response(&mut self, data: &mut RcData, now: TimeMicros) {
        let mut pkt = RxPacket {
            seq: self.seq,
            tx_seq: self.tx_seq,
            data: [STREAM_START_STOP; DOWNLINK_DATA_BYTES],
        };
        self.seq = (self.seq + 1) % SEQ_COUNT;

        if self.feed_stream_ack() == 0 {
            // Only send regular data when no ACK is pending
            let mut count = self.stream.output_count();
            while count < DOWNLINK_DATA_BYTES {
                let n = self.feed_stream(data, now);
                if n == 0 {
                    break;
                }
                count += n;
            }
        }
        for slot in pkt.data.iter_mut() {
            match self.stream.pop_output() {
                Some(byte) => *slot = byte,
                None => break,
            }
        }
        // Reset the modem before sending; otherwise the TX-done interrupt
        // occasionally never fires
        self.radio.sleep();
        self.state = RxState::Tx;
        let wire = pkt.encode(self.key());
        self.radio.send(&wire);
    }

    fn handle_event(&mut self, event: StreamEvent, data: &mut RcData, now: TimeMicros) {
        match event {
            StreamEvent::Channel { channel, value } => {
                data.update_channel(
                    channel as usize,
                    channel_decode(value, CHANNEL_BITS),
                    now,
                );
            }
            StreamEvent::Telemetry { id, value } => {
                if !id.is_uplink() {
                    debug!("Ignoring downlink telemetry {id:?} on the uplink");
                    return;
                }
                let changed = data.set_telemetry(id, value.clone(), now);
                if id == TelemetryId::PilotName && changed {
                    if let Some(name) = value.as_str() {
                        self.peer_name_update = Some(name.to_string());
                    }
                }
            }
            StreamEvent::Cmd { cmd, payload } => self.handle_cmd(cmd, &payload, now),
        }
    }

    fn handle_cmd(&mut self, cmd: AirCmd, payload: &[u8], now: TimeMicros) {
        match cmd {
            AirCmd::SwitchMode1
            | AirCmd::SwitchMode2
            | AirCmd::SwitchMode3
            | AirCmd::SwitchMode4
            | AirCmd::SwitchMode5 => {
                let mode = cmd.requested_mode().expect("switch opcode");
                // Reject modes we don't support
                if !self.common_modes.contains(mode) {
                    self.stream
                        .feed_output_cmd(AirCmd::RejectMode, &[mode as u8]);
                    return;
                }
                if mode != self.air_mode && Some(mode) != self.switch_ack.map(|a| a.mode) {
                    let count = params::confirmations_for_switch(self.air_mode) as u32;
                    info!(
                        "Got request for switch to mode {}, {} confirmations",
                        mode as u8, count
                    );
                    let at_tx_seq = ((self.tx_seq as u32 + count + self.consecutive_lost)
                        % SEQ_COUNT as u32) as u8;
                    self.switch_ack = Some(SwitchModeAck { mode, at_tx_seq });
                }
            }
            AirCmd::SwitchModeAck => {
                // Only sent on the downlink
            }
            AirCmd::RejectMode => {
                // The air input doesn't request mode changes
            }
            AirCmd::Msp => self.msp_inbound.push(payload.to_vec()),
            AirCmd::Rmp => {
                if let Some(msg) = self.rmp_codec.decode(payload) {
                    if let Some(rmp) = &self.rmp {
                        rmp.lock()
                            .unwrap()
                            .process_message(msg, RmpTransport::Rc, now);
                    }
                }
            }
        }
    }

    fn drain_rmp(&mut self) {
        let Some(rmp) = &self.rmp else {
            return;
        };
        let outbound = rmp.lock().unwrap().take_outbound_rc();
        for msg in outbound {
            if let Some(encoded) = self.rmp_codec.encode(&msg) {
                self.stream.feed_output_cmd(AirCmd::Rmp, &encoded);
            }
        }
    }

    fn receive(&mut self, data: &mut RcData, now: TimeMicros) -> bool {
        let mut buf = [0u8; TxPacket::SIZE];
        let n = self.radio.read(&mut buf);
        let pkt = match TxPacket::decode(&buf[..n], self.key()) {
            Ok(pkt) => pkt,
            Err(err) => {
                warn!("Got invalid frame: {err}");
                // Reading the FIFO leaves the modem idle; re-enable RX
                self.radio.start_rx();
                return false;
            }
        };

        self.next_packet_expected = now + self.cycle_time;
        self.next_packet_deadline =
            self.next_packet_expected + self.cycle_time * CYCLE_TIME_WAIT_FACTOR / 100;
        self.deadline_extended = false;
        self.consecutive_lost = 0;
        self.rx_success += 1;
        self.tx_seq = pkt.seq;

        let signal = self.radio.link_signal();
        let last_error = self.radio.frequency_error();
        self.freq_table
            .as_mut()
            .expect("engine not open")
            .add_error(self.tx_seq as usize, last_error);

        self.send_response(data, now);

        // After the response is on its way: anything further would have
        // delayed it enough to cost the cycle
        if self.reset_rssi {
            self.air.reset_rssi(signal.rssi, signal.snr, signal.lq, now);
            self.reset_rssi = false;
        } else {
            self.air.update_rssi(signal.rssi, signal.snr, signal.lq, now);
        }
        data.input_failsafe.reset_interval(now);
        self.air.on_frame(now);

        for (i, &encoded) in pkt.channels.iter().enumerate() {
            data.update_channel(i, channel_decode(encoded, CHANNEL_BITS), now);
        }
        let events = self.stream.feed_input(pkt.seq, &pkt.data, now);
        for event in events {
            self.handle_event(event, data, now);
        }
        true
    }
}

impl<R: Radio> LinkEngine for RxEngine<R> {
    fn open(&mut self, data: &mut RcData, now: TimeMicros) -> Result<(), RcLinkError> {
        if !self.air.is_bound() {
            return Err(RcLinkError::NotBound);
        }
        let peer_modes = self
            .air
            .pairing_info()
            .supported_modes()
            .ok_or(RcLinkError::NoCommonModes)?;
        self.common_modes = peer_modes
            .intersect(self.config.modes)
            .ok_or(RcLinkError::NoCommonModes)?;
        info!("Open with key {:08x}", self.key());
        self.air_mode_longest = self
            .common_modes
            .longest()
            .ok_or(RcLinkError::NoCommonModes)?;
        self.air_mode = self.air_mode_longest;

        self.seq = 0;
        self.consecutive_lost = 0;
        self.telemetry_fed_index = 0;
        self.reset_rssi = true;
        self.stream = AirStream::new();
        self.start(data, now);
        self.is_open = true;
        Ok(())
    }

    fn update(&mut self, data: &mut RcData, now: TimeMicros) -> bool {
        if !self.is_open {
            return false;
        }
        data.input_failsafe.update(now);
        self.drain_rmp();

        match self.state {
            RxState::Rx => {
                if data.input_failsafe.is_active() {
                    self.switch_ack = None;
                    if self.air_mode != self.air_mode_longest {
                        self.air_mode = self.air_mode_longest;
                        self.update_air_mode(data);
                    }
                    self.air.invalidate_rssi();
                }

                if self.radio.is_rx_done() && self.receive(data, now) {
                    return true;
                }

                if now > self.next_packet_deadline {
                    if !self.deadline_extended && self.radio.is_rx_in_progress() {
                        // A frame is on the air right now; give it one
                        // extra grace period
                        self.next_packet_deadline += self.cycle_time * CYCLE_TIME_WAIT_FACTOR / 100;
                        self.deadline_extended = true;
                        return false;
                    }
                    // Packet was lost
                    self.rx_errors += 1;
                    self.consecutive_lost += 1;
                    self.next_packet_expected = now + self.cycle_time;
                    self.next_packet_deadline =
                        self.next_packet_expected + self.cycle_time * CYCLE_TIME_WAIT_FACTOR / 100;
                    self.deadline_extended = false;
                    warn!(
                        "invalid or lost frame, {} consecutive, {:.2}% error rate",
                        self.consecutive_lost,
                        (self.rx_errors as f64 * 100.0)
                            / ((self.rx_errors + self.rx_success) as f64)
                    );

                    // No downlink telemetry for now; don't interrupt the
                    // RX unless the frequency changes, we might be in the
                    // middle of receiving a frame. First priority is
                    // recovering the control link.
                    if self.prepare_next_receive(data) {
                        self.radio.sleep();
                        self.radio.start_rx();
                    }
                }
                false
            }
            RxState::Tx => {
                if self.radio.is_tx_done() {
                    self.radio.set_payload_size(TxPacket::SIZE);
                    self.prepare_next_receive(data);
                    self.state = RxState::Rx;
                }
                false
            }
        }
    }

    fn close(&mut self) {
        info!("Close");
        self.radio.sleep();
        self.is_open = false;
    }
}
