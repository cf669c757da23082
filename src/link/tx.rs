//! # TX Engine
//!
//! The uplink initiator. Once per mode-specific cycle it hops to the slot
//! selected by the frame sequence, transmits an uplink frame with the
//! first four channels plus two substream bytes, then listens for the
//! RX's downlink until the next cycle is due.
//!
//! The engine also initiates dynamic mode switches: it watches the SNR
//! the RX reports through downlink telemetry and, when the heuristic
//! holds for a full second, requests the neighbouring mode through the
//! substream and applies it at the sequence number the RX confirms.

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
use crate::constants::{seq_to_send_uplink, SEQ_COUNT, STREAM_START_STOP, UPLINK_DATA_BYTES};
use crate::constants::CHANNEL_BITS;
use crate::error::RcLinkError;
use crate::link::{AirConfig, LinkEngine};
use crate::radio::{params, Radio};
use crate::rc::channels::channel_encode;
use crate::rc::data::RcData;
use crate::rc::telemetry::{TelemetryId, TelemetryValue};
use crate::rmp::{Rmp, RmpAirCodec, RmpTransport};
use crate::util::time::{millis_to_micros, TimeMicros};

/// How long the switch heuristic must hold before a switch is requested.
const MODE_SWITCH_WAIT_INTERVAL: u64 = millis_to_micros(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    /// Waiting for the next cycle.
    Idle,
    /// Transmitting.
    Tx,
    /// Transmission done, radio still in TX mode.
    TxDone,
    /// Listening for the downlink.
    Rx,
    /// Downlink received, not processed yet.
    RxDone,
}

#[derive(Debug, Default)]
struct ModeSwitch {
    /// Confirmation received from the RX; the switch applies at its seq.
    ack: Option<SwitchModeAck>,
    /// Mode we asked the RX to switch to.
    requested: Option<AirMode>,
    to_faster_scheduled_at: Option<TimeMicros>,
    to_longer_scheduled_at: Option<TimeMicros>,
}

#[derive(Debug)]
struct TxModes {
    common: AirModeMask,
    current: AirMode,
    faster: Option<AirMode>,
    longer: Option<AirMode>,
    longest: AirMode,
    sw: ModeSwitch,
}

/// The uplink engine of a TX node.
pub struct TxEngine<R: Radio> {
    radio: R,
    config: AirConfig,
    air: AirIo,
    stream: AirStream,
    rmp: Option<Arc<Mutex<Rmp>>>,
    rmp_codec: RmpAirCodec,
    freq_table: Option<FreqTable>,
    modes: Option<TxModes>,
    state: TxState,
    seq: u8,
    freq_index: Option<usize>,
    cycle_time: u64,
    next_packet: TimeMicros,
    expecting_downlink: bool,
    consecutive_downlink_lost: u32,
    last_downlink_at: Option<TimeMicros>,
    pending_tx_power: Option<i8>,
    force_stream_feed: bool,
    msp_inbound: Vec<Vec<u8>>,
    peer_name_update: Option<String>,
    is_open: bool,
}

impl<R: Radio> TxEngine<R> {
    pub fn new(radio: R, config: AirConfig, addr: AirAddr) -> TxEngine<R> {
        TxEngine {
            radio,
            config,
            air: AirIo::new(addr),
            stream: AirStream::new(),
            rmp: None,
            rmp_codec: RmpAirCodec::new(addr),
            freq_table: None,
            modes: None,
            state: TxState::Idle,
            seq: 0,
            freq_index: None,
            cycle_time: 0,
            next_packet: TimeMicros::ZERO,
            expecting_downlink: false,
            consecutive_downlink_lost: 0,
            last_downlink_at: None,
            pending_tx_power: None,
            force_stream_feed: false,
            msp_inbound: Vec::new(),
            peer_name_update: None,
            is_open: false,
        }
    }

    /// Attaches the node's RMP endpoint; the engine carries its traffic
    /// over the substream.
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

    /// Requests a TX power change, applied at the start of the next cycle.
    pub fn set_tx_power(&mut self, dbm: i8) {
        self.pending_tx_power = Some(dbm);
    }

    /// Queues an MSP chunk for the peer. One channel or telemetry item is
    /// force-fed afterwards so heavy MSP traffic cannot starve the uplink.
    pub fn send_msp(&mut self, chunk: &[u8]) {
        self.stream.feed_output_cmd(AirCmd::Msp, chunk);
        self.force_stream_feed = true;
    }

    /// MSP chunks received from the peer.
    pub fn take_msp_inbound(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.msp_inbound)
    }

    /// A changed craft name received from the peer, for the caller to
    /// persist next to the pairing.
    pub fn take_peer_name_update(&mut self) -> Option<String> {
        self.peer_name_update.take()
    }

    /// Link state: filtered RSSI/SNR/LQ and frame-rate estimate.
    pub fn air(&self) -> &AirIo {
        &self.air
    }

    pub fn current_mode(&self) -> Option<AirMode> {
        self.modes.as_ref().map(|m| m.current)
    }

    pub fn consecutive_downlink_lost(&self) -> u32 {
        self.consecutive_downlink_lost
    }

    /// Timestamp of the last validated downlink frame.
    pub fn last_downlink_at(&self) -> Option<TimeMicros> {
        self.last_downlink_at
    }

    fn key(&self) -> u32 {
        self.air.pairing().map(|p| p.key).unwrap_or(0)
    }

    fn update_mode(&mut self, data: &mut RcData) {
        let mode = self.modes.as_ref().expect("engine not open").current;
        self.radio.set_mode(mode);
        let modes = self.modes.as_mut().expect("engine not open");
        modes.faster = modes.common.faster(mode);
        modes.longer = modes.common.longer(mode);
        modes.sw = ModeSwitch::default();
        self.cycle_time = params::cycle_time(mode);
        data.output_failsafe
            .set_max_interval(params::tx_failsafe_interval(mode));
    }

    fn update_frequency(&mut self, index: usize) {
        let index = index % SEQ_COUNT as usize;
        if self.freq_index != Some(index) {
            self.freq_index = Some(index);
            let freq = self.freq_table.as_ref().expect("engine not open").freq(index);
            self.radio.set_frequency(freq, 0);
        }
    }

    fn start(&mut self, data: &mut RcData, now: TimeMicros) {
        let key = self.key();
        let center_freq = self.config.band.frequency();
        self.radio.init();
        self.radio.calibrate(center_freq);
        self.update_mode(data);
        if let Some(dbm) = self.pending_tx_power.take() {
            self.radio.set_tx_power(dbm);
        }
        self.radio.set_sync_word(sync_word(key));
        self.freq_table = Some(FreqTable::new(key, center_freq));
        self.freq_index = None;
        self.update_frequency(0);
        self.radio.set_payload_size(TxPacket::SIZE);
        self.consecutive_downlink_lost = 0;
        self.expecting_downlink = false;
        data.output_failsafe.reset_interval(now);
    }

    fn start_switch(&mut self, requested: AirMode) {
        info!("Preparing switch to mode {}", requested as u8);
        self.stream
            .feed_output_cmd(AirCmd::switch_mode(requested), &[]);
    }

    /// Applies the SNR heuristics on a fresh RX-side SNR report.
    fn check_mode_switch(&mut self, snr: i8, now: TimeMicros) {
        let (current, faster, longer, ack_pending) = {
            let modes = self.modes.as_ref().expect("engine not open");
            (
                modes.current,
                modes.faster,
                modes.longer,
                modes.sw.ack.is_some(),
            )
        };
        if ack_pending {
            // Already switching
            //
            // TODO: if we are switching up and should now switch down,
            // cancel the old switch and start the new one.
            return;
        }
        if let Some(longer) = longer {
            if params::should_switch_to_longer(current, snr) {
                let modes = self.modes.as_mut().expect("engine not open");
                modes.sw.to_faster_scheduled_at = None;
                let mut request = false;
                match modes.sw.to_longer_scheduled_at {
                    None => {
                        modes.sw.to_longer_scheduled_at = Some(now + MODE_SWITCH_WAIT_INTERVAL)
                    }
                    Some(at) if now > at => {
                        modes.sw.requested = Some(longer);
                        request = true;
                    }
                    _ => {}
                }
                if request {
                    self.start_switch(longer);
                }
                return;
            }
        }
        if let Some(faster) = faster {
            if params::should_switch_to_faster(current, faster, snr) {
                let modes = self.modes.as_mut().expect("engine not open");
                modes.sw.to_longer_scheduled_at = None;
                let mut request = false;
                match modes.sw.to_faster_scheduled_at {
                    None => {
                        modes.sw.to_faster_scheduled_at = Some(now + MODE_SWITCH_WAIT_INTERVAL)
                    }
                    Some(at) if now > at => {
                        modes.sw.requested = Some(faster);
                        request = true;
                    }
                    _ => {}
                }
                if request {
                    self.start_switch(faster);
                }
            }
        }
    }

    fn handle_event(&mut self, event: StreamEvent, data: &mut RcData, now: TimeMicros) {
        match event {
            StreamEvent::Channel { channel, .. } => {
                // The downlink carries no channel items
                debug!("Ignoring channel {channel} item on the downlink");
            }
            StreamEvent::Telemetry { id, value } => {
                if id.is_uplink() {
                    debug!("Ignoring uplink telemetry {id:?} on the downlink");
                    return;
                }
                let changed = data.set_telemetry(id, value.clone(), now);
                if id == TelemetryId::CraftName && changed {
                    if let Some(name) = value.as_str() {
                        self.peer_name_update = Some(name.to_string());
                    }
                }
                if id == TelemetryId::RxSnr {
                    if let Some(snr) = value.as_i8() {
                        self.check_mode_switch(snr, now);
                    }
                }
            }
            StreamEvent::Cmd { cmd, payload } => self.handle_cmd(cmd, &payload, now),
        }
    }

    fn handle_cmd(&mut self, cmd: AirCmd, payload: &[u8], now: TimeMicros) {
        match cmd {
            AirCmd::SwitchModeAck => {
                let Some(ack) = SwitchModeAck::decode(payload) else {
                    return;
                };
                let modes = self.modes.as_mut().expect("engine not open");
                if Some(ack.mode) == modes.sw.requested {
                    modes.sw.ack = Some(ack);
                    info!(
                        "Got confirmation for switch to mode {} at seq {} (current seq {})",
                        ack.mode as u8, ack.at_tx_seq, self.seq
                    );
                }
            }
            AirCmd::SwitchMode1
            | AirCmd::SwitchMode2
            | AirCmd::SwitchMode3
            | AirCmd::SwitchMode4
            | AirCmd::SwitchMode5 => {
                // Only sent on the uplink
            }
            AirCmd::RejectMode => {
                // The RX rejected a mode change: remove it for the session
                if payload.len() == 1 {
                    if let Some(mode) = AirMode::from_u8(payload[0]) {
                        let modes = self.modes.as_mut().expect("engine not open");
                        modes.common = modes.common.remove(mode);
                        modes.faster = modes.common.faster(modes.current);
                        modes.longer = modes.common.longer(modes.current);
                        warn!("RX rejected mode {}", mode as u8);
                    }
                }
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

    /// Picks the stalest unacknowledged channel or uplink telemetry value
    /// and queues it. Returns the bytes queued (0 = nothing left to send).
    fn feed_stream(
        &mut self,
        data: &mut RcData,
        cur_seq: u8,
        now: TimeMicros,
        count: &mut usize,
    ) -> usize {
        let mut best_channel: Option<usize> = None;
        let mut best_telemetry: Option<TelemetryId> = None;
        let mut max_score = 0u32;

        for ii in 4..data.channels_num() {
            let ch = data.channel(ii).expect("channel in range");
            if ch.data_state.is_ack_received() {
                continue;
            }
            let score = ch.data_state.score(now);
            if score > max_score {
                best_channel = Some(ii);
                max_score = score;
            }
        }
        for (id, telemetry) in data.uplink_telemetry_iter() {
            if !telemetry.has_value() || telemetry.data_state.is_ack_received() {
                continue;
            }
            let score = telemetry.data_state.score(now);
            if score > max_score {
                best_channel = None;
                best_telemetry = Some(id);
                max_score = score;
            }
        }

        if let Some(ii) = best_channel {
            let value = data.channel_value(ii);
            let n = self
                .stream
                .feed_output_channel(ii as u8, channel_encode(value, CHANNEL_BITS));
            *count += n;
            let seq = seq_to_send_uplink(cur_seq, *count);
            data.channel_mut(ii)
                .expect("channel in range")
                .data_state
                .sent(Some(seq), now);
            return n;
        }
        if let Some(id) = best_telemetry {
            let value = data.telemetry(id).value().cloned().expect("has value");
            let n = self.stream.feed_output_uplink_telemetry(id, &value);
            *count += n;
            let seq = seq_to_send_uplink(cur_seq, *count);
            data.telemetry_mut(id).data_state.sent(Some(seq), now);
            return n;
        }
        0
    }

    fn send_control_packet(&mut self, data: &mut RcData, now: TimeMicros) {
        if let Some(dbm) = self.pending_tx_power.take() {
            self.radio.set_tx_power(dbm);
        }

        if data.output_failsafe.is_active() {
            data.reset_air_acks();

            data.set_telemetry(TelemetryId::RxRssiAnt1, TelemetryValue::I8(0), now);
            data.set_telemetry(TelemetryId::RxRssiAnt2, TelemetryValue::I8(0), now);
            data.set_telemetry(TelemetryId::RxSnr, TelemetryValue::I8(0), now);
            data.set_telemetry(TelemetryId::RxLinkQuality, TelemetryValue::I8(0), now);

            // When the RX loses us it falls back to the longest common
            // mode, so both ends eventually see each other again
            let modes = self.modes.as_mut().expect("engine not open");
            modes.sw.ack = None;
            if modes.current != modes.longest {
                modes.current = modes.longest;
                self.update_mode(data);
            }
        }

        if let Some(ack) = self.modes.as_ref().expect("engine not open").sw.ack {
            if ack.proceed(self.seq) {
                self.modes.as_mut().expect("engine not open").current = ack.mode;
                info!("Switch to mode {} for seq {}", ack.mode as u8, self.seq);
                self.update_mode(data);
            }
        }
        self.update_frequency(self.seq as usize);
        self.air.on_frame(now);
        if self.expecting_downlink {
            debug!("Missing or invalid downlink packet");
            self.consecutive_downlink_lost += 1;
            data.stop_air_acks();
        }
        self.next_packet = now + self.cycle_time;
        self.expecting_downlink = true;

        // If the input is in failsafe, the connection to the handset is
        // gone. We keep hopping but stop sending control frames, which is
        // what lets the RX detect the condition and enter failsafe too.
        if data.input_failsafe.is_active() {
            self.state = TxState::Idle;
            return;
        }

        let cur_seq = self.seq;
        self.seq = (self.seq + 1) % SEQ_COUNT;

        let mut pkt = TxPacket {
            seq: cur_seq,
            channels: [
                channel_encode(data.channel_value(0), CHANNEL_BITS),
                channel_encode(data.channel_value(1), CHANNEL_BITS),
                channel_encode(data.channel_value(2), CHANNEL_BITS),
                channel_encode(data.channel_value(3), CHANNEL_BITS),
            ],
            // We might have no data to send; bare sentinels keep the
            // stream ready to accept data
            data: [STREAM_START_STOP; UPLINK_DATA_BYTES],
        };

        let mut count = self.stream.output_count();
        if self.force_stream_feed {
            self.force_stream_feed = false;
            self.feed_stream(data, cur_seq, now, &mut count);
        }
        while count < UPLINK_DATA_BYTES {
            if self.feed_stream(data, cur_seq, now, &mut count) == 0 {
                break;
            }
        }
        for slot in pkt.data.iter_mut() {
            match self.stream.pop_output() {
                Some(byte) => *slot = byte,
                None => break,
            }
        }

        let wire = pkt.encode(self.key());
        self.radio.send(&wire);
    }

    fn recv_packet(&mut self, data: &mut RcData, now: TimeMicros) -> bool {
        let mut buf = [0u8; RxPacket::SIZE];
        let n = self.radio.read(&mut buf);
        match RxPacket::decode(&buf[..n], self.key()) {
            Ok(pkt) => {
                let events = self.stream.feed_input(pkt.seq, &pkt.data, now);
                for event in events {
                    self.handle_event(event, data, now);
                }
                let signal = self.radio.link_signal();
                self.air.update_rssi(signal.rssi, signal.snr, signal.lq, now);
                self.consecutive_downlink_lost = 0;
                self.expecting_downlink = false;
                self.update_frequency(self.seq as usize);
                data.output_failsafe.reset_interval(now);
                self.last_downlink_at = Some(now);

                // Works because every cycle has both an uplink and a
                // downlink stage
                data.ack_air_seq(pkt.tx_seq);
                true
            }
            Err(err) => {
                warn!("Got invalid packet: {err}");
                false
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
}

impl<R: Radio> LinkEngine for TxEngine<R> {
    fn open(&mut self, data: &mut RcData, now: TimeMicros) -> Result<(), RcLinkError> {
        if !self.air.is_bound() {
            return Err(RcLinkError::NotBound);
        }
        let peer_modes = self
            .air
            .pairing_info()
            .supported_modes()
            .ok_or(RcLinkError::NoCommonModes)?;
        let common = peer_modes
            .intersect(self.config.modes)
            .ok_or(RcLinkError::NoCommonModes)?;
        let longest = common.longest().ok_or(RcLinkError::NoCommonModes)?;
        self.modes = Some(TxModes {
            common,
            current: longest,
            faster: common.faster(longest),
            longer: common.longer(longest),
            longest,
            sw: ModeSwitch::default(),
        });
        info!("Open with key {:08x}", self.key());
        self.seq = 0;
        self.force_stream_feed = false;
        self.next_packet = TimeMicros::ZERO;
        self.state = TxState::Idle;
        self.stream = AirStream::new();
        self.start(data, now);
        self.is_open = true;
        Ok(())
    }

    fn update(&mut self, data: &mut RcData, now: TimeMicros) -> bool {
        if !self.is_open {
            return false;
        }
        data.output_failsafe.update(now);
        self.drain_rmp();

        // When the next scheduled packet is due, stop everything else and
        // start transmitting
        if now > self.next_packet {
            self.state = TxState::Tx;
            self.send_control_packet(data, now);
        }

        let mut updated = false;
        match self.state {
            TxState::Idle => {}
            TxState::Tx => {
                if self.radio.is_tx_done() {
                    self.state = TxState::TxDone;
                }
            }
            TxState::TxDone => {
                // Sleeping before switching to RX resets the FIFO while
                // adding minimal overhead: we would need to leave TX mode
                // anyway to change the payload size
                self.radio.sleep();
                self.radio.set_payload_size(RxPacket::SIZE);
                self.radio.start_rx();
                self.state = TxState::Rx;
            }
            TxState::Rx => {
                if self.radio.is_rx_done() {
                    self.state = TxState::RxDone;
                }
            }
            TxState::RxDone => {
                updated = self.recv_packet(data, now);
                self.state = TxState::Idle;
            }
        }
        updated
    }

    fn close(&mut self) {
        info!("Close");
        self.radio.sleep();
        self.is_open = false;
    }
}
