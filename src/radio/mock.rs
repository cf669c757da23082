//! # Mock Radio
//!
//! An in-memory transceiver pair for tests and the CLI simulator. All
//! endpoints created from one [`SharedMedium`] share an "air": a packet
//! sent by one endpoint is delivered to every other endpoint that is
//! currently receiving with a matching mode, sync word, payload size and
//! tuned frequency. A configurable drop hook injects loss.
//!
//! Transmissions complete instantly; all protocol timing lives in the
//! engines' own deadlines, which are driven by the caller's clock.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use log::trace;

use crate::air::mode::AirMode;
use crate::radio::{LinkSignal, Radio};

/// Frequency offset below which two tuned radios still hear each other.
/// Well under the 125 kHz hop step, so neighbouring slots never overlap.
const CAPTURE_WINDOW_HZ: i64 = 50_000;

/// Decides whether a packet is dropped: receives the sender's endpoint
/// index and the payload.
pub type DropHook = Box<dyn FnMut(usize, &[u8]) -> bool + Send>;

struct DeliveredPacket {
    data: Vec<u8>,
    signal: LinkSignal,
    freq_error: i32,
}

#[derive(Default)]
struct Endpoint {
    mode: Option<AirMode>,
    tuned_freq: u64,
    sync_word: u8,
    payload_size: usize,
    tx_power: i8,
    rx_enabled: bool,
    tx_done: bool,
    rx_in_progress: bool,
    /// Packets on the air towards this endpoint; they reach `rx_queue`
    /// only if the endpoint is listening with a matching payload size
    /// when it next polls.
    in_flight: VecDeque<DeliveredPacket>,
    rx_queue: VecDeque<DeliveredPacket>,
    last_read: Option<DeliveredPacket>,
    /// Signal this endpoint measures on packets it receives.
    incoming_signal: LinkSignal,
    /// Frequency error this endpoint measures on packets it receives.
    incoming_freq_error: i32,
    sent: u64,
    delivered: u64,
}

#[derive(Default)]
struct MediumState {
    endpoints: Vec<Endpoint>,
    drop_hook: Option<DropHook>,
    dropped: u64,
}

/// Moves in-flight packets into the receive queue if the endpoint is
/// listening for them; packets nobody was listening for pass by.
fn pump(ep: &mut Endpoint) {
    while let Some(pkt) = ep.in_flight.pop_front() {
        if ep.rx_enabled && ep.payload_size == pkt.data.len() {
            ep.delivered += 1;
            ep.rx_queue.push_back(pkt);
        }
    }
}

/// The shared "air" connecting mock radios.
#[derive(Clone, Default)]
pub struct SharedMedium {
    state: Arc<Mutex<MediumState>>,
}

impl SharedMedium {
    pub fn new() -> SharedMedium {
        SharedMedium::default()
    }

    /// Registers a new endpoint and returns its radio.
    pub fn radio(&self) -> MockRadio {
        let mut state = self.state.lock().unwrap();
        state.endpoints.push(Endpoint {
            incoming_signal: LinkSignal {
                rssi: -60,
                snr: 40,
                lq: 100,
            },
            ..Endpoint::default()
        });
        MockRadio {
            state: Arc::clone(&self.state),
            index: state.endpoints.len() - 1,
        }
    }

    /// Sets the signal readings an endpoint reports for received packets.
    pub fn set_signal(&self, endpoint: usize, signal: LinkSignal) {
        self.state.lock().unwrap().endpoints[endpoint].incoming_signal = signal;
    }

    /// Sets the frequency error an endpoint measures on received packets.
    pub fn set_freq_error(&self, endpoint: usize, error: i32) {
        self.state.lock().unwrap().endpoints[endpoint].incoming_freq_error = error;
    }

    /// Installs a packet drop hook; return true from it to drop.
    pub fn set_drop_hook(&self, hook: impl FnMut(usize, &[u8]) -> bool + Send + 'static) {
        self.state.lock().unwrap().drop_hook = Some(Box::new(hook));
    }

    pub fn clear_drop_hook(&self) {
        self.state.lock().unwrap().drop_hook = None;
    }

    /// Forces the rx-in-progress flag of an endpoint (deadline-extension
    /// tests).
    pub fn set_rx_in_progress(&self, endpoint: usize, in_progress: bool) {
        self.state.lock().unwrap().endpoints[endpoint].rx_in_progress = in_progress;
    }

    pub fn sent_count(&self, endpoint: usize) -> u64 {
        self.state.lock().unwrap().endpoints[endpoint].sent
    }

    pub fn delivered_count(&self, endpoint: usize) -> u64 {
        self.state.lock().unwrap().endpoints[endpoint].delivered
    }

    pub fn dropped_count(&self) -> u64 {
        self.state.lock().unwrap().dropped
    }

    /// The frequency an endpoint is currently tuned to (for assertions).
    pub fn tuned_frequency(&self, endpoint: usize) -> u64 {
        self.state.lock().unwrap().endpoints[endpoint].tuned_freq
    }

    /// The TX power an endpoint last configured, in dBm.
    pub fn tx_power(&self, endpoint: usize) -> i8 {
        self.state.lock().unwrap().endpoints[endpoint].tx_power
    }
}

/// One endpoint of a [`SharedMedium`].
pub struct MockRadio {
    state: Arc<Mutex<MediumState>>,
    index: usize,
}

impl MockRadio {
    pub fn endpoint_index(&self) -> usize {
        self.index
    }
}

impl Radio for MockRadio {
    fn init(&mut self) {}

    fn sleep(&mut self) {
        let mut state = self.state.lock().unwrap();
        let ep = &mut state.endpoints[self.index];
        ep.rx_enabled = false;
        // Sleeping resets the FIFO
        ep.rx_queue.clear();
    }

    fn shutdown(&mut self) {
        self.sleep();
    }

    fn calibrate(&mut self, _center_freq: u64) {}

    fn set_mode(&mut self, mode: AirMode) {
        self.state.lock().unwrap().endpoints[self.index].mode = Some(mode);
    }

    fn set_bind_mode(&mut self) {
        use crate::air::bind::BindPacket;
        use crate::constants::BIND_SYNC_WORD;
        let mut state = self.state.lock().unwrap();
        let ep = &mut state.endpoints[self.index];
        // Same parameters as the fast link mode, full-size payload,
        // low power
        ep.mode = Some(AirMode::Mode2);
        ep.sync_word = BIND_SYNC_WORD;
        ep.payload_size = BindPacket::SIZE;
        ep.tx_power = 1;
    }

    fn set_frequency(&mut self, freq: u64, error_hint: i32) {
        let mut state = self.state.lock().unwrap();
        state.endpoints[self.index].tuned_freq = (freq as i64 - error_hint as i64) as u64;
    }

    fn set_sync_word(&mut self, word: u8) {
        self.state.lock().unwrap().endpoints[self.index].sync_word = word;
    }

    fn set_tx_power(&mut self, dbm: i8) {
        self.state.lock().unwrap().endpoints[self.index].tx_power = dbm;
    }

    fn set_payload_size(&mut self, size: usize) {
        self.state.lock().unwrap().endpoints[self.index].payload_size = size;
    }

    fn start_rx(&mut self) {
        self.state.lock().unwrap().endpoints[self.index].rx_enabled = true;
    }

    fn send(&mut self, buf: &[u8]) {
        let mut state = self.state.lock().unwrap();
        state.endpoints[self.index].tx_done = false;
        let dropped = match &mut state.drop_hook {
            Some(hook) => hook(self.index, buf),
            None => false,
        };
        if dropped {
            state.dropped += 1;
        }

        let sender = &state.endpoints[self.index];
        let s_freq = sender.tuned_freq as i64;
        let s_sync = sender.sync_word;
        let s_mode = sender.mode;

        let mut deliveries = Vec::new();
        if !dropped {
            for (i, ep) in state.endpoints.iter().enumerate() {
                if i == self.index {
                    continue;
                }
                if ep.mode != s_mode || ep.sync_word != s_sync {
                    continue;
                }
                if (ep.tuned_freq as i64 - s_freq).abs() > CAPTURE_WINDOW_HZ {
                    continue;
                }
                deliveries.push(i);
            }
        }
        for i in deliveries {
            let ep = &mut state.endpoints[i];
            trace!("mock air: {} -> {} ({} bytes)", self.index, i, buf.len());
            ep.in_flight.push_back(DeliveredPacket {
                data: buf.to_vec(),
                signal: ep.incoming_signal,
                freq_error: ep.incoming_freq_error,
            });
        }

        let ep = &mut state.endpoints[self.index];
        ep.sent += 1;
        ep.tx_done = true;
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        let mut state = self.state.lock().unwrap();
        let ep = &mut state.endpoints[self.index];
        pump(ep);
        match ep.rx_queue.pop_front() {
            Some(pkt) => {
                let n = pkt.data.len().min(buf.len());
                buf[..n].copy_from_slice(&pkt.data[..n]);
                ep.last_read = Some(pkt);
                n
            }
            None => 0,
        }
    }

    fn is_tx_done(&mut self) -> bool {
        // Level-triggered: stays set until the next transmission starts
        self.state.lock().unwrap().endpoints[self.index].tx_done
    }

    fn is_rx_done(&mut self) -> bool {
        let mut state = self.state.lock().unwrap();
        let ep = &mut state.endpoints[self.index];
        pump(ep);
        !ep.rx_queue.is_empty()
    }

    fn is_rx_in_progress(&mut self) -> bool {
        self.state.lock().unwrap().endpoints[self.index].rx_in_progress
    }

    fn link_signal(&mut self) -> LinkSignal {
        let state = self.state.lock().unwrap();
        let ep = &state.endpoints[self.index];
        ep.last_read
            .as_ref()
            .map(|p| p.signal)
            .unwrap_or(ep.incoming_signal)
    }

    fn frequency_error(&mut self) -> i32 {
        let state = self.state.lock().unwrap();
        let ep = &state.endpoints[self.index];
        ep.last_read
            .as_ref()
            .map(|p| p.freq_error)
            .unwrap_or(ep.incoming_freq_error)
    }
}
