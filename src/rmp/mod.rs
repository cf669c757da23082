//! # RMP: Reliable Messaging Protocol
//!
//! A thin addressed-datagram layer used for everything that is not
//! control or telemetry: settings, MSP tunneling, device discovery. RMP
//! messages travel inside the air substream (as command items) and,
//! optionally, over a peer-to-peer sidechannel such as WiFi.
//!
//! Messages are `(src, src_port, dst, dst_port, payload)` with an optional
//! 4-byte signature: the last four bytes of
//! `MD5(key ∥ src ∥ src_port ∥ dst ∥ dst_port ∥ payload)`. The signature
//! provides tamper resistance against accidental cross-talk between
//! pairings; it is not cryptographic authentication.

pub mod air;

use std::collections::VecDeque;

use log::{debug, info, warn};

use crate::air::addr::{AirAddr, AirKey, AirPairing};
use crate::air::bind::AirRole;
use crate::constants::MAX_NAME_LENGTH;
use crate::error::RcLinkError;
use crate::util::time::{millis_to_micros, secs_to_micros, TimeMicros};

pub use air::RmpAirCodec;

/// Signature length in bytes.
pub const RMP_SIGNATURE_SIZE: usize = 4;

/// Maximum number of tracked peers.
pub const RMP_MAX_PEERS: usize = 64;

/// Maximum number of open ports.
pub const RMP_MAX_PORTS: usize = 8;

/// Well-known port numbers.
pub mod port {
    /// Device discovery and info.
    pub const DEVICE: u8 = 0x22;
    /// MSP tunneling.
    pub const MSP: u8 = 0x21;
    /// Settings access.
    pub const SETTINGS: u8 = 0x42;
    /// RC link control.
    pub const RC: u8 = 0x43;
}

const PING_INTERVAL: u64 = millis_to_micros(500);
const DEVICE_INFO_INTERVAL: u64 = secs_to_micros(30);
const PEER_EXPIRATION_INTERVAL: u64 = millis_to_micros(3000);

const DEVICE_CODE_REQ_INFO: u8 = 1;
const DEVICE_CODE_INFO: u8 = 2;

/// Transports a message can travel over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RmpTransport {
    /// Peer-to-peer sidechannel (e.g. WiFi).
    P2p,
    /// The RC air link substream.
    Rc,
    /// Message generated and consumed locally.
    Loopback,
}

/// An RMP datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RmpMsg {
    pub src: AirAddr,
    pub src_port: u8,
    pub dst: AirAddr,
    pub dst_port: u8,
    pub payload: Vec<u8>,
    pub signature: Option<[u8; RMP_SIGNATURE_SIZE]>,
}

impl RmpMsg {
    /// Computes the truncated-MD5 signature of this message under `key`.
    pub fn compute_signature(&self, key: AirKey) -> [u8; RMP_SIGNATURE_SIZE] {
        let mut input = Vec::with_capacity(18 + self.payload.len());
        input.extend_from_slice(&key.to_le_bytes());
        input.extend_from_slice(&self.src.0);
        input.push(self.src_port);
        input.extend_from_slice(&self.dst.0);
        input.push(self.dst_port);
        input.extend_from_slice(&self.payload);
        let digest = md5::compute(&input);
        let mut signature = [0u8; RMP_SIGNATURE_SIZE];
        signature.copy_from_slice(&digest.0[16 - RMP_SIGNATURE_SIZE..]);
        signature
    }

    /// Signs the message in place.
    pub fn sign(&mut self, key: AirKey) {
        self.signature = Some(self.compute_signature(key));
    }
}

/// A discovered peer.
#[derive(Debug, Clone)]
pub struct RmpPeer {
    pub addr: AirAddr,
    pub name: String,
    pub role: Option<AirRole>,
    pub pair_addr: AirAddr,
    /// We hold a key that can verify this peer's signed messages.
    pub can_authenticate: bool,
    pub last_seen: TimeMicros,
    pub last_info_update: Option<TimeMicros>,
}

/// An inbound request handed to a port handler.
pub struct RmpReq<'a> {
    /// True iff the message was loopback or carried a valid signature.
    pub is_authenticated: bool,
    pub msg: &'a RmpMsg,
}

/// Queues replies from inside a port handler.
#[derive(Default)]
pub struct RmpResponder {
    replies: Vec<(AirAddr, u8, Vec<u8>)>,
}

impl RmpResponder {
    pub fn reply(&mut self, dst: AirAddr, dst_port: u8, payload: Vec<u8>) {
        self.replies.push((dst, dst_port, payload));
    }
}

type PortHandler = Box<dyn FnMut(&RmpReq<'_>, &mut RmpResponder) + Send>;

struct RmpPort {
    number: u8,
    handler: PortHandler,
}

/// The RMP endpoint of a node.
pub struct Rmp {
    addr: AirAddr,
    name: Option<String>,
    role: Option<AirRole>,
    pairing: Option<AirPairing>,
    peers: Vec<RmpPeer>,
    ports: Vec<RmpPort>,
    outbound_rc: VecDeque<RmpMsg>,
    outbound_p2p: VecDeque<RmpMsg>,
    next_ping: TimeMicros,
    next_device_info: TimeMicros,
}

impl Rmp {
    pub fn new(addr: AirAddr) -> Rmp {
        Rmp {
            addr,
            name: None,
            role: None,
            pairing: None,
            peers: Vec::new(),
            ports: Vec::new(),
            outbound_rc: VecDeque::new(),
            outbound_p2p: VecDeque::new(),
            next_ping: TimeMicros::ZERO,
            next_device_info: TimeMicros::ZERO,
        }
    }

    pub fn addr(&self) -> AirAddr {
        self.addr
    }

    pub fn set_name(&mut self, name: &str) {
        let mut name = name.to_string();
        if name.len() > MAX_NAME_LENGTH {
            let mut end = MAX_NAME_LENGTH;
            while !name.is_char_boundary(end) {
                end -= 1;
            }
            name.truncate(end);
        }
        self.name = Some(name);
    }

    pub fn set_role(&mut self, role: AirRole) {
        self.role = Some(role);
    }

    /// Installs the active pairing; signed traffic from its address can be
    /// verified from now on.
    pub fn set_pairing(&mut self, pairing: Option<AirPairing>) {
        self.pairing = pairing;
        for i in 0..self.peers.len() {
            let can_authenticate = self.key_for(&self.peers[i].addr).is_some();
            self.peers[i].can_authenticate = can_authenticate;
        }
    }

    fn key_for(&self, addr: &AirAddr) -> Option<AirKey> {
        self.pairing
            .filter(|p| p.addr == *addr)
            .map(|p| p.key)
    }

    /// Opens a port with a handler for inbound messages.
    pub fn open_port(
        &mut self,
        number: u8,
        handler: impl FnMut(&RmpReq<'_>, &mut RmpResponder) + Send + 'static,
    ) -> Result<(), RcLinkError> {
        if self.ports.len() >= RMP_MAX_PORTS {
            return Err(RcLinkError::PortsExhausted);
        }
        if self.ports.iter().any(|p| p.number == number) {
            return Err(RcLinkError::PortInUse(number));
        }
        self.ports.push(RmpPort {
            number,
            handler: Box::new(handler),
        });
        Ok(())
    }

    pub fn close_port(&mut self, number: u8) {
        self.ports.retain(|p| p.number != number);
    }

    /// Sends a datagram. Loopback destinations are dispatched immediately;
    /// everything else is queued for its transport and signed when we hold
    /// a key for the destination.
    pub fn send(
        &mut self,
        src_port: u8,
        dst: AirAddr,
        dst_port: u8,
        payload: Vec<u8>,
        now: TimeMicros,
    ) -> bool {
        let mut msg = RmpMsg {
            src: self.addr,
            src_port,
            dst,
            dst_port,
            payload,
            signature: None,
        };
        if dst == self.addr {
            self.dispatch(&msg, true, now);
            return true;
        }
        if let Some(key) = self.key_for(&dst) {
            msg.sign(key);
        }
        self.route(msg)
    }

    fn route(&mut self, msg: RmpMsg) -> bool {
        let broadcast = msg.dst.is_broadcast();
        let to_pair = self
            .pairing
            .map(|p| p.addr == msg.dst)
            .unwrap_or(false);
        if broadcast || to_pair {
            self.outbound_rc.push_back(msg.clone());
        }
        if broadcast || !to_pair {
            self.outbound_p2p.push_back(msg);
        }
        // Bound queues: the sidechannel may not exist and never drain
        while self.outbound_p2p.len() > 32 {
            self.outbound_p2p.pop_front();
        }
        while self.outbound_rc.len() > 32 {
            warn!("RMP air queue overflow, dropping oldest message");
            self.outbound_rc.pop_front();
        }
        true
    }

    /// Messages waiting to be carried over the air substream.
    pub fn take_outbound_rc(&mut self) -> Vec<RmpMsg> {
        self.outbound_rc.drain(..).collect()
    }

    /// Messages waiting for the peer-to-peer sidechannel.
    pub fn take_outbound_p2p(&mut self) -> Vec<RmpMsg> {
        self.outbound_p2p.drain(..).collect()
    }

    /// Periodic work: peer expiry, discovery ping and device-info
    /// announcement. Call once per control-loop tick.
    pub fn update(&mut self, now: TimeMicros) {
        self.remove_stale_peers(now);
        if now >= self.next_ping {
            self.next_ping = now + PING_INTERVAL;
            let msg = RmpMsg {
                src: self.addr,
                src_port: port::DEVICE,
                dst: AirAddr::BROADCAST,
                dst_port: port::DEVICE,
                payload: vec![DEVICE_CODE_REQ_INFO],
                signature: None,
            };
            // Discovery pings only go to the sidechannel; the air link
            // has no bandwidth to waste on them
            self.outbound_p2p.push_back(msg);
            while self.outbound_p2p.len() > 32 {
                self.outbound_p2p.pop_front();
            }
        }
        if now >= self.next_device_info {
            self.next_device_info = now + DEVICE_INFO_INTERVAL;
            let msg = RmpMsg {
                src: self.addr,
                src_port: port::DEVICE,
                dst: AirAddr::BROADCAST,
                dst_port: port::DEVICE,
                payload: self.device_info_payload(),
                signature: None,
            };
            self.route(msg);
        }
    }

    fn device_info_payload(&self) -> Vec<u8> {
        let mut payload = vec![DEVICE_CODE_INFO];
        payload.push(self.role.map(|r| r as u8).unwrap_or(0));
        let pair_addr = self.pairing.map(|p| p.addr).unwrap_or(AirAddr::INVALID);
        payload.extend_from_slice(&pair_addr.0);
        if let Some(name) = &self.name {
            payload.extend_from_slice(name.as_bytes());
        }
        payload.push(0);
        payload
    }

    fn remove_stale_peers(&mut self, now: TimeMicros) {
        let before = self.peers.len();
        self.peers
            .retain(|p| now.micros_since(p.last_seen) < PEER_EXPIRATION_INTERVAL);
        for _ in self.peers.len()..before {
            info!("Removing stale RMP peer");
        }
    }

    fn touch_peer(&mut self, addr: AirAddr, now: TimeMicros) {
        if !addr.is_valid() || addr == self.addr {
            return;
        }
        if let Some(peer) = self.peers.iter_mut().find(|p| p.addr == addr) {
            peer.last_seen = now;
            return;
        }
        if self.peers.len() >= RMP_MAX_PEERS {
            return;
        }
        let can_authenticate = self.key_for(&addr).is_some();
        info!("Added RMP peer {addr} (can authenticate: {can_authenticate})");
        self.peers.push(RmpPeer {
            addr,
            name: String::new(),
            role: None,
            pair_addr: AirAddr::INVALID,
            can_authenticate,
            last_seen: now,
            last_info_update: None,
        });
    }

    pub fn peers(&self) -> &[RmpPeer] {
        &self.peers
    }

    pub fn has_peer(&self, addr: &AirAddr) -> bool {
        self.peers.iter().any(|p| p.addr == *addr)
    }

    /// Processes a message received from a transport.
    pub fn process_message(&mut self, msg: RmpMsg, transport: RmpTransport, now: TimeMicros) {
        if !msg.dst.is_broadcast() && msg.dst != self.addr {
            debug!("Ignoring RMP message for {}", msg.dst);
            return;
        }
        let authenticated = match msg.signature {
            Some(signature) => match self.key_for(&msg.src) {
                Some(key) => {
                    if msg.compute_signature(key) != signature {
                        warn!("Dropping signed RMP message, invalid signature");
                        return;
                    }
                    true
                }
                None => {
                    warn!("Dropping signed RMP message from unknown peer");
                    return;
                }
            },
            None => transport == RmpTransport::Loopback,
        };
        self.touch_peer(msg.src, now);
        self.dispatch(&msg, authenticated, now);
    }

    fn dispatch(&mut self, msg: &RmpMsg, is_authenticated: bool, now: TimeMicros) {
        if msg.dst_port == port::DEVICE {
            self.handle_device_frame(msg, now);
            return;
        }
        let Some(idx) = self.ports.iter().position(|p| p.number == msg.dst_port) else {
            debug!("No handler for RMP port 0x{:02X}", msg.dst_port);
            return;
        };
        let mut responder = RmpResponder::default();
        {
            let req = RmpReq {
                is_authenticated,
                msg,
            };
            let port = &mut self.ports[idx];
            (port.handler)(&req, &mut responder);
        }
        // Replies queued by the handler go out with the handling port as
        // their source
        let src_port = msg.dst_port;
        for (dst, dst_port, payload) in responder.replies {
            self.send(src_port, dst, dst_port, payload, now);
        }
    }

    fn handle_device_frame(&mut self, msg: &RmpMsg, now: TimeMicros) {
        let Some(&code) = msg.payload.first() else {
            return;
        };
        match code {
            DEVICE_CODE_REQ_INFO => {
                let payload = self.device_info_payload();
                let dst = msg.src;
                let mut reply = RmpMsg {
                    src: self.addr,
                    src_port: port::DEVICE,
                    dst,
                    dst_port: port::DEVICE,
                    payload,
                    signature: None,
                };
                if let Some(key) = self.key_for(&dst) {
                    reply.sign(key);
                }
                self.route(reply);
            }
            DEVICE_CODE_INFO => {
                if msg.payload.len() < 8 {
                    return;
                }
                let role = AirRole::from_u8(msg.payload[1]);
                let mut pair_addr = [0u8; 6];
                pair_addr.copy_from_slice(&msg.payload[2..8]);
                let name_bytes = &msg.payload[8..];
                let name_end = name_bytes.iter().position(|&b| b == 0).unwrap_or(0);
                let name = String::from_utf8_lossy(&name_bytes[..name_end]).into_owned();
                if let Some(peer) = self.peers.iter_mut().find(|p| p.addr == msg.src) {
                    peer.role = role;
                    peer.pair_addr = AirAddr(pair_addr);
                    peer.name = name;
                    peer.last_info_update = Some(now);
                }
            }
            _ => debug!("Unknown RMP device frame code {code}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> AirAddr {
        AirAddr([byte; 6])
    }

    #[test]
    fn test_signature_round_trip() {
        let mut msg = RmpMsg {
            src: addr(1),
            src_port: port::SETTINGS,
            dst: addr(2),
            dst_port: port::SETTINGS,
            payload: vec![1, 2, 3],
            signature: None,
        };
        msg.sign(0xDEAD_BEEF);
        let signature = msg.signature.unwrap();
        assert_eq!(msg.compute_signature(0xDEAD_BEEF), signature);
        assert_ne!(msg.compute_signature(0xDEAD_BEE0), signature);
    }

    #[test]
    fn test_signed_message_verified_and_dispatched() {
        let mut rmp = Rmp::new(addr(2));
        rmp.set_pairing(Some(AirPairing::new(addr(1), 0x1234)));
        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        rmp.open_port(port::SETTINGS, move |req, _resp| {
            seen2.lock().unwrap().push((req.is_authenticated, req.msg.payload.clone()));
        })
        .unwrap();

        let mut msg = RmpMsg {
            src: addr(1),
            src_port: port::SETTINGS,
            dst: addr(2),
            dst_port: port::SETTINGS,
            payload: vec![9],
            signature: None,
        };
        msg.sign(0x1234);
        rmp.process_message(msg, RmpTransport::Rc, TimeMicros(1));
        assert_eq!(seen.lock().unwrap().as_slice(), &[(true, vec![9])]);
    }

    #[test]
    fn test_tampered_message_dropped() {
        let mut rmp = Rmp::new(addr(2));
        rmp.set_pairing(Some(AirPairing::new(addr(1), 0x1234)));
        let count = std::sync::Arc::new(std::sync::Mutex::new(0));
        let count2 = count.clone();
        rmp.open_port(port::SETTINGS, move |_req, _resp| {
            *count2.lock().unwrap() += 1;
        })
        .unwrap();

        let mut msg = RmpMsg {
            src: addr(1),
            src_port: port::SETTINGS,
            dst: addr(2),
            dst_port: port::SETTINGS,
            payload: vec![9],
            signature: None,
        };
        msg.sign(0x1234);
        msg.payload = vec![8]; // tamper after signing
        rmp.process_message(msg, RmpTransport::Rc, TimeMicros(1));
        assert_eq!(*count.lock().unwrap(), 0);
    }

    #[test]
    fn test_peer_expiry() {
        let mut rmp = Rmp::new(addr(2));
        let msg = RmpMsg {
            src: addr(3),
            src_port: 0,
            dst: addr(2),
            dst_port: 0x50,
            payload: vec![],
            signature: None,
        };
        rmp.process_message(msg, RmpTransport::P2p, TimeMicros(0));
        assert!(rmp.has_peer(&addr(3)));
        rmp.update(TimeMicros(PEER_EXPIRATION_INTERVAL + 1));
        assert!(!rmp.has_peer(&addr(3)));
    }

    #[test]
    fn test_device_info_exchange() {
        let mut a = Rmp::new(addr(1));
        a.set_name("left");
        a.set_role(AirRole::Tx);
        let mut b = Rmp::new(addr(2));
        b.set_name("right");
        b.set_role(AirRole::Rx);

        // a pings, b answers with its info, a records it
        a.update(TimeMicros(1));
        let pings = a.take_outbound_p2p();
        assert!(!pings.is_empty());
        for msg in pings {
            if msg.payload == vec![DEVICE_CODE_REQ_INFO] {
                b.process_message(msg, RmpTransport::P2p, TimeMicros(2));
            }
        }
        for msg in b.take_outbound_p2p() {
            a.process_message(msg, RmpTransport::P2p, TimeMicros(3));
        }
        let peer = a.peers().iter().find(|p| p.addr == addr(2)).unwrap();
        assert_eq!(peer.name, "right");
        assert_eq!(peer.role, Some(AirRole::Rx));
    }

    #[test]
    fn test_loopback_is_authenticated() {
        let mut rmp = Rmp::new(addr(1));
        let seen = std::sync::Arc::new(std::sync::Mutex::new(false));
        let seen2 = seen.clone();
        rmp.open_port(port::RC, move |req, _resp| {
            *seen2.lock().unwrap() = req.is_authenticated;
        })
        .unwrap();
        rmp.send(port::RC, addr(1), port::RC, vec![1], TimeMicros(1));
        assert!(*seen.lock().unwrap());
    }

    #[test]
    fn test_port_limits() {
        let mut rmp = Rmp::new(addr(1));
        for n in 0..RMP_MAX_PORTS as u8 {
            rmp.open_port(0x60 + n, |_req, _resp| {}).unwrap();
        }
        assert!(matches!(
            rmp.open_port(0x70, |_req, _resp| {}),
            Err(RcLinkError::PortsExhausted)
        ));
        rmp.close_port(0x60);
        assert!(rmp.open_port(0x70, |_req, _resp| {}).is_ok());
        assert!(matches!(
            rmp.open_port(0x70, |_req, _resp| {}),
            Err(RcLinkError::PortInUse(0x70))
        ));
    }
}
