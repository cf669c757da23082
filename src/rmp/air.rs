//! RMP transport over the air substream.
//!
//! The substream carries 2–3 bytes per frame, so the air form of an RMP
//! message elides everything it can: source and destination addresses are
//! omitted when they match the bound pair, ports are omitted when zero,
//! and a flags byte says what is present.

use log::warn;

use crate::air::addr::AirAddr;
use crate::constants::ADDR_LENGTH;
use crate::rmp::{RmpMsg, RMP_SIGNATURE_SIZE};

const FLAG_SRC_ADDR: u8 = 1 << 0;
const FLAG_SRC_PORT: u8 = 1 << 1;
const FLAG_DST_ADDR: u8 = 1 << 2;
const FLAG_DST_PORT: u8 = 1 << 3;
const FLAG_SIGNED: u8 = 1 << 4;
const FLAG_BROADCAST: u8 = 1 << 5;

/// Largest encoded message the codec will produce or accept.
const MAX_ENCODED_SIZE: usize = 180;

/// Encodes and decodes RMP messages for the substream of one engine.
#[derive(Debug, Clone, Copy)]
pub struct RmpAirCodec {
    /// Our own address: implied source of outbound messages.
    addr: AirAddr,
    /// The bound peer: implied destination of outbound and implied source
    /// of inbound messages.
    bound_addr: AirAddr,
}

impl RmpAirCodec {
    pub fn new(addr: AirAddr) -> RmpAirCodec {
        RmpAirCodec {
            addr,
            bound_addr: AirAddr::INVALID,
        }
    }

    pub fn set_bound_addr(&mut self, bound_addr: Option<AirAddr>) {
        self.bound_addr = bound_addr.unwrap_or(AirAddr::INVALID);
    }

    /// Encodes a message for the substream. Returns `None` for messages
    /// that cannot travel over the air: only traffic for the bound peer or
    /// broadcasts is carried (there is no relaying).
    pub fn encode(&self, msg: &RmpMsg) -> Option<Vec<u8>> {
        if !msg.dst.is_broadcast() && msg.dst != self.bound_addr {
            return None;
        }
        let mut buf = Vec::with_capacity(16 + msg.payload.len());
        let mut flags = 0u8;
        buf.push(0); // flags, patched below

        if msg.src != self.addr {
            flags |= FLAG_SRC_ADDR;
            buf.extend_from_slice(&msg.src.0);
        }
        if msg.src_port != 0 {
            flags |= FLAG_SRC_PORT;
            buf.push(msg.src_port);
        }
        if msg.dst != self.bound_addr {
            flags |= FLAG_DST_ADDR;
            if msg.dst.is_broadcast() {
                flags |= FLAG_BROADCAST;
            } else {
                buf.extend_from_slice(&msg.dst.0);
            }
        }
        if msg.dst_port != 0 {
            flags |= FLAG_DST_PORT;
            buf.push(msg.dst_port);
        }
        if let Some(signature) = msg.signature {
            flags |= FLAG_SIGNED;
            buf.extend_from_slice(&signature);
        }
        if buf.len() + msg.payload.len() > MAX_ENCODED_SIZE {
            warn!(
                "Can't send RMP payload of {} bytes over the air",
                msg.payload.len()
            );
            return None;
        }
        buf.extend_from_slice(&msg.payload);
        buf[0] = flags;
        Some(buf)
    }

    /// Decodes a substream-carried message.
    pub fn decode(&self, data: &[u8]) -> Option<RmpMsg> {
        let flags = *data.first()?;
        let mut pos = 1usize;

        fn take<'a>(data: &'a [u8], pos: &mut usize, n: usize) -> Option<&'a [u8]> {
            if data.len() - *pos < n {
                return None;
            }
            let head = &data[*pos..*pos + n];
            *pos += n;
            Some(head)
        }

        let src = if flags & FLAG_SRC_ADDR != 0 {
            let mut addr = [0u8; ADDR_LENGTH];
            addr.copy_from_slice(take(data, &mut pos, ADDR_LENGTH)?);
            AirAddr(addr)
        } else {
            self.bound_addr
        };
        let src_port = if flags & FLAG_SRC_PORT != 0 {
            take(data, &mut pos, 1)?[0]
        } else {
            0
        };
        let dst = if flags & FLAG_DST_ADDR != 0 {
            if flags & FLAG_BROADCAST != 0 {
                AirAddr::BROADCAST
            } else {
                let mut addr = [0u8; ADDR_LENGTH];
                addr.copy_from_slice(take(data, &mut pos, ADDR_LENGTH)?);
                AirAddr(addr)
            }
        } else {
            self.addr
        };
        let dst_port = if flags & FLAG_DST_PORT != 0 {
            take(data, &mut pos, 1)?[0]
        } else {
            0
        };
        let signature = if flags & FLAG_SIGNED != 0 {
            let mut sig = [0u8; RMP_SIGNATURE_SIZE];
            sig.copy_from_slice(take(data, &mut pos, RMP_SIGNATURE_SIZE)?);
            Some(sig)
        } else {
            None
        };

        Some(RmpMsg {
            src,
            src_port,
            dst,
            dst_port,
            payload: data[pos..].to_vec(),
            signature,
        })
    }
}
