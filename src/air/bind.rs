//! # Bind Packet Codec
//!
//! The 64-byte packet exchanged on the bind channel. Its size equals the
//! largest frame of the protocol, and the radio payload size on the bind
//! channel is fixed to it.
//!
//! ```text
//! offset  size  field
//! 0       3     ASCII prefix "RCL"
//! 3       1     protocol version
//! 4       6     sender address
//! 10      4     pairing key (LE)
//! 14      1     role
//! 15      7     info block (capabilities, power, channels, modes)
//! 22      33    name, zero padded
//! 55      8     reserved, must be zero
//! 63      1     CRC-8/DVB-S2 over bytes 0..63 (unkeyed)
//! ```

use crate::air::addr::{AirAddr, AirKey, AirPairing};
use crate::air::caps::AirInfo;
use crate::constants::{
    ADDR_LENGTH, MAX_NAME_LENGTH, MAX_PACKET_SIZE, PROTOCOL_PREFIX, PROTOCOL_VERSION,
};
use crate::error::FrameError;
use crate::util::crc::crc8_dvb_s2;

/// Role a node advertises during bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AirRole {
    Tx = 1,
    Rx = 2,
    /// Used by an RX to tell the TX it has seen the request but the user
    /// still has to confirm on the RX side.
    RxAwaitingConfirmation = 3,
}

impl AirRole {
    pub fn from_u8(value: u8) -> Option<AirRole> {
        match value {
            1 => Some(AirRole::Tx),
            2 => Some(AirRole::Rx),
            3 => Some(AirRole::RxAwaitingConfirmation),
            _ => None,
        }
    }
}

/// A decoded bind packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindPacket {
    pub version: u8,
    pub addr: AirAddr,
    pub key: AirKey,
    pub role: AirRole,
    pub info: AirInfo,
    /// Human-readable node name, at most [`MAX_NAME_LENGTH`] bytes.
    pub name: String,
}

impl BindPacket {
    pub const SIZE: usize = MAX_PACKET_SIZE;

    pub fn new(addr: AirAddr, key: AirKey, role: AirRole, info: AirInfo, name: &str) -> Self {
        let mut name = name.to_string();
        if name.len() > MAX_NAME_LENGTH {
            let mut end = MAX_NAME_LENGTH;
            while !name.is_char_boundary(end) {
                end -= 1;
            }
            name.truncate(end);
        }
        BindPacket {
            version: PROTOCOL_VERSION,
            addr,
            key,
            role,
            info,
            name,
        }
    }

    /// The pairing this packet offers: the sender's address plus the key.
    pub fn pairing(&self) -> AirPairing {
        AirPairing::new(self.addr, self.key)
    }

    /// Serializes the packet and writes the CRC.
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..3].copy_from_slice(&PROTOCOL_PREFIX);
        buf[3] = self.version;
        buf[4..10].copy_from_slice(&self.addr.0);
        buf[10..14].copy_from_slice(&self.key.to_le_bytes());
        buf[14] = self.role as u8;
        self.info.write_to(&mut buf[15..22]);
        let name = self.name.as_bytes();
        let n = name.len().min(MAX_NAME_LENGTH);
        buf[22..22 + n].copy_from_slice(&name[..n]);
        // bytes 55..63 reserved, already zero
        buf[63] = crc8_dvb_s2(0, &buf[0..63]);
        buf
    }

    /// Parses and validates a received bind packet.
    ///
    /// Rejects wrong size, wrong prefix, a version newer than ours, a bad
    /// CRC and unknown role bytes, in that order.
    pub fn decode(buf: &[u8]) -> Result<BindPacket, FrameError> {
        if buf.len() != Self::SIZE {
            return Err(FrameError::InvalidSize {
                expected: Self::SIZE,
                got: buf.len(),
            });
        }
        if buf[0..3] != PROTOCOL_PREFIX {
            return Err(FrameError::InvalidPrefix);
        }
        let version = buf[3];
        if version > PROTOCOL_VERSION {
            return Err(FrameError::UnsupportedVersion(version));
        }
        if crc8_dvb_s2(0, &buf[0..63]) != buf[63] {
            return Err(FrameError::InvalidCrc);
        }
        let role = AirRole::from_u8(buf[14]).ok_or(FrameError::InvalidRole(buf[14]))?;

        let mut addr = [0u8; ADDR_LENGTH];
        addr.copy_from_slice(&buf[4..10]);
        let key = u32::from_le_bytes([buf[10], buf[11], buf[12], buf[13]]);
        let info = AirInfo::parse(&buf[15..22]);

        let name_bytes = &buf[22..22 + MAX_NAME_LENGTH + 1];
        let name_len = name_bytes.iter().position(|&b| b == 0).unwrap_or(MAX_NAME_LENGTH);
        let name = String::from_utf8_lossy(&name_bytes[..name_len]).into_owned();

        Ok(BindPacket {
            version,
            addr: AirAddr(addr),
            key,
            role,
            info,
            name,
        })
    }
}
