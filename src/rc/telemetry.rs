//! Typed telemetry values.
//!
//! Telemetry slots are identified by a one-byte id. Ids with bit 7 set
//! travel uplink (TX → RX); the rest travel downlink. Each id has a fixed
//! value type; integer values have a fixed wire size, strings are
//! NUL-terminated on the wire.
//!
//! SNR values are carried in 0.25 dB units.

use crate::rc::data_state::DataState;
use crate::util::time::TimeMicros;

/// Bit marking an id as uplink.
pub const TELEMETRY_UPLINK_MASK: u8 = 0x80;

/// Multiplier for SNR telemetry: values are in 0.25 dB units.
pub const TELEMETRY_SNR_MULTIPLIER: i32 = 4;

/// Maximum telemetry string length (excluding the NUL terminator).
pub const TELEMETRY_MAX_STRING: usize = 32;

/// Wire type of a telemetry value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryKind {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    Str,
}

impl TelemetryKind {
    /// Fixed wire size, or `None` for strings.
    pub fn wire_size(self) -> Option<usize> {
        match self {
            TelemetryKind::U8 | TelemetryKind::I8 => Some(1),
            TelemetryKind::U16 | TelemetryKind::I16 => Some(2),
            TelemetryKind::U32 | TelemetryKind::I32 => Some(4),
            TelemetryKind::Str => None,
        }
    }
}

macro_rules! telemetry_ids {
    ($( $name:ident = $id:expr, $kind:ident ; )*) => {
        /// Telemetry slot identifiers.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum TelemetryId {
            $( $name = $id, )*
        }

        impl TelemetryId {
            pub fn from_u8(value: u8) -> Option<TelemetryId> {
                $(
                    if value == $id {
                        return Some(TelemetryId::$name);
                    }
                )*
                None
            }

            /// Value type carried by this id.
            pub fn kind(self) -> TelemetryKind {
                match self {
                    $( TelemetryId::$name => TelemetryKind::$kind, )*
                }
            }
        }
    };
}

telemetry_ids! {
    // Downlink: RX → TX
    RxRssiAnt1 = 0x01, I8;
    RxRssiAnt2 = 0x02, I8;
    RxLinkQuality = 0x03, I8;
    RxSnr = 0x04, I8;
    RxActiveAnt = 0x05, U8;
    RxRfPower = 0x06, I8;
    BatVoltage = 0x07, U16;
    Current = 0x08, I16;
    FlightModeName = 0x09, Str;
    CraftName = 0x0A, Str;
    GpsLat = 0x0B, I32;
    GpsLon = 0x0C, I32;
    GpsAlt = 0x0D, I32;
    GpsNumSats = 0x0E, U8;

    // Uplink: TX → RX
    TxRssiAnt1 = 0x81, I8;
    TxLinkQuality = 0x82, I8;
    TxSnr = 0x83, I8;
    TxRfPower = 0x84, I8;
    PilotName = 0x85, Str;
}

/// Downlink ids in declaration order; indexes the downlink slot array.
pub const DOWNLINK_IDS: [TelemetryId; 14] = [
    TelemetryId::RxRssiAnt1,
    TelemetryId::RxRssiAnt2,
    TelemetryId::RxLinkQuality,
    TelemetryId::RxSnr,
    TelemetryId::RxActiveAnt,
    TelemetryId::RxRfPower,
    TelemetryId::BatVoltage,
    TelemetryId::Current,
    TelemetryId::FlightModeName,
    TelemetryId::CraftName,
    TelemetryId::GpsLat,
    TelemetryId::GpsLon,
    TelemetryId::GpsAlt,
    TelemetryId::GpsNumSats,
];

/// Uplink ids in declaration order; indexes the uplink slot array.
pub const UPLINK_IDS: [TelemetryId; 5] = [
    TelemetryId::TxRssiAnt1,
    TelemetryId::TxLinkQuality,
    TelemetryId::TxSnr,
    TelemetryId::TxRfPower,
    TelemetryId::PilotName,
];

impl TelemetryId {
    pub fn is_uplink(self) -> bool {
        (self as u8) & TELEMETRY_UPLINK_MASK != 0
    }

    /// Index into the direction-specific slot array.
    pub fn index(self) -> usize {
        ((self as u8) & !TELEMETRY_UPLINK_MASK) as usize - 1
    }
}

/// A typed telemetry value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelemetryValue {
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    Str(String),
}

impl TelemetryValue {
    pub fn kind(&self) -> TelemetryKind {
        match self {
            TelemetryValue::U8(_) => TelemetryKind::U8,
            TelemetryValue::I8(_) => TelemetryKind::I8,
            TelemetryValue::U16(_) => TelemetryKind::U16,
            TelemetryValue::I16(_) => TelemetryKind::I16,
            TelemetryValue::U32(_) => TelemetryKind::U32,
            TelemetryValue::I32(_) => TelemetryKind::I32,
            TelemetryValue::Str(_) => TelemetryKind::Str,
        }
    }

    /// Serializes the value. Integers are little-endian; strings are
    /// truncated to [`TELEMETRY_MAX_STRING`] and NUL-terminated.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            TelemetryValue::U8(v) => vec![*v],
            TelemetryValue::I8(v) => vec![*v as u8],
            TelemetryValue::U16(v) => v.to_le_bytes().to_vec(),
            TelemetryValue::I16(v) => v.to_le_bytes().to_vec(),
            TelemetryValue::U32(v) => v.to_le_bytes().to_vec(),
            TelemetryValue::I32(v) => v.to_le_bytes().to_vec(),
            TelemetryValue::Str(s) => {
                let mut bytes: Vec<u8> = s.bytes().take(TELEMETRY_MAX_STRING).collect();
                bytes.push(0);
                bytes
            }
        }
    }

    /// Parses a value of the given kind. Integer kinds require the exact
    /// wire size; strings take the whole buffer up to the NUL.
    pub fn parse(kind: TelemetryKind, bytes: &[u8]) -> Option<TelemetryValue> {
        if let Some(size) = kind.wire_size() {
            if bytes.len() != size {
                return None;
            }
        }
        Some(match kind {
            TelemetryKind::U8 => TelemetryValue::U8(bytes[0]),
            TelemetryKind::I8 => TelemetryValue::I8(bytes[0] as i8),
            TelemetryKind::U16 => TelemetryValue::U16(u16::from_le_bytes([bytes[0], bytes[1]])),
            TelemetryKind::I16 => TelemetryValue::I16(i16::from_le_bytes([bytes[0], bytes[1]])),
            TelemetryKind::U32 => TelemetryValue::U32(u32::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3],
            ])),
            TelemetryKind::I32 => TelemetryValue::I32(i32::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3],
            ])),
            TelemetryKind::Str => {
                let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
                if end > TELEMETRY_MAX_STRING {
                    return None;
                }
                TelemetryValue::Str(String::from_utf8_lossy(&bytes[..end]).into_owned())
            }
        })
    }

    pub fn as_i8(&self) -> Option<i8> {
        match self {
            TelemetryValue::I8(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            TelemetryValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// A telemetry slot: the current value plus its send/ack bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct Telemetry {
    value: Option<TelemetryValue>,
    pub data_state: DataState,
}

impl Telemetry {
    /// Stores a value, returns whether it changed.
    pub fn set(&mut self, value: TelemetryValue, now: TimeMicros) -> bool {
        let changed = self.value.as_ref() != Some(&value);
        self.value = Some(value);
        self.data_state.update(changed, now);
        changed
    }

    pub fn has_value(&self) -> bool {
        self.value.is_some()
    }

    pub fn value(&self) -> Option<&TelemetryValue> {
        self.value.as_ref()
    }

    pub fn clear(&mut self) {
        self.value = None;
        self.data_state = DataState::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_and_index() {
        assert!(TelemetryId::TxSnr.is_uplink());
        assert!(!TelemetryId::RxSnr.is_uplink());
        assert_eq!(TelemetryId::RxRssiAnt1.index(), 0);
        assert_eq!(TelemetryId::CraftName.index(), 9);
        assert_eq!(TelemetryId::TxRssiAnt1.index(), 0);
        assert_eq!(TelemetryId::PilotName.index(), 4);
    }

    #[test]
    fn test_value_round_trip() {
        let cases = [
            (TelemetryValue::I8(-42), TelemetryKind::I8),
            (TelemetryValue::U16(0x1234), TelemetryKind::U16),
            (TelemetryValue::I32(-100_000), TelemetryKind::I32),
            (TelemetryValue::Str("ACRO".into()), TelemetryKind::Str),
        ];
        for (value, kind) in cases {
            let bytes = value.to_bytes();
            assert_eq!(TelemetryValue::parse(kind, &bytes), Some(value));
        }
    }

    #[test]
    fn test_parse_rejects_wrong_size() {
        assert_eq!(TelemetryValue::parse(TelemetryKind::U16, &[1]), None);
        assert_eq!(TelemetryValue::parse(TelemetryKind::I8, &[1, 2]), None);
    }

    #[test]
    fn test_set_reports_change() {
        let mut t = Telemetry::default();
        assert!(t.set(TelemetryValue::I8(10), TimeMicros(0)));
        assert!(!t.set(TelemetryValue::I8(10), TimeMicros(1)));
        assert!(t.set(TelemetryValue::I8(11), TimeMicros(2)));
    }
}
