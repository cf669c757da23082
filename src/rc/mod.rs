//! # RC Data Layer
//!
//! The shared channel/telemetry model the engines read and write, the
//! per-value freshness scoring that schedules substream content, and the
//! failsafe trackers.

pub mod channels;
pub mod data;
pub mod data_state;
pub mod failsafe;
pub mod telemetry;

pub use channels::{
    channel_decode, channel_encode, channel_value_from_percentage, CHANNELS_NUM,
    CHANNEL_CENTER_VALUE, CHANNEL_MAX_VALUE, CHANNEL_MIN_VALUE,
};
pub use data::{ChannelSink, ChannelSource, ControlChannel, FakeChannelSource, RcData};
pub use data_state::DataState;
pub use failsafe::Failsafe;
pub use telemetry::{
    Telemetry, TelemetryId, TelemetryKind, TelemetryValue, TELEMETRY_SNR_MULTIPLIER,
};
