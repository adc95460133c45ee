//! Playback sequencer for modseq.
//!
//! Drives a mixer engine through a song's order table, keeps transport
//! state, and records which song position each mixer period plays so that
//! a UI can compensate for output latency.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod clock;
mod config;
mod error;
mod mixer;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
mod time_record;
mod transport;

pub use clock::{packet_frames, BpmClock, PACKETS_PER_SECOND};
pub use config::PlayerConfig;
pub use error::{status_code, DeviceError};
pub use mixer::MixerEngine;
pub use ms_ir::{SongSource, TimeRecord};
pub use time_record::{TimeRecordTable, DEFAULT_TIME_RECORD_SLOTS};
pub use transport::{StartOptions, Transport, TransportState};
