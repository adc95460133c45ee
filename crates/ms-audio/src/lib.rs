//! Audio device backend for modseq.
//!
//! [`CpalMixer`] implements the sequencer's mixer capability on top of the
//! default CPAL output device.

mod cpal_mixer;
mod frame;

pub use cpal_mixer::{CpalMixer, DeviceClock};
pub use frame::Frame;
