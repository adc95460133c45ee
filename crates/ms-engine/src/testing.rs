//! Mixer test double that records every capability call.

use alloc::vec::Vec;

use crate::error::DeviceError;
use crate::mixer::MixerEngine;

/// A capability call observed by [`RecordingMixer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MixerCall {
    InitDevice,
    CloseDevice,
    SetNumChannels(u32),
    ResetChannels,
    StartMixer,
    Pause,
    Resume,
    Stop,
    ClearEffectMemory,
    SetPanning(u32, u8),
}

/// In-memory mixer. Queries (`is_initialized`, `sample_rate`) are not
/// recorded; everything else is.
#[derive(Clone, Debug)]
pub struct RecordingMixer {
    calls: Vec<MixerCall>,
    initialized: bool,
    running: bool,
    num_channels: u32,
    sample_rate: u32,
    init_error: Option<DeviceError>,
    close_error: Option<DeviceError>,
    resume_error: Option<DeviceError>,
}

impl RecordingMixer {
    pub fn new() -> Self {
        Self {
            calls: Vec::new(),
            initialized: false,
            running: false,
            num_channels: 0,
            sample_rate: 44100,
            init_error: None,
            close_error: None,
            resume_error: None,
        }
    }

    /// Make every following `init_device` fail with `error`.
    pub fn fail_init(&mut self, error: DeviceError) {
        self.init_error = Some(error);
    }

    /// Make every following `close_device` fail with `error`.
    pub fn fail_close(&mut self, error: DeviceError) {
        self.close_error = Some(error);
    }

    /// Make every following `resume` fail with `error`.
    pub fn fail_resume(&mut self, error: DeviceError) {
        self.resume_error = Some(error);
    }

    pub fn calls(&self) -> &[MixerCall] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn num_channels(&self) -> u32 {
        self.num_channels
    }

    /// Number of `start_mixer` calls so far.
    pub fn start_count(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| **c == MixerCall::StartMixer)
            .count()
    }
}

impl Default for RecordingMixer {
    fn default() -> Self {
        Self::new()
    }
}

impl MixerEngine for RecordingMixer {
    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn init_device(&mut self) -> Result<(), DeviceError> {
        self.calls.push(MixerCall::InitDevice);
        if let Some(err) = self.init_error {
            return Err(err);
        }
        self.initialized = true;
        Ok(())
    }

    fn close_device(&mut self) -> Result<(), DeviceError> {
        self.calls.push(MixerCall::CloseDevice);
        self.running = false;
        self.initialized = false;
        match self.close_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn set_num_channels(&mut self, num_channels: u32) {
        self.calls.push(MixerCall::SetNumChannels(num_channels));
        self.num_channels = num_channels;
    }

    fn reset_channels_without_muting(&mut self) {
        self.calls.push(MixerCall::ResetChannels);
    }

    fn start_mixer(&mut self) {
        self.calls.push(MixerCall::StartMixer);
        self.running = true;
    }

    fn pause(&mut self) {
        self.calls.push(MixerCall::Pause);
        self.running = false;
    }

    fn resume(&mut self) -> Result<(), DeviceError> {
        self.calls.push(MixerCall::Resume);
        if let Some(err) = self.resume_error {
            return Err(err);
        }
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.calls.push(MixerCall::Stop);
        self.running = false;
    }

    fn clear_effect_memory(&mut self) {
        self.calls.push(MixerCall::ClearEffectMemory);
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn set_channel_panning(&mut self, channel: u32, pan: u8) {
        self.calls.push(MixerCall::SetPanning(channel, pan));
    }
}
