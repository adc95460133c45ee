//! Capability interface the transport requires from a mixer engine.

use crate::error::DeviceError;

/// A sample mixer with an audio device behind it.
///
/// The transport owns one of these and forwards lifecycle and channel calls
/// to it. The mixer is expected to call
/// [`Transport::on_beat_packet`](crate::Transport::on_beat_packet) once per
/// audio-processing period, or to be driven by something that does.
pub trait MixerEngine {
    /// Is an output device open?
    fn is_initialized(&self) -> bool;

    /// Open the output device.
    fn init_device(&mut self) -> Result<(), DeviceError>;

    /// Close the output device.
    fn close_device(&mut self) -> Result<(), DeviceError>;

    /// Set the number of mixing channels.
    fn set_num_channels(&mut self, num_channels: u32);

    /// Clear transient channel state (envelopes, filters) but keep
    /// channel assignments and mute flags.
    fn reset_channels_without_muting(&mut self);

    /// Start producing audio.
    fn start_mixer(&mut self);

    /// Pause audio output.
    fn pause(&mut self);

    /// Resume paused audio output.
    fn resume(&mut self) -> Result<(), DeviceError>;

    /// Stop audio output.
    fn stop(&mut self);

    /// Forget carried effect state (slide targets, vibrato phase...).
    fn clear_effect_memory(&mut self);

    /// Output sample rate in Hz.
    fn sample_rate(&self) -> u32;

    /// Initial panning for a channel (0 = left, 128 = center, 255 = right).
    fn set_channel_panning(&mut self, _channel: u32, _pan: u8) {}
}
