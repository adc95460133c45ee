//! Player configuration.

use crate::time_record::DEFAULT_TIME_RECORD_SLOTS;

/// Tunables for a [`Transport`](crate::Transport).
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PlayerConfig {
    /// Reload the song's master volume on every restart.
    pub reset_main_volume_on_start: bool,
    /// Channel count used before any song is bound.
    pub initial_num_channels: u32,
    /// Capacity of the time record ring.
    pub time_record_slots: usize,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            reset_main_volume_on_start: true,
            initial_num_channels: 8,
            time_record_slots: DEFAULT_TIME_RECORD_SLOTS,
        }
    }
}
