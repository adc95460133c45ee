//! Transport state machine.
//!
//! Owns the playback counters, drives a [`MixerEngine`] through device
//! bring-up and tear-down, and stamps the [`TimeRecordTable`] once per mixer
//! period.

use alloc::sync::Arc;
use alloc::vec::Vec;
use log::{debug, warn};
use ms_ir::{SongSource, TimeRecord, DEFAULT_PATTERN_ROWS};

use crate::clock::{BpmClock, BPM_MAX, BPM_MIN};
use crate::config::PlayerConfig;
use crate::error::DeviceError;
use crate::mixer::MixerEngine;
use crate::time_record::TimeRecordTable;

/// Transport state. `idle` and `repeat` are tracked separately.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TransportState {
    /// Not running. Either never started, or re-armed by a restart and
    /// waiting for a kick.
    #[default]
    Uninitialized,
    /// Stopped explicitly, or halted at the end of the song.
    Stopped,
    /// Running.
    Playing,
    /// Running but paused.
    Paused,
}

/// Arguments to [`Transport::start_playing`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StartOptions {
    /// Loop back to the first order at the end of the song
    pub repeat: bool,
    pub start_order: u32,
    pub start_row: u32,
    /// Channel count; `None` takes the song's own
    pub num_channels: Option<u32>,
    /// Run the mixer without advancing the song
    pub idle: bool,
    /// Loop this pattern instead of following the order table
    pub pattern_override: Option<u16>,
    /// Per-channel initial panning
    pub panning: Option<Vec<u8>>,
    /// Halt after a single row
    pub play_one_row_only: bool,
}

/// Playback sequencer over a mixer engine.
pub struct Transport<M: MixerEngine> {
    mixer: M,
    config: PlayerConfig,
    song: Option<Arc<dyn SongSource>>,
    state: TransportState,
    idle: bool,
    repeat: bool,
    play_one_row_only: bool,
    num_channels: u32,

    /// Row count per order position, resolved when the song is bound
    order_rows: Vec<u32>,
    /// Row count of the overriding pattern
    override_rows: u32,
    pattern_override: Option<u16>,

    order: u32,
    row: u32,
    last_unvisited_order: u32,
    /// Ticks since restart (wraps)
    tick_counter: u32,
    /// Tick within the current row
    ticker: u32,

    master_volume: u8,
    bpm: u16,
    tick_speed: u8,
    clock: BpmClock,

    elapsed_samples: u64,
    current_slot: usize,
    time_records: Arc<TimeRecordTable>,
}

impl<M: MixerEngine> Transport<M> {
    /// Create a stopped, uninitialized transport over `mixer`.
    pub fn new(mixer: M, config: PlayerConfig) -> Self {
        let time_records = Arc::new(TimeRecordTable::new(config.time_record_slots));
        Self {
            mixer,
            num_channels: config.initial_num_channels,
            config,
            song: None,
            state: TransportState::Uninitialized,
            idle: false,
            repeat: false,
            play_one_row_only: false,
            order_rows: Vec::new(),
            override_rows: DEFAULT_PATTERN_ROWS,
            pattern_override: None,
            order: 0,
            row: 0,
            last_unvisited_order: 0,
            tick_counter: 0,
            ticker: 0,
            master_volume: 255,
            bpm: 125,
            tick_speed: 6,
            clock: BpmClock::new(125),
            elapsed_samples: 0,
            current_slot: 0,
            time_records,
        }
    }

    // --- Lifecycle ---

    /// Bind `song`, set up the mixer and start playing.
    ///
    /// Allocation failure aborts before any device bring-up. Device errors
    /// from the final kick are returned unchanged.
    pub fn start_playing(
        &mut self,
        song: Arc<dyn SongSource>,
        options: StartOptions,
    ) -> Result<(), DeviceError> {
        let orders = song.order_count() as usize;
        self.start_with_order_table(song, options, orders)
    }

    /// Resolve `orders` entries of the row table, then bind and start.
    /// Nothing is changed when the table cannot be allocated.
    fn start_with_order_table(
        &mut self,
        song: Arc<dyn SongSource>,
        options: StartOptions,
        orders: usize,
    ) -> Result<(), DeviceError> {
        let order_rows = allocate_order_rows(&*song, orders)?;

        self.num_channels = options
            .num_channels
            .unwrap_or_else(|| song.channel_count());
        self.mixer.set_num_channels(self.num_channels);

        self.idle = options.idle;
        self.repeat = options.repeat;
        self.order_rows = order_rows;

        self.pattern_override = options.pattern_override;
        self.override_rows = options
            .pattern_override
            .map_or(DEFAULT_PATTERN_ROWS, |p| song.pattern_rows(p).max(1));
        self.song = Some(song);

        self.restart(
            options.start_order,
            options.start_row,
            true,
            options.panning.as_deref(),
            options.play_one_row_only,
        );

        self.kick()
    }

    /// Bring the device up (if needed) and arm playback. Safe to call again
    /// while already running.
    pub fn kick(&mut self) -> Result<(), DeviceError> {
        self.ensure_device()?;

        self.state = TransportState::Playing;
        self.mixer.reset_channels_without_muting();
        self.mixer.start_mixer();
        self.elapsed_samples = 0;

        debug!(
            "transport kicked at order {} row {} (idle: {})",
            self.order, self.row, self.idle
        );
        Ok(())
    }

    fn ensure_device(&mut self) -> Result<(), DeviceError> {
        if !self.mixer.is_initialized() {
            self.mixer.init_device().inspect_err(|e| {
                warn!("device init failed ({}): {}", e.code(), e);
            })?;
        }
        Ok(())
    }

    /// Reset counters to a start position and seed every time record slot
    /// with it. Does nothing without a bound song.
    pub fn restart(
        &mut self,
        start_order: u32,
        start_row: u32,
        reset_mixer: bool,
        panning: Option<&[u8]>,
        play_one_row_only: bool,
    ) {
        let Some((bpm, tick_speed, volume)) = self.song.as_deref().map(|song| {
            (
                song.initial_bpm(),
                song.initial_tick_speed(),
                song.default_master_volume(),
            )
        }) else {
            return;
        };

        if reset_mixer {
            self.mixer.reset_channels_without_muting();
        }

        if self.state == TransportState::Stopped {
            self.state = TransportState::Uninitialized;
        }

        self.tick_counter = 0;
        self.ticker = 0;
        self.clock.reset();

        // An empty order table still reports order 0.
        self.order = start_order.min(self.order_count().saturating_sub(1));
        self.row = start_row;
        self.last_unvisited_order = self.order;
        self.play_one_row_only = play_one_row_only;

        self.set_bpm(bpm);
        self.set_tick_speed(tick_speed);
        if self.config.reset_main_volume_on_start {
            self.master_volume = volume;
        }

        if let Some(table) = panning {
            for (channel, &pan) in (0..self.num_channels).zip(table) {
                self.mixer.set_channel_panning(channel, pan);
            }
        }

        self.time_records.fill(self.current_record());
    }

    /// Stop the mixer, close the device and release the song.
    pub fn stop_playing(&mut self) -> Result<(), DeviceError> {
        self.mixer.stop();
        let result = self.mixer.close_device();
        if let Err(e) = &result {
            warn!("device close failed ({}): {}", e.code(), e);
        }

        self.song = None;
        self.state = TransportState::Stopped;
        debug!("transport stopped");
        result
    }

    /// Pause the mixer. No-op unless playing.
    pub fn pause_playing(&mut self) -> Result<(), DeviceError> {
        if self.state == TransportState::Playing {
            self.mixer.pause();
            self.state = TransportState::Paused;
        }
        Ok(())
    }

    /// Resume after a pause, or restart the mixer on a stopped transport
    /// that still has a song bound.
    pub fn resume_playing(&mut self, unpause: bool) -> Result<(), DeviceError> {
        if self.state == TransportState::Paused && unpause {
            self.state = TransportState::Playing;
            return self.mixer.resume();
        }

        if self.song.is_some() {
            self.ensure_device()?;
            self.mixer.start_mixer();
            if self.state != TransportState::Paused {
                self.state = TransportState::Playing;
            }
        }

        Ok(())
    }

    // --- Navigation ---

    fn can_navigate(&self) -> bool {
        self.song.is_some() && self.state == TransportState::Playing
    }

    /// Jump to the start of the next order. No wraparound.
    pub fn next_pattern(&mut self) {
        if self.can_navigate() && self.order + 1 < self.order_count() {
            self.jump_to_order(self.order + 1);
        }
    }

    /// Jump to the start of the previous order. No wraparound.
    pub fn last_pattern(&mut self) {
        if self.can_navigate() && self.order > 0 {
            self.jump_to_order(self.order - 1);
        }
    }

    fn jump_to_order(&mut self, order: u32) {
        self.mixer.reset_channels_without_muting();
        self.row = 0;
        self.order = order;
        self.last_unvisited_order = order;
        self.mixer.clear_effect_memory();
    }

    /// Jump to an explicit order/row and stamp the current slot at once.
    pub fn set_pattern_pos(
        &mut self,
        order: u32,
        row: u32,
        reset_channels: bool,
        reset_effect_memory: bool,
    ) {
        if !self.can_navigate() || order >= self.order_count() {
            return;
        }

        if reset_channels {
            self.mixer.reset_channels_without_muting();
        }

        self.order = order;
        self.row = row;
        self.last_unvisited_order = order;

        self.update_time_record();

        if reset_effect_memory {
            self.mixer.clear_effect_memory();
        }
    }

    // --- Mixer period ---

    /// Stamp `slot` with the current counters.
    pub fn on_tick_callback(&mut self, slot: usize) {
        self.current_slot = slot;
        self.update_time_record();
    }

    fn update_time_record(&self) {
        self.time_records.record(self.current_slot, self.current_record());
    }

    /// One mixer period of `frames` frames: record the position about to be
    /// heard in `slot`, then advance the song clock.
    ///
    /// Performs no allocation and takes no locks.
    pub fn on_beat_packet(&mut self, slot: usize, frames: u32) {
        self.on_tick_callback(slot);
        self.elapsed_samples = self.elapsed_samples.wrapping_add(frames as u64);

        if self.state != TransportState::Playing || self.song.is_none() {
            return;
        }

        if self.clock.step() {
            self.advance_tick();
        }
    }

    fn advance_tick(&mut self) {
        self.tick_counter = self.tick_counter.wrapping_add(1);
        if self.idle {
            return;
        }

        self.ticker += 1;
        if self.ticker >= self.tick_speed as u32 {
            self.ticker = 0;
            self.advance_row();
        }
    }

    fn advance_row(&mut self) {
        if self.play_one_row_only {
            self.halt();
            return;
        }

        self.row += 1;
        if self.row < self.rows_in_current_pattern() {
            return;
        }
        self.row = 0;

        if self.pattern_override.is_some() {
            return;
        }

        if self.order + 1 < self.order_count() {
            self.order += 1;
            if self.order > self.last_unvisited_order {
                self.last_unvisited_order = self.order;
            }
        } else if self.repeat {
            self.order = 0;
            self.last_unvisited_order = 0;
        } else {
            // Stay parked on the final row.
            self.row = self.rows_in_current_pattern() - 1;
            self.halt();
        }
    }

    /// End of song or single row. The device stays open.
    fn halt(&mut self) {
        self.state = TransportState::Stopped;
    }

    fn rows_in_current_pattern(&self) -> u32 {
        if self.pattern_override.is_some() {
            return self.override_rows;
        }
        self.order_rows
            .get(self.order as usize)
            .copied()
            .unwrap_or(DEFAULT_PATTERN_ROWS)
    }

    // --- Accessors ---

    /// Snapshot of the current counters.
    pub fn current_record(&self) -> TimeRecord {
        TimeRecord {
            order: self.order,
            row: self.row,
            bpm: self.bpm,
            tick_speed: self.tick_speed,
            master_volume: self.master_volume,
            ticker: self.ticker,
        }
    }

    /// Read a time record slot.
    pub fn snapshot(&self, slot: usize) -> TimeRecord {
        self.time_records.snapshot(slot)
    }

    /// Shared handle for readers on other threads.
    pub fn time_records(&self) -> Arc<TimeRecordTable> {
        Arc::clone(&self.time_records)
    }

    pub fn time_record_slots(&self) -> usize {
        self.time_records.len()
    }

    /// Slot a free-running packet counter maps to.
    pub fn slot_of(&self, packet: u64) -> usize {
        self.time_records.slot_of(packet)
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    /// Started and not stopped since (paused counts as playing).
    pub fn is_playing(&self) -> bool {
        matches!(self.state, TransportState::Playing | TransportState::Paused)
    }

    pub fn is_paused(&self) -> bool {
        self.state == TransportState::Paused
    }

    pub fn is_stopped(&self) -> bool {
        self.state == TransportState::Stopped
    }

    pub fn is_idle(&self) -> bool {
        self.idle
    }

    pub fn set_idle(&mut self, idle: bool) {
        self.idle = idle;
    }

    pub fn is_repeating(&self) -> bool {
        self.repeat
    }

    pub fn set_repeat(&mut self, repeat: bool) {
        self.repeat = repeat;
    }

    pub fn song(&self) -> Option<&Arc<dyn SongSource>> {
        self.song.as_ref()
    }

    /// Order count of the bound song (0 without one).
    pub fn order_count(&self) -> u32 {
        self.song.as_ref().map_or(0, |s| s.order_count())
    }

    pub fn order_position(&self) -> u32 {
        self.order
    }

    pub fn row_position(&self) -> u32 {
        self.row
    }

    pub fn last_unvisited_order(&self) -> u32 {
        self.last_unvisited_order
    }

    pub fn tick_counter(&self) -> u32 {
        self.tick_counter
    }

    pub fn ticker(&self) -> u32 {
        self.ticker
    }

    pub fn pattern_override(&self) -> Option<u16> {
        self.pattern_override
    }

    pub fn num_channels(&self) -> u32 {
        self.num_channels
    }

    /// Frames mixed since the last kick.
    pub fn elapsed_samples(&self) -> u64 {
        self.elapsed_samples
    }

    pub fn master_volume(&self) -> u8 {
        self.master_volume
    }

    pub fn set_master_volume(&mut self, volume: u8) {
        self.master_volume = volume;
    }

    pub fn bpm(&self) -> u16 {
        self.bpm
    }

    /// Set tempo (clamped to 32-255).
    pub fn set_bpm(&mut self, bpm: u16) {
        self.bpm = bpm.clamp(BPM_MIN, BPM_MAX);
        self.clock.set_bpm(self.bpm);
    }

    pub fn tick_speed(&self) -> u8 {
        self.tick_speed
    }

    /// Set ticks per row (clamped to 1-31).
    pub fn set_tick_speed(&mut self, speed: u8) {
        self.tick_speed = speed.clamp(1, 31);
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    /// Toggle whether restarts reload the song's master volume.
    pub fn set_reset_main_volume_on_start(&mut self, reset: bool) {
        self.config.reset_main_volume_on_start = reset;
    }

    pub fn mixer(&self) -> &M {
        &self.mixer
    }

    pub fn mixer_mut(&mut self) -> &mut M {
        &mut self.mixer
    }
}

/// Row count per order position, so the packet path never calls into the
/// song. Only the first `orders` entries are resolved.
fn allocate_order_rows(song: &dyn SongSource, orders: usize) -> Result<Vec<u32>, DeviceError> {
    let mut rows = Vec::new();
    rows.try_reserve_exact(orders).map_err(|_| DeviceError::OutOfMemory)?;
    rows.extend((0..song.order_count()).take(orders).map(|order| {
        song.pattern_at(order)
            .map_or(DEFAULT_PATTERN_ROWS, |p| song.pattern_rows(p))
            .max(1)
    }));
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MixerCall, RecordingMixer};
    use ms_ir::{Pattern, Song};

    fn song(orders: u32, rows: u16) -> Arc<dyn SongSource> {
        let mut song = Song::with_channels("test", 4);
        let idx = song.add_pattern(Pattern::new(rows));
        for _ in 0..orders {
            song.add_order(idx);
        }
        song.main_volume = 200;
        Arc::new(song)
    }

    fn transport() -> Transport<RecordingMixer> {
        Transport::new(RecordingMixer::new(), PlayerConfig::default())
    }

    fn playing(orders: u32, rows: u16) -> Transport<RecordingMixer> {
        let mut t = transport();
        t.start_playing(song(orders, rows), StartOptions::default())
            .unwrap();
        t
    }

    /// Feed packets until `ticks` sequencer ticks have elapsed.
    fn run_ticks(t: &mut Transport<RecordingMixer>, ticks: u32) {
        let target = t.tick_counter().wrapping_add(ticks);
        let mut slot = 0;
        while t.tick_counter() != target {
            t.on_beat_packet(slot, 176);
            slot += 1;
        }
    }

    #[test]
    fn new_transport_is_uninitialized() {
        let t = transport();
        assert_eq!(t.state(), TransportState::Uninitialized);
        assert!(!t.is_playing());
        assert!(t.song().is_none());
        assert_eq!(t.num_channels(), 8);
        assert_eq!(t.master_volume(), 255);
    }

    #[test]
    fn start_playing_runs_full_bring_up() {
        let t = playing(4, 64);
        assert_eq!(t.state(), TransportState::Playing);
        assert!(!t.is_paused());
        assert!(!t.is_stopped());
        assert_eq!(t.num_channels(), 4);
        assert_eq!(t.master_volume(), 200);
        assert_eq!(
            t.mixer().calls(),
            &[
                MixerCall::SetNumChannels(4),
                MixerCall::ResetChannels,
                MixerCall::InitDevice,
                MixerCall::ResetChannels,
                MixerCall::StartMixer,
            ]
        );
    }

    #[test]
    fn explicit_channel_count_overrides_song() {
        let mut t = transport();
        let options = StartOptions {
            num_channels: Some(12),
            ..Default::default()
        };
        t.start_playing(song(1, 64), options).unwrap();
        assert_eq!(t.num_channels(), 12);
        assert_eq!(t.mixer().num_channels(), 12);
    }

    #[test]
    fn init_failure_is_passed_through_and_mixer_not_started() {
        let mut t = transport();
        t.mixer_mut().fail_init(DeviceError::UnsupportedFormat);
        let err = t
            .start_playing(song(2, 64), StartOptions::default())
            .unwrap_err();
        assert_eq!(err, DeviceError::UnsupportedFormat);
        assert_eq!(err.code(), -4);
        assert!(!t.is_playing());
        assert!(!t.mixer().calls().contains(&MixerCall::StartMixer));
    }

    #[test]
    fn kick_twice_keeps_playing() {
        let mut t = playing(4, 64);
        t.kick().unwrap();
        t.kick().unwrap();
        assert_eq!(t.state(), TransportState::Playing);
        let inits = t
            .mixer()
            .calls()
            .iter()
            .filter(|c| **c == MixerCall::InitDevice)
            .count();
        assert_eq!(inits, 1);
    }

    #[test]
    fn kick_resets_elapsed_samples() {
        let mut t = playing(4, 64);
        t.on_beat_packet(0, 176);
        t.on_beat_packet(1, 176);
        assert_eq!(t.elapsed_samples(), 352);
        t.kick().unwrap();
        assert_eq!(t.elapsed_samples(), 0);
    }

    #[test]
    fn restart_fills_every_slot_with_start_position() {
        let mut t = playing(4, 64);
        run_ticks(&mut t, 20);
        t.restart(2, 7, false, None, false);
        for slot in 0..t.time_record_slots() {
            assert_eq!(t.snapshot(slot).position(), (2, 7));
        }
        assert_eq!(t.tick_counter(), 0);
        assert_eq!(t.last_unvisited_order(), 2);
    }

    #[test]
    fn restart_without_song_is_ignored() {
        let mut t = transport();
        t.restart(1, 1, true, None, false);
        assert_eq!(t.order_position(), 0);
        assert!(t.mixer().calls().is_empty());
    }

    #[test]
    fn restart_clamps_start_order_to_table() {
        let mut t = transport();
        let options = StartOptions {
            start_order: 9,
            ..Default::default()
        };
        t.start_playing(song(3, 64), options).unwrap();
        assert_eq!(t.order_position(), 2);
    }

    #[test]
    fn master_volume_kept_when_reset_disabled() {
        let mut t = playing(2, 64);
        t.set_master_volume(17);
        t.set_reset_main_volume_on_start(false);
        t.restart(0, 0, true, None, false);
        assert_eq!(t.master_volume(), 17);

        t.set_reset_main_volume_on_start(true);
        t.restart(0, 0, true, None, false);
        assert_eq!(t.master_volume(), 200);
    }

    #[test]
    fn panning_table_is_forwarded_per_channel() {
        let mut t = transport();
        let options = StartOptions {
            panning: Some(vec![0, 255, 128, 64, 99]),
            ..Default::default()
        };
        t.start_playing(song(1, 64), options).unwrap();
        let pans: Vec<_> = t
            .mixer()
            .calls()
            .iter()
            .filter_map(|c| match c {
                MixerCall::SetPanning(ch, pan) => Some((*ch, *pan)),
                _ => None,
            })
            .collect();
        // song has 4 channels; the fifth entry is ignored
        assert_eq!(pans, vec![(0, 0), (1, 255), (2, 128), (3, 64)]);
    }

    #[test]
    fn stop_playing_closes_device_and_releases_song() {
        let mut t = playing(4, 64);
        t.stop_playing().unwrap();
        assert!(t.is_stopped());
        assert!(t.song().is_none());
        assert!(!t.mixer().is_initialized());
    }

    #[test]
    fn stop_playing_returns_close_error_unchanged() {
        let mut t = playing(4, 64);
        t.mixer_mut().fail_close(DeviceError::CloseFailed);
        assert_eq!(t.stop_playing(), Err(DeviceError::CloseFailed));
        assert!(t.song().is_none());
        assert!(t.is_stopped());
    }

    #[test]
    fn pause_is_idempotent() {
        let mut t = playing(4, 64);
        t.pause_playing().unwrap();
        t.pause_playing().unwrap();
        assert!(t.is_paused());
        let pauses = t
            .mixer()
            .calls()
            .iter()
            .filter(|c| **c == MixerCall::Pause)
            .count();
        assert_eq!(pauses, 1);
    }

    #[test]
    fn pause_on_fresh_transport_is_ignored() {
        let mut t = transport();
        t.pause_playing().unwrap();
        t.resume_playing(true).unwrap();
        assert_eq!(t.state(), TransportState::Uninitialized);
        assert!(!t.is_playing());
        assert!(t.mixer().calls().is_empty());
    }

    #[test]
    fn pause_after_stop_does_not_revive_playback() {
        let mut t = playing(4, 64);
        t.stop_playing().unwrap();
        t.mixer_mut().clear_calls();

        t.pause_playing().unwrap();
        assert!(t.is_stopped());
        t.resume_playing(true).unwrap();
        assert!(t.is_stopped());
        assert!(!t.is_playing());
        assert!(t.song().is_none());
        assert!(t.mixer().calls().is_empty());
    }

    #[test]
    fn pause_then_resume_keeps_position() {
        let mut t = playing(4, 64);
        run_ticks(&mut t, 30);
        let before = (t.order_position(), t.row_position());
        t.pause_playing().unwrap();
        t.resume_playing(true).unwrap();
        assert!(!t.is_paused());
        assert_eq!(t.state(), TransportState::Playing);
        assert_eq!((t.order_position(), t.row_position()), before);
    }

    #[test]
    fn resume_error_is_propagated() {
        let mut t = playing(4, 64);
        t.pause_playing().unwrap();
        t.mixer_mut().fail_resume(DeviceError::Other(-99));
        assert_eq!(t.resume_playing(true), Err(DeviceError::Other(-99)));
        assert!(!t.is_paused());
    }

    #[test]
    fn resume_without_unpause_stays_paused() {
        let mut t = playing(4, 64);
        t.pause_playing().unwrap();
        t.resume_playing(false).unwrap();
        assert!(t.is_paused());
    }

    #[test]
    fn resume_without_song_is_noop() {
        let mut t = transport();
        t.resume_playing(true).unwrap();
        assert_eq!(t.state(), TransportState::Uninitialized);
        assert!(t.mixer().calls().is_empty());
    }

    #[test]
    fn resume_reopens_device_for_bound_song() {
        let mut t = playing(4, 64);
        t.mixer_mut().close_device().unwrap();
        t.resume_playing(true).unwrap();
        assert!(t.mixer().is_initialized());
        assert_eq!(t.state(), TransportState::Playing);
    }

    #[test]
    fn resume_reopen_failure_aborts() {
        let mut t = playing(4, 64);
        t.mixer_mut().close_device().unwrap();
        t.mixer_mut().fail_init(DeviceError::NoFreeDevice);
        let starts_before = t.mixer().start_count();
        assert_eq!(t.resume_playing(true), Err(DeviceError::NoFreeDevice));
        assert_eq!(t.mixer().start_count(), starts_before);
    }

    #[test]
    fn next_pattern_stops_at_last_order() {
        let mut t = playing(4, 64);
        for _ in 0..3 {
            t.next_pattern();
        }
        assert_eq!(t.order_position(), 3);
        t.next_pattern();
        assert_eq!(t.order_position(), 3);
    }

    #[test]
    fn last_pattern_stops_at_zero() {
        let mut t = playing(4, 64);
        t.last_pattern();
        assert_eq!(t.order_position(), 0);
        t.next_pattern();
        t.last_pattern();
        assert_eq!(t.order_position(), 0);
    }

    #[test]
    fn navigation_resets_row_and_effect_memory() {
        let mut t = playing(4, 64);
        run_ticks(&mut t, 6 * 5);
        assert_eq!(t.row_position(), 5);
        t.next_pattern();
        assert_eq!(t.row_position(), 0);
        assert_eq!(t.last_unvisited_order(), 1);
        assert_eq!(t.mixer().calls().last(), Some(&MixerCall::ClearEffectMemory));
    }

    #[test]
    fn navigation_ignored_while_paused() {
        let mut t = playing(4, 64);
        t.pause_playing().unwrap();
        t.next_pattern();
        t.set_pattern_pos(2, 5, true, true);
        assert_eq!(t.order_position(), 0);
        assert_eq!(t.row_position(), 0);
    }

    #[test]
    fn set_pattern_pos_out_of_range_changes_nothing() {
        let mut t = playing(4, 64);
        t.set_pattern_pos(1, 3, true, true);
        let calls = t.mixer().calls().len();
        t.set_pattern_pos(4, 9, true, true);
        assert_eq!(t.order_position(), 1);
        assert_eq!(t.row_position(), 3);
        assert_eq!(t.last_unvisited_order(), 1);
        assert_eq!(t.mixer().calls().len(), calls);
    }

    #[test]
    fn set_pattern_pos_stamps_current_slot_immediately() {
        let mut t = playing(4, 64);
        t.on_tick_callback(11);
        t.set_pattern_pos(3, 12, false, false);
        assert_eq!(t.snapshot(11).position(), (3, 12));
        assert!(!t.mixer().calls().contains(&MixerCall::ClearEffectMemory));
    }

    #[test]
    fn tick_callback_records_all_fields() {
        let mut t = playing(4, 64);
        t.set_bpm(140);
        t.set_master_volume(99);
        t.on_tick_callback(5);
        let rec = t.snapshot(5);
        assert_eq!(rec.bpm, 140);
        assert_eq!(rec.tick_speed, 6);
        assert_eq!(rec.master_volume, 99);
    }

    #[test]
    fn rows_advance_every_tick_speed_ticks() {
        let mut t = playing(2, 4);
        run_ticks(&mut t, 5);
        assert_eq!(t.row_position(), 0);
        assert_eq!(t.ticker(), 5);
        run_ticks(&mut t, 1);
        assert_eq!(t.row_position(), 1);
        assert_eq!(t.ticker(), 0);
    }

    #[test]
    fn pattern_end_moves_to_next_order() {
        let mut t = playing(2, 4);
        run_ticks(&mut t, 6 * 4);
        assert_eq!((t.order_position(), t.row_position()), (1, 0));
        assert_eq!(t.last_unvisited_order(), 1);
    }

    #[test]
    fn song_end_halts_without_repeat() {
        let mut t = playing(2, 4);
        run_ticks(&mut t, 6 * 8);
        assert!(t.is_stopped());
        assert_eq!((t.order_position(), t.row_position()), (1, 3));
        assert!(t.mixer().is_initialized());

        let ticks = t.tick_counter();
        t.on_beat_packet(0, 176);
        t.on_beat_packet(1, 176);
        assert_eq!(t.tick_counter(), ticks);
    }

    #[test]
    fn song_end_loops_with_repeat() {
        let mut t = transport();
        let options = StartOptions {
            repeat: true,
            ..Default::default()
        };
        t.start_playing(song(2, 4), options).unwrap();
        run_ticks(&mut t, 6 * 8);
        assert_eq!(t.state(), TransportState::Playing);
        assert_eq!((t.order_position(), t.row_position()), (0, 0));
        assert_eq!(t.last_unvisited_order(), 0);
    }

    #[test]
    fn pattern_override_loops_single_pattern() {
        let mut s = Song::with_channels("override", 4);
        let long = s.add_pattern(Pattern::new(64));
        let short = s.add_pattern(Pattern::new(2));
        s.add_order(long);
        s.add_order(long);

        let mut t = transport();
        let options = StartOptions {
            pattern_override: Some(short),
            ..Default::default()
        };
        t.start_playing(Arc::new(s), options).unwrap();
        run_ticks(&mut t, 6 * 2);
        assert_eq!((t.order_position(), t.row_position()), (0, 0));
        run_ticks(&mut t, 6);
        assert_eq!(t.row_position(), 1);
        assert_eq!(t.pattern_override(), Some(short));
    }

    #[test]
    fn play_one_row_only_halts_after_row() {
        let mut t = transport();
        let options = StartOptions {
            play_one_row_only: true,
            start_row: 10,
            ..Default::default()
        };
        t.start_playing(song(2, 64), options).unwrap();
        run_ticks(&mut t, 6);
        assert!(t.is_stopped());
        assert_eq!(t.row_position(), 10);
    }

    #[test]
    fn idle_counts_ticks_without_moving() {
        let mut t = transport();
        let options = StartOptions {
            idle: true,
            ..Default::default()
        };
        t.start_playing(song(2, 4), options).unwrap();
        assert!(t.is_idle());
        run_ticks(&mut t, 50);
        assert_eq!((t.order_position(), t.row_position()), (0, 0));
        assert_eq!(t.tick_counter(), 50);
    }

    #[test]
    fn paused_transport_does_not_advance() {
        let mut t = playing(2, 4);
        t.pause_playing().unwrap();
        for slot in 0..500 {
            t.on_beat_packet(slot, 176);
        }
        assert_eq!(t.tick_counter(), 0);
    }

    #[test]
    fn restart_after_song_end_rearms() {
        let mut t = playing(1, 2);
        run_ticks(&mut t, 6 * 2);
        assert!(t.is_stopped());
        t.restart(0, 0, true, None, false);
        assert_eq!(t.state(), TransportState::Uninitialized);
        t.kick().unwrap();
        assert_eq!(t.state(), TransportState::Playing);
    }

    #[test]
    fn bpm_and_speed_are_clamped() {
        let mut t = transport();
        t.set_bpm(10);
        assert_eq!(t.bpm(), BPM_MIN);
        t.set_tick_speed(0);
        assert_eq!(t.tick_speed(), 1);
        t.set_tick_speed(200);
        assert_eq!(t.tick_speed(), 31);
    }

    #[test]
    fn order_row_table_failure_is_out_of_memory() {
        let song = song(2, 64);
        assert_eq!(
            allocate_order_rows(&*song, usize::MAX),
            Err(DeviceError::OutOfMemory)
        );
        assert_eq!(allocate_order_rows(&*song, 2), Ok(vec![64, 64]));
    }

    #[test]
    fn failed_start_keeps_previous_song_untouched() {
        let mut t = playing(8, 64);
        for _ in 0..7 {
            t.next_pattern();
        }
        t.set_idle(true);
        t.mixer_mut().clear_calls();

        let options = StartOptions {
            num_channels: Some(2),
            repeat: true,
            ..Default::default()
        };
        let result = t.start_with_order_table(song(2, 16), options, usize::MAX);

        assert_eq!(result, Err(DeviceError::OutOfMemory));
        assert_eq!(t.state(), TransportState::Playing);
        assert_eq!(t.order_count(), 8);
        assert_eq!(t.order_position(), 7);
        assert_eq!(t.num_channels(), 4);
        assert!(t.is_idle());
        assert!(!t.is_repeating());
        assert!(t.mixer().calls().is_empty());

        // the old row table is still in use
        t.set_idle(false);
        run_ticks(&mut t, 6);
        assert_eq!((t.order_position(), t.row_position()), (7, 1));
    }
}
