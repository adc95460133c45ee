//! Song structure as seen by the sequencer.

use alloc::vec::Vec;
use arrayvec::ArrayString;

/// Row count assumed for an order entry whose pattern is missing.
pub const DEFAULT_PATTERN_ROWS: u32 = 64;

/// Read-only view of a song during playback.
///
/// The sequencer only needs the shape of the order table and the length of
/// each pattern; note and effect data stay with the mixer.
pub trait SongSource: Send + Sync {
    /// Number of entries in the order table.
    fn order_count(&self) -> u32;

    /// Channel count the song was authored with.
    fn channel_count(&self) -> u32;

    /// Master volume applied on start (0-255).
    fn default_master_volume(&self) -> u8;

    /// Pattern index played at an order position.
    fn pattern_at(&self, order: u32) -> Option<u16>;

    /// Row count of a pattern. Unknown patterns report [`DEFAULT_PATTERN_ROWS`].
    fn pattern_rows(&self, pattern: u16) -> u32;

    /// Tempo in BPM on start.
    fn initial_bpm(&self) -> u16 {
        125
    }

    /// Ticks per row on start.
    fn initial_tick_speed(&self) -> u8 {
        6
    }
}

/// Pattern layout. Cell data is not part of the sequencer's view.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pattern {
    /// Number of rows (1-256 typical)
    pub rows: u16,
}

impl Pattern {
    pub const fn new(rows: u16) -> Self {
        Self { rows }
    }
}

/// A complete song.
#[derive(Clone, Debug)]
pub struct Song {
    /// Song title
    pub title: ArrayString<32>,
    /// Initial tempo in BPM (32-255 typical)
    pub initial_tempo: u16,
    /// Initial speed (ticks per row, 1-31)
    pub initial_speed: u8,
    /// Master volume (0-255)
    pub main_volume: u8,
    /// Number of channels
    pub channels: u32,
    /// Pattern pool
    pub patterns: Vec<Pattern>,
    /// Order table (indices into `patterns`)
    pub order: Vec<u16>,
}

impl Default for Song {
    fn default() -> Self {
        Self {
            title: ArrayString::new(),
            initial_tempo: 125,
            initial_speed: 6,
            main_volume: 255,
            channels: 0,
            patterns: Vec::new(),
            order: Vec::new(),
        }
    }
}

impl Song {
    /// Create a new empty song.
    pub fn new(title: &str) -> Self {
        let mut song = Self::default();
        let _ = song.title.try_push_str(title);
        song
    }

    /// Create a song with a given number of channels.
    pub fn with_channels(title: &str, num_channels: u32) -> Self {
        let mut song = Self::new(title);
        song.channels = num_channels;
        song
    }

    /// Add a pattern to the pool, returning its index.
    pub fn add_pattern(&mut self, pattern: Pattern) -> u16 {
        let idx = self.patterns.len() as u16;
        self.patterns.push(pattern);
        idx
    }

    /// Append a pattern index to the order table.
    pub fn add_order(&mut self, pattern: u16) {
        self.order.push(pattern);
    }
}

impl SongSource for Song {
    fn order_count(&self) -> u32 {
        self.order.len() as u32
    }

    fn channel_count(&self) -> u32 {
        self.channels
    }

    fn default_master_volume(&self) -> u8 {
        self.main_volume
    }

    fn pattern_at(&self, order: u32) -> Option<u16> {
        self.order.get(order as usize).copied()
    }

    fn pattern_rows(&self, pattern: u16) -> u32 {
        self.patterns
            .get(pattern as usize)
            .map_or(DEFAULT_PATTERN_ROWS, |p| p.rows as u32)
    }

    fn initial_bpm(&self) -> u16 {
        self.initial_tempo
    }

    fn initial_tick_speed(&self) -> u8 {
        self.initial_speed
    }
}
