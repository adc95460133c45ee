//! Time-correlated playback position snapshot.

/// Playback position and rate parameters captured at one mixer period.
///
/// Created once per callback slot and never mutated afterwards.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TimeRecord {
    /// Index into the order table
    pub order: u32,
    /// Row within the active pattern
    pub row: u32,
    /// Tempo in BPM
    pub bpm: u16,
    /// Ticks per row
    pub tick_speed: u8,
    /// Master volume (0-255)
    pub master_volume: u8,
    /// Tick within the current row
    pub ticker: u32,
}

impl TimeRecord {
    /// Create a record at the given order/row with the remaining fields zeroed.
    pub const fn at(order: u32, row: u32) -> Self {
        Self {
            order,
            row,
            bpm: 0,
            tick_speed: 0,
            master_volume: 0,
            ticker: 0,
        }
    }

    /// `(order, row)` pair, the part most consumers care about.
    pub const fn position(&self) -> (u32, u32) {
        (self.order, self.row)
    }
}
