//! Beat-packet timing.
//!
//! The mixer runs in fixed-size periods ("beat packets"). Sequencer ticks are
//! derived from packets with a 0.32 fixed-point accumulator: every carry out
//! of the 32-bit counter is one tick.

/// Mixer periods per second.
pub const PACKETS_PER_SECOND: u32 = 250;

/// Tempo range accepted by the clock.
pub const BPM_MIN: u16 = 32;
pub const BPM_MAX: u16 = 255;

/// Frames in one beat packet at `sample_rate`.
pub const fn packet_frames(sample_rate: u32) -> u32 {
    let frames = sample_rate / PACKETS_PER_SECOND;
    if frames == 0 {
        1
    } else {
        frames
    }
}

/// Per-packet increment for a tempo.
///
/// Ticks per second are `bpm * 2 / 5`. Rounded up so that an integral number
/// of seconds never comes up one tick short.
pub const fn bpm_adder(bpm: u16) -> u32 {
    let num = (bpm as u64 * 2) << 32;
    let den = 5 * PACKETS_PER_SECOND as u64;
    num.div_ceil(den) as u32
}

/// Wrapping tick accumulator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BpmClock {
    counter: u32,
    adder: u32,
}

impl BpmClock {
    pub fn new(bpm: u16) -> Self {
        Self {
            counter: 0,
            adder: bpm_adder(bpm.clamp(BPM_MIN, BPM_MAX)),
        }
    }

    /// Change tempo without losing the fractional phase.
    pub fn set_bpm(&mut self, bpm: u16) {
        self.adder = bpm_adder(bpm.clamp(BPM_MIN, BPM_MAX));
    }

    pub fn reset(&mut self) {
        self.counter = 0;
    }

    /// Advance one packet. Returns `true` when a tick elapses.
    #[inline]
    pub fn step(&mut self) -> bool {
        let (counter, carry) = self.counter.overflowing_add(self.adder);
        self.counter = counter;
        carry
    }
}
