//! Position tracker: a ring of time-correlated snapshots.
//!
//! Each slot corresponds to one mixer period. The transport stamps the slot
//! of the period it is about to play; a consumer that knows which period is
//! currently reaching the speakers reads that slot back. Slots are
//! overwritten round-robin, so a read may return a record from an earlier
//! lap, but never a mixture of two records.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{fence, AtomicU32, AtomicU64, Ordering};

use ms_ir::TimeRecord;

/// Slots in a default table (about four seconds of packets).
pub const DEFAULT_TIME_RECORD_SLOTS: usize = 1024;

/// One sequence-locked record. An odd sequence number marks a write in
/// progress; readers retry until they see the same even number on both
/// sides of their loads.
#[derive(Debug, Default)]
struct Slot {
    sequence: AtomicU32,
    position: AtomicU64,
    timing: AtomicU64,
}

impl Slot {
    /// Single writer only.
    fn store(&self, record: TimeRecord) {
        let (position, timing) = pack(record);
        let seq = self.sequence.load(Ordering::Relaxed);
        self.sequence.store(seq.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);
        self.position.store(position, Ordering::Relaxed);
        self.timing.store(timing, Ordering::Relaxed);
        self.sequence.store(seq.wrapping_add(2), Ordering::Release);
    }

    fn load(&self) -> TimeRecord {
        loop {
            let before = self.sequence.load(Ordering::Acquire);
            if before & 1 == 0 {
                let position = self.position.load(Ordering::Relaxed);
                let timing = self.timing.load(Ordering::Relaxed);
                fence(Ordering::Acquire);
                if self.sequence.load(Ordering::Relaxed) == before {
                    return unpack(position, timing);
                }
            }
            core::hint::spin_loop();
        }
    }
}

fn pack(r: TimeRecord) -> (u64, u64) {
    let position = ((r.order as u64) << 32) | r.row as u64;
    let timing = r.bpm as u64
        | ((r.tick_speed as u64) << 16)
        | ((r.master_volume as u64) << 24)
        | ((r.ticker as u64) << 32);
    (position, timing)
}

fn unpack(position: u64, timing: u64) -> TimeRecord {
    TimeRecord {
        order: (position >> 32) as u32,
        row: position as u32,
        bpm: timing as u16,
        tick_speed: (timing >> 16) as u8,
        master_volume: (timing >> 24) as u8,
        ticker: (timing >> 32) as u32,
    }
}

/// Fixed-capacity ring of [`TimeRecord`]s, shared between one writer (the
/// transport) and any number of readers.
#[derive(Debug)]
pub struct TimeRecordTable {
    slots: Box<[Slot]>,
}

impl TimeRecordTable {
    /// Create a table with `capacity` slots (at least one), all zeroed.
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity.max(1));
        slots.resize_with(capacity.max(1), Slot::default);
        Self {
            slots: slots.into_boxed_slice(),
        }
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Always false; a table has at least one slot.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Read the record in `slot`. Indices wrap modulo [`len`](Self::len),
    /// so a free-running packet counter can be passed directly.
    pub fn snapshot(&self, slot: usize) -> TimeRecord {
        self.slots[slot % self.slots.len()].load()
    }

    /// Slot of a free-running 64-bit packet counter, reduced before any
    /// narrowing so every target maps the same packet to the same slot.
    pub fn slot_of(&self, packet: u64) -> usize {
        (packet % self.slots.len() as u64) as usize
    }

    pub(crate) fn record(&self, slot: usize, record: TimeRecord) {
        self.slots[slot % self.slots.len()].store(record);
    }

    pub(crate) fn fill(&self, record: TimeRecord) {
        for slot in self.slots.iter() {
            slot.store(record);
        }
    }
}

impl Default for TimeRecordTable {
    fn default() -> Self {
        Self::new(DEFAULT_TIME_RECORD_SLOTS)
    }
}
