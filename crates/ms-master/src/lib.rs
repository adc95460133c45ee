//! Headless controller for the modseq sequencer.
//!
//! Owns the transport behind a lock, runs the packet driver thread that
//! feeds the audio device, and answers latency-compensated position queries
//! without touching the lock.

mod driver;

use log::debug;
use ms_audio::{CpalMixer, DeviceClock};
use ms_engine::{TimeRecordTable, Transport};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

// Re-export common types so callers don't need ms-ir/ms-engine directly.
pub use driver::{FrameSource, PacketOutput, Playback};
pub use ms_audio::Frame;
pub use ms_engine::{
    status_code, DeviceError, PlayerConfig, StartOptions, TimeRecord, TransportState,
    PACKETS_PER_SECOND,
};
pub use ms_ir::{Pattern, Song, SongSource};

/// Headless playback controller over the default output device.
pub struct Controller {
    playback: Arc<Mutex<Playback<CpalMixer>>>,
    time_records: Arc<TimeRecordTable>,
    clock: Arc<DeviceClock>,
    driver: Option<DriverHandle>,
}

struct DriverHandle {
    stop_signal: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Controller {
    pub fn new(config: PlayerConfig) -> Self {
        let mixer = CpalMixer::new();
        let clock = mixer.clock();
        let transport = Transport::new(mixer, config);
        let time_records = transport.time_records();

        Self {
            playback: Arc::new(Mutex::new(Playback::new(transport))),
            time_records,
            clock,
            driver: None,
        }
    }

    /// Install the renderer that fills each packet. Without one the device
    /// plays silence.
    pub fn set_frame_source(&self, source: FrameSource) {
        self.playback.lock().source = Some(source);
    }

    // --- Transport ---

    /// Start `song` from the position in `options`.
    pub fn play(
        &mut self,
        song: Arc<dyn SongSource>,
        options: StartOptions,
    ) -> Result<(), DeviceError> {
        self.ensure_driver();
        self.playback.lock().transport.start_playing(song, options)
    }

    pub fn stop(&self) -> Result<(), DeviceError> {
        self.playback.lock().transport.stop_playing()
    }

    pub fn pause(&self) -> Result<(), DeviceError> {
        self.playback.lock().transport.pause_playing()
    }

    pub fn resume(&self) -> Result<(), DeviceError> {
        self.playback.lock().transport.resume_playing(true)
    }

    pub fn next_pattern(&self) {
        self.playback.lock().transport.next_pattern();
    }

    pub fn previous_pattern(&self) {
        self.playback.lock().transport.last_pattern();
    }

    /// Jump to `order`/`row`, clearing channel and effect state.
    pub fn set_position(&self, order: u32, row: u32) {
        self.playback
            .lock()
            .transport
            .set_pattern_pos(order, row, true, true);
    }

    /// Run `f` with the transport locked.
    pub fn with_transport<R>(&self, f: impl FnOnce(&mut Transport<CpalMixer>) -> R) -> R {
        f(&mut self.playback.lock().transport)
    }

    pub fn state(&self) -> TransportState {
        self.playback.lock().transport.state()
    }

    // --- Position ---

    /// Position the sequencer is currently rendering (ahead of the speakers
    /// by the output buffer).
    pub fn position(&self) -> TimeRecord {
        self.playback.lock().transport.current_record()
    }

    /// Position of the audio currently reaching the output. Lock-free.
    pub fn audible_position(&self) -> TimeRecord {
        let slot = self.time_records.slot_of(self.clock.played_packets());
        self.time_records.snapshot(slot)
    }

    /// Frames queued but not yet played.
    pub fn latency_frames(&self) -> u64 {
        self.clock
            .frames_written()
            .saturating_sub(self.clock.frames_played())
    }

    pub fn sample_rate(&self) -> u32 {
        self.clock.sample_rate()
    }

    // --- Driver ---

    fn ensure_driver(&mut self) {
        if self.driver.is_some() {
            return;
        }

        let stop_signal = Arc::new(AtomicBool::new(false));
        let playback = Arc::clone(&self.playback);
        let stop = Arc::clone(&stop_signal);

        let thread = std::thread::Builder::new()
            .name("ms-driver".into())
            .spawn(move || driver::driver_thread(playback, stop))
            .map_err(|e| log::warn!("cannot spawn packet driver: {}", e))
            .ok();

        self.driver = Some(DriverHandle {
            stop_signal,
            thread,
        });
        debug!("packet driver started");
    }

    fn stop_driver(&mut self) {
        if let Some(mut driver) = self.driver.take() {
            driver.stop_signal.store(true, Ordering::Relaxed);
            if let Some(handle) = driver.thread.take() {
                let _ = handle.join();
            }
        }
    }
}

impl Default for Controller {
    fn default() -> Self {
        Self::new(PlayerConfig::default())
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.stop_driver();
        let mut playback = self.playback.lock();
        if playback.transport.is_playing() || playback.transport.song().is_some() {
            let _ = playback.transport.stop_playing();
        }
    }
}
