//! Packet driver: feeds the output device one beat packet at a time.
//!
//! Each packet is one callback slot. The driver stamps the slot through the
//! transport, lets the frame source render the packet, and queues it on the
//! device. Packets are written whole, so `frames_written / packet_frames` is
//! always the slot of the next packet.

use log::debug;
use ms_audio::{CpalMixer, Frame};
use ms_engine::{packet_frames, MixerEngine, TimeRecord, Transport, TransportState};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Renders one packet of audio for the position about to be heard.
pub type FrameSource = Box<dyn FnMut(TimeRecord, &mut [Frame]) + Send>;

/// Device-side operations the driver needs beyond the mixer capability.
pub trait PacketOutput: MixerEngine {
    /// Started and not paused.
    fn is_running(&self) -> bool;
    fn vacant_frames(&self) -> usize;
    fn write(&mut self, frames: &[Frame]) -> usize;
    fn frames_written(&self) -> u64;
}

impl PacketOutput for CpalMixer {
    fn is_running(&self) -> bool {
        CpalMixer::is_running(self)
    }

    fn vacant_frames(&self) -> usize {
        CpalMixer::vacant_frames(self)
    }

    fn write(&mut self, frames: &[Frame]) -> usize {
        CpalMixer::write(self, frames)
    }

    fn frames_written(&self) -> u64 {
        self.clock().frames_written()
    }
}

/// Everything behind the controller's lock.
pub struct Playback<M: PacketOutput> {
    pub transport: Transport<M>,
    pub source: Option<FrameSource>,
    buffer: Vec<Frame>,
}

impl<M: PacketOutput> Playback<M> {
    pub fn new(transport: Transport<M>) -> Self {
        Self {
            transport,
            source: None,
            buffer: Vec::new(),
        }
    }

    /// Produce one packet if the device is running and has room for it.
    pub fn pump_packet(&mut self) -> bool {
        let mixer = self.transport.mixer();
        let frames = packet_frames(mixer.sample_rate());
        if !mixer.is_running() || mixer.vacant_frames() < frames as usize {
            return false;
        }
        let packet = mixer.frames_written() / frames as u64;
        let slot = self.transport.slot_of(packet);

        let record = self.transport.current_record();
        let before = self.transport.state();
        step_transport(&mut self.transport, slot, frames);
        if before == TransportState::Playing && self.transport.is_stopped() {
            debug!(
                "playback halted at order {} row {}",
                self.transport.order_position(),
                self.transport.row_position()
            );
        }

        self.buffer.clear();
        self.buffer.resize(frames as usize, Frame::silence());
        if let Some(source) = self.source.as_mut() {
            source(record, self.buffer.as_mut_slice());
        }
        self.transport.mixer_mut().write(&self.buffer);
        true
    }
}

#[cfg(feature = "alloc_check")]
fn step_transport<M: PacketOutput>(transport: &mut Transport<M>, slot: usize, frames: u32) {
    assert_no_alloc::assert_no_alloc(|| transport.on_beat_packet(slot, frames));
}

#[cfg(not(feature = "alloc_check"))]
fn step_transport<M: PacketOutput>(transport: &mut Transport<M>, slot: usize, frames: u32) {
    transport.on_beat_packet(slot, frames);
}

/// Drive packets until `stop_signal` is raised. Sleeps briefly whenever
/// the device is full, paused or closed.
pub(crate) fn driver_thread<M: PacketOutput>(
    playback: Arc<Mutex<Playback<M>>>,
    stop_signal: Arc<AtomicBool>,
) {
    while !stop_signal.load(Ordering::Relaxed) {
        let wrote = playback.lock().pump_packet();
        if !wrote {
            std::thread::sleep(Duration::from_millis(2));
        }
    }
}
