//! CPAL-based mixer engine.
//!
//! CPAL streams are not `Send`, so the stream lives on its own device
//! thread. The mixer itself only holds the producer end of the frame ring
//! and a few shared atomics, which keeps it movable into a transport that
//! is shared across threads.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BuildStreamError, Stream, StreamConfig};
use log::{debug, info, warn};
use ms_engine::{packet_frames, DeviceError, MixerEngine};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::mpsc::{self, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::frame::Frame;

const FALLBACK_SAMPLE_RATE: u32 = 44100;

/// Frame counters shared between the writer, the device callback and
/// position readers.
///
/// Frame `n` written is frame `n` played, so both counters divided by the
/// packet size give the same callback slot for the same audio.
#[derive(Debug)]
pub struct DeviceClock {
    sample_rate: AtomicU32,
    frames_written: AtomicU64,
    frames_played: AtomicU64,
}

impl DeviceClock {
    fn new() -> Self {
        Self {
            sample_rate: AtomicU32::new(FALLBACK_SAMPLE_RATE),
            frames_written: AtomicU64::new(0),
            frames_played: AtomicU64::new(0),
        }
    }

    fn reset_counters(&self) {
        self.frames_written.store(0, Ordering::Relaxed);
        self.frames_played.store(0, Ordering::Relaxed);
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.load(Ordering::Relaxed)
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written.load(Ordering::Relaxed)
    }

    /// Frames the device has actually consumed.
    pub fn frames_played(&self) -> u64 {
        self.frames_played.load(Ordering::Relaxed)
    }

    pub fn packet_frames(&self) -> u32 {
        packet_frames(self.sample_rate())
    }

    /// Index of the next packet to be written.
    pub fn written_packets(&self) -> u64 {
        self.frames_written() / self.packet_frames() as u64
    }

    /// Index of the packet currently reaching the output.
    pub fn played_packets(&self) -> u64 {
        self.frames_played() / self.packet_frames() as u64
    }
}

struct DeviceThread {
    shutdown: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

type OpenResult = Result<(u32, HeapProd<Frame>), DeviceError>;

/// Mixer engine backed by the default output device.
///
/// Channel DSP is not done here: frames are supplied by the caller through
/// [`write`](Self::write) and streamed to the device.
pub struct CpalMixer {
    num_channels: u32,
    running: Arc<AtomicBool>,
    clock: Arc<DeviceClock>,
    producer: Option<HeapProd<Frame>>,
    device: Option<DeviceThread>,
}

impl CpalMixer {
    pub fn new() -> Self {
        Self {
            num_channels: 0,
            running: Arc::new(AtomicBool::new(false)),
            clock: Arc::new(DeviceClock::new()),
            producer: None,
            device: None,
        }
    }

    /// Shared frame counters.
    pub fn clock(&self) -> Arc<DeviceClock> {
        Arc::clone(&self.clock)
    }

    /// Is the device consuming frames (started and not paused)?
    pub fn is_running(&self) -> bool {
        self.device.is_some() && self.running.load(Ordering::Relaxed)
    }

    pub fn num_channels(&self) -> u32 {
        self.num_channels
    }

    /// Free space in the frame ring.
    pub fn vacant_frames(&self) -> usize {
        self.producer.as_ref().map_or(0, |p| p.vacant_len())
    }

    /// Queue frames for output without blocking. Returns how many fit.
    pub fn write(&mut self, frames: &[Frame]) -> usize {
        let Some(producer) = self.producer.as_mut() else {
            return 0;
        };
        let written = producer.push_slice(frames);
        self.clock
            .frames_written
            .fetch_add(written as u64, Ordering::Relaxed);
        written
    }
}

impl Default for CpalMixer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CpalMixer {
    fn drop(&mut self) {
        let _ = self.close_device();
    }
}

impl MixerEngine for CpalMixer {
    fn is_initialized(&self) -> bool {
        self.device.is_some()
    }

    fn init_device(&mut self) -> Result<(), DeviceError> {
        if self.device.is_some() {
            return Ok(());
        }

        self.running.store(false, Ordering::Relaxed);
        self.clock.reset_counters();

        let (reply_tx, reply_rx) = mpsc::sync_channel::<OpenResult>(1);
        let shutdown = Arc::new(AtomicBool::new(false));
        let running = Arc::clone(&self.running);
        let clock = Arc::clone(&self.clock);
        let thread_shutdown = Arc::clone(&shutdown);

        let handle = thread::Builder::new()
            .name("ms-audio-device".into())
            .spawn(move || device_thread(reply_tx, running, clock, thread_shutdown))
            .map_err(|_| DeviceError::NoFreeDevice)?;

        match reply_rx.recv() {
            Ok(Ok((sample_rate, producer))) => {
                self.clock.sample_rate.store(sample_rate, Ordering::Relaxed);
                self.producer = Some(producer);
                self.device = Some(DeviceThread { shutdown, handle });
                info!("audio device open at {} Hz", sample_rate);
                Ok(())
            }
            Ok(Err(err)) => {
                let _ = handle.join();
                Err(err)
            }
            Err(_) => {
                let _ = handle.join();
                Err(DeviceError::OpenFailed)
            }
        }
    }

    fn close_device(&mut self) -> Result<(), DeviceError> {
        self.running.store(false, Ordering::Relaxed);
        self.producer = None;

        let Some(device) = self.device.take() else {
            return Ok(());
        };
        device.shutdown.store(true, Ordering::Release);
        device.handle.thread().unpark();
        device
            .handle
            .join()
            .map_err(|_| DeviceError::CloseFailed)?;

        debug!("audio device closed");
        Ok(())
    }

    fn set_num_channels(&mut self, num_channels: u32) {
        self.num_channels = num_channels;
    }

    fn reset_channels_without_muting(&mut self) {
        debug!("channel reset on {} channels", self.num_channels);
    }

    fn start_mixer(&mut self) {
        self.running.store(true, Ordering::Relaxed);
    }

    fn pause(&mut self) {
        self.running.store(false, Ordering::Relaxed);
    }

    fn resume(&mut self) -> Result<(), DeviceError> {
        if self.device.is_none() {
            return Err(DeviceError::OpenFailed);
        }
        self.running.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
    }

    fn clear_effect_memory(&mut self) {}

    fn sample_rate(&self) -> u32 {
        self.clock.sample_rate()
    }
}

fn device_thread(
    reply: SyncSender<OpenResult>,
    running: Arc<AtomicBool>,
    clock: Arc<DeviceClock>,
    shutdown: Arc<AtomicBool>,
) {
    let stream = match open_stream(running, clock) {
        Ok((stream, sample_rate, producer)) => {
            if reply.send(Ok((sample_rate, producer))).is_err() {
                return;
            }
            stream
        }
        Err(err) => {
            let _ = reply.send(Err(err));
            return;
        }
    };

    while !shutdown.load(Ordering::Acquire) {
        thread::park();
    }
    drop(stream);
}

fn open_stream(
    running: Arc<AtomicBool>,
    clock: Arc<DeviceClock>,
) -> Result<(Stream, u32, HeapProd<Frame>), DeviceError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or(DeviceError::NoFreeDevice)?;
    let name = device.name().map_err(|_| DeviceError::DeviceId)?;

    let supported = device
        .default_output_config()
        .map_err(|_| DeviceError::Capabilities)?;

    let mut config: StreamConfig = supported.into();
    // The callback below interleaves exactly two channels
    config.channels = 2;
    let sample_rate = config.sample_rate.0;
    let channels = config.channels as usize;

    // About 100ms of buffering between writer and device
    let rb = HeapRb::<Frame>::new((sample_rate as usize / 10).max(1));
    let (producer, mut consumer) = rb.split();

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                if !running.load(Ordering::Relaxed) {
                    data.fill(0.0);
                    return;
                }

                let mut played = 0u64;
                for chunk in data.chunks_mut(channels) {
                    let (left, right) = match consumer.try_pop() {
                        Some(frame) => {
                            played += 1;
                            frame.to_f32()
                        }
                        None => (0.0, 0.0),
                    };
                    for (i, sample) in chunk.iter_mut().enumerate() {
                        *sample = match i {
                            0 => left,
                            1 => right,
                            _ => 0.0,
                        };
                    }
                }
                if played > 0 {
                    clock.frames_played.fetch_add(played, Ordering::Relaxed);
                }
            },
            |err| warn!("audio stream error: {}", err),
            None,
        )
        .map_err(|e| match e {
            BuildStreamError::DeviceNotAvailable => DeviceError::NoFreeDevice,
            BuildStreamError::StreamConfigNotSupported => DeviceError::UnsupportedFormat,
            other => {
                warn!("cannot build stream on {}: {}", name, other);
                DeviceError::OpenFailed
            }
        })?;

    stream.play().map_err(|_| DeviceError::OpenFailed)?;
    debug!("stream running on {} ({} channels)", name, channels);

    Ok((stream, sample_rate, producer))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_mixer_accepts_no_frames() {
        let mut mixer = CpalMixer::new();
        assert!(!mixer.is_initialized());
        assert_eq!(mixer.vacant_frames(), 0);
        assert_eq!(mixer.write(&[Frame::silence(); 8]), 0);
        assert_eq!(mixer.clock().frames_written(), 0);
    }

    #[test]
    fn resume_without_device_fails() {
        let mut mixer = CpalMixer::new();
        assert_eq!(mixer.resume(), Err(DeviceError::OpenFailed));
    }

    #[test]
    fn close_without_device_is_ok() {
        let mut mixer = CpalMixer::new();
        assert_eq!(mixer.close_device(), Ok(()));
    }

    #[test]
    fn start_without_device_is_not_running() {
        let mut mixer = CpalMixer::new();
        mixer.start_mixer();
        assert!(!mixer.is_running());
    }

    #[test]
    fn clock_reports_fallback_rate_before_open() {
        let mixer = CpalMixer::new();
        assert_eq!(mixer.sample_rate(), FALLBACK_SAMPLE_RATE);
        assert_eq!(mixer.clock().packet_frames(), 176);
        assert_eq!(mixer.clock().played_packets(), 0);
    }

    #[test]
    fn channel_count_is_stored() {
        let mut mixer = CpalMixer::new();
        mixer.set_num_channels(6);
        assert_eq!(mixer.num_channels(), 6);
    }
}
