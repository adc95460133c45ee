//! modseq CLI: headless playback of a generated song with a row click.
//!
//! Usage:
//!   cargo run --bin modseq-cli -- --orders 4 --rows 16 --bpm 140
//!   cargo run --bin modseq-cli -- --config player.toml --repeat --seconds 20

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use ms_master::{
    Controller, Frame, FrameSource, Pattern, PlayerConfig, Song, StartOptions, TimeRecord,
    TransportState, PACKETS_PER_SECOND,
};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[cfg(feature = "alloc_check")]
#[global_allocator]
static A: assert_no_alloc::AllocDisabler = assert_no_alloc::AllocDisabler;

#[derive(Parser, Debug)]
#[command(name = "modseq-cli", about = "Play a song skeleton through the modseq sequencer")]
struct Args {
    /// Entries in the order table
    #[arg(long, default_value_t = 4)]
    orders: u16,

    /// Rows per pattern
    #[arg(long, default_value_t = 64)]
    rows: u16,

    /// Initial tempo
    #[arg(long, default_value_t = 125)]
    bpm: u16,

    /// Initial ticks per row
    #[arg(long, default_value_t = 6)]
    speed: u8,

    /// Channel count
    #[arg(long, default_value_t = 4)]
    channels: u32,

    /// Loop back to the first order at the end
    #[arg(long)]
    repeat: bool,

    #[arg(long, default_value_t = 0)]
    start_order: u32,

    #[arg(long, default_value_t = 0)]
    start_row: u32,

    /// Player configuration (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Stop after this many seconds
    #[arg(long)]
    seconds: Option<u64>,

    /// Play silence instead of the row click
    #[arg(long)]
    silent: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;

    let song = build_song(&args);
    println!("Title:    {}", song.title);
    println!("Channels: {}", song.channels);
    println!("Orders:   {}", song.order.len());
    println!("Tempo:    {} BPM, Speed: {}", song.initial_tempo, song.initial_speed);
    println!();

    let mut ctrl = Controller::new(config);
    if !args.silent {
        ctrl.set_frame_source(row_click());
    }

    let options = StartOptions {
        repeat: args.repeat,
        start_order: args.start_order,
        start_row: args.start_row,
        num_channels: Some(args.channels),
        ..Default::default()
    };
    ctrl.play(Arc::new(song), options)
        .map_err(|e| anyhow::anyhow!("cannot start playback ({}): {}", e.code(), e))?;

    play_audio(&ctrl, args.seconds.map(Duration::from_secs));

    ctrl.stop()
        .map_err(|e| anyhow::anyhow!("cannot close device ({}): {}", e.code(), e))?;
    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> Result<PlayerConfig> {
    let Some(path) = path else {
        return Ok(PlayerConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let config = toml::from_str(&text)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    info!("loaded player config from {}", path.display());
    Ok(config)
}

fn build_song(args: &Args) -> Song {
    let mut song = Song::with_channels("modseq demo", args.channels);
    song.initial_tempo = args.bpm;
    song.initial_speed = args.speed;
    let pattern = song.add_pattern(Pattern::new(args.rows.max(1)));
    for _ in 0..args.orders.max(1) {
        song.add_order(pattern);
    }
    song
}

/// Short square-wave blip at the first packet of each row, accented on
/// every fourth row.
fn row_click() -> FrameSource {
    let mut last: Option<(u32, u32)> = None;

    Box::new(move |record: TimeRecord, frames: &mut [Frame]| {
        let pos = record.position();
        if last == Some(pos) {
            return;
        }
        last = Some(pos);

        // 880 Hz at whatever rate the device opened with
        let sample_rate = frames.len() * PACKETS_PER_SECOND as usize;
        let half_period = (sample_rate / 1760).max(1);

        let amplitude: i16 = if record.row % 4 == 0 { 6000 } else { 2500 };
        for (i, frame) in frames.iter_mut().enumerate() {
            let s = if (i / half_period) % 2 == 0 {
                amplitude
            } else {
                -amplitude
            };
            *frame = Frame { left: s, right: s };
        }
    })
}

fn play_audio(ctrl: &Controller, limit: Option<Duration>) {
    println!("Playing...");
    println!();

    let started = Instant::now();
    while ctrl.state() == TransportState::Playing || ctrl.state() == TransportState::Paused {
        if limit.is_some_and(|l| started.elapsed() >= l) {
            break;
        }

        let pos = ctrl.audible_position();
        print!(
            "\rOrd: {:02X} | Row: {:02X} | BPM: {:3} | Spd: {:2} | Lat: {:5}",
            pos.order,
            pos.row,
            pos.bpm,
            pos.tick_speed,
            ctrl.latency_frames()
        );
        let _ = std::io::stdout().flush();
        std::thread::sleep(Duration::from_millis(10));
    }

    println!("\rDone.                                                  ");
}
