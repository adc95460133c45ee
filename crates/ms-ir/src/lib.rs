//! Core data types for the modseq sequencer.
//!
//! This crate defines what the sequencer reads (a song's order table and
//! pattern lengths, behind the [`SongSource`] trait) and what it writes (the
//! [`TimeRecord`] position snapshot).
//!
//! Designed to be `no_std` compatible with the `alloc` crate.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

mod position;
pub mod song;

pub use position::TimeRecord;
pub use song::{Pattern, Song, SongSource, DEFAULT_PATTERN_ROWS};
