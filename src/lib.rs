//! Spectral, loudness and weighted-energy measurement for sampled audio.
//!
//! The numeric core lives in [`dsp`] and [`loudness`]; [`audio`] holds the
//! channel buffer model they consume.

pub mod audio;
pub mod dsp;
pub mod error;
pub mod loudness;

pub use audio::AudioData;
pub use error::{Error, Result};
pub use loudness::{get_lufs, LoudnessOptions, LoudnessResult};
