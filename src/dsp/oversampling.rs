//! Inter-sample peak estimation by oversampling.

use std::f64::consts::PI;
use std::str::FromStr;

use serde::Deserialize;

use super::window::{get_window, WindowParams, WindowType};
use crate::error::{Error, Result};

pub const SUPPORTED_FACTORS: [usize; 2] = [2, 4];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interpolation {
    Linear,
    /// Catmull–Rom through the four nearest samples.
    #[default]
    Cubic,
    /// Lanczos-3 windowed sinc.
    Sinc,
}

impl FromStr for Interpolation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linear" => Ok(Interpolation::Linear),
            "cubic" => Ok(Interpolation::Cubic),
            "sinc" => Ok(Interpolation::Sinc),
            other => Err(Error::invalid_input(format!("unknown interpolation: {other}"))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct TruePeakOptions {
    pub factor: usize,
    pub interpolation: Interpolation,
}

impl Default for TruePeakOptions {
    fn default() -> Self {
        Self {
            factor: 4,
            interpolation: Interpolation::Cubic,
        }
    }
}

fn validate_factor(factor: usize) -> Result<()> {
    if !SUPPORTED_FACTORS.contains(&factor) {
        return Err(Error::invalid_input(format!(
            "oversampling factor must be 2 or 4, got {factor}"
        )));
    }
    Ok(())
}

fn lanczos3(x: f64) -> f64 {
    if x.abs() < 1e-10 {
        return 1.0;
    }
    if x.abs() >= 3.0 {
        return 0.0;
    }
    let pi_x = PI * x;
    3.0 * (pi_x / 3.0).sin() * pi_x.sin() / (pi_x * pi_x)
}

/// Feeds every interpolated point, `(n - 1) * factor + 1` of them, to `emit`.
fn interpolate(samples: &[f32], factor: usize, interpolation: Interpolation, mut emit: impl FnMut(f64)) {
    let n = samples.len();
    if n == 0 {
        return;
    }
    let at = |i: usize| samples[i] as f64;

    match interpolation {
        Interpolation::Sinc => {
            let out_len = (n - 1) * factor + 1;
            for i in 0..out_len {
                let position = i as f64 / factor as f64;
                let base = (i / factor) as isize;
                let mut value = 0.0;
                for j in -3..=3 {
                    let k = base + j;
                    if k >= 0 && (k as usize) < n {
                        value += at(k as usize) * lanczos3(position - k as f64);
                    }
                }
                emit(value);
            }
        }
        Interpolation::Cubic if n >= 4 => {
            for i in 0..n - 1 {
                let p0 = at(i.saturating_sub(1));
                let p1 = at(i);
                let p2 = at(i + 1);
                let p3 = at((i + 2).min(n - 1));
                for j in 0..factor {
                    let t = j as f64 / factor as f64;
                    let t2 = t * t;
                    let t3 = t2 * t;
                    emit(
                        0.5 * (2.0 * p1
                            + (p2 - p0) * t
                            + (2.0 * p0 - 5.0 * p1 + 4.0 * p2 - p3) * t2
                            + (3.0 * p1 - p0 - 3.0 * p2 + p3) * t3),
                    );
                }
            }
            emit(at(n - 1));
        }
        // Linear, and cubic on fewer than four points.
        _ => {
            for i in 0..n - 1 {
                let (start, end) = (at(i), at(i + 1));
                let step = (end - start) / factor as f64;
                for j in 0..factor {
                    emit(start + step * j as f64);
                }
            }
            emit(at(n - 1));
        }
    }
}

/// Returns the upsampled signal.
pub fn oversample(samples: &[f32], options: &TruePeakOptions) -> Result<Vec<f32>> {
    validate_factor(options.factor)?;
    let mut output = Vec::with_capacity(samples.len().saturating_sub(1) * options.factor + 1);
    interpolate(samples, options.factor, options.interpolation, |v| output.push(v as f32));
    Ok(output)
}

/// Largest absolute interpolated value, never below the sample peak.
///
/// Empty input yields 0.
pub fn get_true_peak(samples: &[f32], options: &TruePeakOptions) -> Result<f64> {
    validate_factor(options.factor)?;
    let mut peak = sample_peak(samples);
    interpolate(samples, options.factor, options.interpolation, |v| {
        peak = peak.max(v.abs());
    });
    Ok(peak)
}

pub fn sample_peak(samples: &[f32]) -> f64 {
    samples.iter().fold(0.0f64, |peak, &s| peak.max((s as f64).abs()))
}

const PHASES: usize = 4;
const TAPS_PER_PHASE: usize = 12;
const TOTAL_TAPS: usize = PHASES * TAPS_PER_PHASE;
const KAISER_BETA: f64 = 8.0;

/// Kaiser-windowed sinc at π/4, split into four phases that each sum to one.
fn design_polyphase() -> Result<[[f64; TAPS_PER_PHASE]; PHASES]> {
    let window = get_window(
        TOTAL_TAPS,
        WindowType::Kaiser,
        &WindowParams {
            kaiser_beta: KAISER_BETA,
            ..WindowParams::default()
        },
    )?;
    let centre = (TOTAL_TAPS as f64 - 1.0) / 2.0;

    let mut phases = [[0.0; TAPS_PER_PHASE]; PHASES];
    for (i, &w) in window.iter().enumerate() {
        let x = (i as f64 - centre) * PI / PHASES as f64;
        let sinc = if x.abs() < 1e-10 { 1.0 } else { x.sin() / x };
        phases[i % PHASES][i / PHASES] = sinc * w as f64;
    }
    for phase in &mut phases {
        let sum: f64 = phase.iter().sum();
        if sum.abs() > 1e-10 {
            phase.iter_mut().for_each(|c| *c /= sum);
        }
    }
    Ok(phases)
}

/// Streaming 4× true-peak detector whose filter history spans calls.
#[derive(Clone, Debug)]
pub struct RealtimeTruePeak {
    phases: [[f64; TAPS_PER_PHASE]; PHASES],
    history: [f64; TAPS_PER_PHASE],
    write_pos: usize,
    peak: f64,
}

impl RealtimeTruePeak {
    pub const FACTOR: usize = PHASES;

    pub fn new(factor: usize) -> Result<Self> {
        if factor != Self::FACTOR {
            return Err(Error::invalid_input(format!(
                "realtime true peak supports only {}x oversampling, got {factor}",
                Self::FACTOR
            )));
        }
        Ok(Self {
            phases: design_polyphase()?,
            history: [0.0; TAPS_PER_PHASE],
            write_pos: 0,
            peak: 0.0,
        })
    }

    /// Peak of this block (linear), also folded into the running peak.
    pub fn process(&mut self, samples: &[f32]) -> f64 {
        let mut block_peak = 0.0f64;
        for &sample in samples {
            let x = sample as f64;
            block_peak = block_peak.max(x.abs());

            self.history[self.write_pos] = x;
            self.write_pos = (self.write_pos + 1) % TAPS_PER_PHASE;

            for phase in &self.phases {
                let mut acc = 0.0;
                for (tap, &c) in phase.iter().enumerate() {
                    let idx = (self.write_pos + TAPS_PER_PHASE - 1 - tap) % TAPS_PER_PHASE;
                    acc += c * self.history[idx];
                }
                block_peak = block_peak.max(acc.abs());
            }
        }
        self.peak = self.peak.max(block_peak);
        block_peak
    }

    /// Running peak since construction or the last reset.
    pub fn peak(&self) -> f64 {
        self.peak
    }

    pub fn reset(&mut self) {
        self.history = [0.0; TAPS_PER_PHASE];
        self.write_pos = 0;
        self.peak = 0.0;
    }
}
