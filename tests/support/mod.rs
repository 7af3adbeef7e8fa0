#![allow(dead_code)]

pub mod wav;

use std::f64::consts::PI;

/// Sine at `peak_db` dBFS peak.
pub fn sine(sample_rate: u32, frequency: f64, peak_db: f64, seconds: f64) -> Vec<f32> {
    let amplitude = 10f64.powf(peak_db / 20.0);
    let n = (seconds * sample_rate as f64) as usize;
    (0..n)
        .map(|i| (amplitude * (2.0 * PI * frequency * i as f64 / sample_rate as f64).sin()) as f32)
        .collect()
}
