//! Second-order IIR sections and cascades of them.

use std::f64::consts::PI;
use std::sync::Arc;

use crate::error::{Error, Result};

/// One second-order section. `a0` is kept normalized to 1.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BiquadCoeffs {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a0: f64,
    pub a1: f64,
    pub a2: f64,
}

impl BiquadCoeffs {
    pub fn is_finite(&self) -> bool {
        [self.b0, self.b1, self.b2, self.a0, self.a1, self.a2]
            .iter()
            .all(|c| c.is_finite())
    }

    pub(crate) fn scale_numerator(&mut self, gain: f64) {
        self.b0 *= gain;
        self.b1 *= gain;
        self.b2 *= gain;
    }
}

/// The past two inputs and outputs of one section.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BiquadState {
    pub x1: f64,
    pub x2: f64,
    pub y1: f64,
    pub y2: f64,
}

impl BiquadState {
    #[inline(always)]
    pub fn process(&mut self, coeffs: &BiquadCoeffs, x0: f64) -> f64 {
        let y0 = coeffs.b0 * x0 + coeffs.b1 * self.x1 + coeffs.b2 * self.x2
            - coeffs.a1 * self.y1
            - coeffs.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = x0;
        self.y2 = self.y1;
        self.y1 = y0;
        y0
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

pub fn apply_biquad_in_place(samples: &mut [f64], coeffs: &BiquadCoeffs, state: &mut BiquadState) {
    for sample in samples.iter_mut() {
        *sample = state.process(coeffs, *sample);
    }
}

/// Runs every section over the buffer in order, one state per section.
pub fn apply_cascade_in_place(samples: &mut [f64], coeffs: &[BiquadCoeffs], states: &mut [BiquadState]) {
    debug_assert_eq!(coeffs.len(), states.len());
    for (section, state) in coeffs.iter().zip(states.iter_mut()) {
        apply_biquad_in_place(samples, section, state);
    }
}

/// Filters a copy of `samples` through the cascade from a zeroed state.
pub fn apply_cascade(samples: &[f32], coeffs: &[BiquadCoeffs]) -> Vec<f64> {
    let mut filtered: Vec<f64> = samples.iter().map(|&s| s as f64).collect();
    let mut states = vec![BiquadState::default(); coeffs.len()];
    apply_cascade_in_place(&mut filtered, coeffs, &mut states);
    filtered
}

/// A cascade that keeps its delay state between calls.
///
/// One instance per stream: feeding two streams through the same filter
/// mixes their histories.
#[derive(Clone, Debug)]
pub struct BiquadCascade {
    coeffs: Arc<[BiquadCoeffs]>,
    states: Vec<BiquadState>,
}

impl BiquadCascade {
    pub fn new(coeffs: Arc<[BiquadCoeffs]>) -> Self {
        let states = vec![BiquadState::default(); coeffs.len()];
        Self { coeffs, states }
    }

    #[inline]
    pub fn process_sample(&mut self, x: f64) -> f64 {
        self.coeffs
            .iter()
            .zip(self.states.iter_mut())
            .fold(x, |acc, (section, state)| state.process(section, acc))
    }

    pub fn process_in_place(&mut self, samples: &mut [f64]) {
        apply_cascade_in_place(samples, &self.coeffs, &mut self.states);
    }

    pub fn reset(&mut self) {
        self.states.iter_mut().for_each(BiquadState::reset);
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrequencyResponse {
    pub magnitude: f64,
    pub phase: f64,
}

impl FrequencyResponse {
    pub fn magnitude_db(&self) -> f64 {
        super::db::amp_to_db(self.magnitude)
    }
}

/// Evaluates the cascade's transfer function at `z = e^{jω}`.
pub fn calculate_frequency_response(
    coeffs: &[BiquadCoeffs],
    frequency: f64,
    sample_rate: f64,
) -> Result<FrequencyResponse> {
    let omega = 2.0 * PI * frequency / sample_rate;
    let (sin_w, cos_w) = omega.sin_cos();
    let (sin_2w, cos_2w) = (2.0 * omega).sin_cos();

    let mut h_re = 1.0;
    let mut h_im = 0.0;

    for c in coeffs {
        let num_re = c.b0 + c.b1 * cos_w + c.b2 * cos_2w;
        let num_im = -c.b1 * sin_w - c.b2 * sin_2w;
        let den_re = c.a0 + c.a1 * cos_w + c.a2 * cos_2w;
        let den_im = -c.a1 * sin_w - c.a2 * sin_2w;

        let den_mag_sq = den_re * den_re + den_im * den_im;
        if den_mag_sq == 0.0 {
            return Err(Error::invalid_input(format!(
                "zero denominator while evaluating response at {frequency} Hz"
            )));
        }

        let stage_re = (num_re * den_re + num_im * den_im) / den_mag_sq;
        let stage_im = (num_im * den_re - num_re * den_im) / den_mag_sq;

        let re = h_re * stage_re - h_im * stage_im;
        let im = h_re * stage_im + h_im * stage_re;
        h_re = re;
        h_im = im;
    }

    Ok(FrequencyResponse {
        magnitude: (h_re * h_re + h_im * h_im).sqrt(),
        phase: h_im.atan2(h_re),
    })
}
