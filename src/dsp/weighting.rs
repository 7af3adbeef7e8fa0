//! K-weighting (BS.1770) and A-weighting (IEC 61672) biquad cascades.

use std::collections::HashMap;
use std::f64::consts::PI;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use super::biquad::{apply_cascade, calculate_frequency_response, BiquadCoeffs};
use super::db::amp_to_db;
use crate::error::{Error, Result};

pub const MIN_SAMPLE_RATE: f64 = 8_000.0;
pub const MAX_SAMPLE_RATE: f64 = 384_000.0;

/// Rate at which the published BS.1770 coefficients apply verbatim.
pub const K_REFERENCE_RATE: f64 = 48_000.0;
pub const K_NORMALIZATION_HZ: f64 = 997.0;
pub const A_NORMALIZATION_HZ: f64 = 1_000.0;

const K_REFERENCE_TABLE: [BiquadCoeffs; 2] = [
    BiquadCoeffs {
        b0: 1.535_124_859_586_97,
        b1: -2.691_696_189_406_38,
        b2: 1.198_392_810_852_85,
        a0: 1.0,
        a1: -1.690_659_293_182_41,
        a2: 0.732_480_774_215_85,
    },
    BiquadCoeffs {
        b0: 1.0,
        b1: -2.0,
        b2: 1.0,
        a0: 1.0,
        a1: -1.990_047_454_833_98,
        a2: 0.990_072_250_366_21,
    },
];

// Shelf and high-pass prototypes behind the published table.
const SHELF_HZ: f64 = 1681.974_450_955_531_9;
const SHELF_GAIN_DB: f64 = 3.999_843_853_97;
const SHELF_Q: f64 = 0.707_175_236_955_419_3;
const HIGH_PASS_HZ: f64 = 38.135_470_876_139_82;
const HIGH_PASS_Q: f64 = 0.500_327_037_325_395_3;

// IEC 61672 analog pole frequencies.
const A_POLE_1_HZ: f64 = 20.598_997;
const A_POLE_2_HZ: f64 = 107.652_65;
const A_POLE_3_HZ: f64 = 737.862_23;
const A_POLE_4_HZ: f64 = 12_194.217;

/// Poles at or past Nyquist cannot be pre-warped; they are pulled to this
/// fraction of the sample rate instead.
const MAX_POLE_FRACTION: f64 = 0.49;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Weighting {
    K,
    A,
}

pub fn validate_sample_rate(sample_rate: f64) -> Result<()> {
    if !sample_rate.is_finite() || sample_rate <= 0.0 {
        return Err(Error::invalid_input(
            "Sample rate must be a positive finite value",
        ));
    }
    if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&sample_rate) {
        return Err(Error::unsupported(format!(
            "Sample rate {sample_rate} Hz is not supported"
        )));
    }
    Ok(())
}

/// Per-sample-rate memo of designed cascades.
#[derive(Default)]
pub struct WeightingCache {
    cascades: Mutex<HashMap<(Weighting, u64), Arc<[BiquadCoeffs]>>>,
}

impl WeightingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> &'static WeightingCache {
        static SHARED: OnceLock<WeightingCache> = OnceLock::new();
        SHARED.get_or_init(WeightingCache::new)
    }

    pub fn get_or_create(&self, weighting: Weighting, sample_rate: f64) -> Result<Arc<[BiquadCoeffs]>> {
        validate_sample_rate(sample_rate)?;
        let key = (weighting, sample_rate.to_bits());
        let mut cascades = self.cascades.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = cascades.get(&key) {
            return Ok(Arc::clone(existing));
        }
        let designed: Arc<[BiquadCoeffs]> = match weighting {
            Weighting::K => design_k_weighting(sample_rate)?,
            Weighting::A => design_a_weighting(sample_rate)?,
        }
        .into();
        log::debug!("designed {:?}-weighting cascade for {} Hz", weighting, sample_rate);
        cascades.insert(key, Arc::clone(&designed));
        Ok(designed)
    }

    pub fn clear(&self) {
        self.cascades.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

pub fn get_k_weighting_coeffs(sample_rate: f64) -> Result<Arc<[BiquadCoeffs]>> {
    WeightingCache::shared().get_or_create(Weighting::K, sample_rate)
}

pub fn get_a_weighting_coeffs(sample_rate: f64) -> Result<Arc<[BiquadCoeffs]>> {
    WeightingCache::shared().get_or_create(Weighting::A, sample_rate)
}

pub fn clear_weighting_cache() {
    WeightingCache::shared().clear();
}

/// Two-section K-weighting pre-filter: high shelf, then high-pass.
///
/// At the reference rate the published table is returned as is. Elsewhere
/// both stages are re-derived through the bilinear transform and the
/// cascade is scaled to unity gain at 997 Hz.
pub fn design_k_weighting(sample_rate: f64) -> Result<Vec<BiquadCoeffs>> {
    validate_sample_rate(sample_rate)?;
    if sample_rate == K_REFERENCE_RATE {
        return Ok(K_REFERENCE_TABLE.to_vec());
    }

    let k = (PI * SHELF_HZ / sample_rate).tan();
    let vh = 10f64.powf(SHELF_GAIN_DB / 20.0);
    let vb = vh.powf(0.499_666_774_155);
    let norm = 1.0 + k / SHELF_Q + k * k;
    let shelf = BiquadCoeffs {
        b0: (vh + vb * k / SHELF_Q + k * k) / norm,
        b1: 2.0 * (k * k - vh) / norm,
        b2: (vh - vb * k / SHELF_Q + k * k) / norm,
        a0: 1.0,
        a1: 2.0 * (k * k - 1.0) / norm,
        a2: (1.0 - k / SHELF_Q + k * k) / norm,
    };

    let k = (PI * HIGH_PASS_HZ / sample_rate).tan();
    let norm = 1.0 + k / HIGH_PASS_Q + k * k;
    let high_pass = BiquadCoeffs {
        b0: 1.0,
        b1: -2.0,
        b2: 1.0,
        a0: 1.0,
        a1: 2.0 * (k * k - 1.0) / norm,
        a2: (1.0 - k / HIGH_PASS_Q + k * k) / norm,
    };

    let mut coeffs = vec![shelf, high_pass];
    normalize_at(&mut coeffs, K_NORMALIZATION_HZ, sample_rate)?;
    Ok(coeffs)
}

/// Four-section A-weighting: a double high-pass pole at f1, single
/// high-pass poles at f2 and f3, a double low-pass pole at f4. Unity at 1 kHz.
pub fn design_a_weighting(sample_rate: f64) -> Result<Vec<BiquadCoeffs>> {
    validate_sample_rate(sample_rate)?;
    let two_fs = 2.0 * sample_rate;
    let prewarp = |hz: f64| two_fs * (PI * hz.min(MAX_POLE_FRACTION * sample_rate) / sample_rate).tan();

    // s = 2fs (1 - z^-1) / (1 + z^-1) applied to s / (s + w) and w / (s + w).
    let high_pass = |w: f64| (two_fs / (two_fs + w), (w - two_fs) / (two_fs + w));
    let low_pass = |w: f64| (w / (two_fs + w), (w - two_fs) / (two_fs + w));

    let (g, p) = high_pass(prewarp(A_POLE_1_HZ));
    let section1 = BiquadCoeffs {
        b0: g * g,
        b1: -2.0 * g * g,
        b2: g * g,
        a0: 1.0,
        a1: 2.0 * p,
        a2: p * p,
    };

    let first_order_high_pass = |hz: f64| {
        let (g, p) = high_pass(prewarp(hz));
        BiquadCoeffs { b0: g, b1: -g, b2: 0.0, a0: 1.0, a1: p, a2: 0.0 }
    };
    let section2 = first_order_high_pass(A_POLE_2_HZ);
    let section3 = first_order_high_pass(A_POLE_3_HZ);

    let (g, p) = low_pass(prewarp(A_POLE_4_HZ));
    let section4 = BiquadCoeffs {
        b0: g * g,
        b1: 2.0 * g * g,
        b2: g * g,
        a0: 1.0,
        a1: 2.0 * p,
        a2: p * p,
    };

    let mut coeffs = vec![section1, section2, section3, section4];
    normalize_at(&mut coeffs, A_NORMALIZATION_HZ, sample_rate)?;
    Ok(coeffs)
}

/// Scales the first section so the whole cascade has unity magnitude at `frequency`.
fn normalize_at(coeffs: &mut [BiquadCoeffs], frequency: f64, sample_rate: f64) -> Result<()> {
    let response = calculate_frequency_response(coeffs, frequency, sample_rate)?;
    if !(response.magnitude.is_finite() && response.magnitude > 0.0) {
        return Err(Error::invalid_input(format!(
            "cascade has no usable gain at {frequency} Hz"
        )));
    }
    if let Some(first) = coeffs.first_mut() {
        first.scale_numerator(1.0 / response.magnitude);
    }
    Ok(())
}

/// K-weights `samples` from a zeroed filter state.
pub fn apply_k_weighting(samples: &[f32], sample_rate: f64) -> Result<Vec<f64>> {
    let coeffs = get_k_weighting_coeffs(sample_rate)?;
    Ok(apply_cascade(samples, &coeffs))
}

/// A-weights `samples` from a zeroed filter state.
pub fn apply_a_weighting(samples: &[f32], sample_rate: f64) -> Result<Vec<f32>> {
    let coeffs = get_a_weighting_coeffs(sample_rate)?;
    Ok(apply_cascade(samples, &coeffs).into_iter().map(|s| s as f32).collect())
}

struct Table3Point {
    frequency: f64,
    expected_db: f64,
    class1_tolerance_db: f64,
}

const TABLE3: [Table3Point; 10] = [
    Table3Point { frequency: 31.5, expected_db: -39.4, class1_tolerance_db: 2.0 },
    Table3Point { frequency: 63.0, expected_db: -26.2, class1_tolerance_db: 1.5 },
    Table3Point { frequency: 125.0, expected_db: -16.1, class1_tolerance_db: 1.5 },
    Table3Point { frequency: 250.0, expected_db: -8.6, class1_tolerance_db: 1.4 },
    Table3Point { frequency: 500.0, expected_db: -3.2, class1_tolerance_db: 1.3 },
    Table3Point { frequency: 1000.0, expected_db: 0.0, class1_tolerance_db: 0.7 },
    Table3Point { frequency: 2000.0, expected_db: 1.2, class1_tolerance_db: 1.2 },
    Table3Point { frequency: 4000.0, expected_db: 1.0, class1_tolerance_db: 1.4 },
    Table3Point { frequency: 8000.0, expected_db: -1.1, class1_tolerance_db: 1.6 },
    Table3Point { frequency: 16000.0, expected_db: -6.6, class1_tolerance_db: 3.0 },
];

/// Checks the A cascade against the IEC 61672-1 Table 3 Class 1 limits,
/// skipping points above 80% of Nyquist.
pub fn validate_table3_compliance(sample_rate: f64) -> Result<bool> {
    let coeffs = get_a_weighting_coeffs(sample_rate)?;
    let limit = sample_rate / 2.0 * 0.8;
    for point in TABLE3.iter().filter(|p| p.frequency < limit) {
        let response = calculate_frequency_response(&coeffs, point.frequency, sample_rate)?;
        let error = (amp_to_db(response.magnitude) - point.expected_db).abs();
        if error > point.class1_tolerance_db {
            log::debug!(
                "A-weighting at {} Hz misses Table 3 by {:.2} dB ({} Hz rate)",
                point.frequency,
                error,
                sample_rate
            );
            return Ok(false);
        }
    }
    Ok(true)
}
