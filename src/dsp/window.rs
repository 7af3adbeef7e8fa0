//! Analysis windows and the cache that memoizes them.

use std::collections::HashMap;
use std::f64::consts::PI;
use std::str::FromStr;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use serde::Deserialize;

use crate::error::{Error, Result};

pub const DEFAULT_KAISER_BETA: f64 = 8.6;
pub const DEFAULT_TUKEY_ALPHA: f64 = 0.5;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowType {
    #[serde(alias = "none")]
    Rectangular,
    #[default]
    Hann,
    Hamming,
    Blackman,
    Bartlett,
    Kaiser,
    Tukey,
}

impl FromStr for WindowType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "rectangular" | "none" => Ok(WindowType::Rectangular),
            "hann" => Ok(WindowType::Hann),
            "hamming" => Ok(WindowType::Hamming),
            "blackman" => Ok(WindowType::Blackman),
            "bartlett" => Ok(WindowType::Bartlett),
            "kaiser" => Ok(WindowType::Kaiser),
            "tukey" => Ok(WindowType::Tukey),
            other => Err(Error::invalid_input(format!("Unknown window type: {other}"))),
        }
    }
}

/// Shape parameters for the parametric windows.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct WindowParams {
    pub kaiser_beta: f64,
    pub tukey_alpha: f64,
}

impl WindowParams {
    pub fn validate(&self) -> Result<()> {
        if !self.kaiser_beta.is_finite() {
            return Err(Error::invalid_input(format!("Kaiser beta must be finite, got {}", self.kaiser_beta)));
        }
        if !self.tukey_alpha.is_finite() {
            return Err(Error::invalid_input(format!("Tukey alpha must be finite, got {}", self.tukey_alpha)));
        }
        Ok(())
    }
}

impl Default for WindowParams {
    fn default() -> Self {
        Self {
            kaiser_beta: DEFAULT_KAISER_BETA,
            tukey_alpha: DEFAULT_TUKEY_ALPHA,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
struct WindowKey {
    length: usize,
    window_type: WindowType,
    beta_bits: u64,
    alpha_bits: u64,
}

impl WindowKey {
    fn new(length: usize, window_type: WindowType, params: &WindowParams) -> Self {
        Self {
            length,
            window_type,
            beta_bits: params.kaiser_beta.to_bits(),
            alpha_bits: params.tukey_alpha.to_bits(),
        }
    }
}

/// Memoizes windows by `(length, type, params)`.
///
/// Windows are handed out as shared read-only slices; the cache owns them
/// until [`WindowCache::clear`].
#[derive(Default)]
pub struct WindowCache {
    windows: Mutex<HashMap<WindowKey, Arc<[f32]>>>,
}

impl WindowCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide cache used by [`get_window`] and [`fill_windowed_frame`].
    pub fn shared() -> &'static WindowCache {
        static SHARED: OnceLock<WindowCache> = OnceLock::new();
        SHARED.get_or_init(WindowCache::new)
    }

    pub fn get_or_create(
        &self,
        length: usize,
        window_type: WindowType,
        params: &WindowParams,
    ) -> Result<Arc<[f32]>> {
        params.validate()?;
        let key = WindowKey::new(length, window_type, params);
        if let Some(existing) = self.windows.lock().unwrap_or_else(PoisonError::into_inner).get(&key) {
            return Ok(Arc::clone(existing));
        }
        log::debug!("window cache miss: {:?} x{}", window_type, length);
        // Built outside the lock; a racing caller's window wins.
        let created: Arc<[f32]> = create_window(length, window_type, params).into();
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(Arc::clone(windows.entry(key).or_insert(created)))
    }

    pub fn len(&self) -> usize {
        self.windows.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.windows.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

pub fn get_window(length: usize, window_type: WindowType, params: &WindowParams) -> Result<Arc<[f32]>> {
    WindowCache::shared().get_or_create(length, window_type, params)
}

pub fn clear_window_cache() {
    WindowCache::shared().clear();
}

/// Validates a length coming from an untyped source (config, host bindings).
pub fn window_length_from_f64(length: f64) -> Result<usize> {
    if !length.is_finite() || length < 0.0 || length.fract() != 0.0 {
        return Err(Error::invalid_input(format!("Invalid window length: {length}")));
    }
    Ok(length as usize)
}

const BESSEL_MAX_TERMS: u32 = 500;

/// Zeroth-order modified Bessel function of the first kind.
fn bessel_i0(x: f64) -> f64 {
    let quarter_x2 = x * x / 4.0;
    let mut sum = 1.0;
    let mut term = 1.0;
    for k in 1..=BESSEL_MAX_TERMS {
        let k = k as f64;
        term *= quarter_x2 / (k * k);
        sum += term;
        if term <= f64::EPSILON * sum {
            break;
        }
    }
    sum
}

fn hann(i: usize, denom: f64) -> f64 {
    0.5 * (1.0 - (2.0 * PI * i as f64 / denom).cos())
}

fn create_window(length: usize, window_type: WindowType, params: &WindowParams) -> Vec<f32> {
    if length == 0 {
        return Vec::new();
    }
    if length == 1 || window_type == WindowType::Rectangular {
        return vec![1.0; length];
    }

    let denom = (length - 1) as f64;
    let values: Vec<f64> = match window_type {
        WindowType::Rectangular => vec![1.0; length],
        WindowType::Hann => (0..length).map(|i| hann(i, denom)).collect(),
        WindowType::Hamming => (0..length)
            .map(|i| 0.54 - 0.46 * (2.0 * PI * i as f64 / denom).cos())
            .collect(),
        WindowType::Blackman => (0..length)
            .map(|i| {
                let phase = 2.0 * PI * i as f64 / denom;
                0.42 - 0.5 * phase.cos() + 0.08 * (2.0 * phase).cos()
            })
            .collect(),
        WindowType::Bartlett => {
            let half = denom / 2.0;
            (0..length)
                .map(|i| 1.0 - ((i as f64 - half) / half).abs())
                .collect()
        }
        WindowType::Kaiser => {
            let beta = params.kaiser_beta;
            let norm = bessel_i0(beta);
            (0..length)
                .map(|i| {
                    let x = 2.0 * i as f64 / denom - 1.0;
                    bessel_i0(beta * (1.0 - x * x).max(0.0).sqrt()) / norm
                })
                .collect()
        }
        WindowType::Tukey => {
            let alpha = params.tukey_alpha;
            if alpha <= 0.0 {
                vec![1.0; length]
            } else if alpha >= 1.0 {
                (0..length).map(|i| hann(i, denom)).collect()
            } else {
                let taper = alpha * denom;
                let edge = taper / 2.0;
                let flat_end = denom * (1.0 - alpha / 2.0);
                (0..length)
                    .map(|i| {
                        let n = i as f64;
                        if n < edge {
                            0.5 * (1.0 + (PI * (2.0 * n / taper - 1.0)).cos())
                        } else if n <= flat_end {
                            1.0
                        } else {
                            0.5 * (1.0 + (PI * (2.0 * n / taper - 2.0 / alpha + 1.0)).cos())
                        }
                    })
                    .collect()
            }
        }
    };

    values.into_iter().map(|v| v as f32).collect()
}

pub fn apply_window_into<'a>(source: &[f32], target: &'a mut [f32], window: &[f32]) -> Result<&'a mut [f32]> {
    if source.len() != target.len() || source.len() != window.len() {
        return Err(Error::invalid_input("source/target/window lengths must match"));
    }
    for ((t, s), w) in target.iter_mut().zip(source).zip(window) {
        *t = s * w;
    }
    Ok(target)
}

pub struct FillWindowedFrameRequest<'a> {
    pub src: &'a [f32],
    pub src_start: usize,
    pub frame_length: usize,
    pub dst: &'a mut [f32],
    pub window_type: WindowType,
    pub window_params: WindowParams,
    /// Falls back to the shared cache when unset.
    pub cache: Option<&'a WindowCache>,
}

/// Copies `src[src_start..src_start + frame_length]` into `dst`, multiplied
/// by the window. Whatever lies beyond the source bounds stays zero.
pub fn fill_windowed_frame(request: FillWindowedFrameRequest<'_>) -> Result<()> {
    let FillWindowedFrameRequest {
        src,
        src_start,
        frame_length,
        dst,
        window_type,
        window_params,
        cache,
    } = request;
    window_params.validate()?;
    dst.fill(0.0);

    if dst.is_empty() || frame_length == 0 || src_start >= src.len() {
        return Ok(());
    }

    let valid_length = frame_length.min(dst.len());
    let available = valid_length.min(src.len() - src_start);
    let source = &src[src_start..src_start + available];

    if window_type == WindowType::Rectangular || valid_length == 1 {
        dst[..available].copy_from_slice(source);
        return Ok(());
    }

    let cache = cache.unwrap_or_else(|| WindowCache::shared());
    let window = cache.get_or_create(valid_length, window_type, &window_params)?;
    for ((d, s), w) in dst.iter_mut().zip(source).zip(window.iter()) {
        *d = s * w;
    }
    Ok(())
}
