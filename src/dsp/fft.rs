//! FFT providers: a from-scratch radix-2 transform and a `rustfft` backend
//! behind one trait.

use std::f64::consts::PI;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::error::{Error, Result};

/// Interleaved spectrum plus the non-negative half as magnitude/phase.
#[derive(Clone, Debug)]
pub struct FftResult {
    /// `[re0, im0, re1, im1, ...]`, `2 * size` values.
    pub complex: Vec<f32>,
    pub magnitude: Vec<f32>,
    pub phase: Vec<f32>,
    /// Bin centers in Hz, `size / 2 + 1` values.
    pub frequencies: Arc<[f32]>,
}

impl FftResult {
    /// Index of the strongest non-negative bin.
    pub fn peak_bin(&self) -> Option<usize> {
        self.magnitude
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FftProfile {
    pub iterations: u32,
    pub mean: Duration,
}

pub trait FftProvider: Send + Sync {
    fn name(&self) -> &str;
    fn size(&self) -> usize;
    fn sample_rate(&self) -> f64;

    fn fft(&self, input: &[f32]) -> Result<FftResult>;

    /// Releases internal tables. Idempotent; later `fft` calls fail.
    fn dispose(&self);

    /// Timing of the most recent warm-up, if the provider was profiled.
    fn profile(&self) -> Option<FftProfile> {
        None
    }
}

impl fmt::Debug for dyn FftProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FftProvider")
            .field("name", &self.name())
            .field("size", &self.size())
            .field("sample_rate", &self.sample_rate())
            .finish()
    }
}

pub fn frequency_bins(size: usize, sample_rate: f64) -> Arc<[f32]> {
    let resolution = if size == 0 { 0.0 } else { sample_rate / size as f64 };
    (0..size / 2 + 1)
        .map(|i| (i as f64 * resolution) as f32)
        .collect()
}

fn check_input_len(input: &[f32], size: usize) -> Result<()> {
    if input.len() != size {
        return Err(Error::invalid_input(format!(
            "Invalid input size. Expected: {}, Actual: {}",
            size,
            input.len()
        )));
    }
    Ok(())
}

fn disposed(name: &str) -> Error {
    Error::invalid_input(format!("{name} has been disposed"))
}

/// Shared post-processing: interleave and derive the half spectrum.
fn build_result(real: &[f32], imag: &[f32], frequencies: Arc<[f32]>) -> FftResult {
    let size = real.len();
    let half = size / 2 + 1;
    let mut complex = Vec::with_capacity(size * 2);
    for (&re, &im) in real.iter().zip(imag) {
        complex.push(re);
        complex.push(im);
    }
    let mut magnitude = Vec::with_capacity(half);
    let mut phase = Vec::with_capacity(half);
    for (&re, &im) in real.iter().zip(imag).take(half) {
        magnitude.push((re * re + im * im).sqrt());
        phase.push(im.atan2(re));
    }
    FftResult {
        complex,
        magnitude,
        phase,
        frequencies,
    }
}

struct RadixTables {
    bit_reversal: Vec<u32>,
    twiddle_re: Vec<f32>,
    twiddle_im: Vec<f32>,
    frequencies: Arc<[f32]>,
}

impl RadixTables {
    fn new(size: usize, sample_rate: f64) -> Self {
        let bits = size.trailing_zeros();
        let bit_reversal = (0..size as u32)
            .map(|i| if bits == 0 { 0 } else { i.reverse_bits() >> (32 - bits) })
            .collect();

        let half = size / 2;
        let (twiddle_re, twiddle_im) = (0..half)
            .map(|k| {
                let angle = -2.0 * PI * k as f64 / size as f64;
                (angle.cos() as f32, angle.sin() as f32)
            })
            .unzip();

        Self {
            bit_reversal,
            twiddle_re,
            twiddle_im,
            frequencies: frequency_bins(size, sample_rate),
        }
    }
}

/// Iterative radix-2 Cooley–Tukey with precomputed bit-reversal and twiddles.
pub struct NativeFftProvider {
    size: usize,
    sample_rate: f64,
    tables: RwLock<Option<RadixTables>>,
}

impl NativeFftProvider {
    pub const NAME: &'static str = "Native FFT (Cooley-Tukey)";

    pub fn new(size: usize, sample_rate: f64) -> Result<Self> {
        if !size.is_power_of_two() {
            return Err(Error::invalid_input(format!(
                "FFT size must be a power of two, got {size}"
            )));
        }
        Ok(Self {
            size,
            sample_rate,
            tables: RwLock::new(Some(RadixTables::new(size, sample_rate))),
        })
    }
}

impl FftProvider for NativeFftProvider {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn size(&self) -> usize {
        self.size
    }

    fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    fn fft(&self, input: &[f32]) -> Result<FftResult> {
        check_input_len(input, self.size)?;
        let guard = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        let tables = guard.as_ref().ok_or_else(|| disposed(Self::NAME))?;

        let n = self.size;
        let mut real = vec![0.0f32; n];
        let mut imag = vec![0.0f32; n];
        for (&sample, &reversed) in input.iter().zip(&tables.bit_reversal) {
            real[reversed as usize] = sample;
        }

        let mut stage = 1;
        while stage < n {
            let block = stage * 2;
            let twiddle_step = n / block;
            for start in (0..n).step_by(block) {
                for j in 0..stage {
                    let wr = tables.twiddle_re[j * twiddle_step];
                    let wi = tables.twiddle_im[j * twiddle_step];
                    let even = start + j;
                    let odd = even + stage;

                    let t_re = real[odd] * wr - imag[odd] * wi;
                    let t_im = real[odd] * wi + imag[odd] * wr;

                    real[odd] = real[even] - t_re;
                    imag[odd] = imag[even] - t_im;
                    real[even] += t_re;
                    imag[even] += t_im;
                }
            }
            stage = block;
        }

        Ok(build_result(&real, &imag, Arc::clone(&tables.frequencies)))
    }

    fn dispose(&self) {
        self.tables.write().unwrap_or_else(PoisonError::into_inner).take();
    }
}

struct PlannedFft {
    plan: Arc<dyn Fft<f32>>,
    frequencies: Arc<[f32]>,
}

/// Accelerated backend delegating to `rustfft`; any non-zero size.
pub struct RustFftProvider {
    size: usize,
    sample_rate: f64,
    planned: RwLock<Option<PlannedFft>>,
    last_profile: Mutex<Option<FftProfile>>,
}

impl RustFftProvider {
    pub const NAME: &'static str = "RustFFT";
    const PROFILE_ITERATIONS: u32 = 16;

    pub fn new(size: usize, sample_rate: f64, enable_profiling: bool) -> Result<Self> {
        if size == 0 {
            return Err(Error::unsupported("RustFFT cannot plan a zero-length transform"));
        }
        let plan = FftPlanner::<f32>::new().plan_fft_forward(size);
        let provider = Self {
            size,
            sample_rate,
            planned: RwLock::new(Some(PlannedFft {
                plan,
                frequencies: frequency_bins(size, sample_rate),
            })),
            last_profile: Mutex::new(None),
        };
        if enable_profiling {
            let profile = provider.warm_up()?;
            log::info!(
                "{} size {}: {:?} per transform over {} runs",
                Self::NAME,
                size,
                profile.mean,
                profile.iterations
            );
        }
        Ok(provider)
    }

    /// Times a batch of transforms over silence and records the mean.
    pub fn warm_up(&self) -> Result<FftProfile> {
        let guard = self.planned.read().unwrap_or_else(PoisonError::into_inner);
        let planned = guard.as_ref().ok_or_else(|| disposed(Self::NAME))?;

        let mut buffer = vec![Complex::new(0.0f32, 0.0); self.size];
        let started = Instant::now();
        for _ in 0..Self::PROFILE_ITERATIONS {
            planned.plan.process(&mut buffer);
        }
        let profile = FftProfile {
            iterations: Self::PROFILE_ITERATIONS,
            mean: started.elapsed() / Self::PROFILE_ITERATIONS,
        };
        *self.last_profile.lock().unwrap_or_else(PoisonError::into_inner) = Some(profile);
        Ok(profile)
    }
}

impl FftProvider for RustFftProvider {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn size(&self) -> usize {
        self.size
    }

    fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    fn fft(&self, input: &[f32]) -> Result<FftResult> {
        check_input_len(input, self.size)?;
        let guard = self.planned.read().unwrap_or_else(PoisonError::into_inner);
        let planned = guard.as_ref().ok_or_else(|| disposed(Self::NAME))?;

        let mut buffer: Vec<Complex<f32>> = input.iter().map(|&s| Complex::new(s, 0.0)).collect();
        planned.plan.process(&mut buffer);

        let (real, imag): (Vec<f32>, Vec<f32>) = buffer.iter().map(|c| (c.re, c.im)).unzip();
        Ok(build_result(&real, &imag, Arc::clone(&planned.frequencies)))
    }

    fn dispose(&self) {
        self.planned.write().unwrap_or_else(PoisonError::into_inner).take();
    }

    fn profile(&self) -> Option<FftProfile> {
        *self.last_profile.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(size: usize, frequency: f64, sample_rate: f64, amplitude: f64) -> Vec<f32> {
        (0..size)
            .map(|i| (amplitude * (2.0 * PI * frequency * i as f64 / sample_rate).sin()) as f32)
            .collect()
    }

    #[test]
    fn rejects_non_power_of_two() {
        for size in [0, 3, 1000] {
            let err = NativeFftProvider::new(size, 48_000.0).err().unwrap();
            assert_eq!(err.code(), "INVALID_INPUT");
        }
    }

    #[test]
    fn bit_aligned_sine_peaks_at_expected_bin() {
        let size = 1024;
        let rate = 48_000.0;
        let bin = 37;
        let frequency = bin as f64 * rate / size as f64;
        let provider = NativeFftProvider::new(size, rate).unwrap();
        let result = provider.fft(&sine(size, frequency, rate, 0.8)).unwrap();

        assert_eq!(result.magnitude.len(), size / 2 + 1);
        assert_eq!(result.phase.len(), size / 2 + 1);
        assert_eq!(result.complex.len(), size * 2);
        assert_eq!(result.peak_bin(), Some(bin));
        // A * N / 2 for a bin-centred sinusoid.
        assert!((result.magnitude[bin] - 0.8 * 512.0).abs() < 0.5);
    }

    #[test]
    fn frequencies_follow_resolution() {
        let provider = NativeFftProvider::new(256, 44_100.0).unwrap();
        let result = provider.fft(&vec![0.0; 256]).unwrap();
        for (i, &f) in result.frequencies.iter().enumerate() {
            assert!((f as f64 - i as f64 * 44_100.0 / 256.0).abs() < 1e-2);
        }
    }

    #[test]
    fn constant_signal_lands_in_dc() {
        let provider = NativeFftProvider::new(8, 8.0).unwrap();
        let result = provider.fft(&[1.0; 8]).unwrap();
        assert!((result.complex[0] - 8.0).abs() < 1e-5);
        for bin in 1..8 {
            assert!(result.complex[bin * 2].abs() < 1e-5);
            assert!(result.complex[bin * 2 + 1].abs() < 1e-5);
        }
    }

    #[test]
    fn native_matches_rustfft() {
        let size = 512;
        let input: Vec<f32> = (0..size)
            .map(|i| ((i as f32 * 0.37).sin() + 0.25 * (i as f32 * 1.91).cos()))
            .collect();
        let native = NativeFftProvider::new(size, 48_000.0).unwrap().fft(&input).unwrap();
        let backend = RustFftProvider::new(size, 48_000.0, false).unwrap().fft(&input).unwrap();
        for (a, b) in native.complex.iter().zip(&backend.complex) {
            assert!((a - b).abs() < 1e-3, "{a} vs {b}");
        }
    }

    #[test]
    fn size_mismatch_is_invalid_input() {
        let provider = NativeFftProvider::new(64, 48_000.0).unwrap();
        assert_eq!(provider.fft(&[0.0; 32]).unwrap_err().code(), "INVALID_INPUT");
        let backend = RustFftProvider::new(64, 48_000.0, false).unwrap();
        assert_eq!(backend.fft(&[0.0; 65]).unwrap_err().code(), "INVALID_INPUT");
    }

    #[test]
    fn dispose_is_idempotent_and_final() {
        let provider = NativeFftProvider::new(16, 16.0).unwrap();
        provider.dispose();
        provider.dispose();
        assert!(provider.fft(&[0.0; 16]).is_err());

        let backend = RustFftProvider::new(16, 16.0, false).unwrap();
        backend.dispose();
        backend.dispose();
        assert!(backend.fft(&[0.0; 16]).is_err());
        assert!(backend.warm_up().is_err());
    }

    #[test]
    fn profiling_is_backend_only() {
        let backend = RustFftProvider::new(128, 48_000.0, true).unwrap();
        assert_eq!(backend.profile().unwrap().iterations, 16);
        let quiet = RustFftProvider::new(128, 48_000.0, false).unwrap();
        assert!(quiet.profile().is_none());
        let native = NativeFftProvider::new(128, 48_000.0).unwrap();
        assert!(native.profile().is_none());
    }

    #[test]
    fn backend_accepts_any_nonzero_size() {
        assert!(RustFftProvider::new(1000, 48_000.0, false).is_ok());
        assert_eq!(
            RustFftProvider::new(0, 48_000.0, false).err().unwrap().code(),
            "UNSUPPORTED_FORMAT"
        );
    }
}
