use crate::dsp::db::amp_to_db;
use crate::dsp::fft::FftResult;
use crate::dsp::fft_runtime::{FftProviderCache, FftProviderKind, FftProviderRequest};
use crate::dsp::frame::{for_each_frame, padded_frame_count, FrameContext, FrameIterationOptions};
use crate::dsp::weighting::apply_a_weighting;
use crate::dsp::window::{apply_window_into, WindowCache, WindowParams, WindowType};
use crate::error::{Error, Result};
use crate::loudness::{LoudnessOptions, RealtimeLoudnessExecutor};

use super::features::{BandEnergies, GlobalAnalysis, RealtimeReading, SpectralFrame, SpectralSummary};
use super::AudioData;

pub const DEFAULT_FFT_SIZE: usize = 2048;
pub const DEFAULT_HOP_SIZE: usize = 1024;

#[derive(Clone, Debug, PartialEq)]
pub struct SpectralSettings {
    pub fft_size: usize,
    pub hop_size: usize,
    pub window: WindowType,
    pub window_params: WindowParams,
    pub provider: FftProviderKind,
    pub fallback_to_native: bool,
    pub enable_profiling: bool,
}

impl Default for SpectralSettings {
    fn default() -> Self {
        Self {
            fft_size: DEFAULT_FFT_SIZE,
            hop_size: DEFAULT_HOP_SIZE,
            window: WindowType::Hann,
            window_params: WindowParams::default(),
            provider: FftProviderKind::Native,
            fallback_to_native: true,
            enable_profiling: false,
        }
    }
}

impl SpectralSettings {
    /// Frames the spectral pass will visit for `audio`.
    pub fn frame_count(&self, audio: &AudioData) -> usize {
        if self.fft_size == 0 || self.hop_size == 0 {
            return 0;
        }
        padded_frame_count(audio.length(), self.fft_size, self.hop_size)
    }
}

pub fn global_analysis(audio: &AudioData) -> Result<GlobalAnalysis> {
    let mono = audio.to_mono();
    let samples = mono.channels().first().map_or(&[][..], Vec::as_slice);

    let weighted = apply_a_weighting(samples, audio.sample_rate() as f64)?;
    let a_weighted_rms = if weighted.is_empty() {
        0.0
    } else {
        (weighted.iter().map(|&s| (s as f64) * (s as f64)).sum::<f64>() / weighted.len() as f64).sqrt()
    };

    let global = GlobalAnalysis {
        sample_rate: audio.sample_rate(),
        channels: audio.number_of_channels(),
        total_samples: audio.length(),
        duration: audio.duration(),
        peak_amplitude: audio.peak(),
        a_weighted_rms_db: amp_to_db(a_weighted_rms),
    };
    log::info!(
        "Global: peak_amp={:.4}, A-weighted RMS={:.1} dBFS",
        global.peak_amplitude,
        global.a_weighted_rms_db
    );
    Ok(global)
}

fn band_energies(magnitude: &[f32], resolution: f32) -> BandEnergies {
    let band = |low_hz: f32, high_hz: f32| -> f32 {
        let low_bin = (low_hz / resolution) as usize;
        let high_bin = ((high_hz / resolution) as usize).min(magnitude.len());
        if low_bin >= high_bin {
            return 0.0;
        }
        let sum: f32 = magnitude[low_bin..high_bin].iter().map(|&x| x * x).sum();
        (sum / (high_bin - low_bin) as f32).sqrt()
    };

    BandEnergies {
        sub_bass: band(20.0, 60.0),
        bass: band(60.0, 250.0),
        low_mid: band(250.0, 500.0),
        mid: band(500.0, 2000.0),
        upper_mid: band(2000.0, 4000.0),
        presence: band(4000.0, 6000.0),
        brilliance: band(6000.0, 20000.0),
    }
}

fn describe_frame(ctx: &FrameContext<'_>, spectrum: &FftResult, previous: Option<&[f32]>) -> SpectralFrame {
    let magnitude = &spectrum.magnitude;
    let resolution = spectrum.frequencies.get(1).copied().unwrap_or(0.0);

    let peak_frequency = spectrum
        .peak_bin()
        .and_then(|bin| spectrum.frequencies.get(bin).copied())
        .unwrap_or(0.0);

    let total: f32 = magnitude.iter().sum();
    let spectral_centroid = if total > 1e-10 {
        magnitude
            .iter()
            .zip(spectrum.frequencies.iter())
            .map(|(&mag, &freq)| mag * freq)
            .sum::<f32>()
            / total
    } else {
        0.0
    };

    let spectral_flux = previous.map_or(0.0, |prev| {
        magnitude
            .iter()
            .zip(prev)
            .map(|(cur, prev)| (cur - prev).max(0.0))
            .sum()
    });

    let rms = if ctx.frame.is_empty() {
        0.0
    } else {
        (ctx.frame.iter().map(|s| s * s).sum::<f32>() / ctx.frame.len() as f32).sqrt()
    };

    SpectralFrame {
        time: ctx.time_sec,
        peak_frequency,
        spectral_centroid,
        spectral_flux,
        rms,
        bands: band_energies(magnitude, resolution),
    }
}

/// Windowed FFT over the mono mix, one [`SpectralFrame`] per hop.
///
/// `on_frame` runs after every frame, for progress reporting.
pub fn analyze_spectrum(
    audio: &AudioData,
    settings: &SpectralSettings,
    cache: &FftProviderCache,
    mut on_frame: impl FnMut(),
) -> Result<(SpectralSummary, Vec<SpectralFrame>)> {
    let mono = audio.to_mono();
    let samples = mono.channels().first().map_or(&[][..], Vec::as_slice);
    let sample_rate = audio.sample_rate() as f64;

    let request = FftProviderRequest {
        enable_profiling: settings.enable_profiling,
        fallback_to_native: Some(settings.fallback_to_native),
        ..FftProviderRequest::new(settings.fft_size, sample_rate).with_kind(settings.provider)
    };
    let provider = cache.get_or_create(&request)?;
    let window = WindowCache::shared().get_or_create(settings.fft_size, settings.window, &settings.window_params)?;

    let mut windowed = vec![0.0f32; settings.fft_size];
    let mut previous: Option<Vec<f32>> = None;
    let mut average_spectrum = vec![0.0f32; settings.fft_size / 2 + 1];
    let mut frames = Vec::with_capacity(settings.frame_count(audio));
    let mut failure: Option<Error> = None;

    let options = FrameIterationOptions::new(samples, settings.fft_size, settings.hop_size, sample_rate);
    for_each_frame(options, |ctx| {
        if failure.is_some() {
            return;
        }
        let spectrum = match apply_window_into(ctx.frame, &mut windowed, &window).and_then(|w| provider.fft(w)) {
            Ok(spectrum) => spectrum,
            Err(err) => {
                failure = Some(err);
                return;
            }
        };
        frames.push(describe_frame(&ctx, &spectrum, previous.as_deref()));
        for (acc, &mag) in average_spectrum.iter_mut().zip(&spectrum.magnitude) {
            *acc += mag;
        }
        previous = Some(spectrum.magnitude);
        on_frame();
    })?;
    if let Some(err) = failure {
        return Err(err);
    }

    let count = frames.len().max(1) as f32;
    let dominant_bin = average_spectrum
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map_or(0, |(bin, _)| bin);

    let summary = SpectralSummary {
        provider: provider.name().to_string(),
        fft_size: settings.fft_size,
        hop_size: settings.hop_size,
        frame_count: frames.len(),
        mean_centroid: frames.iter().map(|f| f.spectral_centroid).sum::<f32>() / count,
        mean_flux: frames.iter().map(|f| f.spectral_flux).sum::<f32>() / count,
        peak_rms: frames.iter().map(|f| f.rms).fold(0.0f32, f32::max),
        dominant_frequency: dominant_bin as f32 * sample_rate as f32 / settings.fft_size as f32,
    };
    log::info!(
        "Spectral: {} frames via {}, centroid={:.0} Hz, dominant={:.0} Hz",
        summary.frame_count,
        summary.provider,
        summary.mean_centroid,
        summary.dominant_frequency
    );
    Ok((summary, frames))
}

/// Feeds `audio` through the realtime executor in `chunk_size` pieces.
pub fn stream_loudness(
    audio: &AudioData,
    chunk_size: usize,
    options: &LoudnessOptions,
) -> Result<Vec<RealtimeReading>> {
    if chunk_size == 0 {
        return Err(Error::invalid_input("chunk size must be positive"));
    }
    let options = LoudnessOptions {
        calculate_momentary: true,
        calculate_short_term: true,
        calculate_loudness_range: false,
        ..options.clone()
    };

    let mut executor = RealtimeLoudnessExecutor::new();
    let mut readings = Vec::with_capacity(audio.length().div_ceil(chunk_size));
    let mut start = 0;
    while start < audio.length() {
        let end = (start + chunk_size).min(audio.length());
        let chunk = AudioData::new(
            audio.sample_rate(),
            audio.channels().iter().map(|ch| ch[start..end].to_vec()).collect(),
        )?;
        let result = executor.process(&chunk, &options)?;
        readings.push(RealtimeReading {
            time: end as f64 / audio.sample_rate() as f64,
            integrated: result.integrated,
            momentary: result.momentary.and_then(|m| m.first().copied()).unwrap_or(f64::NEG_INFINITY),
            short_term: result.short_term.and_then(|s| s.first().copied()).unwrap_or(f64::NEG_INFINITY),
            true_peak: result.true_peak,
        });
        start = end;
    }
    executor.dispose();
    Ok(readings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn sine(sample_rate: u32, frequency: f64, seconds: f64) -> Vec<f32> {
        let n = (seconds * sample_rate as f64) as usize;
        (0..n)
            .map(|i| (0.5 * (2.0 * PI * frequency * i as f64 / sample_rate as f64).sin()) as f32)
            .collect()
    }

    #[test]
    fn spectral_pass_finds_tone() {
        let audio = AudioData::mono(48_000, sine(48_000, 1_500.0, 1.0)).unwrap();
        let settings = SpectralSettings::default();
        let cache = FftProviderCache::new();
        let mut ticks = 0;
        let (summary, frames) = analyze_spectrum(&audio, &settings, &cache, || ticks += 1).unwrap();

        assert_eq!(frames.len(), settings.frame_count(&audio));
        assert_eq!(ticks, frames.len());
        let resolution = 48_000.0 / 2048.0;
        assert!((summary.dominant_frequency - 1_500.0).abs() <= resolution);
        assert!(frames[3].bands.mid > frames[3].bands.bass);
        assert!((frames[3].spectral_centroid - 1_500.0).abs() < 300.0);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn rustfft_provider_matches_native_summary() {
        let audio = AudioData::mono(44_100, sine(44_100, 440.0, 0.5)).unwrap();
        let cache = FftProviderCache::new();
        let native = analyze_spectrum(&audio, &SpectralSettings::default(), &cache, || {}).unwrap().0;
        let settings = SpectralSettings { provider: FftProviderKind::RustFft, ..SpectralSettings::default() };
        let backend = analyze_spectrum(&audio, &settings, &cache, || {}).unwrap().0;
        assert_eq!(native.dominant_frequency, backend.dominant_frequency);
        assert_eq!(backend.provider, "RustFFT");
    }

    #[test]
    fn non_power_of_two_native_fails() {
        let audio = AudioData::mono(48_000, vec![0.0; 4_800]).unwrap();
        let settings = SpectralSettings { fft_size: 1000, ..SpectralSettings::default() };
        let err = analyze_spectrum(&audio, &settings, &FftProviderCache::new(), || {}).unwrap_err();
        assert_eq!(err.code(), "INITIALIZATION_FAILED");
    }

    #[test]
    fn nan_kaiser_beta_is_rejected() {
        let audio = AudioData::mono(48_000, sine(48_000, 1_000.0, 0.1)).unwrap();
        let settings = SpectralSettings {
            window: WindowType::Kaiser,
            window_params: WindowParams { kaiser_beta: f64::NAN, ..WindowParams::default() },
            ..SpectralSettings::default()
        };
        let err = analyze_spectrum(&audio, &settings, &FftProviderCache::new(), || {}).unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
    }

    #[test]
    fn global_reports_a_weighted_level() {
        let audio = AudioData::mono(48_000, sine(48_000, 1_000.0, 1.0)).unwrap();
        let global = global_analysis(&audio).unwrap();
        // 0.5 peak sine: RMS 0.354, about -9 dBFS, unity gain at 1 kHz.
        assert!((global.a_weighted_rms_db + 9.03).abs() < 0.2, "{}", global.a_weighted_rms_db);
        assert!((global.peak_amplitude - 0.5).abs() < 1e-3);
    }

    #[test]
    fn streamed_readings_end_at_batch_value() {
        let audio = AudioData::mono(48_000, sine(48_000, 1_000.0, 2.0)).unwrap();
        let readings = stream_loudness(&audio, 4_800, &LoudnessOptions::default()).unwrap();
        let batch = crate::loudness::get_lufs(&audio, &LoudnessOptions::default()).unwrap();
        assert_eq!(readings.len(), 20);
        let last = readings.last().unwrap();
        assert!((last.integrated - batch.integrated).abs() < 1e-9);
        assert!((last.time - 2.0).abs() < 1e-12);
        assert!(stream_loudness(&audio, 0, &LoudnessOptions::default()).is_err());
    }
}
