//! ITU-R BS.1770 loudness: gated integration, momentary and short-term
//! series, EBU 3342 loudness range and per-channel true peak.

mod realtime;

use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use realtime::{
    LoudnessSnapshot, RealtimeLoudnessExecutor, RealtimeLoudnessMeter, RealtimeLoudnessOptions,
    DEFAULT_HISTORY_MS,
};

use crate::audio::AudioData;
use crate::dsp::db::amp_to_db;
use crate::dsp::oversampling::{get_true_peak, Interpolation, TruePeakOptions, SUPPORTED_FACTORS};
use crate::dsp::weighting::apply_k_weighting;
use crate::error::{Error, Result};

pub const LOUDNESS_OFFSET: f64 = -0.691;
pub const ABSOLUTE_GATE_LUFS: f64 = -70.0;
pub const RELATIVE_GATE_LU: f64 = 10.0;
pub const LRA_RELATIVE_GATE_LU: f64 = 20.0;
const ENERGY_FLOOR: f64 = 1e-15;

const BLOCK_MS: u64 = 400;
const SHORT_TERM_MS: u64 = 3_000;
/// 75 % overlap between consecutive blocks.
const HOP_DIVISOR: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelMode {
    Mono,
    Stereo,
}

impl FromStr for ChannelMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mono" => Ok(ChannelMode::Mono),
            "stereo" => Ok(ChannelMode::Stereo),
            other => Err(Error::invalid_input(format!("unknown channel mode: {other}"))),
        }
    }
}

impl ChannelMode {
    pub fn for_channel_count(channels: usize) -> Self {
        if channels >= 2 {
            ChannelMode::Stereo
        } else {
            ChannelMode::Mono
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoudnessOptions {
    /// Defaults to stereo for two or more channels, mono otherwise.
    pub channel_mode: Option<ChannelMode>,
    pub gated: bool,
    pub calculate_momentary: bool,
    pub calculate_short_term: bool,
    pub calculate_loudness_range: bool,
    pub calculate_true_peak: bool,
    pub true_peak_factor: usize,
    pub true_peak_interpolation: Interpolation,
}

impl Default for LoudnessOptions {
    fn default() -> Self {
        Self {
            channel_mode: None,
            gated: true,
            calculate_momentary: false,
            calculate_short_term: false,
            calculate_loudness_range: false,
            calculate_true_peak: false,
            true_peak_factor: 4,
            true_peak_interpolation: Interpolation::Sinc,
        }
    }
}

impl LoudnessOptions {
    pub fn resolve_channel_mode(&self, channels: usize) -> ChannelMode {
        self.channel_mode
            .unwrap_or_else(|| ChannelMode::for_channel_count(channels))
    }

    fn wants_short_term(&self) -> bool {
        self.calculate_short_term || self.calculate_loudness_range
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct LoudnessStatistics {
    pub percentile_10: f64,
    pub percentile_95: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LoudnessResult {
    /// LUFS; `-inf` when nothing survives gating.
    pub integrated: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub momentary: Option<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub short_term: Option<Vec<f64>>,
    /// LU.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loudness_range: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statistics: Option<LoudnessStatistics>,
    /// dBTP per processed channel.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub true_peak: Option<Vec<f64>>,
}

impl LoudnessResult {
    fn silent() -> Self {
        Self {
            integrated: f64::NEG_INFINITY,
            momentary: None,
            short_term: None,
            loudness_range: None,
            statistics: None,
            true_peak: None,
        }
    }
}

/// Block and window sizes in samples for one sample rate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct BlockLayout {
    pub block: usize,
    pub hop: usize,
    pub short_term: usize,
}

impl BlockLayout {
    pub fn new(sample_rate: u32) -> Self {
        let rate = sample_rate as u64;
        let block = (rate * BLOCK_MS / 1000) as usize;
        Self {
            block,
            hop: (block / HOP_DIVISOR).max(1),
            short_term: (rate * SHORT_TERM_MS / 1000) as usize,
        }
    }
}

/// Mean of already-squared samples, summed front to back.
pub(crate) fn mean_square<I: Iterator<Item = f64>>(squares: I, len: usize) -> f64 {
    squares.fold(0.0, |acc, s| acc + s) / len as f64
}

/// Loudness of one window given each channel's mean square.
pub(crate) fn window_loudness<I: Iterator<Item = f64>>(channel_mean_squares: I) -> f64 {
    let sum = channel_mean_squares.fold(0.0, |acc, ms| acc + ms);
    LOUDNESS_OFFSET + 10.0 * sum.max(ENERGY_FLOOR).log10()
}

fn loudness_to_energy(lufs: f64) -> f64 {
    10f64.powf((lufs - LOUDNESS_OFFSET) / 10.0)
}

/// Loudness of the mean energy, `-inf` for no values.
fn energy_mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NEG_INFINITY;
    }
    let total: f64 = values.iter().map(|&l| loudness_to_energy(l)).sum();
    LOUDNESS_OFFSET + 10.0 * (total / values.len() as f64).log10()
}

/// Two-stage gating over block loudness values.
pub(crate) fn integrate<'a, I>(blocks: I, gated: bool) -> f64
where
    I: IntoIterator<Item = &'a f64>,
{
    let blocks = blocks.into_iter().copied();
    if !gated {
        return energy_mean(&blocks.collect::<Vec<_>>());
    }
    let above_absolute: Vec<f64> = blocks.filter(|&l| l >= ABSOLUTE_GATE_LUFS).collect();
    if above_absolute.is_empty() {
        return f64::NEG_INFINITY;
    }
    let relative_gate = energy_mean(&above_absolute) - RELATIVE_GATE_LU;
    let survivors: Vec<f64> = above_absolute
        .into_iter()
        .filter(|&l| l >= relative_gate)
        .collect();
    energy_mean(&survivors)
}

/// EBU Tech 3342 range over short-term values.
pub fn loudness_range(short_term: &[f64]) -> Option<(f64, LoudnessStatistics)> {
    let above_absolute: Vec<f64> = short_term
        .iter()
        .copied()
        .filter(|&v| v.is_finite() && v > ABSOLUTE_GATE_LUFS)
        .collect();
    if above_absolute.is_empty() {
        return None;
    }
    let relative_gate = energy_mean(&above_absolute) - LRA_RELATIVE_GATE_LU;
    let mut gated: Vec<f64> = above_absolute
        .into_iter()
        .filter(|&v| v >= relative_gate)
        .collect();
    gated.sort_by(f64::total_cmp);

    let n = gated.len();
    let statistics = LoudnessStatistics {
        percentile_10: gated[(n as f64 * 0.10).floor() as usize],
        percentile_95: gated[(n as f64 * 0.95).floor() as usize],
    };
    Some((statistics.percentile_95 - statistics.percentile_10, statistics))
}

pub(crate) fn select_channels(audio: &AudioData, mode: ChannelMode) -> Result<Vec<&[f32]>> {
    let channels = audio.channels();
    if channels.is_empty() {
        return Err(Error::invalid_input("no processable channels"));
    }
    let take = match mode {
        ChannelMode::Mono => 1,
        ChannelMode::Stereo => 2,
    };
    Ok(channels.iter().take(take).map(Vec::as_slice).collect())
}

fn validate_true_peak_factor(options: &LoudnessOptions) -> Result<()> {
    if options.calculate_true_peak && !SUPPORTED_FACTORS.contains(&options.true_peak_factor) {
        return Err(Error::invalid_input(format!(
            "true peak oversampling factor must be 2 or 4, got {}",
            options.true_peak_factor
        )));
    }
    Ok(())
}

/// Loudness of every `len`-sample window starting at multiples of `hop`.
fn windowed_series(squares: &[Vec<f64>], len: usize, hop: usize) -> Vec<f64> {
    let total = squares.first().map_or(0, Vec::len);
    if len == 0 || total < len {
        return Vec::new();
    }
    (0..=total - len)
        .step_by(hop)
        .map(|start| {
            window_loudness(
                squares
                    .iter()
                    .map(|ch| mean_square(ch[start..start + len].iter().copied(), len)),
            )
        })
        .collect()
}

/// Batch BS.1770 measurement over a whole buffer.
pub fn get_lufs(audio: &AudioData, options: &LoudnessOptions) -> Result<LoudnessResult> {
    validate_true_peak_factor(options)?;
    let mode = options.resolve_channel_mode(audio.number_of_channels());
    let channels = select_channels(audio, mode)?;
    let sample_rate = audio.sample_rate();

    let mut result = LoudnessResult::silent();
    if options.calculate_true_peak {
        let tp_options = TruePeakOptions {
            factor: options.true_peak_factor,
            interpolation: options.true_peak_interpolation,
        };
        result.true_peak = Some(
            channels
                .iter()
                .map(|ch| get_true_peak(ch, &tp_options).map(amp_to_db))
                .collect::<Result<_>>()?,
        );
    }

    let squares = channels
        .iter()
        .map(|ch| {
            apply_k_weighting(ch, sample_rate as f64)
                .map(|weighted| weighted.into_iter().map(|x| x * x).collect::<Vec<f64>>())
        })
        .collect::<Result<Vec<_>>>()?;

    let layout = BlockLayout::new(sample_rate);
    let blocks = windowed_series(&squares, layout.block, layout.hop);
    result.integrated = integrate(&blocks, options.gated);

    log::debug!(
        "{} blocks over {} samples, integrated {:.2} LUFS",
        blocks.len(),
        audio.length(),
        result.integrated
    );

    if options.wants_short_term() {
        let short_term = windowed_series(&squares, layout.short_term, layout.hop);
        if options.calculate_loudness_range {
            if let Some((range, statistics)) = loudness_range(&short_term) {
                result.loudness_range = Some(range);
                result.statistics = Some(statistics);
            }
        }
        result.short_term = Some(short_term);
    }
    if options.calculate_momentary {
        result.momentary = Some(blocks);
    }

    Ok(result)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::f64::consts::PI;

    pub fn tone(sample_rate: u32, frequency: f64, amplitude_db: f64, seconds: f64) -> Vec<f32> {
        let amplitude = 10f64.powf(amplitude_db / 20.0);
        let n = (seconds * sample_rate as f64) as usize;
        (0..n)
            .map(|i| (amplitude * (2.0 * PI * frequency * i as f64 / sample_rate as f64).sin()) as f32)
            .collect()
    }

    fn mono(sample_rate: u32, samples: Vec<f32>) -> AudioData {
        AudioData::new(sample_rate, vec![samples]).unwrap()
    }

    #[test]
    fn layout_follows_sample_rate() {
        assert_eq!(
            BlockLayout::new(48_000),
            BlockLayout { block: 19_200, hop: 4_800, short_term: 144_000 }
        );
        assert_eq!(BlockLayout::new(44_100).hop, 4_410);
    }

    #[test]
    fn tone_at_minus_20_dbfs_is_finite_and_near_expected() {
        let audio = mono(48_000, tone(48_000, 1_000.0, -20.0, 2.0));
        let result = get_lufs(&audio, &LoudnessOptions::default()).unwrap();
        assert!(result.integrated.is_finite());
        // Mean square of a sine is A²/2: -20 dBFS peak reads about -23 LUFS.
        assert!((result.integrated + 23.0).abs() < 0.5, "{}", result.integrated);
    }

    #[test]
    fn trailing_near_silence_is_gated_out() {
        let loud = tone(48_000, 1_000.0, -20.0, 2.0);
        let reference = get_lufs(&mono(48_000, loud.clone()), &LoudnessOptions::default()).unwrap();

        let mut padded = loud;
        padded.extend(tone(48_000, 1_000.0, -100.0, 5.0));
        let gated = get_lufs(&mono(48_000, padded.clone()), &LoudnessOptions::default()).unwrap();
        // Only the few blocks straddling the tone's end still count.
        assert!((gated.integrated - reference.integrated).abs() < 0.5);

        let ungated = get_lufs(
            &mono(48_000, padded),
            &LoudnessOptions { gated: false, ..LoudnessOptions::default() },
        )
        .unwrap();
        assert!(ungated.integrated < reference.integrated - 3.0);
    }

    #[test]
    fn empty_and_short_inputs_are_silent() {
        let empty = get_lufs(&mono(48_000, Vec::new()), &LoudnessOptions::default()).unwrap();
        assert_eq!(empty.integrated, f64::NEG_INFINITY);

        let short = get_lufs(&mono(48_000, vec![0.5; 1_000]), &LoudnessOptions::default()).unwrap();
        assert_eq!(short.integrated, f64::NEG_INFINITY);
    }

    #[test]
    fn all_quiet_blocks_fail_absolute_gate() {
        let audio = mono(48_000, tone(48_000, 1_000.0, -90.0, 1.0));
        let result = get_lufs(&audio, &LoudnessOptions::default()).unwrap();
        assert_eq!(result.integrated, f64::NEG_INFINITY);
    }

    #[test]
    fn identical_stereo_channels_add_three_db() {
        let samples = tone(44_100, 1_000.0, -20.0, 1.0);
        let mono_result = get_lufs(&mono(44_100, samples.clone()), &LoudnessOptions::default()).unwrap();
        let stereo = AudioData::new(44_100, vec![samples.clone(), samples]).unwrap();
        let stereo_result = get_lufs(&stereo, &LoudnessOptions::default()).unwrap();
        let diff = stereo_result.integrated - mono_result.integrated;
        assert!((diff - 10.0 * 2f64.log10()).abs() < 1e-6, "{diff}");

        let forced = get_lufs(
            &stereo,
            &LoudnessOptions { channel_mode: Some(ChannelMode::Mono), ..LoudnessOptions::default() },
        )
        .unwrap();
        assert!((forced.integrated - mono_result.integrated).abs() < 1e-9);
    }

    #[test]
    fn series_lengths_match_hop_grid() {
        let audio = mono(48_000, tone(48_000, 440.0, -18.0, 4.0));
        let options = LoudnessOptions {
            calculate_momentary: true,
            calculate_short_term: true,
            ..LoudnessOptions::default()
        };
        let result = get_lufs(&audio, &options).unwrap();
        // (192000 - 19200) / 4800 + 1 and (192000 - 144000) / 4800 + 1
        assert_eq!(result.momentary.as_ref().unwrap().len(), 37);
        assert_eq!(result.short_term.as_ref().unwrap().len(), 11);
        assert!(result.loudness_range.is_none());
    }

    #[test]
    fn loudness_range_spreads_with_level_changes() {
        let mut samples = tone(48_000, 1_000.0, -30.0, 10.0);
        samples.extend(tone(48_000, 1_000.0, -20.0, 10.0));
        let audio = mono(48_000, samples);
        let options = LoudnessOptions { calculate_loudness_range: true, ..LoudnessOptions::default() };
        let result = get_lufs(&audio, &options).unwrap();

        let range = result.loudness_range.unwrap();
        let stats = result.statistics.unwrap();
        assert!(range > 8.0 && range < 11.0, "{range}");
        assert!(stats.percentile_95 > stats.percentile_10);
        assert!(result.short_term.is_some());
    }

    #[test]
    fn steady_tone_has_no_range() {
        let audio = mono(48_000, tone(48_000, 1_000.0, -20.0, 6.0));
        let options = LoudnessOptions { calculate_loudness_range: true, ..LoudnessOptions::default() };
        let range = get_lufs(&audio, &options).unwrap().loudness_range.unwrap();
        assert!(range.abs() < 0.1, "{range}");
    }

    #[test]
    fn true_peak_reported_per_channel() {
        let left = tone(48_000, 997.0, -6.0, 0.5);
        let right = tone(48_000, 997.0, -12.0, 0.5);
        let audio = AudioData::new(48_000, vec![left, right]).unwrap();
        let options = LoudnessOptions { calculate_true_peak: true, ..LoudnessOptions::default() };
        let peaks = get_lufs(&audio, &options).unwrap().true_peak.unwrap();
        assert_eq!(peaks.len(), 2);
        assert!((peaks[0] + 6.0).abs() < 0.2, "{}", peaks[0]);
        assert!((peaks[1] + 12.0).abs() < 0.2, "{}", peaks[1]);
    }

    #[test]
    fn invalid_true_peak_factor_fails_first() {
        let audio = mono(48_000, vec![0.0; 10]);
        let options = LoudnessOptions {
            calculate_true_peak: true,
            true_peak_factor: 3,
            ..LoudnessOptions::default()
        };
        assert_eq!(get_lufs(&audio, &options).unwrap_err().code(), "INVALID_INPUT");
    }

    #[test]
    fn unsupported_rate_is_rejected() {
        let audio = mono(4_000, vec![0.0; 4_000]);
        assert_eq!(
            get_lufs(&audio, &LoudnessOptions::default()).unwrap_err().code(),
            "UNSUPPORTED_FORMAT"
        );
    }

    #[test]
    fn gating_helpers() {
        assert_eq!(integrate(&[], true), f64::NEG_INFINITY);
        assert_eq!(integrate(&[-80.0, -75.0], true), f64::NEG_INFINITY);
        // -40 is more than 10 LU below the energy mean of {-20, -40}.
        let gated = integrate(&[-20.0, -20.0, -40.0], true);
        assert!((gated + 20.0).abs() < 1e-9);
        let ungated = integrate(&[-20.0, -20.0, -40.0], false);
        assert!(ungated < -20.0);
        assert!(loudness_range(&[-80.0, f64::NEG_INFINITY]).is_none());
    }
}
