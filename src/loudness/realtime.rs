//! Streaming BS.1770 meter and the executor that reports it in batch-shaped results.

use std::collections::VecDeque;

use serde::Deserialize;

use super::{
    integrate, mean_square, select_channels, window_loudness, BlockLayout, ChannelMode,
    LoudnessOptions, LoudnessResult, LoudnessStatistics,
};
use crate::audio::AudioData;
use crate::dsp::biquad::BiquadCascade;
use crate::dsp::db::amp_to_db;
use crate::dsp::frame::{RealtimeFrameScheduler, ScheduledFrame};
use crate::dsp::oversampling::RealtimeTruePeak;
use crate::dsp::weighting::get_k_weighting_coeffs;
use crate::error::{Error, Result};

/// Block history kept unless the caller asks otherwise.
pub const DEFAULT_HISTORY_MS: u64 = 60_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RealtimeLoudnessOptions {
    pub channel_mode: ChannelMode,
    pub gated: bool,
    /// Caps the retained block history; unbounded when `None`. Defaults to
    /// [`DEFAULT_HISTORY_MS`].
    pub max_duration_ms: Option<u64>,
}

impl Default for RealtimeLoudnessOptions {
    fn default() -> Self {
        Self {
            channel_mode: ChannelMode::Stereo,
            gated: true,
            max_duration_ms: Some(DEFAULT_HISTORY_MS),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LoudnessSnapshot {
    pub integrated: f64,
    /// Latest completed 400 ms block, `-inf` before the first one.
    pub momentary: f64,
    /// Latest completed 3 s window, `-inf` before the first one.
    pub short_term: f64,
}

/// Streaming BS.1770 meter.
///
/// Feeding a stream in arbitrary chunks yields the same block values as
/// [`super::get_lufs`] over the concatenated stream.
#[derive(Debug)]
pub struct RealtimeLoudnessMeter {
    sample_rate: u32,
    options: RealtimeLoudnessOptions,
    layout: BlockLayout,
    filters: Vec<BiquadCascade>,
    /// Per-channel ring of squared K-weighted samples, indexed by absolute position.
    squares: Vec<Vec<f64>>,
    block_frames: RealtimeFrameScheduler,
    short_term_frames: RealtimeFrameScheduler,
    blocks: VecDeque<f64>,
    max_blocks: Option<usize>,
    momentary: f64,
    short_term: f64,
}

impl RealtimeLoudnessMeter {
    pub fn new(sample_rate: u32, options: RealtimeLoudnessOptions) -> Result<Self> {
        // Validates the rate before anything is sized from it.
        get_k_weighting_coeffs(sample_rate as f64)?;
        let layout = BlockLayout::new(sample_rate);
        let max_blocks = options.max_duration_ms.map(|ms| {
            let samples = sample_rate as u64 * ms / 1000;
            ((samples / layout.hop as u64) as usize).max(1)
        });

        Ok(Self {
            sample_rate,
            options,
            layout,
            filters: Vec::new(),
            squares: Vec::new(),
            block_frames: RealtimeFrameScheduler::new(layout.block, layout.hop)?,
            short_term_frames: RealtimeFrameScheduler::new(layout.short_term, layout.hop)?,
            blocks: VecDeque::new(),
            max_blocks,
            momentary: f64::NEG_INFINITY,
            short_term: f64::NEG_INFINITY,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn options(&self) -> &RealtimeLoudnessOptions {
        &self.options
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Samples consumed per channel since construction or the last reset.
    pub fn samples_processed(&self) -> u64 {
        self.block_frames.write_index()
    }

    fn ring_capacity(&self) -> usize {
        // One hop of headroom: windows are drained at least once per hop.
        self.layout.short_term + self.layout.hop
    }

    fn bind_channels(&mut self, count: usize) -> Result<()> {
        if self.filters.is_empty() {
            let coeffs = get_k_weighting_coeffs(self.sample_rate as f64)?;
            self.filters = (0..count).map(|_| BiquadCascade::new(coeffs.clone())).collect();
            self.squares = vec![vec![0.0; self.ring_capacity()]; count];
            log::debug!(
                "realtime loudness meter bound to {} channel(s) at {} Hz",
                count,
                self.sample_rate
            );
        } else if self.filters.len() != count {
            return Err(Error::invalid_input(format!(
                "meter was started with {} channel(s), got {}",
                self.filters.len(),
                count
            )));
        }
        Ok(())
    }

    pub fn process(&mut self, channels: &[&[f32]]) -> Result<LoudnessSnapshot> {
        if channels.is_empty() {
            return Err(Error::invalid_input("no processable channels"));
        }
        let wanted = match self.options.channel_mode {
            ChannelMode::Mono => 1,
            ChannelMode::Stereo => 2,
        };
        let channels = &channels[..wanted.min(channels.len())];
        let len = channels[0].len();
        if channels.iter().any(|ch| ch.len() != len) {
            return Err(Error::invalid_input("channel buffers differ in length"));
        }
        self.bind_channels(channels.len())?;

        let capacity = self.ring_capacity();
        let mut offset = 0;
        while offset < len {
            let end = (offset + self.layout.hop).min(len);
            let base = self.block_frames.write_index();

            for ((filter, ring), samples) in self
                .filters
                .iter_mut()
                .zip(self.squares.iter_mut())
                .zip(channels)
            {
                for (k, &x) in samples[offset..end].iter().enumerate() {
                    let y = filter.process_sample(x as f64);
                    ring[((base + k as u64) % capacity as u64) as usize] = y * y;
                }
            }

            let count = end - offset;
            let squares = &self.squares;
            for frame in self.block_frames.append(count) {
                let loudness = ring_loudness(squares, capacity, frame);
                self.blocks.push_back(loudness);
                self.momentary = loudness;
            }
            for frame in self.short_term_frames.append(count) {
                self.short_term = ring_loudness(squares, capacity, frame);
            }
            if let Some(max) = self.max_blocks {
                while self.blocks.len() > max {
                    self.blocks.pop_front();
                }
            }
            offset = end;
        }

        Ok(self.snapshot())
    }

    pub fn snapshot(&self) -> LoudnessSnapshot {
        LoudnessSnapshot {
            integrated: integrate(&self.blocks, self.options.gated),
            momentary: self.momentary,
            short_term: self.short_term,
        }
    }

    pub fn reset(&mut self) {
        self.filters.clear();
        self.squares.clear();
        self.block_frames.reset();
        self.short_term_frames.reset();
        self.blocks.clear();
        self.momentary = f64::NEG_INFINITY;
        self.short_term = f64::NEG_INFINITY;
    }
}

fn ring_loudness(squares: &[Vec<f64>], capacity: usize, frame: ScheduledFrame) -> f64 {
    let len = frame.len();
    window_loudness(squares.iter().map(|ring| {
        mean_square(
            (frame.start..frame.end).map(|p| ring[(p % capacity as u64) as usize]),
            len,
        )
    }))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct MeterKey {
    sample_rate: u32,
    channel_mode: ChannelMode,
    gated: bool,
}

/// Drives a [`RealtimeLoudnessMeter`] with successive buffers and reports
/// results in the batch result shape.
///
/// The meter survives between calls while sample rate, channel mode and
/// gating stay the same; any change starts a fresh one.
#[derive(Debug, Default)]
pub struct RealtimeLoudnessExecutor {
    meter: Option<(MeterKey, RealtimeLoudnessMeter)>,
    true_peaks: Vec<RealtimeTruePeak>,
}

impl RealtimeLoudnessExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process(&mut self, audio: &AudioData, options: &LoudnessOptions) -> Result<LoudnessResult> {
        if options.calculate_true_peak && options.true_peak_factor != RealtimeTruePeak::FACTOR {
            return Err(Error::invalid_input(format!(
                "realtime true peak supports only {}x oversampling, got {}",
                RealtimeTruePeak::FACTOR,
                options.true_peak_factor
            )));
        }

        let channel_mode = options.resolve_channel_mode(audio.number_of_channels());
        let key = MeterKey {
            sample_rate: audio.sample_rate(),
            channel_mode,
            gated: options.gated,
        };
        let channels = select_channels(audio, channel_mode)?;

        let meter = match &mut self.meter {
            Some((current, meter)) if *current == key => meter,
            slot => {
                let meter = RealtimeLoudnessMeter::new(
                    key.sample_rate,
                    RealtimeLoudnessOptions {
                        channel_mode,
                        gated: options.gated,
                        max_duration_ms: Some(DEFAULT_HISTORY_MS),
                    },
                )?;
                self.true_peaks.clear();
                &mut slot.insert((key, meter)).1
            }
        };
        let snapshot = meter.process(&channels)?;

        let mut result = LoudnessResult::silent();
        result.integrated = snapshot.integrated;
        if options.calculate_momentary {
            result.momentary = Some(vec![snapshot.momentary]);
        }
        if options.wants_short_term() {
            result.short_term = Some(vec![snapshot.short_term]);
        }
        if options.calculate_loudness_range && snapshot.short_term.is_finite() {
            result.loudness_range = Some(0.0);
            result.statistics = Some(LoudnessStatistics {
                percentile_10: snapshot.short_term,
                percentile_95: snapshot.short_term,
            });
        }
        if options.calculate_true_peak {
            if self.true_peaks.len() != channels.len() {
                self.true_peaks = (0..channels.len())
                    .map(|_| RealtimeTruePeak::new(options.true_peak_factor))
                    .collect::<Result<_>>()?;
            }
            result.true_peak = Some(
                self.true_peaks
                    .iter_mut()
                    .zip(&channels)
                    .map(|(detector, ch)| amp_to_db(detector.process(ch)))
                    .collect(),
            );
        }
        Ok(result)
    }

    pub fn reset(&mut self) {
        if let Some((_, meter)) = &mut self.meter {
            meter.reset();
        }
        self.true_peaks.iter_mut().for_each(RealtimeTruePeak::reset);
    }

    /// Drops the meter; safe to call repeatedly.
    pub fn dispose(&mut self) {
        self.meter = None;
        self.true_peaks.clear();
    }
}
