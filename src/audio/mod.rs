pub mod analysis;
pub mod decode;
pub mod features;

use crate::error::{Error, Result};

/// Planar audio: one buffer per channel, all the same length.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioData {
    sample_rate: u32,
    channels: Vec<Vec<f32>>,
    length: usize,
}

impl AudioData {
    pub fn new(sample_rate: u32, channels: Vec<Vec<f32>>) -> Result<Self> {
        if sample_rate == 0 {
            return Err(Error::invalid_input("sample rate must be positive"));
        }
        let length = channels.first().map_or(0, Vec::len);
        if let Some((index, channel)) = channels.iter().enumerate().find(|(_, ch)| ch.len() != length) {
            return Err(Error::invalid_input(format!(
                "channel {} has {} samples, expected {}",
                index,
                channel.len(),
                length
            )));
        }
        Ok(Self {
            sample_rate,
            channels,
            length,
        })
    }

    pub fn mono(sample_rate: u32, samples: Vec<f32>) -> Result<Self> {
        Self::new(sample_rate, vec![samples])
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }

    pub fn channel(&self, index: usize) -> Result<&[f32]> {
        self.channels
            .get(index)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::invalid_input(format!("invalid channel number: {index}")))
    }

    pub fn number_of_channels(&self) -> usize {
        self.channels.len()
    }

    /// Samples per channel.
    pub fn length(&self) -> usize {
        self.length
    }

    pub fn duration(&self) -> f64 {
        self.length as f64 / self.sample_rate as f64
    }

    pub fn into_channels(self) -> Vec<Vec<f32>> {
        self.channels
    }

    /// Averages all channels into one.
    pub fn to_mono(&self) -> AudioData {
        if self.channels.len() <= 1 {
            return self.clone();
        }
        let count = self.channels.len() as f32;
        let mixed = (0..self.length)
            .map(|i| self.channels.iter().map(|ch| ch[i]).sum::<f32>() / count)
            .collect();
        AudioData {
            sample_rate: self.sample_rate,
            channels: vec![mixed],
            length: self.length,
        }
    }

    /// Two channels: mono is duplicated, extra channels are dropped.
    pub fn ensure_stereo(&self) -> AudioData {
        let left = self.channels.first().cloned().unwrap_or_else(|| vec![0.0; self.length]);
        let right = self.channels.get(1).cloned().unwrap_or_else(|| left.clone());
        AudioData {
            sample_rate: self.sample_rate,
            channels: vec![left, right],
            length: self.length,
        }
    }

    /// Copies the samples between two times in seconds.
    pub fn slice(&self, start_sec: f64, end_sec: f64) -> Result<AudioData> {
        if !(start_sec >= 0.0 && end_sec > start_sec) {
            return Err(Error::invalid_input(format!(
                "invalid time range {start_sec}..{end_sec}"
            )));
        }
        if end_sec > self.duration() {
            return Err(Error::invalid_input(format!(
                "end time {end_sec}s exceeds duration {:.3}s",
                self.duration()
            )));
        }
        let start = (start_sec * self.sample_rate as f64).floor() as usize;
        let end = ((end_sec * self.sample_rate as f64).floor() as usize).min(self.length);
        if end <= start {
            return Err(Error::invalid_input("slice range is shorter than one sample"));
        }
        AudioData::new(
            self.sample_rate,
            self.channels.iter().map(|ch| ch[start..end].to_vec()).collect(),
        )
    }

    pub fn peak(&self) -> f32 {
        self.channels
            .iter()
            .flatten()
            .fold(0.0f32, |peak, s| peak.max(s.abs()))
    }

    /// Scales every channel so the largest magnitude is 1. Silence is left alone.
    pub fn normalize_peak(&self) -> AudioData {
        let peak = self.peak();
        if peak <= 0.0 || peak == 1.0 {
            return self.clone();
        }
        AudioData {
            sample_rate: self.sample_rate,
            channels: self
                .channels
                .iter()
                .map(|ch| ch.iter().map(|s| s / peak).collect())
                .collect(),
            length: self.length,
        }
    }

    /// Linear-interpolation resampling to `target_rate`.
    pub fn resample_linear(&self, target_rate: u32) -> Result<AudioData> {
        if target_rate == 0 {
            return Err(Error::invalid_input("target sample rate must be positive"));
        }
        if target_rate == self.sample_rate {
            return Ok(self.clone());
        }
        let new_length =
            ((self.length as u64 * target_rate as u64 / self.sample_rate as u64) as usize).max(1);
        let ratio = self.sample_rate as f64 / target_rate as f64;

        let channels = self
            .channels
            .iter()
            .map(|ch| {
                if ch.is_empty() {
                    return vec![0.0; new_length];
                }
                (0..new_length)
                    .map(|i| {
                        let position = i as f64 * ratio;
                        let left = (position.floor() as usize).min(ch.len() - 1);
                        let right = (left + 1).min(ch.len() - 1);
                        let frac = (position - left as f64) as f32;
                        ch[left] + (ch[right] - ch[left]) * frac
                    })
                    .collect()
            })
            .collect();

        AudioData::new(target_rate, channels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_ragged_channels() {
        let err = AudioData::new(48_000, vec![vec![0.0; 4], vec![0.0; 3]]).unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
        assert!(AudioData::new(0, vec![vec![0.0]]).is_err());
        assert_eq!(AudioData::new(8_000, Vec::new()).unwrap().length(), 0);
    }

    #[test]
    fn reports_shape() {
        let audio = AudioData::new(8_000, vec![vec![0.0; 4_000], vec![0.0; 4_000]]).unwrap();
        assert_eq!(audio.number_of_channels(), 2);
        assert_eq!(audio.length(), 4_000);
        assert!((audio.duration() - 0.5).abs() < 1e-12);
        assert!(audio.channel(2).is_err());
    }

    #[test]
    fn mono_downmix_averages() {
        let audio = AudioData::new(10, vec![vec![1.0, 0.0], vec![0.0, -1.0]]).unwrap();
        assert_eq!(audio.to_mono().channels(), &[vec![0.5, -0.5]]);
    }

    #[test]
    fn stereo_duplicates_mono() {
        let audio = AudioData::mono(10, vec![0.25, 0.5]).unwrap();
        let stereo = audio.ensure_stereo();
        assert_eq!(stereo.channels(), &[vec![0.25, 0.5], vec![0.25, 0.5]]);
    }

    #[test]
    fn slice_by_time() {
        let audio = AudioData::mono(10, (0..20).map(|i| i as f32).collect()).unwrap();
        let part = audio.slice(0.5, 1.0).unwrap();
        assert_eq!(part.channels()[0], vec![5.0, 6.0, 7.0, 8.0, 9.0]);
        assert!(audio.slice(1.0, 0.5).is_err());
        assert!(audio.slice(0.0, 3.0).is_err());
        assert!(audio.slice(-1.0, 1.0).is_err());
    }

    #[test]
    fn peak_normalization() {
        let audio = AudioData::new(10, vec![vec![0.25, -0.5], vec![0.1, 0.0]]).unwrap();
        let normalized = audio.normalize_peak();
        assert_eq!(normalized.channels()[0], vec![0.5, -1.0]);
        assert_eq!(normalized.channels()[1], vec![0.2, 0.0]);

        let silent = AudioData::mono(10, vec![0.0; 3]).unwrap();
        assert_eq!(silent.normalize_peak(), silent);
    }

    #[test]
    fn linear_resampling() {
        let audio = AudioData::mono(4, vec![0.0, 1.0, 2.0, 3.0]).unwrap();
        let up = audio.resample_linear(8).unwrap();
        assert_eq!(up.length(), 8);
        assert_eq!(up.sample_rate(), 8);
        assert_eq!(up.channels()[0], vec![0.0, 0.5, 1.0, 1.5, 2.0, 2.5, 3.0, 3.0]);

        let down = audio.resample_linear(2).unwrap();
        assert_eq!(down.channels()[0], vec![0.0, 2.0]);
        assert!(audio.resample_linear(0).is_err());
    }
}
