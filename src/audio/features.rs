use serde::Serialize;

use crate::loudness::LoudnessResult;

/// RMS magnitude per frequency band (linear).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct BandEnergies {
    pub sub_bass: f32,   // 20-60 Hz
    pub bass: f32,       // 60-250 Hz
    pub low_mid: f32,    // 250-500 Hz
    pub mid: f32,        // 500-2000 Hz
    pub upper_mid: f32,  // 2-4 kHz
    pub presence: f32,   // 4-6 kHz
    pub brilliance: f32, // 6-20 kHz
}

/// One analysis frame of the spectral pass.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SpectralFrame {
    /// Frame centre in seconds.
    pub time: f64,
    pub peak_frequency: f32,
    /// Hz
    pub spectral_centroid: f32,
    /// Positive magnitude change from the previous frame.
    pub spectral_flux: f32,
    pub rms: f32,
    pub bands: BandEnergies,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SpectralSummary {
    pub provider: String,
    pub fft_size: usize,
    pub hop_size: usize,
    pub frame_count: usize,
    pub mean_centroid: f32,
    pub mean_flux: f32,
    pub peak_rms: f32,
    /// Peak bin of the frame-averaged spectrum.
    pub dominant_frequency: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GlobalAnalysis {
    pub sample_rate: u32,
    pub channels: usize,
    pub total_samples: usize,
    pub duration: f64,
    pub peak_amplitude: f32,
    /// dBFS of the A-weighted mono mix.
    pub a_weighted_rms_db: f64,
}

/// Running values reported after each streamed chunk.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RealtimeReading {
    /// End of the chunk in seconds.
    pub time: f64,
    pub integrated: f64,
    pub momentary: f64,
    pub short_term: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub true_peak: Option<Vec<f64>>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AnalysisReport {
    pub input: String,
    pub global: GlobalAnalysis,
    pub spectral: SpectralSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frames: Option<Vec<SpectralFrame>>,
    pub loudness: LoudnessResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub realtime: Option<Vec<RealtimeReading>>,
}
