use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "loudscope", about = "Spectral and BS.1770 loudness analysis for audio files")]
pub struct Cli {
    /// Input audio file (WAV, MP3, FLAC, OGG)
    pub input: Option<PathBuf>,

    /// Write the full report as JSON to this path ("-" for stdout)
    #[arg(short, long)]
    pub json: Option<PathBuf>,

    /// Config file (defaults to loudscope.toml, then the user config dir)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// FFT size in samples
    #[arg(long, default_value_t = 2048)]
    pub fft_size: usize,

    /// Hop between spectral frames in samples
    #[arg(long, default_value_t = 1024)]
    pub hop: usize,

    /// Analysis window (hann, hamming, blackman, bartlett, kaiser, tukey, rectangular)
    #[arg(long, default_value = "hann")]
    pub window: String,

    /// FFT provider (native, rustfft)
    #[arg(long, default_value = "native")]
    pub provider: String,

    /// Fail instead of falling back to the native FFT
    #[arg(long)]
    pub no_fallback: bool,

    /// Log FFT warm-up timings
    #[arg(long)]
    pub profile_fft: bool,

    /// Loudness channel mode (mono, stereo). Inferred from the input when unset.
    #[arg(long)]
    pub channel_mode: Option<String>,

    /// Disable the absolute and relative gates
    #[arg(long)]
    pub ungated: bool,

    /// Include the momentary loudness series
    #[arg(long)]
    pub momentary: bool,

    /// Include the short-term loudness series
    #[arg(long)]
    pub short_term: bool,

    /// Compute the loudness range (EBU 3342)
    #[arg(long)]
    pub lra: bool,

    /// Compute per-channel true peak
    #[arg(long)]
    pub true_peak: bool,

    /// True-peak oversampling factor (2 or 4)
    #[arg(long, default_value_t = 4)]
    pub tp_factor: usize,

    /// True-peak interpolation (linear, cubic, sinc)
    #[arg(long, default_value = "sinc")]
    pub interpolation: String,

    /// Also stream the input through the realtime meter in chunks of this many milliseconds
    #[arg(long)]
    pub realtime_ms: Option<u64>,

    /// Include every spectral frame in the JSON report
    #[arg(long)]
    pub frames: bool,
}
