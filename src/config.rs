use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub spectral: SpectralConfig,
    #[serde(default)]
    pub loudness: LoudnessConfig,
    #[serde(default)]
    pub realtime: RealtimeConfig,
}

#[derive(Debug, Deserialize)]
pub struct SpectralConfig {
    #[serde(default = "default_fft_size")]
    pub fft_size: usize,
    #[serde(default = "default_hop")]
    pub hop: usize,
    #[serde(default = "default_window")]
    pub window: String,
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_fallback")]
    pub fallback_to_native: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoudnessConfig {
    pub channel_mode: Option<String>,
    #[serde(default)]
    pub ungated: bool,
    #[serde(default)]
    pub momentary: bool,
    #[serde(default)]
    pub short_term: bool,
    #[serde(default)]
    pub lra: bool,
    #[serde(default)]
    pub true_peak: bool,
    pub tp_factor: Option<usize>,
    pub interpolation: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RealtimeConfig {
    pub chunk_ms: Option<u64>,
}

impl Default for SpectralConfig {
    fn default() -> Self {
        Self {
            fft_size: default_fft_size(),
            hop: default_hop(),
            window: default_window(),
            provider: default_provider(),
            fallback_to_native: default_fallback(),
        }
    }
}

fn default_fft_size() -> usize { 2048 }
fn default_hop() -> usize { 1024 }
fn default_window() -> String { "hann".into() }
fn default_provider() -> String { "native".into() }
fn default_fallback() -> bool { true }

pub fn load_config(path: &Path) -> Option<Config> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(config) => Some(config),
        Err(err) => {
            log::warn!("Invalid config {}: {}", path.display(), err);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sections_default_independently() {
        let config: Config = toml::from_str(
            r#"
            [spectral]
            fft_size = 4096
            provider = "rustfft"

            [loudness]
            lra = true
            tp_factor = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.spectral.fft_size, 4096);
        assert_eq!(config.spectral.hop, 1024);
        assert!(config.spectral.fallback_to_native);
        assert!(config.loudness.lra);
        assert_eq!(config.loudness.tp_factor, Some(2));
        assert!(config.realtime.chunk_ms.is_none());
    }

    #[test]
    fn empty_file_is_default() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.spectral.window, "hann");
        assert!(!config.loudness.ungated);
    }
}
