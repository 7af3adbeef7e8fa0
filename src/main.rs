mod cli;
mod config;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::path::{Path, PathBuf};

use cli::Cli;
use loudscope::audio::analysis::{analyze_spectrum, global_analysis, stream_loudness, SpectralSettings};
use loudscope::audio::decode::decode_audio;
use loudscope::audio::features::AnalysisReport;
use loudscope::dsp::fft_runtime::{clear_shared_fft_provider_cache, FftProviderCache};
use loudscope::loudness::{get_lufs, ChannelMode, LoudnessOptions, LoudnessResult};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let mut cli = Cli::parse();

    // Load config: explicit --config path, or auto-detect loudscope.toml / global config
    let config_path = cli.config.clone().or_else(|| {
        let local = PathBuf::from("loudscope.toml");
        if local.exists() {
            return Some(local);
        }
        if let Some(home) = dirs::home_dir() {
            let xdg = home.join(".config").join("loudscope").join("config.toml");
            if xdg.exists() {
                return Some(xdg);
            }
        }
        if let Some(config_dir) = dirs::config_dir() {
            let platform = config_dir.join("loudscope").join("config.toml");
            if platform.exists() {
                return Some(platform);
            }
        }
        None
    });
    if let Some(ref path) = config_path {
        if let Some(cfg) = config::load_config(path) {
            log::info!("Loaded config from {}", path.display());
            // Merge: config values apply only when CLI is at its default
            if cli.fft_size == 2048 { cli.fft_size = cfg.spectral.fft_size; }
            if cli.hop == 1024 { cli.hop = cfg.spectral.hop; }
            if cli.window == "hann" { cli.window = cfg.spectral.window; }
            if cli.provider == "native" { cli.provider = cfg.spectral.provider; }
            if !cli.no_fallback { cli.no_fallback = !cfg.spectral.fallback_to_native; }
            if cli.channel_mode.is_none() { cli.channel_mode = cfg.loudness.channel_mode; }
            cli.ungated |= cfg.loudness.ungated;
            cli.momentary |= cfg.loudness.momentary;
            cli.short_term |= cfg.loudness.short_term;
            cli.lra |= cfg.loudness.lra;
            cli.true_peak |= cfg.loudness.true_peak;
            if cli.tp_factor == 4 {
                if let Some(factor) = cfg.loudness.tp_factor {
                    cli.tp_factor = factor;
                }
            }
            if cli.interpolation == "sinc" {
                if let Some(interpolation) = cfg.loudness.interpolation {
                    cli.interpolation = interpolation;
                }
            }
            if cli.realtime_ms.is_none() { cli.realtime_ms = cfg.realtime.chunk_ms; }
        } else {
            log::warn!("Failed to load config from {}", path.display());
        }
    }

    let input = cli.input.as_ref().context("Input audio file is required")?;
    if !input.exists() {
        anyhow::bail!("Input file not found: {}", input.display());
    }

    let settings = SpectralSettings {
        fft_size: cli.fft_size,
        hop_size: cli.hop,
        window: cli.window.parse()?,
        provider: cli.provider.parse()?,
        fallback_to_native: !cli.no_fallback,
        enable_profiling: cli.profile_fft,
        ..SpectralSettings::default()
    };
    let options = LoudnessOptions {
        channel_mode: cli.channel_mode.as_deref().map(str::parse::<ChannelMode>).transpose()?,
        gated: !cli.ungated,
        calculate_momentary: cli.momentary,
        calculate_short_term: cli.short_term,
        calculate_loudness_range: cli.lra,
        calculate_true_peak: cli.true_peak,
        true_peak_factor: cli.tp_factor,
        true_peak_interpolation: cli.interpolation.parse()?,
    };

    log::info!("loudscope - spectral and loudness analysis");
    log::info!("Input: {}", input.display());
    log::info!(
        "FFT: {} provider, size {}, hop {}, {:?} window",
        settings.provider,
        settings.fft_size,
        settings.hop_size,
        settings.window
    );

    // 1. Decode audio
    log::info!("Decoding audio...");
    let audio = decode_audio(input)?;

    // 2. Global levels
    let global = global_analysis(&audio)?;

    // 3. Spectral pass
    let pb = ProgressBar::new(settings.frame_count(&audio) as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} frames ({eta} remaining)")?
            .progress_chars("=>-"),
    );
    let cache = FftProviderCache::shared();
    let (spectral, frames) = analyze_spectrum(&audio, &settings, cache, || pb.inc(1))
        .context("Spectral analysis failed")?;
    pb.finish_with_message("Spectral analysis complete");

    // 4. Batch loudness
    log::info!("Measuring loudness...");
    let loudness = get_lufs(&audio, &options).context("Loudness measurement failed")?;

    // 5. Optional realtime replay
    let realtime = match cli.realtime_ms {
        Some(chunk_ms) => {
            let chunk = (audio.sample_rate() as u64 * chunk_ms / 1000) as usize;
            log::info!("Streaming through realtime meter in {} sample chunks...", chunk);
            let readings = stream_loudness(&audio, chunk, &options).context("Realtime metering failed")?;
            if let Some(last) = readings.last() {
                log::info!(
                    "Realtime integrated {:.2} LUFS (batch {:.2})",
                    last.integrated,
                    loudness.integrated
                );
            }
            Some(readings)
        }
        None => None,
    };

    print_summary(&loudness);

    if let Some(ref path) = cli.json {
        let report = AnalysisReport {
            input: input.display().to_string(),
            global,
            spectral,
            frames: cli.frames.then_some(frames),
            loudness,
            realtime,
        };
        write_report(path, &report)?;
    }

    clear_shared_fft_provider_cache();
    Ok(())
}

fn print_summary(loudness: &LoudnessResult) {
    println!("Integrated loudness: {:.1} LUFS", loudness.integrated);
    if let Some(range) = loudness.loudness_range {
        println!("Loudness range:      {:.1} LU", range);
    }
    if let Some(ref short_term) = loudness.short_term {
        let max = short_term.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        println!("Max short-term:      {:.1} LUFS", max);
    }
    if let Some(ref momentary) = loudness.momentary {
        let max = momentary.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        println!("Max momentary:       {:.1} LUFS", max);
    }
    if let Some(ref peaks) = loudness.true_peak {
        for (channel, peak) in peaks.iter().enumerate() {
            println!("True peak ch{}:       {:.1} dBTP", channel, peak);
        }
    }
}

fn write_report(path: &Path, report: &AnalysisReport) -> Result<()> {
    if path.as_os_str() == "-" {
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        serde_json::to_writer_pretty(&mut handle, report)?;
        writeln!(handle)?;
        return Ok(());
    }
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create report file: {}", path.display()))?;
    serde_json::to_writer_pretty(std::io::BufWriter::new(file), report)?;
    log::info!("Done! Report: {}", path.display());
    Ok(())
}
