mod support;

use loudscope::audio::analysis::{analyze_spectrum, global_analysis, stream_loudness, SpectralSettings};
use loudscope::audio::decode::decode_audio;
use loudscope::dsp::fft_runtime::{FftProviderCache, FftProviderKind};
use loudscope::loudness::{get_lufs, ChannelMode, LoudnessOptions};
use support::{sine, wav::write_test_wav};

#[test]
fn decoded_stereo_file_measures_like_its_samples() {
    let temp = tempfile::tempdir().expect("create tempdir");
    let path = temp.path().join("tone.wav");
    let left = sine(48_000, 1_000.0, -20.0, 5.0);
    let right = left.clone();
    write_test_wav(&path, 48_000, &[left.clone(), right]);

    let audio = decode_audio(&path).expect("decode wav");
    assert_eq!(audio.sample_rate(), 48_000);
    assert_eq!(audio.number_of_channels(), 2);
    assert_eq!(audio.length(), left.len());
    assert_eq!(audio.channel(0).unwrap(), &left[..]);

    let stereo = get_lufs(&audio, &LoudnessOptions::default()).unwrap();
    // Two -23 LUFS channels sum to about -20 LUFS.
    assert!((stereo.integrated + 20.0).abs() < 0.3, "{}", stereo.integrated);

    let mono = get_lufs(
        &audio,
        &LoudnessOptions {
            channel_mode: Some(ChannelMode::Mono),
            ..LoudnessOptions::default()
        },
    )
    .unwrap();
    assert!((stereo.integrated - mono.integrated - 3.0103).abs() < 1e-3);
}

#[test]
fn full_report_pipeline() {
    let temp = tempfile::tempdir().expect("create tempdir");
    let path = temp.path().join("mono.wav");
    write_test_wav(&path, 44_100, &[sine(44_100, 2_000.0, -12.0, 3.0)]);
    let audio = decode_audio(&path).expect("decode wav");

    let global = global_analysis(&audio).unwrap();
    assert!((global.duration - 3.0).abs() < 1e-3);

    let settings = SpectralSettings {
        provider: FftProviderKind::RustFft,
        ..SpectralSettings::default()
    };
    let (summary, frames) = analyze_spectrum(&audio, &settings, &FftProviderCache::new(), || {}).unwrap();
    assert_eq!(summary.frame_count, frames.len());
    assert!((summary.dominant_frequency - 2_000.0).abs() < 44_100.0 / 2048.0);

    let options = LoudnessOptions {
        calculate_true_peak: true,
        ..LoudnessOptions::default()
    };
    let batch = get_lufs(&audio, &options).unwrap();
    let readings = stream_loudness(&audio, 2_205, &options).unwrap();
    let last = readings.last().unwrap();
    assert!((last.integrated - batch.integrated).abs() < 1e-9);

    let streamed_peak = last.true_peak.as_ref().unwrap()[0];
    let batch_peak = batch.true_peak.as_ref().unwrap()[0];
    assert!((streamed_peak - batch_peak).abs() < 0.2, "{streamed_peak} vs {batch_peak}");
}
