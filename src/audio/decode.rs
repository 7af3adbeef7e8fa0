use anyhow::{Context, Result};
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::AudioData;

fn open_format(path: &Path) -> Result<Box<dyn FormatReader>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open audio file: {}", path.display()))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .with_context(|| format!("Unrecognized audio format: {}", path.display()))?;
    Ok(probed.format)
}

/// Appends interleaved frames to planar buffers.
///
/// Packets carrying fewer channels than the track repeat their first channel.
fn deinterleave(interleaved: &[f32], packet_channels: usize, planar: &mut [Vec<f32>]) {
    for frame in interleaved.chunks(packet_channels.max(1)) {
        for (ch, buffer) in planar.iter_mut().enumerate() {
            buffer.push(frame.get(ch).or_else(|| frame.first()).copied().unwrap_or(0.0));
        }
    }
}

/// Decodes the first audio track of a media file, keeping channels apart.
pub fn decode_audio(path: &Path) -> Result<AudioData> {
    let mut format = open_format(path)?;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .context("No audio tracks found")?;
    let track_id = track.id;
    let sample_rate = track.codec_params.sample_rate.context("Unknown sample rate")?;
    let channel_count = track.codec_params.channels.map_or(1, |c| c.count());

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .context("Failed to create audio decoder")?;

    let mut planar: Vec<Vec<f32>> = vec![Vec::new(); channel_count];
    let mut skipped = 0usize;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e).context("Failed to read packet"),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(err)) => {
                log::warn!("Skipping undecodable packet: {}", err);
                skipped += 1;
                continue;
            }
            Err(e) => return Err(e).context("Decoder failed"),
        };

        let spec = *decoded.spec();
        let mut samples = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        samples.copy_interleaved_ref(decoded);
        deinterleave(samples.samples(), spec.channels.count(), &mut planar);
    }

    let audio = AudioData::new(sample_rate, planar).context("Decoder produced ragged channels")?;
    log::info!(
        "Decoded audio: {} channel(s), {} samples, {}Hz, {:.1}s{}",
        audio.number_of_channels(),
        audio.length(),
        sample_rate,
        audio.duration(),
        if skipped > 0 { format!(" ({skipped} packets skipped)") } else { String::new() }
    );
    Ok(audio)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_interleaved_frames() {
        let mut planar = vec![Vec::new(), Vec::new()];
        deinterleave(&[1.0, -1.0, 2.0, -2.0], 2, &mut planar);
        assert_eq!(planar, vec![vec![1.0, 2.0], vec![-1.0, -2.0]]);
    }

    #[test]
    fn narrow_packets_fill_missing_channels() {
        let mut planar = vec![Vec::new(), Vec::new()];
        deinterleave(&[0.5, 0.25], 1, &mut planar);
        assert_eq!(planar, vec![vec![0.5, 0.25], vec![0.5, 0.25]]);
    }
}
