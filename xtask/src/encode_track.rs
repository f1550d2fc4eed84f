//! xtask encode-track: WAV + mechanical script → `<n>.ULV` card image.
//!
//! The audio is mixed down to mono, resampled to the playback rate and mapped
//! to unsigned 8-bit; the script's toggle times become the interleaved
//! mechanical bytes.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use colored::Colorize;
use hound::{SampleFormat, WavReader};
use platform::config::SAMPLE_RATE_HZ;
use rubato::{FftFixedInOut, Resampler};
use track::encoder::{encode_image, mixdown, to_unsigned, MechanicalScript};
use track::TrackId;

const RESAMPLE_CHUNK: usize = 1024;

/// Entry point called from main.rs. Returns the path written.
pub fn run(script_path: &Path, track: u8, out_dir: &Path, normalize: bool) -> Result<PathBuf> {
    let start = Instant::now();
    let track = TrackId::new(track).with_context(|| format!("track {track} is outside 1-10"))?;

    let text = fs::read_to_string(script_path)
        .with_context(|| format!("Failed to read script {}", script_path.display()))?;
    let script = MechanicalScript::parse(&text).context("Invalid mechanical script")?;
    let wav_path = script_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(&script.audio);

    println!();
    println!(
        "{}",
        format!("🎛  Encoding track {} from {}", track.get(), wav_path.display())
            .cyan()
            .bold()
    );

    let (mono, rate) = read_mono(&wav_path)?;
    println!("   {}", format!("{} frames at {rate} Hz", mono.len()).dimmed());
    let resampled = resample(&mono, rate, SAMPLE_RATE_HZ)?;

    let (min, max) = if normalize {
        let peak = resampled.iter().fold(0.0f32, |peak, s| peak.max(s.abs()));
        (-f64::from(peak), f64::from(peak))
    } else {
        (-1.0, 1.0)
    };
    let samples: Vec<u8> = resampled
        .iter()
        .map(|&s| to_unsigned(f64::from(s), min, max))
        .collect();

    let image = encode_image(&samples, &script.timeline).context("Track does not fit the flash")?;
    fs::create_dir_all(out_dir).with_context(|| format!("Failed to create {}", out_dir.display()))?;
    let out_path = out_dir.join(track.file_name().as_str());
    fs::write(&out_path, &image).with_context(|| format!("Failed to write {}", out_path.display()))?;

    println!(
        "{}",
        format!(
            "✓ {} written: {} samples, {} bytes in {:.2}s",
            out_path.display(),
            samples.len(),
            image.len(),
            start.elapsed().as_secs_f64()
        )
        .green()
    );
    println!();
    Ok(out_path)
}

/// Read a WAV file as mono `f32` in `[-1, 1]`, with its sample rate.
fn read_mono(path: &Path) -> Result<(Vec<f32>, u32)> {
    let mut reader = WavReader::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let spec = reader.spec();
    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .context("Corrupt WAV data")?,
        SampleFormat::Int => {
            let scale = 1.0 / (1u64 << spec.bits_per_sample.saturating_sub(1).min(31)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|s| s as f32 * scale))
                .collect::<Result<_, _>>()
                .context("Corrupt WAV data")?
        }
    };
    Ok((mixdown(&interleaved, usize::from(spec.channels)), spec.sample_rate))
}

/// Resample mono audio from `from` Hz to `to` Hz.
fn resample(input: &[f32], from: u32, to: u32) -> Result<Vec<f32>> {
    if from == to || input.is_empty() {
        return Ok(input.to_vec());
    }
    let mut resampler = FftFixedInOut::<f32>::new(from as usize, to as usize, RESAMPLE_CHUNK, 1)
        .context("Failed to set up the resampler")?;
    let delay = resampler.output_delay();
    let expected = (input.len() as u64 * u64::from(to)).div_ceil(u64::from(from)) as usize;

    // Zero tail flushes the filter delay out of the last chunk.
    let mut padded = input.to_vec();
    let chunk_in = resampler.input_frames_next();
    padded.resize(input.len() + chunk_in + delay * from as usize / to as usize + chunk_in, 0.0);

    let mut output = Vec::with_capacity(expected + delay);
    for chunk in padded.chunks_exact(chunk_in) {
        let frames = resampler.process(&[chunk], None).context("Resampling failed")?;
        if let Some(mono) = frames.into_iter().next() {
            output.extend(mono);
        }
        if output.len() >= expected + delay {
            break;
        }
    }
    output.drain(..delay.min(output.len()));
    output.truncate(expected);
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{WavSpec, WavWriter};
    use track::{Layout, TrackHeader, HEADER_LEN};

    fn write_wav(path: &Path, rate: u32, channels: u16, frames: usize) {
        let spec = WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec).unwrap();
        for i in 0..frames {
            let s = ((i as f32 * 0.05).sin() * 16_000.0) as i16;
            for _ in 0..channels {
                writer.write_sample(s).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn encodes_at_the_playback_rate() {
        let dir = tempfile::tempdir().unwrap();
        write_wav(&dir.path().join("song.wav"), SAMPLE_RATE_HZ, 2, 5_000);
        let script = dir.path().join("song.txt");
        fs::write(&script, "song.wav\n0.01 0.05\n\n\n0.1\n").unwrap();

        let out = run(&script, 3, dir.path(), false).unwrap();

        assert_eq!(out.file_name().unwrap(), "3.ULV");
        let image = fs::read(out).unwrap();
        let header = TrackHeader::from_bytes(image[..HEADER_LEN].try_into().unwrap());
        assert_eq!(header.payload_len(), Layout::for_samples(5_000).payload_len().unwrap());
        assert_eq!(image.len(), HEADER_LEN + header.payload_len() as usize);
    }

    #[test]
    fn resampling_scales_the_length() {
        let input = vec![0.25f32; 44_100];
        let output = resample(&input, 44_100, SAMPLE_RATE_HZ).unwrap();

        assert_eq!(output.len(), SAMPLE_RATE_HZ as usize);
        // Steady input stays steady away from the edges.
        let middle = output[output.len() / 2];
        assert!((middle - 0.25).abs() < 0.01, "got {middle}");
    }

    #[test]
    fn rejects_out_of_range_track() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("s.txt");
        fs::write(&script, "missing.wav\n").unwrap();

        assert!(run(&script, 11, dir.path(), false).is_err());
    }

    #[test]
    fn missing_audio_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("s.txt");
        fs::write(&script, "missing.wav\n").unwrap();

        let err = run(&script, 1, dir.path(), false).unwrap_err();
        assert!(err.to_string().contains("missing.wav"));
    }
}
