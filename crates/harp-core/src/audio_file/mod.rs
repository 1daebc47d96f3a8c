//! WAV exchange with remote models
//!
//! Audio leaves the plugin as a 16-bit PCM WAV written to a temporary file
//! and comes back as whatever WAV the model produced. Decoding normalizes
//! every integer format to `[-1, 1)` floats.

use std::io::BufWriter;
use std::path::Path;

use crate::error::{ErrorKind, HarpError, Result};
use crate::types::{AudioBuffer, SourceAudio};

/// Decode a WAV file into a channel-major buffer
pub fn read_wav(path: &Path) -> Result<SourceAudio> {
    let mut reader = hound::WavReader::open(path).map_err(|e| {
        HarpError::new(
            ErrorKind::FileDownloadError,
            format!("Failed to open WAV {:?}: {}", path, e),
        )
    })?;

    let spec = reader.spec();
    let num_channels = spec.channels as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()?
        }
    };

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    log::debug!(
        "read_wav: {:?} {} ch, {} Hz, {} frames",
        path,
        num_channels,
        spec.sample_rate,
        interleaved.len() / num_channels.max(1)
    );

    Ok(SourceAudio::new(
        name,
        spec.sample_rate as f64,
        AudioBuffer::from_interleaved(&interleaved, num_channels),
    ))
}

/// Write a buffer as 16-bit PCM WAV
pub fn write_wav(path: &Path, audio: &SourceAudio) -> Result<()> {
    let file = std::fs::File::create(path)?;
    write_wav_to(BufWriter::new(file), audio)
}

/// Write audio to a new temporary WAV file
///
/// The file is removed when the returned handle is dropped.
pub fn write_temp_wav(audio: &SourceAudio) -> Result<tempfile::NamedTempFile> {
    let temp_file = tempfile::Builder::new()
        .prefix("harp_")
        .suffix(".wav")
        .tempfile()
        .map_err(|e| {
            HarpError::new(
                ErrorKind::FileUploadError,
                format!("Failed to create temporary WAV file: {}", e),
            )
        })?;

    write_wav_to(BufWriter::new(temp_file.reopen()?), audio)?;
    Ok(temp_file)
}

fn write_wav_to<W>(writer: W, audio: &SourceAudio) -> Result<()>
where
    W: std::io::Write + std::io::Seek,
{
    let spec = hound::WavSpec {
        channels: audio.buffer.num_channels().max(1) as u16,
        sample_rate: audio.sample_rate.round() as u32,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::new(writer, spec)?;
    let num_channels = audio.buffer.num_channels();
    for frame in 0..audio.buffer.num_frames() {
        for channel in 0..num_channels {
            let clamped = audio.buffer.channel(channel)[frame].clamp(-1.0, 1.0);
            writer.write_sample((clamped * 32767.0) as i16)?;
        }
    }
    writer.finalize()?;
    Ok(())
}

/// Linear interpolation resampling of every channel
pub fn resample_linear(buffer: &AudioBuffer, from_sr: f64, to_sr: f64) -> AudioBuffer {
    if from_sr <= 0.0 || to_sr <= 0.0 || from_sr == to_sr {
        return buffer.clone();
    }

    let ratio = from_sr / to_sr;
    let output_len = (buffer.num_frames() as f64 / ratio) as usize;
    let channels = (0..buffer.num_channels())
        .map(|channel| {
            let samples = buffer.channel(channel);
            (0..output_len)
                .map(|i| {
                    let src_pos = i as f64 * ratio;
                    let idx = src_pos as usize;
                    let frac = (src_pos - idx as f64) as f32;
                    if idx + 1 < samples.len() {
                        samples[idx] * (1.0 - frac) + samples[idx + 1] * frac
                    } else if idx < samples.len() {
                        samples[idx]
                    } else {
                        0.0
                    }
                })
                .collect()
        })
        .collect();

    AudioBuffer::from_channels(channels)
}
