//! Reference-audio loading and WAV output.
//!
//! Decoding goes through symphonia so any supported container/codec works as
//! a voice reference, not just WAV. The decoded stream is downmixed to mono,
//! resampled to the model rate, optionally peak-normalized, and silently
//! truncated past the duration cap.

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::TtsError;

/// Mono float PCM at a known sample rate.
#[derive(Debug, Clone)]
pub struct AudioData {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioData {
    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// Decode `path` into mono f32 PCM at `target_rate`.
///
/// `max_secs` caps the duration (0 disables the cap); overlong input is
/// truncated, never rejected.
pub fn load_audio(
    path: &Path,
    target_rate: u32,
    normalize: bool,
    max_secs: f32,
) -> Result<AudioData, TtsError> {
    let (interleaved, channels, src_rate) = decode_file(path)?;
    if interleaved.is_empty() {
        return Err(TtsError::Audio(format!(
            "no audio samples decoded from {}",
            path.display()
        )));
    }

    let mono = if channels > 1 {
        log::debug!("Mixing {} channels to mono", channels);
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    } else {
        interleaved
    };

    let mut samples = if src_rate != target_rate {
        log::debug!(
            "Resampling audio: {}Hz -> {}Hz ({} samples)",
            src_rate,
            target_rate,
            mono.len()
        );
        resample_linear(&mono, src_rate, target_rate)
    } else {
        mono
    };

    if max_secs > 0.0 {
        let max_samples = (max_secs * target_rate as f32) as usize;
        if samples.len() > max_samples {
            log::warn!(
                "Reference audio is {:.1}s, truncating to {:.0}s",
                samples.len() as f32 / target_rate as f32,
                max_secs
            );
            samples.truncate(max_samples);
        }
    }

    if normalize {
        normalize_peak(&mut samples);
    }

    let audio = AudioData {
        samples,
        sample_rate: target_rate,
    };
    log::info!(
        "Audio loaded: {} samples ({:.2}s at {}Hz)",
        audio.samples.len(),
        audio.duration_secs(),
        target_rate
    );
    Ok(audio)
}

/// Decode a file into interleaved f32 samples; returns (samples, channels,
/// source sample rate).
fn decode_file(path: &Path) -> Result<(Vec<f32>, usize, u32), TtsError> {
    let file = File::open(path)
        .map_err(|e| TtsError::Audio(format!("failed to open {}: {}", path.display(), e)))?;
    let stream = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            stream,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| TtsError::Audio(format!("unsupported format {}: {}", path.display(), e)))?;
    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| TtsError::Audio(format!("no audio track in {}", path.display())))?;
    let track_id = track.id;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| TtsError::Audio(format!("unsupported codec: {}", e)))?;

    let mut interleaved: Vec<f32> = Vec::new();
    let mut channels = 1usize;
    let mut sample_rate = 0u32;
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            // End of stream surfaces as an I/O error from the reader.
            Err(SymphoniaError::IoError(_)) => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => {
                return Err(TtsError::Audio(format!("demux failed: {}", e)));
            }
        };
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                if sample_buf.is_none() {
                    let spec = *decoded.spec();
                    channels = spec.channels.count();
                    sample_rate = spec.rate;
                    sample_buf = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
                }
                if let Some(buf) = &mut sample_buf {
                    buf.copy_interleaved_ref(decoded);
                    interleaved.extend_from_slice(buf.samples());
                }
            }
            Err(SymphoniaError::DecodeError(e)) => {
                log::warn!("Skipping undecodable packet: {}", e);
            }
            Err(e) => {
                return Err(TtsError::Audio(format!("decode failed: {}", e)));
            }
        }
    }

    if sample_rate == 0 {
        return Err(TtsError::Audio(format!(
            "could not determine sample rate of {}",
            path.display()
        )));
    }
    Ok((interleaved, channels, sample_rate))
}

/// Linear-interpolation resample from `src_rate` to `dst_rate`.
pub fn resample_linear(samples: &[f32], src_rate: u32, dst_rate: u32) -> Vec<f32> {
    if samples.is_empty() || src_rate == dst_rate {
        return samples.to_vec();
    }

    let ratio = dst_rate as f64 / src_rate as f64;
    let new_len = (samples.len() as f64 * ratio) as usize;
    let mut resampled = Vec::with_capacity(new_len);

    for i in 0..new_len {
        let src_idx = i as f64 / ratio;
        let idx0 = src_idx as usize;
        let idx1 = (idx0 + 1).min(samples.len() - 1);
        let frac = (src_idx - idx0 as f64) as f32;
        resampled.push(samples[idx0] * (1.0 - frac) + samples[idx1] * frac);
    }

    resampled
}

/// Scale so the absolute peak sits at 1.0. Silence is left untouched.
fn normalize_peak(samples: &mut [f32]) {
    let peak = samples.iter().fold(0.0f32, |m, &s| m.max(s.abs()));
    if peak > 0.0 && peak != 1.0 {
        let scale = 1.0 / peak;
        for s in samples.iter_mut() {
            *s *= scale;
        }
    }
}

/// Write mono 16-bit PCM WAV; samples are clamped to [-1, 1].
pub fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) -> Result<(), TtsError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec)
        .map_err(|e| TtsError::Audio(format!("WAV create error: {}", e)))?;

    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        writer
            .write_sample((clamped * 32767.0) as i16)
            .map_err(|e| TtsError::Audio(format!("WAV write error: {}", e)))?;
    }

    writer
        .finalize()
        .map_err(|e| TtsError::Audio(format!("WAV finalize error: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resample_same_rate_is_identity() {
        let samples = vec![0.1f32, -0.2, 0.3, -0.4];
        assert_eq!(resample_linear(&samples, 24_000, 24_000), samples);
    }

    #[test]
    fn resample_halves_and_doubles_length() {
        let samples: Vec<f32> = (0..1000).map(|i| (i as f32 * 0.01).sin()).collect();
        let down = resample_linear(&samples, 48_000, 24_000);
        assert_eq!(down.len(), 500);
        let up = resample_linear(&samples, 12_000, 24_000);
        assert_eq!(up.len(), 2000);
    }

    #[test]
    fn resample_interpolates_between_neighbors() {
        let samples = vec![0.0f32, 1.0];
        let up = resample_linear(&samples, 1, 2);
        assert_eq!(up.len(), 4);
        assert_eq!(up[0], 0.0);
        assert_eq!(up[1], 0.5);
    }

    #[test]
    fn normalize_peak_scales_to_unit() {
        let mut samples = vec![0.25f32, -0.5, 0.1];
        normalize_peak(&mut samples);
        assert_eq!(samples[1], -1.0);
        assert_eq!(samples[0], 0.5);
    }

    #[test]
    fn normalize_peak_leaves_silence_alone() {
        let mut samples = vec![0.0f32; 10];
        normalize_peak(&mut samples);
        assert!(samples.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn wav_write_then_decode_round_trips() {
        let path = std::env::temp_dir().join("chatterbox_wav_roundtrip.wav");
        let samples: Vec<f32> = (0..2400).map(|i| (i as f32 * 0.05).sin() * 0.8).collect();
        write_wav(&path, &samples, 24_000).unwrap();

        let audio = load_audio(&path, 24_000, false, 0.0).unwrap();
        assert_eq!(audio.sample_rate, 24_000);
        assert_eq!(audio.samples.len(), samples.len());
        // 16-bit quantization error stays below one LSB.
        for (a, b) in audio.samples.iter().zip(&samples) {
            assert!((a - b).abs() < 1.0 / 16_384.0);
        }
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn duration_cap_truncates_silently() {
        let path = std::env::temp_dir().join("chatterbox_wav_cap.wav");
        let samples = vec![0.5f32; 24_000 * 2];
        write_wav(&path, &samples, 24_000).unwrap();

        let audio = load_audio(&path, 24_000, false, 1.0).unwrap();
        assert_eq!(audio.samples.len(), 24_000);
        assert!((audio.duration_secs() - 1.0).abs() < 1e-6);
        let _ = std::fs::remove_file(&path);
    }
}
