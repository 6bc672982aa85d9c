//! Audio collaborators for a check-in session
//!
//! The session core never touches audio hardware. It pulls PCM frames from a
//! [`MicrophoneSource`] and pushes decoded assistant audio into an
//! [`AudioSink`]. The CLI plugs WAV files into both ends.

mod level;
mod wav;

pub use level::{level_scale, rms_dbfs, LevelMeter};
pub use wav::{WavFileSink, WavFileSource};

/// Sample rate the Realtime API expects for pcm16 in both directions
pub const REALTIME_SAMPLE_RATE: u32 = 24_000;

/// Errors from audio sources and sinks.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AudioError {
    #[error("Failed to open audio file: {0}")]
    OpenFailed(String),
    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),
    #[error("Failed to read audio data: {0}")]
    ReadFailed(String),
    #[error("Failed to write audio data: {0}")]
    WriteFailed(String),
}

/// Source of microphone PCM16 mono frames
pub trait MicrophoneSource: Send {
    fn sample_rate(&self) -> u32;

    /// Up to `max_samples` of the next captured audio. `None` once the
    /// source is exhausted or the device went away.
    fn read_frame(&mut self, max_samples: usize) -> Option<Vec<i16>>;
}

/// Playback target for decoded assistant audio (PCM16 LE, 24 kHz mono)
pub trait AudioSink: Send {
    /// Queue bytes for playback, in order
    fn play(&mut self, pcm: &[u8]);

    /// Drop everything queued or playing (barge-in / disconnect)
    fn stop(&mut self);

    /// Release the output. Called once when the session loop exits.
    fn finish(&mut self) -> Result<(), AudioError> {
        Ok(())
    }
}

/// Sink that discards audio (no `--reply-wav`)
#[derive(Debug, Default)]
pub struct NullSink {
    bytes: usize,
}

impl AudioSink for NullSink {
    fn play(&mut self, pcm: &[u8]) {
        self.bytes += pcm.len();
    }

    fn stop(&mut self) {}

    fn finish(&mut self) -> Result<(), AudioError> {
        log::debug!("NullSink: discarded {} bytes of assistant audio", self.bytes);
        Ok(())
    }
}

/// Resample mono PCM16 from `source_rate` to `target_rate`
///
/// Integer ratios (e.g. 48kHz → 24kHz) average each group of samples; any
/// other ratio falls back to linear interpolation.
pub fn resample(samples: &[i16], source_rate: u32, target_rate: u32) -> Vec<i16> {
    // Guard against division by zero
    if target_rate == 0 || source_rate == 0 {
        log::warn!(
            "Invalid sample rate (source: {}, target: {}), returning original",
            source_rate,
            target_rate
        );
        return samples.to_vec();
    }

    if source_rate == target_rate || samples.is_empty() {
        return samples.to_vec();
    }

    if source_rate > target_rate && source_rate % target_rate == 0 {
        let ratio = (source_rate / target_rate) as usize;
        return samples
            .chunks(ratio)
            .map(|chunk| {
                // Use i64 to prevent overflow with large chunks
                let sum: i64 = chunk.iter().map(|&s| s as i64).sum();
                (sum / chunk.len() as i64) as i16
            })
            .collect();
    }

    let out_len = ((samples.len() as u64 * target_rate as u64) / source_rate as u64) as usize;
    let step = source_rate as f64 / target_rate as f64;
    (0..out_len)
        .map(|i| {
            let pos = i as f64 * step;
            let idx = pos.floor() as usize;
            let frac = pos - idx as f64;
            let a = samples[idx.min(samples.len() - 1)] as f64;
            let b = samples[(idx + 1).min(samples.len() - 1)] as f64;
            (a + (b - a) * frac).round() as i16
        })
        .collect()
}

/// Little-endian PCM16 bytes to samples; a trailing odd byte is ignored
pub fn pcm16_from_le_bytes(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}
