//! WAV files standing in for the microphone and speaker
//!
//! Uses hound for decoding and encoding. The source is decoded up front and
//! served in frames; the sink writes 24kHz mono 16-bit PCM as it arrives.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use super::{pcm16_from_le_bytes, AudioError, AudioSink, MicrophoneSource, REALTIME_SAMPLE_RATE};

/// Pre-recorded speech played into the session as if captured live.
///
/// Once the recording is used up the source keeps producing silence for
/// `trailing_silence_samples`, so server-side VAD sees the end of the turn,
/// and then reports exhaustion.
#[derive(Debug)]
pub struct WavFileSource {
    samples: Vec<i16>,
    position: usize,
    sample_rate: u32,
    trailing_silence_samples: usize,
}

impl WavFileSource {
    /// Decode `path` to mono PCM16 (channels are averaged)
    pub fn open(path: &Path) -> Result<Self, AudioError> {
        let reader = WavReader::open(path)
            .map_err(|e| AudioError::OpenFailed(format!("{:?}: {}", path, e)))?;
        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;

        let interleaved: Vec<i16> = match (spec.sample_format, spec.bits_per_sample) {
            (SampleFormat::Int, 16) => reader
                .into_samples::<i16>()
                .collect::<Result<_, _>>()
                .map_err(|e| AudioError::ReadFailed(e.to_string()))?,
            (SampleFormat::Int, bits @ (24 | 32)) => {
                let shift = bits - 16;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| (v >> shift) as i16))
                    .collect::<Result<_, _>>()
                    .map_err(|e| AudioError::ReadFailed(e.to_string()))?
            }
            (SampleFormat::Float, 32) => reader
                .into_samples::<f32>()
                .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * i16::MAX as f32) as i16))
                .collect::<Result<_, _>>()
                .map_err(|e| AudioError::ReadFailed(e.to_string()))?,
            (format, bits) => {
                return Err(AudioError::UnsupportedFormat(format!(
                    "{:?} {}-bit",
                    format, bits
                )))
            }
        };

        let samples: Vec<i16> = interleaved
            .chunks(channels)
            .map(|frame| {
                let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                (sum / frame.len() as i32) as i16
            })
            .collect();

        log::info!(
            "Loaded {:?}: {} samples at {} Hz ({} channel(s))",
            path,
            samples.len(),
            spec.sample_rate,
            spec.channels
        );

        Ok(Self::from_samples(samples, spec.sample_rate))
    }

    pub fn from_samples(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            position: 0,
            sample_rate,
            // Two seconds, comfortably past the VAD silence window
            trailing_silence_samples: sample_rate as usize * 2,
        }
    }

    pub fn with_trailing_silence(mut self, samples: usize) -> Self {
        self.trailing_silence_samples = samples;
        self
    }

    fn total_len(&self) -> usize {
        self.samples.len() + self.trailing_silence_samples
    }
}

impl MicrophoneSource for WavFileSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read_frame(&mut self, max_samples: usize) -> Option<Vec<i16>> {
        if self.position >= self.total_len() || max_samples == 0 {
            return None;
        }

        let end = (self.position + max_samples).min(self.total_len());
        let mut frame = Vec::with_capacity(end - self.position);
        if self.position < self.samples.len() {
            let audio_end = end.min(self.samples.len());
            frame.extend_from_slice(&self.samples[self.position..audio_end]);
        }
        frame.resize(end - self.position, 0);
        self.position = end;
        Some(frame)
    }
}

/// Writes assistant audio to a 24kHz mono 16-bit WAV file.
pub struct WavFileSink {
    writer: Option<WavWriter<BufWriter<File>>>,
    path: PathBuf,
    samples_written: u64,
    /// Low byte of a sample split across two chunks
    carry: Option<u8>,
}

impl WavFileSink {
    pub fn create(path: &Path) -> Result<Self, AudioError> {
        let spec = WavSpec {
            channels: 1,
            sample_rate: REALTIME_SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };

        let writer = WavWriter::create(path, spec)
            .map_err(|e| AudioError::OpenFailed(format!("{:?}: {}", path, e)))?;

        Ok(Self {
            writer: Some(writer),
            path: path.to_path_buf(),
            samples_written: 0,
            carry: None,
        })
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }
}

impl AudioSink for WavFileSink {
    fn play(&mut self, pcm: &[u8]) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };

        let mut pcm = pcm;
        let mut samples = Vec::with_capacity(pcm.len() / 2 + 1);
        if let Some(low) = self.carry.take() {
            match pcm.split_first() {
                Some((&high, rest)) => {
                    samples.push(i16::from_le_bytes([low, high]));
                    pcm = rest;
                }
                None => {
                    self.carry = Some(low);
                    return;
                }
            }
        }
        samples.extend(pcm16_from_le_bytes(pcm));
        if pcm.len() % 2 == 1 {
            self.carry = pcm.last().copied();
        }

        for sample in samples {
            if let Err(e) = writer.write_sample(sample) {
                log::warn!("WavFileSink: write failed: {}", e);
                return;
            }
            self.samples_written += 1;
        }
    }

    fn stop(&mut self) {
        // Everything handed to a file is already "played"; only a half sample to cut
        self.carry = None;
        log::debug!(
            "WavFileSink: playback interrupted after {} samples",
            self.samples_written
        );
    }

    fn finish(&mut self) -> Result<(), AudioError> {
        if let Some(writer) = self.writer.take() {
            writer
                .finalize()
                .map_err(|e| AudioError::WriteFailed(e.to_string()))?;
            log::info!(
                "Assistant audio written: {:?} ({} samples)",
                self.path,
                self.samples_written
            );
        }
        Ok(())
    }
}

impl Drop for WavFileSink {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            log::warn!("WavFileSink: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path, spec: WavSpec, samples: &[i16]) {
        let mut writer = WavWriter::create(path, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_source_frames_then_silence_then_exhausted() {
        let mut source = WavFileSource::from_samples(vec![1, 2, 3, 4, 5], 24000)
            .with_trailing_silence(3);

        assert_eq!(source.read_frame(2), Some(vec![1, 2]));
        assert_eq!(source.read_frame(2), Some(vec![3, 4]));
        assert_eq!(source.read_frame(2), Some(vec![5, 0]));
        assert_eq!(source.read_frame(2), Some(vec![0, 0]));
        assert_eq!(source.read_frame(2), None);
    }

    #[test]
    fn test_source_mixes_stereo_to_mono() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let spec = WavSpec {
            channels: 2,
            sample_rate: 48000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        write_wav(&path, spec, &[100, 300, -200, -400]);

        let mut source = WavFileSource::open(&path).unwrap().with_trailing_silence(0);
        assert_eq!(source.sample_rate(), 48000);
        assert_eq!(source.read_frame(10), Some(vec![200, -300]));
        assert_eq!(source.read_frame(10), None);
    }

    #[test]
    fn test_source_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = WavFileSource::open(&dir.path().join("nope.wav"));
        assert!(matches!(result, Err(AudioError::OpenFailed(_))));
    }

    #[test]
    fn test_sink_writes_24k_mono() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reply.wav");

        let mut sink = WavFileSink::create(&path).unwrap();
        sink.play(&[0x34, 0x12, 0xff, 0xff]);
        sink.play(&[0x02, 0x00]);
        assert_eq!(sink.samples_written(), 3);
        sink.finish().unwrap();

        let reader = WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 24000);
        assert_eq!(reader.spec().channels, 1);
        let samples: Vec<i16> = reader.into_samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![0x1234, -1, 2]);
    }

    #[test]
    fn test_sink_joins_samples_split_across_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("split.wav");

        let mut sink = WavFileSink::create(&path).unwrap();
        sink.play(&[0x34]);
        sink.play(&[]);
        sink.play(&[0x12]);
        sink.play(&[0x02]);
        sink.play(&[0x03, 0xff, 0xff]);
        assert_eq!(sink.samples_written(), 3);
        sink.finish().unwrap();

        let samples: Vec<i16> = WavReader::open(&path)
            .unwrap()
            .into_samples::<i16>()
            .map(|s| s.unwrap())
            .collect();
        assert_eq!(samples, vec![0x1234, 0x0302, -1]);
    }

    #[test]
    fn test_sink_stop_discards_half_sample() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = WavFileSink::create(&dir.path().join("cut.wav")).unwrap();

        sink.play(&[0x01, 0x00, 0x7f]);
        sink.stop();
        sink.play(&[0x02, 0x00]);
        assert_eq!(sink.samples_written(), 2);
    }
}
