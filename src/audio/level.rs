//! Microphone level metering
//!
//! Converts a frame of PCM16 samples to a 0.0-1.0 level for the UI:
//! RMS → dBFS, then a linear map of the -40..0 dB window, then EMA smoothing
//! so the meter doesn't jitter between 100 ms samples.

/// Quietest level that still registers on the meter
const FLOOR_DB: f32 = -40.0;

/// EMA smoothing factor (0.3 = 30% new value, 70% previous)
const EMA_ALPHA: f32 = 0.3;

/// RMS of `samples` in dB relative to full scale (`-inf` for silence)
pub fn rms_dbfs(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return f32::NEG_INFINITY;
    }

    let sum_squares: f64 = samples
        .iter()
        .map(|&s| {
            let normalized = s as f64 / i16::MAX as f64;
            normalized * normalized
        })
        .sum();

    let rms = (sum_squares / samples.len() as f64).sqrt();
    if rms <= 0.0 {
        return f32::NEG_INFINITY;
    }
    (20.0 * rms.log10()) as f32
}

/// Map dBFS onto the meter: `<= -40 dB` → 0, `>= 0 dB` → 1, linear between
pub fn level_scale(db: f32) -> f32 {
    if db <= FLOOR_DB {
        0.0
    } else if db >= 0.0 {
        1.0
    } else {
        (db - FLOOR_DB) * 2.5 / 100.0
    }
}

/// Smoothed level meter
#[derive(Debug, Clone, Default)]
pub struct LevelMeter {
    prev: Option<f32>,
}

impl LevelMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one frame and return the smoothed level
    pub fn push(&mut self, samples: &[i16]) -> f32 {
        let raw = level_scale(rms_dbfs(samples));
        let level = match self.prev {
            // First frame: use raw value as initial state
            None => raw,
            Some(prev) => EMA_ALPHA * raw + (1.0 - EMA_ALPHA) * prev,
        };
        self.prev = Some(level);
        level
    }

    pub fn reset(&mut self) {
        self.prev = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_is_negative_infinity() {
        assert_eq!(rms_dbfs(&[0; 100]), f32::NEG_INFINITY);
        assert_eq!(rms_dbfs(&[]), f32::NEG_INFINITY);
    }

    #[test]
    fn test_full_scale_is_zero_db() {
        let db = rms_dbfs(&[i16::MAX; 100]);
        assert!(db.abs() < 0.01, "got {}", db);
    }

    #[test]
    fn test_level_scale_bounds() {
        assert_eq!(level_scale(f32::NEG_INFINITY), 0.0);
        assert_eq!(level_scale(-40.0), 0.0);
        assert_eq!(level_scale(-60.0), 0.0);
        assert_eq!(level_scale(0.0), 1.0);
        assert_eq!(level_scale(3.0), 1.0);
        assert!((level_scale(-20.0) - 0.5).abs() < 1e-6);
        assert!((level_scale(-10.0) - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_half_scale_sine_ish_level() {
        // Constant half-scale signal: about -6 dBFS
        let db = rms_dbfs(&[i16::MAX / 2; 480]);
        assert!((db + 6.02).abs() < 0.1, "got {}", db);
    }

    #[test]
    fn test_meter_smoothing() {
        let mut meter = LevelMeter::new();
        assert_eq!(meter.push(&[i16::MAX; 10]), 1.0);

        // Silence pulls the level down gradually, not instantly
        let next = meter.push(&[0; 10]);
        assert!((next - 0.7).abs() < 1e-6);

        meter.reset();
        assert_eq!(meter.push(&[0; 10]), 0.0);
    }
}
