use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Level reported for a silent or near-silent block
pub const DB_FLOOR: f32 = -60.0;

const FULL_SCALE: f32 = 32768.0;

/// One loudness reading published while a session is active
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioLevelSample {
    /// RMS amplitude normalised to full scale, 0.0 to 1.0
    pub level: f32,
    /// Decaying peak hold, 0.0 to 1.0
    pub peak: f32,
    pub db: f32,
    pub timestamp: DateTime<Utc>,
}

/// Turns blocks of 16-bit PCM into normalised level, peak hold and dB
#[derive(Debug, Clone)]
pub struct LevelMeter {
    peak: f32,
    decay: f32,
}

impl LevelMeter {
    pub fn new(decay: f32) -> Self {
        Self {
            peak: 0.0,
            decay: decay.clamp(0.0, 1.0),
        }
    }

    /// Feed one block and return the updated reading
    pub fn process(&mut self, samples: &[i16]) -> AudioLevelSample {
        let level = rms_level(samples);

        if level >= self.peak {
            self.peak = level;
        } else {
            self.peak = (self.peak * self.decay).max(level);
        }

        AudioLevelSample {
            level,
            peak: self.peak,
            db: to_db(level),
            timestamp: Utc::now(),
        }
    }
}

/// RMS of the block divided by full scale, clamped to [0, 1]
pub fn rms_level(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    let rms = (sum_sq / samples.len() as f64).sqrt() as f32;
    (rms / FULL_SCALE).clamp(0.0, 1.0)
}

/// Normalised level in dBFS, floored at [`DB_FLOOR`]
pub fn to_db(level: f32) -> f32 {
    if level <= 0.001 {
        return DB_FLOOR;
    }
    (20.0 * level.log10()).max(DB_FLOOR)
}

/// Decode little-endian signed 16-bit PCM
pub fn decode_s16le(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect()
}
