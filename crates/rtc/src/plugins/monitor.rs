//! Per-speaker audio level logging.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use airwave_core::{AudioFrame, Result};

use crate::plugin::SpacePlugin;

#[derive(Default)]
struct LevelAccumulator {
    sum_squares: f64,
    samples: u64,
}

impl LevelAccumulator {
    fn push(&mut self, frame: &AudioFrame) {
        for &s in &frame.samples {
            let v = s as f64 / i16::MAX as f64;
            self.sum_squares += v * v;
        }
        self.samples += frame.samples.len() as u64;
    }

    fn rms_db(&self) -> f32 {
        if self.samples == 0 {
            return -120.0;
        }
        let rms = (self.sum_squares / self.samples as f64).sqrt();
        if rms <= 0.0 {
            -120.0
        } else {
            20.0 * (rms as f32).log10()
        }
    }
}

/// Accumulates RMS level per speaker and logs a summary line every
/// `report_every` frames. Frames without attribution are bucketed
/// under "local".
pub struct AudioLevelPlugin {
    report_every: u64,
    frames_seen: Mutex<u64>,
    levels: Mutex<HashMap<String, LevelAccumulator>>,
}

impl AudioLevelPlugin {
    pub fn new(report_every: u64) -> Self {
        Self {
            report_every: report_every.max(1),
            frames_seen: Mutex::new(0),
            levels: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl SpacePlugin for AudioLevelPlugin {
    fn name(&self) -> &str {
        "audio-level"
    }

    async fn on_audio_data(&self, frame: &AudioFrame) -> Result<()> {
        let speaker = frame.user_id.clone().unwrap_or_else(|| "local".to_string());
        self.levels.lock().entry(speaker).or_default().push(frame);

        let mut seen = self.frames_seen.lock();
        *seen += 1;
        if *seen % self.report_every == 0 {
            let mut levels = self.levels.lock();
            for (speaker, acc) in levels.iter() {
                debug!(speaker = %speaker, level_db = acc.rms_db(), "audio level");
            }
            levels.clear();
        }
        Ok(())
    }
}
