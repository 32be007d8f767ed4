//! PCM frame type exchanged between the media layer and plugins.

/// A unit of raw PCM audio.
///
/// Frames attributed to a specific remote speaker carry that speaker's
/// `user_id`; frames the local process is producing carry `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Bits per sample (always 16 for the wire format used here)
    pub bits_per_sample: u32,
    /// Samples per second
    pub sample_rate: u32,
    /// Interleaved channel count
    pub channel_count: u32,
    /// Interleaved PCM samples
    pub samples: Vec<i16>,
    /// Speaker attribution, absent on locally produced frames
    pub user_id: Option<String>,
}

impl AudioFrame {
    /// Create an unattributed (locally produced) frame.
    pub fn new(samples: Vec<i16>, sample_rate: u32, channel_count: u32) -> Self {
        Self {
            bits_per_sample: 16,
            sample_rate,
            channel_count,
            samples,
            user_id: None,
        }
    }

    /// Create a frame attributed to a remote speaker.
    pub fn attributed(
        samples: Vec<i16>,
        sample_rate: u32,
        channel_count: u32,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::new(samples, sample_rate, channel_count)
        }
    }

    /// Number of sample frames (samples per channel).
    pub fn frame_count(&self) -> usize {
        if self.channel_count == 0 {
            return 0;
        }
        self.samples.len() / self.channel_count as usize
    }

    /// Frame duration in milliseconds.
    pub fn duration_ms(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frame_count() as f64 * 1000.0 / self.sample_rate as f64
    }

    /// Root-mean-square amplitude, normalized to [0.0, 1.0].
    pub fn rms(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum_squares: f64 = self
            .samples
            .iter()
            .map(|&s| {
                let v = s as f64 / i16::MAX as f64;
                v * v
            })
            .sum();
        (sum_squares / self.samples.len() as f64).sqrt() as f32
    }

    /// RMS level in dBFS.
    pub fn rms_db(&self) -> f32 {
        let rms = self.rms();
        if rms <= 0.0 {
            -120.0
        } else {
            20.0 * rms.log10()
        }
    }

    /// True if the frame's level is at or below `threshold_db` (dBFS).
    pub fn is_silent(&self, threshold_db: f32) -> bool {
        self.rms_db() <= threshold_db
    }
}
