//! Raw PCM capture of everything the room hears.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::info;

use airwave_core::{AudioFrame, Error, Result};

use crate::plugin::{PluginContext, SpacePlugin};

/// Writes every inbound frame to one file as interleaved PCM16LE, in
/// arrival order. Speakers are mixed only by interleaving in time; no
/// resampling or channel mapping is applied.
pub struct RecordToDiskPlugin {
    path: PathBuf,
    writer: Mutex<Option<BufWriter<File>>>,
}

impl RecordToDiskPlugin {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: Mutex::new(None),
        }
    }
}

#[async_trait]
impl SpacePlugin for RecordToDiskPlugin {
    fn name(&self) -> &str {
        "record-to-disk"
    }

    async fn init(&self, _context: &PluginContext) -> Result<()> {
        let file = File::create(&self.path)?;
        *self.writer.lock() = Some(BufWriter::new(file));
        info!(path = %self.path.display(), "recording to disk");
        Ok(())
    }

    async fn on_audio_data(&self, frame: &AudioFrame) -> Result<()> {
        let mut guard = self.writer.lock();
        let Some(writer) = guard.as_mut() else {
            return Err(Error::Capability("recorder not initialized".to_string()));
        };
        let mut bytes = Vec::with_capacity(frame.samples.len() * 2);
        for sample in &frame.samples {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        writer.write_all(&bytes)?;
        Ok(())
    }

    async fn cleanup(&self) -> Result<()> {
        if let Some(mut writer) = self.writer.lock().take() {
            writer.flush()?;
            info!(path = %self.path.display(), "recording flushed");
        }
        Ok(())
    }
}
