use super::clip::AudioClip;
use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::{info, warn};

/// Audio output device
///
/// `play` resolves when the clip has finished playing. Dropping the future
/// stops playback, which is how the speech output controller cancels it.
#[async_trait::async_trait]
pub trait AudioPlayer: Send + Sync {
    async fn play(&self, clip: &AudioClip) -> Result<()>;

    /// Device name for logging
    fn name(&self) -> &str;
}

/// Player that writes each clip to disk for an external player to pick up.
///
/// With pacing enabled the playback lasts as long as the clip, so the
/// session's speaking state matches what the listener hears.
pub struct FilePlayer {
    output_dir: PathBuf,
    pace: bool,
}

impl FilePlayer {
    pub fn new(output_dir: impl Into<PathBuf>, pace: bool) -> Result<Self> {
        let output_dir = output_dir.into();
        std::fs::create_dir_all(&output_dir)
            .with_context(|| format!("Failed to create audio directory {}", output_dir.display()))?;

        info!("File player writing clips to {}", output_dir.display());

        Ok(Self { output_dir, pace })
    }

    pub fn clip_path(&self, clip: &AudioClip) -> PathBuf {
        self.output_dir.join(format!("{}.{}", clip.id, clip.format))
    }
}

#[async_trait::async_trait]
impl AudioPlayer for FilePlayer {
    async fn play(&self, clip: &AudioClip) -> Result<()> {
        let path = self.clip_path(clip);
        tokio::fs::write(&path, &clip.bytes)
            .await
            .with_context(|| format!("Failed to write clip to {}", path.display()))?;

        info!("Playing clip {} ({} bytes)", path.display(), clip.len());

        if self.pace {
            match clip.probe() {
                Ok(info) => tokio::time::sleep(info.duration()).await,
                Err(e) => warn!("Could not measure clip {}: {}", clip.id, e),
            }
        }

        Ok(())
    }

    fn name(&self) -> &str {
        "file"
    }
}
