use anyhow::{Context, Result};
use std::io::Cursor;
use std::time::Duration;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

/// A synthesized speech clip as returned by the TTS service
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub id: String,

    /// Container/codec hint, e.g. "mp3" or "wav"
    pub format: String,

    pub bytes: Vec<u8>,
}

/// Stream properties read from a clip's headers and packets
#[derive(Debug, Clone, PartialEq)]
pub struct ClipInfo {
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
}

impl ClipInfo {
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.duration_seconds.max(0.0))
    }
}

impl AudioClip {
    pub fn new(bytes: Vec<u8>, format: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            format: format.into(),
            bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Probe the clip with symphonia. MP3 streams without a frame count in
    /// their headers are measured by walking the packets.
    pub fn probe(&self) -> Result<ClipInfo> {
        let source = MediaSourceStream::new(
            Box::new(Cursor::new(self.bytes.clone())),
            Default::default(),
        );

        let mut hint = Hint::new();
        hint.with_extension(&self.format);

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                source,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .context("Unrecognized audio format")?;

        let mut format = probed.format;
        let track = format
            .default_track()
            .context("Audio clip has no playable track")?;

        let track_id = track.id;
        let params = track.codec_params.clone();
        let sample_rate = params
            .sample_rate
            .context("Audio clip does not declare a sample rate")?;
        let channels = params.channels.map(|c| c.count() as u16).unwrap_or(1);

        let duration_seconds = match (params.n_frames, params.time_base) {
            (Some(frames), Some(time_base)) => {
                let time = time_base.calc_time(frames);
                time.seconds as f64 + time.frac
            }
            (Some(frames), None) => frames as f64 / sample_rate as f64,
            _ => {
                let mut frames: u64 = 0;
                while let Ok(packet) = format.next_packet() {
                    if packet.track_id() == track_id {
                        frames += packet.dur;
                    }
                }
                frames as f64 / sample_rate as f64
            }
        };

        debug!(
            "Probed clip {}: {:.2}s, {}Hz, {} channels",
            self.id, duration_seconds, sample_rate, channels
        );

        Ok(ClipInfo {
            duration_seconds,
            sample_rate,
            channels,
        })
    }
}
