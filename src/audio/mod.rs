//! Audio clips and playback
//!
//! - `clip`: synthesized clip container and symphonia-based probing
//! - `player`: playback device trait and the file-writing player

pub mod clip;
pub mod player;

pub use clip::{AudioClip, ClipInfo};
pub use player::{AudioPlayer, FilePlayer};
