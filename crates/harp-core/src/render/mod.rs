//! Real-time rendering of playback regions
//!
//! - [`PlaybackRenderer`]: serves processed (or original) audio for every
//!   region under the playhead while the host is playing
//! - [`EditorRenderer`]: loops a short window around a clicked position
//!   while the host is stopped
//!
//! Both are called on the audio thread. They take the document through
//! [`Document::processing_lock`](crate::document::Document::processing_lock),
//! never allocate after `prepare_to_play`/`configure`, and never log.

mod editor;
mod playback;

pub use editor::EditorRenderer;
pub use playback::PlaybackRenderer;

/// Transport state for one block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PositionInfo {
    /// Playhead position of the first frame, DAW clock
    pub time_in_samples: i64,
    pub is_playing: bool,
}

impl PositionInfo {
    pub fn playing(time_in_samples: i64) -> Self {
        Self {
            time_in_samples,
            is_playing: true,
        }
    }

    pub fn stopped() -> Self {
        Self::default()
    }
}
