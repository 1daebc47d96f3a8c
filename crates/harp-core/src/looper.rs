//! Crossfaded looping over a fixed buffer range
//!
//! Used by the editor preview: a short window of audio around the click
//! position is looped for as long as the user holds the preview. The loop
//! seam is hidden by fading the range head in over the tail:
//!
//! ```text
//!  start        start+W                      end-W        end
//!    |--fade-in---|---------plain copy---------|---tail----|
//!    ^ reads A here while B is read from the tail at the same offset
//! ```
//!
//! The read position wraps back to `start` when it reaches `end - W`, so
//! the tail is only ever heard through the crossfade.

use crate::types::{AudioBuffer, SampleRange};

/// Default crossfade length at the loop seam
pub const DEFAULT_CROSSFADE_SAMPLES: usize = 50;

/// Linear crossfade of two sources into `dest`
///
/// `dest[i] = a[i] * g + b[i] * (1 - g)` where `g` ramps from
/// `a_gain_start` towards `a_gain_end` over the slice length.
pub fn crossfade(a: &[f32], b: &[f32], a_gain_start: f32, a_gain_end: f32, dest: &mut [f32]) {
    let len = dest.len();
    if len == 0 {
        return;
    }
    let increment = (a_gain_end - a_gain_start) / len as f32;
    let mut gain = a_gain_start;
    for ((d, &sa), &sb) in dest.iter_mut().zip(a).zip(b) {
        *d = sa * gain + sb * (1.0 - gain);
        gain += increment;
    }
}

/// Loops a range of a source buffer with a crossfaded seam
#[derive(Debug, Clone, PartialEq)]
pub struct Looper {
    range: SampleRange,
    position: i64,
    crossfade_length: i64,
}

impl Default for Looper {
    fn default() -> Self {
        Self::new(SampleRange::default())
    }
}

impl Looper {
    pub fn new(range: SampleRange) -> Self {
        Self::with_crossfade(range, DEFAULT_CROSSFADE_SAMPLES)
    }

    /// Loop with a custom crossfade length (clamped to half the range)
    pub fn with_crossfade(range: SampleRange, desired_crossfade: usize) -> Self {
        let crossfade_length = (range.length() / 2).min(desired_crossfade as i64);
        Self {
            range,
            position: range.start,
            crossfade_length,
        }
    }

    pub fn range(&self) -> SampleRange {
        self.range
    }

    /// Next source position to read
    pub fn position(&self) -> i64 {
        self.position
    }

    pub fn crossfade_length(&self) -> usize {
        self.crossfade_length as usize
    }

    /// Restart from the range head
    pub fn reset(&mut self) {
        self.position = self.range.start;
    }

    /// Fade-in gain of the range head at `position`
    ///
    /// Maps `[start, start + W - 1]` linearly onto `[0, 1]`.
    fn fade_in_gain(&self, position: i64) -> f32 {
        let span = (self.crossfade_length - 1) as f32;
        if span <= 0.0 {
            return 1.0;
        }
        (position - self.range.start) as f32 / span
    }

    /// Fill `dest` completely by looping the range of `source`
    ///
    /// A zero-length range writes silence. Never allocates.
    pub fn write_into(&mut self, source: &AudioBuffer, dest: &mut AudioBuffer) {
        if self.range.length() == 0 {
            dest.clear();
            return;
        }

        let num_channels = source.num_channels().min(dest.num_channels());
        let num_frames = dest.num_frames();
        let fade = self.crossfade_length;
        let mut copied = 0usize;

        while copied < num_frames {
            let end_of_fade_in = self.range.start + fade;
            let (needs_crossfade, next_transition) = if self.position < end_of_fade_in {
                (true, end_of_fade_in)
            } else {
                (false, self.range.end - fade)
            };

            let to_copy = ((next_transition - self.position) as usize).min(num_frames - copied);
            let pos = self.position as usize;

            for channel in 0..num_channels {
                let input = source.channel(channel);
                let out = &mut dest.channel_mut(channel)[copied..copied + to_copy];
                if needs_crossfade {
                    let overlap_start = (self.range.end - fade + (self.position - self.range.start)) as usize;
                    crossfade(
                        &input[pos..pos + to_copy],
                        &input[overlap_start..overlap_start + to_copy],
                        self.fade_in_gain(self.position),
                        self.fade_in_gain(self.position + to_copy as i64),
                        out,
                    );
                } else {
                    out.copy_from_slice(&input[pos..pos + to_copy]);
                }
            }

            for channel in num_channels..dest.num_channels() {
                dest.channel_mut(channel)[copied..copied + to_copy].fill(0.0);
            }

            copied += to_copy;
            self.position += to_copy as i64;
            debug_assert!(self.position <= self.range.end - fade);
            if self.position == self.range.end - fade {
                self.position = self.range.start;
            }
        }
    }
}
