//! Common types for HARP
//!
//! This module contains the fundamental audio types shared by the renderers,
//! the model session and the file exchange code: a multichannel sample buffer
//! and an integer sample range.

use std::ops::Range;

/// Audio sample type (32-bit float for processing, exchanged as 16-bit WAV)
pub type Sample = f32;

/// Default DAW sample rate used when nothing else is known
pub const DEFAULT_SAMPLE_RATE: f64 = 48000.0;

/// Largest block the renderers pre-allocate for
pub const MAX_BLOCK_SIZE: usize = 8192;

/// A half-open range of sample positions `[start, end)`
///
/// All time arithmetic in the renderers is done on these, in `i64` sample
/// counts, never on accumulated fractional positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SampleRange {
    pub start: i64,
    pub end: i64,
}

impl SampleRange {
    /// Create a range from start and end (end is clamped to be >= start)
    #[inline]
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end: end.max(start) }
    }

    /// Create a range from a start position and a length
    #[inline]
    pub fn with_start_and_length(start: i64, length: i64) -> Self {
        Self::new(start, start + length.max(0))
    }

    #[inline]
    pub fn length(&self) -> i64 {
        self.end - self.start
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// Intersection of two ranges (empty range positioned at the larger start if disjoint)
    #[inline]
    pub fn intersection(&self, other: &SampleRange) -> SampleRange {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        SampleRange::new(start, end)
    }

    /// Same length, new start
    #[inline]
    pub fn moved_to_start_at(&self, start: i64) -> SampleRange {
        SampleRange::with_start_and_length(start, self.length())
    }

    /// True if `other` lies completely inside this range
    ///
    /// An empty `other` is contained in every range.
    #[inline]
    pub fn contains_range(&self, other: &SampleRange) -> bool {
        other.is_empty() || (other.start >= self.start && other.end <= self.end)
    }

    #[inline]
    pub fn contains(&self, position: i64) -> bool {
        position >= self.start && position < self.end
    }
}

impl From<Range<i64>> for SampleRange {
    fn from(range: Range<i64>) -> Self {
        SampleRange::new(range.start, range.end)
    }
}

/// A buffer of non-interleaved audio
///
/// Channel-major storage with one `Vec` per channel. All channels always have
/// the same number of frames. Buffers used on the audio thread are created
/// with [`AudioBuffer::with_capacity`] and resized with
/// [`AudioBuffer::set_len_from_capacity`], which never allocates.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AudioBuffer {
    channels: Vec<Vec<Sample>>,
}

impl AudioBuffer {
    /// Create a silent buffer
    pub fn new(num_channels: usize, num_frames: usize) -> Self {
        Self {
            channels: vec![vec![0.0; num_frames]; num_channels],
        }
    }

    /// Create an empty buffer with room for `capacity` frames per channel
    pub fn with_capacity(num_channels: usize, capacity: usize) -> Self {
        Self {
            channels: (0..num_channels).map(|_| Vec::with_capacity(capacity)).collect(),
        }
    }

    /// Create a buffer from separate channel vectors
    pub fn from_channels(channels: Vec<Vec<Sample>>) -> Self {
        if let Some(first) = channels.first() {
            let len = first.len();
            assert!(channels.iter().all(|c| c.len() == len), "Channel lengths must match");
        }
        Self { channels }
    }

    /// Create a buffer from interleaved samples `[c0, c1, .., c0, c1, ..]`
    pub fn from_interleaved(interleaved: &[Sample], num_channels: usize) -> Self {
        if num_channels == 0 {
            return Self::default();
        }
        let num_frames = interleaved.len() / num_channels;
        let mut buffer = Self::new(num_channels, num_frames);
        for (frame, chunk) in interleaved.chunks_exact(num_channels).enumerate() {
            for (channel, &sample) in chunk.iter().enumerate() {
                buffer.channels[channel][frame] = sample;
            }
        }
        buffer
    }

    /// Interleave all channels into a new vector
    pub fn to_interleaved(&self) -> Vec<Sample> {
        let num_channels = self.num_channels();
        let mut out = Vec::with_capacity(num_channels * self.num_frames());
        for frame in 0..self.num_frames() {
            for channel in &self.channels {
                out.push(channel[frame]);
            }
        }
        out
    }

    #[inline]
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    #[inline]
    pub fn num_frames(&self) -> usize {
        self.channels.first().map_or(0, |c| c.len())
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.num_frames() == 0
    }

    /// Frames that fit without reallocating
    #[inline]
    pub fn capacity(&self) -> usize {
        self.channels.iter().map(|c| c.capacity()).min().unwrap_or(0)
    }

    #[inline]
    pub fn channel(&self, channel: usize) -> &[Sample] {
        &self.channels[channel]
    }

    #[inline]
    pub fn channel_mut(&mut self, channel: usize) -> &mut [Sample] {
        &mut self.channels[channel]
    }

    /// Set the working length of a pre-allocated buffer (real-time safe)
    ///
    /// New frames are silent. Growing past capacity allocates, which is a bug
    /// on the audio thread and caught in debug builds.
    #[inline]
    pub fn set_len_from_capacity(&mut self, num_frames: usize) {
        for channel in &mut self.channels {
            debug_assert!(
                num_frames <= channel.capacity(),
                "set_len_from_capacity called with len > capacity"
            );
            channel.resize(num_frames, 0.0);
        }
    }

    /// Fill the whole buffer with silence
    pub fn clear(&mut self) {
        for channel in &mut self.channels {
            channel.fill(0.0);
        }
    }

    /// Silence `len` frames starting at `start` (clipped to the buffer)
    pub fn clear_range(&mut self, start: usize, len: usize) {
        let end = (start + len).min(self.num_frames());
        if start >= end {
            return;
        }
        for channel in &mut self.channels {
            channel[start..end].fill(0.0);
        }
    }

    /// Copy `len` frames of one channel of `src` into one channel of this buffer
    pub fn copy_from(
        &mut self,
        dest_channel: usize,
        dest_start: usize,
        src: &AudioBuffer,
        src_channel: usize,
        src_start: usize,
        len: usize,
    ) {
        let dest = &mut self.channels[dest_channel][dest_start..dest_start + len];
        dest.copy_from_slice(&src.channels[src_channel][src_start..src_start + len]);
    }

    /// Add `len` frames of one channel of `src` into one channel of this buffer
    pub fn add_from(
        &mut self,
        dest_channel: usize,
        dest_start: usize,
        src: &AudioBuffer,
        src_channel: usize,
        src_start: usize,
        len: usize,
    ) {
        let dest = &mut self.channels[dest_channel][dest_start..dest_start + len];
        let src = &src.channels[src_channel][src_start..src_start + len];
        for (d, s) in dest.iter_mut().zip(src) {
            *d += *s;
        }
    }

    /// Multiply `len` frames starting at `start` by `gain`
    pub fn apply_gain(&mut self, start: usize, len: usize, gain: Sample) {
        let end = (start + len).min(self.num_frames());
        for channel in &mut self.channels {
            for sample in &mut channel[start.min(end)..end] {
                *sample *= gain;
            }
        }
    }

    /// Apply a linear gain ramp from `start_gain` to `end_gain` over `len` frames
    pub fn apply_gain_ramp(&mut self, start: usize, len: usize, start_gain: Sample, end_gain: Sample) {
        if len == 0 {
            return;
        }
        let increment = (end_gain - start_gain) / len as Sample;
        let end = (start + len).min(self.num_frames());
        for channel in &mut self.channels {
            let mut gain = start_gain;
            for sample in &mut channel[start.min(end)..end] {
                *sample *= gain;
                gain += increment;
            }
        }
    }

    /// Get the peak amplitude across all channels
    pub fn peak(&self) -> Sample {
        self.channels
            .iter()
            .flat_map(|c| c.iter())
            .map(|s| s.abs())
            .fold(0.0, Sample::max)
    }
}

/// Decoded audio together with the clock it was sampled at
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SourceAudio {
    /// Display name (usually the file name)
    pub name: String,
    pub sample_rate: f64,
    pub buffer: AudioBuffer,
}

impl SourceAudio {
    pub fn new(name: impl Into<String>, sample_rate: f64, buffer: AudioBuffer) -> Self {
        Self {
            name: name.into(),
            sample_rate,
            buffer,
        }
    }

    /// Length in seconds
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate <= 0.0 {
            return 0.0;
        }
        self.buffer.num_frames() as f64 / self.sample_rate
    }
}
