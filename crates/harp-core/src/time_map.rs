//! Mapping between the DAW playback clock and the source clock
//!
//! A playback region places part of an audio modification on the DAW
//! timeline. Region boundaries are stored in seconds; every render call
//! recomputes sample positions from those absolute boundaries so there is no
//! accumulated rounding error across blocks.
//!
//! ```text
//!  DAW clock (daw_sample_rate)      |----block----|
//!  playback range              |==========region==========|
//!  modification range (moved)  |=======|   (shorter modification clips)
//!  render range                     |--|
//! ```

use crate::types::{AudioBuffer, SampleRange};

/// Where a playback region sits, in seconds
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RegionTiming {
    /// Region start on the DAW timeline
    pub start_in_playback: f64,
    /// Region length on the DAW timeline
    pub duration_in_playback: f64,
    /// Offset into the audio modification where the region starts reading
    pub start_in_modification: f64,
    /// Length of the audio modification material the region covers
    pub duration_in_modification: f64,
}

impl RegionTiming {
    /// A region that plays `duration` seconds of the modification from its start
    pub fn new(start_in_playback: f64, duration: f64) -> Self {
        Self {
            start_in_playback,
            duration_in_playback: duration,
            start_in_modification: 0.0,
            duration_in_modification: duration,
        }
    }

    pub fn end_in_playback(&self) -> f64 {
        self.start_in_playback + self.duration_in_playback
    }
}

/// Result of mapping one DAW block onto one region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderSlice {
    /// Part of the block this region contributes to, DAW clock
    pub render_range: SampleRange,
    /// First source-clock sample to read
    pub start_in_source: i64,
    /// Offset of `render_range.start` within the block
    pub start_in_buffer: usize,
    /// Number of DAW-clock samples to produce
    pub num_samples: usize,
}

/// Round to the nearest sample position (halves away from zero)
#[inline]
pub fn round_sample_position(value: f64) -> i64 {
    value.round() as i64
}

/// Converts region boundaries between the DAW clock and the source clock
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeMapper {
    daw_sample_rate: f64,
    source_sample_rate: f64,
}

impl TimeMapper {
    pub fn new(daw_sample_rate: f64, source_sample_rate: f64) -> Self {
        Self {
            daw_sample_rate,
            source_sample_rate,
        }
    }

    pub fn daw_sample_rate(&self) -> f64 {
        self.daw_sample_rate
    }

    pub fn source_sample_rate(&self) -> f64 {
        self.source_sample_rate
    }

    /// Source samples per DAW sample
    #[inline]
    pub fn resampling_ratio(&self) -> f64 {
        if self.daw_sample_rate <= 0.0 {
            return 1.0;
        }
        self.source_sample_rate / self.daw_sample_rate
    }

    /// Region extent on the DAW timeline, DAW clock
    pub fn playback_sample_range(&self, region: &RegionTiming) -> SampleRange {
        SampleRange::new(
            round_sample_position(region.start_in_playback * self.daw_sample_rate),
            round_sample_position(region.end_in_playback() * self.daw_sample_rate),
        )
    }

    /// Region extent within the modification, source clock
    pub fn modification_sample_range(&self, region: &RegionTiming) -> SampleRange {
        SampleRange::new(
            round_sample_position(region.start_in_modification * self.source_sample_rate),
            round_sample_position(
                (region.start_in_modification + region.duration_in_modification) * self.source_sample_rate,
            ),
        )
    }

    /// Modification range converted to the DAW clock and placed at the region start
    ///
    /// Rendering is clipped to this so a region never reads past the end of
    /// the material it references.
    pub fn modification_range_in_playback(&self, region: &RegionTiming) -> SampleRange {
        let playback = self.playback_sample_range(region);
        let length_in_source = self.modification_sample_range(region).length();
        let length_in_daw = round_sample_position(length_in_source as f64 / self.resampling_ratio());
        SampleRange::with_start_and_length(playback.start, length_in_daw)
    }

    /// `modificationStart - round(playbackStart * ratio)`, source clock
    pub fn modification_sample_offset(&self, region: &RegionTiming) -> i64 {
        let playback_start = self.playback_sample_range(region).start;
        let modification_start = self.modification_sample_range(region).start;
        modification_start - round_sample_position(playback_start as f64 * self.resampling_ratio())
    }

    /// Source-clock position corresponding to a DAW-clock position inside the region
    #[inline]
    pub fn source_position(&self, region: &RegionTiming, daw_position: i64) -> i64 {
        round_sample_position(daw_position as f64 * self.resampling_ratio())
            + self.modification_sample_offset(region)
    }

    /// Map a DAW block onto a region
    ///
    /// Returns `None` when the block does not touch the region; the region
    /// then contributes silence.
    pub fn map_block(&self, region: &RegionTiming, block: SampleRange) -> Option<RenderSlice> {
        let playback = self.playback_sample_range(region);
        let mut render_range = block.intersection(&playback);
        if render_range.is_empty() {
            return None;
        }

        render_range = render_range.intersection(&self.modification_range_in_playback(region));
        if render_range.is_empty() {
            return None;
        }

        Some(RenderSlice {
            render_range,
            start_in_source: self.source_position(region, render_range.start),
            start_in_buffer: (render_range.start - block.start) as usize,
            num_samples: render_range.length() as usize,
        })
    }
}

/// Reads a source-clock buffer into a DAW-clock block
///
/// Linear interpolation at the resampling ratio; a ratio of exactly 1 is a
/// plain copy. Reads outside the source are silent. Never allocates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResamplingReader {
    ratio: f64,
}

impl ResamplingReader {
    pub fn new(ratio: f64) -> Self {
        Self { ratio }
    }

    pub fn for_mapper(mapper: &TimeMapper) -> Self {
        Self::new(mapper.resampling_ratio())
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// Fill `dest[dest_start..dest_start + num_samples]` from `source` starting at `start_in_source`
    ///
    /// Channel mapping: matching channel counts copy per channel, a mono
    /// source is spread to every output channel, otherwise the common
    /// channels are copied and the remaining output channels are cleared.
    pub fn read_into(
        &self,
        source: &AudioBuffer,
        start_in_source: i64,
        dest: &mut AudioBuffer,
        dest_start: usize,
        num_samples: usize,
    ) {
        let num_out = dest.num_channels();
        let num_in = source.num_channels();
        if num_in == 0 {
            dest.clear_range(dest_start, num_samples);
            return;
        }

        for out_channel in 0..num_out {
            let in_channel = if num_in == num_out {
                out_channel
            } else if num_in == 1 {
                0
            } else if out_channel < num_in {
                out_channel
            } else {
                let out = dest.channel_mut(out_channel);
                out[dest_start..dest_start + num_samples].fill(0.0);
                continue;
            };

            let input = source.channel(in_channel);
            let out = &mut dest.channel_mut(out_channel)[dest_start..dest_start + num_samples];
            self.read_channel(input, start_in_source, out);
        }
    }

    fn read_channel(&self, input: &[f32], start_in_source: i64, out: &mut [f32]) {
        let len = input.len() as i64;
        let sample_at = |index: i64| -> f32 {
            if index >= 0 && index < len {
                input[index as usize]
            } else {
                0.0
            }
        };

        if self.ratio == 1.0 {
            for (i, sample) in out.iter_mut().enumerate() {
                *sample = sample_at(start_in_source + i as i64);
            }
            return;
        }

        for (i, sample) in out.iter_mut().enumerate() {
            let position = start_in_source as f64 + i as f64 * self.ratio;
            let index = position.floor();
            let frac = (position - index) as f32;
            let index = index as i64;
            let a = sample_at(index);
            let b = sample_at(index + 1);
            *sample = a + (b - a) * frac;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(start: f64, duration: f64, mod_start: f64, mod_duration: f64) -> RegionTiming {
        RegionTiming {
            start_in_playback: start,
            duration_in_playback: duration,
            start_in_modification: mod_start,
            duration_in_modification: mod_duration,
        }
    }

    #[test]
    fn test_block_outside_region_is_silent() {
        let mapper = TimeMapper::new(48000.0, 48000.0);
        let r = region(1.0, 1.0, 0.0, 1.0);
        assert!(mapper.map_block(&r, SampleRange::with_start_and_length(0, 512)).is_none());
        assert!(mapper
            .map_block(&r, SampleRange::with_start_and_length(96000, 512))
            .is_none());
    }

    #[test]
    fn test_block_inside_region_same_rate() {
        let mapper = TimeMapper::new(48000.0, 48000.0);
        let r = region(1.0, 2.0, 0.5, 2.0);
        let slice = mapper
            .map_block(&r, SampleRange::with_start_and_length(48000 + 100, 256))
            .unwrap();
        assert_eq!(slice.render_range, SampleRange::new(48100, 48356));
        assert_eq!(slice.start_in_buffer, 0);
        assert_eq!(slice.num_samples, 256);
        // 0.5s into the modification plus 100 samples into the region
        assert_eq!(slice.start_in_source, 24000 + 100);
    }

    #[test]
    fn test_block_straddling_region_start() {
        let mapper = TimeMapper::new(48000.0, 48000.0);
        let r = region(1.0, 1.0, 0.0, 1.0);
        let slice = mapper
            .map_block(&r, SampleRange::with_start_and_length(48000 - 100, 512))
            .unwrap();
        assert_eq!(slice.start_in_buffer, 100);
        assert_eq!(slice.num_samples, 412);
        assert_eq!(slice.start_in_source, 0);
    }

    #[test]
    fn test_short_modification_clips_render_range() {
        let mapper = TimeMapper::new(48000.0, 48000.0);
        // Region is 2s on the timeline but only 1s of material
        let r = region(0.0, 2.0, 0.0, 1.0);
        let slice = mapper
            .map_block(&r, SampleRange::with_start_and_length(48000 - 10, 100))
            .unwrap();
        assert_eq!(slice.render_range, SampleRange::new(47990, 48000));
        assert!(mapper
            .map_block(&r, SampleRange::with_start_and_length(48000, 100))
            .is_none());
    }

    #[test]
    fn test_offset_single_formula_with_resampling() {
        let mapper = TimeMapper::new(48000.0, 44100.0);
        let r = region(2.0, 1.0, 0.25, 1.0);
        // playback start 96000 DAW samples, ratio 0.91875 -> 88200 source
        assert_eq!(mapper.modification_sample_offset(&r), 11025 - 88200);
        // At the region start the source position is the modification start
        assert_eq!(mapper.source_position(&r, 96000), 11025);
        // One second in DAW time is one second in source time
        assert_eq!(mapper.source_position(&r, 96000 + 48000), 11025 + 44100);
    }

    #[test]
    fn test_render_range_is_subset_of_all_constraints() {
        let rates = [(48000.0, 48000.0), (48000.0, 44100.0), (44100.0, 96000.0)];
        for &(daw, src) in &rates {
            let mapper = TimeMapper::new(daw, src);
            for start_step in 0..8 {
                for dur_step in 1..6 {
                    for mod_dur_step in 1..6 {
                        let r = region(
                            start_step as f64 * 0.125,
                            dur_step as f64 * 0.1,
                            0.05,
                            mod_dur_step as f64 * 0.1,
                        );
                        let playback = mapper.playback_sample_range(&r);
                        let moved = mapper.modification_range_in_playback(&r);
                        for block_start in (-4096i64..(daw as i64 * 2)).step_by(3001) {
                            let block = SampleRange::with_start_and_length(block_start, 1024);
                            let overlap = block.intersection(&playback).intersection(&moved);
                            match mapper.map_block(&r, block) {
                                None => assert!(overlap.is_empty()),
                                Some(slice) => {
                                    assert!(block.contains_range(&slice.render_range));
                                    assert!(playback.contains_range(&slice.render_range));
                                    assert!(moved.contains_range(&slice.render_range));
                                    assert_eq!(slice.num_samples as i64, slice.render_range.length());
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_resampling_reader_copy_and_mono_spread() {
        let source = AudioBuffer::from_channels(vec![vec![1.0, 2.0, 3.0, 4.0]]);
        let mut dest = AudioBuffer::new(2, 4);
        ResamplingReader::new(1.0).read_into(&source, 1, &mut dest, 1, 3);
        assert_eq!(dest.channel(0), &[0.0, 2.0, 3.0, 4.0]);
        assert_eq!(dest.channel(1), &[0.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_resampling_reader_interpolates() {
        let source = AudioBuffer::from_channels(vec![vec![0.0, 1.0, 2.0, 3.0]]);
        let mut dest = AudioBuffer::new(1, 4);
        ResamplingReader::new(0.5).read_into(&source, 0, &mut dest, 0, 4);
        assert_eq!(dest.channel(0), &[0.0, 0.5, 1.0, 1.5]);
    }

    #[test]
    fn test_resampling_reader_out_of_bounds_is_silent() {
        let source = AudioBuffer::from_channels(vec![vec![1.0, 1.0]]);
        let mut dest = AudioBuffer::new(1, 4);
        ResamplingReader::new(1.0).read_into(&source, -1, &mut dest, 0, 4);
        assert_eq!(dest.channel(0), &[0.0, 1.0, 1.0, 0.0]);
    }
}
