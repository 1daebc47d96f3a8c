use std::collections::HashMap;

use crate::document::{Document, RegionId, SourceId};
use crate::time_map::{ResamplingReader, TimeMapper};
use crate::types::{AudioBuffer, SampleRange};

use super::PositionInfo;

/// Mixes the regions assigned to this renderer into the host buffer
pub struct PlaybackRenderer {
    regions: Vec<RegionId>,
    sample_rate: f64,
    max_block_size: usize,
    num_channels: usize,
    /// Render target for every region after the first
    scratch: AudioBuffer,
    readers: HashMap<SourceId, ResamplingReader>,
}

impl Default for PlaybackRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackRenderer {
    pub fn new() -> Self {
        Self {
            regions: Vec::new(),
            sample_rate: crate::types::DEFAULT_SAMPLE_RATE,
            max_block_size: 0,
            num_channels: 0,
            scratch: AudioBuffer::default(),
            readers: HashMap::new(),
        }
    }

    /// Assign a region (not real-time safe)
    pub fn add_region(&mut self, region: RegionId) {
        if !self.regions.contains(&region) {
            self.regions.push(region);
        }
    }

    pub fn remove_region(&mut self, region: RegionId) {
        self.regions.retain(|r| *r != region);
    }

    pub fn regions(&self) -> &[RegionId] {
        &self.regions
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Allocate the scratch buffer and one reader per source of the
    /// assigned regions
    pub fn prepare_to_play(
        &mut self,
        sample_rate: f64,
        max_block_size: usize,
        num_channels: usize,
        document: &Document,
    ) {
        self.sample_rate = sample_rate;
        self.max_block_size = max_block_size;
        self.num_channels = num_channels;
        self.scratch = AudioBuffer::with_capacity(num_channels, max_block_size);

        self.readers.clear();
        let graph = document.read();
        for region in &self.regions {
            if let Some((_, _, source)) = graph.resolve_region(*region) {
                let mapper = TimeMapper::new(sample_rate, source.sample_rate());
                self.readers
                    .entry(source.id())
                    .or_insert_with(|| ResamplingReader::for_mapper(&mapper));
            }
        }
        log::debug!(
            "PlaybackRenderer::prepare_to_play: {} Hz, {} frames, {} channels, {} sources",
            sample_rate,
            max_block_size,
            num_channels,
            self.readers.len()
        );
    }

    pub fn release_resources(&mut self) {
        self.readers.clear();
        self.scratch = AudioBuffer::default();
    }

    /// Render one block
    ///
    /// Returns false and leaves `output` untouched when the document is
    /// being edited. While stopped the block is silent.
    pub fn process_block(&mut self, document: &Document, output: &mut AudioBuffer, position: PositionInfo) -> bool {
        let Some(graph) = document.processing_lock() else {
            return false;
        };

        if !position.is_playing {
            output.clear();
            return true;
        }

        let num_frames = output.num_frames();
        let num_channels = output.num_channels().min(self.scratch.num_channels());
        let block = SampleRange::with_start_and_length(position.time_in_samples, num_frames as i64);
        let mut did_render_any_region = false;

        for region_id in &self.regions {
            let Some((region, modification, source)) = graph.resolve_region(*region_id) else {
                continue;
            };
            let mapper = TimeMapper::new(self.sample_rate, source.sample_rate());
            let Some(slice) = mapper.map_block(&region.timing, block) else {
                continue;
            };
            let reader = self
                .readers
                .get(&source.id())
                .copied()
                .unwrap_or_else(|| ResamplingReader::for_mapper(&mapper));

            let processed = modification.processed();
            let audio = match &*processed {
                Some(buffer) if modification.is_modified() => buffer,
                _ => source.buffer(),
            };

            if !did_render_any_region {
                reader.read_into(audio, slice.start_in_source, output, slice.start_in_buffer, slice.num_samples);
                output.clear_range(0, slice.start_in_buffer);
                let end_in_buffer = slice.start_in_buffer + slice.num_samples;
                output.clear_range(end_in_buffer, num_frames - end_in_buffer);
                did_render_any_region = true;
                continue;
            }

            let chunk_capacity = self.scratch.capacity();
            if chunk_capacity == 0 {
                continue;
            }
            let mut done = 0;
            while done < slice.num_samples {
                let chunk = (slice.num_samples - done).min(chunk_capacity);
                self.scratch.set_len_from_capacity(chunk);
                let start_in_source =
                    mapper.source_position(&region.timing, slice.render_range.start + done as i64);
                reader.read_into(audio, start_in_source, &mut self.scratch, 0, chunk);
                for channel in 0..num_channels {
                    output.add_from(channel, slice.start_in_buffer + done, &self.scratch, channel, 0, chunk);
                }
                done += chunk;
            }
        }

        if !did_render_any_region {
            output.clear();
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::tests::single_region_document;
    use crate::gc::AudioGc;
    use crate::time_map::RegionTiming;

    fn ramp(len: usize) -> AudioBuffer {
        AudioBuffer::from_channels(vec![(0..len).map(|i| i as f32 / len as f32).collect()])
    }

    fn prepared(document: &Document, regions: &[RegionId], channels: usize) -> PlaybackRenderer {
        let mut renderer = PlaybackRenderer::new();
        for region in regions {
            renderer.add_region(*region);
        }
        renderer.prepare_to_play(48000.0, 64, channels, document);
        renderer
    }

    #[test]
    fn test_stopped_block_is_silent() {
        let gc = AudioGc::start().unwrap();
        let (document, _, _, region) = single_region_document(&gc, 48000.0, ramp(480));
        let mut renderer = prepared(&document, &[region], 1);

        let mut output = AudioBuffer::from_channels(vec![vec![1.0; 64]]);
        assert!(renderer.process_block(&document, &mut output, PositionInfo::stopped()));
        assert_eq!(output.peak(), 0.0);
    }

    #[test]
    fn test_busy_document_leaves_buffer_untouched() {
        let gc = AudioGc::start().unwrap();
        let (document, _, _, region) = single_region_document(&gc, 48000.0, ramp(480));
        let mut renderer = prepared(&document, &[region], 1);

        let mut output = AudioBuffer::from_channels(vec![vec![0.7; 64]]);
        let edit = document.edit();
        assert!(!renderer.process_block(&document, &mut output, PositionInfo::playing(0)));
        drop(edit);
        assert!(output.channel(0).iter().all(|s| *s == 0.7));
    }

    #[test]
    fn test_original_audio_and_silence_after_region() {
        let gc = AudioGc::start().unwrap();
        let source = ramp(100);
        let (document, _, _, region) = single_region_document(&gc, 48000.0, source.clone());
        let mut renderer = prepared(&document, &[region], 2);

        let mut output = AudioBuffer::new(2, 64);
        assert!(renderer.process_block(&document, &mut output, PositionInfo::playing(64)));
        // region covers [0, 100): frames 64..100 then silence
        for channel in 0..2 {
            assert_eq!(&output.channel(channel)[..36], &source.channel(0)[64..100]);
            assert!(output.channel(channel)[36..].iter().all(|s| *s == 0.0));
        }
    }

    #[test]
    fn test_processed_audio_replaces_original() {
        let gc = AudioGc::start().unwrap();
        let (document, _, modification, region) = single_region_document(&gc, 48000.0, ramp(128));
        let mut renderer = prepared(&document, &[region], 1);

        document
            .read()
            .modification(modification)
            .unwrap()
            .publish(AudioBuffer::from_channels(vec![vec![0.25; 128]]));

        let mut output = AudioBuffer::new(1, 64);
        renderer.process_block(&document, &mut output, PositionInfo::playing(0));
        assert!(output.channel(0).iter().all(|s| *s == 0.25));
    }

    #[test]
    fn test_overlapping_regions_are_mixed() {
        let gc = AudioGc::start().unwrap();
        let (document, _, modification, first) =
            single_region_document(&gc, 48000.0, AudioBuffer::from_channels(vec![vec![0.25; 200]]));
        // Second region starts 16 frames into the block
        let second = document
            .edit()
            .add_region(modification, RegionTiming::new(16.0 / 48000.0, 200.0 / 48000.0))
            .unwrap();
        let mut renderer = prepared(&document, &[first, second], 1);

        let mut output = AudioBuffer::new(1, 64);
        renderer.process_block(&document, &mut output, PositionInfo::playing(0));
        assert!(output.channel(0)[..16].iter().all(|s| *s == 0.25));
        assert!(output.channel(0)[16..].iter().all(|s| *s == 0.5));
    }

    #[test]
    fn test_block_outside_every_region_is_cleared() {
        let gc = AudioGc::start().unwrap();
        let (document, _, _, region) = single_region_document(&gc, 48000.0, ramp(100));
        let mut renderer = prepared(&document, &[region], 1);

        let mut output = AudioBuffer::from_channels(vec![vec![1.0; 64]]);
        renderer.process_block(&document, &mut output, PositionInfo::playing(1000));
        assert_eq!(output.peak(), 0.0);
    }

    #[test]
    fn test_source_at_different_rate() {
        let gc = AudioGc::start().unwrap();
        // 24 kHz source: every source frame spans two DAW frames
        let (document, _, _, region) =
            single_region_document(&gc, 24000.0, AudioBuffer::from_channels(vec![vec![0.5; 50]]));
        let mut renderer = prepared(&document, &[region], 1);

        let mut output = AudioBuffer::new(1, 128);
        renderer.process_block(&document, &mut output, PositionInfo::playing(0));
        assert!(output.channel(0)[..99].iter().all(|s| (*s - 0.5).abs() < 1e-6));
        assert!(output.channel(0)[100..].iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_removed_region_is_skipped() {
        let gc = AudioGc::start().unwrap();
        let (document, _, _, region) = single_region_document(&gc, 48000.0, ramp(100));
        let mut renderer = prepared(&document, &[region], 1);
        document.edit().remove_region(region).unwrap();

        let mut output = AudioBuffer::from_channels(vec![vec![1.0; 64]]);
        assert!(renderer.process_block(&document, &mut output, PositionInfo::playing(0)));
        assert_eq!(output.peak(), 0.0);

        renderer.remove_region(region);
        assert!(renderer.regions().is_empty());
    }
}
