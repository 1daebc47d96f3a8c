use crate::config::RenderConfig;
use crate::document::{AudioSource, Document, RegionId};
use crate::looper::Looper;
use crate::time_map::{round_sample_position, RegionTiming, ResamplingReader, TimeMapper};
use crate::types::{AudioBuffer, SampleRange};

use super::PositionInfo;

/// What the preview buffer currently holds
#[derive(Debug, Clone, Copy, PartialEq)]
struct PreviewKey {
    region: RegionId,
    time: f64,
    dimmed: bool,
    version: u64,
}

/// Loops a short window of a region while the transport is stopped
pub struct EditorRenderer {
    config: RenderConfig,
    regions: Vec<RegionId>,
    sample_rate: f64,
    preview: AudioBuffer,
    /// Fade-out render target, added into the host buffer
    tail: AudioBuffer,
    looper: Looper,
    last: Option<PreviewKey>,
    was_previewing: bool,
}

impl EditorRenderer {
    pub fn new(config: RenderConfig) -> Self {
        Self {
            config,
            regions: Vec::new(),
            sample_rate: crate::types::DEFAULT_SAMPLE_RATE,
            preview: AudioBuffer::default(),
            tail: AudioBuffer::default(),
            looper: Looper::default(),
            last: None,
            was_previewing: false,
        }
    }

    /// Allow previews of `region` (not real-time safe)
    pub fn add_region(&mut self, region: RegionId) {
        if !self.regions.contains(&region) {
            self.regions.push(region);
        }
    }

    pub fn remove_region(&mut self, region: RegionId) {
        self.regions.retain(|r| *r != region);
    }

    /// Allocate the preview buffer for the host format
    pub fn configure(&mut self, sample_rate: f64, max_block_size: usize, num_channels: usize) {
        self.sample_rate = sample_rate;
        let preview_len = (self.config.preview_buffer_seconds * sample_rate).max(0.0) as usize;
        self.preview = AudioBuffer::new(num_channels, preview_len);
        self.tail = AudioBuffer::with_capacity(num_channels, max_block_size);
        self.reset();
        log::debug!(
            "EditorRenderer::configure: {} Hz, preview buffer {} frames",
            sample_rate,
            preview_len
        );
    }

    /// Drop the current preview; the next previewed block rebuilds it
    pub fn reset(&mut self) {
        self.preview.clear();
        self.looper = Looper::default();
        self.last = None;
    }

    /// Loop range inside the preview buffer
    pub fn preview_range(&self) -> SampleRange {
        self.looper.range()
    }

    pub fn is_previewing(&self) -> bool {
        self.was_previewing
    }

    /// Render one block
    ///
    /// While stopped with a previewed region the looped window overwrites
    /// `output`. Ending a preview adds a short fade-out of the loop. Other
    /// blocks are left untouched. Returns false when the document is being
    /// edited.
    pub fn process_block(&mut self, document: &Document, output: &mut AudioBuffer, position: PositionInfo) -> bool {
        let Some(graph) = document.processing_lock() else {
            return false;
        };

        if position.is_playing {
            self.fade_out_if_necessary(output);
            return true;
        }

        let Some((region_id, time)) = document.preview().get() else {
            self.fade_out_if_necessary(output);
            return true;
        };
        if !self.regions.contains(&region_id) {
            return true;
        }
        let Some((region, modification, source)) = graph.resolve_region(region_id) else {
            self.fade_out_if_necessary(output);
            return true;
        };

        let key = PreviewKey {
            region: region_id,
            time,
            dimmed: modification.is_dimmed(),
            version: modification.version(),
        };
        if self.last != Some(key) {
            let processed = modification.processed();
            let audio = match &*processed {
                Some(buffer) if modification.is_modified() => buffer,
                _ => source.buffer(),
            };
            let range = self.read_window(&region.timing, time, source, audio, key.dimmed);
            self.looper = Looper::with_crossfade(range, self.config.crossfade_samples);
            self.last = Some(key);
        }

        self.looper.write_into(&self.preview, output);
        if !std::mem::replace(&mut self.was_previewing, true) {
            let fade_in = self.config.preview_fade_samples.min(output.num_frames());
            output.apply_gain_ramp(0, fade_in, 0.0, 1.0);
        }
        true
    }

    /// Copy the window around `time` into the preview buffer
    ///
    /// Returns the part of the preview buffer that holds audio. The window
    /// is clipped to the audio; material before the start lands at an offset
    /// so the click position stays in the middle.
    fn read_window(
        &mut self,
        timing: &RegionTiming,
        time: f64,
        source: &AudioSource,
        audio: &AudioBuffer,
        dimmed: bool,
    ) -> SampleRange {
        let mapper = TimeMapper::new(self.sample_rate, source.sample_rate());
        let ratio = mapper.resampling_ratio();
        let half_window = self.config.preview_window_seconds / 2.0;
        let offset = timing.start_in_modification - timing.start_in_playback;

        let window_start = round_sample_position((time - half_window + offset) * self.sample_rate);
        let window_end = round_sample_position((time + half_window + offset) * self.sample_rate) - 1;
        let audio_len = round_sample_position(audio.num_frames() as f64 / ratio);

        let input_offset = window_start.clamp(0, audio_len);
        let output_offset = (-window_start).max(0);
        let source_read_len = window_end.min(audio_len) - input_offset;
        let output_read_len =
            (output_offset + source_read_len).min(self.preview.num_frames() as i64) - output_offset;
        let read_len = source_read_len.min(output_read_len);

        self.preview.clear();
        if read_len <= 0 {
            return SampleRange::default();
        }

        let reader = ResamplingReader::new(ratio);
        let start_in_source = round_sample_position(input_offset as f64 * ratio);
        reader.read_into(
            audio,
            start_in_source,
            &mut self.preview,
            output_offset as usize,
            read_len as usize,
        );
        if dimmed {
            self.preview
                .apply_gain(output_offset as usize, read_len as usize, self.config.dimmed_gain);
        }
        SampleRange::with_start_and_length(output_offset, read_len)
    }

    /// One block of the loop with a fade to silence, mixed into `output`
    fn fade_out_if_necessary(&mut self, output: &mut AudioBuffer) {
        if !std::mem::replace(&mut self.was_previewing, false) {
            return;
        }
        let frames = output.num_frames().min(self.tail.capacity());
        if frames == 0 {
            return;
        }
        self.tail.set_len_from_capacity(frames);
        self.looper.write_into(&self.preview, &mut self.tail);
        let fade = self.config.preview_fade_samples.min(frames);
        self.tail.apply_gain_ramp(frames - fade, fade, 1.0, 0.0);

        let channels = output.num_channels().min(self.tail.num_channels());
        for channel in 0..channels {
            output.add_from(channel, 0, &self.tail, channel, 0, frames);
        }
    }
}
