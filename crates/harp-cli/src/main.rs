//! harp - run HARP remote models from the command line
//!
//! ## Commands
//!
//! - `harp load <space> [--token T]`: load a model and list its controls
//! - `harp process <space> <in.wav> <out.wav> [--set label=value]... [--token T]`:
//!   process a file and render the result
//! - `harp validate-token <huggingface|stability> <token>`
//!
//! Settings come from `~/.config/harp/config.yaml`, written with defaults on
//! first run. Set RUST_LOG=debug for verbose output.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use crossbeam::channel::Receiver;

use harp_core::audio_file::{read_wav, write_wav};
use harp_core::client::{validate_provider_token, Provider};
use harp_core::config::{default_config_path, HarpConfig};
use harp_core::document::{Document, RegionId};
use harp_core::gc::AudioGc;
use harp_core::render::{PlaybackRenderer, PositionInfo};
use harp_core::scheduler::{JobEvent, JobScheduler};
use harp_core::session::{LoadParams, ModelSession};
use harp_core::time_map::RegionTiming;
use harp_core::{AudioBuffer, SourceAudio};

const USAGE: &str = "usage:
  harp load <space> [--token T]
  harp process <space> <in.wav> <out.wav> [--set label=value]... [--token T]
  harp validate-token <huggingface|stability> <token>";

#[derive(Debug, PartialEq)]
enum Command {
    Load {
        space: String,
        token: Option<String>,
    },
    Process {
        space: String,
        input: PathBuf,
        output: PathBuf,
        settings: Vec<(String, String)>,
        token: Option<String>,
    },
    ValidateToken {
        provider: Provider,
        token: String,
    },
}

fn parse_args(args: &[String]) -> Result<Command> {
    let mut positional = Vec::new();
    let mut settings = Vec::new();
    let mut token = None;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--token" => {
                token = Some(iter.next().ok_or_else(|| anyhow!("--token needs a value"))?.clone());
            }
            "--set" => {
                let assignment = iter.next().ok_or_else(|| anyhow!("--set needs label=value"))?;
                let (label, value) = assignment
                    .split_once('=')
                    .ok_or_else(|| anyhow!("--set expects label=value, got '{}'", assignment))?;
                settings.push((label.to_string(), value.to_string()));
            }
            _ => positional.push(arg.as_str()),
        }
    }

    match positional.as_slice() {
        ["load", space] => Ok(Command::Load {
            space: space.to_string(),
            token,
        }),
        ["process", space, input, output] => Ok(Command::Process {
            space: space.to_string(),
            input: PathBuf::from(input),
            output: PathBuf::from(output),
            settings,
            token,
        }),
        ["validate-token", provider, token] => Ok(Command::ValidateToken {
            provider: provider.parse()?,
            token: token.to_string(),
        }),
        _ => bail!("{}", USAGE),
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = parse_args(&args)?;
    let config = HarpConfig::load_or_init(&default_config_path());

    match command {
        Command::Load { space, token } => load(&config, space, token),
        Command::Process {
            space,
            input,
            output,
            settings,
            token,
        } => process(&config, space, &input, &output, &settings, token),
        Command::ValidateToken { provider, token } => {
            validate_provider_token(provider, &token, &config.client)?;
            println!("{} token is valid", provider);
            Ok(())
        }
    }
}

/// Wait for the load started by `execute_load`
fn wait_for_load(events: &Receiver<JobEvent>) -> Result<()> {
    loop {
        match events.recv().context("job thread stopped")? {
            JobEvent::LoadComplete { failure: None, .. } => return Ok(()),
            JobEvent::LoadComplete {
                failure: Some(failure),
                ..
            } => bail!("{}", failure),
            other => log::debug!("wait_for_load: ignoring {:?}", other),
        }
    }
}

fn load(config: &HarpConfig, space: String, token: Option<String>) -> Result<()> {
    let gc = AudioGc::start().context("failed to start the audio GC thread")?;
    let session = Arc::new(ModelSession::new(config.client.clone()));
    let scheduler = JobScheduler::new(session.clone(), Document::new(gc.handle()), &config.jobs)?;
    let events = scheduler.subscribe();

    scheduler.execute_load(LoadParams { url: space, token });
    wait_for_load(&events)?;

    let card = session.card();
    println!("{} by {}", card.name, card.author);
    if !card.description.is_empty() {
        println!("  {}", card.description);
    }
    if !card.tags.is_empty() {
        println!("  tags: {}", card.tags.join(", "));
    }
    for track in session.input_tracks() {
        println!("input  {:<12} {}", track.kind.type_name(), track.label);
    }
    for control in session.controls() {
        println!("control {:<11} {}", control.kind.type_name(), control.label);
    }
    for output in session.output_tracks() {
        println!("output {:?} {}", output.kind, output.label);
    }
    Ok(())
}

fn process(
    config: &HarpConfig,
    space: String,
    input: &std::path::Path,
    output: &std::path::Path,
    settings: &[(String, String)],
    token: Option<String>,
) -> Result<()> {
    let gc = AudioGc::start().context("failed to start the audio GC thread")?;
    let audio = read_wav(input).with_context(|| format!("failed to read {:?}", input))?;
    let sample_rate = audio.sample_rate;
    let num_channels = audio.buffer.num_channels();
    let num_frames = audio.buffer.num_frames();

    let document = Document::new(gc.handle());
    let region = {
        let mut graph = document.edit();
        let source = graph.add_source(input.to_string_lossy(), audio);
        let modification = graph.add_modification(source, input.to_string_lossy())?;
        let region = graph.add_region(
            modification,
            RegionTiming::new(0.0, num_frames as f64 / sample_rate),
        )?;
        graph.set_region_selected(region, true)?;
        region
    };

    let session = Arc::new(ModelSession::new(config.client.clone()));
    let scheduler = JobScheduler::new(session.clone(), document.clone(), &config.jobs)?;
    let events = scheduler.subscribe();

    scheduler.execute_load(LoadParams { url: space, token });
    wait_for_load(&events)?;
    for (label, value) in settings {
        session.set_control_by_label(label, value)?;
    }

    let job = scheduler
        .execute_process()
        .ok_or_else(|| anyhow!("nothing to process"))?;
    loop {
        match events.recv().context("job thread stopped")? {
            JobEvent::ProcessComplete {
                job: finished,
                failure: None,
                ..
            } if finished == job => break,
            JobEvent::ProcessComplete {
                job: finished,
                failure: Some(failure),
                ..
            } if finished == job => bail!("{}", failure),
            JobEvent::ProcessCancelled { job: finished } if finished == job => bail!("processing was cancelled"),
            other => log::debug!("process: ignoring {:?}", other),
        }
    }

    for label in session.labels() {
        println!("{:>8.3}s  {}", label.t, label.label);
    }

    let rendered = render(&document, region, sample_rate, num_channels, num_frames, config.render.max_block_size);
    write_wav(output, &SourceAudio::new(output.to_string_lossy(), sample_rate, rendered))
        .with_context(|| format!("failed to write {:?}", output))?;
    println!("wrote {:?}", output);
    Ok(())
}

/// Play the region through a [`PlaybackRenderer`] block by block
fn render(
    document: &Document,
    region: RegionId,
    sample_rate: f64,
    num_channels: usize,
    num_frames: usize,
    block_size: usize,
) -> AudioBuffer {
    let block_size = block_size.max(1);
    let mut renderer = PlaybackRenderer::new();
    renderer.add_region(region);
    renderer.prepare_to_play(sample_rate, block_size, num_channels, document);

    let mut rendered = AudioBuffer::new(num_channels, num_frames);
    let mut block = AudioBuffer::new(num_channels, block_size);
    let mut position = 0;
    while position < num_frames {
        let frames = block_size.min(num_frames - position);
        if frames < block.num_frames() {
            block = AudioBuffer::new(num_channels, frames);
        }
        // The document is never edited here, so the lock is always free
        renderer.process_block(document, &mut block, PositionInfo::playing(position as i64));
        for channel in 0..num_channels {
            rendered.copy_from(channel, position, &block, channel, 0, frames);
        }
        position += frames;
    }
    renderer.release_resources();
    rendered
}
