//! HARP Core - remote model processing for audio regions
//!
//! A host keeps a [`document::Document`] of sources, modifications and
//! playback regions. A [`session::ModelSession`] loads a remote model
//! (Gradio space or Stability AI), exposes its controls and processes the
//! selected modifications. The [`scheduler::JobScheduler`] runs loads and
//! processing on a worker thread and reports through events, while the
//! [`render`] module plays back processed audio and previews regions
//! without allocating or blocking on the audio thread.

pub mod audio_file;
pub mod client;
pub mod config;
pub mod document;
pub mod error;
pub mod gc;
pub mod looper;
pub mod render;
pub mod scheduler;
pub mod session;
pub mod time_map;
pub mod types;

pub use error::{ErrorKind, HarpError};
pub use types::*;
