//! Deferred deallocation for buffers read on the audio thread
//!
//! Processed audio is published to the renderers through
//! `basedrop::SharedCell`. Replacing a buffer on the job thread must not
//! free the old one on the audio thread, so every `Shared` is created
//! against a collector that lives on its own thread and reclaims retired
//! buffers there.
//!
//! The collector is an explicit service: the host constructs one
//! [`AudioGc`] at startup and hands [`AudioGc::handle`] to whatever creates
//! shared buffers.
//!
//! ```ignore
//! let gc = AudioGc::start()?;
//! let document = Document::new(gc.handle());
//! ```

use basedrop::{Collector, Handle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

const COLLECT_INTERVAL: Duration = Duration::from_millis(100);

/// Owner of the collector thread
pub struct AudioGc {
    handle: Handle,
    running: Arc<AtomicBool>,
}

impl AudioGc {
    /// Spawn the collector thread (`harp-audio-gc`)
    pub fn start() -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel();
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = running.clone();

        thread::Builder::new()
            .name("harp-audio-gc".to_string())
            .spawn(move || {
                // Collector is !Sync, so it is created and kept on this thread
                let mut collector = Collector::new();
                if tx.send(collector.handle()).is_err() {
                    return;
                }
                log::info!("Audio GC thread started");

                while thread_running.load(Ordering::Acquire) {
                    collector.collect();
                    thread::sleep(COLLECT_INTERVAL);
                }

                // Keep reclaiming until every handle and shared value is gone
                loop {
                    match collector.try_cleanup() {
                        Ok(()) => break,
                        Err(remaining) => {
                            collector = remaining;
                            collector.collect();
                            thread::sleep(COLLECT_INTERVAL);
                        }
                    }
                }
                log::info!("Audio GC thread stopped");
            })?;

        let handle = rx.recv().map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::Other, "Audio GC thread exited before handing out a handle")
        })?;

        Ok(Self { handle, running })
    }

    /// Handle for creating `Shared`/`SharedCell` values
    pub fn handle(&self) -> Handle {
        self.handle.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Drop for AudioGc {
    fn drop(&mut self) {
        // The thread drains outstanding values and exits on its own
        self.running.store(false, Ordering::Release);
    }
}
