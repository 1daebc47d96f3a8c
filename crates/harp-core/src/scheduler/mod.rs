//! Job scheduler: runs model loads and processing off the UI thread
//!
//! ```text
//! UI thread ──execute_load/execute_process──▶ harp-job-0 (1-thread pool)
//!                                                │ ModelSession::load/process_batch
//!                                                ▼
//! UI thread ◀──────────── JobEvent ───────── EventBus
//! ```
//!
//! The pool has a single thread, so jobs run strictly one after another and
//! a second request queues behind the running one. Errors never escape a
//! job: they are converted into a [`JobFailure`] on the completion event.

pub mod events;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam::channel::Receiver;

use crate::config::JobsConfig;
use crate::document::Document;
use crate::session::{LoadParams, ModelSession};

pub use events::{EventBus, JobEvent, JobFailure, JobId};

/// No process job is current
const NO_JOB: u64 = 0;

/// Decrements the in-flight counter when a job ends, even by panic
struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

pub struct JobScheduler {
    session: Arc<ModelSession>,
    document: Document,
    pool: rayon::ThreadPool,
    events: Arc<EventBus>,
    next_job: AtomicU64,
    /// Job whose result will be broadcast; cleared by `cancel`
    current_process: Arc<AtomicU64>,
    in_flight: Arc<AtomicUsize>,
}

impl JobScheduler {
    pub fn new(
        session: Arc<ModelSession>,
        document: Document,
        config: &JobsConfig,
    ) -> Result<Self, rayon::ThreadPoolBuildError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(1)
            .thread_name(|i| format!("harp-job-{}", i))
            .build()?;

        Ok(Self {
            session,
            document,
            pool,
            events: Arc::new(EventBus::new(config.event_capacity)),
            next_job: AtomicU64::new(1),
            current_process: Arc::new(AtomicU64::new(NO_JOB)),
            in_flight: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn session(&self) -> &Arc<ModelSession> {
        &self.session
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    /// New receiver for completion events; every subscriber sees every event
    pub fn subscribe(&self) -> Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// True while any job is queued or running
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire) > 0
    }

    fn spawn_job<F>(&self, job: F)
    where
        F: FnOnce(&ModelSession, &EventBus) + Send + 'static,
    {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        let in_flight = InFlight(self.in_flight.clone());
        let session = self.session.clone();
        let events = self.events.clone();
        self.pool.spawn(move || {
            let _in_flight = in_flight;
            job(session.as_ref(), events.as_ref());
        });
    }

    /// Load a model in the background; ends with [`JobEvent::LoadComplete`]
    pub fn execute_load(&self, params: LoadParams) {
        log::info!("JobScheduler::execute_load: {}", params.url);
        self.spawn_job(move |session, events| {
            let failure = session.load(&params).err().map(JobFailure::from);
            if let Some(failure) = &failure {
                log::error!("JobScheduler: load of {} failed: {}", params.url, failure.dev_message);
            }
            events.publish(JobEvent::LoadComplete {
                url: params.url,
                failure,
            });
        });
    }

    /// Process the modifications of all selected regions
    ///
    /// Targets and control values are captured now, on the calling thread.
    /// Returns `None` when no region is selected.
    pub fn execute_process(&self) -> Option<JobId> {
        let targets = self.document.read().selected_targets();
        if targets.is_empty() {
            log::warn!("JobScheduler::execute_process: no region selected");
            return None;
        }
        let controls = self.session.controls_snapshot();
        let job = JobId(self.next_job.fetch_add(1, Ordering::AcqRel));
        self.current_process.store(job.0, Ordering::Release);
        log::info!(
            "JobScheduler::execute_process: {} with {} targets",
            job,
            targets.len()
        );

        let current = self.current_process.clone();
        self.spawn_job(move |session, events| {
            if current.load(Ordering::Acquire) != job.0 {
                log::info!("JobScheduler: {} was cancelled before it started", job);
                events.publish(JobEvent::ProcessCancelled { job });
                return;
            }

            // Re-checked once the session counts the job as running, so a
            // cancel landing in between still stops it before any request
            let result = session.process_batch_if(&targets, controls, || {
                current.load(Ordering::Acquire) == job.0
            });
            let still_current = current
                .compare_exchange(job.0, NO_JOB, Ordering::AcqRel, Ordering::Acquire)
                .is_ok();

            let event = match result {
                Err(err) if err.is_cancelled() => JobEvent::ProcessCancelled { job },
                Ok(outcome) if !still_current => {
                    log::info!("JobScheduler: discarding late result of {}", job);
                    if !outcome.updated.is_empty() {
                        session.undo();
                    }
                    JobEvent::ProcessCancelled { job }
                }
                Ok(outcome) => JobEvent::ProcessComplete {
                    job,
                    updated: outcome.updated,
                    failure: None,
                },
                Err(err) => {
                    let failure = JobFailure::from(err);
                    log::error!("JobScheduler: {} failed: {}", job, failure.dev_message);
                    JobEvent::ProcessComplete {
                        job,
                        updated: Vec::new(),
                        failure: Some(failure),
                    }
                }
            };
            events.publish(event);
        });
        Some(job)
    }

    /// Cancel the current process job
    ///
    /// Its result will not be reported as a success. The session and the
    /// remote side are told on a short-lived thread so the caller never
    /// waits on the network.
    pub fn cancel(&self) {
        let job = self.current_process.swap(NO_JOB, Ordering::AcqRel);
        log::info!("JobScheduler::cancel: current job {}", job);

        let session = self.session.clone();
        let spawned = thread::Builder::new()
            .name("harp-cancel".to_string())
            .spawn(move || {
                if let Err(err) = session.cancel() {
                    log::warn!("JobScheduler::cancel: {}", err);
                }
            });
        if let Err(err) = spawned {
            log::error!("JobScheduler::cancel: failed to spawn cancel thread: {}", err);
        }
    }

    /// Undo the last processing job after any queued work
    pub fn undo(&self) {
        self.spawn_job(|session, events| {
            let restored = session.undo();
            events.publish(JobEvent::UndoComplete { restored });
        });
    }
}
