//! Model session: one loaded remote model and its controls
//!
//! ```text
//! Initialized ─load─▶ Loading ─▶ GettingControls ─▶ Loaded
//! Loaded ─process─▶ Starting ─▶ Sending ─▶ Processing ─▶ Loaded
//!                                    └── cancel ─▶ Cancelling ─▶ Loaded
//! any step ─failure─▶ Error
//! ```
//!
//! The session is shared as `Arc<ModelSession>` between the UI and the job
//! thread. Status lives in an atomic so the UI can poll it while a job runs.
//! At most one job runs at a time; a second `load`/`process` is rejected.

pub mod controls;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use uuid::Uuid;

use crate::audio_file::{read_wav, resample_linear, write_temp_wav};
use crate::client::{create_client, CancelToken, Client, OutputLabel, ProcessResponse, SpaceInfo};
use crate::config::ClientConfig;
use crate::document::{AudioModification, ModificationId, ProcessTarget};
use crate::error::{ErrorKind, HarpError, Result};
use crate::types::AudioBuffer;

pub use controls::{
    build_payload, parse_controls, Control, ControlKind, ControlList, ControlValue, ModelCard,
    OutputTrack, ParsedControls, PayloadFlavor, TrackKind,
};

/// Session state, readable without locking
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelStatus {
    Initialized = 0,
    Loading = 1,
    GettingControls = 2,
    Loaded = 3,
    Starting = 4,
    Sending = 5,
    Processing = 6,
    Cancelling = 7,
    Error = 8,
}

impl ModelStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Loading,
            2 => Self::GettingControls,
            3 => Self::Loaded,
            4 => Self::Starting,
            5 => Self::Sending,
            6 => Self::Processing,
            7 => Self::Cancelling,
            8 => Self::Error,
            _ => Self::Initialized,
        }
    }

    /// Status line text
    pub fn message(&self) -> &'static str {
        match self {
            Self::Initialized => "Ready",
            Self::Loading => "Loading model...",
            Self::GettingControls => "Fetching model controls...",
            Self::Loaded => "Model loaded",
            Self::Starting => "Starting...",
            Self::Sending => "Sending audio...",
            Self::Processing => "Processing...",
            Self::Cancelling => "Cancelling...",
            Self::Error => "Error",
        }
    }
}

/// Arguments of [`ModelSession::load`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadParams {
    /// Space address: `user/model`, a huggingface.co or hf.space URL,
    /// a localhost URL or `stability/<service>`
    pub url: String,
    /// Provider token; the configured one is used when `None`
    pub token: Option<String>,
}

impl LoadParams {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: None,
        }
    }
}

/// Result of a successful processing job
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessOutcome {
    /// Modifications whose processed audio was replaced
    pub updated: Vec<ModificationId>,
    pub labels: Vec<OutputLabel>,
    pub output_files: Vec<PathBuf>,
}

/// Builds the client for a resolved space
pub type ClientFactory =
    Arc<dyn Fn(SpaceInfo, &ClientConfig, Option<String>) -> Result<Arc<dyn Client>> + Send + Sync>;

#[derive(Default)]
struct LoadedModel {
    space: SpaceInfo,
    card: ModelCard,
    controls: ControlList,
    outputs: Vec<OutputTrack>,
}

#[derive(Default)]
struct JobResults {
    labels: Vec<OutputLabel>,
    output_files: Vec<PathBuf>,
}

struct UndoEntry {
    modification: Weak<AudioModification>,
    previous: Option<AudioBuffer>,
    was_modified: bool,
}

/// Releases the job slot and clears the cancel flag
struct JobGuard<'a> {
    session: &'a ModelSession,
}

impl Drop for JobGuard<'_> {
    fn drop(&mut self) {
        let _transition = lock(&self.session.transition);
        self.session.cancel.reset();
        self.session.busy.store(false, Ordering::Release);
    }
}

fn default_client(space: SpaceInfo, config: &ClientConfig, token: Option<String>) -> Result<Arc<dyn Client>> {
    Ok(create_client(space, config, token))
}

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct ModelSession {
    config: ClientConfig,
    factory: ClientFactory,
    status: AtomicU8,
    busy: AtomicBool,
    /// Serialises job start/end with `cancel` so a cancel never outlives its job
    transition: Mutex<()>,
    cancel: CancelToken,
    client: RwLock<Option<Arc<dyn Client>>>,
    model: RwLock<LoadedModel>,
    results: Mutex<JobResults>,
    undo: Mutex<Vec<UndoEntry>>,
}

impl ModelSession {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            factory: Arc::new(default_client),
            status: AtomicU8::new(ModelStatus::Initialized as u8),
            busy: AtomicBool::new(false),
            transition: Mutex::new(()),
            cancel: CancelToken::new(),
            client: RwLock::new(None),
            model: RwLock::new(LoadedModel::default()),
            results: Mutex::new(JobResults::default()),
            undo: Mutex::new(Vec::new()),
        }
    }

    /// Replace how clients are built (alternate hosts, tests)
    pub fn with_client_factory(mut self, factory: ClientFactory) -> Self {
        self.factory = factory;
        self
    }

    pub fn status(&self) -> ModelStatus {
        ModelStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    fn set_status(&self, status: ModelStatus) {
        log::debug!("ModelSession: status {:?}", status);
        self.status.store(status as u8, Ordering::Release);
    }

    /// True once a model has been loaded
    pub fn ready(&self) -> bool {
        read_lock(&self.client).is_some()
    }

    /// True while a load or process job runs
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    fn begin_job(&self) -> Result<JobGuard<'_>> {
        let _transition = lock(&self.transition);
        if self.busy.swap(true, Ordering::AcqRel) {
            return Err(HarpError::new(
                ErrorKind::UnknownError,
                "Another job is already running on this model.",
            ));
        }
        self.cancel.reset();
        Ok(JobGuard { session: self })
    }

    fn current_client(&self) -> Option<Arc<dyn Client>> {
        read_lock(&self.client).clone()
    }

    /// Resolve the address, fetch the controls and replace the current model
    ///
    /// On failure the status is `Error` and the previously loaded model, if
    /// any, stays usable.
    pub fn load(&self, params: &LoadParams) -> Result<()> {
        let _job = self.begin_job()?;
        log::info!("ModelSession::load: {}", params.url);

        match self.load_model(params) {
            Ok(()) => {
                self.set_status(ModelStatus::Loaded);
                Ok(())
            }
            Err(err) => {
                let err = err.filled();
                log::error!("ModelSession::load: {}", err.dev_message);
                self.set_status(ModelStatus::Error);
                Err(err)
            }
        }
    }

    fn load_model(&self, params: &LoadParams) -> Result<()> {
        self.set_status(ModelStatus::Loading);
        let space = SpaceInfo::parse(&params.url)?;
        log::info!("ModelSession::load: resolved {}", space);

        let client = (self.factory)(space.clone(), &self.config, params.token.clone())?;
        self.set_status(ModelStatus::GettingControls);
        let response = client.get_controls()?;
        let parsed = parse_controls(&response)?;

        log::info!(
            "ModelSession::load: '{}' by {} ({} controls, {} outputs)",
            parsed.card.name,
            parsed.card.author,
            parsed.controls.len(),
            parsed.outputs.len()
        );

        *write_lock(&self.model) = LoadedModel {
            space,
            card: parsed.card,
            controls: parsed.controls,
            outputs: parsed.outputs,
        };
        *write_lock(&self.client) = Some(client);
        *lock(&self.results) = JobResults::default();
        lock(&self.undo).clear();
        Ok(())
    }

    /// Process one target with the current control values
    pub fn process(&self, target: &ProcessTarget) -> Result<ProcessOutcome> {
        let controls = self.controls_snapshot();
        self.process_batch(std::slice::from_ref(target), controls)
    }

    /// Process several targets with a snapshot of the control values
    ///
    /// Results are published only after every target succeeded; a failure
    /// or cancellation leaves all targets untouched. Success pushes one undo
    /// level covering the whole batch.
    pub fn process_batch(&self, targets: &[ProcessTarget], controls: ControlList) -> Result<ProcessOutcome> {
        self.process_batch_if(targets, controls, || true)
    }

    /// [`ModelSession::process_batch`] that gives up with `Cancelled` when
    /// `still_wanted` is false once the job slot is taken
    ///
    /// From that point on `cancel` reaches the job, so a caller-side cancel
    /// can never slip in between its own check and the start of the job.
    pub fn process_batch_if<F>(
        &self,
        targets: &[ProcessTarget],
        controls: ControlList,
        still_wanted: F,
    ) -> Result<ProcessOutcome>
    where
        F: FnOnce() -> bool,
    {
        let _job = self.begin_job()?;
        if !still_wanted() {
            log::info!("ModelSession::process: dropped before start");
            return Err(HarpError::cancelled().filled());
        }

        match self.run_batch(targets, controls) {
            Ok(outcome) => {
                self.set_status(ModelStatus::Loaded);
                Ok(outcome)
            }
            Err(err) if err.is_cancelled() => {
                log::info!("ModelSession::process: cancelled");
                self.set_status(ModelStatus::Loaded);
                Err(err.filled())
            }
            Err(err) => {
                let err = err.filled();
                log::error!("ModelSession::process: {}", err.dev_message);
                self.set_status(ModelStatus::Error);
                Err(err)
            }
        }
    }

    fn run_batch(&self, targets: &[ProcessTarget], mut controls: ControlList) -> Result<ProcessOutcome> {
        let client = self.current_client().ok_or_else(|| {
            HarpError::new(ErrorKind::UnknownError, "No model is loaded.")
                .with_user_message("Load a model before processing.")
        })?;
        self.set_status(ModelStatus::Starting);
        let flavor = if client.space_info().is_stability() {
            PayloadFlavor::Stability
        } else {
            PayloadFlavor::Gradio
        };

        let mut rendered = Vec::with_capacity(targets.len());
        let mut responses = Vec::with_capacity(targets.len());
        let result = targets.iter().try_for_each(|target| {
            let (buffer, response) = self.process_target(client.as_ref(), target, &mut controls, flavor)?;
            rendered.push((target, buffer));
            responses.push(response);
            Ok(())
        });
        let result = result.and_then(|_| self.cancel.check());
        if let Err(err) = result {
            for file in responses.iter().flat_map(|r| r.output_files.iter()) {
                std::fs::remove_file(file).ok();
            }
            return Err(err);
        }

        let mut undo = Vec::new();
        let mut outcome = ProcessOutcome::default();
        for (target, buffer) in rendered {
            let Some(buffer) = buffer else { continue };
            let modification = &target.modification;
            undo.push(UndoEntry {
                modification: Arc::downgrade(modification),
                previous: (*modification.processed()).clone(),
                was_modified: modification.is_modified(),
            });
            modification.publish(buffer);
            outcome.updated.push(modification.id());
        }
        if !undo.is_empty() {
            *lock(&self.undo) = undo;
        }

        for response in responses {
            outcome.labels.extend(response.labels);
            outcome.output_files.extend(response.output_files);
        }
        *lock(&self.results) = JobResults {
            labels: outcome.labels.clone(),
            output_files: outcome.output_files.clone(),
        };

        log::info!(
            "ModelSession::process: updated {} of {} targets, {} labels",
            outcome.updated.len(),
            targets.len(),
            outcome.labels.len()
        );
        Ok(outcome)
    }

    /// Upload, run and decode one target; nothing is published here
    fn process_target(
        &self,
        client: &dyn Client,
        target: &ProcessTarget,
        controls: &mut ControlList,
        flavor: PayloadFlavor,
    ) -> Result<(Option<AudioBuffer>, ProcessResponse)> {
        let cancel = &self.cancel;
        let audio = target.current_audio();
        let input = write_temp_wav(&audio)?;
        cancel.check()?;

        self.set_status(ModelStatus::Sending);
        let has_audio_input = controls
            .iter()
            .any(|c| matches!(c.kind, ControlKind::AudioTrack { .. }));
        if has_audio_input {
            let remote = client.upload_file(input.path(), cancel)?;
            for control in controls.iter_mut() {
                if let ControlKind::AudioTrack { value, .. } = &mut control.kind {
                    *value = Some(remote.clone());
                }
            }
        }
        cancel.check()?;

        let payload = build_payload(controls, flavor);
        self.set_status(ModelStatus::Processing);
        let response = client.process_request(&payload, cancel)?;
        cancel.check()?;

        let wav = response
            .output_files
            .iter()
            .find(|path| {
                path.extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"))
            });
        let buffer = match wav {
            Some(path) => {
                let output = read_wav(path)?;
                Some(resample_linear(
                    &output.buffer,
                    output.sample_rate,
                    target.source.sample_rate(),
                ))
            }
            None => {
                log::warn!("ModelSession::process: model returned no audio for '{}'", audio.name);
                None
            }
        };
        Ok((buffer, response))
    }

    /// Request cancellation of the running job
    ///
    /// The job notices at its next check point and ends with a `Cancelled`
    /// error. Without a running job this does nothing.
    pub fn cancel(&self) -> Result<()> {
        {
            let _transition = lock(&self.transition);
            if !self.is_busy() {
                log::debug!("ModelSession::cancel: no job running");
                return Ok(());
            }
            self.cancel.cancel();
        }
        // Only a running process job shows Cancelling; a job that already
        // finished keeps its final status
        let _ = self
            .status
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |status| {
                match ModelStatus::from_u8(status) {
                    ModelStatus::Starting | ModelStatus::Sending | ModelStatus::Processing => {
                        Some(ModelStatus::Cancelling as u8)
                    }
                    _ => None,
                }
            });

        match self.current_client() {
            Some(client) => client.cancel().map_err(|err| {
                log::warn!("ModelSession::cancel: remote cancel failed: {}", err);
                err.filled()
            }),
            None => Ok(()),
        }
    }

    /// Restore the audio from before the last successful job
    ///
    /// Returns false when there is nothing to undo.
    pub fn undo(&self) -> bool {
        let entries = std::mem::take(&mut *lock(&self.undo));
        if entries.is_empty() {
            log::info!("ModelSession::undo: nothing to undo");
            return false;
        }
        for entry in entries {
            match entry.modification.upgrade() {
                Some(modification) => modification.restore(entry.previous, entry.was_modified),
                None => log::debug!("ModelSession::undo: modification was removed"),
            }
        }
        true
    }

    pub fn can_undo(&self) -> bool {
        !lock(&self.undo).is_empty()
    }

    pub fn space_info(&self) -> SpaceInfo {
        read_lock(&self.model).space.clone()
    }

    pub fn card(&self) -> ModelCard {
        read_lock(&self.model).card.clone()
    }

    /// Non-track controls
    pub fn controls(&self) -> Vec<Control> {
        read_lock(&self.model).controls.parameters().cloned().collect()
    }

    pub fn input_tracks(&self) -> Vec<Control> {
        read_lock(&self.model).controls.tracks().cloned().collect()
    }

    pub fn output_tracks(&self) -> Vec<OutputTrack> {
        read_lock(&self.model).outputs.clone()
    }

    /// Copy of every input component, taken before a job starts
    pub fn controls_snapshot(&self) -> ControlList {
        read_lock(&self.model).controls.clone()
    }

    pub fn set_control(&self, id: Uuid, value: ControlValue) -> Result<()> {
        let mut model = write_lock(&self.model);
        let control = model.controls.get_mut(id).ok_or_else(|| {
            HarpError::new(ErrorKind::UnknownError, format!("No control with id {}", id))
        })?;
        control.set_value(value)
    }

    pub fn set_control_by_label(&self, label: &str, value: &str) -> Result<()> {
        let mut model = write_lock(&self.model);
        let control = model.controls.find_by_label_mut(label).ok_or_else(|| {
            HarpError::new(ErrorKind::UnknownError, format!("No control labelled '{}'", label))
        })?;
        control.set_from_str(value)
    }

    /// Labels returned by the last successful job
    pub fn labels(&self) -> Vec<OutputLabel> {
        lock(&self.results).labels.clone()
    }

    /// Files returned by the last successful job
    pub fn output_files(&self) -> Vec<PathBuf> {
        lock(&self.results).output_files.clone()
    }

    /// Check a provider token with the loaded model's client
    pub fn validate_token(&self, token: &str) -> Result<()> {
        let client = self.current_client().ok_or_else(|| {
            HarpError::new(ErrorKind::UnknownError, "No model is loaded.")
        })?;
        client.validate_token(token).map_err(HarpError::filled)
    }
}
