//! Remote model clients
//!
//! A [`Client`] talks to one remote model endpoint. Two providers exist:
//!
//! - [`GradioClient`]: pyharp apps on Hugging Face spaces, `*.hf.space`,
//!   localhost or `gradio.live` (call/stream protocol)
//! - [`StabilityClient`]: Stability AI stable-audio REST endpoints
//!
//! Every call is blocking and runs on the job thread. Long-running calls
//! take a [`CancelToken`] which is checked once per chunk or stream line.

pub mod gradio;
mod http;
pub mod labels;
pub mod space;
pub mod stability;
pub mod stream;

#[cfg(test)]
pub(crate) mod mock;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::config::ClientConfig;
use crate::error::{ErrorKind, HarpError, Result};

pub use gradio::GradioClient;
pub use labels::{LabelKind, OutputLabel};
pub use space::{SpaceInfo, SpaceStatus};
pub use stability::StabilityClient;

/// Service a token belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    HuggingFace,
    Stability,
}

impl FromStr for Provider {
    type Err = HarpError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "hf" | "huggingface" | "hugging-face" => Ok(Provider::HuggingFace),
            "stability" | "stability-ai" => Ok(Provider::Stability),
            other => Err(HarpError::new(
                ErrorKind::UnknownError,
                format!("Unknown token provider '{}'. Use 'huggingface' or 'stability'.", other),
            )),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::HuggingFace => write!(f, "Hugging Face"),
            Provider::Stability => write!(f, "Stability AI"),
        }
    }
}

/// Cooperative cancellation flag shared between a session and its client
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// `Err(Cancelled)` once cancellation was requested
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(HarpError::cancelled())
        } else {
            Ok(())
        }
    }
}

/// Result of a processing request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessResponse {
    /// Downloaded output files, in the order the model returned them
    pub output_files: Vec<PathBuf>,
    pub labels: Vec<OutputLabel>,
}

/// Raw control description returned by a model
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControlsResponse {
    /// Input components (tracks and controls) in declaration order
    pub inputs: Vec<Value>,
    /// Output tracks
    pub outputs: Vec<Value>,
    /// Model card properties
    pub card: Map<String, Value>,
}

/// Provider-neutral remote model API
pub trait Client: Send + Sync {
    /// The endpoint this client talks to
    fn space_info(&self) -> &SpaceInfo;

    /// Fetch the model card and control/track descriptions
    fn get_controls(&self) -> Result<ControlsResponse>;

    /// Upload a local file and return the path the model will see
    fn upload_file(&self, path: &Path, cancel: &CancelToken) -> Result<String>;

    /// Run the model on a `{"data": [...]}` payload and collect its outputs
    fn process_request(&self, payload: &Value, cancel: &CancelToken) -> Result<ProcessResponse>;

    /// Ask the remote side to stop the current job
    fn cancel(&self) -> Result<()>;

    /// Check that `token` is accepted by the provider with sufficient scope
    fn validate_token(&self, token: &str) -> Result<()>;
}

/// Build the client for a resolved space
///
/// `token` overrides the provider token from `config`.
pub fn create_client(space: SpaceInfo, config: &ClientConfig, token: Option<String>) -> Arc<dyn Client> {
    match space.status {
        SpaceStatus::Stability => {
            let token = token.or_else(|| config.stability_token.clone());
            Arc::new(StabilityClient::new(space, config.clone(), token))
        }
        _ => {
            let token = token.or_else(|| config.huggingface_token.clone());
            Arc::new(GradioClient::new(space, config.clone(), token))
        }
    }
}

/// Check a token without loading a model
pub fn validate_provider_token(provider: Provider, token: &str, config: &ClientConfig) -> Result<()> {
    let agent = http::build_agent(config);
    let result = match provider {
        Provider::HuggingFace => {
            gradio::validate_huggingface_token(&agent, gradio::HF_WHOAMI_URL, token, config.token_timeout())
        }
        Provider::Stability => stability::validate_stability_token(
            &agent,
            stability::STABILITY_API_BASE,
            token,
            config.token_timeout(),
        ),
    };
    match &result {
        Ok(()) => log::info!("validate_provider_token: {} token accepted", provider),
        Err(err) => log::warn!("validate_provider_token: {} token rejected: {}", provider, err.dev_message),
    }
    result
}
