//! Stability AI stable-audio client
//!
//! Stability has no controls endpoint, so the card and controls are canned
//! per service. Processing is a single multipart POST whose response body is
//! the generated WAV.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::Value;

use crate::config::ClientConfig;
use crate::error::{ErrorKind, HarpError, Result};

use super::gradio::parse_controls_response;
use super::http::{self, CancellableReader, Multipart};
use super::{CancelToken, Client, ControlsResponse, ProcessResponse, SpaceInfo};

pub const STABILITY_API_BASE: &str = "https://api.stability.ai";

const TEXT_TO_AUDIO_CONTROLS: &str = r#"[{"card": {"name": "Text to Audio", "description": "Integrated stability text to audio", "author": "Stability", "tags": ["example", "stability", "test"]}, "inputs": [{"label": "Input Text Prompt", "value": "happy song", "type": "text_box"}], "outputs": [{"label": "Output Audio", "required": true, "type": "audio_track"}]}]"#;

const AUDIO_TO_AUDIO_CONTROLS: &str = r#"[{"card": {"name": "Audio to Audio", "description": "Integrated stability audio to audio", "author": "Stability", "tags": ["example", "stability", "test"]}, "inputs": [{"label": "Input Audio", "required": true, "type": "audio_track"}], "outputs": [{"label": "Output Audio", "required": true, "type": "audio_track"}]}]"#;

pub struct StabilityClient {
    space: SpaceInfo,
    api_base: String,
    agent: ureq::Agent,
    config: ClientConfig,
    token: Option<String>,
}

impl StabilityClient {
    pub fn new(space: SpaceInfo, config: ClientConfig, token: Option<String>) -> Self {
        Self {
            api_base: STABILITY_API_BASE.to_string(),
            agent: http::build_agent(&config),
            space,
            config,
            token: token.filter(|t| !t.is_empty()),
        }
    }

    /// Talk to a different API host (self-hosted proxy, tests)
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn service_url(&self, service: &str) -> String {
        format!(
            "{}/v2beta/audio/stable-audio-2/{}",
            self.api_base.trim_end_matches('/'),
            service
        )
    }

    fn text_to_audio(&self, prompt: &str, cancel: &CancelToken) -> Result<PathBuf> {
        let form = Multipart::with_random_boundary()
            .text("prompt", prompt)
            .text("output_format", "wav")
            .text("duration", "30")
            .text("steps", "30");
        self.post_form("text-to-audio", form, cancel)
    }

    fn audio_to_audio(&self, audio_url: &str, cancel: &CancelToken) -> Result<PathBuf> {
        let form = Multipart::with_random_boundary()
            .text("audio_url", audio_url)
            .text("output_format", "wav")
            .text("strength", "0.65");
        self.post_form("audio-to-audio", form, cancel)
    }

    /// Send the form and write the returned audio to a temp WAV
    fn post_form(&self, service: &str, form: Multipart, cancel: &CancelToken) -> Result<PathBuf> {
        let url = self.service_url(service);
        let (content_type, body) = form.finish();
        let body_len = body.len();
        log::info!("StabilityClient::post_form: POST {} ({} bytes)", url, body_len);

        let mut request = self
            .agent
            .post(&url)
            .timeout(self.config.poll_timeout())
            .set("Content-Type", &content_type)
            .set("Content-Length", &body_len.to_string())
            .set("Accept", "audio/*");
        if let Some(token) = &self.token {
            request = request.set("Authorization", &format!("Bearer {}", token));
        }

        let reader = CancellableReader::new(Cursor::new(body), self.config.chunk_size(), cancel.clone());
        let response = request
            .send(reader)
            .map_err(|e| http::request_error(e, ErrorKind::HttpRequestError, Some(cancel)))?;
        let response = http::expect_ok(response, ErrorKind::HttpRequestError)?;
        cancel.check()?;

        let dest = http::unique_temp_path("stability.wav");
        http::copy_to_file(
            response.into_reader(),
            &dest,
            self.config.chunk_size(),
            cancel,
            ErrorKind::FileDownloadError,
        )?;
        Ok(dest)
    }
}

/// Text of a payload entry: `{label, value}` objects, files or plain values
fn entry_text(entry: &Value) -> String {
    let value = entry.get("value").unwrap_or(entry);
    match value {
        Value::String(s) => s.clone(),
        Value::Object(file) => file
            .get("path")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl Client for StabilityClient {
    fn space_info(&self) -> &SpaceInfo {
        &self.space
    }

    fn get_controls(&self) -> Result<ControlsResponse> {
        match self.space.model_name.as_str() {
            "audio-to-audio" => parse_controls_response(AUDIO_TO_AUDIO_CONTROLS),
            _ => parse_controls_response(TEXT_TO_AUDIO_CONTROLS),
        }
    }

    /// Stability reads audio by reference; the local path is passed through
    fn upload_file(&self, path: &Path, _cancel: &CancelToken) -> Result<String> {
        log::debug!("StabilityClient::upload_file: passing {:?} by reference", path);
        Ok(path.to_string_lossy().into_owned())
    }

    fn process_request(&self, payload: &Value, cancel: &CancelToken) -> Result<ProcessResponse> {
        let data = payload
            .get("data")
            .and_then(Value::as_array)
            .filter(|data| !data.is_empty())
            .ok_or_else(|| {
                HarpError::new(
                    ErrorKind::JsonParseError,
                    "Missing or empty 'data' array in processing payload.",
                )
            })?;

        let output = match self.space.model_name.as_str() {
            "text-to-audio" => self.text_to_audio(&entry_text(&data[0]), cancel)?,
            "audio-to-audio" => {
                let input = data
                    .iter()
                    .find(|entry| entry.get("label").and_then(Value::as_str) == Some("input"))
                    .unwrap_or(&data[0]);
                self.audio_to_audio(&entry_text(input), cancel)?
            }
            other => {
                return Err(HarpError::new(
                    ErrorKind::UnknownError,
                    format!("Unsupported Stability AI model: {}", other),
                ))
            }
        };

        Ok(ProcessResponse {
            output_files: vec![output],
            labels: Vec::new(),
        })
    }

    /// Cancellation is local only; the in-flight request observes the token
    fn cancel(&self) -> Result<()> {
        Ok(())
    }

    fn validate_token(&self, token: &str) -> Result<()> {
        validate_stability_token(&self.agent, &self.api_base, token, self.config.token_timeout())
    }
}

/// Check a Stability API key against the account endpoint under `api_base`
pub fn validate_stability_token(agent: &ureq::Agent, api_base: &str, token: &str, timeout: Duration) -> Result<()> {
    let url = format!("{}/v1/user/account", api_base.trim_end_matches('/'));
    let response = agent
        .get(&url)
        .timeout(timeout)
        .set("Authorization", &format!("Bearer {}", token))
        .call()
        .map_err(|e| {
            let err = http::request_error(e, ErrorKind::HttpRequestError, None);
            let code = err.code;
            err.with_dev_message(format!("Authentication failed with status code: {}", code))
        })?;
    let response = http::expect_ok(response, ErrorKind::HttpRequestError)?;
    let text = http::read_text(response, ErrorKind::HttpRequestError)?;

    match serde_json::from_str::<Value>(&text) {
        Ok(Value::Object(_)) => Ok(()),
        _ => Err(HarpError::new(
            ErrorKind::JsonParseError,
            "Failed to parse JSON response from stability account API.",
        )),
    }
}
