//! Gradio (pyharp) client
//!
//! pyharp apps expose three endpoints through Gradio's call API:
//! `controls`, `process` and `cancel`. Each call is a POST returning an
//! `event_id`, followed by a GET on the event whose stream ends with a
//! `complete` or `error` event (see [`super::stream`]).

use std::io::{BufReader, Cursor};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::{json, Value};

use crate::config::ClientConfig;
use crate::error::{ErrorKind, HarpError, Result};

use super::http::{self, CancellableReader, Multipart};
use super::labels::parse_label_list;
use super::stream::{extract_key, read_event_stream};
use super::{CancelToken, Client, ControlsResponse, ProcessResponse, SpaceInfo};

/// Hugging Face token introspection endpoint
pub const HF_WHOAMI_URL: &str = "https://huggingface.co/api/whoami-v2";

/// Permissions a fine-grained Hugging Face token needs
pub const HF_REQUIRED_PERMISSIONS: [&str; 4] = [
    "repo.content.read",
    "repo.write",
    "inference.serverless.write",
    "inference.endpoints.infer.write",
];

const FILE_DATA_TYPE: &str = "gradio.FileData";
const LABEL_LIST_TYPE: &str = "pyharp.LabelList";

pub struct GradioClient {
    space: SpaceInfo,
    base_url: String,
    agent: ureq::Agent,
    config: ClientConfig,
    token: Option<String>,
}

impl GradioClient {
    pub fn new(space: SpaceInfo, config: ClientConfig, token: Option<String>) -> Self {
        Self {
            base_url: space.gradio.clone(),
            agent: http::build_agent(&config),
            space,
            config,
            token: token.filter(|t| !t.is_empty()),
        }
    }

    /// Send requests to `base_url` instead of the resolved Gradio URL
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/gradio_api/{}", self.base_url.trim_end_matches('/'), path)
    }

    fn request(&self, method: &str, url: &str, timeout: Duration) -> ureq::Request {
        let request = self
            .agent
            .request(method, url)
            .timeout(timeout)
            .set("Accept", "*/*");
        match &self.token {
            Some(token) => request.set("Authorization", &format!("Bearer {}", token)),
            None => request,
        }
    }

    /// POST `{"data": ...}` to an endpoint and return the event id
    fn post_for_event_id(&self, endpoint: &str, body: &Value) -> Result<String> {
        let url = self.api_url(&format!("call/{}", endpoint));
        log::debug!("GradioClient::post_for_event_id: POST {}", url);

        let response = self
            .request("POST", &url, self.config.request_timeout())
            .send_json(body)
            .map_err(|e| {
                let err = http::request_error(e, ErrorKind::HttpRequestError, None);
                let message = format!("Request to {} failed: {}", endpoint, err.dev_message);
                err.with_dev_message(message)
            })?;
        let response = http::expect_ok(response, ErrorKind::HttpRequestError)?;
        let text = http::read_text(response, ErrorKind::HttpRequestError)?;

        let parsed: Value = serde_json::from_str(&text).map_err(|e| {
            HarpError::new(
                ErrorKind::HttpRequestError,
                format!("Failed to parse JSON response from {}: {}", endpoint, e),
            )
        })?;
        let obj = parsed.as_object().ok_or_else(|| {
            HarpError::new(
                ErrorKind::HttpRequestError,
                format!("Parsed JSON is not an object from {}", endpoint),
            )
        })?;

        match obj.get("event_id").and_then(Value::as_str) {
            Some(event_id) if !event_id.is_empty() => Ok(event_id.to_string()),
            _ => Err(HarpError::new(
                ErrorKind::MissingJsonKey,
                format!("event_id not found in the response from {}", endpoint),
            )),
        }
    }

    /// Stream the event until it completes and return the payload line
    fn response_from_event_id(&self, endpoint: &str, event_id: &str, cancel: &CancelToken) -> Result<String> {
        let url = self.api_url(&format!("call/{}/{}", endpoint, event_id));
        log::debug!("GradioClient::response_from_event_id: GET {}", url);

        let response = self
            .request("GET", &url, self.config.poll_timeout())
            .call()
            .map_err(|e| http::request_error(e, ErrorKind::HttpRequestError, Some(cancel)))?;
        let response = http::expect_ok(response, ErrorKind::HttpRequestError)?;

        read_event_stream(BufReader::new(response.into_reader()), cancel)
    }

    /// Full call: event id, stream, `data: ` extraction
    fn call(&self, endpoint: &str, body: &Value, cancel: &CancelToken) -> Result<String> {
        let event_id = self.post_for_event_id(endpoint, body)?;
        cancel.check()?;
        let response = self.response_from_event_id(endpoint, &event_id, cancel)?;
        extract_key(&response, "data: ")
    }

    fn download_file(&self, url: &str, cancel: &CancelToken) -> Result<PathBuf> {
        let file_name = url
            .split(['?', '#'])
            .next()
            .and_then(|path| path.rsplit('/').next())
            .unwrap_or_default();
        let dest = http::unique_temp_path(file_name);
        log::info!("GradioClient::download_file: {} -> {:?}", url, dest);

        let response = self
            .request("GET", url, self.config.poll_timeout())
            .call()
            .map_err(|e| http::request_error(e, ErrorKind::FileDownloadError, Some(cancel)))?;
        let response = http::expect_ok(response, ErrorKind::FileDownloadError)?;

        http::copy_to_file(
            response.into_reader(),
            &dest,
            self.config.chunk_size(),
            cancel,
            ErrorKind::FileDownloadError,
        )?;
        Ok(dest)
    }

    /// Interpret the data array of a finished `process` call
    fn collect_outputs(&self, data: &str, cancel: &CancelToken) -> Result<ProcessResponse> {
        let parsed: Value = serde_json::from_str(data).map_err(|e| {
            HarpError::new(
                ErrorKind::JsonParseError,
                format!("Failed to parse the 'data' key of the received JSON: {}", e),
            )
        })?;
        let items = parsed.as_array().ok_or_else(|| {
            HarpError::new(ErrorKind::JsonParseError, "Parsed data field should be an array.")
        })?;

        let mut response = ProcessResponse::default();
        for (i, item) in items.iter().enumerate() {
            let obj = item.as_object().ok_or_else(|| {
                HarpError::new(
                    ErrorKind::JsonParseError,
                    format!(
                        "Returned element {} of the process function is not an object. \
                         Use LabelList() rather than a plain list for output labels.",
                        i
                    ),
                )
            })?;
            let meta = obj.get("meta").and_then(Value::as_object).ok_or_else(|| {
                HarpError::new(
                    ErrorKind::MissingJsonKey,
                    format!("Processed output {} does not have a valid meta object.", i),
                )
            })?;

            match meta.get("_type").and_then(Value::as_str).unwrap_or_default() {
                FILE_DATA_TYPE => {
                    let url = obj.get("url").and_then(Value::as_str).ok_or_else(|| {
                        HarpError::new(
                            ErrorKind::MissingJsonKey,
                            format!("Processed output {} has no url", i),
                        )
                    })?;
                    response.output_files.push(self.download_file(url, cancel)?);
                }
                LABEL_LIST_TYPE => response.labels.extend(parse_label_list(obj)?),
                other => log::warn!(
                    "GradioClient::process_request: model returned a {} output, which HARP does not support yet",
                    other
                ),
            }
        }
        Ok(response)
    }
}

impl Client for GradioClient {
    fn space_info(&self) -> &SpaceInfo {
        &self.space
    }

    fn get_controls(&self) -> Result<ControlsResponse> {
        let data = self.call("controls", &json!({ "data": [] }), &CancelToken::new())?;
        parse_controls_response(&data)
    }

    fn upload_file(&self, path: &Path, cancel: &CancelToken) -> Result<String> {
        let upload_error = |message: String| HarpError::new(ErrorKind::FileUploadError, message);

        let bytes = std::fs::read(path)
            .map_err(|e| upload_error(format!("Failed to read {:?}: {}", path, e)))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "input".to_string());
        let (content_type, body) = Multipart::with_random_boundary()
            .file("files", &file_name, http::mime_type_for(path), &bytes)
            .finish();

        let url = self.api_url("upload");
        log::info!("GradioClient::upload_file: {:?} ({} bytes) -> {}", path, bytes.len(), url);

        let body_len = body.len();
        let reader = CancellableReader::new(Cursor::new(body), self.config.chunk_size(), cancel.clone());
        let response = self
            .request("POST", &url, self.config.poll_timeout())
            .set("Content-Type", &content_type)
            .set("Content-Length", &body_len.to_string())
            .send(reader)
            .map_err(|e| http::request_error(e, ErrorKind::FileUploadError, Some(cancel)))?;
        let response = http::expect_ok(response, ErrorKind::FileUploadError)?;
        let text = http::read_text(response, ErrorKind::FileUploadError)?;

        let parsed: Value = serde_json::from_str(&text)
            .map_err(|e| upload_error(format!("Failed to parse JSON response: {}", e)))?;
        let uploaded = parsed
            .as_array()
            .and_then(|items| items.first())
            .and_then(Value::as_str)
            .unwrap_or_default();
        if uploaded.is_empty() {
            return Err(upload_error(
                "Parsed JSON does not contain the uploaded file path.".to_string(),
            ));
        }
        Ok(uploaded.to_string())
    }

    fn process_request(&self, payload: &Value, cancel: &CancelToken) -> Result<ProcessResponse> {
        let data = self.call("process", payload, cancel)?;
        cancel.check()?;
        self.collect_outputs(&data, cancel)
    }

    fn cancel(&self) -> Result<()> {
        log::info!("GradioClient::cancel: {}", self.space.model_slash_user());
        self.call("cancel", &json!({ "data": [] }), &CancelToken::new())
            .map(|_| ())
    }

    fn validate_token(&self, token: &str) -> Result<()> {
        validate_huggingface_token(&self.agent, HF_WHOAMI_URL, token, self.config.token_timeout())
    }
}

/// Split the controls payload into card, inputs and outputs
pub fn parse_controls_response(data: &str) -> Result<ControlsResponse> {
    let parse_error = |message: &str| HarpError::new(ErrorKind::JsonParseError, message);

    let parsed: Value = serde_json::from_str(data)
        .map_err(|_| parse_error("Failed to parse the data portion of the received controls JSON."))?;
    let items = parsed
        .as_array()
        .ok_or_else(|| parse_error("Parsed JSON is not an array."))?;
    let obj = items
        .first()
        .and_then(Value::as_object)
        .ok_or_else(|| parse_error("First element in the array is not a dict."))?;

    let card = obj
        .get("card")
        .and_then(Value::as_object)
        .ok_or_else(|| parse_error("Couldn't load the modelCard dict from the controls response."))?;
    let inputs = obj
        .get("inputs")
        .and_then(Value::as_array)
        .ok_or_else(|| parse_error("Couldn't load the inputs array from the controls response."))?;
    let outputs = obj
        .get("outputs")
        .and_then(Value::as_array)
        .ok_or_else(|| parse_error("Couldn't load the outputs array from the controls response."))?;

    Ok(ControlsResponse {
        inputs: inputs.clone(),
        outputs: outputs.clone(),
        card: card.clone(),
    })
}

/// Check a token against whoami-v2
pub fn validate_huggingface_token(agent: &ureq::Agent, url: &str, token: &str, timeout: Duration) -> Result<()> {
    let response = agent
        .get(url)
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
    let parsed: Value = serde_json::from_str(&text).map_err(|e| {
        HarpError::new(
            ErrorKind::JsonParseError,
            format!("Failed to parse JSON response from whoami-v2 API: {}", e),
        )
    })?;
    check_token_scope(&parsed)
}

/// Read/write roles pass; fine-grained tokens need every required permission
/// in at least one scope entry
pub fn check_token_scope(whoami: &Value) -> Result<()> {
    let access_token = whoami
        .pointer("/auth/accessToken")
        .and_then(Value::as_object)
        .ok_or_else(|| {
            HarpError::new(ErrorKind::MissingJsonKey, "whoami-v2 response has no auth.accessToken")
        })?;

    let role = access_token.get("role").and_then(Value::as_str).unwrap_or_default();
    if role == "read" || role == "write" {
        return Ok(());
    }

    let scoped = access_token
        .get("fineGrained")
        .and_then(|fine| fine.get("scoped"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let has_all = scoped.iter().any(|entry| {
        let Some(permissions) = entry.get("permissions").and_then(Value::as_array) else {
            return false;
        };
        HF_REQUIRED_PERMISSIONS
            .iter()
            .all(|needed| permissions.iter().any(|p| p.as_str() == Some(*needed)))
    });

    if has_all {
        Ok(())
    } else {
        Err(HarpError::new(
            ErrorKind::UnknownError,
            "Provided token does not have suitable read/write permissions.",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_file::write_wav;
    use crate::client::mock::{MockResponse, MockServer};
    use crate::client::LabelKind;
    use crate::types::{AudioBuffer, SourceAudio};

    fn client_for(server: &MockServer) -> GradioClient {
        let space = SpaceInfo::parse(&server.url()).unwrap();
        GradioClient::new(space, ClientConfig::default(), Some("hf_test".to_string()))
    }

    fn controls_json() -> Value {
        json!([{
            "card": {"name": "Gain", "description": "Scales audio", "author": "acme", "tags": ["gain"]},
            "inputs": [
                {"type": "audio_track", "label": "Input Audio", "required": true},
                {"type": "slider", "label": "gain", "minimum": 0, "maximum": 1, "step": 0.01, "value": 0.5}
            ],
            "outputs": [{"type": "audio_track", "label": "Output Audio"}]
        }])
    }

    #[test]
    fn test_get_controls() {
        let data = controls_json().to_string();
        let server = MockServer::start(move |req| match req.path.as_str() {
            "/gradio_api/call/controls" => MockResponse::json(json!({"event_id": "ev1"})),
            "/gradio_api/call/controls/ev1" => {
                MockResponse::events(&[("heartbeat", "null"), ("complete", data.as_str())])
            }
            _ => MockResponse::status(404, "not found"),
        });

        let client = client_for(&server);
        let controls = client.get_controls().unwrap();
        assert_eq!(controls.inputs.len(), 2);
        assert_eq!(controls.outputs.len(), 1);
        assert_eq!(controls.card["name"], "Gain");

        let post = &server.requests_to("/gradio_api/call/controls")[0];
        assert_eq!(post.method, "POST");
        assert_eq!(post.header("Authorization"), Some("Bearer hf_test"));
        let body: Value = serde_json::from_slice(&post.body).unwrap();
        assert_eq!(body, json!({"data": []}));
    }

    #[test]
    fn test_error_event_is_http_error() {
        let server = MockServer::start(|req| match req.path.as_str() {
            "/gradio_api/call/controls" => MockResponse::json(json!({"event_id": "ev"})),
            _ => MockResponse::events(&[("error", "\"space is broken\"")]),
        });
        let err = client_for(&server).get_controls().unwrap_err();
        assert_eq!(err.kind, ErrorKind::HttpRequestError);
        assert!(err.dev_message.contains("space is broken"));
    }

    #[test]
    fn test_missing_event_id() {
        let server = MockServer::start(|_| MockResponse::json(json!({"id": "x"})));
        let err = client_for(&server).get_controls().unwrap_err();
        assert_eq!(err.kind, ErrorKind::MissingJsonKey);
    }

    #[test]
    fn test_status_503_keeps_code() {
        let server = MockServer::start(|_| MockResponse::status(503, "sleeping"));
        let err = client_for(&server).get_controls().unwrap_err().filled();
        assert_eq!(err.code, 503);
        assert!(err.user_message.contains("sleeping"));
    }

    #[test]
    fn test_upload_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.wav");
        write_wav(&path, &SourceAudio::new("in", 44100.0, AudioBuffer::new(1, 64))).unwrap();

        let server = MockServer::start(|req| match req.path.as_str() {
            "/gradio_api/upload" => MockResponse::json(json!(["/tmp/gradio/abc/input.wav"])),
            _ => MockResponse::status(404, ""),
        });
        let client = client_for(&server);
        let uploaded = client.upload_file(&path, &CancelToken::new()).unwrap();
        assert_eq!(uploaded, "/tmp/gradio/abc/input.wav");

        let request = &server.requests_to("/gradio_api/upload")[0];
        assert!(request
            .header("Content-Type")
            .unwrap()
            .starts_with("multipart/form-data; boundary=--------"));
        let body = request.body_text();
        assert!(body.contains("name=\"files\"; filename=\"input.wav\""));
        assert!(body.contains("Content-Type: audio/wav"));
    }

    #[test]
    fn test_upload_failure_is_upload_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.wav");
        std::fs::write(&path, b"data").unwrap();
        let server = MockServer::start(|_| MockResponse::status(500, "boom"));
        let err = client_for(&server)
            .upload_file(&path, &CancelToken::new())
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::FileUploadError);
        assert_eq!(err.code, 500);
    }

    #[test]
    fn test_process_downloads_files_and_decodes_labels() {
        let server = MockServer::start(|req| match req.path.as_str() {
            "/gradio_api/call/process" => MockResponse::json(json!({"event_id": "p1"})),
            "/gradio_api/call/process/p1" => {
                let host = req.header("Host").unwrap_or_default().to_string();
                let data = json!([
                    {"path": "/tmp/out.wav", "url": format!("http://{}/gradio_api/file=/tmp/out.wav", host),
                     "meta": {"_type": "gradio.FileData"}},
                    {"labels": [{"label_type": "MidiLabel", "t": 1.0, "label": "C4", "pitch": 60}],
                     "meta": {"_type": "pyharp.LabelList"}},
                    {"value": 3, "meta": {"_type": "gradio.Number"}}
                ]);
                MockResponse::events(&[("complete", data.to_string().as_str())])
            }
            "/gradio_api/file=/tmp/out.wav" => MockResponse::bytes("audio/wav", b"RIFFDATA".to_vec()),
            _ => MockResponse::status(404, ""),
        });

        let client = client_for(&server);
        let response = client
            .process_request(&json!({"data": [0.5]}), &CancelToken::new())
            .unwrap();

        assert_eq!(response.output_files.len(), 1);
        let file = &response.output_files[0];
        assert_eq!(std::fs::read(file).unwrap(), b"RIFFDATA");
        assert_eq!(file.extension().unwrap(), "wav");
        std::fs::remove_file(file).ok();

        assert_eq!(response.labels.len(), 1);
        assert_eq!(response.labels[0].kind, LabelKind::Midi { pitch: Some(60.0) });

        let post = &server.requests_to("/gradio_api/call/process")[0];
        assert_eq!(serde_json::from_slice::<Value>(&post.body).unwrap(), json!({"data": [0.5]}));
    }

    #[test]
    fn test_process_output_without_meta() {
        let server = MockServer::start(|req| match req.path.as_str() {
            "/gradio_api/call/process" => MockResponse::json(json!({"event_id": "p"})),
            _ => MockResponse::events(&[("complete", "[{\"path\": \"x\"}]")]),
        });
        let err = client_for(&server)
            .process_request(&json!({"data": []}), &CancelToken::new())
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::MissingJsonKey);
    }

    #[test]
    fn test_process_cancelled_while_streaming() {
        let server = MockServer::start(|req| match req.path.as_str() {
            "/gradio_api/call/process" => MockResponse::json(json!({"event_id": "slow"})),
            _ => MockResponse::Heartbeats {
                interval: Duration::from_millis(20),
                max: 500,
            },
        });
        let client = client_for(&server);
        let cancel = CancelToken::new();

        let canceller = cancel.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            canceller.cancel();
        });

        let err = client.process_request(&json!({"data": []}), &cancel).unwrap_err();
        handle.join().unwrap();
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_cancel_calls_cancel_endpoint() {
        let server = MockServer::start(|req| match req.path.as_str() {
            "/gradio_api/call/cancel" => MockResponse::json(json!({"event_id": "c"})),
            "/gradio_api/call/cancel/c" => MockResponse::events(&[("complete", "[]")]),
            _ => MockResponse::status(404, ""),
        });
        client_for(&server).cancel().unwrap();
        assert_eq!(server.requests_to("/gradio_api/call/cancel/c").len(), 1);
    }

    #[test]
    fn test_parse_controls_response_errors() {
        assert_eq!(
            parse_controls_response("{}").unwrap_err().dev_message,
            "Parsed JSON is not an array."
        );
        assert_eq!(
            parse_controls_response("[1]").unwrap_err().dev_message,
            "First element in the array is not a dict."
        );
        assert_eq!(
            parse_controls_response("[{\"inputs\": [], \"outputs\": []}]")
                .unwrap_err()
                .kind,
            ErrorKind::JsonParseError
        );
    }

    #[test]
    fn test_token_scope() {
        let read = json!({"auth": {"accessToken": {"role": "read"}}});
        assert!(check_token_scope(&read).is_ok());

        let fine = json!({"auth": {"accessToken": {"role": "fineGrained", "fineGrained": {"scoped": [
            {"entity": {}, "permissions": ["repo.content.read"]},
            {"entity": {}, "permissions": HF_REQUIRED_PERMISSIONS}
        ]}}}});
        assert!(check_token_scope(&fine).is_ok());

        let weak = json!({"auth": {"accessToken": {"role": "fineGrained", "fineGrained": {"scoped": [
            {"permissions": ["repo.content.read", "repo.write"]}
        ]}}}});
        assert!(check_token_scope(&weak).is_err());

        assert_eq!(
            check_token_scope(&json!({})).unwrap_err().kind,
            ErrorKind::MissingJsonKey
        );
    }

    #[test]
    fn test_validate_token_against_server() {
        let server = MockServer::start(|req| {
            if req.header("Authorization") == Some("Bearer good") {
                MockResponse::json(json!({"auth": {"accessToken": {"role": "write"}}}))
            } else {
                MockResponse::status(401, "unauthorized")
            }
        });
        let agent = ureq::agent();
        let url = format!("{}/api/whoami-v2", server.url());
        let timeout = Duration::from_secs(5);
        assert!(validate_huggingface_token(&agent, &url, "good", timeout).is_ok());

        let err = validate_huggingface_token(&agent, &url, "bad", timeout).unwrap_err();
        assert_eq!(err.code, 401);
        assert_eq!(err.dev_message, "Authentication failed with status code: 401");
    }
}
