//! Resolution of a user-entered model address
//!
//! Accepted forms:
//!
//! | Input                                           | Status      |
//! |-------------------------------------------------|-------------|
//! | `http://localhost:7860`, `*.gradio.live`, `ip:port` | Localhost |
//! | `stability/text-to-audio`, `stability/audio-to-audio` | Stability |
//! | `https://huggingface.co/spaces/user/model`      | Huggingface |
//! | `https://user-model.hf.space/`                  | Gradio      |
//! | `user/model`                                    | Huggingface |

use std::fmt;

use crate::error::{ErrorKind, HarpError, Result};

/// Stability AI services HARP can drive
pub const STABILITY_SERVICES: [&str; 2] = ["text-to-audio", "audio-to-audio"];

const HF_SPACES_PREFIX: &str = "https://huggingface.co/spaces/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SpaceStatus {
    Gradio,
    Huggingface,
    Localhost,
    Stability,
    Error,
    #[default]
    Empty,
}

impl SpaceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpaceStatus::Gradio => "Gradio",
            SpaceStatus::Huggingface => "HuggingFace",
            SpaceStatus::Localhost => "Localhost",
            SpaceStatus::Stability => "Stability",
            SpaceStatus::Error => "Error",
            SpaceStatus::Empty => "Empty",
        }
    }
}

/// Resolved identity of a remote model endpoint
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpaceInfo {
    /// Hugging Face space page (for "open space" links)
    pub huggingface: String,
    /// Gradio app base URL the client calls
    pub gradio: String,
    /// Stability API documentation page
    pub stability: String,
    /// Endpoint the client sends requests to
    pub api_endpoint: String,
    pub user_input: String,
    pub user_name: String,
    pub model_name: String,
    pub error: String,
    pub status: SpaceStatus,
}

impl SpaceInfo {
    /// Resolve an address; malformed input yields `InvalidUrl`
    pub fn parse(address: &str) -> Result<SpaceInfo> {
        let mut info = SpaceInfo {
            user_input: address.to_string(),
            ..Default::default()
        };

        let result = info.resolve(address);
        match result {
            Ok(()) => {
                log::debug!("SpaceInfo::parse: {}", info);
                Ok(info)
            }
            Err(message) => {
                info.status = SpaceStatus::Error;
                info.error = message.clone();
                log::warn!("SpaceInfo::parse: {}", message);
                Err(HarpError::new(ErrorKind::InvalidUrl, message))
            }
        }
    }

    fn resolve(&mut self, address: &str) -> std::result::Result<(), String> {
        if address.contains("localhost") || address.contains("gradio.live") || is_ip_with_port(address) {
            self.gradio = with_scheme(address, "http");
            self.api_endpoint = self.gradio.clone();
            self.user_name = "localhost".to_string();
            self.model_name = "localhost".to_string();
            self.status = SpaceStatus::Localhost;
        } else if address.starts_with("stability/") {
            let parts = split_non_empty(address);
            if parts.len() != 2 {
                return Err(format!(
                    "Invalid Stability AI format. Expected 'stability/service_type'. Got: {}",
                    address
                ));
            }
            let service = parts[1].to_lowercase();
            if !STABILITY_SERVICES.contains(&service.as_str()) {
                return Err(format!("Unsupported Stability AI service type: {}", parts[1]));
            }
            self.stability = format!(
                "https://platform.stability.ai/docs/api-reference#tag/Stable-Audio-2/paths/~1v2beta~1audio~1stable-audio-2~1{}/post",
                service
            );
            self.api_endpoint = format!("https://api.stability.ai/v2beta/audio/stable-audio-2/{}", service);
            self.user_name = parts[0].to_string();
            self.model_name = service;
            self.status = SpaceStatus::Stability;
        } else if let Some(index) = address.find(HF_SPACES_PREFIX) {
            let parts = split_non_empty(&address[index + HF_SPACES_PREFIX.len()..]);
            if parts.len() < 2 {
                return Err(format!(
                    "Detected huggingface.co URL but could not parse user and model. Too few parts in {}",
                    address
                ));
            }
            self.set_huggingface(parts[0], parts[1]);
            self.huggingface = address.to_string();
        } else if address.contains("hf.space") {
            let without_protocol = match address.find("://") {
                Some(index) => &address[index + 3..],
                None => address,
            };
            let subdomain = without_protocol
                .find(".hf.space")
                .map_or(without_protocol, |index| &without_protocol[..index]);
            let Some((user, model)) = subdomain.split_once('-') else {
                return Err(format!(
                    "Detected hf.space URL but could not parse user and model. No hyphen found in the subdomain: {}",
                    subdomain
                ));
            };
            self.user_name = user.to_string();
            self.model_name = model.replace('-', "_");
            self.gradio = with_scheme(address, "https");
            self.api_endpoint = self.gradio.clone();
            self.huggingface = format!("{}{}/{}", HF_SPACES_PREFIX, user, self.model_name);
            self.status = SpaceStatus::Gradio;
        } else if address.contains('/') && !address.contains("http") {
            let parts = split_non_empty(address);
            if parts.len() != 2 {
                return Err(format!(
                    "Detected user/model URL but could not parse user and model. Too many/few slashes in {}",
                    address
                ));
            }
            self.set_huggingface(parts[0], parts[1]);
        } else {
            return Err(format!(
                "Invalid URL: {}. URL does not match any of the expected patterns.",
                address
            ));
        }
        Ok(())
    }

    fn set_huggingface(&mut self, user: &str, model: &str) {
        self.huggingface = format!("{}{}/{}", HF_SPACES_PREFIX, user, model);
        self.gradio = format!("https://{}-{}.hf.space/", user, model.replace('_', "-"));
        self.api_endpoint = self.gradio.clone();
        self.user_name = user.to_string();
        self.model_name = model.to_string();
        self.status = SpaceStatus::Huggingface;
    }

    /// `user/model`, or `localhost` for local apps
    pub fn model_slash_user(&self) -> String {
        if self.status == SpaceStatus::Localhost {
            "localhost".to_string()
        } else {
            format!("{}/{}", self.user_name, self.model_name)
        }
    }

    pub fn is_stability(&self) -> bool {
        self.status == SpaceStatus::Stability
    }
}

impl fmt::Display for SpaceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SpaceInfo {{ status: {}, user: {}, model: {}, gradio: {}, huggingface: {}, input: {}",
            self.status.as_str(),
            self.user_name,
            self.model_name,
            self.gradio,
            self.huggingface,
            self.user_input
        )?;
        if !self.error.is_empty() {
            write!(f, ", error: {}", self.error)?;
        }
        write!(f, " }}")
    }
}

/// Split on `/`, dropping empty tokens (trailing slashes etc.)
fn split_non_empty(s: &str) -> Vec<&str> {
    s.split('/').filter(|part| !part.is_empty()).collect()
}

/// `address` as a base URL, adding `scheme://` when it has none
fn with_scheme(address: &str, scheme: &str) -> String {
    if address.contains("://") {
        address.to_string()
    } else {
        format!("{}://{}", scheme, address)
    }
}

/// Matches `*.*.*.*:*`
fn is_ip_with_port(address: &str) -> bool {
    let Some((host, _port)) = address.rsplit_once(':') else {
        return false;
    };
    host.matches('.').count() >= 3
}
