//! External Generation Services
//!
//! The text and image services are unreliable network collaborators. The
//! traits are the seam the generators (and their tests) depend on; the HTTP
//! implementations talk to Pollinations-style endpoints.

use std::time::Duration;

use log::debug;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("HTTP error {0}")]
    Status(u16),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for ServiceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ServiceError::Timeout
        } else if let Some(status) = e.status() {
            ServiceError::Status(status.as_u16())
        } else {
            ServiceError::Transport(e.to_string())
        }
    }
}

/// Text generation boundary: prompt in, completion text out.
pub trait TextService: Send + Sync {
    fn complete(&self, prompt: &str) -> Result<String, ServiceError>;
}

/// Image generation boundary: prompt and resolution in, raw image bytes out.
pub trait ImageService: Send + Sync {
    fn fetch(&self, prompt: &str, size: [u32; 2]) -> Result<Vec<u8>, ServiceError>;
}

fn build_client(timeout: Duration) -> Result<Client, ServiceError> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("deckforge/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ServiceError::Transport(format!("cannot build HTTP client: {}", e)))
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chat completion endpoint.
pub struct HttpTextService {
    client: Client,
    url: String,
    model: String,
}

impl HttpTextService {
    pub fn new(url: &str, model: &str, timeout: Duration) -> Result<Self, ServiceError> {
        Ok(Self {
            client: build_client(timeout)?,
            url: url.to_string(),
            model: model.to_string(),
        })
    }
}

impl TextService for HttpTextService {
    fn complete(&self, prompt: &str) -> Result<String, ServiceError> {
        let body = ChatRequest {
            model: &self.model,
            messages: [ChatMessage { role: "user", content: prompt }],
        };

        let response = self.client.post(&self.url).json(&body).send()?;
        let status = response.status();
        debug!("POST {} -> {}", self.url, status);
        if !status.is_success() {
            return Err(ServiceError::Status(status.as_u16()));
        }

        let chat: ChatResponse = response
            .json()
            .map_err(|e| ServiceError::Malformed(format!("not a chat completion: {}", e)))?;

        chat.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ServiceError::Malformed("completion has no content".to_string()))
    }
}

/// Prompt-in-path image endpoint (`<base>/<prompt>?width=..&height=..&model=..`).
pub struct HttpImageService {
    client: Client,
    base_url: String,
    model: String,
}

impl HttpImageService {
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Result<Self, ServiceError> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    pub fn image_url(&self, prompt: &str) -> String {
        format!("{}/{}", self.base_url, utf8_percent_encode(prompt, NON_ALPHANUMERIC))
    }
}

impl ImageService for HttpImageService {
    fn fetch(&self, prompt: &str, size: [u32; 2]) -> Result<Vec<u8>, ServiceError> {
        let url = self.image_url(prompt);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("width", size[0].to_string()),
                ("height", size[1].to_string()),
                ("model", self.model.clone()),
            ])
            .send()?;

        let status = response.status();
        debug!("GET {} -> {}", url, status);
        if !status.is_success() {
            return Err(ServiceError::Status(status.as_u16()));
        }

        Ok(response.bytes()?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_url_encodes_prompt_into_path() {
        let service =
            HttpImageService::new("https://image.example/prompt/", "flux", Duration::from_secs(1)).unwrap();
        assert_eq!(
            service.image_url("a pirate ship, stormy"),
            "https://image.example/prompt/a%20pirate%20ship%2C%20stormy"
        );
    }

    #[test]
    fn chat_request_shape() {
        let body = ChatRequest {
            model: "openai",
            messages: [ChatMessage { role: "user", content: "hi" }],
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "openai");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "hi");
    }

    #[test]
    fn unreachable_endpoint_is_a_service_error() {
        // Port 9 on localhost is discard; connection is refused in test sandboxes.
        let service =
            HttpTextService::new("http://127.0.0.1:9/openai", "openai", Duration::from_millis(500)).unwrap();
        assert!(service.complete("hello").is_err());
    }
}
