//! Client for the remote chat-completion API.
//!
//! One client is constructed at startup from [`AppConfig`] and shared across
//! requests.  Every upstream failure is classified and degraded to a fixed
//! user-facing fallback string here; nothing past this boundary has to care
//! why the model was unavailable.

use std::time::Duration;

use serde_json::{json, Value};

use crate::config::AppConfig;

const COMPLETION_TIMEOUT: Duration = Duration::from_secs(60);
const COMPLETION_API_VERSION: &str = "2025-01-01-preview";
const MAX_TOKENS: u32 = 1000;
const TEMPERATURE: f64 = 0.7;

/// Returned without any HTTP call when the inbound text is blank.
pub const EMPTY_MESSAGE_PROMPT: &str =
    "I received an empty message. Please type something and try again.";

/// Returned when the upstream call succeeded but produced no usable text.
pub const NO_REPLY_FALLBACK: &str =
    "I'm not sure how to respond to that. Could you please rephrase or ask something else?";

/// Failure classes for a completion exchange.  Each maps to its own fixed
/// fallback string so the user-visible degradation reflects what actually
/// went wrong.
#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("completion request timed out")]
    Timeout,
    #[error("completion endpoint returned HTTP {0}")]
    Status(u16),
    #[error("completion request failed: {0}")]
    Network(#[source] reqwest::Error),
    #[error("completion response had no usable shape")]
    Malformed,
}

impl CompletionError {
    pub fn fallback_text(&self) -> &'static str {
        match self {
            CompletionError::Timeout => {
                "The AI service is taking too long to respond. Please try again in a moment."
            }
            CompletionError::Status(_) => {
                "There was an error processing your request. Please try again later."
            }
            CompletionError::Network(_) => {
                "I'm having trouble connecting to the AI service. Please try again later."
            }
            CompletionError::Malformed => {
                "I received an unexpected response. Could you please try again?"
            }
        }
    }
}

/// Seam for the Inbound Processor: anything that can turn a user message
/// into reply text.  `None` means the backend produced nothing at all and
/// the caller must substitute its own fallback.
#[async_trait::async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn generate_reply(&self, message_body: &str, sender_id: &str, name: &str)
        -> Option<String>;
}

/// Concrete backend talking to the configured completion endpoint.
pub struct CompletionClient {
    endpoint: String,
    api_key: String,
    deployment: String,
    client: reqwest::Client,
}

impl CompletionClient {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_timeout(
            config.completion_endpoint.clone(),
            config.completion_api_key.clone(),
            config.deployment_name.clone(),
            COMPLETION_TIMEOUT,
        )
    }

    pub fn with_timeout(
        endpoint: String,
        api_key: String,
        deployment: String,
        timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to build reqwest client");
        Self {
            endpoint,
            api_key,
            deployment,
            client,
        }
    }

    fn build_payload(&self, message_body: &str, name: &str) -> Value {
        let system_prompt = format!(
            "You are a helpful and friendly assistant talking to {} on WhatsApp. \
             Keep responses concise, natural, and conversational. \
             Use emojis occasionally to make the conversation more engaging. \
             If you don't know something, be honest about it.",
            name
        );
        json!({
            "model": self.deployment,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": message_body},
            ],
            "max_tokens": MAX_TOKENS,
            "temperature": TEMPERATURE,
        })
    }

    async fn request_completion(
        &self,
        message_body: &str,
        name: &str,
    ) -> Result<String, CompletionError> {
        let payload = self.build_payload(message_body, name);
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .header("api-version", COMPLETION_API_VERSION)
            .json(&payload)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    CompletionError::Timeout
                } else {
                    CompletionError::Network(err)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CompletionError::Status(status.as_u16()));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|_| CompletionError::Malformed)?;
        let choice = body
            .get("choices")
            .and_then(|c| c.get(0))
            .ok_or(CompletionError::Malformed)?;
        Ok(extract_reply(choice))
    }
}

#[async_trait::async_trait]
impl CompletionBackend for CompletionClient {
    async fn generate_reply(
        &self,
        message_body: &str,
        sender_id: &str,
        name: &str,
    ) -> Option<String> {
        if message_body.trim().is_empty() {
            tracing::warn!(sender = %sender_id, name = %name, "empty message body received");
            return Some(EMPTY_MESSAGE_PROMPT.to_string());
        }

        tracing::info!(
            sender = %sender_id,
            name = %name,
            preview = %truncate(message_body, 100),
            "requesting completion"
        );

        match self.request_completion(message_body, name).await {
            Ok(reply) if reply.is_empty() => {
                tracing::warn!(sender = %sender_id, name = %name, "completion reply was empty");
                Some(NO_REPLY_FALLBACK.to_string())
            }
            Ok(reply) => Some(reply),
            Err(err) => {
                tracing::error!(sender = %sender_id, name = %name, error = %err, "completion failed");
                Some(err.fallback_text().to_string())
            }
        }
    }
}

/// Extraction strategies tried in order against `choices[0]`.  The first
/// match wins; if none apply the whole choice object is rendered as text so
/// an unfamiliar response shape still yields something to send.
type ExtractStrategy = fn(&Value) -> Option<String>;

const EXTRACT_STRATEGIES: &[ExtractStrategy] = &[direct_text, message_content, alternate_keys];

fn direct_text(choice: &Value) -> Option<String> {
    choice.get("text")?.as_str().map(str::to_string)
}

fn message_content(choice: &Value) -> Option<String> {
    choice
        .get("message")?
        .get("content")?
        .as_str()
        .map(str::to_string)
}

fn alternate_keys(choice: &Value) -> Option<String> {
    for key in ["text", "content", "response"] {
        if let Some(value) = choice.get(key) {
            return Some(render(value));
        }
    }
    None
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub(crate) fn extract_reply(choice: &Value) -> String {
    for strategy in EXTRACT_STRATEGIES {
        if let Some(text) = strategy(choice) {
            return text.trim().to_string();
        }
    }
    choice.to_string().trim().to_string()
}

pub(crate) fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
