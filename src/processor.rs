//! The inbound-message pipeline: validate the webhook envelope, extract the
//! message, request a completion, format it for WhatsApp and deliver it.
//!
//! This is the single failure boundary of the relay.  Structural rejection
//! maps to 404 before any extraction or HTTP call; everything that faults
//! after validation is caught here and mapped to 500, never propagated to
//! the webhook caller.

use std::sync::Arc;

use serde_json::Value;

use crate::completion::{truncate, CompletionBackend};
use crate::sender::MessageSender;
use crate::transform::format_for_whatsapp;

pub const PROCESSED: &str = "Message processed successfully";
pub const NOT_A_VALID_MESSAGE: &str = "Not a valid WhatsApp message";
pub const PROCESSING_ERROR: &str = "Error processing message";

/// Substituted when the completion backend produced nothing at all.
const APOLOGY: &str =
    "I'm sorry, I couldn't process your request at the moment. Please try again later.";

const DEFAULT_DISPLAY_NAME: &str = "User";

/// Status/body pair handed back to the webhook endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub status: u16,
    pub body: &'static str,
}

/// Message fields pulled out of a validated envelope.  Request-scoped,
/// discarded once the reply is on its way.
#[derive(Debug)]
struct IncomingMessage {
    from_number: String,
    message_body: String,
    name: String,
}

#[derive(Debug, thiserror::Error)]
enum ExtractError {
    #[error("messages[0].text.body missing or not a string")]
    MissingBody,
    #[error("messages[0].from missing or not a string")]
    MissingSender,
}

pub struct MessageProcessor {
    completion: Arc<dyn CompletionBackend>,
    sender: Arc<dyn MessageSender>,
}

impl MessageProcessor {
    pub fn new(completion: Arc<dyn CompletionBackend>, sender: Arc<dyn MessageSender>) -> Self {
        Self { completion, sender }
    }

    /// Run the full pipeline for one envelope.  Always returns an outcome;
    /// no step is allowed to fault past this function.
    pub async fn process(&self, envelope: &Value) -> ProcessOutcome {
        if let Err(missing) = validate_envelope(envelope) {
            tracing::info!(missing = %missing, "rejecting payload: not a WhatsApp message");
            return ProcessOutcome {
                status: 404,
                body: NOT_A_VALID_MESSAGE,
            };
        }

        match self.relay(envelope).await {
            Ok(()) => ProcessOutcome {
                status: 200,
                body: PROCESSED,
            },
            Err(err) => {
                tracing::error!(error = %err, "error processing message");
                ProcessOutcome {
                    status: 500,
                    body: PROCESSING_ERROR,
                }
            }
        }
    }

    async fn relay(&self, envelope: &Value) -> Result<(), ExtractError> {
        let incoming = extract_message(envelope)?;
        tracing::info!(
            sender = %incoming.from_number,
            name = %incoming.name,
            preview = %truncate(&incoming.message_body, 100),
            "received message"
        );

        let reply = self
            .completion
            .generate_reply(&incoming.message_body, &incoming.from_number, &incoming.name)
            .await
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| APOLOGY.to_string());

        let formatted = format_for_whatsapp(&reply);

        // Delivery failures are recovered here: the message still counts as
        // processed. Flagged in DESIGN.md as observed behavior of record.
        match self.sender.send_text(&incoming.from_number, &formatted).await {
            Ok(receipt) => {
                tracing::debug!(status = receipt.status, "reply delivered");
            }
            Err(err) => {
                tracing::warn!(
                    sender = %incoming.from_number,
                    status = err.status_code(),
                    error = %err,
                    "reply delivery failed"
                );
            }
        }
        Ok(())
    }
}

/// Structural validity of the webhook envelope.  Each required path element
/// is checked explicitly; the first missing one is returned by name.
fn validate_envelope(envelope: &Value) -> Result<(), &'static str> {
    if envelope.get("object").map_or(true, Value::is_null) {
        return Err("object");
    }
    let entry = envelope
        .get("entry")
        .and_then(|e| e.get(0))
        .filter(|e| !e.is_null())
        .ok_or("entry[0]")?;
    let change = entry
        .get("changes")
        .and_then(|c| c.get(0))
        .filter(|c| !c.is_null())
        .ok_or("changes[0]")?;
    let value = change.get("value").filter(|v| !v.is_null()).ok_or("value")?;
    value
        .get("messages")
        .and_then(|m| m.get(0))
        .filter(|m| !m.is_null())
        .ok_or("messages[0]")?;
    Ok(())
}

/// Extraction runs only on validated envelopes; missing message fields past
/// this point are pipeline errors, not a 404.
fn extract_message(envelope: &Value) -> Result<IncomingMessage, ExtractError> {
    let value = envelope
        .pointer("/entry/0/changes/0/value")
        .unwrap_or(&Value::Null);
    let message = value
        .pointer("/messages/0")
        .unwrap_or(&Value::Null);

    let message_body = message
        .pointer("/text/body")
        .and_then(Value::as_str)
        .ok_or(ExtractError::MissingBody)?
        .to_string();
    let from_number = message
        .get("from")
        .and_then(Value::as_str)
        .ok_or(ExtractError::MissingSender)?
        .to_string();

    Ok(IncomingMessage {
        from_number,
        message_body,
        name: resolve_display_name(value),
    })
}

/// The contacts path is optional; absence, wrong types or a blank name all
/// resolve to the default.
fn resolve_display_name(value: &Value) -> String {
    value
        .pointer("/contacts/0/profile/name")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| DEFAULT_DISPLAY_NAME.to_string())
}
