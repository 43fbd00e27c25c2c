//! Outbound delivery through the WhatsApp Graph messages API.  One POST per
//! reply, bounded timeout, no retries: a failed delivery is terminal for
//! that message and surfaces as a tagged [`DeliveryError`].

use std::time::Duration;

use serde_json::{json, Value};

use crate::config::AppConfig;

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("message delivery timed out")]
    Timeout,
    #[error("graph API returned HTTP {0}")]
    Status(u16),
    #[error("message delivery failed: {0}")]
    Request(#[source] reqwest::Error),
}

impl DeliveryError {
    /// HTTP-equivalent status for logging and inspection: 408 for a
    /// timeout, 500 for any other failure.
    pub fn status_code(&self) -> u16 {
        match self {
            DeliveryError::Timeout => 408,
            DeliveryError::Status(_) | DeliveryError::Request(_) => 500,
        }
    }
}

/// Raw upstream acknowledgement, kept for logging only.
#[derive(Debug)]
pub struct DeliveryReceipt {
    pub status: u16,
    pub body: String,
}

/// Seam for the Inbound Processor: anything that can deliver reply text to
/// a recipient.
#[async_trait::async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_text(&self, recipient: &str, body: &str)
        -> Result<DeliveryReceipt, DeliveryError>;
}

pub struct WhatsAppSender {
    url: String,
    access_token: String,
    client: reqwest::Client,
}

impl WhatsAppSender {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_timeout(config, DELIVERY_TIMEOUT)
    }

    pub fn with_timeout(config: &AppConfig, timeout: Duration) -> Self {
        let url = format!(
            "{}/{}/{}/messages",
            config.graph_base_url.trim_end_matches('/'),
            config.graph_version,
            config.phone_number_id
        );
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to build reqwest client");
        Self {
            url,
            access_token: config.access_token.clone(),
            client,
        }
    }
}

/// The exact envelope shape the Graph messages API expects for a text reply.
pub(crate) fn text_message_envelope(recipient: &str, body: &str) -> Value {
    json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": recipient,
        "type": "text",
        "text": {"preview_url": false, "body": body},
    })
}

#[async_trait::async_trait]
impl MessageSender for WhatsAppSender {
    async fn send_text(
        &self,
        recipient: &str,
        body: &str,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        let payload = text_message_envelope(recipient, body);
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.access_token)
            .json(&payload)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    DeliveryError::Timeout
                } else {
                    DeliveryError::Request(err)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DeliveryError::Status(status.as_u16()));
        }
        let text = response.text().await.unwrap_or_default();
        tracing::info!(status = status.as_u16(), body = %text, "message delivered");
        Ok(DeliveryReceipt {
            status: status.as_u16(),
            body: text,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderMap;
    use axum::{routing::post, Json, Router};
    use std::net::SocketAddr;

    fn test_config(base_url: String) -> AppConfig {
        AppConfig {
            access_token: "graph-token".into(),
            graph_version: "v17.0".into(),
            phone_number_id: "12345".into(),
            graph_base_url: base_url,
            completion_endpoint: "http://unused.invalid".into(),
            completion_api_key: "unused".into(),
            deployment_name: "unused".into(),
            verify_token: "unused".into(),
        }
    }

    async fn serve(router: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    #[test]
    fn envelope_matches_graph_schema() {
        let envelope = text_message_envelope("15550001111", "hi *there*");
        assert_eq!(
            envelope,
            serde_json::json!({
                "messaging_product": "whatsapp",
                "recipient_type": "individual",
                "to": "15550001111",
                "type": "text",
                "text": {"preview_url": false, "body": "hi *there*"},
            })
        );
    }

    #[tokio::test]
    async fn delivers_to_versioned_messages_url_with_bearer_auth() {
        async fn messages(
            headers: HeaderMap,
            Json(payload): Json<serde_json::Value>,
        ) -> Json<serde_json::Value> {
            assert_eq!(
                headers.get("authorization").unwrap().to_str().unwrap(),
                "Bearer graph-token"
            );
            assert_eq!(payload["to"], "15550001111");
            assert_eq!(payload["text"]["body"], "hello");
            Json(serde_json::json!({"messages": [{"id": "wamid.1"}]}))
        }
        let addr = serve(Router::new().route("/v17.0/12345/messages", post(messages))).await;
        let sender = WhatsAppSender::new(&test_config(format!("http://{}", addr)));

        let receipt = sender.send_text("15550001111", "hello").await.unwrap();
        assert_eq!(receipt.status, 200);
        assert!(receipt.body.contains("wamid.1"));
    }

    #[tokio::test]
    async fn non_2xx_is_a_500_class_failure() {
        async fn rejected() -> (axum::http::StatusCode, &'static str) {
            (axum::http::StatusCode::BAD_REQUEST, "invalid recipient")
        }
        let addr = serve(Router::new().route("/v17.0/12345/messages", post(rejected))).await;
        let sender = WhatsAppSender::new(&test_config(format!("http://{}", addr)));

        let err = sender.send_text("15550001111", "hello").await.unwrap_err();
        assert!(matches!(err, DeliveryError::Status(400)));
        assert_eq!(err.status_code(), 500);
    }

    #[tokio::test]
    async fn timeout_is_a_408_class_failure() {
        async fn stalled() -> &'static str {
            tokio::time::sleep(Duration::from_millis(500)).await;
            "too late"
        }
        let addr = serve(Router::new().route("/v17.0/12345/messages", post(stalled))).await;
        let sender = WhatsAppSender::with_timeout(
            &test_config(format!("http://{}", addr)),
            Duration::from_millis(100),
        );

        let err = sender.send_text("15550001111", "hello").await.unwrap_err();
        assert!(matches!(err, DeliveryError::Timeout));
        assert_eq!(err.status_code(), 408);
    }

    #[tokio::test]
    async fn unreachable_host_is_a_500_class_failure() {
        let sender = WhatsAppSender::new(&test_config("http://127.0.0.1:1".into()));
        let err = sender.send_text("15550001111", "hello").await.unwrap_err();
        assert!(matches!(err, DeliveryError::Request(_)));
        assert_eq!(err.status_code(), 500);
    }
}
