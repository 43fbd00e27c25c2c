use std::env;

use anyhow::{anyhow, Result};

const DEFAULT_GRAPH_BASE_URL: &str = "https://graph.facebook.com";
const DEFAULT_GRAPH_VERSION: &str = "v17.0";

/// Process-wide configuration, read once at startup.  Missing required
/// values abort startup with the offending variable named; nothing here is
/// re-read per request.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Graph API bearer token used by the outbound sender.
    pub access_token: String,
    /// Graph API version segment of the messages URL.
    pub graph_version: String,
    /// Numeric phone-number id owning the WhatsApp business number.
    pub phone_number_id: String,
    /// Graph API origin. Overridable for local testing.
    pub graph_base_url: String,
    /// Chat-completion endpoint URL.
    pub completion_endpoint: String,
    /// Bearer key for the completion endpoint.
    pub completion_api_key: String,
    /// Model / deployment name sent in the completion payload.
    pub deployment_name: String,
    /// Secret for the webhook verification handshake.
    pub verify_token: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            access_token: require("ACCESS_TOKEN")?,
            graph_version: env::var("VERSION")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_GRAPH_VERSION.to_string()),
            phone_number_id: require("PHONE_NUMBER_ID")?,
            graph_base_url: env::var("GRAPH_BASE_URL")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_GRAPH_BASE_URL.to_string()),
            completion_endpoint: require("ENDPOINT_URL")?,
            completion_api_key: require("PHI_API_KEY")?,
            deployment_name: require("DEPLOYMENT_NAME")?,
            verify_token: require("VERIFY_TOKEN")?,
        })
    }
}

fn require(var: &str) -> Result<String> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        Ok(_) => Err(anyhow!("{} is set but empty", var)),
        Err(env::VarError::NotPresent) => Err(anyhow!("{} environment variable is not set", var)),
        Err(err) => Err(err.into()),
    }
}
