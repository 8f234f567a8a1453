use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::{json, Value};
use std::fmt;
use tracing::{info, instrument, warn};

use crate::config::Config;

/// Outbound messaging transport.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn deliver(&self, contact: &str, text: &str) -> Result<()>;
}

/// WhatsApp Cloud API client sending plain text messages.
#[derive(Clone)]
pub struct WhatsAppClient {
    http: Client,
    endpoint: Url,
    token: String,
}

impl fmt::Debug for WhatsAppClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WhatsAppClient")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl WhatsAppClient {
    pub fn new(
        base_url: &str,
        api_version: &str,
        phone_number_id: &str,
        token: String,
    ) -> Result<Self> {
        let endpoint = Url::parse(base_url)
            .and_then(|base| {
                base.join(&format!(
                    "{}/{}/messages",
                    api_version.trim_matches('/'),
                    phone_number_id.trim_matches('/')
                ))
            })
            .context("invalid WhatsApp endpoint")?;
        let http = Client::builder()
            .user_agent("farm-digest/0.1")
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            http,
            endpoint,
            token,
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        Self::new(
            &cfg.whatsapp.base_url,
            &cfg.whatsapp.api_version,
            &cfg.whatsapp.phone_number_id,
            cfg.whatsapp.token.clone(),
        )
    }

    pub fn build_request(&self, contact: &str, text: &str) -> Result<reqwest::Request> {
        self.http
            .post(self.endpoint.clone())
            .bearer_auth(&self.token)
            .json(&build_text_message(contact, text))
            .build()
            .context("failed to build WhatsApp request")
    }
}

#[async_trait]
impl Messenger for WhatsAppClient {
    #[instrument(skip_all, fields(contact = %contact))]
    async fn deliver(&self, contact: &str, text: &str) -> Result<()> {
        let request = self.build_request(contact, text)?;
        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach WhatsApp")?;
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        if !status.is_success() {
            warn!(%status, "WhatsApp API error");
            return Err(anyhow!("whatsapp error {}: {}", status, body));
        }
        if let Some(err) = response_error(&body) {
            warn!(%err, "WhatsApp rejected message");
            return Err(anyhow!("whatsapp rejected message: {}", err));
        }
        info!("message delivered");
        Ok(())
    }
}

pub fn build_text_message(contact: &str, text: &str) -> Value {
    json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": contact,
        "type": "text",
        "text": {
            "preview_url": false,
            "body": text,
        },
    })
}

/// An `error` member in an otherwise successful response body.
fn response_error(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value.get("error").map(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_message_body() {
        let body = build_text_message("923001112233", "hello");
        assert_eq!(body["messaging_product"], "whatsapp");
        assert_eq!(body["to"], "923001112233");
        assert_eq!(body["type"], "text");
        assert_eq!(body["text"]["preview_url"], false);
        assert_eq!(body["text"]["body"], "hello");
    }

    #[test]
    fn build_request_targets_phone_number_endpoint() {
        let client = WhatsAppClient::new(
            "https://graph.facebook.com/",
            "v20.0",
            "12345",
            "tok".into(),
        )
        .unwrap();
        let request = client.build_request("1", "hi").unwrap();
        assert_eq!(request.url().path(), "/v20.0/12345/messages");
        assert_eq!(
            request
                .headers()
                .get("Authorization")
                .and_then(|h| h.to_str().ok())
                .unwrap(),
            "Bearer tok"
        );
    }

    #[test]
    fn detects_error_member() {
        assert!(response_error(r#"{"error":{"message":"bad token"}}"#).is_some());
        assert!(response_error(r#"{"messages":[{"id":"wamid"}]}"#).is_none());
        assert!(response_error("").is_none());
    }
}
