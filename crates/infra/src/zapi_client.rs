use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use reqwest::StatusCode;
use serde_json::{Map, Value, json};
use threadline_domain::DomainResult;
use threadline_domain::error::DomainError;
use threadline_domain::messages::MessageType;
use threadline_domain::ports::BoxFuture;
use threadline_domain::ports::provider::{MessagingProvider, ProviderReceipt, ProviderSendRequest};

use crate::config::AppConfig;

const CLIENT_TOKEN_HEADER: &str = "Client-Token";
pub const PROVIDER_SEND_TOTAL: &str = "threadline_provider_send_total";
pub const PROVIDER_SEND_DURATION_SECONDS: &str = "threadline_provider_send_duration_seconds";

#[derive(Debug, thiserror::Error)]
pub enum ZapiError {
    #[error("z-api client configuration error: {0}")]
    Configuration(String),
    #[error("z-api rejected the request ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("z-api upstream error ({status}): {body}")]
    Upstream { status: u16, body: String },
    #[error("z-api transport error: {0}")]
    Transport(String),
    #[error("z-api response decode error: {0}")]
    InvalidResponse(String),
}

impl From<ZapiError> for DomainError {
    fn from(err: ZapiError) -> Self {
        DomainError::Provider(err.to_string())
    }
}

/// Z-API HTTP client. Sends exactly one request per call; deduplication and
/// retries live in the outbox.
#[derive(Debug, Clone)]
pub struct ZapiClient {
    http: reqwest::Client,
    base_url: String,
    instance_id: String,
    token: String,
    client_token: Option<String>,
}

impl ZapiClient {
    pub fn from_config(config: &AppConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.zapi_timeout_ms.max(1)))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        let client_token = config.zapi_client_token.trim();
        Self {
            http,
            base_url: config.zapi_base_url.trim_end_matches('/').to_string(),
            instance_id: config.zapi_instance_id.trim().to_string(),
            token: config.zapi_token.trim().to_string(),
            client_token: (!client_token.is_empty()).then(|| client_token.to_string()),
        }
    }

    fn endpoint(&self, path: &str) -> Result<String, ZapiError> {
        if self.instance_id.is_empty() || self.token.is_empty() {
            return Err(ZapiError::Configuration(
                "zapi_instance_id and zapi_token are required".into(),
            ));
        }
        Ok(format!(
            "{}/instances/{}/token/{}/{path}",
            self.base_url, self.instance_id, self.token
        ))
    }

    async fn post(&self, path: &str, body: &Value) -> Result<ProviderReceipt, ZapiError> {
        let url = self.endpoint(path)?;
        let mut request = self
            .http
            .post(&url)
            .header("accept", "application/json")
            .json(body);
        if let Some(client_token) = &self.client_token {
            request = request.header(CLIENT_TOKEN_HEADER, client_token);
        }

        let response = request
            .send()
            .await
            .map_err(|err| ZapiError::Transport(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status {
                StatusCode::BAD_REQUEST
                | StatusCode::UNAUTHORIZED
                | StatusCode::FORBIDDEN
                | StatusCode::NOT_FOUND => ZapiError::Rejected {
                    status: status.as_u16(),
                    body,
                },
                _ => ZapiError::Upstream {
                    status: status.as_u16(),
                    body,
                },
            });
        }
        let body = response
            .json::<Value>()
            .await
            .map_err(|err| ZapiError::InvalidResponse(err.to_string()))?;
        receipt_from_body(&body)
    }
}

/// Z-API wants bare digits for phone recipients and the full id otherwise.
fn zapi_phone(recipient: &str) -> String {
    recipient
        .strip_suffix("@s.whatsapp.net")
        .or_else(|| recipient.strip_suffix("@c.us"))
        .unwrap_or(recipient)
        .to_string()
}

/// Endpoint path and JSON body for one send.
pub fn build_send(request: &ProviderSendRequest) -> Result<(&'static str, Value), ZapiError> {
    let mut body = Map::new();
    body.insert("phone".into(), json!(zapi_phone(&request.recipient)));
    let caption = Some(request.content.trim()).filter(|text| !text.is_empty());
    let media_url = request
        .media_url
        .as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty());
    let require_media = || {
        media_url.ok_or_else(|| {
            ZapiError::Configuration(format!(
                "{} messages require a media url",
                request.message_type.as_str()
            ))
        })
    };

    let path = match request.message_type {
        MessageType::Text => {
            body.insert("message".into(), json!(request.content));
            "send-text"
        }
        MessageType::Image => {
            body.insert("image".into(), json!(require_media()?));
            if let Some(caption) = caption {
                body.insert("caption".into(), json!(caption));
            }
            "send-image"
        }
        MessageType::Video => {
            body.insert("video".into(), json!(require_media()?));
            if let Some(caption) = caption {
                body.insert("caption".into(), json!(caption));
            }
            "send-video"
        }
        MessageType::Audio => {
            body.insert("audio".into(), json!(require_media()?));
            "send-audio"
        }
        MessageType::Document => {
            body.insert("document".into(), json!(require_media()?));
            body.insert("fileName".into(), json!(caption.unwrap_or("document")));
            "send-document"
        }
    };
    Ok((path, Value::Object(body)))
}

fn receipt_from_body(body: &Value) -> Result<ProviderReceipt, ZapiError> {
    ["messageId", "zapiMessageId", "id"]
        .iter()
        .find_map(|field| body.get(*field).and_then(Value::as_str))
        .filter(|id| !id.is_empty())
        .map(|id| ProviderReceipt {
            provider_message_id: id.to_string(),
        })
        .ok_or_else(|| ZapiError::InvalidResponse(format!("no message id in {body}")))
}

impl MessagingProvider for ZapiClient {
    fn name(&self) -> &'static str {
        "zapi"
    }

    fn send(&self, request: &ProviderSendRequest) -> BoxFuture<'_, DomainResult<ProviderReceipt>> {
        let request = request.clone();
        Box::pin(async move {
            let (path, body) = build_send(&request)?;
            let started = Instant::now();
            let result = self.post(path, &body).await;
            let outcome = if result.is_ok() { "sent" } else { "failed" };
            counter!(PROVIDER_SEND_TOTAL, "provider" => "zapi", "outcome" => outcome).increment(1);
            histogram!(PROVIDER_SEND_DURATION_SECONDS, "provider" => "zapi")
                .record(started.elapsed().as_secs_f64());
            if let Err(err) = &result {
                tracing::warn!(
                    path,
                    idempotency_key = %request.idempotency_key,
                    error = %err,
                    "z-api send failed"
                );
            }
            Ok(result?)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(message_type: MessageType, content: &str, media_url: Option<&str>) -> ProviderSendRequest {
        ProviderSendRequest {
            recipient: "558197438430@s.whatsapp.net".into(),
            message_type,
            content: content.into(),
            media_url: media_url.map(str::to_string),
            idempotency_key: "k".into(),
        }
    }

    #[test]
    fn text_goes_to_send_text_with_bare_phone() {
        let (path, body) = build_send(&request(MessageType::Text, "oi", None)).unwrap();
        assert_eq!(path, "send-text");
        assert_eq!(body, json!({ "phone": "558197438430", "message": "oi" }));
    }

    #[test]
    fn lid_recipients_are_passed_through() {
        let mut send = request(MessageType::Text, "oi", None);
        send.recipient = "144723385778292@lid".into();
        let (_, body) = build_send(&send).unwrap();
        assert_eq!(body["phone"], "144723385778292@lid");
    }

    #[test]
    fn image_carries_caption_and_url() {
        let (path, body) =
            build_send(&request(MessageType::Image, "foto", Some("https://cdn/a.jpg"))).unwrap();
        assert_eq!(path, "send-image");
        assert_eq!(body["image"], "https://cdn/a.jpg");
        assert_eq!(body["caption"], "foto");
    }

    #[test]
    fn media_without_url_is_rejected() {
        assert!(matches!(
            build_send(&request(MessageType::Audio, "", None)),
            Err(ZapiError::Configuration(_))
        ));
    }

    #[test]
    fn receipt_prefers_message_id() {
        let receipt =
            receipt_from_body(&json!({ "zaapId": "z", "messageId": "m", "id": "i" })).unwrap();
        assert_eq!(receipt.provider_message_id, "m");
        assert!(receipt_from_body(&json!({ "zaapId": "z" })).is_err());
    }
}
