// Telegram Bot API client keeping the single notification message up to
// date: sendPhoto creates it, editMessageMedia refreshes it,
// editMessageCaption finalizes it without replacing the image.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::json;

use crate::monitor::Messenger;

pub(crate) const API_URL: &str = "https://api.telegram.org";
const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

/// Delivery failures are absorbed by the retry executor; nothing here is
/// terminal short of process shutdown.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("telegram request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("telegram API error: {0}")]
    Api(String),
    #[error("telegram response decode failed: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    result: serde_json::Value,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

pub struct TelegramClient {
    http: reqwest::Client,
    token: String,
    chat_id: i64,
    thread_id: Option<i64>,
}

impl TelegramClient {
    pub fn new(
        token: String,
        chat_id: i64,
        thread_id: Option<i64>,
    ) -> Result<TelegramClient, DeliveryError> {
        let http = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(TelegramClient {
            http,
            token,
            chat_id,
            thread_id,
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", API_URL, self.token, method)
    }

    fn keyboard(text: &str, url: &str) -> serde_json::Value {
        json!({ "inline_keyboard": [[{ "text": text, "url": url }]] })
    }

    async fn fetch_image(&self, url: &str) -> Result<Vec<u8>, DeliveryError> {
        let resp = self.http.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(DeliveryError::Api(format!(
                "image download failed: status {}",
                resp.status()
            )));
        }
        Ok(resp.bytes().await?.to_vec())
    }

    async fn check(resp: reqwest::Response) -> Result<ApiResponse, DeliveryError> {
        let body: ApiResponse = resp.json().await?;
        if !body.ok {
            return Err(DeliveryError::Api(
                body.description
                    .unwrap_or_else(|| "no error description".to_string()),
            ));
        }
        Ok(body)
    }
}

#[async_trait]
impl Messenger for TelegramClient {
    async fn post(
        &self,
        photo_url: &str,
        caption: &str,
        link_url: &str,
        link_label: &str,
    ) -> Result<i64, DeliveryError> {
        let image = self.fetch_image(photo_url).await?;

        let mut form = Form::new()
            .text("chat_id", self.chat_id.to_string())
            .text("caption", caption.to_string())
            .text("parse_mode", "HTML");
        if let Some(thread_id) = self.thread_id {
            form = form.text("message_thread_id", thread_id.to_string());
        }
        if !link_url.is_empty() {
            form = form.text(
                "reply_markup",
                Self::keyboard(link_label, link_url).to_string(),
            );
        }
        form = form.part("photo", Part::bytes(image).file_name("thumbnail.jpg"));

        let resp = self
            .http
            .post(self.method_url("sendPhoto"))
            .multipart(form)
            .send()
            .await?;
        let body = Self::check(resp).await?;
        let sent: SentMessage = serde_json::from_value(body.result)?;
        Ok(sent.message_id)
    }

    async fn edit(
        &self,
        message_id: i64,
        photo_url: &str,
        caption: &str,
        link_url: &str,
        link_label: &str,
    ) -> Result<(), DeliveryError> {
        let image = self.fetch_image(photo_url).await?;

        let media = json!({
            "type": "photo",
            "media": "attach://photo",
            "caption": caption,
            "parse_mode": "HTML",
        });

        let mut form = Form::new()
            .text("chat_id", self.chat_id.to_string())
            .text("message_id", message_id.to_string())
            .text("media", media.to_string());
        if !link_url.is_empty() {
            form = form.text(
                "reply_markup",
                Self::keyboard(link_label, link_url).to_string(),
            );
        }
        form = form.part("photo", Part::bytes(image).file_name("thumbnail.jpg"));

        let resp = self
            .http
            .post(self.method_url("editMessageMedia"))
            .multipart(form)
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn finalize(
        &self,
        message_id: i64,
        caption: &str,
        link_url: &str,
        link_label: &str,
    ) -> Result<(), DeliveryError> {
        let mut payload = json!({
            "chat_id": self.chat_id,
            "message_id": message_id,
            "caption": caption,
            "parse_mode": "HTML",
        });
        if !link_url.is_empty() {
            payload["reply_markup"] = Self::keyboard(link_label, link_url);
        }

        let resp = self
            .http
            .post(self.method_url("editMessageCaption"))
            .json(&payload)
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn keyboard_is_a_single_url_button() {
        let kb = TelegramClient::keyboard("Watch", "https://twitch.tv/somechannel");
        assert_eq!(
            kb.to_string(),
            r#"{"inline_keyboard":[[{"text":"Watch","url":"https://twitch.tv/somechannel"}]]}"#
        );
    }

    #[test]
    fn api_error_carries_the_description() {
        let json = r#"{"ok":false,"error_code":400,"description":"Bad Request: chat not found"}"#;
        let resp: ApiResponse = serde_json::from_str(json).expect("valid error envelope");
        assert!(!resp.ok);
        assert_eq!(
            resp.description.as_deref(),
            Some("Bad Request: chat not found")
        );
    }

    #[test]
    fn sent_message_id_from_result() {
        let json = r#"{"ok":true,"result":{"message_id":4211,"chat":{"id":-100123,"type":"supergroup"}}}"#;
        let resp: ApiResponse = serde_json::from_str(json).expect("valid envelope");
        let sent: SentMessage = serde_json::from_value(resp.result).expect("message payload");
        assert_eq!(sent.message_id, 4211);
    }
}
