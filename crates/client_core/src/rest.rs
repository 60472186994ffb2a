use reqwest::{header, Method, StatusCode};
use serde_json::{json, Value};
use shared::{
    domain::{ChannelId, GuildId, MessageId},
    protocol::{
        AttachmentSlotFile, AttachmentSlotRef, AttachmentSlotRequest, AttachmentSlotResponse,
        AckRequest, MessageReferencePayload, SendMessageRequest,
    },
};
use tokio::runtime::Handle;
use tracing::warn;
use uuid::Uuid;

pub const USER_AGENT: &str = "Ferrocord/1.0";

/// Invoked exactly once with a success flag and the best-effort decoded
/// response body (`Value::Null` when the body is empty or unparseable).
pub type ResponseCallback = Box<dyn FnOnce(bool, Value) + Send + 'static>;

/// File contents to attach to an outgoing message.
#[derive(Debug, Clone)]
pub struct AttachmentUpload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Fire-and-forget REST layer. Every operation returns immediately and runs
/// on its own short-lived task; no ordering is guaranteed between distinct
/// calls, even to the same channel.
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    handle: Handle,
}

impl RestClient {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        token: impl Into<String>,
        handle: Handle,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            token: token.into(),
            handle,
        }
    }

    pub fn fetch_messages<F>(&self, channel_id: &ChannelId, callback: F)
    where
        F: FnOnce(bool, Value) + Send + 'static,
    {
        self.request(
            Method::GET,
            format!("/channels/{channel_id}/messages?limit=50"),
            None,
            Some(Box::new(callback)),
        );
    }

    pub fn fetch_guilds<F>(&self, callback: F)
    where
        F: FnOnce(bool, Value) + Send + 'static,
    {
        self.request(
            Method::GET,
            "/users/@me/guilds".to_string(),
            None,
            Some(Box::new(callback)),
        );
    }

    pub fn fetch_guild_channels<F>(&self, guild_id: &GuildId, callback: F)
    where
        F: FnOnce(bool, Value) + Send + 'static,
    {
        self.request(
            Method::GET,
            format!("/guilds/{guild_id}/channels"),
            None,
            Some(Box::new(callback)),
        );
    }

    /// Marks a message read. The backend wants a literal null token and the
    /// reference client never looked at the response, so neither do we.
    pub fn ack_message(&self, channel_id: &ChannelId, message_id: &MessageId) {
        let body = serde_json::to_value(AckRequest { token: None }).unwrap_or(Value::Null);
        self.request(
            Method::POST,
            format!("/channels/{channel_id}/messages/{message_id}/ack"),
            Some(body),
            None,
        );
    }

    pub fn send_message<F>(
        &self,
        channel_id: &ChannelId,
        content: &str,
        guild_id: Option<&GuildId>,
        reply_id: Option<&MessageId>,
        callback: F,
    ) where
        F: FnOnce(bool, Value) + Send + 'static,
    {
        let request = SendMessageRequest {
            content: content.to_string(),
            tts: false,
            nonce: Uuid::new_v4().to_string(),
            attachments: None,
            message_reference: message_reference(channel_id, guild_id, reply_id),
        };
        let body = match serde_json::to_value(&request) {
            Ok(body) => body,
            Err(err) => {
                warn!(error = %err, "failed to encode send-message payload");
                callback(false, Value::Null);
                return;
            }
        };
        self.request(
            Method::POST,
            format!("/channels/{channel_id}/messages"),
            Some(body),
            Some(Box::new(callback)),
        );
    }

    /// Three-step upload saga: reserve an upload slot, stream the raw bytes
    /// to the returned target, then post the message linking the slot.
    /// Failure at step one or two aborts without posting; an
    /// already-uploaded-but-unlinked blob is not cleaned up.
    pub fn send_attachment_message<F>(
        &self,
        channel_id: &ChannelId,
        content: &str,
        guild_id: Option<&GuildId>,
        reply_id: Option<&MessageId>,
        upload: AttachmentUpload,
        callback: F,
    ) where
        F: FnOnce(bool, Value) + Send + 'static,
    {
        let http = self.http.clone();
        let token = self.token.clone();
        let base_url = self.base_url.clone();
        let channel_id = channel_id.clone();
        let reference = message_reference(&channel_id, guild_id, reply_id);
        let content = content.to_string();

        self.handle.spawn(async move {
            let slot_request = AttachmentSlotRequest {
                files: vec![AttachmentSlotFile {
                    filename: upload.filename.clone(),
                    file_size: upload.bytes.len() as u64,
                    id: "1".to_string(),
                }],
            };
            let slot_url = format!("{base_url}/channels/{channel_id}/attachments");
            let slot = match http
                .post(&slot_url)
                .header(header::AUTHORIZATION, &token)
                .header(header::USER_AGENT, USER_AGENT)
                .json(&slot_request)
                .send()
                .await
            {
                Ok(response) if response.status().is_success() => {
                    let first_slot = response
                        .json::<AttachmentSlotResponse>()
                        .await
                        .ok()
                        .and_then(|decoded| decoded.attachments.into_iter().next());
                    match first_slot {
                        Some(slot) => slot,
                        None => {
                            callback(false, error_body("failed to decode upload slot"));
                            return;
                        }
                    }
                }
                Ok(response) => {
                    warn!(status = %response.status(), "upload slot request rejected");
                    callback(false, error_body("failed to reserve upload slot"));
                    return;
                }
                Err(err) => {
                    warn!(error = %err, "upload slot request failed");
                    callback(false, error_body("failed to reserve upload slot"));
                    return;
                }
            };

            let uploaded = http
                .put(&slot.upload_url)
                .body(upload.bytes)
                .send()
                .await
                .map(|response| response.status().is_success())
                .unwrap_or(false);
            if !uploaded {
                warn!(upload_url = %slot.upload_url, "attachment byte upload failed");
                callback(false, error_body("failed to stream attachment bytes"));
                return;
            }

            let request = SendMessageRequest {
                content,
                tts: false,
                nonce: Uuid::new_v4().to_string(),
                attachments: Some(vec![AttachmentSlotRef {
                    id: "0".to_string(),
                    filename: upload.filename,
                    uploaded_filename: slot.upload_filename,
                }]),
                message_reference: reference,
            };
            let message_url = format!("{base_url}/channels/{channel_id}/messages");
            let (success, body) = perform(&http, &token, Method::POST, &message_url, Some(&request)).await;
            callback(success, body);
        });
    }

    fn request(
        &self,
        method: Method,
        endpoint: String,
        body: Option<Value>,
        callback: Option<ResponseCallback>,
    ) {
        let http = self.http.clone();
        let token = self.token.clone();
        let url = format!("{}{endpoint}", self.base_url);
        self.handle.spawn(async move {
            let (success, value) = perform(&http, &token, method, &url, body.as_ref()).await;
            if let Some(callback) = callback {
                callback(success, value);
            }
        });
    }
}

async fn perform<B: serde::Serialize>(
    http: &reqwest::Client,
    token: &str,
    method: Method,
    url: &str,
    body: Option<&B>,
) -> (bool, Value) {
    let mut request = http
        .request(method, url)
        .header(header::AUTHORIZATION, token)
        .header(header::USER_AGENT, USER_AGENT)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(body) = body {
        request = request.json(body);
    }
    match request.send().await {
        Ok(response) => {
            let status = response.status();
            let value = response.json::<Value>().await.unwrap_or(Value::Null);
            if !status.is_success() && status != StatusCode::NOT_FOUND {
                warn!(%url, %status, "rest call rejected");
            }
            (status.is_success(), value)
        }
        Err(err) => {
            warn!(%url, error = %err, "rest call failed");
            (false, Value::Null)
        }
    }
}

fn error_body(message: &str) -> Value {
    json!({ "error": message })
}

fn message_reference(
    channel_id: &ChannelId,
    guild_id: Option<&GuildId>,
    reply_id: Option<&MessageId>,
) -> Option<MessageReferencePayload> {
    reply_id.map(|message_id| MessageReferencePayload {
        message_id: message_id.clone(),
        channel_id: channel_id.clone(),
        guild_id: guild_id.cloned(),
    })
}

#[cfg(test)]
#[path = "tests/rest_tests.rs"]
mod tests;
