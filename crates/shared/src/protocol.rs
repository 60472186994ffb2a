use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{ChannelId, GuildId, MessageId};

/// Gateway operation codes this client reacts to. Anything else is ignored.
pub mod opcode {
    pub const DISPATCH: u8 = 0;
    pub const HEARTBEAT: u8 = 1;
    pub const IDENTIFY: u8 = 2;
    pub const HELLO: u8 = 10;
    pub const HEARTBEAT_ACK: u8 = 11;
}

/// Capability bitmask sent with IDENTIFY: guild messages plus message content.
pub const IDENTIFY_INTENTS: u64 = 33280;

/// Control envelope framing every gateway message, inbound and outbound.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayEnvelope {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
    #[serde(default)]
    pub s: Option<u64>,
    #[serde(default)]
    pub t: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HelloPayload {
    pub heartbeat_interval: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct IdentifyProperties {
    #[serde(rename = "$os")]
    pub os: String,
    #[serde(rename = "$browser")]
    pub browser: String,
    #[serde(rename = "$device")]
    pub device: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct IdentifyPayload {
    pub token: String,
    pub intents: u64,
    pub properties: IdentifyProperties,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageReferencePayload {
    pub message_id: MessageId,
    pub channel_id: ChannelId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<GuildId>,
}

/// Reference to an already-uploaded attachment slot, linked by the final
/// send-message call of the upload saga.
#[derive(Debug, Clone, Serialize)]
pub struct AttachmentSlotRef {
    pub id: String,
    pub filename: String,
    pub uploaded_filename: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendMessageRequest {
    pub content: String,
    pub tts: bool,
    pub nonce: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<AttachmentSlotRef>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_reference: Option<MessageReferencePayload>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttachmentSlotFile {
    pub filename: String,
    pub file_size: u64,
    pub id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttachmentSlotRequest {
    pub files: Vec<AttachmentSlotFile>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttachmentSlot {
    pub upload_url: String,
    pub upload_filename: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttachmentSlotResponse {
    pub attachments: Vec<AttachmentSlot>,
}

/// Mark-read acknowledgement body; the backend expects a literal null token.
#[derive(Debug, Clone, Serialize)]
pub struct AckRequest {
    pub token: Option<String>,
}
