use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

id_newtype!(UserId);
id_newtype!(GuildId);
id_newtype!(ChannelId);
id_newtype!(MessageId);
id_newtype!(AttachmentId);

/// Backends send `null` where this client treats the field as "absent";
/// collapse both to the type's default instead of failing the decode.
fn null_to_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(from = "i64")]
pub enum ChannelKind {
    Text,
    Category,
    Other,
}

impl From<i64> for ChannelKind {
    fn from(raw: i64) -> Self {
        match raw {
            0 => ChannelKind::Text,
            4 => ChannelKind::Category,
            _ => ChannelKind::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    #[serde(default, deserialize_with = "null_to_default")]
    pub discriminator: String,
    #[serde(default, deserialize_with = "null_to_default")]
    pub avatar: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    #[serde(rename = "type")]
    pub kind: ChannelKind,
    #[serde(default)]
    pub guild_id: Option<GuildId>,
    #[serde(default, deserialize_with = "null_to_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_to_default")]
    pub position: i64,
    #[serde(default, deserialize_with = "null_to_default")]
    pub topic: String,
    #[serde(default)]
    pub last_message_id: Option<MessageId>,
    #[serde(default)]
    pub parent_id: Option<ChannelId>,
}

impl Channel {
    /// Update events often carry partial payloads; only non-empty incoming
    /// fields overwrite the existing ones.
    pub fn merge_update(&mut self, incoming: &Channel) {
        if !incoming.name.is_empty() {
            self.name = incoming.name.clone();
        }
        if !incoming.topic.is_empty() {
            self.topic = incoming.topic.clone();
        }
        if incoming.last_message_id.is_some() {
            self.last_message_id = incoming.last_message_id.clone();
        }
        if incoming.parent_id.is_some() {
            self.parent_id = incoming.parent_id.clone();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MessageReference {
    #[serde(default)]
    pub message_id: Option<MessageId>,
    #[serde(default)]
    pub channel_id: Option<ChannelId>,
    #[serde(default)]
    pub guild_id: Option<GuildId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Attachment {
    pub id: AttachmentId,
    #[serde(default, deserialize_with = "null_to_default")]
    pub filename: String,
    #[serde(default, deserialize_with = "null_to_default")]
    pub url: String,
    #[serde(default, deserialize_with = "null_to_default")]
    pub content_type: String,
    #[serde(default, deserialize_with = "null_to_default")]
    pub width: u32,
    #[serde(default, deserialize_with = "null_to_default")]
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub channel_id: ChannelId,
    #[serde(default)]
    pub guild_id: Option<GuildId>,
    pub author: User,
    #[serde(default, deserialize_with = "null_to_default")]
    pub content: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub message_reference: Option<MessageReference>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Guild {
    pub id: GuildId,
    #[serde(default, deserialize_with = "null_to_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_to_default")]
    pub icon: String,
    #[serde(default)]
    pub channels: Vec<Channel>,
}
