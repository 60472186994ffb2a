use std::collections::HashMap;

use shared::domain::{AttachmentId, GuildId};

/// Lifecycle of a single media download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaFetch {
    InFlight,
    Ready(Vec<u8>),
    Failed(String),
}

/// Deduplicates media downloads by cache key. A key that is in flight, ready,
/// or failed is never requested again; re-fetching after a failure requires a
/// fresh session.
#[derive(Debug, Default)]
pub struct MediaCache {
    entries: HashMap<String, MediaFetch>,
}

impl MediaCache {
    pub fn status(&self, key: &str) -> Option<&MediaFetch> {
        self.entries.get(key)
    }

    pub fn bytes(&self, key: &str) -> Option<&[u8]> {
        match self.entries.get(key) {
            Some(MediaFetch::Ready(bytes)) => Some(bytes),
            _ => None,
        }
    }

    /// Claims the key for a new download. Returns false when the key is
    /// already claimed, in which case the caller must not start a request.
    pub fn begin(&mut self, key: &str) -> bool {
        if self.entries.contains_key(key) {
            return false;
        }
        self.entries.insert(key.to_string(), MediaFetch::InFlight);
        true
    }

    pub fn complete(&mut self, key: &str, result: Result<Vec<u8>, String>) {
        let outcome = match result {
            Ok(bytes) => MediaFetch::Ready(bytes),
            Err(error) => MediaFetch::Failed(error),
        };
        self.entries.insert(key.to_string(), outcome);
    }
}

pub fn icon_key(guild_id: &GuildId, icon_hash: &str) -> String {
    format!("icon:{guild_id}:{icon_hash}")
}

pub fn attachment_key(attachment_id: &AttachmentId) -> String {
    format!("attachment:{attachment_id}")
}

pub fn guild_icon_url(cdn_base: &str, guild_id: &GuildId, icon_hash: &str) -> String {
    format!("{cdn_base}/icons/{guild_id}/{icon_hash}.png?size=64")
}
