use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use shared::domain::{AttachmentId, ChannelId, GuildId, MessageId};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

pub mod error;
pub mod gateway;
pub mod media;
pub mod rest;
pub mod router;
pub mod state;
pub mod task_queue;

pub use gateway::{Gateway, GatewayPhase};
pub use media::{MediaCache, MediaFetch};
pub use rest::{AttachmentUpload, RestClient};
pub use state::{ReplyContext, SessionState};
pub use task_queue::TaskQueue;

pub const DEFAULT_REST_BASE_URL: &str = "https://discord.com/api/v9";
pub const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";
pub const DEFAULT_CDN_BASE_URL: &str = "https://cdn.discordapp.com";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub token: String,
    pub rest_base_url: String,
    pub gateway_url: String,
    pub cdn_base_url: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            rest_base_url: DEFAULT_REST_BASE_URL.to_string(),
            gateway_url: DEFAULT_GATEWAY_URL.to_string(),
            cdn_base_url: DEFAULT_CDN_BASE_URL.to_string(),
        }
    }
}

/// The client facade: one gateway connection, one REST client, one task
/// queue, and the session state they all fold into.
///
/// Background work (gateway reads, REST completions, media downloads) never
/// touches `SessionState` directly. Each completion posts a closure to the
/// task queue; the owning thread drains the queue via [`ChatClient::process_tasks`]
/// and applies every mutation under the state lock, so readers only ever see
/// complete transitions.
pub struct ChatClient {
    config: ClientConfig,
    handle: Handle,
    gateway: Gateway,
    rest: RestClient,
    http: reqwest::Client,
    queue: Arc<TaskQueue>,
    state: Mutex<SessionState>,
    media: Mutex<MediaCache>,
}

impl ChatClient {
    pub fn new(config: ClientConfig, handle: Handle) -> Arc<Self> {
        let queue = Arc::new(TaskQueue::default());
        let http = reqwest::Client::new();
        let rest = RestClient::new(
            http.clone(),
            config.rest_base_url.clone(),
            config.token.clone(),
            handle.clone(),
        );

        Arc::new_cyclic(|weak: &std::sync::Weak<ChatClient>| {
            let dispatch_target = weak.clone();
            let gateway = Gateway::new(
                handle.clone(),
                Arc::new(move |event, data| {
                    let Some(client) = dispatch_target.upgrade() else {
                        return;
                    };
                    let queued = Arc::clone(&client);
                    client.queue.post(move || {
                        let mut state = queued.lock_state();
                        router::route_event(&mut state, &event, data);
                    });
                }),
            );
            ChatClient {
                config,
                handle: handle.clone(),
                gateway,
                rest,
                http,
                queue,
                state: Mutex::new(SessionState::default()),
                media: Mutex::new(MediaCache::default()),
            }
        })
    }

    /// Opens the gateway connection. Fails silently into a disconnected
    /// phase; there is no automatic reconnect.
    pub fn connect(&self) {
        self.gateway
            .connect(self.config.gateway_url.clone(), self.config.token.clone());
    }

    pub fn close(&self) {
        self.gateway.close();
    }

    pub fn gateway_phase(&self) -> GatewayPhase {
        self.gateway.phase()
    }

    /// Drains the task queue, applying every queued state fold. Must be
    /// called regularly from the thread that owns the session; tasks posted
    /// while a batch runs wait for the next call.
    pub fn process_tasks(&self) {
        self.queue.drain_and_run();
    }

    /// Runs `f` with the session state locked. The closure must not call
    /// back into the client; it only reads or mutates state.
    pub fn with_state<R>(&self, f: impl FnOnce(&SessionState) -> R) -> R {
        f(&self.lock_state())
    }

    /// Selects a guild and, when it has a text channel, kicks off a message
    /// fetch for the auto-selected one.
    pub fn select_guild(self: &Arc<Self>, guild_id: &GuildId) {
        let to_fetch = self.lock_state().select_guild(guild_id);
        info!(guild_id = %guild_id, "guild selected");
        if let Some(channel_id) = to_fetch {
            self.fetch_channel_messages(&channel_id);
        }
    }

    pub fn select_channel(self: &Arc<Self>, channel_id: &ChannelId) {
        self.lock_state().select_channel(channel_id);
        self.fetch_channel_messages(channel_id);
    }

    /// Fetches the channel's recent history and folds the result into state
    /// on the next `process_tasks` pass. Results for a channel the user has
    /// already navigated away from still land in that channel's history.
    pub fn fetch_channel_messages(self: &Arc<Self>, channel_id: &ChannelId) {
        let client = Arc::clone(self);
        let target = channel_id.clone();
        self.rest.fetch_messages(channel_id, move |success, body| {
            let queued = Arc::clone(&client);
            client.queue.post(move || {
                let mut state = queued.lock_state();
                router::fold_message_fetch(&mut state, &target, success, &body);
            });
        });
    }

    /// Re-pulls the guild list; name and icon updates merge into known
    /// guilds without touching their channel lists.
    pub fn refresh_guilds(self: &Arc<Self>) {
        let client = Arc::clone(self);
        self.rest.fetch_guilds(move |success, body| {
            if !success {
                warn!("guild list refresh failed");
                return;
            }
            let queued = Arc::clone(&client);
            client.queue.post(move || {
                let mut state = queued.lock_state();
                router::fold_guild_list(&mut state, &body);
            });
        });
    }

    pub fn refresh_channels(self: &Arc<Self>, guild_id: &GuildId) {
        let client = Arc::clone(self);
        let target = guild_id.clone();
        self.rest
            .fetch_guild_channels(guild_id, move |success, body| {
                if !success {
                    warn!(guild_id = %target, "channel list refresh failed");
                    return;
                }
                let queued = Arc::clone(&client);
                client.queue.post(move || {
                    let mut state = queued.lock_state();
                    router::fold_guild_channels(&mut state, &target, &body);
                });
            });
    }

    pub fn begin_reply(&self, reply: ReplyContext) {
        self.lock_state().begin_reply(reply);
    }

    pub fn clear_reply(&self) {
        self.lock_state().take_reply();
    }

    /// Sends a message to the current channel, consuming any pending reply
    /// context. Failures are logged with the response body; the echoed
    /// message itself arrives as a gateway dispatch.
    pub fn send_message(self: &Arc<Self>, content: &str, attachment: Option<AttachmentUpload>) {
        let (channel_id, reply) = {
            let mut state = self.lock_state();
            let Some(channel_id) = state.selection.current_channel_id.clone() else {
                warn!("send ignored: no channel selected");
                return;
            };
            (channel_id, state.take_reply())
        };
        let guild_id = reply.as_ref().and_then(|reply| reply.guild_id.clone());
        let reply_id = reply.map(|reply| reply.message_id);

        let failed_channel = channel_id.clone();
        let on_result = move |success: bool, body: Value| {
            if !success {
                warn!(channel_id = %failed_channel, %body, "message send failed");
            }
        };

        match attachment {
            Some(upload) => self.rest.send_attachment_message(
                &channel_id,
                content,
                guild_id.as_ref(),
                reply_id.as_ref(),
                upload,
                on_result,
            ),
            None => self.rest.send_message(
                &channel_id,
                content,
                guild_id.as_ref(),
                reply_id.as_ref(),
                on_result,
            ),
        }
    }

    /// Fire-and-forget read receipt.
    pub fn mark_read(&self, channel_id: &ChannelId, message_id: &MessageId) {
        self.rest.ack_message(channel_id, message_id);
    }

    /// Starts a guild icon download unless the icon is already cached or in
    /// flight. The bytes land in the media cache on the next task pass.
    pub fn request_guild_icon(self: &Arc<Self>, guild_id: &GuildId, icon_hash: &str) {
        let key = media::icon_key(guild_id, icon_hash);
        let url = media::guild_icon_url(&self.config.cdn_base_url, guild_id, icon_hash);
        self.request_media(key, url);
    }

    /// Same dedup contract as icons, keyed by the attachment id.
    pub fn request_attachment(self: &Arc<Self>, attachment_id: &AttachmentId, url: &str) {
        self.request_media(media::attachment_key(attachment_id), url.to_string());
    }

    pub fn media_status(&self, key: &str) -> Option<MediaFetch> {
        self.lock_media().status(key).cloned()
    }

    fn request_media(self: &Arc<Self>, key: String, url: String) {
        if !self.lock_media().begin(&key) {
            debug!(%key, "media request deduplicated");
            return;
        }
        let client = Arc::clone(self);
        let http = self.http.clone();
        self.handle.spawn(async move {
            let result = match http.get(&url).send().await {
                Ok(response) if response.status().is_success() => match response.bytes().await {
                    Ok(bytes) => Ok(bytes.to_vec()),
                    Err(err) => Err(err.to_string()),
                },
                Ok(response) => Err(format!("media fetch returned {}", response.status())),
                Err(err) => Err(err.to_string()),
            };
            if let Err(error) = &result {
                warn!(%url, %error, "media download failed");
            }
            let queued = Arc::clone(&client);
            client.queue.post(move || {
                queued.lock_media().complete(&key, result);
            });
        });
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_media(&self) -> MutexGuard<'_, MediaCache> {
        self.media.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
