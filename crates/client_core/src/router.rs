use serde_json::Value;
use shared::{
    domain::{Channel, ChannelId, Guild, GuildId, Message},
    error::ApiErrorBody,
};
use tracing::{debug, warn};

use crate::state::SessionState;

/// Error shown when a channel fetch fails and the backend gave no message.
const CHANNEL_ACCESS_DENIED: &str = "No Access";

/// Folds a dispatch payload into the session state. Runs on the consumer
/// thread via a posted task, with the state lock already held by the caller.
pub fn route_event(state: &mut SessionState, event: &str, data: Value) {
    match event {
        "READY" => on_ready(state, data),
        "GUILD_CREATE" => on_guild_create(state, data),
        "MESSAGE_CREATE" => on_message_create(state, data),
        "CHANNEL_UPDATE" => on_channel_update(state, data),
        other => debug!(event = other, "ignoring unhandled dispatch event"),
    }
}

fn on_ready(state: &mut SessionState, data: Value) {
    let Some(entries) = data.get("guilds").and_then(Value::as_array) else {
        warn!("READY payload carried no guild array");
        return;
    };

    // READY may include partial/unavailable guilds; skip those individually
    // instead of dropping the whole batch.
    let mut guilds = Vec::with_capacity(entries.len());
    for entry in entries {
        match serde_json::from_value::<Guild>(entry.clone()) {
            Ok(guild) => guilds.push(guild),
            Err(err) => warn!(error = %err, "skipping undecodable guild in READY"),
        }
    }
    debug!(guilds = guilds.len(), "session ready");
    state.replace_guilds(guilds);
}

fn on_guild_create(state: &mut SessionState, data: Value) {
    match serde_json::from_value::<Guild>(data) {
        Ok(guild) => state.upsert_guild(guild),
        Err(err) => warn!(error = %err, "dropping undecodable GUILD_CREATE payload"),
    }
}

fn on_message_create(state: &mut SessionState, data: Value) {
    match serde_json::from_value::<Message>(data) {
        Ok(message) => state.append_message(message),
        Err(err) => warn!(error = %err, "dropping undecodable MESSAGE_CREATE payload"),
    }
}

fn on_channel_update(state: &mut SessionState, data: Value) {
    let incoming = match serde_json::from_value::<Channel>(data) {
        Ok(channel) => channel,
        Err(err) => {
            warn!(error = %err, "dropping undecodable CHANNEL_UPDATE payload");
            return;
        }
    };
    let Some(guild_id) = incoming.guild_id.clone() else {
        debug!(channel_id = %incoming.id, "CHANNEL_UPDATE without guild id ignored");
        return;
    };
    if !state.update_channel(&guild_id, &incoming) {
        debug!(
            guild_id = %guild_id,
            channel_id = %incoming.id,
            "CHANNEL_UPDATE for unknown guild or channel ignored"
        );
    }
}

/// Folds a message-fetch result into the state. The backend returns messages
/// newest first; the session stores them oldest first.
pub fn fold_message_fetch(
    state: &mut SessionState,
    channel_id: &ChannelId,
    success: bool,
    body: &Value,
) {
    if !success {
        let error = ApiErrorBody::message_from(body)
            .unwrap_or_else(|| CHANNEL_ACCESS_DENIED.to_string());
        warn!(channel_id = %channel_id, error = %error, "channel fetch failed");
        state.set_channel_error(channel_id, error);
        return;
    }

    let mut messages = Vec::new();
    if let Some(entries) = body.as_array() {
        for entry in entries.iter().rev() {
            match serde_json::from_value::<Message>(entry.clone()) {
                Ok(message) => messages.push(message),
                Err(err) => warn!(error = %err, "skipping undecodable fetched message"),
            }
        }
    }
    state.replace_messages(channel_id, messages);
}

/// Folds a guild-list refresh: name/icon updates merge into known guilds
/// without clobbering their channel lists.
pub fn fold_guild_list(state: &mut SessionState, body: &Value) {
    let Some(entries) = body.as_array() else {
        warn!("guild list response was not an array");
        return;
    };
    for entry in entries {
        match serde_json::from_value::<Guild>(entry.clone()) {
            Ok(guild) => state.merge_guild_summary(guild),
            Err(err) => warn!(error = %err, "skipping undecodable guild in list response"),
        }
    }
}

/// Folds a guild-channels refresh, replacing the guild's channel list.
pub fn fold_guild_channels(state: &mut SessionState, guild_id: &GuildId, body: &Value) {
    let Some(entries) = body.as_array() else {
        warn!(guild_id = %guild_id, "channel list response was not an array");
        return;
    };
    let mut channels = Vec::with_capacity(entries.len());
    for entry in entries {
        match serde_json::from_value::<Channel>(entry.clone()) {
            Ok(channel) => channels.push(channel),
            Err(err) => warn!(error = %err, "skipping undecodable channel in list response"),
        }
    }
    if !state.replace_guild_channels(guild_id, channels) {
        debug!(guild_id = %guild_id, "channel list for unknown guild ignored");
    }
}

#[cfg(test)]
#[path = "tests/router_tests.rs"]
mod tests;
