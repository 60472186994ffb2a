use std::collections::HashMap;

use shared::domain::{Channel, ChannelId, ChannelKind, Guild, GuildId, Message, MessageId};

/// Reply the user is currently composing against.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplyContext {
    pub message_id: MessageId,
    pub username: String,
    pub content: String,
    pub guild_id: Option<GuildId>,
}

#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub current_guild_id: Option<GuildId>,
    pub current_channel_id: Option<ChannelId>,
    /// Load error for the current channel; mutually exclusive with a
    /// populated message list for that channel.
    pub channel_error: Option<String>,
    pub reply: Option<ReplyContext>,
}

/// Authoritative session aggregate. Mutated only by tasks running on the
/// consumer thread while the owning lock is held; the UI reads snapshots
/// under the same lock.
///
/// `guilds` stays private so every mutation goes through a method that
/// rebuilds the id index before the borrow ends.
#[derive(Debug, Default)]
pub struct SessionState {
    guilds: Vec<Guild>,
    guild_index: HashMap<GuildId, usize>,
    pub messages: HashMap<ChannelId, Vec<Message>>,
    pub selection: Selection,
}

impl SessionState {
    pub fn guilds(&self) -> &[Guild] {
        &self.guilds
    }

    pub fn guild(&self, guild_id: &GuildId) -> Option<&Guild> {
        self.guild_index
            .get(guild_id)
            .and_then(|&index| self.guilds.get(index))
    }

    pub fn channel(&self, guild_id: &GuildId, channel_id: &ChannelId) -> Option<&Channel> {
        self.guild(guild_id)?
            .channels
            .iter()
            .find(|channel| &channel.id == channel_id)
    }

    /// Replaces the guild list wholesale, preserving the payload order.
    pub fn replace_guilds(&mut self, guilds: Vec<Guild>) {
        self.guilds = guilds;
        self.rebuild_guild_index();
    }

    /// Same id replaces the entry in place (position unchanged); a new id is
    /// appended at the end of the display order.
    pub fn upsert_guild(&mut self, guild: Guild) {
        match self.guild_index.get(&guild.id) {
            Some(&index) => self.guilds[index] = guild,
            None => self.guilds.push(guild),
        }
        self.rebuild_guild_index();
    }

    /// Folds a guild-list refresh into existing entries: name and icon are
    /// updated, already-known channel lists are kept. Unknown guilds are
    /// appended with whatever channels the payload carried.
    pub fn merge_guild_summary(&mut self, guild: Guild) {
        match self.guild_index.get(&guild.id) {
            Some(&index) => {
                let existing = &mut self.guilds[index];
                existing.name = guild.name;
                existing.icon = guild.icon;
            }
            None => self.guilds.push(guild),
        }
        self.rebuild_guild_index();
    }

    pub fn replace_guild_channels(&mut self, guild_id: &GuildId, channels: Vec<Channel>) -> bool {
        let Some(&index) = self.guild_index.get(guild_id) else {
            return false;
        };
        self.guilds[index].channels = channels;
        true
    }

    /// Applies a partial channel update. Returns false when the guild or
    /// channel is unknown.
    pub fn update_channel(&mut self, guild_id: &GuildId, incoming: &Channel) -> bool {
        let Some(&index) = self.guild_index.get(guild_id) else {
            return false;
        };
        match self.guilds[index]
            .channels
            .iter_mut()
            .find(|channel| channel.id == incoming.id)
        {
            Some(channel) => {
                channel.merge_update(incoming);
                true
            }
            None => false,
        }
    }

    pub fn append_message(&mut self, message: Message) {
        self.messages
            .entry(message.channel_id.clone())
            .or_default()
            .push(message);
    }

    /// Replaces a channel's history after a successful fetch and, when the
    /// channel is still the selected one, clears the load error.
    pub fn replace_messages(&mut self, channel_id: &ChannelId, messages: Vec<Message>) {
        self.messages.insert(channel_id.clone(), messages);
        if self.selection.current_channel_id.as_ref() == Some(channel_id) {
            self.selection.channel_error = None;
        }
    }

    /// Records a channel load failure. The failed channel's history is
    /// dropped so an error is never shown next to a stale message list.
    pub fn set_channel_error(&mut self, channel_id: &ChannelId, error: String) {
        self.messages.remove(channel_id);
        if self.selection.current_channel_id.as_ref() == Some(channel_id) {
            self.selection.channel_error = Some(error);
        }
    }

    /// Selects a guild, resetting channel, error, and reply context, then
    /// auto-selects the guild's first text channel. Returns the channel the
    /// caller should fetch messages for, if any.
    pub fn select_guild(&mut self, guild_id: &GuildId) -> Option<ChannelId> {
        self.selection.current_guild_id = Some(guild_id.clone());
        self.selection.current_channel_id = None;
        self.selection.channel_error = None;
        self.selection.reply = None;

        let first_text = self.guild(guild_id)?.channels.iter().find_map(|channel| {
            (channel.kind == ChannelKind::Text).then(|| channel.id.clone())
        });
        self.selection.current_channel_id = first_text.clone();
        first_text
    }

    /// Selects a channel within the current guild; clears only the error and
    /// reply context.
    pub fn select_channel(&mut self, channel_id: &ChannelId) {
        self.selection.current_channel_id = Some(channel_id.clone());
        self.selection.channel_error = None;
        self.selection.reply = None;
    }

    pub fn begin_reply(&mut self, reply: ReplyContext) {
        self.selection.reply = Some(reply);
    }

    pub fn take_reply(&mut self) -> Option<ReplyContext> {
        self.selection.reply.take()
    }

    fn rebuild_guild_index(&mut self) {
        self.guild_index.clear();
        for (index, guild) in self.guilds.iter().enumerate() {
            self.guild_index.insert(guild.id.clone(), index);
        }
    }
}

#[cfg(test)]
#[path = "tests/state_tests.rs"]
mod tests;
