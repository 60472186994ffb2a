use super::*;

fn guild(id: &str, name: &str) -> Guild {
    serde_json::from_str(&format!(r#"{{"id":"{id}","name":"{name}"}}"#)).expect("guild")
}

fn guild_with_channels(id: &str, channels: &str) -> Guild {
    serde_json::from_str(&format!(r#"{{"id":"{id}","name":"g","channels":{channels}}}"#))
        .expect("guild")
}

fn message(id: &str, channel_id: &str) -> Message {
    serde_json::from_str(&format!(
        r#"{{"id":"{id}","channel_id":"{channel_id}","author":{{"id":"5","username":"alice"}},"content":"hi"}}"#
    ))
    .expect("message")
}

#[test]
fn upsert_replaces_in_place_and_appends_new_ids() {
    let mut state = SessionState::default();
    state.replace_guilds(vec![guild("1", "first"), guild("2", "second")]);

    state.upsert_guild(guild("1", "renamed"));
    let names: Vec<&str> = state.guilds().iter().map(|g| g.name.as_str()).collect();
    assert_eq!(names, vec!["renamed", "second"]);

    state.upsert_guild(guild("3", "third"));
    assert_eq!(state.guilds().len(), 3);
    assert_eq!(state.guilds()[2].id, GuildId::new("3"));

    for existing in state.guilds().to_vec() {
        assert_eq!(state.guild(&existing.id).expect("indexed").id, existing.id);
    }
}

#[test]
fn merge_guild_summary_keeps_known_channels() {
    let mut state = SessionState::default();
    state.replace_guilds(vec![guild_with_channels(
        "1",
        r#"[{"id":"10","type":0,"name":"general"}]"#,
    )]);

    state.merge_guild_summary(guild("1", "renamed"));

    let merged = state.guild(&GuildId::new("1")).expect("guild");
    assert_eq!(merged.name, "renamed");
    assert_eq!(merged.channels.len(), 1);
}

#[test]
fn selecting_a_guild_clears_channel_error_and_reply() {
    let mut state = SessionState::default();
    state.replace_guilds(vec![guild_with_channels(
        "1",
        r#"[{"id":"9","type":4,"name":"category"},{"id":"10","type":0,"name":"general"}]"#,
    )]);
    state.selection.current_channel_id = Some(ChannelId::new("99"));
    state.selection.channel_error = Some("No Access".into());
    state.begin_reply(ReplyContext {
        message_id: MessageId::new("5"),
        username: "alice".into(),
        content: "hi".into(),
        guild_id: None,
    });

    let auto_selected = state.select_guild(&GuildId::new("1"));

    assert_eq!(auto_selected, Some(ChannelId::new("10")));
    assert_eq!(
        state.selection.current_channel_id,
        Some(ChannelId::new("10"))
    );
    assert!(state.selection.channel_error.is_none());
    assert!(state.selection.reply.is_none());
}

#[test]
fn selecting_a_guild_without_text_channels_leaves_no_channel_selected() {
    let mut state = SessionState::default();
    state.replace_guilds(vec![guild_with_channels(
        "1",
        r#"[{"id":"9","type":4,"name":"category"}]"#,
    )]);

    assert!(state.select_guild(&GuildId::new("1")).is_none());
    assert!(state.selection.current_channel_id.is_none());
}

#[test]
fn selecting_a_channel_keeps_the_guild() {
    let mut state = SessionState::default();
    state.selection.current_guild_id = Some(GuildId::new("1"));
    state.selection.channel_error = Some("No Access".into());

    state.select_channel(&ChannelId::new("10"));

    assert_eq!(state.selection.current_guild_id, Some(GuildId::new("1")));
    assert_eq!(
        state.selection.current_channel_id,
        Some(ChannelId::new("10"))
    );
    assert!(state.selection.channel_error.is_none());
}

#[test]
fn channel_error_and_message_list_are_mutually_exclusive() {
    let mut state = SessionState::default();
    let channel = ChannelId::new("10");
    state.select_channel(&channel);
    state.append_message(message("1", "10"));

    state.set_channel_error(&channel, "No Access".into());
    assert!(state.messages.get(&channel).is_none());
    assert_eq!(state.selection.channel_error.as_deref(), Some("No Access"));

    state.replace_messages(&channel, vec![message("2", "10")]);
    assert!(state.selection.channel_error.is_none());
    assert_eq!(state.messages.get(&channel).expect("history").len(), 1);
}

#[test]
fn stale_fetch_results_do_not_touch_the_current_selection_error() {
    let mut state = SessionState::default();
    state.select_channel(&ChannelId::new("10"));
    state.set_channel_error(&ChannelId::new("10"), "No Access".into());

    // Result for a channel the user has already navigated away from.
    state.replace_messages(&ChannelId::new("11"), vec![message("2", "11")]);
    assert_eq!(state.selection.channel_error.as_deref(), Some("No Access"));
}

#[test]
fn update_channel_merges_partial_payloads() {
    let mut state = SessionState::default();
    state.replace_guilds(vec![guild_with_channels(
        "1",
        r#"[{"id":"10","type":0,"name":"general","topic":"old topic"}]"#,
    )]);
    let incoming: Channel =
        serde_json::from_str(r#"{"id":"10","type":0,"name":"renamed"}"#).expect("channel");

    assert!(state.update_channel(&GuildId::new("1"), &incoming));
    let channel = state
        .channel(&GuildId::new("1"), &ChannelId::new("10"))
        .expect("channel");
    assert_eq!(channel.name, "renamed");
    assert_eq!(channel.topic, "old topic");

    assert!(!state.update_channel(&GuildId::new("404"), &incoming));
}
