use crate::discord::api::{AllowedMentions, ChannelKind, MentionKind, RoleId};
use crate::discord::with_session;
use crate::errors::{ChatPlatformError, IncidentApiError};
use crate::run_rotation;
use crate::tests::test_utils::{
    BARAN, BAYO, BOT, CHANNEL, Call, ChatMock, ChatWorld, ChatWorldBuilder, IncidentMock, NELSON,
    SUPPORT_ROLE, config, identities, oncall_response,
};
use reqwest::StatusCode;
use rotation_data::v1;


fn rotate(incident: IncidentMock, chat: &ChatMock) -> anyhow::Result<crate::RotationOutcome> {
    run_rotation(&config(), &incident, &identities(), chat)
}

fn incident_error(err: &anyhow::Error) -> &IncidentApiError {
    err.downcast_ref::<IncidentApiError>()
        .unwrap_or_else(|| panic!("expected an incident API error, got {err:#}"))
}

fn chat_error(err: &anyhow::Error) -> &ChatPlatformError {
    err.downcast_ref::<ChatPlatformError>()
        .unwrap_or_else(|| panic!("expected a chat platform error, got {err:#}"))
}

#[test]
fn rotation_end_to_end() {
    let chat = ChatMock::new(
        ChatWorldBuilder::default()
            .member(BARAN, &[])
            .member(BAYO, &[SUPPORT_ROLE])
            .member(NELSON, &[SUPPORT_ROLE, RoleId(77)])
            .build()
            .unwrap(),
    );

    let outcome = rotate(IncidentMock::Respond(oncall_response("baran")), &chat).unwrap();
    assert_eq!(outcome.oncall.username, "baran");
    assert_eq!(outcome.oncall.user_id, BARAN);
    assert_eq!(outcome.roles.assigned_to, BARAN);

    let state = chat.state();
    assert_eq!(state.logins, 1);
    assert_eq!(state.teardowns, 1);
    assert_eq!(state.sent_messages().len(), 1);
    assert_eq!(state.removals(), vec![NELSON, BAYO]);
    assert_eq!(state.additions(), vec![BARAN]);
    assert_eq!(state.role_holders(SUPPORT_ROLE), vec![BARAN]);
    assert_eq!(state.role_holders(RoleId(77)), vec![NELSON]);

    // The announcement goes out before any role is touched.
    let send = state
        .calls
        .iter()
        .position(|c| matches!(c, Call::Send(..)))
        .unwrap();
    let first_removal = state
        .calls
        .iter()
        .position(|c| matches!(c, Call::RemoveRole(..)))
        .unwrap();
    assert!(send < first_removal);
}

#[test]
fn announcement_mentions_only_users() {
    let chat = ChatMock::new(ChatWorldBuilder::default().member(BARAN, &[]).build().unwrap());
    rotate(IncidentMock::Respond(oncall_response("baran")), &chat).unwrap();

    let state = chat.state();
    let message = state.sent_messages()[0];
    assert_eq!(message.allowed_mentions, AllowedMentions::users_only());
    assert_eq!(message.allowed_mentions.parse, vec![MentionKind::Users]);
    assert!(message.content.contains(&format!("<@{BARAN}>")));
    assert!(message.content.contains(&format!("<@&{SUPPORT_ROLE}>")));
    assert!(message.content.contains("[support issues](https://linear.app/"));
    assert!(!message.content.contains("(<https://"));
}

#[test]
fn new_holder_keeps_role_they_already_had() {
    let chat = ChatMock::new(
        ChatWorldBuilder::default()
            .member(BARAN, &[SUPPORT_ROLE])
            .member(BAYO, &[SUPPORT_ROLE])
            .build()
            .unwrap(),
    );
    let outcome = rotate(IncidentMock::Respond(oncall_response("baran")), &chat).unwrap();
    assert!(outcome.roles.removed_from.contains(&BARAN));

    let state = chat.state();
    assert_eq!(state.role_holders(SUPPORT_ROLE), vec![BARAN]);
    assert_eq!(state.additions(), vec![BARAN]);
}

#[test]
fn missing_response_levels_are_distinct_and_skip_chat() {
    let parse = |body: &str| serde_json::from_str::<v1::OncallCurrent>(body).unwrap();
    let no_team = v1::OncallCurrent::default();
    let null_teams = parse(r#"{ "teamsOnCall": null }"#);
    let null_shifts = parse(r#"{ "teamsOnCall": [{ "oncallNow": null }] }"#);
    let null_users = parse(r#"{ "teamsOnCall": [{ "oncallNow": [{ "users": null }] }] }"#);

    let mut no_shift = oncall_response("baran");
    no_shift.teams_on_call[0].oncall_now.clear();

    let mut no_user = oncall_response("baran");
    no_user.teams_on_call[0].oncall_now[0].users.clear();

    let mut no_user_record = oncall_response("baran");
    no_user_record.teams_on_call[0].oncall_now[0].users[0].on_call_user = None;

    let cases: Vec<(v1::OncallCurrent, fn(&IncidentApiError) -> bool)> = vec![
        (no_team, |e| matches!(e, IncidentApiError::NoTeam)),
        (null_teams, |e| matches!(e, IncidentApiError::NoTeam)),
        (no_shift, |e| matches!(e, IncidentApiError::NoActiveShift { .. })),
        (null_shifts, |e| matches!(e, IncidentApiError::NoActiveShift { .. })),
        (no_user, |e| matches!(e, IncidentApiError::NoAssignedUser { .. })),
        (null_users, |e| matches!(e, IncidentApiError::NoAssignedUser { .. })),
        (no_user_record, |e| matches!(e, IncidentApiError::NoAssignedUser { .. })),
    ];
    for (response, expected) in cases {
        let chat = ChatMock::new(ChatWorld::default());
        let err = rotate(IncidentMock::Respond(response), &chat).unwrap_err();
        assert!(expected(incident_error(&err)), "unexpected error: {err:#}");

        // The session was never logged in but is still torn down.
        let state = chat.state();
        assert_eq!(state.logins, 0);
        assert!(state.calls.is_empty());
        assert_eq!(state.teardowns, 1);
    }
}

#[test]
fn unmapped_user_fails_before_chat() {
    let chat = ChatMock::new(ChatWorld::default());
    let err = rotate(IncidentMock::Respond(oncall_response("mallory")), &chat).unwrap_err();
    match incident_error(&err) {
        IncidentApiError::UnmappedUser { username } => assert_eq!(username, "mallory"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(
        incident_error(&err).to_string(),
        "no chat mapping for user mallory"
    );
    assert_eq!(chat.state().logins, 0);
    assert_eq!(chat.state().teardowns, 1);
}

#[test]
fn upstream_status_is_reported() {
    let chat = ChatMock::new(ChatWorld::default());
    let err = rotate(IncidentMock::Fail(StatusCode::FORBIDDEN), &chat).unwrap_err();
    assert_eq!(incident_error(&err).status(), Some(StatusCode::FORBIDDEN));
    assert_eq!(chat.state().logins, 0);
    assert_eq!(chat.state().teardowns, 1);
}

#[test]
fn missing_send_permission_blocks_everything() {
    let chat = ChatMock::new(
        ChatWorldBuilder::default()
            .member(BARAN, &[])
            .member(BAYO, &[SUPPORT_ROLE])
            .muted_channel()
            .build()
            .unwrap(),
    );
    let err = rotate(IncidentMock::Respond(oncall_response("baran")), &chat).unwrap_err();
    assert!(matches!(
        chat_error(&err),
        ChatPlatformError::MissingSendPermission(id) if *id == CHANNEL
    ));

    let state = chat.state();
    assert!(state.sent_messages().is_empty());
    assert!(state.removals().is_empty());
    assert!(state.additions().is_empty());
    assert_eq!(state.role_holders(SUPPORT_ROLE), vec![BAYO]);
    assert_eq!(state.teardowns, 1);
}

#[test]
fn non_text_channel_is_invalid() {
    let chat = ChatMock::new(
        ChatWorldBuilder::default()
            .channel_kind(ChannelKind::GUILD_CATEGORY)
            .build()
            .unwrap(),
    );
    let err = rotate(IncidentMock::Respond(oncall_response("baran")), &chat).unwrap_err();
    assert!(matches!(chat_error(&err), ChatPlatformError::InvalidChannel(_)));
    assert_eq!(chat.state().teardowns, 1);
}

#[test]
fn mapped_user_missing_from_server() {
    // baran is mapped but never joined the server.
    let chat = ChatMock::new(
        ChatWorldBuilder::default()
            .member(BAYO, &[SUPPORT_ROLE])
            .build()
            .unwrap(),
    );
    let err = rotate(IncidentMock::Respond(oncall_response("baran")), &chat).unwrap_err();
    assert!(matches!(
        chat_error(&err),
        ChatPlatformError::MemberNotFound(id) if *id == BARAN
    ));

    let state = chat.state();
    assert!(state.sent_messages().is_empty());
    assert!(state.removals().is_empty());
    assert_eq!(state.teardowns, 1);
}

#[test]
fn missing_support_role_is_a_generic_error() {
    let chat = ChatMock::new(
        ChatWorldBuilder::default()
            .member(BARAN, &[])
            .has_support_role(false)
            .build()
            .unwrap(),
    );
    let err = rotate(IncidentMock::Respond(oncall_response("baran")), &chat).unwrap_err();
    assert!(err.downcast_ref::<ChatPlatformError>().is_none());
    assert!(format!("{err:#}").contains("support role 3000 not found"));

    let state = chat.state();
    assert_eq!(state.sent_messages().len(), 1);
    assert!(state.removals().is_empty());
    assert!(state.additions().is_empty());
    assert_eq!(state.teardowns, 1);
}

#[test]
fn failed_removal_skips_assignment() {
    let chat = ChatMock::new(
        ChatWorldBuilder::default()
            .member(BARAN, &[])
            .member(BAYO, &[SUPPORT_ROLE])
            .member(NELSON, &[SUPPORT_ROLE])
            .failing_removals(vec![NELSON])
            .build()
            .unwrap(),
    );
    let err = rotate(IncidentMock::Respond(oncall_response("baran")), &chat).unwrap_err();
    match chat_error(&err) {
        ChatPlatformError::RoleRemovalFailed { role, members } => {
            assert_eq!(*role, SUPPORT_ROLE);
            assert_eq!(members, &vec![NELSON]);
        }
        other => panic!("unexpected error: {other}"),
    }

    let state = chat.state();
    // No rollback: bayo's removal stays.
    assert_eq!(state.role_holders(SUPPORT_ROLE), vec![NELSON]);
    assert!(state.additions().is_empty());
    assert_eq!(state.teardowns, 1);
}

#[test]
fn session_is_torn_down_when_body_panics() {
    let chat = ChatMock::new(ChatWorld::default());
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let _: anyhow::Result<()> = with_session(&chat, |_session| panic!("boom"));
    }));
    assert!(result.is_err());
    assert_eq!(chat.state().teardowns, 1);
}

#[test]
fn failed_login_is_still_torn_down() {
    let chat = ChatMock::new(ChatWorldBuilder::default().fail_login(true).build().unwrap());
    let err = rotate(IncidentMock::Respond(oncall_response("baran")), &chat).unwrap_err();
    assert!(format!("{err:#}").contains("failed to open the chat session"));

    let state = chat.state();
    assert_eq!(state.logins, 0);
    assert!(state.calls.is_empty());
    assert_eq!(state.teardowns, 1);
}

#[test]
fn bot_identity_is_used_for_permissions() {
    let chat = ChatMock::new(ChatWorldBuilder::default().member(BARAN, &[]).build().unwrap());
    rotate(IncidentMock::Respond(oncall_response("baran")), &chat).unwrap();
    assert!(chat.state().calls.contains(&Call::Member(BOT)));
}
