use agent_dispatch::chat::event::ChatEvent;
use agent_dispatch::models::job::{Job, JobKind, Platform};
use agent_dispatch::models::message::MessageStatus;

fn slack_kind() -> JobKind {
    JobKind::Slack {
        thread_ts: "1722500000.000100".into(),
        channel_id: "C1".into(),
        user_id: "U1".into(),
        integration_id: "intg-1".into(),
    }
}

fn discord_kind() -> JobKind {
    JobKind::Discord {
        message_id: "9001".into(),
        channel_id: "555".into(),
        thread_id: "7777".into(),
        user_id: "42".into(),
        integration_id: "intg-2".into(),
    }
}

#[test]
fn message_status_transition_matrix() {
    use MessageStatus::{Completed, InProgress, Queued};

    assert!(Queued.can_transition_to(InProgress));
    assert!(InProgress.can_transition_to(Completed));

    assert!(!Queued.can_transition_to(Completed));
    assert!(!Queued.can_transition_to(Queued));
    assert!(!InProgress.can_transition_to(Queued));
    assert!(!InProgress.can_transition_to(InProgress));
    assert!(!Completed.can_transition_to(Queued));
    assert!(!Completed.can_transition_to(InProgress));
    assert!(!Completed.can_transition_to(Completed));
}

#[test]
fn job_kind_accessors_pick_platform_fields() {
    let slack = slack_kind();
    assert_eq!(slack.platform(), Platform::Slack);
    assert_eq!(slack.thread_key(), "1722500000.000100");
    assert_eq!(slack.channel_id(), "C1");
    assert_eq!(slack.integration_id(), "intg-1");
    assert_eq!(slack.user_id(), "U1");

    let discord = discord_kind();
    assert_eq!(discord.platform(), Platform::Discord);
    assert_eq!(discord.thread_key(), "7777");
    assert_eq!(discord.channel_id(), "555");
    assert_eq!(discord.integration_id(), "intg-2");
}

#[test]
fn job_new_stamps_both_timestamps() {
    let now = chrono::Utc::now();
    let job = Job::new("org-1".into(), slack_kind(), now);

    assert_eq!(job.created_at, now);
    assert_eq!(job.updated_at, now);
    assert_eq!(job.organization_id, "org-1");
    assert!(!job.id.is_empty());
}

#[test]
fn chat_event_maps_to_slack_job_kind() {
    let event = ChatEvent {
        organization_id: "org-1".into(),
        integration_id: "intg-1".into(),
        platform: Platform::Slack,
        channel_id: "C1".into(),
        thread_key: "1722500000.000100".into(),
        user_id: "U1".into(),
        text: "hello".into(),
        message_key: "1722500000.000100".into(),
        repo_url: None,
    };

    assert_eq!(event.job_kind(), slack_kind());
}

#[test]
fn chat_event_maps_to_discord_job_kind_with_message_as_root() {
    let event = ChatEvent {
        organization_id: "org-1".into(),
        integration_id: "intg-2".into(),
        platform: Platform::Discord,
        channel_id: "555".into(),
        thread_key: "7777".into(),
        user_id: "42".into(),
        text: "hello".into(),
        message_key: "9001".into(),
        repo_url: None,
    };

    assert_eq!(event.job_kind(), discord_kind());
}
