use agent_dispatch::models::message::MessageStatus;
use agent_dispatch::transport::frame::{frame_type, Frame, UserMessagePayload};

use crate::support::{connect_agent, drain_frames_of, harness, slack_event, ORG};

/// Scenario: the agent retransmits an `assistant_message_v1`; the chat
/// post happens once, the cited message completes once, and both receipts
/// are acked.
#[tokio::test]
async fn retransmitted_assistant_message_posts_once_and_acks_twice() {
    let h = harness().await;
    let (a1, mut rx1) = connect_agent(&h, "agent-1", None).await;

    // Two messages in the thread: start plus a follow-up (M2).
    let first = slack_event("1722500000.000100", "1722500000.000100", "start");
    h.dispatcher.on_chat_event(first.clone()).await.expect("first");
    let second = slack_event("1722500000.000100", "1722500000.000200", "follow-up");
    h.dispatcher.on_chat_event(second).await.expect("second");

    let job = h
        .jobs
        .find_by_thread(ORG, &first.job_kind())
        .await
        .expect("query")
        .expect("job");
    let user_frames = drain_frames_of(&mut rx1, frame_type::USER_MESSAGE);
    let m2: UserMessagePayload = user_frames[0].payload_as().expect("payload");

    let reply = Frame {
        id: Some("f1".into()),
        frame_type: frame_type::ASSISTANT_MESSAGE.to_owned(),
        message_id: None,
        payload: Some(serde_json::json!({
            "job_id": job.id,
            "processed_message_id": m2.processed_message_id,
            "message": "done",
        })),
    };
    h.registry.inject_frame(&a1.session_id, reply.clone()).await;
    h.registry.inject_frame(&a1.session_id, reply).await;

    assert_eq!(h.chat.posts().len(), 1, "PostMessage called exactly once");

    let message = h
        .jobs
        .get_message(ORG, &m2.processed_message_id)
        .await
        .expect("query")
        .expect("message");
    assert_eq!(message.status, MessageStatus::Completed);

    let acks: Vec<Frame> = drain_frames_of(&mut rx1, frame_type::ACK)
        .into_iter()
        .filter(|frame| frame.message_id.as_deref() == Some("f1"))
        .collect();
    assert_eq!(acks.len(), 2, "both receipts acked");
}

/// Agent acks clear the pending table; repeats are harmless.
#[tokio::test]
async fn agent_ack_clears_pending_delivery() {
    let h = harness().await;
    let (a1, mut rx1) = connect_agent(&h, "agent-1", None).await;

    let event = slack_event("1722500000.000100", "1722500000.000100", "work");
    h.dispatcher.on_chat_event(event).await.expect("dispatch");

    let frames = drain_frames_of(&mut rx1, frame_type::START_CONVERSATION);
    let frame_id = frames[0].id.clone().expect("id");
    assert!(h.outbound.is_pending(&frame_id).await);

    let ack = Frame {
        id: None,
        frame_type: frame_type::ACK.to_owned(),
        message_id: Some(frame_id.clone()),
        payload: None,
    };
    h.registry.inject_frame(&a1.session_id, ack.clone()).await;
    assert!(!h.outbound.is_pending(&frame_id).await);

    // A duplicate ack is a no-op, not an error.
    h.registry.inject_frame(&a1.session_id, ack).await;
    assert!(!h.outbound.is_pending(&frame_id).await);
}

/// The agent pings, the core pongs at the same session.
#[tokio::test]
async fn agent_ping_gets_a_pong() {
    let h = harness().await;
    let (a1, mut rx1) = connect_agent(&h, "agent-1", None).await;

    h.registry
        .inject_frame(
            &a1.session_id,
            Frame {
                id: Some("ping-1".into()),
                frame_type: frame_type::AGENT_HEALTHCHECK_PING.to_owned(),
                message_id: None,
                payload: None,
            },
        )
        .await;

    let pongs = drain_frames_of(&mut rx1, frame_type::AGENT_HEALTHCHECK_PONG);
    assert_eq!(pongs.len(), 1);
    assert!(pongs[0].id.is_none(), "pong is a one-shot reply");
}

/// `healthcheck_ack_v1` refreshes the agent heartbeat.
#[tokio::test]
async fn healthcheck_ack_bumps_last_active() {
    let h = harness().await;
    let (a1, _rx1) = connect_agent(&h, "agent-1", None).await;

    let before = h
        .agents
        .get_by_transport_session(ORG, &a1.session_id)
        .await
        .expect("query")
        .expect("agent")
        .last_active_at;

    h.clock.advance(std::time::Duration::from_secs(120));
    h.registry
        .inject_frame(
            &a1.session_id,
            Frame {
                id: None,
                frame_type: frame_type::HEALTHCHECK_ACK.to_owned(),
                message_id: None,
                payload: None,
            },
        )
        .await;

    let after = h
        .agents
        .get_by_transport_session(ORG, &a1.session_id)
        .await
        .expect("query")
        .expect("agent")
        .last_active_at;
    assert!(after > before);
}
