use std::sync::Arc;

use agent_dispatch::dispatch::reconciler::Reconciler;
use agent_dispatch::models::message::MessageStatus;
use agent_dispatch::transport::frame::{frame_type, Frame};

use crate::support::{connect_agent, drain_frames_of, harness, slack_event, Harness, ORG};

fn reconciler(h: &Harness) -> Arc<Reconciler> {
    Arc::new(Reconciler::new(
        Arc::clone(&h.dispatcher),
        Arc::clone(&h.registry),
        h.jobs.clone(),
        h.agents.clone(),
        vec![ORG.to_owned()],
        15,
        30,
    ))
}

/// Scenario: a job whose messages are all COMPLETED and old is classified
/// idle and reclaimed by the reconciler.
#[tokio::test]
async fn idle_job_is_reclaimed() {
    let h = harness().await;

    let event = slack_event("1722500000.000100", "1722500000.000100", "old work");
    h.dispatcher.on_chat_event(event.clone()).await.expect("admit");
    let job = h
        .jobs
        .find_by_thread(ORG, &event.job_kind())
        .await
        .expect("query")
        .expect("job");

    // Walk the lone message to COMPLETED.
    let message = h
        .jobs
        .oldest_queued_message(ORG, &job.id)
        .await
        .expect("query")
        .expect("queued");
    h.jobs
        .transition_message(ORG, &message.id, MessageStatus::InProgress)
        .await
        .expect("in progress");
    h.jobs
        .transition_message(ORG, &message.id, MessageStatus::Completed)
        .await
        .expect("completed");

    h.clock.advance_minutes(31);
    let idle = h.jobs.idle_jobs(ORG, 30).await.expect("query");
    assert_eq!(idle.len(), 1);
    assert_eq!(idle[0].id, job.id);

    reconciler(&h).run_once().await;

    assert!(h.jobs.get_by_id(ORG, &job.id).await.expect("query").is_none());
}

/// The reconciler broadcasts idle-check and healthcheck frames to every
/// connected agent as one-shots.
#[tokio::test]
async fn reconciler_broadcasts_liveness_frames() {
    let h = harness().await;
    let (_a1, mut rx1) = connect_agent(&h, "agent-1", None).await;
    let (_a2, mut rx2) = connect_agent(&h, "agent-2", None).await;

    reconciler(&h).run_once().await;

    for rx in [&mut rx1, &mut rx2] {
        let frames = crate::support::drain_frames(rx);
        let idle_checks = frames
            .iter()
            .filter(|f| f.frame_type == frame_type::CHECK_IDLE_JOBS)
            .count();
        let healthchecks = frames
            .iter()
            .filter(|f| f.frame_type == frame_type::HEALTHCHECK_CHECK)
            .count();
        assert_eq!(idle_checks, 1);
        assert_eq!(healthchecks, 1);
        assert!(
            frames.iter().all(|f| f.id.is_none()),
            "broadcasts are one-shots"
        );
    }
}

/// Scenario: `job_complete_v1` on a fully completed job deletes it.
#[tokio::test]
async fn job_complete_deletes_a_finished_job() {
    let h = harness().await;
    let (a1, mut rx1) = connect_agent(&h, "agent-1", None).await;

    let event = slack_event("1722500000.000100", "1722500000.000100", "finish me");
    h.dispatcher.on_chat_event(event.clone()).await.expect("admit");
    let job = h
        .jobs
        .find_by_thread(ORG, &event.job_kind())
        .await
        .expect("query")
        .expect("job");

    // The agent answers citing the message, completing it.
    let start = drain_frames_of(&mut rx1, frame_type::START_CONVERSATION);
    let payload: agent_dispatch::transport::frame::StartConversationPayload =
        start[0].payload_as().expect("payload");
    h.registry
        .inject_frame(
            &a1.session_id,
            Frame {
                id: Some("f-done".into()),
                frame_type: frame_type::ASSISTANT_MESSAGE.to_owned(),
                message_id: None,
                payload: Some(serde_json::json!({
                    "job_id": job.id,
                    "processed_message_id": payload.processed_message_id,
                    "message": "all done",
                })),
            },
        )
        .await;

    h.registry
        .inject_frame(
            &a1.session_id,
            Frame {
                id: Some("f-complete".into()),
                frame_type: frame_type::JOB_COMPLETE.to_owned(),
                message_id: None,
                payload: Some(serde_json::json!({ "job_id": job.id })),
            },
        )
        .await;

    assert!(h.jobs.get_by_id(ORG, &job.id).await.expect("query").is_none());
    assert!(h
        .agents
        .assignment_for_job(ORG, &job.id)
        .await
        .expect("query")
        .is_none());
}

/// Agents whose heartbeat went stale are swept, assignments included.
#[tokio::test]
async fn stale_agent_is_swept() {
    let h = harness().await;
    let (_a1, _rx1) = connect_agent(&h, "agent-1", None).await;

    let event = slack_event("1722500000.000100", "1722500000.000100", "work");
    h.dispatcher.on_chat_event(event.clone()).await.expect("admit");
    let job = h
        .jobs
        .find_by_thread(ORG, &event.job_kind())
        .await
        .expect("query")
        .expect("job");
    assert!(h
        .agents
        .assignment_for_job(ORG, &job.id)
        .await
        .expect("query")
        .is_some());

    // 16 minutes without a heartbeat crosses the 15-minute threshold.
    h.clock.advance_minutes(16);
    reconciler(&h).run_once().await;

    assert!(
        h.agents
            .get_by_instance(ORG, "agent-1")
            .await
            .expect("query")
            .is_none(),
        "stale agent deleted"
    );
    assert!(
        h.agents
            .assignment_for_job(ORG, &job.id)
            .await
            .expect("query")
            .is_none(),
        "assignment cascaded"
    );
}

/// Agent rows whose transport session vanished without a close are swept.
#[tokio::test]
async fn ghost_agent_row_is_swept() {
    let h = harness().await;

    // Register a row directly, with no matching live session.
    h.agents
        .upsert(ORG, "sess-ghost", "agent-ghost", None)
        .await
        .expect("upsert");

    reconciler(&h).run_once().await;

    assert!(h
        .agents
        .get_by_instance(ORG, "agent-ghost")
        .await
        .expect("query")
        .is_none());
}
