use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use agent_dispatch::transport::frame::{frame_type, Frame};
use agent_dispatch::transport::registry::{
    CredentialValidator, SessionContext, StaticSecretValidator, TransportRegistry,
};
use agent_dispatch::AppError;

use crate::support::drain_frames;

fn context(session_id: &str, organization_id: &str) -> SessionContext {
    SessionContext {
        session_id: session_id.to_owned(),
        organization_id: organization_id.to_owned(),
        agent_instance_id: format!("inst-{session_id}"),
        repo_url: None,
    }
}

fn registry() -> Arc<TransportRegistry> {
    let validator = Arc::new(StaticSecretValidator::new([(
        "sekret".to_owned(),
        "org-1".to_owned(),
    )]));
    Arc::new(TransportRegistry::new(validator))
}

#[tokio::test]
async fn send_reaches_the_target_session() {
    let registry = registry();
    let mut rx = registry.attach_session(context("sess-1", "org-1")).await;

    registry
        .send("sess-1", &Frame::one_shot(frame_type::HEALTHCHECK_CHECK))
        .await
        .expect("send");

    let frames = drain_frames(&mut rx);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].frame_type, frame_type::HEALTHCHECK_CHECK);
}

#[tokio::test]
async fn send_to_unknown_session_is_session_gone() {
    let registry = registry();
    let err = registry
        .send("sess-9", &Frame::one_shot(frame_type::HEALTHCHECK_CHECK))
        .await
        .expect_err("gone");
    assert!(matches!(err, AppError::SessionGone(_)));
}

#[tokio::test]
async fn broadcast_honors_the_predicate() {
    let registry = registry();
    let mut rx1 = registry.attach_session(context("sess-1", "org-1")).await;
    let mut rx2 = registry.attach_session(context("sess-2", "org-2")).await;

    let delivered = registry
        .broadcast(
            |ctx| ctx.organization_id == "org-1",
            &Frame::one_shot(frame_type::CHECK_IDLE_JOBS),
        )
        .await
        .expect("broadcast");

    assert_eq!(delivered, 1);
    assert_eq!(drain_frames(&mut rx1).len(), 1);
    assert!(drain_frames(&mut rx2).is_empty());
}

#[tokio::test]
async fn list_sessions_tracks_attach_and_detach() {
    let registry = registry();
    let _rx1 = registry.attach_session(context("sess-1", "org-1")).await;
    let _rx2 = registry.attach_session(context("sess-2", "org-1")).await;

    let mut sessions = registry.list_sessions().await;
    sessions.sort();
    assert_eq!(sessions, vec!["sess-1".to_owned(), "sess-2".to_owned()]);

    registry.detach_session("sess-1").await;
    assert_eq!(registry.list_sessions().await, vec!["sess-2".to_owned()]);
}

#[tokio::test]
async fn close_hooks_fire_exactly_once() {
    let registry = registry();
    let closes = Arc::new(AtomicU32::new(0));

    let counter = Arc::clone(&closes);
    registry
        .register_close_hook(Arc::new(move |_context| {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        }))
        .await;

    let _rx = registry.attach_session(context("sess-1", "org-1")).await;
    registry.detach_session("sess-1").await;
    registry.detach_session("sess-1").await;

    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn frame_hooks_see_injected_frames_with_session_context() {
    let registry = registry();
    let seen = Arc::new(AtomicU32::new(0));

    let counter = Arc::clone(&seen);
    registry
        .register_frame_hook(Arc::new(move |ctx, frame| {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                assert_eq!(ctx.organization_id, "org-1");
                assert_eq!(frame.frame_type, frame_type::JOB_COMPLETE);
                counter.fetch_add(1, Ordering::SeqCst);
            })
        }))
        .await;

    let _rx = registry.attach_session(context("sess-1", "org-1")).await;
    registry
        .inject_frame(
            "sess-1",
            Frame {
                id: Some("f-1".into()),
                frame_type: frame_type::JOB_COMPLETE.to_owned(),
                message_id: None,
                payload: None,
            },
        )
        .await;

    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn session_context_reflects_connect_parameters() {
    let registry = registry();
    let mut ctx = context("sess-1", "org-1");
    ctx.repo_url = Some("https://github.com/acme/app".into());
    let _rx = registry.attach_session(ctx).await;

    let stored = registry.session_context("sess-1").await.expect("present");
    assert_eq!(stored.repo_url.as_deref(), Some("https://github.com/acme/app"));
    assert!(registry.session_context("sess-9").await.is_none());
}

#[test]
fn static_secret_validator_resolves_or_rejects() {
    let validator = StaticSecretValidator::new([("sekret".to_owned(), "org-1".to_owned())]);

    assert_eq!(validator.validate("sekret").expect("valid"), "org-1");
    let err = validator.validate("wrong").expect_err("rejected");
    assert!(matches!(err, AppError::Unauthenticated(_)));
}
