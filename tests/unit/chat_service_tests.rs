use std::sync::Arc;

use agent_dispatch::chat::ChatService;
use agent_dispatch::AppError;

use crate::support::{ChatCall, RecordingChat};

#[tokio::test]
async fn unconfigured_service_fails_with_dedicated_error() {
    let chat = ChatService::NotConfigured;
    assert!(!chat.is_configured());

    let err = chat
        .post_message("C1", "hello", None)
        .await
        .expect_err("must fail");
    assert!(matches!(err, AppError::ChatNotConfigured));

    let err = chat
        .set_reaction("C1", "ts-1", "eyes")
        .await
        .expect_err("must fail");
    assert!(matches!(err, AppError::ChatNotConfigured));

    let err = chat.resolve_mention("U1").await.expect_err("must fail");
    assert!(matches!(err, AppError::ChatNotConfigured));

    let err = chat.permalink("C1", "ts-1").await.expect_err("must fail");
    assert!(matches!(err, AppError::ChatNotConfigured));
}

#[tokio::test]
async fn configured_service_delegates_to_the_adapter() {
    let recording = Arc::new(RecordingChat::new());
    let chat = ChatService::Configured(recording.clone());
    assert!(chat.is_configured());

    let key = chat
        .post_message("C1", "hello", Some("111.222"))
        .await
        .expect("post");
    assert!(!key.is_empty());

    chat.set_reaction("C1", &key, "eyes").await.expect("react");
    chat.remove_reaction("C1", &key, "eyes").await.expect("unreact");

    let calls = recording.calls();
    assert_eq!(calls.len(), 3);
    assert!(matches!(calls[0], ChatCall::Post { .. }));
    assert!(matches!(calls[1], ChatCall::React { .. }));
    assert!(matches!(calls[2], ChatCall::Unreact { .. }));

    let link = chat.permalink("C1", &key).await.expect("permalink");
    assert!(link.contains("C1"));

    let name = chat.resolve_mention("U1").await.expect("mention");
    assert_eq!(name, "user-U1");
}
