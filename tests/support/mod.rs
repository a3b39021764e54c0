//! Shared test support: manual clock, recording chat adapter, and an
//! in-process dispatch harness over an in-memory database.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

use agent_dispatch::chat::event::ChatEvent;
use agent_dispatch::chat::{ChatAdapter, ChatService};
use agent_dispatch::clock::Clock;
use agent_dispatch::dispatch::dispatcher::Dispatcher;
use agent_dispatch::models::job::Platform;
use agent_dispatch::persistence::agent_repo::AgentRepo;
use agent_dispatch::persistence::job_repo::JobRepo;
use agent_dispatch::persistence::db;
use agent_dispatch::transport::frame::Frame;
use agent_dispatch::transport::inbound::ReliableInbound;
use agent_dispatch::transport::outbound::OutboundProcessor;
use agent_dispatch::transport::registry::{
    SessionContext, StaticSecretValidator, TransportRegistry,
};
use agent_dispatch::Result;

/// Organization used by every harness test.
pub(crate) const ORG: &str = "org-1";
/// Integration used by every harness test.
pub(crate) const INTEGRATION: &str = "intg-1";
/// Channel used by slack events.
pub(crate) const CHANNEL: &str = "C100";

/// Clock whose time only moves when a test advances it.
pub(crate) struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub(crate) fn new() -> Self {
        Self {
            now: Mutex::new(Utc::now()),
        }
    }

    pub(crate) fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += chrono::Duration::from_std(by).unwrap();
    }

    pub(crate) fn advance_minutes(&self, minutes: i64) {
        let mut now = self.now.lock().unwrap();
        *now += chrono::Duration::minutes(minutes);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// One recorded chat adapter call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ChatCall {
    Post {
        channel: String,
        text: String,
        thread_key: Option<String>,
    },
    React {
        channel: String,
        message_key: String,
        name: String,
    },
    Unreact {
        channel: String,
        message_key: String,
        name: String,
    },
}

/// Chat adapter that records calls and fabricates message keys.
pub(crate) struct RecordingChat {
    calls: Mutex<Vec<ChatCall>>,
    counter: AtomicU64,
}

impl RecordingChat {
    pub(crate) fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            counter: AtomicU64::new(0),
        }
    }

    pub(crate) fn calls(&self) -> Vec<ChatCall> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn posts(&self) -> Vec<ChatCall> {
        self.calls()
            .into_iter()
            .filter(|call| matches!(call, ChatCall::Post { .. }))
            .collect()
    }

    pub(crate) fn reactions(&self) -> Vec<ChatCall> {
        self.calls()
            .into_iter()
            .filter(|call| matches!(call, ChatCall::React { .. }))
            .collect()
    }
}

impl ChatAdapter for RecordingChat {
    fn post_message<'a>(
        &'a self,
        channel: &'a str,
        text: &'a str,
        thread_key: Option<&'a str>,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(ChatCall::Post {
                channel: channel.to_owned(),
                text: text.to_owned(),
                thread_key: thread_key.map(str::to_owned),
            });
            let n = self.counter.fetch_add(1, Ordering::SeqCst);
            Ok(format!("ts-{n}"))
        })
    }

    fn resolve_mention<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move { Ok(format!("user-{user_id}")) })
    }

    fn set_reaction<'a>(
        &'a self,
        channel: &'a str,
        message_key: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(ChatCall::React {
                channel: channel.to_owned(),
                message_key: message_key.to_owned(),
                name: name.to_owned(),
            });
            Ok(())
        })
    }

    fn remove_reaction<'a>(
        &'a self,
        channel: &'a str,
        message_key: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(ChatCall::Unreact {
                channel: channel.to_owned(),
                message_key: message_key.to_owned(),
                name: name.to_owned(),
            });
            Ok(())
        })
    }

    fn permalink<'a>(
        &'a self,
        channel: &'a str,
        message_key: &'a str,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move { Ok(format!("https://chat.example/{channel}/{message_key}")) })
    }
}

/// Fully wired dispatch core over an in-memory database.
pub(crate) struct Harness {
    pub clock: Arc<ManualClock>,
    pub registry: Arc<TransportRegistry>,
    pub outbound: Arc<OutboundProcessor>,
    pub inbound: Arc<ReliableInbound>,
    pub jobs: JobRepo,
    pub agents: AgentRepo,
    pub dispatcher: Arc<Dispatcher>,
    pub chat: Arc<RecordingChat>,
}

/// Build a harness with production-default timings and a manual clock.
pub(crate) async fn harness() -> Harness {
    let pool = Arc::new(db::connect_memory().await.expect("in-memory db"));
    let clock = Arc::new(ManualClock::new());

    let jobs = JobRepo::new(Arc::clone(&pool), clock.clone());
    let agents = AgentRepo::new(Arc::clone(&pool), clock.clone());

    let validator = Arc::new(StaticSecretValidator::new([(
        "sekret".to_owned(),
        ORG.to_owned(),
    )]));
    let registry = Arc::new(TransportRegistry::new(validator));

    let outbound = Arc::new(OutboundProcessor::new(
        Arc::clone(&registry),
        Duration::from_secs(30),
        5,
        clock.clone(),
    ));
    let inbound = Arc::new(ReliableInbound::new(
        Duration::from_secs(30 * 60),
        clock.clone(),
    ));

    let chat = Arc::new(RecordingChat::new());
    let chat_service = ChatService::Configured(chat.clone());

    let dispatcher = Arc::new(Dispatcher::new(
        jobs.clone(),
        agents.clone(),
        Arc::clone(&registry),
        Arc::clone(&outbound),
        Arc::clone(&inbound),
        chat_service,
    ));

    // Mirror the production hook wiring: close tears down per-session
    // state, frames route through the dispatcher.
    let close_dispatcher = Arc::clone(&dispatcher);
    registry
        .register_close_hook(Arc::new(move |context| {
            let dispatcher = Arc::clone(&close_dispatcher);
            Box::pin(async move {
                let _ = dispatcher.on_session_close(context).await;
            })
        }))
        .await;

    let frame_dispatcher = Arc::clone(&dispatcher);
    registry
        .register_frame_hook(Arc::new(move |context, frame| {
            let dispatcher = Arc::clone(&frame_dispatcher);
            Box::pin(async move {
                let _ = dispatcher.on_frame(context, frame).await;
            })
        }))
        .await;

    Harness {
        clock,
        registry,
        outbound,
        inbound,
        jobs,
        agents,
        dispatcher,
        chat,
    }
}

/// Attach an agent session to the harness registry and register its row.
pub(crate) async fn connect_agent(
    harness: &Harness,
    agent_instance_id: &str,
    repo_url: Option<&str>,
) -> (SessionContext, UnboundedReceiver<String>) {
    let context = SessionContext {
        session_id: Uuid::new_v4().to_string(),
        organization_id: ORG.to_owned(),
        agent_instance_id: agent_instance_id.to_owned(),
        repo_url: repo_url.map(str::to_owned),
    };
    let rx = harness.registry.attach_session(context.clone()).await;
    harness
        .dispatcher
        .on_session_open(context.clone())
        .await
        .expect("session open");
    (context, rx)
}

/// A Slack chat event for the harness organization.
pub(crate) fn slack_event(thread_key: &str, message_key: &str, text: &str) -> ChatEvent {
    ChatEvent {
        organization_id: ORG.to_owned(),
        integration_id: INTEGRATION.to_owned(),
        platform: Platform::Slack,
        channel_id: CHANNEL.to_owned(),
        thread_key: thread_key.to_owned(),
        user_id: "U100".to_owned(),
        text: text.to_owned(),
        message_key: message_key.to_owned(),
        repo_url: None,
    }
}

/// Drain every frame currently queued for a session.
pub(crate) fn drain_frames(rx: &mut UnboundedReceiver<String>) -> Vec<Frame> {
    let mut frames = Vec::new();
    while let Ok(text) = rx.try_recv() {
        frames.push(Frame::decode(&text).expect("valid frame"));
    }
    frames
}

/// Drain frames and keep only the given type.
pub(crate) fn drain_frames_of(rx: &mut UnboundedReceiver<String>, frame_type: &str) -> Vec<Frame> {
    drain_frames(rx)
        .into_iter()
        .filter(|frame| frame.frame_type == frame_type)
        .collect()
}
