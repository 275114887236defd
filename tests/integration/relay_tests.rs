//! End-to-end watch loop scenarios against the scripted platform.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use exec_relay::config::{DeltaMode, DocumentsConfig};
use exec_relay::documents::SessionDocuments;
use exec_relay::models::document::Turn;
use exec_relay::models::event::{EventKind, StreamEvent};
use exec_relay::models::job::{JobRef, RunStatus};
use exec_relay::platform::ExecutionPlatform;
use exec_relay::watcher::relay::{ChatRequest, StreamRelay, WatchState};
use exec_relay::AppError;

use super::test_helpers::{
    fast_settings, model, pipeline, relay, run_watch, system_texts, FakePlatform, Step,
};

fn chat(job: JobRef) -> ChatRequest {
    ChatRequest {
        session_id: "session-1".into(),
        message: "What is the capital of France?".into(),
        job,
        attachment: None,
    }
}

fn installed_pipeline() -> FakePlatform {
    FakePlatform::new()
        .with_pipeline(pipeline("p1", "installed", &["prompt", "answer"], &[("prompt", "answer")]))
        .with_run_statuses(&[RunStatus::Running])
}

fn assert_single_terminal_error(events: &[StreamEvent], expected: &str) {
    let errors: Vec<&StreamEvent> = events.iter().filter(|e| e.kind == EventKind::Error).collect();
    assert_eq!(errors.len(), 1, "exactly one error event: {events:?}");
    assert_eq!(errors[0].text.as_deref(), Some(expected));
    assert_eq!(events.len() - 2, events.iter().position(|e| e.kind == EventKind::Error).unwrap());
    assert!(events.last().unwrap().is_done());
}

#[tokio::test]
async fn model_answer_streams_then_done() {
    let fake = Arc::new(
        FakePlatform::new()
            .with_model(model("m1", "gpt", "deployed"))
            .with_steps(vec![Step::success("Paris")]),
    );
    let relay = relay(&fake, fast_settings(DeltaMode::Message));

    let prepared = relay.prepare_chat(chat(JobRef::model("m1"))).await.expect("prepare");
    assert_eq!(prepared.prompt_key, "1");
    let (events, state) = run_watch(&relay, prepared).await;

    assert_eq!(state, WatchState::Done);
    assert_eq!(events, vec![StreamEvent::system("Paris"), StreamEvent::done()]);
}

#[tokio::test]
async fn failed_sink_execution_ends_with_its_error() {
    let fake = Arc::new(installed_pipeline().with_sink_after(0).with_steps(vec![
        Step::created(),
        Step::running(None),
        Step::failed(Some("OOM")),
    ]));
    let relay = relay(&fake, fast_settings(DeltaMode::Message));

    let prepared = relay.prepare_chat(chat(JobRef::pipeline("p1"))).await.expect("prepare");
    let (events, state) = run_watch(&relay, prepared).await;

    assert_eq!(state, WatchState::Failed);
    assert_eq!(events, vec![StreamEvent::error("OOM"), StreamEvent::done()]);
}

#[tokio::test]
async fn failed_sink_without_message_uses_fallback_text() {
    let fake = Arc::new(
        installed_pipeline()
            .with_sink_after(0)
            .with_steps(vec![Step::failed(None)]),
    );
    let relay = relay(&fake, fast_settings(DeltaMode::Message));

    let prepared = relay.prepare_chat(chat(JobRef::pipeline("p1"))).await.expect("prepare");
    let (events, _) = run_watch(&relay, prepared).await;

    assert_single_terminal_error(&events, "Execution failed, execution id: exec-sink");
}

#[tokio::test]
async fn deadline_produces_exactly_one_timeout_error() {
    let fake = Arc::new(
        installed_pipeline()
            .with_sink_after(0)
            .with_steps(vec![Step::running(None)]),
    );
    let mut settings = fast_settings(DeltaMode::Message);
    settings.deadline = Duration::from_millis(60);
    let relay = relay(&fake, settings);

    let prepared = relay.prepare_chat(chat(JobRef::pipeline("p1"))).await.expect("prepare");
    let (events, state) = run_watch(&relay, prepared).await;

    assert_eq!(state, WatchState::TimedOut);
    assert_eq!(
        events,
        vec![
            StreamEvent::error("response did not finish in time"),
            StreamEvent::done()
        ]
    );
}

#[tokio::test]
async fn deadline_applies_while_locating_sink() {
    let fake = Arc::new(installed_pipeline());
    let mut settings = fast_settings(DeltaMode::Message);
    settings.deadline = Duration::from_millis(40);
    let relay = relay(&fake, settings);

    let prepared = relay.prepare_chat(chat(JobRef::pipeline("p1"))).await.expect("prepare");
    let (events, state) = run_watch(&relay, prepared).await;

    assert_eq!(state, WatchState::TimedOut);
    assert_single_terminal_error(&events, "response did not finish in time");
}

#[tokio::test]
async fn character_mode_emits_only_new_characters() {
    let fake = Arc::new(installed_pipeline().with_sink_after(0).with_steps(vec![
        Step::running(Some("Hi")),
        Step::success("Hi there"),
    ]));
    let relay = relay(&fake, fast_settings(DeltaMode::Character));

    let prepared = relay.prepare_chat(chat(JobRef::pipeline("p1"))).await.expect("prepare");
    let (events, state) = run_watch(&relay, prepared).await;

    assert_eq!(state, WatchState::Done);
    assert_eq!(
        system_texts(&events),
        vec!["H", "i", " ", "t", "h", "e", "r", "e"]
    );
    assert!(events.last().unwrap().is_done());
}

#[tokio::test]
async fn character_mode_concatenation_matches_final_answer() {
    let fake = Arc::new(installed_pipeline().with_sink_after(1).with_steps(vec![
        Step::created(),
        Step::running(None),
        Step::running(Some("The")),
        Step::running(Some("The quick")),
        Step::running(Some("The quick brown")),
        Step::success("The quick brown fox"),
    ]));
    let mut settings = fast_settings(DeltaMode::Character);
    settings.chunk_size = 2;
    let relay = relay(&fake, settings);

    let prepared = relay.prepare_chat(chat(JobRef::pipeline("p1"))).await.expect("prepare");
    let (events, _) = run_watch(&relay, prepared).await;

    assert_eq!(system_texts(&events).concat(), "The quick brown fox");
}

#[tokio::test]
async fn character_mode_paces_deltas() {
    let fake = Arc::new(
        FakePlatform::new()
            .with_model(model("m1", "gpt", "deployed"))
            .with_steps(vec![Step::success("abcde")]),
    );
    let mut settings = fast_settings(DeltaMode::Character);
    settings.char_delay = Duration::from_millis(20);
    let relay = relay(&fake, settings);

    let prepared = relay.prepare_chat(chat(JobRef::model("m1"))).await.expect("prepare");
    let started = tokio::time::Instant::now();
    let (events, _) = run_watch(&relay, prepared).await;

    assert_eq!(system_texts(&events).len(), 5);
    assert!(started.elapsed() >= Duration::from_millis(80));
}

#[tokio::test]
async fn message_mode_does_not_repeat_unchanged_content() {
    let fake = Arc::new(installed_pipeline().with_sink_after(0).with_steps(vec![
        Step::running(Some("Hello")),
        Step::running(Some("Hello")),
        Step::running(Some("Hello")),
        Step::success("Hello"),
    ]));
    let relay = relay(&fake, fast_settings(DeltaMode::Message));

    let prepared = relay.prepare_chat(chat(JobRef::pipeline("p1"))).await.expect("prepare");
    let (events, state) = run_watch(&relay, prepared).await;

    assert_eq!(state, WatchState::Done);
    assert_eq!(events, vec![StreamEvent::system("Hello"), StreamEvent::done()]);
}

#[tokio::test]
async fn message_mode_emits_each_revision() {
    let fake = Arc::new(installed_pipeline().with_sink_after(0).with_steps(vec![
        Step::running(Some("Hel")),
        Step::running(Some("Hello")),
        Step::success("Hello!"),
    ]));
    let relay = relay(&fake, fast_settings(DeltaMode::Message));

    let prepared = relay.prepare_chat(chat(JobRef::pipeline("p1"))).await.expect("prepare");
    let (events, _) = run_watch(&relay, prepared).await;

    assert_eq!(system_texts(&events), vec!["Hel", "Hello", "Hello!"]);
}

#[tokio::test]
async fn run_ending_without_sink_reports_no_response() {
    let fake = Arc::new(
        FakePlatform::new()
            .with_pipeline(pipeline("p1", "installed", &["a", "b"], &[("a", "b")]))
            .with_run_statuses(&[RunStatus::Running, RunStatus::Success]),
    );
    let relay = relay(&fake, fast_settings(DeltaMode::Message));

    let prepared = relay.prepare_chat(chat(JobRef::pipeline("p1"))).await.expect("prepare");
    let (events, state) = run_watch(&relay, prepared).await;

    assert_eq!(state, WatchState::Failed);
    assert_eq!(
        events,
        vec![
            StreamEvent::error("Pipeline cycle finished without response, pipeline ex id run-1"),
            StreamEvent::done()
        ]
    );
}

#[tokio::test]
async fn content_without_text_part_is_malformed() {
    let fake = Arc::new(
        installed_pipeline()
            .with_sink_after(0)
            .with_steps(vec![Step::success_raw(json!([
                { "type": "image_url", "image_url": { "url": "https://x" } }
            ]))]),
    );
    let relay = relay(&fake, fast_settings(DeltaMode::Message));

    let prepared = relay.prepare_chat(chat(JobRef::pipeline("p1"))).await.expect("prepare");
    let (events, state) = run_watch(&relay, prepared).await;

    assert_eq!(state, WatchState::Failed);
    assert_single_terminal_error(&events, "Cant find text content in response");
}

#[tokio::test]
async fn mixed_content_answer_streams_its_text() {
    let fake = Arc::new(
        installed_pipeline()
            .with_sink_after(0)
            .with_steps(vec![Step::success_raw(json!([
                { "type": "text", "text": "Bonjour" }
            ]))]),
    );
    let relay = relay(&fake, fast_settings(DeltaMode::Message));

    let prepared = relay.prepare_chat(chat(JobRef::pipeline("p1"))).await.expect("prepare");
    let (events, _) = run_watch(&relay, prepared).await;

    assert_eq!(system_texts(&events), vec!["Bonjour"]);
}

#[tokio::test]
async fn earlier_answers_are_never_replayed() {
    let fake = Arc::new(
        installed_pipeline()
            .with_document(
                "ai-playground-history",
                "item-x",
                "session-9.json",
                vec![
                    Turn::user("1", "first question", None),
                    Turn::assistant("1", "old answer"),
                    Turn::user("2", "second question", None),
                ],
            )
            .with_sink_after(0)
            .with_steps(vec![
                Step::running(None),
                Step::running(None),
                Step::success("new answer"),
            ]),
    );
    let relay = relay(&fake, fast_settings(DeltaMode::Message));

    let prepared = relay
        .prepare_existing(&JobRef::pipeline("p1"), "item-x")
        .await
        .expect("prepare");
    assert_eq!(prepared.prompt_key, "2");
    let (events, state) = run_watch(&relay, prepared).await;

    assert_eq!(state, WatchState::Done);
    assert_eq!(system_texts(&events), vec!["new answer"]);
}

#[tokio::test]
async fn answers_from_other_models_are_ignored() {
    let mut foreign = Turn::assistant("1", "llama says");
    foreign.model_name = Some("llama".into());
    let fake = Arc::new(
        FakePlatform::new()
            .with_model(model("m1", "router", "deployed"))
            .with_model(model("m-gpt", "gpt", "deployed"))
            .with_producing_model("m-gpt", "gpt")
            .with_document(
                "ai-playground-history",
                "item-x",
                "session-9.json",
                vec![Turn::user("1", "question", None), foreign],
            )
            .with_steps(vec![Step::running(None), Step::success("gpt says")]),
    );
    let relay = relay(&fake, fast_settings(DeltaMode::Message));

    let prepared = relay
        .prepare_existing(&JobRef::model("m1"), "item-x")
        .await
        .expect("prepare");
    let (events, _) = run_watch(&relay, prepared).await;

    assert_eq!(system_texts(&events), vec!["gpt says"]);
}

#[tokio::test]
async fn existing_item_without_user_turn_is_rejected() {
    let fake = Arc::new(installed_pipeline().with_document(
        "ai-playground-history",
        "item-x",
        "s.json",
        Vec::new(),
    ));
    let relay = relay(&fake, fast_settings(DeltaMode::Message));

    let result = relay.prepare_existing(&JobRef::pipeline("p1"), "item-x").await;
    assert!(matches!(result, Err(AppError::InvalidRequest(_))));
    assert_eq!(FakePlatform::calls(&fake.submit_calls), 0);
}

#[tokio::test]
async fn unknown_item_is_not_found() {
    let fake = Arc::new(installed_pipeline());
    let relay = relay(&fake, fast_settings(DeltaMode::Message));

    match relay.prepare_existing(&JobRef::pipeline("p1"), "missing").await {
        Err(AppError::NotFound(msg)) => assert_eq!(msg, "item 'missing' not found"),
        other => panic!("expected not found, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_job_fails_before_any_remote_work() {
    let fake = Arc::new(FakePlatform::new());
    let relay = relay(&fake, fast_settings(DeltaMode::Message));

    match relay.prepare_chat(chat(JobRef::pipeline("nope"))).await {
        Err(AppError::NotFound(msg)) => assert!(msg.contains("nope"), "{msg}"),
        other => panic!("expected not found, got {other:?}"),
    }
    assert_eq!(FakePlatform::calls(&fake.submit_calls), 0);
    assert_eq!(FakePlatform::calls(&fake.create_document_calls), 0);
}

#[tokio::test]
async fn stopped_pipeline_is_not_runnable() {
    let fake = Arc::new(
        FakePlatform::new().with_pipeline(pipeline("p1", "stopped", &["a"], &[])),
    );
    let relay = relay(&fake, fast_settings(DeltaMode::Message));

    let result = relay.prepare_chat(chat(JobRef::pipeline("p1"))).await;
    assert!(matches!(result, Err(AppError::NotRunnable(_))));
    assert_eq!(FakePlatform::calls(&fake.submit_calls), 0);
}

#[tokio::test]
async fn model_is_submitted_whatever_its_status() {
    let fake = Arc::new(
        FakePlatform::new()
            .with_model(model("m1", "gpt", "pre-trained"))
            .with_steps(vec![Step::success("Paris")]),
    );
    let relay = relay(&fake, fast_settings(DeltaMode::Message));

    let prepared = relay.prepare_chat(chat(JobRef::model("m1"))).await.expect("prepare");
    assert_eq!(FakePlatform::calls(&fake.submit_calls), 1);
    let (events, state) = run_watch(&relay, prepared).await;

    assert_eq!(state, WatchState::Done);
    assert_eq!(events, vec![StreamEvent::system("Paris"), StreamEvent::done()]);
}

#[tokio::test]
async fn branching_pipeline_is_rejected_before_submission() {
    let fake = Arc::new(FakePlatform::new().with_pipeline(pipeline(
        "p1",
        "installed",
        &["a", "b", "c"],
        &[("a", "b"), ("a", "c")],
    )));
    let relay = relay(&fake, fast_settings(DeltaMode::Message));

    let result = relay.prepare_chat(chat(JobRef::pipeline("p1"))).await;
    assert!(matches!(result, Err(AppError::AmbiguousSink(_))));
    assert_eq!(FakePlatform::calls(&fake.submit_calls), 0);
}

#[tokio::test]
async fn platform_failure_mid_watch_ends_with_generic_error() {
    let fake = Arc::new(installed_pipeline().with_sink_after(0).with_steps(vec![
        Step::running(Some("Par")),
        Step::remote_failure("platform unavailable"),
    ]));
    let relay = relay(&fake, fast_settings(DeltaMode::Message));

    let prepared = relay.prepare_chat(chat(JobRef::pipeline("p1"))).await.expect("prepare");
    let (events, state) = run_watch(&relay, prepared).await;

    assert_eq!(state, WatchState::Failed);
    assert_eq!(
        events,
        vec![
            StreamEvent::system("Par"),
            StreamEvent::error(
                "Sorry, there was an error while generating the response\n\nremote: platform unavailable"
            ),
            StreamEvent::done(),
        ]
    );
}

#[tokio::test]
async fn panic_in_watch_loop_still_terminates_stream() {
    let fake = Arc::new(
        installed_pipeline()
            .with_sink_after(0)
            .with_steps(vec![Step::panic()]),
    );
    let relay = relay(&fake, fast_settings(DeltaMode::Message));

    let prepared = relay.prepare_chat(chat(JobRef::pipeline("p1"))).await.expect("prepare");
    let (events, state) = run_watch(&relay, prepared).await;

    assert_eq!(state, WatchState::Failed);
    assert_eq!(events.len(), 2, "error then done: {events:?}");
    assert_eq!(events[0].kind, EventKind::Error);
    let text = events[0].text.as_deref().unwrap();
    assert!(text.starts_with("Sorry, there was an error while generating the response"));
    assert!(text.contains("scripted sink execution panic"), "{text}");
    assert!(events[1].is_done());
}

#[tokio::test]
async fn cancellation_stops_remote_polling() {
    let fake = Arc::new(
        installed_pipeline()
            .with_sink_after(0)
            .with_steps(vec![Step::running(None)]),
    );
    let relay = relay(&fake, fast_settings(DeltaMode::Message));

    let prepared = relay.prepare_chat(chat(JobRef::pipeline("p1"))).await.expect("prepare");
    let cancel = CancellationToken::new();
    let mut rx = relay.spawn(prepared, cancel.clone());

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(FakePlatform::calls(&fake.execution_calls) > 0);
    cancel.cancel();

    assert!(rx.recv().await.is_none(), "cancelled watch emits nothing");
    let after_cancel = FakePlatform::calls(&fake.execution_calls);
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(FakePlatform::calls(&fake.execution_calls), after_cancel);
}

#[tokio::test]
async fn slot_is_released_when_watch_ends() {
    let fake = Arc::new(
        FakePlatform::new()
            .with_model(model("m1", "gpt", "deployed"))
            .with_steps(vec![Step::success("ok")]),
    );
    let relay = relay(&fake, fast_settings(DeltaMode::Message));
    let free = relay.available_slots();

    let prepared = relay.prepare_chat(chat(JobRef::model("m1"))).await.expect("prepare");
    assert_eq!(relay.available_slots(), free - 1);
    let _ = run_watch(&relay, prepared).await;

    assert_eq!(relay.available_slots(), free);
}

#[tokio::test]
async fn excess_concurrent_streams_are_refused() {
    let fake = Arc::new(FakePlatform::new().with_model(model("m1", "gpt", "deployed")));
    let platform: Arc<dyn ExecutionPlatform> = Arc::clone(&fake) as Arc<dyn ExecutionPlatform>;
    let documents = Arc::new(SessionDocuments::new(
        Arc::clone(&platform),
        DocumentsConfig::default(),
    ));
    let relay = StreamRelay::new(platform, documents, fast_settings(DeltaMode::Message), 1);

    let held = relay.prepare_chat(chat(JobRef::model("m1"))).await.expect("first");
    let refused = relay.prepare_chat(chat(JobRef::model("m1"))).await;
    assert!(matches!(refused, Err(AppError::AtCapacity(_))));

    drop(held);
    assert!(relay.prepare_chat(chat(JobRef::model("m1"))).await.is_ok());
}
