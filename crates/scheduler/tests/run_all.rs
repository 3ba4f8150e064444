use std::sync::Arc;
use std::time::Duration;

use action_flow::{Flow, InMemoryFlowSource, Step, ValueSpec};
use action_primitives::{DriverAction, Script, ScriptedDriverFactory};
use leadflow_core_types::{Credentials, FlowKey, ItemStatus, RunStatus, StepOutcome, REDACTED};
use leadflow_run_store::{ExecutionStore, InMemoryExecutionStore};
use leadflow_scheduler::{
    ProgressEvent, RetryOpt, RunHandle, RunItem, RunRequest, RunSummary, Scheduler,
    SchedulerConfig, SchedulerError, StaticCredentialProvider, StopPolicy,
};
use serde_json::json;
use tokio::sync::Semaphore;

struct Harness {
    scheduler: Scheduler,
    store: Arc<InMemoryExecutionStore>,
    drivers: Arc<ScriptedDriverFactory>,
}

fn quote_flow() -> Flow {
    Flow::new(
        FlowKey::new("acme", "quote"),
        "Acme quote",
        vec![
            Step::goto("https://acme.test/quote"),
            Step::fill("#zip", ValueSpec::lead_key("project.zip")),
            Step::click("#submit"),
        ],
    )
}

fn harness(config: SchedulerConfig, script: Script, flows: Vec<Flow>) -> Harness {
    harness_with_credentials(config, script, flows, StaticCredentialProvider::new())
}

fn harness_with_credentials(
    config: SchedulerConfig,
    script: Script,
    flows: Vec<Flow>,
    credentials: StaticCredentialProvider,
) -> Harness {
    let store = InMemoryExecutionStore::shared();
    let drivers = Arc::new(ScriptedDriverFactory::new(script));
    let source = flows
        .into_iter()
        .fold(InMemoryFlowSource::new(), |source, flow| source.with_flow(flow));
    let scheduler = Scheduler::new(
        config,
        store.clone(),
        drivers.clone(),
        Arc::new(source),
        Arc::new(credentials),
    );
    Harness {
        scheduler,
        store,
        drivers,
    }
}

fn leads(n: usize, flow: &FlowKey) -> RunRequest {
    let items = (0..n)
        .map(|i| {
            RunItem::new(
                format!("lead-{i}"),
                json!({ "project": { "zip": format!("7500{i}") } }),
                flow.clone(),
            )
        })
        .collect();
    RunRequest::new(items)
}

async fn collect(handle: RunHandle) -> (Vec<ProgressEvent>, RunSummary) {
    let RunHandle {
        mut events,
        completion,
        ..
    } = handle;
    let mut seen = Vec::new();
    while let Some(event) = events.recv().await {
        seen.push(event);
    }
    let summary = completion.wait().await.expect("run completes");
    (seen, summary)
}

fn count(events: &[ProgressEvent], name: &str) -> usize {
    events.iter().filter(|e| e.name() == name).count()
}

#[tokio::test]
async fn five_items_two_workers_all_succeed() {
    let h = harness(
        SchedulerConfig::default(),
        Script::new().action_delay(Duration::from_millis(5)),
        vec![quote_flow()],
    );
    let handle = h
        .scheduler
        .run_all(leads(5, &FlowKey::new("acme", "quote")).with_concurrency(2))
        .await
        .unwrap();
    let run_id = handle.run_id.clone();
    let (events, summary) = collect(handle).await;

    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(summary.counts.success, 5);
    assert_eq!(summary.counts.pending, 0);
    assert!(summary.counts.is_consistent());
    assert_eq!(count(&events, "queued"), 5);
    assert_eq!(count(&events, "succeeded"), 5);
    assert!(matches!(events.last(), Some(ProgressEvent::Done { .. })));

    let mut active = 0usize;
    let mut peak = 0usize;
    for event in &events {
        match event {
            ProgressEvent::Started { .. } => active += 1,
            e if e.is_item_terminal() => active -= 1,
            _ => {}
        }
        peak = peak.max(active);
    }
    assert!(peak <= 2, "at most two items in flight, saw {peak}");

    let run = h.store.get_run(&run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert!(run.finished_at.is_some());
    let items = h.store.list_items(&run_id).await.unwrap();
    for item in &items {
        assert_eq!(item.status, ItemStatus::Success);
        assert_eq!(item.current_step, 3);
        assert_eq!(h.store.list_steps(&item.id).await.unwrap().len(), 3);
    }
    assert_eq!(h.drivers.opened(), 5);
}

#[tokio::test]
async fn progress_events_follow_item_lifecycle() {
    let h = harness(SchedulerConfig::default(), Script::new(), vec![quote_flow()]);
    let handle = h
        .scheduler
        .run_all(leads(1, &FlowKey::new("acme", "quote")))
        .await
        .unwrap();
    let (events, _) = collect(handle).await;
    let names: Vec<_> = events.iter().map(ProgressEvent::name).collect();
    assert_eq!(
        names,
        vec!["queued", "started", "progress", "progress", "progress", "succeeded", "done"]
    );
    assert!(matches!(
        events[4],
        ProgressEvent::Progress { step: 3, total: 3, .. }
    ));
}

#[tokio::test]
async fn cancel_after_two_started_cancels_the_rest() {
    let gate = Arc::new(Semaphore::new(0));
    let h = harness(
        SchedulerConfig::default(),
        Script::new().gate("#submit", gate.clone()),
        vec![quote_flow()],
    );
    let RunHandle {
        run_id,
        mut events,
        completion,
    } = h
        .scheduler
        .run_all(leads(5, &FlowKey::new("acme", "quote")).with_concurrency(2))
        .await
        .unwrap();

    let mut seen = Vec::new();
    let mut started = 0;
    while started < 2 {
        let event = events.recv().await.expect("event");
        if matches!(event, ProgressEvent::Started { .. }) {
            started += 1;
        }
        seen.push(event);
    }

    assert!(h.scheduler.cancel(&run_id));
    gate.add_permits(2);

    while let Some(event) = events.recv().await {
        seen.push(event);
    }
    let summary = completion.wait().await.unwrap();

    assert_eq!(summary.status, RunStatus::Stopped);
    assert_eq!(summary.counts.cancelled, 3);
    assert_eq!(summary.counts.success, 2);
    assert!(summary.counts.is_consistent());
    assert_eq!(count(&seen, "started"), 2);
    assert!(matches!(seen.last(), Some(ProgressEvent::Stopped { .. })));

    let cancelled = h
        .store
        .items_by_status(&run_id, ItemStatus::Cancelled)
        .await
        .unwrap();
    assert_eq!(cancelled.len(), 3);
    for item in cancelled {
        assert_eq!(item.attempt, 0);
        assert!(h.store.list_attempts(&item.id).await.unwrap().is_empty());
    }
    assert!(!h.scheduler.cancel(&run_id), "finished runs are forgotten");
}

#[tokio::test]
async fn interrupt_policy_stops_at_step_boundary() {
    let gate = Arc::new(Semaphore::new(0));
    let config = SchedulerConfig {
        stop_policy: StopPolicy::Interrupt,
        ..SchedulerConfig::default()
    };
    let flow = Flow::new(
        FlowKey::new("acme", "quote"),
        "Acme quote",
        vec![Step::click("#first"), Step::click("#second")],
    );
    let script = Script::new().gate("#first", gate.clone());
    let h = harness(config, script, vec![flow]);
    let RunHandle {
        run_id,
        mut events,
        completion,
    } = h
        .scheduler
        .run_all(leads(3, &FlowKey::new("acme", "quote")).with_concurrency(1))
        .await
        .unwrap();

    loop {
        if let Some(ProgressEvent::Started { .. }) = events.recv().await {
            break;
        }
    }
    h.scheduler.cancel(&run_id);
    gate.add_permits(1);
    while events.recv().await.is_some() {}
    let summary = completion.wait().await.unwrap();

    assert_eq!(summary.status, RunStatus::Stopped);
    assert_eq!(summary.counts.cancelled, 3);
    let script = h.drivers.script();
    assert_eq!(script.calls_for(DriverAction::Click).len(), 1);

    let items = h.store.list_items(&run_id).await.unwrap();
    let interrupted = items.iter().find(|i| i.attempt == 1).unwrap();
    let attempts = h.store.list_attempts(&interrupted.id).await.unwrap();
    assert_eq!(attempts[0].status, ItemStatus::Cancelled);
    assert!(attempts[0].is_closed());
    assert_eq!(h.store.list_steps(&interrupted.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn transient_failure_is_retried() {
    let h = harness(
        SchedulerConfig::default(),
        Script::new().fail_times("#submit", 1),
        vec![quote_flow()],
    );
    let handle = h
        .scheduler
        .run_all(leads(1, &FlowKey::new("acme", "quote")))
        .await
        .unwrap();
    let run_id = handle.run_id.clone();
    let (events, summary) = collect(handle).await;

    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(summary.counts.success, 1);
    assert!(events.iter().any(|e| matches!(
        e,
        ProgressEvent::Retrying { attempt: 2, .. }
    )));

    let item = &h.store.list_items(&run_id).await.unwrap()[0];
    assert_eq!(item.attempt, 2);
    let attempts = h.store.list_attempts(&item.id).await.unwrap();
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0].status, ItemStatus::Error);
    assert_eq!(attempts[1].status, ItemStatus::Success);
    assert!(attempts.iter().all(|a| a.is_closed()));

    let sessions = h.drivers.sessions();
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[1].attempt, 2);
}

#[tokio::test(start_paused = true)]
async fn retry_backoff_grows_linearly() {
    let config = SchedulerConfig {
        retry: RetryOpt {
            max_attempts: 3,
            backoff: Duration::from_millis(500),
        },
        ..SchedulerConfig::default()
    };
    let h = harness(config, Script::new().fail_on("#submit"), vec![quote_flow()]);
    let started = tokio::time::Instant::now();
    let handle = h
        .scheduler
        .run_all(leads(1, &FlowKey::new("acme", "quote")))
        .await
        .unwrap();
    let (events, summary) = collect(handle).await;

    assert_eq!(summary.status, RunStatus::Failed);
    assert_eq!(count(&events, "retrying"), 2);
    assert!(started.elapsed() >= Duration::from_millis(1500));
}

#[tokio::test]
async fn exhausted_retries_fail_the_item_and_run() {
    let h = harness(
        SchedulerConfig::default(),
        Script::new().fail_on("#submit"),
        vec![quote_flow()],
    );
    let handle = h
        .scheduler
        .run_all(leads(2, &FlowKey::new("acme", "quote")))
        .await
        .unwrap();
    let run_id = handle.run_id.clone();
    let (events, summary) = collect(handle).await;

    assert_eq!(summary.status, RunStatus::Failed);
    assert_eq!(summary.counts.error, 2);
    let failure = events
        .iter()
        .find_map(|e| match e {
            ProgressEvent::Failed { error, .. } => Some(error.clone()),
            _ => None,
        })
        .unwrap();
    assert!(failure.starts_with("step 3 (click #submit) failed:"), "{failure}");

    for item in h.store.list_items(&run_id).await.unwrap() {
        assert_eq!(item.status, ItemStatus::Error);
        assert_eq!(item.attempt, 2);
        let steps = h.store.list_steps(&item.id).await.unwrap();
        // two attempts of three steps, the last one failing each time
        assert_eq!(steps.len(), 6);
        assert_eq!(steps[2].outcome, StepOutcome::Failed);
    }
}

#[tokio::test]
async fn partial_success_completes_with_error_count() {
    let h = harness(
        SchedulerConfig::default(),
        Script::new().fail_on_value("#zip", "75001"),
        vec![quote_flow()],
    );
    let handle = h
        .scheduler
        .run_all(leads(3, &FlowKey::new("acme", "quote")))
        .await
        .unwrap();
    let (_, summary) = collect(handle).await;

    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(summary.counts.success, 2);
    assert_eq!(summary.counts.error, 1);
    assert!(summary.counts.is_consistent());
}

#[tokio::test]
async fn items_rotate_across_platforms() {
    let zen = Flow::new(FlowKey::new("zen", "quote"), "Zen", vec![Step::click("#go")]);
    let h = harness(
        SchedulerConfig::default(),
        Script::new(),
        vec![quote_flow(), zen],
    );
    let mut items = leads(3, &FlowKey::new("acme", "quote")).items;
    items.extend(leads(3, &FlowKey::new("zen", "quote")).items);
    let handle = h
        .scheduler
        .run_all(RunRequest::new(items).with_concurrency(1))
        .await
        .unwrap();
    let (_, summary) = collect(handle).await;
    assert_eq!(summary.counts.success, 6);

    let platforms: Vec<String> = h
        .drivers
        .sessions()
        .into_iter()
        .map(|s| s.platform)
        .collect();
    assert_eq!(platforms, vec!["acme", "zen", "acme", "zen", "acme", "zen"]);
}

#[tokio::test]
async fn credentials_reach_the_driver_but_not_the_log() {
    let flow = Flow::new(
        FlowKey::new("acme", "login"),
        "Acme login",
        vec![
            Step::fill("#user", ValueSpec::value("{{ credentials.username }}")),
            Step::type_text("#pwd", "{{ credentials.password }}"),
        ],
    );
    let credentials =
        StaticCredentialProvider::new().with("acme", Credentials::new("broker", "s3cret"));
    let h = harness_with_credentials(
        SchedulerConfig::default(),
        Script::new(),
        vec![flow],
        credentials,
    );
    let handle = h
        .scheduler
        .run_all(leads(1, &FlowKey::new("acme", "login")))
        .await
        .unwrap();
    let run_id = handle.run_id.clone();
    let (_, summary) = collect(handle).await;
    assert_eq!(summary.status, RunStatus::Completed);

    let typed = h.drivers.script().calls_for(DriverAction::TypeText);
    assert_eq!(typed[0].value.as_deref(), Some("s3cret"));

    let item = &h.store.list_items(&run_id).await.unwrap()[0];
    let steps = h.store.list_steps(&item.id).await.unwrap();
    assert_eq!(steps[0].mapped_value, Some(json!("broker")));
    assert_eq!(steps[1].mapped_value, Some(json!(REDACTED)));
}

#[tokio::test]
async fn artifact_directories_are_created_per_item() {
    let dir = tempfile::tempdir().unwrap();
    let config = SchedulerConfig {
        artifacts_dir: Some(dir.path().to_path_buf()),
        ..SchedulerConfig::default()
    };
    let h = harness(config, Script::new(), vec![quote_flow()]);
    let handle = h
        .scheduler
        .run_all(leads(2, &FlowKey::new("acme", "quote")))
        .await
        .unwrap();
    let run_id = handle.run_id.clone();
    collect(handle).await;

    for item in h.store.list_items(&run_id).await.unwrap() {
        let expected = dir.path().join(&run_id.0).join(&item.id.0);
        assert!(expected.is_dir());
        assert_eq!(item.artifact_dir.as_deref(), expected.to_str());
    }
}

#[tokio::test]
async fn empty_batch_completes_immediately() {
    let h = harness(SchedulerConfig::default(), Script::new(), vec![quote_flow()]);
    let handle = h.scheduler.run_all(RunRequest::default()).await.unwrap();
    let (events, summary) = collect(handle).await;
    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(summary.counts.total, 0);
    assert_eq!(events.len(), 1);
}

#[tokio::test]
async fn setup_errors_schedule_nothing() {
    let acme = FlowKey::new("acme", "quote");

    let h = harness(SchedulerConfig::default(), Script::new(), vec![quote_flow()]);
    let err = h
        .scheduler
        .run_all(leads(1, &acme).with_concurrency(0))
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::ZeroConcurrency));

    let err = h
        .scheduler
        .run_all(leads(1, &FlowKey::new("acme", "renewal")))
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::Flow(_)));

    let renewal = Flow::new(
        FlowKey::new("acme", "renewal"),
        "Renewal",
        vec![Step::click("#renew")],
    );
    let h = harness(
        SchedulerConfig::default(),
        Script::new(),
        vec![quote_flow(), renewal.clone()],
    );
    let mut items = leads(1, &acme).items;
    items.extend(leads(1, &renewal.key).items);
    let err = h
        .scheduler
        .run_all(RunRequest::new(items.clone()))
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::DuplicatePlatform { .. }));

    let relaxed = SchedulerConfig {
        one_flow_per_platform: false,
        ..SchedulerConfig::default()
    };
    let h2 = harness(relaxed, Script::new(), vec![quote_flow(), renewal]);
    assert!(h2.scheduler.run_all(RunRequest::new(items)).await.is_ok());

    let login = Flow::new(
        FlowKey::new("zen", "login"),
        "Zen login",
        vec![Step::type_text("#pwd", "{{ credentials.password }}")],
    );
    let h3 = harness(SchedulerConfig::default(), Script::new(), vec![login]);
    let err = h3
        .scheduler
        .run_all(leads(1, &FlowKey::new("zen", "login")))
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::MissingCredentials { .. }));

    let invalid = Flow::new(FlowKey::new("bad", "empty"), "Empty", vec![]);
    let h4 = harness(SchedulerConfig::default(), Script::new(), vec![invalid]);
    assert!(h4
        .scheduler
        .run_all(leads(1, &FlowKey::new("bad", "empty")))
        .await
        .is_err());

    for harness in [&h, &h3, &h4] {
        assert_eq!(harness.store.stats().runs, 0);
        assert_eq!(harness.drivers.opened(), 0);
    }
}

#[tokio::test]
async fn unknown_run_cannot_be_cancelled() {
    let h = harness(SchedulerConfig::default(), Script::new(), vec![quote_flow()]);
    assert!(!h.scheduler.cancel(&leadflow_core_types::RunId::new()));
    assert!(h.scheduler.active_runs().is_empty());
}

#[tokio::test]
async fn metrics_track_attempts() {
    let h = harness(
        SchedulerConfig::default(),
        Script::new().fail_times("#submit", 1),
        vec![quote_flow()],
    );
    let handle = h
        .scheduler
        .run_all(leads(2, &FlowKey::new("acme", "quote")).with_concurrency(1))
        .await
        .unwrap();
    collect(handle).await;

    let metrics = h.scheduler.metrics();
    assert_eq!(metrics.enqueued, 2);
    assert_eq!(metrics.started, 3);
    assert_eq!(metrics.retried, 1);
    assert_eq!(metrics.succeeded, 2);
    assert_eq!(metrics.failed, 0);
}

#[tokio::test]
async fn cancel_during_backoff_withdraws_the_retry() {
    let config = SchedulerConfig {
        retry: RetryOpt {
            max_attempts: 3,
            backoff: Duration::from_secs(30),
        },
        ..SchedulerConfig::default()
    };
    let h = harness(config, Script::new().fail_on("#submit"), vec![quote_flow()]);
    let handle = h
        .scheduler
        .run_all(leads(1, &FlowKey::new("acme", "quote")))
        .await
        .unwrap();
    let run_id = handle.run_id.clone();
    assert!(format!("{handle:?}").contains(&run_id.0));

    let failed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let items = h
                .store
                .items_by_status(&run_id, ItemStatus::Error)
                .await
                .unwrap();
            if let Some(item) = items.into_iter().next() {
                break item;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("first attempt fails");
    assert!(h.scheduler.cancel(&run_id));

    let (events, summary) = tokio::time::timeout(Duration::from_secs(5), collect(handle))
        .await
        .expect("backoff is interrupted");

    assert_eq!(count(&events, "retrying"), 0);
    assert_eq!(count(&events, "started"), 1);
    assert_eq!(count(&events, "failed"), 1);
    assert_eq!(summary.counts.error, 1);
    assert!(summary.counts.is_consistent());
    assert_eq!(h.store.list_attempts(&failed.id).await.unwrap().len(), 1);
    assert_eq!(h.scheduler.metrics().retried, 0);
}
