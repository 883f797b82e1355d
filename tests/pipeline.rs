//! Pipeline Integration Tests
//!
//! End-to-end runs against shell-script workers: success, fail-fast,
//! missing workers, user stop and single-flight start.

#![cfg(unix)]

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use auditrun::adapters::{Observer, ObserverError};
use auditrun::core::{EventHub, Orchestrator, WorkerCatalog, WorkerSpec};
use auditrun::domain::{BroadcastMessage, PipelineState, RunConfig, RunStatus, StepName, StepStatus};
use serde_json::Value;
use tempfile::TempDir;

/// Observer that keeps every payload it receives
#[derive(Default)]
struct RecordingObserver {
    seen: Mutex<Vec<Value>>,
}

impl RecordingObserver {
    fn events(&self) -> Vec<Value> {
        self.seen.lock().unwrap().clone()
    }

    fn messages(&self) -> Vec<BroadcastMessage> {
        self.events()
            .into_iter()
            .map(|e| serde_json::from_value(e).unwrap())
            .collect()
    }

    fn kinds(&self) -> Vec<String> {
        self.events()
            .iter()
            .map(|e| e["type"].as_str().unwrap().to_string())
            .collect()
    }
}

#[async_trait]
impl Observer for RecordingObserver {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, payload: &str) -> Result<(), ObserverError> {
        let value = serde_json::from_str(payload).map_err(|e| ObserverError::Other(e.to_string()))?;
        self.seen.lock().unwrap().push(value);
        Ok(())
    }
}

struct Fixture {
    dir: TempDir,
    orchestrator: Arc<Orchestrator>,
    recorder: Arc<RecordingObserver>,
}

fn script_path(dir: &Path, step: StepName) -> std::path::PathBuf {
    dir.join("workers").join(format!("{}.sh", step))
}

/// Point every step at `workers/<step>.sh`, run with `sh`. Steps without a
/// script on disk are skipped.
async fn fixture(scripts: &[(StepName, &str)]) -> Fixture {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("workers")).unwrap();

    let mut catalog = WorkerCatalog::default();
    for step in StepName::ALL {
        catalog = catalog.with_spec(
            step,
            WorkerSpec::new(script_path(dir.path(), step)).with_interpreter("sh"),
        );
    }
    for (step, body) in scripts {
        std::fs::write(script_path(dir.path(), *step), body).unwrap();
    }

    let hub = Arc::new(EventHub::default());
    let recorder = Arc::new(RecordingObserver::default());
    hub.connect(recorder.clone()).await.unwrap();

    let orchestrator = Arc::new(Orchestrator::new(dir.path(), catalog, hub));
    Fixture {
        dir,
        orchestrator,
        recorder,
    }
}

fn succeeding(total: u64) -> String {
    format!(
        "echo 'working...'\necho '{{\"type\":\"progress\",\"current\":{t},\"total\":{t},\"message\":\"done\"}}'\n",
        t = total
    )
}

/// Status a step message moves its step to
fn status_after(message: &BroadcastMessage) -> Option<StepStatus> {
    match message {
        BroadcastMessage::StepStarted { .. } | BroadcastMessage::StepProgress { .. } => {
            Some(StepStatus::Running)
        }
        BroadcastMessage::StepCompleted { .. } => Some(StepStatus::Completed),
        BroadcastMessage::StepFailed { .. } => Some(StepStatus::Failed),
        BroadcastMessage::StepSkipped { .. } => Some(StepStatus::Skipped),
        _ => None,
    }
}

/// Every step that produced messages ends with exactly one terminal message,
/// and that message agrees with the final state; silent steps stay pending.
fn assert_step_lifecycles(messages: &[BroadcastMessage], state: &PipelineState) {
    for step in StepName::ALL {
        let statuses: Vec<StepStatus> = messages
            .iter()
            .filter(|m| m.step() == Some(step))
            .filter_map(status_after)
            .collect();

        match statuses.last() {
            None => assert_eq!(state.steps[&step].status, StepStatus::Pending),
            Some(last) => {
                assert!(last.is_terminal(), "step {} did not finish", step);
                assert_eq!(statuses.iter().filter(|s| s.is_terminal()).count(), 1);
                assert_eq!(state.steps[&step].status, *last);
            }
        }
    }
}

async fn wait_idle(orchestrator: &Orchestrator) {
    tokio::time::timeout(Duration::from_secs(20), orchestrator.wait_idle())
        .await
        .expect("run did not finish in time");
}

async fn wait_until_running(orchestrator: &Orchestrator, step: StepName) {
    for _ in 0..200 {
        if orchestrator.status().steps[&step].status == StepStatus::Running {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("step {} never started", step);
}

#[tokio::test]
async fn test_all_steps_succeed() {
    let bodies: Vec<(StepName, String)> = StepName::ALL.iter().map(|s| (*s, succeeding(2))).collect();
    let scripts: Vec<(StepName, &str)> = bodies.iter().map(|(s, b)| (*s, b.as_str())).collect();
    let f = fixture(&scripts).await;

    let outcome = f.orchestrator.start(RunConfig::new("fitness", 10)).await.unwrap();
    assert!(outcome.accepted);
    assert_eq!(
        outcome.message,
        "Pipeline started for niche 'fitness' with max 10 sites"
    );
    wait_idle(&f.orchestrator).await;

    let state = f.orchestrator.status();
    assert_eq!(state.status, RunStatus::Completed);
    assert_eq!(state.run_id, outcome.run_id);
    assert!(state.current_step.is_none());
    assert!(state.error.is_none());
    assert!(state.completed_at.is_some());
    for step in StepName::ALL {
        let s = &state.steps[&step];
        assert_eq!(s.status, StepStatus::Completed);
        assert_eq!(s.progress, 100);
        assert_eq!(s.items_processed, 2);
    }

    let mut expected = vec!["connected".to_string(), "pipeline_started".to_string()];
    for _ in StepName::ALL {
        expected.extend(["step_started", "step_progress", "step_completed"].map(String::from));
    }
    expected.push("pipeline_completed".to_string());
    assert_eq!(f.recorder.kinds(), expected);
    assert_step_lifecycles(&f.recorder.messages(), &state);

    let events = f.recorder.events();
    let started = &events[1];
    assert_eq!(started["config"]["niche"], "fitness");
    assert_eq!(started["steps"].as_array().unwrap().len(), 6);
    assert_eq!(started["steps"][0], "discovery");

    let completed = events.last().unwrap();
    assert_eq!(completed["summary"]["steps_completed"], 6);
    assert_eq!(completed["summary"]["total_steps"], 6);
    assert_eq!(completed["summary"]["items_processed"], 12);

    // Steps are reported in order
    let step_order: Vec<&str> = events
        .iter()
        .filter(|e| e["type"] == "step_started")
        .map(|e| e["step"].as_str().unwrap())
        .collect();
    assert_eq!(
        step_order,
        vec!["discovery", "verification", "audit", "analysis", "contacts", "outreach"]
    );
}

#[tokio::test]
async fn test_failing_step_stops_the_run() {
    let ok = succeeding(1);
    let f = fixture(&[
        (StepName::Discovery, ok.as_str()),
        (StepName::Verification, ok.as_str()),
        (StepName::Audit, "echo 'boom' >&2\nexit 1\n"),
        (StepName::Analysis, ok.as_str()),
    ])
    .await;

    f.orchestrator.start(RunConfig::default()).await.unwrap();
    wait_idle(&f.orchestrator).await;

    let state = f.orchestrator.status();
    assert_eq!(state.status, RunStatus::Failed);
    assert_eq!(state.error.as_deref(), Some("Step audit failed: Exit code: 1"));
    assert_eq!(state.steps[&StepName::Audit].status, StepStatus::Failed);
    assert_eq!(
        state.steps[&StepName::Audit].error.as_deref(),
        Some("Exit code: 1")
    );
    for step in [StepName::Analysis, StepName::Contacts, StepName::Outreach] {
        assert_eq!(state.steps[&step].status, StepStatus::Pending);
    }

    assert_step_lifecycles(&f.recorder.messages(), &state);
    let kinds = f.recorder.kinds();
    assert_eq!(kinds.last().map(String::as_str), Some("pipeline_failed"));
    assert!(!kinds.contains(&"pipeline_completed".to_string()));
    assert_eq!(
        f.recorder.events().last().unwrap()["error"],
        "Step audit failed: Exit code: 1"
    );
    let started_after_failure = f
        .recorder
        .events()
        .iter()
        .filter(|e| e["type"] == "step_started" && e["step"] == "analysis")
        .count();
    assert_eq!(started_after_failure, 0);
}

#[tokio::test]
async fn test_missing_worker_is_skipped() {
    let ok = succeeding(3);
    let scripts: Vec<(StepName, &str)> = StepName::ALL
        .iter()
        .filter(|s| **s != StepName::Verification)
        .map(|s| (*s, ok.as_str()))
        .collect();
    let f = fixture(&scripts).await;

    f.orchestrator.start(RunConfig::default()).await.unwrap();
    wait_idle(&f.orchestrator).await;

    let state = f.orchestrator.status();
    assert_eq!(state.status, RunStatus::Completed);
    let verification = &state.steps[&StepName::Verification];
    assert_eq!(verification.status, StepStatus::Skipped);
    assert!(verification.message.as_deref().unwrap_or_default().contains("Worker not found"));
    assert_step_lifecycles(&f.recorder.messages(), &state);

    let skipped: Vec<Value> = f
        .recorder
        .events()
        .into_iter()
        .filter(|e| e["type"] == "step_skipped")
        .collect();
    assert_eq!(skipped.len(), 1);
    assert_eq!(skipped[0]["step"], "verification");

    let events = f.recorder.events();
    let summary = &events.last().unwrap()["summary"];
    assert_eq!(summary["steps_completed"], 6);
    assert_eq!(summary["items_processed"], 15);
}

#[tokio::test]
async fn test_stop_interrupts_running_step() {
    let f = fixture(&[
        (
            StepName::Discovery,
            "echo '{\"type\":\"progress\",\"current\":1,\"total\":4,\"message\":\"searching\"}'\nexec sleep 30\n",
        ),
        (StepName::Verification, "exit 0\n"),
    ])
    .await;

    f.orchestrator.start(RunConfig::default()).await.unwrap();
    wait_until_running(&f.orchestrator, StepName::Discovery).await;

    let outcome = f.orchestrator.stop();
    assert!(outcome.acknowledged);
    assert_eq!(outcome.message, "Pipeline stop requested");
    wait_idle(&f.orchestrator).await;

    let state = f.orchestrator.status();
    assert_eq!(state.status, RunStatus::Idle);
    assert_eq!(state.error.as_deref(), Some("Stopped by user"));
    assert_eq!(state.steps[&StepName::Discovery].status, StepStatus::Failed);
    assert_eq!(state.steps[&StepName::Verification].status, StepStatus::Pending);
    assert!(!f.orchestrator.is_active());

    let kinds = f.recorder.kinds();
    assert_eq!(kinds.last().map(String::as_str), Some("pipeline_stopped"));
    assert!(!kinds.contains(&"pipeline_completed".to_string()));
}

#[tokio::test]
async fn test_stop_before_first_step_runs_nothing() {
    let ok = succeeding(1);
    let scripts: Vec<(StepName, &str)> = StepName::ALL.iter().map(|s| (*s, ok.as_str())).collect();
    let f = fixture(&scripts).await;

    // The run task cannot start before this test yields, so the stop is
    // seen ahead of the first step
    let outcome = f.orchestrator.start(RunConfig::default()).await.unwrap();
    assert!(outcome.accepted);
    assert_eq!(f.orchestrator.stop().message, "Pipeline stop requested");
    wait_idle(&f.orchestrator).await;

    assert_eq!(
        f.recorder.kinds(),
        vec!["connected", "pipeline_started", "pipeline_stopped"]
    );

    let state = f.orchestrator.status();
    assert_eq!(state.status, RunStatus::Idle);
    assert_eq!(state.error.as_deref(), Some("Stopped by user"));
    assert_eq!(state.run_id, outcome.run_id);
    assert!(state.current_step.is_none());
    assert!(state.completed_at.is_none());
    for step in StepName::ALL {
        assert_eq!(state.steps[&step].status, StepStatus::Pending);
        assert!(!state.steps[&step].status.is_terminal());
    }
    assert_step_lifecycles(&f.recorder.messages(), &state);
    assert!(!f.orchestrator.is_active());
}

#[tokio::test]
async fn test_second_start_is_rejected_while_running() {
    let f = fixture(&[(StepName::Discovery, "exec sleep 30\n")]).await;

    let first = f.orchestrator.start(RunConfig::default()).await.unwrap();
    assert!(first.accepted);
    wait_until_running(&f.orchestrator, StepName::Discovery).await;

    let second = f.orchestrator.start(RunConfig::new("pets", 5)).await.unwrap();
    assert!(!second.accepted);
    assert_eq!(second.run_id, first.run_id);
    assert_eq!(second.message, "Pipeline is already running");
    assert_eq!(f.orchestrator.status().run_id, first.run_id);

    let started = f
        .recorder
        .kinds()
        .iter()
        .filter(|k| *k == "pipeline_started")
        .count();
    assert_eq!(started, 1);

    f.orchestrator.stop();
    wait_idle(&f.orchestrator).await;
}

#[tokio::test]
async fn test_new_run_replaces_finished_run() {
    let f = fixture(&[(StepName::Discovery, "exit 3\n")]).await;

    let first = f.orchestrator.start(RunConfig::default()).await.unwrap();
    wait_idle(&f.orchestrator).await;
    assert_eq!(f.orchestrator.status().status, RunStatus::Failed);

    // Fix the worker and run again
    std::fs::write(script_path(f.dir.path(), StepName::Discovery), "exit 0\n").unwrap();
    let second = f.orchestrator.start(RunConfig::default()).await.unwrap();
    assert!(second.accepted);
    assert_ne!(second.run_id, first.run_id);
    wait_idle(&f.orchestrator).await;

    let state = f.orchestrator.status();
    assert_eq!(state.status, RunStatus::Completed);
    assert_eq!(state.run_id, second.run_id);
    assert!(state.error.is_none());
    assert_eq!(state.steps[&StepName::Discovery].status, StepStatus::Completed);
}

#[tokio::test]
async fn test_config_placeholders_reach_worker() {
    let f = fixture(&[]).await;
    let log = f.dir.path().join("args.txt");
    let body = format!("echo \"$1 $2\" > '{}'\n", log.display());
    std::fs::write(script_path(f.dir.path(), StepName::Discovery), body).unwrap();

    let catalog = f.orchestrator.workers().clone().with_spec(
        StepName::Discovery,
        WorkerSpec::new(script_path(f.dir.path(), StepName::Discovery))
            .with_interpreter("sh")
            .with_args(["{niche}", "{max_sites}"]),
    );
    let orchestrator = Arc::new(Orchestrator::new(
        f.dir.path(),
        catalog,
        Arc::new(EventHub::default()),
    ));

    orchestrator.start(RunConfig::new("home decor", 7)).await.unwrap();
    wait_idle(&orchestrator).await;

    let written = std::fs::read_to_string(&log).unwrap();
    assert_eq!(written.trim(), "home decor 7");
}
