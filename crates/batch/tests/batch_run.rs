//! End-to-end batch scenarios against the scriptable fake engine.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

use orbitscope_ai::fake::FakeInferenceClient;
use orbitscope_ai::{CategoryResult, FailureKind, InferenceClient, InferenceError, Prediction};
use orbitscope_batch::{
    BatchConfig, BatchController, BatchError, ExportAggregator, JobStatus, RetryError,
};
use orbitscope_core::{JobId, ValidationError};
use orbitscope_events::{AuditAction, BatchProgress, InMemoryAuditSink};

const WAIT: Duration = Duration::from_secs(5);

fn controller(client: &Arc<FakeInferenceClient>) -> Arc<BatchController<FakeInferenceClient>> {
    Arc::new(BatchController::new(client.clone(), BatchConfig::default()).unwrap())
}

async fn next(rx: &mut UnboundedReceiver<BatchProgress>) -> BatchProgress {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for progress")
        .expect("progress channel closed")
}

fn running(p: &BatchProgress) -> Vec<&str> {
    p.running.iter().map(JobId::as_str).collect()
}

fn hold_all(client: &FakeInferenceClient, ids: &[&str]) {
    for id in ids {
        client.hold(id);
    }
}

async fn wait_for_calls(client: &FakeInferenceClient, job: &str, n: usize) {
    timeout(WAIT, async {
        while client.call_count(job) < n {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("engine was never called");
}

#[tokio::test]
async fn four_jobs_two_slots_progress_sequence() {
    let client = FakeInferenceClient::arc();
    let ids = ["f1", "f2", "f3", "f4"];
    hold_all(&client, &ids);
    client.fail_next("f1", "engine crashed");

    let ctl = controller(&client);
    let mut rx = ctl.reporter().subscribe_channel();
    let run = tokio::spawn({
        let ctl = ctl.clone();
        async move { ctl.run(ids, 2).await }
    });

    let first = next(&mut rx).await;
    assert_eq!(running(&first), ["f1", "f2"]);
    assert_eq!((first.pending, first.completed, first.failed), (2, 0, 0));

    client.release("f1");
    let after_f1 = next(&mut rx).await;
    assert_eq!(after_f1.failed, 1);
    assert_eq!(running(&after_f1), ["f2", "f3"]);
    assert_eq!(after_f1.pending, 1);

    client.release("f2");
    let after_f2 = next(&mut rx).await;
    assert_eq!((after_f2.completed, after_f2.failed), (1, 1));
    assert_eq!(after_f2.running_count, 2);
    assert_eq!(running(&after_f2), ["f3", "f4"]);
    assert_eq!(after_f2.pending, 0);

    client.release("f3");
    client.release("f4");
    let summary = run.await.unwrap().unwrap();
    assert_eq!((summary.completed, summary.failed, summary.abandoned), (3, 1, 0));
    assert!(!summary.cancelled);

    let mut last = next(&mut rx).await;
    while !last.finished {
        last = next(&mut rx).await;
    }
    assert_eq!((last.completed, last.failed, last.running_count), (3, 1, 0));

    let jobs = ctl.jobs().unwrap();
    let f1 = jobs.get("f1").unwrap();
    assert_eq!(f1.status(), JobStatus::Failed);
    assert_eq!(f1.failure().unwrap().kind, FailureKind::Engine);
    assert!(f1.failure().unwrap().message.contains("engine crashed"));
}

#[tokio::test]
async fn single_slot_dispatches_in_submission_order() {
    let client = FakeInferenceClient::arc();
    let ctl = controller(&client);

    let summary = ctl.run(["a", "b", "c", "d"], 1).await.unwrap();

    assert_eq!(summary.completed, 4);
    let calls: Vec<String> = client.calls().into_iter().map(JobId::into_inner).collect();
    assert_eq!(calls, ["a", "b", "c", "d"]);
    assert_eq!(client.peak_in_flight(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn snapshots_stay_consistent_and_within_limit() {
    let client = FakeInferenceClient::arc();
    for i in (0..30).step_by(4) {
        client.fail_next(&format!("job-{i}"), "flaky");
    }
    let ctl = controller(&client);

    let seen: Arc<Mutex<Vec<BatchProgress>>> = Arc::default();
    ctl.reporter().subscribe({
        let seen = seen.clone();
        move |p| seen.lock().unwrap().push(p.clone())
    });

    let ids: Vec<String> = (0..30).map(|i| format!("job-{i}")).collect();
    let summary = ctl.run(ids, 3).await.unwrap();
    assert_eq!(summary.completed + summary.failed, 30);
    assert_eq!(summary.failed, 8);

    let seen = seen.lock().unwrap();
    assert!(!seen.is_empty());
    for p in seen.iter() {
        assert!(p.is_consistent(), "inconsistent snapshot: {p:?}");
        assert!(p.running_count <= 3);
        assert_eq!(p.total, 30);
    }
    let (last, earlier) = seen.split_last().unwrap();
    assert!(last.finished);
    assert!(earlier.iter().all(|p| !p.finished));
    assert!(client.peak_in_flight() <= 3);
}

#[tokio::test]
async fn cancel_stops_dispatch_and_leaves_rest_pending() {
    let client = FakeInferenceClient::arc();
    let ids = ["f1", "f2", "f3", "f4"];
    hold_all(&client, &ids);

    let audit = Arc::new(InMemoryAuditSink::new());
    let ctl = Arc::new(
        BatchController::new(client.clone(), BatchConfig::default())
            .unwrap()
            .with_audit(audit.clone()),
    );
    let mut rx = ctl.reporter().subscribe_channel();
    let run = tokio::spawn({
        let ctl = ctl.clone();
        async move { ctl.run(ids, 2).await }
    });

    assert_eq!(next(&mut rx).await.running_count, 2);
    ctl.cancel();
    ctl.cancel();

    client.release("f1");
    client.release("f2");
    let summary = run.await.unwrap().unwrap();

    assert!(summary.cancelled);
    assert_eq!((summary.completed, summary.abandoned), (2, 2));
    assert_eq!(client.call_count("f3") + client.call_count("f4"), 0);

    let mut last = next(&mut rx).await;
    while !last.finished {
        last = next(&mut rx).await;
    }
    assert!(last.cancelled);
    assert_eq!((last.completed, last.running_count, last.pending), (2, 0, 2));

    let jobs = ctl.jobs().unwrap();
    assert_eq!(jobs.get("f3").unwrap().status(), JobStatus::Pending);
    assert_eq!(jobs.get("f4").unwrap().status(), JobStatus::Pending);
    let f3_before = jobs.get("f3").unwrap();

    let actions = audit.actions();
    assert_eq!(actions.first(), Some(&AuditAction::BatchStarted));
    assert_eq!(actions.last(), Some(&AuditAction::BatchCancelled));

    // A pending job left by cancellation is not retriable.
    assert_eq!(
        ctl.retry("f3").await.unwrap_err(),
        RetryError::NotFailed {
            job: JobId::new("f3"),
            status: JobStatus::Pending
        }
    );
    assert_eq!(jobs.get("f3").unwrap(), f3_before);
    assert_eq!(f3_before.attempts(), 0);
}

#[tokio::test]
async fn cancel_while_idle_is_a_no_op() {
    let client = FakeInferenceClient::arc();
    let ctl = controller(&client);
    ctl.cancel();

    let summary = ctl.run(["a", "b"], 2).await.unwrap();
    assert!(!summary.cancelled);
    assert_eq!(summary.completed, 2);
}

#[tokio::test]
async fn failed_job_can_be_retried_to_completion() {
    let client = FakeInferenceClient::arc();
    client.fail_next("a.bin", "engine crashed");

    let audit = Arc::new(InMemoryAuditSink::new());
    let ctl = BatchController::new(client.clone(), BatchConfig::default())
        .unwrap()
        .with_audit(audit.clone());

    let summary = ctl.run(["a.bin"], 1).await.unwrap();
    assert_eq!(summary.failed, 1);

    let record = ctl.retry("a.bin").await.unwrap();
    assert_eq!(record.status(), JobStatus::Completed);
    assert_eq!(record.attempts(), 2);
    assert!(record.failure().is_none());
    assert_eq!(record.result().unwrap().final_label, "normal");

    let stored = ctl.jobs().unwrap().summary();
    assert_eq!((stored.completed, stored.failed), (1, 0));

    let actions = audit.actions();
    assert_eq!(
        actions,
        [
            AuditAction::BatchStarted,
            AuditAction::InferenceFailed,
            AuditAction::BatchSettled,
            AuditAction::Retry,
        ]
    );
}

#[tokio::test]
async fn retry_preconditions() {
    let client = FakeInferenceClient::arc();
    let ctl = controller(&client);
    assert_eq!(ctl.retry("a").await.unwrap_err(), RetryError::NoBatch);

    client.fail_next("a", "boom");
    ctl.run(["a", "b"], 2).await.unwrap();
    let jobs = ctl.jobs().unwrap();
    let a_before = jobs.get("a").unwrap();
    let b_before = jobs.get("b").unwrap();

    assert_eq!(
        ctl.retry("b").await.unwrap_err(),
        RetryError::NotFailed {
            job: JobId::new("b"),
            status: JobStatus::Completed
        }
    );
    assert_eq!(
        ctl.retry("zzz").await.unwrap_err(),
        RetryError::UnknownJob(JobId::new("zzz"))
    );
    assert_eq!(jobs.get("a").unwrap(), a_before);
    assert_eq!(jobs.get("b").unwrap(), b_before);
    assert_eq!(jobs.summary().failed, 1);

    // Second retry of the same job while the first is in flight.
    client.fail_next("a", "still broken");
    client.hold("a");
    let first = tokio::spawn({
        let ctl = ctl.clone();
        async move { ctl.retry("a").await }
    });
    wait_for_calls(&client, "a", 2).await;
    let in_flight = jobs.get("a").unwrap();
    assert_eq!(
        ctl.retry("a").await.unwrap_err(),
        RetryError::NotFailed {
            job: JobId::new("a"),
            status: JobStatus::Running
        }
    );
    assert_eq!(jobs.get("a").unwrap(), in_flight);
    assert_eq!(in_flight.attempts(), 2);
    client.release("a");

    let record = first.await.unwrap().unwrap();
    assert_eq!(record.status(), JobStatus::Failed);
    assert_eq!(record.failure().unwrap().message, "inference failed: still broken");
    assert_eq!(client.call_count("a"), 2);
}

#[tokio::test]
async fn dropped_retry_still_records_the_outcome() {
    let client = FakeInferenceClient::arc();
    client.fail_next("a", "boom");
    let ctl = controller(&client);
    ctl.run(["a"], 1).await.unwrap();

    client.hold("a");
    assert!(timeout(Duration::from_millis(50), ctl.retry("a")).await.is_err());
    wait_for_calls(&client, "a", 2).await;
    client.release("a");

    let jobs = ctl.jobs().unwrap();
    timeout(WAIT, async {
        while jobs.get("a").unwrap().status() == JobStatus::Running {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("retry outcome was never recorded");

    let a = jobs.get("a").unwrap();
    assert_eq!(a.status(), JobStatus::Completed);
    assert_eq!(a.attempts(), 2);
    let p = jobs.progress();
    assert_eq!((p.completed, p.failed, p.running_count), (1, 0, 0));

    assert_eq!(
        ctl.retry("a").await.unwrap_err(),
        RetryError::NotFailed {
            job: JobId::new("a"),
            status: JobStatus::Completed
        }
    );
}

#[tokio::test]
async fn settled_job_can_be_retried_while_another_batch_runs() {
    let client = FakeInferenceClient::arc();
    let ctl = controller(&client);
    client.fail_next("a", "boom");
    let first = ctl.run(["a"], 1).await.unwrap();

    client.hold("x");
    let mut rx = ctl.reporter().subscribe_channel();
    let run = tokio::spawn({
        let ctl = ctl.clone();
        async move { ctl.run(["x"], 1).await }
    });
    assert_eq!(running(&next(&mut rx).await), ["x"]);
    assert!(ctl.is_running());

    let record = ctl.retry("a").await.unwrap();
    assert_eq!(record.status(), JobStatus::Completed);
    assert_eq!(record.attempts(), 2);
    assert_eq!(ctl.jobs().unwrap().batch_id(), first.batch_id);

    assert_eq!(
        ctl.run(["y"], 1).await.unwrap_err(),
        BatchError::AlreadyRunning
    );

    client.release("x");
    let second = run.await.unwrap().unwrap();
    assert_eq!(second.completed, 1);
    assert!(!ctl.is_running());
    assert_eq!(ctl.jobs().unwrap().batch_id(), second.batch_id);
}

#[tokio::test]
async fn dropped_run_still_settles_and_keeps_its_jobs() {
    let client = FakeInferenceClient::arc();
    let ids = ["a", "b", "c"];
    hold_all(&client, &ids);
    client.fail_next("a", "boom");

    let audit = Arc::new(InMemoryAuditSink::new());
    let ctl = Arc::new(
        BatchController::new(client.clone(), BatchConfig::default())
            .unwrap()
            .with_audit(audit.clone()),
    );
    let mut rx = ctl.reporter().subscribe_channel();
    let run = tokio::spawn({
        let ctl = ctl.clone();
        async move { ctl.run(ids, 2).await }
    });
    assert_eq!(running(&next(&mut rx).await), ["a", "b"]);

    run.abort();
    assert!(run.await.unwrap_err().is_cancelled());
    // In-flight jobs still drain before the controller is free again.
    assert!(ctl.is_running());
    assert!(ctl.jobs().is_none());

    client.release("a");
    client.release("b");
    let mut last = next(&mut rx).await;
    while !last.finished {
        last = next(&mut rx).await;
    }
    assert!(last.cancelled);
    timeout(WAIT, async {
        while ctl.is_running() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("dropped run never settled");

    let jobs = ctl.jobs().unwrap();
    let summary = jobs.summary();
    assert!(summary.cancelled);
    assert_eq!((summary.completed, summary.failed, summary.abandoned), (1, 1, 1));
    assert_eq!(client.call_count("c"), 0);
    assert_eq!(audit.actions().last(), Some(&AuditAction::BatchCancelled));

    client.release("a");
    assert_eq!(ctl.retry("a").await.unwrap().status(), JobStatus::Completed);
    assert_eq!(ctl.run(["d"], 1).await.unwrap().completed, 1);
}

#[tokio::test]
async fn lowering_the_limit_mid_run_throttles_new_dispatch() {
    let client = FakeInferenceClient::arc();
    let ids = ["a", "b", "c", "d"];
    hold_all(&client, &ids);

    let ctl = controller(&client);
    let mut rx = ctl.reporter().subscribe_channel();
    let run = tokio::spawn({
        let ctl = ctl.clone();
        async move { ctl.run(ids, 2).await }
    });

    assert_eq!(running(&next(&mut rx).await), ["a", "b"]);
    ctl.set_concurrency(1).unwrap();

    client.release("a");
    let p = next(&mut rx).await;
    assert_eq!(running(&p), ["b"]);
    assert_eq!(p.pending, 2);

    client.release("b");
    assert_eq!(running(&next(&mut rx).await), ["c"]);

    client.release("c");
    assert_eq!(running(&next(&mut rx).await), ["d"]);
    client.release("d");

    assert_eq!(run.await.unwrap().unwrap().completed, 4);
    assert_eq!(client.peak_in_flight(), 2);
}

#[tokio::test]
async fn raising_the_limit_mid_run_fills_new_slots_at_once() {
    let client = FakeInferenceClient::arc();
    let ids = ["a", "b", "c", "d"];
    hold_all(&client, &ids);

    let ctl = controller(&client);
    let mut rx = ctl.reporter().subscribe_channel();
    let run = tokio::spawn({
        let ctl = ctl.clone();
        async move { ctl.run(ids, 1).await }
    });

    assert_eq!(running(&next(&mut rx).await), ["a"]);
    ctl.set_concurrency(3).unwrap();
    let p = next(&mut rx).await;
    assert_eq!(running(&p), ["a", "b", "c"]);
    assert_eq!(p.pending, 1);

    for id in ids {
        client.release(id);
    }
    assert_eq!(run.await.unwrap().unwrap().completed, 4);
}

#[tokio::test]
async fn invalid_input_is_rejected_before_anything_runs() {
    let client = FakeInferenceClient::arc();
    let ctl = controller(&client);

    assert_eq!(
        ctl.run(Vec::<String>::new(), 2).await.unwrap_err(),
        BatchError::Validation(ValidationError::EmptyBatch)
    );
    assert_eq!(
        ctl.run(["a"], 0).await.unwrap_err(),
        BatchError::Validation(ValidationError::InvalidConcurrency(0))
    );
    assert_eq!(
        ctl.run(["a", "a"], 1).await.unwrap_err(),
        BatchError::Validation(ValidationError::DuplicateIdentifier(JobId::new("a")))
    );
    assert!(client.calls().is_empty());
    assert!(ctl.jobs().is_none());
    assert_eq!(ctl.concurrency(), 4);
}

#[tokio::test]
async fn out_of_contract_payload_fails_the_job() {
    let client = FakeInferenceClient::arc();
    client.script(
        "a",
        Ok(Prediction::new("normal")
            .with_category("rcp", CategoryResult::new("normal").with_probability("normal", 1.5))),
    );
    let ctl = controller(&client);

    ctl.run(["a", "b"], 2).await.unwrap();
    let a = ctl.jobs().unwrap().get("a").unwrap();
    assert_eq!(a.status(), JobStatus::Failed);
    assert_eq!(a.failure().unwrap().kind, FailureKind::InvalidOutput);
}

struct PanickingClient;

#[async_trait]
impl InferenceClient for PanickingClient {
    async fn infer(&self, job: &JobId) -> Result<Prediction, InferenceError> {
        if job.as_str() == "bad" {
            panic!("engine adapter bug");
        }
        Ok(Prediction::new("normal"))
    }
}

#[tokio::test]
async fn panicking_adapter_fails_only_its_job() {
    let ctl = BatchController::new(Arc::new(PanickingClient), BatchConfig::default()).unwrap();

    let summary = ctl.run(["good", "bad", "other"], 2).await.unwrap();
    assert_eq!((summary.completed, summary.failed), (2, 1));

    let bad = ctl.jobs().unwrap().get("bad").unwrap();
    assert_eq!(bad.failure().unwrap().kind, FailureKind::Engine);
}

#[tokio::test]
async fn export_is_a_snapshot_of_settled_records() {
    let client = FakeInferenceClient::arc();
    client.fail_next("b", "boom");
    let ctl = controller(&client);
    ctl.run(["a", "b", "c"], 3).await.unwrap();

    let export = ExportAggregator::from_jobs(&ctl.jobs().unwrap());
    let table = export.tabular();
    assert_eq!(table.rows.len(), 3);
    assert_eq!(export.nested().jobs.len(), 2);

    ctl.retry("b").await.unwrap();

    // Already-built export keeps the failure; a fresh one sees the retry.
    assert_eq!(export.tabular().metadata.failed, 1);
    let fresh = ExportAggregator::from_jobs(&ctl.jobs().unwrap());
    assert_eq!(fresh.tabular().metadata.failed, 0);
    assert_eq!(fresh.nested().jobs.len(), 3);
}

#[tokio::test]
async fn successful_inference_is_audited_with_label_and_identifier() {
    let client = FakeInferenceClient::arc();
    let audit = Arc::new(InMemoryAuditSink::new());
    let ctl = BatchController::new(client.clone(), BatchConfig::default())
        .unwrap()
        .with_audit(audit.clone());

    let summary = ctl.run(["C:\\data\\a.bin"], 1).await.unwrap();

    let inference: Vec<_> = audit
        .all()
        .into_iter()
        .filter(|e| e.action == AuditAction::Inference)
        .collect();
    assert_eq!(inference.len(), 1);
    assert_eq!(inference[0].details, "analysis complete: normal (C:\\data\\a.bin)");
    assert_eq!(inference[0].batch_id, Some(summary.batch_id));
}

#[tokio::test]
async fn disabled_audit_records_nothing() {
    let client = FakeInferenceClient::arc();
    let audit = Arc::new(InMemoryAuditSink::new());
    let ctl = BatchController::new(client, BatchConfig::default().with_audit(false))
        .unwrap()
        .with_audit(audit.clone());

    ctl.run(["a"], 1).await.unwrap();
    assert!(audit.all().is_empty());
}
