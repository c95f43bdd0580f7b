//! End-to-end scenarios driving the whole engine through its public surface:
//! controller in, analyzer out, everything observed by polling persisted
//! snapshots.

use std::sync::Arc;
use std::time::Duration;

use sievelet::{
    Batch, BatchController, BatchId, BatchStatus, CandidateFile, ControlAction, ControlOutcome,
    EngineConfig, InMemoryObjectStore, InMemoryStateStore, ItemError, ItemSnapshot,
    ItemStatusKind, MockAnalyzer, OwnerId, Verdict, Watchdog,
};

type Engine = BatchController<InMemoryStateStore, InMemoryObjectStore, MockAnalyzer>;

struct Harness {
    controller: Engine,
    store: Arc<InMemoryStateStore>,
    analyzer: MockAnalyzer,
    owner: OwnerId,
}

fn harness(config: EngineConfig) -> Harness {
    let store = Arc::new(InMemoryStateStore::new());
    let analyzer = MockAnalyzer::new();
    let controller = BatchController::new(
        store.clone(),
        Arc::new(InMemoryObjectStore::new()),
        Arc::new(analyzer.clone()),
        config,
    );
    Harness {
        controller,
        store,
        analyzer,
        owner: OwnerId::from("owner-1"),
    }
}

fn fast_config() -> EngineConfig {
    EngineConfig {
        worker_backoff_base_ms: 1,
        max_backoff_ms: 4,
        ..EngineConfig::default()
    }
}

fn candidate(name: &str, body: &str) -> CandidateFile {
    CandidateFile {
        filename: name.to_string(),
        bytes: body.as_bytes().to_vec(),
    }
}

fn score(value: i64) -> Verdict {
    Verdict::Ok(serde_json::json!({ "score": value }))
}

impl Harness {
    async fn wait_batch(&self, batch_id: BatchId, pred: impl Fn(&Batch) -> bool) -> Batch {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let batch = self
                .controller
                .get_batch(&self.owner, batch_id)
                .await
                .unwrap();
            if pred(&batch) {
                return batch;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "batch never reached the expected state: {batch:?}"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn wait_items(
        &self,
        batch_id: BatchId,
        pred: impl Fn(&[ItemSnapshot]) -> bool,
    ) -> Vec<ItemSnapshot> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let items = self
                .controller
                .list_items(&self.owner, batch_id, None)
                .await
                .unwrap();
            if pred(&items) {
                return items;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "items never reached the expected state: {items:?}"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[tokio::test]
async fn happy_path_three_distinct_files() {
    let h = harness(fast_config());
    for (name, value) in [("a.pdf", 80), ("b.pdf", 75), ("c.pdf", 90)] {
        h.analyzer.add_verdict(name, score(value));
    }

    let batch_id = h
        .controller
        .create_batch(
            &h.owner,
            "Senior backend engineer",
            vec![
                candidate("a.pdf", "alice"),
                candidate("b.pdf", "bob"),
                candidate("c.pdf", "carol"),
            ],
        )
        .await
        .unwrap();

    let batch = h
        .wait_batch(batch_id, |b| b.status == BatchStatus::Complete)
        .await;
    assert_eq!(batch.total, 3);
    assert_eq!(batch.completed, 3);
    assert_eq!(batch.failed, 0);
    assert_eq!(batch.cancelled_count, 0);
    assert_eq!(batch.skipped_duplicates, 0);

    let items = h.wait_items(batch_id, |items| items.len() == 3).await;
    for item in &items {
        assert_eq!(item.status, ItemStatusKind::Complete);
        assert_eq!(item.retry_count, 0);
        assert!(item.result.is_some());
        assert!(item.error.is_none());
    }
}

#[tokio::test]
async fn duplicate_suppression() {
    let h = harness(fast_config());
    h.analyzer.add_verdict("a.pdf", score(70));
    h.analyzer.add_verdict("b.pdf", score(60));

    let batch_id = h
        .controller
        .create_batch(
            &h.owner,
            "Data engineer",
            vec![
                candidate("a.pdf", "identical bytes"),
                candidate("a-resubmitted.pdf", "identical bytes"),
                candidate("b.pdf", "unique bytes"),
            ],
        )
        .await
        .unwrap();

    let batch = h
        .wait_batch(batch_id, |b| b.status == BatchStatus::Complete)
        .await;
    assert_eq!(batch.total, 2);
    assert_eq!(batch.skipped_duplicates, 1);
    assert_eq!(batch.completed, 2);
}

#[tokio::test]
async fn transient_retry_then_success() {
    let h = harness(fast_config());
    h.analyzer.add_verdict(
        "a.pdf",
        Verdict::Transient(ItemError::new("rate_limited", "HTTP 429")),
    );
    h.analyzer.add_verdict(
        "a.pdf",
        Verdict::Transient(ItemError::new("server_busy", "HTTP 503")),
    );
    h.analyzer.add_verdict("a.pdf", score(66));

    let batch_id = h
        .controller
        .create_batch(&h.owner, "SRE", vec![candidate("a.pdf", "text")])
        .await
        .unwrap();

    let batch = h
        .wait_batch(batch_id, |b| b.status == BatchStatus::Complete)
        .await;
    assert_eq!(batch.completed, 1);
    assert_eq!(batch.failed, 0);

    let items = h.wait_items(batch_id, |items| items.len() == 1).await;
    assert_eq!(items[0].status, ItemStatusKind::Complete);
    assert_eq!(items[0].retry_count, 2);
    assert!(items[0].result.is_some());
    assert_eq!(h.analyzer.call_count(), 3);
}

#[tokio::test]
async fn permanent_failure() {
    let h = harness(fast_config());
    h.analyzer.add_verdict(
        "a.pdf",
        Verdict::Permanent(ItemError::new("upstream_rejected", "schema mismatch")),
    );

    let batch_id = h
        .controller
        .create_batch(&h.owner, "Platform engineer", vec![candidate("a.pdf", "text")])
        .await
        .unwrap();

    let batch = h
        .wait_batch(batch_id, |b| b.status == BatchStatus::Complete)
        .await;
    assert_eq!(batch.failed, 1);
    assert_eq!(batch.completed, 0);

    let items = h.wait_items(batch_id, |items| items.len() == 1).await;
    assert_eq!(items[0].status, ItemStatusKind::Failed);
    assert_eq!(items[0].retry_count, 0);
    assert_eq!(items[0].error.as_ref().unwrap().code, "upstream_rejected");
    assert_eq!(h.analyzer.call_count(), 1);
}

#[tokio::test]
async fn worker_death_and_watchdog_recovery() {
    let config = EngineConfig {
        lease_seconds: 0,
        ..fast_config()
    };
    let h = harness(config.clone());

    // Attempt one hangs forever: the worker claimed the item and died.
    let _held_gate = h.analyzer.add_verdict_with_gate("a.pdf", score(0));
    // Attempt two, by a fresh worker, succeeds.
    h.analyzer.add_verdict("a.pdf", score(88));

    let batch_id = h
        .controller
        .create_batch(&h.owner, "QA engineer", vec![candidate("a.pdf", "text")])
        .await
        .unwrap();

    // The first worker is wedged inside the analyzer call.
    h.wait_items(batch_id, |items| {
        items.len() == 1 && items[0].status == ItemStatusKind::Running
    })
    .await;

    // The lease (0s here) expires; the sweep returns the item to pending.
    tokio::time::sleep(Duration::from_millis(5)).await;
    let watchdog = Watchdog::new(h.store.clone(), config);
    assert_eq!(watchdog.sweep().await.unwrap(), 1);

    // A fresh worker picks the item up and completes it.
    h.controller.spawn_worker(batch_id);
    let batch = h
        .wait_batch(batch_id, |b| b.status == BatchStatus::Complete)
        .await;
    assert_eq!(batch.completed, 1);

    let items = h.wait_items(batch_id, |items| items.len() == 1).await;
    assert_eq!(items[0].status, ItemStatusKind::Complete);
    assert_eq!(items[0].retry_count, 1);
}

#[tokio::test]
async fn cancel_mid_flight() {
    let h = harness(fast_config());

    // x.pdf is held in flight; y.pdf and z.pdf never get a chance to run.
    let x_gate = h.analyzer.add_verdict_with_gate("x.pdf", score(73));

    let batch_id = h
        .controller
        .create_batch(
            &h.owner,
            "Engineering manager",
            vec![
                candidate("x.pdf", "xavier"),
                candidate("y.pdf", "yolanda"),
                candidate("z.pdf", "zack"),
            ],
        )
        .await
        .unwrap();

    h.wait_items(batch_id, |items| {
        items.iter().any(|i| i.status == ItemStatusKind::Running)
    })
    .await;

    // Cancel flips the batch and sweeps the two pending items in one go.
    let outcome = h
        .controller
        .control_batch(&h.owner, batch_id, ControlAction::Cancel)
        .await
        .unwrap();
    assert_eq!(outcome, ControlOutcome::Applied);

    let batch = h.controller.get_batch(&h.owner, batch_id).await.unwrap();
    assert_eq!(batch.status, BatchStatus::Cancelled);
    assert_eq!(batch.cancelled_count, 2);

    // The in-flight item is not interrupted; when the analyzer returns, the
    // worker's predicated write still lands.
    x_gate.send(()).unwrap();
    let items = h
        .wait_items(batch_id, |items| {
            items.iter().any(|i| i.status == ItemStatusKind::Complete)
        })
        .await;
    let x = items
        .iter()
        .find(|i| i.filename == "x.pdf")
        .expect("x.pdf snapshot");
    assert!(x.result.is_some());

    let batch = h
        .wait_batch(batch_id, |b| b.completed == 1)
        .await;
    // Every slot is settled, but cancelled is terminal: the batch is never
    // promoted back to complete.
    assert_eq!(batch.completed + batch.cancelled_count, batch.total);
    assert_eq!(batch.status, BatchStatus::Cancelled);

    // A watchdog pass over the settled batch has nothing to do.
    let watchdog = Watchdog::new(h.store.clone(), fast_config());
    assert_eq!(watchdog.sweep().await.unwrap(), 0);
}

#[tokio::test]
async fn cancel_is_idempotent() {
    let h = harness(fast_config());
    let x_gate = h.analyzer.add_verdict_with_gate("x.pdf", score(50));

    let batch_id = h
        .controller
        .create_batch(
            &h.owner,
            "Support engineer",
            vec![candidate("x.pdf", "xavier"), candidate("y.pdf", "yolanda")],
        )
        .await
        .unwrap();

    h.wait_items(batch_id, |items| {
        items.iter().any(|i| i.status == ItemStatusKind::Running)
    })
    .await;

    let first = h
        .controller
        .control_batch(&h.owner, batch_id, ControlAction::Cancel)
        .await
        .unwrap();
    assert_eq!(first, ControlOutcome::Applied);
    let after_first = h.controller.get_batch(&h.owner, batch_id).await.unwrap();

    let second = h
        .controller
        .control_batch(&h.owner, batch_id, ControlAction::Cancel)
        .await
        .unwrap();
    assert_eq!(second, ControlOutcome::NotApplicable);
    let after_second = h.controller.get_batch(&h.owner, batch_id).await.unwrap();

    // Same end state, same counter values.
    assert_eq!(after_first.status, after_second.status);
    assert_eq!(after_first.cancelled_count, after_second.cancelled_count);
    assert_eq!(after_first.completed, after_second.completed);

    drop(x_gate);
}

#[tokio::test]
async fn pause_holds_the_queue_and_resume_drains_it() {
    let h = harness(fast_config());
    let x_gate = h.analyzer.add_verdict_with_gate("x.pdf", score(81));
    h.analyzer.add_verdict("y.pdf", score(64));

    let batch_id = h
        .controller
        .create_batch(
            &h.owner,
            "Security engineer",
            vec![candidate("x.pdf", "xavier"), candidate("y.pdf", "yolanda")],
        )
        .await
        .unwrap();

    h.wait_items(batch_id, |items| {
        items.iter().any(|i| i.status == ItemStatusKind::Running)
    })
    .await;

    let outcome = h
        .controller
        .control_batch(&h.owner, batch_id, ControlAction::Pause)
        .await
        .unwrap();
    assert_eq!(outcome, ControlOutcome::Applied);

    // The in-flight item finishes; the queued one stays put.
    x_gate.send(()).unwrap();
    let batch = h.wait_batch(batch_id, |b| b.completed == 1).await;
    assert_eq!(batch.status, BatchStatus::Paused);
    let items = h
        .controller
        .list_items(&h.owner, batch_id, Some(ItemStatusKind::Pending))
        .await
        .unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].filename, "y.pdf");

    // Resume schedules a fresh worker that drains the queue.
    let outcome = h
        .controller
        .control_batch(&h.owner, batch_id, ControlAction::Resume)
        .await
        .unwrap();
    assert_eq!(outcome, ControlOutcome::Applied);

    let batch = h
        .wait_batch(batch_id, |b| b.status == BatchStatus::Complete)
        .await;
    assert_eq!(batch.completed, 2);
}
