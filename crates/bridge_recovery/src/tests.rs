use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use bridge_common::config::RecoveryJobConfig;
use bridge_common::error::RecoveryError;
use bridge_common::types::{ShardId, TxnId};

use crate::log::{
    MemoryLogStore, OperationStatus, OperationUpdate, TransactionLogEntry, TransactionLogStore,
    TransactionOperation,
};
use crate::scheduler::{CompensationTarget, RecoveryJob, RecoveryScheduler};

/// Target scripted to fail the first `fail_times` attempts per call
/// counter, optionally sleeping before answering.
struct ScriptedTarget {
    fail_times: u32,
    delay: Option<Duration>,
    calls: AtomicU32,
}

impl ScriptedTarget {
    fn succeeding() -> Self {
        Self {
            fail_times: 0,
            delay: None,
            calls: AtomicU32::new(0),
        }
    }

    fn failing(times: u32) -> Self {
        Self {
            fail_times: times,
            delay: None,
            calls: AtomicU32::new(0),
        }
    }

    fn slow(delay: Duration) -> Self {
        Self {
            fail_times: 0,
            delay: Some(delay),
            calls: AtomicU32::new(0),
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompensationTarget for ScriptedTarget {
    async fn compensate(
        &self,
        txn_id: TxnId,
        operation: &TransactionOperation,
    ) -> Result<(), RecoveryError> {
        let attempt = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if attempt < self.fail_times {
            return Err(RecoveryError::Compensation {
                txn_id,
                op_id: operation.op_id,
                shard: operation.shard,
                reason: "shard unavailable".into(),
            });
        }
        Ok(())
    }
}

fn config(retry_limit: u32, timeout_ms: u64) -> RecoveryJobConfig {
    RecoveryJobConfig {
        job_name: "txn-recovery-test".into(),
        cron_expression: "* * * * * *".into(),
        retry_limit,
        operation_timeout_ms: timeout_ms,
        batch_size: 0,
    }
}

fn two_op_entry(txn: u64) -> TransactionLogEntry {
    TransactionLogEntry::new(
        TxnId(txn),
        vec![
            TransactionOperation::new(0, ShardId(0), "INSERT INTO t0 ..."),
            TransactionOperation::new(1, ShardId(1), "INSERT INTO t1 ..."),
        ],
    )
}

fn job(
    target: Arc<ScriptedTarget>,
    store: Arc<MemoryLogStore>,
    cfg: RecoveryJobConfig,
) -> RecoveryJob {
    RecoveryJob::new(cfg, store, target)
}

// ── Pass behavior ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_pass_commits_and_resolves() {
    let store = Arc::new(MemoryLogStore::new());
    store.append(two_op_entry(1)).await.unwrap();
    let target = Arc::new(ScriptedTarget::succeeding());
    let job = job(target.clone(), store.clone(), config(3, 1_000));

    let summary = job.run_pass().await.unwrap();
    assert!(!summary.skipped);
    assert_eq!(summary.scanned, 1);
    assert_eq!(summary.committed, 2);
    assert_eq!(summary.resolved, 1);
    assert_eq!(target.calls(), 2);
    // Resolved entries are removed (archived) from the store.
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_pass_is_idempotent_on_resolved_log() {
    let store = Arc::new(MemoryLogStore::new());
    store.append(two_op_entry(1)).await.unwrap();
    let target = Arc::new(ScriptedTarget::succeeding());
    let job = job(target.clone(), store.clone(), config(3, 1_000));

    job.run_pass().await.unwrap();
    let calls_after_first = target.calls();

    // Second pass over a fully resolved log: nothing scanned, no new
    // side effects.
    let summary = job.run_pass().await.unwrap();
    assert_eq!(summary.scanned, 0);
    assert_eq!(summary.committed, 0);
    assert_eq!(target.calls(), calls_after_first);
}

#[tokio::test]
async fn test_retry_until_exhausted_is_exact() {
    let store = Arc::new(MemoryLogStore::new());
    store
        .append(TransactionLogEntry::new(
            TxnId(9),
            vec![TransactionOperation::new(0, ShardId(2), "UPDATE ...")],
        ))
        .await
        .unwrap();
    let target = Arc::new(ScriptedTarget::failing(u32::MAX));
    let job = job(target.clone(), store.clone(), config(3, 1_000));

    // Passes 1 and 2: failed, retries counted.
    for expected_retries in 1..=2u32 {
        let summary = job.run_pass().await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.exhausted, 0);
        let op = &store.entry(TxnId(9)).unwrap().operations[0];
        assert_eq!(op.status, OperationStatus::Failed);
        assert_eq!(op.retries, expected_retries);
    }

    // Pass 3: budget spent, exactly at the limit.
    let summary = job.run_pass().await.unwrap();
    assert_eq!(summary.exhausted, 1);
    let entry = store.entry(TxnId(9)).unwrap();
    assert_eq!(entry.operations[0].status, OperationStatus::Exhausted);
    assert_eq!(entry.operations[0].retries, 3);
    assert!(entry.is_escalated());
    assert_eq!(target.calls(), 3);

    // Escalated entries are left for manual remediation, never retried.
    let summary = job.run_pass().await.unwrap();
    assert_eq!(summary.scanned, 0);
    assert_eq!(target.calls(), 3);
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn test_timeout_leaves_failed_without_spending_budget() {
    let store = Arc::new(MemoryLogStore::new());
    store
        .append(TransactionLogEntry::new(
            TxnId(4),
            vec![TransactionOperation::new(0, ShardId(0), "DELETE ...")],
        ))
        .await
        .unwrap();
    let target = Arc::new(ScriptedTarget::slow(Duration::from_millis(200)));
    let job = job(target.clone(), store.clone(), config(2, 20));

    let summary = job.run_pass().await.unwrap();
    assert_eq!(summary.timed_out, 1);
    assert_eq!(summary.exhausted, 0);

    let op = &store.entry(TxnId(4)).unwrap().operations[0];
    assert_eq!(op.status, OperationStatus::Failed);
    // Timeouts do not consume the retry budget.
    assert_eq!(op.retries, 0);
    assert!(op.last_error.as_deref().unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_partial_failure_keeps_entry_unresolved() {
    let store = Arc::new(MemoryLogStore::new());
    store.append(two_op_entry(7)).await.unwrap();

    // First op succeeds, second always fails.
    struct HalfTarget;
    #[async_trait]
    impl CompensationTarget for HalfTarget {
        async fn compensate(
            &self,
            txn_id: TxnId,
            operation: &TransactionOperation,
        ) -> Result<(), RecoveryError> {
            if operation.op_id == 0 {
                Ok(())
            } else {
                Err(RecoveryError::Compensation {
                    txn_id,
                    op_id: operation.op_id,
                    shard: operation.shard,
                    reason: "replica lag".into(),
                })
            }
        }
    }

    let job = RecoveryJob::new(config(3, 1_000), store.clone(), Arc::new(HalfTarget));
    let summary = job.run_pass().await.unwrap();
    assert_eq!(summary.committed, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.resolved, 0);

    let entry = store.entry(TxnId(7)).unwrap();
    assert_eq!(entry.operations[0].status, OperationStatus::Committed);
    assert_eq!(entry.operations[1].status, OperationStatus::Failed);
    assert!(!entry.is_resolved());

    // Committed operation is not re-attempted on the next pass.
    let summary = job.run_pass().await.unwrap();
    assert_eq!(summary.committed, 0);
    assert_eq!(summary.failed, 1);
}

#[tokio::test]
async fn test_overlapping_passes_skip() {
    let store = Arc::new(MemoryLogStore::new());
    store.append(two_op_entry(1)).await.unwrap();
    let target = Arc::new(ScriptedTarget::slow(Duration::from_millis(100)));
    let job = Arc::new(job(target, store, config(3, 1_000)));

    let first = tokio::spawn({
        let job = job.clone();
        async move { job.run_pass().await.unwrap() }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    let second = job.run_pass().await.unwrap();
    let first = first.await.unwrap();

    assert!(!first.skipped);
    assert!(second.skipped);
    assert_eq!(second.scanned, 0);
}

// ── Log store invariants ─────────────────────────────────────────────────

#[tokio::test]
async fn test_committed_never_regresses() {
    let store = MemoryLogStore::new();
    let mut entry = two_op_entry(3);
    entry.operations[0].status = OperationStatus::Committed;
    store.append(entry).await.unwrap();

    let err = store
        .update_operation(
            TxnId(3),
            0,
            OperationUpdate {
                status: OperationStatus::Failed,
                retries: 1,
                last_error: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RecoveryError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_unknown_txn_and_op() {
    let store = MemoryLogStore::new();
    let update = OperationUpdate {
        status: OperationStatus::Committed,
        retries: 0,
        last_error: None,
    };
    let err = store
        .update_operation(TxnId(404), 0, update.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, RecoveryError::UnknownTransaction(TxnId(404))));

    store.append(two_op_entry(5)).await.unwrap();
    let err = store.update_operation(TxnId(5), 99, update).await.unwrap_err();
    assert!(matches!(
        err,
        RecoveryError::UnknownOperation { op_id: 99, .. }
    ));
}

#[test]
fn test_entry_resolution_states() {
    let mut entry = two_op_entry(1);
    assert!(!entry.is_resolved());

    entry.operations[0].status = OperationStatus::Committed;
    entry.operations[1].status = OperationStatus::Committed;
    assert!(entry.is_fully_committed());
    assert!(entry.is_resolved());
    assert!(!entry.is_escalated());

    entry.operations[1].status = OperationStatus::Exhausted;
    assert!(!entry.is_fully_committed());
    assert!(entry.is_escalated());
    assert!(entry.is_resolved());

    // A non-terminal operation keeps the entry unresolved even alongside
    // an exhausted one.
    entry.operations[0].status = OperationStatus::Failed;
    assert!(!entry.is_resolved());
}

// ── Scheduler ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_invalid_cron_is_rejected() {
    let scheduler = RecoveryScheduler::new();
    let store = Arc::new(MemoryLogStore::new());
    let target = Arc::new(ScriptedTarget::succeeding());
    let mut cfg = config(3, 1_000);
    cfg.cron_expression = "not a cron".into();
    let err = scheduler
        .start(Arc::new(job(target, store, cfg)))
        .unwrap_err();
    assert!(matches!(err, RecoveryError::InvalidCron { .. }));
}

#[tokio::test]
async fn test_duplicate_job_name_is_rejected() {
    let scheduler = RecoveryScheduler::new();
    let store = Arc::new(MemoryLogStore::new());
    let a = Arc::new(job(
        Arc::new(ScriptedTarget::succeeding()),
        store.clone(),
        config(3, 1_000),
    ));
    let b = Arc::new(job(
        Arc::new(ScriptedTarget::succeeding()),
        store,
        config(3, 1_000),
    ));
    scheduler.start(a).unwrap();
    let err = scheduler.start(b).unwrap_err();
    assert!(matches!(err, RecoveryError::JobAlreadyScheduled(_)));
    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_cron_trigger_drives_passes() {
    let scheduler = RecoveryScheduler::new();
    let store = Arc::new(MemoryLogStore::new());
    store.append(two_op_entry(11)).await.unwrap();
    let target = Arc::new(ScriptedTarget::succeeding());
    // Every second.
    let job = Arc::new(job(target.clone(), store.clone(), config(3, 1_000)));

    scheduler.start(job.clone()).unwrap();
    assert!(scheduler.is_scheduled("txn-recovery-test"));

    // Wait past at least one fire time.
    tokio::time::sleep(Duration::from_millis(2_500)).await;
    assert!(scheduler.stop("txn-recovery-test").await);
    assert!(!scheduler.is_scheduled("txn-recovery-test"));

    assert!(target.calls() >= 2, "expected both operations compensated");
    assert!(store.is_empty(), "entry should be resolved and archived");
}
