//! Cron-driven transaction recovery.
//!
//! One pass scans unresolved log entries and re-attempts every operation
//! still `Pending` or `Failed`, under a per-operation timeout and a
//! bounded retry budget. Passes are serialized per job identity: a
//! trigger that fires while a pass is in flight is skipped, never run
//! concurrently against the same log.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use cron::Schedule;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use bridge_common::config::RecoveryJobConfig;
use bridge_common::error::RecoveryError;
use bridge_common::types::TxnId;

use crate::log::{
    OperationStatus, OperationUpdate, TransactionLogStore, TransactionOperation,
};

/// Re-attempts one operation against its original shard. Implementations
/// must be idempotent: a pass may be aborted between the side effect and
/// the status write, and the operation will then be attempted again.
#[async_trait]
pub trait CompensationTarget: Send + Sync {
    async fn compensate(
        &self,
        txn_id: TxnId,
        operation: &TransactionOperation,
    ) -> Result<(), RecoveryError>;
}

/// Counters for one recovery pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassSummary {
    /// True when the trigger was skipped because a pass was in flight.
    pub skipped: bool,
    pub scanned: usize,
    pub committed: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub exhausted: usize,
    pub resolved: usize,
}

/// One recovery job: configuration, log store, and compensation target.
pub struct RecoveryJob {
    config: RecoveryJobConfig,
    store: Arc<dyn TransactionLogStore>,
    target: Arc<dyn CompensationTarget>,
    in_flight: AtomicBool,
}

impl RecoveryJob {
    pub fn new(
        config: RecoveryJobConfig,
        store: Arc<dyn TransactionLogStore>,
        target: Arc<dyn CompensationTarget>,
    ) -> Self {
        Self {
            config,
            store,
            target,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.job_name
    }

    pub fn config(&self) -> &RecoveryJobConfig {
        &self.config
    }

    /// Run one pass, or skip it if another pass for this job is still in
    /// flight. Safe to call from the scheduler and manually at once.
    pub async fn run_pass(&self) -> Result<PassSummary, RecoveryError> {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            tracing::debug!(job = %self.config.job_name, "pass in flight, skipping trigger");
            return Ok(PassSummary {
                skipped: true,
                ..PassSummary::default()
            });
        }
        let result = self.run_pass_inner().await;
        self.in_flight.store(false, Ordering::Release);
        result
    }

    async fn run_pass_inner(&self) -> Result<PassSummary, RecoveryError> {
        let mut summary = PassSummary::default();
        let mut entries = self.store.load_unresolved().await?;
        if self.config.batch_size > 0 && entries.len() > self.config.batch_size {
            entries.truncate(self.config.batch_size);
        }
        let op_timeout = Duration::from_millis(self.config.operation_timeout_ms);

        for entry in &mut entries {
            summary.scanned += 1;
            for op in &mut entry.operations {
                if op.status.is_terminal() {
                    continue;
                }
                match tokio::time::timeout(op_timeout, self.target.compensate(entry.txn_id, op))
                    .await
                {
                    Ok(Ok(())) => {
                        op.status = OperationStatus::Committed;
                        op.last_error = None;
                        summary.committed += 1;
                    }
                    Ok(Err(e)) => {
                        op.retries += 1;
                        op.last_error = Some(e.to_string());
                        if op.retries >= self.config.retry_limit {
                            op.status = OperationStatus::Exhausted;
                            summary.exhausted += 1;
                            tracing::warn!(
                                job = %self.config.job_name,
                                txn = %entry.txn_id,
                                op = op.op_id,
                                shard = %op.shard,
                                retries = op.retries,
                                "operation exhausted retry budget"
                            );
                        } else {
                            op.status = OperationStatus::Failed;
                            summary.failed += 1;
                        }
                    }
                    Err(_) => {
                        // Timeout: left failed with the retry budget
                        // untouched, so the operation is retried next pass
                        // instead of being driven to exhausted by slowness.
                        op.status = OperationStatus::Failed;
                        op.last_error = Some(format!(
                            "compensation timed out after {}ms",
                            self.config.operation_timeout_ms
                        ));
                        summary.timed_out += 1;
                    }
                }
                self.store
                    .update_operation(
                        entry.txn_id,
                        op.op_id,
                        OperationUpdate {
                            status: op.status,
                            retries: op.retries,
                            last_error: op.last_error.clone(),
                        },
                    )
                    .await?;
            }

            if entry.is_fully_committed() {
                self.store.remove(entry.txn_id).await?;
                summary.resolved += 1;
                tracing::info!(job = %self.config.job_name, txn = %entry.txn_id, "transaction resolved");
            } else if entry.is_escalated() {
                tracing::warn!(
                    job = %self.config.job_name,
                    txn = %entry.txn_id,
                    "transaction escalated, manual remediation required"
                );
            }
        }

        tracing::debug!(
            job = %self.config.job_name,
            scanned = summary.scanned,
            committed = summary.committed,
            failed = summary.failed,
            timed_out = summary.timed_out,
            exhausted = summary.exhausted,
            resolved = summary.resolved,
            "recovery pass complete"
        );
        Ok(summary)
    }
}

struct ScheduledJob {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Drives recovery jobs on their cron schedules. One task per job
/// identity; distinct jobs run independently.
#[derive(Default)]
pub struct RecoveryScheduler {
    jobs: Mutex<HashMap<String, ScheduledJob>>,
}

impl RecoveryScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a job. Fails on an invalid cron expression or a duplicate
    /// job name.
    pub fn start(&self, job: Arc<RecoveryJob>) -> Result<(), RecoveryError> {
        let schedule = Schedule::from_str(&job.config().cron_expression).map_err(|e| {
            RecoveryError::InvalidCron {
                expr: job.config().cron_expression.clone(),
                reason: e.to_string(),
            }
        })?;

        let mut jobs = self.jobs.lock();
        if jobs.contains_key(job.name()) {
            return Err(RecoveryError::JobAlreadyScheduled(job.name().to_string()));
        }

        let name = job.name().to_string();
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn({
            let job = job.clone();
            let name = name.clone();
            async move {
                tracing::info!(job = %name, cron = %job.config().cron_expression, "recovery job started");
                loop {
                    // Fire times missed while a pass ran are dropped here:
                    // the next wait is always computed from now.
                    let Some(next) = schedule.upcoming(Utc).next() else {
                        tracing::warn!(job = %name, "cron schedule has no future fire times");
                        break;
                    };
                    let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {
                            if let Err(e) = job.run_pass().await {
                                tracing::warn!(job = %name, error = %e, "recovery pass failed");
                            }
                        }
                        _ = shutdown_rx.changed() => break,
                    }
                }
                tracing::info!(job = %name, "recovery job stopped");
            }
        });
        jobs.insert(name, ScheduledJob { shutdown, handle });
        Ok(())
    }

    pub fn is_scheduled(&self, name: &str) -> bool {
        self.jobs.lock().contains_key(name)
    }

    /// Stop one job and wait for its task to exit.
    pub async fn stop(&self, name: &str) -> bool {
        let job = self.jobs.lock().remove(name);
        match job {
            Some(job) => {
                let _ = job.shutdown.send(true);
                let _ = job.handle.await;
                true
            }
            None => false,
        }
    }

    /// Stop every job.
    pub async fn shutdown(&self) {
        let jobs: Vec<ScheduledJob> = {
            let mut map = self.jobs.lock();
            map.drain().map(|(_, job)| job).collect()
        };
        for job in jobs {
            let _ = job.shutdown.send(true);
            let _ = job.handle.await;
        }
    }
}
