//! Transaction log model and store boundary.
//!
//! A log entry is created when a multi-shard write begins and mutated by
//! the executing handler and the recovery scheduler until every operation
//! reaches a terminal state. Status transitions are monotonic: an
//! operation never regresses from `Committed`, and `Exhausted` is final.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use bridge_common::error::RecoveryError;
use bridge_common::types::{ShardId, TxnId};

/// Per-operation status.
///
/// `pending -> committed`, `pending/failed -> failed` (retry counted),
/// `failed -> committed`, `failed -> exhausted` (budget spent, terminal).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationStatus {
    Pending,
    Committed,
    Failed,
    /// Retry budget spent; requires external intervention.
    Exhausted,
}

impl OperationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OperationStatus::Committed | OperationStatus::Exhausted)
    }

    pub fn name(self) -> &'static str {
        match self {
            OperationStatus::Pending => "pending",
            OperationStatus::Committed => "committed",
            OperationStatus::Failed => "failed",
            OperationStatus::Exhausted => "exhausted",
        }
    }
}

/// One participant operation of a distributed transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionOperation {
    pub op_id: u32,
    /// Shard the operation originally targeted; compensation re-attempts
    /// against the same target.
    pub shard: ShardId,
    /// Compensation payload forwarded verbatim to the shard driver.
    pub payload: String,
    pub status: OperationStatus,
    pub retries: u32,
    pub last_error: Option<String>,
}

impl TransactionOperation {
    pub fn new(op_id: u32, shard: ShardId, payload: impl Into<String>) -> Self {
        Self {
            op_id,
            shard,
            payload: payload.into(),
            status: OperationStatus::Pending,
            retries: 0,
            last_error: None,
        }
    }
}

/// Durable record of one distributed transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionLogEntry {
    pub txn_id: TxnId,
    pub operations: Vec<TransactionOperation>,
    pub created_at: DateTime<Utc>,
}

impl TransactionLogEntry {
    pub fn new(txn_id: TxnId, operations: Vec<TransactionOperation>) -> Self {
        Self {
            txn_id,
            operations,
            created_at: Utc::now(),
        }
    }

    pub fn is_fully_committed(&self) -> bool {
        self.operations
            .iter()
            .all(|op| op.status == OperationStatus::Committed)
    }

    /// Every operation terminal, at least one with its budget spent.
    /// Escalated entries are handed to manual remediation, not retried.
    pub fn is_escalated(&self) -> bool {
        self.operations.iter().all(|op| op.status.is_terminal())
            && self
                .operations
                .iter()
                .any(|op| op.status == OperationStatus::Exhausted)
    }

    /// Resolved entries are no longer picked up by recovery passes.
    pub fn is_resolved(&self) -> bool {
        self.is_fully_committed() || self.is_escalated()
    }
}

/// One status mutation applied to an operation.
#[derive(Debug, Clone)]
pub struct OperationUpdate {
    pub status: OperationStatus,
    pub retries: u32,
    pub last_error: Option<String>,
}

/// Minimal CRUD contract the recovery scheduler depends on. The store is
/// responsible for its own concurrency safety (per-entry locking here,
/// row locks in a relational implementation).
#[async_trait]
pub trait TransactionLogStore: Send + Sync {
    async fn append(&self, entry: TransactionLogEntry) -> Result<(), RecoveryError>;

    async fn update_operation(
        &self,
        txn_id: TxnId,
        op_id: u32,
        update: OperationUpdate,
    ) -> Result<(), RecoveryError>;

    /// All entries not yet resolved (neither fully committed nor
    /// escalated).
    async fn load_unresolved(&self) -> Result<Vec<TransactionLogEntry>, RecoveryError>;

    /// Remove (archive) a resolved entry.
    async fn remove(&self, txn_id: TxnId) -> Result<(), RecoveryError>;
}

/// In-memory reference store.
#[derive(Default)]
pub struct MemoryLogStore {
    entries: DashMap<TxnId, TransactionLogEntry>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(&self, txn_id: TxnId) -> Option<TransactionLogEntry> {
        self.entries.get(&txn_id).map(|e| e.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl TransactionLogStore for MemoryLogStore {
    async fn append(&self, entry: TransactionLogEntry) -> Result<(), RecoveryError> {
        self.entries.insert(entry.txn_id, entry);
        Ok(())
    }

    async fn update_operation(
        &self,
        txn_id: TxnId,
        op_id: u32,
        update: OperationUpdate,
    ) -> Result<(), RecoveryError> {
        let mut entry = self
            .entries
            .get_mut(&txn_id)
            .ok_or(RecoveryError::UnknownTransaction(txn_id))?;
        let op = entry
            .operations
            .iter_mut()
            .find(|op| op.op_id == op_id)
            .ok_or(RecoveryError::UnknownOperation { txn_id, op_id })?;
        // Terminal states are final.
        if op.status.is_terminal() && update.status != op.status {
            return Err(RecoveryError::InvalidTransition {
                txn_id,
                op_id,
                from: op.status.name(),
                to: update.status.name(),
            });
        }
        op.status = update.status;
        op.retries = update.retries;
        op.last_error = update.last_error;
        Ok(())
    }

    async fn load_unresolved(&self) -> Result<Vec<TransactionLogEntry>, RecoveryError> {
        Ok(self
            .entries
            .iter()
            .filter(|e| !e.is_resolved())
            .map(|e| e.clone())
            .collect())
    }

    async fn remove(&self, txn_id: TxnId) -> Result<(), RecoveryError> {
        self.entries.remove(&txn_id);
        Ok(())
    }
}
