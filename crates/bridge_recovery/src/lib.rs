//! Asynchronous recovery for incomplete distributed transactions: a
//! cron-driven job that compensates partial multi-shard commits until
//! every operation reaches a terminal state.

pub mod log;
pub mod scheduler;

#[cfg(test)]
mod tests;

pub use log::{
    MemoryLogStore, OperationStatus, OperationUpdate, TransactionLogEntry, TransactionLogStore,
    TransactionOperation,
};
pub use scheduler::{CompensationTarget, PassSummary, RecoveryJob, RecoveryScheduler};
