//! Per-connection session state.
//!
//! The session is owned by the connection layer and passed into the
//! dispatch core by reference; dispatch never takes ownership of it.

use std::collections::HashMap;

/// Transaction status of a connection, as reported in status flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionStatus {
    #[default]
    Idle,
    InTransaction,
    Failed,
}

/// Per-connection session state carried across statements.
#[derive(Debug, Clone)]
pub struct ConnectionSession {
    /// Connection id (maps to the wire-protocol thread id).
    pub connection_id: u32,
    /// Authenticated user name.
    pub user: String,
    /// Client host, as observed at accept time.
    pub host: String,
    /// Currently selected schema, if any.
    pub schema: Option<String>,
    pub autocommit: bool,
    pub txn_status: TransactionStatus,
    /// Session-scoped hint directives set by hint statements.
    pub hints: HashMap<String, String>,
}

impl ConnectionSession {
    pub fn new(connection_id: u32, user: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            connection_id,
            user: user.into(),
            host: host.into(),
            schema: None,
            autocommit: true,
            txn_status: TransactionStatus::Idle,
            hints: HashMap::new(),
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }
}
