//! Handler boundary: the only contract dispatch relies on.
//!
//! Every handler exposes `init(statement, session)` followed by one
//! `execute` call. Handlers are per-invocation: each dispatch constructs a
//! fresh instance, so execution runs in parallel across connections
//! without shared mutable state of its own.

use std::sync::Arc;

use bridge_common::error::DispatchError;
use bridge_common::session::ConnectionSession;

use crate::cluster::ClusterState;
use crate::statement::{
    ClearQueryHintStatement, RalStatement, SetQueryHintStatement,
};

/// Outcome of handler execution: a result set for queryable statements,
/// an acknowledgement for updatable ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerResult {
    ResultSet {
        columns: Vec<String>,
        rows: Vec<Vec<String>>,
    },
    Ack {
        affected: u64,
    },
}

/// A statement handler. Constructed per dispatch call, initialized exactly
/// once, then executed by the caller.
pub trait BackendHandler: Send {
    fn init(
        &mut self,
        statement: Arc<dyn RalStatement>,
        session: &ConnectionSession,
    ) -> Result<(), DispatchError>;

    fn execute(&mut self, session: &mut ConnectionSession) -> Result<HandlerResult, DispatchError>;
}

impl std::fmt::Debug for dyn BackendHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BackendHandler")
    }
}

/// Dynamic registration point for queryable statements.
pub trait QueryableExecutor: Send + Sync {
    fn execute_query(
        &self,
        statement: &dyn RalStatement,
        session: &ConnectionSession,
    ) -> Result<HandlerResult, DispatchError>;
}

/// Dynamic registration point for cluster-wide rule mutations, keyed by
/// the statement's exact type.
pub trait GlobalRuleUpdater: Send + Sync {
    fn update(&self, statement: &dyn RalStatement) -> Result<(), DispatchError>;
}

/// Backend that applies scaling/migration job mutations.
pub trait ScalingJobUpdater: Send + Sync {
    fn update(&self, statement: &dyn RalStatement) -> Result<u64, DispatchError>;
}

fn not_initialized() -> DispatchError {
    DispatchError::Execution("handler executed before init".into())
}

// ── Category handlers constructed by the priority chain ──────────────────

/// Wraps a dynamically registered queryable executor.
pub struct QueryableHandler {
    executor: Arc<dyn QueryableExecutor>,
    statement: Option<Arc<dyn RalStatement>>,
}

impl QueryableHandler {
    pub fn new(executor: Arc<dyn QueryableExecutor>) -> Self {
        Self {
            executor,
            statement: None,
        }
    }
}

impl BackendHandler for QueryableHandler {
    fn init(
        &mut self,
        statement: Arc<dyn RalStatement>,
        _session: &ConnectionSession,
    ) -> Result<(), DispatchError> {
        self.statement = Some(statement);
        Ok(())
    }

    fn execute(&mut self, session: &mut ConnectionSession) -> Result<HandlerResult, DispatchError> {
        let statement = self.statement.as_ref().ok_or_else(not_initialized)?;
        self.executor.execute_query(statement.as_ref(), session)
    }
}

/// Applies session-scoped hint directives.
#[derive(Default)]
pub struct HintHandler {
    statement: Option<Arc<dyn RalStatement>>,
}

impl BackendHandler for HintHandler {
    fn init(
        &mut self,
        statement: Arc<dyn RalStatement>,
        _session: &ConnectionSession,
    ) -> Result<(), DispatchError> {
        self.statement = Some(statement);
        Ok(())
    }

    fn execute(&mut self, session: &mut ConnectionSession) -> Result<HandlerResult, DispatchError> {
        let statement = self.statement.as_ref().ok_or_else(not_initialized)?;
        if let Some(set) = statement.as_any().downcast_ref::<SetQueryHintStatement>() {
            session.hints.insert(set.key.clone(), set.value.clone());
            return Ok(HandlerResult::Ack { affected: 0 });
        }
        if statement
            .as_any()
            .downcast_ref::<ClearQueryHintStatement>()
            .is_some()
        {
            session.hints.clear();
            return Ok(HandlerResult::Ack { affected: 0 });
        }
        Err(DispatchError::Execution(format!(
            "unknown hint statement: {}",
            statement.type_name()
        )))
    }
}

/// Routes scaling statements to the registered scaling backend.
pub struct ScalingHandler {
    updater: Arc<dyn ScalingJobUpdater>,
    statement: Option<Arc<dyn RalStatement>>,
}

impl ScalingHandler {
    pub fn new(updater: Arc<dyn ScalingJobUpdater>) -> Self {
        Self {
            updater,
            statement: None,
        }
    }
}

impl BackendHandler for ScalingHandler {
    fn init(
        &mut self,
        statement: Arc<dyn RalStatement>,
        _session: &ConnectionSession,
    ) -> Result<(), DispatchError> {
        self.statement = Some(statement);
        Ok(())
    }

    fn execute(&mut self, _session: &mut ConnectionSession) -> Result<HandlerResult, DispatchError> {
        let statement = self.statement.as_ref().ok_or_else(not_initialized)?;
        let affected = self.updater.update(statement.as_ref())?;
        Ok(HandlerResult::Ack { affected })
    }
}

/// Routes a global-rule statement to the updater registered for its type.
pub struct GlobalRuleHandler {
    updater: Arc<dyn GlobalRuleUpdater>,
    statement: Option<Arc<dyn RalStatement>>,
}

impl GlobalRuleHandler {
    pub fn new(updater: Arc<dyn GlobalRuleUpdater>) -> Self {
        Self {
            updater,
            statement: None,
        }
    }
}

impl BackendHandler for GlobalRuleHandler {
    fn init(
        &mut self,
        statement: Arc<dyn RalStatement>,
        _session: &ConnectionSession,
    ) -> Result<(), DispatchError> {
        self.statement = Some(statement);
        Ok(())
    }

    fn execute(&mut self, _session: &mut ConnectionSession) -> Result<HandlerResult, DispatchError> {
        let statement = self.statement.as_ref().ok_or_else(not_initialized)?;
        self.updater.update(statement.as_ref())?;
        Ok(HandlerResult::Ack { affected: 0 })
    }
}

// ── Fallback-table handlers ──────────────────────────────────────────────

/// Expects the init-provided statement to downcast to `$stmt`; anything
/// else is a wiring defect in the registry.
macro_rules! expect_statement {
    ($handler:expr, $stmt:ty) => {{
        let statement = $handler.statement.as_ref().ok_or_else(not_initialized)?;
        statement
            .as_any()
            .downcast_ref::<$stmt>()
            .ok_or_else(|| {
                DispatchError::Init(format!(
                    "statement {} bound to mismatched handler",
                    statement.type_name()
                ))
            })?
    }};
}

pub struct LabelComputeNodeHandler {
    cluster: Arc<ClusterState>,
    statement: Option<Arc<dyn RalStatement>>,
}

impl LabelComputeNodeHandler {
    pub fn new(cluster: Arc<ClusterState>) -> Self {
        Self {
            cluster,
            statement: None,
        }
    }
}

impl BackendHandler for LabelComputeNodeHandler {
    fn init(
        &mut self,
        statement: Arc<dyn RalStatement>,
        _session: &ConnectionSession,
    ) -> Result<(), DispatchError> {
        self.statement = Some(statement);
        Ok(())
    }

    fn execute(&mut self, _session: &mut ConnectionSession) -> Result<HandlerResult, DispatchError> {
        let stmt = expect_statement!(self, crate::statement::LabelComputeNodeStatement);
        let affected = self.cluster.add_labels(&stmt.instance_id, &stmt.labels);
        tracing::info!(instance = %stmt.instance_id, labels = ?stmt.labels, "compute node labeled");
        Ok(HandlerResult::Ack { affected })
    }
}

pub struct UnlabelComputeNodeHandler {
    cluster: Arc<ClusterState>,
    statement: Option<Arc<dyn RalStatement>>,
}

impl UnlabelComputeNodeHandler {
    pub fn new(cluster: Arc<ClusterState>) -> Self {
        Self {
            cluster,
            statement: None,
        }
    }
}

impl BackendHandler for UnlabelComputeNodeHandler {
    fn init(
        &mut self,
        statement: Arc<dyn RalStatement>,
        _session: &ConnectionSession,
    ) -> Result<(), DispatchError> {
        self.statement = Some(statement);
        Ok(())
    }

    fn execute(&mut self, _session: &mut ConnectionSession) -> Result<HandlerResult, DispatchError> {
        let stmt = expect_statement!(self, crate::statement::UnlabelComputeNodeStatement);
        let affected = self.cluster.remove_labels(&stmt.instance_id, &stmt.labels);
        Ok(HandlerResult::Ack { affected })
    }
}

pub struct SetDistVariableHandler {
    cluster: Arc<ClusterState>,
    statement: Option<Arc<dyn RalStatement>>,
}

impl SetDistVariableHandler {
    pub fn new(cluster: Arc<ClusterState>) -> Self {
        Self {
            cluster,
            statement: None,
        }
    }
}

impl BackendHandler for SetDistVariableHandler {
    fn init(
        &mut self,
        statement: Arc<dyn RalStatement>,
        _session: &ConnectionSession,
    ) -> Result<(), DispatchError> {
        self.statement = Some(statement);
        Ok(())
    }

    fn execute(&mut self, _session: &mut ConnectionSession) -> Result<HandlerResult, DispatchError> {
        let stmt = expect_statement!(self, crate::statement::SetDistVariableStatement);
        self.cluster.set_dist_variable(&stmt.name, &stmt.value);
        Ok(HandlerResult::Ack { affected: 1 })
    }
}

pub struct SetInstanceStatusHandler {
    cluster: Arc<ClusterState>,
    statement: Option<Arc<dyn RalStatement>>,
}

impl SetInstanceStatusHandler {
    pub fn new(cluster: Arc<ClusterState>) -> Self {
        Self {
            cluster,
            statement: None,
        }
    }
}

impl BackendHandler for SetInstanceStatusHandler {
    fn init(
        &mut self,
        statement: Arc<dyn RalStatement>,
        _session: &ConnectionSession,
    ) -> Result<(), DispatchError> {
        self.statement = Some(statement);
        Ok(())
    }

    fn execute(&mut self, _session: &mut ConnectionSession) -> Result<HandlerResult, DispatchError> {
        let stmt = expect_statement!(self, crate::statement::SetInstanceStatusStatement);
        self.cluster.set_instance_enabled(&stmt.instance_id, stmt.enable);
        tracing::info!(instance = %stmt.instance_id, enable = stmt.enable, "instance status changed");
        Ok(HandlerResult::Ack { affected: 1 })
    }
}

pub struct RefreshDatabaseMetadataHandler {
    cluster: Arc<ClusterState>,
    statement: Option<Arc<dyn RalStatement>>,
}

impl RefreshDatabaseMetadataHandler {
    pub fn new(cluster: Arc<ClusterState>) -> Self {
        Self {
            cluster,
            statement: None,
        }
    }
}

impl BackendHandler for RefreshDatabaseMetadataHandler {
    fn init(
        &mut self,
        statement: Arc<dyn RalStatement>,
        _session: &ConnectionSession,
    ) -> Result<(), DispatchError> {
        self.statement = Some(statement);
        Ok(())
    }

    fn execute(&mut self, session: &mut ConnectionSession) -> Result<HandlerResult, DispatchError> {
        let stmt = expect_statement!(self, crate::statement::RefreshDatabaseMetadataStatement);
        let target = stmt
            .database
            .clone()
            .or_else(|| session.schema.clone())
            .ok_or_else(|| DispatchError::Execution("no database selected".into()))?;
        let version = self.cluster.bump_metadata_version(&target);
        tracing::info!(database = %target, version, "database metadata refreshed");
        Ok(HandlerResult::Ack { affected: 0 })
    }
}

pub struct RefreshTableMetadataHandler {
    cluster: Arc<ClusterState>,
    statement: Option<Arc<dyn RalStatement>>,
}

impl RefreshTableMetadataHandler {
    pub fn new(cluster: Arc<ClusterState>) -> Self {
        Self {
            cluster,
            statement: None,
        }
    }
}

impl BackendHandler for RefreshTableMetadataHandler {
    fn init(
        &mut self,
        statement: Arc<dyn RalStatement>,
        _session: &ConnectionSession,
    ) -> Result<(), DispatchError> {
        self.statement = Some(statement);
        Ok(())
    }

    fn execute(&mut self, session: &mut ConnectionSession) -> Result<HandlerResult, DispatchError> {
        let stmt = expect_statement!(self, crate::statement::RefreshTableMetadataStatement);
        let schema = session
            .schema
            .clone()
            .ok_or_else(|| DispatchError::Execution("no database selected".into()))?;
        let key = match &stmt.table {
            Some(table) => format!("{schema}.{table}"),
            None => schema,
        };
        self.cluster.bump_metadata_version(&key);
        Ok(HandlerResult::Ack { affected: 0 })
    }
}

pub struct ImportDatabaseConfigurationHandler {
    statement: Option<Arc<dyn RalStatement>>,
}

impl ImportDatabaseConfigurationHandler {
    pub fn new() -> Self {
        Self { statement: None }
    }
}

impl Default for ImportDatabaseConfigurationHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendHandler for ImportDatabaseConfigurationHandler {
    fn init(
        &mut self,
        statement: Arc<dyn RalStatement>,
        _session: &ConnectionSession,
    ) -> Result<(), DispatchError> {
        self.statement = Some(statement);
        Ok(())
    }

    fn execute(&mut self, _session: &mut ConnectionSession) -> Result<HandlerResult, DispatchError> {
        let stmt = expect_statement!(self, crate::statement::ImportDatabaseConfigurationStatement);
        if stmt.file_path.is_empty() {
            return Err(DispatchError::Execution(
                "import path must not be empty".into(),
            ));
        }
        // The configuration loader lives outside this core; the handler
        // validates and acknowledges.
        tracing::info!(path = %stmt.file_path, "database configuration import requested");
        Ok(HandlerResult::Ack { affected: 0 })
    }
}
