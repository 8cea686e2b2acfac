//! Administrative (RAL-style) statement model.
//!
//! Statements arrive fully parsed from the SQL front end; this core never
//! inspects SQL text. Each concrete statement type carries a stable type
//! name used as its registry key, replacing runtime reflection with a
//! tagged-identifier lookup.

use std::any::Any;
use std::fmt;

/// Category of a statement, used by the dispatch priority chain.
///
/// Queryability is not a category: it is determined by whether a queryable
/// executor is registered for the statement's exact type, and that check
/// always runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementCategory {
    /// Session-scoped directive.
    Hint,
    /// Mutates a migration/scaling job.
    ScalingUpdatable,
    /// Mutates a cluster-wide rule.
    GlobalRuleUpdatable,
    /// Everything else; resolved through the fallback table.
    Generic,
}

/// An already-parsed administrative statement. Immutable value object,
/// consumed exactly once by dispatch.
pub trait RalStatement: Any + Send + Sync + fmt::Debug {
    /// Stable identifier, unique per concrete statement type.
    fn type_name(&self) -> &'static str;

    fn category(&self) -> StatementCategory {
        StatementCategory::Generic
    }

    fn as_any(&self) -> &dyn Any;
}

macro_rules! ral_statement {
    ($ty:ident, $category:expr) => {
        impl RalStatement for $ty {
            fn type_name(&self) -> &'static str {
                stringify!($ty)
            }

            fn category(&self) -> StatementCategory {
                $category
            }

            fn as_any(&self) -> &dyn Any {
                self
            }
        }
    };
}

// ── Generic updatable statements (fallback table) ────────────────────────

#[derive(Debug, Clone)]
pub struct LabelComputeNodeStatement {
    pub instance_id: String,
    pub labels: Vec<String>,
}
ral_statement!(LabelComputeNodeStatement, StatementCategory::Generic);

#[derive(Debug, Clone)]
pub struct UnlabelComputeNodeStatement {
    pub instance_id: String,
    /// Empty means "remove all labels".
    pub labels: Vec<String>,
}
ral_statement!(UnlabelComputeNodeStatement, StatementCategory::Generic);

#[derive(Debug, Clone)]
pub struct SetDistVariableStatement {
    pub name: String,
    pub value: String,
}
ral_statement!(SetDistVariableStatement, StatementCategory::Generic);

#[derive(Debug, Clone)]
pub struct SetInstanceStatusStatement {
    pub instance_id: String,
    pub enable: bool,
}
ral_statement!(SetInstanceStatusStatement, StatementCategory::Generic);

#[derive(Debug, Clone)]
pub struct RefreshDatabaseMetadataStatement {
    /// `None` refreshes every database.
    pub database: Option<String>,
}
ral_statement!(RefreshDatabaseMetadataStatement, StatementCategory::Generic);

#[derive(Debug, Clone)]
pub struct RefreshTableMetadataStatement {
    pub table: Option<String>,
}
ral_statement!(RefreshTableMetadataStatement, StatementCategory::Generic);

#[derive(Debug, Clone)]
pub struct ImportDatabaseConfigurationStatement {
    pub file_path: String,
}
ral_statement!(ImportDatabaseConfigurationStatement, StatementCategory::Generic);

// ── Hint statements ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SetQueryHintStatement {
    pub key: String,
    pub value: String,
}
ral_statement!(SetQueryHintStatement, StatementCategory::Hint);

#[derive(Debug, Clone)]
pub struct ClearQueryHintStatement;
ral_statement!(ClearQueryHintStatement, StatementCategory::Hint);

// ── Scaling statements ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct StopMigrationJobStatement {
    pub job_id: String,
}
ral_statement!(StopMigrationJobStatement, StatementCategory::ScalingUpdatable);

#[derive(Debug, Clone)]
pub struct StartMigrationJobStatement {
    pub job_id: String,
}
ral_statement!(StartMigrationJobStatement, StatementCategory::ScalingUpdatable);

// ── Global rule statements ───────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct AlterTransactionRuleStatement {
    pub default_type: String,
    pub provider: String,
}
ral_statement!(
    AlterTransactionRuleStatement,
    StatementCategory::GlobalRuleUpdatable
);

#[derive(Debug, Clone)]
pub struct AlterAuthorityRuleStatement {
    pub provider: String,
}
ral_statement!(
    AlterAuthorityRuleStatement,
    StatementCategory::GlobalRuleUpdatable
);

// ── Queryable statements (resolved via executor registration) ────────────

#[derive(Debug, Clone)]
pub struct ShowDistVariableStatement {
    pub name: String,
}
ral_statement!(ShowDistVariableStatement, StatementCategory::Generic);

#[derive(Debug, Clone)]
pub struct ShowComputeNodesStatement;
ral_statement!(ShowComputeNodesStatement, StatementCategory::Generic);
