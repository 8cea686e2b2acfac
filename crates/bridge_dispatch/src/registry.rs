//! Statement dispatch registry.
//!
//! The registry is built once at process start and read-only afterwards,
//! so concurrent dispatch from many connections needs no locking. The
//! resolution order is a first-match-wins contract: statement categories
//! are not guaranteed disjoint, and reordering the chain changes behavior.

use std::collections::HashMap;
use std::sync::Arc;

use bridge_common::error::DispatchError;
use bridge_common::session::ConnectionSession;

use crate::cluster::ClusterState;
use crate::handler::{
    BackendHandler, GlobalRuleHandler, GlobalRuleUpdater, HintHandler,
    ImportDatabaseConfigurationHandler, LabelComputeNodeHandler, QueryableExecutor,
    QueryableHandler, RefreshDatabaseMetadataHandler, RefreshTableMetadataHandler,
    ScalingHandler, ScalingJobUpdater, SetDistVariableHandler, SetInstanceStatusHandler,
    UnlabelComputeNodeHandler,
};
use crate::statement::{RalStatement, StatementCategory};

/// Factory for a fallback-table handler. Returning `None` means the
/// handler could not be constructed — a registration defect, surfaced as
/// [`DispatchError::HandlerNotConstructible`].
pub type HandlerFactory = Box<dyn Fn() -> Option<Box<dyn BackendHandler>> + Send + Sync>;

struct HandlerEntry {
    handler_name: &'static str,
    factory: HandlerFactory,
}

/// Append-only builder; consumed by [`build`](Self::build). All
/// registration happens here, before any concurrent access exists.
#[derive(Default)]
pub struct DispatchRegistryBuilder {
    queryable: HashMap<&'static str, Arc<dyn QueryableExecutor>>,
    rule_updaters: HashMap<&'static str, Arc<dyn GlobalRuleUpdater>>,
    scaling: Option<Arc<dyn ScalingJobUpdater>>,
    fallback: HashMap<&'static str, HandlerEntry>,
}

impl DispatchRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a queryable executor for a statement's exact type name.
    /// Takes priority over every category check.
    pub fn register_queryable(
        mut self,
        type_name: &'static str,
        executor: Arc<dyn QueryableExecutor>,
    ) -> Self {
        self.queryable.insert(type_name, executor);
        self
    }

    /// Register the global-rule updater for a statement's exact type name.
    pub fn register_rule_updater(
        mut self,
        type_name: &'static str,
        updater: Arc<dyn GlobalRuleUpdater>,
    ) -> Self {
        self.rule_updaters.insert(type_name, updater);
        self
    }

    /// Wire in the scaling backend used for every scaling statement.
    pub fn scaling_updater(mut self, updater: Arc<dyn ScalingJobUpdater>) -> Self {
        self.scaling = Some(updater);
        self
    }

    /// Add a fallback-table entry: statement type name → handler factory.
    /// Adding a new generic statement kind is exactly this plus one
    /// handler type; the priority chain is never edited.
    pub fn register_handler<F>(
        mut self,
        type_name: &'static str,
        handler_name: &'static str,
        factory: F,
    ) -> Self
    where
        F: Fn() -> Option<Box<dyn BackendHandler>> + Send + Sync + 'static,
    {
        self.fallback.insert(
            type_name,
            HandlerEntry {
                handler_name,
                factory: Box::new(factory),
            },
        );
        self
    }

    pub fn build(self) -> DispatchRegistry {
        tracing::debug!(
            queryable = self.queryable.len(),
            rule_updaters = self.rule_updaters.len(),
            fallback = self.fallback.len(),
            "dispatch registry built"
        );
        DispatchRegistry {
            queryable: self.queryable,
            rule_updaters: self.rule_updaters,
            scaling: self.scaling,
            fallback: self.fallback,
        }
    }
}

/// Immutable statement→handler registry. Safe for unsynchronized
/// concurrent reads; share it behind an `Arc`.
pub struct DispatchRegistry {
    queryable: HashMap<&'static str, Arc<dyn QueryableExecutor>>,
    rule_updaters: HashMap<&'static str, Arc<dyn GlobalRuleUpdater>>,
    scaling: Option<Arc<dyn ScalingJobUpdater>>,
    fallback: HashMap<&'static str, HandlerEntry>,
}

impl DispatchRegistry {
    /// Resolve a statement to an initialized handler.
    ///
    /// Dispatch itself mutates nothing beyond handler construction and
    /// `init`; execution is the caller's job.
    pub fn dispatch(
        &self,
        statement: Arc<dyn RalStatement>,
        session: &ConnectionSession,
    ) -> Result<Box<dyn BackendHandler>, DispatchError> {
        let type_name = statement.type_name();

        // First match wins; the order of these checks is part of the
        // dispatch contract.
        let mut handler: Box<dyn BackendHandler> =
            if let Some(executor) = self.queryable.get(type_name) {
                Box::new(QueryableHandler::new(executor.clone()))
            } else if statement.category() == StatementCategory::Hint {
                Box::new(HintHandler::default())
            } else if statement.category() == StatementCategory::ScalingUpdatable {
                let updater = self
                    .scaling
                    .as_ref()
                    .ok_or(DispatchError::MissingScalingUpdater(type_name))?;
                Box::new(ScalingHandler::new(updater.clone()))
            } else if statement.category() == StatementCategory::GlobalRuleUpdatable {
                let updater = self.rule_updaters.get(type_name).ok_or_else(|| {
                    tracing::error!(statement = type_name, "no global rule updater registered");
                    DispatchError::MissingRuleUpdater(type_name)
                })?;
                Box::new(GlobalRuleHandler::new(updater.clone()))
            } else {
                let entry = self
                    .fallback
                    .get(type_name)
                    .ok_or(DispatchError::UnsupportedStatement(type_name))?;
                (entry.factory)().ok_or_else(|| {
                    tracing::error!(
                        statement = type_name,
                        handler = entry.handler_name,
                        "handler factory failed"
                    );
                    DispatchError::HandlerNotConstructible(entry.handler_name)
                })?
            };

        handler.init(statement, session)?;
        Ok(handler)
    }
}

/// Builder pre-wired with the built-in generic statement handlers, the
/// equivalent of the static handler table populated at class-load time in
/// older proxies.
pub fn default_registry(cluster: Arc<ClusterState>) -> DispatchRegistryBuilder {
    let c = cluster;
    DispatchRegistryBuilder::new()
        .register_handler("LabelComputeNodeStatement", "LabelComputeNodeHandler", {
            let c = c.clone();
            move || Some(Box::new(LabelComputeNodeHandler::new(c.clone())))
        })
        .register_handler("UnlabelComputeNodeStatement", "UnlabelComputeNodeHandler", {
            let c = c.clone();
            move || Some(Box::new(UnlabelComputeNodeHandler::new(c.clone())))
        })
        .register_handler("SetDistVariableStatement", "SetDistVariableHandler", {
            let c = c.clone();
            move || Some(Box::new(SetDistVariableHandler::new(c.clone())))
        })
        .register_handler("SetInstanceStatusStatement", "SetInstanceStatusHandler", {
            let c = c.clone();
            move || Some(Box::new(SetInstanceStatusHandler::new(c.clone())))
        })
        .register_handler(
            "RefreshDatabaseMetadataStatement",
            "RefreshDatabaseMetadataHandler",
            {
                let c = c.clone();
                move || Some(Box::new(RefreshDatabaseMetadataHandler::new(c.clone())))
            },
        )
        .register_handler(
            "RefreshTableMetadataStatement",
            "RefreshTableMetadataHandler",
            {
                let c = c.clone();
                move || Some(Box::new(RefreshTableMetadataHandler::new(c.clone())))
            },
        )
        .register_handler(
            "ImportDatabaseConfigurationStatement",
            "ImportDatabaseConfigurationHandler",
            || Some(Box::new(ImportDatabaseConfigurationHandler::new())),
        )
}
