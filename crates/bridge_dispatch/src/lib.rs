//! Statement dispatch: maps parsed administrative statements to handlers
//! through a fixed priority chain and a static fallback table.

pub mod cluster;
pub mod handler;
pub mod registry;
pub mod statement;

pub use cluster::ClusterState;
pub use handler::{
    BackendHandler, GlobalRuleUpdater, HandlerResult, QueryableExecutor, ScalingJobUpdater,
};
pub use registry::{default_registry, DispatchRegistry, DispatchRegistryBuilder};
pub use statement::{RalStatement, StatementCategory};
