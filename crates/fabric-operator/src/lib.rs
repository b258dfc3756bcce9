//! Change tracking and reconciliation engine for operators managing
//! Hyperledger Fabric nodes (`IBPCA`, `IBPConsole`, `IBPOrderer` and
//! `IBPPeer`).
//!
//! Watched changes are turned into [`update::Update`]s by the [`predicate`]s,
//! queued per resource in an [`queue::UpdateQueue`] and handed one at a time
//! to an [`reconcile::Offering`] by the [`reconcile`] driver, which folds the
//! outcome into the status of the resource.

pub mod cli;
pub mod client;
pub mod cluster;
pub mod context;
pub mod controller;
pub mod crd;
pub mod logging;
pub mod migration;
pub mod namespace;
pub mod predicate;
pub mod queue;
pub mod reconcile;
pub mod status;
pub mod store;
pub mod update;
pub mod utils;
pub mod validation;

#[cfg(test)]
mod testing;

// External re-exports
pub use fabric_version;
pub use k8s_openapi;
pub use kube;
