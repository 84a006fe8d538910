//! Branch-state synchronization protocol.
//!
//! - `BranchInfo`: per-branch working state shared between agents
//! - `BranchRegistry`: registration, typed updates, subscriptions, conflict
//!   detection, and merge-readiness reporting

mod registry;
mod types;

pub use registry::{BranchRegistry, MergeReport, RegistryStats, RegistrySummary};
pub use types::{
    BranchInfo, BranchInfoType, BranchSyncEvent, BuildStatus, SyncStrategy, UpdateData,
};
