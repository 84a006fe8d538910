//! File-level dependency graph and change propagation.
//!
//! - `DependencyGraphEngine`: graph construction (through a
//!   [`crate::analyzer::StaticAnalyzer`]), change tracking with impact
//!   classification, impact reports, and propagation to affected branches
//! - `DependencyChange`: one tracked change and its blast radius

mod engine;
mod types;

pub use engine::{DependencyGraphEngine, GraphStats, GraphSummary};
pub use types::{
    ChangeImpact, DependencyChange, DependencyNode, DependencyType, ImpactReport,
    PropagationResult, PropagationStrategy, RiskLevel,
};
