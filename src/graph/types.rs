//! Dependency graph node, change, and impact types.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analyzer::SymbolInfo;

/// How one file depends on another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyType {
    Import,
    FunctionCall,
    ClassInheritance,
    ModuleReference,
    ApiUsage,
    Configuration,
    DataSchema,
    ExternalLibrary,
}

impl DependencyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Import => "import",
            Self::FunctionCall => "function_call",
            Self::ClassInheritance => "class_inheritance",
            Self::ModuleReference => "module_reference",
            Self::ApiUsage => "api_usage",
            Self::Configuration => "configuration",
            Self::DataSchema => "data_schema",
            Self::ExternalLibrary => "external_library",
        }
    }
}

/// Classified impact of a tracked change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeImpact {
    Breaking,
    Security,
    Compatible,
    Enhancement,
    Internal,
    Deprecation,
}

impl ChangeImpact {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Breaking => "breaking",
            Self::Security => "security",
            Self::Compatible => "compatible",
            Self::Enhancement => "enhancement",
            Self::Internal => "internal",
            Self::Deprecation => "deprecation",
        }
    }

    /// Critical impacts propagate immediately and require manual review.
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::Breaking | Self::Security)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropagationStrategy {
    #[default]
    Immediate,
    Batched,
    Scheduled,
    Conditional,
    Manual,
}

impl PropagationStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::Batched => "batched",
            Self::Scheduled => "scheduled",
            Self::Conditional => "conditional",
            Self::Manual => "manual",
        }
    }
}

/// One analyzed file in the graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyNode {
    pub file_path: String,
    pub module_name: String,
    pub dependencies: BTreeSet<String>,
    /// Files that depend on this one, derived by reverse lookup.
    pub dependents: BTreeSet<String>,
    pub imports: BTreeMap<String, SymbolInfo>,
    pub exports: BTreeMap<String, SymbolInfo>,
    pub last_analyzed: DateTime<Utc>,
}

/// A tracked change and its computed blast radius.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyChange {
    pub id: String,
    pub source_file: String,
    pub changed_by: String,
    pub change_type: DependencyType,
    pub impact: ChangeImpact,
    pub details: serde_json::Value,
    /// Direct dependents, extended to the transitive closure for breaking
    /// changes.
    pub affected_files: Vec<String>,
    pub affected_branches: Vec<String>,
    pub strategy: PropagationStrategy,
    pub requires_manual_review: bool,
    pub propagated_to: BTreeSet<String>,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl DependencyChange {
    pub fn is_pending(&self) -> bool {
        self.processed_at.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Blast-radius report for one file.
#[derive(Debug, Clone, Serialize)]
pub struct ImpactReport {
    pub file_path: String,
    pub direct_dependents: usize,
    pub indirect_dependents: usize,
    /// Every file transitively reachable through the dependents graph.
    pub transitive_files: Vec<String>,
    pub complexity: f64,
    pub risk: RiskLevel,
}

/// Outcome of propagating one change.
#[derive(Debug, Clone, Serialize)]
pub struct PropagationResult {
    pub change_id: String,
    pub updated_branches: Vec<String>,
    pub notified_agents: Vec<String>,
    pub duration_ms: u64,
    pub success: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_critical_impacts() {
        assert!(ChangeImpact::Breaking.is_critical());
        assert!(ChangeImpact::Security.is_critical());
        assert!(!ChangeImpact::Compatible.is_critical());
        assert!(!ChangeImpact::Enhancement.is_critical());
        assert!(!ChangeImpact::Deprecation.is_critical());
    }

    #[test]
    fn test_enum_wire_names() {
        let json = serde_json::to_string(&DependencyType::FunctionCall).unwrap();
        assert_eq!(json, "\"function_call\"");
        let json = serde_json::to_string(&ChangeImpact::Breaking).unwrap();
        assert_eq!(json, "\"breaking\"");
        assert_eq!(RiskLevel::Medium.as_str(), "medium");
    }
}
