//! Branch state types and the sync metadata tables.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bus::MessagePriority;

/// Kinds of branch information the protocol shares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchInfoType {
    BranchState,
    CommitHistory,
    FileChanges,
    DependencyMap,
    TestStatus,
    BuildStatus,
    ConflictInfo,
    MergeReadiness,
    WorkProgress,
    ApiChanges,
}

impl BranchInfoType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BranchState => "branch_state",
            Self::CommitHistory => "commit_history",
            Self::FileChanges => "file_changes",
            Self::DependencyMap => "dependency_map",
            Self::TestStatus => "test_status",
            Self::BuildStatus => "build_status",
            Self::ConflictInfo => "conflict_info",
            Self::MergeReadiness => "merge_readiness",
            Self::WorkProgress => "work_progress",
            Self::ApiChanges => "api_changes",
        }
    }

    /// Updates of these types always sync, regardless of strategy.
    pub fn is_immediate(&self) -> bool {
        matches!(
            self,
            Self::ConflictInfo | Self::ApiChanges | Self::BuildStatus
        )
    }

    /// Updates of these types ask the receiving agent to act.
    pub fn requires_action(&self) -> bool {
        matches!(self, Self::ConflictInfo | Self::ApiChanges)
    }

    /// Message priority used when this info type is shared.
    pub fn priority(&self) -> MessagePriority {
        match self {
            Self::ConflictInfo | Self::ApiChanges => MessagePriority::High,
            Self::BuildStatus
            | Self::TestStatus
            | Self::MergeReadiness
            | Self::DependencyMap => MessagePriority::Normal,
            Self::FileChanges
            | Self::CommitHistory
            | Self::WorkProgress
            | Self::BranchState => MessagePriority::Low,
        }
    }

    /// Relevance score used when this info type is shared as knowledge.
    pub fn relevance(&self) -> f64 {
        match self {
            Self::ConflictInfo => 1.0,
            Self::ApiChanges => 0.9,
            Self::MergeReadiness => 0.8,
            Self::BuildStatus | Self::TestStatus => 0.7,
            Self::DependencyMap => 0.6,
            Self::FileChanges | Self::WorkProgress => 0.5,
            Self::CommitHistory => 0.4,
            Self::BranchState => 0.3,
        }
    }
}

/// Strategies for synchronizing branch information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncStrategy {
    /// Share every update as it happens.
    Immediate,
    /// Share at regular intervals.
    Periodic,
    /// Share only when requested.
    OnDemand,
    /// Share at key milestones.
    Milestone,
    /// Periodic, but only for recently active branches.
    #[default]
    Smart,
}

impl SyncStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::Periodic => "periodic",
            Self::OnDemand => "on_demand",
            Self::Milestone => "milestone",
            Self::Smart => "smart",
        }
    }

    pub fn runs_background_sync(&self) -> bool {
        matches!(self, Self::Periodic | Self::Smart)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Success,
    Failure,
    Unknown,
}

impl BuildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Unknown => "unknown",
        }
    }
}

/// Typed payload for [`crate::registry::BranchRegistry::update_branch_info`].
/// Each variant maps to exactly one [`BranchInfoType`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UpdateData {
    FileChanges {
        files: Vec<String>,
    },
    TestStatus {
        passed: Option<bool>,
    },
    BuildStatus {
        status: BuildStatus,
    },
    ConflictInfo {
        conflicts: Vec<String>,
    },
    ApiChanges {
        signatures: HashMap<String, String>,
    },
    DependencyMap {
        dependencies: HashMap<String, Vec<String>>,
    },
    MergeReadiness {
        ready: bool,
    },
    WorkProgress {
        completed: Vec<String>,
        remaining: Vec<String>,
    },
    CommitHistory {
        commit_count: u64,
        recent: Vec<String>,
    },
    BranchState {
        note: String,
    },
}

impl UpdateData {
    pub fn info_type(&self) -> BranchInfoType {
        match self {
            Self::FileChanges { .. } => BranchInfoType::FileChanges,
            Self::TestStatus { .. } => BranchInfoType::TestStatus,
            Self::BuildStatus { .. } => BranchInfoType::BuildStatus,
            Self::ConflictInfo { .. } => BranchInfoType::ConflictInfo,
            Self::ApiChanges { .. } => BranchInfoType::ApiChanges,
            Self::DependencyMap { .. } => BranchInfoType::DependencyMap,
            Self::MergeReadiness { .. } => BranchInfoType::MergeReadiness,
            Self::WorkProgress { .. } => BranchInfoType::WorkProgress,
            Self::CommitHistory { .. } => BranchInfoType::CommitHistory,
            Self::BranchState { .. } => BranchInfoType::BranchState,
        }
    }
}

/// Current state of a registered branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchInfo {
    pub branch_name: String,
    pub agent_id: String,
    pub base_branch: String,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub commit_count: u64,
    pub files_modified: Vec<String>,
    pub tests_passed: Option<bool>,
    pub build_status: Option<BuildStatus>,
    pub merge_ready: bool,
    pub conflicts_detected: Vec<String>,
    /// file -> files it depends on.
    pub dependencies: HashMap<String, Vec<String>>,
    /// API name -> signature.
    pub api_signatures: HashMap<String, String>,
    pub work_items: Vec<String>,
    pub completed_items: Vec<String>,
}

impl BranchInfo {
    pub fn new(
        branch_name: impl Into<String>,
        agent_id: impl Into<String>,
        base_branch: impl Into<String>,
        work_items: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            branch_name: branch_name.into(),
            agent_id: agent_id.into(),
            base_branch: base_branch.into(),
            created_at: now,
            last_updated: now,
            commit_count: 0,
            files_modified: Vec::new(),
            tests_passed: None,
            build_status: None,
            merge_ready: false,
            conflicts_detected: Vec::new(),
            dependencies: HashMap::new(),
            api_signatures: HashMap::new(),
            work_items,
            completed_items: Vec::new(),
        }
    }

    pub fn has_conflicts(&self) -> bool {
        !self.conflicts_detected.is_empty()
    }
}

/// Append-only record of one synchronization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchSyncEvent {
    pub id: String,
    pub branch_name: String,
    pub agent_id: String,
    pub event_type: BranchInfoType,
    pub event_data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub priority: MessagePriority,
    pub requires_action: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_and_relevance_tables() {
        assert_eq!(BranchInfoType::ConflictInfo.priority(), MessagePriority::High);
        assert_eq!(BranchInfoType::ApiChanges.priority(), MessagePriority::High);
        assert_eq!(BranchInfoType::BuildStatus.priority(), MessagePriority::Normal);
        assert_eq!(BranchInfoType::DependencyMap.priority(), MessagePriority::Normal);
        assert_eq!(BranchInfoType::FileChanges.priority(), MessagePriority::Low);

        assert_eq!(BranchInfoType::ConflictInfo.relevance(), 1.0);
        assert_eq!(BranchInfoType::ApiChanges.relevance(), 0.9);
        assert_eq!(BranchInfoType::TestStatus.relevance(), 0.7);
        assert_eq!(BranchInfoType::BranchState.relevance(), 0.3);
    }

    #[test]
    fn test_immediate_types() {
        assert!(BranchInfoType::ConflictInfo.is_immediate());
        assert!(BranchInfoType::ApiChanges.is_immediate());
        assert!(BranchInfoType::BuildStatus.is_immediate());
        assert!(!BranchInfoType::FileChanges.is_immediate());
        assert!(!BranchInfoType::MergeReadiness.is_immediate());
    }

    #[test]
    fn test_strategy_background_sync() {
        assert!(SyncStrategy::Periodic.runs_background_sync());
        assert!(SyncStrategy::Smart.runs_background_sync());
        assert!(!SyncStrategy::Immediate.runs_background_sync());
        assert!(!SyncStrategy::OnDemand.runs_background_sync());
        assert!(!SyncStrategy::Milestone.runs_background_sync());
    }

    #[test]
    fn test_update_data_info_type() {
        let update = UpdateData::ConflictInfo {
            conflicts: vec!["both modify main.rs".into()],
        };
        assert_eq!(update.info_type(), BranchInfoType::ConflictInfo);
        assert!(update.info_type().requires_action());

        let update = UpdateData::TestStatus { passed: Some(true) };
        assert_eq!(update.info_type(), BranchInfoType::TestStatus);
        assert!(!update.info_type().requires_action());
    }

    #[test]
    fn test_branch_info_ctor_invariants() {
        let info = BranchInfo::new("feat/x", "agent-1", "main", vec!["task".into()]);
        assert_eq!(info.commit_count, 0);
        assert!(info.tests_passed.is_none());
        assert!(info.build_status.is_none());
        assert!(!info.merge_ready);
        assert!(!info.has_conflicts());
        assert_eq!(info.work_items, vec!["task".to_string()]);
    }
}
