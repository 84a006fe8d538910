//! Branch registration, typed updates, and cross-agent synchronization.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bus::{Message, MessageBus, MessageType};
use crate::config::RegistryConfig;
use crate::error::{MeshError, Result};
use crate::knowledge::KnowledgeStore;
use crate::registry::types::{
    BranchInfo, BranchInfoType, BranchSyncEvent, SyncStrategy, UpdateData,
};

/// Merge-readiness assessment for one branch.
#[derive(Debug, Clone, Serialize)]
pub struct MergeReport {
    pub branch_name: String,
    pub agent_id: String,
    pub merge_ready: bool,
    /// Fraction of the four readiness criteria that hold.
    pub merge_score: f64,
    pub tests_passed: bool,
    pub build_successful: bool,
    pub conflicts_clear: bool,
    pub work_completed: bool,
    pub recommendations: Vec<String>,
    /// Other branch -> conflicts this branch would have with it.
    pub potential_conflicts: HashMap<String, Vec<String>>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistryStats {
    pub branches_total: usize,
    pub subscriptions_total: usize,
    pub syncs_performed: u64,
    pub conflicts_detected: u64,
    pub merge_ready_reports: u64,
    pub history_size: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistrySummary {
    pub strategy: SyncStrategy,
    pub branches_total: usize,
    pub merge_ready_branches: Vec<String>,
    pub conflicted_branches: Vec<String>,
    pub subscriptions_total: usize,
}

/// Registry of per-agent working branches.
///
/// Updates are applied under the registry's own lock; knowledge sharing and
/// message delivery happen after the lock is released.
pub struct BranchRegistry {
    config: RegistryConfig,
    strategy: SyncStrategy,
    bus: Arc<MessageBus>,
    knowledge: Arc<KnowledgeStore>,
    branches: RwLock<HashMap<String, BranchInfo>>,
    /// branch -> subscribed agent ids.
    subscriptions: DashMap<String, HashSet<String>>,
    history: Mutex<VecDeque<BranchSyncEvent>>,
    syncs_performed: AtomicU64,
    conflicts_detected: AtomicU64,
    merge_ready_reports: AtomicU64,
    shutdown_tx: Mutex<Option<watch::Sender<bool>>>,
    sync_handle: Mutex<Option<JoinHandle<()>>>,
}

impl BranchRegistry {
    pub fn new(
        config: RegistryConfig,
        strategy: SyncStrategy,
        bus: Arc<MessageBus>,
        knowledge: Arc<KnowledgeStore>,
    ) -> Self {
        Self {
            config,
            strategy,
            bus,
            knowledge,
            branches: RwLock::new(HashMap::new()),
            subscriptions: DashMap::new(),
            history: Mutex::new(VecDeque::new()),
            syncs_performed: AtomicU64::new(0),
            conflicts_detected: AtomicU64::new(0),
            merge_ready_reports: AtomicU64::new(0),
            shutdown_tx: Mutex::new(None),
            sync_handle: Mutex::new(None),
        }
    }

    pub fn strategy(&self) -> SyncStrategy {
        self.strategy
    }

    /// Registers a branch, subscribes its owner, and announces the new
    /// branch state as shared knowledge.
    pub fn register_branch(
        &self,
        branch_name: &str,
        agent_id: &str,
        base_branch: &str,
        work_items: Vec<String>,
    ) {
        let info = BranchInfo::new(branch_name, agent_id, base_branch, work_items.clone());
        self.branches
            .write()
            .insert(branch_name.to_string(), info);
        self.subscriptions
            .entry(branch_name.to_string())
            .or_default()
            .insert(agent_id.to_string());

        self.knowledge.share(
            agent_id,
            BranchInfoType::BranchState.as_str(),
            json!({
                "branch_name": branch_name,
                "base_branch": base_branch,
                "work_items": work_items,
            }),
            vec![branch_name.to_string(), "branch_state".to_string()],
            BranchInfoType::BranchState.relevance(),
        );

        info!(branch = %branch_name, agent_id = %agent_id, "branch registered");
    }

    pub fn get_branch(&self, branch_name: &str) -> Option<BranchInfo> {
        self.branches.read().get(branch_name).cloned()
    }

    pub fn branch_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.branches.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Applies a typed update to a branch.
    ///
    /// The update syncs to subscribers when `force_sync` is set, when the
    /// info type always syncs, or when the registry strategy is immediate.
    pub fn update_branch_info(
        &self,
        branch_name: &str,
        update: UpdateData,
        force_sync: bool,
    ) -> Result<()> {
        let info_type = update.info_type();
        let event_data = serde_json::to_value(&update)?;

        let snapshot = {
            let mut branches = self.branches.write();
            let info = branches
                .get_mut(branch_name)
                .ok_or_else(|| MeshError::BranchNotFound(branch_name.to_string()))?;
            apply_update(info, update);
            info.last_updated = Utc::now();
            info.clone()
        };

        match info_type {
            BranchInfoType::ConflictInfo => {
                self.conflicts_detected.fetch_add(1, Ordering::Relaxed);
            }
            BranchInfoType::MergeReadiness if snapshot.merge_ready => {
                self.merge_ready_reports.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }

        let should_sync = force_sync || info_type.is_immediate() || self.strategy == SyncStrategy::Immediate;
        if should_sync {
            self.sync_branch_info(&snapshot, info_type, event_data);
        } else {
            debug!(
                branch = %branch_name,
                info_type = info_type.as_str(),
                "update recorded without sync"
            );
        }
        Ok(())
    }

    /// Subscribes an agent to a branch. A new subscriber immediately
    /// receives the current branch snapshot; re-subscribing is a no-op.
    pub fn subscribe(&self, agent_id: &str, branch_name: &str) {
        let newly_added = self
            .subscriptions
            .entry(branch_name.to_string())
            .or_default()
            .insert(agent_id.to_string());
        if !newly_added {
            return;
        }

        if let Some(snapshot) = self.get_branch(branch_name) {
            self.send_snapshot(agent_id, &snapshot);
        }
        debug!(agent_id = %agent_id, branch = %branch_name, "subscribed to branch");
    }

    pub fn unsubscribe(&self, agent_id: &str, branch_name: &str) {
        let remove_entry = if let Some(mut agents) = self.subscriptions.get_mut(branch_name) {
            agents.remove(agent_id);
            agents.is_empty()
        } else {
            false
        };
        if remove_entry {
            self.subscriptions.remove_if(branch_name, |_, agents| agents.is_empty());
        }
    }

    /// Sends current snapshots of the requested branches (all branches when
    /// `branches` is `None`) to the requester. Returns how many were sent.
    pub fn request_sync(&self, requester: &str, branches: Option<Vec<String>>) -> usize {
        let targets = branches.unwrap_or_else(|| self.branch_names());
        let mut sent = 0;
        for name in targets {
            match self.get_branch(&name) {
                Some(snapshot) => {
                    self.send_snapshot(requester, &snapshot);
                    sent += 1;
                }
                None => warn!(branch = %name, "sync requested for unknown branch"),
            }
        }
        sent
    }

    /// Compares two branches and returns human-readable conflict
    /// descriptions. Unknown branches yield no conflicts.
    pub fn detect_conflicts(&self, branch_a: &str, branch_b: &str) -> Vec<String> {
        let branches = self.branches.read();
        let (Some(a), Some(b)) = (branches.get(branch_a), branches.get(branch_b)) else {
            return Vec::new();
        };
        let conflicts = conflicts_between(a, b);
        drop(branches);

        if !conflicts.is_empty() {
            self.conflicts_detected
                .fetch_add(conflicts.len() as u64, Ordering::Relaxed);
            warn!(
                branch_a = %branch_a,
                branch_b = %branch_b,
                count = conflicts.len(),
                "conflicts detected between branches"
            );
        }
        conflicts
    }

    /// Assesses merge readiness: tests green, build green, no conflicts,
    /// all work items completed.
    pub fn prepare_merge_report(&self, branch_name: &str) -> Result<MergeReport> {
        let branches = self.branches.read();
        let info = branches
            .get(branch_name)
            .ok_or_else(|| MeshError::BranchNotFound(branch_name.to_string()))?;

        let tests_passed = info.tests_passed == Some(true);
        let build_successful = matches!(
            info.build_status,
            Some(crate::registry::types::BuildStatus::Success)
        );
        let conflicts_clear = info.conflicts_detected.is_empty();
        let work_completed = info.work_items.is_empty();

        let criteria_met = [tests_passed, build_successful, conflicts_clear, work_completed]
            .iter()
            .filter(|met| **met)
            .count();
        let merge_score = criteria_met as f64 / 4.0;

        let mut recommendations = Vec::new();
        if !tests_passed {
            recommendations.push("Run the tests and get them passing".to_string());
        }
        if !build_successful {
            recommendations.push("Fix the build before merging".to_string());
        }
        if !conflicts_clear {
            recommendations.push(format!(
                "Resolve {} detected conflicts",
                info.conflicts_detected.len()
            ));
        }
        if !work_completed {
            recommendations.push(format!(
                "Complete {} remaining work items",
                info.work_items.len()
            ));
        }

        let mut potential_conflicts = HashMap::new();
        for (other_name, other) in branches.iter() {
            if other_name == branch_name {
                continue;
            }
            let conflicts = conflicts_between(info, other);
            if !conflicts.is_empty() {
                potential_conflicts.insert(other_name.clone(), conflicts);
            }
        }

        Ok(MergeReport {
            branch_name: info.branch_name.clone(),
            agent_id: info.agent_id.clone(),
            merge_ready: criteria_met == 4,
            merge_score,
            tests_passed,
            build_successful,
            conflicts_clear,
            work_completed,
            recommendations,
            potential_conflicts,
            generated_at: Utc::now(),
        })
    }

    /// Re-shares branch state to subscribers. With the smart strategy only
    /// branches updated within the activity window are re-shared.
    pub fn periodic_sync(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - chrono::Duration::seconds(self.config.activity_window_secs);
        let snapshots: Vec<BranchInfo> = {
            let branches = self.branches.read();
            branches
                .values()
                .filter(|info| self.strategy != SyncStrategy::Smart || info.last_updated >= cutoff)
                .cloned()
                .collect()
        };

        let synced = snapshots.len();
        for snapshot in snapshots {
            let event_data = json!({
                "branch_name": snapshot.branch_name,
                "commit_count": snapshot.commit_count,
                "files_modified": snapshot.files_modified.len(),
                "merge_ready": snapshot.merge_ready,
            });
            self.sync_branch_info(&snapshot, BranchInfoType::BranchState, event_data);
        }
        if synced > 0 {
            debug!(count = synced, strategy = self.strategy.as_str(), "periodic sync pass");
        }
        synced
    }

    pub fn recent_events(&self, limit: usize) -> Vec<BranchSyncEvent> {
        let history = self.history.lock();
        history.iter().rev().take(limit).cloned().collect()
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            branches_total: self.branches.read().len(),
            subscriptions_total: self.subscriptions.iter().map(|entry| entry.len()).sum(),
            syncs_performed: self.syncs_performed.load(Ordering::Relaxed),
            conflicts_detected: self.conflicts_detected.load(Ordering::Relaxed),
            merge_ready_reports: self.merge_ready_reports.load(Ordering::Relaxed),
            history_size: self.history.lock().len(),
        }
    }

    pub fn summary(&self) -> RegistrySummary {
        let branches = self.branches.read();
        let mut merge_ready_branches: Vec<String> = branches
            .values()
            .filter(|info| info.merge_ready)
            .map(|info| info.branch_name.clone())
            .collect();
        merge_ready_branches.sort();
        let mut conflicted_branches: Vec<String> = branches
            .values()
            .filter(|info| info.has_conflicts())
            .map(|info| info.branch_name.clone())
            .collect();
        conflicted_branches.sort();

        RegistrySummary {
            strategy: self.strategy,
            branches_total: branches.len(),
            merge_ready_branches,
            conflicted_branches,
            subscriptions_total: self.subscriptions.iter().map(|entry| entry.len()).sum(),
        }
    }

    /// Spawns the periodic sync loop. No-op for strategies that do not run
    /// background sync.
    pub fn start(self: &Arc<Self>) {
        if !self.strategy.runs_background_sync() {
            return;
        }
        let (tx, mut rx) = watch::channel(false);
        *self.shutdown_tx.lock() = Some(tx);

        let registry = Arc::clone(self);
        let interval = self.config.sync_interval();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        registry.periodic_sync(Utc::now());
                    }
                    _ = rx.changed() => {
                        if *rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });
        *self.sync_handle.lock() = Some(handle);
    }

    pub async fn stop(&self) {
        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.send(true);
        }
        let handle = self.sync_handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    fn send_snapshot(&self, agent_id: &str, snapshot: &BranchInfo) {
        let content = serde_json::to_value(snapshot).unwrap_or_default();
        self.bus.send(
            Message::new(
                "branch-registry",
                Some(agent_id.to_string()),
                MessageType::StatusUpdate,
                format!("Branch snapshot: {}", snapshot.branch_name),
                content,
            )
            .with_priority(BranchInfoType::BranchState.priority()),
        );
    }

    /// Records a sync event, shares it as knowledge, and notifies every
    /// subscriber except the branch owner.
    fn sync_branch_info(
        &self,
        snapshot: &BranchInfo,
        event_type: BranchInfoType,
        event_data: serde_json::Value,
    ) {
        let event = BranchSyncEvent {
            id: Uuid::new_v4().to_string(),
            branch_name: snapshot.branch_name.clone(),
            agent_id: snapshot.agent_id.clone(),
            event_type,
            event_data: event_data.clone(),
            timestamp: Utc::now(),
            priority: event_type.priority(),
            requires_action: event_type.requires_action(),
        };
        {
            let mut history = self.history.lock();
            history.push_back(event);
            while history.len() > self.config.history_limit {
                history.pop_front();
            }
        }

        self.knowledge.share(
            &snapshot.agent_id,
            event_type.as_str(),
            json!({
                "branch_name": snapshot.branch_name,
                "data": event_data,
            }),
            vec![snapshot.branch_name.clone(), event_type.as_str().to_string()],
            event_type.relevance(),
        );

        let recipients: Vec<String> = self
            .subscriptions
            .get(&snapshot.branch_name)
            .map(|agents| {
                agents
                    .iter()
                    .filter(|id| **id != snapshot.agent_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let message_type = match event_type {
            BranchInfoType::ConflictInfo => MessageType::ConflictAlert,
            BranchInfoType::ApiChanges => MessageType::DependencyChange,
            _ => MessageType::StatusUpdate,
        };

        for recipient in recipients {
            let mut message = Message::new(
                &snapshot.agent_id,
                Some(recipient),
                message_type,
                format!("Branch {}: {}", snapshot.branch_name, event_type.as_str()),
                json!({
                    "branch_name": snapshot.branch_name,
                    "info_type": event_type.as_str(),
                    "data": event_data,
                }),
            )
            .with_priority(event_type.priority());
            if event_type.requires_action() {
                message = message.with_ack();
            }
            self.bus.send(message);
        }

        self.syncs_performed.fetch_add(1, Ordering::Relaxed);
    }
}

fn apply_update(info: &mut BranchInfo, update: UpdateData) {
    match update {
        // file changes carry the full current list, not a delta
        UpdateData::FileChanges { files } => info.files_modified = files,
        UpdateData::TestStatus { passed } => info.tests_passed = passed,
        UpdateData::BuildStatus { status } => info.build_status = Some(status),
        UpdateData::ConflictInfo { conflicts } => {
            for conflict in conflicts {
                if !info.conflicts_detected.contains(&conflict) {
                    info.conflicts_detected.push(conflict);
                }
            }
        }
        UpdateData::ApiChanges { signatures } => info.api_signatures.extend(signatures),
        UpdateData::DependencyMap { dependencies } => info.dependencies.extend(dependencies),
        UpdateData::MergeReadiness { ready } => info.merge_ready = ready,
        UpdateData::WorkProgress { completed, remaining } => {
            for item in completed {
                if !info.completed_items.contains(&item) {
                    info.completed_items.push(item);
                }
            }
            info.work_items = remaining;
        }
        UpdateData::CommitHistory { commit_count, .. } => info.commit_count = commit_count,
        UpdateData::BranchState { .. } => {}
    }
}

/// Three conflict categories: overlapping file edits, diverging API
/// signatures, and one branch editing files the other depends on.
fn conflicts_between(a: &BranchInfo, b: &BranchInfo) -> Vec<String> {
    let mut conflicts = Vec::new();

    let b_files: HashSet<&String> = b.files_modified.iter().collect();
    let mut overlapping: Vec<&String> = a
        .files_modified
        .iter()
        .filter(|file| b_files.contains(*file))
        .collect();
    overlapping.sort();
    for file in overlapping {
        conflicts.push(format!("Both branches modify: {file}"));
    }

    let mut api_names: Vec<&String> = a
        .api_signatures
        .keys()
        .filter(|name| {
            b.api_signatures
                .get(*name)
                .is_some_and(|sig| sig != &a.api_signatures[*name])
        })
        .collect();
    api_names.sort();
    for name in api_names {
        conflicts.push(format!("Conflicting API signatures for: {name}"));
    }

    let mut deps: Vec<&String> = a
        .dependencies
        .values()
        .flatten()
        .filter(|dep| b.files_modified.contains(*dep))
        .collect();
    deps.sort();
    for dep in deps {
        conflicts.push(format!(
            "{} modifies dependency of {}: {dep}",
            b.branch_name, a.branch_name
        ));
    }

    conflicts
}
