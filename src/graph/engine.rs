//! Graph construction, change tracking, and propagation to branches.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::analyzer::StaticAnalyzer;
use crate::bus::{Message, MessageBus, MessagePriority, MessageType};
use crate::config::GraphConfig;
use crate::error::{MeshError, Result};
use crate::graph::types::{
    ChangeImpact, DependencyChange, DependencyNode, DependencyType, ImpactReport,
    PropagationResult, PropagationStrategy, RiskLevel,
};
use crate::registry::{BranchRegistry, UpdateData};

const BREAKING_KEYWORDS: &[&str] = &["remove", "delete", "deprecate", "breaking", "incompatible"];
const SECURITY_KEYWORDS: &[&str] = &["security", "vulnerability", "auth", "permission", "token"];
const SIGNATURE_KEYWORDS: &[&str] = &["signature", "parameters"];
const ENHANCEMENT_KEYWORDS: &[&str] = &["add", "new"];

#[derive(Debug, Clone, Default, Serialize)]
pub struct GraphStats {
    pub nodes_total: usize,
    pub edges_total: usize,
    pub changes_tracked: usize,
    pub changes_pending: usize,
    pub propagations: u64,
    pub success_rate: f64,
    pub avg_processing_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphSummary {
    pub nodes_total: usize,
    pub edges_total: usize,
    pub changes_tracked: usize,
    pub changes_pending: usize,
    pub critical_pending: usize,
    pub auto_propagate: bool,
}

#[derive(Debug, Default)]
struct PropagationMetrics {
    propagations: u64,
    successes: u64,
    avg_ms: f64,
}

/// File-level dependency graph with change tracking and propagation.
///
/// The graph itself comes from a [`StaticAnalyzer`]; this engine derives the
/// reverse (dependents) edges, classifies tracked changes, and pushes them
/// into the branch registry and message bus.
pub struct DependencyGraphEngine {
    config: GraphConfig,
    analyzer: Arc<dyn StaticAnalyzer>,
    bus: Arc<MessageBus>,
    registry: Arc<BranchRegistry>,
    nodes: RwLock<HashMap<String, DependencyNode>>,
    changes: RwLock<HashMap<String, DependencyChange>>,
    /// Every tracked change id, drained by the propagation loop.
    queue: Mutex<VecDeque<String>>,
    metrics: Mutex<PropagationMetrics>,
    shutdown_tx: Mutex<Option<watch::Sender<bool>>>,
    loop_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl DependencyGraphEngine {
    pub fn new(
        config: GraphConfig,
        analyzer: Arc<dyn StaticAnalyzer>,
        bus: Arc<MessageBus>,
        registry: Arc<BranchRegistry>,
    ) -> Self {
        Self {
            config,
            analyzer,
            bus,
            registry,
            nodes: RwLock::new(HashMap::new()),
            changes: RwLock::new(HashMap::new()),
            queue: Mutex::new(VecDeque::new()),
            metrics: Mutex::new(PropagationMetrics::default()),
            shutdown_tx: Mutex::new(None),
            loop_handles: Mutex::new(Vec::new()),
        }
    }

    /// Analyzes the given files (or the whole project) and rebuilds the
    /// reverse-dependency edges. Files the analyzer rejects are skipped.
    /// Returns how many files were analyzed.
    pub fn build_graph(&self, files: Option<Vec<String>>) -> usize {
        let targets = files.unwrap_or_else(|| self.analyzer.project_files());
        let mut analyzed = 0;

        for file in targets {
            match self.analyzer.analyze_file(Path::new(&file)) {
                Ok(analysis) => {
                    let node = DependencyNode {
                        module_name: module_name_of(&file),
                        file_path: file.clone(),
                        dependencies: analysis.dependencies,
                        dependents: BTreeSet::new(),
                        imports: analysis.imports,
                        exports: analysis.exports,
                        last_analyzed: Utc::now(),
                    };
                    self.nodes.write().insert(file, node);
                    analyzed += 1;
                }
                Err(err) => warn!(file = %file, error = %err, "analysis failed, skipping"),
            }
        }

        self.rebuild_dependents();
        info!(analyzed, nodes = self.nodes.read().len(), "dependency graph built");
        analyzed
    }

    /// Recomputes every node's dependents by reverse lookup. A dependency
    /// string matches a node by exact path, by module name, or by file-stem
    /// suffix.
    fn rebuild_dependents(&self) {
        let mut nodes = self.nodes.write();

        let mut edges: Vec<(String, String)> = Vec::new();
        for node in nodes.values() {
            for dep in &node.dependencies {
                for candidate in nodes.values() {
                    if candidate.file_path == node.file_path {
                        continue;
                    }
                    let matches = candidate.file_path == *dep
                        || candidate.module_name == *dep
                        || candidate.file_path.ends_with(&format!("/{dep}.rs"))
                        || candidate.file_path.ends_with(&format!("/{dep}.py"));
                    if matches {
                        edges.push((candidate.file_path.clone(), node.file_path.clone()));
                    }
                }
            }
        }

        for node in nodes.values_mut() {
            node.dependents.clear();
        }
        for (target, dependent) in edges {
            if let Some(node) = nodes.get_mut(&target) {
                node.dependents.insert(dependent);
            }
        }
    }

    pub fn get_node(&self, file_path: &str) -> Option<DependencyNode> {
        self.nodes.read().get(file_path).cloned()
    }

    /// Records a change to a file. When no impact is supplied it is
    /// classified from the change type and description. Every change enters
    /// the propagation queue; critical immediate changes additionally
    /// propagate synchronously before this returns.
    pub fn track_change(
        &self,
        source_file: &str,
        changed_by: &str,
        change_type: DependencyType,
        details: serde_json::Value,
        impact: Option<ChangeImpact>,
        strategy: PropagationStrategy,
    ) -> Result<String> {
        let impact = impact.unwrap_or_else(|| classify_impact(change_type, &details));

        let affected_files = {
            let nodes = self.nodes.read();
            let direct: Vec<String> = nodes
                .get(source_file)
                .map(|node| node.dependents.iter().cloned().collect())
                .unwrap_or_default();
            if impact == ChangeImpact::Breaking {
                transitive_dependents(&nodes, source_file)
            } else {
                direct
            }
        };

        let affected_branches = self.branches_touching(&affected_files);
        let requires_manual_review = impact.is_critical();
        let id = Uuid::new_v4().to_string();

        let change = DependencyChange {
            id: id.clone(),
            source_file: source_file.to_string(),
            changed_by: changed_by.to_string(),
            change_type,
            impact,
            details,
            affected_files,
            affected_branches,
            strategy,
            requires_manual_review,
            propagated_to: BTreeSet::new(),
            attempts: 0,
            created_at: Utc::now(),
            processed_at: None,
        };
        self.changes.write().insert(id.clone(), change);

        debug!(
            change_id = %id,
            file = %source_file,
            impact = impact.as_str(),
            "change tracked"
        );

        self.queue.lock().push_back(id.clone());

        if strategy == PropagationStrategy::Immediate
            && impact.is_critical()
            && self.config.auto_propagate
        {
            self.propagate_changes(&[id.clone()], None)?;
        }

        Ok(id)
    }

    pub fn get_change(&self, change_id: &str) -> Option<DependencyChange> {
        self.changes.read().get(change_id).cloned()
    }

    /// Unprocessed changes, optionally narrowed to one author or to changes
    /// affecting one branch.
    pub fn pending_changes(
        &self,
        agent: Option<&str>,
        branch: Option<&str>,
    ) -> Vec<DependencyChange> {
        let mut pending: Vec<DependencyChange> = self
            .changes
            .read()
            .values()
            .filter(|change| change.is_pending())
            .filter(|change| agent.is_none_or(|a| change.changed_by == a))
            .filter(|change| {
                branch.is_none_or(|b| change.affected_branches.iter().any(|name| name == b))
            })
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        pending
    }

    /// Blast-radius report for one file, `None` if the file is not in the
    /// graph.
    pub fn impact_report(&self, file_path: &str) -> Option<ImpactReport> {
        let nodes = self.nodes.read();
        let node = nodes.get(file_path)?;

        let direct_dependents = node.dependents.len();
        let transitive_files = transitive_dependents(&nodes, file_path);
        let indirect_dependents = transitive_files.len() - direct_dependents;

        let complexity = (0.3 * node.dependencies.len() as f64
            + 0.5 * node.dependents.len() as f64
            + 0.2 * node.exports.len() as f64)
            .min(10.0);
        let total_impact = direct_dependents + indirect_dependents;
        let risk = if complexity > 7.0 || total_impact > 10 {
            RiskLevel::High
        } else if complexity > 4.0 || total_impact > 5 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        };

        Some(ImpactReport {
            file_path: file_path.to_string(),
            direct_dependents,
            indirect_dependents,
            transitive_files,
            complexity,
            risk,
        })
    }

    /// Propagates the given changes to their affected branches (or an
    /// explicit target list): a dependency-map update per branch, then a
    /// notification to each owning agent.
    pub fn propagate_changes(
        &self,
        change_ids: &[String],
        target_branches: Option<Vec<String>>,
    ) -> Result<Vec<PropagationResult>> {
        let mut results = Vec::with_capacity(change_ids.len());

        for change_id in change_ids {
            let change = self
                .changes
                .read()
                .get(change_id)
                .cloned()
                .ok_or_else(|| MeshError::ChangeNotFound(change_id.clone()))?;

            let started = Instant::now();
            let branches = target_branches
                .clone()
                .unwrap_or_else(|| change.affected_branches.clone());
            let critical = change.impact.is_critical();

            let mut updated_branches = Vec::new();
            let mut success = true;
            for branch in &branches {
                let update = UpdateData::DependencyMap {
                    dependencies: HashMap::from([(
                        change.source_file.clone(),
                        change.affected_files.clone(),
                    )]),
                };
                match self.registry.update_branch_info(branch, update, critical) {
                    Ok(()) => updated_branches.push(branch.clone()),
                    Err(err) => {
                        warn!(branch = %branch, error = %err, "propagation update failed");
                        success = false;
                    }
                }
            }

            let mut notified_agents = Vec::new();
            for branch in &updated_branches {
                let Some(info) = self.registry.get_branch(branch) else {
                    continue;
                };
                if notified_agents.contains(&info.agent_id) {
                    continue;
                }
                let priority = if critical {
                    MessagePriority::High
                } else {
                    MessagePriority::Normal
                };
                let mut message = Message::new(
                    &change.changed_by,
                    Some(info.agent_id.clone()),
                    MessageType::DependencyChange,
                    format!("Dependency change in {}", change.source_file),
                    json!({
                        "change_id": change.id,
                        "source_file": change.source_file,
                        "change_type": change.change_type.as_str(),
                        "impact": change.impact.as_str(),
                        "affected_files": change.affected_files,
                        "requires_manual_review": change.requires_manual_review,
                    }),
                )
                .with_priority(priority);
                if change.requires_manual_review {
                    message = message.with_ack();
                }
                self.bus.send(message);
                notified_agents.push(info.agent_id);
            }

            {
                let mut changes = self.changes.write();
                if let Some(record) = changes.get_mut(change_id) {
                    record.propagated_to.extend(updated_branches.iter().cloned());
                    record.attempts += 1;
                    record.processed_at = Some(Utc::now());
                }
            }

            let duration_ms = started.elapsed().as_millis() as u64;
            {
                let mut metrics = self.metrics.lock();
                metrics.propagations += 1;
                if success {
                    metrics.successes += 1;
                }
                let n = metrics.propagations as f64;
                metrics.avg_ms = (metrics.avg_ms * (n - 1.0) + duration_ms as f64) / n;
            }

            results.push(PropagationResult {
                change_id: change_id.clone(),
                updated_branches,
                notified_agents,
                duration_ms,
                success,
            });
        }

        Ok(results)
    }

    /// One pass of the propagation loop: drains up to `batch_size` queued
    /// changes and propagates the still-pending ones whose strategy is
    /// immediate or whose impact is critical. Everything else waits for an
    /// explicit [`Self::propagate_changes`] call.
    pub fn propagation_pass(&self) -> usize {
        let batch: Vec<String> = {
            let mut queue = self.queue.lock();
            let take = queue.len().min(self.config.batch_size);
            queue.drain(..take).collect()
        };

        let mut processed = 0;
        for change_id in batch {
            let eligible = self.changes.read().get(&change_id).is_some_and(|change| {
                change.is_pending()
                    && (change.strategy == PropagationStrategy::Immediate
                        || change.impact.is_critical())
            });
            if !eligible {
                continue;
            }
            match self.propagate_changes(&[change_id.clone()], None) {
                Ok(_) => processed += 1,
                Err(err) => warn!(change_id = %change_id, error = %err, "queued propagation failed"),
            }
        }
        processed
    }

    pub fn stats(&self) -> GraphStats {
        let nodes = self.nodes.read();
        let changes = self.changes.read();
        let metrics = self.metrics.lock();
        let success_rate = if metrics.propagations == 0 {
            0.0
        } else {
            metrics.successes as f64 / metrics.propagations as f64
        };
        GraphStats {
            nodes_total: nodes.len(),
            edges_total: nodes.values().map(|n| n.dependents.len()).sum(),
            changes_tracked: changes.len(),
            changes_pending: changes.values().filter(|c| c.is_pending()).count(),
            propagations: metrics.propagations,
            success_rate,
            avg_processing_ms: metrics.avg_ms,
        }
    }

    pub fn summary(&self) -> GraphSummary {
        let nodes = self.nodes.read();
        let changes = self.changes.read();
        GraphSummary {
            nodes_total: nodes.len(),
            edges_total: nodes.values().map(|n| n.dependents.len()).sum(),
            changes_tracked: changes.len(),
            changes_pending: changes.values().filter(|c| c.is_pending()).count(),
            critical_pending: changes
                .values()
                .filter(|c| c.is_pending() && c.impact.is_critical())
                .count(),
            auto_propagate: self.config.auto_propagate,
        }
    }

    /// Spawns the propagation and rebuild loops.
    pub fn start(self: &Arc<Self>) {
        let (tx, rx) = watch::channel(false);
        *self.shutdown_tx.lock() = Some(tx);

        let mut handles = self.loop_handles.lock();

        let engine = Arc::clone(self);
        let mut prop_rx = rx.clone();
        let prop_interval = self.config.propagation_interval();
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(prop_interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        engine.propagation_pass();
                    }
                    _ = prop_rx.changed() => {
                        if *prop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        }));

        let engine = Arc::clone(self);
        let mut rebuild_rx = rx;
        let rebuild_interval = self.config.rebuild_interval();
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(rebuild_interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        engine.build_graph(None);
                    }
                    _ = rebuild_rx.changed() => {
                        if *rebuild_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        }));
    }

    pub async fn stop(&self) {
        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.send(true);
        }
        let handles: Vec<JoinHandle<()>> = self.loop_handles.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }

    fn branches_touching(&self, files: &[String]) -> Vec<String> {
        let file_set: HashSet<&String> = files.iter().collect();
        let mut branches = Vec::new();
        for name in self.registry.branch_names() {
            if let Some(info) = self.registry.get_branch(&name) {
                if info.files_modified.iter().any(|f| file_set.contains(f)) {
                    branches.push(name);
                }
            }
        }
        branches
    }
}

fn module_name_of(file_path: &str) -> String {
    Path::new(file_path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_path)
        .to_string()
}

/// Ordered classification heuristics over the change description.
fn classify_impact(change_type: DependencyType, details: &serde_json::Value) -> ChangeImpact {
    let text = details
        .get("description")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| details.to_string())
        .to_lowercase();

    let contains_any = |keywords: &[&str]| keywords.iter().any(|kw| text.contains(kw));

    if contains_any(BREAKING_KEYWORDS) {
        return ChangeImpact::Breaking;
    }
    if contains_any(SECURITY_KEYWORDS) {
        return ChangeImpact::Security;
    }
    if matches!(
        change_type,
        DependencyType::FunctionCall | DependencyType::ApiUsage
    ) && contains_any(SIGNATURE_KEYWORDS)
    {
        return ChangeImpact::Breaking;
    }
    if change_type == DependencyType::ClassInheritance {
        return ChangeImpact::Breaking;
    }
    if change_type == DependencyType::Import {
        return ChangeImpact::Compatible;
    }
    if contains_any(ENHANCEMENT_KEYWORDS) {
        return ChangeImpact::Enhancement;
    }
    ChangeImpact::Compatible
}

/// Every file reachable from `file_path` through dependents edges, BFS order.
fn transitive_dependents(
    nodes: &HashMap<String, DependencyNode>,
    file_path: &str,
) -> Vec<String> {
    let mut visited: HashSet<String> = HashSet::new();
    let mut order = Vec::new();
    let mut frontier: VecDeque<String> = nodes
        .get(file_path)
        .map(|node| node.dependents.iter().cloned().collect())
        .unwrap_or_default();

    while let Some(current) = frontier.pop_front() {
        if current == file_path || !visited.insert(current.clone()) {
            continue;
        }
        if let Some(node) = nodes.get(&current) {
            for dependent in &node.dependents {
                if !visited.contains(dependent) {
                    frontier.push_back(dependent.clone());
                }
            }
        }
        order.push(current);
    }
    order
}
