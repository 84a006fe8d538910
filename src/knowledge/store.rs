//! Tagged, typed knowledge items shared between agents.
//!
//! Items are ranked by `(relevance_score desc, created_at desc)` on access.
//! The retention sweep evicts items that are both old and rarely accessed;
//! frequently accessed items live forever.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info};
use uuid::Uuid;

use crate::bus::{Message, MessageBus, MessagePriority, MessageType};
use crate::config::KnowledgeConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedKnowledge {
    pub id: String,
    pub contributor: String,
    pub knowledge_type: String,
    pub content: serde_json::Value,
    pub tags: Vec<String>,
    pub relevance_score: f64,
    pub access_count: u32,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
}

/// Search criteria for [`KnowledgeStore::access`]. An exact id short-circuits
/// every other filter.
#[derive(Debug, Clone, Default)]
pub struct KnowledgeQuery {
    pub id: Option<String>,
    pub tags: Vec<String>,
    pub knowledge_type: Option<String>,
    pub limit: Option<usize>,
}

impl KnowledgeQuery {
    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn by_tags(tags: Vec<String>) -> Self {
        Self {
            tags,
            ..Self::default()
        }
    }

    pub fn with_type(mut self, knowledge_type: impl Into<String>) -> Self {
        self.knowledge_type = Some(knowledge_type.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct KnowledgeStats {
    pub items_total: usize,
    pub shared_total: u64,
    pub accessed_total: u64,
    pub by_type: HashMap<String, usize>,
}

const DEFAULT_ACCESS_LIMIT: usize = 10;

struct StoreState {
    items: HashMap<String, SharedKnowledge>,
    tag_index: HashMap<String, HashSet<String>>,
    shared_total: u64,
    accessed_total: u64,
}

pub struct KnowledgeStore {
    config: KnowledgeConfig,
    bus: Arc<MessageBus>,
    state: RwLock<StoreState>,
    shutdown_tx: parking_lot::Mutex<Option<watch::Sender<bool>>>,
    sweep_handle: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl KnowledgeStore {
    pub fn new(config: KnowledgeConfig, bus: Arc<MessageBus>) -> Self {
        Self {
            config,
            bus,
            state: RwLock::new(StoreState {
                items: HashMap::new(),
                tag_index: HashMap::new(),
                shared_total: 0,
                accessed_total: 0,
            }),
            shutdown_tx: parking_lot::Mutex::new(None),
            sweep_handle: parking_lot::Mutex::new(None),
        }
    }

    /// Store a knowledge item, index it under its tags, and announce it with
    /// a low-priority broadcast.
    pub fn share(
        &self,
        contributor: &str,
        knowledge_type: &str,
        content: serde_json::Value,
        tags: Vec<String>,
        relevance_score: f64,
    ) -> String {
        let now = Utc::now();
        let item = SharedKnowledge {
            id: Uuid::new_v4().to_string(),
            contributor: contributor.to_string(),
            knowledge_type: knowledge_type.to_string(),
            content: content.clone(),
            tags: tags.clone(),
            relevance_score,
            access_count: 0,
            created_at: now,
            last_accessed: now,
        };
        let id = item.id.clone();

        {
            let mut state = self.state.write();
            for tag in &item.tags {
                state
                    .tag_index
                    .entry(tag.clone())
                    .or_default()
                    .insert(id.clone());
            }
            state.items.insert(id.clone(), item);
            state.shared_total += 1;
        }

        // Announcement goes out after the store lock is released.
        self.bus.send(
            Message::broadcast(
                contributor,
                MessageType::KnowledgeShare,
                format!("New {knowledge_type} knowledge available"),
                serde_json::json!({
                    "knowledge_id": id,
                    "knowledge_type": knowledge_type,
                    "tags": tags,
                    "summary": content.get("summary").cloned().unwrap_or_default(),
                }),
            )
            .with_priority(MessagePriority::Low),
        );

        debug!(knowledge_id = %id, contributor, knowledge_type, "Knowledge shared");
        id
    }

    /// Look up knowledge items, bumping `access_count` and `last_accessed`
    /// on every returned item.
    pub fn access(&self, query: &KnowledgeQuery) -> Vec<SharedKnowledge> {
        let now = Utc::now();
        let mut state = self.state.write();

        if let Some(id) = &query.id {
            let Some(item) = state.items.get_mut(id) else {
                return Vec::new();
            };
            item.access_count += 1;
            item.last_accessed = now;
            let found = item.clone();
            state.accessed_total += 1;
            return vec![found];
        }

        let candidate_ids: Vec<String> = if query.tags.is_empty() {
            state.items.keys().cloned().collect()
        } else {
            let mut ids = HashSet::new();
            for tag in &query.tags {
                if let Some(tagged) = state.tag_index.get(tag) {
                    ids.extend(tagged.iter().cloned());
                }
            }
            ids.into_iter().collect()
        };

        let mut candidates: Vec<SharedKnowledge> = candidate_ids
            .iter()
            .filter_map(|id| state.items.get(id))
            .filter(|item| {
                query
                    .knowledge_type
                    .as_deref()
                    .is_none_or(|t| item.knowledge_type == t)
            })
            .cloned()
            .collect();

        candidates.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.created_at.cmp(&a.created_at))
        });
        candidates.truncate(query.limit.unwrap_or(DEFAULT_ACCESS_LIMIT));

        for item in &mut candidates {
            if let Some(stored) = state.items.get_mut(&item.id) {
                stored.access_count += 1;
                stored.last_accessed = now;
                item.access_count = stored.access_count;
                item.last_accessed = now;
            }
            state.accessed_total += 1;
        }

        candidates
    }

    /// Evict items untouched for the retention window with fewer than the
    /// minimum access count. Returns the number evicted.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - chrono::Duration::days(self.config.retention_days);
        let mut state = self.state.write();

        let stale: Vec<String> = state
            .items
            .values()
            .filter(|item| {
                item.last_accessed < cutoff && item.access_count < self.config.min_access_count
            })
            .map(|item| item.id.clone())
            .collect();

        for id in &stale {
            if let Some(item) = state.items.remove(id) {
                for tag in &item.tags {
                    if let Some(tagged) = state.tag_index.get_mut(tag) {
                        tagged.remove(id);
                        if tagged.is_empty() {
                            state.tag_index.remove(tag);
                        }
                    }
                }
            }
        }

        if !stale.is_empty() {
            info!(evicted = stale.len(), "Knowledge retention sweep");
        }
        stale.len()
    }

    /// How many items a contributor has shared under a tag. Read-only, does
    /// not count as an access.
    pub fn contributions_tagged(&self, contributor: &str, tag: &str) -> usize {
        let state = self.state.read();
        state
            .items
            .values()
            .filter(|item| item.contributor == contributor && item.tags.iter().any(|t| t == tag))
            .count()
    }

    pub fn stats(&self) -> KnowledgeStats {
        let state = self.state.read();
        let mut by_type: HashMap<String, usize> = HashMap::new();
        for item in state.items.values() {
            *by_type.entry(item.knowledge_type.clone()).or_default() += 1;
        }
        KnowledgeStats {
            items_total: state.items.len(),
            shared_total: state.shared_total,
            accessed_total: state.accessed_total,
            by_type,
        }
    }

    /// Spawn the retention sweep loop.
    pub fn start(self: &Arc<Self>) {
        let (tx, mut rx) = watch::channel(false);
        *self.shutdown_tx.lock() = Some(tx);

        let store = Arc::clone(self);
        let interval = self.config.sweep_interval();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        store.sweep(Utc::now());
                    }
                    _ = rx.changed() => {
                        if *rx.borrow() {
                            debug!("Knowledge sweep loop shutdown");
                            break;
                        }
                    }
                }
            }
        });
        *self.sweep_handle.lock() = Some(handle);
    }

    pub async fn stop(&self) {
        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.send(true);
        }
        let handle = self.sweep_handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BusConfig;
    use serde_json::json;

    fn store() -> KnowledgeStore {
        let bus = Arc::new(MessageBus::new(BusConfig::default()));
        KnowledgeStore::new(KnowledgeConfig::default(), bus)
    }

    #[test]
    fn test_share_announces_on_bus() {
        let bus = Arc::new(MessageBus::new(BusConfig::default()));
        bus.register_agent("listener");
        let store = KnowledgeStore::new(KnowledgeConfig::default(), Arc::clone(&bus));

        store.share(
            "agent-1",
            "api_change",
            json!({"summary": "renamed endpoint"}),
            vec!["api".into()],
            0.9,
        );

        let received = bus.receive("listener", None);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].message_type, MessageType::KnowledgeShare);
        assert_eq!(received[0].priority, MessagePriority::Low);
        assert_eq!(received[0].content["summary"], "renamed endpoint");
    }

    #[test]
    fn test_access_by_id_bumps_counters() {
        let store = store();
        let id = store.share("a", "pattern", json!({}), vec![], 1.0);

        let first = store.access(&KnowledgeQuery::by_id(&id));
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].access_count, 1);

        let second = store.access(&KnowledgeQuery::by_id(&id));
        assert_eq!(second[0].access_count, 2);

        assert!(store.access(&KnowledgeQuery::by_id("missing")).is_empty());
    }

    #[test]
    fn test_ranking_relevance_then_recency() {
        let store = store();
        store.share("a", "pattern", json!({"n": 1}), vec!["x".into()], 0.5);
        store.share("a", "pattern", json!({"n": 2}), vec!["x".into()], 0.9);
        store.share("a", "pattern", json!({"n": 3}), vec!["x".into()], 0.9);

        let results = store.access(&KnowledgeQuery::by_tags(vec!["x".into()]));
        assert_eq!(results.len(), 3);
        // Highest relevance first; among ties, newest first.
        assert_eq!(results[0].content["n"], 3);
        assert_eq!(results[1].content["n"], 2);
        assert_eq!(results[2].content["n"], 1);
    }

    #[test]
    fn test_tag_union_and_type_filter() {
        let store = store();
        store.share("a", "pattern", json!({}), vec!["x".into()], 1.0);
        store.share("a", "api_change", json!({}), vec!["y".into()], 1.0);
        store.share("a", "pattern", json!({}), vec!["z".into()], 1.0);

        let both = store.access(&KnowledgeQuery::by_tags(vec!["x".into(), "y".into()]));
        assert_eq!(both.len(), 2);

        let typed = store.access(
            &KnowledgeQuery::by_tags(vec!["x".into(), "y".into()]).with_type("pattern"),
        );
        assert_eq!(typed.len(), 1);
        assert_eq!(typed[0].knowledge_type, "pattern");
    }

    #[test]
    fn test_limit_truncation() {
        let store = store();
        for i in 0..15 {
            store.share("a", "pattern", json!({"n": i}), vec![], 1.0);
        }
        // Default limit is 10.
        assert_eq!(store.access(&KnowledgeQuery::default()).len(), 10);
        assert_eq!(
            store
                .access(&KnowledgeQuery::default().with_limit(3))
                .len(),
            3
        );
    }

    #[test]
    fn test_retention_sweep() {
        let store = store();
        let old_rarely = store.share("a", "pattern", json!({}), vec!["t".into()], 1.0);
        let old_popular = store.share("a", "pattern", json!({}), vec!["t".into()], 1.0);
        let fresh = store.share("a", "pattern", json!({}), vec!["t".into()], 1.0);

        {
            let mut state = store.state.write();
            let stale_time = Utc::now() - chrono::Duration::days(31);
            let rarely = state.items.get_mut(&old_rarely).unwrap();
            rarely.last_accessed = stale_time;
            rarely.access_count = 2;
            let popular = state.items.get_mut(&old_popular).unwrap();
            popular.last_accessed = stale_time;
            popular.access_count = 6;
        }

        let evicted = store.sweep(Utc::now());
        assert_eq!(evicted, 1);

        assert!(store.access(&KnowledgeQuery::by_id(&old_rarely)).is_empty());
        assert!(!store.access(&KnowledgeQuery::by_id(&old_popular)).is_empty());
        assert!(!store.access(&KnowledgeQuery::by_id(&fresh)).is_empty());

        // Tag index no longer serves the evicted id.
        let tagged = store.access(&KnowledgeQuery::by_tags(vec!["t".into()]));
        assert_eq!(tagged.len(), 2);
    }

    #[test]
    fn test_stats_by_type() {
        let store = store();
        assert_eq!(store.stats().items_total, 0);

        store.share("a", "pattern", json!({}), vec![], 1.0);
        store.share("a", "pattern", json!({}), vec![], 1.0);
        store.share("b", "api_change", json!({}), vec![], 1.0);

        let stats = store.stats();
        assert_eq!(stats.items_total, 3);
        assert_eq!(stats.shared_total, 3);
        assert_eq!(stats.by_type.get("pattern"), Some(&2));
        assert_eq!(stats.by_type.get("api_change"), Some(&1));
    }
}
