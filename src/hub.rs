//! High-level collaboration facade.
//!
//! `CollabHub` ties the bus, knowledge store, session coordinator, and agent
//! pool together for the workflows that span all of them: asking for help,
//! fanning out code reviews, and heading off merge conflicts before they
//! happen.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};

use crate::agents::{AgentPool, AgentState};
use crate::bus::{BusStats, Message, MessageBus, MessagePriority, MessageType};
use crate::error::Result;
use crate::knowledge::KnowledgeStore;
use crate::session::{CollaborationMode, SessionCoordinator, SessionStats};

const MAX_REVIEWERS: usize = 2;
const KNOWLEDGE_BONUS: f64 = 0.2;
const REVIEW_TTL_HOURS: i64 = 24;

/// Digest of one finished session, for summaries.
#[derive(Debug, Clone, Serialize)]
pub struct SessionDigest {
    pub session_id: String,
    pub participants: usize,
    pub mode: CollaborationMode,
    pub purpose: String,
    pub duration_secs: i64,
    pub outcomes: Vec<String>,
}

/// Snapshot of collaboration activity across all components.
#[derive(Debug, Clone, Serialize)]
pub struct HubSummary {
    pub help_requests: u64,
    pub reviews_initiated: u64,
    pub conflicts_prevented: u64,
    pub sessions: SessionStats,
    pub bus: BusStats,
    pub knowledge_items: usize,
    pub knowledge_by_type: HashMap<String, usize>,
    pub recent_sessions: Vec<SessionDigest>,
}

pub struct CollabHub {
    bus: Arc<MessageBus>,
    knowledge: Arc<KnowledgeStore>,
    sessions: Arc<SessionCoordinator>,
    pool: Arc<dyn AgentPool>,
    help_requests: AtomicU64,
    reviews_initiated: AtomicU64,
    conflicts_prevented: AtomicU64,
}

impl CollabHub {
    pub fn new(
        bus: Arc<MessageBus>,
        knowledge: Arc<KnowledgeStore>,
        sessions: Arc<SessionCoordinator>,
        pool: Arc<dyn AgentPool>,
    ) -> Self {
        Self {
            bus,
            knowledge,
            sessions,
            pool,
            help_requests: AtomicU64::new(0),
            reviews_initiated: AtomicU64::new(0),
            conflicts_prevented: AtomicU64::new(0),
        }
    }

    /// Asks the best-suited idle agent for help. Suitability is the fraction
    /// of needed expertise the agent covers, plus a bonus per knowledge item
    /// it has shared under the problem type. Returns the helper's id, or
    /// `None` when nobody scores above zero.
    pub fn request_help(
        &self,
        requester: &str,
        problem_type: &str,
        description: &str,
        context: serde_json::Value,
        expertise_needed: &[String],
    ) -> Option<String> {
        let mut best_score = 0.0;
        let mut helper: Option<String> = None;

        for agent in self.pool.list_agents() {
            if agent.id == requester || agent.state != AgentState::Idle {
                continue;
            }

            let mut score = 0.0;
            if !expertise_needed.is_empty() {
                let matching = expertise_needed
                    .iter()
                    .filter(|needed| agent.expertise.contains(needed))
                    .count();
                score += matching as f64 / expertise_needed.len() as f64;
            }
            score += KNOWLEDGE_BONUS
                * self.knowledge.contributions_tagged(&agent.id, problem_type) as f64;

            if score > best_score {
                best_score = score;
                helper = Some(agent.id);
            }
        }

        let helper_id = helper?;
        self.bus.send(
            Message::new(
                requester,
                Some(helper_id.clone()),
                MessageType::HelpRequest,
                format!("Help needed: {problem_type}"),
                json!({
                    "problem_type": problem_type,
                    "description": description,
                    "context": context,
                    "expertise_needed": expertise_needed,
                }),
            )
            .with_priority(MessagePriority::High)
            .with_ack(),
        );
        self.help_requests.fetch_add(1, Ordering::Relaxed);
        info!(requester = %requester, helper = %helper_id, problem_type, "help requested");
        Some(helper_id)
    }

    /// Sends review requests for a branch to up to two available non-author
    /// agents. Requests carry a 24h TTL and require acknowledgment. Returns
    /// the chosen reviewer ids.
    pub fn initiate_code_review(
        &self,
        author: &str,
        branch_name: &str,
        files_changed: Vec<String>,
        review_type: &str,
        priority: MessagePriority,
    ) -> Vec<String> {
        let mut reviewers = Vec::new();
        for agent in self.pool.list_agents() {
            if agent.id == author {
                continue;
            }
            if matches!(agent.state, AgentState::Idle | AgentState::Working) {
                reviewers.push(agent.id);
                if reviewers.len() >= MAX_REVIEWERS {
                    break;
                }
            }
        }

        for reviewer in &reviewers {
            self.bus.send(
                Message::new(
                    author,
                    Some(reviewer.clone()),
                    MessageType::ReviewRequest,
                    format!("Code review request for {branch_name}"),
                    json!({
                        "branch_name": branch_name,
                        "files_changed": files_changed,
                        "review_type": review_type,
                        "author": author,
                    }),
                )
                .with_priority(priority)
                .with_ttl(chrono::Duration::hours(REVIEW_TTL_HOURS))
                .with_ack(),
            );
        }

        if !reviewers.is_empty() {
            self.reviews_initiated.fetch_add(1, Ordering::Relaxed);
        }
        info!(
            author = %author,
            branch = %branch_name,
            reviewers = reviewers.len(),
            "code review initiated"
        );
        reviewers
    }

    /// Opens a synchronized session between the agents working on two
    /// branches and walks them through each potential conflict, sharing every
    /// conflict as tagged knowledge. Returns how many conflicts were worked
    /// through; zero when either branch has no agents.
    pub fn prevent_conflicts(
        &self,
        branch_a: &str,
        branch_b: &str,
        conflicts: Vec<String>,
    ) -> Result<usize> {
        let agents = self.pool.list_agents();
        let on_branch = |branch: &str| -> Vec<String> {
            agents
                .iter()
                .filter(|agent| agent.current_branch.as_deref() == Some(branch))
                .map(|agent| agent.id.clone())
                .collect()
        };
        let agents_a = on_branch(branch_a);
        let agents_b = on_branch(branch_b);
        if agents_a.is_empty() || agents_b.is_empty() {
            debug!(branch_a, branch_b, "no agents on one side, skipping conflict prevention");
            return Ok(0);
        }

        let initiator = agents_a[0].clone();
        let participants: Vec<String> =
            agents_a.iter().chain(agents_b.iter()).cloned().collect();
        let session_id = self.sessions.create_session(
            &initiator,
            participants,
            CollaborationMode::Synchronized,
            "Prevent merge conflicts",
            HashMap::from([
                ("branch_a".to_string(), json!(branch_a)),
                ("branch_b".to_string(), json!(branch_b)),
                ("potential_conflicts".to_string(), json!(conflicts.len())),
            ]),
        );

        let mut prevented = 0;
        for (idx, conflict) in conflicts.iter().enumerate() {
            self.knowledge.share(
                "system",
                "potential_conflict",
                json!({
                    "conflict": conflict,
                    "branches": [branch_a, branch_b],
                }),
                vec!["conflict_prevention".to_string()],
                1.0,
            );
            self.sessions.update_context(
                &session_id,
                &initiator,
                HashMap::from([(
                    format!("conflict_{idx}"),
                    json!({ "conflict": conflict, "proposed_resolutions": [] }),
                )]),
            )?;
            prevented += 1;
        }

        self.sessions.end_session(
            &session_id,
            vec![format!("Prevented {prevented} conflicts")],
        )?;
        self.conflicts_prevented
            .fetch_add(prevented as u64, Ordering::Relaxed);
        Ok(prevented)
    }

    pub fn summary(&self) -> HubSummary {
        let knowledge_stats = self.knowledge.stats();
        let recent_sessions = self
            .sessions
            .recent_sessions(10)
            .into_iter()
            .map(|session| SessionDigest {
                session_id: session.id.clone(),
                participants: session.participants.len(),
                mode: session.mode,
                purpose: session.purpose.clone(),
                duration_secs: session.duration_secs(),
                outcomes: session.outcomes,
            })
            .collect();

        HubSummary {
            help_requests: self.help_requests.load(Ordering::Relaxed),
            reviews_initiated: self.reviews_initiated.load(Ordering::Relaxed),
            conflicts_prevented: self.conflicts_prevented.load(Ordering::Relaxed),
            sessions: self.sessions.stats(),
            bus: self.bus.stats(),
            knowledge_items: knowledge_stats.items_total,
            knowledge_by_type: knowledge_stats.by_type,
            recent_sessions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{AgentHandle, StaticAgentPool};
    use crate::config::{BusConfig, KnowledgeConfig, SessionConfig};

    fn hub_with(agents: Vec<AgentHandle>) -> (Arc<MessageBus>, Arc<KnowledgeStore>, CollabHub) {
        let bus = Arc::new(MessageBus::new(BusConfig::default()));
        for agent in &agents {
            bus.register_agent(&agent.id);
        }
        let knowledge = Arc::new(KnowledgeStore::new(
            KnowledgeConfig::default(),
            Arc::clone(&bus),
        ));
        let sessions = Arc::new(SessionCoordinator::new(
            SessionConfig::default(),
            Arc::clone(&bus),
        ));
        let pool = Arc::new(StaticAgentPool::new(agents));
        let hub = CollabHub::new(
            Arc::clone(&bus),
            Arc::clone(&knowledge),
            sessions,
            pool,
        );
        (bus, knowledge, hub)
    }

    #[test]
    fn test_request_help_picks_matching_idle_agent() {
        let (bus, _knowledge, hub) = hub_with(vec![
            AgentHandle::new("agent-1", AgentState::Idle),
            AgentHandle::new("agent-2", AgentState::Idle)
                .with_expertise(vec!["auth".into(), "db".into()]),
            AgentHandle::new("agent-3", AgentState::Working)
                .with_expertise(vec!["auth".into()]),
        ]);

        let helper = hub.request_help(
            "agent-1",
            "auth",
            "token refresh loop is stuck",
            json!({}),
            &["auth".to_string()],
        );
        // agent-3 matches but is busy
        assert_eq!(helper.as_deref(), Some("agent-2"));

        let inbox = bus.receive("agent-2", None);
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].message_type, MessageType::HelpRequest);
        assert_eq!(inbox[0].priority, MessagePriority::High);
        assert!(inbox[0].requires_ack);
    }

    #[test]
    fn test_request_help_without_candidates() {
        let (_bus, _knowledge, hub) = hub_with(vec![
            AgentHandle::new("agent-1", AgentState::Idle),
            AgentHandle::new("agent-2", AgentState::Idle),
        ]);

        // nobody scores above zero
        let helper = hub.request_help(
            "agent-1",
            "auth",
            "stuck",
            json!({}),
            &["auth".to_string()],
        );
        assert!(helper.is_none());
    }

    #[test]
    fn test_request_help_rewards_knowledge_contributions() {
        let (_bus, knowledge, hub) = hub_with(vec![
            AgentHandle::new("agent-1", AgentState::Idle),
            AgentHandle::new("agent-2", AgentState::Idle),
            AgentHandle::new("agent-3", AgentState::Idle),
        ]);
        knowledge.share(
            "agent-3",
            "pattern",
            json!({ "note": "retry with backoff" }),
            vec!["auth".to_string()],
            0.8,
        );

        let helper = hub.request_help("agent-1", "auth", "stuck", json!({}), &[]);
        assert_eq!(helper.as_deref(), Some("agent-3"));
    }

    #[test]
    fn test_code_review_fans_out_to_two_reviewers() {
        let (bus, _knowledge, hub) = hub_with(vec![
            AgentHandle::new("author", AgentState::Working),
            AgentHandle::new("agent-1", AgentState::Idle),
            AgentHandle::new("agent-2", AgentState::Working),
            AgentHandle::new("agent-3", AgentState::Idle),
        ]);

        let reviewers = hub.initiate_code_review(
            "author",
            "feat/auth",
            vec!["src/auth.rs".into()],
            "standard",
            MessagePriority::Normal,
        );
        assert_eq!(reviewers.len(), 2);
        assert!(!reviewers.contains(&"author".to_string()));

        for reviewer in &reviewers {
            let inbox = bus.receive(reviewer, None);
            assert_eq!(inbox.len(), 1);
            assert_eq!(inbox[0].message_type, MessageType::ReviewRequest);
            assert!(inbox[0].requires_ack);
            assert!(inbox[0].expires_at.is_some());
        }
    }

    #[test]
    fn test_prevent_conflicts_runs_session_and_shares_knowledge() {
        let (_bus, knowledge, hub) = hub_with(vec![
            AgentHandle::new("agent-1", AgentState::Working).with_branch("feat/a"),
            AgentHandle::new("agent-2", AgentState::Working).with_branch("feat/b"),
        ]);

        let prevented = hub
            .prevent_conflicts(
                "feat/a",
                "feat/b",
                vec![
                    "Both branches modify: src/shared.rs".to_string(),
                    "Conflicting API signatures for: parse".to_string(),
                ],
            )
            .unwrap();
        assert_eq!(prevented, 2);

        let items = knowledge.access(
            &crate::knowledge::KnowledgeQuery::by_tags(vec!["conflict_prevention".to_string()]),
        );
        assert_eq!(items.len(), 2);

        let summary = hub.summary();
        assert_eq!(summary.conflicts_prevented, 2);
        assert_eq!(summary.sessions.successful_collaborations, 1);
        assert_eq!(summary.recent_sessions.len(), 1);
        assert_eq!(
            summary.recent_sessions[0].outcomes,
            vec!["Prevented 2 conflicts".to_string()]
        );
    }

    #[test]
    fn test_prevent_conflicts_needs_agents_on_both_branches() {
        let (_bus, _knowledge, hub) = hub_with(vec![
            AgentHandle::new("agent-1", AgentState::Working).with_branch("feat/a"),
        ]);

        let prevented = hub
            .prevent_conflicts("feat/a", "feat/b", vec!["overlap".to_string()])
            .unwrap();
        assert_eq!(prevented, 0);
        assert_eq!(hub.summary().sessions.sessions_created, 0);
    }

    #[test]
    fn test_summary_counts_help_and_reviews() {
        let (_bus, _knowledge, hub) = hub_with(vec![
            AgentHandle::new("agent-1", AgentState::Idle),
            AgentHandle::new("agent-2", AgentState::Idle)
                .with_expertise(vec!["db".to_string()]),
        ]);

        hub.request_help("agent-1", "db", "slow query", json!({}), &["db".to_string()]);
        hub.initiate_code_review(
            "agent-1",
            "feat/db",
            vec!["src/db.rs".into()],
            "standard",
            MessagePriority::Normal,
        );

        let summary = hub.summary();
        assert_eq!(summary.help_requests, 1);
        assert_eq!(summary.reviews_initiated, 1);
        assert!(summary.bus.messages_sent >= 2);
    }
}
