//! Bounded-lifetime shared contexts for groups of agents.
//!
//! A session is live from creation until it is ended explicitly or force-ended
//! by the timeout sweep. Only participants may mutate it.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bus::{Message, MessageBus, MessagePriority, MessageType};
use crate::config::SessionConfig;
use crate::error::{MeshError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollaborationMode {
    Isolated,
    Cooperative,
    Synchronized,
    Hierarchical,
    PeerToPeer,
}

impl CollaborationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Isolated => "isolated",
            Self::Cooperative => "cooperative",
            Self::Synchronized => "synchronized",
            Self::Hierarchical => "hierarchical",
            Self::PeerToPeer => "peer_to_peer",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub agent_id: String,
    pub timestamp: DateTime<Utc>,
    pub decision: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaborationSession {
    pub id: String,
    pub participants: Vec<String>,
    pub mode: CollaborationMode,
    pub purpose: String,
    pub shared_context: HashMap<String, serde_json::Value>,
    pub decisions: Vec<Decision>,
    pub outcomes: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl CollaborationSession {
    pub fn duration_secs(&self) -> i64 {
        let end = self.ended_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_seconds()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionStats {
    pub active_sessions: usize,
    pub sessions_created: u64,
    pub successful_collaborations: u64,
    pub timed_out_sessions: u64,
}

pub struct SessionCoordinator {
    config: SessionConfig,
    bus: Arc<MessageBus>,
    active: RwLock<HashMap<String, CollaborationSession>>,
    history: Mutex<VecDeque<CollaborationSession>>,
    counters: Mutex<SessionStats>,
    shutdown_tx: Mutex<Option<watch::Sender<bool>>>,
    sweep_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl SessionCoordinator {
    pub const TIMEOUT_OUTCOME: &'static str = "Session timed out";

    pub fn new(config: SessionConfig, bus: Arc<MessageBus>) -> Self {
        Self {
            config,
            bus,
            active: RwLock::new(HashMap::new()),
            history: Mutex::new(VecDeque::new()),
            counters: Mutex::new(SessionStats::default()),
            shutdown_tx: Mutex::new(None),
            sweep_handle: Mutex::new(None),
        }
    }

    /// Open a session and invite every other participant with a high-priority
    /// ack-required message. The initiator is always a participant.
    pub fn create_session(
        &self,
        initiator: &str,
        mut participants: Vec<String>,
        mode: CollaborationMode,
        purpose: &str,
        initial_context: HashMap<String, serde_json::Value>,
    ) -> String {
        if !participants.iter().any(|p| p == initiator) {
            participants.push(initiator.to_string());
        }

        let session = CollaborationSession {
            id: Uuid::new_v4().to_string(),
            participants: participants.clone(),
            mode,
            purpose: purpose.to_string(),
            shared_context: initial_context,
            decisions: Vec::new(),
            outcomes: Vec::new(),
            started_at: Utc::now(),
            ended_at: None,
        };
        let session_id = session.id.clone();

        self.active.write().insert(session_id.clone(), session);
        self.counters.lock().sessions_created += 1;

        for participant in participants.iter().filter(|p| *p != initiator) {
            self.bus.send(
                Message::new(
                    initiator,
                    Some(participant.clone()),
                    MessageType::SyncRequest,
                    format!("Collaboration session invitation: {purpose}"),
                    serde_json::json!({
                        "session_id": session_id,
                        "mode": mode.as_str(),
                        "purpose": purpose,
                        "participants": participants,
                    }),
                )
                .with_priority(MessagePriority::High)
                .with_ack(),
            );
        }

        info!(
            session_id = %session_id,
            initiator,
            participants = participants.len(),
            "Collaboration session created"
        );
        session_id
    }

    /// Merge a patch into the shared context and broadcast the changed keys
    /// to the other participants.
    pub fn update_context(
        &self,
        session_id: &str,
        agent_id: &str,
        patch: HashMap<String, serde_json::Value>,
    ) -> Result<()> {
        let recipients = {
            let mut active = self.active.write();
            let session = active
                .get_mut(session_id)
                .ok_or_else(|| MeshError::SessionNotFound(session_id.to_string()))?;
            Self::require_participant(session, agent_id)?;

            for (key, value) in &patch {
                session.shared_context.insert(key.clone(), value.clone());
            }
            session
                .participants
                .iter()
                .filter(|p| *p != agent_id)
                .cloned()
                .collect::<Vec<_>>()
        };

        let updated_keys: Vec<&String> = patch.keys().collect();
        for recipient in recipients {
            self.bus.send(Message::new(
                agent_id,
                Some(recipient),
                MessageType::StatusUpdate,
                format!("Session {session_id} context updated"),
                serde_json::json!({
                    "session_id": session_id,
                    "updated_keys": updated_keys,
                    "update": patch,
                }),
            ));
        }
        Ok(())
    }

    /// Append a decision to the session log. No broadcast.
    pub fn add_decision(
        &self,
        session_id: &str,
        agent_id: &str,
        decision: serde_json::Value,
    ) -> Result<()> {
        let mut active = self.active.write();
        let session = active
            .get_mut(session_id)
            .ok_or_else(|| MeshError::SessionNotFound(session_id.to_string()))?;
        Self::require_participant(session, agent_id)?;

        session.decisions.push(Decision {
            agent_id: agent_id.to_string(),
            timestamp: Utc::now(),
            decision,
        });
        Ok(())
    }

    /// Close a session and move it to history. Non-empty outcomes count as a
    /// successful collaboration.
    pub fn end_session(&self, session_id: &str, outcomes: Vec<String>) -> Result<()> {
        let mut session = self
            .active
            .write()
            .remove(session_id)
            .ok_or_else(|| MeshError::SessionNotFound(session_id.to_string()))?;

        session.ended_at = Some(Utc::now());
        let successful = !outcomes.is_empty();
        session.outcomes = outcomes;

        {
            let mut history = self.history.lock();
            history.push_back(session);
            while history.len() > self.config.history_limit {
                history.pop_front();
            }
        }

        if successful {
            self.counters.lock().successful_collaborations += 1;
        }
        debug!(session_id, "Collaboration session ended");
        Ok(())
    }

    pub fn get_session(&self, session_id: &str) -> Option<CollaborationSession> {
        self.active.read().get(session_id).cloned()
    }

    /// Most recently ended sessions, newest first.
    pub fn recent_sessions(&self, limit: usize) -> Vec<CollaborationSession> {
        let history = self.history.lock();
        history.iter().rev().take(limit).cloned().collect()
    }

    /// Force-end every active session older than the timeout. Returns the
    /// ids of the sessions that were ended.
    pub fn sweep(&self, now: DateTime<Utc>) -> Vec<String> {
        let timeout = chrono::Duration::seconds(self.config.timeout_secs);
        let stale: Vec<String> = self
            .active
            .read()
            .values()
            .filter(|session| now - session.started_at > timeout)
            .map(|session| session.id.clone())
            .collect();

        for session_id in &stale {
            warn!(session_id = %session_id, "Session timed out");
            if self
                .end_session(session_id, vec![Self::TIMEOUT_OUTCOME.to_string()])
                .is_ok()
            {
                self.counters.lock().timed_out_sessions += 1;
            }
        }
        stale
    }

    pub fn stats(&self) -> SessionStats {
        let mut stats = self.counters.lock().clone();
        stats.active_sessions = self.active.read().len();
        stats
    }

    fn require_participant(session: &CollaborationSession, agent_id: &str) -> Result<()> {
        if session.participants.iter().any(|p| p == agent_id) {
            Ok(())
        } else {
            Err(MeshError::NotAParticipant {
                session_id: session.id.clone(),
                agent_id: agent_id.to_string(),
            })
        }
    }

    /// Spawn the stale-session sweep loop.
    pub fn start(self: &Arc<Self>) {
        let (tx, mut rx) = watch::channel(false);
        *self.shutdown_tx.lock() = Some(tx);

        let coordinator = Arc::clone(self);
        let interval = self.config.sweep_interval();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        coordinator.sweep(Utc::now());
                    }
                    _ = rx.changed() => {
                        if *rx.borrow() {
                            debug!("Session sweep loop shutdown");
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
