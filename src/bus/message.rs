//! Message envelope exchanged between agents.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    StatusUpdate,
    DependencyChange,
    ConflictAlert,
    HelpRequest,
    KnowledgeShare,
    TaskHandoff,
    ReviewRequest,
    SyncRequest,
    Broadcast,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StatusUpdate => "status_update",
            Self::DependencyChange => "dependency_change",
            Self::ConflictAlert => "conflict_alert",
            Self::HelpRequest => "help_request",
            Self::KnowledgeShare => "knowledge_share",
            Self::TaskHandoff => "task_handoff",
            Self::ReviewRequest => "review_request",
            Self::SyncRequest => "sync_request",
            Self::Broadcast => "broadcast",
        }
    }
}

/// Priority carried on every message.
///
/// Priority is metadata for the receiver's own triage and for threshold
/// checks (e.g. ack requirements). Delivery order is strict FIFO per
/// recipient; priority never reorders a mailbox.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum MessagePriority {
    Low = 1,
    #[default]
    Normal = 2,
    High = 3,
    Critical = 4,
    Emergency = 5,
}

impl MessagePriority {
    pub fn value(&self) -> u8 {
        *self as u8
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub sender: String,
    /// `None` for broadcast to every known agent except the sender.
    pub recipient: Option<String>,
    pub message_type: MessageType,
    pub priority: MessagePriority,
    pub subject: String,
    pub content: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub requires_ack: bool,
    pub acknowledged: bool,
}

impl Message {
    pub fn new(
        sender: impl Into<String>,
        recipient: Option<String>,
        message_type: MessageType,
        subject: impl Into<String>,
        content: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender: sender.into(),
            recipient,
            message_type,
            priority: MessagePriority::Normal,
            subject: subject.into(),
            content,
            created_at: Utc::now(),
            expires_at: None,
            requires_ack: false,
            acknowledged: false,
        }
    }

    pub fn broadcast(
        sender: impl Into<String>,
        message_type: MessageType,
        subject: impl Into<String>,
        content: serde_json::Value,
    ) -> Self {
        Self::new(sender, None, message_type, subject, content)
    }

    pub fn with_priority(mut self, priority: MessagePriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.expires_at = Some(self.created_at + ttl);
        self
    }

    pub fn with_ack(mut self) -> Self {
        self.requires_ack = true;
        self
    }

    pub fn is_broadcast(&self) -> bool {
        self.recipient.is_none()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now > at)
    }
}
