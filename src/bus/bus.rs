//! Per-agent FIFO mailboxes with broadcast fan-out and acknowledgment
//! tracking.
//!
//! Best-effort semantics: messages live in process memory only. Expired
//! messages are silently skipped on receive, and a periodic sweep drops
//! expired pending acks and trims over-bound mailboxes. A message may expire
//! between a foreground check and the sweep; that race is accepted.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tracing::{debug, warn};

use super::message::Message;
use crate::config::BusConfig;

/// Snapshot of bus activity. Zero-valued when nothing has happened yet.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct BusStats {
    pub messages_sent: u64,
    pub messages_delivered: u64,
    pub pending_acks: usize,
    pub history_size: usize,
    pub queued_per_agent: HashMap<String, usize>,
}

/// Outcome of one reconciler sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired_acks: usize,
    pub trimmed_messages: usize,
}

pub struct MessageBus {
    config: BusConfig,
    queues: RwLock<HashMap<String, VecDeque<Message>>>,
    pending_acks: Mutex<HashMap<String, Message>>,
    history: Mutex<VecDeque<Message>>,
    messages_sent: AtomicU64,
    messages_delivered: AtomicU64,
    shutdown_tx: Mutex<Option<watch::Sender<bool>>>,
    sweep_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl MessageBus {
    pub fn new(config: BusConfig) -> Self {
        Self {
            config,
            queues: RwLock::new(HashMap::new()),
            pending_acks: Mutex::new(HashMap::new()),
            history: Mutex::new(VecDeque::new()),
            messages_sent: AtomicU64::new(0),
            messages_delivered: AtomicU64::new(0),
            shutdown_tx: Mutex::new(None),
            sweep_handle: Mutex::new(None),
        }
    }

    /// Create an empty mailbox so the agent receives future broadcasts even
    /// before it has been messaged directly. Idempotent.
    pub fn register_agent(&self, agent_id: &str) {
        self.queues
            .write()
            .entry(agent_id.to_string())
            .or_default();
    }

    pub fn known_agents(&self) -> Vec<String> {
        self.queues.read().keys().cloned().collect()
    }

    /// Queue a message for delivery and return its id.
    ///
    /// A `None` recipient fans out to every known mailbox except the
    /// sender's. Always recorded in the bounded history; ack-required
    /// messages are tracked until acknowledged or expired.
    pub fn send(&self, message: Message) -> String {
        let id = message.id.clone();

        {
            let mut queues = self.queues.write();
            match &message.recipient {
                Some(recipient) => {
                    queues
                        .entry(recipient.clone())
                        .or_default()
                        .push_back(message.clone());
                }
                None => {
                    for (agent_id, queue) in queues.iter_mut() {
                        if agent_id != &message.sender {
                            queue.push_back(message.clone());
                        }
                    }
                }
            }
        }

        if message.requires_ack {
            self.pending_acks.lock().insert(id.clone(), message.clone());
        }

        {
            let mut history = self.history.lock();
            history.push_back(message.clone());
            while history.len() > self.config.history_limit {
                history.pop_front();
            }
        }

        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        debug!(
            message_id = %id,
            sender = %message.sender,
            recipient = message.recipient.as_deref().unwrap_or("all"),
            message_type = message.message_type.as_str(),
            "Message sent"
        );
        id
    }

    /// Pop up to `max` messages from the agent's mailbox in FIFO order,
    /// silently dropping any that have expired.
    pub fn receive(&self, agent_id: &str, max: Option<usize>) -> Vec<Message> {
        let now = Utc::now();
        let mut delivered = Vec::new();

        let mut queues = self.queues.write();
        let Some(queue) = queues.get_mut(agent_id) else {
            return delivered;
        };

        while let Some(message) = queue.pop_front() {
            if message.is_expired(now) {
                continue;
            }
            delivered.push(message);
            if max.is_some_and(|m| delivered.len() >= m) {
                break;
            }
        }
        drop(queues);

        self.messages_delivered
            .fetch_add(delivered.len() as u64, Ordering::Relaxed);
        delivered
    }

    /// Acknowledge a pending message. Only the original recipient (or anyone,
    /// for broadcasts) clears the pending entry; other callers are ignored.
    pub fn acknowledge(&self, agent_id: &str, message_id: &str) -> bool {
        let mut pending = self.pending_acks.lock();
        let authorized = match pending.get(message_id) {
            Some(message) => message
                .recipient
                .as_deref()
                .is_none_or(|recipient| recipient == agent_id),
            None => false,
        };

        if authorized {
            pending.remove(message_id);
            debug!(message_id, agent_id, "Message acknowledged");
        }
        authorized
    }

    /// Drop expired pending acks and trim over-bound mailboxes, oldest first.
    pub fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        {
            let mut pending = self.pending_acks.lock();
            let expired: Vec<String> = pending
                .iter()
                .filter(|(_, message)| message.is_expired(now))
                .map(|(id, _)| id.clone())
                .collect();
            for id in expired {
                warn!(message_id = %id, "Acknowledgment window expired, dropping");
                pending.remove(&id);
                report.expired_acks += 1;
            }
        }

        {
            let mut queues = self.queues.write();
            for (agent_id, queue) in queues.iter_mut() {
                if queue.len() > self.config.max_queue_size {
                    let excess = queue.len() - self.config.max_queue_size;
                    queue.drain(..excess);
                    warn!(agent_id = %agent_id, dropped = excess, "Trimmed mailbox overflow");
                    report.trimmed_messages += excess;
                }
            }
        }

        report
    }

    /// Most recent sends, newest first.
    pub fn history(&self, limit: usize) -> Vec<Message> {
        let history = self.history.lock();
        history.iter().rev().take(limit).cloned().collect()
    }

    /// Most recent sends visible to an agent, newest first.
    pub fn history_for(&self, agent_id: &str, limit: usize) -> Vec<Message> {
        let history = self.history.lock();
        history
            .iter()
            .rev()
            .filter(|m| match &m.recipient {
                Some(recipient) => recipient == agent_id,
                None => m.sender != agent_id,
            })
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn pending_ack_count(&self) -> usize {
        self.pending_acks.lock().len()
    }

    pub fn stats(&self) -> BusStats {
        let queues = self.queues.read();
        BusStats {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_delivered: self.messages_delivered.load(Ordering::Relaxed),
            pending_acks: self.pending_acks.lock().len(),
            history_size: self.history.lock().len(),
            queued_per_agent: queues
                .iter()
                .map(|(id, queue)| (id.clone(), queue.len()))
                .collect(),
        }
    }

    /// Spawn the background sweep loop.
    pub fn start(self: &Arc<Self>) {
        let (tx, mut rx) = watch::channel(false);
        *self.shutdown_tx.lock() = Some(tx);

        let bus = Arc::clone(self);
        let interval = self.config.sweep_interval();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        bus.sweep(Utc::now());
                    }
                    _ = rx.changed() => {
                        if *rx.borrow() {
                            debug!("Message bus sweep loop shutdown");
                            break;
                        }
                    }
                }
            }
        });
        *self.sweep_handle.lock() = Some(handle);
    }

    /// Signal the sweep loop to stop and wait for it to exit.
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
    use crate::bus::{MessagePriority, MessageType};
    use chrono::Duration;
    use serde_json::json;

    fn bus() -> MessageBus {
        MessageBus::new(BusConfig::default())
    }

    fn text(sender: &str, recipient: Option<&str>, subject: &str) -> Message {
        Message::new(
            sender,
            recipient.map(String::from),
            MessageType::StatusUpdate,
            subject,
            json!({}),
        )
    }

    #[test]
    fn test_fifo_delivery_order() {
        let bus = bus();
        bus.send(text("a", Some("b"), "first"));
        bus.send(text("a", Some("b"), "second"));
        bus.send(text("a", Some("b"), "third"));

        let received = bus.receive("b", None);
        let subjects: Vec<&str> = received.iter().map(|m| m.subject.as_str()).collect();
        assert_eq!(subjects, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_fifo_ignores_priority() {
        let bus = bus();
        bus.send(text("a", Some("b"), "low").with_priority(MessagePriority::Low));
        bus.send(text("a", Some("b"), "emergency").with_priority(MessagePriority::Emergency));

        let received = bus.receive("b", None);
        assert_eq!(received[0].subject, "low");
        assert_eq!(received[1].subject, "emergency");
    }

    #[test]
    fn test_broadcast_excludes_sender() {
        let bus = bus();
        bus.register_agent("a");
        bus.register_agent("b");
        bus.register_agent("c");

        bus.send(Message::broadcast(
            "a",
            MessageType::Broadcast,
            "hello",
            json!({}),
        ));

        assert!(bus.receive("a", None).is_empty());
        assert_eq!(bus.receive("b", None).len(), 1);
        assert_eq!(bus.receive("c", None).len(), 1);
    }

    #[test]
    fn test_broadcast_reaches_idle_registered_agent() {
        let bus = bus();
        bus.register_agent("idle");
        bus.send(Message::broadcast(
            "sender",
            MessageType::Broadcast,
            "ping",
            json!({}),
        ));
        assert_eq!(bus.receive("idle", None).len(), 1);
    }

    #[test]
    fn test_receive_skips_expired() {
        let bus = bus();
        let mut expired = text("a", Some("b"), "old");
        expired.expires_at = Some(Utc::now() - Duration::seconds(1));
        bus.send(expired);
        bus.send(text("a", Some("b"), "fresh"));

        let received = bus.receive("b", None);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].subject, "fresh");
    }

    #[test]
    fn test_receive_respects_max() {
        let bus = bus();
        for i in 0..5 {
            bus.send(text("a", Some("b"), &format!("m{i}")));
        }
        assert_eq!(bus.receive("b", Some(2)).len(), 2);
        assert_eq!(bus.receive("b", None).len(), 3);
    }

    #[test]
    fn test_acknowledge_authorization() {
        let bus = bus();
        let id = bus.send(text("a", Some("b"), "ack me").with_ack());

        // Wrong agent cannot clear the pending entry.
        assert!(!bus.acknowledge("c", &id));
        assert_eq!(bus.pending_ack_count(), 1);

        assert!(bus.acknowledge("b", &id));
        assert_eq!(bus.pending_ack_count(), 0);

        // Second ack is a no-op.
        assert!(!bus.acknowledge("b", &id));
    }

    #[test]
    fn test_broadcast_ack_by_anyone() {
        let bus = bus();
        bus.register_agent("x");
        let id = bus.send(
            Message::broadcast("a", MessageType::Broadcast, "s", json!({})).with_ack(),
        );
        assert!(bus.acknowledge("x", &id));
    }

    #[test]
    fn test_sweep_drops_expired_acks_and_trims_queues() {
        let bus = MessageBus::new(BusConfig {
            max_queue_size: 3,
            ..BusConfig::default()
        });

        let mut stale = text("a", Some("b"), "stale").with_ack();
        stale.expires_at = Some(Utc::now() - Duration::seconds(10));
        bus.send(stale);

        for i in 0..6 {
            bus.send(text("a", Some("b"), &format!("m{i}")));
        }

        let report = bus.sweep(Utc::now());
        assert_eq!(report.expired_acks, 1);
        // 7 queued, bound 3 -> 4 dropped (stale message included in queue).
        assert_eq!(report.trimmed_messages, 4);
        assert_eq!(bus.pending_ack_count(), 0);

        // Oldest entries were discarded; the newest three remain.
        let remaining = bus.receive("b", None);
        let subjects: Vec<&str> = remaining.iter().map(|m| m.subject.as_str()).collect();
        assert_eq!(subjects, vec!["m3", "m4", "m5"]);
    }

    #[test]
    fn test_history_and_stats() {
        let bus = bus();
        bus.register_agent("b");
        bus.send(text("a", Some("b"), "one"));
        bus.send(Message::broadcast("a", MessageType::Broadcast, "two", json!({})));

        let history = bus.history(10);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].subject, "two");

        let for_b = bus.history_for("b", 10);
        assert_eq!(for_b.len(), 2);
        // Broadcasts sent by the agent itself are not part of its view.
        let for_a = bus.history_for("a", 10);
        assert!(for_a.is_empty());

        let stats = bus.stats();
        assert_eq!(stats.messages_sent, 2);
        assert_eq!(stats.queued_per_agent.get("b"), Some(&2));
    }

    #[test]
    fn test_empty_stats_are_zero_valued() {
        let stats = bus().stats();
        assert_eq!(stats.messages_sent, 0);
        assert_eq!(stats.messages_delivered, 0);
        assert_eq!(stats.pending_acks, 0);
        assert!(stats.queued_per_agent.is_empty());
    }

    #[tokio::test]
    async fn test_start_stop_sweep_loop() {
        let bus = Arc::new(MessageBus::new(BusConfig {
            sweep_interval_secs: 1,
            ..BusConfig::default()
        }));
        bus.start();
        bus.stop().await;
    }
}
