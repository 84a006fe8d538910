//! branch-mesh: in-memory coordination core for multi-agent development.
//!
//! Five cooperating components, all process-local:
//!
//! - [`bus::MessageBus`] — priority-tagged agent messaging with strict FIFO
//!   delivery per recipient
//! - [`knowledge::KnowledgeStore`] — tagged knowledge items with
//!   relevance-ranked retrieval and age/usage-based retention
//! - [`session::SessionCoordinator`] — short-lived collaboration sessions
//!   with shared context and decision logs
//! - [`registry::BranchRegistry`] — branch-state synchronization, conflict
//!   detection, and merge-readiness reports
//! - [`graph::DependencyGraphEngine`] — file-level dependency graph, change
//!   impact classification, and propagation to affected branches
//!
//! [`hub::CollabHub`] layers the cross-component workflows (help requests,
//! review fan-out, conflict prevention) on top. Nothing persists across
//! restarts; every component is a best-effort, in-memory coordinator.

pub mod agents;
pub mod analyzer;
pub mod bus;
pub mod config;
pub mod error;
pub mod graph;
pub mod hub;
pub mod knowledge;
pub mod registry;
pub mod session;

pub use agents::{AgentHandle, AgentPool, AgentState, StaticAgentPool};
pub use analyzer::{FileAnalysis, SourceScanner, StaticAnalyzer};
pub use bus::{Message, MessageBus, MessagePriority, MessageType};
pub use config::MeshConfig;
pub use error::{MeshError, Result};
pub use graph::{ChangeImpact, DependencyGraphEngine, DependencyType, PropagationStrategy};
pub use hub::CollabHub;
pub use knowledge::{KnowledgeQuery, KnowledgeStore, SharedKnowledge};
pub use registry::{BranchInfo, BranchInfoType, BranchRegistry, SyncStrategy, UpdateData};
pub use session::{CollaborationMode, SessionCoordinator};
