//! Short-lived multi-agent collaboration sessions.

mod coordinator;

pub use coordinator::{
    CollaborationMode, CollaborationSession, Decision, SessionCoordinator, SessionStats,
};
