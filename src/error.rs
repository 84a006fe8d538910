use thiserror::Error;

#[derive(Error, Debug)]
pub enum MeshError {
    #[error("Branch not registered: {0}")]
    BranchNotFound(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Dependency change not found: {0}")]
    ChangeNotFound(String),

    #[error("Agent {agent_id} is not a participant of session {session_id}")]
    NotAParticipant {
        session_id: String,
        agent_id: String,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Analyzer error: {0}")]
    Analyzer(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl MeshError {
    /// True for failures that come from an external collaborator (analyzer,
    /// filesystem) rather than from bad caller input or missing state.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Analyzer(_) | Self::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, MeshError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_messages() {
        let err = MeshError::BranchNotFound("feat/login".into());
        assert!(err.to_string().contains("feat/login"));

        let err = MeshError::NotAParticipant {
            session_id: "sess-1".into(),
            agent_id: "agent-9".into(),
        };
        assert!(err.to_string().contains("sess-1"));
        assert!(err.to_string().contains("agent-9"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(MeshError::Analyzer("parse failed".into()).is_transient());
        assert!(!MeshError::BranchNotFound("x".into()).is_transient());
        assert!(!MeshError::Validation("bad".into()).is_transient());
    }
}
