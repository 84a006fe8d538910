//! Agent pool seam.
//!
//! The mesh never schedules agents itself; it only needs to enumerate known
//! agents and their coarse state to pick broadcast targets, helpers, and
//! reviewers. Callers inject any implementation of [`AgentPool`].

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Idle,
    Working,
}

impl AgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Working => "working",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentHandle {
    pub id: String,
    pub state: AgentState,
    /// Expertise tags used for help-request matching.
    #[serde(default)]
    pub expertise: Vec<String>,
    /// Branch the agent is currently working on, if any.
    #[serde(default)]
    pub current_branch: Option<String>,
}

impl AgentHandle {
    pub fn new(id: impl Into<String>, state: AgentState) -> Self {
        Self {
            id: id.into(),
            state,
            expertise: Vec::new(),
            current_branch: None,
        }
    }

    pub fn with_expertise(mut self, expertise: Vec<String>) -> Self {
        self.expertise = expertise;
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.current_branch = Some(branch.into());
        self
    }
}

/// Read-only view of the agent scheduling pool.
pub trait AgentPool: Send + Sync {
    fn list_agents(&self) -> Vec<AgentHandle>;
}

/// Static pool backed by a fixed list, for wiring tests and small deployments.
#[derive(Debug, Default)]
pub struct StaticAgentPool {
    agents: Vec<AgentHandle>,
}

impl StaticAgentPool {
    pub fn new(agents: Vec<AgentHandle>) -> Self {
        Self { agents }
    }
}

impl AgentPool for StaticAgentPool {
    fn list_agents(&self) -> Vec<AgentHandle> {
        self.agents.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_state_as_str() {
        assert_eq!(AgentState::Idle.as_str(), "idle");
        assert_eq!(AgentState::Working.as_str(), "working");
    }

    #[test]
    fn test_static_pool_lists_agents() {
        let pool = StaticAgentPool::new(vec![
            AgentHandle::new("agent-1", AgentState::Idle),
            AgentHandle::new("agent-2", AgentState::Working)
                .with_expertise(vec!["auth".into(), "db".into()]),
        ]);

        let agents = pool.list_agents();
        assert_eq!(agents.len(), 2);
        assert_eq!(agents[1].expertise, vec!["auth", "db"]);
    }
}
