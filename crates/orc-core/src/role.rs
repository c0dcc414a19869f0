use std::fmt;

use serde::{Deserialize, Serialize};

/// One of the three worker roles. The Coordinator and Structurer are not
/// roles in this sense — they are singletons, not a queue-partitioned pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Produces file contents from an instruction.
    Executor,
    /// Writes and evaluates tests against produced content.
    Tester,
    /// Writes documentation for produced content.
    Documenter,
}

impl Role {
    /// All worker roles, in the fixed order used for lock acquisition (§5).
    pub const ALL: [Role; 3] = [Role::Executor, Role::Tester, Role::Documenter];
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Executor => "executor",
            Role::Tester => "tester",
            Role::Documenter => "documenter",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Role {
    type Err = crate::error::CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "executor" => Ok(Role::Executor),
            "tester" => Ok(Role::Tester),
            "documenter" => Ok(Role::Documenter),
            other => Err(crate::error::CoreError::UnknownRole(other.to_string())),
        }
    }
}

/// Every long-lived component that has a run-state in the Supervisor (§4.4, §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentId {
    /// The Coordinator agent.
    Coordinator,
    /// The executor worker role.
    Executor,
    /// The tester worker role.
    Tester,
    /// The documenter worker role.
    Documenter,
    /// The Structurer agent.
    Structurer,
}

impl AgentId {
    /// All five supervised agents.
    pub const ALL: [AgentId; 5] = [
        AgentId::Coordinator,
        AgentId::Executor,
        AgentId::Tester,
        AgentId::Documenter,
        AgentId::Structurer,
    ];
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentId::Coordinator => "coordinator",
            AgentId::Executor => "executor",
            AgentId::Tester => "tester",
            AgentId::Documenter => "documenter",
            AgentId::Structurer => "structurer",
        };
        write!(f, "{s}")
    }
}

impl From<Role> for AgentId {
    fn from(role: Role) -> Self {
        match role {
            Role::Executor => AgentId::Executor,
            Role::Tester => AgentId::Tester,
            Role::Documenter => AgentId::Documenter,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn role_round_trips_through_display_and_from_str() {
        for role in Role::ALL {
            let s = role.to_string();
            assert_eq!(Role::from_str(&s).unwrap(), role);
        }
    }

    #[test]
    fn unknown_role_string_is_rejected() {
        assert!(Role::from_str("reviewer").is_err());
    }

    #[test]
    fn agent_id_from_role_maps_correctly() {
        assert_eq!(AgentId::from(Role::Executor), AgentId::Executor);
        assert_eq!(AgentId::from(Role::Tester), AgentId::Tester);
        assert_eq!(AgentId::from(Role::Documenter), AgentId::Documenter);
    }
}
