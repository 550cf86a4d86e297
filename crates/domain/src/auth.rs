use serde::{Deserialize, Serialize};

/// Caller role carried in the bearer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Anonymous,
    /// Human operator working conversations.
    Agent,
    /// Automation (AI runner, internal jobs).
    Service,
    Admin,
}

impl Role {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "anonymous" | "guest" => Some(Role::Anonymous),
            "agent" | "user" => Some(Role::Agent),
            "service" | "system" => Some(Role::Service),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Anonymous => "anonymous",
            Role::Agent => "agent",
            Role::Service => "service",
            Role::Admin => "admin",
        }
    }

    /// May resolve identities, hold leases and send messages.
    pub fn can_operate(&self) -> bool {
        !matches!(self, Role::Anonymous)
    }

    /// May run merges and sweeps.
    pub fn can_consolidate(&self) -> bool {
        matches!(self, Role::Admin | Role::Service)
    }
}
