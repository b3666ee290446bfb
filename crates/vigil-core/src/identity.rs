//! Identity and role types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Role carried by a verified identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// May use the terminal and configuration-mutation capabilities
    Elevated,
    /// Observation only: telemetry and process listing
    Restricted,
}

impl Role {
    /// Whether this role may use privileged capabilities
    pub fn is_elevated(&self) -> bool {
        matches!(self, Role::Elevated)
    }

    /// Parse a role from its wire name
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "elevated" => Some(Role::Elevated),
            "restricted" => Some(Role::Restricted),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Elevated => write!(f, "elevated"),
            Role::Restricted => write!(f, "restricted"),
        }
    }
}

/// A verified identity, decoded from a signed token.
///
/// Immutable for the token's lifetime; the agent never constructs one
/// except through the capability gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Stable subject identifier
    pub subject: String,
    /// Display name
    pub name: String,
    /// Granted role
    pub role: Role,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse() {
        assert_eq!(Role::parse("elevated"), Some(Role::Elevated));
        assert_eq!(Role::parse("restricted"), Some(Role::Restricted));
        assert_eq!(Role::parse("admin"), None);
        assert_eq!(Role::parse(""), None);
    }

    #[test]
    fn test_role_display() {
        assert_eq!(format!("{}", Role::Elevated), "elevated");
        assert_eq!(format!("{}", Role::Restricted), "restricted");
    }

    #[test]
    fn test_role_wire_name() {
        let json = serde_json::to_string(&Role::Restricted).unwrap();
        assert_eq!(json, "\"restricted\"");
    }
}
