use serde::{Deserialize, Serialize};

/// Role assigned to a principal.
///
/// The set is closed: a role name that does not parse is treated by the
/// authorization layer as "no permissions", never as an error.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Platform administrator.
    Admin,
    /// Station commander.
    Commissaire,
    /// Judicial police officer.
    Officier,
    /// Field agent.
    Agent,
    /// Records clerk.
    Secretaire,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::Admin,
        Role::Commissaire,
        Role::Officier,
        Role::Agent,
        Role::Secretaire,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Commissaire => "commissaire",
            Role::Officier => "officier",
            Role::Agent => "agent",
            Role::Secretaire => "secretaire",
        }
    }

    /// Parse a role name (case-insensitive, surrounding whitespace ignored).
    pub fn parse(name: &str) -> Option<Role> {
        let name = name.trim();
        Role::ALL
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(name))
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
