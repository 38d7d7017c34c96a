use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Action half of a permission.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Read,
    Create,
    Update,
    Delete,
}

impl Action {
    pub const ALL: [Action; 4] = [Action::Read, Action::Create, Action::Update, Action::Delete];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Read => "read",
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
        }
    }
}

impl core::fmt::Display for Action {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resources guarded by the trust core.
///
/// Each one corresponds to a route family served by a domain module
/// (`/api/v1/<resource>/...`).
pub mod resources {
    pub const USERS: &str = "users";
    pub const SESSIONS: &str = "sessions";
    pub const COMMISSARIATS: &str = "commissariats";
    pub const CONTROLES: &str = "controles";
    pub const INCIDENTS: &str = "incidents";
    pub const AMENDES: &str = "amendes";
    pub const CONVOCATIONS: &str = "convocations";
    pub const OBJETS: &str = "objets";
    pub const STATISTIQUES: &str = "statistiques";
    pub const RAPPORTS: &str = "rapports";
    pub const AUDIT: &str = "audit";

    pub const ALL: [&str; 11] = [
        USERS,
        SESSIONS,
        COMMISSARIATS,
        CONTROLES,
        INCIDENTS,
        AMENDES,
        CONVOCATIONS,
        OBJETS,
        STATISTIQUES,
        RAPPORTS,
        AUDIT,
    ];
}

/// Permission identifier, always of the form `"<resource>:<action>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn of(resource: &str, action: Action) -> Self {
        Self(Cow::Owned(format!("{resource}:{}", action.as_str())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Resource segment (everything before the last `:`).
    pub fn resource(&self) -> &str {
        match self.0.rsplit_once(':') {
            Some((resource, _)) => resource,
            None => &self.0,
        }
    }

    /// Action segment, if it names a known action.
    pub fn action(&self) -> Option<Action> {
        let (_, action) = self.0.rsplit_once(':')?;
        Action::ALL.into_iter().find(|a| a.as_str() == action)
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for Permission {
    fn from(value: &'static str) -> Self {
        Self::new(value)
    }
}
