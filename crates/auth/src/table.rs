//! Static role → permission table.
//!
//! Built once on first use and shared read-only by every request; there is no
//! runtime mutation path, so lookups never lock.

use std::collections::{BTreeMap, BTreeSet};

use once_cell::sync::Lazy;
use tracing::warn;

use crate::permissions::{resources, Action, Permission};
use crate::Role;

static TABLE: Lazy<RolePermissionTable> = Lazy::new(RolePermissionTable::build);

static EMPTY: BTreeSet<Permission> = BTreeSet::new();

/// Records produced in the field.
const FIELD_RECORDS: [&str; 5] = [
    resources::CONTROLES,
    resources::INCIDENTS,
    resources::AMENDES,
    resources::CONVOCATIONS,
    resources::OBJETS,
];

/// Resources every station role may consult.
const STATION_READABLE: [&str; 8] = [
    resources::COMMISSARIATS,
    resources::CONTROLES,
    resources::INCIDENTS,
    resources::AMENDES,
    resources::CONVOCATIONS,
    resources::OBJETS,
    resources::STATISTIQUES,
    resources::RAPPORTS,
];

#[derive(Debug)]
pub struct RolePermissionTable {
    grants: BTreeMap<Role, BTreeSet<Permission>>,
}

impl RolePermissionTable {
    /// The process-wide table.
    pub fn global() -> &'static RolePermissionTable {
        &TABLE
    }

    fn build() -> Self {
        let mut grants = BTreeMap::new();

        let admin: BTreeSet<Permission> = resources::ALL
            .iter()
            .flat_map(|r| Action::ALL.into_iter().map(move |a| Permission::of(r, a)))
            .collect();

        let commissaire: BTreeSet<Permission> = admin
            .iter()
            .filter(|p| !matches!(p.as_str(), "users:delete" | "audit:update" | "audit:delete"))
            .cloned()
            .collect();

        let mut officier = grant(&STATION_READABLE, &[Action::Read]);
        officier.extend(grant(&FIELD_RECORDS, &[Action::Create, Action::Update]));
        officier.extend(grant(&[resources::RAPPORTS], &[Action::Create, Action::Update]));

        let mut agent = grant(&FIELD_RECORDS, &[Action::Read, Action::Create]);
        agent.extend(grant(
            &[resources::STATISTIQUES, resources::COMMISSARIATS],
            &[Action::Read],
        ));

        let mut secretaire = grant(&STATION_READABLE, &[Action::Read]);
        secretaire.extend(grant(
            &[resources::CONVOCATIONS, resources::OBJETS, resources::RAPPORTS],
            &[Action::Create, Action::Update],
        ));

        grants.insert(Role::Admin, admin);
        grants.insert(Role::Commissaire, commissaire);
        grants.insert(Role::Officier, officier);
        grants.insert(Role::Agent, agent);
        grants.insert(Role::Secretaire, secretaire);

        Self { grants }
    }

    pub fn permissions_for(&self, role: Role) -> &BTreeSet<Permission> {
        self.grants.get(&role).unwrap_or(&EMPTY)
    }

    /// Permissions for a role given by name.
    ///
    /// Unknown names yield the empty set; callers deny by default.
    pub fn permissions_for_name(&self, role: &str) -> &BTreeSet<Permission> {
        match Role::parse(role) {
            Some(role) => self.permissions_for(role),
            None => {
                warn!(role = %role, "unknown role has no permissions");
                &EMPTY
            }
        }
    }

    pub fn has_permission(&self, role: &str, permission: &Permission) -> bool {
        self.permissions_for_name(role).contains(permission)
    }

    /// Roles whose grant set contains `permission`.
    pub fn roles_granting(&self, permission: &Permission) -> Vec<Role> {
        self.grants
            .iter()
            .filter(|(_, perms)| perms.contains(permission))
            .map(|(role, _)| *role)
            .collect()
    }
}

fn grant(resources: &[&str], actions: &[Action]) -> BTreeSet<Permission> {
    resources
        .iter()
        .flat_map(|r| actions.iter().map(move |a| Permission::of(r, *a)))
        .collect()
}

/// Permissions granted to `role` by the process-wide table.
pub fn permissions_for(role: Role) -> &'static BTreeSet<Permission> {
    RolePermissionTable::global().permissions_for(role)
}

/// Exact membership test against the process-wide table.
pub fn has_permission(role: &str, permission: &Permission) -> bool {
    RolePermissionTable::global().has_permission(role, permission)
}
