use serde::{Deserialize, Serialize};

use crate::core::models::Identity;

pub const FINANCE_LABEL: &str = "finance";
pub const INSTITUTION_LABEL: &str = "institution";
pub const COORDINATOR_LABEL: &str = "coordinator";
pub const COLLABORATOR_LABEL: &str = "collaborator";

/// Host role used when the role catalog has no `finance` entry.
pub const ADMIN_FALLBACK_LABEL: &str = "administrator";

/// Messaging role of an identity. Variants are declared lowest priority
/// first so the derived `Ord` is the resolution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Other,
    Collaborator,
    Coordinator,
    Institution,
    Finance,
}

impl Role {
    pub fn from_label(label: &str) -> Option<Role> {
        match label.trim().to_ascii_lowercase().as_str() {
            FINANCE_LABEL => Some(Role::Finance),
            INSTITUTION_LABEL => Some(Role::Institution),
            COORDINATOR_LABEL => Some(Role::Coordinator),
            COLLABORATOR_LABEL => Some(Role::Collaborator),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Finance => FINANCE_LABEL,
            Role::Institution => INSTITUTION_LABEL,
            Role::Coordinator => COORDINATOR_LABEL,
            Role::Collaborator => COLLABORATOR_LABEL,
            Role::Other => "other",
        }
    }
}

/// Highest-priority known label wins; administrators without one act as
/// finance; everyone else is `Other`.
pub fn resolve_role(identity: &Identity) -> Role {
    let best = identity
        .roles
        .iter()
        .filter_map(|label| Role::from_label(label))
        .max();

    match best {
        Some(role) => role,
        None if identity.is_admin => Role::Finance,
        None => Role::Other,
    }
}

/// Label shown to clients: the resolved role, or for `Other` the identity's
/// first raw label (possibly empty).
pub fn role_label(identity: &Identity) -> String {
    match resolve_role(identity) {
        Role::Other => identity.roles.first().cloned().unwrap_or_default(),
        role => role.as_str().to_string(),
    }
}
