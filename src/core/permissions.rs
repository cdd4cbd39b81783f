//! Who may originate a thread with whom.
//!
//! | actor        | allowed targets                                        |
//! |--------------|--------------------------------------------------------|
//! | finance      | anyone                                                 |
//! | institution  | finance, coordinator                                   |
//! | coordinator  | finance; collaborator only if it manages that account  |
//! | collaborator | finance                                                |
//! | other        | finance                                                |
//!
//! Only origination is gated. Once a thread exists, both participants post
//! to it without another check.

use crate::core::models::{Identity, UserId};
use crate::core::roles::{resolve_role, Role};

/// The parts of an identity the rules look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Party {
    pub id: UserId,
    pub role: Role,
    pub managed_by: Option<UserId>,
}

impl Party {
    pub fn of(identity: &Identity) -> Self {
        Party {
            id: identity.id,
            role: resolve_role(identity),
            managed_by: identity.managed_by,
        }
    }
}

pub fn can_initiate(actor: &Party, target: &Party) -> bool {
    match actor.role {
        Role::Finance => true,
        Role::Institution => matches!(target.role, Role::Finance | Role::Coordinator),
        Role::Coordinator => match target.role {
            Role::Finance => true,
            Role::Collaborator => target.managed_by == Some(actor.id),
            _ => false,
        },
        Role::Collaborator | Role::Other => target.role == Role::Finance,
    }
}

/// A thread between `a` and `b` may be created if either side could start it.
pub fn can_initiate_either(a: &Party, b: &Party) -> bool {
    can_initiate(a, b) || can_initiate(b, a)
}
