//! Authenticated principals as the engine sees them.
//!
//! Authentication itself happens upstream; every request hands the engine a
//! [`User`] carrying a stable id and an opaque role name. The two well-known
//! roles below get special handling: `superuser` satisfies any rule's role
//! slot and `system` is the synthetic actor the expirer runs as.

use crate::utils;

pub const ROLE_SYSTEM: &str = "system";
pub const ROLE_SUPERUSER: &str = "superuser";
pub const ROLE_LICENSEE: &str = "licensee";

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct User {
    #[n(0)]
    pub id: String, // bech32 encoded uuid7
    #[n(1)]
    pub role: String,
    #[n(2)]
    pub is_superuser: bool,
}

impl User {
    /// A fresh principal with the given role and a generated address.
    pub fn with_role(role: &str) -> Self {
        Self {
            id: utils::new_uuid_to_bech32("user_").unwrap_or_else(|_| role.to_string()),
            role: role.to_string(),
            is_superuser: role == ROLE_SUPERUSER,
        }
    }

    /// The synthetic actor used by the time-driven expirer.
    pub fn system() -> Self {
        Self {
            id: ROLE_SYSTEM.to_string(),
            role: ROLE_SYSTEM.to_string(),
            is_superuser: false,
        }
    }

    pub fn superuser() -> Self {
        Self::with_role(ROLE_SUPERUSER)
    }

    pub fn is_authenticated(&self) -> bool {
        !self.id.is_empty()
    }
}
