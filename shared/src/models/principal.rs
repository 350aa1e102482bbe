//! Principal Model
//!
//! An authenticated actor with a role claim. Session issuance happens
//! upstream; this core only consumes the opaque identity.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Actor role
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Restaurant,
    Driver,
    Admin,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Restaurant => write!(f, "restaurant"),
            Role::Driver => write!(f, "driver"),
            Role::Admin => write!(f, "admin"),
        }
    }
}

/// Authenticated actor
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Principal {
    pub id: Uuid,
    pub role: Role,
}

impl Principal {
    pub fn new(id: Uuid, role: Role) -> Self {
        Self { id, role }
    }

    pub fn restaurant(id: Uuid) -> Self {
        Self::new(id, Role::Restaurant)
    }

    pub fn driver(id: Uuid) -> Self {
        Self::new(id, Role::Driver)
    }

    pub fn admin(id: Uuid) -> Self {
        Self::new(id, Role::Admin)
    }
}
