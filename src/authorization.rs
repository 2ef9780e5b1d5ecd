//! Caller identity and role guards.
//!
//! Every protected request carries a `Caller` resolved from its bearer
//! session. Role checks match on the closed `Role` enum so adding a role is
//! a compile-time change everywhere a decision is made.

use uuid::Uuid;

use crate::models::{Role, User};

/// Authenticated identity attached to a request by the auth middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: Uuid,
    pub email: String,
    pub name: String,
    pub role: Role,
}

impl Caller {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Admin or doctor: the roles allowed to manage clinical data.
    pub fn is_staff(&self) -> bool {
        match self.role {
            Role::Admin | Role::Doctor => true,
            Role::Patient => false,
        }
    }

    /// Require one of `allowed`, or explain who may perform `action`.
    pub fn require(&self, allowed: &[Role], action: &str) -> Result<(), AccessDenied> {
        if allowed.contains(&self.role) {
            return Ok(());
        }
        tracing::warn!(
            user_id = %self.user_id,
            role = %self.role,
            action,
            "Role not permitted"
        );
        let names: Vec<&str> = allowed.iter().map(Role::as_str).collect();
        Err(AccessDenied(format!(
            "Only {} can {action}",
            names.join("/")
        )))
    }
}

impl From<&User> for Caller {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id,
            email: user.email.clone(),
            name: user.name.clone(),
            role: user.role,
        }
    }
}

/// Authenticated but not permitted. Maps to HTTP 403.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct AccessDenied(pub String);

pub const STAFF: &[Role] = &[Role::Admin, Role::Doctor];
pub const ADMIN_ONLY: &[Role] = &[Role::Admin];
pub const PATIENT_ONLY: &[Role] = &[Role::Patient];

#[cfg(test)]
pub(crate) fn caller(role: Role, email: &str) -> Caller {
    Caller {
        user_id: Uuid::new_v4(),
        email: email.to_string(),
        name: "Test".into(),
        role,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staff_covers_admin_and_doctor() {
        assert!(caller(Role::Admin, "a@x.io").is_staff());
        assert!(caller(Role::Doctor, "d@x.io").is_staff());
        assert!(!caller(Role::Patient, "p@x.io").is_staff());
    }

    #[test]
    fn require_names_allowed_roles() {
        let patient = caller(Role::Patient, "p@x.io");
        let err = patient.require(STAFF, "update appointments").unwrap_err();
        assert_eq!(err.0, "Only admin/doctor can update appointments");
        assert!(caller(Role::Admin, "a@x.io").require(ADMIN_ONLY, "x").is_ok());
    }
}
