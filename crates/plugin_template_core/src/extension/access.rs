//! Role requirements for extension routes.
//!
//! # Responsibility
//! - Declare the roles a route may require.
//! - Define the host-side access-control seam evaluated before handlers run.
//!
//! # Invariants
//! - Evaluation happens in the host collaborator, never inside a handler.
//! - `admin` satisfies every requirement; `user` satisfies only `user`.

use crate::routes::ExtensionRequest;
use serde::Serialize;
use std::collections::BTreeSet;

/// Host role a caller can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    /// Returns whether holding `self` fulfils a requirement for `required`.
    pub fn satisfies(self, required: Role) -> bool {
        match self {
            Self::Admin => true,
            Self::User => required == Self::User,
        }
    }
}

/// Role a caller must hold before a route handler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct RoleRequirement {
    pub role: Role,
}

impl RoleRequirement {
    pub fn user() -> Self {
        Self { role: Role::User }
    }

    pub fn admin() -> Self {
        Self { role: Role::Admin }
    }
}

/// Authenticated caller identity attached to a request by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub name: String,
    pub roles: BTreeSet<Role>,
}

impl Principal {
    pub fn new(name: impl Into<String>, roles: impl IntoIterator<Item = Role>) -> Self {
        Self {
            name: name.into(),
            roles: roles.into_iter().collect(),
        }
    }

    pub fn has_role(&self, required: Role) -> bool {
        self.roles.iter().any(|role| role.satisfies(required))
    }
}

/// Outcome of one access-control evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Granted,
    Unauthenticated,
    Forbidden,
}

/// Host access-control collaborator.
pub trait AccessControl: Send + Sync {
    fn evaluate(&self, request: &ExtensionRequest, requirement: RoleRequirement) -> AccessDecision;
}

/// Evaluates requirements against the principal the host attached to a request.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrincipalRoleAccess;

impl AccessControl for PrincipalRoleAccess {
    fn evaluate(&self, request: &ExtensionRequest, requirement: RoleRequirement) -> AccessDecision {
        match request.principal.as_ref() {
            None => AccessDecision::Unauthenticated,
            Some(principal) if principal.has_role(requirement.role) => AccessDecision::Granted,
            Some(_) => AccessDecision::Forbidden,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        AccessControl, AccessDecision, Principal, PrincipalRoleAccess, Role, RoleRequirement,
    };
    use crate::routes::{ExtensionRequest, HttpMethod};

    #[test]
    fn admin_satisfies_user_but_not_the_reverse() {
        assert!(Role::Admin.satisfies(Role::User));
        assert!(Role::Admin.satisfies(Role::Admin));
        assert!(Role::User.satisfies(Role::User));
        assert!(!Role::User.satisfies(Role::Admin));
    }

    #[test]
    fn principal_access_distinguishes_missing_and_insufficient_roles() {
        let access = PrincipalRoleAccess;
        let anonymous = ExtensionRequest::new(HttpMethod::Get, "/config");
        assert_eq!(
            access.evaluate(&anonymous, RoleRequirement::admin()),
            AccessDecision::Unauthenticated
        );

        let user = anonymous
            .clone()
            .with_principal(Principal::new("alice", [Role::User]));
        assert_eq!(
            access.evaluate(&user, RoleRequirement::admin()),
            AccessDecision::Forbidden
        );
        assert_eq!(
            access.evaluate(&user, RoleRequirement::user()),
            AccessDecision::Granted
        );

        let admin = anonymous.with_principal(Principal::new("root", [Role::Admin]));
        assert_eq!(
            access.evaluate(&admin, RoleRequirement::admin()),
            AccessDecision::Granted
        );
    }
}
