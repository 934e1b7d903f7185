//! RBAC gate for repository operations
//!
//! Every operation builds its policy object with [`rbac_object`] and asks an
//! [`Enforcer`] before it touches the store or the network.

use super::Principal;
use crate::error::ServerError;
use crate::glob;
use crate::settings::{PolicyRule, RbacSettings};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Resource kinds known to the policy engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Resource {
    Repositories,
    WriteRepositories,
    Applications,
}

impl Resource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::Repositories => "repositories",
            Resource::WriteRepositories => "write-repositories",
            Resource::Applications => "applications",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Get,
    Create,
    Update,
    Delete,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Get => "get",
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical policy object for a project-scoped resource.
///
/// `"{project}/{name}"` when the project is set, otherwise just `"{name}"`.
pub fn rbac_object(project: &str, name: &str) -> String {
    if project.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", project, name)
    }
}

/// Policy engine call contract
pub trait Enforcer: Send + Sync {
    fn enforce(&self, principal: &Principal, resource: Resource, action: Action, object: &str)
        -> bool;

    /// Error-raising variant of [`Enforcer::enforce`]
    fn enforce_err(
        &self,
        principal: &Principal,
        resource: Resource,
        action: Action,
        object: &str,
    ) -> Result<(), ServerError> {
        if self.enforce(principal, resource, action, object) {
            Ok(())
        } else {
            tracing::debug!(
                subject = %principal.subject,
                %resource,
                %action,
                object,
                "RBAC denied"
            );
            Err(ServerError::forbidden(format!(
                "permission denied: {}, {}, {}",
                resource, action, object
            )))
        }
    }
}

/// Config-backed enforcer
///
/// Admin subjects are allowed everything. Other principals need a policy rule
/// whose subject names them (or `group:<name>` for one of their groups), whose
/// resource and action match (or are `*`), and whose object glob matches.
pub struct PolicyEnforcer {
    admin_subjects: Vec<String>,
    policies: Vec<PolicyRule>,
}

impl PolicyEnforcer {
    pub fn new(settings: &RbacSettings) -> Self {
        Self {
            admin_subjects: settings.admin_subjects.clone(),
            policies: settings.policies.clone(),
        }
    }

    fn subject_matches(rule: &PolicyRule, principal: &Principal) -> bool {
        if rule.subject == "*" || rule.subject == principal.subject {
            return true;
        }
        match rule.subject.strip_prefix("group:") {
            Some(group) => principal.groups.iter().any(|g| g == group),
            None => false,
        }
    }
}

impl Enforcer for PolicyEnforcer {
    fn enforce(
        &self,
        principal: &Principal,
        resource: Resource,
        action: Action,
        object: &str,
    ) -> bool {
        if self.admin_subjects.iter().any(|s| s == &principal.subject) {
            return true;
        }

        self.policies.iter().any(|rule| {
            Self::subject_matches(rule, principal)
                && (rule.resource == "*" || rule.resource == resource.as_str())
                && (rule.action == "*" || rule.action == action.as_str())
                && glob::matches(&rule.object, object)
        })
    }
}
