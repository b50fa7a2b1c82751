//! Tenant scoping context threaded through every core operation (§6).

use std::collections::HashSet;

use crate::errors::CoreError;

/// Resolved from an authenticated caller before any core operation runs
/// (§4.15, §6 "Invocation surface"). A missing `organization_id` anywhere
/// downstream is a programming error, not a recoverable condition.
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub organization_id: String,
    /// `None` means "migration mode: skip project filtering" (§4.8 edge
    /// case). `Some(set)` means "only entities with null project or
    /// project in this set".
    pub accessible_projects: Option<HashSet<String>>,
}

impl TenantContext {
    pub fn new(organization_id: impl Into<String>) -> Result<Self, CoreError> {
        let organization_id = organization_id.into();
        if organization_id.trim().is_empty() {
            return Err(CoreError::TenantMissing);
        }
        Ok(Self {
            organization_id,
            accessible_projects: None,
        })
    }

    pub fn scoped_to_projects(mut self, projects: HashSet<String>) -> Self {
        self.accessible_projects = Some(projects);
        self
    }

    pub fn can_access_project(&self, project_id: Option<&str>) -> bool {
        match &self.accessible_projects {
            None => true,
            Some(allowed) => match project_id {
                None => true,
                Some(pid) => allowed.contains(pid),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_organization_id_is_rejected() {
        assert!(matches!(TenantContext::new(""), Err(CoreError::TenantMissing)));
    }

    #[test]
    fn migration_mode_accepts_any_project() {
        let ctx = TenantContext::new("org_1").unwrap();
        assert!(ctx.can_access_project(Some("proj_9")));
        assert!(ctx.can_access_project(None));
    }

    #[test]
    fn scoped_context_rejects_foreign_projects() {
        let mut allowed = HashSet::new();
        allowed.insert("proj_1".to_string());
        let ctx = TenantContext::new("org_1").unwrap().scoped_to_projects(allowed);
        assert!(ctx.can_access_project(Some("proj_1")));
        assert!(ctx.can_access_project(None));
        assert!(!ctx.can_access_project(Some("proj_9")));
    }
}
