use std::cmp::Ordering;

use crate::asc::types::{
    AppAttributes, BuildAttributes, CiArtifactAttributes, CiBuildActionAttributes,
    CiBuildRun, CiBuildRunAttributes, CiProductAttributes, CiTestResultAttributes,
    CiWorkflowAttributes, Resource, ScmGitReference, ScmGitReferenceAttributes,
    ScmRepositoryAttributes,
};

/// Attribute sets that carry a human readable label.
pub trait Named {
    fn display_name(&self) -> Option<String>;
}

impl Named for AppAttributes {
    fn display_name(&self) -> Option<String> {
        self.name.clone().or_else(|| self.bundle_id.clone())
    }
}

impl Named for BuildAttributes {
    fn display_name(&self) -> Option<String> {
        self.version.clone()
    }
}

impl Named for CiProductAttributes {
    fn display_name(&self) -> Option<String> {
        self.name.clone()
    }
}

impl Named for CiWorkflowAttributes {
    fn display_name(&self) -> Option<String> {
        self.name.clone()
    }
}

impl Named for ScmRepositoryAttributes {
    fn display_name(&self) -> Option<String> {
        match (&self.owner_name, &self.repository_name) {
            (Some(owner), Some(repo)) => Some(format!("{}/{}", owner, repo)),
            (None, Some(repo)) => Some(repo.clone()),
            _ => self.http_clone_url.clone(),
        }
    }
}

impl Named for ScmGitReferenceAttributes {
    fn display_name(&self) -> Option<String> {
        self.name.clone().or_else(|| self.canonical_name.clone())
    }
}

impl Named for CiBuildRunAttributes {
    fn display_name(&self) -> Option<String> {
        self.number.map(|n| format!("#{}", n))
    }
}

impl Named for CiBuildActionAttributes {
    fn display_name(&self) -> Option<String> {
        self.name.clone().or_else(|| self.action_type.clone())
    }
}

impl Named for CiArtifactAttributes {
    fn display_name(&self) -> Option<String> {
        self.file_name.clone().or_else(|| self.file_type.clone())
    }
}

impl Named for CiTestResultAttributes {
    fn display_name(&self) -> Option<String> {
        match (&self.class_name, &self.name) {
            (Some(class), Some(name)) => Some(format!("{}.{}", class, name)),
            (None, Some(name)) => Some(name.clone()),
            _ => None,
        }
    }
}

pub fn resource_name<A: Named>(resource: &Resource<A>) -> String {
    resource
        .attributes
        .display_name()
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| {
            if resource.id.is_empty() {
                "<unknown>".to_string()
            } else {
                resource.id.clone()
            }
        })
}

pub fn resource_id<A>(resource: &Resource<A>) -> &str {
    &resource.id
}

/// Completion status once finished, otherwise the execution progress.
pub fn pretty_run_status(run: &CiBuildRun) -> String {
    let attributes = &run.attributes;
    attributes
        .completion_status
        .as_ref()
        .map(|s| s.as_str())
        .or_else(|| attributes.execution_progress.as_ref().map(|p| p.as_str()))
        .unwrap_or("UNKNOWN")
        .to_string()
}

/// Newest first: by creation date, then run number, then id.
pub fn compare_runs_desc(a: &CiBuildRun, b: &CiBuildRun) -> Ordering {
    let created_a = a.attributes.created_date.as_deref();
    let created_b = b.attributes.created_date.as_deref();
    match (created_a, created_b) {
        (Some(a), Some(b)) if a != b => b.cmp(a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        _ => b
            .attributes
            .number
            .cmp(&a.attributes.number)
            .then_with(|| b.id.cmp(&a.id)),
    }
}

pub fn is_branch_git_ref(reference: &ScmGitReference) -> bool {
    if let Some(kind) = reference.attributes.kind.as_deref() {
        return kind.eq_ignore_ascii_case("BRANCH");
    }
    reference
        .attributes
        .canonical_name
        .as_deref()
        .map(|s| s.starts_with("refs/heads/") || s.starts_with("heads/") || s.contains("/heads/"))
        .unwrap_or(false)
}
