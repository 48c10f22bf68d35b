//! JSON:API envelope and the attribute sets used by this crate.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Links {
    #[serde(rename = "self", default, skip_serializing_if = "Option::is_none")]
    pub self_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paging {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PagingInformation {
    #[serde(default)]
    pub paging: Paging,
}

/// A relationship linkage: only the `{type, id}` reference to a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceData {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
}

impl ResourceData {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource<A> {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    #[serde(default)]
    pub attributes: A,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationships: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<Links>,
}

impl<A> Resource<A> {
    /// Id of a to-one relationship, when the payload includes its linkage.
    pub fn related_id(&self, relationship: &str) -> Option<&str> {
        self.relationships
            .as_ref()?
            .get(relationship)?
            .get("data")?
            .get("id")?
            .as_str()
    }

    /// `links.related` of a relationship.
    pub fn related_link(&self, relationship: &str) -> Option<&str> {
        self.relationships
            .as_ref()?
            .get(relationship)?
            .get("links")?
            .get("related")?
            .as_str()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListResponse<T> {
    pub data: Vec<T>,
    #[serde(default)]
    pub links: Links,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<PagingInformation>,
}

impl<T> ListResponse<T> {
    pub fn total(&self) -> Option<u64> {
        self.meta.as_ref().and_then(|m| m.paging.total)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingleResponse<T> {
    pub data: T,
    #[serde(default)]
    pub links: Links,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub included: Vec<Value>,
}

pub type LinkagesResponse = ListResponse<ResourceData>;

/// Response of a to-one relationship endpoint. `data` is null when the
/// relationship is unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToOneLinkageResponse {
    pub data: Option<ResourceData>,
    #[serde(default)]
    pub links: Links,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppAttributes {
    pub name: Option<String>,
    pub bundle_id: Option<String>,
    pub sku: Option<String>,
    pub primary_locale: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildAttributes {
    pub version: Option<String>,
    pub uploaded_date: Option<String>,
    pub expiration_date: Option<String>,
    pub expired: Option<bool>,
    pub min_os_version: Option<String>,
    pub processing_state: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CiProductAttributes {
    pub name: Option<String>,
    pub created_date: Option<String>,
    pub product_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CiWorkflowAttributes {
    pub name: Option<String>,
    pub description: Option<String>,
    pub is_enabled: Option<bool>,
    pub is_locked_for_editing: Option<bool>,
    pub last_modified_date: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScmRepositoryAttributes {
    pub owner_name: Option<String>,
    pub repository_name: Option<String>,
    pub http_clone_url: Option<String>,
    pub ssh_clone_url: Option<String>,
    pub last_accessed_date: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScmGitReferenceAttributes {
    pub name: Option<String>,
    pub canonical_name: Option<String>,
    pub is_deleted: Option<bool>,
    pub kind: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionProgress {
    Pending,
    Running,
    Complete,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompletionStatus {
    Succeeded,
    Failed,
    Errored,
    Canceled,
    Skipped,
    #[serde(other)]
    Unknown,
}

impl ExecutionProgress {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionProgress::Pending => "PENDING",
            ExecutionProgress::Running => "RUNNING",
            ExecutionProgress::Complete => "COMPLETE",
            ExecutionProgress::Unknown => "UNKNOWN",
        }
    }
}

impl CompletionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompletionStatus::Succeeded => "SUCCEEDED",
            CompletionStatus::Failed => "FAILED",
            CompletionStatus::Errored => "ERRORED",
            CompletionStatus::Canceled => "CANCELED",
            CompletionStatus::Skipped => "SKIPPED",
            CompletionStatus::Unknown => "UNKNOWN",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CiBuildRunAttributes {
    pub number: Option<u64>,
    pub created_date: Option<String>,
    pub started_date: Option<String>,
    pub finished_date: Option<String>,
    pub execution_progress: Option<ExecutionProgress>,
    pub completion_status: Option<CompletionStatus>,
    pub start_reason: Option<String>,
    pub cancel_reason: Option<String>,
    pub source_commit: Option<Value>,
    pub issue_counts: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CiBuildActionAttributes {
    pub name: Option<String>,
    pub action_type: Option<String>,
    pub started_date: Option<String>,
    pub finished_date: Option<String>,
    pub execution_progress: Option<ExecutionProgress>,
    pub completion_status: Option<CompletionStatus>,
    pub is_required_to_pass: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CiArtifactAttributes {
    pub file_type: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<u64>,
    pub download_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CiTestResultAttributes {
    pub class_name: Option<String>,
    pub name: Option<String>,
    pub status: Option<String>,
    pub message: Option<String>,
}

pub type App = Resource<AppAttributes>;
pub type Build = Resource<BuildAttributes>;
pub type CiProduct = Resource<CiProductAttributes>;
pub type CiWorkflow = Resource<CiWorkflowAttributes>;
pub type ScmRepository = Resource<ScmRepositoryAttributes>;
pub type ScmGitReference = Resource<ScmGitReferenceAttributes>;
pub type CiBuildRun = Resource<CiBuildRunAttributes>;
pub type CiBuildAction = Resource<CiBuildActionAttributes>;
pub type CiArtifact = Resource<CiArtifactAttributes>;
pub type CiTestResult = Resource<CiTestResultAttributes>;

pub fn is_build_run_complete(progress: Option<&ExecutionProgress>) -> bool {
    matches!(progress, Some(ExecutionProgress::Complete))
}

pub fn is_build_run_successful(status: Option<&CompletionStatus>) -> bool {
    matches!(status, Some(CompletionStatus::Succeeded))
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiErrorResponse {
    #[serde(default)]
    pub errors: Vec<ApiErrorItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiErrorItem {
    pub status: Option<String>,
    pub code: Option<String>,
    pub title: Option<String>,
    pub detail: Option<String>,
}

const MAX_RAW_ERROR_LEN: usize = 512;

/// Renders an error body as one `title: detail` line per error.
/// Bodies that are not a JSON:API error document fall back to their text.
pub fn describe_error_body(body: &[u8]) -> String {
    if let Ok(parsed) = serde_json::from_slice::<ApiErrorResponse>(body)
        && !parsed.errors.is_empty()
    {
        return parsed
            .errors
            .iter()
            .map(|e| {
                let title = e.title.as_deref().or(e.code.as_deref()).unwrap_or("error");
                match e.detail.as_deref() {
                    Some(detail) if !detail.is_empty() => format!("{}: {}", title, detail),
                    _ => title.to_string(),
                }
            })
            .collect::<Vec<_>>()
            .join("; ");
    }
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        return "empty response body".to_string();
    }
    if text.len() > MAX_RAW_ERROR_LEN {
        let mut end = MAX_RAW_ERROR_LEN;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        return format!("{}...", &text[..end]);
    }
    text.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn build_run_tolerates_unknown_enum_values() {
        let run: CiBuildRun = serde_json::from_value(json!({
            "type": "ciBuildRuns",
            "id": "run-1",
            "attributes": {
                "number": 42,
                "executionProgress": "SOMETHING_NEW",
                "completionStatus": "SUCCEEDED"
            }
        }))
        .unwrap();
        assert_eq!(run.attributes.number, Some(42));
        assert_eq!(
            run.attributes.execution_progress,
            Some(ExecutionProgress::Unknown)
        );
        assert!(is_build_run_successful(
            run.attributes.completion_status.as_ref()
        ));
        assert!(!is_build_run_complete(
            run.attributes.execution_progress.as_ref()
        ));
    }

    #[test]
    fn resource_without_attributes_uses_defaults() {
        let product: CiProduct =
            serde_json::from_value(json!({"type": "ciProducts", "id": "p1"})).unwrap();
        assert_eq!(product.attributes, CiProductAttributes::default());
        assert!(product.related_id("app").is_none());
    }

    #[test]
    fn related_id_reads_relationship_linkage() {
        let workflow: CiWorkflow = serde_json::from_value(json!({
            "type": "ciWorkflows",
            "id": "wf-1",
            "relationships": {
                "repository": {
                    "data": {"type": "scmRepositories", "id": "repo-9"},
                    "links": {"related": "https://api.appstoreconnect.apple.com/v1/ciWorkflows/wf-1/repository"}
                }
            }
        }))
        .unwrap();
        assert_eq!(workflow.related_id("repository"), Some("repo-9"));
        assert!(workflow.related_link("repository").unwrap().ends_with("/repository"));
    }

    #[test]
    fn list_response_reads_paging_meta() {
        let page: LinkagesResponse = serde_json::from_value(json!({
            "data": [{"type": "builds", "id": "b1"}],
            "links": {"self": "https://x/v1/a", "next": "https://x/v1/a?cursor=2"},
            "meta": {"paging": {"total": 7, "limit": 1}}
        }))
        .unwrap();
        assert_eq!(page.total(), Some(7));
        assert_eq!(page.links.next.as_deref(), Some("https://x/v1/a?cursor=2"));
        assert_eq!(page.data[0], ResourceData::new("builds", "b1"));
    }

    #[test]
    fn describes_json_api_errors() {
        let body = br#"{"errors":[{"code":"FORBIDDEN","title":"Forbidden","detail":"not allowed"}]}"#;
        assert_eq!(describe_error_body(body), "Forbidden: not allowed");
    }

    #[test]
    fn describes_plain_text_errors() {
        assert_eq!(describe_error_body(b"  bad gateway \n"), "bad gateway");
        assert_eq!(describe_error_body(b""), "empty response body");
        let long = "x".repeat(MAX_RAW_ERROR_LEN + 10);
        assert!(describe_error_body(long.as_bytes()).ends_with("..."));
    }
}
