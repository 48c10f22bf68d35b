use super::error::AscError;
use super::paginate::paginate_all;
use super::types::{LinkagesResponse, ToOneLinkageResponse};
use super::{AppStoreConnectClient, require_id, with_limit};

#[derive(Debug, Clone, Default)]
pub struct LinkagesQuery {
    pub limit: Option<u32>,
    /// Continue from a previous page instead of building the path.
    pub next_url: Option<String>,
}

impl LinkagesQuery {
    pub fn limit(limit: u32) -> Self {
        Self {
            limit: Some(limit),
            next_url: None,
        }
    }

    pub fn next(url: impl Into<String>) -> Self {
        Self {
            limit: None,
            next_url: Some(url.into()),
        }
    }
}

impl AppStoreConnectClient {
    /// `GET /v1/{resource}/{id}/relationships/{relationship}`: the `{type, id}`
    /// references of a to-many relationship.
    pub async fn get_linkages(
        &self,
        resource: &str,
        id: &str,
        relationship: &str,
        query: &LinkagesQuery,
    ) -> Result<LinkagesResponse, AscError> {
        if let Some(next) = query.next_url.as_deref().filter(|n| !n.trim().is_empty()) {
            self.validate_next_url(next)?;
            return self.get_json(next).await;
        }
        let id = require_id(id, "resource ID")?;
        let relationship = require_id(relationship, "relationship")?;
        let path = format!("v1/{}/{}/relationships/{}", resource, id, relationship);
        self.get_json(&with_limit(&path, query.limit)).await
    }

    pub async fn get_all_linkages(
        &self,
        resource: &str,
        id: &str,
        relationship: &str,
    ) -> Result<LinkagesResponse, AscError> {
        let first = self
            .get_linkages(resource, id, relationship, &LinkagesQuery::limit(200))
            .await?;
        paginate_all(first, move |next| async move {
            self.get_linkages(resource, id, relationship, &LinkagesQuery::next(next))
                .await
        })
        .await
    }

    pub async fn get_to_one_linkage(
        &self,
        resource: &str,
        id: &str,
        relationship: &str,
    ) -> Result<ToOneLinkageResponse, AscError> {
        let id = require_id(id, "resource ID")?;
        let relationship = require_id(relationship, "relationship")?;
        self.get_json(&format!(
            "v1/{}/{}/relationships/{}",
            resource, id, relationship
        ))
        .await
    }

    pub async fn ci_build_run_action_linkages(
        &self,
        build_run_id: &str,
        query: &LinkagesQuery,
    ) -> Result<LinkagesResponse, AscError> {
        let build_run_id = require_id(build_run_id, "buildRunID")?;
        self.get_linkages("ciBuildRuns", build_run_id, "actions", query)
            .await
    }

    pub async fn ci_product_app_linkage(
        &self,
        product_id: &str,
    ) -> Result<ToOneLinkageResponse, AscError> {
        let product_id = require_id(product_id, "productID")?;
        self.get_to_one_linkage("ciProducts", product_id, "app").await
    }

    pub async fn ci_workflow_repository_linkage(
        &self,
        workflow_id: &str,
    ) -> Result<ToOneLinkageResponse, AscError> {
        let workflow_id = require_id(workflow_id, "workflowID")?;
        self.get_to_one_linkage("ciWorkflows", workflow_id, "repository")
            .await
    }
}
