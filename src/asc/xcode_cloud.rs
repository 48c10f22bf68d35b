//! Xcode Cloud (CI) resources: products, workflows, repositories, build runs
//! and what they produce.

use std::path::Path;
use std::time::Duration;

use reqwest::Url;
use serde_json::json;
use tokio::io::AsyncWriteExt;

use crate::util::is_branch_git_ref;

use super::error::{AscError, TransportError};
use super::poll::poll_until;
use super::retry::with_retry;
use super::types::{
    CiArtifact, CiBuildAction, CiBuildRun, CiProduct, CiTestResult, CiWorkflow, ScmGitReference,
    ScmRepository, SingleResponse, is_build_run_complete,
};
use super::{AppStoreConnectClient, require_id, same_origin};

impl AppStoreConnectClient {
    pub async fn list_ci_products(&self) -> Result<Vec<CiProduct>, AscError> {
        self.list_all_typed("v1/ciProducts?limit=200").await
    }

    pub async fn get_ci_product(&self, product_id: &str) -> Result<CiProduct, AscError> {
        let product_id = require_id(product_id, "productID")?;
        let resp: SingleResponse<CiProduct> =
            self.get_json(&format!("v1/ciProducts/{}", product_id)).await?;
        Ok(resp.data)
    }

    pub async fn list_workflows_for_product(&self, product_id: &str) -> Result<Vec<CiWorkflow>, AscError> {
        let product_id = require_id(product_id, "productID")?;
        let path = format!("v1/ciProducts/{}/workflows?limit=200", product_id);
        self.list_all_typed(&path).await
    }

    pub async fn get_workflow(&self, workflow_id: &str) -> Result<CiWorkflow, AscError> {
        let workflow_id = require_id(workflow_id, "workflowID")?;
        let resp: SingleResponse<CiWorkflow> =
            self.get_json(&format!("v1/ciWorkflows/{}", workflow_id)).await?;
        Ok(resp.data)
    }

    pub async fn list_repositories_for_product(&self, product_id: &str) -> Result<Vec<ScmRepository>, AscError> {
        let product_id = require_id(product_id, "productID")?;
        let path = format!("v1/ciProducts/{}/primaryRepositories?limit=200", product_id);
        self.list_all_typed(&path).await
    }

    /// The first primary repository of a product, or None if the product has
    /// none or the lookup fails.
    pub async fn get_primary_repository_for_product(
        &self,
        product_id: &str,
    ) -> Result<Option<ScmRepository>, AscError> {
        match self.list_repositories_for_product(product_id).await {
            Ok(repos) => Ok(repos.into_iter().next()),
            Err(AscError::MissingArgument(name)) => Err(AscError::MissingArgument(name)),
            Err(AscError::Cancelled) => Err(AscError::Cancelled),
            Err(e) => {
                tracing::debug!(product_id, error = %e, "primaryRepositories lookup failed");
                Ok(None)
            }
        }
    }

    pub async fn resolve_repository_id_for_product(&self, product_id: &str) -> Result<Option<String>, AscError> {
        if let Some(primary) = self.get_primary_repository_for_product(product_id).await? {
            return Ok(Some(primary.id));
        }
        // Fall back to the workflows: a repository may only be attached there.
        let workflows = self.list_workflows_for_product(product_id).await?;
        for workflow in workflows {
            if let Some(repo_id) = self.resolve_repository_id_for_workflow(&workflow.id).await? {
                return Ok(Some(repo_id));
            }
        }
        Ok(None)
    }

    pub async fn resolve_repository_id_for_workflow(&self, workflow_id: &str) -> Result<Option<String>, AscError> {
        let workflow_id = require_id(workflow_id, "workflowID")?;
        match self.ci_workflow_repository_linkage(workflow_id).await {
            Ok(linkage) => {
                if let Some(data) = linkage.data {
                    return Ok(Some(data.id));
                }
            }
            Err(AscError::Cancelled) => return Err(AscError::Cancelled),
            Err(e) => tracing::debug!(workflow_id, error = %e, "repository linkage lookup failed"),
        }

        let workflow = match self
            .get_json::<SingleResponse<CiWorkflow>>(&format!(
                "v1/ciWorkflows/{}?include=repository",
                workflow_id
            ))
            .await
        {
            Ok(resp) => resp.data,
            Err(AscError::Cancelled) => return Err(AscError::Cancelled),
            Err(e) => {
                tracing::debug!(workflow_id, error = %e, "workflow lookup failed");
                return Ok(None);
            }
        };
        if let Some(id) = workflow.related_id("repository") {
            return Ok(Some(id.to_string()));
        }
        if let Some(related) = workflow.related_link("repository")
            && self.validate_next_url(related).is_ok()
            && let Ok(resp) = self.get_json::<SingleResponse<ScmRepository>>(related).await
        {
            return Ok(Some(resp.data.id));
        }
        Ok(None)
    }

    pub async fn list_git_references(&self, repo_id: &str) -> Result<Vec<ScmGitReference>, AscError> {
        let repo_id = require_id(repo_id, "repositoryID")?;
        self.list_all_typed(&format!("v1/scmRepositories/{}/gitReferences?limit=200", repo_id))
            .await
    }

    /// Git references of a repository that are branches, skipping deleted ones.
    pub async fn list_branches_for_repository(&self, repo_id: &str) -> Result<Vec<ScmGitReference>, AscError> {
        let refs = self.list_git_references(repo_id).await?;
        Ok(refs
            .into_iter()
            .filter(|r| is_branch_git_ref(r) && r.attributes.is_deleted != Some(true))
            .collect())
    }

    pub async fn list_build_runs_for_workflow(&self, workflow_id: &str) -> Result<Vec<CiBuildRun>, AscError> {
        let workflow_id = require_id(workflow_id, "workflowID")?;
        let path = format!("v1/ciWorkflows/{}/buildRuns?limit=50", workflow_id);
        self.list_all_typed(&path).await
    }

    pub async fn start_build_run(&self, workflow_id: &str, scm_git_ref_id: &str) -> Result<CiBuildRun, AscError> {
        let workflow_id = require_id(workflow_id, "workflowID")?;
        let scm_git_ref_id = require_id(scm_git_ref_id, "gitReferenceID")?;
        let body = json!({
            "data": {
                "type": "ciBuildRuns",
                "relationships": {
                    "workflow": {"data": {"type": "ciWorkflows", "id": workflow_id}},
                    "sourceBranchOrTag": {"data": {"type": "scmGitReferences", "id": scm_git_ref_id}}
                }
            }
        });
        let resp: SingleResponse<CiBuildRun> = self.post_json("v1/ciBuildRuns", &body).await?;
        tracing::info!(run_id = %resp.data.id, workflow_id, "build run started");
        Ok(resp.data)
    }

    pub async fn get_build_run(&self, run_id: &str) -> Result<CiBuildRun, AscError> {
        let run_id = require_id(run_id, "buildRunID")?;
        let resp: SingleResponse<CiBuildRun> = self.get_json(&format!("v1/ciBuildRuns/{}", run_id)).await?;
        Ok(resp.data)
    }

    pub async fn list_actions_for_run(&self, run_id: &str) -> Result<Vec<CiBuildAction>, AscError> {
        let run_id = require_id(run_id, "buildRunID")?;
        self.list_all_typed(&format!("v1/ciBuildRuns/{}/actions?limit=200", run_id))
            .await
    }

    pub async fn list_artifacts_for_action(&self, action_id: &str) -> Result<Vec<CiArtifact>, AscError> {
        let action_id = require_id(action_id, "buildActionID")?;
        self.list_all_typed(&format!("v1/ciBuildActions/{}/artifacts?limit=200", action_id))
            .await
    }

    /// Artifacts of every action of a run.
    pub async fn list_artifacts_for_run(&self, run_id: &str) -> Result<Vec<CiArtifact>, AscError> {
        let mut artifacts = Vec::new();
        for action in self.list_actions_for_run(run_id).await? {
            artifacts.extend(self.list_artifacts_for_action(&action.id).await?);
        }
        Ok(artifacts)
    }

    pub async fn get_artifact(&self, artifact_id: &str) -> Result<CiArtifact, AscError> {
        let artifact_id = require_id(artifact_id, "artifactID")?;
        let resp: SingleResponse<CiArtifact> =
            self.get_json(&format!("v1/ciArtifacts/{}", artifact_id)).await?;
        Ok(resp.data)
    }

    /// Streams an artifact to `dest_path` and returns the number of bytes
    /// written. The client timeout applies to each wait for data, not to the
    /// whole transfer. A partial file is removed on failure.
    pub async fn download_artifact(&self, artifact_id: &str, dest_path: &Path) -> Result<u64, AscError> {
        let artifact = self.get_artifact(artifact_id).await?;
        let Some(raw_url) = artifact.attributes.download_url.as_deref() else {
            return Err(AscError::Config(format!(
                "artifact {} does not expose a download URL",
                artifact.id
            )));
        };
        let url = Url::parse(raw_url).map_err(|e| AscError::Url {
            url: raw_url.to_string(),
            reason: e.to_string(),
        })?;

        let mut req = self.download_http.get(url.clone());
        // Pre-signed URLs elsewhere reject extra credentials.
        if same_origin(&self.base_url, &url) {
            req = req.bearer_auth(self.bearer().await?);
        }
        let idle = self.download_idle;
        let stalled = |_: tokio::time::error::Elapsed| AscError::Transport(TransportError::Timeout);
        let mut resp = tokio::time::timeout(idle, req.send()).await.map_err(stalled)??;
        let status = resp.status();
        if !status.is_success() {
            return Err(AscError::Api {
                status,
                method: "GET".to_string(),
                path: url.path().to_string(),
                message: "artifact download failed".to_string(),
                retry_after: None,
            });
        }

        let mut file = tokio::fs::File::create(dest_path).await?;
        let mut written = 0u64;
        let streamed: Result<(), AscError> = async {
            while let Some(chunk) = tokio::time::timeout(idle, resp.chunk()).await.map_err(stalled)?? {
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            file.flush().await?;
            Ok(())
        }
        .await;
        if let Err(e) = streamed {
            drop(file);
            let _ = tokio::fs::remove_file(dest_path).await;
            return Err(e);
        }
        tracing::debug!(artifact_id, bytes = written, path = %dest_path.display(), "artifact downloaded");
        Ok(written)
    }

    /// Test results across all actions of a run. Actions without results
    /// (or whose lookup fails) are skipped.
    pub async fn list_test_results_for_run(&self, run_id: &str) -> Result<Vec<CiTestResult>, AscError> {
        let actions = self.list_actions_for_run(run_id).await?;
        let mut results = Vec::new();
        for action in actions {
            match self
                .list_all_typed::<CiTestResult>(&format!(
                    "v1/ciBuildActions/{}/testResults?limit=200",
                    action.id
                ))
                .await
            {
                Ok(list) => results.extend(list),
                Err(AscError::Cancelled) => return Err(AscError::Cancelled),
                Err(e) => tracing::debug!(action_id = %action.id, error = %e, "no test results"),
            }
        }
        Ok(results)
    }

    /// Polls a build run until it completes. Each lookup goes through the
    /// transport's retries; [`AppStoreConnectClient::retry_policy`] adds
    /// operation-level retries on top and is off unless set.
    pub async fn wait_for_build_run(
        &self,
        run_id: &str,
        interval: Duration,
        timeout: Duration,
    ) -> Result<CiBuildRun, AscError> {
        let run_id = require_id(run_id, "buildRunID")?;
        let client = self;
        let policy = &self.retry;
        let cancel = &self.cancel;
        let poll = poll_until(interval, cancel, move || async move {
            let run = with_retry(policy, cancel, move || client.get_build_run(run_id)).await?;
            let progress = run.attributes.execution_progress.as_ref();
            tracing::debug!(
                run_id,
                progress = progress.map(|p| p.as_str()).unwrap_or("UNKNOWN"),
                "build run status"
            );
            Ok::<_, AscError>(is_build_run_complete(progress).then_some(run))
        });
        match tokio::time::timeout(timeout, poll).await {
            Ok(result) => result,
            Err(_) => Err(AscError::Timeout(timeout)),
        }
    }
}
