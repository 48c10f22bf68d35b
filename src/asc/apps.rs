use super::error::AscError;
use super::types::{App, Build, SingleResponse};
use super::{AppStoreConnectClient, require_id};

impl AppStoreConnectClient {
    pub async fn list_apps(&self, bundle_id: Option<&str>) -> Result<Vec<App>, AscError> {
        let mut query = vec![("limit", "200")];
        if let Some(bundle_id) = bundle_id.map(str::trim).filter(|b| !b.is_empty()) {
            query.push(("filter[bundleId]", bundle_id));
        }
        let url = self.api_url("v1/apps", &query)?;
        self.list_all_typed(url.as_str()).await
    }

    pub async fn get_app(&self, app_id: &str) -> Result<App, AscError> {
        let app_id = require_id(app_id, "appID")?;
        let resp: SingleResponse<App> = self.get_json(&format!("v1/apps/{}", app_id)).await?;
        Ok(resp.data)
    }

    /// Newest uploads first.
    pub async fn list_builds_for_app(
        &self,
        app_id: &str,
        limit: Option<u32>,
    ) -> Result<Vec<Build>, AscError> {
        let app_id = require_id(app_id, "appID")?;
        let page_size = limit.unwrap_or(200).clamp(1, 200).to_string();
        let url = self.api_url(
            "v1/builds",
            &[
                ("filter[app]", app_id),
                ("sort", "-uploadedDate"),
                ("limit", page_size.as_str()),
            ],
        )?;
        match limit {
            // First page only: `limit` caps the result.
            Some(_) => Ok(self.list_page::<Build>(url.as_str()).await?.data),
            None => self.list_all_typed(url.as_str()).await,
        }
    }

    pub async fn get_build(&self, build_id: &str) -> Result<Build, AscError> {
        let build_id = require_id(build_id, "buildID")?;
        let resp: SingleResponse<Build> = self.get_json(&format!("v1/builds/{}", build_id)).await?;
        Ok(resp.data)
    }
}
