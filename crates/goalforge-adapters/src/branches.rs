//! Branch staging collaborator.

use crate::http::ApiClient;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

#[async_trait]
pub trait BranchStager: Send + Sync {
    /// Stage one path. Returns the refreshed branch overview when the service sends one.
    async fn stage(&self, project_id: &str, path: &str, source: &str) -> Result<Option<Value>>;
}

#[derive(Debug, Clone)]
pub struct HttpBranchStager {
    api: ApiClient,
}

impl HttpBranchStager {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

#[async_trait]
impl BranchStager for HttpBranchStager {
    async fn stage(&self, project_id: &str, path: &str, source: &str) -> Result<Option<Value>> {
        let url = self.api.endpoint(["branches", "stage"])?;
        let body = json!({ "projectId": project_id, "filePath": path, "source": source });
        let response = self.api.post(url, &body).await?;
        if !response.is_success() {
            return Err(response.error_for(&format!("Staging {}", path)));
        }
        Ok(response
            .json_or_null()
            .get("overview")
            .filter(|overview| !overview.is_null())
            .cloned())
    }
}
