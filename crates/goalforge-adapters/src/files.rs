//! Project file storage collaborator.

use crate::http::{ApiClient, ApiResponse};
use anyhow::Result;
use async_trait::async_trait;
use goalforge_core::edits::normalize_repo_path;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOperation {
    Read,
    Create,
    Update,
    Delete,
}

impl FileOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            FileOperation::Read => "read",
            FileOperation::Create => "create",
            FileOperation::Update => "update",
            FileOperation::Delete => "delete",
        }
    }
}

impl fmt::Display for FileOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file operation the storage service rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("File {operation} failed for {path} (status {status}): {detail}")]
pub struct FileOpError {
    pub path: String,
    pub status: u16,
    pub operation: FileOperation,
    pub detail: String,
}

impl FileOpError {
    fn from_response(path: &str, operation: FileOperation, response: &ApiResponse) -> Self {
        let body = response.json_or_null();
        let detail = ["error", "message"]
            .iter()
            .find_map(|key| body.get(*key).and_then(Value::as_str))
            .map(str::to_string)
            .unwrap_or_else(|| response.body.trim().chars().take(200).collect());
        Self {
            path: path.to_string(),
            status: response.status.as_u16(),
            operation,
            detail,
        }
    }
}

/// Result of a `PUT` to an existing path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated,
    /// 404: the file has to be created instead.
    Missing,
}

/// Result of a create request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// 409: the file already exists and has to be updated instead.
    AlreadyExists,
}

/// Flattened project file tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileListing {
    pub files: Vec<String>,
    pub dirs: Vec<String>,
}

#[async_trait]
pub trait FileStore: Send + Sync {
    /// Current content, or `None` when the file does not exist.
    async fn read_file(&self, project_id: &str, path: &str) -> Result<Option<String>>;

    async fn update_file(&self, project_id: &str, path: &str, content: &str)
        -> Result<UpdateOutcome>;

    async fn create_file(&self, project_id: &str, path: &str, content: &str)
        -> Result<CreateOutcome>;

    async fn delete_path(&self, project_id: &str, path: &str, recursive: bool) -> Result<()>;

    async fn list_project_files(&self, project_id: &str) -> Result<FileListing>;
}

// ═══════════════════════════════════════════════════════════════════════════
//  HTTP IMPLEMENTATION
// ═══════════════════════════════════════════════════════════════════════════

/// File store backed by the `/files` and `/files-ops` endpoints.
///
/// The project id travels as a `projectId` query parameter on per-file routes.
#[derive(Debug, Clone)]
pub struct HttpFileStore {
    api: ApiClient,
}

#[derive(Debug, Deserialize)]
struct FileContent {
    #[serde(default)]
    content: Option<String>,
}

impl HttpFileStore {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    fn file_url(&self, project_id: &str, path: &str) -> Result<url::Url> {
        let mut url = self.api.path_endpoint(&["files"], path)?;
        url.query_pairs_mut().append_pair("projectId", project_id);
        Ok(url)
    }
}

#[async_trait]
impl FileStore for HttpFileStore {
    async fn read_file(&self, project_id: &str, path: &str) -> Result<Option<String>> {
        let response = self.api.get(self.file_url(project_id, path)?).await?;
        if response.status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.is_success() {
            return Err(FileOpError::from_response(path, FileOperation::Read, &response).into());
        }
        let body: FileContent = response.json()?;
        Ok(Some(body.content.unwrap_or_default()))
    }

    async fn update_file(
        &self,
        project_id: &str,
        path: &str,
        content: &str,
    ) -> Result<UpdateOutcome> {
        let response = self
            .api
            .put(self.file_url(project_id, path)?, &json!({ "content": content }))
            .await?;
        if response.status == StatusCode::NOT_FOUND {
            return Ok(UpdateOutcome::Missing);
        }
        if !response.is_success() {
            return Err(FileOpError::from_response(path, FileOperation::Update, &response).into());
        }
        Ok(UpdateOutcome::Updated)
    }

    async fn create_file(
        &self,
        project_id: &str,
        path: &str,
        content: &str,
    ) -> Result<CreateOutcome> {
        let url = self.api.endpoint(["files-ops", "create-file"])?;
        let body = json!({ "projectId": project_id, "filePath": path, "content": content });
        let response = self.api.post(url, &body).await?;
        if response.status == StatusCode::CONFLICT {
            return Ok(CreateOutcome::AlreadyExists);
        }
        if !response.is_success() {
            return Err(FileOpError::from_response(path, FileOperation::Create, &response).into());
        }
        Ok(CreateOutcome::Created)
    }

    async fn delete_path(&self, project_id: &str, path: &str, recursive: bool) -> Result<()> {
        let url = self.api.endpoint(["files-ops", "delete"])?;
        let body = json!({
            "projectId": project_id,
            "targetPath": path,
            "recursive": recursive,
            "confirm": true,
        });
        let response = self.api.post(url, &body).await?;
        if !response.is_success() {
            return Err(FileOpError::from_response(path, FileOperation::Delete, &response).into());
        }
        Ok(())
    }

    async fn list_project_files(&self, project_id: &str) -> Result<FileListing> {
        let url = self.api.endpoint(["projects", project_id, "files"])?;
        let response = self.api.get(url).await?;
        if !response.is_success() {
            return Err(response.error_for("Listing project files"));
        }
        Ok(flatten_file_tree(&response.json::<Value>()?))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  TREE FLATTENING
// ═══════════════════════════════════════════════════════════════════════════

/// Flatten file-tree nodes into file and directory paths.
///
/// Accepts a bare node array or an object wrapping it under `files`, `tree` or `children`.
/// Nodes carry either a full `path` or a `name` relative to their parent.
pub fn flatten_file_tree(value: &Value) -> FileListing {
    let mut listing = FileListing::default();
    let roots = match value {
        Value::Array(nodes) => nodes.as_slice(),
        Value::Object(obj) => ["files", "tree", "children", "nodes"]
            .iter()
            .find_map(|key| obj.get(*key).and_then(Value::as_array))
            .map(Vec::as_slice)
            .unwrap_or_default(),
        _ => &[],
    };
    for node in roots {
        flatten_node(node, "", &mut listing);
    }
    listing.files.sort();
    listing.files.dedup();
    listing.dirs.sort();
    listing.dirs.dedup();
    listing
}

fn flatten_node(node: &Value, parent: &str, listing: &mut FileListing) {
    let node_path = match node {
        Value::String(path) => {
            let path = normalize_repo_path(path);
            if !path.is_empty() {
                listing.files.push(path);
            }
            return;
        }
        Value::Object(obj) => {
            let explicit = obj.get("path").and_then(Value::as_str);
            let name = obj.get("name").and_then(Value::as_str);
            match (explicit, name) {
                (Some(path), _) => normalize_repo_path(path),
                (None, Some(name)) if parent.is_empty() => normalize_repo_path(name),
                (None, Some(name)) => normalize_repo_path(&format!("{}/{}", parent, name)),
                (None, None) => return,
            }
        }
        _ => return,
    };
    if node_path.is_empty() {
        return;
    }

    let kind = node
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_ascii_lowercase();
    let children = node.get("children").and_then(Value::as_array);
    let is_dir = matches!(kind.as_str(), "directory" | "dir" | "folder" | "tree")
        || (kind.is_empty() && children.is_some());

    if is_dir {
        for child in children.into_iter().flatten() {
            flatten_node(child, &node_path, listing);
        }
        listing.dirs.push(node_path);
    } else {
        listing.files.push(node_path);
    }
}
