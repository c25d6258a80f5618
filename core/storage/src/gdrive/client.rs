//! Google Drive API client.

use chrono::{DateTime, Utc};
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use studiosync_common::Result;

use crate::http::{bytes_body, check_status, json_body, transport_error};
use crate::oauth::TokenManager;

/// Google Drive API base URL.
pub const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";
/// Google Drive upload API base URL.
pub const DRIVE_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";
/// The app-private root folder alias.
pub const APP_DATA_FOLDER: &str = "appDataFolder";

pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

const FILE_FIELDS: &str = "id,name,mimeType,size,createdTime,modifiedTime,parents,trashed";
const LIST_FIELDS: &str =
    "files(id,name,mimeType,size,createdTime,modifiedTime,parents,trashed),nextPageToken";
const PAGE_SIZE: usize = 1000;

/// Google Drive file metadata from API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    /// File size in bytes, as a decimal string (absent for folders).
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub created_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modified_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub trashed: bool,
}

impl DriveFile {
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME_TYPE
    }

    pub fn size_bytes(&self) -> Option<u64> {
        self.size.as_ref().and_then(|s| s.parse().ok())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileListResponse {
    files: Vec<DriveFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// Response of `about.get`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct About {
    #[serde(default)]
    pub storage_quota: Option<DriveStorageQuota>,
}

/// Quota figures are decimal strings; `limit` is absent for unlimited plans.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveStorageQuota {
    #[serde(default)]
    pub limit: Option<String>,
    #[serde(default)]
    pub usage: Option<String>,
}

/// Query selecting a non-trashed child by name.
pub(crate) fn child_query(name: &str, parent_id: &str) -> String {
    format!(
        "name = '{}' and '{}' in parents and trashed = false",
        escape_query(name),
        parent_id
    )
}

fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Google Drive API client.
pub struct DriveClient {
    http: Client,
    token_manager: Arc<TokenManager>,
    api_base: String,
    upload_base: String,
    /// Restrict queries to this Drive space (set for the app-data folder).
    space: Option<String>,
}

impl DriveClient {
    pub fn new(
        http: Client,
        token_manager: Arc<TokenManager>,
        api_base: impl Into<String>,
        upload_base: impl Into<String>,
        space: Option<String>,
    ) -> Self {
        Self {
            http,
            token_manager,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            upload_base: upload_base.into().trim_end_matches('/').to_string(),
            space,
        }
    }

    async fn token(&self) -> Result<String> {
        self.token_manager.get_access_token().await
    }

    fn spaces(&self) -> Vec<(&str, &str)> {
        self.space
            .as_deref()
            .map(|space| vec![("spaces", space)])
            .unwrap_or_default()
    }

    /// Get file metadata by ID.
    pub async fn get_file(&self, file_id: &str) -> Result<DriveFile> {
        let url = format!("{}/files/{}", self.api_base, file_id);

        let response = self
            .http
            .get(&url)
            .bearer_auth(self.token().await?)
            .query(&[("fields", FILE_FIELDS)])
            .send()
            .await
            .map_err(|e| transport_error("Failed to get file", e))?;

        let response = check_status(response, "Get file").await?;
        json_body(response, "Get file").await
    }

    /// Create a folder.
    pub async fn create_folder(&self, name: &str, parent_id: &str) -> Result<DriveFile> {
        let url = format!("{}/files", self.api_base);
        debug!(name, parent_id, "Creating Drive folder");

        let metadata = serde_json::json!({
            "name": name,
            "mimeType": FOLDER_MIME_TYPE,
            "parents": [parent_id],
        });

        let response = self
            .http
            .post(&url)
            .bearer_auth(self.token().await?)
            .query(&[("fields", FILE_FIELDS)])
            .json(&metadata)
            .send()
            .await
            .map_err(|e| transport_error("Failed to create folder", e))?;

        let response = check_status(response, "Create folder").await?;
        json_body(response, "Create folder").await
    }

    /// List files in a folder, following page tokens until `max_results`
    /// entries are collected or the folder is exhausted.
    pub async fn list_folder(
        &self,
        folder_id: &str,
        max_results: Option<usize>,
    ) -> Result<Vec<DriveFile>> {
        let url = format!("{}/files", self.api_base);
        let query = format!("'{}' in parents and trashed = false", folder_id);
        let page_size = max_results.unwrap_or(PAGE_SIZE).clamp(1, PAGE_SIZE).to_string();

        let mut all_files = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .http
                .get(&url)
                .bearer_auth(self.token().await?)
                .query(&[
                    ("q", query.as_str()),
                    ("fields", LIST_FIELDS),
                    ("pageSize", page_size.as_str()),
                ])
                .query(&self.spaces());

            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let response = request
                .send()
                .await
                .map_err(|e| transport_error("Failed to list folder", e))?;

            let response = check_status(response, "List folder").await?;
            let list_response: FileListResponse = json_body(response, "List folder").await?;
            all_files.extend(list_response.files);

            if max_results.is_some_and(|max| all_files.len() >= max) {
                break;
            }
            match list_response.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        if let Some(max) = max_results {
            all_files.truncate(max);
        }
        Ok(all_files)
    }

    /// Find a child by name in a folder.
    pub async fn find_child(&self, name: &str, parent_id: &str) -> Result<Option<DriveFile>> {
        let url = format!("{}/files", self.api_base);
        let query = child_query(name, parent_id);

        let response = self
            .http
            .get(&url)
            .bearer_auth(self.token().await?)
            .query(&[
                ("q", query.as_str()),
                ("fields", LIST_FIELDS),
                ("pageSize", "1"),
            ])
            .query(&self.spaces())
            .send()
            .await
            .map_err(|e| transport_error("Failed to find file", e))?;

        let response = check_status(response, "Find file").await?;
        let list_response: FileListResponse = json_body(response, "Find file").await?;
        Ok(list_response.files.into_iter().next())
    }

    /// Create a file with a multipart (metadata + content) upload.
    pub async fn create_file(
        &self,
        name: &str,
        parent_id: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<DriveFile> {
        let url = format!("{}/files", self.upload_base);

        let metadata = serde_json::json!({
            "name": name,
            "parents": [parent_id],
        });
        let metadata_json = serde_json::to_string(&metadata)?;

        let boundary = format!("studiosync-{}", Uuid::new_v4().simple());
        let mut body = Vec::with_capacity(data.len() + 512);

        body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
        body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
        body.extend_from_slice(metadata_json.as_bytes());
        body.extend_from_slice(b"\r\n");

        body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
        body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
        body.extend_from_slice(&data);
        body.extend_from_slice(b"\r\n");

        body.extend_from_slice(format!("--{}--", boundary).as_bytes());

        let response = self
            .http
            .post(&url)
            .bearer_auth(self.token().await?)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/related; boundary={}", boundary),
            )
            .query(&[("uploadType", "multipart"), ("fields", FILE_FIELDS)])
            .body(body)
            .send()
            .await
            .map_err(|e| transport_error("Failed to upload file", e))?;

        let response = check_status(response, "Upload file").await?;
        json_body(response, "Upload file").await
    }

    /// Replace the content of an existing file with a single-part upload.
    pub async fn update_content(
        &self,
        file_id: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<DriveFile> {
        let url = format!("{}/files/{}", self.upload_base, file_id);

        let response = self
            .http
            .patch(&url)
            .bearer_auth(self.token().await?)
            .header(header::CONTENT_TYPE, content_type)
            .query(&[("uploadType", "media"), ("fields", FILE_FIELDS)])
            .body(data)
            .send()
            .await
            .map_err(|e| transport_error("Failed to update file", e))?;

        let response = check_status(response, "Update file").await?;
        json_body(response, "Update file").await
    }

    /// Download file content.
    pub async fn download(&self, file_id: &str) -> Result<Vec<u8>> {
        let url = format!("{}/files/{}", self.api_base, file_id);

        let response = self
            .http
            .get(&url)
            .bearer_auth(self.token().await?)
            .query(&[("alt", "media")])
            .send()
            .await
            .map_err(|e| transport_error("Failed to download file", e))?;

        let response = check_status(response, "Download").await?;
        bytes_body(response, "Download").await
    }

    /// Permanently delete a file or folder (folders take their children).
    pub async fn delete(&self, file_id: &str) -> Result<()> {
        let url = format!("{}/files/{}", self.api_base, file_id);

        let response = self
            .http
            .delete(&url)
            .bearer_auth(self.token().await?)
            .send()
            .await
            .map_err(|e| transport_error("Failed to delete file", e))?;

        check_status(response, "Delete").await?;
        Ok(())
    }

    /// Server-side copy.
    pub async fn copy_file(&self, file_id: &str, new_name: &str, parent_id: &str) -> Result<DriveFile> {
        let url = format!("{}/files/{}/copy", self.api_base, file_id);

        let metadata = serde_json::json!({
            "name": new_name,
            "parents": [parent_id],
        });

        let response = self
            .http
            .post(&url)
            .bearer_auth(self.token().await?)
            .query(&[("fields", FILE_FIELDS)])
            .json(&metadata)
            .send()
            .await
            .map_err(|e| transport_error("Failed to copy file", e))?;

        let response = check_status(response, "Copy").await?;
        json_body(response, "Copy").await
    }

    /// Rename and/or re-parent a file.
    pub async fn move_file(
        &self,
        file_id: &str,
        new_name: &str,
        new_parent: &str,
        current_parent: Option<&str>,
    ) -> Result<DriveFile> {
        let url = format!("{}/files/{}", self.api_base, file_id);

        let mut request = self
            .http
            .patch(&url)
            .bearer_auth(self.token().await?)
            .query(&[("fields", FILE_FIELDS), ("addParents", new_parent)]);

        if let Some(old_parent_id) = current_parent {
            request = request.query(&[("removeParents", old_parent_id)]);
        }

        let response = request
            .json(&serde_json::json!({ "name": new_name }))
            .send()
            .await
            .map_err(|e| transport_error("Failed to move file", e))?;

        let response = check_status(response, "Move").await?;
        json_body(response, "Move").await
    }

    /// Account information, used for health probes and quota.
    pub async fn about(&self, fields: &str) -> Result<About> {
        let url = format!("{}/about", self.api_base);

        let response = self
            .http
            .get(&url)
            .bearer_auth(self.token().await?)
            .query(&[("fields", fields)])
            .send()
            .await
            .map_err(|e| transport_error("Failed to fetch account info", e))?;

        let response = check_status(response, "About").await?;
        json_body(response, "About").await
    }
}
