//! Dropbox API v2 client.

use chrono::{DateTime, Utc};
use reqwest::{header, Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

use studiosync_common::{Error, Result};

use crate::http::{bytes_body, json_body, status_error, transport_error};
use crate::oauth::TokenManager;

pub const DROPBOX_API_BASE: &str = "https://api.dropboxapi.com/2";
pub const DROPBOX_CONTENT_BASE: &str = "https://content.dropboxapi.com/2";

const API_ARG_HEADER: &str = "Dropbox-API-Arg";

/// File or folder metadata, discriminated by `.tag`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = ".tag", rename_all = "lowercase")]
pub enum DropboxMetadata {
    File {
        name: String,
        #[serde(default)]
        path_display: Option<String>,
        size: u64,
        #[serde(default)]
        server_modified: Option<DateTime<Utc>>,
        #[serde(default)]
        client_modified: Option<DateTime<Utc>>,
    },
    Folder {
        name: String,
        #[serde(default)]
        path_display: Option<String>,
    },
    Deleted {
        name: String,
    },
}

#[derive(Debug, Deserialize)]
struct ListFolderResult {
    entries: Vec<DropboxMetadata>,
    cursor: String,
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    error_summary: String,
}

#[derive(Debug, Deserialize)]
pub struct SpaceUsage {
    pub used: u64,
    pub allocation: SpaceAllocation,
}

#[derive(Debug, Deserialize)]
pub struct SpaceAllocation {
    /// Absent for allocation kinds without a fixed size.
    #[serde(default)]
    pub allocated: Option<u64>,
}

/// Serialize an argument for the `Dropbox-API-Arg` header.
///
/// Header values must be ASCII, so everything outside printable ASCII is
/// written as a JSON `\u` escape.
pub(crate) fn header_safe_json<T: Serialize>(value: &T) -> Result<String> {
    let json = serde_json::to_string(value)?;
    let mut out = String::with_capacity(json.len());
    for c in json.chars() {
        if c.is_ascii() && !c.is_ascii_control() {
            out.push(c);
        } else {
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    Ok(out)
}

/// Map a non-success Dropbox response. Endpoint errors arrive as 409 with a
/// machine-readable `error_summary` such as `path/not_found/..`.
async fn api_error(response: Response, context: &str) -> Error {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    if status == StatusCode::CONFLICT {
        let summary = serde_json::from_str::<ApiErrorBody>(&body)
            .map(|b| b.error_summary)
            .unwrap_or_default();
        if summary.contains("not_found") {
            return Error::NotFound(format!("{}: {}", context, summary));
        }
        return Error::Network(format!("{}: {}", context, summary));
    }
    status_error(status, &body, context)
}

/// Dropbox API client.
pub struct DropboxClient {
    http: Client,
    token_manager: Arc<TokenManager>,
    api_base: String,
    content_base: String,
}

impl DropboxClient {
    pub fn new(
        http: Client,
        token_manager: Arc<TokenManager>,
        api_base: impl Into<String>,
        content_base: impl Into<String>,
    ) -> Self {
        Self {
            http,
            token_manager,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            content_base: content_base.into().trim_end_matches('/').to_string(),
        }
    }

    /// Call a JSON RPC endpoint.
    async fn rpc<A: Serialize, R: DeserializeOwned>(&self, endpoint: &str, args: &A) -> Result<R> {
        let url = format!("{}/{}", self.api_base, endpoint);
        let token = self.token_manager.get_access_token().await?;

        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(args)
            .send()
            .await
            .map_err(|e| transport_error(endpoint, e))?;

        if !response.status().is_success() {
            return Err(api_error(response, endpoint).await);
        }
        json_body(response, endpoint).await
    }

    pub async fn get_metadata(&self, path: &str) -> Result<DropboxMetadata> {
        self.rpc("files/get_metadata", &json!({ "path": path })).await
    }

    /// List a folder, following the cursor until `max_results` entries are
    /// collected or `has_more` is false.
    pub async fn list_folder(&self, path: &str, max_results: Option<usize>) -> Result<Vec<DropboxMetadata>> {
        let mut args = json!({ "path": path, "recursive": false });
        if let Some(max) = max_results {
            args["limit"] = json!(max.clamp(1, 2000));
        }

        let mut page: ListFolderResult = self.rpc("files/list_folder", &args).await?;
        let mut entries = Vec::new();

        loop {
            entries.extend(page.entries);
            if !page.has_more || max_results.is_some_and(|max| entries.len() >= max) {
                break;
            }
            page = self
                .rpc("files/list_folder/continue", &json!({ "cursor": page.cursor }))
                .await?;
        }

        if let Some(max) = max_results {
            entries.truncate(max);
        }
        Ok(entries)
    }

    pub async fn upload(&self, path: &str, data: Vec<u8>) -> Result<DropboxMetadata> {
        let url = format!("{}/files/upload", self.content_base);
        let token = self.token_manager.get_access_token().await?;
        let arg = header_safe_json(&json!({
            "path": path,
            "mode": "overwrite",
            "autorename": false,
            "mute": true,
        }))?;
        debug!(path, bytes = data.len(), "Uploading to Dropbox");

        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .header(API_ARG_HEADER, arg)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(data)
            .send()
            .await
            .map_err(|e| transport_error("files/upload", e))?;

        if !response.status().is_success() {
            return Err(api_error(response, "files/upload").await);
        }
        json_body(response, "files/upload").await
    }

    pub async fn download(&self, path: &str) -> Result<Vec<u8>> {
        let url = format!("{}/files/download", self.content_base);
        let token = self.token_manager.get_access_token().await?;
        let arg = header_safe_json(&json!({ "path": path }))?;

        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .header(API_ARG_HEADER, arg)
            .send()
            .await
            .map_err(|e| transport_error("files/download", e))?;

        if !response.status().is_success() {
            return Err(api_error(response, "files/download").await);
        }
        bytes_body(response, "files/download").await
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        let _: serde_json::Value = self.rpc("files/delete_v2", &json!({ "path": path })).await?;
        Ok(())
    }

    pub async fn copy(&self, from: &str, to: &str) -> Result<()> {
        let _: serde_json::Value = self
            .rpc(
                "files/copy_v2",
                &json!({ "from_path": from, "to_path": to, "autorename": false }),
            )
            .await?;
        Ok(())
    }

    pub async fn move_path(&self, from: &str, to: &str) -> Result<()> {
        let _: serde_json::Value = self
            .rpc(
                "files/move_v2",
                &json!({ "from_path": from, "to_path": to, "autorename": false }),
            )
            .await?;
        Ok(())
    }

    /// Create a folder; parents are created by Dropbox.
    pub async fn create_folder(&self, path: &str) -> Result<()> {
        let result: Result<serde_json::Value> = self
            .rpc("files/create_folder_v2", &json!({ "path": path, "autorename": false }))
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(Error::Network(msg)) if msg.contains("path/conflict/folder") => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn current_account(&self) -> Result<serde_json::Value> {
        self.rpc("users/get_current_account", &serde_json::Value::Null).await
    }

    pub async fn space_usage(&self) -> Result<SpaceUsage> {
        self.rpc("users/get_space_usage", &serde_json::Value::Null).await
    }
}
