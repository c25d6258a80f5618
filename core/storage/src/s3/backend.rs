//! S3-compatible object storage backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, Client, Method, Response};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::debug;
use url::Url;

use studiosync_common::{Error, Result, StoragePath};

use crate::backend::{
    BackendKind, Entry, HealthStatus, ListOptions, Metadata, StorageBackend, WriteOptions,
};
use crate::http::{build_client, bytes_body, check_status, transport_error};

use super::signing::{
    amz_date, canonical_query_string, payload_hash, uri_encode, CanonicalRequest, Signer,
    EMPTY_PAYLOAD_HASH,
};
use super::xml::{parse_error, parse_list_page, ListPage};

const DEFAULT_REGION: &str = "us-east-1";

/// S3 backend settings.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3Settings {
    /// Service endpoint, e.g. `https://s3.eu-central-1.amazonaws.com` or a
    /// MinIO URL. Defaults to the regional AWS endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Address the bucket in the path instead of the host name.
    #[serde(default)]
    pub path_style: bool,
    /// Key prefix under which all objects are stored.
    #[serde(default)]
    pub prefix: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

impl fmt::Debug for S3Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Settings")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("path_style", &self.path_style)
            .field("prefix", &self.prefix)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

/// S3 storage backend.
pub struct S3Backend {
    http: Client,
    signer: Signer,
    scheme: String,
    /// `host[:port]` the requests are sent to, and signed with.
    host: String,
    /// Encoded path prefix before the object key: `/bucket` or empty.
    base_path: String,
    bucket: String,
    prefix: String,
}

impl S3Backend {
    pub fn new(settings: S3Settings) -> Result<Self> {
        if settings.bucket.is_empty() {
            return Err(Error::Config("S3 bucket name is required".to_string()));
        }

        let endpoint = settings
            .endpoint
            .clone()
            .unwrap_or_else(|| format!("https://s3.{}.amazonaws.com", settings.region));
        let url = Url::parse(&endpoint)
            .map_err(|e| Error::Config(format!("Invalid S3 endpoint {}: {}", endpoint, e)))?;
        let endpoint_host = url
            .host_str()
            .ok_or_else(|| Error::Config(format!("S3 endpoint has no host: {}", endpoint)))?;
        let endpoint_host = match url.port() {
            Some(port) => format!("{}:{}", endpoint_host, port),
            None => endpoint_host.to_string(),
        };

        let (host, base_path) = if settings.path_style {
            (endpoint_host, format!("/{}", uri_encode(&settings.bucket, true)))
        } else {
            (format!("{}.{}", settings.bucket, endpoint_host), String::new())
        };

        let prefix = settings.prefix.trim_matches('/');
        let prefix = if prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", prefix)
        };

        Ok(Self {
            http: build_client(settings.request_timeout_secs.map(Duration::from_secs))?,
            signer: Signer::new(
                settings.access_key_id,
                settings.secret_access_key,
                settings.region,
            ),
            scheme: url.scheme().to_string(),
            host,
            base_path,
            bucket: settings.bucket,
            prefix,
        })
    }

    /// Object key for a file path.
    pub(crate) fn object_key(&self, path: &StoragePath) -> String {
        format!("{}{}", self.prefix, path.to_key())
    }

    /// Listing prefix for a directory path, always ending in `/` unless it
    /// addresses the bucket root.
    pub(crate) fn directory_prefix(&self, path: &StoragePath) -> String {
        if path.is_root() {
            self.prefix.clone()
        } else {
            format!("{}{}/", self.prefix, path.to_key())
        }
    }

    /// Sign and send one request. Status handling is left to the caller.
    async fn send(
        &self,
        method: Method,
        key: &str,
        query: &[(String, String)],
        extra_headers: &[(String, String)],
        body: Option<Vec<u8>>,
    ) -> Result<Response> {
        let uri = format!("{}/{}", self.base_path, uri_encode(key, false));
        let now = Utc::now();
        let content_hash = body
            .as_deref()
            .map(payload_hash)
            .unwrap_or_else(|| EMPTY_PAYLOAD_HASH.to_string());

        let mut headers = vec![
            ("host".to_string(), self.host.clone()),
            ("x-amz-content-sha256".to_string(), content_hash.clone()),
            ("x-amz-date".to_string(), amz_date(now)),
        ];
        headers.extend_from_slice(extra_headers);

        let authorization = self.signer.authorization(
            &CanonicalRequest {
                method: method.as_str(),
                uri: &uri,
                query,
                headers: &headers,
                payload_hash: &content_hash,
            },
            now,
        )?;

        let mut url = format!("{}://{}{}", self.scheme, self.host, uri);
        if !query.is_empty() {
            url.push('?');
            url.push_str(&canonical_query_string(query));
        }
        debug!(method = %method, url = %url, "S3 request");

        let mut request = self
            .http
            .request(method, &url)
            .header(header::AUTHORIZATION, authorization);
        for (name, value) in headers.iter().filter(|(name, _)| name != "host") {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = body {
            request = request.body(body);
        }

        request.send().await.map_err(|e| transport_error(key, e))
    }

    /// One `ListObjectsV2` page.
    async fn list_page(
        &self,
        prefix: &str,
        delimiter: bool,
        max_keys: Option<usize>,
        continuation: Option<&str>,
    ) -> Result<ListPage> {
        let mut query = vec![
            ("list-type".to_string(), "2".to_string()),
            ("prefix".to_string(), prefix.to_string()),
        ];
        if delimiter {
            query.push(("delimiter".to_string(), "/".to_string()));
        }
        if let Some(max) = max_keys {
            query.push(("max-keys".to_string(), max.clamp(1, 1000).to_string()));
        }
        if let Some(token) = continuation {
            query.push(("continuation-token".to_string(), token.to_string()));
        }

        let response = self.send(Method::GET, "", &query, &[], None).await?;
        let response = check_status(response, "ListObjectsV2").await?;
        let body = response
            .text()
            .await
            .map_err(|e| Error::Network(format!("ListObjectsV2: failed to read body: {}", e)))?;
        Ok(parse_list_page(&body))
    }

    /// Every object key under `prefix`, across all pages.
    async fn all_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = self.list_page(prefix, false, None, token.as_deref()).await?;
            keys.extend(page.objects.into_iter().map(|o| o.key));
            match page.next_continuation_token {
                Some(next) if page.is_truncated => token = Some(next),
                _ => break,
            }
        }
        Ok(keys)
    }

    async fn delete_key(&self, key: &str) -> Result<()> {
        let response = self.send(Method::DELETE, key, &[], &[], None).await?;
        match check_status(response, "DeleteObject").await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

fn header_str<'a>(response: &'a Response, name: header::HeaderName) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

#[async_trait]
impl StorageBackend for S3Backend {
    fn kind(&self) -> BackendKind {
        BackendKind::S3
    }

    async fn write(&self, path: &StoragePath, data: Vec<u8>, options: &WriteOptions) -> Result<()> {
        if path.is_root() {
            return Err(Error::InvalidInput("Cannot write to the root".to_string()));
        }

        let content_type = options
            .content_type
            .clone()
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let headers = [("content-type".to_string(), content_type)];

        debug!(bucket = %self.bucket, path = %path, bytes = data.len(), "PutObject");
        let response = self
            .send(Method::PUT, &self.object_key(path), &[], &headers, Some(data))
            .await?;
        check_status(response, "PutObject").await?;
        Ok(())
    }

    async fn read(&self, path: &StoragePath) -> Result<Vec<u8>> {
        let response = self
            .send(Method::GET, &self.object_key(path), &[], &[], None)
            .await?;
        let response = check_status(response, "GetObject").await?;
        bytes_body(response, "GetObject").await
    }

    async fn delete(&self, path: &StoragePath, recursive: bool) -> Result<()> {
        if recursive {
            for key in self.all_keys(&self.directory_prefix(path)).await? {
                self.delete_key(&key).await?;
            }
        }
        if path.is_root() {
            return Ok(());
        }
        self.delete_key(&self.object_key(path)).await
    }

    async fn list(&self, path: &StoragePath, options: &ListOptions) -> Result<Vec<Entry>> {
        let prefix = self.directory_prefix(path);
        let mut entries = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let remaining = options.max_results.map(|max| max.saturating_sub(entries.len()));
            let page = match self.list_page(&prefix, true, remaining, token.as_deref()).await {
                Ok(page) => page,
                Err(e) if e.is_not_found() => return Ok(Vec::new()),
                Err(e) => return Err(e),
            };

            for prefix_entry in &page.common_prefixes {
                let name = prefix_entry
                    .strip_prefix(&prefix)
                    .unwrap_or(prefix_entry)
                    .trim_end_matches('/');
                if !name.is_empty() {
                    entries.push(Entry::directory(name));
                }
            }
            for object in page.objects {
                let name = object.key.strip_prefix(&prefix).unwrap_or(&object.key);
                // Zero-byte "folder" markers list as the prefix itself.
                if !name.is_empty() {
                    entries.push(Entry::file(name, Some(object.size), object.last_modified));
                }
            }

            if options.is_satisfied(entries.len()) {
                break;
            }
            match page.next_continuation_token {
                Some(next) if page.is_truncated => token = Some(next),
                _ => break,
            }
        }

        Ok(options.apply(entries))
    }

    async fn metadata(&self, path: &StoragePath) -> Result<Option<Metadata>> {
        let directory = Metadata {
            size: 0,
            modified: None,
            created: None,
            content_type: None,
        };
        if path.is_root() {
            return Ok(Some(directory));
        }

        let response = self
            .send(Method::HEAD, &self.object_key(path), &[], &[], None)
            .await?;
        match check_status(response, "HeadObject").await {
            Ok(response) => {
                let size = header_str(&response, header::CONTENT_LENGTH)
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0);
                let modified = header_str(&response, header::LAST_MODIFIED)
                    .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
                    .map(|dt| dt.with_timezone(&Utc));
                let content_type =
                    header_str(&response, header::CONTENT_TYPE).map(|v| v.to_string());
                Ok(Some(Metadata {
                    size,
                    modified,
                    created: None,
                    content_type,
                }))
            }
            Err(e) if e.is_not_found() => {
                // No object; a non-empty prefix still counts as a directory.
                let page = self
                    .list_page(&self.directory_prefix(path), true, Some(1), None)
                    .await;
                match page {
                    Ok(page) if !page.objects.is_empty() || !page.common_prefixes.is_empty() => {
                        Ok(Some(directory))
                    }
                    Ok(_) => Ok(None),
                    Err(e) if e.is_not_found() => Ok(None),
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Server-side copy. CopyObject can fail with a 200 status and an
    /// `<Error>` body.
    async fn copy(&self, from: &StoragePath, to: &StoragePath) -> Result<()> {
        let source = format!(
            "/{}/{}",
            self.bucket,
            uri_encode(&self.object_key(from), false)
        );
        let headers = [("x-amz-copy-source".to_string(), source)];

        let response = self
            .send(Method::PUT, &self.object_key(to), &[], &headers, None)
            .await?;
        let response = check_status(response, "CopyObject").await?;
        let body = response
            .text()
            .await
            .map_err(|e| transport_error("CopyObject: failed to read body", e))?;
        if let Some((code, message)) = parse_error(&body) {
            if code == "NoSuchKey" {
                return Err(Error::NotFound(format!("CopyObject: {}", message)));
            }
            return Err(Error::Network(format!("CopyObject: {} - {}", code, message)));
        }
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        let started = Instant::now();
        let outcome = self.list_page(&self.prefix, true, Some(1), None).await;
        HealthStatus::from_probe(started, &outcome)
    }
}
