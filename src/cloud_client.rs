use crate::controller::CloudFiles;
use crate::models::{
    CloudFile, FileListResponse, UploadResponse, DOWNLOAD_ROUTE, LIST_ROUTE, MAX_UPLOAD_BYTES,
    UPLOAD_ROUTE,
};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header, multipart, Body, Response, StatusCode};
use serde::Deserialize;
use std::path::Path;
use tokio::sync::mpsc::UnboundedSender;

pub const DEFAULT_SERVER_URL: &str = "http://localhost:3000";

const CHUNK_SIZE: usize = 64 * 1024;

/// How much of the current upload has been handed to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadProgress {
    pub sent: u64,
    pub total: u64,
}

impl UploadProgress {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.sent as f64 / self.total as f64 * 100.0
    }
}

pub type ProgressSender = UnboundedSender<UploadProgress>;

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: Option<String>,
}

#[derive(Debug)]
pub struct DownloadedFile {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub data: Bytes,
}

pub struct CloudClient {
    http: reqwest::Client,
    base_url: String,
}

impl CloudClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, route: &str) -> String {
        format!("{}{}", self.base_url, route)
    }

    /// Resolves a relative `downloadUrl` from the server into an absolute one.
    pub fn absolute_url(&self, download_url: &str) -> String {
        if download_url.starts_with("http://") || download_url.starts_with("https://") {
            download_url.to_string()
        } else {
            self.url(download_url)
        }
    }

    pub async fn upload_file(&self, path: &Path, progress: Option<ProgressSender>) -> Result<UploadResponse> {
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if data.len() > MAX_UPLOAD_BYTES {
            bail!(
                "File is too large (maximum {} MiB)",
                MAX_UPLOAD_BYTES / (1024 * 1024)
            );
        }
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unnamed-file".to_string());

        let total = data.len() as u64;
        let chunks: Vec<Bytes> = data
            .chunks(CHUNK_SIZE)
            .map(Bytes::copy_from_slice)
            .collect();
        let mut sent = 0u64;
        let stream = futures::stream::iter(chunks.into_iter().map(move |chunk| {
            sent += chunk.len() as u64;
            if let Some(progress) = &progress {
                let _ = progress.send(UploadProgress { sent, total });
            }
            Ok::<Bytes, std::io::Error>(chunk)
        }));

        let part = multipart::Part::stream_with_length(Body::wrap_stream(stream), total)
            .file_name(file_name.clone())
            .mime_str(content_type_for(&file_name))?;
        let form = multipart::Form::new().part("file", part);

        let response = self
            .http
            .post(self.url(UPLOAD_ROUTE))
            .multipart(form)
            .send()
            .await
            .context("Failed to connect to the file server")?;

        let response = check_status(response).await?;
        let result: UploadResponse = response
            .json()
            .await
            .context("Failed to parse the server response")?;
        if !result.success {
            bail!("File upload failed");
        }
        Ok(result)
    }

    pub async fn list_files(&self) -> Result<Vec<CloudFile>> {
        let response = self
            .http
            .get(self.url(LIST_ROUTE))
            .send()
            .await
            .context("Failed to connect to the file server")?;
        let response = check_status(response).await?;
        let result: FileListResponse = response
            .json()
            .await
            .context("Failed to parse the file listing")?;
        Ok(result.files)
    }

    pub async fn download(&self, key: &str) -> Result<DownloadedFile> {
        let response = self
            .http
            .get(self.url(DOWNLOAD_ROUTE))
            .query(&[("key", key)])
            .send()
            .await
            .context("Failed to connect to the file server")?;
        let response = check_status(response).await?;

        let file_name = response
            .headers()
            .get(header::CONTENT_DISPOSITION)
            .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
            .and_then(|value| disposition_file_name(&value));
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let data = response.bytes().await.context("Failed to read the file body")?;

        Ok(DownloadedFile {
            file_name,
            content_type,
            data,
        })
    }
}

#[async_trait]
impl CloudFiles for CloudClient {
    async fn upload(&self, path: &Path, progress: Option<ProgressSender>) -> Result<UploadResponse> {
        self.upload_file(path, progress).await
    }

    async fn list(&self) -> Result<Vec<CloudFile>> {
        self.list_files().await
    }
}

/// Turns non-success responses into errors carrying the server's message.
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status == StatusCode::OK {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorResponse>(&text)
        .ok()
        .and_then(|body| body.error)
        .unwrap_or_else(|| format!("Server error: {}", status.as_u16()));
    Err(anyhow!(message))
}

/// The quoted `filename` parameter of a content disposition header,
/// reduced to a bare file name that is safe to create in the working
/// directory.
fn disposition_file_name(value: &str) -> Option<String> {
    let start = value.find("filename=\"")? + "filename=\"".len();
    let rest = &value[start..];
    let end = rest.rfind('"')?;
    local_file_name(&rest[..end].replace("\\\"", "\""))
}

/// Last path component of `name`, or `None` when nothing usable is left.
pub fn local_file_name(name: &str) -> Option<String> {
    let last = name.rsplit(['/', '\\']).next()?.trim();
    if last.is_empty() || last == "." || last == ".." || last.contains('\0') {
        return None;
    }
    Some(last.to_string())
}

fn content_type_for(file_name: &str) -> &'static str {
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "json" => "application/json",
        "csv" => "text/csv",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "zip" => "application/zip",
        _ => "application/octet-stream",
    }
}
