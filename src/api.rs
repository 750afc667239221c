use crate::error::ApiError;
use crate::models::{
    download_url, BlobMetadata, CloudFile, FileListResponse, UploadResponse, DOWNLOAD_ROUTE,
    LIST_ROUTE, MAX_UPLOAD_BYTES, UPLOAD_ROUTE,
};
use crate::storage::BlobStore;
use axum::{
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, Query, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, MethodRouter},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::Utc;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

/// Room for multipart framing around a maximum-size file.
const MULTIPART_OVERHEAD_BYTES: usize = 1024 * 1024;

pub const BODY_ENCODING_HEADER: &str = "x-body-encoding";

pub struct AppState {
    pub store: Arc<dyn BlobStore>,
}

pub fn router(store: Arc<dyn BlobStore>) -> Router {
    let state = Arc::new(AppState { store });

    Router::new()
        .route(
            UPLOAD_ROUTE,
            with_cors(post(upload_file), Method::POST)
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES + MULTIPART_OVERHEAD_BYTES)),
        )
        .route(LIST_ROUTE, with_cors(get(list_files), Method::GET))
        .route(DOWNLOAD_ROUTE, with_cors(get(download_file), Method::GET))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Answers preflights for the route and rejects methods it does not serve.
fn with_cors(route: MethodRouter<Arc<AppState>>, method: Method) -> MethodRouter<Arc<AppState>> {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_headers([header::CONTENT_TYPE])
        .allow_methods([method, Method::OPTIONS]);
    route.fallback(method_not_allowed).layer(cors)
}

async fn method_not_allowed() -> ApiError {
    ApiError::MethodNotAllowed
}

/// Replaces every character outside ASCII alphanumerics, `._-` and the Arabic
/// block with `_`.
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '\u{0600}'..='\u{06FF}') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Longest sanitized name kept in a blob key. The disk store adds a
/// `.meta.json` suffix and file names top out at 255 bytes.
const MAX_KEY_NAME_BYTES: usize = 180;

/// The name half of a blob key: the sanitized file name, shortened at a char
/// boundary when too long. A short extension survives the cut.
pub fn key_name(file_name: &str) -> String {
    let name = sanitize_file_name(file_name);
    if name.len() <= MAX_KEY_NAME_BYTES {
        return name;
    }
    let extension = name
        .rfind('.')
        .map(|dot| &name[dot..])
        .filter(|ext| ext.len() <= 16)
        .unwrap_or("");
    let stem = &name[..name.len() - extension.len()];
    let mut end = MAX_KEY_NAME_BYTES - extension.len();
    while !stem.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", &stem[..end], extension)
}

/// Everything after `boundary=` in the content type, without quotes.
fn boundary_param(content_type: &str) -> Option<&str> {
    let start = content_type.find("boundary=")? + "boundary=".len();
    let value = content_type[start..].trim().trim_matches('"');
    (!value.is_empty()).then_some(value)
}

struct FilePart {
    file_name: String,
    content_type: String,
    data: Bytes,
}

async fn read_file_part(body: Bytes, boundary: &str) -> Result<Option<FilePart>, ApiError> {
    let stream = futures::stream::once(async move { Ok::<Bytes, Infallible>(body) });
    let mut multipart = multer::Multipart::new(stream, boundary);

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::MalformedMultipart(e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field
            .file_name()
            .filter(|name| !name.is_empty())
            .unwrap_or("unnamed-file")
            .to_string();
        let content_type = field
            .content_type()
            .map(|mime| mime.to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::MalformedMultipart(e.to_string()))?;
        return Ok(Some(FilePart {
            file_name,
            content_type,
            data,
        }));
    }
    Ok(None)
}

pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Bytes, axum::extract::rejection::BytesRejection>,
) -> Result<Json<UploadResponse>, ApiError> {
    let body = body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge {
                limit_mib: MAX_UPLOAD_BYTES / (1024 * 1024),
            }
        } else {
            ApiError::MalformedMultipart(rejection.body_text())
        }
    })?;
    if body.is_empty() {
        return Err(ApiError::EmptyBody);
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if !content_type.contains("multipart/form-data") {
        return Err(ApiError::NotMultipart);
    }
    let boundary = boundary_param(content_type).ok_or(ApiError::MissingBoundary)?;

    let part = read_file_part(body, boundary).await?;
    let Some(part) = part.filter(|part| !part.data.is_empty()) else {
        return Err(ApiError::MissingFile);
    };
    if part.data.len() > MAX_UPLOAD_BYTES {
        return Err(ApiError::PayloadTooLarge {
            limit_mib: MAX_UPLOAD_BYTES / (1024 * 1024),
        });
    }

    let now = Utc::now();
    let file_key = format!("{}-{}", now.timestamp_millis(), key_name(&part.file_name));
    let file_size = part.data.len();
    let metadata = BlobMetadata::new(part.file_name.clone(), part.content_type, file_size, now);

    state
        .store
        .set(&file_key, part.data, metadata)
        .await
        .map_err(|e| ApiError::internal("Failed to upload file to cloud storage", e))?;

    info!(key = %file_key, size = file_size, "stored uploaded file");

    Ok(Json(UploadResponse {
        success: true,
        download_url: download_url(&file_key),
        file_key,
        file_name: part.file_name,
        file_size: file_size as u64,
    }))
}

/// Blank metadata values fall back the same way missing ones do.
fn list_entry(key: String, metadata: Option<BlobMetadata>) -> CloudFile {
    let download_url = download_url(&key);
    let metadata = metadata.unwrap_or_default();
    CloudFile {
        name: non_empty(metadata.original_name).unwrap_or_else(|| key.clone()),
        size: metadata.size.trim().parse().unwrap_or(0),
        content_type: non_empty(metadata.content_type).unwrap_or_else(|| "unknown".to_string()),
        uploaded_at: metadata.uploaded_at,
        key,
        download_url,
    }
}

fn non_empty(value: String) -> Option<String> {
    (!value.trim().is_empty()).then_some(value)
}

pub async fn list_files(
    State(state): State<Arc<AppState>>,
) -> Result<Json<FileListResponse>, ApiError> {
    let keys = state
        .store
        .list()
        .await
        .map_err(|e| ApiError::internal("Failed to list files", e))?;

    let store = &state.store;
    let files = futures::future::try_join_all(keys.into_iter().map(|key| async move {
        let metadata = store.get_metadata(&key).await?;
        Ok::<_, anyhow::Error>(list_entry(key, metadata))
    }))
    .await
    .map_err(|e| ApiError::internal("Failed to list files", e))?;

    debug!(count = files.len(), "listed stored files");
    Ok(Json(FileListResponse { files }))
}

#[derive(Debug, Deserialize)]
pub struct DownloadParams {
    pub key: Option<String>,
    pub encoding: Option<String>,
}

pub async fn download_file(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DownloadParams>,
) -> Result<Response, ApiError> {
    let key = params
        .key
        .filter(|key| !key.is_empty())
        .ok_or(ApiError::MissingKey)?;

    let blob = state
        .store
        .get_with_metadata(&key)
        .await
        .map_err(|e| ApiError::internal("Download failed", e))?
        .ok_or_else(|| ApiError::NotFound(key.clone()))?;

    let content_type = non_empty(blob.metadata.content_type)
        .unwrap_or_else(|| "application/octet-stream".to_string());
    let file_name = non_empty(blob.metadata.original_name).unwrap_or_else(|| key.clone());
    let disposition = format!("attachment; filename=\"{}\"", file_name.replace('"', "\\\""));

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&disposition).map_err(|e| {
            ApiError::internal("Download failed", anyhow::anyhow!("bad file name header: {}", e))
        })?,
    );

    let body = if params.encoding.as_deref() == Some("base64") {
        headers.insert(
            HeaderName::from_static(BODY_ENCODING_HEADER),
            HeaderValue::from_static("base64"),
        );
        Body::from(STANDARD.encode(&blob.payload))
    } else {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(blob.payload.len()));
        Body::from(blob.payload)
    };

    debug!(key = %key, "serving stored file");
    Ok((StatusCode::OK, headers, body).into_response())
}
