use std::collections::BTreeMap;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use chrono::{TimeZone, Utc};
use md5::{Digest, Md5};
use replicast_cache::{Blob, CacheStats, FolderStats, PathPattern};
use replicast_types::{now_ms, props, VersionId};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{ServerError, ServerResult};
use crate::range::{parse_range, RangeSpec};
use crate::request::ObjectRequest;
use crate::router::AppState;

/// Properties that never become response headers.
const WITHHELD_PROPERTIES: &[&str] = &[
    props::ORIGINAL_FILE_NAME,
    "Content-Length",
    "Content-Range",
    "Transfer-Encoding",
    "Connection",
];

/// Properties an upload derives itself; flags cannot override them.
const UPLOAD_RESERVED: &[&str] = &[
    props::VALID_FROM,
    props::VALID_UNTIL,
    props::CREATED,
    props::CONTENT_MD5,
    props::CONTENT_TYPE,
];

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub cache: CacheStats,
}

/// Health check handler.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        cache: state.cache.stats(),
    })
}

/// `GET /download/{version}`: one complete object by version id.
pub async fn download(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ServerResult<Response> {
    let version: VersionId = id
        .parse()
        .map_err(|_| ServerError::BadRequest(format!("invalid version id {id}")))?;
    let blob = state
        .cache
        .find_by_version(version)
        .filter(|b| b.is_complete())
        .ok_or(ServerError::NotFound)?;
    serve_blob(&blob, &headers)
}

/// `GET /{path}/{time}[/{version}]`: best match, or a redirect to it.
pub async fn get_object(
    State(state): State<AppState>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> ServerResult<Response> {
    let request = ObjectRequest::parse(&path, &headers, true)?;
    let blob = state
        .cache
        .lookup_best(&request.query())
        .ok_or(ServerError::NotFound)?;

    if request.cached_version == Some(blob.version()) {
        return Ok((StatusCode::NOT_MODIFIED, [(header::ETAG, etag(&blob))]).into_response());
    }
    if request.version.is_some() {
        return serve_blob(&blob, &headers);
    }
    Ok((StatusCode::FOUND, [(header::LOCATION, object_location(&blob))]).into_response())
}

/// `DELETE /{path}/{time}[/{version}]`: drops the matched version.
pub async fn delete_object(
    State(state): State<AppState>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> ServerResult<StatusCode> {
    let request = ObjectRequest::parse(&path, &headers, true)?;
    let blob = state
        .cache
        .lookup_best(&request.query())
        .ok_or(ServerError::NotFound)?;
    state
        .cache
        .remove(blob.key(), blob.version())
        .ok_or(ServerError::NotFound)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /{path}/{start}[/{end}][/k=v...]`: stores the body as a new version.
pub async fn upload(
    State(state): State<AppState>,
    Path(path): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ServerResult<Response> {
    let request = ObjectRequest::parse(&path, &headers, true)?;
    if request.version.is_some() {
        return Err(ServerError::BadRequest(
            "uploads are assigned a new version".into(),
        ));
    }
    let start = request
        .start_time
        .ok_or_else(|| ServerError::BadRequest("missing start time".into()))?;

    let mut properties: BTreeMap<String, String> = request
        .flags
        .iter()
        .filter(|(name, _)| !UPLOAD_RESERVED.iter().any(|r| r.eq_ignore_ascii_case(name)))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    properties.insert(props::VALID_FROM.into(), start.to_string());
    if let Some(end) = request.end_time {
        if end <= start {
            return Err(ServerError::BadRequest(format!(
                "end time {end} is not after start time {start}"
            )));
        }
        properties.insert(props::VALID_UNTIL.into(), end.to_string());
    }
    properties.insert(props::CREATED.into(), now_ms().to_string());
    properties.insert(props::CONTENT_MD5.into(), hex::encode(Md5::digest(&body)));
    if let Some(content_type) = headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()) {
        properties.insert(props::CONTENT_TYPE.into(), content_type.to_string());
    }

    let key = request.key();
    let size = body.len();
    let blob = state
        .cache
        .insert_complete(&key, VersionId::new(), properties, body)?;
    info!(key, version = %blob.version(), size, "object uploaded");

    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, object_location(&blob))],
        Json(ObjectSummary::from(blob.as_ref())),
    )
        .into_response())
}

/// Objects are immutable once stored.
pub async fn put_object() -> StatusCode {
    StatusCode::NOT_IMPLEMENTED
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectSummary {
    pub path: String,
    pub version: String,
    pub size: u64,
    pub start_time: u64,
    pub end_time: u64,
    pub created: u64,
    pub content_type: String,
    pub original_name: String,
    pub properties: BTreeMap<String, String>,
}

impl From<&Blob> for ObjectSummary {
    fn from(blob: &Blob) -> Self {
        Self {
            path: blob.key().to_string(),
            version: blob.version().to_string(),
            size: blob.size().unwrap_or(0),
            start_time: blob.start_time(),
            end_time: blob.end_time(),
            created: blob.created(),
            content_type: blob.content_type(),
            original_name: blob.original_name(),
            properties: blob.properties(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowseResponse {
    pub path: String,
    pub objects: Vec<ObjectSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subfolders: Option<BTreeMap<String, FolderStats>>,
}

/// `GET /browse`: every key.
pub async fn browse_root(
    state: State<AppState>,
    headers: HeaderMap,
) -> ServerResult<Json<BrowseResponse>> {
    browse(state, Path(String::new()), headers).await
}

/// `GET /browse/{path...}`: all matching versions, newest first.
pub async fn browse(
    State(state): State<AppState>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> ServerResult<Json<BrowseResponse>> {
    let request = ObjectRequest::parse(&path, &headers, false)?;
    let query = request.browse_query();
    let objects: Vec<ObjectSummary> = state
        .cache
        .find_all(&query)
        .iter()
        .map(|b| ObjectSummary::from(b.as_ref()))
        .collect();
    let subfolders = match query.path {
        PathPattern::Wildcard(_) => None,
        _ => Some(state.cache.subfolders(&request.key())),
    };
    debug!(path = %request.key(), found = objects.len(), "browse");
    Ok(Json(BrowseResponse {
        path: request.key(),
        objects,
        subfolders,
    }))
}

fn object_location(blob: &Blob) -> String {
    format!("/{}/{}/{}", blob.key(), blob.start_time(), blob.version())
}

fn etag(blob: &Blob) -> String {
    format!("\"{}\"", blob.version())
}

/// Headers describing a stored object.
fn object_headers(blob: &Blob) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in blob.properties() {
        if WITHHELD_PROPERTIES.iter().any(|w| w.eq_ignore_ascii_case(&name)) {
            continue;
        }
        match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(&value)) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => debug!(version = %blob.version(), property = %name, "property not representable as header"),
        }
    }

    let times = [
        (props::VALID_FROM, blob.start_time()),
        (props::VALID_UNTIL, blob.end_time()),
        (props::CREATED, blob.created()),
    ];
    for (name, value) in times {
        if let Ok(name) = HeaderName::from_bytes(name.as_bytes()) {
            headers.insert(name, HeaderValue::from(value));
        }
    }

    if !headers.contains_key(header::LAST_MODIFIED) {
        if let Some(value) = http_date(blob.created()).and_then(|d| HeaderValue::from_str(&d).ok()) {
            headers.insert(header::LAST_MODIFIED, value);
        }
    }

    let filename = blob.original_name().replace('"', "'");
    if let Ok(value) = HeaderValue::from_str(&format!("inline;filename=\"{filename}\"")) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    if let Ok(value) = HeaderValue::from_str(&blob.content_type()) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if let Ok(value) = HeaderValue::from_str(&etag(blob)) {
        headers.insert(header::ETAG, value);
    }
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    headers
}

/// RFC 7231 `IMF-fixdate` for a millisecond timestamp.
fn http_date(millis: u64) -> Option<String> {
    let millis = i64::try_from(millis).ok()?;
    let time = Utc.timestamp_millis_opt(millis).single()?;
    Some(time.format("%a, %d %b %Y %H:%M:%S GMT").to_string())
}

/// Full or partial response for a complete blob.
fn serve_blob(blob: &Blob, request_headers: &HeaderMap) -> ServerResult<Response> {
    let payload = blob.payload().ok_or(ServerError::NotFound)?;
    let size = payload.len() as u64;
    let mut headers = object_headers(blob);
    let range = request_headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok());

    match parse_range(range, size) {
        RangeSpec::Full => Ok((StatusCode::OK, headers, payload).into_response()),
        RangeSpec::Unsatisfiable => {
            debug!(version = %blob.version(), ?range, "unsatisfiable range");
            let value = header_value(format!("bytes */{size}"))?;
            Ok((StatusCode::RANGE_NOT_SATISFIABLE, [(header::CONTENT_RANGE, value)]).into_response())
        }
        RangeSpec::Ranges(ranges) if ranges.len() == 1 => {
            let (first, last) = ranges[0];
            headers.insert(
                header::CONTENT_RANGE,
                header_value(format!("bytes {first}-{last}/{size}"))?,
            );
            let body = payload.slice(first as usize..=last as usize);
            Ok((StatusCode::PARTIAL_CONTENT, headers, body).into_response())
        }
        RangeSpec::Ranges(ranges) => {
            let boundary = format!("THIS_STRING_SEPARATES_{}", Uuid::new_v4());
            let content_type = blob.content_type();
            let mut body = Vec::new();
            for (first, last) in ranges {
                body.extend_from_slice(
                    format!(
                        "\r\n--{boundary}\r\nContent-Type: {content_type}\r\nContent-Range: bytes {first}-{last}/{size}\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(&payload[first as usize..=last as usize]);
            }
            body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
            headers.insert(
                header::CONTENT_TYPE,
                header_value(format!("multipart/byteranges; boundary={boundary}"))?,
            );
            Ok((StatusCode::PARTIAL_CONTENT, headers, Bytes::from(body)).into_response())
        }
    }
}

fn header_value(value: String) -> ServerResult<HeaderValue> {
    HeaderValue::from_str(&value).map_err(|e| ServerError::Internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_dates() {
        assert_eq!(http_date(0).as_deref(), Some("Thu, 01 Jan 1970 00:00:00 GMT"));
        assert_eq!(
            http_date(1_700_000_000_000).as_deref(),
            Some("Tue, 14 Nov 2023 22:13:20 GMT")
        );
        assert_eq!(http_date(u64::MAX), None);
    }
}
