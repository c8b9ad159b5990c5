//! HTTP handlers for object operations.
//! Streams object bodies in both directions to avoid buffering in memory and
//! delegates storage concerns to `StorageService`.

use crate::{
    errors::AppError,
    models::object::{DEFAULT_CONTENT_TYPE, ObjectMetadata},
    services::StorageService,
};
use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use std::io;
use tokio_util::io::ReaderStream;

/// RFC 7231 IMF-fixdate, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`.
const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// `PUT /objects/{bucket}/{*key}`: upload (or replace) an object.
pub async fn upload_object(
    State(service): State<StorageService>,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());

    let stream = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(io::Error::other));

    let object = service
        .put_object(&bucket, &key, content_type, stream)
        .await?;

    let mut response = Json(&object).into_response();
    if let Ok(value) = HeaderValue::from_str(&object.etag) {
        response.headers_mut().insert(header::ETAG, value);
    }
    Ok(response)
}

/// `GET /objects/{bucket}/{*key}`: download an object as a streaming response.
pub async fn get_object(
    State(service): State<StorageService>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let (meta, file) = service.get_object(&bucket, &key).await?;
    let body = Body::from_stream(ReaderStream::new(file));

    let mut response = Response::new(body);
    set_object_headers(response.headers_mut(), &meta);
    Ok(response)
}

/// `HEAD /objects/{bucket}/{*key}`: same headers as GET but no body.
pub async fn head_object(
    State(service): State<StorageService>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let meta = service.head_object(&bucket, &key).await?;

    let mut response = Response::new(Body::empty());
    set_object_headers(response.headers_mut(), &meta);
    Ok(response)
}

/// `DELETE /objects/{bucket}/{*key}`: remove an object. Idempotent.
pub async fn delete_object(
    State(service): State<StorageService>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    service.delete_object(&bucket, &key).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /objects/{bucket}`: list every object in a bucket as JSON.
pub async fn list_objects(
    State(service): State<StorageService>,
    Path(bucket): Path<String>,
) -> Result<Json<Vec<ObjectMetadata>>, AppError> {
    let listing = service.list_objects(&bucket).await?;
    Ok(Json(listing.entries))
}

fn set_object_headers(headers: &mut HeaderMap, meta: &ObjectMetadata) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&meta.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_CONTENT_TYPE)),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(meta.size));

    if let Ok(value) = HeaderValue::from_str(&meta.etag) {
        headers.insert(header::ETAG, value);
    }

    let last_modified = meta.last_modified.format(HTTP_DATE_FORMAT).to_string();
    if let Ok(value) = HeaderValue::from_str(&last_modified) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}
