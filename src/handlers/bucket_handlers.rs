//! HTTP handlers for bucket operations.

use crate::{errors::AppError, models::bucket::Bucket, services::StorageService};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Serialize;

#[derive(Serialize)]
pub struct CreateBucketResponse {
    status: &'static str,
}

/// `PUT /buckets/{name}`: create a bucket. Repeating the call is harmless
/// and keeps the original creation time.
pub async fn create_bucket(
    State(service): State<StorageService>,
    Path(name): Path<String>,
) -> Result<(StatusCode, Json<CreateBucketResponse>), AppError> {
    service.create_bucket(&name).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateBucketResponse {
            status: "bucket created",
        }),
    ))
}

/// `GET /buckets`: list buckets sorted by name.
pub async fn list_buckets(
    State(service): State<StorageService>,
) -> Result<Json<Vec<Bucket>>, AppError> {
    let listing = service.list_buckets().await?;
    Ok(Json(listing.entries))
}
