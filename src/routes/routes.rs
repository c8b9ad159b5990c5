//! Defines routes for all bucket and object operations.
//!
//! ## Structure
//! - **Bucket-level endpoints**
//!   - `GET    /buckets`        - list buckets
//!   - `PUT    /buckets/{name}` - create bucket
//!
//! - **Object-level endpoints**
//!   - `GET    /objects/{bucket}`        - list objects in a bucket
//!   - `PUT    /objects/{bucket}/{*key}` - upload object
//!   - `GET    /objects/{bucket}/{*key}` - download object
//!   - `HEAD   /objects/{bucket}/{*key}` - retrieve metadata only
//!   - `DELETE /objects/{bucket}/{*key}` - delete object
//!
//! The wildcard `*key` allows nested keys like `photos/2025/img.jpg`.

use crate::{
    handlers::{
        bucket_handlers::{create_bucket, list_buckets},
        health_handlers::{healthz, readyz},
        object_handlers::{delete_object, get_object, head_object, list_objects, upload_object},
    },
    services::StorageService,
};
use axum::{
    Router,
    routing::{get, put},
};

/// Build and return the router for all routes.
///
/// The router carries shared state (`StorageService`) to all handlers.
pub fn routes() -> Router<StorageService> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Bucket-level routes
        .route("/buckets", get(list_buckets))
        .route("/buckets/{name}", put(create_bucket))
        // Object-level routes
        .route("/objects/{bucket}", get(list_objects))
        .route(
            "/objects/{bucket}/{*key}",
            put(upload_object)
                .get(get_object)
                .head(head_object)
                .delete(delete_object),
        )
}

/// The complete application: routes bound to a storage service.
pub fn app(service: StorageService) -> Router {
    routes().with_state(service)
}
