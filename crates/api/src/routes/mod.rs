//! Route table

pub mod account;
pub mod storage_buckets;

use axum::routing::{get, post};
use axum::{Json, Router};

use crate::state::AppState;

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        // Storage product
        .route("/storage/plans", get(storage_buckets::list_plans))
        .route(
            "/storage/buckets",
            post(storage_buckets::create_bucket).get(storage_buckets::list_buckets),
        )
        .route(
            "/storage/buckets/{bucket_id}",
            get(storage_buckets::get_bucket)
                .patch(storage_buckets::update_bucket)
                .delete(storage_buckets::delete_bucket),
        )
        .route(
            "/storage/buckets/{bucket_id}/resume",
            post(storage_buckets::resume_bucket),
        )
        .route(
            "/storage/buckets/{bucket_id}/keys",
            post(storage_buckets::create_access_key).get(storage_buckets::list_access_keys),
        )
        .route(
            "/storage/buckets/{bucket_id}/keys/{key_id}",
            axum::routing::delete(storage_buckets::delete_access_key),
        )
        .route(
            "/storage/buckets/{bucket_id}/presign",
            get(storage_buckets::presign_object),
        )
        // Account balance / ledger
        .route("/account/balance", get(account::get_balance))
        .route("/account/ledger", get(account::list_ledger))
        .route("/account/deposit", post(account::deposit))
        .route(
            "/admin/accounts/{account_id}/ledger-audit",
            get(account::ledger_audit),
        );

    Router::new()
        .route("/healthz", get(healthz))
        .nest("/api/v1", api)
        .with_state(state)
}
