//! Storage bucket routes

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

use cirrus_storage::{
    AccessKey, CreateBucketParams, CreatedAccessKey, PresignMethod, StorageBucket,
    UpdateSettingsParams,
};

use crate::auth::CurrentAccount;
use crate::error::ApiError;
use crate::state::AppState;

/// Request to create a bucket
#[derive(Debug, Deserialize)]
pub struct CreateBucketRequest {
    pub name: String,
    pub plan: String,
    pub quota_gb: Option<i32>,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_storage_class")]
    pub storage_class: String,
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub versioning: bool,
}

fn default_region() -> String {
    "ru-1".to_string()
}

fn default_storage_class() -> String {
    "standard".to_string()
}

/// Settings patch; omitted fields keep their current values
#[derive(Debug, Default, Deserialize)]
pub struct UpdateBucketRequest {
    pub public: Option<bool>,
    pub versioning: Option<bool>,
    pub auto_renew: Option<bool>,
    pub storage_class: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteBucketQuery {
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Deserialize)]
pub struct PresignQuery {
    pub method: String,
    pub key: String,
    /// Seconds the URL stays valid; defaults to one hour.
    pub expiry: Option<u64>,
}

/// Bucket as serialized to the panel frontend. Monetary and byte-count
/// fields are plain JSON numbers; timestamps are RFC 3339 strings.
#[derive(Debug, Serialize)]
pub struct BucketResponse {
    pub id: Uuid,
    pub name: String,
    pub physical_name: String,
    pub plan: String,
    pub quota_gb: i32,
    pub region: String,
    pub storage_class: String,
    pub public: bool,
    pub versioning: bool,
    #[serde(with = "rust_decimal::serde::float")]
    pub monthly_price: Decimal,
    pub status: String,
    pub auto_renew: bool,
    pub last_billed_at: Option<String>,
    pub next_billing_at: Option<String>,
    pub used_bytes: i64,
    pub object_count: i64,
    pub usage_synced_at: Option<String>,
    pub created_at: Option<String>,
}

fn rfc3339(ts: OffsetDateTime) -> Option<String> {
    ts.format(&Rfc3339).ok()
}

impl From<StorageBucket> for BucketResponse {
    fn from(b: StorageBucket) -> Self {
        Self {
            id: b.id,
            physical_name: b.physical_name.clone(),
            quota_gb: b.quota_gb,
            public: b.is_public,
            versioning: b.versioning,
            monthly_price: b.monthly_price,
            auto_renew: b.auto_renew,
            last_billed_at: b.last_billed_at.and_then(rfc3339),
            next_billing_at: b.next_billing_at.and_then(rfc3339),
            used_bytes: b.used_bytes,
            object_count: b.object_count,
            usage_synced_at: b.usage_synced_at.and_then(rfc3339),
            created_at: rfc3339(b.created_at),
            name: b.name,
            plan: b.plan,
            region: b.region,
            storage_class: b.storage_class,
            status: b.status,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AccessKeyResponse {
    pub id: Uuid,
    pub access_key: String,
    pub label: Option<String>,
    pub created_at: Option<String>,
    pub last_used_at: Option<String>,
}

impl From<AccessKey> for AccessKeyResponse {
    fn from(k: AccessKey) -> Self {
        Self {
            id: k.id,
            access_key: k.access_key,
            label: k.label,
            created_at: rfc3339(k.created_at),
            last_used_at: k.last_used_at.and_then(rfc3339),
        }
    }
}

/// Creation response; the only time the secret is readable.
#[derive(Debug, Serialize)]
pub struct CreatedAccessKeyResponse {
    pub id: Uuid,
    pub access_key: String,
    pub secret_key: String,
    pub label: Option<String>,
    pub created_at: Option<String>,
}

impl From<CreatedAccessKey> for CreatedAccessKeyResponse {
    fn from(k: CreatedAccessKey) -> Self {
        Self {
            id: k.id,
            access_key: k.access_key,
            secret_key: k.secret_key,
            label: k.label,
            created_at: rfc3339(k.created_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PresignResponse {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct PlanResponse {
    pub code: &'static str,
    #[serde(with = "rust_decimal::serde::float")]
    pub monthly_price: Decimal,
    pub quota_gb: i32,
}

pub async fn list_plans(State(state): State<AppState>) -> Json<Vec<PlanResponse>> {
    let plans = state
        .storage
        .lifecycle
        .plans()
        .all()
        .iter()
        .map(|p| PlanResponse {
            code: p.code,
            monthly_price: p.monthly_price,
            quota_gb: p.quota_gb,
        })
        .collect();
    Json(plans)
}

pub async fn create_bucket(
    State(state): State<AppState>,
    CurrentAccount(account_id): CurrentAccount,
    Json(req): Json<CreateBucketRequest>,
) -> Result<(StatusCode, Json<BucketResponse>), ApiError> {
    let bucket = state
        .storage
        .lifecycle
        .create_bucket(
            account_id,
            CreateBucketParams {
                name: req.name,
                plan: req.plan,
                quota_gb: req.quota_gb,
                region: req.region,
                storage_class: req.storage_class,
                is_public: req.public,
                versioning: req.versioning,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(bucket.into())))
}

pub async fn list_buckets(
    State(state): State<AppState>,
    CurrentAccount(account_id): CurrentAccount,
) -> Result<Json<Vec<BucketResponse>>, ApiError> {
    let buckets = state.storage.lifecycle.list_buckets(account_id).await?;
    Ok(Json(buckets.into_iter().map(Into::into).collect()))
}

pub async fn get_bucket(
    State(state): State<AppState>,
    CurrentAccount(account_id): CurrentAccount,
    Path(bucket_id): Path<Uuid>,
) -> Result<Json<BucketResponse>, ApiError> {
    let bucket = state
        .storage
        .lifecycle
        .get_bucket(account_id, bucket_id)
        .await?;
    Ok(Json(bucket.into()))
}

pub async fn update_bucket(
    State(state): State<AppState>,
    CurrentAccount(account_id): CurrentAccount,
    Path(bucket_id): Path<Uuid>,
    Json(req): Json<UpdateBucketRequest>,
) -> Result<Json<BucketResponse>, ApiError> {
    let bucket = state
        .storage
        .lifecycle
        .update_settings(
            account_id,
            bucket_id,
            UpdateSettingsParams {
                is_public: req.public,
                versioning: req.versioning,
                auto_renew: req.auto_renew,
                storage_class: req.storage_class,
                name: req.name,
            },
        )
        .await?;
    Ok(Json(bucket.into()))
}

pub async fn delete_bucket(
    State(state): State<AppState>,
    CurrentAccount(account_id): CurrentAccount,
    Path(bucket_id): Path<Uuid>,
    Query(query): Query<DeleteBucketQuery>,
) -> Result<StatusCode, ApiError> {
    state
        .storage
        .lifecycle
        .delete_bucket(account_id, bucket_id, query.force)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Pay one month up front to lift a suspension.
pub async fn resume_bucket(
    State(state): State<AppState>,
    CurrentAccount(account_id): CurrentAccount,
    Path(bucket_id): Path<Uuid>,
) -> Result<Json<BucketResponse>, ApiError> {
    let bucket = state
        .storage
        .lifecycle
        .resume_bucket(account_id, bucket_id)
        .await?;
    Ok(Json(bucket.into()))
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateKeyRequest {
    pub label: Option<String>,
}

pub async fn create_access_key(
    State(state): State<AppState>,
    CurrentAccount(account_id): CurrentAccount,
    Path(bucket_id): Path<Uuid>,
    Json(req): Json<CreateKeyRequest>,
) -> Result<(StatusCode, Json<CreatedAccessKeyResponse>), ApiError> {
    let key = state
        .storage
        .access_keys
        .create(account_id, bucket_id, req.label.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(key.into())))
}

pub async fn list_access_keys(
    State(state): State<AppState>,
    CurrentAccount(account_id): CurrentAccount,
    Path(bucket_id): Path<Uuid>,
) -> Result<Json<Vec<AccessKeyResponse>>, ApiError> {
    let keys = state
        .storage
        .access_keys
        .list(account_id, bucket_id)
        .await?;
    Ok(Json(keys.into_iter().map(Into::into).collect()))
}

pub async fn delete_access_key(
    State(state): State<AppState>,
    CurrentAccount(account_id): CurrentAccount,
    Path((bucket_id, key_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    state
        .storage
        .access_keys
        .delete(account_id, bucket_id, key_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn presign_object(
    State(state): State<AppState>,
    CurrentAccount(account_id): CurrentAccount,
    Path(bucket_id): Path<Uuid>,
    Query(query): Query<PresignQuery>,
) -> Result<Json<PresignResponse>, ApiError> {
    let method = match query.method.to_ascii_uppercase().as_str() {
        "GET" => PresignMethod::Get,
        "PUT" => PresignMethod::Put,
        other => {
            return Err(ApiError::BadRequest(format!(
                "unsupported presign method `{other}`"
            )))
        }
    };

    let url = state
        .storage
        .access_keys
        .presign(
            account_id,
            bucket_id,
            method,
            &query.key,
            query.expiry.unwrap_or(3600),
        )
        .await?;

    Ok(Json(PresignResponse { url }))
}
