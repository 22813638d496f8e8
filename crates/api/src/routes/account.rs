//! Account balance and ledger routes

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

use cirrus_storage::LedgerEntry;

use crate::auth::{AdminRole, CurrentAccount};
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    #[serde(with = "rust_decimal::serde::float")]
    pub balance: Decimal,
}

#[derive(Debug, Serialize)]
pub struct LedgerEntryResponse {
    pub id: Uuid,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub entry_type: String,
    pub description: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub balance_before: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub balance_after: Decimal,
    pub created_at: Option<String>,
}

impl From<LedgerEntry> for LedgerEntryResponse {
    fn from(e: LedgerEntry) -> Self {
        Self {
            id: e.id,
            amount: e.amount,
            entry_type: e.entry_type,
            description: e.description,
            balance_before: e.balance_before,
            balance_after: e.balance_after,
            created_at: e.created_at.format(&Rfc3339).ok(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LedgerQuery {
    pub limit: Option<i64>,
}

/// Manual-check top-up, applied by staff once the payment cleared.
#[derive(Debug, Deserialize)]
pub struct DepositRequest {
    pub account_id: Uuid,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub description: String,
}

#[derive(Debug, Serialize)]
pub struct LedgerAuditResponse {
    #[serde(with = "rust_decimal::serde::float")]
    pub replayed: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub stored: Decimal,
    pub consistent: bool,
}

pub async fn get_balance(
    State(state): State<AppState>,
    CurrentAccount(account_id): CurrentAccount,
) -> Result<Json<BalanceResponse>, ApiError> {
    let balance = state.storage.ledger.balance(account_id).await?;
    Ok(Json(BalanceResponse { balance }))
}

pub async fn list_ledger(
    State(state): State<AppState>,
    CurrentAccount(account_id): CurrentAccount,
    Query(query): Query<LedgerQuery>,
) -> Result<Json<Vec<LedgerEntryResponse>>, ApiError> {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let entries = state.storage.ledger.entries(account_id, limit).await?;
    Ok(Json(entries.into_iter().map(Into::into).collect()))
}

pub async fn deposit(
    State(state): State<AppState>,
    _admin: AdminRole,
    Json(req): Json<DepositRequest>,
) -> Result<(StatusCode, Json<LedgerEntryResponse>), ApiError> {
    if req.amount <= Decimal::ZERO {
        return Err(ApiError::BadRequest(
            "deposit amount must be positive".to_string(),
        ));
    }

    let entry = state
        .storage
        .ledger
        .deposit(req.account_id, req.amount, &req.description)
        .await?;

    Ok((StatusCode::CREATED, Json(entry.into())))
}

/// Staff consistency check: replaying the ledger must reproduce the stored
/// balance exactly.
pub async fn ledger_audit(
    State(state): State<AppState>,
    _admin: AdminRole,
    Path(account_id): Path<Uuid>,
) -> Result<Json<LedgerAuditResponse>, ApiError> {
    let (replayed, stored) = state.storage.ledger.replay_balance(account_id).await?;
    Ok(Json(LedgerAuditResponse {
        consistent: replayed == stored,
        replayed,
        stored,
    }))
}
