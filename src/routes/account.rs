//! Account Endpoints
//!
//! Thin internal boundary over the token ledger. Billing and reward workflows
//! call these to charge or credit tokens; every mutation carries the caller's
//! idempotency key so a timed-out request can be retried safely.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::{
    db::{Account, EntryStatus, LedgerEntry},
    error::ApiError,
    services::ApplyRequest,
    types::{IdempotencyKey, PageRequest},
    AppState,
};

// ============ Request/Response Types ============

/// 잔액 변경 요청
#[derive(Debug, Deserialize)]
pub struct ApplyEntryRequest {
    /// 양수 = credit, 음수 = debit
    pub amount: i64,
    /// 호출자가 생성한 유일 key (예: UUID)
    pub idempotency_key: String,
    /// 예: "debit:generation"
    pub kind: String,
    pub related_entity_type: Option<String>,
    pub related_entity_id: Option<String>,
    #[serde(default)]
    pub description: String,
}

/// 거래 기록 응답
#[derive(Debug, Serialize)]
pub struct EntryResponse {
    pub id: i64,
    pub idempotency_key: String,
    pub user_id: i64,
    pub amount: i64,
    pub balance_before: i64,
    pub balance_after: i64,
    pub kind: String,
    pub related_entity_type: Option<String>,
    pub related_entity_id: Option<String>,
    pub description: String,
    pub status: EntryStatus,
    pub created_at: String,
}

impl From<LedgerEntry> for EntryResponse {
    fn from(e: LedgerEntry) -> Self {
        Self {
            id: e.id,
            idempotency_key: e.idempotency_key,
            user_id: e.user_id,
            amount: e.amount,
            balance_before: e.balance_before,
            balance_after: e.balance_after,
            kind: e.kind,
            related_entity_type: e.related_entity_type,
            related_entity_id: e.related_entity_id,
            description: e.description,
            status: e.status,
            created_at: e.created_at.to_rfc3339(),
        }
    }
}

/// 계정 응답
#[derive(Debug, Serialize)]
pub struct AccountResponse {
    pub user_id: i64,
    pub balance: i64,
    pub version: i64,
    pub created_at: String,
    pub last_updated: String,
}

impl From<Account> for AccountResponse {
    fn from(a: Account) -> Self {
        Self {
            user_id: a.user_id,
            balance: a.balance,
            version: a.version,
            created_at: a.created_at.to_rfc3339(),
            last_updated: a.updated_at.to_rfc3339(),
        }
    }
}

/// 잔액 응답
#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub user_id: i64,
    pub balance: i64,
}

/// 히스토리 응답
#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub user_id: i64,
    pub entries: Vec<EntryResponse>,
    pub pagination: Pagination,
}

#[derive(Debug, Serialize)]
pub struct Pagination {
    pub offset: u64,
    pub limit: u32,
    pub total: u64,
    pub has_next: bool,
}

// ============ Handlers ============

/// POST /accounts/:user_id
///
/// 계정 사전 생성 (이미 있으면 현재 상태 반환)
pub async fn open_account(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<AccountResponse>, ApiError> {
    let account = state.ledger.open_account(user_id).await?;
    Ok(Json(account.into()))
}

/// GET /accounts/:user_id/balance
///
/// 표시용 스냅샷. 이 값을 보고 debit 여부를 결정하지 말 것 (Apply가 판단)
pub async fn get_balance(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let balance = state.ledger.get_balance(user_id).await?;
    Ok(Json(BalanceResponse { user_id, balance }))
}

/// POST /accounts/:user_id/entries
///
/// 토큰 credit/debit
///
/// # Request
///
/// ```json
/// {
///   "amount": -30,
///   "idempotency_key": "6f1c...",
///   "kind": "debit:generation",
///   "related_entity_type": "project",
///   "related_entity_id": "42"
/// }
/// ```
///
/// 같은 idempotency_key로 다시 보내면 처음 기록을 그대로 돌려줌
pub async fn apply_entry(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(req): Json<ApplyEntryRequest>,
) -> Result<Json<EntryResponse>, ApiError> {
    let key = IdempotencyKey::new(&req.idempotency_key).map_err(ApiError::BadRequest)?;

    let mut apply = ApplyRequest::new(user_id, req.amount, key, &req.kind)
        .with_description(&req.description);
    apply.related_entity_type = req.related_entity_type;
    apply.related_entity_id = req.related_entity_id;

    let entry = state.ledger.apply(apply).await?;
    Ok(Json(entry.into()))
}

/// GET /accounts/:user_id/entries?offset=0&limit=20
///
/// 히스토리 조회 (id 오름차순, 페이지네이션)
pub async fn get_history(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Query(page): Query<PageRequest>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let page = state.ledger.history_page(user_id, page).await?;
    let has_next = page.has_next();

    Ok(Json(HistoryResponse {
        user_id,
        pagination: Pagination {
            offset: page.offset,
            limit: page.limit,
            total: page.total,
            has_next,
        },
        entries: page.entries.into_iter().map(EntryResponse::from).collect(),
    }))
}

/// GET /accounts/:user_id/audit
///
/// 잔액/기록 체인 검증 결과
pub async fn audit_account(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<crate::services::AuditReport>, ApiError> {
    let report = state.ledger.audit(user_id).await?;
    Ok(Json(report))
}
