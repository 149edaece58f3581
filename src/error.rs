//! Error Handling Module
//!
//! Provides type-safe error handling with proper HTTP status code mapping.
//! Uses thiserror for domain errors and integrates with tracing for structured logging.
//!
//! # Layers
//!
//! ```text
//! StoreError   (db)       sqlx / 저장소 장애
//!     │
//!     ▼
//! LedgerError  (services) 잔액 부족, 버전 충돌, 잘못된 요청
//!     │
//!     ▼
//! ApiError     (routes)   HTTP 상태 코드 매핑
//! ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// 저장소 레벨 에러
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Ledger 도메인 에러
///
/// 호출자(billing flow)가 잔액 부족과 재시도 가능한 충돌을 구분할 수 있어야 함
/// - `InsufficientBalance`: 구매 거절
/// - `ConcurrencyConflict`: 같은 idempotency key로 재시도
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("invalid ledger request: {0}")]
    InvalidRequest(String),

    #[error(
        "insufficient balance for user {user_id}: balance {balance}, amount {amount} (key {idempotency_key})"
    )]
    InsufficientBalance {
        user_id: i64,
        balance: i64,
        amount: i64,
        idempotency_key: String,
    },

    #[error(
        "concurrency conflict for user {user_id} after {attempts} attempts: amount {amount} (key {idempotency_key})"
    )]
    ConcurrencyConflict {
        user_id: i64,
        amount: i64,
        idempotency_key: String,
        attempts: u32,
    },

    #[error("storage failure: {0}")]
    StorageFailure(#[from] StoreError),
}

impl LedgerError {
    /// 같은 idempotency key로 재시도해도 되는 에러인지
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::ConcurrencyConflict { .. })
    }
}

/// API 에러 타입
///
/// # Design Decision
///
/// 각 에러 variant는 적절한 HTTP 상태 코드에 매핑됨
/// - 클라이언트 에러: 4xx (잘못된 요청, 잔액 부족, 충돌)
/// - 서버 에러: 5xx (내부 오류)
///
/// 민감한 내부 정보는 클라이언트에 노출하지 않음
#[derive(Debug, Error)]
pub enum ApiError {
    // ============ 400 Bad Request ============
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Validation failed: {0}")]
    ValidationError(String),

    // ============ 409 Conflict ============
    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    // ============ 422 Unprocessable Entity ============
    #[error("Insufficient balance: {0}")]
    InsufficientBalance(String),

    // ============ 500 Internal Server Error ============
    #[error("Database error: {0}")]
    DatabaseError(String),
}

/// API 에러 응답 구조
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    /// 같은 요청을 그대로 재시도해도 되는지
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            // 4xx 클라이언트 에러
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                "BAD_REQUEST",
                msg.clone(),
                None,
            ),
            ApiError::ValidationError(msg) => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                "Validation failed".to_string(),
                Some(msg.clone()),
            ),
            ApiError::ConcurrencyConflict(msg) => (
                StatusCode::CONFLICT,
                "CONCURRENCY_CONFLICT",
                "Account is busy, retry with the same idempotency key".to_string(),
                Some(msg.clone()),
            ),
            ApiError::InsufficientBalance(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "INSUFFICIENT_BALANCE",
                "Insufficient token balance".to_string(),
                Some(msg.clone()),
            ),

            // 5xx 서버 에러
            ApiError::DatabaseError(_) => {
                // 내부 에러는 클라이언트에 상세 정보 노출 안 함
                tracing::error!("Database error: {:?}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "Database error occurred".to_string(),
                    None,
                )
            }
        };

        let body = ErrorResponse {
            error: message,
            code: code.to_string(),
            retryable: matches!(self, ApiError::ConcurrencyConflict(_)),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// LedgerError를 ApiError로 변환
impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InvalidRequest(msg) => ApiError::ValidationError(msg),
            e @ LedgerError::InsufficientBalance { .. } => {
                ApiError::InsufficientBalance(e.to_string())
            }
            e @ LedgerError::ConcurrencyConflict { .. } => {
                tracing::warn!("Ledger contention surfaced to caller: {}", e);
                ApiError::ConcurrencyConflict(e.to_string())
            }
            LedgerError::StorageFailure(e) => ApiError::DatabaseError(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conflict() -> LedgerError {
        LedgerError::ConcurrencyConflict {
            user_id: 7,
            amount: -10,
            idempotency_key: "k".to_string(),
            attempts: 8,
        }
    }

    #[test]
    fn test_only_conflict_is_retryable() {
        assert!(conflict().is_retryable());

        let insufficient = LedgerError::InsufficientBalance {
            user_id: 7,
            balance: 5,
            amount: -10,
            idempotency_key: "k".to_string(),
        };
        assert!(!insufficient.is_retryable());
        assert!(!LedgerError::InvalidRequest("x".into()).is_retryable());
        assert!(!LedgerError::StorageFailure(StoreError::Unavailable("down".into())).is_retryable());
    }

    #[test]
    fn test_error_message_carries_context() {
        let msg = conflict().to_string();
        assert!(msg.contains("user 7"));
        assert!(msg.contains("key k"));
        assert!(msg.contains("8 attempts"));
    }

    #[test]
    fn test_status_mapping() {
        let resp = ApiError::from(conflict()).into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let resp = ApiError::from(LedgerError::InsufficientBalance {
            user_id: 1,
            balance: 0,
            amount: -1,
            idempotency_key: "k".into(),
        })
        .into_response();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let resp = ApiError::from(LedgerError::InvalidRequest("amount".into())).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = ApiError::from(LedgerError::StorageFailure(StoreError::Unavailable(
            "down".into(),
        )))
        .into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
