//! API Routes Module
//!
//! 모든 HTTP 엔드포인트 정의
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                      - 서버 상태 확인
//!
//! POST /accounts/:user_id           - 계정 사전 생성
//! GET  /accounts/:user_id/balance   - 잔액 조회
//! GET  /accounts/:user_id/entries   - 거래 히스토리 (?offset=&limit=)
//! POST /accounts/:user_id/entries   - 토큰 credit/debit (idempotent)
//! GET  /accounts/:user_id/audit     - 잔액/체인 검증
//! ```

pub mod account;
pub mod health;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::AppState;

/// 라우터 생성 (CORS는 바이너리에서 환경별로 추가)
pub fn router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))

        // Accounts
        .route("/accounts/:user_id", post(account::open_account))
        .route("/accounts/:user_id/balance", get(account::get_balance))
        .route(
            "/accounts/:user_id/entries",
            get(account::get_history).post(account::apply_entry),
        )
        .route("/accounts/:user_id/audit", get(account::audit_account))

        // 미들웨어
        .layer(TraceLayer::new_for_http())

        // 상태 주입
        .with_state(state)
}
