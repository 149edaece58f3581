//! Token Ledger API Library
//!
//! # Overview
//!
//! 사용자별 토큰 잔액을 관리하는 원장(ledger) 서비스.
//! 동시 요청에서도 갱신 손실, 중복 적용, 잔액/기록 불일치가 없도록 설계됨.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │        Billing / Reward workflows (외부 호출자)           │
//! └──────────────────────────┬──────────────────────────────┘
//!                            │ apply / balance / history
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │  ┌─────────┐   ┌──────────────┐   ┌──────────────────┐  │
//! │  │ Routes  │──▶│ TokenLedger  │──▶│   LedgerStore    │  │
//! │  └─────────┘   │ (retry loop) │   │ Postgres│Memory  │  │
//! │                └──────────────┘   └──────────────────┘  │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - `config`: 환경 설정 관리
//! - `error`: 에러 타입 및 처리
//! - `routes`: HTTP 엔드포인트 핸들러
//! - `services`: 비즈니스 로직 (TokenLedger)
//! - `db`: 데이터베이스 연동 (PostgreSQL, in-memory)
//! - `types`: 공통 타입 정의
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use token_ledger_api::{config::Config, db::Database, services::TokenLedger};
//! use token_ledger_api::types::{kinds, IdempotencyKey};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let db = Database::connect(&config.database_url, config.db_max_connections).await?;
//!     let ledger = TokenLedger::new(Arc::new(db), config.retry.clone());
//!
//!     let key = IdempotencyKey::new("generation-1234").map_err(anyhow::Error::msg)?;
//!     ledger.debit(42, 30, key, kinds::DEBIT_GENERATION).await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

pub mod config;
pub mod error;
pub mod routes;
pub mod services;
pub mod db;
pub mod types;

// Re-exports for convenience
pub use config::Config;
pub use error::{ApiError, LedgerError, StoreError};
pub use db::{Database, InMemoryLedgerStore, LedgerStore};
pub use services::TokenLedger;

/// 애플리케이션 전역 상태
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<TokenLedger>,
    pub config: Arc<Config>,
}
