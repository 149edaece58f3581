//! Repository Pattern Implementation
//!
//! # Interview Q&A
//!
//! Q: 왜 ledger 저장소를 trait로 추상화했는가?
//! A: Apply 알고리즘과 저장소를 분리
//!
//!    - `TokenLedger`는 "읽기 → 계산 → 조건부 커밋 → 재시도"만 담당
//!    - 원자성(잔액 UPDATE + 기록 INSERT)은 저장소의 책임
//!    - PostgreSQL 구현: 트랜잭션 + `WHERE version = $n`
//!    - 메모리 구현: 테스트/임시 프로세스용
//!
//! Q: idempotency 중복은 어디서 막는가?
//! A: 저장소의 UNIQUE 제약
//!    - 애플리케이션 레벨 조회만으로는 "조회 → 삽입" 사이 경쟁을 못 막음
//!    - 커밋 시 제약 위반 → `CommitOutcome::DuplicateKey` → 기존 기록 반환

use async_trait::async_trait;

use super::models::{Account, BalanceWrite, CommitOutcome, LedgerEntry};
use crate::error::StoreError;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Ledger 저장소 인터페이스
///
/// 구현체는 `commit`을 반드시 하나의 원자적 단위로 처리해야 함:
/// 계정 변경과 거래 기록은 둘 다 반영되거나 둘 다 반영되지 않음
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// idempotency key로 기존 기록 조회
    async fn find_entry(&self, idempotency_key: &str) -> StoreResult<Option<LedgerEntry>>;

    async fn find_account(&self, user_id: i64) -> StoreResult<Option<Account>>;

    /// 계정이 없으면 balance 0, version 1로 생성. 있으면 그대로 반환
    async fn open_account(&self, user_id: i64) -> StoreResult<Account>;

    /// 조건부 잔액 쓰기 + 기록 삽입
    async fn commit(&self, write: BalanceWrite) -> StoreResult<CommitOutcome>;

    /// id 오름차순 히스토리
    async fn list_entries(
        &self,
        user_id: i64,
        offset: u64,
        limit: u32,
    ) -> StoreResult<Vec<LedgerEntry>>;

    async fn count_entries(&self, user_id: i64) -> StoreResult<i64>;

    async fn health_check(&self) -> StoreResult<()>;
}
