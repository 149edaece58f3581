//! Database Models
//!
//! Account balances (`user_tokens`) and the append-only transaction log
//! (`token_transactions`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// 사용자 토큰 계정
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct Account {
    pub user_id: i64,

    /// 현재 토큰 잔액 (debit 성공 후 절대 음수가 되지 않음)
    pub balance: i64,

    /// 낙관적 락 버전 (1부터 시작, 변경마다 +1)
    pub version: i64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// 아직 row가 없는 사용자의 가상 계정
    pub fn virtual_for(user_id: i64) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            balance: 0,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }
}

/// 거래 상태
///
/// Apply는 `Completed`만 기록함. 거절된 시도는 기록하지 않음
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Completed,
    Pending,
    Failed,
}

/// 거래 기록 (불변)
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct LedgerEntry {
    /// 저장소가 부여하는 순번 (사용자 히스토리 정렬 기준)
    pub id: i64,

    /// 호출자 제공 유일 key
    pub idempotency_key: String,

    pub user_id: i64,

    /// 양수 = credit, 음수 = debit
    pub amount: i64,

    pub balance_before: i64,
    pub balance_after: i64,

    /// 예: "debit:generation", "credit:referral"
    pub kind: String,

    /// 예: "project", "order"
    pub related_entity_type: Option<String>,
    pub related_entity_id: Option<String>,

    pub description: String,

    pub status: EntryStatus,

    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn is_completed(&self) -> bool {
        self.status == EntryStatus::Completed
    }
}

/// 새 거래 기록 (id/created_at은 저장소가 부여)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    pub idempotency_key: String,
    pub user_id: i64,
    pub amount: i64,
    pub balance_before: i64,
    pub balance_after: i64,
    pub kind: String,
    pub related_entity_type: Option<String>,
    pub related_entity_id: Option<String>,
    pub description: String,
}

/// 조건부 잔액 쓰기 + 거래 기록 삽입 (하나의 원자적 단위)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceWrite {
    /// `Some(v)`: version이 v일 때만 UPDATE
    /// `None`: 계정이 없었음 → version 1로 INSERT
    pub expected_version: Option<i64>,
    pub entry: NewEntry,
}

/// 커밋 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// 잔액 변경과 기록이 함께 커밋됨
    Applied(LedgerEntry),
    /// 다른 writer가 먼저 version을 바꿈 → 아무것도 쓰지 않음
    VersionConflict,
    /// 같은 idempotency key가 이미 커밋됨 → 아무것도 쓰지 않음
    DuplicateKey,
}
