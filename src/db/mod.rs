//! Database Module
//!
//! # Interview Q&A
//!
//! Q: 왜 PostgreSQL을 선택했는가?
//! A: 토큰 원장에 적합한 이유
//!
//!    1. ACID 트랜잭션: 잔액 UPDATE + 기록 INSERT를 하나로 커밋
//!    2. UNIQUE 제약: idempotency key 중복을 DB가 직접 차단
//!    3. 조건부 UPDATE: `WHERE version = $n` 으로 낙관적 락 구현
//!    4. 인덱싱: 사용자별 히스토리 조회 최적화
//!
//! Q: 비관적 락(SELECT ... FOR UPDATE)을 쓰지 않은 이유는?
//! A: 인기 계정에서 head-of-line blocking 발생
//!    - 낙관적 락: 읽을 때 락 없음, 쓸 때 version 비교
//!    - 충돌 시 0 rows affected → 짧은 backoff 후 재시도
//!    - 락을 재시도 루프 동안 잡고 있지 않음
//!
//! Q: 커넥션 풀은 어떻게 관리하는가?
//! A: SQLx의 PgPool 사용
//!    - 최소/최대 커넥션 수 설정
//!    - 커넥션 재사용 (오버헤드 감소)
//!    - 타임아웃 처리

mod memory;
mod models;
mod repository;

pub use memory::InMemoryLedgerStore;
pub use models::*;
pub use repository::{LedgerStore, StoreResult};

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};

/// 거래 기록 SELECT 컬럼 (LedgerEntry 필드 순서)
const ENTRY_COLUMNS: &str = r#"
    id,
    idempotency_key,
    user_id,
    amount,
    balance_before,
    balance_after,
    kind,
    related_entity_type,
    related_entity_id,
    description,
    status,
    created_at
"#;

/// 데이터베이스 연결 및 쿼리 담당
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// 데이터베이스 연결
    ///
    /// # Connection Pool Settings
    ///
    /// - max_connections: 설정값 (기본 10)
    /// - min_connections: 1 (idle 시 최소 유지)
    /// - acquire_timeout: 3초 (커넥션 획득 대기)
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(1)
            .acquire_timeout(std::time::Duration::from_secs(3))
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    /// 마이그레이션 실행
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for Database {
    async fn find_entry(&self, idempotency_key: &str) -> StoreResult<Option<LedgerEntry>> {
        let entry = sqlx::query_as::<_, LedgerEntry>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM token_transactions WHERE idempotency_key = $1"
        ))
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(entry)
    }

    async fn find_account(&self, user_id: i64) -> StoreResult<Option<Account>> {
        let account = sqlx::query_as::<_, Account>(
            r#"
            SELECT user_id, balance, version, created_at, updated_at
            FROM user_tokens
            WHERE user_id = $1
            "#
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(account)
    }

    async fn open_account(&self, user_id: i64) -> StoreResult<Account> {
        // 이미 있으면 아무것도 바꾸지 않음
        sqlx::query(
            r#"
            INSERT INTO user_tokens (user_id, balance, version, created_at, updated_at)
            VALUES ($1, 0, 1, NOW(), NOW())
            ON CONFLICT (user_id) DO NOTHING
            "#
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        let account = sqlx::query_as::<_, Account>(
            r#"
            SELECT user_id, balance, version, created_at, updated_at
            FROM user_tokens
            WHERE user_id = $1
            "#
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(account)
    }

    /// 조건부 잔액 쓰기 + 기록 삽입
    ///
    /// # Transaction
    ///
    /// ```text
    /// BEGIN
    ///   UPDATE user_tokens ... WHERE user_id = $u AND version = $v   (없던 계정: INSERT ... ON CONFLICT DO NOTHING)
    ///   0 rows → ROLLBACK, VersionConflict
    ///   INSERT INTO token_transactions ... ON CONFLICT (idempotency_key) DO NOTHING RETURNING ...
    ///   0 rows → ROLLBACK, DuplicateKey
    /// COMMIT
    /// ```
    async fn commit(&self, write: BalanceWrite) -> StoreResult<CommitOutcome> {
        let entry = write.entry;
        let mut tx = self.pool.begin().await?;

        let rows = match write.expected_version {
            Some(version) => {
                sqlx::query(
                    r#"
                    UPDATE user_tokens
                    SET balance = $1, version = version + 1, updated_at = NOW()
                    WHERE user_id = $2 AND version = $3
                    "#
                )
                .bind(entry.balance_after)
                .bind(entry.user_id)
                .bind(version)
                .execute(&mut *tx)
                .await?
                .rows_affected()
            }
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO user_tokens (user_id, balance, version, created_at, updated_at)
                    VALUES ($1, $2, 1, NOW(), NOW())
                    ON CONFLICT (user_id) DO NOTHING
                    "#
                )
                .bind(entry.user_id)
                .bind(entry.balance_after)
                .execute(&mut *tx)
                .await?
                .rows_affected()
            }
        };

        if rows == 0 {
            tx.rollback().await?;
            return Ok(CommitOutcome::VersionConflict);
        }

        // 동시에 같은 key를 커밋하는 트랜잭션이 있으면 그쪽 결과를 기다린 뒤 DO NOTHING
        let inserted = sqlx::query_as::<_, LedgerEntry>(&format!(
            r#"
            INSERT INTO token_transactions (
                idempotency_key, user_id, amount, balance_before, balance_after,
                kind, related_entity_type, related_entity_id, description, status, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW())
            ON CONFLICT (idempotency_key) DO NOTHING
            RETURNING {ENTRY_COLUMNS}
            "#
        ))
        .bind(&entry.idempotency_key)
        .bind(entry.user_id)
        .bind(entry.amount)
        .bind(entry.balance_before)
        .bind(entry.balance_after)
        .bind(&entry.kind)
        .bind(&entry.related_entity_type)
        .bind(&entry.related_entity_id)
        .bind(&entry.description)
        .bind(EntryStatus::Completed)
        .fetch_optional(&mut *tx)
        .await?;

        match inserted {
            Some(stored) => {
                tx.commit().await?;
                Ok(CommitOutcome::Applied(stored))
            }
            None => {
                tx.rollback().await?;
                Ok(CommitOutcome::DuplicateKey)
            }
        }
    }

    async fn list_entries(
        &self,
        user_id: i64,
        offset: u64,
        limit: u32,
    ) -> StoreResult<Vec<LedgerEntry>> {
        let entries = sqlx::query_as::<_, LedgerEntry>(&format!(
            r#"
            SELECT {ENTRY_COLUMNS}
            FROM token_transactions
            WHERE user_id = $1
            ORDER BY id ASC
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(user_id)
        .bind(limit as i64)
        .bind(i64::try_from(offset).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    async fn count_entries(&self, user_id: i64) -> StoreResult<i64> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM token_transactions WHERE user_id = $1"
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count.0)
    }

    /// Health check
    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
