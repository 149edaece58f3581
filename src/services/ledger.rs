//! Token Ledger Service
//!
//! # Interview Q&A
//!
//! Q: Apply 알고리즘은 어떻게 동작하는가?
//! A: idempotency 조회 → 낙관적 락 루프
//!
//!    ```text
//!    find_entry(key) ── 있음 ──▶ 기존 기록 반환 (replay)
//!          │ 없음
//!          ▼
//!    ┌─▶ 1. 계정 읽기 (없으면 balance 0, version 1)
//!    │   2. new_balance = balance + amount  (debit이 음수 만들면 InsufficientBalance)
//!    │   3. 조건부 쓰기 + 기록 삽입 (한 트랜잭션)
//!    │   4. VersionConflict ──▶ backoff 후 1로
//!    └───────────┘
//!        DuplicateKey ──▶ 먼저 커밋된 기록 반환
//!    ```
//!
//! Q: 재시도 횟수를 제한하는 이유는?
//! A: 인기 계정에서 경합 폭주(contention storm) 방지
//!    - 기본 8회, 1ms → 20ms exponential backoff + jitter
//!    - 초과 시 ConcurrencyConflict (호출자가 같은 key로 재시도)
//!
//! Q: 호출자가 타임아웃으로 요청을 포기하면?
//! A: 커밋은 원자적이므로 "전부 반영" 또는 "전혀 반영 안 됨"
//!    - 같은 key로 다시 호출하면 idempotency 조회가 결과를 알려줌

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use serde::Serialize;

use crate::config::RetryConfig;
use crate::db::{
    Account, BalanceWrite, CommitOutcome, LedgerEntry, LedgerStore, NewEntry,
};
use crate::error::LedgerError;
use crate::types::{
    IdempotencyKey, PageRequest, MAX_KIND_LEN, MAX_RELATED_ID_LEN,
};

pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

/// Apply 요청
#[derive(Debug, Clone)]
pub struct ApplyRequest {
    pub user_id: i64,
    /// 양수 = credit, 음수 = debit, 0 불가
    pub amount: i64,
    pub idempotency_key: IdempotencyKey,
    pub kind: String,
    pub related_entity_type: Option<String>,
    pub related_entity_id: Option<String>,
    pub description: String,
}

impl ApplyRequest {
    pub fn new(user_id: i64, amount: i64, idempotency_key: IdempotencyKey, kind: &str) -> Self {
        Self {
            user_id,
            amount,
            idempotency_key,
            kind: kind.to_string(),
            related_entity_type: None,
            related_entity_id: None,
            description: String::new(),
        }
    }

    /// 원인 비즈니스 객체 (예: "project", "42")
    pub fn related_to(mut self, entity_type: &str, entity_id: &str) -> Self {
        self.related_entity_type = Some(entity_type.to_string());
        self.related_entity_id = Some(entity_id.to_string());
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    fn validate(&self) -> LedgerResult<()> {
        if self.amount == 0 {
            return Err(LedgerError::InvalidRequest("amount must not be zero".to_string()));
        }
        if self.kind.trim().is_empty() {
            return Err(LedgerError::InvalidRequest("kind must not be empty".to_string()));
        }
        if self.kind.chars().count() > MAX_KIND_LEN {
            return Err(LedgerError::InvalidRequest(format!(
                "kind must be at most {MAX_KIND_LEN} characters"
            )));
        }
        if let Some(entity_type) = &self.related_entity_type {
            if entity_type.chars().count() > MAX_KIND_LEN {
                return Err(LedgerError::InvalidRequest(format!(
                    "related_entity_type must be at most {MAX_KIND_LEN} characters"
                )));
            }
        }
        if let Some(entity_id) = &self.related_entity_id {
            if entity_id.chars().count() > MAX_RELATED_ID_LEN {
                return Err(LedgerError::InvalidRequest(format!(
                    "related_entity_id must be at most {MAX_RELATED_ID_LEN} characters"
                )));
            }
        }
        Ok(())
    }
}

/// 히스토리 페이지 + 전체 개수
#[derive(Debug, Clone, Serialize)]
pub struct HistoryPage {
    pub entries: Vec<LedgerEntry>,
    pub total: u64,
    pub offset: u64,
    pub limit: u32,
}

impl HistoryPage {
    pub fn has_next(&self) -> bool {
        self.offset.saturating_add(self.entries.len() as u64) < self.total
    }
}

/// 읽기 전용 감사 결과
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    pub user_id: i64,
    pub balance: i64,
    pub entry_count: u64,
    pub last_balance_after: Option<i64>,
    /// (앞 entry id, 뒤 entry id): `prev.balance_after != next.balance_before`
    pub chain_breaks: Vec<(i64, i64)>,
    /// `balance_after != balance_before + amount` 인 entry id
    pub arithmetic_violations: Vec<i64>,
    pub balance_matches: bool,
}

impl AuditReport {
    pub fn is_consistent(&self) -> bool {
        self.chain_breaks.is_empty() && self.arithmetic_violations.is_empty() && self.balance_matches
    }
}

/// 토큰 원장
///
/// 같은 계정에 대한 모든 잔액 변경을 직렬화:
/// - 갱신 손실 없음 (version 비교)
/// - 중복 적용 없음 (idempotency key)
/// - 잔액/기록 불일치 없음 (원자적 커밋)
pub struct TokenLedger {
    store: Arc<dyn LedgerStore>,
    retry: RetryConfig,
    history_max_limit: u32,
}

impl TokenLedger {
    /// 감사 시 한 번에 읽는 entry 수
    const AUDIT_BATCH: u32 = 500;

    pub fn new(store: Arc<dyn LedgerStore>, retry: RetryConfig) -> Self {
        Self {
            store,
            retry,
            history_max_limit: 100,
        }
    }

    pub fn with_history_max_limit(mut self, max_limit: u32) -> Self {
        self.history_max_limit = max_limit;
        self
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// 토큰 잔액 변경 (credit 또는 debit)
    ///
    /// # Errors
    ///
    /// - `InvalidRequest`: amount 0, kind 누락 등 (아무것도 쓰지 않음)
    /// - `InsufficientBalance`: debit 후 잔액이 음수 (재시도해도 결과 동일할 수 있음)
    /// - `ConcurrencyConflict`: 재시도 한도 초과 (같은 key로 재시도 가능)
    /// - `StorageFailure`: 저장소 장애
    pub async fn apply(&self, req: ApplyRequest) -> LedgerResult<LedgerEntry> {
        req.validate()?;

        if let Some(existing) = self.store.find_entry(req.idempotency_key.as_str()).await? {
            return Ok(Self::replay(&req, existing));
        }

        let attempts = AtomicU32::new(0);
        let result = (|| async {
            let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
            self.try_apply(&req, attempt).await
        })
        .retry(self.backoff())
        .when(|e: &LedgerError| e.is_retryable())
        .notify(|err: &LedgerError, delay: Duration| {
            tracing::debug!(
                user_id = req.user_id,
                idempotency_key = %req.idempotency_key,
                delay = ?delay,
                "Version conflict, retrying: {}",
                err
            );
        })
        .await;

        match &result {
            Ok(entry) => tracing::info!(
                user_id = entry.user_id,
                entry_id = entry.id,
                amount = entry.amount,
                balance_after = entry.balance_after,
                kind = %entry.kind,
                "Ledger entry applied"
            ),
            Err(e) if e.is_retryable() => tracing::warn!("Apply gave up: {}", e),
            Err(LedgerError::StorageFailure(e)) => tracing::error!(
                user_id = req.user_id,
                amount = req.amount,
                idempotency_key = %req.idempotency_key,
                "Ledger storage failure: {}",
                e
            ),
            Err(_) => {}
        }

        result
    }

    /// 양수 토큰 적립
    pub async fn credit(
        &self,
        user_id: i64,
        tokens: i64,
        idempotency_key: IdempotencyKey,
        kind: &str,
    ) -> LedgerResult<LedgerEntry> {
        if tokens <= 0 {
            return Err(LedgerError::InvalidRequest(
                "credit amount must be positive".to_string(),
            ));
        }
        self.apply(ApplyRequest::new(user_id, tokens, idempotency_key, kind)).await
    }

    /// 양수 토큰 차감 (내부적으로 음수 amount)
    pub async fn debit(
        &self,
        user_id: i64,
        tokens: i64,
        idempotency_key: IdempotencyKey,
        kind: &str,
    ) -> LedgerResult<LedgerEntry> {
        if tokens <= 0 {
            return Err(LedgerError::InvalidRequest(
                "debit amount must be positive".to_string(),
            ));
        }
        self.apply(ApplyRequest::new(user_id, -tokens, idempotency_key, kind)).await
    }

    /// 현재 잔액 (표시용 스냅샷, 계정 없으면 0)
    pub async fn get_balance(&self, user_id: i64) -> LedgerResult<i64> {
        let account = self.store.find_account(user_id).await?;
        Ok(account.map(|a| a.balance).unwrap_or(0))
    }

    /// id 오름차순 히스토리
    pub async fn get_history(
        &self,
        user_id: i64,
        page: PageRequest,
    ) -> LedgerResult<Vec<LedgerEntry>> {
        let page = page.clamped(self.history_max_limit);
        if page.limit == 0 {
            return Ok(Vec::new());
        }
        let entries = self.store.list_entries(user_id, page.offset, page.limit).await?;
        Ok(entries)
    }

    /// 히스토리 + 전체 개수 (페이지네이션 응답용)
    pub async fn history_page(&self, user_id: i64, page: PageRequest) -> LedgerResult<HistoryPage> {
        let page = page.clamped(self.history_max_limit);
        let entries = self.get_history(user_id, page).await?;
        let total = self.store.count_entries(user_id).await?;

        Ok(HistoryPage {
            entries,
            total: total.max(0) as u64,
            offset: page.offset,
            limit: page.limit,
        })
    }

    /// 계정 사전 생성 (이미 있으면 그대로 반환)
    pub async fn open_account(&self, user_id: i64) -> LedgerResult<Account> {
        let account = self.store.open_account(user_id).await?;
        tracing::info!(user_id, balance = account.balance, version = account.version, "Account opened");
        Ok(account)
    }

    /// 잔액과 기록 체인 검증 (읽기 전용)
    ///
    /// 동시 Apply와 겹치면 잔액 불일치가 일시적으로 보일 수 있음
    pub async fn audit(&self, user_id: i64) -> LedgerResult<AuditReport> {
        let balance = self.get_balance(user_id).await?;

        let mut entry_count = 0u64;
        let mut last: Option<LedgerEntry> = None;
        let mut chain_breaks = Vec::new();
        let mut arithmetic_violations = Vec::new();
        let mut offset = 0u64;

        loop {
            let batch = self
                .store
                .list_entries(user_id, offset, Self::AUDIT_BATCH)
                .await?;
            let fetched = batch.len() as u64;

            for entry in batch.into_iter().filter(LedgerEntry::is_completed) {
                entry_count += 1;
                if entry.balance_before.checked_add(entry.amount) != Some(entry.balance_after) {
                    arithmetic_violations.push(entry.id);
                }
                if let Some(prev) = &last {
                    if prev.balance_after != entry.balance_before {
                        chain_breaks.push((prev.id, entry.id));
                    }
                }
                last = Some(entry);
            }

            if fetched < Self::AUDIT_BATCH as u64 {
                break;
            }
            offset += fetched;
        }

        let last_balance_after = last.map(|e| e.balance_after);
        let report = AuditReport {
            user_id,
            balance,
            entry_count,
            last_balance_after,
            chain_breaks,
            arithmetic_violations,
            balance_matches: last_balance_after.unwrap_or(0) == balance,
        };

        if !report.is_consistent() {
            tracing::error!(user_id, ?report, "Ledger audit found inconsistencies");
        }

        Ok(report)
    }

    pub async fn health_check(&self) -> LedgerResult<()> {
        self.store.health_check().await?;
        Ok(())
    }

    /// 한 번의 시도: 읽기 → 계산 → 조건부 커밋
    async fn try_apply(&self, req: &ApplyRequest, attempt: u32) -> LedgerResult<LedgerEntry> {
        // 재시도 사이에 같은 key의 다른 Apply가 커밋했을 수 있음
        if attempt > 1 {
            if let Some(existing) = self.store.find_entry(req.idempotency_key.as_str()).await? {
                return Ok(Self::replay(req, existing));
            }
        }

        let current = self.store.find_account(req.user_id).await?;
        let (balance, expected_version) = match &current {
            Some(account) => (account.balance, Some(account.version)),
            None => (0, None),
        };

        let Some(new_balance) = balance.checked_add(req.amount) else {
            return self
                .reject_unless_applied(
                    req,
                    LedgerError::InvalidRequest(format!(
                        "balance overflow for user {}: {} + {}",
                        req.user_id, balance, req.amount
                    )),
                )
                .await;
        };

        if req.amount < 0 && new_balance < 0 {
            return self
                .reject_unless_applied(
                    req,
                    LedgerError::InsufficientBalance {
                        user_id: req.user_id,
                        balance,
                        amount: req.amount,
                        idempotency_key: req.idempotency_key.to_string(),
                    },
                )
                .await;
        }

        let write = BalanceWrite {
            expected_version,
            entry: NewEntry {
                idempotency_key: req.idempotency_key.to_string(),
                user_id: req.user_id,
                amount: req.amount,
                balance_before: balance,
                balance_after: new_balance,
                kind: req.kind.clone(),
                related_entity_type: req.related_entity_type.clone(),
                related_entity_id: req.related_entity_id.clone(),
                description: req.description.clone(),
            },
        };

        match self.store.commit(write).await? {
            CommitOutcome::Applied(entry) => Ok(entry),
            CommitOutcome::VersionConflict => Err(LedgerError::ConcurrencyConflict {
                user_id: req.user_id,
                amount: req.amount,
                idempotency_key: req.idempotency_key.to_string(),
                attempts: attempt,
            }),
            CommitOutcome::DuplicateKey => {
                // 같은 key의 다른 Apply가 먼저 커밋됨
                let existing = self
                    .store
                    .find_entry(req.idempotency_key.as_str())
                    .await?
                    .ok_or_else(|| {
                        LedgerError::StorageFailure(crate::error::StoreError::Unavailable(
                            format!(
                                "idempotency key {} reported duplicate but entry is missing",
                                req.idempotency_key
                            ),
                        ))
                    })?;
                Ok(Self::replay(req, existing))
            }
        }
    }

    /// 거절 직전 key 재확인
    ///
    /// 읽은 잔액이 같은 key의 먼저 커밋된 Apply 이후 값이면 거절 대신 그 기록을 반환
    async fn reject_unless_applied(
        &self,
        req: &ApplyRequest,
        err: LedgerError,
    ) -> LedgerResult<LedgerEntry> {
        if let Some(existing) = self.store.find_entry(req.idempotency_key.as_str()).await? {
            return Ok(Self::replay(req, existing));
        }
        if let LedgerError::InsufficientBalance { balance, .. } = &err {
            tracing::info!(
                user_id = req.user_id,
                balance = *balance,
                amount = req.amount,
                idempotency_key = %req.idempotency_key,
                "Debit rejected: insufficient balance"
            );
        }
        Err(err)
    }

    fn replay(req: &ApplyRequest, existing: LedgerEntry) -> LedgerEntry {
        if existing.user_id != req.user_id
            || existing.amount != req.amount
            || existing.kind != req.kind
        {
            tracing::warn!(
                idempotency_key = %req.idempotency_key,
                stored_user_id = existing.user_id,
                stored_amount = existing.amount,
                requested_user_id = req.user_id,
                requested_amount = req.amount,
                "Idempotency key reused with different parameters, returning stored entry"
            );
        } else {
            tracing::debug!(
                idempotency_key = %req.idempotency_key,
                entry_id = existing.id,
                "Idempotent replay"
            );
        }
        existing
    }

    /// 버전 충돌 backoff
    ///
    /// `max_times`는 첫 시도를 제외한 재시도 횟수
    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.retry.min_delay)
            .with_max_delay(self.retry.max_delay)
            .with_max_times(self.retry.max_attempts.saturating_sub(1) as usize)
            .with_jitter()
    }
}
