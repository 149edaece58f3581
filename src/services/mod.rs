//! Services Module
//!
//! 비즈니스 로직을 담당하는 서비스 레이어
//!
//! # Services
//! - `TokenLedger`: 토큰 잔액 변경 (idempotent apply, 낙관적 락 재시도), 잔액/히스토리 조회, 감사

mod ledger;

pub use ledger::{ApplyRequest, AuditReport, HistoryPage, LedgerResult, TokenLedger};
