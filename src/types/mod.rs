//! Common Types Module
//!
//! 애플리케이션 전반에서 사용되는 공통 타입 정의

use serde::{Deserialize, Serialize};

/// idempotency key 최대 길이
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 64;
/// kind / related_entity_type 최대 길이 (varchar(50))
pub const MAX_KIND_LEN: usize = 50;
/// related_entity_id 최대 길이 (varchar(100))
pub const MAX_RELATED_ID_LEN: usize = 100;

/// 호출자가 제공하는 논리적 연산 식별자
///
/// 같은 key로 Apply를 여러 번 호출해도 잔액에는 한 번만 반영됨
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn new(key: &str) -> Result<Self, String> {
        if key.is_empty() {
            return Err("idempotency key must not be empty".to_string());
        }
        if key.trim() != key {
            return Err("idempotency key must not have surrounding whitespace".to_string());
        }
        if key.chars().count() > MAX_IDEMPOTENCY_KEY_LEN {
            return Err(format!(
                "idempotency key must be at most {} characters",
                MAX_IDEMPOTENCY_KEY_LEN
            ));
        }
        Ok(Self(key.to_string()))
    }

    /// 새 UUID v4 key 생성 (호출자가 key를 따로 관리하지 않을 때)
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for IdempotencyKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<IdempotencyKey> for String {
    fn from(key: IdempotencyKey) -> Self {
        key.0
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// 자주 쓰는 entry kind
///
/// ledger는 kind를 해석하지 않음. 호출자 간 관례일 뿐
pub mod kinds {
    pub const DEBIT_GENERATION: &str = "debit:generation";
    pub const CREDIT_REFERRAL: &str = "credit:referral";
    pub const CREDIT_PURCHASE: &str = "credit:purchase";
    pub const CREDIT_GRANT: &str = "credit:grant";
}

/// 히스토리 페이지 요청
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PageRequest {
    /// 건너뛸 entry 수 (0부터 시작)
    #[serde(default)]
    pub offset: u64,
    /// 페이지 크기 (기본 20)
    #[serde(default = "PageRequest::default_limit")]
    pub limit: u32,
}

impl PageRequest {
    pub const DEFAULT_LIMIT: u32 = 20;

    fn default_limit() -> u32 {
        Self::DEFAULT_LIMIT
    }

    pub fn new(offset: u64, limit: u32) -> Self {
        Self { offset, limit }
    }

    /// 최대 페이지 크기로 제한
    pub fn clamped(self, max_limit: u32) -> Self {
        Self {
            offset: self.offset,
            limit: self.limit.min(max_limit),
        }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(0, Self::DEFAULT_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idempotency_key_valid() {
        let key = IdempotencyKey::new("order-42:charge");
        assert!(key.is_ok());
        assert_eq!(key.unwrap().as_str(), "order-42:charge");
    }

    #[test]
    fn test_idempotency_key_invalid() {
        assert!(IdempotencyKey::new("").is_err());
        assert!(IdempotencyKey::new(" padded ").is_err());
        assert!(IdempotencyKey::new(&"x".repeat(MAX_IDEMPOTENCY_KEY_LEN + 1)).is_err());
    }

    #[test]
    fn test_generated_key_is_uuid() {
        let key = IdempotencyKey::generate();
        assert_eq!(key.as_str().len(), 36);
        assert_ne!(key, IdempotencyKey::generate());
    }

    #[test]
    fn test_idempotency_key_deserialize_validates() {
        let ok: Result<IdempotencyKey, _> = serde_json::from_str(r#""abc""#);
        assert!(ok.is_ok());

        let empty: Result<IdempotencyKey, _> = serde_json::from_str(r#""""#);
        assert!(empty.is_err());
    }

    #[test]
    fn test_page_request_clamp() {
        let page = PageRequest::new(40, 500).clamped(100);
        assert_eq!(page, PageRequest::new(40, 100));

        let small = PageRequest::new(0, 5).clamped(100);
        assert_eq!(small.limit, 5);
    }

    #[test]
    fn test_page_request_defaults() {
        let page: PageRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(page, PageRequest::default());
    }
}
