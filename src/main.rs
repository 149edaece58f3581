//! Token Ledger API Server
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Billing / Reward Services (callers)             │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum Web Server                         │
//! │  ┌─────────────────────────────────────────────────────────┐│
//! │  │                      Routes Layer                        ││
//! │  │  /health  /accounts/:user_id/*                          ││
//! │  └─────────────────────────────────────────────────────────┘│
//! │  ┌─────────────────────────────────────────────────────────┐│
//! │  │                    Services Layer                        ││
//! │  │  TokenLedger (idempotency + optimistic lock retry)      ││
//! │  └─────────────────────────────────────────────────────────┘│
//! │  ┌─────────────────────────────────────────────────────────┐│
//! │  │                    Data Layer                            ││
//! │  │  PostgreSQL (user_tokens, token_transactions)           ││
//! │  └─────────────────────────────────────────────────────────┘│
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// 라이브러리에서 가져오기
use token_ledger_api::{routes, AppState, Config, Database, TokenLedger};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 환경변수 로드
    dotenvy::dotenv().ok();

    // 로깅 초기화
    // RUST_LOG=debug,sqlx=warn 형태로 레벨 제어 가능
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "token_ledger_api=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("🚀 Starting Token Ledger API Server");

    // 설정 로드
    let config = Config::from_env()?;
    tracing::info!(
        max_attempts = config.retry.max_attempts,
        "📋 Configuration loaded"
    );

    // 데이터베이스 연결
    let db = Database::connect(&config.database_url, config.db_max_connections).await?;
    tracing::info!("🗄️  Database connected");

    // 마이그레이션 실행
    db.run_migrations().await?;
    tracing::info!("📦 Migrations completed");

    // 서비스 초기화
    let ledger = TokenLedger::new(Arc::new(db), config.retry.clone())
        .with_history_max_limit(config.history_max_limit);
    tracing::info!("📒 Token ledger initialized");

    // 앱 상태 구성
    let state = AppState {
        ledger: Arc::new(ledger),
        config: Arc::new(config.clone()),
    };

    // 라우터 구성
    let app = create_router(state);

    // 서버 시작
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("🌐 Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// 라우터 + CORS
///
/// 내부 서비스 경계이므로 프로덕션에서는 허용 origin을 명시해야 함
fn create_router(state: AppState) -> Router {
    let cors = if state.config.is_production() {
        // 프로덕션: 특정 도메인만 허용 (환경변수로 설정)
        let allowed_origins = std::env::var("ALLOWED_ORIGINS").unwrap_or_default();
        let origins: Vec<axum::http::HeaderValue> = allowed_origins
            .split(',')
            .filter_map(|s| s.trim().parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
            .allow_headers([axum::http::header::CONTENT_TYPE])
    } else {
        // 개발: 모두 허용
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    routes::router(state).layer(cors)
}
