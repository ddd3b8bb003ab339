//! Axum-based HTTP gateway. Auth happens upstream: an authenticated caller
//! arrives with `x-user-id`/`x-user-role` headers, everyone else is
//! fingerprinted for quota purposes only.

mod handlers;
mod streaming;

use crate::concierge::ConciergeEngine;
use crate::config::Config;
use crate::governor::UsageGovernor;
use crate::llm::{OpenAiProvider, SharedProvider};
use crate::store::{SharedStore, SqliteStore};
use anyhow::Result;
use axum::{
    http::StatusCode,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tracing::info;

/// Maximum request body size (64KB)
pub const MAX_BODY_SIZE: usize = 65_536;
/// Request timeout (30s)
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Shared state for all axum handlers
#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    pub engine: Arc<ConciergeEngine>,
    pub governor: Arc<UsageGovernor>,
    pub config: Arc<Config>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::handle_health))
        .route("/api/chat", post(handlers::handle_chat))
        .route("/api/chat/stream", post(streaming::handle_chat_stream))
        .route("/api/chat/messages", get(handlers::handle_list_messages))
        .route("/api/interactions", post(handlers::handle_create_interaction))
        .route("/api/interactions", get(handlers::handle_list_interactions))
        .route("/api/leads", post(handlers::handle_create_lead))
        .route("/api/leads", get(handlers::handle_list_leads))
        .route("/api/offers", get(handlers::handle_list_offers))
        .route("/api/offers", post(handlers::handle_create_offer))
        .route("/api/offers/{id}", get(handlers::handle_get_offer))
        .route("/api/referrals", post(handlers::handle_create_referral))
        .route("/api/payments", post(handlers::handle_create_payment))
        .route("/api/payments/webhook", post(handlers::handle_payment_webhook))
        .route("/api/funnel/events", post(handlers::handle_record_funnel_event))
        .route("/api/funnel/events", get(handlers::handle_list_funnel_events))
        .route("/api/preferences", get(handlers::handle_get_preferences))
        .route("/api/preferences", post(handlers::handle_upsert_preferences))
        .route("/api/suggestions", get(handlers::handle_suggestions))
        .route("/api/suggestions", post(handlers::handle_suggest_tours))
        .route("/api/analytics", get(handlers::handle_analytics))
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(REQUEST_TIMEOUT_SECS),
        ))
}

/// Wire up the store, provider, and governor, then serve until shutdown.
pub async fn run_gateway(config: Config) -> Result<()> {
    let store: SharedStore = Arc::new(SqliteStore::connect(&config.database.url).await?);

    let provider: Option<SharedProvider> = {
        let p = OpenAiProvider::new(&config.llm);
        if p.has_credential() {
            Some(Arc::new(p) as SharedProvider)
        } else {
            info!("no LLM credential configured, running rule-based only");
            None
        }
    };

    let engine = Arc::new(ConciergeEngine::new(store.clone(), provider));
    let governor = Arc::new(UsageGovernor::new(config.limits.clone()));

    let addr: SocketAddr = format!("{}:{}", config.gateway.host, config.gateway.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "gateway listening");

    let state = AppState {
        store,
        engine,
        governor,
        config: Arc::new(config),
    };

    axum::serve(listener, build_router(state)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_limit_is_64kb() {
        assert_eq!(MAX_BODY_SIZE, 65_536);
    }

    #[test]
    fn timeout_is_30_seconds() {
        assert_eq!(REQUEST_TIMEOUT_SECS, 30);
    }

    #[test]
    fn app_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }
}
