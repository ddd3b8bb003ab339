//! Persistence layer. All entities are owned here; the concierge core only
//! reads/writes through the [`Store`] trait (filter, create, aggregate) and
//! never holds long-lived references.

mod models;
mod sqlite;

pub use models::*;
pub use sqlite::{NewAgency, NewTour, NewVisaKnowledge, SqliteStore};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

/// Fields accepted when seeding/creating an offer.
#[derive(Debug, Clone, Deserialize)]
pub struct NewOffer {
    pub title: String,
    pub slug: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub destination: String,
    pub service_type: LeadType,
    #[serde(default)]
    pub is_premium: bool,
    #[serde(default)]
    pub premium_type: String,
    #[serde(default)]
    pub price_cents: i64,
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

/// One append-only funnel event.
#[derive(Debug, Clone)]
pub struct NewFunnelEvent {
    pub event: FunnelEvent,
    pub offer_id: i64,
    pub referral_id: Option<i64>,
    pub referral_code: String,
    pub user_id: Option<i64>,
    pub session_id: String,
    pub payload: Option<Value>,
}

/// Upsert payload for a preference row. `user_id` XOR non-empty `phone`
/// identifies the row.
#[derive(Debug, Clone, Default)]
pub struct PreferenceUpsert {
    pub user_id: Option<i64>,
    pub phone: String,
    pub favorite_destinations: Vec<String>,
    pub travel_style: TravelStyle,
    pub budget_min: Option<f64>,
    pub budget_max: Option<f64>,
    pub notes: String,
}

/// Async persistence contract for the whole service.
#[async_trait]
pub trait Store: Send + Sync {
    // ── Catalog ───────────────────────────────────────────────────
    /// Active tours departing on/after `from`, keyword OR-matched over
    /// destination/title/description, ordered `start_date ASC, id ASC`.
    /// An empty keyword list matches everything.
    async fn search_future_tours(
        &self,
        keywords: &[String],
        from: NaiveDate,
        limit: i64,
    ) -> Result<Vec<Tour>>;

    /// Most-recently-created active tours, any date.
    async fn recent_active_tours(&self, limit: i64) -> Result<Vec<Tour>>;

    async fn tour_by_id(&self, id: i64) -> Result<Option<Tour>>;

    /// Active tours matching the merged suggestion criteria, ordered
    /// `price ASC, created_at DESC, id ASC`.
    async fn suggest_tours(&self, criteria: &SuggestionCriteria, limit: i64) -> Result<Vec<Tour>>;

    /// Most-recent active tours not already picked, for suggestion backfill.
    async fn recent_active_tours_excluding(
        &self,
        exclude: &[i64],
        limit: i64,
    ) -> Result<Vec<Tour>>;

    /// Active knowledge rows keyword OR-matched over country/visa_type,
    /// ordered `last_updated DESC, country, visa_type`.
    async fn search_visa_knowledge(
        &self,
        keywords: &[String],
        limit: i64,
    ) -> Result<Vec<VisaKnowledge>>;

    /// Unranked per-agency aggregates over active tours; agencies with zero
    /// active tours are excluded. `today` anchors the next-departure lookup.
    async fn agency_stats(&self, today: NaiveDate) -> Result<Vec<AgencyStats>>;

    // ── Conversation ──────────────────────────────────────────────
    async fn insert_chat_message(
        &self,
        user_id: Option<i64>,
        message: &str,
        response: &str,
    ) -> Result<ChatMessage>;

    /// Last `limit` exchanges for a user, oldest first.
    async fn recent_history(&self, user_id: i64, limit: i64) -> Result<Vec<Exchange>>;

    /// A user's messages, newest first.
    async fn list_messages(&self, user_id: i64) -> Result<Vec<ChatMessage>>;

    async fn insert_interaction(
        &self,
        user_id: Option<i64>,
        intent: Intent,
        raw_query: &str,
        extracted: &ExtractedData,
    ) -> Result<ChatInteraction>;

    /// Recent interactions across all users, newest first.
    async fn list_interactions(&self, limit: i64) -> Result<Vec<ChatInteraction>>;

    // ── Leads ─────────────────────────────────────────────────────
    async fn insert_lead(&self, user_id: Option<i64>, lead: &NewLead) -> Result<ChatLead>;

    /// All leads, newest first.
    async fn list_leads(&self) -> Result<Vec<ChatLead>>;

    // ── Offers / referrals / funnel ───────────────────────────────
    async fn insert_offer(&self, offer: &NewOffer) -> Result<Offer>;

    async fn list_offers(&self, filter: &OfferFilter) -> Result<Vec<Offer>>;

    async fn offer_by_id(&self, id: i64) -> Result<Option<Offer>>;

    /// Fails with [`crate::error::StoreError::Conflict`] when `code` already
    /// exists; callers retry with a fresh code.
    async fn insert_referral(
        &self,
        code: &str,
        offer_id: i64,
        created_by: Option<i64>,
        metadata: Option<&Value>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Referral>;

    async fn referral_by_code(&self, code: &str) -> Result<Option<Referral>>;

    async fn insert_funnel_event(&self, event: &NewFunnelEvent) -> Result<FunnelInteraction>;

    /// Recent funnel events across all offers, newest first.
    async fn list_funnel_events(&self, limit: i64) -> Result<Vec<FunnelInteraction>>;

    // ── Preferences ───────────────────────────────────────────────
    /// Lookup by user id first, then by non-empty phone.
    async fn preference_for(
        &self,
        user_id: Option<i64>,
        phone: Option<&str>,
    ) -> Result<Option<UserPreference>>;

    async fn upsert_preference(&self, upsert: &PreferenceUpsert) -> Result<UserPreference>;

    // ── Analytics ─────────────────────────────────────────────────
    async fn analytics_summary(&self) -> Result<AnalyticsSummary>;
}

/// Shared handle used across handlers and the engine.
pub type SharedStore = Arc<dyn Store>;
