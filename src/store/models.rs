use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Enums ─────────────────────────────────────────────────────────

/// Classification of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Tour,
    Visa,
    Lead,
    Unknown,
}

impl Intent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tour => "tour",
            Self::Visa => "visa",
            Self::Lead => "lead",
            Self::Unknown => "unknown",
        }
    }

    /// Parse a stored value, defaulting to `Unknown` on anything outside the
    /// whitelist.
    pub fn parse_or_unknown(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "tour" => Self::Tour,
            "visa" => Self::Visa,
            "lead" => Self::Lead,
            _ => Self::Unknown,
        }
    }

    /// Clamp for model-supplied intents. "lead" is an internal classification
    /// the model is never allowed to claim, so it clamps to `Unknown` here and
    /// counts toward the off-topic breaker.
    pub fn clamp_reply(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "tour" => Self::Tour,
            "visa" => Self::Visa,
            _ => Self::Unknown,
        }
    }

    /// The intent counts toward the unknown-intent circuit breaker only when
    /// the exchange was off-topic.
    pub fn is_on_topic(self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

/// Sales path a conversation is steering toward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeadType {
    Tour,
    Visa,
}

impl LeadType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tour => "tour",
            Self::Visa => "visa",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "tour" => Some(Self::Tour),
            "visa" => Some(Self::Visa),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TravelStyle {
    #[default]
    General,
    Luxury,
    Adventure,
    Cultural,
    Family,
    Nature,
    Romantic,
}

impl TravelStyle {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Luxury => "luxury",
            Self::Adventure => "adventure",
            Self::Cultural => "cultural",
            Self::Family => "family",
            Self::Nature => "nature",
            Self::Romantic => "romantic",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "general" => Some(Self::General),
            "luxury" => Some(Self::Luxury),
            "adventure" => Some(Self::Adventure),
            "cultural" => Some(Self::Cultural),
            "family" => Some(Self::Family),
            "nature" => Some(Self::Nature),
            "romantic" => Some(Self::Romantic),
            _ => None,
        }
    }
}

/// Marketing-funnel event kinds. Append-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunnelEvent {
    Impression,
    Click,
    CheckoutStart,
    PaymentSuccess,
    PaymentFailed,
}

impl FunnelEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Impression => "impression",
            Self::Click => "click",
            Self::CheckoutStart => "checkout_start",
            Self::PaymentSuccess => "payment_success",
            Self::PaymentFailed => "payment_failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "impression" => Some(Self::Impression),
            "click" => Some(Self::Click),
            "checkout_start" => Some(Self::CheckoutStart),
            "payment_success" => Some(Self::PaymentSuccess),
            "payment_failed" => Some(Self::PaymentFailed),
            _ => None,
        }
    }
}

// ── Catalog entities ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tour {
    pub id: i64,
    pub agency_id: Option<i64>,
    pub title: String,
    pub description: String,
    pub destination: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub price: f64,
    pub is_active: bool,
    pub is_featured: bool,
    pub is_discounted: bool,
    pub discount_percent: Option<i64>,
    pub travel_style: TravelStyle,
    pub created_at: DateTime<Utc>,
    /// Display name of the owning agency, joined at query time.
    pub agency_name: Option<String>,
}

impl Tour {
    /// Whole days between start and end, clamped to at least 1.
    pub fn duration_days(&self) -> Option<i64> {
        let days = (self.end_date - self.start_date).num_days();
        if days < 0 {
            return None;
        }
        Some(days.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisaKnowledge {
    pub id: i64,
    pub country: String,
    pub visa_type: String,
    pub summary: String,
    pub requirements: Vec<String>,
    pub processing_time: String,
    pub notes: String,
    pub source_url: String,
    pub is_active: bool,
    pub last_updated: DateTime<Utc>,
}

/// Per-agency aggregates computed over active tours. Produced unranked by the
/// store; ordering lives in `catalog::rank_agencies`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgencyStats {
    pub id: i64,
    pub display_name: String,
    pub tagline: Option<String>,
    pub is_featured: bool,
    pub featured_priority: i64,
    pub active_tours: i64,
    pub featured_tours: i64,
    pub discounted_tours: i64,
    pub avg_price: Option<f64>,
    pub next_departure: Option<NaiveDate>,
    pub top_destinations: Vec<String>,
}

// ── Conversation entities ─────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    pub user_id: Option<i64>,
    pub message: String,
    pub response: String,
    pub created_at: DateTime<Utc>,
}

/// One prior user/bot exchange fed back into the prompt as history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exchange {
    pub message: String,
    pub response: String,
}

/// Structured analytics payload attached to each exchange. Stored as JSON but
/// always round-trips through this type — never an untyped blob.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedData {
    #[serde(default)]
    pub required_user_info: Vec<String>,
    #[serde(default)]
    pub suggested_tour_ids: Vec<i64>,
    #[serde(default)]
    pub needs_followup: bool,
    #[serde(default)]
    pub followup_question: Option<String>,
    #[serde(default)]
    pub lead_type: Option<LeadType>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatInteraction {
    pub id: i64,
    pub user_id: Option<i64>,
    pub intent: Intent,
    pub raw_query: String,
    pub extracted_data: ExtractedData,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatLead {
    pub id: i64,
    pub user_id: Option<i64>,
    pub name: String,
    pub phone: String,
    pub lead_type: LeadType,
    pub destination: String,
    pub budget: Option<f64>,
    pub travel_date: Option<NaiveDate>,
    pub message: String,
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// Fields accepted when capturing a lead.
#[derive(Debug, Clone, Deserialize)]
pub struct NewLead {
    pub name: String,
    pub phone: String,
    #[serde(rename = "type")]
    pub lead_type: LeadType,
    #[serde(default)]
    pub destination: String,
    #[serde(default)]
    pub budget: Option<f64>,
    #[serde(default)]
    pub travel_date: Option<NaiveDate>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub metadata: Option<Value>,
}

// ── Funnel entities ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Offer {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub description: String,
    pub destination: String,
    pub service_type: LeadType,
    pub is_premium: bool,
    pub premium_type: String,
    pub price_cents: i64,
    pub image_url: String,
    pub metadata: Option<Value>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Query-string filters for the offer listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OfferFilter {
    pub is_premium: Option<bool>,
    pub premium_type: Option<String>,
    pub destination: Option<String>,
    pub service_type: Option<LeadType>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Referral {
    pub id: i64,
    pub code: String,
    pub offer_id: i64,
    pub created_by: Option<i64>,
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunnelInteraction {
    pub id: i64,
    pub event: FunnelEvent,
    pub offer_id: i64,
    pub referral_id: Option<i64>,
    pub referral_code: String,
    pub user_id: Option<i64>,
    pub session_id: String,
    pub payload: Option<Value>,
    pub created_at: DateTime<Utc>,
}

// ── Preferences ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPreference {
    pub id: i64,
    pub user_id: Option<i64>,
    /// Empty string means "no phone"; uniqueness is enforced only for
    /// non-empty values.
    pub phone: String,
    pub favorite_destinations: Vec<String>,
    pub travel_style: TravelStyle,
    pub budget_min: Option<f64>,
    pub budget_max: Option<f64>,
    pub notes: String,
    pub updated_at: DateTime<Utc>,
}

/// Merged suggestion criteria (stored preference + request payload).
#[derive(Debug, Clone, Default, Serialize)]
pub struct SuggestionCriteria {
    pub favorite_destinations: Vec<String>,
    pub travel_style: TravelStyle,
    pub budget_min: Option<f64>,
    pub budget_max: Option<f64>,
}

// ── Analytics ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsTotals {
    pub interactions: i64,
    pub leads: i64,
    pub tour_leads: i64,
    pub visa_leads: i64,
    pub conversion_rate_percent: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DestinationCount {
    pub destination: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntentCount {
    pub intent: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsSummary {
    pub totals: AnalyticsTotals,
    pub popular_destinations: Vec<DestinationCount>,
    pub intent_distribution: Vec<IntentCount>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intent_parse_clamps_to_unknown() {
        assert_eq!(Intent::parse_or_unknown("tour"), Intent::Tour);
        assert_eq!(Intent::parse_or_unknown(" VISA "), Intent::Visa);
        assert_eq!(Intent::parse_or_unknown("weather"), Intent::Unknown);
        assert_eq!(Intent::parse_or_unknown(""), Intent::Unknown);
    }

    #[test]
    fn reply_clamp_is_narrower_than_stored_parse() {
        assert_eq!(Intent::parse_or_unknown("lead"), Intent::Lead);
        assert_eq!(Intent::clamp_reply("lead"), Intent::Unknown);
        assert_eq!(Intent::clamp_reply("tour"), Intent::Tour);
        assert_eq!(Intent::clamp_reply(" VISA "), Intent::Visa);
    }

    #[test]
    fn on_topic_excludes_unknown_only() {
        assert!(Intent::Tour.is_on_topic());
        assert!(Intent::Visa.is_on_topic());
        assert!(Intent::Lead.is_on_topic());
        assert!(!Intent::Unknown.is_on_topic());
    }

    #[test]
    fn lead_type_parse_rejects_other_values() {
        assert_eq!(LeadType::parse("tour"), Some(LeadType::Tour));
        assert_eq!(LeadType::parse("visa"), Some(LeadType::Visa));
        assert_eq!(LeadType::parse("lead"), None);
    }

    #[test]
    fn funnel_event_round_trips() {
        for event in [
            FunnelEvent::Impression,
            FunnelEvent::Click,
            FunnelEvent::CheckoutStart,
            FunnelEvent::PaymentSuccess,
            FunnelEvent::PaymentFailed,
        ] {
            assert_eq!(FunnelEvent::parse(event.as_str()), Some(event));
        }
    }

    #[test]
    fn duration_clamps_same_day_to_one() {
        let day = NaiveDate::from_ymd_opt(2026, 9, 1).unwrap();
        let tour = Tour {
            id: 1,
            agency_id: None,
            title: "t".into(),
            description: String::new(),
            destination: "d".into(),
            start_date: day,
            end_date: day,
            price: 100.0,
            is_active: true,
            is_featured: false,
            is_discounted: false,
            discount_percent: None,
            travel_style: TravelStyle::General,
            created_at: Utc::now(),
            agency_name: None,
        };
        assert_eq!(tour.duration_days(), Some(1));
    }

    #[test]
    fn extracted_data_serializes_typed_fields() {
        let data = ExtractedData {
            required_user_info: vec!["destination".into()],
            suggested_tour_ids: vec![3, 7],
            needs_followup: true,
            followup_question: Some("When?".into()),
            lead_type: Some(LeadType::Tour),
        };
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["lead_type"], "tour");
        assert_eq!(json["suggested_tour_ids"][1], 7);
        let back: ExtractedData = serde_json::from_value(json).unwrap();
        assert_eq!(back.suggested_tour_ids, vec![3, 7]);
    }
}
