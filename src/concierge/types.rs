use crate::llm::sanitize::AgencySuggestion;
use crate::store::{AgencyStats, Intent, LeadType, Tour, VisaKnowledge};
use chrono::NaiveDate;
use serde::Serialize;

/// A tour as shown inside a chat reply.
#[derive(Debug, Clone, Serialize)]
pub struct TourCard {
    pub id: i64,
    pub title: String,
    pub destination: String,
    pub start_date: NaiveDate,
    pub duration_days: Option<i64>,
    pub price: f64,
    pub is_discounted: bool,
    pub discount_percent: Option<i64>,
    pub agency: Option<String>,
}

impl From<&Tour> for TourCard {
    fn from(tour: &Tour) -> Self {
        Self {
            id: tour.id,
            title: tour.title.clone(),
            destination: tour.destination.clone(),
            start_date: tour.start_date,
            duration_days: tour.duration_days(),
            price: tour.price,
            is_discounted: tour.is_discounted,
            discount_percent: tour.discount_percent,
            agency: tour.agency_name.clone(),
        }
    }
}

/// A visa-knowledge entry as shown inside a chat reply.
#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeCard {
    pub country: String,
    pub visa_type: String,
    pub summary: String,
    pub requirements: Vec<String>,
    pub processing_time: String,
}

impl From<&VisaKnowledge> for KnowledgeCard {
    fn from(entry: &VisaKnowledge) -> Self {
        Self {
            country: entry.country.clone(),
            visa_type: entry.visa_type.clone(),
            summary: entry.summary.clone(),
            requirements: entry.requirements.clone(),
            processing_time: entry.processing_time.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AgencyCard {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tagline: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_tours: Option<i64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub top_destinations: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_departure: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl From<&AgencyStats> for AgencyCard {
    fn from(stats: &AgencyStats) -> Self {
        Self {
            name: stats.display_name.clone(),
            tagline: stats.tagline.clone(),
            active_tours: Some(stats.active_tours),
            top_destinations: stats.top_destinations.clone(),
            next_departure: stats.next_departure,
            reason: None,
        }
    }
}

impl From<&AgencySuggestion> for AgencyCard {
    fn from(suggestion: &AgencySuggestion) -> Self {
        Self {
            name: suggestion.name.clone(),
            tagline: None,
            active_tours: None,
            top_destinations: Vec::new(),
            next_departure: None,
            reason: suggestion.reason.clone(),
        }
    }
}

/// Full chat response body. The key set is identical on the LLM and the
/// rule-based path.
#[derive(Debug, Clone, Serialize)]
pub struct ReplyPayload {
    pub reply: String,
    pub intent: Intent,
    #[serde(rename = "suggested_tours")]
    pub tours: Vec<TourCard>,
    pub knowledge: Vec<KnowledgeCard>,
    #[serde(rename = "suggested_agencies")]
    pub agencies: Vec<AgencyCard>,
    pub required_user_info: Vec<String>,
    pub lead_type: Option<LeadType>,
    pub needs_followup: bool,
    pub followup_question: Option<String>,
    /// True when the rule-based path produced the reply.
    pub used_fallback: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::TravelStyle;
    use chrono::Utc;

    #[test]
    fn tour_card_carries_duration_and_agency() {
        let tour = Tour {
            id: 5,
            agency_id: Some(2),
            title: "Bosphorus week".into(),
            description: String::new(),
            destination: "Istanbul".into(),
            start_date: NaiveDate::from_ymd_opt(2026, 10, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2026, 10, 8).unwrap(),
            price: 950.0,
            is_active: true,
            is_featured: false,
            is_discounted: true,
            discount_percent: Some(15),
            travel_style: TravelStyle::Cultural,
            created_at: Utc::now(),
            agency_name: Some("Sunny Travel".into()),
        };
        let card = TourCard::from(&tour);
        assert_eq!(card.duration_days, Some(7));
        assert_eq!(card.agency.as_deref(), Some("Sunny Travel"));
        assert_eq!(card.discount_percent, Some(15));
    }

    #[test]
    fn agency_card_serialization_skips_empty_fields() {
        let card = AgencyCard::from(&AgencySuggestion {
            name: "Sunny Travel".into(),
            reason: None,
        });
        let json = serde_json::to_value(&card).unwrap();
        assert_eq!(json["name"], "Sunny Travel");
        assert!(json.get("active_tours").is_none());
        assert!(json.get("reason").is_none());
    }
}
