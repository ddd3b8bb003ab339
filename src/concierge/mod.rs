//! Reply synthesis. One entry point, [`ConciergeEngine::generate_reply`],
//! which runs the lookup stage, tries the LLM when a provider is configured,
//! and otherwise (or on any LLM failure) lands on the rule-based path.

mod rules;
mod types;

pub use rules::rule_based_reply;
pub use types::{AgencyCard, KnowledgeCard, ReplyPayload, TourCard};

use crate::catalog::{self, extract_keywords, AGENCY_LIMIT, LOOKUP_LIMIT};
use crate::llm::prompt::{build_turns, PromptContext};
use crate::llm::sanitize::sanitize_reply;
use crate::llm::SharedProvider;
use crate::store::{AgencyStats, Exchange, ExtractedData, Intent, SharedStore, Tour, VisaKnowledge};
use anyhow::Result;
use chrono::Utc;
use tracing::warn;

/// What one chat message produced: the response body plus the structured
/// data the gateway records afterwards.
pub struct EngineOutcome {
    pub payload: ReplyPayload,
    pub extracted: ExtractedData,
}

impl EngineOutcome {
    pub fn intent(&self) -> Intent {
        self.payload.intent
    }
}

pub struct ConciergeEngine {
    store: SharedStore,
    provider: Option<SharedProvider>,
}

impl ConciergeEngine {
    pub fn new(store: SharedStore, provider: Option<SharedProvider>) -> Self {
        Self { store, provider }
    }

    /// Synthesize a reply. Lookup/store failures propagate; LLM failures of
    /// any kind degrade to the rule-based reply instead of erroring.
    pub async fn generate_reply(
        &self,
        user_id: Option<i64>,
        message: &str,
    ) -> Result<EngineOutcome> {
        let keywords = extract_keywords(message);
        let today = Utc::now().date_naive();

        let lookup = catalog::relevant_tours(self.store.as_ref(), &keywords, today, LOOKUP_LIMIT)
            .await?;
        let tours = lookup.tours;
        let knowledge =
            catalog::visa_knowledge(self.store.as_ref(), &keywords, LOOKUP_LIMIT).await?;
        let agencies = catalog::top_agencies(self.store.as_ref(), today, AGENCY_LIMIT).await?;
        let history = match user_id {
            Some(uid) => self.store.recent_history(uid, 10).await?,
            None => Vec::new(),
        };

        if let Some(provider) = &self.provider {
            match self
                .llm_reply(provider, message, &history, &tours, &knowledge, &agencies)
                .await
            {
                Ok(outcome) => return Ok(outcome),
                Err(e) => {
                    warn!(provider = provider.name(), error = %e, "llm reply failed, using rules");
                }
            }
        }

        // The rule path only sees keyword-matched tours. The fallback filler
        // is prompt context for the model, not an answer to the message.
        let matched: &[Tour] = if lookup.keyword_matched { &tours } else { &[] };
        Ok(fallback_outcome(message, matched, &knowledge, &agencies))
    }

    async fn llm_reply(
        &self,
        provider: &SharedProvider,
        message: &str,
        history: &[Exchange],
        tours: &[Tour],
        knowledge: &[VisaKnowledge],
        agencies: &[AgencyStats],
    ) -> Result<EngineOutcome> {
        let ctx = PromptContext {
            tours,
            knowledge,
            agencies,
        };
        let turns = build_turns(&ctx, history, message);
        let raw = provider.complete(&turns).await?;

        let known_ids: Vec<i64> = tours.iter().map(|t| t.id).collect();
        let sanitized = sanitize_reply(&raw, &known_ids)?;

        let tour_cards: Vec<TourCard> = if sanitized.extracted.suggested_tour_ids.is_empty() {
            Vec::new()
        } else {
            sanitized
                .extracted
                .suggested_tour_ids
                .iter()
                .filter_map(|id| tours.iter().find(|t| t.id == *id))
                .map(TourCard::from)
                .collect()
        };

        // Named agencies from the model are enriched with our own stats when
        // the name matches a ranked agency.
        let agency_cards: Vec<AgencyCard> = if sanitized.agencies.is_empty() {
            match sanitized.intent {
                Intent::Visa => agencies.iter().map(AgencyCard::from).collect(),
                _ => Vec::new(),
            }
        } else {
            sanitized
                .agencies
                .iter()
                .map(|suggestion| {
                    match agencies
                        .iter()
                        .find(|a| a.display_name.eq_ignore_ascii_case(&suggestion.name))
                    {
                        Some(stats) => {
                            let mut card = AgencyCard::from(stats);
                            card.reason = suggestion.reason.clone();
                            card
                        }
                        None => AgencyCard::from(suggestion),
                    }
                })
                .collect()
        };

        let knowledge_cards = match sanitized.intent {
            Intent::Visa => knowledge.iter().map(KnowledgeCard::from).collect(),
            _ => Vec::new(),
        };

        Ok(EngineOutcome {
            payload: ReplyPayload {
                reply: sanitized.reply,
                intent: sanitized.intent,
                tours: tour_cards,
                knowledge: knowledge_cards,
                agencies: agency_cards,
                required_user_info: sanitized.extracted.required_user_info.clone(),
                lead_type: sanitized.extracted.lead_type,
                needs_followup: sanitized.extracted.needs_followup,
                followup_question: sanitized.extracted.followup_question.clone(),
                used_fallback: false,
            },
            extracted: sanitized.extracted,
        })
    }
}

fn fallback_outcome(
    message: &str,
    tours: &[Tour],
    knowledge: &[VisaKnowledge],
    agencies: &[AgencyStats],
) -> EngineOutcome {
    let rule = rule_based_reply(message, tours, knowledge, agencies);
    let (tour_cards, knowledge_cards, agency_cards) = match rule.intent {
        Intent::Tour => (tours.iter().map(TourCard::from).collect(), Vec::new(), Vec::new()),
        Intent::Visa => (
            Vec::new(),
            knowledge.iter().map(KnowledgeCard::from).collect(),
            agencies.iter().map(AgencyCard::from).collect(),
        ),
        _ => (Vec::new(), Vec::new(), Vec::new()),
    };

    EngineOutcome {
        payload: ReplyPayload {
            reply: rule.reply,
            intent: rule.intent,
            tours: tour_cards,
            knowledge: knowledge_cards,
            agencies: agency_cards,
            required_user_info: rule.extracted.required_user_info.clone(),
            lead_type: rule.extracted.lead_type,
            needs_followup: rule.extracted.needs_followup,
            followup_question: rule.extracted.followup_question.clone(),
            used_fallback: true,
        },
        extracted: rule.extracted,
    }
}
