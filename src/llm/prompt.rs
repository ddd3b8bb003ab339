//! Prompt assembly for the concierge. The system prompt carries the lookup
//! context inline so the model can only recommend what actually exists.

use super::traits::ChatTurn;
use crate::store::{AgencyStats, Exchange, Tour, VisaKnowledge};
use std::fmt::Write;

/// Prior exchanges folded into the turn list, newest last.
pub const MAX_HISTORY_EXCHANGES: usize = 10;

/// Everything the lookup stage found for the current message.
pub struct PromptContext<'a> {
    pub tours: &'a [Tour],
    pub knowledge: &'a [VisaKnowledge],
    pub agencies: &'a [AgencyStats],
}

pub fn system_prompt(ctx: &PromptContext<'_>) -> String {
    let mut p = String::with_capacity(2048);
    p.push_str(
        "You are a travel concierge for a tour and visa marketplace. \
         Answer briefly and helpfully, in the language the user writes in. \
         Only recommend tours and agencies from the context below; never invent listings.\n",
    );

    p.push_str("\nAvailable tours:\n");
    if ctx.tours.is_empty() {
        p.push_str("(none)\n");
    }
    for tour in ctx.tours {
        let _ = writeln!(
            p,
            "- id={} {} to {} departing {} price {:.0}{}",
            tour.id,
            tour.title,
            tour.destination,
            tour.start_date,
            tour.price,
            tour.agency_name
                .as_deref()
                .map(|a| format!(" by {a}"))
                .unwrap_or_default(),
        );
    }

    p.push_str("\nVisa knowledge:\n");
    if ctx.knowledge.is_empty() {
        p.push_str("(none)\n");
    }
    for entry in ctx.knowledge {
        let _ = writeln!(
            p,
            "- {} ({}): {}. Processing time: {}",
            entry.country, entry.visa_type, entry.summary, entry.processing_time
        );
    }

    p.push_str("\nTop agencies:\n");
    if ctx.agencies.is_empty() {
        p.push_str("(none)\n");
    }
    for agency in ctx.agencies {
        let _ = writeln!(
            p,
            "- {} ({} active tours){}",
            agency.display_name,
            agency.active_tours,
            agency
                .tagline
                .as_deref()
                .map(|t| format!(": {t}"))
                .unwrap_or_default(),
        );
    }

    p.push_str(
        "\nRespond with a single JSON object and nothing else:\n\
         {\n\
         \"reply\": \"<your answer to the user>\",\n\
         \"intent\": \"tour\" | \"visa\" | \"unknown\",\n\
         \"required_user_info\": [\"<missing detail>\", ...],\n\
         \"suggested_tour_ids\": [<id from the tours above>, ...],\n\
         \"suggested_agencies\": [{\"name\": \"<agency from above>\", \"reason\": \"<why>\"}, ...],\n\
         \"needs_followup\": true | false,\n\
         \"followup_question\": \"<question>\" | null,\n\
         \"lead_type\": \"tour\" | \"visa\" | null\n\
         }\n",
    );
    p
}

/// System prompt, then up to the last ten exchanges as alternating
/// user/assistant turns, then the current message.
pub fn build_turns(ctx: &PromptContext<'_>, history: &[Exchange], message: &str) -> Vec<ChatTurn> {
    let skip = history.len().saturating_sub(MAX_HISTORY_EXCHANGES);
    let mut turns = Vec::with_capacity(2 + 2 * (history.len() - skip));
    turns.push(ChatTurn::system(system_prompt(ctx)));
    for exchange in &history[skip..] {
        turns.push(ChatTurn::user(exchange.message.clone()));
        turns.push(ChatTurn::assistant(exchange.response.clone()));
    }
    turns.push(ChatTurn::user(message));
    turns
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::TurnRole;
    use crate::store::TravelStyle;
    use chrono::{NaiveDate, Utc};

    fn tour(id: i64, destination: &str) -> Tour {
        Tour {
            id,
            agency_id: None,
            title: format!("{destination} escape"),
            description: String::new(),
            destination: destination.into(),
            start_date: NaiveDate::from_ymd_opt(2026, 10, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2026, 10, 6).unwrap(),
            price: 750.0,
            is_active: true,
            is_featured: false,
            is_discounted: false,
            discount_percent: None,
            travel_style: TravelStyle::General,
            created_at: Utc::now(),
            agency_name: Some("Sunny Travel".into()),
        }
    }

    fn empty_ctx() -> PromptContext<'static> {
        PromptContext {
            tours: &[],
            knowledge: &[],
            agencies: &[],
        }
    }

    #[test]
    fn system_prompt_lists_tour_ids() {
        let tours = vec![tour(7, "Istanbul")];
        let ctx = PromptContext {
            tours: &tours,
            knowledge: &[],
            agencies: &[],
        };
        let prompt = system_prompt(&ctx);
        assert!(prompt.contains("id=7"));
        assert!(prompt.contains("Istanbul"));
        assert!(prompt.contains("Sunny Travel"));
        assert!(prompt.contains("suggested_tour_ids"));
    }

    #[test]
    fn empty_context_is_marked() {
        let prompt = system_prompt(&empty_ctx());
        assert!(prompt.contains("(none)"));
    }

    #[test]
    fn turns_interleave_history() {
        let history = vec![
            Exchange {
                message: "hi".into(),
                response: "hello".into(),
            },
            Exchange {
                message: "tours?".into(),
                response: "sure".into(),
            },
        ];
        let turns = build_turns(&empty_ctx(), &history, "to Istanbul");
        assert_eq!(turns.len(), 6);
        assert_eq!(turns[0].role, TurnRole::System);
        assert_eq!(turns[1].content, "hi");
        assert_eq!(turns[2].role, TurnRole::Assistant);
        assert_eq!(turns[5].content, "to Istanbul");
    }

    #[test]
    fn history_is_capped_to_most_recent() {
        let history: Vec<Exchange> = (0..15)
            .map(|i| Exchange {
                message: format!("m{i}"),
                response: format!("r{i}"),
            })
            .collect();
        let turns = build_turns(&empty_ctx(), &history, "now");
        // system + 10 exchanges + current message
        assert_eq!(turns.len(), 1 + 20 + 1);
        assert_eq!(turns[1].content, "m5");
    }
}
