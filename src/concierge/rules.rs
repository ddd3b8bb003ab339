//! Deterministic reply synthesis. Always available: this is both the
//! no-credential mode and the landing spot whenever the LLM path fails.

use crate::store::{AgencyStats, ExtractedData, Intent, LeadType, Tour, VisaKnowledge};
use std::fmt::Write;

const VISA_TERMS: &[&str] = &[
    "visa", "ویزا", "ویز", "schengen", "شنگن", "passport", "پاسپورت", "embassy", "سفارت",
];

const TOUR_TERMS: &[&str] = &[
    "tour", "تور", "travel", "سفر", "trip", "flight", "پرواز", "بلیط", "hotel", "هتل",
];

pub struct RuleReply {
    pub reply: String,
    pub intent: Intent,
    pub extracted: ExtractedData,
}

fn contains_any(message: &str, terms: &[&str]) -> bool {
    terms.iter().any(|t| message.contains(t))
}

/// Build a reply from the message and the keyword-matched lookup results.
/// Visa wording wins outright; otherwise matched tours answer the message
/// even without tour wording (a bare destination is a tour question), then
/// matched visa knowledge, then tour wording with nothing found. Rule-based
/// replies always request a followup.
pub fn rule_based_reply(
    message: &str,
    tours: &[Tour],
    knowledge: &[VisaKnowledge],
    agencies: &[AgencyStats],
) -> RuleReply {
    let lowered = message.to_lowercase();

    if contains_any(&lowered, VISA_TERMS) {
        return visa_reply(knowledge, agencies);
    }
    if !tours.is_empty() {
        return tour_reply(tours);
    }
    if !knowledge.is_empty() {
        return visa_reply(knowledge, agencies);
    }
    if contains_any(&lowered, TOUR_TERMS) {
        return tour_reply(tours);
    }

    RuleReply {
        reply: "I can help with tours and visas. Tell me where you want to go, \
                or which country's visa you are asking about."
            .into(),
        intent: Intent::Unknown,
        extracted: ExtractedData {
            required_user_info: vec!["destination".into()],
            needs_followup: true,
            followup_question: Some("Which destination or visa are you interested in?".into()),
            ..ExtractedData::default()
        },
    }
}

fn tour_reply(tours: &[Tour]) -> RuleReply {
    let mut reply = String::new();
    if tours.is_empty() {
        reply.push_str("I could not find a matching tour right now.");
    } else {
        reply.push_str("Here are some tours you might like:\n");
        for (i, tour) in tours.iter().enumerate() {
            let _ = write!(
                reply,
                "{}. {} to {} departing {} at {:.0}",
                i + 1,
                tour.title,
                tour.destination,
                tour.start_date,
                tour.price
            );
            if let Some(agency) = &tour.agency_name {
                let _ = write!(reply, " (by {agency})");
            }
            reply.push('\n');
        }
    }
    reply.push_str("Would you like more details on any of these?");

    RuleReply {
        reply,
        intent: Intent::Tour,
        extracted: ExtractedData {
            suggested_tour_ids: tours.iter().map(|t| t.id).collect(),
            needs_followup: true,
            followup_question: Some("Which tour should I tell you more about?".into()),
            lead_type: Some(LeadType::Tour),
            ..ExtractedData::default()
        },
    }
}

fn visa_reply(knowledge: &[VisaKnowledge], agencies: &[AgencyStats]) -> RuleReply {
    let mut reply = String::new();
    if knowledge.is_empty() {
        reply.push_str(
            "I don't have visa details for that yet. Tell me the country and \
             visa type and I will connect you with an agency.\n",
        );
    } else {
        for entry in knowledge {
            let _ = write!(reply, "{} ({}): {}", entry.country, entry.visa_type, entry.summary);
            if !entry.processing_time.is_empty() {
                let _ = write!(reply, " Processing time: {}.", entry.processing_time);
            }
            reply.push('\n');
        }
    }
    if !agencies.is_empty() {
        reply.push_str("Agencies that can handle the paperwork: ");
        let names: Vec<&str> = agencies.iter().map(|a| a.display_name.as_str()).collect();
        reply.push_str(&names.join(", "));
        reply.push_str(".\n");
    }
    reply.push_str("Shall I put you in touch with one of them?");

    RuleReply {
        reply,
        intent: Intent::Visa,
        extracted: ExtractedData {
            needs_followup: true,
            followup_question: Some(
                "Do you want an agency to contact you about this visa?".into(),
            ),
            lead_type: Some(LeadType::Visa),
            ..ExtractedData::default()
        },
    }
}
