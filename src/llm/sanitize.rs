//! Post-processing of model output. The model's JSON is never trusted as-is:
//! intents are clamped to the known set and tour ids outside the lookup
//! context are dropped.

use crate::error::LlmError;
use crate::store::{ExtractedData, Intent, LeadType};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
struct RawReply {
    #[serde(default)]
    reply: String,
    #[serde(default)]
    intent: String,
    #[serde(default)]
    required_user_info: Vec<String>,
    #[serde(default)]
    suggested_tour_ids: Vec<i64>,
    #[serde(default)]
    suggested_agencies: Vec<RawAgency>,
    #[serde(default)]
    needs_followup: bool,
    #[serde(default)]
    followup_question: Option<String>,
    #[serde(default)]
    lead_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawAgency {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AgencySuggestion {
    pub name: String,
    pub reason: Option<String>,
}

/// Model output after clamping and filtering.
#[derive(Debug, Clone)]
pub struct SanitizedReply {
    pub reply: String,
    pub intent: Intent,
    pub extracted: ExtractedData,
    pub agencies: Vec<AgencySuggestion>,
}

/// Strip a surrounding markdown code fence, if the model added one despite
/// JSON mode.
fn strip_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Parse and sanitize a raw model response. `known_tour_ids` is the set the
/// prompt offered; anything else is a hallucination and gets dropped.
pub fn sanitize_reply(
    raw: &str,
    known_tour_ids: &[i64],
) -> Result<SanitizedReply, LlmError> {
    let parsed: RawReply =
        serde_json::from_str(strip_fence(raw)).map_err(|e| LlmError::MalformedPayload {
            provider: "openai".into(),
            message: e.to_string(),
        })?;

    let reply = parsed.reply.trim().to_owned();
    if reply.is_empty() {
        return Err(LlmError::MalformedPayload {
            provider: "openai".into(),
            message: "missing reply field".into(),
        });
    }

    let mut tour_ids = Vec::new();
    for id in parsed.suggested_tour_ids {
        if known_tour_ids.contains(&id) && !tour_ids.contains(&id) {
            tour_ids.push(id);
        }
    }

    let agencies = parsed
        .suggested_agencies
        .into_iter()
        .filter_map(|a| {
            let name = a.name?.trim().to_owned();
            if name.is_empty() {
                return None;
            }
            Some(AgencySuggestion {
                name,
                reason: a.reason.filter(|r| !r.trim().is_empty()),
            })
        })
        .collect();

    Ok(SanitizedReply {
        reply,
        intent: Intent::clamp_reply(&parsed.intent),
        extracted: ExtractedData {
            required_user_info: parsed.required_user_info,
            suggested_tour_ids: tour_ids,
            needs_followup: parsed.needs_followup,
            followup_question: parsed
                .followup_question
                .filter(|q| !q.trim().is_empty()),
            lead_type: parsed.lead_type.as_deref().and_then(LeadType::parse),
        },
        agencies,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_unexpected_intent_to_unknown() {
        let out = sanitize_reply(r#"{"reply":"hi","intent":"weather"}"#, &[]).unwrap();
        assert_eq!(out.intent, Intent::Unknown);
    }

    #[test]
    fn model_may_not_claim_lead_intent() {
        let out = sanitize_reply(r#"{"reply":"hi","intent":"lead"}"#, &[]).unwrap();
        assert_eq!(out.intent, Intent::Unknown);
    }

    #[test]
    fn drops_hallucinated_tour_ids() {
        let out = sanitize_reply(
            r#"{"reply":"see these","intent":"tour","suggested_tour_ids":[3,99,7,3]}"#,
            &[3, 7],
        )
        .unwrap();
        assert_eq!(out.extracted.suggested_tour_ids, vec![3, 7]);
    }

    #[test]
    fn drops_agencies_without_names() {
        let out = sanitize_reply(
            r#"{"reply":"ok","intent":"tour","suggested_agencies":[
                {"name":"Sunny Travel","reason":"featured"},
                {"reason":"no name"},
                {"name":"  "}
            ]}"#,
            &[],
        )
        .unwrap();
        assert_eq!(out.agencies.len(), 1);
        assert_eq!(out.agencies[0].name, "Sunny Travel");
    }

    #[test]
    fn missing_reply_is_an_error() {
        assert!(sanitize_reply(r#"{"intent":"tour"}"#, &[]).is_err());
        assert!(sanitize_reply(r#"{"reply":"  "}"#, &[]).is_err());
    }

    #[test]
    fn non_json_is_an_error() {
        assert!(sanitize_reply("Sure! Here are some tours...", &[]).is_err());
    }

    #[test]
    fn tolerates_code_fences() {
        let out = sanitize_reply("```json\n{\"reply\":\"hi\"}\n```", &[]).unwrap();
        assert_eq!(out.reply, "hi");
    }

    #[test]
    fn invalid_lead_type_becomes_none() {
        let out = sanitize_reply(r#"{"reply":"ok","lead_type":"hotel"}"#, &[]).unwrap();
        assert!(out.extracted.lead_type.is_none());
        let out = sanitize_reply(r#"{"reply":"ok","lead_type":"visa"}"#, &[]).unwrap();
        assert_eq!(out.extracted.lead_type, Some(LeadType::Visa));
    }

    #[test]
    fn blank_followup_question_is_dropped() {
        let out = sanitize_reply(
            r#"{"reply":"ok","needs_followup":true,"followup_question":" "}"#,
            &[],
        )
        .unwrap();
        assert!(out.extracted.needs_followup);
        assert!(out.extracted.followup_question.is_none());
    }
}
