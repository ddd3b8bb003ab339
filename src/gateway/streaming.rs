//! SSE variant of the chat endpoint. The reply is synthesized in full, then
//! replayed as `meta` / `delta`* / `done` events so web clients can render
//! progressively without a second code path through the engine.

use super::handlers::{chat_flow, ChatBody};
use super::AppState;
use axum::{
    extract::rejection::JsonRejection,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Json, Response},
};
use futures_util::stream;
use serde_json::json;
use std::convert::Infallible;

/// Split a reply into fixed-size chunks on char boundaries.
pub(super) fn chunk_reply(reply: &str, chunk_chars: usize) -> Vec<String> {
    let chars: Vec<char> = reply.chars().collect();
    chars
        .chunks(chunk_chars.max(1))
        .map(|c| c.iter().collect())
        .collect()
}

/// POST /api/chat/stream
pub(super) async fn handle_chat_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<ChatBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": format!("invalid JSON body: {e}")})),
            )
                .into_response()
        }
    };

    let outcome = match chat_flow(&state, &headers, &body.message).await {
        Ok(outcome) => outcome,
        Err(response) => return response,
    };

    let payload = outcome.payload;
    let meta = json!({
        "intent": payload.intent,
        "suggested_tours": payload.tours,
        "knowledge": payload.knowledge,
        "suggested_agencies": payload.agencies,
        "required_user_info": payload.required_user_info,
        "lead_type": payload.lead_type,
        "needs_followup": payload.needs_followup,
        "followup_question": payload.followup_question,
        "used_fallback": payload.used_fallback,
    });

    let mut events: Vec<Result<Event, Infallible>> =
        vec![Ok(Event::default().event("meta").data(meta.to_string()))];
    for chunk in chunk_reply(&payload.reply, state.config.gateway.stream_chunk_chars) {
        events.push(Ok(Event::default().event("delta").data(chunk)));
    }
    events.push(Ok(Event::default().event("done").data("{}")));

    Sse::new(stream::iter(events))
        .keep_alive(KeepAlive::default())
        .into_response()
}
