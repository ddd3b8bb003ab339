use super::AppState;
use crate::concierge::{EngineOutcome, TourCard};
use crate::error::{StoreError, TourbotError, ValidationError};
use crate::funnel;
use crate::governor::ClientIdentity;
use crate::store::{
    ExtractedData, FunnelEvent, Intent, NewLead, NewOffer, OfferFilter, PreferenceUpsert,
    SuggestionCriteria, TravelStyle, UserPreference,
};
use axum::{
    extract::rejection::JsonRejection,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info};

// ── Request bodies / queries ──────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct ChatBody {
    pub message: String,
}

#[derive(Deserialize)]
pub(super) struct CreateReferralBody {
    pub offer_id: i64,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

#[derive(Deserialize)]
pub(super) struct PaymentWebhookBody {
    pub referral_code: String,
    pub status: String,
    #[serde(default)]
    pub payload: Option<Value>,
}

#[derive(Deserialize)]
pub(super) struct OfferViewQuery {
    #[serde(rename = "ref")]
    pub ref_code: Option<String>,
    #[serde(default)]
    pub session_id: String,
}

#[derive(Deserialize)]
pub(super) struct InteractionBody {
    pub intent: Intent,
    pub message: String,
    #[serde(default)]
    pub extracted_data: ExtractedData,
}

#[derive(Deserialize)]
pub(super) struct CreatePaymentBody {
    pub offer_id: i64,
    #[serde(default)]
    pub referral_code: Option<String>,
    #[serde(default)]
    pub session_id: String,
}

#[derive(Deserialize)]
pub(super) struct FunnelEventBody {
    pub event: FunnelEvent,
    pub offer_id: i64,
    #[serde(default)]
    pub referral_code: Option<String>,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub payload: Option<Value>,
}

#[derive(Deserialize)]
pub(super) struct PreferenceQuery {
    pub phone: Option<String>,
}

#[derive(Default, Deserialize)]
pub(super) struct PreferenceBody {
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub favorite_destinations: Vec<String>,
    #[serde(default)]
    pub travel_style: TravelStyle,
    #[serde(default)]
    pub budget_min: Option<f64>,
    #[serde(default)]
    pub budget_max: Option<f64>,
    #[serde(default)]
    pub notes: String,
}

#[derive(Deserialize)]
pub(super) struct SuggestionQuery {
    pub destination: Option<String>,
    pub travel_style: Option<TravelStyle>,
    pub budget_min: Option<f64>,
    pub budget_max: Option<f64>,
    pub phone: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Default, Deserialize)]
pub(super) struct SuggestionBody {
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub travel_style: Option<TravelStyle>,
    #[serde(default)]
    pub budget_min: Option<f64>,
    #[serde(default)]
    pub budget_max: Option<f64>,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub limit: Option<i64>,
    /// Persist the merged criteria as the caller's preference.
    #[serde(default)]
    pub save: bool,
}

// ── Shared helpers ────────────────────────────────────────────────

/// Resolve who is calling. Upstream auth injects `x-user-id`/`x-user-role`;
/// without them the client is fingerprinted from address and agent.
pub(super) fn client_identity(state: &AppState, headers: &HeaderMap) -> ClientIdentity {
    let user_id = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<i64>().ok());
    if let Some(id) = user_id {
        let role = headers
            .get("x-user-role")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("traveler");
        return ClientIdentity::user(id, role);
    }
    let forwarded_for = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let user_agent = headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    ClientIdentity::anonymous(&state.config.gateway.identity_salt, forwarded_for, user_agent)
}

fn internal_error(e: anyhow::Error) -> Response {
    error!(error = %e, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "internal error"})),
    )
        .into_response()
}

fn validation_error(v: &ValidationError) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"error": v.to_string(), "field": v.field()})),
    )
        .into_response()
}

fn bad_json(e: &JsonRejection) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"error": format!("invalid JSON body: {e}")})),
    )
        .into_response()
}

fn role_gate(identity: &ClientIdentity, allowed: &[&str]) -> Option<Response> {
    let permitted = identity
        .role()
        .is_some_and(|role| allowed.contains(&role));
    if permitted {
        None
    } else {
        Some(
            (
                StatusCode::FORBIDDEN,
                Json(json!({"error": "insufficient role"})),
            )
                .into_response(),
        )
    }
}

/// Everything a chat request does before the response is shaped: validate,
/// admit, synthesize, record the intent, persist. Used by the plain and the
/// streaming endpoint.
pub(super) async fn chat_flow(
    state: &AppState,
    headers: &HeaderMap,
    message: &str,
) -> Result<EngineOutcome, Response> {
    let message = message.trim();
    if message.is_empty() {
        return Err(validation_error(&ValidationError::Missing {
            field: "message",
        }));
    }

    let identity = client_identity(state, headers);
    let admission = state.governor.admit(&identity);
    if !admission.is_granted() {
        return Err((
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({"error": "chatbot_blocked", "reply": admission.reply_text()})),
        )
            .into_response());
    }

    let outcome = state
        .engine
        .generate_reply(identity.user_id(), message)
        .await
        .map_err(internal_error)?;

    state
        .governor
        .record_intent(&identity, outcome.intent().is_on_topic());

    // anonymous callers get replies, never records
    if let Some(uid) = identity.user_id() {
        state
            .store
            .insert_interaction(Some(uid), outcome.intent(), message, &outcome.extracted)
            .await
            .map_err(internal_error)?;
        state
            .store
            .insert_chat_message(Some(uid), message, &outcome.payload.reply)
            .await
            .map_err(internal_error)?;
    }

    Ok(outcome)
}

// ── Handlers ──────────────────────────────────────────────────────

/// GET /health
pub(super) async fn handle_health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// POST /api/chat
pub(super) async fn handle_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<ChatBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(e) => return bad_json(&e),
    };
    match chat_flow(&state, &headers, &body.message).await {
        Ok(outcome) => Json(outcome.payload).into_response(),
        Err(response) => response,
    }
}

/// GET /api/chat/messages — conversation history for the authenticated user.
pub(super) async fn handle_list_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    let identity = client_identity(&state, &headers);
    let Some(uid) = identity.user_id() else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "authentication required"})),
        )
            .into_response();
    };
    match state.store.list_messages(uid).await {
        Ok(messages) => Json(messages).into_response(),
        Err(e) => internal_error(e),
    }
}

/// POST /api/interactions — record an exchange observed outside the chat
/// endpoints (e.g. a widget the frontend drives directly).
pub(super) async fn handle_create_interaction(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<InteractionBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(e) => return bad_json(&e),
    };
    if body.message.trim().is_empty() {
        return validation_error(&ValidationError::Missing { field: "message" });
    }
    let identity = client_identity(&state, &headers);
    match state
        .store
        .insert_interaction(identity.user_id(), body.intent, &body.message, &body.extracted_data)
        .await
    {
        Ok(created) => (StatusCode::CREATED, Json(created)).into_response(),
        Err(e) => internal_error(e),
    }
}

/// GET /api/interactions — agency/admin only.
pub(super) async fn handle_list_interactions(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    const INTERACTION_PAGE: i64 = 100;

    let identity = client_identity(&state, &headers);
    if let Some(denied) = role_gate(&identity, &["admin", "agency"]) {
        return denied;
    }
    match state.store.list_interactions(INTERACTION_PAGE).await {
        Ok(interactions) => Json(interactions).into_response(),
        Err(e) => internal_error(e),
    }
}

/// POST /api/leads
pub(super) async fn handle_create_lead(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<NewLead>, JsonRejection>,
) -> Response {
    let Json(lead) = match body {
        Ok(b) => b,
        Err(e) => return bad_json(&e),
    };
    if lead.name.trim().is_empty() {
        return validation_error(&ValidationError::Missing { field: "name" });
    }
    if lead.phone.trim().is_empty() {
        return validation_error(&ValidationError::Missing { field: "phone" });
    }

    let identity = client_identity(&state, &headers);
    match state.store.insert_lead(identity.user_id(), &lead).await {
        Ok(created) => {
            info!(lead_id = created.id, lead_type = created.lead_type.as_str(), "lead captured");
            (StatusCode::CREATED, Json(created)).into_response()
        }
        Err(e) => internal_error(e),
    }
}

/// GET /api/leads — admin only.
pub(super) async fn handle_list_leads(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    let identity = client_identity(&state, &headers);
    if let Some(denied) = role_gate(&identity, &["admin"]) {
        return denied;
    }
    match state.store.list_leads().await {
        Ok(leads) => Json(leads).into_response(),
        Err(e) => internal_error(e),
    }
}

/// GET /api/offers
pub(super) async fn handle_list_offers(
    State(state): State<AppState>,
    Query(filter): Query<OfferFilter>,
) -> Response {
    match state.store.list_offers(&filter).await {
        Ok(offers) => Json(offers).into_response(),
        Err(e) => internal_error(e),
    }
}

/// POST /api/offers — admin only.
pub(super) async fn handle_create_offer(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<NewOffer>, JsonRejection>,
) -> Response {
    let identity = client_identity(&state, &headers);
    if let Some(denied) = role_gate(&identity, &["admin"]) {
        return denied;
    }
    let Json(offer) = match body {
        Ok(b) => b,
        Err(e) => return bad_json(&e),
    };
    if offer.title.trim().is_empty() {
        return validation_error(&ValidationError::Missing { field: "title" });
    }
    if offer.slug.trim().is_empty() {
        return validation_error(&ValidationError::Missing { field: "slug" });
    }
    match state.store.insert_offer(&offer).await {
        Ok(created) => (StatusCode::CREATED, Json(created)).into_response(),
        Err(e) => match e.downcast_ref::<StoreError>() {
            Some(StoreError::Conflict { .. }) => (
                StatusCode::CONFLICT,
                Json(json!({"error": "slug already exists", "field": "slug"})),
            )
                .into_response(),
            _ => internal_error(e),
        },
    }
}

/// GET /api/offers/{id} — returns the offer and logs an impression,
/// attributed to the `ref` code when it resolves to a live referral.
pub(super) async fn handle_get_offer(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Query(query): Query<OfferViewQuery>,
) -> Response {
    let offer = match state.store.offer_by_id(id).await {
        Ok(Some(offer)) => offer,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({"error": "offer not found"})),
            )
                .into_response()
        }
        Err(e) => return internal_error(e),
    };

    let referral = match &query.ref_code {
        Some(code) => match state.store.referral_by_code(code).await {
            Ok(r) => r,
            Err(e) => return internal_error(e),
        },
        None => None,
    };

    let identity = client_identity(&state, &headers);
    let logged = funnel::record_impression(
        state.store.as_ref(),
        offer.id,
        referral.as_ref(),
        identity.user_id(),
        &query.session_id,
    )
    .await;
    let referral_applied = match logged {
        Ok(interaction) => interaction.referral_id.is_some(),
        Err(e) => return internal_error(e),
    };

    Json(json!({"offer": offer, "referral_applied": referral_applied})).into_response()
}

/// POST /api/referrals
pub(super) async fn handle_create_referral(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<CreateReferralBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(e) => return bad_json(&e),
    };

    match state.store.offer_by_id(body.offer_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return validation_error(&ValidationError::UnknownReference {
                field: "offer_id",
                value: body.offer_id.to_string(),
            })
        }
        Err(e) => return internal_error(e),
    }

    let identity = client_identity(&state, &headers);
    let referral = match funnel::create_referral(
        state.store.as_ref(),
        &state.config.referral,
        body.offer_id,
        identity.user_id(),
        body.metadata.as_ref(),
        body.expires_at,
    )
    .await
    {
        Ok(referral) => referral,
        Err(e) => return internal_error(e),
    };

    // creating a link counts as its first impression
    if let Err(e) = funnel::record_impression(
        state.store.as_ref(),
        referral.offer_id,
        Some(&referral),
        identity.user_id(),
        "",
    )
    .await
    {
        return internal_error(e);
    }
    (StatusCode::CREATED, Json(referral)).into_response()
}

/// POST /api/payments — start a checkout: resolve (or mint) a referral for
/// the offer, log `checkout_start`, and hand back the checkout URL.
pub(super) async fn handle_create_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<CreatePaymentBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(e) => return bad_json(&e),
    };

    let offer = match state.store.offer_by_id(body.offer_id).await {
        Ok(Some(offer)) => offer,
        Ok(None) => {
            return validation_error(&ValidationError::UnknownReference {
                field: "offer_id",
                value: body.offer_id.to_string(),
            })
        }
        Err(e) => return internal_error(e),
    };

    let identity = client_identity(&state, &headers);
    let referral = match &body.referral_code {
        Some(code) => match state.store.referral_by_code(code).await {
            Ok(Some(referral)) => referral,
            Ok(None) => {
                return validation_error(&ValidationError::UnknownReference {
                    field: "referral_code",
                    value: code.clone(),
                })
            }
            Err(e) => return internal_error(e),
        },
        None => match funnel::create_referral(
            state.store.as_ref(),
            &state.config.referral,
            offer.id,
            identity.user_id(),
            None,
            None,
        )
        .await
        {
            Ok(referral) => referral,
            Err(e) => return internal_error(e),
        },
    };

    if let Err(e) = funnel::record_checkout(
        state.store.as_ref(),
        &referral,
        identity.user_id(),
        &body.session_id,
    )
    .await
    {
        return internal_error(e);
    }

    let checkout_url = format!("/checkout/{}?ref={}", offer.slug, referral.code);
    (
        StatusCode::CREATED,
        Json(json!({"checkout_url": checkout_url, "referral_code": referral.code})),
    )
        .into_response()
}

/// POST /api/payments/webhook
pub(super) async fn handle_payment_webhook(
    State(state): State<AppState>,
    body: Result<Json<PaymentWebhookBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(e) => return bad_json(&e),
    };
    let succeeded = match body.status.as_str() {
        "success" => true,
        "failed" => false,
        other => {
            return validation_error(&ValidationError::Invalid {
                field: "status",
                detail: format!("expected success or failed, got {other}"),
            })
        }
    };

    match funnel::resolve_payment(
        state.store.as_ref(),
        &body.referral_code,
        succeeded,
        body.payload,
    )
    .await
    {
        Ok(interaction) => {
            Json(json!({"status": "recorded", "event": interaction.event.as_str()}))
                .into_response()
        }
        Err(TourbotError::Validation(v)) => validation_error(&v),
        Err(e) => internal_error(e.into()),
    }
}

/// POST /api/funnel/events — record a caller-reported funnel event such as
/// an offer click. Open to anonymous callers; referral attribution follows
/// the same liveness rule as impressions.
pub(super) async fn handle_record_funnel_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<FunnelEventBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(e) => return bad_json(&e),
    };

    let offer = match state.store.offer_by_id(body.offer_id).await {
        Ok(Some(offer)) => offer,
        Ok(None) => {
            return validation_error(&ValidationError::UnknownReference {
                field: "offer_id",
                value: body.offer_id.to_string(),
            })
        }
        Err(e) => return internal_error(e),
    };

    let referral = match &body.referral_code {
        Some(code) => match state.store.referral_by_code(code).await {
            Ok(Some(referral)) => Some(referral),
            Ok(None) => {
                return validation_error(&ValidationError::UnknownReference {
                    field: "referral_code",
                    value: code.clone(),
                })
            }
            Err(e) => return internal_error(e),
        },
        None => None,
    };

    let identity = client_identity(&state, &headers);
    match funnel::record_event(
        state.store.as_ref(),
        body.event,
        offer.id,
        referral.as_ref(),
        identity.user_id(),
        &body.session_id,
        body.payload,
    )
    .await
    {
        Ok(logged) => (StatusCode::CREATED, Json(logged)).into_response(),
        Err(e) => internal_error(e),
    }
}

/// GET /api/funnel/events — agency/admin only.
pub(super) async fn handle_list_funnel_events(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    const FUNNEL_PAGE: i64 = 100;

    let identity = client_identity(&state, &headers);
    if let Some(denied) = role_gate(&identity, &["admin", "agency"]) {
        return denied;
    }
    match state.store.list_funnel_events(FUNNEL_PAGE).await {
        Ok(events) => Json(events).into_response(),
        Err(e) => internal_error(e),
    }
}

/// GET /api/preferences
pub(super) async fn handle_get_preferences(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<PreferenceQuery>,
) -> Response {
    let identity = client_identity(&state, &headers);
    match state
        .store
        .preference_for(identity.user_id(), query.phone.as_deref())
        .await
    {
        Ok(Some(pref)) => Json(pref).into_response(),
        // nothing stored is not an error, just nothing to return
        Ok(None) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => internal_error(e),
    }
}

/// POST /api/preferences — upsert, keyed by the caller's user id or by
/// phone for anonymous callers.
pub(super) async fn handle_upsert_preferences(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<PreferenceBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(e) => return bad_json(&e),
    };
    let identity = client_identity(&state, &headers);
    if identity.user_id().is_none() && body.phone.trim().is_empty() {
        return validation_error(&ValidationError::Missing { field: "phone" });
    }

    let upsert = PreferenceUpsert {
        user_id: identity.user_id(),
        phone: body.phone.trim().to_owned(),
        favorite_destinations: body.favorite_destinations,
        travel_style: body.travel_style,
        budget_min: body.budget_min,
        budget_max: body.budget_max,
        notes: body.notes,
    };
    match state.store.upsert_preference(&upsert).await {
        Ok(pref) => Json(pref).into_response(),
        Err(e) => match e.downcast_ref::<StoreError>() {
            Some(StoreError::Conflict { detail, .. }) => (
                StatusCode::CONFLICT,
                Json(json!({"error": detail})),
            )
                .into_response(),
            _ => internal_error(e),
        },
    }
}

fn merge_criteria(
    stored: Option<&UserPreference>,
    destination: Option<&str>,
    travel_style: Option<TravelStyle>,
    budget_min: Option<f64>,
    budget_max: Option<f64>,
) -> SuggestionCriteria {
    let mut criteria = SuggestionCriteria::default();
    if let Some(pref) = stored {
        criteria.favorite_destinations = pref.favorite_destinations.clone();
        criteria.travel_style = pref.travel_style;
        criteria.budget_min = pref.budget_min;
        criteria.budget_max = pref.budget_max;
    }
    // the requested destination joins the stored favorites, it does not
    // replace them
    if let Some(destination) = destination.map(str::trim).filter(|d| !d.is_empty()) {
        let already_there = criteria
            .favorite_destinations
            .iter()
            .any(|d| d.eq_ignore_ascii_case(destination));
        if !already_there {
            criteria.favorite_destinations.push(destination.to_owned());
        }
    }
    if let Some(style) = travel_style {
        criteria.travel_style = style;
    }
    if budget_min.is_some() {
        criteria.budget_min = budget_min;
    }
    if budget_max.is_some() {
        criteria.budget_max = budget_max;
    }
    criteria
}

/// Default suggestion count when the caller does not pass `limit`.
const DEFAULT_SUGGESTION_LIMIT: i64 = 5;
const MAX_SUGGESTION_LIMIT: i64 = 20;

/// Criteria-matched tours backfilled with recent tours when thin.
async fn suggest_and_respond(
    state: &AppState,
    criteria: &SuggestionCriteria,
    limit: Option<i64>,
) -> Response {
    let limit = limit
        .unwrap_or(DEFAULT_SUGGESTION_LIMIT)
        .clamp(1, MAX_SUGGESTION_LIMIT);

    let mut tours = match state.store.suggest_tours(criteria, limit).await {
        Ok(tours) => tours,
        Err(e) => return internal_error(e),
    };

    let mut used_fallback = false;
    if (tours.len() as i64) < limit {
        let exclude: Vec<i64> = tours.iter().map(|t| t.id).collect();
        let missing = limit - tours.len() as i64;
        match state
            .store
            .recent_active_tours_excluding(&exclude, missing)
            .await
        {
            Ok(extra) => {
                used_fallback = !extra.is_empty();
                tours.extend(extra);
            }
            Err(e) => return internal_error(e),
        }
    }

    let cards: Vec<TourCard> = tours.iter().map(TourCard::from).collect();
    Json(json!({"tours": cards, "used_fallback": used_fallback})).into_response()
}

/// GET /api/suggestions — personalized tour picks: stored preference merged
/// with query overrides, backfilled with recent tours when thin.
pub(super) async fn handle_suggestions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<SuggestionQuery>,
) -> Response {
    let identity = client_identity(&state, &headers);
    let stored = match state
        .store
        .preference_for(identity.user_id(), query.phone.as_deref())
        .await
    {
        Ok(pref) => pref,
        Err(e) => return internal_error(e),
    };

    let criteria = merge_criteria(
        stored.as_ref(),
        query.destination.as_deref(),
        query.travel_style,
        query.budget_min,
        query.budget_max,
    );
    suggest_and_respond(&state, &criteria, query.limit).await
}

/// POST /api/suggestions — same merge as the GET variant, with an optional
/// `save` flag that persists the merged criteria as the caller's preference.
pub(super) async fn handle_suggest_tours(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<SuggestionBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(e) => return bad_json(&e),
    };
    let identity = client_identity(&state, &headers);
    let phone = body.phone.trim();

    let stored = match state
        .store
        .preference_for(identity.user_id(), Some(phone).filter(|p| !p.is_empty()))
        .await
    {
        Ok(pref) => pref,
        Err(e) => return internal_error(e),
    };

    let criteria = merge_criteria(
        stored.as_ref(),
        body.destination.as_deref(),
        body.travel_style,
        body.budget_min,
        body.budget_max,
    );

    if body.save {
        if identity.user_id().is_none() && phone.is_empty() {
            return validation_error(&ValidationError::Missing { field: "phone" });
        }
        let upsert = PreferenceUpsert {
            user_id: identity.user_id(),
            phone: phone.to_owned(),
            favorite_destinations: criteria.favorite_destinations.clone(),
            travel_style: criteria.travel_style,
            budget_min: criteria.budget_min,
            budget_max: criteria.budget_max,
            notes: stored.map(|p| p.notes).unwrap_or_default(),
        };
        if let Err(e) = state.store.upsert_preference(&upsert).await {
            return match e.downcast_ref::<StoreError>() {
                Some(StoreError::Conflict { detail, .. }) => {
                    (StatusCode::CONFLICT, Json(json!({"error": detail}))).into_response()
                }
                _ => internal_error(e),
            };
        }
    }

    suggest_and_respond(&state, &criteria, body.limit).await
}

/// GET /api/analytics — agency/admin only.
pub(super) async fn handle_analytics(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    let identity = client_identity(&state, &headers);
    if let Some(denied) = role_gate(&identity, &["admin", "agency"]) {
        return denied;
    }
    match state.store.analytics_summary().await {
        Ok(summary) => Json(summary).into_response(),
        Err(e) => internal_error(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concierge::ConciergeEngine;
    use crate::config::Config;
    use crate::gateway::build_router;
    use crate::governor::UsageGovernor;
    use crate::store::{SharedStore, SqliteStore};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn test_state() -> AppState {
        let store: SharedStore = Arc::new(SqliteStore::in_memory().await.unwrap());
        let mut config = Config::default();
        config.limits.anon_daily_quota = 2;
        AppState {
            engine: Arc::new(ConciergeEngine::new(store.clone(), None)),
            governor: Arc::new(UsageGovernor::new(config.limits.clone())),
            store,
            config: Arc::new(config),
        }
    }

    async fn send(
        state: &AppState,
        method: &str,
        uri: &str,
        headers: &[(&str, &str)],
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = build_router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn health_is_public() {
        let state = test_state().await;
        let (status, body) = send(&state, "GET", "/health", &[], None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn blank_message_is_rejected() {
        let state = test_state().await;
        let (status, body) = send(
            &state,
            "POST",
            "/api/chat",
            &[],
            Some(json!({"message": "   "})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["field"], "message");
    }

    #[tokio::test]
    async fn chat_replies_with_fallback_payload() {
        let state = test_state().await;
        let (status, body) = send(
            &state,
            "POST",
            "/api/chat",
            &[],
            Some(json!({"message": "tour to Istanbul"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["intent"], "tour");
        assert_eq!(body["used_fallback"], true);
        assert_eq!(body["needs_followup"], true);
        assert_eq!(body["lead_type"], "tour");
        assert!(body["suggested_tours"].is_array());
        assert!(body["required_user_info"].is_array());
    }

    #[tokio::test]
    async fn quota_exhaustion_returns_chatbot_blocked() {
        let state = test_state().await;
        let headers = [("x-forwarded-for", "10.1.1.1"), ("user-agent", "test")];
        for _ in 0..2 {
            let (status, _) = send(
                &state,
                "POST",
                "/api/chat",
                &headers,
                Some(json!({"message": "tour please"})),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }
        let (status, body) = send(
            &state,
            "POST",
            "/api/chat",
            &headers,
            Some(json!({"message": "tour please"})),
        )
        .await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["error"], "chatbot_blocked");
        assert!(body["reply"].as_str().unwrap().contains("limit"));
    }

    #[tokio::test]
    async fn identified_chat_is_persisted() {
        let state = test_state().await;
        let headers = [("x-user-id", "7"), ("x-user-role", "traveler")];
        send(
            &state,
            "POST",
            "/api/chat",
            &headers,
            Some(json!({"message": "tour to Istanbul"})),
        )
        .await;

        let (status, body) = send(&state, "GET", "/api/chat/messages", &headers, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["message"], "tour to Istanbul");
    }

    #[tokio::test]
    async fn anonymous_chat_history_requires_auth() {
        let state = test_state().await;
        let (status, _) = send(&state, "GET", "/api/chat/messages", &[], None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn lead_requires_name_and_phone() {
        let state = test_state().await;
        let (status, body) = send(
            &state,
            "POST",
            "/api/leads",
            &[],
            Some(json!({"name": "", "phone": "555", "type": "tour"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["field"], "name");

        let (status, body) = send(
            &state,
            "POST",
            "/api/leads",
            &[],
            Some(json!({"name": "Sara", "phone": " ", "type": "visa"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["field"], "phone");
    }

    #[tokio::test]
    async fn lead_listing_is_admin_only() {
        let state = test_state().await;
        send(
            &state,
            "POST",
            "/api/leads",
            &[],
            Some(json!({"name": "Sara", "phone": "555", "type": "tour", "destination": "Dubai"})),
        )
        .await;

        let (status, _) = send(&state, "GET", "/api/leads", &[], None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = send(
            &state,
            "GET",
            "/api/leads",
            &[("x-user-id", "1"), ("x-user-role", "admin")],
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn interactions_post_is_open_and_listing_is_gated() {
        let state = test_state().await;
        let (status, created) = send(
            &state,
            "POST",
            "/api/interactions",
            &[],
            Some(json!({"intent": "tour", "message": "widget exchange"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["intent"], "tour");

        let (status, _) = send(&state, "GET", "/api/interactions", &[], None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, listed) = send(
            &state,
            "GET",
            "/api/interactions",
            &[("x-user-id", "1"), ("x-user-role", "admin")],
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed.as_array().unwrap().len(), 1);
        assert_eq!(listed[0]["raw_query"], "widget exchange");
    }

    #[tokio::test]
    async fn referral_for_unknown_offer_is_rejected() {
        let state = test_state().await;
        let (status, body) = send(
            &state,
            "POST",
            "/api/referrals",
            &[],
            Some(json!({"offer_id": 99})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["field"], "offer_id");
    }

    #[tokio::test]
    async fn offer_referral_payment_round_trip() {
        let state = test_state().await;
        let admin = [("x-user-id", "1"), ("x-user-role", "admin")];

        let (status, offer) = send(
            &state,
            "POST",
            "/api/offers",
            &admin,
            Some(json!({
                "title": "Istanbul package",
                "slug": "istanbul-package",
                "service_type": "tour",
                "price_cents": 120000
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let offer_id = offer["id"].as_i64().unwrap();

        let (status, referral) = send(
            &state,
            "POST",
            "/api/referrals",
            &admin,
            Some(json!({"offer_id": offer_id})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let code = referral["code"].as_str().unwrap().to_owned();
        assert_eq!(code.len(), 10);

        let (status, viewed) = send(
            &state,
            "GET",
            &format!("/api/offers/{offer_id}?ref={code}&session_id=s1"),
            &[],
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(viewed["referral_applied"], true);

        let (status, recorded) = send(
            &state,
            "POST",
            "/api/payments/webhook",
            &[],
            Some(json!({"referral_code": code, "status": "success"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(recorded["event"], "payment_success");
    }

    #[tokio::test]
    async fn payment_create_mints_referral_and_checkout_url() {
        let state = test_state().await;
        let admin = [("x-user-id", "1"), ("x-user-role", "admin")];
        let (_, offer) = send(
            &state,
            "POST",
            "/api/offers",
            &admin,
            Some(json!({
                "title": "Dubai package",
                "slug": "dubai-package",
                "service_type": "tour",
                "price_cents": 80000
            })),
        )
        .await;
        let offer_id = offer["id"].as_i64().unwrap();

        let (status, body) = send(
            &state,
            "POST",
            "/api/payments",
            &[],
            Some(json!({"offer_id": offer_id, "session_id": "s2"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let code = body["referral_code"].as_str().unwrap();
        assert_eq!(code.len(), 10);
        let url = body["checkout_url"].as_str().unwrap();
        assert!(url.contains("dubai-package"));
        assert!(url.contains(code));
    }

    #[tokio::test]
    async fn payment_create_rejects_unknown_offer() {
        let state = test_state().await;
        let (status, body) = send(
            &state,
            "POST",
            "/api/payments",
            &[],
            Some(json!({"offer_id": 404})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["field"], "offer_id");
    }

    #[tokio::test]
    async fn payment_webhook_rejects_unknown_code() {
        let state = test_state().await;
        let (status, body) = send(
            &state,
            "POST",
            "/api/payments/webhook",
            &[],
            Some(json!({"referral_code": "NOPE123456", "status": "success"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["field"], "referral_code");
    }

    #[tokio::test]
    async fn payment_webhook_rejects_bad_status() {
        let state = test_state().await;
        let (status, body) = send(
            &state,
            "POST",
            "/api/payments/webhook",
            &[],
            Some(json!({"referral_code": "ABCDE12345", "status": "pending"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["field"], "status");
    }

    #[tokio::test]
    async fn funnel_event_post_is_open_and_listing_is_gated() {
        let state = test_state().await;
        let admin = [("x-user-id", "1"), ("x-user-role", "admin")];
        let (_, offer) = send(
            &state,
            "POST",
            "/api/offers",
            &admin,
            Some(json!({
                "title": "Cappadocia package",
                "slug": "cappadocia-package",
                "service_type": "tour",
                "price_cents": 90000
            })),
        )
        .await;
        let offer_id = offer["id"].as_i64().unwrap();
        let (_, referral) = send(
            &state,
            "POST",
            "/api/referrals",
            &admin,
            Some(json!({"offer_id": offer_id})),
        )
        .await;
        let code = referral["code"].as_str().unwrap();

        let (status, logged) = send(
            &state,
            "POST",
            "/api/funnel/events",
            &[],
            Some(json!({
                "event": "click",
                "offer_id": offer_id,
                "referral_code": code,
                "session_id": "s3"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(logged["event"], "click");
        assert_eq!(logged["referral_code"], *code);

        let (status, _) = send(&state, "GET", "/api/funnel/events", &[], None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, listed) = send(&state, "GET", "/api/funnel/events", &admin, None).await;
        assert_eq!(status, StatusCode::OK);
        let events: Vec<&str> = listed
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["event"].as_str().unwrap())
            .collect();
        // creating the referral logged its first impression
        assert!(events.contains(&"click"));
        assert!(events.contains(&"impression"));
    }

    #[tokio::test]
    async fn funnel_event_rejects_unknown_references() {
        let state = test_state().await;
        let (status, body) = send(
            &state,
            "POST",
            "/api/funnel/events",
            &[],
            Some(json!({"event": "click", "offer_id": 404})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["field"], "offer_id");

        let admin = [("x-user-id", "1"), ("x-user-role", "admin")];
        let (_, offer) = send(
            &state,
            "POST",
            "/api/offers",
            &admin,
            Some(json!({
                "title": "Antalya package",
                "slug": "antalya-package",
                "service_type": "tour"
            })),
        )
        .await;
        let (status, body) = send(
            &state,
            "POST",
            "/api/funnel/events",
            &[],
            Some(json!({
                "event": "click",
                "offer_id": offer["id"],
                "referral_code": "NOPE123456"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["field"], "referral_code");
    }

    #[tokio::test]
    async fn anonymous_preferences_require_phone() {
        let state = test_state().await;
        let (status, body) = send(
            &state,
            "POST",
            "/api/preferences",
            &[],
            Some(json!({"favorite_destinations": ["Istanbul"]})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["field"], "phone");
    }

    #[tokio::test]
    async fn preference_upsert_and_read_back() {
        let state = test_state().await;
        let user = [("x-user-id", "9")];
        let (status, _) = send(
            &state,
            "POST",
            "/api/preferences",
            &user,
            Some(json!({"favorite_destinations": ["Istanbul"], "travel_style": "cultural"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, pref) = send(&state, "GET", "/api/preferences", &user, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(pref["travel_style"], "cultural");
        assert_eq!(pref["favorite_destinations"][0], "Istanbul");
    }

    #[tokio::test]
    async fn suggestion_post_with_save_persists_preference() {
        let state = test_state().await;
        let user = [("x-user-id", "12")];
        let (status, body) = send(
            &state,
            "POST",
            "/api/suggestions",
            &user,
            Some(json!({"destination": "Istanbul", "travel_style": "cultural", "save": true})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["tours"].is_array());

        let (status, pref) = send(&state, "GET", "/api/preferences", &user, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(pref["favorite_destinations"][0], "Istanbul");
        assert_eq!(pref["travel_style"], "cultural");
    }

    #[test]
    fn merge_criteria_unions_destination_with_favorites() {
        let stored = UserPreference {
            id: 1,
            user_id: Some(9),
            phone: String::new(),
            favorite_destinations: vec!["Istanbul".into()],
            travel_style: TravelStyle::Cultural,
            budget_min: None,
            budget_max: None,
            notes: String::new(),
            updated_at: Utc::now(),
        };

        let criteria = merge_criteria(Some(&stored), Some("Dubai"), None, None, None);
        assert_eq!(criteria.favorite_destinations, vec!["Istanbul", "Dubai"]);

        // already a favorite, case-insensitively: no duplicate
        let criteria = merge_criteria(Some(&stored), Some("istanbul"), None, None, None);
        assert_eq!(criteria.favorite_destinations, vec!["Istanbul"]);
    }

    #[tokio::test]
    async fn suggestions_honor_requested_limit() {
        use crate::store::NewTour;
        use chrono::Duration;

        let store = SqliteStore::in_memory().await.unwrap();
        let start = (Utc::now() + Duration::days(7)).date_naive();
        for i in 0..6 {
            store
                .insert_tour(&NewTour {
                    agency_id: None,
                    title: format!("Trip {i}"),
                    description: String::new(),
                    destination: "Istanbul".into(),
                    start_date: start,
                    end_date: start + Duration::days(3),
                    price: 500.0 + f64::from(i),
                    is_active: true,
                    is_featured: false,
                    is_discounted: false,
                    discount_percent: None,
                    travel_style: TravelStyle::General,
                })
                .await
                .unwrap();
        }
        let store: SharedStore = Arc::new(store);
        let config = Config::default();
        let state = AppState {
            engine: Arc::new(ConciergeEngine::new(store.clone(), None)),
            governor: Arc::new(UsageGovernor::new(config.limits.clone())),
            store,
            config: Arc::new(config),
        };

        let (status, body) = send(&state, "GET", "/api/suggestions?limit=2", &[], None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["tours"].as_array().unwrap().len(), 2);

        // without a limit the default of five applies
        let (status, body) = send(&state, "GET", "/api/suggestions", &[], None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["tours"].as_array().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn missing_preference_returns_no_content() {
        let state = test_state().await;
        let (status, body) = send(
            &state,
            "GET",
            "/api/preferences",
            &[("x-user-id", "77")],
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(body.is_null());
    }

    #[tokio::test]
    async fn anonymous_suggestion_save_requires_phone() {
        let state = test_state().await;
        let (status, body) = send(
            &state,
            "POST",
            "/api/suggestions",
            &[],
            Some(json!({"destination": "Dubai", "save": true})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["field"], "phone");
    }

    #[tokio::test]
    async fn analytics_requires_agency_or_admin() {
        let state = test_state().await;
        let (status, _) = send(&state, "GET", "/api/analytics", &[], None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = send(
            &state,
            "GET",
            "/api/analytics",
            &[("x-user-id", "3"), ("x-user-role", "traveler")],
            None,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = send(
            &state,
            "GET",
            "/api/analytics",
            &[("x-user-id", "3"), ("x-user-role", "agency")],
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["totals"]["interactions"].is_i64());
    }
}
