//! Marketing funnel: referral codes and the append-only interaction log
//! that payment webhooks and offer impressions feed into.

use crate::config::ReferralConfig;
use crate::error::{Result as TbResult, StoreError, TourbotError, ValidationError};
use crate::store::{FunnelEvent, FunnelInteraction, NewFunnelEvent, Referral, Store};
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::Rng;
use serde_json::Value;
use tracing::info;

const CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// How many fresh codes we try before giving up on a pathological
/// collision streak.
const MAX_CODE_ATTEMPTS: usize = 5;

/// Uppercase alphanumeric code from the OS CSPRNG.
pub fn generate_referral_code(length: usize) -> String {
    (0..length)
        .map(|_| {
            let idx = OsRng.gen_range(0..CODE_CHARSET.len());
            CODE_CHARSET[idx] as char
        })
        .collect()
}

/// Create a referral with a fresh unique code. Collisions retry with a new
/// code; anything else propagates.
pub async fn create_referral(
    store: &dyn Store,
    config: &ReferralConfig,
    offer_id: i64,
    created_by: Option<i64>,
    metadata: Option<&Value>,
    expires_at: Option<DateTime<Utc>>,
) -> Result<Referral> {
    let expires_at =
        expires_at.or_else(|| Some(Utc::now() + Duration::days(config.ttl_days)));
    create_referral_with(
        store,
        || generate_referral_code(config.code_length),
        offer_id,
        created_by,
        metadata,
        expires_at,
    )
    .await
}

async fn create_referral_with(
    store: &dyn Store,
    mut next_code: impl FnMut() -> String,
    offer_id: i64,
    created_by: Option<i64>,
    metadata: Option<&Value>,
    expires_at: Option<DateTime<Utc>>,
) -> Result<Referral> {
    let mut last_err = None;
    for _ in 0..MAX_CODE_ATTEMPTS {
        let code = next_code();
        match store
            .insert_referral(&code, offer_id, created_by, metadata, expires_at)
            .await
        {
            Ok(referral) => {
                info!(code = %referral.code, offer_id, "referral created");
                return Ok(referral);
            }
            Err(e) => match e.downcast_ref::<StoreError>() {
                Some(StoreError::Conflict { .. }) => {
                    last_err = Some(e);
                }
                _ => return Err(e),
            },
        }
    }
    Err(last_err
        .unwrap_or_else(|| anyhow::anyhow!("referral code generation exhausted its attempts")))
}

/// A referral is live until its expiry passes. Referrals without an expiry
/// never expire.
pub fn is_live(referral: &Referral, now: DateTime<Utc>) -> bool {
    referral.expires_at.map_or(true, |e| e > now)
}

/// Log a caller-reported funnel event (impression, click, checkout start),
/// attributing it to a referral only while the referral is live.
pub async fn record_event(
    store: &dyn Store,
    event: FunnelEvent,
    offer_id: i64,
    referral: Option<&Referral>,
    user_id: Option<i64>,
    session_id: &str,
    payload: Option<Value>,
) -> Result<FunnelInteraction> {
    let live = referral.filter(|r| is_live(r, Utc::now()));
    store
        .insert_funnel_event(&NewFunnelEvent {
            event,
            offer_id,
            referral_id: live.map(|r| r.id),
            referral_code: live.map(|r| r.code.clone()).unwrap_or_default(),
            user_id,
            session_id: session_id.to_owned(),
            payload,
        })
        .await
}

/// Log an offer impression.
pub async fn record_impression(
    store: &dyn Store,
    offer_id: i64,
    referral: Option<&Referral>,
    user_id: Option<i64>,
    session_id: &str,
) -> Result<FunnelInteraction> {
    record_event(
        store,
        FunnelEvent::Impression,
        offer_id,
        referral,
        user_id,
        session_id,
        None,
    )
    .await
}

/// Resolve a payment webhook to its referral and log the terminal funnel
/// event. An unknown code is a client error naming the offending field.
/// Expired referrals still resolve: the payment may complete after expiry.
pub async fn resolve_payment(
    store: &dyn Store,
    referral_code: &str,
    succeeded: bool,
    payload: Option<Value>,
) -> TbResult<FunnelInteraction> {
    let referral = store
        .referral_by_code(referral_code)
        .await
        .map_err(TourbotError::Other)?
        .ok_or(ValidationError::UnknownReference {
            field: "referral_code",
            value: referral_code.to_owned(),
        })?;

    let event = if succeeded {
        FunnelEvent::PaymentSuccess
    } else {
        FunnelEvent::PaymentFailed
    };
    let interaction = store
        .insert_funnel_event(&NewFunnelEvent {
            event,
            offer_id: referral.offer_id,
            referral_id: Some(referral.id),
            referral_code: referral.code.clone(),
            user_id: None,
            session_id: String::new(),
            payload,
        })
        .await
        .map_err(TourbotError::Other)?;
    info!(code = %referral.code, event = event.as_str(), "payment webhook recorded");
    Ok(interaction)
}

/// Log a checkout start against a referral.
pub async fn record_checkout(
    store: &dyn Store,
    referral: &Referral,
    user_id: Option<i64>,
    session_id: &str,
) -> Result<FunnelInteraction> {
    store
        .insert_funnel_event(&NewFunnelEvent {
            event: FunnelEvent::CheckoutStart,
            offer_id: referral.offer_id,
            referral_id: Some(referral.id),
            referral_code: referral.code.clone(),
            user_id,
            session_id: session_id.to_owned(),
            payload: None,
        })
        .await
}
