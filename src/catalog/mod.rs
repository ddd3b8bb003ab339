//! Read-side knowledge lookup: tours, visa entries, and the agency ranking
//! fed into every chatbot reply.

mod keywords;

pub use keywords::extract_keywords;

use crate::store::{AgencyStats, Store, Tour, VisaKnowledge};
use anyhow::Result;
use chrono::NaiveDate;
use std::cmp::Ordering;

/// How many tours/knowledge rows each reply carries.
pub const LOOKUP_LIMIT: i64 = 3;
/// How many ranked agencies each reply carries.
pub const AGENCY_LIMIT: usize = 5;

/// Tour lookup outcome. `keyword_matched` tells the reply stage whether the
/// tours actually answer the message or are just recent filler for the
/// prompt context.
pub struct TourLookup {
    pub tours: Vec<Tour>,
    pub keyword_matched: bool,
}

/// Active future tours matching any keyword, soonest departure first. When
/// nothing matches (or no keywords were extracted), falls back to the most
/// recently created active tours so the bot always has something to offer.
pub async fn relevant_tours(
    store: &dyn Store,
    keywords: &[String],
    today: NaiveDate,
    limit: i64,
) -> Result<TourLookup> {
    if !keywords.is_empty() {
        let matched = store.search_future_tours(keywords, today, limit).await?;
        if !matched.is_empty() {
            return Ok(TourLookup {
                tours: matched,
                keyword_matched: true,
            });
        }
    }
    Ok(TourLookup {
        tours: store.recent_active_tours(limit).await?,
        keyword_matched: false,
    })
}

/// Active visa-knowledge entries matching any keyword over country/visa type.
pub async fn visa_knowledge(
    store: &dyn Store,
    keywords: &[String],
    limit: i64,
) -> Result<Vec<VisaKnowledge>> {
    if keywords.is_empty() {
        return Ok(Vec::new());
    }
    store.search_visa_knowledge(keywords, limit).await
}

/// Top agencies by the ranking below. Agencies with zero active tours never
/// appear (the store excludes them from the aggregate).
pub async fn top_agencies(
    store: &dyn Store,
    today: NaiveDate,
    limit: usize,
) -> Result<Vec<AgencyStats>> {
    let mut stats = store.agency_stats(today).await?;
    rank_agencies(&mut stats);
    stats.truncate(limit);
    Ok(stats)
}

/// Ranking: featured agencies first, then lower `featured_priority`, then
/// more active tours, then cheaper average price. Missing averages sort last.
pub fn rank_agencies(stats: &mut [AgencyStats]) {
    stats.sort_by(|a, b| {
        b.is_featured
            .cmp(&a.is_featured)
            .then(a.featured_priority.cmp(&b.featured_priority))
            .then(b.active_tours.cmp(&a.active_tours))
            .then(cmp_avg_price(a.avg_price, b.avg_price))
            .then(a.id.cmp(&b.id))
    });
}

fn cmp_avg_price(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.total_cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
