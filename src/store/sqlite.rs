use super::{
    AgencyStats, AnalyticsSummary, AnalyticsTotals, ChatInteraction, ChatLead, ChatMessage,
    DestinationCount, Exchange, ExtractedData, FunnelEvent, FunnelInteraction, Intent, IntentCount,
    LeadType, NewFunnelEvent, NewLead, NewOffer, Offer, OfferFilter, PreferenceUpsert, Referral,
    Store, SuggestionCriteria, Tour, TravelStyle, UserPreference, VisaKnowledge,
};
use crate::error::StoreError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

/// SQLite-backed store using an sqlx async pool.
pub struct SqliteStore {
    pool: SqlitePool,
}

// ── Seed inputs (used by tests and the `seed` command) ───────────

#[derive(Debug, Clone, Default)]
pub struct NewAgency {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub company_name: String,
    pub tagline: String,
    pub is_featured: bool,
    pub featured_priority: i64,
    pub is_active: bool,
}

#[derive(Debug, Clone)]
pub struct NewTour {
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
}

#[derive(Debug, Clone, Default)]
pub struct NewVisaKnowledge {
    pub country: String,
    pub visa_type: String,
    pub summary: String,
    pub requirements: Vec<String>,
    pub processing_time: String,
    pub notes: String,
    pub source_url: String,
    pub is_active: bool,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    username          TEXT NOT NULL UNIQUE,
    first_name        TEXT NOT NULL DEFAULT '',
    last_name         TEXT NOT NULL DEFAULT '',
    company_name      TEXT NOT NULL DEFAULT '',
    tagline           TEXT NOT NULL DEFAULT '',
    role              TEXT NOT NULL DEFAULT 'traveler',
    is_active         INTEGER NOT NULL DEFAULT 1,
    is_featured_agency INTEGER NOT NULL DEFAULT 0,
    featured_priority INTEGER NOT NULL DEFAULT 0,
    created_at        TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS tours (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    agency_id        INTEGER REFERENCES users(id) ON DELETE SET NULL,
    title            TEXT NOT NULL,
    description      TEXT NOT NULL DEFAULT '',
    destination      TEXT NOT NULL,
    start_date       TEXT NOT NULL,
    end_date         TEXT NOT NULL,
    price            REAL NOT NULL,
    is_active        INTEGER NOT NULL DEFAULT 1,
    is_featured      INTEGER NOT NULL DEFAULT 0,
    is_discounted    INTEGER NOT NULL DEFAULT 0,
    discount_percent INTEGER,
    travel_style     TEXT NOT NULL DEFAULT 'general',
    created_at       TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_tours_active_start ON tours(is_active, start_date);
CREATE INDEX IF NOT EXISTS idx_tours_agency ON tours(agency_id);

CREATE TABLE IF NOT EXISTS visa_knowledge (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    country         TEXT NOT NULL,
    visa_type       TEXT NOT NULL DEFAULT '',
    summary         TEXT NOT NULL DEFAULT '',
    requirements    TEXT NOT NULL DEFAULT '[]',
    processing_time TEXT NOT NULL DEFAULT '',
    notes           TEXT NOT NULL DEFAULT '',
    source_url      TEXT NOT NULL DEFAULT '',
    is_active       INTEGER NOT NULL DEFAULT 1,
    last_updated    TEXT NOT NULL,
    UNIQUE(country, visa_type)
);

CREATE TABLE IF NOT EXISTS chat_messages (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id    INTEGER,
    message    TEXT NOT NULL,
    response   TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_chat_messages_user ON chat_messages(user_id, created_at DESC);

CREATE TABLE IF NOT EXISTS chat_interactions (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id        INTEGER,
    intent         TEXT NOT NULL DEFAULT 'unknown',
    raw_query      TEXT NOT NULL,
    extracted_data TEXT NOT NULL DEFAULT '{}',
    created_at     TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_chat_interactions_intent ON chat_interactions(intent);

CREATE TABLE IF NOT EXISTS chat_leads (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id     INTEGER,
    name        TEXT NOT NULL,
    phone       TEXT NOT NULL,
    lead_type   TEXT NOT NULL,
    destination TEXT NOT NULL DEFAULT '',
    budget      REAL,
    travel_date TEXT,
    message     TEXT NOT NULL DEFAULT '',
    metadata    TEXT,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS offers (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    title        TEXT NOT NULL,
    slug         TEXT NOT NULL UNIQUE,
    description  TEXT NOT NULL DEFAULT '',
    destination  TEXT NOT NULL DEFAULT '',
    service_type TEXT NOT NULL DEFAULT 'tour',
    is_premium   INTEGER NOT NULL DEFAULT 0,
    premium_type TEXT NOT NULL DEFAULT '',
    price_cents  INTEGER NOT NULL DEFAULT 0,
    image_url    TEXT NOT NULL DEFAULT '',
    metadata     TEXT,
    is_active    INTEGER NOT NULL DEFAULT 1,
    created_at   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS referrals (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    code       TEXT NOT NULL UNIQUE,
    offer_id   INTEGER NOT NULL REFERENCES offers(id) ON DELETE CASCADE,
    created_by INTEGER,
    metadata   TEXT,
    created_at TEXT NOT NULL,
    expires_at TEXT
);

CREATE TABLE IF NOT EXISTS funnel_interactions (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    event         TEXT NOT NULL,
    offer_id      INTEGER NOT NULL REFERENCES offers(id) ON DELETE CASCADE,
    referral_id   INTEGER REFERENCES referrals(id) ON DELETE SET NULL,
    referral_code TEXT NOT NULL DEFAULT '',
    user_id       INTEGER,
    session_id    TEXT NOT NULL DEFAULT '',
    payload       TEXT,
    created_at    TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_funnel_offer ON funnel_interactions(offer_id, event);

CREATE TABLE IF NOT EXISTS user_preferences (
    id                    INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id               INTEGER,
    phone                 TEXT NOT NULL DEFAULT '',
    favorite_destinations TEXT NOT NULL DEFAULT '[]',
    travel_style          TEXT NOT NULL DEFAULT 'general',
    budget_min            REAL,
    budget_max            REAL,
    notes                 TEXT NOT NULL DEFAULT '',
    updated_at            TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_pref_user
    ON user_preferences(user_id) WHERE user_id IS NOT NULL;
CREATE UNIQUE INDEX IF NOT EXISTS idx_pref_phone
    ON user_preferences(phone) WHERE phone != '';
";

impl SqliteStore {
    /// Connect to `url` and ensure the schema exists.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .with_context(|| format!("connecting to database {url}"))?;
        Self::init_schema(&pool).await?;
        Ok(Self { pool })
    }

    /// Private in-memory database; one connection so every query sees the
    /// same data.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("opening in-memory database")?;
        Self::init_schema(&pool).await?;
        Ok(Self { pool })
    }

    async fn init_schema(pool: &SqlitePool) -> Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(pool)
            .await
            .map_err(|e| StoreError::Schema(e.to_string()))?;
        Ok(())
    }

    // ── Seed helpers ──────────────────────────────────────────────

    pub async fn insert_agency(&self, agency: &NewAgency) -> Result<i64> {
        let res = sqlx::query(
            "INSERT INTO users (username, first_name, last_name, company_name, tagline,
                                role, is_active, is_featured_agency, featured_priority, created_at)
             VALUES (?, ?, ?, ?, ?, 'agency', ?, ?, ?, ?)",
        )
        .bind(&agency.username)
        .bind(&agency.first_name)
        .bind(&agency.last_name)
        .bind(&agency.company_name)
        .bind(&agency.tagline)
        .bind(agency.is_active)
        .bind(agency.is_featured)
        .bind(agency.featured_priority)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .context("insert agency")?;
        Ok(res.last_insert_rowid())
    }

    pub async fn insert_tour(&self, tour: &NewTour) -> Result<i64> {
        let res = sqlx::query(
            "INSERT INTO tours (agency_id, title, description, destination, start_date, end_date,
                                price, is_active, is_featured, is_discounted, discount_percent,
                                travel_style, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(tour.agency_id)
        .bind(&tour.title)
        .bind(&tour.description)
        .bind(&tour.destination)
        .bind(tour.start_date)
        .bind(tour.end_date)
        .bind(tour.price)
        .bind(tour.is_active)
        .bind(tour.is_featured)
        .bind(tour.is_discounted)
        .bind(tour.discount_percent)
        .bind(tour.travel_style.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .context("insert tour")?;
        Ok(res.last_insert_rowid())
    }

    pub async fn insert_visa_knowledge(&self, entry: &NewVisaKnowledge) -> Result<i64> {
        let res = sqlx::query(
            "INSERT INTO visa_knowledge (country, visa_type, summary, requirements,
                                         processing_time, notes, source_url, is_active, last_updated)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.country)
        .bind(&entry.visa_type)
        .bind(&entry.summary)
        .bind(serde_json::to_string(&entry.requirements)?)
        .bind(&entry.processing_time)
        .bind(&entry.notes)
        .bind(&entry.source_url)
        .bind(entry.is_active)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .context("insert visa knowledge")?;
        Ok(res.last_insert_rowid())
    }
}

// ── Row mapping ───────────────────────────────────────────────────

fn display_name(
    company: &str,
    first: &str,
    last: &str,
    username: &str,
) -> Option<String> {
    if !company.trim().is_empty() {
        return Some(company.trim().to_owned());
    }
    let full = format!("{} {}", first.trim(), last.trim());
    let full = full.trim();
    if !full.is_empty() {
        return Some(full.to_owned());
    }
    if !username.trim().is_empty() {
        return Some(username.trim().to_owned());
    }
    None
}

fn json_opt(raw: Option<String>) -> Option<Value> {
    raw.and_then(|s| serde_json::from_str(&s).ok())
}

fn json_list(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

fn tour_from_row(row: &SqliteRow) -> Result<Tour> {
    let company: String = row.try_get("company_name").unwrap_or_default();
    let first: String = row.try_get("first_name").unwrap_or_default();
    let last: String = row.try_get("last_name").unwrap_or_default();
    let username: String = row.try_get("username").unwrap_or_default();
    let style: String = row.try_get("travel_style")?;
    Ok(Tour {
        id: row.try_get("id")?,
        agency_id: row.try_get("agency_id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        destination: row.try_get("destination")?,
        start_date: row.try_get("start_date")?,
        end_date: row.try_get("end_date")?,
        price: row.try_get("price")?,
        is_active: row.try_get("is_active")?,
        is_featured: row.try_get("is_featured")?,
        is_discounted: row.try_get("is_discounted")?,
        discount_percent: row.try_get("discount_percent")?,
        travel_style: TravelStyle::parse(&style).unwrap_or_default(),
        created_at: row.try_get("created_at")?,
        agency_name: display_name(&company, &first, &last, &username),
    })
}

const TOUR_COLUMNS: &str = "t.id, t.agency_id, t.title, t.description, t.destination,
    t.start_date, t.end_date, t.price, t.is_active, t.is_featured, t.is_discounted,
    t.discount_percent, t.travel_style, t.created_at,
    u.company_name, u.first_name, u.last_name, u.username";

fn knowledge_from_row(row: &SqliteRow) -> Result<VisaKnowledge> {
    let requirements: String = row.try_get("requirements")?;
    Ok(VisaKnowledge {
        id: row.try_get("id")?,
        country: row.try_get("country")?,
        visa_type: row.try_get("visa_type")?,
        summary: row.try_get("summary")?,
        requirements: json_list(&requirements),
        processing_time: row.try_get("processing_time")?,
        notes: row.try_get("notes")?,
        source_url: row.try_get("source_url")?,
        is_active: row.try_get("is_active")?,
        last_updated: row.try_get("last_updated")?,
    })
}

fn lead_from_row(row: &SqliteRow) -> Result<ChatLead> {
    let lead_type: String = row.try_get("lead_type")?;
    let metadata: Option<String> = row.try_get("metadata")?;
    Ok(ChatLead {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        name: row.try_get("name")?,
        phone: row.try_get("phone")?,
        lead_type: LeadType::parse(&lead_type).unwrap_or(LeadType::Tour),
        destination: row.try_get("destination")?,
        budget: row.try_get("budget")?,
        travel_date: row.try_get("travel_date")?,
        message: row.try_get("message")?,
        metadata: json_opt(metadata),
        created_at: row.try_get("created_at")?,
    })
}

fn offer_from_row(row: &SqliteRow) -> Result<Offer> {
    let service_type: String = row.try_get("service_type")?;
    let metadata: Option<String> = row.try_get("metadata")?;
    Ok(Offer {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        slug: row.try_get("slug")?,
        description: row.try_get("description")?,
        destination: row.try_get("destination")?,
        service_type: LeadType::parse(&service_type).unwrap_or(LeadType::Tour),
        is_premium: row.try_get("is_premium")?,
        premium_type: row.try_get("premium_type")?,
        price_cents: row.try_get("price_cents")?,
        image_url: row.try_get("image_url")?,
        metadata: json_opt(metadata),
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
    })
}

fn referral_from_row(row: &SqliteRow) -> Result<Referral> {
    let metadata: Option<String> = row.try_get("metadata")?;
    Ok(Referral {
        id: row.try_get("id")?,
        code: row.try_get("code")?,
        offer_id: row.try_get("offer_id")?,
        created_by: row.try_get("created_by")?,
        metadata: json_opt(metadata),
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
    })
}

fn funnel_event_from_row(row: &SqliteRow) -> Result<FunnelInteraction> {
    let event: String = row.try_get("event")?;
    let payload: Option<String> = row.try_get("payload")?;
    Ok(FunnelInteraction {
        id: row.try_get("id")?,
        event: FunnelEvent::parse(&event)
            .ok_or_else(|| anyhow::anyhow!("unknown funnel event: {event}"))?,
        offer_id: row.try_get("offer_id")?,
        referral_id: row.try_get("referral_id")?,
        referral_code: row.try_get("referral_code")?,
        user_id: row.try_get("user_id")?,
        session_id: row.try_get("session_id")?,
        payload: json_opt(payload),
        created_at: row.try_get("created_at")?,
    })
}

fn preference_from_row(row: &SqliteRow) -> Result<UserPreference> {
    let favorites: String = row.try_get("favorite_destinations")?;
    let style: String = row.try_get("travel_style")?;
    Ok(UserPreference {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        phone: row.try_get("phone")?,
        favorite_destinations: json_list(&favorites),
        travel_style: TravelStyle::parse(&style).unwrap_or_default(),
        budget_min: row.try_get("budget_min")?,
        budget_max: row.try_get("budget_max")?,
        notes: row.try_get("notes")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// OR-clause over instr(lower(col), kw) for each keyword/column pair.
fn keyword_clause(columns: &[&str], keyword_count: usize) -> String {
    let mut parts = Vec::with_capacity(columns.len() * keyword_count);
    for _ in 0..keyword_count {
        for col in columns {
            parts.push(format!("instr(lower({col}), ?) > 0"));
        }
    }
    parts.join(" OR ")
}

#[async_trait]
impl Store for SqliteStore {
    async fn search_future_tours(
        &self,
        keywords: &[String],
        from: NaiveDate,
        limit: i64,
    ) -> Result<Vec<Tour>> {
        let mut sql = format!(
            "SELECT {TOUR_COLUMNS} FROM tours t
             LEFT JOIN users u ON u.id = t.agency_id
             WHERE t.is_active = 1 AND t.start_date >= ?"
        );
        if !keywords.is_empty() {
            let clause = keyword_clause(&["t.destination", "t.title", "t.description"], keywords.len());
            sql.push_str(&format!(" AND ({clause})"));
        }
        sql.push_str(" ORDER BY t.start_date ASC, t.id ASC LIMIT ?");

        let mut query = sqlx::query(&sql).bind(from);
        for kw in keywords {
            let kw = kw.to_lowercase();
            query = query.bind(kw.clone()).bind(kw.clone()).bind(kw);
        }
        let rows = query
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .context("search future tours")?;
        rows.iter().map(tour_from_row).collect()
    }

    async fn recent_active_tours(&self, limit: i64) -> Result<Vec<Tour>> {
        let rows = sqlx::query(&format!(
            "SELECT {TOUR_COLUMNS} FROM tours t
             LEFT JOIN users u ON u.id = t.agency_id
             WHERE t.is_active = 1
             ORDER BY t.created_at DESC, t.id DESC LIMIT ?"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("recent active tours")?;
        rows.iter().map(tour_from_row).collect()
    }

    async fn tour_by_id(&self, id: i64) -> Result<Option<Tour>> {
        let row = sqlx::query(&format!(
            "SELECT {TOUR_COLUMNS} FROM tours t
             LEFT JOIN users u ON u.id = t.agency_id
             WHERE t.id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("tour by id")?;
        row.as_ref().map(tour_from_row).transpose()
    }

    async fn suggest_tours(&self, criteria: &SuggestionCriteria, limit: i64) -> Result<Vec<Tour>> {
        let mut sql = format!(
            "SELECT {TOUR_COLUMNS} FROM tours t
             LEFT JOIN users u ON u.id = t.agency_id
             WHERE t.is_active = 1"
        );
        let destinations: Vec<String> = criteria
            .favorite_destinations
            .iter()
            .map(|d| d.to_lowercase())
            .filter(|d| !d.is_empty())
            .collect();
        if !destinations.is_empty() {
            let clause = keyword_clause(&["t.destination"], destinations.len());
            sql.push_str(&format!(" AND ({clause})"));
        }
        if criteria.travel_style != TravelStyle::General {
            sql.push_str(" AND t.travel_style = ?");
        }
        if criteria.budget_min.is_some() {
            sql.push_str(" AND t.price >= ?");
        }
        if criteria.budget_max.is_some() {
            sql.push_str(" AND t.price <= ?");
        }
        sql.push_str(" ORDER BY t.price ASC, t.created_at DESC, t.id ASC LIMIT ?");

        let mut query = sqlx::query(&sql);
        for dest in &destinations {
            query = query.bind(dest.clone());
        }
        if criteria.travel_style != TravelStyle::General {
            query = query.bind(criteria.travel_style.as_str());
        }
        if let Some(min) = criteria.budget_min {
            query = query.bind(min);
        }
        if let Some(max) = criteria.budget_max {
            query = query.bind(max);
        }
        let rows = query
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .context("suggest tours")?;
        rows.iter().map(tour_from_row).collect()
    }

    async fn recent_active_tours_excluding(
        &self,
        exclude: &[i64],
        limit: i64,
    ) -> Result<Vec<Tour>> {
        let mut sql = format!(
            "SELECT {TOUR_COLUMNS} FROM tours t
             LEFT JOIN users u ON u.id = t.agency_id
             WHERE t.is_active = 1"
        );
        if !exclude.is_empty() {
            let placeholders = vec!["?"; exclude.len()].join(", ");
            sql.push_str(&format!(" AND t.id NOT IN ({placeholders})"));
        }
        sql.push_str(" ORDER BY t.created_at DESC, t.id DESC LIMIT ?");

        let mut query = sqlx::query(&sql);
        for id in exclude {
            query = query.bind(id);
        }
        let rows = query
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .context("recent tours excluding")?;
        rows.iter().map(tour_from_row).collect()
    }

    async fn search_visa_knowledge(
        &self,
        keywords: &[String],
        limit: i64,
    ) -> Result<Vec<VisaKnowledge>> {
        let mut sql = String::from("SELECT * FROM visa_knowledge WHERE is_active = 1");
        if !keywords.is_empty() {
            let clause = keyword_clause(&["country", "visa_type"], keywords.len());
            sql.push_str(&format!(" AND ({clause})"));
        }
        sql.push_str(" ORDER BY last_updated DESC, country ASC, visa_type ASC LIMIT ?");

        let mut query = sqlx::query(&sql);
        for kw in keywords {
            let kw = kw.to_lowercase();
            query = query.bind(kw.clone()).bind(kw);
        }
        let rows = query
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .context("search visa knowledge")?;
        rows.iter().map(knowledge_from_row).collect()
    }

    async fn agency_stats(&self, today: NaiveDate) -> Result<Vec<AgencyStats>> {
        let rows = sqlx::query(
            "SELECT u.id, u.username, u.first_name, u.last_name, u.company_name, u.tagline,
                    u.is_featured_agency, u.featured_priority,
                    COUNT(*) AS active_tours,
                    COALESCE(SUM(CASE WHEN t.is_featured THEN 1 ELSE 0 END), 0) AS featured_tours,
                    COALESCE(SUM(CASE WHEN t.is_discounted THEN 1 ELSE 0 END), 0) AS discounted_tours,
                    AVG(t.price) AS avg_price,
                    MIN(CASE WHEN t.start_date >= ? THEN t.start_date END) AS next_departure
             FROM users u
             JOIN tours t ON t.agency_id = u.id AND t.is_active = 1
             WHERE u.role = 'agency' AND u.is_active = 1
             GROUP BY u.id",
        )
        .bind(today)
        .fetch_all(&self.pool)
        .await
        .context("agency stats")?;

        let mut stats = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: i64 = row.try_get("id")?;
            let company: String = row.try_get("company_name")?;
            let first: String = row.try_get("first_name")?;
            let last: String = row.try_get("last_name")?;
            let username: String = row.try_get("username")?;
            let tagline: String = row.try_get("tagline")?;

            let destination_rows = sqlx::query(
                "SELECT DISTINCT destination FROM tours
                 WHERE agency_id = ? AND is_active = 1
                 ORDER BY destination LIMIT 3",
            )
            .bind(id)
            .fetch_all(&self.pool)
            .await
            .context("agency top destinations")?;
            let top_destinations = destination_rows
                .iter()
                .map(|r| r.try_get::<String, _>("destination"))
                .collect::<std::result::Result<Vec<_>, _>>()?;

            stats.push(AgencyStats {
                id,
                display_name: display_name(&company, &first, &last, &username)
                    .unwrap_or_else(|| format!("agency-{id}")),
                tagline: if tagline.trim().is_empty() {
                    None
                } else {
                    Some(tagline)
                },
                is_featured: row.try_get("is_featured_agency")?,
                featured_priority: row.try_get("featured_priority")?,
                active_tours: row.try_get("active_tours")?,
                featured_tours: row.try_get("featured_tours")?,
                discounted_tours: row.try_get("discounted_tours")?,
                avg_price: row.try_get("avg_price")?,
                next_departure: row.try_get("next_departure")?,
                top_destinations,
            });
        }
        Ok(stats)
    }

    async fn insert_chat_message(
        &self,
        user_id: Option<i64>,
        message: &str,
        response: &str,
    ) -> Result<ChatMessage> {
        let created_at = Utc::now();
        let res = sqlx::query(
            "INSERT INTO chat_messages (user_id, message, response, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(message)
        .bind(response)
        .bind(created_at)
        .execute(&self.pool)
        .await
        .context("insert chat message")?;
        Ok(ChatMessage {
            id: res.last_insert_rowid(),
            user_id,
            message: message.to_owned(),
            response: response.to_owned(),
            created_at,
        })
    }

    async fn recent_history(&self, user_id: i64, limit: i64) -> Result<Vec<Exchange>> {
        let rows = sqlx::query(
            "SELECT message, response FROM chat_messages
             WHERE user_id = ? ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("recent history")?;
        let mut history: Vec<Exchange> = rows
            .iter()
            .map(|row| {
                Ok(Exchange {
                    message: row.try_get("message")?,
                    response: row.try_get("response")?,
                })
            })
            .collect::<Result<_>>()?;
        history.reverse();
        Ok(history)
    }

    async fn list_messages(&self, user_id: i64) -> Result<Vec<ChatMessage>> {
        let rows = sqlx::query(
            "SELECT * FROM chat_messages WHERE user_id = ? ORDER BY created_at DESC, id DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("list messages")?;
        rows.iter()
            .map(|row| {
                Ok(ChatMessage {
                    id: row.try_get("id")?,
                    user_id: row.try_get("user_id")?,
                    message: row.try_get("message")?,
                    response: row.try_get("response")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    async fn insert_interaction(
        &self,
        user_id: Option<i64>,
        intent: Intent,
        raw_query: &str,
        extracted: &ExtractedData,
    ) -> Result<ChatInteraction> {
        let created_at = Utc::now();
        let res = sqlx::query(
            "INSERT INTO chat_interactions (user_id, intent, raw_query, extracted_data, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(intent.as_str())
        .bind(raw_query)
        .bind(serde_json::to_string(extracted)?)
        .bind(created_at)
        .execute(&self.pool)
        .await
        .context("insert interaction")?;
        Ok(ChatInteraction {
            id: res.last_insert_rowid(),
            user_id,
            intent,
            raw_query: raw_query.to_owned(),
            extracted_data: extracted.clone(),
            created_at,
        })
    }

    async fn list_interactions(&self, limit: i64) -> Result<Vec<ChatInteraction>> {
        let rows = sqlx::query(
            "SELECT id, user_id, intent, raw_query, extracted_data, created_at
             FROM chat_interactions ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("list interactions")?;
        rows.iter()
            .map(|row| {
                let intent: String = row.try_get("intent")?;
                let extracted: String = row.try_get("extracted_data")?;
                Ok(ChatInteraction {
                    id: row.try_get("id")?,
                    user_id: row.try_get("user_id")?,
                    intent: Intent::parse_or_unknown(&intent),
                    raw_query: row.try_get("raw_query")?,
                    extracted_data: serde_json::from_str(&extracted)
                        .context("parse extracted_data")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    async fn insert_lead(&self, user_id: Option<i64>, lead: &NewLead) -> Result<ChatLead> {
        let created_at = Utc::now();
        let res = sqlx::query(
            "INSERT INTO chat_leads (user_id, name, phone, lead_type, destination, budget,
                                     travel_date, message, metadata, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(&lead.name)
        .bind(&lead.phone)
        .bind(lead.lead_type.as_str())
        .bind(&lead.destination)
        .bind(lead.budget)
        .bind(lead.travel_date)
        .bind(&lead.message)
        .bind(lead.metadata.as_ref().map(ToString::to_string))
        .bind(created_at)
        .execute(&self.pool)
        .await
        .context("insert lead")?;
        Ok(ChatLead {
            id: res.last_insert_rowid(),
            user_id,
            name: lead.name.clone(),
            phone: lead.phone.clone(),
            lead_type: lead.lead_type,
            destination: lead.destination.clone(),
            budget: lead.budget,
            travel_date: lead.travel_date,
            message: lead.message.clone(),
            metadata: lead.metadata.clone(),
            created_at,
        })
    }

    async fn list_leads(&self) -> Result<Vec<ChatLead>> {
        let rows = sqlx::query("SELECT * FROM chat_leads ORDER BY created_at DESC, id DESC")
            .fetch_all(&self.pool)
            .await
            .context("list leads")?;
        rows.iter().map(lead_from_row).collect()
    }

    async fn insert_offer(&self, offer: &NewOffer) -> Result<Offer> {
        let created_at = Utc::now();
        let res = sqlx::query(
            "INSERT INTO offers (title, slug, description, destination, service_type, is_premium,
                                 premium_type, price_cents, image_url, metadata, is_active, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&offer.title)
        .bind(&offer.slug)
        .bind(&offer.description)
        .bind(&offer.destination)
        .bind(offer.service_type.as_str())
        .bind(offer.is_premium)
        .bind(&offer.premium_type)
        .bind(offer.price_cents)
        .bind(&offer.image_url)
        .bind(offer.metadata.as_ref().map(ToString::to_string))
        .bind(offer.is_active)
        .bind(created_at)
        .execute(&self.pool)
        .await
        .context("insert offer")?;
        Ok(Offer {
            id: res.last_insert_rowid(),
            title: offer.title.clone(),
            slug: offer.slug.clone(),
            description: offer.description.clone(),
            destination: offer.destination.clone(),
            service_type: offer.service_type,
            is_premium: offer.is_premium,
            premium_type: offer.premium_type.clone(),
            price_cents: offer.price_cents,
            image_url: offer.image_url.clone(),
            metadata: offer.metadata.clone(),
            is_active: offer.is_active,
            created_at,
        })
    }

    async fn list_offers(&self, filter: &OfferFilter) -> Result<Vec<Offer>> {
        let mut sql = String::from("SELECT * FROM offers WHERE is_active = 1");
        if filter.is_premium.is_some() {
            sql.push_str(" AND is_premium = ?");
        }
        if filter.premium_type.is_some() {
            sql.push_str(" AND lower(premium_type) = ?");
        }
        if filter.destination.is_some() {
            sql.push_str(" AND instr(lower(destination), ?) > 0");
        }
        if filter.service_type.is_some() {
            sql.push_str(" AND service_type = ?");
        }
        sql.push_str(" ORDER BY created_at DESC, id DESC");

        let mut query = sqlx::query(&sql);
        if let Some(premium) = filter.is_premium {
            query = query.bind(premium);
        }
        if let Some(ref premium_type) = filter.premium_type {
            query = query.bind(premium_type.to_lowercase());
        }
        if let Some(ref destination) = filter.destination {
            query = query.bind(destination.to_lowercase());
        }
        if let Some(service_type) = filter.service_type {
            query = query.bind(service_type.as_str());
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .context("list offers")?;
        rows.iter().map(offer_from_row).collect()
    }

    async fn offer_by_id(&self, id: i64) -> Result<Option<Offer>> {
        let row = sqlx::query("SELECT * FROM offers WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("offer by id")?;
        row.as_ref().map(offer_from_row).transpose()
    }

    async fn insert_referral(
        &self,
        code: &str,
        offer_id: i64,
        created_by: Option<i64>,
        metadata: Option<&Value>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Referral> {
        let created_at = Utc::now();
        let res = sqlx::query(
            "INSERT INTO referrals (code, offer_id, created_by, metadata, created_at, expires_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(code)
        .bind(offer_id)
        .bind(created_by)
        .bind(metadata.map(ToString::to_string))
        .bind(created_at)
        .bind(expires_at)
        .execute(&self.pool)
        .await;

        match res {
            Ok(done) => Ok(Referral {
                id: done.last_insert_rowid(),
                code: code.to_owned(),
                offer_id,
                created_by,
                metadata: metadata.cloned(),
                created_at,
                expires_at,
            }),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StoreError::Conflict {
                    entity: "referral".into(),
                    detail: format!("code {code} already exists"),
                }
                .into())
            }
            Err(e) => Err(e).context("insert referral"),
        }
    }

    async fn referral_by_code(&self, code: &str) -> Result<Option<Referral>> {
        let row = sqlx::query("SELECT * FROM referrals WHERE code = ?")
            .bind(code)
            .fetch_optional(&self.pool)
            .await
            .context("referral by code")?;
        row.as_ref().map(referral_from_row).transpose()
    }

    async fn insert_funnel_event(&self, event: &NewFunnelEvent) -> Result<FunnelInteraction> {
        let created_at = Utc::now();
        let res = sqlx::query(
            "INSERT INTO funnel_interactions (event, offer_id, referral_id, referral_code,
                                              user_id, session_id, payload, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(event.event.as_str())
        .bind(event.offer_id)
        .bind(event.referral_id)
        .bind(&event.referral_code)
        .bind(event.user_id)
        .bind(&event.session_id)
        .bind(event.payload.as_ref().map(ToString::to_string))
        .bind(created_at)
        .execute(&self.pool)
        .await
        .context("insert funnel event")?;
        Ok(FunnelInteraction {
            id: res.last_insert_rowid(),
            event: event.event,
            offer_id: event.offer_id,
            referral_id: event.referral_id,
            referral_code: event.referral_code.clone(),
            user_id: event.user_id,
            session_id: event.session_id.clone(),
            payload: event.payload.clone(),
            created_at,
        })
    }

    async fn list_funnel_events(&self, limit: i64) -> Result<Vec<FunnelInteraction>> {
        let rows = sqlx::query(
            "SELECT * FROM funnel_interactions ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("list funnel events")?;
        rows.iter().map(funnel_event_from_row).collect()
    }

    async fn preference_for(
        &self,
        user_id: Option<i64>,
        phone: Option<&str>,
    ) -> Result<Option<UserPreference>> {
        if let Some(uid) = user_id {
            let row = sqlx::query("SELECT * FROM user_preferences WHERE user_id = ?")
                .bind(uid)
                .fetch_optional(&self.pool)
                .await
                .context("preference by user")?;
            if let Some(ref row) = row {
                return Ok(Some(preference_from_row(row)?));
            }
        }
        if let Some(phone) = phone.map(str::trim).filter(|p| !p.is_empty()) {
            let row = sqlx::query("SELECT * FROM user_preferences WHERE phone = ?")
                .bind(phone)
                .fetch_optional(&self.pool)
                .await
                .context("preference by phone")?;
            if let Some(ref row) = row {
                return Ok(Some(preference_from_row(row)?));
            }
        }
        Ok(None)
    }

    async fn upsert_preference(&self, upsert: &PreferenceUpsert) -> Result<UserPreference> {
        let updated_at = Utc::now();
        let favorites = serde_json::to_string(&upsert.favorite_destinations)?;
        let existing = self
            .preference_for(upsert.user_id, Some(&upsert.phone))
            .await?;

        if let Some(existing) = existing {
            // An existing anonymous row may gain a phone; it never loses one.
            let phone = if existing.phone.is_empty() && !upsert.phone.trim().is_empty() {
                upsert.phone.trim().to_owned()
            } else {
                existing.phone.clone()
            };
            sqlx::query(
                "UPDATE user_preferences
                 SET phone = ?, favorite_destinations = ?, travel_style = ?,
                     budget_min = ?, budget_max = ?, notes = ?, updated_at = ?
                 WHERE id = ?",
            )
            .bind(&phone)
            .bind(&favorites)
            .bind(upsert.travel_style.as_str())
            .bind(upsert.budget_min)
            .bind(upsert.budget_max)
            .bind(&upsert.notes)
            .bind(updated_at)
            .bind(existing.id)
            .execute(&self.pool)
            .await
            .context("update preference")?;
            return Ok(UserPreference {
                id: existing.id,
                user_id: existing.user_id,
                phone,
                favorite_destinations: upsert.favorite_destinations.clone(),
                travel_style: upsert.travel_style,
                budget_min: upsert.budget_min,
                budget_max: upsert.budget_max,
                notes: upsert.notes.clone(),
                updated_at,
            });
        }

        let phone = upsert.phone.trim().to_owned();
        let res = sqlx::query(
            "INSERT INTO user_preferences (user_id, phone, favorite_destinations, travel_style,
                                           budget_min, budget_max, notes, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(upsert.user_id)
        .bind(&phone)
        .bind(&favorites)
        .bind(upsert.travel_style.as_str())
        .bind(upsert.budget_min)
        .bind(upsert.budget_max)
        .bind(&upsert.notes)
        .bind(updated_at)
        .execute(&self.pool)
        .await;

        match res {
            Ok(done) => Ok(UserPreference {
                id: done.last_insert_rowid(),
                user_id: upsert.user_id,
                phone,
                favorite_destinations: upsert.favorite_destinations.clone(),
                travel_style: upsert.travel_style,
                budget_min: upsert.budget_min,
                budget_max: upsert.budget_max,
                notes: upsert.notes.clone(),
                updated_at,
            }),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StoreError::Conflict {
                    entity: "user_preference".into(),
                    detail: "a preference already exists for this user or phone".into(),
                }
                .into())
            }
            Err(e) => Err(e).context("insert preference"),
        }
    }

    async fn analytics_summary(&self) -> Result<AnalyticsSummary> {
        let interactions: i64 = sqlx::query("SELECT COUNT(*) AS n FROM chat_interactions")
            .fetch_one(&self.pool)
            .await
            .context("count interactions")?
            .try_get("n")?;
        let leads: i64 = sqlx::query("SELECT COUNT(*) AS n FROM chat_leads")
            .fetch_one(&self.pool)
            .await
            .context("count leads")?
            .try_get("n")?;
        let tour_leads: i64 =
            sqlx::query("SELECT COUNT(*) AS n FROM chat_leads WHERE lead_type = 'tour'")
                .fetch_one(&self.pool)
                .await
                .context("count tour leads")?
                .try_get("n")?;
        let visa_leads: i64 =
            sqlx::query("SELECT COUNT(*) AS n FROM chat_leads WHERE lead_type = 'visa'")
                .fetch_one(&self.pool)
                .await
                .context("count visa leads")?
                .try_get("n")?;

        let destination_rows = sqlx::query(
            "SELECT destination, COUNT(*) AS n FROM chat_leads
             WHERE destination != ''
             GROUP BY destination ORDER BY n DESC, destination ASC LIMIT 5",
        )
        .fetch_all(&self.pool)
        .await
        .context("popular destinations")?;
        let popular_destinations = destination_rows
            .iter()
            .map(|row| {
                Ok(DestinationCount {
                    destination: row.try_get("destination")?,
                    count: row.try_get("n")?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let intent_rows = sqlx::query(
            "SELECT intent, COUNT(*) AS n FROM chat_interactions
             GROUP BY intent ORDER BY n DESC, intent ASC",
        )
        .fetch_all(&self.pool)
        .await
        .context("intent distribution")?;
        let intent_distribution = intent_rows
            .iter()
            .map(|row| {
                Ok(IntentCount {
                    intent: row.try_get("intent")?,
                    count: row.try_get("n")?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let conversion_rate_percent = if interactions > 0 {
            ((leads as f64 / interactions as f64) * 10_000.0).round() / 100.0
        } else {
            0.0
        };

        Ok(AnalyticsSummary {
            totals: AnalyticsTotals {
                interactions,
                leads,
                tour_leads,
                visa_leads,
                conversion_rate_percent,
            },
            popular_destinations,
            intent_distribution,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn future(days: i64) -> NaiveDate {
        (Utc::now() + Duration::days(days)).date_naive()
    }

    fn tour(destination: &str, title: &str, start_offset_days: i64, price: f64) -> NewTour {
        NewTour {
            agency_id: None,
            title: title.into(),
            description: String::new(),
            destination: destination.into(),
            start_date: future(start_offset_days),
            end_date: future(start_offset_days + 5),
            price,
            is_active: true,
            is_featured: false,
            is_discounted: false,
            discount_percent: None,
            travel_style: TravelStyle::General,
        }
    }

    #[tokio::test]
    async fn keyword_search_matches_destination_case_insensitively() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.insert_tour(&tour("Istanbul", "City break", 10, 500.0)).await.unwrap();
        store.insert_tour(&tour("Dubai", "Desert trip", 5, 700.0)).await.unwrap();

        let found = store
            .search_future_tours(&["istanbul".into()], Utc::now().date_naive(), 3)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].destination, "Istanbul");
    }

    #[tokio::test]
    async fn future_filter_excludes_departed_tours() {
        let store = SqliteStore::in_memory().await.unwrap();
        let mut past = tour("Paris", "Past tour", 0, 900.0);
        past.start_date = future(-10);
        past.end_date = future(-3);
        store.insert_tour(&past).await.unwrap();
        store.insert_tour(&tour("Paris", "Upcoming tour", 7, 800.0)).await.unwrap();

        let found = store
            .search_future_tours(&["paris".into()], Utc::now().date_naive(), 3)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].title, "Upcoming tour");
    }

    #[tokio::test]
    async fn future_tours_ordered_by_start_date() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.insert_tour(&tour("Rome", "Later", 30, 100.0)).await.unwrap();
        store.insert_tour(&tour("Rome", "Sooner", 3, 100.0)).await.unwrap();

        let found = store
            .search_future_tours(&["rome".into()], Utc::now().date_naive(), 3)
            .await
            .unwrap();
        assert_eq!(found[0].title, "Sooner");
        assert_eq!(found[1].title, "Later");
    }

    #[tokio::test]
    async fn recent_active_tours_skips_inactive() {
        let store = SqliteStore::in_memory().await.unwrap();
        let mut inactive = tour("Oslo", "Hidden", 4, 300.0);
        inactive.is_active = false;
        store.insert_tour(&inactive).await.unwrap();
        store.insert_tour(&tour("Oslo", "Visible", 4, 300.0)).await.unwrap();

        let found = store.recent_active_tours(5).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].title, "Visible");
        assert!(found.iter().all(|t| t.is_active));
    }

    #[tokio::test]
    async fn visa_knowledge_unique_per_country_and_type() {
        let store = SqliteStore::in_memory().await.unwrap();
        let entry = NewVisaKnowledge {
            country: "France".into(),
            visa_type: "schengen".into(),
            summary: "Short-stay Schengen visa".into(),
            is_active: true,
            ..NewVisaKnowledge::default()
        };
        store.insert_visa_knowledge(&entry).await.unwrap();
        assert!(store.insert_visa_knowledge(&entry).await.is_err());
    }

    #[tokio::test]
    async fn agency_stats_excludes_agencies_without_active_tours() {
        let store = SqliteStore::in_memory().await.unwrap();
        let with_tours = store
            .insert_agency(&NewAgency {
                username: "sunny".into(),
                company_name: "Sunny Travel".into(),
                is_active: true,
                ..NewAgency::default()
            })
            .await
            .unwrap();
        store
            .insert_agency(&NewAgency {
                username: "idle".into(),
                company_name: "Idle Co".into(),
                is_active: true,
                is_featured: true,
                ..NewAgency::default()
            })
            .await
            .unwrap();
        let mut t = tour("Istanbul", "Bosphorus week", 10, 450.0);
        t.agency_id = Some(with_tours);
        store.insert_tour(&t).await.unwrap();

        let stats = store.agency_stats(Utc::now().date_naive()).await.unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].display_name, "Sunny Travel");
        assert_eq!(stats[0].active_tours, 1);
        assert_eq!(stats[0].top_destinations, vec!["Istanbul".to_string()]);
    }

    #[tokio::test]
    async fn referral_code_conflict_is_typed() {
        let store = SqliteStore::in_memory().await.unwrap();
        let offer = store
            .insert_offer(&NewOffer {
                title: "Istanbul package".into(),
                slug: "istanbul-package".into(),
                description: String::new(),
                destination: "Istanbul".into(),
                service_type: LeadType::Tour,
                is_premium: false,
                premium_type: String::new(),
                price_cents: 120_000,
                image_url: String::new(),
                metadata: None,
                is_active: true,
            })
            .await
            .unwrap();

        store
            .insert_referral("ABCDE12345", offer.id, None, None, None)
            .await
            .unwrap();
        let err = store
            .insert_referral("ABCDE12345", offer.id, None, None, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn history_returns_oldest_first() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.insert_chat_message(Some(1), "first", "r1").await.unwrap();
        store.insert_chat_message(Some(1), "second", "r2").await.unwrap();
        store.insert_chat_message(Some(2), "other user", "r3").await.unwrap();

        let history = store.recent_history(1, 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].message, "first");
        assert_eq!(history[1].message, "second");
    }

    #[tokio::test]
    async fn preference_is_unique_per_user() {
        let store = SqliteStore::in_memory().await.unwrap();
        let first = store
            .upsert_preference(&PreferenceUpsert {
                user_id: Some(42),
                favorite_destinations: vec!["Istanbul".into()],
                ..PreferenceUpsert::default()
            })
            .await
            .unwrap();
        let second = store
            .upsert_preference(&PreferenceUpsert {
                user_id: Some(42),
                favorite_destinations: vec!["Dubai".into()],
                ..PreferenceUpsert::default()
            })
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.favorite_destinations, vec!["Dubai".to_string()]);
    }

    #[tokio::test]
    async fn analytics_counts_and_conversion() {
        let store = SqliteStore::in_memory().await.unwrap();
        store
            .insert_interaction(Some(1), Intent::Tour, "q1", &ExtractedData::default())
            .await
            .unwrap();
        store
            .insert_interaction(Some(1), Intent::Unknown, "q2", &ExtractedData::default())
            .await
            .unwrap();
        store
            .insert_lead(
                Some(1),
                &NewLead {
                    name: "Sara".into(),
                    phone: "555".into(),
                    lead_type: LeadType::Visa,
                    destination: "France".into(),
                    budget: None,
                    travel_date: None,
                    message: String::new(),
                    metadata: None,
                },
            )
            .await
            .unwrap();

        let summary = store.analytics_summary().await.unwrap();
        assert_eq!(summary.totals.interactions, 2);
        assert_eq!(summary.totals.leads, 1);
        assert_eq!(summary.totals.visa_leads, 1);
        assert!((summary.totals.conversion_rate_percent - 50.0).abs() < f64::EPSILON);
        assert_eq!(summary.popular_destinations[0].destination, "France");
    }
}
