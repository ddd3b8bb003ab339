use thiserror::Error;

// ─── Top-level error hierarchy ───────────────────────────────────────────────

/// Structured error hierarchy for Tourbot.
///
/// Each subsystem defines its own error variant. Library callers can match on
/// these to decide recovery strategy; internal code continues to use
/// `anyhow::Result` for ad-hoc context chains.
#[derive(Debug, Error)]
pub enum TourbotError {
    // ── Config ───────────────────────────────────────────────────────────
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    // ── LLM / Provider ──────────────────────────────────────────────────
    #[error("llm: {0}")]
    Llm(#[from] LlmError),

    // ── Store ───────────────────────────────────────────────────────────
    #[error("store: {0}")]
    Store(#[from] StoreError),

    // ── Client input ─────────────────────────────────────────────────────
    #[error("validation: {0}")]
    Validation(#[from] ValidationError),

    // ── Transport / Gateway ──────────────────────────────────────────────
    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    // ── Generic fallthrough (wraps anyhow for interop) ──────────────────
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ─── Config errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load config: {0}")]
    Load(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

// ─── LLM / Provider errors ──────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("provider {provider} request failed: {message}")]
    Request { provider: String, message: String },

    #[error("provider {provider} returned malformed payload: {message}")]
    MalformedPayload { provider: String, message: String },

    #[error("no API credential configured for provider {provider}")]
    MissingCredential { provider: String },
}

// ─── Store errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("query failed: {0}")]
    Query(String),

    #[error("schema init failed: {0}")]
    Schema(String),

    #[error("uniqueness violated for {entity}: {detail}")]
    Conflict { entity: String, detail: String },

    #[error("sqlx: {0}")]
    Sqlx(String),
}

// ─── Validation errors (map to HTTP 400) ────────────────────────────────────

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("field {field} is required")]
    Missing { field: &'static str },

    #[error("field {field} is invalid: {detail}")]
    Invalid { field: &'static str, detail: String },

    #[error("unknown reference in {field}: {value}")]
    UnknownReference { field: &'static str, value: String },
}

impl ValidationError {
    /// Name of the offending field, for 400 response bodies.
    pub fn field(&self) -> &'static str {
        match self {
            Self::Missing { field }
            | Self::Invalid { field, .. }
            | Self::UnknownReference { field, .. } => field,
        }
    }
}

// ─── Transport errors ───────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("gateway: {0}")]
    Gateway(String),

    #[error("bind failed for {addr}: {message}")]
    Bind { addr: String, message: String },
}

// ─── Convenience re-exports ─────────────────────────────────────────────────

/// Shorthand result type for the crate.
pub type Result<T> = std::result::Result<T, TourbotError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_displays_correctly() {
        let err = TourbotError::Config(ConfigError::Validation("bad quota".into()));
        assert!(err.to_string().contains("validation failed"));
    }

    #[test]
    fn llm_request_error_names_provider() {
        let err = TourbotError::Llm(LlmError::Request {
            provider: "openai".into(),
            message: "timeout".into(),
        });
        assert!(err.to_string().contains("openai"));
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn validation_error_exposes_field_name() {
        let err = ValidationError::UnknownReference {
            field: "referral_code",
            value: "ZZZZZZZZZZ".into(),
        };
        assert_eq!(err.field(), "referral_code");
        assert!(err.to_string().contains("ZZZZZZZZZZ"));
    }

    #[test]
    fn anyhow_interop() {
        let anyhow_err = anyhow::anyhow!("something went wrong");
        let err: TourbotError = anyhow_err.into();
        assert!(err.to_string().contains("something went wrong"));
    }

    #[test]
    fn store_conflict_displays_entity() {
        let err = TourbotError::Store(StoreError::Conflict {
            entity: "referral".into(),
            detail: "code already exists".into(),
        });
        assert!(err.to_string().contains("referral"));
    }
}
