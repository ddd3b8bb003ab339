mod schema;

pub use schema::{
    Config, DatabaseConfig, GatewayConfig, LimitsConfig, LlmConfig, ReferralConfig,
};
