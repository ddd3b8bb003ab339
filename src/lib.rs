#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::new_without_default,
    clippy::return_self_not_must_use
)]

pub mod catalog;
pub mod concierge;
pub mod config;
pub mod error;
pub mod funnel;
pub mod gateway;
pub mod governor;
pub mod llm;
pub mod store;

pub use config::Config;
pub use error::{Result, TourbotError};
