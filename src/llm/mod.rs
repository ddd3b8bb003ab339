//! LLM plumbing: provider trait, the OpenAI-compatible client, prompt
//! assembly, and output sanitization.

pub mod openai;
pub mod prompt;
pub mod sanitize;
mod traits;

pub use openai::OpenAiProvider;
pub use traits::{ChatProvider, ChatTurn, SharedProvider, TurnRole};
