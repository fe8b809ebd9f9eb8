// Core algorithm exports
pub mod composer;
pub mod guardrail;
pub mod index;
pub mod intent;
pub mod matcher;
pub mod narration;
pub mod scoring;
pub mod security;
pub mod tokenize;

pub use composer::{DiscoveryConfig, DiscoveryEngine, DiscoveryError};
pub use guardrail::{
    screen_query, FastPathPolicy, GuardrailError, GuardrailPolicy, IntentionCheck, PatternGuardrail,
    PolicyFindings,
};
pub use index::CatalogIndex;
pub use intent::IntentExtractor;
pub use matcher::{classify, Matcher, SearchResult};
pub use narration::{FallbackNarrator, QueryCategory};
pub use scoring::{score_documents, QueryTerms};
pub use security::{sanitize_input, sanitize_output, SecurityFilter};
