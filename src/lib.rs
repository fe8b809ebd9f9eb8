//! Discovery Engine - conversational business discovery for the local directory
//!
//! Turns a free-text query into ranked businesses, a short explanation and
//! follow-up actions. Matching is deterministic and index based; text
//! generation backends are optional and always have a deterministic fallback.

pub mod config;
pub mod core;
pub mod models;
pub mod routes;
pub mod services;

// Re-export commonly used types
pub use core::{CatalogIndex, DiscoveryEngine, Matcher, SecurityFilter};
pub use models::{
    BusinessRecord, ComposedResponse, DiscoverRequest, MatchInfo, QueryContext, ResponseType,
};
pub use services::{CatalogStore, ProviderOutcome, ProviderRegistry};
