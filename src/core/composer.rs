//! Per-request orchestration.
//!
//! # Pipeline Stages
//! ```text
//! START -> SECURITY_CHECK -> FAST_PATH | FULL_PATH -> INTENT -> MATCH
//!       -> EXACT | DISAMBIGUATE | NO_MATCH | DEFAULT -> NARRATE -> SANITIZE -> DONE
//! ```
//! A rejected query ends in `BLOCKED` right after `SECURITY_CHECK` and never
//! reaches the matcher. Every visited stage is recorded in `metadata.stages`.
//!
//! Nothing here returns an error to the caller: provider failures fall back to
//! deterministic text, catalog failures become a `DEFAULT` answer and anything
//! else becomes the last-resort response.

use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use uuid::Uuid;
use validator::Validate;

use crate::config::Settings;
use crate::core::guardrail::{
    FastPathPolicy, GuardrailError, GuardrailPolicy, IntentionCheck, PatternGuardrail,
};
use crate::core::index::CatalogIndex;
use crate::core::intent::IntentExtractor;
use crate::core::matcher::{Matcher, SearchResult};
use crate::core::narration::{narration_prompt, FallbackNarrator, QueryCategory};
use crate::core::security::SecurityFilter;
use crate::models::{
    Action, BusinessRecord, ComposedResponse, DiscoverRequest, DiscoveryStage, Intent, MatchInfo,
    QueryContext, ResponseMetadata, ResponseType, ScoringWeights, SearchMethod, SecuritySummary,
    SecurityVerdict, ValidationPath,
};
use crate::services::catalog::{CatalogError, CatalogStore};
use crate::services::providers::GenerateOptions;
use crate::services::registry::{ProviderOutcome, ProviderRegistry};

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Catalog unavailable: {0}")]
    Catalog(#[from] CatalogError),
}

/// Per-request limits
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub max_recommendations: usize,
    pub history_window: usize,
    pub narrate_with_provider: bool,
    /// Total provider time per request, shared by intent and narration
    pub provider_budget: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            max_recommendations: 3,
            history_window: 5,
            narrate_with_provider: true,
            provider_budget: Duration::from_secs(10),
        }
    }
}

/// Deterministic part of an answer, before narration
struct Draft {
    response_type: ResponseType,
    understanding: String,
    recommendations: Vec<BusinessRecord>,
    insights: Vec<String>,
    actions: Vec<Action>,
    suggestions: Vec<String>,
    /// What to ask a provider to write, if anything
    narration: Option<&'static str>,
}

/// The discovery engine
pub struct DiscoveryEngine {
    security: SecurityFilter,
    intent: IntentExtractor,
    matcher: Matcher,
    providers: Arc<ProviderRegistry>,
    catalog: Arc<CatalogStore>,
    narrator: FallbackNarrator,
    config: DiscoveryConfig,
}

impl DiscoveryEngine {
    /// Engine with the default pattern guardrail and matcher
    pub fn new(providers: Arc<ProviderRegistry>, catalog: Arc<CatalogStore>) -> Self {
        let config = DiscoveryConfig::default();
        Self {
            security: SecurityFilter::new(
                Some(Arc::new(PatternGuardrail::new())),
                FastPathPolicy::default(),
                500,
                500,
            ),
            intent: IntentExtractor::new(config.history_window),
            matcher: Matcher::with_default_weights(),
            providers,
            catalog,
            narrator: FallbackNarrator,
            config,
        }
    }

    pub fn from_settings(
        settings: &Settings,
        providers: Arc<ProviderRegistry>,
        catalog: Arc<CatalogStore>,
    ) -> Result<Self, GuardrailError> {
        let security = &settings.security;
        let policy: Option<Arc<dyn GuardrailPolicy>> = if security.guardrail_enabled {
            Some(Arc::new(PatternGuardrail::with_patterns(&security.blocked_patterns)?))
        } else {
            tracing::warn!("Guardrail policy disabled; queries will be marked as skipped");
            None
        };

        let fast_path = FastPathPolicy {
            enabled: security.fast_path.enabled,
            allow_authenticated: security.fast_path.allow_authenticated,
            max_words: security.fast_path.max_words,
        };

        let discovery = &settings.discovery;
        let config = DiscoveryConfig {
            max_recommendations: discovery.max_recommendations,
            history_window: discovery.history_window,
            narrate_with_provider: discovery.narrate_with_provider,
            provider_budget: Duration::from_secs(discovery.provider_budget_secs),
        };

        Ok(Self::new(providers, catalog)
            .with_security(SecurityFilter::new(
                policy,
                fast_path,
                security.max_query_chars,
                security.max_output_chars,
            ))
            .with_matcher(Matcher::new(
                ScoringWeights::default(),
                discovery.candidate_cap,
                discovery.exact_threshold,
            ))
            .with_config(config))
    }

    pub fn with_security(mut self, security: SecurityFilter) -> Self {
        self.security = security;
        self
    }

    pub fn with_matcher(mut self, matcher: Matcher) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn with_config(mut self, mut config: DiscoveryConfig) -> Self {
        config.max_recommendations = config.max_recommendations.max(1);
        self.intent = IntentExtractor::new(config.history_window);
        self.config = config;
        self
    }

    pub fn providers(&self) -> &Arc<ProviderRegistry> {
        &self.providers
    }

    pub fn catalog(&self) -> &Arc<CatalogStore> {
        &self.catalog
    }

    /// Run one query on its own task
    ///
    /// Dropping the returned future aborts the task. A panic inside the
    /// pipeline becomes the last-resort response.
    pub async fn discover_isolated(self: Arc<Self>, request: DiscoverRequest) -> ComposedResponse {
        struct AbortOnDrop(tokio::task::JoinHandle<ComposedResponse>);

        impl Drop for AbortOnDrop {
            fn drop(&mut self) {
                self.0.abort();
            }
        }

        let mut task = AbortOnDrop(tokio::spawn(async move { self.discover(request).await }));
        match (&mut task.0).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!("Discovery task failed: {}", e);
                ComposedResponse::last_resort(Uuid::new_v4())
            }
        }
    }

    /// Answer a discovery query; never fails
    pub async fn discover(&self, request: DiscoverRequest) -> ComposedResponse {
        let request_id = Uuid::new_v4();
        let started = Instant::now();
        let mut stages = vec![DiscoveryStage::Start];

        let mut response = match self.run(request_id, request, &mut stages).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!("Discovery request {} failed: {}", request_id, e);
                ComposedResponse::last_resort(request_id)
            }
        };

        response.metadata.processing_time_ms = started.elapsed().as_millis() as u64;

        tracing::info!(
            "Discovery {} answered as {:?} with {} recommendations (ai: {}, {}ms)",
            request_id,
            response.metadata.response_type,
            response.recommendations.len(),
            response.metadata.ai_powered,
            response.metadata.processing_time_ms
        );

        response
    }

    async fn run(
        &self,
        request_id: Uuid,
        request: DiscoverRequest,
        stages: &mut Vec<DiscoveryStage>,
    ) -> Result<ComposedResponse, DiscoveryError> {
        request
            .validate()
            .map_err(|e| DiscoveryError::InvalidRequest(e.to_string()))?;

        let context = request.context.windowed(self.config.history_window);
        let provider_deadline = Instant::now() + self.config.provider_budget;

        // SECURITY_CHECK, against whatever index is already loaded
        stages.push(DiscoveryStage::SecurityCheck);
        let verdict = match self.catalog.current().await {
            Some(index) => self.security.validate(&request.query, &context, &index),
            None => self
                .security
                .validate(&request.query, &context, &CatalogIndex::empty()),
        };

        if !verdict.is_valid {
            stages.push(DiscoveryStage::Blocked);
            return Ok(self.blocked(request_id, &verdict, stages));
        }

        let catalog = self.load_index().await;

        stages.push(match verdict.path {
            ValidationPath::FastPath => DiscoveryStage::FastPath,
            ValidationPath::Full | ValidationPath::Skipped => DiscoveryStage::FullPath,
        });
        let query = verdict.sanitized_query.as_str();

        // INTENT
        stages.push(DiscoveryStage::Intent);
        let intent = self
            .intent
            .extract(
                query,
                &context,
                Some(self.providers.as_ref()),
                Some(provider_deadline),
            )
            .await;
        let clarification = self.check_intention(query, &intent, &verdict);

        // MATCH
        stages.push(DiscoveryStage::Match);
        let search = match &catalog {
            Ok(index) => Some(self.matcher.search_index(query, index)),
            Err(e) => {
                tracing::warn!("Matching without catalog: {}", e);
                None
            }
        };

        let mut draft = match &search {
            Some(result) => self.shape(query, &intent, &context, result),
            None => self.catalog_unavailable(),
        };
        if let Some(question) = clarification {
            draft.insights.insert(0, question);
        }
        stages.push(draft.response_type.stage());

        // NARRATE
        stages.push(DiscoveryStage::Narrate);
        let mut provider = None;
        if let (Some(instruction), true) = (draft.narration, self.config.narrate_with_provider) {
            let businesses: Vec<&BusinessRecord> = draft.recommendations.iter().collect();
            let prompt = narration_prompt(query, &intent, &businesses, instruction);
            let outcome = self
                .providers
                .generate_until(&prompt, &narration_options(), Some(provider_deadline))
                .await;
            match outcome {
                ProviderOutcome::Generated {
                    value,
                    provider: name,
                } if !value.trim().is_empty() => {
                    draft.understanding = value;
                    provider = Some(name);
                }
                ProviderOutcome::Generated { provider: name, .. } => {
                    tracing::warn!("Provider {} returned empty narration, using template", name);
                }
                ProviderOutcome::Degraded(reason) => {
                    tracing::debug!("Narration degraded ({}), using template", reason);
                }
            }
        }

        // SANITIZE
        stages.push(DiscoveryStage::Sanitize);
        let understanding = self.security.sanitize_output(&draft.understanding);
        let insights = draft
            .insights
            .iter()
            .map(|insight| self.security.sanitize_output(insight))
            .collect();

        stages.push(DiscoveryStage::Done);

        let mut metadata = ResponseMetadata::new(request_id, draft.response_type);
        metadata.ai_powered = provider.is_some();
        metadata.provider = provider;
        metadata.match_info = Some(match &search {
            Some(result) => result.match_info,
            None => MatchInfo::none(SearchMethod::Unavailable),
        });
        metadata.intent = Some(intent);
        metadata.security = Some(SecuritySummary::from(&verdict));
        metadata.stages = std::mem::take(stages);
        metadata.suggestions = draft.suggestions;

        Ok(ComposedResponse {
            understanding,
            recommendations: draft.recommendations,
            insights,
            actions: draft.actions,
            metadata,
        })
    }

    async fn load_index(&self) -> Result<Arc<CatalogIndex>, DiscoveryError> {
        Ok(self.catalog.snapshot().await?)
    }

    fn check_intention(
        &self,
        query: &str,
        intent: &Intent,
        verdict: &SecurityVerdict,
    ) -> Option<String> {
        if verdict.path != ValidationPath::Full {
            return None;
        }
        let policy = self.security.policy()?;
        match policy.verify_intention(query, intent) {
            Ok(IntentionCheck::Clear) => None,
            Ok(IntentionCheck::NeedsClarification(question)) => Some(question),
            Err(e) => {
                tracing::warn!("Intention check by {} failed: {}", policy.name(), e);
                None
            }
        }
    }

    /// Pick the response shape from the match classification
    fn shape(
        &self,
        query: &str,
        intent: &Intent,
        context: &QueryContext,
        result: &SearchResult,
    ) -> Draft {
        let info = &result.match_info;
        let top: Vec<_> = result
            .candidates
            .iter()
            .take(self.config.max_recommendations)
            .cloned()
            .collect();

        if info.exact_match {
            let candidate = &top[0];
            let business = &candidate.business;
            let mut insights = vec![format!("Matched on \"{}\"", candidate.matched_term)];
            let label = business.distinguishing_label();
            if !label.is_empty() {
                insights.push(format!("{}: {}", business.name, label));
            }

            let mut actions = vec![Action::new(
                "view_business",
                format!("View {}", business.name),
                format!("Open the {} page", business.name),
            )];
            actions.push(if context.authenticated {
                Action::new("book", "Book now", format!("Make a booking with {}", business.name))
            } else {
                Action::new(
                    "signup",
                    "Sign up to book",
                    format!("Create an account to book with {}", business.name),
                )
            });

            return Draft {
                response_type: ResponseType::Exact,
                understanding: self.narrator.exact(business, context.authenticated),
                recommendations: vec![business.clone()],
                insights,
                actions,
                suggestions: Vec::new(),
                narration: Some("recommend this business and invite the user to book."),
            };
        }

        if info.has_multiple_matches {
            let mut insights: Vec<String> = top
                .iter()
                .map(|c| format!("{}: {}", c.business.name, c.business.distinguishing_label()))
                .collect();
            if info.total_matches > top.len() {
                insights.push(format!(
                    "{} more businesses also matched",
                    info.total_matches - top.len()
                ));
            }
            insights.push("Add a suburb or the business name to narrow it down.".to_string());

            let mut actions: Vec<Action> = top
                .iter()
                .map(|c| {
                    Action::new(
                        "select_business",
                        c.business.name.clone(),
                        c.business.distinguishing_label(),
                    )
                })
                .collect();
            actions.push(Action::new(
                "refine_search",
                "Refine your search",
                "Add a location or more detail",
            ));

            return Draft {
                response_type: ResponseType::Disambiguation,
                understanding: self.narrator.disambiguation(query, &top),
                recommendations: top.iter().map(|c| c.business.clone()).collect(),
                insights,
                actions,
                suggestions: Vec::new(),
                narration: Some(
                    "briefly tell these businesses apart by location or category and ask which one the user meant. Do not pick one.",
                ),
            };
        }

        if info.no_match {
            let category = QueryCategory::detect(query, intent);
            let suggestions = category.suggestions();
            let mut insights = vec!["No listed business matched your search.".to_string()];
            if let Some(cuisine) = &intent.cuisine {
                insights.push(format!("Looking for {} food? Try one of the suggestions.", cuisine));
            } else if let Some(service) = &intent.service {
                insights.push(format!(
                    "Looking for {} services? Try one of the suggestions.",
                    service
                ));
            }

            return Draft {
                response_type: ResponseType::NoMatch,
                understanding: self.narrator.no_match(query, &category),
                recommendations: Vec::new(),
                insights,
                actions: try_search_actions(&suggestions),
                suggestions,
                narration: None,
            };
        }

        // A single weak match
        let candidate = &top[0];
        Draft {
            response_type: ResponseType::Default,
            understanding: self.narrator.default_answer(&top),
            recommendations: vec![candidate.business.clone()],
            insights: vec![format!(
                "{} only partly matches \"{}\"",
                candidate.business.name, query
            )],
            actions: vec![
                Action::new(
                    "view_business",
                    format!("View {}", candidate.business.name),
                    format!("Open the {} page", candidate.business.name),
                ),
                Action::new("refine_search", "Refine your search", "Add a location or more detail"),
            ],
            suggestions: Vec::new(),
            narration: Some("suggest this business as a possible match and invite the user to add detail."),
        }
    }

    fn catalog_unavailable(&self) -> Draft {
        let suggestions = QueryCategory::General.suggestions();
        Draft {
            response_type: ResponseType::Default,
            understanding: self.narrator.default_answer(&[]),
            recommendations: Vec::new(),
            insights: vec!["The business directory is temporarily unavailable.".to_string()],
            actions: vec![Action::new(
                "browse",
                "Browse all businesses",
                "See every business in the directory",
            )],
            suggestions,
            narration: None,
        }
    }

    fn blocked(
        &self,
        request_id: Uuid,
        verdict: &SecurityVerdict,
        stages: &mut Vec<DiscoveryStage>,
    ) -> ComposedResponse {
        let suggestions = QueryCategory::General.suggestions();

        let mut metadata = ResponseMetadata::new(request_id, ResponseType::Blocked);
        metadata.security = Some(SecuritySummary::from(verdict));
        metadata.stages = std::mem::take(stages);
        metadata.suggestions = suggestions.clone();

        ComposedResponse {
            understanding: self.narrator.blocked(),
            recommendations: Vec::new(),
            insights: Vec::new(),
            actions: try_search_actions(&suggestions),
            metadata,
        }
    }
}

fn try_search_actions(suggestions: &[String]) -> Vec<Action> {
    suggestions
        .iter()
        .map(|s| Action::new("try_search", s.clone(), format!("Search for {}", s.to_lowercase())))
        .collect()
}

fn narration_options() -> GenerateOptions {
    GenerateOptions {
        max_tokens: 200,
        temperature: 0.3,
        system_prompt: Some(
            "You are a concise, friendly guide to local businesses. Never mention internal systems."
                .to_string(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn business(id: &str, name: &str, description: &str, location: &str) -> BusinessRecord {
        BusinessRecord {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            industry_type: "restaurant".to_string(),
            slug: id.to_string(),
            status: "active".to_string(),
            location: Some(location.to_string()),
        }
    }

    fn engine() -> DiscoveryEngine {
        let catalog = CatalogStore::preloaded(vec![
            business("1", "Spice Pavilion CBD", "Modern Indian dining", "Melbourne CBD"),
            business("2", "Luigi's Trattoria", "Handmade pasta and pizza", "Carlton"),
            business("3", "Nonna's Kitchen", "Traditional Italian pasta", "Brunswick"),
            business("4", "Glow Hair Studio", "Haircuts and colour", "Fitzroy"),
        ]);
        DiscoveryEngine::new(Arc::new(ProviderRegistry::empty()), Arc::new(catalog))
    }

    #[tokio::test]
    async fn test_exact_stage_trace() {
        let response = engine().discover(DiscoverRequest::new("spice pavilion")).await;

        assert_eq!(response.response_type(), ResponseType::Exact);
        assert_eq!(
            response.metadata.stages,
            vec![
                DiscoveryStage::Start,
                DiscoveryStage::SecurityCheck,
                DiscoveryStage::FastPath,
                DiscoveryStage::Intent,
                DiscoveryStage::Match,
                DiscoveryStage::Exact,
                DiscoveryStage::Narrate,
                DiscoveryStage::Sanitize,
                DiscoveryStage::Done,
            ]
        );
        assert!(response.actions.iter().any(|a| a.kind == "signup"));
    }

    #[tokio::test]
    async fn test_authenticated_exact_offers_booking() {
        let request = DiscoverRequest::new("spice pavilion").with_context(QueryContext {
            authenticated: true,
            ..Default::default()
        });
        let response = engine().discover(request).await;

        assert_eq!(response.response_type(), ResponseType::Exact);
        assert!(response.visited(DiscoveryStage::FullPath));
        assert!(response.actions.iter().any(|a| a.kind == "book"));
    }

    #[tokio::test]
    async fn test_single_weak_match_is_default() {
        let response = engine().discover(DiscoverRequest::new("haircuts")).await;

        assert_eq!(response.response_type(), ResponseType::Default);
        assert_eq!(response.recommendations.len(), 1);
        assert_eq!(response.recommendations[0].id, "4");
    }

    #[tokio::test]
    async fn test_catalog_failure_is_default() {
        let catalog = CatalogStore::new(
            Arc::new(crate::services::catalog::FileCatalog::new("missing/catalog.json")),
            std::time::Duration::from_secs(1),
        );
        let engine = DiscoveryEngine::new(Arc::new(ProviderRegistry::empty()), Arc::new(catalog));

        let response = engine.discover(DiscoverRequest::new("pasta")).await;

        assert_eq!(response.response_type(), ResponseType::Default);
        assert!(response.recommendations.is_empty());
        assert_eq!(
            response.metadata.match_info.map(|m| m.search_method),
            Some(SearchMethod::Unavailable)
        );
    }

    #[tokio::test]
    async fn test_zero_max_recommendations_is_clamped() {
        let engine = engine().with_config(DiscoveryConfig {
            max_recommendations: 0,
            ..DiscoveryConfig::default()
        });

        let exact = engine.discover(DiscoverRequest::new("spice pavilion")).await;
        assert_eq!(exact.response_type(), ResponseType::Exact);
        assert_eq!(exact.recommendations.len(), 1);

        let weak = engine.discover(DiscoverRequest::new("haircuts")).await;
        assert_eq!(weak.response_type(), ResponseType::Default);
        assert_eq!(weak.recommendations.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_query_asks_for_detail() {
        let response = engine().discover(DiscoverRequest::new("   ")).await;

        assert_eq!(response.response_type(), ResponseType::NoMatch);
        assert!(response.insights[0].starts_with("Tell me what kind of business"));
    }

    #[tokio::test]
    async fn test_invalid_request_gets_last_resort() {
        let response = engine().discover(DiscoverRequest::new("a".repeat(3000))).await;

        assert_eq!(response.response_type(), ResponseType::Error);
        assert!(response.understanding.starts_with("I couldn't process that right now"));
    }
}
