use serde::{Deserialize, Deserializer, Serialize};

/// Business entry from the read-only directory catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessRecord {
    pub id: String,
    pub name: String,
    #[serde(default, deserialize_with = "nullable_string")]
    pub description: String,
    #[serde(rename = "industryType", alias = "industry_type", default, deserialize_with = "nullable_string")]
    pub industry_type: String,
    #[serde(default, deserialize_with = "nullable_string")]
    pub slug: String,
    #[serde(default = "default_status")]
    pub status: String,
    /// Suburb or area, used to tell similar businesses apart
    #[serde(default)]
    pub location: Option<String>,
}

impl BusinessRecord {
    /// Only active businesses are visible to discovery
    pub fn is_active(&self) -> bool {
        self.status.eq_ignore_ascii_case("active")
    }

    /// Human readable industry, e.g. `beauty_salon` -> `Beauty salon`
    pub fn industry_label(&self) -> String {
        humanize(&self.industry_type)
    }

    /// Attribute that best distinguishes this business from similarly named ones
    pub fn distinguishing_label(&self) -> String {
        match self.location.as_deref().map(str::trim) {
            Some(location) if !location.is_empty() => location.to_string(),
            _ if !self.industry_type.trim().is_empty() => self.industry_label(),
            _ => self.slug.clone(),
        }
    }
}

fn default_status() -> String {
    "active".to_string()
}

fn nullable_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn humanize(raw: &str) -> String {
    let spaced = raw.trim().replace(['_', '-'], " ").to_lowercase();
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// One prior message of the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: String,
    pub content: String,
}

/// Caller supplied context for a discovery query
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryContext {
    #[serde(default)]
    pub user_location: Option<String>,
    #[serde(default)]
    pub conversation_history: Vec<ConversationTurn>,
    #[serde(default)]
    pub search_context: Option<serde_json::Value>,
    #[serde(default)]
    pub authenticated: bool,
}

impl QueryContext {
    /// Keep only the most recent `window` turns of history
    pub fn windowed(mut self, window: usize) -> Self {
        let len = self.conversation_history.len();
        if len > window {
            self.conversation_history.drain(..len - window);
        }
        self
    }
}

/// Where an intent came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentSource {
    Provider,
    Rules,
}

/// Structured interpretation of a free-text query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Intent {
    pub business_type: Option<String>,
    pub cuisine: Option<String>,
    pub service: Option<String>,
    pub location: Option<String>,
    pub keywords: Vec<String>,
    pub confidence: f64,
    pub source: IntentSource,
}

impl Intent {
    pub fn has_structure(&self) -> bool {
        self.business_type.is_some()
            || self.cuisine.is_some()
            || self.service.is_some()
            || self.location.is_some()
    }
}

/// Scored search hit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchCandidate {
    pub business: BusinessRecord,
    pub score: u32,
    pub matched_term: String,
}

/// How the candidate set was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMethod {
    /// Served from the process-wide catalog index
    CachedIndex,
    /// Index built for this call only
    OnDemandIndex,
    /// Catalog could not be loaded
    Unavailable,
}

/// Classification of a candidate set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchInfo {
    pub exact_match: bool,
    pub partial_match: bool,
    pub no_match: bool,
    pub has_multiple_matches: bool,
    pub search_method: SearchMethod,
    pub total_matches: usize,
}

impl MatchInfo {
    pub fn none(search_method: SearchMethod) -> Self {
        Self {
            exact_match: false,
            partial_match: false,
            no_match: true,
            has_multiple_matches: false,
            search_method,
            total_matches: 0,
        }
    }
}

/// Why a query was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockedReason {
    PromptInjection,
    SystemProbe,
    OutOfDomain,
    CustomPattern,
}

/// Severity assigned to an inbound query
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Which validation branch handled the query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationPath {
    /// Public catalog lookup, guardrail policy not consulted
    FastPath,
    /// Guardrail policy consulted
    Full,
    /// Guardrail policy missing or failed; query let through
    Skipped,
}

/// Outcome of input validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityVerdict {
    pub is_valid: bool,
    pub sanitized_query: String,
    pub blocked_reasons: Vec<BlockedReason>,
    pub risk_level: RiskLevel,
    pub path: ValidationPath,
}

/// Scoring points awarded per matched term
#[derive(Debug, Clone, Copy)]
pub struct ScoringWeights {
    pub full_name: u32,
    pub whole_word: u32,
    pub partial: u32,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            full_name: 20,
            whole_word: 10,
            partial: 5,
        }
    }
}
