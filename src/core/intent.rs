use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::time::Instant;

use crate::core::tokenize::{is_stop_word, significant_words, tokenize};
use crate::models::{Intent, IntentSource, QueryContext};
use crate::services::registry::{ProviderOutcome, ProviderRegistry};

/// Confidence assigned to keyword-rule intents
pub const RULES_CONFIDENCE: f64 = 0.6;

/// Provider confidence is clamped into this band
pub const PROVIDER_CONFIDENCE_FLOOR: f64 = 0.80;
pub const PROVIDER_CONFIDENCE_CEILING: f64 = 0.95;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleField {
    BusinessType,
    Cuisine,
    Service,
}

/// Keyword to intent field table, scanned in order; first hit per field wins
const KEYWORD_RULES: &[(&str, RuleField, &str)] = &[
    // services
    ("haircut", RuleField::Service, "hair"),
    ("hair", RuleField::Service, "hair"),
    ("barber", RuleField::Service, "hair"),
    ("nail", RuleField::Service, "nails"),
    ("manicure", RuleField::Service, "nails"),
    ("pedicure", RuleField::Service, "nails"),
    ("massage", RuleField::Service, "massage"),
    ("facial", RuleField::Service, "facial"),
    ("wax", RuleField::Service, "waxing"),
    ("waxing", RuleField::Service, "waxing"),
    // cuisines
    ("pasta", RuleField::Cuisine, "italian"),
    ("pizza", RuleField::Cuisine, "italian"),
    ("pizzeria", RuleField::Cuisine, "italian"),
    ("italian", RuleField::Cuisine, "italian"),
    ("trattoria", RuleField::Cuisine, "italian"),
    ("sushi", RuleField::Cuisine, "japanese"),
    ("ramen", RuleField::Cuisine, "japanese"),
    ("japanese", RuleField::Cuisine, "japanese"),
    ("curry", RuleField::Cuisine, "indian"),
    ("tandoori", RuleField::Cuisine, "indian"),
    ("indian", RuleField::Cuisine, "indian"),
    ("taco", RuleField::Cuisine, "mexican"),
    ("burrito", RuleField::Cuisine, "mexican"),
    ("mexican", RuleField::Cuisine, "mexican"),
    ("thai", RuleField::Cuisine, "thai"),
    ("dumpling", RuleField::Cuisine, "chinese"),
    ("chinese", RuleField::Cuisine, "chinese"),
    ("burger", RuleField::Cuisine, "american"),
    ("vegan", RuleField::Cuisine, "vegan"),
    // business types
    ("salon", RuleField::BusinessType, "beauty_salon"),
    ("spa", RuleField::BusinessType, "spa"),
    ("coffee", RuleField::BusinessType, "cafe"),
    ("cafe", RuleField::BusinessType, "cafe"),
    ("brunch", RuleField::BusinessType, "cafe"),
    ("bakery", RuleField::BusinessType, "bakery"),
    ("restaurant", RuleField::BusinessType, "restaurant"),
    ("dinner", RuleField::BusinessType, "restaurant"),
    ("lunch", RuleField::BusinessType, "restaurant"),
    ("food", RuleField::BusinessType, "restaurant"),
    ("dentist", RuleField::BusinessType, "dentist"),
    ("dental", RuleField::BusinessType, "dentist"),
    ("gym", RuleField::BusinessType, "gym"),
    ("fitness", RuleField::BusinessType, "gym"),
    ("yoga", RuleField::BusinessType, "gym"),
    ("mechanic", RuleField::BusinessType, "mechanic"),
    ("plumber", RuleField::BusinessType, "plumber"),
];

/// Words after "in"/"near" that are not places
const NOT_PLACES: &[&str] = &["me", "us", "here", "my", "town", "area"];

lazy_static! {
    static ref LOCATION_PHRASE: Regex =
        Regex::new(r"\b(?:in|near|around)\s+([a-z][a-z'\-]*(?:\s+[a-z][a-z'\-]*){0,2})").unwrap();
}

/// Whether `token` is `keyword` or an obvious inflection of it
fn keyword_matches(token: &str, keyword: &str) -> bool {
    token == keyword
        || token.strip_suffix('s') == Some(keyword)
        || token.strip_suffix("es") == Some(keyword)
        || (keyword.len() >= 5 && token.starts_with(keyword))
}

/// Whether a query word belongs to the category, cuisine or service vocabulary
pub fn is_category_word(word: &str) -> bool {
    KEYWORD_RULES
        .iter()
        .any(|(keyword, _, _)| keyword_matches(word, keyword))
}

/// Place named by an "in/near/around <place>" phrase
pub fn location_phrase(query: &str) -> Option<String> {
    let lowered = query.to_lowercase();
    let captures = LOCATION_PHRASE.captures(&lowered)?;
    let words: Vec<&str> = captures
        .get(1)?
        .as_str()
        .split_whitespace()
        .skip_while(|word| is_stop_word(word) || *word == "a")
        .take_while(|word| !is_stop_word(word) && !is_category_word(word))
        .take(2)
        .collect();

    if words.is_empty() || words.iter().any(|word| NOT_PLACES.contains(word)) {
        return None;
    }

    Some(
        words
            .iter()
            .map(|word| title_case(word))
            .collect::<Vec<_>>()
            .join(" "),
    )
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// JSON shape requested from providers
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProviderIntent {
    #[serde(default)]
    business_type: Option<String>,
    #[serde(default)]
    cuisine: Option<String>,
    #[serde(default)]
    service: Option<String>,
    #[serde(default)]
    location: Option<String>,
    confidence: Option<f64>,
}

fn meaningful(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty() && v != "null" && v != "unknown" && v != "none")
}

/// Free text to structured intent
#[derive(Debug, Clone)]
pub struct IntentExtractor {
    history_window: usize,
}

impl IntentExtractor {
    pub fn new(history_window: usize) -> Self {
        Self { history_window }
    }

    /// Extract an intent, preferring a provider and falling back to keyword rules
    ///
    /// The provider is abandoned once `deadline` passes.
    pub async fn extract(
        &self,
        query: &str,
        context: &QueryContext,
        providers: Option<&ProviderRegistry>,
        deadline: Option<Instant>,
    ) -> Intent {
        if let Some(registry) = providers.filter(|r| !r.is_empty()) {
            let prompt = self.prompt(query, context);
            match registry.extract_structured_until(&prompt, deadline).await {
                ProviderOutcome::Generated { value, provider } => {
                    match self.from_provider(value, query, context) {
                        Some(intent) => return intent,
                        None => tracing::warn!(
                            "Discarding malformed intent from {}, using keyword rules",
                            provider
                        ),
                    }
                }
                ProviderOutcome::Degraded(reason) => {
                    tracing::debug!("Intent extraction degraded ({}), using keyword rules", reason);
                }
            }
        }

        self.from_rules(query, context)
    }

    /// Deterministic keyword-rule intent
    pub fn from_rules(&self, query: &str, context: &QueryContext) -> Intent {
        let tokens = tokenize(query);
        let mut business_type = None;
        let mut cuisine = None;
        let mut service = None;

        for (keyword, field, value) in KEYWORD_RULES {
            if !tokens.iter().any(|token| keyword_matches(token, keyword)) {
                continue;
            }
            let slot = match field {
                RuleField::BusinessType => &mut business_type,
                RuleField::Cuisine => &mut cuisine,
                RuleField::Service => &mut service,
            };
            if slot.is_none() {
                *slot = Some(value.to_string());
            }
        }

        if cuisine.is_some() && business_type.is_none() {
            business_type = Some("restaurant".to_string());
        }

        Intent {
            business_type,
            cuisine,
            service,
            location: location_phrase(query).or_else(|| context_location(context)),
            keywords: significant_words(query),
            confidence: RULES_CONFIDENCE,
            source: IntentSource::Rules,
        }
    }

    /// Validate a provider answer; `None` means discard it entirely
    pub fn from_provider(
        &self,
        value: Value,
        query: &str,
        context: &QueryContext,
    ) -> Option<Intent> {
        if !value.is_object() {
            return None;
        }
        let parsed: ProviderIntent = serde_json::from_value(value).ok()?;
        let confidence = parsed.confidence.filter(|c| c.is_finite() && (0.0..=1.0).contains(c))?;

        Some(Intent {
            business_type: meaningful(parsed.business_type),
            cuisine: meaningful(parsed.cuisine),
            service: meaningful(parsed.service),
            location: parsed
                .location
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty() && !l.eq_ignore_ascii_case("null"))
                .or_else(|| context_location(context)),
            keywords: significant_words(query),
            confidence: confidence.clamp(PROVIDER_CONFIDENCE_FLOOR, PROVIDER_CONFIDENCE_CEILING),
            source: IntentSource::Provider,
        })
    }

    fn prompt(&self, query: &str, context: &QueryContext) -> String {
        let mut prompt = String::from(
            "Extract the search intent from a local business directory query.\n\
             Reply with only a JSON object with exactly these keys:\n\
             {\"businessType\": string or null, \"cuisine\": string or null, \
             \"service\": string or null, \"location\": string or null, \
             \"confidence\": number between 0 and 1}\n",
        );

        if let Some(location) = context_location(context) {
            prompt.push_str(&format!("User location: {}\n", location));
        }

        let history = &context.conversation_history;
        let recent = &history[history.len().saturating_sub(self.history_window)..];
        if !recent.is_empty() {
            prompt.push_str("Recent conversation:\n");
            for turn in recent {
                let content: String = turn.content.chars().take(200).collect();
                prompt.push_str(&format!("{}: {}\n", turn.role, content));
            }
        }

        prompt.push_str(&format!("Query: {:?}\n", query));
        prompt
    }
}

impl Default for IntentExtractor {
    fn default() -> Self {
        Self::new(5)
    }
}

fn context_location(context: &QueryContext) -> Option<String> {
    context
        .user_location
        .as_deref()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rules_haircut_is_hair_service() {
        let intent = IntentExtractor::default().from_rules("I need a haircut", &QueryContext::default());

        assert_eq!(intent.service.as_deref(), Some("hair"));
        assert_eq!(intent.cuisine, None);
        assert_eq!(intent.confidence, RULES_CONFIDENCE);
        assert_eq!(intent.source, IntentSource::Rules);
    }

    #[test]
    fn test_rules_cuisine_implies_restaurant() {
        let intent = IntentExtractor::default().from_rules("best pasta near Carlton", &QueryContext::default());

        assert_eq!(intent.cuisine.as_deref(), Some("italian"));
        assert_eq!(intent.business_type.as_deref(), Some("restaurant"));
        assert_eq!(intent.location.as_deref(), Some("Carlton"));
        assert_eq!(intent.keywords, vec!["pasta", "carlton"]);
    }

    #[test]
    fn test_rules_unmatched_fields_stay_empty() {
        let intent = IntentExtractor::default().from_rules("xyz123notreal", &QueryContext::default());

        assert!(!intent.has_structure());
        assert_eq!(intent.keywords, vec!["xyz123notreal"]);
    }

    #[test]
    fn test_short_keywords_need_whole_words() {
        let intent = IntentExtractor::default().from_rules("spaghetti", &QueryContext::default());
        assert_eq!(intent.business_type, None);

        let intent = IntentExtractor::default().from_rules("day spas", &QueryContext::default());
        assert_eq!(intent.business_type.as_deref(), Some("spa"));
    }

    #[test]
    fn test_location_falls_back_to_context() {
        let context = QueryContext {
            user_location: Some("Fitzroy".to_string()),
            ..Default::default()
        };
        let intent = IntentExtractor::default().from_rules("sushi near me", &context);

        assert_eq!(intent.location.as_deref(), Some("Fitzroy"));
    }

    #[test]
    fn test_location_phrase_skips_articles() {
        assert_eq!(location_phrase("pizza in the cbd"), Some("Cbd".to_string()));
        assert_eq!(location_phrase("thai around North Melbourne"), Some("North Melbourne".to_string()));
        assert_eq!(location_phrase("pizza"), None);
    }

    #[test]
    fn test_provider_confidence_is_clamped() {
        let extractor = IntentExtractor::default();
        let context = QueryContext::default();

        let low = extractor
            .from_provider(json!({"cuisine": "Italian", "confidence": 0.2}), "pasta", &context)
            .unwrap();
        assert_eq!(low.confidence, PROVIDER_CONFIDENCE_FLOOR);
        assert_eq!(low.cuisine.as_deref(), Some("italian"));
        assert_eq!(low.source, IntentSource::Provider);

        let high = extractor
            .from_provider(json!({"service": "hair", "confidence": 1.0}), "haircut", &context)
            .unwrap();
        assert_eq!(high.confidence, PROVIDER_CONFIDENCE_CEILING);
    }

    #[test]
    fn test_provider_answer_without_confidence_is_discarded() {
        let extractor = IntentExtractor::default();
        let context = QueryContext::default();

        assert!(extractor
            .from_provider(json!({"cuisine": "italian"}), "pasta", &context)
            .is_none());
        assert!(extractor
            .from_provider(json!({"cuisine": 7, "confidence": 0.9}), "pasta", &context)
            .is_none());
        assert!(extractor
            .from_provider(json!({"cuisine": "italian", "confidence": 4.0}), "pasta", &context)
            .is_none());
        assert!(extractor.from_provider(json!(["italian"]), "pasta", &context).is_none());
    }

    #[tokio::test]
    async fn test_extract_without_providers_uses_rules() {
        let intent = IntentExtractor::default()
            .extract("curry", &QueryContext::default(), None, None)
            .await;

        assert_eq!(intent.cuisine.as_deref(), Some("indian"));
        assert_eq!(intent.source, IntentSource::Rules);
    }
}
