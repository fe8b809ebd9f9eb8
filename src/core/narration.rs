use crate::core::intent::location_phrase;
use crate::models::{BusinessRecord, Intent, MatchCandidate};

/// Broad category of a query, used for rule-based suggestions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryCategory {
    Food,
    Beauty,
    Location(String),
    General,
}

const FOOD_TYPES: &[&str] = &["restaurant", "cafe", "bakery"];
const BEAUTY_TYPES: &[&str] = &["beauty_salon", "spa"];
const BEAUTY_SERVICES: &[&str] = &["hair", "nails", "massage", "facial", "waxing"];

impl QueryCategory {
    pub fn detect(query: &str, intent: &Intent) -> Self {
        let business_type = intent.business_type.as_deref().unwrap_or_default();

        if intent.cuisine.is_some() || FOOD_TYPES.contains(&business_type) {
            QueryCategory::Food
        } else if BEAUTY_TYPES.contains(&business_type)
            || intent
                .service
                .as_deref()
                .is_some_and(|s| BEAUTY_SERVICES.contains(&s))
        {
            QueryCategory::Beauty
        } else if let Some(location) = location_phrase(query).or_else(|| intent.location.clone()) {
            QueryCategory::Location(location)
        } else {
            QueryCategory::General
        }
    }

    pub fn suggestions(&self) -> Vec<String> {
        match self {
            QueryCategory::Food => vec![
                "Italian restaurants".to_string(),
                "Cafes near you".to_string(),
                "Pizza".to_string(),
            ],
            QueryCategory::Beauty => vec![
                "Hair salons".to_string(),
                "Nail salons".to_string(),
                "Day spas".to_string(),
            ],
            QueryCategory::Location(location) => vec![
                format!("Businesses in {}", location),
                format!("Restaurants in {}", location),
                "Browse all businesses".to_string(),
            ],
            QueryCategory::General => vec![
                "Browse all businesses".to_string(),
                "Restaurants near you".to_string(),
                "Hair and beauty".to_string(),
            ],
        }
    }
}

/// Deterministic text used whenever no provider narrates
#[derive(Debug, Clone, Default)]
pub struct FallbackNarrator;

impl FallbackNarrator {
    pub fn exact(&self, business: &BusinessRecord, authenticated: bool) -> String {
        let mut text = format!("{} looks like what you're after", business.name);
        if let Some(location) = business.location.as_deref().filter(|l| !l.trim().is_empty()) {
            text.push_str(&format!(" ({})", location));
        }
        text.push('.');
        if !business.description.trim().is_empty() {
            text.push_str(&format!(" {}", business.description.trim()));
            if !text.ends_with('.') {
                text.push('.');
            }
        }
        if authenticated {
            text.push_str(" You can book with them right away.");
        } else {
            text.push_str(" Sign up to book with them.");
        }
        text
    }

    pub fn disambiguation(&self, query: &str, candidates: &[MatchCandidate]) -> String {
        let listed: Vec<String> = candidates
            .iter()
            .map(|c| format!("{} ({})", c.business.name, c.business.distinguishing_label()))
            .collect();

        format!(
            "I found {} places matching \"{}\": {}. Which one did you mean?",
            candidates.len(),
            query,
            listed.join(", ")
        )
    }

    pub fn no_match(&self, query: &str, category: &QueryCategory) -> String {
        let hint = match category {
            QueryCategory::Food => "Try a cuisine or dish, or a restaurant's name.",
            QueryCategory::Beauty => "Try a service such as a haircut or massage, or the salon's name.",
            QueryCategory::Location(_) => "Try a nearby suburb or a broader area.",
            QueryCategory::General => "Check the spelling, or try a business type like \"cafe\" or \"hair salon\".",
        };
        format!(
            "I couldn't find any businesses matching \"{}\". The name may be spelled differently or the business may not be listed yet. {}",
            query, hint
        )
    }

    pub fn default_answer(&self, candidates: &[MatchCandidate]) -> String {
        match candidates {
            [] => "I couldn't search the directory just now. You can browse all businesses instead.".to_string(),
            [only] => format!(
                "{} might be what you're looking for, though it's not a strong match. Add more detail to narrow it down.",
                only.business.name
            ),
            many => format!(
                "Here are the closest matches I found: {}.",
                many.iter()
                    .map(|c| c.business.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }
    }

    pub fn blocked(&self) -> String {
        "I can only help you find local businesses and services. Try asking for something like \"pizza in Carlton\" or \"haircut near me\"."
            .to_string()
    }
}

/// Prompt asking a provider to narrate the chosen businesses
pub fn narration_prompt(
    query: &str,
    intent: &Intent,
    businesses: &[&BusinessRecord],
    instruction: &str,
) -> String {
    let mut prompt = format!(
        "You help people find local businesses. In at most three sentences, {}\n\
         Only mention the businesses listed below. Do not invent details.\n\
         User query: {:?}\n",
        instruction, query
    );
    if let Some(location) = &intent.location {
        prompt.push_str(&format!("User location: {}\n", location));
    }
    prompt.push_str("Businesses:\n");
    for business in businesses {
        let description: String = business.description.chars().take(160).collect();
        prompt.push_str(&format!(
            "- {} ({}): {}\n",
            business.name,
            business.distinguishing_label(),
            description
        ));
    }
    prompt
}
