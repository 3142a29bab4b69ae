//! Intent extraction from free-form buyer messages.
//!
//! Keyword and regex heuristics pull search filters, lead details and
//! routing flags out of a message. When an LLM is configured it is asked
//! for the same fields as strict JSON; heuristic values win and the LLM
//! only fills gaps.

use crate::llm::{self, ChatModel};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

/// Known cities as (alias, canonical name). Longest aliases first.
const CITY_ALIASES: &[(&str, &str)] = &[
    ("downtown dubai", "dubai"),
    ("dubai marina", "dubai"),
    ("abu dhabi", "abu dhabi"),
    ("new york", "new york"),
    ("bangalore", "bangalore"),
    ("bengaluru", "bangalore"),
    ("toronto", "toronto"),
    ("chicago", "chicago"),
    ("london", "london"),
    ("mumbai", "mumbai"),
    ("sydney", "sydney"),
    ("dubai", "dubai"),
    ("miami", "miami"),
    ("paris", "paris"),
    ("delhi", "delhi"),
    ("nyc", "new york"),
];

/// Feature name and the phrases that imply it.
const FEATURE_KEYWORDS: &[(&str, &[&str])] = &[
    ("sea view", &["sea view", "ocean view", "waterfront"]),
    ("pool", &["pool", "swimming"]),
    ("gym", &["gym", "fitness"]),
    ("balcony", &["balcony", "terrace"]),
    ("parking", &["parking"]),
    ("metro", &["metro", "subway", "train", "station"]),
    ("ready", &["ready to move", "ready-to-move", "ready"]),
];

/// Words that mark a capitalised phrase as a project name.
const PROJECT_KEYWORDS: &[&str] = &[
    "residence",
    "residences",
    "residency",
    "tower",
    "towers",
    "villa",
    "villas",
    "heights",
    "collection",
    "apartments",
    "resort",
    "bay",
    "marina",
    "harbour",
    "harbor",
    "plaza",
    "residential",
    "signature",
    "downtown",
    "midtown",
    "edgewater",
    "palm",
    "crescent",
];

const GREETING_TERMS: &[&str] = &[
    "hello",
    "hi",
    "hey",
    "good morning",
    "good afternoon",
    "good evening",
];
const PROPERTY_TERMS: &[&str] = &[
    "apartment",
    "apartments",
    "property",
    "properties",
    "villa",
    "villas",
    "house",
    "home",
    "project",
    "projects",
];
const DOMAIN_TERMS: &[&str] = &[
    "property",
    "properties",
    "project",
    "apartment",
    "villa",
    "bedroom",
    "bedrooms",
    "budget",
    "city",
    "price",
    "home",
    "house",
];
const OFF_TOPIC_TERMS: &[&str] = &["joke", "weather", "movie", "song", "news", "sports", "recipe"];
const INVESTMENT_TERMS: &[&str] = &[
    "investment",
    "invest",
    "roi",
    "yield",
    "cap rate",
    "appreciation",
    "irr",
    "rental return",
];
const COMPARISON_TERMS: &[&str] = &["compare", "comparison", "vs", "versus", "difference", "better"];
const DETAIL_TERMS: &[&str] = &[
    "amenity",
    "amenities",
    "amenties",
    "facility",
    "facilities",
    "facilty",
    "feature",
    "features",
    "description",
    "what is there",
    "what does it have",
    "tell me more",
    "cinema",
    "theatre",
    "theater",
    "spa",
];
const BOOKING_TERMS: &[&str] = &[
    "book",
    "booking",
    "schedule",
    "visit",
    "viewing",
    "tour",
    "appointment",
];

/// Words after "I am" / "I'm" that are not a name.
const NAME_STOPWORDS: &[&str] = &[
    "a", "an", "the", "looking", "interested", "searching", "planning", "trying", "thinking",
    "keen", "ready", "from", "in", "at", "here", "just", "not", "also", "and", "my", "email",
    "with", "to", "based", "moving", "buying", "going", "want", "available", "new", "free",
    "curious", "hoping", "open",
];

/// Approximate USD value of one unit of each supported currency.
const USD_RATES: &[(&str, f64)] = &[
    ("usd", 1.0),
    ("aed", 0.2723),
    ("eur", 1.08),
    ("gbp", 1.27),
    ("inr", 0.012),
    ("cad", 0.73),
    ("aud", 0.66),
    ("sgd", 0.74),
];

const AMOUNT: &str = r"([0-9][0-9,]*(?:\.[0-9]+)?)\s*(million|billion|mil|mn|bn|k|m|b)?\b";
const CURRENCY_PREFIX: &str = r"(?:(?:aed|usd|eur|gbp|inr|cad|aud|sgd)\s*|[$€£]\s*)?";

static RANGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"\b(?:between|from)\s+{cur}{amt}\s*(?:aed|usd|eur|gbp|inr|cad|aud|sgd)?\s*(?:and|to|-)\s+{cur}{amt}",
        cur = CURRENCY_PREFIX,
        amt = AMOUNT
    ))
    .expect("invalid range regex")
});

static MAX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"\b(?:under|below|less than|up to|upto|max|maximum|within|budget(?:\s+of|\s+is)?)\s+{cur}{amt}",
        cur = CURRENCY_PREFIX,
        amt = AMOUNT
    ))
    .expect("invalid max-price regex")
});

static MIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"\b(?:over|above|at least|min|minimum|greater than|more than)\s+{cur}{amt}",
        cur = CURRENCY_PREFIX,
        amt = AMOUNT
    ))
    .expect("invalid min-price regex")
});

static CURRENCY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(aed|usd|eur|gbp|inr|cad|aud|sgd|dirhams?|rupees?|euros?|pounds?)\b|([$€£])")
        .expect("invalid currency regex")
});

static BEDROOM_SLASH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b([0-9])\s*/\s*[0-9]\b").expect("invalid regex")
});

static BEDROOM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b([0-9]+|one|two|three|four|five|six)\s*-?\s*(?:bedrooms?|beds?|br|bhk)\b")
        .expect("invalid bedroom regex")
});

static PROPERTY_TYPE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(apartment|villa|townhouse|penthouse|condo|flat|studio)s?\b")
        .expect("invalid property type regex")
});

static QUOTED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""([^"]{3,80})"|“([^”]{3,80})”|(?:^|\s)'([^']{3,80})'"#)
        .expect("invalid quote regex")
});

static NAMED_PROJECT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?i:called|named|project)\s+([A-Z0-9][\w'&.-]*(?:\s+[A-Z0-9][\w'&.-]*){0,6})")
        .expect("invalid project regex")
});

static DEVELOPER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?i:by|developer|developed by|builder)\s+([A-Z][\w'&.-]*(?:\s+[A-Z][\w'&.-]*){0,5})")
        .expect("invalid developer regex")
});

static CAPITALISED_SPAN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Z0-9][\w&.'-]*(?:\s+[A-Z0-9][\w&.'-]*){1,6}")
        .expect("invalid span regex")
});

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[\w.+-]+@[\w-]+\.[\w.-]*\w").expect("invalid email regex")
});

static NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:my name is|name\s*[:=]|i am|i'm)\s+([a-z][a-z'-]+)(?:\s+([a-z][a-z'-]+))?")
        .expect("invalid name regex")
});

static DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(\d{4}-\d{2}-\d{2})\b").expect("invalid date regex")
});

/// Structured filters and routing flags extracted from one message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentFilters {
    /// The message, trimmed.
    pub rewritten_query: String,
    pub project_name: Option<String>,
    pub developer: Option<String>,
    /// Canonical lowercase city name.
    pub city: Option<String>,
    /// Minimum price in USD.
    pub price_min: Option<f64>,
    /// Maximum price in USD.
    pub price_max: Option<f64>,
    /// Currency the buyer used (lowercase ISO code).
    pub currency: String,
    pub bedrooms: Option<i64>,
    /// Lowercase property type (flat/condo/studio become apartment).
    pub property_type: Option<String>,
    #[serde(default)]
    pub must_have_features: Vec<String>,
    pub lead_name: Option<String>,
    pub lead_email: Option<String>,
    /// Preferred visit date as `YYYY-MM-DD`.
    pub preferred_date: Option<String>,
    #[serde(default)]
    pub is_greeting: bool,
    #[serde(default)]
    pub is_off_topic: bool,
    #[serde(default)]
    pub is_investment: bool,
    #[serde(default)]
    pub is_comparison: bool,
    #[serde(default)]
    pub is_detail_question: bool,
    #[serde(default)]
    pub is_booking: bool,
}

impl Default for IntentFilters {
    fn default() -> Self {
        Self {
            rewritten_query: String::new(),
            project_name: None,
            developer: None,
            city: None,
            price_min: None,
            price_max: None,
            currency: "usd".to_string(),
            bedrooms: None,
            property_type: None,
            must_have_features: Vec::new(),
            lead_name: None,
            lead_email: None,
            preferred_date: None,
            is_greeting: false,
            is_off_topic: false,
            is_investment: false,
            is_comparison: false,
            is_detail_question: false,
            is_booking: false,
        }
    }
}

impl IntentFilters {
    /// True when any search filter is present.
    pub fn has_any_filter(&self) -> bool {
        self.project_name.is_some()
            || self.developer.is_some()
            || self.city.is_some()
            || self.price_min.is_some()
            || self.price_max.is_some()
            || self.bedrooms.is_some()
            || self.property_type.is_some()
            || !self.must_have_features.is_empty()
    }

    /// True when a named project or developer was mentioned.
    pub fn has_named_target(&self) -> bool {
        self.project_name.is_some() || self.developer.is_some()
    }

    /// Core filters still missing (city, budget, bedrooms).
    pub fn missing_filters(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.city.is_none() {
            missing.push("city");
        }
        if self.price_min.is_none() && self.price_max.is_none() {
            missing.push("budget");
        }
        if self.bedrooms.is_none() {
            missing.push("bedrooms");
        }
        missing
    }

    /// Fill search filters missing from this turn with those from earlier
    /// turns, so "what about 3 bedrooms?" keeps the previous city and budget.
    pub fn inherit_from(&mut self, previous: &IntentFilters) {
        if self.city.is_none() {
            self.city = previous.city.clone();
        }
        if self.price_min.is_none() && self.price_max.is_none() {
            self.price_min = previous.price_min;
            self.price_max = previous.price_max;
        }
        if self.bedrooms.is_none() {
            self.bedrooms = previous.bedrooms;
        }
        if self.property_type.is_none() {
            self.property_type = previous.property_type.clone();
        }
        if self.must_have_features.is_empty() {
            self.must_have_features = previous.must_have_features.clone();
        }
        if self.lead_name.is_none() {
            self.lead_name = previous.lead_name.clone();
        }
        if self.lead_email.is_none() {
            self.lead_email = previous.lead_email.clone();
        }
    }

    /// Merge values from an LLM extraction; existing values win.
    pub fn merge_llm(&mut self, data: &Value) {
        fn text(data: &Value, key: &str) -> Option<String> {
            data.get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("null"))
                .map(str::to_string)
        }
        fn number(data: &Value, key: &str) -> Option<f64> {
            match data.get(key)? {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.replace(',', "").trim().parse().ok(),
                _ => None,
            }
        }
        fn flag(data: &Value, key: &str) -> bool {
            data.get(key).and_then(Value::as_bool).unwrap_or(false)
        }

        if self.project_name.is_none() {
            self.project_name = text(data, "project_name");
        }
        if self.developer.is_none() {
            self.developer = text(data, "developer");
        }
        if self.city.is_none() {
            self.city = text(data, "city").and_then(|c| normalize_city(&c));
        }
        if self.bedrooms.is_none() {
            self.bedrooms = number(data, "bedrooms").map(|b| b as i64);
        }
        if self.property_type.is_none() {
            self.property_type = text(data, "property_type")
                .and_then(|t| extract_property_type(&t.to_lowercase()));
        }

        let llm_currency = text(data, "currency").map(|c| c.to_lowercase());
        let rate_currency = llm_currency
            .as_deref()
            .filter(|c| self.currency == "usd" && usd_rate(c).is_some())
            .map(str::to_string);
        let rate = rate_currency.as_deref().and_then(usd_rate).unwrap_or(1.0);
        if self.price_min.is_none() {
            self.price_min = number(data, "price_min").map(|p| (p * rate).round());
        }
        if self.price_max.is_none() {
            self.price_max = number(data, "price_max").map(|p| (p * rate).round());
        }
        if let Some(currency) = rate_currency {
            self.currency = currency;
        }

        let llm_features: Vec<String> = match data.get("must_have_features") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
            Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_lowercase()],
            _ => Vec::new(),
        };
        for feature in llm_features {
            if !self.must_have_features.contains(&feature) {
                self.must_have_features.push(feature);
            }
        }

        if self.lead_name.is_none() {
            self.lead_name = text(data, "lead_name");
        }
        if self.lead_email.is_none() {
            self.lead_email = text(data, "lead_email").filter(|e| EMAIL_RE.is_match(e));
        }

        self.is_greeting |= flag(data, "is_greeting");
        self.is_off_topic |= flag(data, "is_off_topic");
        self.is_investment |= flag(data, "is_investment");
        self.is_comparison |= flag(data, "is_comparison");
        self.is_detail_question |=
            flag(data, "is_detail") || text(data, "question_type").as_deref() == Some("detail");
    }
}

/// Heuristic-first extractor with an optional LLM gap filler.
pub struct IntentExtractor {
    model: Option<Arc<dyn ChatModel>>,
}

impl IntentExtractor {
    pub fn new(model: Option<Arc<dyn ChatModel>>) -> Self {
        Self { model }
    }

    pub async fn extract(&self, message: &str) -> IntentFilters {
        let mut filters = extract(message);

        if let Some(model) = &self.model {
            match llm::ask(model.as_ref(), LLM_EXTRACT_PROMPT, message).await {
                Ok(reply) => match serde_json::from_str::<Value>(llm::strip_code_fence(&reply)) {
                    Ok(data) if data.is_object() => filters.merge_llm(&data),
                    _ => debug!("LLM intent reply was not a JSON object"),
                },
                Err(e) => info!("LLM intent extraction failed, using heuristics: {}", e),
            }
        }

        filters
    }
}

const LLM_EXTRACT_PROMPT: &str = "Extract structured filters from the user message. \
Return strict JSON with keys: project_name, developer, city, price_min, price_max, \
currency (string like usd/aed/eur), bedrooms (int), property_type, must_have_features (list), \
question_type (detail|listing|other), is_detail (bool), lead_name, lead_email. \
Use null when absent. Do not invent fields not implied by the text.";

/// Heuristic extraction only.
pub fn extract(message: &str) -> IntentFilters {
    let lower = message.to_lowercase();

    let city = extract_city(&lower);
    let (price_min, price_max, currency) = extract_price(&lower);
    let (mut project_name, developer) = extract_project_or_developer(message);
    if project_name.is_none() {
        project_name = extract_project_span(message, city.as_deref());
    }

    let has_domain_term = contains_any(&lower, DOMAIN_TERMS);

    let filters = IntentFilters {
        rewritten_query: message.trim().to_string(),
        project_name,
        developer,
        city,
        price_min,
        price_max,
        currency,
        bedrooms: extract_bedrooms(&lower),
        property_type: extract_property_type(&lower),
        must_have_features: extract_features(&lower),
        lead_name: extract_lead_name(message),
        lead_email: EMAIL_RE.find(message).map(|m| m.as_str().to_string()),
        preferred_date: DATE_RE
            .captures(message)
            .map(|c| c[1].to_string()),
        is_greeting: contains_any(&lower, GREETING_TERMS) && !contains_any(&lower, PROPERTY_TERMS),
        is_off_topic: !has_domain_term && contains_any(&lower, OFF_TOPIC_TERMS),
        is_investment: contains_any(&lower, INVESTMENT_TERMS),
        is_comparison: contains_any(&lower, COMPARISON_TERMS),
        is_detail_question: contains_any(&lower, DETAIL_TERMS),
        is_booking: contains_any(&lower, BOOKING_TERMS),
    };

    debug!("Heuristic intent: {:?}", filters);
    filters
}

/// Whole-word / whole-phrase containment check.
pub fn contains_term(haystack: &str, term: &str) -> bool {
    let bytes = haystack.as_bytes();
    haystack.match_indices(term).any(|(start, _)| {
        let end = start + term.len();
        let before_ok = start == 0 || !is_word_byte(bytes[start - 1]);
        let after_ok = end >= bytes.len() || !is_word_byte(bytes[end]);
        before_ok && after_ok
    })
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn contains_any(haystack: &str, terms: &[&str]) -> bool {
    terms.iter().any(|t| contains_term(haystack, t))
}

/// Map a free-text city onto the known city table.
pub fn normalize_city(candidate: &str) -> Option<String> {
    let lower = candidate.trim().to_lowercase();
    CITY_ALIASES
        .iter()
        .find(|(alias, _)| *alias == lower)
        .map(|(_, canonical)| canonical.to_string())
}

fn extract_city(lower: &str) -> Option<String> {
    CITY_ALIASES
        .iter()
        .find(|(alias, _)| contains_term(lower, alias))
        .map(|(_, canonical)| canonical.to_string())
}

/// USD value of one unit of `currency`.
pub fn usd_rate(currency: &str) -> Option<f64> {
    USD_RATES
        .iter()
        .find(|(code, _)| *code == currency)
        .map(|(_, rate)| *rate)
}

fn parse_amount(value: &str, suffix: Option<&str>) -> Option<f64> {
    let number: f64 = value.replace(',', "").trim_end_matches('.').parse().ok()?;
    let multiplier = match suffix {
        Some("k") => 1_000.0,
        Some("m" | "mn" | "mil" | "million") => 1_000_000.0,
        Some("b" | "bn" | "billion") => 1_000_000_000.0,
        _ => 1.0,
    };
    Some(number * multiplier)
}

fn detect_currency(lower: &str) -> String {
    let Some(caps) = CURRENCY_RE.captures(lower) else {
        return "usd".to_string();
    };
    let token = caps
        .get(1)
        .or_else(|| caps.get(2))
        .map(|m| m.as_str())
        .unwrap_or("usd");
    match token {
        "$" => "usd",
        "€" | "euro" | "euros" => "eur",
        "£" | "pound" | "pounds" => "gbp",
        "dirham" | "dirhams" => "aed",
        "rupee" | "rupees" => "inr",
        other => other,
    }
    .to_string()
}

/// Returns (min, max, currency); amounts are converted to USD.
fn extract_price(lower: &str) -> (Option<f64>, Option<f64>, String) {
    let currency = detect_currency(lower);
    let rate = usd_rate(&currency).unwrap_or(1.0);
    let to_usd = |v: Option<f64>| v.map(|p| (p * rate).round());

    if let Some(caps) = RANGE_RE.captures(lower) {
        let min = parse_amount(&caps[1], caps.get(2).map(|m| m.as_str()));
        // "between 1 and 2m": the suffix applies to both ends.
        let max_suffix = caps.get(4).map(|m| m.as_str());
        let min_suffix = caps.get(2).map(|m| m.as_str()).or(max_suffix);
        let min = min.and_then(|_| parse_amount(&caps[1], min_suffix));
        let max = parse_amount(&caps[3], max_suffix);
        return (to_usd(min), to_usd(max), currency);
    }

    if let Some(caps) = MAX_RE.captures(lower) {
        let max = parse_amount(&caps[1], caps.get(2).map(|m| m.as_str()));
        return (None, to_usd(max), currency);
    }

    if let Some(caps) = MIN_RE.captures(lower) {
        let min = parse_amount(&caps[1], caps.get(2).map(|m| m.as_str()));
        return (to_usd(min), None, currency);
    }

    (None, None, currency)
}

fn extract_bedrooms(lower: &str) -> Option<i64> {
    if let Some(caps) = BEDROOM_SLASH_RE.captures(lower) {
        if let Ok(n) = caps[1].parse() {
            return Some(n);
        }
    }

    let caps = BEDROOM_RE.captures(lower)?;
    match &caps[1] {
        "one" => Some(1),
        "two" => Some(2),
        "three" => Some(3),
        "four" => Some(4),
        "five" => Some(5),
        "six" => Some(6),
        digits => digits.parse().ok(),
    }
}

fn extract_property_type(lower: &str) -> Option<String> {
    let caps = PROPERTY_TYPE_RE.captures(lower)?;
    let kind = match &caps[1] {
        "flat" | "condo" | "studio" => "apartment",
        other => other,
    };
    Some(kind.to_string())
}

fn extract_features(lower: &str) -> Vec<String> {
    FEATURE_KEYWORDS
        .iter()
        .filter(|(_, phrases)| contains_any(lower, phrases))
        .map(|(name, _)| name.to_string())
        .collect()
}

fn extract_project_or_developer(message: &str) -> (Option<String>, Option<String>) {
    let project = QUOTED_RE
        .captures(message)
        .and_then(|c| c.get(1).or_else(|| c.get(2)).or_else(|| c.get(3)))
        .map(|m| m.as_str().trim().to_string())
        .or_else(|| {
            NAMED_PROJECT_RE
                .captures(message)
                .map(|c| trim_span(&c[1]))
        })
        .filter(|p| !p.is_empty());

    let developer = DEVELOPER_RE
        .captures(message)
        .map(|c| trim_span(&c[1]))
        .filter(|d| !d.is_empty() && normalize_city(d).is_none());

    (project, developer)
}

fn trim_span(span: &str) -> String {
    span.trim()
        .trim_end_matches(|c: char| c == '.' || c == ',' || c == '\'' || c == '?')
        .to_string()
}

/// Longest capitalised 2-7 word span containing a project keyword.
fn extract_project_span(message: &str, city: Option<&str>) -> Option<String> {
    CAPITALISED_SPAN_RE
        .find_iter(message)
        .map(|m| trim_span(m.as_str()))
        .filter(|span| {
            let low = span.to_lowercase();
            if !low.split_whitespace().any(|w| PROJECT_KEYWORDS.contains(&w)) {
                return false;
            }
            // "Dubai Marina" or "Downtown Dubai" is a place, not a project.
            !matches!(city, Some(c) if low.contains(c) && low.split_whitespace().count() <= 2)
        })
        .max_by_key(|span| span.len())
}

fn extract_lead_name(message: &str) -> Option<String> {
    let caps = NAME_RE.captures(message)?;
    let first = caps.get(1)?.as_str();
    if NAME_STOPWORDS.contains(&first.to_lowercase().as_str()) {
        return None;
    }

    let mut name = capitalize(first);
    if let Some(last) = caps.get(2).map(|m| m.as_str()) {
        if !NAME_STOPWORDS.contains(&last.to_lowercase().as_str()) {
            name.push(' ');
            name.push_str(&capitalize(last));
        }
    }
    Some(name)
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedModel;
    use serde_json::json;

    #[test]
    fn test_listing_filters() {
        let f = extract("Looking for a 2 bedroom apartment in Dubai under 1.5m with a pool");
        assert_eq!(f.city.as_deref(), Some("dubai"));
        assert_eq!(f.bedrooms, Some(2));
        assert_eq!(f.property_type.as_deref(), Some("apartment"));
        assert_eq!(f.price_max, Some(1_500_000.0));
        assert_eq!(f.price_min, None);
        assert_eq!(f.must_have_features, vec!["pool".to_string()]);
        assert!(!f.is_greeting);
        assert!(f.missing_filters().is_empty());
    }

    #[test]
    fn test_city_aliases_and_word_boundaries() {
        assert_eq!(extract("2br in NYC please").city.as_deref(), Some("new york"));
        assert_eq!(
            extract("something in Downtown Dubai").city.as_deref(),
            Some("dubai")
        );
        // "paris" inside another word is not a city mention
        assert_eq!(extract("comparison of options").city, None);
    }

    #[test]
    fn test_price_range_and_currency_conversion() {
        let f = extract("between 500k and 900k in London");
        assert_eq!(f.price_min, Some(500_000.0));
        assert_eq!(f.price_max, Some(900_000.0));

        let f = extract("villa in dubai between 1 and 2m");
        assert_eq!(f.price_min, Some(1_000_000.0));
        assert_eq!(f.price_max, Some(2_000_000.0));

        let f = extract("budget under AED 2m");
        assert_eq!(f.currency, "aed");
        assert_eq!(f.price_max, Some(544_600.0));

        let f = extract("over $750,000");
        assert_eq!(f.price_min, Some(750_000.0));
        assert_eq!(f.currency, "usd");
    }

    #[test]
    fn test_bedroom_forms() {
        assert_eq!(extract("3 BHK flat").bedrooms, Some(3));
        assert_eq!(extract("a 2/3 bedroom place").bedrooms, Some(2));
        assert_eq!(extract("two bedrooms near the metro").bedrooms, Some(2));
        assert_eq!(extract("something nice").bedrooms, None);
    }

    #[test]
    fn test_property_type_normalization() {
        assert_eq!(extract("a condo").property_type.as_deref(), Some("apartment"));
        assert_eq!(extract("studios in Paris").property_type.as_deref(), Some("apartment"));
        assert_eq!(extract("Villas please").property_type.as_deref(), Some("villa"));
    }

    #[test]
    fn test_project_and_developer() {
        let f = extract("Tell me about \"Azure Bay Residences\"");
        assert_eq!(f.project_name.as_deref(), Some("Azure Bay Residences"));

        let f = extract("What amenities does Marina Heights Tower have?");
        assert_eq!(f.project_name.as_deref(), Some("Marina Heights Tower"));
        assert!(f.is_detail_question);

        let f = extract("anything by Emaar Properties in dubai");
        assert_eq!(f.developer.as_deref(), Some("Emaar Properties"));

        let f = extract("I'm looking at the project called Palm Crescent Villas.");
        assert_eq!(f.project_name.as_deref(), Some("Palm Crescent Villas"));
    }

    #[test]
    fn test_place_is_not_a_project() {
        let f = extract("Apartments in Dubai Marina");
        assert_eq!(f.city.as_deref(), Some("dubai"));
        assert_eq!(f.project_name, None);
    }

    #[test]
    fn test_flags() {
        assert!(extract("Hi there!").is_greeting);
        assert!(!extract("Hi, I want a villa").is_greeting);
        assert!(extract("tell me a joke").is_off_topic);
        assert!(!extract("what's the weather like near the property").is_off_topic);
        assert!(extract("what's the ROI on this").is_investment);
        assert!(extract("Compare Azure Bay vs Marina Heights").is_comparison);
        assert!(extract("I'd like to book a viewing").is_booking);
        // "hi" inside "this" is not a greeting
        assert!(!extract("this one").is_greeting);
    }

    #[test]
    fn test_lead_details() {
        let f = extract("My name is sara khan, email sara.khan@example.com, visit on 2026-11-02");
        assert_eq!(f.lead_name.as_deref(), Some("Sara Khan"));
        assert_eq!(f.lead_email.as_deref(), Some("sara.khan@example.com"));
        assert_eq!(f.preferred_date.as_deref(), Some("2026-11-02"));

        let f = extract("I'm looking for a villa");
        assert_eq!(f.lead_name, None);
    }

    #[test]
    fn test_inherit_from_previous_turn() {
        let previous = extract("2 bedroom in Dubai under 1m");
        let mut current = extract("what about villas?");
        current.inherit_from(&previous);
        assert_eq!(current.city.as_deref(), Some("dubai"));
        assert_eq!(current.bedrooms, Some(2));
        assert_eq!(current.price_max, Some(1_000_000.0));
        assert_eq!(current.property_type.as_deref(), Some("villa"));
    }

    #[test]
    fn test_merge_llm_fills_gaps_only() {
        let mut f = extract("3 bedroom place near the beach");
        f.merge_llm(&json!({
            "city": "Abu Dhabi",
            "bedrooms": 5,
            "price_max": "2,000,000",
            "currency": "aed",
            "must_have_features": ["sea view"],
            "question_type": "detail"
        }));
        assert_eq!(f.city.as_deref(), Some("abu dhabi"));
        assert_eq!(f.bedrooms, Some(3));
        assert_eq!(f.currency, "aed");
        assert_eq!(f.price_max, Some(544_600.0));
        assert!(f.must_have_features.contains(&"sea view".to_string()));
        assert!(f.is_detail_question);
    }

    #[tokio::test]
    async fn test_extractor_with_llm_and_bad_reply() {
        let model = Arc::new(
            ScriptedModel::new()
                .reply("```json\n{\"developer\": \"Nakheel\"}\n```")
                .reply("not json"),
        );
        let extractor = IntentExtractor::new(Some(model));

        let f = extractor.extract("anything on the palm?").await;
        assert_eq!(f.developer.as_deref(), Some("Nakheel"));

        let f = extractor.extract("2 bed in london").await;
        assert_eq!(f.city.as_deref(), Some("london"));
        assert_eq!(f.developer, None);
    }
}
