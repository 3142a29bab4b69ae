//! Column documentation, business rules and starter question/SQL pairs
//! for the `projects` table.

use crate::db::SqlExample;
use std::collections::HashSet;

pub const DOCUMENTATION: &[&str] = &[
    "The 'projects' table stores real estate project listings worldwide.",
    "Column 'name': the project/property name.",
    "Column 'bedrooms': number of bedrooms (INTEGER). 0 means studio.",
    "Column 'bathrooms': number of bathrooms.",
    "Column 'property_type': lowercase type such as 'apartment', 'villa', 'townhouse'.",
    "Column 'completion_status': 'off_plan' (under construction) or 'available' (ready to move).",
    "Column 'developer': developer/builder company name.",
    "Column 'price': price in USD.",
    "Column 'area': area in square meters.",
    "Column 'city': city name in title case, e.g. 'Dubai', 'London', 'New York'.",
    "Column 'country': country code, e.g. 'AE', 'UK', 'US', 'IN'.",
    "Column 'completion_date': completion date as YYYY-MM-DD text.",
    "Column 'features': free text list of unit features such as 'pool', 'balcony'.",
    "Column 'facilities': free text list of building facilities.",
    "Column 'description': marketing description of the project.",
];

pub const BUSINESS_RULES: &[&str] = &[
    "Price is always in USD, never in local currency.",
    "Area is always in square meters, not square feet.",
    "Compare cities case-insensitively: LOWER(city) = 'dubai'.",
    "Search features with LOWER(features) LIKE '%pool%' and descriptions with LOWER(description) LIKE '%keyword%'.",
    "completion_status = 'available' means ready to move in now.",
    "For price ranges use price BETWEEN min AND max; for bedrooms use an exact match.",
    "Match developers with LOWER(developer) LIKE '%name%'.",
    "When returning listings always select id, name, city, price, bedrooms and property_type.",
];

/// Starter examples installed into an empty tool memory.
pub const SEED_EXAMPLES: &[(&str, &str)] = &[
    (
        "Find 2 bedroom apartments in Dubai",
        "SELECT id, name, city, price, bedrooms, property_type FROM projects WHERE bedrooms = 2 AND property_type = 'apartment' AND LOWER(city) = 'dubai'",
    ),
    (
        "Show me 3 bedroom villas under 1000000",
        "SELECT id, name, city, price, bedrooms, property_type FROM projects WHERE bedrooms = 3 AND property_type = 'villa' AND price < 1000000",
    ),
    (
        "List all townhouses",
        "SELECT id, name, city, price, bedrooms, property_type FROM projects WHERE property_type = 'townhouse'",
    ),
    (
        "Properties under 500000",
        "SELECT id, name, city, price, bedrooms, property_type FROM projects WHERE price < 500000",
    ),
    (
        "Find properties between 1 million and 5 million",
        "SELECT id, name, city, price, bedrooms, property_type FROM projects WHERE price BETWEEN 1000000 AND 5000000",
    ),
    (
        "What is the average price of apartments?",
        "SELECT AVG(price) AS average_price FROM projects WHERE property_type = 'apartment'",
    ),
    (
        "All properties in Dubai",
        "SELECT id, name, city, price, bedrooms, property_type FROM projects WHERE LOWER(city) = 'dubai'",
    ),
    (
        "How many properties are in London?",
        "SELECT COUNT(*) AS total FROM projects WHERE LOWER(city) = 'london'",
    ),
    (
        "Show me ready to move properties",
        "SELECT id, name, city, price, bedrooms, property_type FROM projects WHERE completion_status = 'available'",
    ),
    (
        "Find off plan projects",
        "SELECT id, name, city, price, bedrooms, property_type FROM projects WHERE completion_status = 'off_plan'",
    ),
    (
        "2 bedroom apartments in Dubai under 800000",
        "SELECT id, name, city, price, bedrooms, property_type FROM projects WHERE bedrooms = 2 AND property_type = 'apartment' AND LOWER(city) = 'dubai' AND price < 800000",
    ),
    (
        "Available 3 bedroom properties under 1.5 million",
        "SELECT id, name, city, price, bedrooms, property_type FROM projects WHERE bedrooms = 3 AND price < 1500000 AND completion_status = 'available'",
    ),
    (
        "How many 2 bedroom apartments are available?",
        "SELECT COUNT(*) AS total FROM projects WHERE bedrooms = 2 AND property_type = 'apartment'",
    ),
    (
        "Count properties by city",
        "SELECT city, COUNT(*) AS total FROM projects GROUP BY city ORDER BY total DESC",
    ),
    (
        "Show cheapest apartments first",
        "SELECT id, name, city, price, bedrooms, property_type FROM projects WHERE property_type = 'apartment' ORDER BY price ASC",
    ),
    (
        "Top 10 most expensive properties",
        "SELECT id, name, city, price, bedrooms, property_type FROM projects ORDER BY price DESC LIMIT 10",
    ),
];

fn tokens(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// The `k` remembered examples most similar to `question` (token Jaccard),
/// ties broken by hit count.
pub fn similar_examples<'a>(question: &str, examples: &'a [SqlExample], k: usize) -> Vec<&'a SqlExample> {
    let query = tokens(question);
    let mut scored: Vec<(f64, &SqlExample)> = examples
        .iter()
        .map(|ex| {
            let other = tokens(&ex.question);
            let union = query.union(&other).count();
            let score = if union == 0 {
                0.0
            } else {
                query.intersection(&other).count() as f64 / union as f64
            };
            (score, ex)
        })
        .filter(|(score, _)| *score > 0.0)
        .collect();

    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.1.hits.cmp(&a.1.hits))
    });
    scored.into_iter().take(k).map(|(_, ex)| ex).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn examples() -> Vec<SqlExample> {
        SEED_EXAMPLES
            .iter()
            .map(|(q, s)| SqlExample {
                question: q.to_string(),
                sql: s.to_string(),
                hits: 1,
            })
            .collect()
    }

    #[test]
    fn test_similar_examples_ranking() {
        let examples = examples();
        let top = similar_examples("2 bedroom apartments in Dubai under 700000", &examples, 2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].question, "2 bedroom apartments in Dubai under 800000");
        assert_eq!(top[1].question, "Find 2 bedroom apartments in Dubai");
    }

    #[test]
    fn test_similar_examples_no_overlap() {
        let examples = examples();
        assert!(similar_examples("zzz qqq", &examples, 3).is_empty());
    }

    #[test]
    fn test_seed_examples_pass_guard() {
        for (_, sql) in SEED_EXAMPLES {
            assert!(super::super::guard::validate(sql).is_ok(), "{}", sql);
        }
    }
}
