//! Cross-sell suggestions when a search comes back empty.
//!
//! Criteria are relaxed one step at a time: neighbouring bedroom counts
//! in the same city, a larger budget, the same unit in other cities. When
//! none of these apply the most expensive listings are suggested.

use crate::db::Database;
use crate::error::ConciergeResult;
use crate::intent::IntentFilters;
use crate::models::Project;
use serde::Deserialize;

/// What the buyer asked for.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SimilarCriteria {
    #[serde(default)]
    pub bedrooms: Option<i64>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub max_price: Option<f64>,
    #[serde(default)]
    pub property_type: Option<String>,
}

impl From<&IntentFilters> for SimilarCriteria {
    fn from(filters: &IntentFilters) -> Self {
        Self {
            bedrooms: filters.bedrooms,
            city: filters.city.clone(),
            max_price: filters.price_max,
            property_type: filters.property_type.clone(),
        }
    }
}

/// A labelled group of alternatives.
#[derive(Debug, Clone)]
pub struct Alternatives {
    pub label: &'static str,
    pub projects: Vec<Project>,
}

fn same_city(project: &Project, city: &str) -> bool {
    project
        .city
        .as_deref()
        .map(|c| c.eq_ignore_ascii_case(city))
        .unwrap_or(false)
}

fn priced_at_most(project: &Project, limit: f64) -> bool {
    project.price.map(|p| p <= limit).unwrap_or(false)
}

pub fn find_similar(db: &Database, criteria: &SimilarCriteria) -> ConciergeResult<Vec<Alternatives>> {
    let mut inventory = db.all_projects()?;
    inventory.sort_by(|a, b| {
        a.price
            .unwrap_or(f64::MAX)
            .partial_cmp(&b.price.unwrap_or(f64::MAX))
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut groups = Vec::new();
    let city = criteria.city.as_deref();

    if let (Some(bedrooms), Some(city)) = (criteria.bedrooms, city) {
        let nearby: Vec<Project> = inventory
            .iter()
            .filter(|p| same_city(p, city))
            .filter(|p| p.bedrooms.map(|b| (b - bedrooms).abs() <= 1).unwrap_or(false))
            .filter(|p| criteria.max_price.map(|m| priced_at_most(p, m * 1.2)).unwrap_or(true))
            .take(3)
            .cloned()
            .collect();
        if !nearby.is_empty() {
            groups.push(Alternatives {
                label: "Similar bedroom count",
                projects: nearby,
            });
        }

        if let Some(max_price) = criteria.max_price {
            let stretch: Vec<Project> = inventory
                .iter()
                .filter(|p| same_city(p, city) && p.bedrooms == Some(bedrooms))
                .filter(|p| p.price.map(|x| x > max_price && x <= max_price * 1.5).unwrap_or(false))
                .take(3)
                .cloned()
                .collect();
            if !stretch.is_empty() {
                groups.push(Alternatives {
                    label: "Slightly higher budget",
                    projects: stretch,
                });
            }
        }
    }

    if let (Some(kind), Some(bedrooms)) = (criteria.property_type.as_deref(), criteria.bedrooms) {
        let elsewhere: Vec<Project> = inventory
            .iter()
            .filter(|p| {
                p.property_type
                    .as_deref()
                    .map(|t| t.eq_ignore_ascii_case(kind))
                    .unwrap_or(false)
            })
            .filter(|p| p.bedrooms == Some(bedrooms))
            .filter(|p| city.map(|c| !same_city(p, c)).unwrap_or(true))
            .take(5)
            .cloned()
            .collect();
        if !elsewhere.is_empty() {
            groups.push(Alternatives {
                label: "Other cities",
                projects: elsewhere,
            });
        }
    }

    if groups.is_empty() {
        let mut popular = inventory;
        popular.reverse();
        popular.truncate(5);
        if !popular.is_empty() {
            groups.push(Alternatives {
                label: "Popular properties",
                projects: popular,
            });
        }
    }

    Ok(groups)
}

pub fn format_alternatives(groups: &[Alternatives]) -> String {
    if groups.is_empty() {
        return "No alternatives are available right now.".to_string();
    }

    let mut out = String::from("**No exact matches, but here are similar alternatives:**\n\n");
    for group in groups {
        out.push_str(&format!("### {}\n", group.label));
        for (i, p) in group.projects.iter().enumerate() {
            out.push_str(&format!(
                "{}. **{}**\n   - {} bedrooms, {}\n   - {}\n",
                i + 1,
                p.name,
                p.bedrooms_label(),
                p.city.as_deref().unwrap_or("N/A"),
                p.price_label()
            ));
        }
        out.push('\n');
    }
    out.push_str("Would any of these work? Or should I adjust the search criteria?");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::sample_db;

    #[test]
    fn test_relaxed_bedrooms_and_budget() {
        let db = sample_db();
        let criteria = SimilarCriteria {
            bedrooms: Some(3),
            city: Some("dubai".into()),
            max_price: Some(1_000_000.0),
            property_type: Some("apartment".into()),
        };
        let groups = find_similar(&db, &criteria).unwrap();
        let labels: Vec<&str> = groups.iter().map(|g| g.label).collect();
        assert_eq!(
            labels,
            vec!["Similar bedroom count", "Slightly higher budget", "Other cities"]
        );

        for p in &groups[0].projects {
            assert!(p.price.unwrap() <= 1_200_000.0);
        }
        assert_eq!(groups[1].projects[0].name, "Creek Harbour Residences");
        assert!(groups[2]
            .projects
            .iter()
            .all(|p| p.city.as_deref() != Some("Dubai")));
    }

    #[test]
    fn test_popular_fallback() {
        let db = sample_db();
        let groups = find_similar(&db, &SimilarCriteria::default()).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].label, "Popular properties");
        assert_eq!(groups[0].projects.len(), 5);
        assert_eq!(groups[0].projects[0].name, "Saadiyat Beach Villas");

        let text = format_alternatives(&groups);
        assert!(text.contains("### Popular properties"));
        assert!(text.ends_with("adjust the search criteria?"));
    }
}
