//! Investment heuristic.
//!
//! A fixed-weight estimate: base rental yield by city, appreciation by
//! country, and a 0-10 score derived from their sum. The same project
//! always produces the same analysis.

use crate::models::{group_thousands, Project};
use serde::Serialize;
use std::fmt;

/// Gross annual rental yield (fraction of price) by city.
const CITY_YIELDS: &[(&str, f64)] = &[
    ("dubai", 0.06),
    ("mumbai", 0.03),
    ("london", 0.04),
    ("new york", 0.045),
    ("bangalore", 0.05),
];
const DEFAULT_YIELD: f64 = 0.04;

/// Annual appreciation (percent) by country code.
const COUNTRY_APPRECIATION: &[(&str, f64)] = &[("ae", 6.5), ("us", 4.5)];
const DEFAULT_APPRECIATION: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Verdict {
    Excellent,
    Good,
    Fair,
}

impl Verdict {
    fn from_score(score: f64) -> Self {
        if score >= 8.0 {
            Verdict::Excellent
        } else if score >= 6.0 {
            Verdict::Good
        } else {
            Verdict::Fair
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Verdict::Excellent => "Excellent",
            Verdict::Good => "Good",
            Verdict::Fair => "Fair",
        };
        write!(f, "{}", label)
    }
}

/// Result of [`analyze`].
#[derive(Debug, Clone, Serialize)]
pub struct InvestmentAnalysis {
    pub project_id: i64,
    pub project: String,
    pub price: Option<f64>,
    pub price_per_sqm: Option<f64>,
    /// Percent.
    pub rental_yield: f64,
    pub monthly_rent: Option<f64>,
    /// Percent per year.
    pub appreciation: f64,
    pub score: f64,
    pub verdict: Verdict,
}

pub fn analyze(project: &Project) -> InvestmentAnalysis {
    let city = project.city.as_deref().unwrap_or("").trim().to_lowercase();
    let country = project.country.as_deref().unwrap_or("").trim().to_lowercase();

    let yield_fraction = CITY_YIELDS
        .iter()
        .find(|(c, _)| *c == city)
        .map(|(_, y)| *y)
        .unwrap_or(DEFAULT_YIELD);
    let appreciation = COUNTRY_APPRECIATION
        .iter()
        .find(|(c, _)| *c == country)
        .map(|(_, a)| *a)
        .unwrap_or(DEFAULT_APPRECIATION);

    let price = project.price.filter(|p| *p > 0.0);
    let price_per_sqm = match (price, project.area) {
        (Some(p), Some(a)) if a > 0.0 => Some(p / a),
        _ => None,
    };
    let rental_yield = yield_fraction * 100.0;
    let score = ((rental_yield + appreciation) / 1.5).min(10.0);

    InvestmentAnalysis {
        project_id: project.id,
        project: project.name.clone(),
        price,
        price_per_sqm,
        rental_yield,
        monthly_rent: price.map(|p| p * yield_fraction / 12.0),
        appreciation,
        score,
        verdict: Verdict::from_score(score),
    }
}

impl InvestmentAnalysis {
    pub fn to_markdown(&self) -> String {
        let money = |v: Option<f64>| match v {
            Some(v) => format!("${}", group_thousands(v.round() as i64)),
            None => "N/A".to_string(),
        };

        format!(
            "**Investment Analysis for {}**\n\n\
             - **Price**: {}\n\
             - **Price per sq m**: {}\n\
             - **Rental Yield**: {:.2}%\n\
             - **Estimated Monthly Rent**: {}\n\
             - **Appreciation**: {:.2}%\n\
             - **Investment Score**: {:.1}/10\n\
             - **Recommendation**: {} investment\n",
            self.project,
            money(self.price),
            money(self.price_per_sqm),
            self.rental_yield,
            money(self.monthly_rent),
            self.appreciation,
            self.score,
            self.verdict
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(city: &str, country: &str, price: f64, area: f64) -> Project {
        Project {
            id: 7,
            name: "Test Tower".into(),
            city: Some(city.into()),
            country: Some(country.into()),
            price: Some(price),
            area: Some(area),
            ..Default::default()
        }
    }

    #[test]
    fn test_dubai_is_excellent() {
        let analysis = analyze(&listing("Dubai", "AE", 600_000.0, 100.0));
        assert_eq!(analysis.rental_yield, 6.0);
        assert_eq!(analysis.appreciation, 6.5);
        assert!((analysis.score - 12.5 / 1.5).abs() < 1e-9);
        assert_eq!(analysis.verdict, Verdict::Excellent);
        assert_eq!(analysis.price_per_sqm, Some(6_000.0));
        assert_eq!(analysis.monthly_rent, Some(3_000.0));
    }

    #[test]
    fn test_verdict_thresholds() {
        assert_eq!(analyze(&listing("London", "UK", 1.0, 1.0)).verdict, Verdict::Good);
        assert_eq!(analyze(&listing("Mumbai", "IN", 1.0, 1.0)).verdict, Verdict::Fair);
        // unknown city and country fall back to 4% + 5%
        let other = analyze(&listing("Lisbon", "PT", 1.0, 1.0));
        assert!((other.score - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_price_and_area() {
        let project = Project {
            name: "Bare".into(),
            ..Default::default()
        };
        let analysis = analyze(&project);
        assert_eq!(analysis.price, None);
        assert_eq!(analysis.price_per_sqm, None);
        assert!(analysis.to_markdown().contains("- **Price**: N/A"));
    }

    #[test]
    fn test_markdown() {
        let text = analyze(&listing("Dubai", "AE", 650_000.0, 112.0)).to_markdown();
        assert!(text.starts_with("**Investment Analysis for Test Tower**"));
        assert!(text.contains("- **Price**: $650,000"));
        assert!(text.contains("- **Investment Score**: 8.3/10"));
        assert!(text.contains("Excellent investment"));
    }
}
