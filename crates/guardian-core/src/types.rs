//! Shared types used across Guardian-IO crates.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Categorical risk level as authored on risk zones and routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }

    /// Heatmap weight for this level, in `0.0..=1.0`.
    pub fn weight(&self) -> f64 {
        match self {
            RiskLevel::Low => 0.25,
            RiskLevel::Medium => 0.6,
            RiskLevel::High => 1.0,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of facility a supply-chain node represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationType {
    Warehouse,
    Distribution,
    Manufacturing,
}

impl LocationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocationType::Warehouse => "warehouse",
            LocationType::Distribution => "distribution",
            LocationType::Manufacturing => "manufacturing",
        }
    }

    pub fn category(&self) -> Category {
        match self {
            LocationType::Warehouse => Category::Warehouse,
            LocationType::Distribution => Category::Distribution,
            LocationType::Manufacturing => Category::Manufacturing,
        }
    }
}

impl fmt::Display for LocationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Icon categories ────────────────────────────────────────────────

/// Closed set of categories the workspace renders iconography for.
///
/// Views never carry icon markup as data; they carry a `Category` and
/// resolve it through [`Category::icon`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Warehouse,
    Distribution,
    Manufacturing,
    Emissions,
    Energy,
    Water,
    Waste,
    Social,
    Governance,
    RiskAlert,
    Route,
    Other,
}

/// Icon identifier per category.
const ICONS: [(Category, &str); 12] = [
    (Category::Warehouse, "warehouse"),
    (Category::Distribution, "truck"),
    (Category::Manufacturing, "factory"),
    (Category::Emissions, "cloud"),
    (Category::Energy, "zap"),
    (Category::Water, "droplet"),
    (Category::Waste, "recycle"),
    (Category::Social, "users"),
    (Category::Governance, "scale"),
    (Category::RiskAlert, "alert-triangle"),
    (Category::Route, "route"),
    (Category::Other, "circle"),
];

impl Category {
    /// Icon identifier understood by the front-end icon set.
    pub fn icon(&self) -> &'static str {
        ICONS
            .iter()
            .find(|(c, _)| c == self)
            .map(|(_, icon)| *icon)
            .unwrap_or("circle")
    }

    /// Classify a free-form ESG `metric_type` tag.
    pub fn from_metric_type(metric_type: &str) -> Self {
        match metric_type.trim().to_ascii_lowercase().as_str() {
            "emissions" | "carbon" | "co2" | "ghg" => Category::Emissions,
            "energy" | "renewable_energy" => Category::Energy,
            "water" => Category::Water,
            "waste" | "recycling" => Category::Waste,
            "social" | "labor" | "diversity" => Category::Social,
            "governance" | "compliance" => Category::Governance,
            "risk" => Category::RiskAlert,
            _ => Category::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_category_has_a_distinct_icon() {
        let mut seen = std::collections::HashSet::new();
        for (category, icon) in ICONS {
            assert_eq!(category.icon(), icon);
            assert!(seen.insert(icon), "duplicate icon {icon}");
        }
    }

    #[test]
    fn metric_type_classification() {
        assert_eq!(Category::from_metric_type("Emissions"), Category::Emissions);
        assert_eq!(Category::from_metric_type(" water "), Category::Water);
        assert_eq!(Category::from_metric_type("compliance"), Category::Governance);
        assert_eq!(Category::from_metric_type("something-new"), Category::Other);
    }

    #[test]
    fn location_type_maps_to_category() {
        assert_eq!(LocationType::Warehouse.category().icon(), "warehouse");
        assert_eq!(LocationType::Manufacturing.category().icon(), "factory");
    }

    #[test]
    fn risk_level_parses_lowercase() {
        #[derive(Deserialize)]
        struct Wrap {
            level: RiskLevel,
        }
        let w: Wrap = toml::from_str(r#"level = "high""#).unwrap();
        assert_eq!(w.level, RiskLevel::High);
        assert!(RiskLevel::High.weight() > RiskLevel::Low.weight());
    }
}
