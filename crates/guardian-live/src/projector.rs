//! Risk projection — one colour scale for tables and map layers.
//!
//! Scores are percentage-scale compliance values: higher is better.
//! `score >= 80` is low risk, `50 <= score < 80` medium, below 50 high.
//! Categorical levels map onto the same three buckets.

use guardian_core::RiskLevel;
use guardian_state::{MetricRecord, RiskZone, SupplyChainNode, SupplyChainRoute};
use serde::Serialize;

pub const LOW_RISK_COLOR: &str = "#22c55e";
pub const MEDIUM_RISK_COLOR: &str = "#eab308";
pub const HIGH_RISK_COLOR: &str = "#ef4444";

const LOW_RISK_MIN_SCORE: f64 = 80.0;
const MEDIUM_RISK_MIN_SCORE: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskBucket {
    Low,
    Medium,
    High,
}

impl RiskBucket {
    pub fn color(&self) -> &'static str {
        match self {
            RiskBucket::Low => LOW_RISK_COLOR,
            RiskBucket::Medium => MEDIUM_RISK_COLOR,
            RiskBucket::High => HIGH_RISK_COLOR,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskBucket::Low => "low",
            RiskBucket::Medium => "medium",
            RiskBucket::High => "high",
        }
    }

    /// Bucket for a compliance score. Non-finite scores are high risk.
    pub fn from_score(score: f64) -> Self {
        if score.is_nan() {
            RiskBucket::High
        } else if score >= LOW_RISK_MIN_SCORE {
            RiskBucket::Low
        } else if score >= MEDIUM_RISK_MIN_SCORE {
            RiskBucket::Medium
        } else {
            RiskBucket::High
        }
    }
}

impl From<RiskLevel> for RiskBucket {
    fn from(level: RiskLevel) -> Self {
        match level {
            RiskLevel::Low => RiskBucket::Low,
            RiskLevel::Medium => RiskBucket::Medium,
            RiskLevel::High => RiskBucket::High,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RiskProjection {
    pub bucket: RiskBucket,
    pub color: &'static str,
}

impl From<RiskBucket> for RiskProjection {
    fn from(bucket: RiskBucket) -> Self {
        Self {
            bucket,
            color: bucket.color(),
        }
    }
}

/// What a record contributes to risk: a score or a level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RiskInput {
    Score(f64),
    Level(RiskLevel),
    Bucket(RiskBucket),
}

pub trait Projectable {
    fn risk_input(&self) -> RiskInput;
}

/// Project any record onto a risk bucket and colour.
pub fn project<R: Projectable + ?Sized>(record: &R) -> RiskProjection {
    let bucket = match record.risk_input() {
        RiskInput::Score(score) => RiskBucket::from_score(score),
        RiskInput::Level(level) => level.into(),
        RiskInput::Bucket(bucket) => bucket,
    };
    bucket.into()
}

impl Projectable for MetricRecord {
    fn risk_input(&self) -> RiskInput {
        // Non-percentage units are read on the same 0-100 scale.
        RiskInput::Score(self.metric_value)
    }
}

impl Projectable for RiskZone {
    fn risk_input(&self) -> RiskInput {
        RiskInput::Level(self.risk_level)
    }
}

impl Projectable for SupplyChainRoute {
    fn risk_input(&self) -> RiskInput {
        RiskInput::Level(self.risk_level)
    }
}

impl Projectable for SupplyChainNode {
    fn risk_input(&self) -> RiskInput {
        RiskInput::Bucket(node_status_bucket(&self.status))
    }
}

/// Operational status of a node as a risk bucket. Unknown statuses are medium.
pub fn node_status_bucket(status: &str) -> RiskBucket {
    match status.trim().to_ascii_lowercase().as_str() {
        "active" | "operational" | "on_track" | "normal" => RiskBucket::Low,
        "disrupted" | "inactive" | "closed" | "critical" | "offline" => RiskBucket::High,
        _ => RiskBucket::Medium,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn metric(value: f64) -> MetricRecord {
        MetricRecord {
            id: "m".to_string(),
            metric_name: "Supplier Compliance".to_string(),
            metric_value: value,
            metric_type: "compliance".to_string(),
            timestamp: Utc::now(),
            unit: "%".to_string(),
        }
    }

    #[test]
    fn score_boundaries() {
        assert_eq!(project(&metric(80.0)).bucket, RiskBucket::Low);
        assert_eq!(project(&metric(79.0)).bucket, RiskBucket::Medium);
        assert_eq!(project(&metric(79.999)).bucket, RiskBucket::Medium);
        assert_eq!(project(&metric(50.0)).bucket, RiskBucket::Medium);
        assert_eq!(project(&metric(49.0)).bucket, RiskBucket::High);
        assert_eq!(project(&metric(100.0)).bucket, RiskBucket::Low);
        assert_eq!(project(&metric(0.0)).bucket, RiskBucket::High);
    }

    #[test]
    fn every_score_lands_in_exactly_one_bucket() {
        for tenth in 0..=1000 {
            let score = tenth as f64 / 10.0;
            let bucket = RiskBucket::from_score(score);
            let expected = if score >= 80.0 {
                RiskBucket::Low
            } else if score >= 50.0 {
                RiskBucket::Medium
            } else {
                RiskBucket::High
            };
            assert_eq!(bucket, expected, "score {score}");
        }
    }

    #[test]
    fn out_of_range_and_nan_scores() {
        assert_eq!(RiskBucket::from_score(250.0), RiskBucket::Low);
        assert_eq!(RiskBucket::from_score(-3.0), RiskBucket::High);
        assert_eq!(RiskBucket::from_score(f64::NAN), RiskBucket::High);
    }

    #[test]
    fn levels_pass_through() {
        let zone = RiskZone {
            id: "rz".to_string(),
            location: "Strait of Malacca".to_string(),
            risk_level: RiskLevel::Medium,
            description: String::new(),
            timestamp: Utc::now(),
            latitude: None,
            longitude: None,
        };
        let projection = project(&zone);
        assert_eq!(projection.bucket, RiskBucket::Medium);
        assert_eq!(projection.color, MEDIUM_RISK_COLOR);
    }

    #[test]
    fn colours_are_distinct() {
        assert_ne!(RiskBucket::Low.color(), RiskBucket::Medium.color());
        assert_ne!(RiskBucket::Medium.color(), RiskBucket::High.color());
        assert_eq!(RiskProjection::from(RiskBucket::High).color, HIGH_RISK_COLOR);
    }

    #[test]
    fn node_status() {
        assert_eq!(node_status_bucket("Active"), RiskBucket::Low);
        assert_eq!(node_status_bucket("delayed"), RiskBucket::Medium);
        assert_eq!(node_status_bucket("disrupted"), RiskBucket::High);
        assert_eq!(node_status_bucket("unknown"), RiskBucket::Medium);
    }
}
