//! View types for dashboard template rendering.
//!
//! These types carry pre-formatted strings and computed colours so
//! templates stay simple. Risk colours always come from the projector.

use chrono::{DateTime, Utc};
use guardian_core::{Category, RiskLevel};
use guardian_live::projector::{RiskBucket, node_status_bucket, project};
use guardian_live::{LoadState, Toast, ToastLevel, ViewSnapshot};
use guardian_state::{MetricRecord, RiskZone, SupplyChainNode, SupplyChainRoute};

// ── Summary ─────────────────────────────────────────────────────

pub struct OverviewSummary {
    pub metric_count: usize,
    pub average_score_display: String,
    pub average_color: &'static str,
    pub zones_high: usize,
    pub zones_medium: usize,
    pub zones_low: usize,
    pub node_count: usize,
    pub live: LiveBadge,
}

pub struct LiveBadge {
    pub label: String,
    pub dot_class: &'static str,
}

impl LiveBadge {
    pub fn from_snapshot(snapshot: Option<&ViewSnapshot>) -> Self {
        match snapshot {
            None => Self {
                label: "Live updates off".to_string(),
                dot_class: "bg-slate-500",
            },
            Some(s) if !s.feed_errors.is_empty() => Self {
                label: format!("Live degraded ({} feed errors)", s.feed_errors.len()),
                dot_class: "bg-amber-400",
            },
            Some(s) => match &s.load_state {
                LoadState::Loading => Self {
                    label: "Loading".to_string(),
                    dot_class: "bg-sky-400 animate-pulse",
                },
                LoadState::Ready => Self {
                    label: "Live".to_string(),
                    dot_class: "bg-emerald-400 animate-pulse",
                },
                LoadState::Failed(_) => Self {
                    label: "Initial load failed".to_string(),
                    dot_class: "bg-rose-500",
                },
            },
        }
    }
}

pub fn build_summary(
    metrics: &[MetricRecord],
    zones: &[RiskZone],
    node_count: usize,
    snapshot: Option<&ViewSnapshot>,
) -> OverviewSummary {
    let average = if metrics.is_empty() {
        None
    } else {
        Some(metrics.iter().map(|m| m.metric_value).sum::<f64>() / metrics.len() as f64)
    };
    let count = |level: RiskLevel| zones.iter().filter(|z| z.risk_level == level).count();

    OverviewSummary {
        metric_count: metrics.len(),
        average_score_display: average
            .map(|a| format!("{a:.1}"))
            .unwrap_or_else(|| "n/a".to_string()),
        average_color: average
            .map(|a| RiskBucket::from_score(a).color())
            .unwrap_or("#94a3b8"),
        zones_high: count(RiskLevel::High),
        zones_medium: count(RiskLevel::Medium),
        zones_low: count(RiskLevel::Low),
        node_count,
        live: LiveBadge::from_snapshot(snapshot),
    }
}

// ── Metrics ─────────────────────────────────────────────────────

pub struct MetricView {
    pub id: String,
    pub name: String,
    pub value_display: String,
    pub metric_type: String,
    pub icon: &'static str,
    pub risk: &'static str,
    pub color: &'static str,
    pub badge_class: &'static str,
    pub timestamp_display: String,
    pub relative_display: String,
}

impl MetricView {
    pub fn from_record(record: &MetricRecord) -> Self {
        let projection = project(record);
        Self {
            id: record.id.clone(),
            name: record.metric_name.clone(),
            value_display: format!("{}{}", format_value(record.metric_value), record.unit),
            metric_type: record.metric_type.clone(),
            icon: Category::from_metric_type(&record.metric_type).icon(),
            risk: projection.bucket.as_str(),
            color: projection.color,
            badge_class: risk_badge_class(projection.bucket),
            timestamp_display: format_timestamp(record.timestamp),
            relative_display: format_relative_time(record.timestamp),
        }
    }
}

/// Newest first, at most `limit` rows.
pub fn build_metric_views(metrics: &[MetricRecord], limit: usize) -> Vec<MetricView> {
    metrics
        .iter()
        .rev()
        .take(limit)
        .map(MetricView::from_record)
        .collect()
}

// ── Risk zones ──────────────────────────────────────────────────

pub struct ZoneView {
    pub id: String,
    pub location: String,
    pub level: &'static str,
    pub color: &'static str,
    pub badge_class: &'static str,
    pub description: String,
    pub mapped: bool,
    pub relative_display: String,
}

impl ZoneView {
    pub fn from_zone(zone: &RiskZone) -> Self {
        let projection = project(zone);
        Self {
            id: zone.id.clone(),
            location: zone.location.clone(),
            level: zone.risk_level.as_str(),
            color: projection.color,
            badge_class: risk_badge_class(projection.bucket),
            description: zone.description.clone(),
            mapped: zone.latitude.is_some() && zone.longitude.is_some(),
            relative_display: format_relative_time(zone.timestamp),
        }
    }
}

// ── Supply chain ────────────────────────────────────────────────

pub struct NodeView {
    pub id: String,
    pub name: String,
    pub location_type: &'static str,
    pub icon: &'static str,
    pub status: String,
    pub color: &'static str,
    pub badge_class: &'static str,
    pub coordinates_display: String,
    pub utilization_display: Option<String>,
}

impl NodeView {
    pub fn from_node(node: &SupplyChainNode) -> Self {
        let bucket = node_status_bucket(&node.status);
        let utilization_display = match (node.inventory_level, node.capacity) {
            (Some(level), Some(capacity)) if capacity > 0.0 => {
                Some(format!("{:.0}%", level / capacity * 100.0))
            }
            _ => None,
        };
        Self {
            id: node.id.clone(),
            name: node.name.clone(),
            location_type: node.location_type.as_str(),
            icon: node.location_type.category().icon(),
            status: node.status.clone(),
            color: bucket.color(),
            badge_class: risk_badge_class(bucket),
            coordinates_display: format!("{:.4}, {:.4}", node.latitude, node.longitude),
            utilization_display,
        }
    }
}

pub struct RouteView {
    pub id: String,
    pub origin: String,
    pub destination: String,
    pub transport_mode: String,
    pub status: String,
    pub level: &'static str,
    pub color: &'static str,
    pub badge_class: &'static str,
}

impl RouteView {
    /// Endpoint names are resolved against `nodes`; unknown ids are shown as is.
    pub fn from_route(route: &SupplyChainRoute, nodes: &[SupplyChainNode]) -> Self {
        let name = |id: &str| {
            nodes
                .iter()
                .find(|n| n.id == id)
                .map(|n| n.name.clone())
                .unwrap_or_else(|| id.to_string())
        };
        let projection = project(route);
        Self {
            id: route.id.clone(),
            origin: name(&route.origin_node_id),
            destination: name(&route.destination_node_id),
            transport_mode: route.transport_mode.clone(),
            status: route.status.clone(),
            level: route.risk_level.as_str(),
            color: projection.color,
            badge_class: risk_badge_class(projection.bucket),
        }
    }
}

// ── Toasts ──────────────────────────────────────────────────────

pub struct ToastView {
    pub title: String,
    pub message: String,
    pub border_class: &'static str,
    pub relative_display: String,
}

impl ToastView {
    pub fn from_toast(toast: &Toast) -> Self {
        Self {
            title: toast.title.clone(),
            message: toast.message.clone(),
            border_class: match toast.level {
                ToastLevel::Success => "border-emerald-500",
                ToastLevel::Info => "border-sky-500",
                ToastLevel::Warning => "border-amber-500",
                ToastLevel::Error => "border-rose-500",
            },
            relative_display: format_relative_time(toast.at),
        }
    }
}

// ── Helpers ─────────────────────────────────────────────────────

pub fn risk_badge_class(bucket: RiskBucket) -> &'static str {
    match bucket {
        RiskBucket::Low => "bg-emerald-500/15 text-emerald-400",
        RiskBucket::Medium => "bg-amber-500/15 text-amber-400",
        RiskBucket::High => "bg-rose-500/15 text-rose-400",
    }
}

fn format_value(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{value:.0}")
    } else {
        format!("{value:.2}")
    }
}

pub fn format_relative_time(at: DateTime<Utc>) -> String {
    let delta = (Utc::now() - at).num_seconds();
    if delta < 0 {
        return "just now".to_string();
    }
    if delta < 60 {
        format!("{delta}s ago")
    } else if delta < 3600 {
        format!("{}m ago", delta / 60)
    } else if delta < 86400 {
        format!("{}h ago", delta / 3600)
    } else {
        format!("{}d ago", delta / 86400)
    }
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}
