//! Digest models — the delivery-side product of a curation window

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One curated item in a digest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestItem {
    /// Information unit id this item was built from
    pub unit_id: String,
    pub title: String,
    pub summary: String,
    pub analysis: String,
    pub source_name: String,
    pub url: String,
    pub event_time: String,
    pub score: f64,
    pub reasoning: String,
    pub l3_root: String,
    pub tags: Vec<String>,
}

/// Cycle counters shown in the digest header
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DigestTotals {
    pub fetched: usize,
    pub analyzed: usize,
    pub filtered: usize,
}

/// One hot-entity trend row for the digest window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestTrend {
    pub entity_name: String,
    pub recent_count: i64,
    /// up / down / stable / new
    pub trend: String,
    pub change_pct: f64,
}

/// A curated digest for one delivery window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Digest {
    pub date: DateTime<Utc>,
    pub daily_summary: String,
    pub top_picks: Vec<DigestItem>,
    pub quick_reads: Vec<DigestItem>,
    /// Unit ids that were considered but not selected
    pub excluded: Vec<String>,
    /// Hot-entity trends for the window (filled by the driver from the
    /// entity store)
    #[serde(default)]
    pub trends: Vec<DigestTrend>,
    pub totals: DigestTotals,
}

impl Digest {
    /// All unit ids that will be marked sent when this digest is emitted.
    pub fn selected_unit_ids(&self) -> Vec<String> {
        self.top_picks
            .iter()
            .chain(self.quick_reads.iter())
            .map(|item| item.unit_id.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.top_picks.is_empty() && self.quick_reads.is_empty()
    }
}
