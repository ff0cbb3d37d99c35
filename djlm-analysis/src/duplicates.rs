//! Duplicate clustering
//!
//! Greedy single-pass clustering over the catalog: each unassigned track
//! anchors a group and pulls in every later unassigned track whose weighted
//! similarity to it exceeds the threshold.

use chrono::Utc;
use djlm_common::events::{EngineEvent, EventBus};
use djlm_common::models::{DuplicateGroup, DuplicateMember, Track};
use std::sync::Arc;

use crate::db::Catalog;
use crate::error::EngineResult;

const TITLE_WEIGHT: f64 = 0.4;
const ARTIST_WEIGHT: f64 = 0.3;
const DURATION_WEIGHT: f64 = 0.2;
const SIZE_WEIGHT: f64 = 0.1;

/// Durations this close count as identical
const DURATION_MATCH_MS: f64 = 5000.0;
/// Duration difference at which closeness reaches zero
const DURATION_ZERO_MS: f64 = 30000.0;
/// Size difference (fraction of the pair's average) that counts as identical
const SIZE_MATCH_RATIO: f64 = 0.1;
/// Size difference at which closeness reaches zero
const SIZE_ZERO_RATIO: f64 = 1.0;

/// Title similarity every member needs for the "Similar titles" reason
const SIMILAR_TITLE_THRESHOLD: f64 = 0.8;

/// Normalized Levenshtein similarity of two strings
///
/// Case-insensitive and whitespace-trimmed. Identical strings score 1.0; an
/// empty string against a non-empty one scores 0.
pub fn string_similarity(a: &str, b: &str) -> f64 {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();

    if a == b {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let max_len = a.chars().count().max(b.chars().count());
    1.0 - strsim::levenshtein(&a, &b) as f64 / max_len as f64
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn duration_closeness(a_ms: u64, b_ms: u64) -> f64 {
    let diff = a_ms.abs_diff(b_ms) as f64;
    if diff <= DURATION_MATCH_MS {
        1.0
    } else {
        (1.0 - (diff - DURATION_MATCH_MS) / (DURATION_ZERO_MS - DURATION_MATCH_MS)).max(0.0)
    }
}

fn size_closeness(a: u64, b: u64) -> f64 {
    let average = (a as f64 + b as f64) / 2.0;
    let ratio = a.abs_diff(b) as f64 / average;
    if ratio <= SIZE_MATCH_RATIO {
        1.0
    } else {
        (1.0 - (ratio - SIZE_MATCH_RATIO) / (SIZE_ZERO_RATIO - SIZE_MATCH_RATIO)).max(0.0)
    }
}

/// Weighted similarity of two tracks in `[0, 1]`
///
/// Only factors populated on both tracks contribute, and the sum is
/// normalized by the weights actually used. No usable factor scores 0.
pub fn track_similarity(a: &Track, b: &Track) -> f64 {
    let mut score = 0.0;
    let mut weight = 0.0;

    if let (Some(ta), Some(tb)) = (non_empty(&a.title), non_empty(&b.title)) {
        score += TITLE_WEIGHT * string_similarity(ta, tb);
        weight += TITLE_WEIGHT;
    }

    if let (Some(aa), Some(ab)) = (non_empty(&a.artist), non_empty(&b.artist)) {
        score += ARTIST_WEIGHT * string_similarity(aa, ab);
        weight += ARTIST_WEIGHT;
    }

    if a.duration_ms > 0 && b.duration_ms > 0 {
        score += DURATION_WEIGHT * duration_closeness(a.duration_ms, b.duration_ms);
        weight += DURATION_WEIGHT;
    }

    if let (Some(sa), Some(sb)) = (a.size_bytes.filter(|s| *s > 0), b.size_bytes.filter(|s| *s > 0)) {
        score += SIZE_WEIGHT * size_closeness(sa, sb);
        weight += SIZE_WEIGHT;
    }

    if weight > 0.0 {
        score / weight
    } else {
        0.0
    }
}

/// Human-readable explanation for a group (anchor first in `members`)
fn group_reason(members: &[&Track]) -> String {
    let mut reasons = Vec::new();
    let Some(anchor) = members.first() else {
        return "Similar tracks detected".to_string();
    };

    if !anchor.hash.is_empty() && members.iter().all(|t| t.hash == anchor.hash) {
        reasons.push("Identical file hash".to_string());
    }

    if let Some(anchor_title) = non_empty(&anchor.title) {
        let similar = members[1..].iter().all(|t| {
            non_empty(&t.title)
                .map(|title| string_similarity(anchor_title, title) > SIMILAR_TITLE_THRESHOLD)
                .unwrap_or(false)
        });
        if similar {
            reasons.push("Similar titles".to_string());
        }
    }

    if let Some(anchor_artist) = non_empty(&anchor.artist) {
        if members
            .iter()
            .all(|t| non_empty(&t.artist) == Some(anchor_artist))
        {
            reasons.push("Same artist".to_string());
        }
    }

    let mut formats: Vec<String> = Vec::new();
    for ext in members.iter().filter_map(|t| t.extension()) {
        if !formats.contains(&ext) {
            formats.push(ext);
        }
    }
    if formats.len() > 1 {
        reasons.push(format!("Different formats ({})", formats.join(", ")));
    }

    if reasons.is_empty() {
        "Similar tracks detected".to_string()
    } else {
        reasons.join(", ")
    }
}

fn member(track: &Track, similarity: f64) -> DuplicateMember {
    DuplicateMember {
        id: track.id,
        title: track.title.clone(),
        artist: track.artist.clone(),
        path: track.path.clone(),
        similarity,
    }
}

/// Partition `tracks` (catalog order) into groups of probable duplicates
///
/// A track joins at most one group. Groups hold at least two tracks; the
/// anchor comes first with similarity 1.0, the rest by similarity descending.
pub fn cluster_tracks(tracks: &[Track], threshold: f64) -> Vec<DuplicateGroup> {
    let mut assigned = vec![false; tracks.len()];
    let mut groups = Vec::new();

    for (i, anchor) in tracks.iter().enumerate() {
        if assigned[i] {
            continue;
        }

        let mut matches: Vec<(usize, f64)> = Vec::new();
        for (j, candidate) in tracks.iter().enumerate().skip(i + 1) {
            if assigned[j] {
                continue;
            }
            let score = track_similarity(anchor, candidate);
            if score > threshold {
                assigned[j] = true;
                matches.push((j, score));
            }
        }

        if matches.is_empty() {
            continue;
        }
        assigned[i] = true;

        // Stable sort keeps catalog order among equal scores
        matches.sort_by(|a, b| b.1.total_cmp(&a.1));

        let mut members = vec![anchor];
        members.extend(matches.iter().map(|(j, _)| &tracks[*j]));
        let reason = group_reason(&members);

        let mut group_tracks = vec![member(anchor, 1.0)];
        group_tracks.extend(matches.iter().map(|(j, score)| member(&tracks[*j], *score)));

        tracing::debug!(
            anchor = %anchor.id,
            size = group_tracks.len(),
            reason = %reason,
            "Duplicate group formed"
        );

        groups.push(DuplicateGroup {
            tracks: group_tracks,
            reason,
        });
    }

    groups
}

pub struct DuplicateClusteringEngine {
    catalog: Arc<dyn Catalog>,
    events: EventBus,
    threshold: f64,
}

impl DuplicateClusteringEngine {
    pub fn new(catalog: Arc<dyn Catalog>, events: EventBus, threshold: f64) -> Self {
        Self {
            catalog,
            events,
            threshold,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Cluster the whole catalog
    pub async fn find_duplicates(&self) -> EngineResult<Vec<DuplicateGroup>> {
        let tracks = match self.catalog.all_tracks().await {
            Ok(tracks) => tracks,
            Err(e) => {
                tracing::error!(error = %e, "Duplicate scan failed");
                self.events.emit_lossy(EngineEvent::DuplicateScanFailed {
                    error: e.to_string(),
                    timestamp: Utc::now(),
                });
                return Err(e.into());
            }
        };

        self.events.emit_lossy(EngineEvent::DuplicateScanStarted {
            track_count: tracks.len(),
            timestamp: Utc::now(),
        });
        tracing::info!(track_count = tracks.len(), threshold = self.threshold, "Duplicate scan started");

        let groups = cluster_tracks(&tracks, self.threshold);

        self.events.emit_lossy(EngineEvent::DuplicateScanCompleted {
            group_count: groups.len(),
            timestamp: Utc::now(),
        });
        tracing::info!(group_count = groups.len(), "Duplicate scan completed");

        Ok(groups)
    }
}
