//! Cue point derivation
//!
//! Turns a track's tempo analysis (and energy analysis when present) into
//! intro, outro, drop, breakdown and hot cue markers. [`derive_cues`] is a
//! pure function of its inputs; [`CueDerivationEngine`] loads the inputs from
//! the catalog and stores the result according to the configured
//! [`CueWritePolicy`].
//!
//! The outro sits sixteen bars before the end. It moves back onto the latest
//! beat at or before that point only when the beat is within
//! [`OUTRO_SNAP_BARS`] of it; the tempo worker reports just the opening beats,
//! and snapping to those would drag every outro to the start of the track.

use djlm_common::config::CueWritePolicy;
use djlm_common::events::{EngineEvent, EventBus};
use djlm_common::models::{AnalysisRecord, AnalysisStatus, AnalyzerKind, CuePoint, CueType};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::Catalog;
use crate::error::{AnalysisError, EngineResult};

const DEFAULT_BPM: f64 = 120.0;
const BEATS_PER_BAR: f64 = 4.0;
const INTRO_MAX_BARS: f64 = 8.0;
const OUTRO_BARS: f64 = 16.0;
/// Largest distance, in bars, the outro moves back to meet a beat
pub const OUTRO_SNAP_BARS: f64 = 1.0;
const HOT_CUE_BARS: [u32; 4] = [16, 32, 48, 64];
const DROP_SNAP_MS: f64 = 2000.0;
const BREAK_SNAP_MS: f64 = 3000.0;
const HOT_CUE_MAX_DISTANCE_MS: f64 = 1000.0;
const DROP_LOOKBACK: usize = 5;
const BREAK_THRESHOLD: f64 = 0.3;

/// Tempo analysis inputs
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TempoFeatures {
    pub bpm: Option<f64>,
    /// Beat timestamps in seconds
    pub beat_positions: Vec<f64>,
}

impl TempoFeatures {
    /// Read a tempo payload (`tempo`, `beat_positions` or `beat_times`)
    pub fn from_payload(payload: &Value) -> Self {
        let bpm = payload
            .get("tempo")
            .or_else(|| payload.get("bpm"))
            .and_then(Value::as_f64);

        let beat_positions = payload
            .get("beat_positions")
            .or_else(|| payload.get("beat_times"))
            .map(number_array)
            .unwrap_or_default();

        Self {
            bpm,
            beat_positions,
        }
    }
}

/// Energy analysis inputs
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnergyFeatures {
    /// Amplitude samples spanning the whole track
    pub curve: Vec<f64>,
}

impl EnergyFeatures {
    /// Read `energy_curve` as a bare array or as `{ "values": [...] }`
    pub fn from_payload(payload: &Value) -> Self {
        let curve = match payload.get("energy_curve") {
            Some(Value::Array(_)) => payload.get("energy_curve").map(number_array),
            Some(Value::Object(obj)) => obj.get("values").map(number_array),
            _ => None,
        };

        Self {
            curve: curve.unwrap_or_default(),
        }
    }
}

fn number_array(value: &Value) -> Vec<f64> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_f64)
                .filter(|v| v.is_finite())
                .collect()
        })
        .unwrap_or_default()
}

/// A derived cue before it is bound to storage
#[derive(Debug, Clone, PartialEq)]
pub struct CueCandidate {
    pub cue_type: CueType,
    pub position_ms: u64,
    pub label: String,
    pub confidence: f32,
}

impl CueCandidate {
    fn new(cue_type: CueType, position_ms: u64, label: impl Into<String>, confidence: f32) -> Self {
        Self {
            cue_type,
            position_ms,
            label: label.into(),
            confidence,
        }
    }

    pub fn into_cue_point(self, track_id: Uuid) -> CuePoint {
        CuePoint::new(
            track_id,
            self.cue_type,
            self.position_ms,
            Some(self.label),
            self.confidence,
        )
    }
}

fn clamp_position(ms: f64, duration_ms: u64) -> u64 {
    if !ms.is_finite() {
        return 0;
    }
    ms.round().clamp(0.0, duration_ms as f64) as u64
}

/// Beat nearest to `target_ms` and its distance (earliest beat on ties)
fn nearest_beat(beats_ms: &[f64], target_ms: f64) -> Option<(f64, f64)> {
    beats_ms.iter().fold(None, |best, &beat| {
        let distance = (beat - target_ms).abs();
        match best {
            Some((_, best_distance)) if best_distance <= distance => best,
            _ => Some((beat, distance)),
        }
    })
}

fn snap_to_beat(beats_ms: &[f64], target_ms: f64, window_ms: f64) -> f64 {
    match nearest_beat(beats_ms, target_ms) {
        Some((beat, distance)) if distance <= window_ms => beat,
        _ => target_ms,
    }
}

/// Derive cue points for a track of `duration_ms`
///
/// Deterministic: identical inputs always yield identical candidates.
pub fn derive_cues(
    duration_ms: u64,
    tempo: &TempoFeatures,
    energy: Option<&EnergyFeatures>,
) -> Vec<CueCandidate> {
    let bpm = tempo
        .bpm
        .filter(|b| b.is_finite() && *b > 0.0)
        .unwrap_or(DEFAULT_BPM);
    let beat_ms = 60.0 / bpm * 1000.0;
    let bar_ms = BEATS_PER_BAR * beat_ms;
    let duration = duration_ms as f64;

    let beats: Vec<f64> = tempo.beat_positions.iter().map(|s| s * 1000.0).collect();
    let has_beats = !beats.is_empty();
    let curve = energy.map(|e| e.curve.as_slice()).filter(|c| !c.is_empty());

    let mut cues = Vec::new();

    // Intro: first beat past one second, capped at eight bars
    let intro = beats
        .iter()
        .copied()
        .find(|b| *b > 1000.0)
        .or_else(|| beats.first().copied())
        .unwrap_or(0.0)
        .min(INTRO_MAX_BARS * bar_ms);
    cues.push(CueCandidate::new(
        CueType::Intro,
        clamp_position(intro, duration_ms),
        "Intro",
        if has_beats { 0.9 } else { 0.5 },
    ));

    // Outro: sixteen bars before the end, pulled back onto a nearby earlier beat
    let outro_target = (duration - OUTRO_BARS * bar_ms).max(0.0);
    let outro_window = OUTRO_SNAP_BARS * bar_ms;
    let outro = beats
        .iter()
        .copied()
        .filter(|b| *b <= outro_target && outro_target - *b <= outro_window)
        .fold(None, |latest: Option<f64>, b| Some(latest.map_or(b, |l| l.max(b))))
        .unwrap_or(outro_target);
    cues.push(CueCandidate::new(
        CueType::Outro,
        clamp_position(outro, duration_ms),
        "Outro",
        if has_beats { 0.8 } else { 0.5 },
    ));

    // Drop: sharpest energy rise in the 10%-60% window
    match curve {
        Some(curve) => {
            let len = curve.len();
            let start = (len as f64 * 0.1) as usize;
            let end = (len as f64 * 0.6) as usize;

            let mut best_jump = 0.0;
            let mut best_index = None;
            for i in start.max(DROP_LOOKBACK)..end {
                let jump = curve[i] - curve[i - DROP_LOOKBACK];
                if jump > best_jump {
                    best_jump = jump;
                    best_index = Some(i);
                }
            }

            let index = best_index.unwrap_or((len as f64 * 0.25) as usize);
            let target = index as f64 / len as f64 * duration;
            let position = snap_to_beat(&beats, target, DROP_SNAP_MS);

            cues.push(CueCandidate::new(
                CueType::Drop,
                clamp_position(position, duration_ms),
                "Drop",
                if best_jump > 0.1 { 0.85 } else { 0.4 },
            ));
        }
        None => {
            cues.push(CueCandidate::new(
                CueType::Drop,
                clamp_position(duration * 0.25, duration_ms),
                "Drop",
                0.3,
            ));
        }
    }

    // Breakdown: quietest sample under the threshold in the 30%-70% window
    if let Some(curve) = curve {
        let len = curve.len();
        let start = (len as f64 * 0.3) as usize;
        let end = (len as f64 * 0.7) as usize;

        let quietest = (start..end)
            .filter(|&i| curve[i] < BREAK_THRESHOLD)
            .fold(None, |best: Option<usize>, i| match best {
                Some(b) if curve[b] <= curve[i] => Some(b),
                _ => Some(i),
            });

        if let Some(index) = quietest {
            let target = index as f64 / len as f64 * duration;
            let position = snap_to_beat(&beats, target, BREAK_SNAP_MS);
            cues.push(CueCandidate::new(
                CueType::Break,
                clamp_position(position, duration_ms),
                "Breakdown",
                0.7,
            ));
        }
    }

    // Hot cues on phrase boundaries
    if beats.len() > 10 {
        let mut accepted = 0;
        for bars in HOT_CUE_BARS {
            let target = f64::from(bars) * bar_ms;
            if let Some((beat, distance)) = nearest_beat(&beats, target) {
                if distance < HOT_CUE_MAX_DISTANCE_MS && beat < duration * 0.8 {
                    accepted += 1;
                    cues.push(CueCandidate::new(
                        CueType::Custom,
                        clamp_position(beat, duration_ms),
                        format!("Hot Cue {}", accepted),
                        0.8,
                    ));
                }
            }
        }
    }

    cues
}

/// Latest completed analysis of `kind`
fn latest_completed<'a>(records: &'a [AnalysisRecord], kind: AnalyzerKind) -> Option<&'a AnalysisRecord> {
    records
        .iter()
        .filter(|r| {
            r.analyzer == kind.as_str() && r.status == AnalysisStatus::Completed && r.result.is_some()
        })
        .max_by_key(|r| r.completed_at.unwrap_or(r.created_at))
}

pub struct CueDerivationEngine {
    catalog: Arc<dyn Catalog>,
    events: EventBus,
    write_policy: CueWritePolicy,
}

impl CueDerivationEngine {
    pub fn new(catalog: Arc<dyn Catalog>, events: EventBus, write_policy: CueWritePolicy) -> Self {
        Self {
            catalog,
            events,
            write_policy,
        }
    }

    pub fn write_policy(&self) -> CueWritePolicy {
        self.write_policy
    }

    /// Derive and store cues for one track
    ///
    /// With the append policy, calling this twice stores the cues twice.
    pub async fn generate_cues(&self, track_id: Uuid) -> EngineResult<Vec<CuePoint>> {
        let track = self
            .catalog
            .get_track(track_id)
            .await?
            .ok_or(AnalysisError::TrackNotFound(track_id))?;

        let analyses = self.catalog.analyses_for_track(track_id).await?;

        let tempo = latest_completed(&analyses, AnalyzerKind::Tempo)
            .and_then(|r| r.result.as_ref())
            .map(TempoFeatures::from_payload)
            .ok_or(AnalysisError::TempoAnalysisRequired(track_id))?;

        let energy = latest_completed(&analyses, AnalyzerKind::Energy)
            .and_then(|r| r.result.as_ref())
            .map(EnergyFeatures::from_payload);

        if energy.is_none() {
            tracing::debug!(track_id = %track_id, "No energy analysis, drop and breakdown use fallbacks");
        }

        let candidates = derive_cues(track.duration_ms, &tempo, energy.as_ref());

        let previous_cue_count = self.catalog.cues_for_track(track_id).await?.len();
        let replaced = self.write_policy == CueWritePolicy::Replace;
        if replaced {
            let removed = self.catalog.delete_cues_for_track(track_id).await?;
            tracing::debug!(track_id = %track_id, removed, "Removed previous cues");
        } else if previous_cue_count > 0 {
            tracing::info!(
                track_id = %track_id,
                previous_cue_count,
                "Appending cues to existing ones"
            );
        }

        let mut cues = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let cue = candidate.into_cue_point(track_id);
            self.catalog.insert_cue(&cue).await?;
            cues.push(cue);
        }

        self.events.emit_lossy(EngineEvent::CuesGenerated {
            track_id,
            count: cues.len(),
            previous_cue_count,
            replaced,
        });

        tracing::info!(track_id = %track_id, count = cues.len(), replaced, "Cues generated");

        Ok(cues)
    }
}
