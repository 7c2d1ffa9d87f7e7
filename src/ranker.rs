use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

use crate::features::FeatureVector;
use crate::predictor::{ConfidencePolicy, PredictionResult};
use crate::sampler::EventContext;
use crate::types::{ActionKind, RaceStateSnapshot, StrategyAction};

/// Expected value of attempting an action: `p * gain - (1 - p) * loss`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringPolicy {
    pub gain_if_success: f64,
    pub loss_if_fail: f64,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            gain_if_success: 1.0,
            loss_if_fail: 1.0,
        }
    }
}

impl ScoringPolicy {
    pub fn score(&self, probability: f64) -> f64 {
        probability * self.gain_if_success - (1.0 - probability) * self.loss_if_fail
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    pub score: f64,
    pub probability: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedEntry {
    pub rank: usize,
    pub prediction: PredictionResult,
    pub score: f64,
    /// top - this entry
    pub vs_top: Delta,
    /// this entry - stay-out baseline
    pub vs_baseline: Delta,
    pub is_baseline: bool,
}

impl RankedEntry {
    pub fn action(&self) -> &StrategyAction {
        &self.prediction.action
    }
}

/// Change from pitting one lap later with the same compound and weather branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LapShift {
    pub from: StrategyAction,
    pub to: StrategyAction,
    /// `to - from`
    pub delta: Delta,
}

/// A scenario that was dropped from the ranking, and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioWarning {
    pub action: StrategyAction,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedRecommendation {
    pub entries: Vec<RankedEntry>,
    pub lap_shifts: Vec<LapShift>,
    pub warnings: Vec<ScenarioWarning>,
    /// Feature importances reported by the model for each maneuver family.
    pub factors: BTreeMap<String, BTreeMap<String, f64>>,
}

impl RankedRecommendation {
    pub fn top(&self) -> Option<&RankedEntry> {
        self.entries.first()
    }

    pub fn baseline(&self) -> Option<&RankedEntry> {
        self.entries.iter().find(|e| e.is_baseline)
    }

    pub fn find(&self, action: &StrategyAction) -> Option<&RankedEntry> {
        self.entries.iter().find(|e| e.action() == action)
    }

    /// Every ranked action except the synthesized baseline.
    pub fn candidates(&self) -> impl Iterator<Item = &RankedEntry> {
        self.entries.iter().filter(|e| !e.is_baseline)
    }
}

/// The no-op reference point: stay out, with a fixed neutral probability.
pub fn baseline(snapshot: &RaceStateSnapshot, neutral: f64, policy: ConfidencePolicy) -> PredictionResult {
    PredictionResult {
        action: StrategyAction::stay_out(snapshot),
        probability: neutral,
        confidence: policy.confidence(neutral),
        features: FeatureVector::default(),
        context: EventContext::Baseline,
    }
}

fn offset_key(a: &StrategyAction) -> (bool, u32) {
    // stay-out (no stop) sorts after every stop
    (a.pit_offset.is_none(), a.pit_offset.unwrap_or(0))
}

/// Score desc, confidence desc, pit offset asc, label asc.
fn compare(a: &(PredictionResult, f64), b: &(PredictionResult, f64)) -> Ordering {
    b.1.total_cmp(&a.1)
        .then_with(|| b.0.confidence.total_cmp(&a.0.confidence))
        .then_with(|| offset_key(&a.0.action).cmp(&offset_key(&b.0.action)))
        .then_with(|| a.0.action.label().cmp(&b.0.action.label()))
}

fn lap_shifts(entries: &[RankedEntry]) -> Vec<LapShift> {
    let mut out = Vec::new();
    for e in entries {
        let a = e.action();
        let Some(o) = a.pit_offset else { continue };
        if a.kind.is_overcut() || a.kind == ActionKind::StayOut {
            continue;
        }
        let Some(later_kind) = ActionKind::from_offset(o + 1) else { continue };
        let later = entries.iter().find(|l| {
            let la = l.action();
            la.kind == later_kind && la.compound == a.compound && la.weather == a.weather
        });
        if let Some(l) = later {
            out.push(LapShift {
                from: *a,
                to: *l.action(),
                delta: Delta {
                    score: l.score - e.score,
                    probability: l.prediction.probability - e.prediction.probability,
                },
            });
        }
    }
    out
}

/// Orders the scored actions plus the stay-out baseline into a total order.
///
/// The result depends only on the set of inputs, never on their order.
/// Any stay-out in `predictions` is replaced by `baseline`; repeated
/// labels keep the first occurrence after sorting.
pub fn rank(
    predictions: Vec<PredictionResult>,
    baseline: PredictionResult,
    policy: ScoringPolicy,
) -> RankedRecommendation {
    let mut scored: Vec<(PredictionResult, f64)> = predictions
        .into_iter()
        .filter(|p| p.action.kind != ActionKind::StayOut)
        .chain(std::iter::once(baseline))
        .map(|p| {
            let s = policy.score(p.probability);
            (p, s)
        })
        .collect();
    scored.sort_by(compare);

    let mut seen = HashSet::new();
    scored.retain(|(p, _)| seen.insert(p.action.label()));

    let (top_score, top_prob) = scored
        .first()
        .map(|(p, s)| (*s, p.probability))
        .unwrap_or_default();
    let (base_score, base_prob) = scored
        .iter()
        .find(|(p, _)| p.action.kind == ActionKind::StayOut)
        .map(|(p, s)| (*s, p.probability))
        .unwrap_or_default();

    let entries: Vec<RankedEntry> = scored
        .into_iter()
        .enumerate()
        .map(|(i, (p, s))| RankedEntry {
            rank: i + 1,
            vs_top: Delta {
                score: top_score - s,
                probability: top_prob - p.probability,
            },
            vs_baseline: Delta {
                score: s - base_score,
                probability: p.probability - base_prob,
            },
            is_baseline: p.action.kind == ActionKind::StayOut,
            score: s,
            prediction: p,
        })
        .collect();

    let lap_shifts = lap_shifts(&entries);
    RankedRecommendation {
        entries,
        lap_shifts,
        warnings: Vec::new(),
        factors: BTreeMap::new(),
    }
}
