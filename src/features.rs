//! Feature vector construction for a (snapshot, action) pair.
//!
//! The order here is the authoritative model input order; a loaded
//! artifact's `feat_list` must match `FEATURE_NAMES` exactly.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{EngineError, EngineResult};
use crate::types::{ActionKind, LapWindow, RaceStateSnapshot, StrategyAction};

pub const FEATURE_DIM: usize = 5;

pub const FEATURE_NAMES: [&str; FEATURE_DIM] = [
    "tire_delta",
    "pace_dropoff",
    "track_gap",
    "tire_deg_curve",
    "rival_pit_window",
];

/// Laps used for the degradation slope.
pub const SLOPE_LOOKAHEAD: usize = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    /// Candidate fresh-tire pace minus old-tire pace at the stop (s). Negative is better.
    pub tire_delta: f64,
    /// Pace loss the old set reaches at the stop lap (s), read at its age then.
    pub pace_dropoff: f64,
    /// Signed gap to the targeted car: + ahead (attack), - behind (defend).
    pub track_gap: f64,
    /// Mean per-lap change of the degradation curve from the current tire age.
    pub deg_slope: f64,
    /// Fraction of the maneuver's laps that fall inside the rival's window.
    pub rival_overlap: f64,
}

impl FeatureVector {
    pub fn to_array(&self) -> [f64; FEATURE_DIM] {
        [
            self.tire_delta,
            self.pace_dropoff,
            self.track_gap,
            self.deg_slope,
            self.rival_overlap,
        ]
    }

    /// Reads values laid out in `FEATURE_NAMES` order.
    pub fn from_slice(values: &[f64]) -> EngineResult<FeatureVector> {
        let v: [f64; FEATURE_DIM] = values.try_into().map_err(|_| EngineError::FeatureShapeMismatch {
            expected: FEATURE_DIM,
            got: values.len(),
        })?;
        Ok(FeatureVector {
            tire_delta: v[0],
            pace_dropoff: v[1],
            track_gap: v[2],
            deg_slope: v[3],
            rival_overlap: v[4],
        })
    }

    /// Orders a name-keyed map by `FEATURE_NAMES`. Missing or unknown names
    /// are a shape mismatch; nothing is defaulted.
    pub fn from_named(map: &HashMap<String, f64>) -> EngineResult<FeatureVector> {
        let ordered: Vec<f64> = FEATURE_NAMES
            .iter()
            .filter_map(|name| map.get(*name).copied())
            .collect();
        if ordered.len() != map.len() {
            return Err(EngineError::FeatureShapeMismatch {
                expected: FEATURE_DIM,
                got: map.len(),
            });
        }
        FeatureVector::from_slice(&ordered)
    }

    /// Convex combination of weighted vectors. Weights must sum to 1.
    pub fn blend(parts: &[(f64, FeatureVector)]) -> FeatureVector {
        let mut acc = [0.0; FEATURE_DIM];
        for (w, v) in parts {
            for (a, x) in acc.iter_mut().zip(v.to_array()) {
                *a += w * x;
            }
        }
        FeatureVector {
            tire_delta: acc[0],
            pace_dropoff: acc[1],
            track_gap: acc[2],
            deg_slope: acc[3],
            rival_overlap: acc[4],
        }
    }
}

/// Builds the un-perturbed feature vector for one action.
///
/// The degradation curve is indexed by tire age, so the old set is read at
/// `tire_age + offset` and the slope over the next `SLOPE_LOOKAHEAD` laps
/// of wear from its current age.
pub fn build(
    snapshot: &RaceStateSnapshot,
    action: &StrategyAction,
    horizon_laps: u32,
) -> EngineResult<FeatureVector> {
    let offset = action.pit_offset.unwrap_or(0) as usize;
    let age = snapshot.tire_age as usize;
    let needed = age
        .saturating_add(offset.max(SLOPE_LOOKAHEAD))
        .saturating_add(1);
    let curve = &snapshot.degradation_curve;
    if curve.len() < needed {
        return Err(EngineError::FeatureComputation {
            action: action.label(),
            needed,
            available: curve.len(),
        });
    }

    let weather = action.weather;
    let pace_dropoff = curve[age + offset];
    let old_pace = snapshot.compound.base_pace()
        + snapshot.compound.weather_penalty(weather)
        + pace_dropoff;
    let new_pace = action.compound.base_pace() + action.compound.weather_penalty(weather);
    let tire_delta = new_pace - old_pace;

    let track_gap = match action.kind {
        ActionKind::Overcut => -snapshot.gap_behind,
        ActionKind::StayOut => 0.0,
        ActionKind::UndercutNow | ActionKind::PitIn(_) => snapshot.gap_ahead,
    };

    let deg_slope = (curve[age + SLOPE_LOOKAHEAD] - curve[age]) / SLOPE_LOOKAHEAD as f64;

    let pit_lap = snapshot.current_lap.saturating_add(offset as u32);
    let span = LapWindow::new(pit_lap, pit_lap.saturating_add(horizon_laps.saturating_sub(1)));
    let rival_overlap = if span.is_empty() {
        0.0
    } else {
        span.overlap(&snapshot.rival_pit_window) as f64 / span.len() as f64
    };

    Ok(FeatureVector {
        tire_delta,
        pace_dropoff,
        track_gap,
        deg_slope,
        rival_overlap,
    })
}
