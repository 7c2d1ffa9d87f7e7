//! Safety-car emergence model.
//!
//! The snapshot's base probability covers the whole remaining race. It is
//! spread over the remaining laps as an independent per-lap Bernoulli
//! rate, so `P(event within L laps) = 1 - (1 - p_lap)^L` and the full
//! horizon gives back the base probability.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::{BranchAdjustment, SamplerConfig};
use crate::error::EngineResult;
use crate::features::FeatureVector;
use crate::predictor::Scorer;
use crate::types::{RaceStateSnapshot, StrategyAction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyCarBranch {
    NoSafetyCar,
    BeforePit,
    AfterPit,
}

/// Branch weights for one action. They sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SafetyCarOdds {
    pub per_lap: f64,
    pub none: f64,
    pub before_pit: f64,
    pub after_pit: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchCounts {
    pub none: usize,
    pub before_pit: usize,
    pub after_pit: usize,
}

/// Empirical outcome of N Monte Carlo trials for one action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeDistribution {
    pub trials: usize,
    pub seed: u64,
    pub mean_probability: f64,
    pub std_probability: f64,
    pub p10: f64,
    pub p50: f64,
    pub p90: f64,
    /// Fraction of trials whose Bernoulli(p) success draw came up true.
    pub success_rate: f64,
    pub branches: BranchCounts,
}

/// How the prediction for an action was produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum EventContext {
    Expectation { odds: SafetyCarOdds },
    MonteCarlo { distribution: OutcomeDistribution },
    /// Synthesized stay-out reference; nothing was sampled.
    Baseline,
}

pub fn per_lap_probability(base: f64, laps_remaining: u32) -> f64 {
    if laps_remaining == 0 || base <= 0.0 {
        return 0.0;
    }
    if base >= 1.0 {
        return 1.0;
    }
    1.0 - (1.0 - base).powf(1.0 / laps_remaining as f64)
}

/// `P(event before lap L) = 1 - (1 - p_lap)^L`
pub fn emergence_probability(per_lap: f64, laps: u32) -> f64 {
    1.0 - (1.0 - per_lap).powf(laps as f64)
}

pub fn odds(snapshot: &RaceStateSnapshot, action: &StrategyAction) -> SafetyCarOdds {
    let remaining = snapshot.laps_remaining();
    let per_lap = per_lap_probability(snapshot.safety_car_probability, remaining);
    let offset = action.pit_offset.unwrap_or(remaining).min(remaining);
    let any = emergence_probability(per_lap, remaining);
    let before_pit = emergence_probability(per_lap, offset);
    let after_pit = (any - before_pit).max(0.0);
    SafetyCarOdds {
        per_lap,
        none: (1.0 - any).max(0.0),
        before_pit,
        after_pit,
    }
}

fn scale(fv: &FeatureVector, adj: BranchAdjustment) -> FeatureVector {
    FeatureVector {
        tire_delta: fv.tire_delta * adj.tire_delta_scale,
        track_gap: fv.track_gap * adj.track_gap_scale,
        ..*fv
    }
}

/// Features as seen inside one branch. Safety cars pull tire delta and gap toward zero.
pub fn adjust(fv: &FeatureVector, branch: SafetyCarBranch, cfg: &SamplerConfig) -> FeatureVector {
    match branch {
        SafetyCarBranch::NoSafetyCar => *fv,
        SafetyCarBranch::BeforePit => scale(fv, cfg.sc_before_pit),
        SafetyCarBranch::AfterPit => scale(fv, cfg.sc_after_pit),
    }
}

/// Probability-weighted blend over the three branches. Uses no randomness.
pub fn expected_features(
    snapshot: &RaceStateSnapshot,
    action: &StrategyAction,
    fv: &FeatureVector,
    cfg: &SamplerConfig,
) -> (FeatureVector, SafetyCarOdds) {
    let o = odds(snapshot, action);
    let blended = FeatureVector::blend(&[
        (o.none, adjust(fv, SafetyCarBranch::NoSafetyCar, cfg)),
        (o.before_pit, adjust(fv, SafetyCarBranch::BeforePit, cfg)),
        (o.after_pit, adjust(fv, SafetyCarBranch::AfterPit, cfg)),
    ]);
    (blended, o)
}

fn splitmix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// FNV-1a, stable across builds.
fn stable_key(label: &str) -> u64 {
    label.bytes().fold(0xcbf2_9ce4_8422_2325u64, |h, b| {
        (h ^ b as u64).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

/// Seed for one trial. Depends only on the run seed, the action and the trial index,
/// so the result is independent of scheduling and of which other actions exist.
pub fn trial_seed(seed: u64, action: &StrategyAction, trial: usize) -> u64 {
    splitmix64(splitmix64(seed ^ stable_key(&action.label())) ^ trial as u64)
}

#[derive(Debug, Clone, Copy)]
struct Trial {
    probability: f64,
    success: bool,
    branch: SafetyCarBranch,
}

fn draw_branch(rng: &mut ChaCha8Rng, per_lap: f64, offset: u32, remaining: u32) -> SafetyCarBranch {
    if per_lap <= 0.0 {
        return SafetyCarBranch::NoSafetyCar;
    }
    for lap in 1..=remaining {
        if rng.gen_bool(per_lap) {
            return if lap <= offset {
                SafetyCarBranch::BeforePit
            } else {
                SafetyCarBranch::AfterPit
            };
        }
    }
    SafetyCarBranch::NoSafetyCar
}

fn run_trial(
    snapshot: &RaceStateSnapshot,
    action: &StrategyAction,
    fv: &FeatureVector,
    scorer: &Scorer,
    cfg: &SamplerConfig,
    seed: u64,
    index: usize,
) -> EngineResult<Trial> {
    let mut rng = ChaCha8Rng::seed_from_u64(trial_seed(seed, action, index));
    let remaining = snapshot.laps_remaining();
    let per_lap = per_lap_probability(snapshot.safety_car_probability, remaining);
    let offset = action.pit_offset.unwrap_or(remaining).min(remaining);

    let branch = draw_branch(&mut rng, per_lap, offset, remaining);
    let mut perturbed = *fv;
    if cfg.pace_noise > 0.0 {
        perturbed.tire_delta += rng.gen_range(-cfg.pace_noise..=cfg.pace_noise);
    }
    let effective = adjust(&perturbed, branch, cfg);
    let probability = scorer.probability(action.kind, &effective)?;
    let success = rng.gen_bool(probability);
    Ok(Trial {
        probability,
        success,
        branch,
    })
}

fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = (q * (sorted.len() - 1) as f64).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn summarize(trials: &[Trial], seed: u64) -> OutcomeDistribution {
    let n = trials.len();
    let probs: Vec<f64> = trials.iter().map(|t| t.probability).collect();
    let mean = probs.iter().sum::<f64>() / n as f64;
    let var = probs.iter().map(|p| (p - mean) * (p - mean)).sum::<f64>() / n as f64;

    let mut sorted = probs.clone();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let mut branches = BranchCounts::default();
    for t in trials {
        match t.branch {
            SafetyCarBranch::NoSafetyCar => branches.none += 1,
            SafetyCarBranch::BeforePit => branches.before_pit += 1,
            SafetyCarBranch::AfterPit => branches.after_pit += 1,
        }
    }
    let successes = trials.iter().filter(|t| t.success).count();

    OutcomeDistribution {
        trials: n,
        seed,
        mean_probability: mean,
        std_probability: var.sqrt(),
        p10: quantile(&sorted, 0.1),
        p50: quantile(&sorted, 0.5),
        p90: quantile(&sorted, 0.9),
        success_rate: successes as f64 / n as f64,
        branches,
    }
}

/// Runs `trials` independent draws for one action and reduces them in trial order.
///
/// Each draw walks the remaining laps, so the snapshot is validated first to
/// keep that walk within `MAX_RACE_LAPS`.
pub fn monte_carlo(
    snapshot: &RaceStateSnapshot,
    action: &StrategyAction,
    fv: &FeatureVector,
    scorer: &Scorer,
    cfg: &SamplerConfig,
    seed: u64,
    trials: usize,
) -> EngineResult<OutcomeDistribution> {
    snapshot.validate()?;
    let results: Vec<Trial> = (0..trials)
        .into_par_iter()
        .map(|i| run_trial(snapshot, action, fv, scorer, cfg, seed, i))
        .collect::<EngineResult<Vec<_>>>()?;
    Ok(summarize(&results, seed))
}
