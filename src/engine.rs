use rayon::prelude::*;
use std::collections::BTreeMap;

use crate::config::{EngineConfig, SimulationMode};
use crate::error::{EngineError, EngineResult};
use crate::features::{self, FeatureVector};
use crate::model::ModelBundle;
use crate::predictor::{
    ConfidencePolicy, DirectPrediction, Maneuver, OutcomePredictor, PredictionResult, Scorer,
};
use crate::ranker::{self, RankedRecommendation, ScenarioWarning, ScoringPolicy};
use crate::sampler::{self, EventContext};
use crate::scenario;
use crate::types::{ActionKind, RaceStateSnapshot, StrategyAction};

/// Pit-strategy decision function over a race-state snapshot.
///
/// Holds the only long-lived state, the loaded model. `evaluate` is
/// re-entrant and may be called from any number of threads.
#[derive(Default)]
pub struct Engine {
    predictor: OutcomePredictor,
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(bundle: ModelBundle) -> EngineResult<Self> {
        Ok(Self {
            predictor: OutcomePredictor::with_bundle(bundle)?,
        })
    }

    pub fn reload_model(&self, bundle: ModelBundle) -> EngineResult<()> {
        self.predictor.install(bundle)
    }

    pub fn unload_model(&self) {
        self.predictor.unload()
    }

    pub fn model_loaded(&self) -> bool {
        self.predictor.is_loaded()
    }

    /// Scores a caller-built feature vector against one classifier.
    pub fn predict(
        &self,
        maneuver: Maneuver,
        fv: &FeatureVector,
        policy: ConfidencePolicy,
    ) -> EngineResult<DirectPrediction> {
        policy.validate()?;
        let out = self.predictor.scorer(policy)?.direct(maneuver, fv)?;
        tracing::debug!("direct {:?} p={:.3} tier={:?}", maneuver, out.probability, out.tier);
        Ok(out)
    }

    pub fn evaluate(
        &self,
        snapshot: &RaceStateSnapshot,
        cfg: &EngineConfig,
    ) -> EngineResult<RankedRecommendation> {
        cfg.validate()?;
        snapshot.validate()?;
        let scorer = self.predictor.scorer(cfg.confidence)?;
        let actions = scenario::generate(snapshot, cfg)?;

        let outcomes: Vec<(StrategyAction, EngineResult<PredictionResult>)> = actions
            .par_iter()
            .map(|a| (*a, evaluate_action(snapshot, a, &scorer, cfg)))
            .collect();

        let mut predictions = Vec::with_capacity(outcomes.len());
        let mut warnings = Vec::new();
        let mut first_err = None;
        for (action, outcome) in outcomes {
            match outcome {
                Ok(p) => predictions.push(p),
                Err(e @ EngineError::FeatureComputation { .. }) => {
                    tracing::warn!("excluding {}: {}", action, e);
                    warnings.push(ScenarioWarning {
                        action,
                        code: e.code().to_string(),
                        message: e.to_string(),
                    });
                    first_err.get_or_insert(e);
                }
                Err(e) => return Err(e),
            }
        }
        if predictions.is_empty() {
            if let Some(e) = first_err {
                return Err(e);
            }
        }

        let policy = ScoringPolicy {
            gain_if_success: cfg.gain_if_success,
            loss_if_fail: cfg.loss_if_fail,
        };
        let baseline = ranker::baseline(snapshot, cfg.neutral_probability, cfg.confidence);
        let mut result = ranker::rank(predictions, baseline, policy);
        result.warnings = warnings;
        result.factors = factor_table(&scorer);

        if let Some(top) = result.top() {
            tracing::info!(
                "evaluated lap {}/{} mode={:?}: {} ranked, {} excluded, top={} p={:.3} score={:.3}",
                snapshot.current_lap,
                snapshot.total_laps,
                cfg.mode,
                result.entries.len(),
                result.warnings.len(),
                top.action(),
                top.prediction.probability,
                top.score
            );
        }
        Ok(result)
    }
}

fn factor_table(scorer: &Scorer) -> BTreeMap<String, BTreeMap<String, f64>> {
    let mut t = BTreeMap::new();
    for (name, kind) in [("undercut", ActionKind::UndercutNow), ("overcut", ActionKind::Overcut)] {
        let f = scorer.factors(kind);
        if !f.is_empty() {
            t.insert(name.to_string(), f.clone());
        }
    }
    t
}

fn evaluate_action(
    snapshot: &RaceStateSnapshot,
    action: &StrategyAction,
    scorer: &Scorer,
    cfg: &EngineConfig,
) -> EngineResult<PredictionResult> {
    let raw = features::build(snapshot, action, cfg.action_horizon_laps)?;
    let (expected, odds) = sampler::expected_features(snapshot, action, &raw, &cfg.sampler);

    let (probability, confidence, context) = match (cfg.mode, cfg.random_seed) {
        (SimulationMode::MonteCarlo, Some(seed)) => {
            let dist = sampler::monte_carlo(
                snapshot,
                action,
                &raw,
                scorer,
                &cfg.sampler,
                seed,
                cfg.monte_carlo_trials,
            )?;
            let p = dist.mean_probability.clamp(0.0, 1.0);
            (p, scorer.confidence(p), EventContext::MonteCarlo { distribution: dist })
        }
        _ => {
            let (p, c) = scorer.predict(action.kind, &expected)?;
            (p, c, EventContext::Expectation { odds })
        }
    };
    tracing::debug!("{} p={:.3} c={:.3}", action, probability, confidence);

    Ok(PredictionResult {
        action: *action,
        probability,
        confidence,
        features: expected,
        context,
    })
}
