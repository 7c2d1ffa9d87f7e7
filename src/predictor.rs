use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{EngineError, EngineResult};
use crate::features::FeatureVector;
use crate::model::ModelBundle;
use crate::sampler::EventContext;
use crate::types::{ActionKind, StrategyAction};

/// Maps a success probability to a confidence score in [0,1].
///
/// Every variant is non-decreasing in |p - 0.5|.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConfidencePolicy {
    /// 2|p - 0.5|
    #[default]
    Linear,
    /// (2|p - 0.5|)^exponent
    Power { exponent: f64 },
    /// Coarse bands: 0.50 / 0.65 / 0.80 / 0.95.
    Banded,
}

impl ConfidencePolicy {
    pub fn confidence(&self, p: f64) -> f64 {
        let margin = ((p - 0.5).abs() * 2.0).clamp(0.0, 1.0);
        let c = match self {
            ConfidencePolicy::Linear => margin,
            ConfidencePolicy::Power { exponent } => margin.powf(*exponent),
            ConfidencePolicy::Banded => {
                if margin > 0.8 {
                    0.95
                } else if margin > 0.5 {
                    0.80
                } else if margin > 0.2 {
                    0.65
                } else {
                    0.50
                }
            }
        };
        c.clamp(0.0, 1.0)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if let ConfidencePolicy::Power { exponent } = self {
            if !exponent.is_finite() || *exponent <= 0.0 {
                return Err(EngineError::InvalidConfig(format!(
                    "confidence exponent must be finite and positive (got {})",
                    exponent
                )));
            }
        }
        Ok(())
    }
}

/// Score for one action under the event context that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub action: StrategyAction,
    pub probability: f64,
    pub confidence: f64,
    /// Expected effective features after the safety-car blend. Monte Carlo
    /// runs report the same blend; per-trial vectors are summarized in
    /// `context` and not kept.
    pub features: FeatureVector,
    pub context: EventContext,
}

/// The two classifiers a caller can query directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Maneuver {
    Undercut,
    Overcut,
}

impl Maneuver {
    pub fn kind(self) -> ActionKind {
        match self {
            Maneuver::Undercut => ActionKind::UndercutNow,
            Maneuver::Overcut => ActionKind::Overcut,
        }
    }
}

/// Coarse reading of a success probability: above 0.7, above 0.5, or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuccessTier {
    Unlikely,
    Moderate,
    High,
}

impl SuccessTier {
    pub fn from_probability(p: f64) -> Self {
        if p > 0.7 {
            SuccessTier::High
        } else if p > 0.5 {
            SuccessTier::Moderate
        } else {
            SuccessTier::Unlikely
        }
    }

    pub fn advice(self, maneuver: Maneuver) -> &'static str {
        match (maneuver, self) {
            (Maneuver::Undercut, SuccessTier::High) => "pit now for the undercut",
            (Maneuver::Undercut, SuccessTier::Moderate) => "consider the undercut",
            (Maneuver::Undercut, SuccessTier::Unlikely) => "stay out; undercut unlikely to work",
            (Maneuver::Overcut, SuccessTier::High) => "stay out for the overcut",
            (Maneuver::Overcut, SuccessTier::Moderate) => "consider the overcut",
            (Maneuver::Overcut, SuccessTier::Unlikely) => "pit now; overcut unlikely to work",
        }
    }
}

/// Classifier output for a caller-supplied feature vector, with no
/// scenario generation or safety-car weighting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectPrediction {
    pub maneuver: Maneuver,
    pub probability: f64,
    pub confidence: f64,
    pub tier: SuccessTier,
    pub recommended_action: String,
    pub factors: BTreeMap<String, f64>,
}

/// Holds the process-wide model behind a swappable reference.
///
/// Readers clone the inner `Arc` once and score against that; reloads
/// replace the `Arc` so an in-flight evaluation never sees a mix.
#[derive(Default)]
pub struct OutcomePredictor {
    current: RwLock<Option<Arc<ModelBundle>>>,
}

impl OutcomePredictor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bundle(bundle: ModelBundle) -> EngineResult<Self> {
        let p = Self::new();
        p.install(bundle)?;
        Ok(p)
    }

    /// Swaps in a new model. The old one is dropped once its last reader finishes.
    pub fn install(&self, bundle: ModelBundle) -> EngineResult<()> {
        bundle.check_shape()?;
        let next = Arc::new(bundle);
        *self.current.write() = Some(next);
        tracing::info!("model installed");
        Ok(())
    }

    pub fn unload(&self) {
        *self.current.write() = None;
        tracing::info!("model unloaded");
    }

    pub fn is_loaded(&self) -> bool {
        self.current.read().is_some()
    }

    /// Pins the current model for the duration of one evaluation.
    pub fn scorer(&self, policy: ConfidencePolicy) -> EngineResult<Scorer> {
        let bundle = self
            .current
            .read()
            .clone()
            .ok_or(EngineError::ModelUnavailable)?;
        bundle.check_shape()?;
        Ok(Scorer { bundle, policy })
    }
}

/// A pinned model snapshot plus the confidence policy for one evaluation.
#[derive(Clone)]
pub struct Scorer {
    bundle: Arc<ModelBundle>,
    policy: ConfidencePolicy,
}

impl Scorer {
    pub fn probability(&self, kind: ActionKind, fv: &FeatureVector) -> EngineResult<f64> {
        let model = if kind.is_overcut() {
            &self.bundle.overcut
        } else {
            &self.bundle.undercut
        };
        let p = model.predict_proba(&fv.to_array())?;
        if !p.is_finite() {
            return Err(EngineError::Model(format!("non-finite probability {}", p)));
        }
        Ok(p.clamp(0.0, 1.0))
    }

    pub fn confidence(&self, p: f64) -> f64 {
        self.policy.confidence(p)
    }

    /// Returns (probability, confidence).
    pub fn predict(&self, kind: ActionKind, fv: &FeatureVector) -> EngineResult<(f64, f64)> {
        let p = self.probability(kind, fv)?;
        Ok((p, self.confidence(p)))
    }

    pub fn direct(&self, maneuver: Maneuver, fv: &FeatureVector) -> EngineResult<DirectPrediction> {
        let (probability, confidence) = self.predict(maneuver.kind(), fv)?;
        let tier = SuccessTier::from_probability(probability);
        Ok(DirectPrediction {
            maneuver,
            probability,
            confidence,
            tier,
            recommended_action: tier.advice(maneuver).to_string(),
            factors: self.factors(maneuver.kind()).clone(),
        })
    }

    pub fn factors(&self, kind: ActionKind) -> &BTreeMap<String, f64> {
        if kind.is_overcut() {
            &self.bundle.overcut_factors
        } else {
            &self.bundle.undercut_factors
        }
    }
}
