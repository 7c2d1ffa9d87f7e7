//! Pit-stop strategy evaluation: enumerates undercut / overcut / pit-in-N
//! options for a race snapshot, scores each through a trained success
//! classifier under safety-car uncertainty, and ranks them against a
//! stay-out baseline.

pub mod config;
pub mod engine;
pub mod error;
pub mod features;
pub mod model;
pub mod predictor;
pub mod ranker;
pub mod sampler;
pub mod scenario;
pub mod telemetry;
pub mod types;

pub use config::{EngineConfig, SamplerConfig, SimulationMode};
pub use engine::Engine;
pub use error::{EngineError, EngineResult};
pub use features::{FeatureVector, FEATURE_DIM, FEATURE_NAMES};
pub use model::{LogisticModel, ModelBundle, SuccessModel};
pub use predictor::{
    ConfidencePolicy, DirectPrediction, Maneuver, OutcomePredictor, PredictionResult, SuccessTier,
};
pub use ranker::{Delta, LapShift, RankedEntry, RankedRecommendation, ScenarioWarning, ScoringPolicy};
pub use sampler::{EventContext, OutcomeDistribution, SafetyCarOdds};
pub use types::{ActionKind, Compound, LapWindow, RaceStateSnapshot, StrategyAction, TrackCondition};
