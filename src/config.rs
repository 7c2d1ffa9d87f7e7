use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::{fs, path::Path};

use crate::error::{EngineError, EngineResult};
use crate::predictor::ConfidencePolicy;
use crate::types::{Compound, MAX_RACE_LAPS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationMode {
    #[default]
    Expectation,
    MonteCarlo,
}

/// Scale applied to tire delta and track gap inside one safety-car branch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BranchAdjustment {
    pub tire_delta_scale: f64,
    pub track_gap_scale: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Safety car before the stop: the stop itself is nearly free.
    pub sc_before_pit: BranchAdjustment,
    /// Safety car after the stop: the field bunches up behind it.
    pub sc_after_pit: BranchAdjustment,
    /// Half-width (s) of the uniform pace noise drawn per Monte Carlo trial.
    pub pace_noise: f64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            sc_before_pit: BranchAdjustment {
                tire_delta_scale: 0.5,
                track_gap_scale: 0.25,
            },
            sc_after_pit: BranchAdjustment {
                tire_delta_scale: 0.8,
                track_gap_scale: 0.5,
            },
            pace_noise: 0.3,
        }
    }
}

/// Per-evaluation options supplied by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub pit_lap_offsets: BTreeSet<u32>,
    pub allowed_compounds: BTreeSet<Compound>,
    pub gain_if_success: f64,
    pub loss_if_fail: f64,
    pub monte_carlo_trials: usize,
    pub random_seed: Option<u64>,
    pub mode: SimulationMode,
    pub include_overcut: bool,
    /// Success probability assigned to the synthesized stay-out baseline.
    pub neutral_probability: f64,
    /// Laps after the stop in which the maneuver plays out.
    pub action_horizon_laps: u32,
    pub confidence: ConfidencePolicy,
    pub sampler: SamplerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pit_lap_offsets: [0, 1, 2, 3].into_iter().collect(),
            allowed_compounds: Compound::ALL.into_iter().collect(),
            gain_if_success: 1.0,
            loss_if_fail: 1.0,
            monte_carlo_trials: 1000,
            random_seed: None,
            mode: SimulationMode::Expectation,
            include_overcut: true,
            neutral_probability: 0.5,
            action_horizon_laps: 3,
            confidence: ConfidencePolicy::default(),
            sampler: SamplerConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config at {}", path.display()))?;
        let cfg: EngineConfig =
            serde_json::from_str(&data).with_context(|| "failed to parse engine config JSON")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if let Some(bad) = self.pit_lap_offsets.iter().find(|o| **o > 3) {
            return Err(invalid(format!("pit lap offset {} is outside 0..=3", bad)));
        }
        if self.allowed_compounds.is_empty() {
            return Err(invalid("allowed_compounds is empty".into()));
        }
        for (name, v) in [
            ("gain_if_success", self.gain_if_success),
            ("loss_if_fail", self.loss_if_fail),
        ] {
            if !v.is_finite() || v < 0.0 {
                return Err(invalid(format!("{} must be finite and non-negative (got {})", name, v)));
            }
        }
        if !(0.0..=1.0).contains(&self.neutral_probability) {
            return Err(invalid(format!(
                "neutral_probability must be in [0,1] (got {})",
                self.neutral_probability
            )));
        }
        if self.action_horizon_laps == 0 || self.action_horizon_laps > MAX_RACE_LAPS {
            return Err(invalid(format!(
                "action_horizon_laps must be in 1..={} (got {})",
                MAX_RACE_LAPS, self.action_horizon_laps
            )));
        }
        if !self.sampler.pace_noise.is_finite() || self.sampler.pace_noise < 0.0 {
            return Err(invalid("sampler.pace_noise must be finite and non-negative".into()));
        }
        for adj in [self.sampler.sc_before_pit, self.sampler.sc_after_pit] {
            if !(0.0..=1.0).contains(&adj.tire_delta_scale) || !(0.0..=1.0).contains(&adj.track_gap_scale) {
                return Err(invalid("safety-car branch scales must be in [0,1]".into()));
            }
        }
        self.confidence.validate()?;
        if self.mode == SimulationMode::MonteCarlo {
            if self.monte_carlo_trials == 0 {
                return Err(invalid("monte_carlo_trials must be at least 1".into()));
            }
            if self.random_seed.is_none() {
                return Err(invalid("monte carlo mode requires an explicit random_seed".into()));
            }
        }
        Ok(())
    }
}

fn invalid(msg: String) -> EngineError {
    EngineError::InvalidConfig(msg)
}
