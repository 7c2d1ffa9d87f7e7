use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{EngineError, EngineResult};

/// Upper bound on any lap count the engine accepts (race length, lap
/// numbers, rival window). Far above any real race distance.
pub const MAX_RACE_LAPS: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compound {
    Soft,
    Medium,
    Hard,
    Intermediate,
    Wet,
}

impl Compound {
    pub const ALL: [Compound; 5] = [
        Compound::Soft,
        Compound::Medium,
        Compound::Hard,
        Compound::Intermediate,
        Compound::Wet,
    ];

    /// Base pace offset (s/lap) relative to a fresh soft on a dry track.
    pub fn base_pace(self) -> f64 {
        match self {
            Compound::Soft => 0.0,
            Compound::Medium => 0.5,
            Compound::Hard => 1.0,
            Compound::Intermediate => 3.0,
            Compound::Wet => 6.0,
        }
    }

    pub fn is_slick(self) -> bool {
        matches!(self, Compound::Soft | Compound::Medium | Compound::Hard)
    }

    /// Extra lap time from running this compound on the given surface.
    pub fn weather_penalty(self, condition: TrackCondition) -> f64 {
        match (condition, self) {
            (TrackCondition::Dry, c) if !c.is_slick() => 4.0,
            (TrackCondition::Dry, _) => 0.0,
            (TrackCondition::Mixed, Compound::Intermediate) => 1.0,
            (TrackCondition::Mixed, Compound::Wet) => 2.0,
            (TrackCondition::Mixed, _) => 3.0,
            (TrackCondition::Wet, c) if c.is_slick() => 5.0,
            (TrackCondition::Wet, _) => 0.0,
        }
    }

    pub fn allowed_in(self, condition: TrackCondition) -> bool {
        match condition {
            TrackCondition::Dry => self.is_slick(),
            TrackCondition::Mixed => true,
            TrackCondition::Wet => !self.is_slick(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Compound::Soft => "soft",
            Compound::Medium => "medium",
            Compound::Hard => "hard",
            Compound::Intermediate => "intermediate",
            Compound::Wet => "wet",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackCondition {
    Dry,
    Mixed,
    Wet,
}

impl TrackCondition {
    pub fn as_str(self) -> &'static str {
        match self {
            TrackCondition::Dry => "dry",
            TrackCondition::Mixed => "mixed",
            TrackCondition::Wet => "wet",
        }
    }
}

/// Inclusive lap range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LapWindow {
    pub start: u32,
    pub end: u32,
}

impl LapWindow {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> u32 {
        if self.end < self.start {
            0
        } else {
            (self.end - self.start).saturating_add(1)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of laps shared with `other`.
    pub fn overlap(&self, other: &LapWindow) -> u32 {
        let lo = self.start.max(other.start);
        let hi = self.end.min(other.end);
        if hi < lo {
            0
        } else {
            (hi - lo).saturating_add(1)
        }
    }
}

/// Race state at the moment of the decision. Never mutated by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceStateSnapshot {
    pub current_lap: u32,
    pub total_laps: u32,
    /// Seconds to the car ahead.
    pub gap_ahead: f64,
    /// Seconds to the car behind.
    pub gap_behind: f64,
    pub compound: Compound,
    pub tire_age: u32,
    /// Expected pace loss (s) of the current set by tire age: entry k is
    /// the loss at k laps old. Must reach `tire_age + lookahead`.
    pub degradation_curve: Vec<f64>,
    pub rival_pit_window: LapWindow,
    pub condition: TrackCondition,
    #[serde(default)]
    pub forecast_condition: Option<TrackCondition>,
    /// Probability of at least one safety car in the remaining race.
    pub safety_car_probability: f64,
}

impl RaceStateSnapshot {
    pub fn laps_remaining(&self) -> u32 {
        self.total_laps.saturating_sub(self.current_lap)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.total_laps > MAX_RACE_LAPS {
            return Err(EngineError::InvalidSnapshot(format!(
                "total_laps {} exceeds {}",
                self.total_laps, MAX_RACE_LAPS
            )));
        }
        if self.tire_age > MAX_RACE_LAPS {
            return Err(EngineError::InvalidSnapshot(format!(
                "tire_age {} exceeds {}",
                self.tire_age, MAX_RACE_LAPS
            )));
        }
        if self.rival_pit_window.end > MAX_RACE_LAPS {
            return Err(EngineError::InvalidSnapshot(format!(
                "rival pit window end {} exceeds {}",
                self.rival_pit_window.end, MAX_RACE_LAPS
            )));
        }
        if self.current_lap > self.total_laps || self.laps_remaining() == 0 {
            return Err(EngineError::InvalidSnapshot(format!(
                "no laps remaining (lap {} of {})",
                self.current_lap, self.total_laps
            )));
        }
        for (name, v) in [("gap_ahead", self.gap_ahead), ("gap_behind", self.gap_behind)] {
            if !v.is_finite() || v < 0.0 {
                return Err(EngineError::InvalidSnapshot(format!(
                    "{} must be finite and non-negative (got {})",
                    name, v
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.safety_car_probability) {
            return Err(EngineError::InvalidSnapshot(format!(
                "safety_car_probability must be in [0,1] (got {})",
                self.safety_car_probability
            )));
        }
        if let Some(i) = self.degradation_curve.iter().position(|v| !v.is_finite()) {
            return Err(EngineError::InvalidSnapshot(format!(
                "degradation_curve[{}] is not finite",
                i
            )));
        }
        if self.rival_pit_window.start > self.rival_pit_window.end {
            return Err(EngineError::InvalidSnapshot(format!(
                "rival pit window start {} is after end {}",
                self.rival_pit_window.start, self.rival_pit_window.end
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    UndercutNow,
    PitIn(u8),
    Overcut,
    StayOut,
}

impl ActionKind {
    pub fn from_offset(offset: u32) -> Option<Self> {
        match offset {
            0 => Some(ActionKind::UndercutNow),
            1..=3 => Some(ActionKind::PitIn(offset as u8)),
            _ => None,
        }
    }

    pub fn label(&self) -> String {
        match self {
            ActionKind::UndercutNow => "undercut-now".to_string(),
            ActionKind::PitIn(n) => format!("pit-in-{}", n),
            ActionKind::Overcut => "overcut".to_string(),
            ActionKind::StayOut => "stay-out".to_string(),
        }
    }

    /// Overcut is scored by its own classifier; every other pit maneuver
    /// is an attack on the car ahead.
    pub fn is_overcut(&self) -> bool {
        matches!(self, ActionKind::Overcut)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StrategyAction {
    pub kind: ActionKind,
    pub compound: Compound,
    /// Weather branch this action was generated under.
    pub weather: TrackCondition,
    /// Laps from now until the stop; `None` for stay-out.
    pub pit_offset: Option<u32>,
}

impl StrategyAction {
    pub fn pit(kind: ActionKind, compound: Compound, weather: TrackCondition, offset: u32) -> Self {
        Self {
            kind,
            compound,
            weather,
            pit_offset: Some(offset),
        }
    }

    pub fn stay_out(snapshot: &RaceStateSnapshot) -> Self {
        Self {
            kind: ActionKind::StayOut,
            compound: snapshot.compound,
            weather: snapshot.condition,
            pit_offset: None,
        }
    }

    pub fn pit_lap(&self, current_lap: u32) -> Option<u32> {
        self.pit_offset.map(|o| current_lap.saturating_add(o))
    }

    pub fn label(&self) -> String {
        format!(
            "{}/{}/{}",
            self.kind.label(),
            self.compound.as_str(),
            self.weather.as_str()
        )
    }
}

impl fmt::Display for StrategyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn dry_snapshot() -> RaceStateSnapshot {
        RaceStateSnapshot {
            current_lap: 30,
            total_laps: 50,
            gap_ahead: 1.8,
            gap_behind: 2.4,
            compound: Compound::Soft,
            tire_age: 0,
            degradation_curve: vec![1.0, 1.1, 1.25, 1.4, 1.6, 1.8, 2.0, 2.3],
            rival_pit_window: LapWindow::new(32, 34),
            condition: TrackCondition::Dry,
            forecast_condition: None,
            safety_car_probability: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::dry_snapshot;
    use super::*;

    #[test]
    fn test_window_overlap() {
        let a = LapWindow::new(30, 32);
        assert_eq!(a.overlap(&LapWindow::new(32, 34)), 1);
        assert_eq!(a.overlap(&LapWindow::new(28, 40)), 3);
        assert_eq!(a.overlap(&LapWindow::new(33, 34)), 0);
        assert_eq!(a.len(), 3);

        let full = LapWindow::new(0, u32::MAX);
        assert_eq!(full.len(), u32::MAX);
        assert_eq!(full.overlap(&full), u32::MAX);
    }

    #[test]
    fn test_zero_laps_remaining_rejected() {
        let mut s = dry_snapshot();
        s.current_lap = 50;
        assert!(matches!(s.validate(), Err(EngineError::InvalidSnapshot(_))));
    }

    #[test]
    fn test_out_of_range_fields_rejected() {
        let mut s = dry_snapshot();
        s.gap_ahead = f64::NAN;
        assert!(s.validate().is_err());

        let mut s = dry_snapshot();
        s.gap_behind = -0.1;
        assert!(s.validate().is_err());

        let mut s = dry_snapshot();
        s.safety_car_probability = 1.2;
        assert!(s.validate().is_err());

        let mut s = dry_snapshot();
        s.rival_pit_window = LapWindow::new(35, 33);
        assert!(s.validate().is_err());

        let mut s = dry_snapshot();
        s.rival_pit_window = LapWindow::new(32, u32::MAX);
        assert!(matches!(s.validate(), Err(EngineError::InvalidSnapshot(_))));

        let mut s = dry_snapshot();
        s.total_laps = 3_000_000_000;
        assert!(s.validate().is_err());

        let mut s = dry_snapshot();
        s.tire_age = u32::MAX;
        assert!(s.validate().is_err());

        assert!(dry_snapshot().validate().is_ok());
    }

    #[test]
    fn test_compound_weather_rules() {
        assert!(!Compound::Wet.allowed_in(TrackCondition::Dry));
        assert!(!Compound::Soft.allowed_in(TrackCondition::Wet));
        assert!(Compound::ALL.iter().all(|c| c.allowed_in(TrackCondition::Mixed)));
        assert_eq!(Compound::Intermediate.weather_penalty(TrackCondition::Mixed), 1.0);
    }

    #[test]
    fn test_action_labels_are_distinct() {
        let a = StrategyAction::pit(ActionKind::PitIn(2), Compound::Medium, TrackCondition::Dry, 2);
        let b = StrategyAction::pit(ActionKind::PitIn(2), Compound::Hard, TrackCondition::Dry, 2);
        assert_eq!(a.label(), "pit-in-2/medium/dry");
        assert_ne!(a.label(), b.label());
    }
}
