use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::types::{Compound, LapWindow, RaceStateSnapshot, TrackCondition};

/// One lap of telemetry for the car being advised, as sent by the feed.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelemetryPacket {
    pub driver: String,
    pub lap: i32,
    // fields we use to build the snapshot:
    pub compound: Option<String>,        // e.g., "C1".."C5","I","W" or "soft"
    pub tyre_laps: Option<i32>,          // age in laps
    pub gap_front: Option<f32>,          // to car ahead (s)
    pub gap_behind: Option<f32>,         // to car behind (s)
    pub track_status_code: Option<i32>,  // 1=green; 4=safety car; 6/7=VSC
    pub pit_window_lap: Option<i32>,     // rival's nominal pit lap
    pub rainfall: Option<bool>,
}

/// Race-level context the per-lap feed does not carry.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RaceContext {
    pub total_laps: u32,
    /// Expected pace loss for the current set, by tire age in laps.
    pub degradation_curve: Vec<f64>,
    /// Laps either side of `pit_window_lap` the rival may stop.
    #[serde(default = "default_window_spread")]
    pub pit_window_spread: u32,
    pub safety_car_probability: f64,
    #[serde(default)]
    pub forecast_condition: Option<TrackCondition>,
}

fn default_window_spread() -> u32 {
    1
}

/// Maps feed compound codes to compounds. C1 is the hardest Pirelli slick.
pub fn parse_compound(code: &str) -> Option<Compound> {
    match code.trim().to_ascii_uppercase().as_str() {
        "C0" | "C1" | "C2" | "HARD" | "H" => Some(Compound::Hard),
        "C3" | "MEDIUM" | "M" => Some(Compound::Medium),
        "C4" | "C5" | "C6" | "SOFT" | "S" => Some(Compound::Soft),
        "I" | "INTER" | "INTERMEDIATE" => Some(Compound::Intermediate),
        "W" | "WET" => Some(Compound::Wet),
        _ => None,
    }
}

fn required<T>(v: Option<T>, field: &str, driver: &str) -> EngineResult<T> {
    v.ok_or_else(|| EngineError::InvalidSnapshot(format!("telemetry for {} is missing {}", driver, field)))
}

fn non_negative(v: i32, field: &str) -> EngineResult<u32> {
    u32::try_from(v).map_err(|_| EngineError::InvalidSnapshot(format!("{} is negative ({})", field, v)))
}

impl TelemetryPacket {
    /// Builds a snapshot. Missing fields are errors, never defaulted.
    pub fn to_snapshot(&self, ctx: &RaceContext) -> EngineResult<RaceStateSnapshot> {
        let d = &self.driver;
        let code = required(self.compound.as_deref(), "compound", d)?;
        let compound = parse_compound(code)
            .ok_or_else(|| EngineError::InvalidSnapshot(format!("unknown compound code {:?}", code)))?;
        let tire_age = non_negative(required(self.tyre_laps, "tyre_laps", d)?, "tyre_laps")?;
        let gap_ahead = required(self.gap_front, "gap_front", d)? as f64;
        let gap_behind = required(self.gap_behind, "gap_behind", d)? as f64;
        let rival_lap = non_negative(required(self.pit_window_lap, "pit_window_lap", d)?, "pit_window_lap")?;
        let current_lap = non_negative(self.lap, "lap")?;

        let condition = match self.rainfall {
            Some(true) if compound == Compound::Wet => TrackCondition::Wet,
            Some(true) => TrackCondition::Mixed,
            _ => TrackCondition::Dry,
        };

        // a safety car already on track makes the near-term event certain
        let safety_car_probability = match self.track_status_code {
            Some(4) | Some(6) | Some(7) => 1.0,
            _ => ctx.safety_car_probability,
        };

        let snapshot = RaceStateSnapshot {
            current_lap,
            total_laps: ctx.total_laps,
            gap_ahead,
            gap_behind,
            compound,
            tire_age,
            degradation_curve: ctx.degradation_curve.clone(),
            rival_pit_window: LapWindow::new(
                rival_lap.saturating_sub(ctx.pit_window_spread),
                rival_lap + ctx.pit_window_spread,
            ),
            condition,
            forecast_condition: ctx.forecast_condition,
            safety_car_probability,
        };
        snapshot.validate()?;
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet() -> TelemetryPacket {
        serde_json::from_str(
            r#"{"driver":"NOR","lap":30,"compound":"C4","tyre_laps":18,
                "gap_front":1.8,"gap_behind":2.4,"track_status_code":1,
                "pit_window_lap":33,"rainfall":false}"#,
        )
        .unwrap()
    }

    fn ctx() -> RaceContext {
        RaceContext {
            total_laps: 50,
            degradation_curve: (0..26).map(|age| 0.05 * age as f64).collect(),
            pit_window_spread: 1,
            safety_car_probability: 0.2,
            forecast_condition: None,
        }
    }

    #[test]
    fn test_packet_to_snapshot() {
        let s = packet().to_snapshot(&ctx()).unwrap();
        assert_eq!(s.compound, Compound::Soft);
        assert_eq!(s.rival_pit_window, LapWindow::new(32, 34));
        assert_eq!(s.laps_remaining(), 20);
        assert_eq!(s.condition, TrackCondition::Dry);
        assert!((s.gap_ahead - 1.8).abs() < 1e-6);
        assert_eq!(s.safety_car_probability, 0.2);
    }

    #[test]
    fn test_missing_field_is_not_defaulted() {
        let mut p = packet();
        p.gap_behind = None;
        let err = p.to_snapshot(&ctx()).unwrap_err();
        assert_eq!(
            err,
            EngineError::InvalidSnapshot("telemetry for NOR is missing gap_behind".into())
        );
    }

    #[test]
    fn test_safety_car_status_forces_event() {
        let mut p = packet();
        p.track_status_code = Some(4);
        assert_eq!(p.to_snapshot(&ctx()).unwrap().safety_car_probability, 1.0);
    }

    #[test]
    fn test_compound_codes() {
        assert_eq!(parse_compound("c1"), Some(Compound::Hard));
        assert_eq!(parse_compound("C3"), Some(Compound::Medium));
        assert_eq!(parse_compound("I"), Some(Compound::Intermediate));
        assert_eq!(parse_compound("X9"), None);
    }
}
