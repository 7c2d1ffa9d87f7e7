use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::types::{ActionKind, RaceStateSnapshot, StrategyAction, TrackCondition};

/// Weather branches to plan for: the current surface, plus the forecast if it differs.
pub fn weather_branches(snapshot: &RaceStateSnapshot) -> Vec<TrackCondition> {
    let mut branches = vec![snapshot.condition];
    if let Some(f) = snapshot.forecast_condition {
        if f != snapshot.condition {
            branches.push(f);
        }
    }
    branches
}

/// Laps from now until the stop that follows the rival's window, if it still fits.
fn overcut_offset(snapshot: &RaceStateSnapshot) -> Option<u32> {
    let offset = snapshot
        .rival_pit_window
        .end
        .checked_sub(snapshot.current_lap)?
        .checked_add(1)?;
    (offset <= snapshot.laps_remaining()).then_some(offset)
}

/// Enumerates every valid {kind x compound x weather} action for the snapshot.
///
/// Output order is fixed: weather branch, then pit offset, then compound.
/// Stay-out is not generated here; the ranker adds it as the baseline.
pub fn generate(snapshot: &RaceStateSnapshot, cfg: &EngineConfig) -> EngineResult<Vec<StrategyAction>> {
    snapshot.validate()?;
    let remaining = snapshot.laps_remaining();

    let mut kinds: Vec<(ActionKind, u32)> = cfg
        .pit_lap_offsets
        .iter()
        .filter(|o| **o <= remaining)
        .filter_map(|o| ActionKind::from_offset(*o).map(|k| (k, *o)))
        .collect();
    if cfg.include_overcut {
        if let Some(o) = overcut_offset(snapshot) {
            kinds.push((ActionKind::Overcut, o));
        }
    }

    let mut actions = Vec::new();
    for weather in weather_branches(snapshot) {
        for (kind, offset) in &kinds {
            for compound in cfg.allowed_compounds.iter().filter(|c| c.allowed_in(weather)) {
                actions.push(StrategyAction::pit(*kind, *compound, weather, *offset));
            }
        }
    }
    tracing::debug!(
        "generated {} actions over {} laps remaining",
        actions.len(),
        remaining
    );
    Ok(actions)
}
