/// End-to-end tests for the strategy engine
///
/// Run with: cargo test --test integration_tests -- --nocapture

use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

use strategy_engine::{
    model, ActionKind, Compound, ConfidencePolicy, Engine, EngineConfig, EngineError,
    EventContext, FeatureVector, LapWindow, LogisticModel, Maneuver, ModelBundle,
    RaceStateSnapshot, SimulationMode, SuccessModel, SuccessTier, TrackCondition, FEATURE_DIM,
    FEATURE_NAMES,
};

fn shipped_model() -> ModelBundle {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/models/strategy_model.json");
    model::load_logistic(path).expect("shipped artifact should load")
}

fn coin_flip_model() -> ModelBundle {
    let m: Arc<dyn SuccessModel> = Arc::new(LogisticModel::new(vec![0.0; FEATURE_DIM], 0.0));
    ModelBundle::new(m.clone(), m)
}

/// Pace loss by tire age for a soft set, 0..=25 laps old.
fn wear_curve() -> Vec<f64> {
    (0..26).map(|age| 0.3 + 0.06 * age as f64 + 0.002 * (age * age) as f64).collect()
}

fn snapshot(sc: f64) -> RaceStateSnapshot {
    RaceStateSnapshot {
        current_lap: 30,
        total_laps: 50,
        gap_ahead: 1.8,
        gap_behind: 2.4,
        compound: Compound::Soft,
        tire_age: 18,
        degradation_curve: wear_curve(),
        rival_pit_window: LapWindow::new(32, 34),
        condition: TrackCondition::Dry,
        forecast_condition: None,
        safety_car_probability: sc,
    }
}

fn three_offsets() -> EngineConfig {
    EngineConfig {
        pit_lap_offsets: [0, 1, 2].into_iter().collect(),
        allowed_compounds: [Compound::Medium].into_iter().collect(),
        include_overcut: false,
        ..EngineConfig::default()
    }
}

#[test]
fn scenario_three_offsets_no_safety_car() {
    println!("\n=== Scenario: 20 laps left, offsets {{0,1,2}}, no safety car ===");
    let engine = Engine::with_model(shipped_model()).unwrap();
    let r = engine.evaluate(&snapshot(0.0), &three_offsets()).unwrap();

    assert_eq!(r.candidates().count(), 3);
    assert_eq!(r.entries.len(), 4);
    assert!(r.baseline().is_some());
    assert!(r.warnings.is_empty());

    for w in r.entries.windows(2) {
        assert!(w[0].score >= w[1].score, "not sorted by score");
    }
    let max_p = r
        .entries
        .iter()
        .map(|e| e.prediction.probability)
        .fold(f64::MIN, f64::max);
    assert_eq!(r.top().unwrap().prediction.probability, max_p);

    for e in &r.entries {
        println!(
            "  #{} {:<26} p={:.3} c={:.3} score={:+.3}",
            e.rank,
            e.action().label(),
            e.prediction.probability,
            e.prediction.confidence,
            e.score
        );
    }
    println!("✓ Ranked 3 actions plus baseline");
}

#[test]
fn scenario_safety_car_compresses_gap() {
    println!("\n=== Scenario: safety-car probability 0.5 ===");
    let engine = Engine::with_model(shipped_model()).unwrap();
    let calm = engine.evaluate(&snapshot(0.0), &three_offsets()).unwrap();
    let sc = engine.evaluate(&snapshot(0.5), &three_offsets()).unwrap();

    let pit_now = |r: &strategy_engine::RankedRecommendation| {
        r.candidates()
            .find(|e| e.action().kind == ActionKind::UndercutNow)
            .map(|e| e.prediction.features)
            .unwrap()
    };
    let before = pit_now(&calm);
    let after = pit_now(&sc);
    println!("  |track_gap| {:.3} -> {:.3}", before.track_gap.abs(), after.track_gap.abs());
    assert!(after.track_gap.abs() < before.track_gap.abs());
    assert!(after.tire_delta.abs() <= before.tire_delta.abs());
    assert_eq!(sc.candidates().count(), 3);
    println!("✓ Safety-car neutralization visible in features");
}

#[test]
fn scenario_no_laps_remaining() {
    let engine = Engine::with_model(shipped_model()).unwrap();
    let mut s = snapshot(0.0);
    s.current_lap = s.total_laps;
    assert!(matches!(
        engine.evaluate(&s, &EngineConfig::default()),
        Err(EngineError::InvalidSnapshot(_))
    ));
}

#[test]
fn scenario_model_not_loaded() {
    let engine = Engine::new();
    let err = engine.evaluate(&snapshot(0.2), &EngineConfig::default()).unwrap_err();
    assert_eq!(err, EngineError::ModelUnavailable);
    assert!(err.is_retryable());
}

#[test]
fn test_monte_carlo_bit_identical_for_seed() {
    let engine = Engine::with_model(shipped_model()).unwrap();
    let cfg = EngineConfig {
        mode: SimulationMode::MonteCarlo,
        random_seed: Some(2024),
        monte_carlo_trials: 400,
        ..EngineConfig::default()
    };
    let a = engine.evaluate(&snapshot(0.4), &cfg).unwrap();
    let b = engine.evaluate(&snapshot(0.4), &cfg).unwrap();
    assert_eq!(a, b);

    let json_a = serde_json::to_string(&a).unwrap();
    let json_b = serde_json::to_string(&b).unwrap();
    assert_eq!(json_a, json_b);
    println!("✓ Monte Carlo output reproducible ({} bytes)", json_a.len());
}

#[test]
fn test_expectation_ignores_seed() {
    let engine = Engine::with_model(shipped_model()).unwrap();
    let with_seed = |seed| EngineConfig {
        random_seed: Some(seed),
        ..EngineConfig::default()
    };
    let a = engine.evaluate(&snapshot(0.3), &with_seed(1)).unwrap();
    let b = engine.evaluate(&snapshot(0.3), &with_seed(99)).unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_reload_during_evaluation_is_consistent() {
    let engine = Engine::with_model(shipped_model()).unwrap();
    let cfg = EngineConfig::default();
    let s = snapshot(0.25);
    let expect_a = engine.evaluate(&s, &cfg).unwrap();
    engine.reload_model(coin_flip_model()).unwrap();
    let expect_b = engine.evaluate(&s, &cfg).unwrap();
    assert_ne!(expect_a, expect_b);

    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                for _ in 0..20 {
                    let r = engine.evaluate(&s, &cfg).unwrap();
                    assert!(r == expect_a || r == expect_b, "mixed model snapshot");
                }
            });
        }
        scope.spawn(|| {
            for i in 0..20 {
                let bundle = if i % 2 == 0 { shipped_model() } else { coin_flip_model() };
                engine.reload_model(bundle).unwrap();
            }
        });
    });
    println!("✓ Concurrent reloads never produced a mixed result");
}

#[test]
fn test_trial_streams_keyed_by_action() {
    let engine = Engine::with_model(shipped_model()).unwrap();
    let mc = |compounds: &[Compound]| EngineConfig {
        mode: SimulationMode::MonteCarlo,
        random_seed: Some(77),
        monte_carlo_trials: 300,
        allowed_compounds: compounds.iter().copied().collect(),
        ..EngineConfig::default()
    };
    let narrow = engine.evaluate(&snapshot(0.4), &mc(&[Compound::Medium])).unwrap();
    let wide = engine
        .evaluate(&snapshot(0.4), &mc(&[Compound::Soft, Compound::Medium, Compound::Hard]))
        .unwrap();
    assert!(wide.candidates().count() > narrow.candidates().count());

    let mut shared = 0;
    for e in narrow.candidates() {
        let other = wide.find(e.action()).expect("action present in both runs");
        assert_eq!(e.prediction.context, other.prediction.context);
        assert_eq!(e.prediction.probability, other.prediction.probability);
        shared += 1;
    }
    assert!(shared > 0);
    println!("✓ {} shared actions kept identical distributions", shared);
}

#[test]
fn test_monte_carlo_reports_expectation_features() {
    let engine = Engine::with_model(shipped_model()).unwrap();
    let s = snapshot(0.4);
    let expectation = engine.evaluate(&s, &three_offsets()).unwrap();
    let mc_cfg = EngineConfig {
        mode: SimulationMode::MonteCarlo,
        random_seed: Some(5),
        monte_carlo_trials: 200,
        ..three_offsets()
    };
    let mc = engine.evaluate(&s, &mc_cfg).unwrap();
    for e in mc.candidates() {
        assert!(matches!(e.prediction.context, EventContext::MonteCarlo { .. }));
        let same = expectation.find(e.action()).unwrap();
        assert_eq!(e.prediction.features, same.prediction.features);
    }
}

#[test]
fn test_older_tires_favor_stopping() {
    let engine = Engine::with_model(shipped_model()).unwrap();
    let mut young = snapshot(0.0);
    young.tire_age = 2;
    let old = snapshot(0.0);
    let pit_now = |s: &RaceStateSnapshot| {
        let r = engine.evaluate(s, &three_offsets()).unwrap();
        let features = r
            .candidates()
            .find(|e| e.action().kind == ActionKind::UndercutNow)
            .map(|e| e.prediction.features)
            .unwrap();
        features
    };
    let (y, o) = (pit_now(&young), pit_now(&old));
    assert!(o.pace_dropoff > y.pace_dropoff);
    assert!(o.tire_delta < y.tire_delta);
}

#[test]
fn test_direct_prediction() {
    let engine = Engine::with_model(shipped_model()).unwrap();
    let named: HashMap<String, f64> = FEATURE_NAMES
        .iter()
        .zip([-1.5, 1.2, 0.8, 0.2, 0.5])
        .map(|(n, v)| (n.to_string(), v))
        .collect();
    let fv = FeatureVector::from_named(&named).unwrap();

    let under = engine.predict(Maneuver::Undercut, &fv, ConfidencePolicy::Linear).unwrap();
    let over = engine.predict(Maneuver::Overcut, &fv, ConfidencePolicy::Linear).unwrap();
    for out in [&under, &over] {
        assert!((0.0..=1.0).contains(&out.probability));
        assert_eq!(out.tier, SuccessTier::from_probability(out.probability));
        assert!(!out.factors.is_empty());
    }
    assert_ne!(under.probability, over.probability);
    println!(
        "✓ undercut p={:.3} ({:?}), overcut p={:.3} ({:?})",
        under.probability, under.tier, over.probability, over.tier
    );
}

#[test]
fn test_direct_prediction_shape_and_availability() {
    let err = FeatureVector::from_slice(&[0.1; FEATURE_DIM - 1]).unwrap_err();
    assert_eq!(err, EngineError::FeatureShapeMismatch { expected: FEATURE_DIM, got: FEATURE_DIM - 1 });

    let engine = Engine::new();
    let fv = FeatureVector::from_slice(&[0.1; FEATURE_DIM]).unwrap();
    assert_eq!(
        engine.predict(Maneuver::Undercut, &fv, ConfidencePolicy::Linear).unwrap_err(),
        EngineError::ModelUnavailable
    );
    let wide = ModelBundle::new(
        Arc::new(LogisticModel::new(vec![0.0; FEATURE_DIM + 2], 0.0)),
        Arc::new(LogisticModel::new(vec![0.0; FEATURE_DIM], 0.0)),
    );
    assert!(matches!(
        engine.reload_model(wide),
        Err(EngineError::FeatureShapeMismatch { .. })
    ));
    assert!(!engine.model_loaded());
}

#[test]
fn test_snapshot_from_json() {
    let s: RaceStateSnapshot = serde_json::from_str(
        r#"{
            "current_lap": 12, "total_laps": 57,
            "gap_ahead": 0.9, "gap_behind": 3.1,
            "compound": "medium", "tire_age": 1,
            "degradation_curve": [0.4, 0.5, 0.55, 0.7, 0.8],
            "rival_pit_window": {"start": 13, "end": 15},
            "condition": "mixed", "forecast_condition": "wet",
            "safety_car_probability": 0.3
        }"#,
    )
    .unwrap();
    let engine = Engine::with_model(shipped_model()).unwrap();
    let r = engine.evaluate(&s, &EngineConfig::default()).unwrap();
    assert!(r.candidates().any(|e| e.action().weather == TrackCondition::Wet));
    assert!(r
        .candidates()
        .filter(|e| e.action().weather == TrackCondition::Wet)
        .all(|e| !e.action().compound.is_slick()));
    assert_eq!(r.factors.len(), 2);
}

fn arb_snapshot() -> impl Strategy<Value = RaceStateSnapshot> {
    (
        0u32..60,
        1u32..30,
        0.0f64..20.0,
        0.0f64..20.0,
        prop::sample::select(vec![Compound::Soft, Compound::Medium, Compound::Hard]),
        prop::collection::vec(0.0f64..4.0, 7..16),
        0u32..4,
        0u32..6,
        0.0f64..=1.0,
    )
        .prop_map(|(lap, remaining, ahead, behind, compound, curve, age, rival, sc)| RaceStateSnapshot {
            current_lap: lap,
            total_laps: lap + remaining,
            gap_ahead: ahead,
            gap_behind: behind,
            compound,
            tire_age: age,
            degradation_curve: curve,
            rival_pit_window: LapWindow::new(lap + rival, lap + rival + 2),
            condition: TrackCondition::Dry,
            forecast_condition: None,
            safety_car_probability: sc,
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_probabilities_in_unit_range(s in arb_snapshot()) {
        let engine = Engine::with_model(shipped_model()).unwrap();
        if let Ok(r) = engine.evaluate(&s, &EngineConfig::default()) {
            for e in &r.entries {
                prop_assert!((0.0..=1.0).contains(&e.prediction.probability));
                prop_assert!((0.0..=1.0).contains(&e.prediction.confidence));
            }
        }
    }

    #[test]
    fn prop_ranking_is_total_and_deltas_consistent(s in arb_snapshot(), gain in 0.5f64..3.0, loss in 0.5f64..3.0) {
        let engine = Engine::with_model(shipped_model()).unwrap();
        let cfg = EngineConfig { gain_if_success: gain, loss_if_fail: loss, ..EngineConfig::default() };
        if let Ok(r) = engine.evaluate(&s, &cfg) {
            let mut labels: Vec<String> = r.entries.iter().map(|e| e.action().label()).collect();
            let n = labels.len();
            labels.sort();
            labels.dedup();
            prop_assert_eq!(labels.len(), n);

            let top = r.top().unwrap();
            for (i, e) in r.entries.iter().enumerate() {
                prop_assert_eq!(e.rank, i + 1);
                prop_assert_eq!(e.vs_top.score, top.score - e.score);
                prop_assert_eq!(e.vs_top.probability, top.prediction.probability - e.prediction.probability);
            }
            for w in r.entries.windows(2) {
                prop_assert!(w[0].score >= w[1].score);
            }
        }
    }

    #[test]
    fn prop_fresher_compound_never_scores_lower(s in arb_snapshot()) {
        let engine = Engine::with_model(shipped_model()).unwrap();
        let cfg = EngineConfig {
            pit_lap_offsets: [0].into_iter().collect(),
            include_overcut: false,
            ..EngineConfig::default()
        };
        let r = engine.evaluate(&s, &cfg).unwrap();
        let score_of = |c: Compound| {
            r.candidates()
                .find(|e| e.action().kind == ActionKind::UndercutNow && e.action().compound == c)
                .map(|e| e.score)
                .unwrap()
        };
        // soft < medium < hard in tire delta, everything else equal
        prop_assert!(score_of(Compound::Soft) >= score_of(Compound::Medium));
        prop_assert!(score_of(Compound::Medium) >= score_of(Compound::Hard));
    }
}
