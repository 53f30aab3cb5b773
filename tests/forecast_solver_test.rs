// ==========================================
// 预测求解器集成测试
// ==========================================

mod test_helpers;

use forecast_cube::config::SolverConfig;
use forecast_cube::domain::types::AppliedMethod;
use forecast_cube::engine::ForecastSolver;
use test_helpers::*;

#[test]
fn constant_demand_projects_its_level() {
    let model = standard_model(true);
    let blue = leaf(&model, "Blue shirt");
    let future = first_future_bucket(&model);
    for i in 0..future {
        model.set_measure_value(blue, "orderstotal", i, 10.0).unwrap();
    }

    let solver = ForecastSolver::new(&model, SolverConfig::default());
    let result = solver.solve().unwrap();
    assert_eq!(result.failed, 0);

    for i in future..model.calendar().bucket_count() {
        let v = model.measure_value(blue, "forecastbaseline", i).unwrap();
        assert!((v - 10.0).abs() < 0.5, "bucket {i}: {v}");
    }
    let cube = model.cube(blue).unwrap();
    let state = cube.lock().unwrap();
    assert!(state.smape < 0.05);
    assert_ne!(state.applied_method, AppliedMethod::None);
}

#[test]
fn trending_demand_keeps_growing_in_the_projection() {
    let model = standard_model(false);
    let blue = leaf(&model, "Blue shirt");
    let future = first_future_bucket(&model);
    for i in 0..future {
        model
            .set_measure_value(blue, "orderstotal", i, 10.0 + 2.0 * i as f64)
            .unwrap();
    }

    ForecastSolver::new(&model, SolverConfig::default())
        .solve()
        .unwrap();

    let first = model.measure_value(blue, "forecastbaseline", future).unwrap();
    let later = model
        .measure_value(blue, "forecastbaseline", future + 6)
        .unwrap();
    let last_history = 10.0 + 2.0 * (future as f64 - 1.0);
    assert!(first > last_history * 0.7, "first projection too low: {first}");
    assert!(later > first, "projection not growing: {first} -> {later}");
}

#[test]
fn intermittent_demand_selects_the_croston_method() {
    let model = standard_model(true);
    let blue = leaf(&model, "Blue shirt");
    let future = first_future_bucket(&model);
    for i in 0..future {
        let qty = if i % 3 == 0 { 4.0 } else { 0.0 };
        if qty != 0.0 {
            model.set_measure_value(blue, "orderstotal", i, qty).unwrap();
        }
    }

    ForecastSolver::new(&model, SolverConfig::default())
        .solve()
        .unwrap();

    let cube = model.cube(blue).unwrap();
    let state = cube.lock().unwrap();
    assert_eq!(state.applied_method, AppliedMethod::Intermittent);
    drop(state);

    let total: f64 = (future..model.calendar().bucket_count())
        .map(|i| model.measure_value(blue, "forecastbaseline", i).unwrap())
        .sum();
    // 4 units every third week, 12 weeks out
    assert!(total > 6.0 && total < 26.0, "projected total {total}");
}

#[test]
fn a_forecast_without_history_stays_empty() {
    let model = standard_model(true);
    let blue = leaf(&model, "Blue shirt");
    let future = first_future_bucket(&model);

    ForecastSolver::new(&model, SolverConfig::default())
        .solve()
        .unwrap();

    for i in future..model.calendar().bucket_count() {
        assert_eq!(model.measure_value(blue, "forecastbaseline", i).unwrap(), 0.0);
    }
    let cube = model.cube(blue).unwrap();
    let state = cube.lock().unwrap();
    assert_eq!(state.applied_method, AppliedMethod::None);
}

#[test]
fn manual_forecasts_are_left_alone() {
    let model = standard_model(true);
    let blue = leaf(&model, "Blue shirt");
    let future = first_future_bucket(&model);
    model.set_methods_string(blue, "manual").unwrap();
    for i in 0..future {
        model.set_measure_value(blue, "orderstotal", i, 10.0).unwrap();
    }
    model
        .set_measure_value(blue, "forecastbaseline", future, 99.0)
        .unwrap();

    ForecastSolver::new(&model, SolverConfig::default())
        .solve()
        .unwrap();

    assert_eq!(model.measure_value(blue, "forecastbaseline", future).unwrap(), 99.0);
    let cube = model.cube(blue).unwrap();
    let state = cube.lock().unwrap();
    assert_eq!(state.applied_method, AppliedMethod::Manual);
}

#[test]
fn outliers_are_flagged_and_clamped() {
    let model = standard_model(false);
    let blue = leaf(&model, "Blue shirt");
    let future = first_future_bucket(&model);
    let spike = future - 8;
    for i in 0..future {
        let qty = if i == spike { 200.0 } else { 10.0 };
        model.set_measure_value(blue, "orderstotal", i, qty).unwrap();
    }

    ForecastSolver::new(&model, SolverConfig::default())
        .solve()
        .unwrap();

    assert_eq!(model.measure_value(blue, "outlier", spike).unwrap(), 200.0);
    let cube = model.cube(blue).unwrap();
    let state = cube.lock().unwrap();
    let hit = state
        .outliers
        .iter()
        .find(|o| o.bucket == spike)
        .expect("spike not reported as outlier");
    assert_eq!(hit.observed, 200.0);
    assert!(hit.admitted < 200.0);
    drop(state);

    // 尖峰不得破坏投影结果
    let v = model.measure_value(blue, "forecastbaseline", future).unwrap();
    assert!(v < 40.0, "projection inflated by the outlier: {v}");
}

#[test]
fn net_forecast_follows_the_total_on_planned_nodes() {
    let model = standard_model(true);
    let blue = leaf(&model, "Blue shirt");
    let future = first_future_bucket(&model);
    for i in 0..future {
        model.set_measure_value(blue, "orderstotal", i, 10.0).unwrap();
    }

    ForecastSolver::new(&model, SolverConfig::default())
        .solve()
        .unwrap();

    let total = model.measure_value(blue, "forecasttotal", future).unwrap();
    let net = model.measure_value(blue, "forecastnet", future).unwrap();
    assert!(total > 0.0);
    assert_eq!(net, total);
}
