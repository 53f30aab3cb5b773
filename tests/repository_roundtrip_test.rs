// ==========================================
// forecastplan 持久化集成测试
// ==========================================

mod test_helpers;

use forecast_cube::measure::MeasureCatalogue;
use forecast_cube::model::ForecastModel;
use forecast_cube::repository::{ForecastPlanRepository, PlanRow};
use test_helpers::*;

fn stored_columns() -> Vec<String> {
    MeasureCatalogue::standard()
        .unwrap()
        .stored()
        .unwrap()
        .iter()
        .map(|m| m.name.clone())
        .collect()
}

fn open_repo(path: &std::path::Path) -> ForecastPlanRepository {
    let repo =
        ForecastPlanRepository::new(path.to_str().unwrap(), stored_columns()).unwrap();
    repo.ensure_schema().unwrap();
    repo
}

fn persistent_model(path: &std::path::Path) -> ForecastModel {
    standard_model(false).with_repository(open_repo(path))
}

#[test]
fn flushed_values_survive_a_model_rebuild() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("plan.db");

    let model = persistent_model(&db);
    let blue = leaf(&model, "Blue shirt");
    let idx = first_future_bucket(&model);
    model.set_measure_value(blue, "forecastbaseline", idx, 30.0).unwrap();
    model.set_measure_value(blue, "forecastbaseline", idx - 2, 12.0).unwrap();
    let written = model.flush().unwrap();
    assert!(written > 0);
    drop(model);

    let model = persistent_model(&db);
    let blue = leaf(&model, "Blue shirt");
    assert_eq!(model.measure_value(blue, "forecastbaseline", idx).unwrap(), 30.0);
    assert_eq!(model.measure_value(blue, "forecastbaseline", idx - 2).unwrap(), 12.0);
    // 上级节点同样重新加载其聚合行
    let shirts = model.find_forecast("Shirts", "Store", "Web").unwrap().unwrap();
    assert_eq!(model.measure_value(shirts, "forecastbaseline", idx).unwrap(), 30.0);
}

#[test]
fn erased_buckets_delete_their_rows() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("plan.db");

    let model = persistent_model(&db);
    let blue = leaf(&model, "Blue shirt");
    let idx = first_future_bucket(&model);
    model.set_measure_value(blue, "forecastbaseline", idx, 30.0).unwrap();
    model.flush().unwrap();
    assert!(model.repository().unwrap().count_rows().unwrap() > 0);

    model.remove_measure_value(blue, "forecastbaseline", idx).unwrap();
    model.flush().unwrap();
    assert_eq!(model.repository().unwrap().count_rows().unwrap(), 0);
}

#[test]
fn write_immediately_flushes_every_edit() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("plan.db");

    let model = persistent_model(&db);
    model.set_write_immediately(true);
    let blue = leaf(&model, "Blue shirt");
    let idx = first_future_bucket(&model);
    model.set_measure_value(blue, "forecastbaseline", idx, 30.0).unwrap();

    assert!(model.repository().unwrap().count_rows().unwrap() > 0);
}

#[test]
fn rows_outside_the_calendar_fail_the_load() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("plan.db");

    let repo = open_repo(&db);
    let columns = repo.columns().len();
    repo.upsert(&[PlanRow {
        item: "Blue shirt".to_string(),
        location: "Store".to_string(),
        customer: "Web".to_string(),
        startdate: fcst_current() - chrono::Duration::days(3),
        values: vec![Some(1.0); columns],
    }])
    .unwrap();

    let model = standard_model(false).with_repository(open_repo(&db));
    let blue = leaf(&model, "Blue shirt");
    let err = model.measure_value(blue, "forecastbaseline", 0).unwrap_err();
    assert!(err.to_string().contains("not matching"), "unexpected error: {err}");
}
