// ==========================================
// 度量代数集成测试
// ==========================================

mod test_helpers;

use chrono::Duration;
use test_helpers::*;

#[test]
fn leaf_edits_roll_up_to_every_parent() {
    let model = standard_model(false);
    let blue = leaf(&model, "Blue shirt");
    let red = leaf(&model, "Red shirt");
    let idx = first_future_bucket(&model);

    model.set_measure_value(blue, "forecastbaseline", idx, 30.0).unwrap();
    model.set_measure_value(red, "forecastbaseline", idx, 70.0).unwrap();

    let shirts = model.find_forecast("Shirts", "Store", "Web").unwrap().unwrap();
    assert_eq!(model.measure_value(shirts, "forecastbaseline", idx).unwrap(), 100.0);

    let top = model
        .find_forecast("All items", "All locations", "All customers")
        .unwrap()
        .unwrap();
    assert_eq!(model.measure_value(top, "forecastbaseline", idx).unwrap(), 100.0);
}

#[test]
fn changing_a_leaf_feeds_the_delta_upward() {
    let model = standard_model(false);
    let blue = leaf(&model, "Blue shirt");
    let idx = first_future_bucket(&model);

    model.set_measure_value(blue, "forecastbaseline", idx, 30.0).unwrap();
    model.set_measure_value(blue, "forecastbaseline", idx, 12.0).unwrap();

    let shirts = model.find_forecast("Shirts", "Store", "Web").unwrap().unwrap();
    assert_eq!(model.measure_value(shirts, "forecastbaseline", idx).unwrap(), 12.0);
}

#[test]
fn removing_a_leaf_value_takes_it_out_of_the_parents() {
    let model = standard_model(false);
    let blue = leaf(&model, "Blue shirt");
    let red = leaf(&model, "Red shirt");
    let idx = first_future_bucket(&model);

    model.set_measure_value(blue, "forecastbaseline", idx, 30.0).unwrap();
    model.set_measure_value(red, "forecastbaseline", idx, 70.0).unwrap();
    model.remove_measure_value(blue, "forecastbaseline", idx).unwrap();

    let shirts = model.find_forecast("Shirts", "Store", "Web").unwrap().unwrap();
    assert_eq!(model.measure_value(shirts, "forecastbaseline", idx).unwrap(), 70.0);
    assert_eq!(model.measure_value(blue, "forecastbaseline", idx).unwrap(), 0.0);
}

#[test]
fn parent_edits_distribute_proportionally_to_the_leaves() {
    let model = standard_model(false);
    let blue = leaf(&model, "Blue shirt");
    let red = leaf(&model, "Red shirt");
    let idx = first_future_bucket(&model);

    model.set_measure_value(blue, "forecastbaseline", idx, 30.0).unwrap();
    model.set_measure_value(red, "forecastbaseline", idx, 70.0).unwrap();

    let shirts = model.find_forecast("Shirts", "Store", "Web").unwrap().unwrap();
    model.set_measure_value(shirts, "forecastbaseline", idx, 50.0).unwrap();

    assert!((model.measure_value(blue, "forecastbaseline", idx).unwrap() - 15.0).abs() < 1e-6);
    assert!((model.measure_value(red, "forecastbaseline", idx).unwrap() - 35.0).abs() < 1e-6);
    assert!((model.measure_value(shirts, "forecastbaseline", idx).unwrap() - 50.0).abs() < 1e-6);
}

#[test]
fn parent_edits_split_equally_when_the_children_are_empty() {
    let model = standard_model(false);
    let blue = leaf(&model, "Blue shirt");
    let red = leaf(&model, "Red shirt");
    let idx = first_future_bucket(&model);

    // 上级节点在有人遍历层级后才存在
    model.parents(blue).unwrap();
    let shirts = model.find_forecast("Shirts", "Store", "Web").unwrap().unwrap();
    model.set_measure_value(shirts, "forecastbaseline", idx, 50.0).unwrap();

    assert!((model.measure_value(blue, "forecastbaseline", idx).unwrap() - 25.0).abs() < 1e-6);
    assert!((model.measure_value(red, "forecastbaseline", idx).unwrap() - 25.0).abs() < 1e-6);
}

#[test]
fn range_edits_spread_over_the_overlapping_buckets() {
    let model = standard_model(false);
    let blue = leaf(&model, "Blue shirt");
    let idx = first_future_bucket(&model);
    let start = model.calendar().bucket(idx).start;
    let end = start + Duration::weeks(4);

    model
        .set_measure_over(blue, "forecastbaseline", start, end, 20.0)
        .unwrap();

    for i in idx..idx + 4 {
        assert!((model.measure_value(blue, "forecastbaseline", i).unwrap() - 5.0).abs() < 1e-6);
    }
    assert_eq!(model.measure_value(blue, "forecastbaseline", idx + 4).unwrap(), 0.0);
}

#[test]
fn discrete_forecasts_keep_integer_buckets_and_carry_the_fraction() {
    let model = standard_model(true);
    let blue = leaf(&model, "Blue shirt");
    let idx = first_future_bucket(&model);
    let start = model.calendar().bucket(idx).start;
    let end = start + Duration::weeks(4);

    model
        .set_measure_over(blue, "forecastbaseline", start, end, 10.0)
        .unwrap();

    let mut total = 0.0;
    for i in idx..idx + 4 {
        let v = model.measure_value(blue, "forecastbaseline", i).unwrap();
        assert!((v - v.round()).abs() < 1e-6, "bucket {i} not integral: {v}");
        total += v;
    }
    assert!((total - 10.0).abs() < 1e-6);
}

#[test]
fn reset_keeps_the_buckets_outside_the_range() {
    let model = standard_model(false);
    let blue = leaf(&model, "Blue shirt");
    let current = first_future_bucket(&model);
    let past = current - 1;

    model.set_measure_value(blue, "forecastbaseline", past, 5.0).unwrap();
    model.set_measure_value(blue, "forecastbaseline", current, 9.0).unwrap();
    model.set_measure_value(blue, "forecastbaseline", current + 1, 7.0).unwrap();

    // Future 不含跨越预测日期的那个桶
    model
        .reset_measure(
            forecast_cube::domain::types::ResetRange::Future,
            &["forecastbaseline"],
        )
        .unwrap();
    assert_eq!(model.measure_value(blue, "forecastbaseline", past).unwrap(), 5.0);
    assert_eq!(model.measure_value(blue, "forecastbaseline", current).unwrap(), 9.0);
    assert_eq!(model.measure_value(blue, "forecastbaseline", current + 1).unwrap(), 0.0);

    model
        .reset_measure(
            forecast_cube::domain::types::ResetRange::CurrentAndFuture,
            &["forecastbaseline"],
        )
        .unwrap();
    assert_eq!(model.measure_value(blue, "forecastbaseline", past).unwrap(), 5.0);
    assert_eq!(model.measure_value(blue, "forecastbaseline", current).unwrap(), 0.0);
}

#[test]
fn aggregation_pass_leaves_consistent_parents_untouched() {
    let model = standard_model(false);
    let blue = leaf(&model, "Blue shirt");
    let red = leaf(&model, "Red shirt");
    let idx = first_future_bucket(&model);

    model.set_measure_value(blue, "forecastbaseline", idx, 30.0).unwrap();
    model.set_measure_value(red, "forecastbaseline", idx, 70.0).unwrap();

    model.aggregate_measures(true).unwrap();

    let shirts = model.find_forecast("Shirts", "Store", "Web").unwrap().unwrap();
    assert_eq!(model.measure_value(shirts, "forecastbaseline", idx).unwrap(), 100.0);
    assert_eq!(model.measure_value(blue, "forecastbaseline", idx).unwrap(), 30.0);
}

#[test]
fn json_dump_reports_the_stored_measures() {
    let model = standard_model(false);
    let blue = leaf(&model, "Blue shirt");
    let idx = first_future_bucket(&model);
    model.set_measure_value(blue, "forecastbaseline", idx, 30.0).unwrap();

    let dump = model.to_json(blue, None, None).unwrap();
    assert_eq!(dump["forecast"], "Blue shirt / Store / Web");
    assert_eq!(dump["item"], "Blue shirt");
    let bucket = dump["buckets"]
        .as_array()
        .unwrap()
        .iter()
        .find(|b| b["values"]["forecastbaseline"].is_number())
        .unwrap();
    assert_eq!(bucket["values"]["forecastbaseline"], 30.0);
}
