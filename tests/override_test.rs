// ==========================================
// 预测覆盖集成测试
// ==========================================
// 编辑 forecasttotal 会在存储层级产生 forecastoverride 条目；
// 基线保持不动，清除覆盖后基线重新生效。
// ==========================================

mod test_helpers;

use test_helpers::*;

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-6
}

#[test]
fn total_follows_the_baseline_until_overridden() {
    let model = standard_model(false);
    let blue = leaf(&model, "Blue shirt");
    let idx = first_future_bucket(&model);

    model.set_measure_value(blue, "forecastbaseline", idx, 30.0).unwrap();
    assert!(close(model.measure_value(blue, "forecasttotal", idx).unwrap(), 30.0));

    model.set_measure_value(blue, "forecasttotal", idx, 42.0).unwrap();
    assert!(close(model.measure_value(blue, "forecastoverride", idx).unwrap(), 42.0));
    assert!(close(model.measure_value(blue, "forecasttotal", idx).unwrap(), 42.0));
    assert!(close(model.measure_value(blue, "forecastbaseline", idx).unwrap(), 30.0));
}

#[test]
fn parent_override_spreads_in_proportion_to_the_baseline() {
    let model = standard_model(false);
    let blue = leaf(&model, "Blue shirt");
    let red = leaf(&model, "Red shirt");
    let idx = first_future_bucket(&model);

    model.set_measure_value(blue, "forecastbaseline", idx, 30.0).unwrap();
    model.set_measure_value(red, "forecastbaseline", idx, 70.0).unwrap();

    let shirts = model.find_forecast("Shirts", "Store", "Web").unwrap().unwrap();
    model.set_measure_value(shirts, "forecasttotal", idx, 50.0).unwrap();

    assert!(close(model.measure_value(blue, "forecastoverride", idx).unwrap(), 15.0));
    assert!(close(model.measure_value(red, "forecastoverride", idx).unwrap(), 35.0));
    assert!(close(model.measure_value(shirts, "forecastoverride", idx).unwrap(), 50.0));
    // 覆盖不会改写基线
    assert!(close(model.measure_value(blue, "forecastbaseline", idx).unwrap(), 30.0));
    assert!(close(model.measure_value(red, "forecastbaseline", idx).unwrap(), 70.0));
}

#[test]
fn scaling_an_existing_override_keeps_the_child_ratios() {
    let model = standard_model(false);
    let blue = leaf(&model, "Blue shirt");
    let red = leaf(&model, "Red shirt");
    let idx = first_future_bucket(&model);

    model.set_measure_value(blue, "forecastbaseline", idx, 30.0).unwrap();
    model.set_measure_value(red, "forecastbaseline", idx, 70.0).unwrap();

    let shirts = model.find_forecast("Shirts", "Store", "Web").unwrap().unwrap();
    model.set_measure_value(shirts, "forecasttotal", idx, 50.0).unwrap();
    model.set_measure_value(shirts, "forecasttotal", idx, 25.0).unwrap();

    assert!(close(model.measure_value(blue, "forecastoverride", idx).unwrap(), 7.5));
    assert!(close(model.measure_value(red, "forecastoverride", idx).unwrap(), 17.5));
}

#[test]
fn negative_total_clears_the_override() {
    let model = standard_model(false);
    let blue = leaf(&model, "Blue shirt");
    let red = leaf(&model, "Red shirt");
    let idx = first_future_bucket(&model);

    model.set_measure_value(blue, "forecastbaseline", idx, 30.0).unwrap();
    model.set_measure_value(red, "forecastbaseline", idx, 70.0).unwrap();

    let shirts = model.find_forecast("Shirts", "Store", "Web").unwrap().unwrap();
    model.set_measure_value(shirts, "forecasttotal", idx, 50.0).unwrap();
    model.set_measure_value(shirts, "forecasttotal", idx, -1.0).unwrap();

    assert!(close(model.measure_value(blue, "forecastoverride", idx).unwrap(), -1.0));
    assert!(close(model.measure_value(red, "forecastoverride", idx).unwrap(), -1.0));
    // 总量回落到基线
    assert!(close(model.measure_value(blue, "forecasttotal", idx).unwrap(), 30.0));
    assert!(close(model.measure_value(red, "forecasttotal", idx).unwrap(), 70.0));
}

#[test]
fn zero_override_is_an_explicit_value_not_a_reset() {
    let model = standard_model(false);
    let blue = leaf(&model, "Blue shirt");
    let idx = first_future_bucket(&model);

    model.set_measure_value(blue, "forecastbaseline", idx, 30.0).unwrap();
    model.set_measure_value(blue, "forecasttotal", idx, 0.0).unwrap();

    assert!(close(model.measure_value(blue, "forecastoverride", idx).unwrap(), 0.0));
    assert!(close(model.measure_value(blue, "forecasttotal", idx).unwrap(), 0.0));
}

#[test]
fn parent_keeps_an_explicit_zero_while_a_child_still_overrides() {
    let model = standard_model(false);
    let blue = leaf(&model, "Blue shirt");
    let red = leaf(&model, "Red shirt");
    let idx = first_future_bucket(&model);

    model.set_measure_value(blue, "forecastbaseline", idx, 30.0).unwrap();
    model.set_measure_value(red, "forecastbaseline", idx, 70.0).unwrap();
    let shirts = model.find_forecast("Shirts", "Store", "Web").unwrap().unwrap();

    model.set_measure_value(blue, "forecasttotal", idx, 35.0).unwrap();
    assert!(close(model.measure_value(shirts, "forecastoverride", idx).unwrap(), 35.0));

    // 把子节点覆盖压到零后上级覆盖净值也为零，
    // 但必须保留为显式 0 条目。
    model.set_measure_value(blue, "forecasttotal", idx, 0.0).unwrap();
    assert!(close(model.measure_value(blue, "forecastoverride", idx).unwrap(), 0.0));
    assert!(close(model.measure_value(shirts, "forecastoverride", idx).unwrap(), 0.0));
    assert!(close(model.measure_value(shirts, "forecasttotal", idx).unwrap(), 0.0));

    // 清掉最后一个子节点覆盖后上级条目也随之消失。
    model.set_measure_value(blue, "forecasttotal", idx, -1.0).unwrap();
    assert!(close(model.measure_value(shirts, "forecastoverride", idx).unwrap(), -1.0));
    assert!(close(model.measure_value(shirts, "forecasttotal", idx).unwrap(), 100.0));
}

#[test]
fn direct_parent_override_writes_spread_in_proportion_to_the_baseline() {
    let model = standard_model(false);
    let blue = leaf(&model, "Blue shirt");
    let red = leaf(&model, "Red shirt");
    let idx = first_future_bucket(&model);

    model.set_measure_value(blue, "forecastbaseline", idx, 30.0).unwrap();
    model.set_measure_value(red, "forecastbaseline", idx, 70.0).unwrap();
    let shirts = model.find_forecast("Shirts", "Store", "Web").unwrap().unwrap();

    // 在上级直接写 forecastoverride 必须走与编辑
    // forecasttotal 相同的模式机。
    model.set_measure_value(shirts, "forecastoverride", idx, 50.0).unwrap();
    assert!(close(model.measure_value(blue, "forecastoverride", idx).unwrap(), 15.0));
    assert!(close(model.measure_value(red, "forecastoverride", idx).unwrap(), 35.0));
    assert!(close(model.measure_value(shirts, "forecastoverride", idx).unwrap(), 50.0));
    assert!(close(model.measure_value(blue, "forecastbaseline", idx).unwrap(), 30.0));
    assert!(close(model.measure_value(red, "forecastbaseline", idx).unwrap(), 70.0));

    model.set_measure_value(shirts, "forecastoverride", idx, -1.0).unwrap();
    assert!(close(model.measure_value(blue, "forecastoverride", idx).unwrap(), -1.0));
    assert!(close(model.measure_value(red, "forecastoverride", idx).unwrap(), -1.0));
    assert!(close(model.measure_value(shirts, "forecasttotal", idx).unwrap(), 100.0));
}
