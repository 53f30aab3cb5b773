// ==========================================
// 预测层级集成测试
// ==========================================

mod test_helpers;

use forecast_cube::domain::ForecastDefinition;
use test_helpers::*;

#[test]
fn parents_cover_every_ancestor_combination() {
    let model = standard_model(false);
    let blue = leaf(&model, "Blue shirt");

    let parents = model.parents(blue).unwrap();
    // 物料链深 3，地点和客户链深 2: 3*2*2 个组合
    // 减去节点自身。
    assert_eq!(parents.len(), 11);
    assert!(!parents.contains(&blue));

    let names: Vec<String> = parents
        .iter()
        .map(|&p| model.node(p).unwrap().name.clone())
        .collect();
    assert!(names.contains(&"Shirts / Store / Web".to_string()));
    assert!(names.contains(&"All items / All locations / All customers".to_string()));
}

#[test]
fn leaves_of_the_root_are_the_explicit_forecasts() {
    let model = standard_model(false);
    let blue = leaf(&model, "Blue shirt");
    model.parents(blue).unwrap();

    let top = model
        .find_forecast("All items", "All locations", "All customers")
        .unwrap()
        .unwrap();
    let mut names: Vec<String> = model
        .leaves(top, false, None)
        .unwrap()
        .iter()
        .map(|&id| model.node(id).unwrap().name.clone())
        .collect();
    names.sort();
    assert_eq!(
        names,
        vec!["Blue shirt / Store / Web", "Red shirt / Store / Web"]
    );
}

#[test]
fn duplicate_forecasts_are_rejected() {
    let model = standard_model(false);
    let def = ForecastDefinition::new(
        "Blue again",
        model.items().find("Blue shirt").unwrap(),
        model.locations().find("Store").unwrap(),
        model.customers().find("Web").unwrap(),
    );
    let err = model.create_forecast(def).unwrap_err();
    assert!(err.to_string().contains("duplicate"), "unexpected error: {err}");
}

#[test]
fn methods_round_trip_through_their_textual_form() {
    let model = standard_model(false);
    let blue = leaf(&model, "Blue shirt");

    assert_eq!(model.methods_string(blue).unwrap(), "automatic");
    model.set_methods_string(blue, "constant,manual").unwrap();
    assert_eq!(model.methods_string(blue).unwrap(), "constant,manual");
    model.set_methods_string(blue, "manual").unwrap();
    assert_eq!(model.methods_string(blue).unwrap(), "manual");
    model.set_methods_string(blue, "automatic").unwrap();
    assert_eq!(model.methods_string(blue).unwrap(), "automatic");
}

#[test]
fn aggregates_are_synthesized_lazily() {
    let model = standard_model(false);
    assert!(model
        .find_forecast("Shirts", "Store", "Web")
        .unwrap()
        .is_none());

    let blue = leaf(&model, "Blue shirt");
    model.parents(blue).unwrap();

    let shirts = model.find_forecast("Shirts", "Store", "Web").unwrap();
    assert!(shirts.is_some());
    assert!(!model.is_leaf(shirts.unwrap()).unwrap());
}
