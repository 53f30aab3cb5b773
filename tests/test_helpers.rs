// ==========================================
// 集成测试共享夹具
// ==========================================
// 周日历上的双物料小模型: 物料树为
// All items -> Shirts -> {Blue shirt, Red shirt}；地点和
// 客户各自只有根下一个叶子。
// ==========================================

#![allow(dead_code)]

use chrono::{Duration, NaiveDate, NaiveDateTime};

use forecast_cube::config::ForecastSettings;
use forecast_cube::domain::types::{DueWithinBucket, ForecastId};
use forecast_cube::domain::{Calendar, Dimension, ForecastDefinition};
use forecast_cube::model::ForecastModel;

pub const HISTORY_WEEKS: usize = 30;
pub const FUTURE_WEEKS: usize = 12;

/// 预测区间起始的那个周一
pub fn fcst_current() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 6, 3)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

/// 预测日期前后的周桶
pub fn weekly_calendar(history_weeks: usize, future_weeks: usize) -> Calendar {
    let first = fcst_current() - Duration::weeks(history_weeks as i64);
    let starts: Vec<NaiveDateTime> = (0..=(history_weeks + future_weeks))
        .map(|i| first + Duration::weeks(i as i64))
        .collect();
    Calendar::from_starts(
        &starts,
        fcst_current(),
        fcst_current(),
        3650,
        1095,
        DueWithinBucket::Middle,
    )
    .unwrap()
}

fn dimensions() -> (Dimension, Dimension, Dimension) {
    let mut items = Dimension::new("item");
    let all = items.add("All items", None).unwrap();
    let shirts = items.add("Shirts", Some(all)).unwrap();
    items.add_with_cost("Blue shirt", Some(shirts), 12.5).unwrap();
    items.add_with_cost("Red shirt", Some(shirts), 8.0).unwrap();

    let mut locations = Dimension::new("location");
    let all = locations.add("All locations", None).unwrap();
    locations.add("Store", Some(all)).unwrap();

    let mut customers = Dimension::new("customer");
    let all = customers.add("All customers", None).unwrap();
    customers.add("Web", Some(all)).unwrap();

    (items, locations, customers)
}

/// 每件衬衫一个叶子预测的模型，两者都是计划节点
pub fn standard_model(discrete: bool) -> ForecastModel {
    let (items, locations, customers) = dimensions();
    let calendar = weekly_calendar(HISTORY_WEEKS, FUTURE_WEEKS);
    let model = ForecastModel::new(
        items,
        locations,
        customers,
        calendar,
        ForecastSettings::default(),
    )
    .unwrap();
    for item in ["Blue shirt", "Red shirt"] {
        let mut def = ForecastDefinition::new(
            &format!("{item} / Store / Web"),
            model.items().find(item).unwrap(),
            model.locations().find("Store").unwrap(),
            model.customers().find("Web").unwrap(),
        );
        def.discrete = discrete;
        model.create_forecast(def).unwrap();
    }
    model
}

pub fn leaf(model: &ForecastModel, item: &str) -> ForecastId {
    model
        .find_forecast(item, "Store", "Web")
        .unwrap()
        .unwrap_or_else(|| panic!("no forecast for {item}"))
}

/// 预测日期之后第一个桶的下标
pub fn first_future_bucket(model: &ForecastModel) -> usize {
    model
        .calendar()
        .buckets()
        .iter()
        .position(|b| b.end > fcst_current())
        .unwrap()
}
