// ==========================================
// forecast-cube 库根
// ==========================================
// 多维需求预测立方体: 预测节点位于物料、地点、客户三个层级
// 的笛卡尔积上，携带按桶的稀疏度量，由多个时间序列方法竞争
// 的求解器填充。
//
// 分层:
// - domain:     维度、日历、预测注册表、错误
// - store:      度量池、立方体桶、需求记录
// - measure:    度量目录、表达式、立方体代数
// - model:      聚合根，串联所有部件
// - engine:     预测方法与求解器
// - repository: forecastplan 表的 SQLite 持久化
// - config:     设置与求解器调参
// ==========================================

pub mod config;
pub mod db;
pub mod domain;
pub mod engine;
pub mod logging;
pub mod measure;
pub mod model;
pub mod repository;
pub mod store;

pub use config::{AppConfig, ForecastSettings, SolverConfig};
pub use domain::{
    Calendar, CalendarBucket, Dimension, ForecastDefinition, ForecastError, ForecastNode,
    ForecastRegistry, ForecastResult,
};
pub use engine::{ForecastSolver, SolveResult};
pub use measure::{Measure, MeasureCatalogue};
pub use model::ForecastModel;
pub use repository::{ForecastPlanRepository, PlanRow};
