// ==========================================
// 预测立方体 - 引擎层
// ==========================================
// 职责: 统计预测引擎。`methods` 存放各时间序列方法，
// `solver` 按预测节点让它们竞争并把胜者应用到模型。
// ==========================================

pub mod methods;
pub mod solver;

pub use methods::{Method, MethodContext, Metrics, OutlierHit};
pub use solver::{ForecastSolver, SolveResult};
