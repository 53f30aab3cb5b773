// ==========================================
// 预测立方体 - 仓储层
// ==========================================
// 职责: 立方体背后的数据访问，不含业务逻辑
// 约束: 所有查询参数化
// ==========================================

pub mod error;
pub mod forecast_plan_repo;

pub use error::{RepositoryError, RepositoryResult};
pub use forecast_plan_repo::{ForecastPlanRepository, PlanRow};
