// ==========================================
// 预测立方体 - 领域层
// ==========================================
// 职责: 预测格点阵的标识、层级、日历与节点级配置
// 红线: 不访问存储，不含求解器逻辑
// ==========================================

pub mod calendar;
pub mod error;
pub mod forecast;
pub mod hierarchy;
pub mod types;

// 重导出核心类型
pub use calendar::{Calendar, CalendarBucket};
pub use error::{ForecastError, ForecastResult};
pub use forecast::{ForecastDefinition, ForecastKind, ForecastNode, ForecastRegistry};
pub use hierarchy::{Dimension, DimensionNode};
pub use types::{
    method_flags, methods_to_string, parse_methods, AppliedMethod, DueWithinBucket, ForecastId,
    MeasureId, NodeId, ResetRange, ROUNDING_ERROR,
};
