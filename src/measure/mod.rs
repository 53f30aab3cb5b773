// ==========================================
// 预测立方体 - 度量层
// ==========================================
// 职责: 度量目录、编译后的表达式以及作用于立方体存储
// 的度量代数
// ==========================================

pub mod algebra;
pub mod catalogue;
pub mod compute;

pub use catalogue::{Measure, MeasureCatalogue, MeasureDefinition, MeasureKind};
pub use compute::CompiledExpression;
