// ==========================================
// 预测立方体 - 手工方法
// ==========================================

use super::{MethodContext, Metrics};

/// 不做自动预测: 基线保持为空，由计划员手工录入未来值
#[derive(Default)]
pub struct Manual;

impl Manual {
    pub fn new() -> Self {
        Manual
    }

    pub fn solve(&mut self, _ctx: &mut MethodContext<'_>, _history: &mut [f64]) -> Metrics {
        Metrics {
            smape: 0.0,
            standard_deviation: 0.0,
            force: true,
        }
    }

    pub fn project(&mut self) -> f64 {
        0.0
    }
}
