// ==========================================
// 预测立方体 - 时间序列方法
// ==========================================
// 职责: 按时间序列竞争的候选预测方法。每个方法在需求历史上
// 自行拟合，对照自身的单步预测做离群点过滤，并报告加权对称
// 误差；求解器选出胜者并投影到未来桶。
// ==========================================

pub mod croston;
pub mod exponential;
pub mod manual;
pub mod moving_average;
pub mod seasonal;

pub use croston::Croston;
pub use exponential::{DoubleExponential, SingleExponential};
pub use manual::Manual;
pub use moving_average::MovingAverage;
pub use seasonal::Seasonal;

use crate::config::SolverConfig;
use crate::domain::types::AppliedMethod;

/// 方法读取历史长度的上限
pub const MAX_BUCKETS: usize = 500;

/// 参数调优的收敛阈值
pub const ACCURACY: f64 = 0.01;

const EPS: f64 = 1e-10;

/// 单个候选方法的拟合质量
#[derive(Debug, Clone, Copy)]
pub struct Metrics {
    /// 加权对称平均绝对百分比误差
    pub smape: f64,
    /// 单步预测误差的标准差
    pub standard_deviation: f64,
    /// 无论误差如何都强制采用本方法
    pub force: bool,
}

impl Metrics {
    pub fn unusable() -> Self {
        Metrics {
            smape: f64::MAX,
            standard_deviation: f64::MAX,
            force: false,
        }
    }
}

/// 拟合过程中被方法截断的一个历史点
#[derive(Debug, Clone, Copy)]
pub struct OutlierHit {
    /// 在被过滤时间序列中的位置
    pub position: usize,
    pub observed: f64,
    pub admitted: f64,
}

/// 共享的拟合上下文: 调参配置、误差权重以及当前方法
/// 截断的离群点
pub struct MethodContext<'a> {
    pub config: &'a SolverConfig,
    pub weights: &'a [f64],
    pub outliers: Vec<OutlierHit>,
}

impl<'a> MethodContext<'a> {
    pub fn new(config: &'a SolverConfig, weights: &'a [f64]) -> Self {
        MethodContext {
            config,
            weights,
            outliers: Vec::new(),
        }
    }

    pub fn record_outlier(&mut self, position: usize, observed: f64, admitted: f64) {
        self.outliers.push(OutlierHit {
            position,
            observed,
            admitted,
        });
    }
}

/// 各历史位置的误差权重: 最近的桶权重为 1，每向前一步
/// 按 `alfa` 衰减。以距序列末尾的距离为下标。
pub fn time_series_weights(count: usize, alfa: f64) -> Vec<f64> {
    let mut weights = Vec::with_capacity(count + 1);
    let mut w = 1.0;
    for _ in 0..=count {
        weights.push(w);
        w *= alfa;
    }
    weights
}

/// 截断偏离方法自身单步预测过远的历史点
///
/// `forecasts[i]` 是方法对 `history[i]` 的预测；预热期之前的
/// 条目可能是 NaN，会被跳过。最大偏差仍在允许带宽内时
/// 什么都不做。
pub(crate) fn filter_outliers(
    ctx: &mut MethodContext<'_>,
    history: &mut [f64],
    forecasts: &[f64],
    clamp_low: bool,
) {
    let count = history.len();
    if count < 2 {
        return;
    }
    let mut error2 = 0.0;
    let mut maxdev = 0.0;
    let mut terms = 0usize;
    for i in 0..count {
        if forecasts[i].is_nan() {
            continue;
        }
        let e = forecasts[i] - history[i];
        error2 += e * e;
        terms += 1;
        if e.abs() > maxdev {
            maxdev = e.abs();
        }
    }
    if terms < 2 {
        return;
    }
    let stddev = (error2 / (terms as f64 - 1.0)).sqrt();
    if stddev < EPS || maxdev / stddev <= ctx.config.forecast_max_deviation {
        return;
    }
    let band = ctx.config.forecast_max_deviation * stddev;
    for i in 0..count {
        if forecasts[i].is_nan() {
            continue;
        }
        if history[i] > forecasts[i] + band {
            let admitted = (forecasts[i] + band).max(0.0);
            ctx.record_outlier(i, history[i], admitted);
            history[i] = admitted;
        } else if clamp_low && history[i] < forecasts[i] - band {
            let admitted = (forecasts[i] - band).max(0.0);
            ctx.record_outlier(i, history[i], admitted);
            history[i] = admitted;
        }
    }
}

/// 预测方法的封闭集合
pub enum Method {
    MovingAverage(MovingAverage),
    SingleExponential(SingleExponential),
    DoubleExponential(DoubleExponential),
    Seasonal(Seasonal),
    Croston(Croston),
    Manual(Manual),
}

impl Method {
    /// 在（可变、已过滤离群点的）历史上拟合
    pub fn solve(&mut self, ctx: &mut MethodContext<'_>, history: &mut [f64]) -> Metrics {
        match self {
            Method::MovingAverage(m) => m.solve(ctx, history),
            Method::SingleExponential(m) => m.solve(ctx, history),
            Method::DoubleExponential(m) => m.solve(ctx, history),
            Method::Seasonal(m) => m.solve(ctx, history),
            Method::Croston(m) => m.solve(ctx, history),
            Method::Manual(m) => m.solve(ctx, history),
        }
    }

    /// 预测下一个未来桶并推进内部状态
    pub fn project(&mut self) -> f64 {
        match self {
            Method::MovingAverage(m) => m.project(),
            Method::SingleExponential(m) => m.project(),
            Method::DoubleExponential(m) => m.project(),
            Method::Seasonal(m) => m.project(),
            Method::Croston(m) => m.project(),
            Method::Manual(m) => m.project(),
        }
    }

    pub fn applied(&self) -> AppliedMethod {
        match self {
            Method::MovingAverage(_) => AppliedMethod::MovingAverage,
            Method::SingleExponential(_) => AppliedMethod::Constant,
            Method::DoubleExponential(_) => AppliedMethod::Trend,
            Method::Seasonal(_) => AppliedMethod::Seasonal,
            Method::Croston(_) => AppliedMethod::Intermittent,
            Method::Manual(_) => AppliedMethod::Manual,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_decay_from_the_most_recent_bucket() {
        let w = time_series_weights(3, 0.95);
        assert_eq!(w.len(), 4);
        assert_eq!(w[0], 1.0);
        assert!((w[1] - 0.95).abs() < 1e-12);
        assert!(w[3] < w[2]);
    }

    #[test]
    fn filtering_leaves_a_tight_series_alone() {
        let config = SolverConfig::default();
        let weights = time_series_weights(6, config.smape_alfa);
        let mut ctx = MethodContext::new(&config, &weights);
        let mut history = [10.0, 10.5, 9.5, 10.0, 10.2, 9.8];
        let forecasts = [10.0; 6];
        filter_outliers(&mut ctx, &mut history, &forecasts, true);
        assert!(ctx.outliers.is_empty());
        assert_eq!(history[3], 10.0);
    }

    #[test]
    fn filtering_clamps_a_spike() {
        let config = SolverConfig::default();
        let weights = time_series_weights(8, config.smape_alfa);
        let mut ctx = MethodContext::new(&config, &weights);
        let mut history = [10.0, 10.0, 10.0, 10.0, 500.0, 10.0, 10.0, 10.0];
        let forecasts = [10.0; 8];
        filter_outliers(&mut ctx, &mut history, &forecasts, true);
        assert_eq!(ctx.outliers.len(), 1);
        assert_eq!(ctx.outliers[0].position, 4);
        assert!(history[4] < 500.0);
        assert!(history[4] > 10.0);
    }
}
