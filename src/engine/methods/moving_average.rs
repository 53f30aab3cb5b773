// ==========================================
// 预测立方体 - 移动平均方法
// ==========================================

use super::{filter_outliers, MethodContext, Metrics, EPS};

/// 最近 `order` 个桶上的简单移动平均
///
/// 求和始终除以完整的窗口长度，因此短于窗口的序列会
/// 给出偏保守的低预测。
pub struct MovingAverage {
    order: usize,
    avg: f64,
}

impl MovingAverage {
    pub fn new(order: usize) -> Self {
        MovingAverage {
            order: order.max(1),
            avg: 0.0,
        }
    }

    fn forecast_series(&self, history: &[f64]) -> Vec<f64> {
        let mut forecasts = vec![f64::NAN; history.len()];
        for i in 1..history.len() {
            let start = i.saturating_sub(self.order);
            let sum: f64 = history[start..i].iter().sum();
            forecasts[i] = sum / self.order as f64;
        }
        forecasts
    }

    pub fn solve(&mut self, ctx: &mut MethodContext<'_>, history: &mut [f64]) -> Metrics {
        let count = history.len();
        if count < 2 {
            return Metrics::unusable();
        }
        // 先扫描，过滤后在截断过的序列上再扫一遍
        let forecasts = self.forecast_series(history);
        filter_outliers(ctx, history, &forecasts, true);
        let forecasts = self.forecast_series(history);
        let mut smape = 0.0;
        let mut sum_weights = 0.0;
        let mut error2 = 0.0;
        let mut terms = 0usize;
        for i in 1..count {
            let f = forecasts[i];
            error2 += (f - history[i]).powi(2);
            terms += 1;
            if i >= ctx.config.skip && (f + history[i]).abs() > EPS {
                let w = ctx.weights[count - i];
                smape += (f - history[i]).abs() / (f + history[i]).abs() * w;
                sum_weights += w;
            }
        }
        let start = count.saturating_sub(self.order);
        self.avg = history[start..].iter().sum::<f64>() / self.order as f64;
        Metrics {
            smape: if sum_weights > 0.0 { smape / sum_weights } else { 0.0 },
            standard_deviation: if terms > 1 {
                (error2 / (terms as f64 - 1.0)).sqrt()
            } else {
                0.0
            },
            force: false,
        }
    }

    /// 平直投影: 取最近窗口的平均值
    pub fn project(&mut self) -> f64 {
        self.avg
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SolverConfig;
    use crate::engine::methods::time_series_weights;

    #[test]
    fn constant_history_forecasts_the_constant() {
        let config = SolverConfig::default();
        let history_src = vec![20.0; 24];
        let weights = time_series_weights(history_src.len(), config.smape_alfa);
        let mut ctx = MethodContext::new(&config, &weights);
        let mut history = history_src.clone();
        let mut method = MovingAverage::new(5);
        let metrics = method.solve(&mut ctx, &mut history);
        assert!(metrics.smape < 1e-9);
        assert!((method.project() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn short_series_divide_by_the_full_order() {
        let config = SolverConfig::default();
        let weights = time_series_weights(3, config.smape_alfa);
        let mut ctx = MethodContext::new(&config, &weights);
        let mut history = vec![10.0, 10.0, 10.0];
        let mut method = MovingAverage::new(5);
        method.solve(&mut ctx, &mut history);
        // 除以 5 而不是 3
        assert!((method.project() - 6.0).abs() < 1e-9);
    }
}
