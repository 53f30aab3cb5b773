// ==========================================
// 预测立方体 - 间歇性需求方法
// ==========================================
// Croston 方法: 对非零需求量和需求间隔分别做指数平滑。
// 平滑常数在简单网格上调优；需求完全停止后预测按衰减
// 处理，而不是永远保持平直。
// ==========================================

use super::{filter_outliers, MethodContext, Metrics, EPS};

pub struct Croston {
    alfa: f64,
    forecast: f64,
    decay: f64,
}

impl Croston {
    pub fn new(initial_alfa: f64, decay_rate: f64) -> Self {
        Croston {
            alfa: initial_alfa,
            forecast: 0.0,
            decay: decay_rate,
        }
    }

    pub fn solve(&mut self, ctx: &mut MethodContext<'_>, history: &mut [f64]) -> Metrics {
        let cfg = ctx.config;
        let count = history.len();
        let mut nonzero = 0usize;
        let mut total = 0.0;
        let mut last_nonzero = 0usize;
        for (i, v) in history.iter().enumerate() {
            if *v != 0.0 {
                nonzero += 1;
                total += *v;
                last_nonzero = i;
            }
        }
        if nonzero == 0 {
            self.forecast = 0.0;
            return Metrics {
                smape: 0.0,
                standard_deviation: 0.0,
                force: false,
            };
        }
        let periods_between = count as f64 / nonzero as f64;
        let steps = cfg.iterations.max(2);
        let mut best_error = f64::MAX;
        let mut best_alfa = cfg.croston_min_alfa;
        let mut best_forecast = 0.0;
        let mut best_stddev = 0.0;
        // 间隔状态有意跨网格保留: 每一轮从上一轮的
        // 终点继续
        let mut between = 1.0_f64;
        for step in 0..steps {
            let alfa = cfg.croston_min_alfa
                + (cfg.croston_max_alfa - cfg.croston_min_alfa) * step as f64 / (steps - 1) as f64;
            let mut q = total / nonzero as f64;
            let mut p = count as f64 / nonzero as f64;
            let mut f = (1.0 - alfa / 2.0) * q / p;
            let mut smape = 0.0;
            let mut sum_weights = 0.0;
            let mut error2 = 0.0;
            for i in 1..=count {
                if i < count && i >= cfg.skip {
                    let w = ctx.weights[count - i];
                    error2 += (f - history[i]).powi(2);
                    if (f + history[i]).abs() > EPS {
                        smape += (f - history[i]).abs() / (f + history[i]).abs() * w;
                        sum_weights += w;
                    }
                }
                if history[i - 1] != 0.0 {
                    q = alfa * history[i - 1] + (1.0 - alfa) * q;
                    p = alfa * between + (1.0 - alfa) * p;
                    f = (1.0 - alfa / 2.0) * q / p;
                    between = 1.0;
                } else if i > last_nonzero && between > 2.0 * periods_between {
                    // 需求看起来已经消失: 衰减预测值
                    f *= 1.0 - self.decay;
                    if f.abs() > EPS {
                        p = (1.0 - alfa / 2.0) * q / f;
                    }
                } else {
                    between += 1.0;
                }
            }
            let smape = if sum_weights > 0.0 { smape / sum_weights } else { 0.0 };
            // 误差相同时取更大的平滑常数
            if smape <= best_error {
                best_error = smape;
                best_alfa = alfa;
                best_forecast = f;
                best_stddev = if count > 1 {
                    (error2 / (count as f64 - 1.0)).sqrt()
                } else {
                    0.0
                };
            }
        }
        self.alfa = best_alfa;
        self.forecast = best_forecast;
        // 间歇序列只做向上越界的截断
        let flat: Vec<f64> = vec![best_forecast; count];
        filter_outliers(ctx, history, &flat, false);
        Metrics {
            smape: best_error,
            standard_deviation: best_stddev,
            force: false,
        }
    }

    /// 按拟合的需求速率做平直投影
    pub fn project(&mut self) -> f64 {
        self.forecast
    }

    pub fn alfa(&self) -> f64 {
        self.alfa
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SolverConfig;
    use crate::engine::methods::time_series_weights;

    #[test]
    fn all_zero_history_forecasts_zero() {
        let config = SolverConfig::default();
        let mut history = vec![0.0; 20];
        let weights = time_series_weights(history.len(), config.smape_alfa);
        let mut ctx = MethodContext::new(&config, &weights);
        let mut method = Croston::new(config.croston_initial_alfa, config.croston_decay_rate);
        let metrics = method.solve(&mut ctx, &mut history);
        assert_eq!(metrics.smape, 0.0);
        assert_eq!(method.project(), 0.0);
    }

    #[test]
    fn sparse_demand_forecasts_the_demand_rate() {
        let config = SolverConfig::default();
        // 每 4 桶一次 12: 长期速率为每桶 3
        let mut history: Vec<f64> = (0..40)
            .map(|i| if i % 4 == 0 { 12.0 } else { 0.0 })
            .collect();
        let weights = time_series_weights(history.len(), config.smape_alfa);
        let mut ctx = MethodContext::new(&config, &weights);
        let mut method = Croston::new(config.croston_initial_alfa, config.croston_decay_rate);
        method.solve(&mut ctx, &mut history);
        let f = method.project();
        assert!(f > 1.0 && f < 6.0, "rate forecast out of range: {}", f);
    }
}
