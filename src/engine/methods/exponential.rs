// ==========================================
// 预测立方体 - 指数平滑方法
// ==========================================
// 单指数平滑处理纯水平序列，双指数 (Holt) 平滑处理带趋势序列。
// 两者都用 Levenberg-Marquardt 风格的迭代在加权单步预测误差
// 上调参。每轮调参迭代先做离群点扫描 pass，当最大偏差超出
// 允许带宽时再做过滤 pass，按当前参数把越界点截断。
// ==========================================

use super::{MethodContext, Metrics, ACCURACY, EPS};

// ==========================================
// 单指数平滑
// ==========================================

/// 只有水平项的指数平滑
pub struct SingleExponential {
    alfa: f64,
    level: f64,
}

impl SingleExponential {
    pub fn new(initial_alfa: f64) -> Self {
        SingleExponential {
            alfa: initial_alfa,
            level: 0.0,
        }
    }

    pub fn solve(&mut self, ctx: &mut MethodContext<'_>, history: &mut [f64]) -> Metrics {
        let count = history.len();
        let cfg = ctx.config;
        if count < cfg.skip + 5 {
            return Metrics::unusable();
        }
        let max_dev = cfg.forecast_max_deviation;
        let mut alfa = cfg.single_initial_alfa;
        let mut best_error = f64::MAX;
        let mut best_alfa = alfa;
        let mut best_smape = 0.0;
        let mut best_stddev = 0.0;
        let mut best_level = 0.0;
        let mut upper_hit = false;
        let mut lower_hit = false;
        for iteration in 1..=cfg.iterations {
            let mut stddev = 0.0;
            let mut maxdev = 0.0;
            let mut f = 0.0;
            let mut sum11 = 0.0;
            let mut sum12 = 0.0;
            let mut error = 0.0;
            let mut error_smape = 0.0;
            let mut smape_weights = 0.0;
            // 先做扫描 pass；只有最大偏差超出允许带宽时
            // 才执行过滤 pass
            for filtering in [false, true] {
                f = (history[0] + history[1] + history[2]) / 3.0;
                if filtering {
                    let band = max_dev * stddev;
                    let t: f64 = history[..3]
                        .iter()
                        .map(|&h| h.clamp(f - band, f + band))
                        .sum();
                    f = t / 3.0;
                }
                let mut df = 0.0;
                let mut scan_acc = 0.0;
                sum11 = 0.0;
                sum12 = 0.0;
                error = 0.0;
                error_smape = 0.0;
                smape_weights = 0.0;
                let mut cur = history[0];
                for i in 1..=count {
                    let prev = cur;
                    // 导数递推使用更新前的水平值
                    df = prev - f + (1.0 - alfa) * df;
                    f = prev * alfa + (1.0 - alfa) * f;
                    if i == count {
                        break;
                    }
                    cur = history[i];
                    if !filtering {
                        let e = f - cur;
                        scan_acc += e * e;
                        if e.abs() > maxdev {
                            maxdev = e.abs();
                        }
                    } else {
                        let band = max_dev * stddev;
                        if cur > f + band {
                            if iteration == 1 {
                                ctx.record_outlier(i, cur, (f + band).max(0.0));
                            }
                            cur = f + band;
                        } else if cur < f - band {
                            if iteration == 1 {
                                ctx.record_outlier(i, cur, (f - band).max(0.0));
                            }
                            cur = f - band;
                        }
                    }
                    let w = ctx.weights[count - i];
                    sum12 += df * (cur - f) * w;
                    sum11 += df * df * w;
                    if i >= cfg.skip {
                        error += (f - cur).powi(2) * w;
                        if (f + cur).abs() > EPS {
                            error_smape += (f - cur).abs() / (f + cur) * w;
                            smape_weights += w;
                        }
                    }
                }
                if !filtering {
                    stddev = (scan_acc / (count as f64 - 1.0)).sqrt();
                    if stddev < EPS || maxdev / stddev < max_dev {
                        break;
                    }
                }
            }
            if error < best_error {
                best_error = error;
                best_alfa = alfa;
                best_smape = if smape_weights > 0.0 { error_smape / smape_weights } else { 0.0 };
                best_stddev = stddev;
                best_level = f;
            }
            // 在正规方程上加 Marquardt 阻尼因子
            if (sum11 + error / iteration as f64).abs() > EPS {
                sum11 += error / iteration as f64;
            }
            if sum11.abs() < EPS {
                break;
            }
            let delta = sum12 / sum11;
            if delta.abs() < ACCURACY && iteration > 3 {
                break;
            }
            alfa += delta;
            if alfa > cfg.single_max_alfa {
                alfa = cfg.single_max_alfa;
                if upper_hit {
                    break;
                }
                upper_hit = true;
            } else if alfa < cfg.single_min_alfa {
                alfa = cfg.single_min_alfa;
                if lower_hit {
                    break;
                }
                lower_hit = true;
            }
        }
        self.alfa = best_alfa;
        self.level = best_level;
        Metrics {
            smape: best_smape.abs(),
            standard_deviation: best_stddev,
            force: false,
        }
    }

    /// 按拟合水平做平直投影
    pub fn project(&mut self) -> f64 {
        self.level
    }

    pub fn alfa(&self) -> f64 {
        self.alfa
    }
}

// ==========================================
// 双指数平滑
// ==========================================

/// Holt 平滑: 水平项加衰减趋势项
pub struct DoubleExponential {
    alfa: f64,
    gamma: f64,
    dampen: f64,
    constant: f64,
    trend: f64,
}

impl DoubleExponential {
    pub fn new(initial_alfa: f64, initial_gamma: f64, dampen_trend: f64) -> Self {
        DoubleExponential {
            alfa: initial_alfa,
            gamma: initial_gamma,
            dampen: dampen_trend,
            constant: 0.0,
            trend: 0.0,
        }
    }

    pub fn solve(&mut self, ctx: &mut MethodContext<'_>, history: &mut [f64]) -> Metrics {
        let count = history.len();
        let cfg = ctx.config;
        if count < cfg.skip + 5 {
            return Metrics::unusable();
        }
        let max_dev = cfg.forecast_max_deviation;
        let mut alfa = cfg.double_initial_alfa;
        let mut gamma = cfg.double_initial_gamma;
        let mut best_error = f64::MAX;
        let mut best = (alfa, gamma, 0.0, 0.0, 0.0, 0.0); // alfa, gamma, smape, 标准差, 常数项, 趋势项
        let mut boundary_hits = 0usize;
        for iteration in 1..=cfg.iterations {
            let mut stddev = 0.0;
            let mut maxdev = 0.0;
            let mut c = 0.0;
            let mut t = 0.0;
            let mut sum11 = 0.0;
            let mut sum12 = 0.0;
            let mut sum22 = 0.0;
            let mut sum13 = 0.0;
            let mut sum23 = 0.0;
            let mut error = 0.0;
            let mut error_smape = 0.0;
            let mut smape_weights = 0.0;
            for filtering in [false, true] {
                c = (history[0] + history[1] + history[2]) / 3.0;
                t = (history[3] - history[0]) / 3.0;
                if filtering {
                    // 各初始值按其对应的拟合位置截断；
                    // 过滤后的趋势初值取前三个点的跨度
                    let band = max_dev * stddev;
                    let h0 = history[0].clamp(c - band, c + band);
                    let h1 = history[1].clamp(c + t - band, c + t + band);
                    let h2 = history[2].clamp(c + 2.0 * t - band, c + 2.0 * t + band);
                    c = (h0 + h1 + h2) / 3.0;
                    t = (h2 - h0) / 3.0;
                }
                let mut dc_da = 0.0;
                let mut dc_dg = 0.0;
                let mut dt_da = 0.0;
                let mut dt_dg = 0.0;
                let mut df_da = 0.0;
                let mut df_dg = 0.0;
                let mut scan_acc = 0.0;
                sum11 = 0.0;
                sum12 = 0.0;
                sum22 = 0.0;
                sum13 = 0.0;
                sum23 = 0.0;
                error = 0.0;
                error_smape = 0.0;
                smape_weights = 0.0;
                let mut cur = history[0];
                for i in 1..=count {
                    let prev = cur;
                    let c_prev = c;
                    let t_prev = t;
                    c = prev * alfa + (1.0 - alfa) * (c_prev + t_prev);
                    t = gamma * (c - c_prev) + (1.0 - gamma) * t_prev;
                    if i == count {
                        break;
                    }
                    cur = history[i];
                    if !filtering {
                        let e = c + t - cur;
                        scan_acc += e * e;
                        if e.abs() > maxdev {
                            maxdev = e.abs();
                        }
                    } else {
                        let band = max_dev * stddev;
                        if cur > c + t + band {
                            if iteration == 1 {
                                ctx.record_outlier(i, cur, (c + t + band).max(0.0));
                            }
                            cur = c + t + band;
                        } else if cur < c + t - band {
                            if iteration == 1 {
                                ctx.record_outlier(i, cur, (c + t - band).max(0.0));
                            }
                            cur = c + t - band;
                        }
                    }
                    let dc_da_prev = dc_da;
                    let dc_dg_prev = dc_dg;
                    dc_da = prev - c_prev - t_prev + (1.0 - alfa) * df_da;
                    dc_dg = (1.0 - alfa) * df_dg;
                    dt_da = gamma * (dc_da - dc_da_prev) + (1.0 - gamma) * dt_da;
                    dt_dg = c - c_prev - t_prev + gamma * (dc_dg - dc_dg_prev)
                        + (1.0 - gamma) * dt_dg;
                    df_da = dc_da + dt_da;
                    df_dg = dc_dg + dt_dg;
                    let w = ctx.weights[count - i];
                    sum11 += w * df_da * df_da;
                    sum12 += w * df_da * df_dg;
                    sum22 += w * df_dg * df_dg;
                    sum13 += w * df_da * (cur - c - t);
                    sum23 += w * df_dg * (cur - c - t);
                    if i >= cfg.skip {
                        error += (c + t - cur).powi(2) * w;
                        if (c + t + cur).abs() > EPS {
                            error_smape += (c + t - cur).abs() / (c + t + cur).abs() * w;
                            smape_weights += w;
                        }
                    }
                }
                if !filtering {
                    stddev = (scan_acc / (count as f64 - 1.0)).sqrt();
                    if stddev < EPS || maxdev / stddev < max_dev {
                        break;
                    }
                }
            }
            if error < best_error {
                best_error = error;
                best = (
                    alfa,
                    gamma,
                    if smape_weights > 0.0 { error_smape / smape_weights } else { 0.0 },
                    stddev,
                    c,
                    t,
                );
            }
            let damping = error / iteration as f64;
            sum11 += damping;
            sum22 += damping;
            let mut det = sum11 * sum22 - sum12 * sum12;
            if det.abs() < EPS {
                sum11 -= damping;
                sum22 -= damping;
                det = sum11 * sum22 - sum12 * sum12;
                if det.abs() < EPS {
                    break;
                }
            }
            let delta_alfa = (sum13 * sum22 - sum23 * sum12) / det;
            let delta_gamma = (sum23 * sum11 - sum13 * sum12) / det;
            if delta_alfa.abs() + delta_gamma.abs() < 2.0 * ACCURACY && iteration > 3 {
                break;
            }
            alfa += delta_alfa;
            gamma += delta_gamma;
            if alfa > cfg.double_max_alfa {
                alfa = cfg.double_max_alfa;
            } else if alfa < cfg.double_min_alfa {
                alfa = cfg.double_min_alfa;
            }
            if gamma > cfg.double_max_gamma {
                gamma = cfg.double_max_gamma;
            } else if gamma < cfg.double_min_gamma {
                gamma = cfg.double_min_gamma;
            }
            let alfa_bound = alfa == cfg.double_min_alfa || alfa == cfg.double_max_alfa;
            let gamma_bound = gamma == cfg.double_min_gamma || gamma == cfg.double_max_gamma;
            if alfa_bound && gamma_bound {
                boundary_hits += 1;
                if boundary_hits > 5 {
                    break;
                }
            }
        }
        let (best_alfa, best_gamma, best_smape, best_stddev, best_c, best_t) = best;
        self.alfa = best_alfa;
        self.gamma = best_gamma;
        self.constant = best_c;
        self.trend = best_t;
        Metrics {
            smape: best_smape,
            standard_deviation: best_stddev,
            force: false,
        }
    }

    /// 向前投影一步，趋势项逐桶衰减
    pub fn project(&mut self) -> f64 {
        self.constant += self.trend;
        self.trend *= self.dampen;
        self.constant
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SolverConfig;
    use crate::engine::methods::time_series_weights;

    fn context_for(count: usize, config: &SolverConfig) -> Vec<f64> {
        time_series_weights(count, config.smape_alfa)
    }

    #[test]
    fn single_locks_onto_a_constant_series() {
        let config = SolverConfig::default();
        let mut history = vec![50.0; 30];
        let weights = context_for(history.len(), &config);
        let mut ctx = MethodContext::new(&config, &weights);
        let mut method = SingleExponential::new(config.single_initial_alfa);
        let metrics = method.solve(&mut ctx, &mut history);
        assert!(metrics.smape < 1e-9);
        assert!((method.project() - 50.0).abs() < 1e-6);
    }

    #[test]
    fn single_refuses_a_short_series() {
        let config = SolverConfig::default();
        let mut history = vec![50.0; config.skip + 4];
        let weights = context_for(history.len(), &config);
        let mut ctx = MethodContext::new(&config, &weights);
        let mut method = SingleExponential::new(config.single_initial_alfa);
        let metrics = method.solve(&mut ctx, &mut history);
        assert_eq!(metrics.smape, f64::MAX);
    }

    #[test]
    fn single_reclamps_a_spike_on_every_iteration() {
        let config = SolverConfig::default();
        let mut history = vec![10.0; 30];
        history[20] = 500.0;
        let weights = context_for(history.len(), &config);
        let mut ctx = MethodContext::new(&config, &weights);
        let mut method = SingleExponential::new(config.single_initial_alfa);
        let metrics = method.solve(&mut ctx, &mut history);
        // 尖峰只上报一次且序列本身保持原样，
        // 截断只发生在拟合内部
        assert_eq!(ctx.outliers.len(), 1);
        assert_eq!(ctx.outliers[0].position, 20);
        assert_eq!(history[20], 500.0);
        assert!(metrics.smape < 0.2);
        assert!(method.project() < 100.0);
    }

    #[test]
    fn double_follows_a_linear_trend() {
        let config = SolverConfig::default();
        let mut history: Vec<f64> = (0..30).map(|i| 100.0 + 5.0 * i as f64).collect();
        let weights = context_for(history.len(), &config);
        let mut ctx = MethodContext::new(&config, &weights);
        let mut method =
            DoubleExponential::new(config.double_initial_alfa, config.double_initial_gamma, 1.0);
        let metrics = method.solve(&mut ctx, &mut history);
        assert!(metrics.smape < 0.05);
        let next = method.project();
        // 下一个值延续每桶 +5 的趋势
        assert!((next - 250.0).abs() < 10.0);
    }

    #[test]
    fn double_dampens_the_projected_trend() {
        let mut method = DoubleExponential::new(0.2, 0.2, 0.5);
        method.constant = 100.0;
        method.trend = 10.0;
        let first = method.project();
        let second = method.project();
        assert!((first - 110.0).abs() < 1e-9);
        assert!((second - 115.0).abs() < 1e-9);
    }
}
