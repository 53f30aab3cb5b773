// ==========================================
// 预测立方体 - 季节性方法
// ==========================================
// Holt-Winters 乘法平滑。先用自相关峰值搜索确定季节周期；
// 找不到可信周期时本方法报告不可用，由非季节性候选方法竞争。
// 平滑参数与指数平滑方法共用同一套带阻尼的 Gauss-Newton 迭代，
// 季节指数携带各自的偏导数数组。
// ==========================================

use super::{MethodContext, Metrics, ACCURACY, EPS};
use crate::config::SolverConfig;

/// 检测到的需求周期
#[derive(Debug, Clone, Copy)]
pub struct Cycle {
    pub period: usize,
    pub autocorrelation: f64,
}

/// Holt-Winters 平滑，季节指数为乘法形式
pub struct Seasonal {
    alfa: f64,
    beta: f64,
    gamma: f64,
    dampen: f64,
    period: usize,
    autocorrelation: f64,
    level: f64,
    trend: f64,
    seasons: Vec<f64>,
    cycle_position: usize,
}

impl Seasonal {
    pub fn new(cfg: &SolverConfig) -> Self {
        Seasonal {
            alfa: cfg.seasonal_initial_alfa,
            beta: cfg.seasonal_initial_beta,
            gamma: cfg.seasonal_gamma,
            dampen: cfg.seasonal_dampen_trend,
            period: 0,
            autocorrelation: 0.0,
            level: 0.0,
            trend: 0.0,
            seasons: Vec::new(),
            cycle_position: 0,
        }
    }

    /// 在允许的周期范围内做自相关峰值搜索
    ///
    /// 某个滞后的自相关明显高于左右邻居时视为周期候选，
    /// 取最强的峰值。
    pub fn detect_cycle(history: &[f64], cfg: &SolverConfig) -> Option<Cycle> {
        let count = history.len();
        if count < 2 * cfg.seasonal_min_period {
            return None;
        }
        let max_lag = cfg.seasonal_max_period.min(count / 2) + 1;
        if max_lag < cfg.seasonal_min_period {
            return None;
        }
        let mean = history.iter().sum::<f64>() / count as f64;
        let variance: f64 = history.iter().map(|v| (v - mean).powi(2)).sum::<f64>();
        if variance < EPS {
            return None;
        }
        let autocorrelation = |lag: usize| -> f64 {
            let mut acc = 0.0;
            for i in lag..count {
                acc += (history[i] - mean) * (history[i - lag] - mean);
            }
            acc / variance
        };
        let ac: Vec<f64> = (0..=max_lag).map(autocorrelation).collect();
        let mut best: Option<Cycle> = None;
        for period in cfg.seasonal_min_period..=max_lag.saturating_sub(1) {
            let here = ac[period];
            let before = ac[period - 1];
            let after = ac[period + 1];
            let sharp_peak = here > 1.1 * before && here > 1.1 * after;
            let broad_peak = period >= 2
                && (before + here + after) / 3.0 > ac[period - 2].max(ac[(period + 1).min(max_lag)]);
            if !(sharp_peak || broad_peak) {
                continue;
            }
            if here < cfg.seasonal_min_autocorrelation {
                continue;
            }
            if best.map(|b| here > b.autocorrelation).unwrap_or(true) {
                best = Some(Cycle {
                    period,
                    autocorrelation: here,
                });
            }
        }
        best
    }

    /// 平滑递推的初始值: 水平取第一个周期的均值，趋势取
    /// 第一到第二个周期的逐位差均值，季节指数在所有完整
    /// 周期上取平均。
    fn initial_state(history: &[f64], period: usize) -> (f64, f64, Vec<f64>) {
        let pf = period as f64;
        let mut level = 0.0;
        let mut trend = 0.0;
        for i in 0..period {
            level += history[i];
            trend += history[i + period] - history[i];
        }
        level /= pf;
        trend /= pf;
        let mut seasons = vec![0.0; period];
        let mut cycles = 0usize;
        let mut start = 0;
        while start + period <= history.len() {
            cycles += 1;
            let cycle_sum: f64 = history[start..start + period].iter().sum();
            if cycle_sum.abs() > EPS {
                for j in 0..period {
                    seasons[j] += history[start + j] / cycle_sum * pf;
                }
            }
            start += period;
        }
        for s in seasons.iter_mut() {
            *s /= cycles as f64;
        }
        (level, trend, seasons)
    }

    pub fn solve(&mut self, ctx: &mut MethodContext<'_>, history: &mut [f64]) -> Metrics {
        let cfg = ctx.config;
        let count = history.len();
        let cycle = match Self::detect_cycle(history, cfg) {
            Some(c) => c,
            None => return Metrics::unusable(),
        };
        self.period = cycle.period;
        self.autocorrelation = cycle.autocorrelation;
        let period = cycle.period;
        let pf = period as f64;
        if count < 2 * period + 1 {
            return Metrics::unusable();
        }
        let (level_seed, trend_seed, season_seed) = Self::initial_state(history, period);
        let gamma = self.gamma;
        let mut alfa = cfg.seasonal_initial_alfa;
        let mut beta = cfg.seasonal_initial_beta;
        let mut best_error = f64::MAX;
        let mut best_alfa = alfa;
        let mut best_beta = beta;
        let mut best_smape = 0.0;
        let mut best_stddev = 0.0;
        let mut best_level = level_seed;
        let mut best_trend = trend_seed;
        let mut best_seasons = season_seed.clone();
        let mut boundary_hits = 0usize;
        let mut d_s_da = vec![0.0; period];
        let mut d_s_db = vec![0.0; period];
        for iteration in 1..=cfg.iterations {
            let mut level = level_seed;
            let mut trend = trend_seed;
            let mut seasons = season_seed.clone();
            d_s_da.iter_mut().for_each(|v| *v = 0.0);
            d_s_db.iter_mut().for_each(|v| *v = 0.0);
            let mut dl_da = 0.0;
            let mut dl_db = 0.0;
            let mut dt_da = 0.0;
            let mut dt_db = 0.0;
            let mut sum11 = 0.0;
            let mut sum12 = 0.0;
            let mut sum22 = 0.0;
            let mut sum13 = 0.0;
            let mut sum23 = 0.0;
            let mut error = 0.0;
            let mut error_smape = 0.0;
            let mut smape_weights = 0.0;
            let mut std_acc = 0.0;
            // 覆盖前 period 个观测值的滑动窗口
            let mut cyclesum: f64 = history[..period - 1].iter().sum();
            let mut cycle_index = 0usize;
            let mut prev_index = period - 1;
            for i in period..=count {
                let level_prev = level;
                let actual = if i == count { 0.0 } else { history[i] };
                cyclesum += history[i - 1];
                if i > period {
                    cyclesum -= history[i - period - 1];
                }
                // 水平项跟随周期均值而不是去季节化的最新观测，
                // 对噪声数据反应更平稳
                level = alfa * cyclesum / pf + (1.0 - alfa) * (level + trend);
                if level < 0.0 {
                    level = 0.0;
                }
                trend = beta * (level - level_prev) + (1.0 - beta) * trend;
                let s_old = seasons[prev_index];
                if level > 0.0 {
                    seasons[prev_index] =
                        gamma * history[i - 1] / level + (1.0 - gamma) * s_old;
                }
                if seasons[prev_index] < 0.0 {
                    seasons[prev_index] = 0.0;
                }
                // 保持各季节指数之和等于周期长度
                let factor = pf / (pf - s_old + seasons[prev_index]);
                for s in seasons.iter_mut() {
                    *s *= factor;
                }
                if i == count {
                    break;
                }
                let dl_da_prev = dl_da;
                let dl_db_prev = dl_db;
                let dt_da_prev = dt_da;
                let dt_db_prev = dt_db;
                let ds_da_prev = d_s_da[prev_index];
                let ds_db_prev = d_s_db[prev_index];
                dl_da = cyclesum / pf - (level + trend)
                    + (1.0 - alfa) * (dl_da_prev + dt_da_prev);
                dl_db = (1.0 - alfa) * (dl_db_prev + dt_db_prev);
                if level > EPS {
                    d_s_da[prev_index] = -gamma * history[i - 1] / level / level * dl_da_prev
                        + (1.0 - gamma) * ds_da_prev;
                    d_s_db[prev_index] = -gamma * history[i - 1] / level / level * dl_db_prev
                        + (1.0 - gamma) * ds_db_prev;
                } else {
                    d_s_da[prev_index] = (1.0 - gamma) * ds_da_prev;
                    d_s_db[prev_index] = (1.0 - gamma) * ds_db_prev;
                }
                dt_da = beta * (dl_da - dl_da_prev) + (1.0 - beta) * dt_da_prev;
                dt_db = (level - level_prev) + beta * (dl_db - dl_db_prev) - trend
                    + (1.0 - beta) * dt_db_prev;
                let df_da = (dl_da + dt_da) * seasons[cycle_index]
                    + (level + trend) * d_s_da[cycle_index];
                let df_db = (dl_db + dt_db) * seasons[cycle_index]
                    + (level + trend) * d_s_db[cycle_index];
                let forecast = (level + trend) * seasons[cycle_index];
                let w = ctx.weights[count - i];
                sum11 += w * df_da * df_da;
                sum12 += w * df_da * df_db;
                sum22 += w * df_db * df_db;
                sum13 += w * df_da * (actual - forecast);
                sum23 += w * df_db * (actual - forecast);
                if i >= cfg.skip {
                    error += (forecast - actual).powi(2) * w;
                    if (forecast + actual).abs() > EPS {
                        error_smape +=
                            (forecast - actual).abs() / (forecast + actual).abs() * w;
                        smape_weights += w;
                        std_acc += (forecast - actual).powi(2);
                    }
                }
                cycle_index = (cycle_index + 1) % period;
                prev_index = (prev_index + 1) % period;
            }
            if error < best_error {
                best_error = error;
                best_smape = if smape_weights > 0.0 {
                    error_smape / smape_weights
                } else {
                    0.0
                };
                best_alfa = alfa;
                best_beta = beta;
                best_level = level;
                best_trend = trend;
                best_seasons.copy_from_slice(&seasons);
                best_stddev = (std_acc / (count - period - 1) as f64).sqrt();
            }
            // 在正规方程上加 Marquardt 阻尼因子
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
            let delta_beta = (sum23 * sum11 - sum13 * sum12) / det;
            if delta_alfa.abs() + delta_beta.abs() < 3.0 * ACCURACY && iteration > 3 {
                break;
            }
            alfa += delta_alfa;
            beta += delta_beta;
            if alfa > cfg.seasonal_max_alfa {
                alfa = cfg.seasonal_max_alfa;
            } else if alfa < cfg.seasonal_min_alfa {
                alfa = cfg.seasonal_min_alfa;
            }
            if beta > cfg.seasonal_max_beta {
                beta = cfg.seasonal_max_beta;
            } else if beta < cfg.seasonal_min_beta {
                beta = cfg.seasonal_min_beta;
            }
            let alfa_bound = alfa == cfg.seasonal_min_alfa || alfa == cfg.seasonal_max_alfa;
            let beta_bound = beta == cfg.seasonal_min_beta || beta == cfg.seasonal_max_beta;
            if alfa_bound && beta_bound {
                boundary_hits += 1;
                if boundary_hits > 5 {
                    break;
                }
            }
        }
        // 计入误差的桶数比其他方法少，按比例放大误差以便公平竞争
        if period > cfg.skip {
            best_smape *= (count - cfg.skip) as f64 / (count - period) as f64;
        }
        self.alfa = best_alfa;
        self.beta = best_beta;
        self.level = best_level;
        self.trend = best_trend;
        self.seasons = best_seasons;
        self.cycle_position = count % period;
        Metrics {
            smape: best_smape,
            standard_deviation: best_stddev,
            force: self.autocorrelation > cfg.seasonal_max_autocorrelation,
        }
    }

    /// 沿季节周期向前投影一步
    pub fn project(&mut self) -> f64 {
        if self.period == 0 || self.seasons.is_empty() {
            return 0.0;
        }
        self.level += self.trend;
        self.trend *= self.dampen;
        let value = (self.level * self.seasons[self.cycle_position]).max(0.0);
        self.cycle_position = (self.cycle_position + 1) % self.period;
        value
    }

    pub fn period(&self) -> usize {
        self.period
    }

    pub fn alfa(&self) -> f64 {
        self.alfa
    }

    pub fn beta(&self) -> f64 {
        self.beta
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::methods::time_series_weights;

    fn seasonal_history(cycles: usize) -> Vec<f64> {
        // 周期 4: 低、中、高、中
        let pattern = [10.0, 30.0, 80.0, 30.0];
        (0..cycles * 4).map(|i| pattern[i % 4]).collect()
    }

    #[test]
    fn detects_the_cycle_length() {
        let config = SolverConfig::default();
        let history = seasonal_history(6);
        let cycle = Seasonal::detect_cycle(&history, &config).unwrap();
        assert_eq!(cycle.period, 4);
        assert!(cycle.autocorrelation > config.seasonal_min_autocorrelation);
    }

    #[test]
    fn flat_series_has_no_cycle() {
        let config = SolverConfig::default();
        let history = vec![10.0; 40];
        assert!(Seasonal::detect_cycle(&history, &config).is_none());
    }

    #[test]
    fn repeating_pattern_projects_the_pattern() {
        let config = SolverConfig::default();
        let mut history = seasonal_history(8);
        let weights = time_series_weights(history.len(), config.smape_alfa);
        let mut ctx = MethodContext::new(&config, &weights);
        let mut method = Seasonal::new(&config);
        let metrics = method.solve(&mut ctx, &mut history);
        assert!(metrics.smape < 0.25);
        assert_eq!(method.period(), 4);
        // 之后四步投影应呈现低-中-高的形状
        let next: Vec<f64> = (0..4).map(|_| method.project()).collect();
        let peak = next.iter().cloned().fold(f64::MIN, f64::max);
        let trough = next.iter().cloned().fold(f64::MAX, f64::min);
        assert!(peak > 2.0 * trough);
    }

    #[test]
    fn tuning_stays_inside_the_parameter_box() {
        let config = SolverConfig::default();
        // 带轻微趋势和噪声的季节形状
        let mut history: Vec<f64> = (0..32)
            .map(|i| {
                let pattern = [12.0, 28.0, 76.0, 33.0];
                pattern[i % 4] + i as f64 * 0.5 + if i % 3 == 0 { 2.0 } else { -1.5 }
            })
            .collect();
        let weights = time_series_weights(history.len(), config.smape_alfa);
        let mut ctx = MethodContext::new(&config, &weights);
        let mut method = Seasonal::new(&config);
        let metrics = method.solve(&mut ctx, &mut history);
        assert!(metrics.smape < 0.3);
        assert!(method.alfa() >= config.seasonal_min_alfa);
        assert!(method.alfa() <= config.seasonal_max_alfa);
        assert!(method.beta() >= config.seasonal_min_beta);
        assert!(method.beta() <= config.seasonal_max_beta);
    }

    #[test]
    fn spikes_stay_in_the_history() {
        // 季节性拟合不对历史数据做离群点截断
        let config = SolverConfig::default();
        let mut history = seasonal_history(8);
        history[13] = 400.0;
        let weights = time_series_weights(history.len(), config.smape_alfa);
        let mut ctx = MethodContext::new(&config, &weights);
        let mut method = Seasonal::new(&config);
        method.solve(&mut ctx, &mut history);
        assert!(ctx.outliers.is_empty());
        assert_eq!(history[13], 400.0);
    }
}
