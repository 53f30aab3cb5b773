// ==========================================
// 预测立方体 - 预测求解器
// ==========================================
// 职责: 按预测节点生成基线。求解器先重置净预测，再为每个
// 节点构建需求历史，让合格的方法按加权误差竞争，并把胜者
// 的投影写入 forecastbaseline。
// 单个节点失败只记日志并跳过，整轮继续。
// ==========================================

use tracing::{debug, error, info, warn};

use crate::config::SolverConfig;
use crate::domain::error::ForecastResult;
use crate::domain::types::{method_flags, AppliedMethod, ForecastId};
use crate::engine::methods::{
    time_series_weights, Croston, DoubleExponential, Manual, Method, MethodContext, Metrics,
    MovingAverage, OutlierHit, Seasonal, SingleExponential, MAX_BUCKETS,
};
use crate::model::ForecastModel;
use crate::store::cube::OutlierDiagnostic;

/// 时间序列预测求解器
pub struct ForecastSolver<'m> {
    model: &'m ForecastModel,
    config: SolverConfig,
}

/// 一轮求解的结果统计
#[derive(Debug, Default, Clone, Copy)]
pub struct SolveResult {
    pub forecasted: usize,
    pub failed: usize,
}

impl<'m> ForecastSolver<'m> {
    pub fn new(model: &'m ForecastModel, config: SolverConfig) -> Self {
        ForecastSolver { model, config }
    }

    /// 对全部预测节点运行求解器
    ///
    /// 整轮运行期间推迟落库，结束后恢复之前的刷新策略。
    pub fn solve(&self) -> ForecastResult<SolveResult> {
        let prev = self.model.set_write_immediately(false);
        let result = self.solve_inner();
        self.model.set_write_immediately(prev);
        if prev {
            self.model.flush()?;
        }
        result
    }

    fn solve_inner(&self) -> ForecastResult<SolveResult> {
        self.reset_net_forecast()?;
        let mut result = SolveResult::default();
        // 先处理叶子节点，再处理带独立方法的聚合节点
        let ids = self.model.forecast_ids()?;
        let mut rounds: [Vec<ForecastId>; 2] = [Vec::new(), Vec::new()];
        for fid in ids {
            let node = self.model.node(fid)?;
            if self.model.is_leaf(fid)? {
                rounds[0].push(fid);
            } else if node.methods() != 0 {
                rounds[1].push(fid);
            }
        }
        for round in &rounds {
            for &fid in round {
                match self.forecast_node(fid) {
                    Ok(()) => result.forecasted += 1,
                    Err(e) => {
                        let name = self
                            .model
                            .node(fid)
                            .map(|n| n.name.clone())
                            .unwrap_or_else(|_| fid.to_string());
                        error!(forecast = %name, error = %e, "caught an exception while forecasting");
                        result.failed += 1;
                    }
                }
            }
        }
        info!(
            forecasted = result.forecasted,
            failed = result.failed,
            "forecast solver finished"
        );
        Ok(result)
    }

    /// 重置消耗量并在每个计划节点上由总量重新推导净预测
    fn reset_net_forecast(&self) -> ForecastResult<()> {
        let consumed = self.model.catalogue.expect("forecastconsumed")?;
        let net = self.model.catalogue.expect("forecastnet")?;
        let total = self.model.catalogue.expect("forecasttotal")?;
        let fcst_current = self.model.calendar.fcst_current();
        let mut pools = self.model.pools.lock()?;
        for fid in self.model.forecast_ids()? {
            let node = self.model.node(fid)?;
            if !node.planned() {
                continue;
            }
            let cube = self.model.cube_with(&mut pools, fid)?;
            let mut state = cube.lock()?;
            for index in 0..state.buckets.len() {
                if state.buckets[index].value(&pools, &consumed) != 0.0 {
                    self.model
                        .remove_value_inner(&mut pools, fid, &node, &mut state, index, true, &consumed)?;
                }
                let total_value = state.buckets[index].value(&pools, &total);
                if self.model.calendar.bucket(index).end < fcst_current || total_value == 0.0 {
                    self.model
                        .remove_value_inner(&mut pools, fid, &node, &mut state, index, true, &net)?;
                } else {
                    self.model
                        .update_inner(&mut pools, fid, &node, &mut state, index, &net, total_value)?;
                }
            }
        }
        Ok(())
    }

    // ==========================================
    // 单节点预测
    // ==========================================

    fn forecast_node(&self, fid: ForecastId) -> ForecastResult<()> {
        let cfg = &self.config;
        let node = self.model.node(fid)?;
        let orderstotal = self.model.catalogue.expect("orderstotal")?;
        let ordersadjustment = self.model.catalogue.expect("ordersadjustment")?;
        let ordersopen = self.model.catalogue.expect("ordersopen")?;
        let nodata = self.model.catalogue.expect("nodata")?;
        let outlier = self.model.catalogue.expect("outlier")?;
        let baseline = self.model.catalogue.expect("forecastbaseline")?;

        let mut pools = self.model.pools.lock()?;
        let cube = self.model.cube_with(&mut pools, fid)?;
        let mut state = cube.lock()?;
        let first_plannable = self.model.calendar.first_plannable();

        // 新一轮运行接管离群点标记
        state.outliers.clear();
        for index in 0..first_plannable {
            state.buckets[index].remove(&mut pools, &outlier);
        }

        // 1. 构建需求历史，跳过开头的空白期
        let mut series: Vec<f64> = Vec::new();
        let mut positions: Vec<usize> = Vec::new();
        let mut no_data: Vec<bool> = Vec::new();
        let mut started = false;
        for index in 0..first_plannable {
            let value = state.buckets[index].value(&pools, &orderstotal)
                + state.buckets[index].value(&pools, &ordersadjustment);
            if !started {
                if value == 0.0 {
                    continue;
                }
                started = true;
            }
            let flagged = state.buckets[index].value(&pools, &nodata) != 0.0;
            if flagged && !cfg.average_no_data_days {
                continue;
            }
            series.push(value);
            positions.push(index);
            no_data.push(flagged);
        }
        if series.len() > MAX_BUCKETS {
            let cut = series.len() - MAX_BUCKETS;
            series.drain(..cut);
            positions.drain(..cut);
            no_data.drain(..cut);
        }
        if series.is_empty() {
            state.applied_method = AppliedMethod::None;
            state.smape = 0.0;
            state.deviation = 0.0;
            return Ok(());
        }
        fill_no_data(&mut series, &no_data);
        let count = series.len();

        // 2. 序列形态
        let zeros = series.iter().filter(|v| **v == 0.0).count();
        let trailing_zeros = series.iter().rev().take_while(|v| **v == 0.0).count();
        let first_bucket = self.model.calendar.bucket(positions[0]);
        let last_bucket = self.model.calendar.bucket(positions[count - 1]);
        let range_seconds = (last_bucket.end - first_bucket.start).num_seconds().max(1);
        let dead_buckets = ((cfg.dead_after_inactivity_days as f64 * 86400.0 * count as f64)
            / range_seconds as f64)
            .ceil() as usize;
        let mut has_future_demand = false;
        for index in first_plannable..state.buckets.len() {
            if state.buckets[index].value(&pools, &orderstotal)
                + state.buckets[index].value(&pools, &ordersadjustment)
                + state.buckets[index].value(&pools, &ordersopen)
                != 0.0
            {
                has_future_demand = true;
                break;
            }
        }

        // 3. 筛选候选方法
        let flags = node.methods();
        let candidates = self.qualify(
            flags,
            count,
            zeros,
            trailing_zeros,
            dead_buckets,
            has_future_demand,
            &node.name,
        );

        // 4. 按加权误差竞争
        let weights = time_series_weights(count, cfg.smape_alfa);
        let mut best: Option<(Metrics, Method, Vec<OutlierHit>)> = None;
        for mut method in candidates {
            let mut ctx = MethodContext::new(cfg, &weights);
            let mut history = series.clone();
            let metrics = method.solve(&mut ctx, &mut history);
            let better = best
                .as_ref()
                .map(|(b, _, _)| metrics.smape < b.smape)
                .unwrap_or(true);
            if metrics.force {
                best = Some((metrics, method, ctx.outliers));
                break;
            }
            if better {
                best = Some((metrics, method, ctx.outliers));
            }
        }
        // 只有季节性方法参赛时可能没有可用的拟合
        if best
            .as_ref()
            .map(|(m, _, _)| !m.force && m.smape == f64::MAX)
            .unwrap_or(true)
        {
            for fallback in [
                Method::DoubleExponential(DoubleExponential::new(
                    cfg.double_initial_alfa,
                    cfg.double_initial_gamma,
                    cfg.double_dampen_trend,
                )),
                Method::MovingAverage(MovingAverage::new(cfg.moving_average_order)),
            ] {
                let mut fallback = fallback;
                let mut ctx = MethodContext::new(cfg, &weights);
                let mut history = series.clone();
                let metrics = fallback.solve(&mut ctx, &mut history);
                if metrics.smape < f64::MAX {
                    best = Some((metrics, fallback, ctx.outliers));
                    break;
                }
            }
        }
        let (metrics, mut winner, hits) = match best {
            Some(b) => b,
            None => {
                state.applied_method = AppliedMethod::None;
                state.smape = 0.0;
                state.deviation = 0.0;
                return Ok(());
            }
        };

        // 5. 记录胜者及其离群点
        state.applied_method = winner.applied();
        state.smape = if metrics.smape == f64::MAX { 0.0 } else { metrics.smape };
        state.deviation = if metrics.standard_deviation == f64::MAX {
            0.0
        } else {
            metrics.standard_deviation
        };
        let method_label = winner.applied();
        for hit in &hits {
            let bucket = positions[hit.position];
            state.outliers.push(OutlierDiagnostic {
                bucket,
                method: method_label,
                observed: hit.observed,
                admitted: hit.admitted,
            });
            self.model
                .set_value_inner(&mut pools, fid, &node, &mut state, bucket, false, &outlier, hit.observed)?;
        }
        debug!(
            forecast = %node.name,
            method = method_label.as_str(),
            smape = state.smape,
            outliers = hits.len(),
            "applied forecast method"
        );

        // 6. 把胜者投影到未来桶
        if matches!(winner, Method::Manual(_)) {
            return Ok(());
        }
        let mut carryover = 0.0;
        for index in first_plannable..state.buckets.len() {
            let raw = winner.project().max(0.0);
            let value = if node.discrete {
                carryover += raw;
                let v = ((carryover - 0.5).ceil()).max(0.0);
                carryover -= v;
                v
            } else {
                raw
            };
            self.model
                .update_inner(&mut pools, fid, &node, &mut state, index, &baseline, value)?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn qualify(
        &self,
        flags: u8,
        count: usize,
        zeros: usize,
        trailing_zeros: usize,
        dead_buckets: usize,
        has_future_demand: bool,
        name: &str,
    ) -> Vec<Method> {
        let cfg = &self.config;
        let enabled = |bit: u8| flags & bit != 0;
        let moving_average = || Method::MovingAverage(MovingAverage::new(cfg.moving_average_order));
        let single = || Method::SingleExponential(SingleExponential::new(cfg.single_initial_alfa));
        let double = || {
            Method::DoubleExponential(DoubleExponential::new(
                cfg.double_initial_alfa,
                cfg.double_initial_gamma,
                cfg.double_dampen_trend,
            ))
        };
        let seasonal = || Method::Seasonal(Seasonal::new(cfg));
        let croston = || Method::Croston(Croston::new(cfg.croston_initial_alfa, cfg.croston_decay_rate));

        if flags & method_flags::ALL == 0 {
            return vec![Method::Manual(Manual::new())];
        }
        if count <= cfg.skip + 5 {
            return if enabled(method_flags::MOVING_AVERAGE) {
                vec![moving_average()]
            } else {
                vec![Method::Manual(Manual::new())]
            };
        }
        if trailing_zeros >= dead_buckets && !has_future_demand {
            debug!(forecast = %name, "demand went inactive, switching to manual");
            return vec![Method::Manual(Manual::new())];
        }
        let mut out: Vec<Method> = Vec::new();
        if zeros as f64 > cfg.croston_min_intermittence * count as f64 {
            if enabled(method_flags::INTERMITTENT) {
                return vec![croston()];
            }
        } else {
            if enabled(method_flags::MOVING_AVERAGE) {
                out.push(moving_average());
            }
            if enabled(method_flags::CONSTANT) {
                out.push(single());
            }
            if enabled(method_flags::TREND) {
                out.push(double());
            }
            if enabled(method_flags::SEASONAL) {
                out.push(seasonal());
            }
        }
        if out.is_empty() {
            warn!(forecast = %name, "no qualified forecast method, racing all enabled methods");
            if enabled(method_flags::MOVING_AVERAGE) {
                out.push(moving_average());
            }
            if enabled(method_flags::INTERMITTENT) {
                out.push(croston());
            }
            if enabled(method_flags::CONSTANT) {
                out.push(single());
            }
            if enabled(method_flags::TREND) {
                out.push(double());
            }
            if enabled(method_flags::SEASONAL) {
                out.push(seasonal());
            }
        }
        if out.is_empty() {
            out.push(Method::Manual(Manual::new()));
        }
        out
    }
}

/// 用左右有效邻居的平均值替换标记为无数据的点；
/// 边缘处取单侧邻居，完全没有邻居时取零。
fn fill_no_data(series: &mut [f64], flagged: &[bool]) {
    let count = series.len();
    for i in 0..count {
        if !flagged[i] {
            continue;
        }
        let prev = (0..i).rev().find(|&j| !flagged[j]).map(|j| series[j]);
        let next = (i + 1..count).find(|&j| !flagged[j]).map(|j| series[j]);
        series[i] = match (prev, next) {
            (Some(p), Some(n)) => (p + n) / 2.0,
            (Some(p), None) => p,
            (None, Some(n)) => n,
            (None, None) => 0.0,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_data_points_average_their_neighbors() {
        let mut series = vec![10.0, 0.0, 30.0];
        let flagged = vec![false, true, false];
        fill_no_data(&mut series, &flagged);
        assert_eq!(series[1], 20.0);
    }

    #[test]
    fn no_data_at_the_edge_copies_one_side() {
        let mut series = vec![0.0, 12.0, 14.0, 0.0];
        let flagged = vec![true, false, false, true];
        fill_no_data(&mut series, &flagged);
        assert_eq!(series[0], 12.0);
        assert_eq!(series[3], 14.0);
    }

    #[test]
    fn all_flagged_series_degrades_to_zero() {
        let mut series = vec![5.0, 7.0];
        let flagged = vec![true, true];
        fill_no_data(&mut series, &flagged);
        assert_eq!(series, vec![0.0, 0.0]);
    }
}
