// ==========================================
// 预测立方体 - 度量代数
// ==========================================
// 职责: 立方体的写路径。底层值变更沿层级向上传播；聚合层的
// 编辑向下分摊到存储叶子；每次变更后保持计算型度量一致。
// 加锁: 每个入口先取池锁，之后逐节点取各立方体锁。池锁串行
// 化所有写者，嵌套的立方体锁之间不会互相死锁。
// ==========================================

use std::sync::Arc;

use chrono::NaiveDateTime;
use tracing::{debug, info, warn};

use crate::domain::error::{ForecastError, ForecastResult};
use crate::domain::forecast::ForecastNode;
use crate::domain::types::{ForecastId, ResetRange, ROUNDING_ERROR};
use crate::measure::catalogue::{Measure, MeasureKind};
use crate::measure::compute::{build_context, context_number};
use crate::model::ForecastModel;
use crate::store::cube::CubeState;
use crate::store::pool::Pools;

impl ForecastModel {
    // ==========================================
    // 公共入口
    // ==========================================

    /// 设置预测某个桶上的度量值，节点不是该度量的叶子时
    /// 向下分摊到存储层级。
    pub fn set_measure_value(
        &self,
        fid: ForecastId,
        measure: &str,
        index: usize,
        value: f64,
    ) -> ForecastResult<()> {
        if index >= self.calendar.bucket_count() {
            return Err(ForecastError::Logic(format!("bucket index {} out of range", index)));
        }
        let measure = self.catalogue.expect(measure)?;
        {
            let mut pools = self.pools.lock()?;
            self.disaggregate_bucket(&mut pools, &measure, fid, index, value, 0.0)?;
        }
        self.maybe_flush()
    }

    /// 在日期区间上设置度量，把数量分摊到重叠的桶。
    pub fn set_measure_over(
        &self,
        fid: ForecastId,
        measure: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
        value: f64,
    ) -> ForecastResult<()> {
        let measure = self.catalogue.expect(measure)?;
        {
            let mut pools = self.pools.lock()?;
            self.disaggregate_range(&mut pools, &measure, fid, start, end, value, false, 0.0)?;
        }
        self.maybe_flush()
    }

    /// 从一个桶移除度量条目，含向上传播与依赖重算。
    pub fn remove_measure_value(
        &self,
        fid: ForecastId,
        measure: &str,
        index: usize,
    ) -> ForecastResult<()> {
        let measure = self.catalogue.expect(measure)?;
        {
            let mut pools = self.pools.lock()?;
            let node = self.node(fid)?;
            let cube = self.cube_with(&mut pools, fid)?;
            let mut state = cube.lock()?;
            self.remove_value_inner(&mut pools, fid, &node, &mut state, index, true, &measure)?;
        }
        self.maybe_flush()
    }

    /// 度量在某个桶上的当前值
    pub fn measure_value(&self, fid: ForecastId, measure: &str, index: usize) -> ForecastResult<f64> {
        let measure = self.catalogue.expect(measure)?;
        let mut pools = self.pools.lock()?;
        let cube = self.cube_with(&mut pools, fid)?;
        let state = cube.lock()?;
        Ok(state.buckets[index].value(&pools, &measure))
    }

    /// 某个预测上度量的全部分桶值
    pub fn measure_values(&self, fid: ForecastId, measure: &str) -> ForecastResult<Vec<f64>> {
        let measure = self.catalogue.expect(measure)?;
        let mut pools = self.pools.lock()?;
        let cube = self.cube_with(&mut pools, fid)?;
        let state = cube.lock()?;
        Ok(state
            .buckets
            .iter()
            .map(|b| b.value(&pools, &measure))
            .collect())
    }

    // ==========================================
    // 底层值变更
    // ==========================================

    /// 在单个节点上写度量值，替换旧条目并把增量送入
    /// 全部上级。
    pub(crate) fn set_value_inner(
        &self,
        pools: &mut Pools<'_>,
        fid: ForecastId,
        node: &ForecastNode,
        state: &mut CubeState,
        index: usize,
        propagate: bool,
        measure: &Measure,
        val: f64,
    ) -> ForecastResult<()> {
        if measure.name == "forecastnet"
            && self.calendar.bucket(index).end > self.calendar.fcst_current()
        {
            self.sync_demand_set(node, state, index, val);
        }
        let (old, found) = state.buckets[index].value_and_found(&*pools, measure);
        if !found {
            if val != measure.default_value {
                state.buckets[index].store(pools, measure, val)?;
                if propagate && measure.is_aggregate() {
                    self.inc_parents(pools, fid, &*state, index, measure, val)?;
                }
                self.mark_bucket_dirty(fid, state, index, measure)?;
            }
            return Ok(());
        }
        let delta = val - old;
        if delta.abs() > ROUNDING_ERROR || measure.default_value != 0.0 {
            state.buckets[index].store(pools, measure, val)?;
            if propagate && measure.is_aggregate() {
                self.inc_parents(pools, fid, &*state, index, measure, delta)?;
            }
            self.mark_bucket_dirty(fid, state, index, measure)?;
        }
        Ok(())
    }

    /// 给单个节点上的度量值加一个增量
    ///
    /// 覆盖类度量回落到零时对照子节点复核: 只要还有子节点
    /// 持有覆盖，条目就保留为显式零。`origin` 透传触发传播
    /// 节点已持有的状态，避免对它二次加锁。
    pub(crate) fn inc_value_inner(
        &self,
        pools: &mut Pools<'_>,
        fid: ForecastId,
        node: &ForecastNode,
        state: &mut CubeState,
        index: usize,
        propagate: bool,
        measure: &Measure,
        val: f64,
        origin: Option<(ForecastId, &CubeState)>,
    ) -> ForecastResult<()> {
        if val == 0.0 && measure.default_value == 0.0 {
            return Ok(());
        }
        if measure.name == "forecastnet"
            && self.calendar.bucket(index).end > self.calendar.fcst_current()
        {
            self.sync_demand_inc(node, state, index, val);
        }
        let (old, found) = state.buckets[index].value_and_found(&*pools, measure);
        if !found {
            if val != measure.default_value {
                state.buckets[index].store(pools, measure, val)?;
            }
        } else {
            let tmp = old + val;
            if measure.default_value == -1.0 && tmp.abs() < ROUNDING_ERROR {
                self.validate_override(pools, fid, state, index, measure, origin)?;
            } else if (tmp - measure.default_value).abs() > ROUNDING_ERROR {
                state.buckets[index].store(pools, measure, tmp)?;
            } else {
                state.buckets[index].remove(pools, measure);
            }
        }
        if propagate && measure.is_aggregate() {
            self.inc_parents(pools, fid, &*state, index, measure, val)?;
        }
        self.mark_bucket_dirty(fid, state, index, measure)
    }

    /// 删除度量条目；重算依赖并从全部上级扣除旧贡献。
    pub(crate) fn remove_value_inner(
        &self,
        pools: &mut Pools<'_>,
        fid: ForecastId,
        node: &ForecastNode,
        state: &mut CubeState,
        index: usize,
        propagate: bool,
        measure: &Measure,
    ) -> ForecastResult<()> {
        let (old, found) = state.buckets[index].value_and_found(&*pools, measure);
        if !found {
            return Ok(());
        }
        state.buckets[index].remove(pools, measure);
        if self.measure_is_leaf(measure, fid)? {
            self.compute_dependents(pools, fid, node, state, index, &measure.name)?;
            if propagate && measure.is_aggregate() {
                self.inc_parents(pools, fid, &*state, index, measure, -old)?;
            }
        }
        self.mark_bucket_dirty(fid, state, index, measure)
    }

    fn mark_bucket_dirty(
        &self,
        fid: ForecastId,
        state: &mut CubeState,
        index: usize,
        measure: &Measure,
    ) -> ForecastResult<()> {
        if measure.temporary {
            return Ok(());
        }
        state.buckets[index].mark_dirty();
        state.dirty = true;
        self.cache.mark_dirty(fid)
    }

    /// 把增量送入起点节点的全部祖先
    pub(crate) fn inc_parents(
        &self,
        pools: &mut Pools<'_>,
        origin_id: ForecastId,
        origin_state: &CubeState,
        index: usize,
        measure: &Measure,
        delta: f64,
    ) -> ForecastResult<()> {
        // 覆盖类度量连零增量也要传播: 子节点出现或撤销
        // 显式 0 覆盖时，上级条目必须对照子节点重新复核。
        if delta == 0.0 && measure.default_value != -1.0 {
            return Ok(());
        }
        for pid in self.parents(origin_id)? {
            let pnode = self.node(pid)?;
            let cube = self.cube_with(pools, pid)?;
            let mut pstate = cube.lock()?;
            self.inc_value_inner(
                pools,
                pid,
                &pnode,
                &mut pstate,
                index,
                false,
                measure,
                delta,
                Some((origin_id, origin_state)),
            )?;
        }
        Ok(())
    }

    /// 求和回零的覆盖聚合值要么是显式零（仍有子节点覆盖），
    /// 要么不存在。
    fn validate_override(
        &self,
        pools: &mut Pools<'_>,
        fid: ForecastId,
        state: &mut CubeState,
        index: usize,
        measure: &Measure,
        origin: Option<(ForecastId, &CubeState)>,
    ) -> ForecastResult<()> {
        let children = self.leaves(fid, false, Some(measure))?;
        for ch in children {
            let overridden = match origin {
                Some((oid, ostate)) if oid == ch => {
                    let (v, found) = ostate.buckets[index].value_and_found(&*pools, measure);
                    found && v != -1.0
                }
                _ => {
                    let cube = self.cube_with(pools, ch)?;
                    let cstate = cube.lock()?;
                    let (v, found) = cstate.buckets[index].value_and_found(&*pools, measure);
                    found && v != -1.0
                }
            };
            if overridden {
                state.buckets[index].store(pools, measure, 0.0)?;
                return Ok(());
            }
        }
        state.buckets[index].remove(pools, measure);
        Ok(())
    }

    // ==========================================
    // 需求同步
    // ==========================================

    fn sync_demand_set(&self, node: &ForecastNode, state: &mut CubeState, index: usize, val: f64) {
        if node.planned() {
            if val != 0.0 || state.buckets[index].demand.is_some() {
                let demand = self.get_or_create_demand(node, state, index);
                if demand.quantity > val + ROUNDING_ERROR {
                    let excess = demand.quantity - val;
                    demand.reduce_deliveries(excess);
                }
                demand.quantity = val;
            }
        } else if let Some(demand) = state.buckets[index].demand.as_mut() {
            demand.quantity = 0.0;
        }
    }

    fn sync_demand_inc(&self, node: &ForecastNode, state: &mut CubeState, index: usize, val: f64) {
        if node.planned() {
            let existing = state.buckets[index]
                .demand
                .as_ref()
                .map(|d| d.quantity)
                .unwrap_or(0.0);
            if existing + val != 0.0 || state.buckets[index].demand.is_some() {
                let demand = self.get_or_create_demand(node, state, index);
                demand.quantity += val;
            }
        } else if let Some(demand) = state.buckets[index].demand.as_mut() {
            demand.quantity = 0.0;
        }
    }

    // ==========================================
    // 依赖度量
    // ==========================================

    /// 重算所有读取了变更度量的计算型度量
    pub(crate) fn compute_dependents(
        &self,
        pools: &mut Pools<'_>,
        fid: ForecastId,
        node: &ForecastNode,
        state: &mut CubeState,
        index: usize,
        changed: &str,
    ) -> ForecastResult<()> {
        for dep in self.catalogue.dependents_of(changed)? {
            let expr = match &dep.compute {
                Some(e) => e,
                None => continue,
            };
            let ctx = self.bucket_context(pools, fid, state, index, None)?;
            let mut val = expr.evaluate(&ctx)?;
            if dep.discrete {
                val = (val + ROUNDING_ERROR).floor();
            }
            if dep.default_value == -1.0 && val == -1.0 {
                self.remove_value_inner(pools, fid, node, state, index, true, &dep)?;
            } else {
                self.set_value_inner(pools, fid, node, state, index, true, &dep, val)?;
            }
            if dep.name == "forecasttotal"
                && self.calendar.bucket(index).end > self.calendar.fcst_current()
            {
                self.sync_net_after_total(pools, fid, node, state, index, val)?;
            }
        }
        Ok(())
    }

    /// 总量变更驱动净预测: 计划节点上直接更新，否则在最近的
    /// 计划祖先上由其自身总量和消耗量更新。
    fn sync_net_after_total(
        &self,
        pools: &mut Pools<'_>,
        fid: ForecastId,
        node: &ForecastNode,
        state: &mut CubeState,
        index: usize,
        total: f64,
    ) -> ForecastResult<()> {
        let consumed = self.catalogue.expect("forecastconsumed")?;
        let net = self.catalogue.expect("forecastnet")?;
        if node.planned() {
            let c = state.buckets[index].value(&*pools, &consumed);
            self.update_inner(pools, fid, node, state, index, &net, total - c)?;
            return Ok(());
        }
        let total_measure = self.catalogue.expect("forecasttotal")?;
        for pid in self.parents(fid)? {
            let pnode = self.node(pid)?;
            if !pnode.planned() {
                continue;
            }
            let cube = self.cube_with(pools, pid)?;
            let mut pstate = cube.lock()?;
            let ptotal = pstate.buckets[index].value(&*pools, &total_measure);
            let pconsumed = pstate.buckets[index].value(&*pools, &consumed);
            self.update_inner(pools, pid, &pnode, &mut pstate, index, &net, ptotal - pconsumed)?;
            break;
        }
        Ok(())
    }

    /// 单个桶的符号表: 按名列出全部度量和物料成本，
    /// 可选包含本次编辑的新值。
    pub(crate) fn bucket_context(
        &self,
        pools: &Pools<'_>,
        fid: ForecastId,
        state: &CubeState,
        index: usize,
        newvalue: Option<f64>,
    ) -> ForecastResult<evalexpr::HashMapContext> {
        let mut pairs: Vec<(String, f64)> = Vec::new();
        for m in self.catalogue.all()? {
            pairs.push((m.name.clone(), state.buckets[index].value(pools, &m)));
        }
        pairs.push(("cost".to_string(), self.item_cost(fid)?));
        if let Some(v) = newvalue {
            pairs.push(("newvalue".to_string(), v));
        }
        build_context(pairs)
    }

    // ==========================================
    // 编辑分派
    // ==========================================

    /// 把编辑值应用到单个节点单个桶的度量上
    ///
    /// 离散数量向下取整，小数部分作为余量返回，连续编辑
    /// 多个桶的调用方可以把它带到下一桶。
    pub(crate) fn update_inner(
        &self,
        pools: &mut Pools<'_>,
        fid: ForecastId,
        node: &ForecastNode,
        state: &mut CubeState,
        index: usize,
        measure: &Measure,
        val: f64,
    ) -> ForecastResult<f64> {
        let mut remainder = 0.0;
        match measure.name.as_str() {
            "forecastbaseline" => {
                let qty = if node.discrete {
                    let q = (val + ROUNDING_ERROR).floor();
                    remainder = val - q;
                    q
                } else {
                    val
                };
                self.set_value_inner(pools, fid, node, state, index, true, measure, qty)?;
            }
            "forecastoverride" => {
                if val == -1.0 {
                    self.remove_value_inner(pools, fid, node, state, index, true, measure)?;
                } else {
                    let qty = if node.discrete {
                        let q = (val + ROUNDING_ERROR).floor();
                        remainder = val - q;
                        q
                    } else {
                        val
                    };
                    self.set_value_inner(pools, fid, node, state, index, true, measure, qty)?;
                }
            }
            "forecastconsumed" => {
                self.set_value_inner(pools, fid, node, state, index, true, measure, val)?;
                let total_measure = self.catalogue.expect("forecasttotal")?;
                let net = self.catalogue.expect("forecastnet")?;
                let total = state.buckets[index].value(&*pools, &total_measure);
                self.update_inner(pools, fid, node, state, index, &net, total - val)?;
            }
            _ if measure.is_computed() => {
                let expr = match &measure.update {
                    Some(e) => e,
                    None => return Ok(0.0),
                };
                let mut ctx = self.bucket_context(pools, fid, state, index, Some(val))?;
                expr.run(&mut ctx)?;
                for target in expr.writes() {
                    let assigned = context_number(&ctx, target)?;
                    if target == &measure.name {
                        self.set_value_inner(pools, fid, node, state, index, true, measure, assigned)?;
                    } else {
                        let target_measure = self.catalogue.expect(target)?;
                        self.update_inner(pools, fid, node, state, index, &target_measure, assigned)?;
                    }
                }
            }
            _ => {
                let qty = if measure.discrete {
                    let q = (val + ROUNDING_ERROR).floor();
                    remainder = val - q;
                    q
                } else {
                    val
                };
                self.set_value_inner(pools, fid, node, state, index, true, measure, qty)?;
            }
        }
        self.compute_dependents(pools, fid, node, state, index, &measure.name)?;
        Ok(remainder)
    }

    // ==========================================
    // 向下分摊
    // ==========================================

    /// 把值应用到一个桶，下推到度量的存储层级。
    pub(crate) fn disaggregate_bucket(
        &self,
        pools: &mut Pools<'_>,
        measure: &Measure,
        fid: ForecastId,
        index: usize,
        val: f64,
        remainder: f64,
    ) -> ForecastResult<f64> {
        if let Some(ovr_id) = measure.overrides {
            if measure.is_computed() {
                let ovr = self.catalogue.get(ovr_id)?;
                return self.disaggregate_override_bucket(pools, measure, &ovr, fid, index, val, remainder);
            }
            if measure.default_value == -1.0 {
                // 直接写覆盖度量本身
                return self.disaggregate_override_bucket(pools, measure, measure, fid, index, val, remainder);
            }
        }
        let node = self.node(fid)?;
        if measure.kind == MeasureKind::Local {
            let cube = self.cube_with(pools, fid)?;
            let mut state = cube.lock()?;
            return self.update_inner(pools, fid, &node, &mut state, index, measure, val + remainder);
        }
        let cube = self.cube_with(pools, fid)?;
        if self.measure_is_leaf(measure, fid)? {
            let mut state = cube.lock()?;
            return self.update_inner(pools, fid, &node, &mut state, index, measure, val + remainder);
        }
        // 先快照聚合值，释放锁后再下推子节点
        let currentvalue = {
            let state = cube.lock()?;
            state.buckets[index].value(&*pools, measure)
        };
        let bucket = self.calendar.bucket(index);
        let (bstart, bend) = (bucket.start, bucket.end);
        let children = self.leaves(fid, false, Some(measure))?;
        let mut rem = remainder;
        if currentvalue != 0.0 {
            let factor = val / currentvalue;
            for ch in children {
                rem = self.disaggregate_range(pools, measure, ch, bstart, bend, factor, true, rem)?;
            }
        } else {
            if children.is_empty() {
                warn!(forecast = %node.name, measure = %measure.name, "no child forecasts found");
                return Ok(rem);
            }
            let delta = val / children.len() as f64;
            for ch in children {
                rem = self.disaggregate_range(pools, measure, ch, bstart, bend, delta + rem, false, 0.0)?;
            }
        }
        Ok(rem)
    }

    /// 在日期区间上应用值（`multiply` 时为因子），递归到
    /// 度量的存储层级。
    pub(crate) fn disaggregate_range(
        &self,
        pools: &mut Pools<'_>,
        measure: &Measure,
        fid: ForecastId,
        start: NaiveDateTime,
        end: NaiveDateTime,
        val: f64,
        multiply: bool,
        remainder: f64,
    ) -> ForecastResult<f64> {
        if let Some(ovr_id) = measure.overrides {
            if measure.is_computed() {
                let ovr = self.catalogue.get(ovr_id)?;
                return self
                    .disaggregate_override_range(pools, measure, &ovr, fid, start, end, val, remainder);
            }
            if measure.default_value == -1.0 {
                return self
                    .disaggregate_override_range(pools, measure, measure, fid, start, end, val, remainder);
            }
        }
        let overlapping = self.calendar.overlapping(start, end);
        if overlapping.is_empty() {
            return Ok(remainder);
        }
        let node = self.node(fid)?;
        if measure.kind == MeasureKind::Local {
            let cube = self.cube_with(pools, fid)?;
            let mut state = cube.lock()?;
            let mut rem = remainder;
            for &idx in &overlapping {
                let v = if multiply {
                    state.buckets[idx].value(&*pools, measure) * val
                } else {
                    val
                };
                rem = self.update_inner(pools, fid, &node, &mut state, idx, measure, v + rem)?;
            }
            return Ok(rem);
        }
        let cube = self.cube_with(pools, fid)?;
        if self.measure_is_leaf(measure, fid)? {
            let mut state = cube.lock()?;
            let mut currentvalue = 0.0;
            for &idx in &overlapping {
                currentvalue += state.buckets[idx].value(&*pools, measure);
            }
            let mut rem = remainder;
            if multiply || currentvalue != 0.0 {
                let factor = if multiply { val } else { val / currentvalue };
                for &idx in &overlapping {
                    let cur = state.buckets[idx].value(&*pools, measure);
                    rem = self.update_inner(pools, fid, &node, &mut state, idx, measure, cur * factor + rem)?;
                }
            } else {
                let newval = val / overlapping.len() as f64;
                for &idx in &overlapping {
                    rem = self.update_inner(pools, fid, &node, &mut state, idx, measure, newval + rem)?;
                }
            }
            return Ok(rem);
        }
        let currentvalue = {
            let state = cube.lock()?;
            overlapping
                .iter()
                .map(|&i| state.buckets[i].value(&*pools, measure))
                .sum::<f64>()
        };
        let children = self.leaves(fid, false, Some(measure))?;
        let mut rem = remainder;
        if multiply {
            for ch in children {
                rem = self.disaggregate_range(pools, measure, ch, start, end, val, true, rem)?;
            }
        } else if currentvalue != 0.0 {
            let factor = val / currentvalue;
            for ch in children {
                rem = self.disaggregate_range(pools, measure, ch, start, end, factor, true, rem)?;
            }
        } else {
            if children.is_empty() {
                warn!(forecast = %node.name, measure = %measure.name, "no child forecasts found");
                return Ok(rem);
            }
            let delta = val / children.len() as f64;
            for ch in children {
                rem = self.disaggregate_range(pools, measure, ch, start, end, delta + rem, false, 0.0)?;
            }
        }
        Ok(rem)
    }

    // ==========================================
    // 覆盖分摊
    // ==========================================

    /// 把编辑后的总量推入某个桶下各叶子的覆盖度量。
    fn disaggregate_override_bucket(
        &self,
        pools: &mut Pools<'_>,
        measure: &Measure,
        ovr: &Measure,
        fid: ForecastId,
        index: usize,
        val: f64,
        remainder: f64,
    ) -> ForecastResult<f64> {
        let base = match ovr.overrides {
            Some(id) => self.catalogue.get(id)?,
            None => {
                return Err(ForecastError::Logic(format!(
                    "override measure '{}' has no base measure",
                    ovr.name
                )))
            }
        };
        // 本节点的状态，触碰子节点前先释放锁
        let (mut current_override, current_base) = {
            let cube = self.cube_with(pools, fid)?;
            let state = cube.lock()?;
            (
                state.buckets[index].value(&*pools, ovr),
                state.buckets[index].value(&*pools, &base),
            )
        };
        let mut count_override = 0usize;
        let mut count_no_override = 0usize;
        let current_total;
        if current_override != -1.0 {
            count_override = 1;
            current_total = current_override;
        } else {
            current_override = 0.0;
            count_no_override = 1;
            current_total = current_base;
        }
        let (mode, arg) = if val <= -1.0 {
            (0u8, -1.0)
        } else if count_override > 0 {
            if current_override > val || (current_override - current_total).abs() < ROUNDING_ERROR {
                if current_override != 0.0 {
                    (1, val / current_override)
                } else {
                    (11, val / count_override as f64)
                }
            } else if current_total != 0.0 {
                (3, val / current_total)
            } else {
                (4, val / count_no_override as f64)
            }
        } else if current_base != 0.0 {
            (3, val / current_base)
        } else if count_no_override > 0 {
            (4, val / count_no_override as f64)
        } else {
            warn!(measure = %measure.name, "no child forecasts found");
            return Ok(remainder);
        };
        let children = self.leaves(fid, true, Some(measure))?;
        let mut rem = remainder;
        for ch in children {
            let chnode = self.node(ch)?;
            let cube = self.cube_with(pools, ch)?;
            let mut state = cube.lock()?;
            match mode {
                0 => {
                    rem = self.update_inner(pools, ch, &chnode, &mut state, index, ovr, -1.0)?;
                }
                1 => {
                    let c = state.buckets[index].value(&*pools, ovr);
                    let v = if c == -1.0 { 0.0 } else { c * arg + rem };
                    rem = self.update_inner(pools, ch, &chnode, &mut state, index, ovr, v)?;
                }
                11 => {
                    rem = self.update_inner(pools, ch, &chnode, &mut state, index, ovr, arg + rem)?;
                }
                3 => {
                    if state.buckets[index].value(&*pools, ovr) == -1.0 {
                        let c = state.buckets[index].value(&*pools, &base);
                        rem = self.update_inner(pools, ch, &chnode, &mut state, index, ovr, c * arg + rem)?;
                    }
                }
                _ => {
                    if state.buckets[index].value(&*pools, ovr) == -1.0 {
                        rem = self.update_inner(pools, ch, &chnode, &mut state, index, ovr, arg + rem)?;
                    }
                }
            }
        }
        Ok(rem)
    }

    /// 覆盖分摊的区间形式；状态在全部叶子与重叠桶上累计。
    fn disaggregate_override_range(
        &self,
        pools: &mut Pools<'_>,
        measure: &Measure,
        ovr: &Measure,
        fid: ForecastId,
        start: NaiveDateTime,
        end: NaiveDateTime,
        val: f64,
        remainder: f64,
    ) -> ForecastResult<f64> {
        let base = match ovr.overrides {
            Some(id) => self.catalogue.get(id)?,
            None => {
                return Err(ForecastError::Logic(format!(
                    "override measure '{}' has no base measure",
                    ovr.name
                )))
            }
        };
        let overlapping = self.calendar.overlapping(start, end);
        if overlapping.is_empty() {
            return Ok(remainder);
        }
        let children = self.leaves(fid, true, Some(measure))?;
        let mut current_override = 0.0;
        let mut current_no_override = 0.0;
        let mut current_base = 0.0;
        let mut count_override = 0usize;
        let mut count_no_override = 0usize;
        for &ch in &children {
            let cube = self.cube_with(pools, ch)?;
            let state = cube.lock()?;
            for &idx in &overlapping {
                let tmp = state.buckets[idx].value(&*pools, ovr);
                let b = state.buckets[idx].value(&*pools, &base);
                current_base += b;
                if tmp != -1.0 {
                    current_override += tmp;
                    count_override += 1;
                } else {
                    current_no_override += b;
                    count_no_override += 1;
                }
            }
        }
        let (mode, arg) = if val <= -1.0 {
            (0u8, -1.0)
        } else if count_override > 0 {
            if current_override > val || count_no_override == 0 {
                if current_override != 0.0 {
                    (1, val / current_override)
                } else {
                    (11, val / count_override as f64)
                }
            } else if current_no_override != 0.0 {
                (3, (val - current_override) / current_no_override)
            } else {
                (4, (val - current_override) / count_no_override as f64)
            }
        } else if current_base != 0.0 {
            (3, val / current_base)
        } else if count_no_override > 0 {
            (4, val / count_no_override as f64)
        } else {
            warn!(measure = %measure.name, "no child forecasts found");
            return Ok(remainder);
        };
        let mut rem = remainder;
        for &ch in &children {
            let chnode = self.node(ch)?;
            let cube = self.cube_with(pools, ch)?;
            let mut state = cube.lock()?;
            for &idx in &overlapping {
                match mode {
                    0 => {
                        rem = self.update_inner(pools, ch, &chnode, &mut state, idx, ovr, -1.0)?;
                    }
                    1 => {
                        let c = state.buckets[idx].value(&*pools, ovr);
                        let v = if c == -1.0 { 0.0 } else { c * arg + rem };
                        rem = self.update_inner(pools, ch, &chnode, &mut state, idx, ovr, v)?;
                    }
                    11 => {
                        let c = state.buckets[idx].value(&*pools, ovr);
                        let v = if c == -1.0 { 0.0 } else { arg + rem };
                        rem = self.update_inner(pools, ch, &chnode, &mut state, idx, ovr, v)?;
                    }
                    3 => {
                        if state.buckets[idx].value(&*pools, ovr) == -1.0 {
                            let c = state.buckets[idx].value(&*pools, &base);
                            rem = self.update_inner(pools, ch, &chnode, &mut state, idx, ovr, c * arg + rem)?;
                        }
                    }
                    _ => {
                        if state.buckets[idx].value(&*pools, ovr) == -1.0 {
                            rem = self.update_inner(pools, ch, &chnode, &mut state, idx, ovr, arg + rem)?;
                        }
                    }
                }
            }
        }
        Ok(rem)
    }

    // ==========================================
    // 批量维护
    // ==========================================

    /// 从叶子重建所有聚合层级并纠正漂移的上级。
    pub fn aggregate_measures(&self, include_planned: bool) -> ForecastResult<()> {
        let msrs = self.catalogue.aggregates(include_planned)?;
        self.aggregate_selected(&msrs)
    }

    /// 在显式度量集合上做聚合
    pub fn aggregate_selected(&self, msrs: &[Arc<Measure>]) -> ForecastResult<()> {
        self.flush()?;
        let prev = self.set_write_immediately(false);
        let result = self.aggregate_pass(msrs);
        self.set_write_immediately(prev);
        if prev {
            self.flush()?;
        }
        result
    }

    fn aggregate_pass(&self, msrs: &[Arc<Measure>]) -> ForecastResult<()> {
        // 计划节点之下再有计划节点会重复计数，
        // 子节点失去该标志。
        for fid in self.forecast_ids()? {
            let node = self.node(fid)?;
            if !node.planned() {
                continue;
            }
            let mut parent_planned = false;
            for pid in self.parents(fid)? {
                if self.node(pid)?.planned() {
                    parent_planned = true;
                    break;
                }
            }
            if parent_planned {
                node.set_planned(false);
                warn!(
                    forecast = %node.name,
                    "forecast can't be planned because its parent is already planned"
                );
            }
        }
        let mut twins: Vec<(Arc<Measure>, Arc<Measure>)> = Vec::new();
        for m in msrs {
            if m.is_aggregate() {
                twins.push((Arc::clone(m), self.catalogue.temp_twin(m)?));
            }
        }
        let mut corrected = 0usize;
        {
            let mut pools = self.pools.lock()?;
            // 第一遍: 把叶子求和进临时孪生度量
            for fid in self.forecast_ids()? {
                let cube = self.cube_with(&mut pools, fid)?;
                let state = cube.lock()?;
                for (m, twin) in &twins {
                    if !self.measure_is_leaf(m, fid)? {
                        continue;
                    }
                    for index in 0..state.buckets.len() {
                        let val = state.buckets[index].value(&pools, m);
                        if val != 0.0 && val != m.default_value {
                            self.inc_parents(&mut pools, fid, &state, index, twin, val)?;
                        }
                    }
                }
            }
            // 第二遍: 用孪生度量对照已存储的上级值
            for fid in self.forecast_ids()? {
                let node = self.node(fid)?;
                let cube = self.cube_with(&mut pools, fid)?;
                let mut state = cube.lock()?;
                for (m, twin) in &twins {
                    if self.measure_is_leaf(m, fid)? {
                        continue;
                    }
                    for index in 0..state.buckets.len() {
                        let (val, found) = state.buckets[index].value_and_found(&pools, twin);
                        let cur = state.buckets[index].value(&pools, m);
                        if (cur - val).abs() > ROUNDING_ERROR
                            && (m.default_value != -1.0 || found)
                        {
                            if !state.buckets[index].is_dirty() {
                                corrected += 1;
                            }
                            debug!(
                                forecast = %node.name,
                                measure = %m.name,
                                bucket = index,
                                old = cur,
                                new = val,
                                "correcting aggregated value"
                            );
                            self.set_value_inner(&mut pools, fid, &node, &mut state, index, false, m, val)?;
                        }
                        state.buckets[index].remove(&mut pools, twin);
                    }
                }
            }
            let freed = pools.temp.release_empty_pages();
            debug!(pages = freed, "released temporary measure pages");
        }
        info!(corrected, "corrected parent forecast buckets");
        Ok(())
    }

    /// 在存储叶子上重算所有计算型度量
    pub fn compute_measures(&self) -> ForecastResult<()> {
        let msrs = self.catalogue.computed()?;
        self.compute_selected(&msrs)
    }

    pub fn compute_selected(&self, msrs: &[Arc<Measure>]) -> ForecastResult<()> {
        self.flush()?;
        let prev = self.set_write_immediately(false);
        let result = self.compute_pass(msrs);
        self.set_write_immediately(prev);
        if prev {
            self.flush()?;
        }
        result
    }

    fn compute_pass(&self, msrs: &[Arc<Measure>]) -> ForecastResult<()> {
        self.reset_selected(ResetRange::All, msrs)?;
        let mut pools = self.pools.lock()?;
        for fid in self.forecast_ids()? {
            let node = self.node(fid)?;
            let cube = self.cube_with(&mut pools, fid)?;
            let mut state = cube.lock()?;
            for m in msrs {
                if !m.is_computed() || !self.measure_is_leaf(m, fid)? {
                    continue;
                }
                let expr = match &m.compute {
                    Some(e) => e,
                    None => continue,
                };
                for index in 0..state.buckets.len() {
                    let ctx = self.bucket_context(&pools, fid, &state, index, None)?;
                    let mut val = expr.evaluate(&ctx)?;
                    if m.discrete {
                        val = (val + ROUNDING_ERROR).floor();
                    }
                    let cur = state.buckets[index].value(&pools, m);
                    if (val - cur).abs() <= ROUNDING_ERROR {
                        continue;
                    }
                    if (val - m.default_value).abs() < ROUNDING_ERROR {
                        self.remove_value_inner(&mut pools, fid, &node, &mut state, index, true, m)?;
                    } else {
                        self.set_value_inner(&mut pools, fid, &node, &mut state, index, true, m, val)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// 在日历区间上从所有预测移除度量
    pub fn reset_measure(&self, range: ResetRange, names: &[&str]) -> ForecastResult<()> {
        let mut msrs = Vec::new();
        for name in names {
            msrs.push(self.catalogue.expect(name)?);
        }
        self.reset_selected(range, &msrs)?;
        self.maybe_flush()
    }

    pub(crate) fn reset_selected(
        &self,
        range: ResetRange,
        msrs: &[Arc<Measure>],
    ) -> ForecastResult<()> {
        let fcst_current = self.calendar.fcst_current();
        let mut pools = self.pools.lock()?;
        for fid in self.forecast_ids()? {
            let node = self.node(fid)?;
            let cube = self.cube_with(&mut pools, fid)?;
            let mut state = cube.lock()?;
            for index in 0..state.buckets.len() {
                let bucket = self.calendar.bucket(index);
                let hit = match range {
                    ResetRange::Past => bucket.end <= fcst_current,
                    ResetRange::PastAndCurrent => bucket.start <= fcst_current,
                    ResetRange::All => true,
                    ResetRange::CurrentAndFuture => bucket.end > fcst_current,
                    ResetRange::Future => bucket.start > fcst_current,
                };
                if !hit {
                    continue;
                }
                for m in msrs {
                    self.remove_value_inner(&mut pools, fid, &node, &mut state, index, false, m)?;
                }
            }
        }
        Ok(())
    }
}
