// ==========================================
// 预测立方体 - 预测模型
// ==========================================
// 职责: 把维度、日历、度量目录、注册表、立方体缓存、池和
// 仓储串联起来；负责立方体的加载与落库。
// 度量代数作为本类型的第二个 impl 块放在 measure::algebra。
// ==========================================

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use chrono::NaiveDateTime;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::ForecastSettings;
use crate::domain::calendar::Calendar;
use crate::domain::error::{ForecastError, ForecastResult};
use crate::domain::forecast::{ForecastDefinition, ForecastNode, ForecastRegistry};
use crate::domain::hierarchy::Dimension;
use crate::domain::types::{methods_to_string, parse_methods, ForecastId, NodeId};
use crate::measure::catalogue::{Measure, MeasureCatalogue, MeasureKind};
use crate::repository::forecast_plan_repo::{ForecastPlanRepository, PlanRow};
use crate::repository::error::RepositoryError;
use crate::store::cube::{Cube, CubeCache};
use crate::store::demand::ForecastBucket;
use crate::store::pool::{PoolSet, Pools};

/// 完整的预测模型
pub struct ForecastModel {
    pub(crate) items: Dimension,
    pub(crate) locations: Dimension,
    pub(crate) customers: Dimension,
    pub(crate) calendar: Calendar,
    pub(crate) catalogue: MeasureCatalogue,
    pub(crate) registry: RwLock<ForecastRegistry>,
    pub(crate) cache: CubeCache,
    pub(crate) pools: PoolSet,
    pub(crate) repository: Option<ForecastPlanRepository>,
    pub(crate) settings: ForecastSettings,
}

impl ForecastModel {
    /// 在冻结的维度 arena 与日历之上构建模型
    pub fn new(
        items: Dimension,
        locations: Dimension,
        customers: Dimension,
        calendar: Calendar,
        settings: ForecastSettings,
    ) -> ForecastResult<Self> {
        Ok(ForecastModel {
            items,
            locations,
            customers,
            calendar,
            catalogue: MeasureCatalogue::standard()?,
            registry: RwLock::new(ForecastRegistry::default()),
            cache: CubeCache::new(settings.write_immediately),
            pools: PoolSet::new(),
            repository: None,
            settings,
        })
    }

    /// 挂接持久化后端；立方体从中惰性加载，脏桶落库回写。
    pub fn with_repository(mut self, repository: ForecastPlanRepository) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn items(&self) -> &Dimension {
        &self.items
    }

    pub fn locations(&self) -> &Dimension {
        &self.locations
    }

    pub fn customers(&self) -> &Dimension {
        &self.customers
    }

    pub fn calendar(&self) -> &Calendar {
        &self.calendar
    }

    pub fn catalogue(&self) -> &MeasureCatalogue {
        &self.catalogue
    }

    pub fn settings(&self) -> &ForecastSettings {
        &self.settings
    }

    // ==========================================
    // 注册表访问
    // ==========================================

    /// 注册一个显式定义的预测
    pub fn create_forecast(&self, def: ForecastDefinition) -> ForecastResult<ForecastId> {
        let mut reg = self
            .registry
            .write()
            .map_err(|_| ForecastError::poisoned("registry"))?;
        reg.create(&self.items, &self.locations, &self.customers, def)
    }

    /// 按维度成员名称查找预测
    pub fn find_forecast(
        &self,
        item: &str,
        location: &str,
        customer: &str,
    ) -> ForecastResult<Option<ForecastId>> {
        let (item, location, customer) = match (
            self.items.find(item),
            self.locations.find(location),
            self.customers.find(customer),
        ) {
            (Some(i), Some(l), Some(c)) => (i, l, c),
            _ => return Ok(None),
        };
        let reg = self
            .registry
            .read()
            .map_err(|_| ForecastError::poisoned("registry"))?;
        Ok(reg.find(&self.items, &self.locations, &self.customers, item, location, customer))
    }

    pub fn node(&self, id: ForecastId) -> ForecastResult<Arc<ForecastNode>> {
        let reg = self
            .registry
            .read()
            .map_err(|_| ForecastError::poisoned("registry"))?;
        if id as usize >= reg.len() {
            return Err(ForecastError::Logic(format!("unknown forecast id {}", id)));
        }
        Ok(reg.node(id))
    }

    /// 当前已注册预测 id 的快照
    pub fn forecast_ids(&self) -> ForecastResult<Vec<ForecastId>> {
        let reg = self
            .registry
            .read()
            .map_err(|_| ForecastError::poisoned("registry"))?;
        Ok(reg.ids().collect())
    }

    /// 按文本形式设置节点允许的方法
    pub fn set_methods_string(&self, id: ForecastId, text: &str) -> ForecastResult<()> {
        let methods = parse_methods(text)?;
        self.node(id)?.set_methods(methods);
        Ok(())
    }

    pub fn methods_string(&self, id: ForecastId) -> ForecastResult<String> {
        Ok(methods_to_string(self.node(id)?.methods()))
    }

    // ==========================================
    // 层级遍历
    // ==========================================

    /// 节点的全部祖先三元组，聚合节点按需合成；
    /// 不含节点自身。
    pub fn parents(&self, id: ForecastId) -> ForecastResult<Vec<ForecastId>> {
        let mut reg = self
            .registry
            .write()
            .map_err(|_| ForecastError::poisoned("registry"))?;
        Ok(reg.parents(&self.items, &self.locations, &self.customers, id))
    }

    /// 结构性叶子判定，结果缓存在节点上
    pub fn is_leaf(&self, id: ForecastId) -> ForecastResult<bool> {
        let reg = self
            .registry
            .read()
            .map_err(|_| ForecastError::poisoned("registry"))?;
        Ok(reg.is_structural_leaf(&self.items, &self.locations, &self.customers, id))
    }

    /// 度量在节点上的叶子层级: 计划类度量从计划节点向上
    /// 存储，本地类度量处处存储。
    pub fn measure_is_leaf(&self, measure: &Measure, id: ForecastId) -> ForecastResult<bool> {
        match measure.kind {
            MeasureKind::AggregatedPlanned => Ok(self.node(id)?.planned()),
            MeasureKind::Local => Ok(true),
            _ => self.is_leaf(id),
        }
    }

    /// `root` 之下的已注册节点，按度量的叶子谓词过滤
    ///（未给度量时用结构性谓词）。
    pub fn leaves(
        &self,
        root: ForecastId,
        inclusive: bool,
        measure: Option<&Measure>,
    ) -> ForecastResult<Vec<ForecastId>> {
        let candidates = {
            let reg = self
                .registry
                .read()
                .map_err(|_| ForecastError::poisoned("registry"))?;
            reg.leaves_filtered(
                &self.items,
                &self.locations,
                &self.customers,
                root,
                inclusive,
                |_| true,
            )
        };
        let mut out = Vec::new();
        for id in candidates {
            let keep = match measure {
                Some(m) => self.measure_is_leaf(m, id)?,
                None => self.is_leaf(id)?,
            };
            if keep {
                out.push(id);
            }
        }
        Ok(out)
    }

    /// 引用某个物料成员的全部节点
    pub fn nodes_for_item(&self, item: NodeId) -> ForecastResult<Vec<ForecastId>> {
        let reg = self
            .registry
            .read()
            .map_err(|_| ForecastError::poisoned("registry"))?;
        Ok(reg.nodes_for_item(item))
    }

    pub(crate) fn item_cost(&self, id: ForecastId) -> ForecastResult<f64> {
        let node = self.node(id)?;
        Ok(self.items.node(node.item).cost)
    }

    // ==========================================
    // 立方体访问
    // ==========================================

    /// 节点对应的立方体，首次访问时从仓储加载。
    pub fn cube(&self, id: ForecastId) -> ForecastResult<Arc<Cube>> {
        let mut pools = self.pools.lock()?;
        self.cube_with(&mut pools, id)
    }

    /// 已持有池锁的调用方使用的立方体访问
    pub(crate) fn cube_with(&self, pools: &mut Pools<'_>, id: ForecastId) -> ForecastResult<Arc<Cube>> {
        let cube = self.cache.get_or_create(id, self.calendar.bucket_count())?;
        {
            let state = cube.lock()?;
            if state.loaded {
                drop(state);
                return Ok(cube);
            }
        }
        let repo = match &self.repository {
            Some(r) => r,
            None => {
                cube.lock()?.loaded = true;
                return Ok(cube);
            }
        };
        let node = self.node(id)?;
        let item = self.items.node_name(node.item);
        let location = self.locations.node_name(node.location);
        let customer = self.customers.node_name(node.customer);
        // 在立方体锁之外取数；坏连接重试一次
        let rows = match repo.fetch(item, location, customer) {
            Ok(rows) => rows,
            Err(RepositoryError::DatabaseConnectionError(msg)) => {
                warn!(forecast = %node.name, error = %msg, "retrying forecastplan fetch");
                repo.fetch(item, location, customer)?
            }
            Err(e) => return Err(e.into()),
        };
        let stored = self.catalogue.stored()?;
        let mut state = cube.lock()?;
        if state.loaded {
            drop(state);
            return Ok(cube);
        }
        debug!(forecast = %node.name, rows = rows.len(), "loading cube");
        let mut cursor = 0usize;
        for row in &rows {
            while cursor < self.calendar.bucket_count()
                && self.calendar.bucket(cursor).start != row.startdate
            {
                cursor += 1;
            }
            if cursor >= self.calendar.bucket_count() {
                return Err(ForecastError::Data(
                    "forecastplan buckets not matching calendar".to_string(),
                ));
            }
            let bucket = &mut state.buckets[cursor];
            for (measure, value) in stored.iter().zip(row.values.iter()) {
                match value {
                    Some(v) => bucket.store(pools, measure, *v)?,
                    None => bucket.remove(pools, measure),
                }
            }
            cursor += 1;
        }
        // 计划节点把净预测作为需求数量暴露
        if node.planned() {
            let net = self.catalogue.expect("forecastnet")?;
            let fcst_current = self.calendar.fcst_current();
            for i in 0..state.buckets.len() {
                let cal_bucket = self.calendar.bucket(i);
                if cal_bucket.end <= fcst_current {
                    continue;
                }
                let quantity = state.buckets[i].value(pools, &net);
                if quantity != 0.0 {
                    let mut demand = ForecastBucket::new(
                        &node.name,
                        cal_bucket,
                        self.calendar.due_within_bucket,
                        self.calendar.current(),
                    );
                    demand.quantity = quantity;
                    state.buckets[i].demand = Some(demand);
                }
            }
        }
        state.clear_dirty();
        state.loaded = true;
        drop(state);
        Ok(cube)
    }

    /// 桶的需求记录不存在时创建
    pub(crate) fn get_or_create_demand<'s>(
        &self,
        node: &ForecastNode,
        state: &'s mut crate::store::cube::CubeState,
        index: usize,
    ) -> &'s mut ForecastBucket {
        state.buckets[index].demand.get_or_insert_with(|| {
            ForecastBucket::new(
                &node.name,
                self.calendar.bucket(index),
                self.calendar.due_within_bucket,
                self.calendar.current(),
            )
        })
    }

    // ==========================================
    // 落库
    // ==========================================

    /// 切换延迟落库开关，返回之前的设置
    pub fn set_write_immediately(&self, value: bool) -> bool {
        self.cache.set_write_immediately(value)
    }

    pub fn write_immediately(&self) -> bool {
        self.cache.write_immediately()
    }

    pub fn repository(&self) -> Option<&ForecastPlanRepository> {
        self.repository.as_ref()
    }

    /// 把全部脏节点落库
    ///
    /// 行数据在锁内快照、锁外写入。返回写入的行数。
    pub fn flush(&self) -> ForecastResult<usize> {
        let dirty = self.cache.take_dirty()?;
        if dirty.is_empty() {
            return Ok(0);
        }
        let repo = match &self.repository {
            Some(r) => r,
            None => return Ok(0),
        };
        let stored = self.catalogue.stored()?;
        let mut rows: Vec<PlanRow> = Vec::new();
        {
            let pools = self.pools.lock()?;
            for id in dirty {
                let cube = match self.cache.get(id)? {
                    Some(c) => c,
                    None => continue,
                };
                let node = self.node(id)?;
                let item = self.items.node_name(node.item).to_string();
                let location = self.locations.node_name(node.location).to_string();
                let customer = self.customers.node_name(node.customer).to_string();
                let mut state = cube.lock()?;
                if !state.dirty {
                    continue;
                }
                for bucket in state.buckets.iter().filter(|b| b.is_dirty()) {
                    let values: Vec<Option<f64>> = stored
                        .iter()
                        .map(|m| {
                            let (v, found) = bucket.value_and_found(&pools, m);
                            if found {
                                Some(v)
                            } else {
                                None
                            }
                        })
                        .collect();
                    rows.push(PlanRow {
                        item: item.clone(),
                        location: location.clone(),
                        customer: customer.clone(),
                        startdate: self.calendar.bucket(bucket.index).start,
                        values,
                    });
                }
                state.clear_dirty();
            }
        }
        if rows.is_empty() {
            return Ok(0);
        }
        let written = repo.upsert(&rows)?;
        Ok(written)
    }

    /// 缓存策略要求立即写入时执行落库
    pub(crate) fn maybe_flush(&self) -> ForecastResult<()> {
        if self.cache.write_immediately() {
            self.flush()?;
        }
        Ok(())
    }

    // ==========================================
    // 巡检
    // ==========================================

    /// 立方体的 JSON 巡检输出。隐藏度量跳过，
    /// 数值舍入到 1e-8。
    pub fn to_json(
        &self,
        id: ForecastId,
        from: Option<NaiveDateTime>,
        to: Option<NaiveDateTime>,
    ) -> ForecastResult<serde_json::Value> {
        let node = self.node(id)?;
        let pools = self.pools.lock()?;
        let cube = self.cache.get_or_create(id, self.calendar.bucket_count())?;
        let state = cube.lock()?;
        let mut buckets = Vec::new();
        for bucket in &state.buckets {
            let cal = self.calendar.bucket(bucket.index);
            if from.map(|f| cal.end <= f).unwrap_or(false)
                || to.map(|t| cal.start >= t).unwrap_or(false)
            {
                continue;
            }
            let mut values: BTreeMap<String, f64> = BTreeMap::new();
            for (mid, val) in bucket.stored_pairs(&pools) {
                let measure = self.catalogue.get(mid)?;
                if measure.hidden() {
                    continue;
                }
                values.insert(measure.name.clone(), (val * 1e8).round() / 1e8);
            }
            buckets.push(json!({
                "bucket": cal.label(),
                "start": cal.start.format("%Y-%m-%d %H:%M:%S").to_string(),
                "end": cal.end.format("%Y-%m-%d %H:%M:%S").to_string(),
                "values": values,
            }));
        }
        Ok(json!({
            "forecast": node.name,
            "item": self.items.node_name(node.item),
            "location": self.locations.node_name(node.location),
            "customer": self.customers.node_name(node.customer),
            "method": state.applied_method.as_str(),
            "smape": (state.smape * 1e8).round() / 1e8,
            "buckets": buckets,
        }))
    }

    /// 以 debug 级别记录立方体的存储内容
    pub fn inspect(&self, id: ForecastId) -> ForecastResult<()> {
        let node = self.node(id)?;
        let pools = self.pools.lock()?;
        let cube = self.cache.get_or_create(id, self.calendar.bucket_count())?;
        let state = cube.lock()?;
        debug!(
            forecast = %node.name,
            method = state.applied_method.as_str(),
            smape = state.smape,
            "forecast cube"
        );
        for bucket in &state.buckets {
            let cal = self.calendar.bucket(bucket.index);
            for (mid, val) in bucket.stored_pairs(&pools) {
                let measure = self.catalogue.get(mid)?;
                if measure.hidden() {
                    continue;
                }
                debug!(bucket = %cal.label(), measure = %measure.name, value = val, "stored value");
            }
        }
        Ok(())
    }
}
