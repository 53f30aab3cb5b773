// ==========================================
// 预测立方体 - 度量目录
// ==========================================
// 度量类别的封闭集合加运行时目录。标准目录对应需求计划的
// 常用度量；自定义度量可在运行时注册。临时校验孪生度量按
// 聚合轮次发放，从不进入目录索引。
// ==========================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, RwLock};

use crate::domain::error::{ForecastError, ForecastResult};
use crate::domain::types::MeasureId;
use crate::measure::compute::CompiledExpression;

/// 度量类别，决定传播方式与叶子层级
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasureKind {
    /// 存储在结构叶子上，逐级求和到所有祖先
    Aggregated,
    /// 从计划节点向上存储
    AggregatedPlanned,
    /// 按节点存储，从不传播
    Local,
    /// 由其他度量上的表达式推导
    Computed,
}

/// 一个已注册的度量
#[derive(Debug, Clone)]
pub struct Measure {
    pub id: MeasureId,
    pub name: String,
    pub kind: MeasureKind,
    pub default_value: f64,
    pub discrete: bool,
    /// 作为 forecastplan 的列持久化
    pub stored: bool,
    /// 从 temp 池分配，从不传播或持久化
    pub temporary: bool,
    /// 本度量覆盖的目标度量（适用覆盖代数）
    pub overrides: Option<MeasureId>,
    pub compute: Option<CompiledExpression>,
    pub update: Option<CompiledExpression>,
}

impl Measure {
    pub fn is_aggregate(&self) -> bool {
        matches!(self.kind, MeasureKind::Aggregated | MeasureKind::AggregatedPlanned)
    }

    pub fn is_computed(&self) -> bool {
        self.kind == MeasureKind::Computed
    }

    /// 隐藏度量不出现在巡检输出里
    pub fn hidden(&self) -> bool {
        self.temporary || self.name.starts_with('-')
    }
}

/// 注册度量的入参
#[derive(Debug, Clone)]
pub struct MeasureDefinition {
    pub name: String,
    pub kind: MeasureKind,
    pub default_value: f64,
    pub discrete: bool,
    pub stored: bool,
    pub overrides: Option<String>,
    pub compute: Option<String>,
    pub update: Option<String>,
}

impl MeasureDefinition {
    pub fn new(name: &str, kind: MeasureKind) -> Self {
        MeasureDefinition {
            name: name.to_string(),
            kind,
            default_value: 0.0,
            discrete: false,
            stored: true,
            overrides: None,
            compute: None,
            update: None,
        }
    }

    pub fn default_value(mut self, v: f64) -> Self {
        self.default_value = v;
        self
    }

    pub fn overrides(mut self, name: &str) -> Self {
        self.overrides = Some(name.to_string());
        self
    }

    pub fn compute(mut self, expr: &str) -> Self {
        self.compute = Some(expr.to_string());
        self
    }

    pub fn update(mut self, expr: &str) -> Self {
        self.update = Some(expr.to_string());
        self
    }

    pub fn unstored(mut self) -> Self {
        self.stored = false;
        self
    }
}

#[derive(Default)]
struct CatalogueInner {
    measures: Vec<Arc<Measure>>,
    by_name: HashMap<String, MeasureId>,
}

/// 运行时度量目录
pub struct MeasureCatalogue {
    inner: RwLock<CatalogueInner>,
    next_temp: AtomicU16,
}

impl MeasureCatalogue {
    pub fn empty() -> Self {
        MeasureCatalogue {
            inner: RwLock::new(CatalogueInner::default()),
            next_temp: AtomicU16::new(MeasureId::TEMP_BASE),
        }
    }

    /// 标准需求计划目录
    pub fn standard() -> ForecastResult<Self> {
        let cat = MeasureCatalogue::empty();
        cat.register(MeasureDefinition::new("forecastbaseline", MeasureKind::Aggregated))?;
        cat.register(
            MeasureDefinition::new("forecastoverride", MeasureKind::Aggregated)
                .default_value(-1.0)
                .overrides("forecastbaseline"),
        )?;
        cat.register(
            MeasureDefinition::new("forecasttotal", MeasureKind::Computed)
                .compute("if(forecastoverride == -1.0, forecastbaseline, forecastoverride)")
                .overrides("forecastoverride"),
        )?;
        cat.register(MeasureDefinition::new("forecastnet", MeasureKind::AggregatedPlanned))?;
        cat.register(MeasureDefinition::new("forecastconsumed", MeasureKind::AggregatedPlanned))?;
        cat.register(MeasureDefinition::new("orderstotal", MeasureKind::Aggregated))?;
        cat.register(MeasureDefinition::new("ordersadjustment", MeasureKind::Aggregated))?;
        cat.register(MeasureDefinition::new("ordersopen", MeasureKind::Aggregated))?;
        cat.register(MeasureDefinition::new("ordersplanned", MeasureKind::AggregatedPlanned))?;
        cat.register(MeasureDefinition::new("forecastplanned", MeasureKind::AggregatedPlanned))?;
        cat.register(MeasureDefinition::new("outlier", MeasureKind::Local))?;
        cat.register(MeasureDefinition::new("nodata", MeasureKind::Local))?;
        cat.register(MeasureDefinition::new("leaf", MeasureKind::Local).unstored())?;
        Ok(cat)
    }

    /// 注册度量，名称重复属数据错误
    pub fn register(&self, def: MeasureDefinition) -> ForecastResult<Arc<Measure>> {
        let compute = match &def.compute {
            Some(text) => Some(CompiledExpression::compile(text)?),
            None => None,
        };
        let update = match &def.update {
            Some(text) => Some(CompiledExpression::compile(text)?),
            None => None,
        };
        let mut inner = self
            .inner
            .write()
            .map_err(|_| ForecastError::poisoned("measure catalogue"))?;
        if inner.by_name.contains_key(&def.name) {
            return Err(ForecastError::Data(format!(
                "measure '{}' is already registered",
                def.name
            )));
        }
        let overrides = match &def.overrides {
            Some(name) => Some(*inner.by_name.get(name).ok_or_else(|| {
                ForecastError::Data(format!("override target measure '{}' not found", name))
            })?),
            None => None,
        };
        if inner.measures.len() >= MeasureId::TEMP_BASE as usize {
            return Err(ForecastError::Resource("measure catalogue full".to_string()));
        }
        let id = MeasureId(inner.measures.len() as u16);
        let measure = Arc::new(Measure {
            id,
            name: def.name.clone(),
            kind: def.kind,
            default_value: def.default_value,
            discrete: def.discrete,
            stored: def.stored,
            temporary: false,
            overrides,
            compute,
            update,
        });
        inner.by_name.insert(def.name, id);
        inner.measures.push(Arc::clone(&measure));
        Ok(measure)
    }

    pub fn find(&self, name: &str) -> ForecastResult<Option<Arc<Measure>>> {
        let inner = self
            .inner
            .read()
            .map_err(|_| ForecastError::poisoned("measure catalogue"))?;
        Ok(inner
            .by_name
            .get(name)
            .map(|&id| Arc::clone(&inner.measures[id.0 as usize])))
    }

    /// 同 `find`，但度量缺失属数据错误
    pub fn expect(&self, name: &str) -> ForecastResult<Arc<Measure>> {
        self.find(name)?
            .ok_or_else(|| ForecastError::Data(format!("measure '{}' not found", name)))
    }

    pub fn get(&self, id: MeasureId) -> ForecastResult<Arc<Measure>> {
        let inner = self
            .inner
            .read()
            .map_err(|_| ForecastError::poisoned("measure catalogue"))?;
        inner
            .measures
            .get(id.0 as usize)
            .cloned()
            .ok_or_else(|| ForecastError::Logic(format!("unknown measure id {}", id.0)))
    }

    pub fn all(&self) -> ForecastResult<Vec<Arc<Measure>>> {
        let inner = self
            .inner
            .read()
            .map_err(|_| ForecastError::poisoned("measure catalogue"))?;
        Ok(inner.measures.clone())
    }

    /// 聚合类度量，可选排除计划对
    pub fn aggregates(&self, include_planned: bool) -> ForecastResult<Vec<Arc<Measure>>> {
        Ok(self
            .all()?
            .into_iter()
            .filter(|m| m.is_aggregate())
            .filter(|m| {
                include_planned || (m.name != "forecastplanned" && m.name != "ordersplanned")
            })
            .collect())
    }

    pub fn computed(&self) -> ForecastResult<Vec<Arc<Measure>>> {
        Ok(self.all()?.into_iter().filter(|m| m.is_computed()).collect())
    }

    /// 以 forecastplan 列持久化的度量，按列序
    pub fn stored(&self) -> ForecastResult<Vec<Arc<Measure>>> {
        Ok(self.all()?.into_iter().filter(|m| m.stored).collect())
    }

    /// 计算表达式读取 `name` 的计算型度量
    pub fn dependents_of(&self, name: &str) -> ForecastResult<Vec<Arc<Measure>>> {
        Ok(self
            .all()?
            .into_iter()
            .filter(|m| {
                m.compute
                    .as_ref()
                    .map(|e| e.reads().iter().any(|r| r == name))
                    .unwrap_or(false)
            })
            .collect())
    }

    /// 聚合度量的临时校验孪生
    ///
    /// 覆盖类孪生默认值为 0，使覆盖聚合逻辑在其上保持关闭。
    pub fn temp_twin(&self, base: &Measure) -> ForecastResult<Arc<Measure>> {
        let raw = self.next_temp.fetch_add(1, Ordering::Relaxed);
        if raw == u16::MAX {
            return Err(ForecastError::Resource("temporary measure ids exhausted".to_string()));
        }
        Ok(Arc::new(Measure {
            id: MeasureId(raw),
            name: format!("temp{}", base.name),
            kind: base.kind,
            default_value: if base.default_value == -1.0 { 0.0 } else { base.default_value },
            discrete: base.discrete,
            stored: false,
            temporary: true,
            overrides: None,
            compute: None,
            update: None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_catalogue_links_the_override_measure() {
        let cat = MeasureCatalogue::standard().unwrap();
        let ovr = cat.expect("forecastoverride").unwrap();
        let base = cat.expect("forecastbaseline").unwrap();
        assert_eq!(ovr.overrides, Some(base.id));
        assert_eq!(ovr.default_value, -1.0);
        let total = cat.expect("forecasttotal").unwrap();
        assert!(total.is_computed());
    }

    #[test]
    fn forecasttotal_depends_on_baseline_and_override() {
        let cat = MeasureCatalogue::standard().unwrap();
        let deps = cat.dependents_of("forecastbaseline").unwrap();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].name, "forecasttotal");
        assert!(cat.dependents_of("orderstotal").unwrap().is_empty());
    }

    #[test]
    fn temp_twin_of_an_override_measure_gets_default_zero() {
        let cat = MeasureCatalogue::standard().unwrap();
        let ovr = cat.expect("forecastoverride").unwrap();
        let twin = cat.temp_twin(&ovr).unwrap();
        assert!(twin.temporary);
        assert_eq!(twin.name, "tempforecastoverride");
        assert_eq!(twin.default_value, 0.0);
        assert!(twin.id.0 >= MeasureId::TEMP_BASE);
    }

    #[test]
    fn duplicate_registration_is_refused() {
        let cat = MeasureCatalogue::standard().unwrap();
        let err = cat.register(MeasureDefinition::new("orderstotal", MeasureKind::Aggregated));
        assert!(err.is_err());
    }
}
