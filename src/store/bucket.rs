// ==========================================
// 预测立方体 - 按桶存储
// ==========================================
// 每个立方体每个日历桶一个 ForecastBucketData: 稀疏度量链表
//（常规与临时）、脏标志以及计划桶可选的需求记录。日期不存
// 在这里，由共享日历按下标持有。
// ==========================================

use crate::domain::error::ForecastResult;
use crate::domain::types::ROUNDING_ERROR;
use crate::measure::catalogue::Measure;
use crate::store::demand::ForecastBucket;
use crate::store::pool::{MeasureList, Pools};

/// 单个立方体单个桶的度量存储
#[derive(Debug, Default)]
pub struct ForecastBucketData {
    pub index: usize,
    measures: MeasureList,
    temp_measures: MeasureList,
    dirty: bool,
    pub demand: Option<ForecastBucket>,
}

impl ForecastBucketData {
    pub fn new(index: usize) -> Self {
        ForecastBucketData {
            index,
            measures: MeasureList::new(),
            temp_measures: MeasureList::new(),
            dirty: false,
            demand: None,
        }
    }

    fn list(&self, measure: &Measure) -> &MeasureList {
        if measure.temporary {
            &self.temp_measures
        } else {
            &self.measures
        }
    }

    fn list_mut(&mut self, measure: &Measure) -> &mut MeasureList {
        if measure.temporary {
            &mut self.temp_measures
        } else {
            &mut self.measures
        }
    }

    /// 度量的当前值，缺失时回退默认值
    pub fn value(&self, pools: &Pools<'_>, measure: &Measure) -> f64 {
        self.list(measure).value(
            pools.for_measure_ref(measure.temporary),
            measure.id,
            measure.default_value,
        )
    }

    /// 值以及是否存在的标志
    pub fn value_and_found(&self, pools: &Pools<'_>, measure: &Measure) -> (f64, bool) {
        self.list(measure).value_and_found(
            pools.for_measure_ref(measure.temporary),
            measure.id,
            measure.default_value,
        )
    }

    pub fn contains(&self, pools: &Pools<'_>, measure: &Measure) -> bool {
        self.list(measure)
            .find(pools.for_measure_ref(measure.temporary), measure.id)
            .is_some()
    }

    /// 遵守稀疏不变量的底层写入: 与默认值相等（容差内）
    /// 的值会移除条目。
    pub fn store(
        &mut self,
        pools: &mut Pools<'_>,
        measure: &Measure,
        val: f64,
    ) -> ForecastResult<()> {
        let list = if measure.temporary {
            &mut self.temp_measures
        } else {
            &mut self.measures
        };
        let pool = if measure.temporary {
            &mut *pools.temp
        } else {
            &mut *pools.main
        };
        if (val - measure.default_value).abs() < ROUNDING_ERROR {
            list.erase(pool, measure.id);
        } else {
            list.insert(pool, measure.id, val, true)?;
        }
        Ok(())
    }

    /// 不做任何传播的底层移除
    pub fn remove(&mut self, pools: &mut Pools<'_>, measure: &Measure) {
        let temporary = measure.temporary;
        let id = measure.id;
        self.list_mut(measure).erase(pools.for_measure(temporary), id);
    }

    /// 本桶上存储的非临时键值对
    pub fn stored_pairs(&self, pools: &Pools<'_>) -> Vec<(crate::domain::types::MeasureId, f64)> {
        self.measures.iter(&pools.main).collect()
    }

    pub fn measures(&self) -> &MeasureList {
        &self.measures
    }

    pub fn measures_mut(&mut self) -> &mut MeasureList {
        &mut self.measures
    }

    pub fn temp_measures_mut(&mut self) -> &mut MeasureList {
        &mut self.temp_measures
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }
}
