// ==========================================
// 预测立方体 - 按节点的立方体存储
// ==========================================
// 每个预测节点一个 Cube: 互斥锁保护的桶向量，外加该节点的
// 求解结果与离群点诊断。Cube 通过 CubeCache 惰性创建；缓存
// 同时跟踪哪些节点有未落库的修改以及写入是否立即落库。
// ==========================================

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::domain::error::{ForecastError, ForecastResult};
use crate::domain::types::{AppliedMethod, ForecastId};
use crate::store::bucket::ForecastBucketData;

/// 预测方法上报的按桶离群点诊断
#[derive(Debug, Clone, PartialEq)]
pub struct OutlierDiagnostic {
    pub bucket: usize,
    pub method: AppliedMethod,
    /// 观测到的需求历史值
    pub observed: f64,
    /// 方法实际采纳的截断值
    pub admitted: f64,
}

/// 单个立方体的可变状态
#[derive(Debug, Default)]
pub struct CubeState {
    pub buckets: Vec<ForecastBucketData>,
    pub loaded: bool,
    pub dirty: bool,
    // 所属节点的求解结果
    pub applied_method: AppliedMethod,
    pub smape: f64,
    pub deviation: f64,
    pub outliers: Vec<OutlierDiagnostic>,
}

impl CubeState {
    pub fn new(bucket_count: usize) -> Self {
        CubeState {
            buckets: (0..bucket_count).map(ForecastBucketData::new).collect(),
            loaded: false,
            dirty: false,
            applied_method: AppliedMethod::None,
            smape: 0.0,
            deviation: 0.0,
            outliers: Vec::new(),
        }
    }

    /// 落库或加载成功后清除脏标记
    pub fn clear_dirty(&mut self) {
        for b in &mut self.buckets {
            b.clear_dirty();
        }
        self.dirty = false;
    }
}

/// 单个预测节点的分桶度量数据
#[derive(Debug)]
pub struct Cube {
    state: Mutex<CubeState>,
}

impl Cube {
    pub fn new(bucket_count: usize) -> Self {
        Cube {
            state: Mutex::new(CubeState::new(bucket_count)),
        }
    }

    pub fn lock(&self) -> ForecastResult<MutexGuard<'_, CubeState>> {
        self.state.lock().map_err(|_| ForecastError::poisoned("cube"))
    }
}

// ==========================================
// 立方体缓存
// ==========================================

/// 惰性创建的立方体及延迟落库的簿记
#[derive(Default)]
pub struct CubeCache {
    entries: Mutex<HashMap<ForecastId, Arc<Cube>>>,
    dirty_nodes: Mutex<HashSet<ForecastId>>,
    write_immediately: AtomicBool,
}

impl CubeCache {
    pub fn new(write_immediately: bool) -> Self {
        CubeCache {
            entries: Mutex::new(HashMap::new()),
            dirty_nodes: Mutex::new(HashSet::new()),
            write_immediately: AtomicBool::new(write_immediately),
        }
    }

    /// 节点对应的立方体，首次访问时创建为空
    pub fn get_or_create(&self, id: ForecastId, bucket_count: usize) -> ForecastResult<Arc<Cube>> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| ForecastError::poisoned("cube cache"))?;
        Ok(Arc::clone(
            entries.entry(id).or_insert_with(|| Arc::new(Cube::new(bucket_count))),
        ))
    }

    pub fn get(&self, id: ForecastId) -> ForecastResult<Option<Arc<Cube>>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| ForecastError::poisoned("cube cache"))?;
        Ok(entries.get(&id).cloned())
    }

    /// 记录节点存在未落库的修改
    pub fn mark_dirty(&self, id: ForecastId) -> ForecastResult<()> {
        self.dirty_nodes
            .lock()
            .map_err(|_| ForecastError::poisoned("dirty set"))?
            .insert(id);
        Ok(())
    }

    /// 取走脏节点集合并清空
    pub fn take_dirty(&self) -> ForecastResult<Vec<ForecastId>> {
        let mut dirty = self
            .dirty_nodes
            .lock()
            .map_err(|_| ForecastError::poisoned("dirty set"))?;
        let mut out: Vec<ForecastId> = dirty.drain().collect();
        out.sort_unstable();
        Ok(out)
    }

    pub fn write_immediately(&self) -> bool {
        self.write_immediately.load(Ordering::Relaxed)
    }

    /// 切换延迟落库开关，返回之前的设置
    pub fn set_write_immediately(&self, value: bool) -> bool {
        self.write_immediately.swap(value, Ordering::Relaxed)
    }
}
