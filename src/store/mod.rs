// ==========================================
// 预测立方体 - 存储层
// ==========================================
// 职责: 池化的度量槽位、按桶的稀疏链表、按节点的立方体
// 以及需求记录
// 红线: 不感知层级，不含度量语义
// ==========================================

pub mod bucket;
pub mod cube;
pub mod demand;
pub mod pool;

pub use bucket::ForecastBucketData;
pub use cube::{Cube, CubeCache, CubeState, OutlierDiagnostic};
pub use demand::{Delivery, ForecastBucket};
pub use pool::{MeasureList, MeasurePool, MeasureValue, PoolSet, PoolStatus, Pools, NIL, PAGE_SIZE};
