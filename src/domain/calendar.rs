// ==========================================
// 预测立方体 - 共享桶日历
// ==========================================
// 所有立方体共享的一份有序 (start, end) 区间列表。
// 桶边界来自排序后的起始日期，并按预测日期前后的
// 历史/未来时间窗裁剪。
// ==========================================

use chrono::{Duration, NaiveDateTime, Timelike};

use crate::domain::error::{ForecastError, ForecastResult};
use crate::domain::types::DueWithinBucket;

/// 共享日历中的一个时间桶
#[derive(Debug, Clone)]
pub struct CalendarBucket {
    pub index: usize,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl CalendarBucket {
    /// 桶的显示名: 天或更粗粒度只显示日期，否则显示完整时间戳
    pub fn label(&self) -> String {
        if self.end - self.start > Duration::hours(22) {
            self.start.format("%Y-%m-%d").to_string()
        } else {
            self.start.format("%Y-%m-%d %H:%M:%S").to_string()
        }
    }

    /// start <= date < end
    pub fn within(&self, date: NaiveDateTime) -> bool {
        self.start <= date && date < self.end
    }

    /// start <= date <= end
    pub fn between(&self, date: NaiveDateTime) -> bool {
        self.start <= date && date <= self.end
    }

    /// 给定策略下本桶内需求的到期日
    ///
    /// 跨越 `current` 的桶到期日不会落在过去。
    pub fn due(&self, policy: DueWithinBucket, current: NaiveDateTime) -> NaiveDateTime {
        let mut due = match policy {
            DueWithinBucket::Start => self.start,
            DueWithinBucket::Middle => {
                let mid = self.start + (self.end - self.start) / 2;
                // 向下取整到当天零点
                mid.with_hour(0)
                    .and_then(|d| d.with_minute(0))
                    .and_then(|d| d.with_second(0))
                    .and_then(|d| d.with_nanosecond(0))
                    .unwrap_or(mid)
            }
            DueWithinBucket::End => self.end - Duration::seconds(1),
        };
        if self.start <= current && self.end > current && due < current {
            due = current;
        }
        due
    }
}

/// 进程级的桶日历
#[derive(Debug, Clone)]
pub struct Calendar {
    buckets: Vec<CalendarBucket>,
    /// 需求历史与预测区间的分界日期
    fcst_current: NaiveDateTime,
    /// 计划的当前日期
    current: NaiveDateTime,
    pub due_within_bucket: DueWithinBucket,
}

impl Calendar {
    /// 由排序后的桶起始日期构建日历
    ///
    /// 桶被裁剪到
    /// [fcst_current - horizon_history, current + horizon_future]；
    /// 每个桶终止于下一个桶的起点。
    pub fn from_starts(
        starts: &[NaiveDateTime],
        fcst_current: NaiveDateTime,
        current: NaiveDateTime,
        horizon_history_days: i64,
        horizon_future_days: i64,
        due_within_bucket: DueWithinBucket,
    ) -> ForecastResult<Calendar> {
        if starts.len() < 2 {
            return Err(ForecastError::Data(
                "a calendar needs at least two bucket start dates".to_string(),
            ));
        }
        let horizon_start = fcst_current - Duration::days(horizon_history_days);
        let horizon_end = current + Duration::days(horizon_future_days);
        let mut buckets = Vec::new();
        for window in starts.windows(2) {
            let (start, end) = (window[0], window[1]);
            if end <= start {
                return Err(ForecastError::Data(
                    "calendar bucket start dates must be strictly increasing".to_string(),
                ));
            }
            if end <= horizon_start || start > horizon_end {
                continue;
            }
            buckets.push(CalendarBucket {
                index: buckets.len(),
                start,
                end,
            });
        }
        if buckets.is_empty() {
            return Err(ForecastError::Data(
                "no calendar buckets fall inside the forecasting horizon".to_string(),
            ));
        }
        Ok(Calendar {
            buckets,
            fcst_current,
            current,
            due_within_bucket,
        })
    }

    pub fn buckets(&self) -> &[CalendarBucket] {
        &self.buckets
    }

    pub fn bucket(&self, index: usize) -> &CalendarBucket {
        &self.buckets[index]
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn fcst_current(&self) -> NaiveDateTime {
        self.fcst_current
    }

    pub fn current(&self) -> NaiveDateTime {
        self.current
    }

    /// 与 [start, end) 重叠的桶下标
    ///
    /// 桶的起点落在区间内，或整个区间落在桶内，均算重叠。
    pub fn overlapping(&self, start: NaiveDateTime, end: NaiveDateTime) -> Vec<usize> {
        let mut out = Vec::new();
        for b in &self.buckets {
            if b.start > end {
                break;
            }
            if (b.start >= start && b.start < end) || (b.within(start) && b.between(end)) {
                out.push(b.index);
            }
        }
        out
    }

    /// 第一个在计划当前日期之后结束的桶下标
    pub fn first_plannable(&self) -> usize {
        self.buckets
            .iter()
            .position(|b| b.end > self.current)
            .unwrap_or(self.buckets.len())
    }
}
