// ==========================================
// 预测立方体 - 需求记录
// ==========================================
// 交给计划侧的具体需求，对应一个计划预测桶: 数量、到期日
// 以及已经对其做出的交付承诺。
// ==========================================

use chrono::NaiveDateTime;

use crate::domain::calendar::CalendarBucket;
use crate::domain::types::{DueWithinBucket, ROUNDING_ERROR};

/// 针对预测桶的一笔交付承诺
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub end: NaiveDateTime,
    pub quantity: f64,
}

/// 单个计划预测桶的需求记录
#[derive(Debug, Clone)]
pub struct ForecastBucket {
    pub name: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub due: NaiveDateTime,
    pub priority: i32,
    pub quantity: f64,
    pub deliveries: Vec<Delivery>,
}

impl ForecastBucket {
    /// 为预测的某个桶创建需求记录
    ///
    /// 名称是确定性的，重复创建幂等。
    pub fn new(
        forecast_name: &str,
        bucket: &CalendarBucket,
        policy: DueWithinBucket,
        current: NaiveDateTime,
    ) -> Self {
        ForecastBucket {
            name: format!("{} - {}", forecast_name, bucket.label()),
            start: bucket.start,
            end: bucket.end,
            due: bucket.due(policy, current),
            priority: 10,
            quantity: 0.0,
            deliveries: Vec::new(),
        }
    }

    /// 预测数量下调后释放已承诺的供应
    ///
    /// 先削减桶内到期的交付，再从近到远削减更早的交付，
    /// 最后从近到远削减更晚的交付。每笔交付要么按剩余
    /// 超量削减，要么直接清零。
    pub fn reduce_deliveries(&mut self, excess: f64) {
        if excess < ROUNDING_ERROR {
            return;
        }
        let mut remaining = excess;
        let mut order: Vec<usize> = (0..self.deliveries.len()).collect();
        order.sort_by_key(|&i| self.deliveries[i].end);

        // 阶段 1: 本桶内到期的交付
        let in_bucket: Vec<usize> = order
            .iter()
            .copied()
            .filter(|&i| self.deliveries[i].end >= self.start && self.deliveries[i].end < self.end)
            .collect();
        // 阶段 2: 更早的交付，最近的优先
        let earlier: Vec<usize> = order
            .iter()
            .rev()
            .copied()
            .filter(|&i| self.deliveries[i].end < self.start)
            .collect();
        // 阶段 3: 更晚的交付，最早的优先
        let later: Vec<usize> = order
            .iter()
            .copied()
            .filter(|&i| self.deliveries[i].end >= self.end)
            .collect();

        for i in in_bucket.into_iter().chain(earlier).chain(later) {
            let d = &mut self.deliveries[i];
            if d.quantity > remaining + ROUNDING_ERROR {
                d.quantity -= remaining;
                return;
            }
            remaining -= d.quantity;
            d.quantity = 0.0;
        }
    }

    /// 仍承诺的总数量
    pub fn delivered(&self) -> f64 {
        self.deliveries.iter().map(|d| d.quantity).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn dt(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(0, 0, 0).unwrap()
    }

    fn record() -> ForecastBucket {
        ForecastBucket {
            name: "test - 2024-03-01".to_string(),
            start: dt(2024, 3, 1),
            end: dt(2024, 4, 1),
            due: dt(2024, 3, 16),
            priority: 10,
            quantity: 30.0,
            deliveries: vec![
                Delivery { end: dt(2024, 2, 20), quantity: 5.0 },
                Delivery { end: dt(2024, 3, 10), quantity: 10.0 },
                Delivery { end: dt(2024, 4, 5), quantity: 8.0 },
            ],
        }
    }

    #[test]
    fn reduces_in_bucket_deliveries_first() {
        let mut r = record();
        r.reduce_deliveries(4.0);
        assert_eq!(r.deliveries[1].quantity, 6.0);
        assert_eq!(r.deliveries[0].quantity, 5.0);
        assert_eq!(r.deliveries[2].quantity, 8.0);
    }

    #[test]
    fn spills_backward_then_forward() {
        let mut r = record();
        r.reduce_deliveries(17.0);
        // 先削桶内 10，再削更早 5，最后削更晚 2
        assert_eq!(r.deliveries[1].quantity, 0.0);
        assert_eq!(r.deliveries[0].quantity, 0.0);
        assert_eq!(r.deliveries[2].quantity, 6.0);
    }
}
