// ==========================================
// 预测立方体 - 配置层
// ==========================================
// 职责: 模型与求解器设置及其文件持久化
// 存储: JSON 文件，默认位于用户配置目录
// ==========================================
// ==========================================

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::error::{ForecastError, ForecastResult};
use crate::domain::types::DueWithinBucket;

/// 模型级设置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastSettings {
    /// 日历中保留的需求历史天数
    pub horizon_history: i64,
    /// 日历中保留的未来桶天数
    pub horizon_future: i64,
    /// 预测需求在桶内的到期位置
    pub due_within_bucket: DueWithinBucket,
    /// 每次编辑立即落库
    pub write_immediately: bool,
    /// 数据库文件；缺省时立方体仅驻内存
    pub db_path: Option<String>,
}

impl Default for ForecastSettings {
    fn default() -> Self {
        ForecastSettings {
            horizon_history: 3650,
            horizon_future: 1095,
            due_within_bucket: DueWithinBucket::Middle,
            write_immediately: false,
            db_path: None,
        }
    }
}

/// 时间序列求解器设置
///
/// 默认值沿用月度需求桶的长期实践；取值范围由各方法
/// 自行截断。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// 每个方法的参数调优迭代次数
    pub iterations: usize,
    /// 历史上每向前一桶的权重衰减
    pub smape_alfa: f64,
    /// 不计入误差指标的预热桶数
    pub skip: usize,
    /// 离群点截断带宽（标准差倍数）
    pub forecast_max_deviation: f64,
    /// 叶子节点末尾连续不活跃达到该天数即转手工
    pub dead_after_inactivity_days: i64,
    /// 无数据桶按平均需求处理而不是跳过
    pub average_no_data_days: bool,

    pub moving_average_order: usize,

    pub single_initial_alfa: f64,
    pub single_min_alfa: f64,
    pub single_max_alfa: f64,

    pub double_initial_alfa: f64,
    pub double_min_alfa: f64,
    pub double_max_alfa: f64,
    pub double_initial_gamma: f64,
    pub double_min_gamma: f64,
    pub double_max_gamma: f64,
    pub double_dampen_trend: f64,

    pub seasonal_min_period: usize,
    pub seasonal_max_period: usize,
    pub seasonal_initial_alfa: f64,
    pub seasonal_min_alfa: f64,
    pub seasonal_max_alfa: f64,
    pub seasonal_initial_beta: f64,
    pub seasonal_min_beta: f64,
    pub seasonal_max_beta: f64,
    pub seasonal_gamma: f64,
    pub seasonal_dampen_trend: f64,
    /// 自相关低于该值不允许判定为季节性
    pub seasonal_min_autocorrelation: f64,
    /// 自相关高于该值强制采用季节性方法
    pub seasonal_max_autocorrelation: f64,

    pub croston_initial_alfa: f64,
    pub croston_min_alfa: f64,
    pub croston_max_alfa: f64,
    /// 判定序列为间歇性的零桶占比
    pub croston_min_intermittence: f64,
    /// 需求完全停止后预测的衰减速率
    pub croston_decay_rate: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig {
            iterations: 15,
            smape_alfa: 0.95,
            skip: 5,
            forecast_max_deviation: 4.0,
            dead_after_inactivity_days: 365,
            average_no_data_days: true,
            moving_average_order: 5,
            single_initial_alfa: 0.2,
            single_min_alfa: 0.03,
            single_max_alfa: 1.0,
            double_initial_alfa: 0.2,
            double_min_alfa: 0.02,
            double_max_alfa: 1.0,
            double_initial_gamma: 0.2,
            double_min_gamma: 0.05,
            double_max_gamma: 1.0,
            double_dampen_trend: 0.8,
            seasonal_min_period: 2,
            seasonal_max_period: 14,
            seasonal_initial_alfa: 0.2,
            seasonal_min_alfa: 0.02,
            seasonal_max_alfa: 1.0,
            seasonal_initial_beta: 0.2,
            seasonal_min_beta: 0.2,
            seasonal_max_beta: 1.0,
            seasonal_gamma: 0.05,
            seasonal_dampen_trend: 0.8,
            seasonal_min_autocorrelation: 0.5,
            seasonal_max_autocorrelation: 0.8,
            croston_initial_alfa: 0.1,
            croston_min_alfa: 0.03,
            croston_max_alfa: 0.8,
            croston_min_intermittence: 0.33,
            croston_decay_rate: 0.1,
        }
    }
}

/// 完整配置文件
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub settings: ForecastSettings,
    pub solver: SolverConfig,
}

impl AppConfig {
    /// 默认配置文件位置
    pub fn default_path() -> ForecastResult<PathBuf> {
        let base = dirs::config_dir().ok_or_else(|| {
            ForecastError::Resource("no user configuration directory".to_string())
        })?;
        Ok(base.join("forecast-cube").join("config.json"))
    }

    /// 加载配置文件；文件不存在时返回默认值
    pub fn load<P: AsRef<Path>>(path: P) -> ForecastResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "configuration file missing, using defaults");
            return Ok(AppConfig::default());
        }
        let text = fs::read_to_string(path).map_err(|e| {
            ForecastError::Resource(format!("cannot read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&text).map_err(|e| {
            ForecastError::Data(format!("invalid configuration {}: {}", path.display(), e))
        })
    }

    /// 保存配置，父目录不存在时自动创建
    pub fn save<P: AsRef<Path>>(&self, path: P) -> ForecastResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                ForecastError::Resource(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| ForecastError::Data(format!("cannot serialize configuration: {}", e)))?;
        fs::write(path, text).map_err(|e| {
            ForecastError::Resource(format!("cannot write {}: {}", path.display(), e))
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_json() {
        let config = AppConfig::default();
        let text = serde_json::to_string(&config).unwrap();
        let back: AppConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(back.solver.iterations, 15);
        assert_eq!(back.settings.horizon_history, 3650);
        assert_eq!(back.solver.seasonal_max_period, 14);
    }

    #[test]
    fn partial_files_fill_in_defaults() {
        let back: AppConfig =
            serde_json::from_str(r#"{"solver": {"iterations": 30}}"#).unwrap();
        assert_eq!(back.solver.iterations, 30);
        assert_eq!(back.solver.skip, 5);
        assert!(!back.settings.write_immediately);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = AppConfig::load("/nonexistent/forecast-cube/config.json").unwrap();
        assert_eq!(config.solver.moving_average_order, 5);
    }
}
