// ==========================================
// 预测立方体 - 核心错误类型
// ==========================================
// 工具: thiserror 派生宏
// 分类: 数据 / 逻辑 / 资源，外加锁中毒
// 数值不收敛不算错误，方法引擎以 f64::MAX 的拟合上报。
// ==========================================

use thiserror::Error;

use crate::repository::error::RepositoryError;

/// 预测立方体的核心错误类型
#[derive(Error, Debug)]
pub enum ForecastError {
    // ===== 输入数据错误 =====
    #[error("data error: {0}")]
    Data(String),

    // ===== 内部不变量被破坏 =====
    #[error("logic error: {0}")]
    Logic(String),

    // ===== 内存 / 存储耗尽 =====
    #[error("resource error: {0}")]
    Resource(String),

    // ===== 同步原语中毒 =====
    #[error("lock poisoned: {0}")]
    Lock(String),

    // ===== 计算型度量表达式失败 =====
    #[error("expression error: {0}")]
    Expression(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<evalexpr::EvalexprError> for ForecastError {
    fn from(err: evalexpr::EvalexprError) -> Self {
        ForecastError::Expression(err.to_string())
    }
}

impl ForecastError {
    /// 锁中毒映射为错误而不是 panic
    pub fn poisoned(what: &str) -> Self {
        ForecastError::Lock(format!("{} mutex poisoned", what))
    }
}

/// 核心层的 Result 别名
pub type ForecastResult<T> = Result<T, ForecastError>;
