// ==========================================
// 预测立方体 - 核心标识符与枚举
// ==========================================
// 跨模块句柄一律是普通下标: 维度节点、预测节点、度量都按
// arena 下标寻址，从不使用指针。
// ==========================================

use serde::{Deserialize, Serialize};

use crate::domain::error::{ForecastError, ForecastResult};

/// 比较度量值时使用的容差
pub const ROUNDING_ERROR: f64 = 1e-6;

/// 节点在单个维度 arena 内的下标
pub type NodeId = u32;

/// 预测节点在注册表内的下标
pub type ForecastId = u32;

/// 度量在目录中的句柄
///
/// 临时度量的 id 从 `MeasureId::TEMP_BASE` 之上分配，
/// 不进入目录索引。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MeasureId(pub u16);

impl MeasureId {
    /// 空池槽位的哨兵值
    pub const NONE: MeasureId = MeasureId(u16::MAX);

    /// 分配给临时度量的第一个 id
    pub const TEMP_BASE: u16 = 0x8000;
}

// ==========================================
// 预测方法标志位
// ==========================================

/// 节点允许使用的预测方法位掩码
pub mod method_flags {
    pub const CONSTANT: u8 = 1;
    pub const TREND: u8 = 2;
    pub const SEASONAL: u8 = 4;
    pub const INTERMITTENT: u8 = 8;
    pub const MOVING_AVERAGE: u8 = 16;
    pub const MANUAL: u8 = 32;

    /// 全部自动方法
    pub const ALL: u8 = CONSTANT | TREND | SEASONAL | INTERMITTENT | MOVING_AVERAGE;
}

/// 把逗号分隔的方法列表解析为位掩码
///
/// 可接受的 token: automatic、constant、trend、seasonal、
/// intermittent、moving average、manual。
pub fn parse_methods(text: &str) -> ForecastResult<u8> {
    let mut methods = 0u8;
    for token in text.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        methods |= match token {
            "automatic" => method_flags::ALL,
            "constant" => method_flags::CONSTANT,
            "trend" => method_flags::TREND,
            "seasonal" => method_flags::SEASONAL,
            "intermittent" => method_flags::INTERMITTENT,
            "moving average" => method_flags::MOVING_AVERAGE,
            "manual" => method_flags::MANUAL,
            _ => {
                return Err(ForecastError::Data(format!(
                    "can't parse forecast methods list: '{}'",
                    token
                )))
            }
        };
    }
    Ok(methods)
}

/// 把方法位掩码渲染回文本形式
pub fn methods_to_string(methods: u8) -> String {
    if methods == 0 || methods == method_flags::MANUAL {
        return "manual".to_string();
    }
    if methods & method_flags::ALL == method_flags::ALL {
        return "automatic".to_string();
    }
    let mut parts: Vec<&str> = Vec::new();
    if methods & method_flags::CONSTANT != 0 {
        parts.push("constant");
    }
    if methods & method_flags::TREND != 0 {
        parts.push("trend");
    }
    if methods & method_flags::SEASONAL != 0 {
        parts.push("seasonal");
    }
    if methods & method_flags::INTERMITTENT != 0 {
        parts.push("intermittent");
    }
    if methods & method_flags::MOVING_AVERAGE != 0 {
        parts.push("moving average");
    }
    if methods & method_flags::MANUAL != 0 {
        parts.push("manual");
    }
    parts.join(",")
}

// ==========================================
// 实际采用的方法
// ==========================================

/// 求解器为节点选中的方法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AppliedMethod {
    #[default]
    None,
    Constant,
    Trend,
    Seasonal,
    Intermittent,
    MovingAverage,
    Manual,
}

impl AppliedMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppliedMethod::None => "",
            AppliedMethod::Constant => "constant",
            AppliedMethod::Trend => "trend",
            AppliedMethod::Seasonal => "seasonal",
            AppliedMethod::Intermittent => "intermittent",
            AppliedMethod::MovingAverage => "moving average",
            AppliedMethod::Manual => "manual",
        }
    }
}

// ==========================================
// 桶筛选范围
// ==========================================

/// 度量重置使用的桶过滤器，相对当前预测日期
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetRange {
    /// 在预测日期当天或之前结束的桶
    Past,
    /// 在预测日期当天或之前开始的桶
    PastAndCurrent,
    /// 全部桶
    All,
    /// 在预测日期之后结束的桶
    CurrentAndFuture,
    /// 在预测日期之后开始的桶
    Future,
}

/// 到期日在需求桶内的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DueWithinBucket {
    Start,
    #[default]
    Middle,
    End,
}
