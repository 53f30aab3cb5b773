// ==========================================
// 预测立方体 - 计算型度量表达式
// ==========================================
// evalexpr 的薄封装: 表达式在度量注册时编译一次；读写标识符
// 集合预先提取，用于驱动依赖重算。
// ==========================================

use evalexpr::{build_operator_tree, Context, ContextWithMutableVariables, HashMapContext, Node, Value};

use crate::domain::error::{ForecastError, ForecastResult};

/// 编译后的度量表达式
#[derive(Debug, Clone)]
pub struct CompiledExpression {
    text: String,
    node: Node,
    reads: Vec<String>,
    writes: Vec<String>,
}

impl CompiledExpression {
    /// 编译表达式，解析失败属数据错误
    pub fn compile(text: &str) -> ForecastResult<Self> {
        let node = build_operator_tree(text).map_err(|e| {
            ForecastError::Data(format!("invalid measure expression '{}': {}", text, e))
        })?;
        let mut reads: Vec<String> = node
            .iter_read_variable_identifiers()
            .map(str::to_string)
            .collect();
        reads.sort();
        reads.dedup();
        let mut writes: Vec<String> = node
            .iter_write_variable_identifiers()
            .map(str::to_string)
            .collect();
        writes.sort();
        writes.dedup();
        Ok(CompiledExpression {
            text: text.to_string(),
            node,
            reads,
            writes,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// 表达式读取的标识符
    pub fn reads(&self) -> &[String] {
        &self.reads
    }

    /// 表达式赋值的标识符
    pub fn writes(&self) -> &[String] {
        &self.writes
    }

    /// 在只读符号表上求值为数字
    pub fn evaluate(&self, ctx: &HashMapContext) -> ForecastResult<f64> {
        Ok(self.node.eval_number_with_context(ctx)?)
    }

    /// 运行表达式，允许赋值修改符号表
    pub fn run(&self, ctx: &mut HashMapContext) -> ForecastResult<()> {
        self.node.eval_with_context_mut(ctx)?;
        Ok(())
    }
}

/// 由 (name, value) 对构建符号表
pub fn build_context<I>(values: I) -> ForecastResult<HashMapContext>
where
    I: IntoIterator<Item = (String, f64)>,
{
    let mut ctx = HashMapContext::new();
    for (name, value) in values {
        ctx.set_value(name, Value::Float(value))?;
    }
    Ok(ctx)
}

/// 从符号表读回数值变量
pub fn context_number(ctx: &HashMapContext, name: &str) -> ForecastResult<f64> {
    match ctx.get_value(name) {
        Some(v) => Ok(v.as_number()?),
        None => Err(ForecastError::Expression(format!(
            "expression variable '{}' is undefined",
            name
        ))),
    }
}
