//! 流程错误类型
//!
//! 配置/解析错误在条目内降级，查找错误只影响单个条目；
//! EngineError 来自计划引擎，在优化器调用等关键步骤上会终止整个流程。

use thiserror::Error;

/// 计划引擎（外部剂量计算/优化系统）返回的错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("ROI not found: {0}")]
    RoiNotFound(String),

    #[error("Optimization function not found: {0}")]
    FunctionNotFound(String),

    #[error("No dose distribution available")]
    NoDoseDistribution,

    #[error("No active plan")]
    NoPlan,

    #[error("Optimization failed: {0}")]
    OptimizationFailed(String),

    #[error("Engine call rejected: {0}")]
    Rejected(String),
}

impl EngineError {
    /// 需要终止整个流程的引擎错误：无计划、无剂量分布、优化器失败
    pub fn aborts_run(&self) -> bool {
        matches!(
            self,
            EngineError::NoPlan
                | EngineError::NoDoseDistribution
                | EngineError::OptimizationFailed(_)
        )
    }
}

/// 条件字符串 / 函数描述的语法错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("Unrecognized comparator: '{0}'")]
    UnknownComparator(String),

    #[error("Malformed criteria '{input}': expected {expected}")]
    MalformedCriteria { input: String, expected: &'static str },

    #[error("Malformed function description '{input}': expected {expected}")]
    MalformedDescription { input: String, expected: &'static str },

    #[error("Malformed active round '{0}'")]
    MalformedActiveRound(String),

    #[error("Unknown {kind}: '{value}'")]
    UnknownKind { kind: &'static str, value: String },

    #[error("Missing field: {0}")]
    MissingField(&'static str),
}

/// 流程运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Config error: {0}")]
    Config(String),

    #[error(transparent)]
    Parse(#[from] ParseError),

    /// 条目引用了不存在的条件名
    #[error("Unknown condition: {0}")]
    UnknownCondition(String),

    /// 按 tag 找不到要调整的函数
    #[error("No optimization function tagged '{0}'")]
    UnknownTag(String),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// 函数已加入计划但参数（含 tag）未写入，需按句柄手动清理
    #[error("Function handle {handle} added without parameters: {source}")]
    UntaggedFunction {
        handle: u64,
        #[source]
        source: EngineError,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FlowError {
    /// 是否属于只影响单个条目的可恢复错误（配置 / 解析 / 查找类）
    pub fn is_entry_local(&self) -> bool {
        matches!(
            self,
            FlowError::Config(_)
                | FlowError::Parse(_)
                | FlowError::UnknownCondition(_)
                | FlowError::UnknownTag(_)
        )
    }

    /// 是否应终止整个流程：引擎错误中的致命类别，以及 IO / JSON 错误
    pub fn aborts_run(&self) -> bool {
        match self {
            FlowError::Engine(e) => e.aborts_run(),
            FlowError::UntaggedFunction { source, .. } => source.aborts_run(),
            FlowError::Io(_) | FlowError::Json(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_local_classification() {
        assert!(FlowError::UnknownTag("ptv_max".into()).is_entry_local());
        assert!(FlowError::UnknownCondition("hot".into()).is_entry_local());
        assert!(FlowError::from(ParseError::UnknownComparator("~".into())).is_entry_local());
        assert!(!FlowError::from(EngineError::OptimizationFailed("x".into())).is_entry_local());
    }

    #[test]
    fn test_abort_classification() {
        assert!(FlowError::from(EngineError::NoPlan).aborts_run());
        assert!(FlowError::from(EngineError::NoDoseDistribution).aborts_run());
        assert!(!FlowError::from(EngineError::RoiNotFound("Heart".into())).aborts_run());
        assert!(!FlowError::UnknownTag("ptv_max".into()).aborts_run());
        let untagged = FlowError::UntaggedFunction {
            handle: 7,
            source: EngineError::Rejected("locked".into()),
        };
        assert!(!untagged.aborts_run());
        assert!(untagged.to_string().contains("handle 7"));
    }

    #[test]
    fn test_engine_error_display() {
        let err = FlowError::from(EngineError::RoiNotFound("Rectum".into()));
        assert_eq!(err.to_string(), "Engine error: ROI not found: Rectum");
    }
}
