//! 流程配置：线上文档、宽松转换、编译、加载与预检

pub mod document;
pub mod lenient;
pub mod loader;
pub mod plan;
pub mod validate;

pub use document::{
    AutomateRoiEntry, BooleanConfig, ConditionEntry, ConditionRoiEntry, ConvertDoseConfig,
    EndFlow, FlowDocument, FunctionAdjustmentEntry, FunctionEntry, MarginConfig, MatchRoiEntry,
    RobustSettingsEntry, StartFlow,
};
pub use lenient::{str_to_float, to_float};
pub use loader::{load_flow, parse_flow};
pub use plan::{FlowDefaults, FlowPlan};
pub use validate::{validate, ValidationFinding};
