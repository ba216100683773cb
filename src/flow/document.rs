//! 流程配置文档（JSON 线上格式）
//!
//! 字段名与外部编辑器保持一致；数值字段保留为 `serde_json::Value`，由使用方宽松转换。
//! 比较符使用 Unicode 字形 `≥ ≤ > < =`，原样保存。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::{OptimizationSettings, PlanSetup};

/// 流程配置文档根
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowDocument {
    pub match_roi: Vec<MatchRoiEntry>,
    pub plan_setup: PlanSetup,
    pub automate_roi: Vec<AutomateRoiEntry>,
    pub initial_functions: Vec<FunctionEntry>,
    pub optimization_settings: Option<OptimizationSettings>,
    pub start_flow: StartFlow,
    pub check_conditions: Vec<ConditionEntry>,
    pub condition_rois: Vec<ConditionRoiEntry>,
    pub function_adjustments: Vec<FunctionAdjustmentEntry>,
    pub end_flow: EndFlow,
    pub robust_settings: Option<RobustSettingsEntry>,
}

/// ROI 匹配条目；possible_roi_name 为逗号分隔的候选名
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchRoiEntry {
    pub roi_name: String,
    pub possible_roi_name: String,
}

/// 单侧或结果边界
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarginConfig {
    /// "Expand" / "Contract"
    #[serde(rename = "type")]
    pub margin_type: String,
    pub superior: Value,
    pub inferior: Value,
    pub anterior: Value,
    pub posterior: Value,
    pub right: Value,
    pub left: Value,
}

/// 布尔几何配置：两侧各带边界，运算后再套一层结果边界
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BooleanConfig {
    pub roi_a: String,
    pub margin_a: MarginConfig,
    pub operation: String,
    pub roi_b: String,
    pub margin_b: MarginConfig,
    pub output_margin: MarginConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomateRoiEntry {
    pub order: Value,
    pub roi_name: String,
    pub boolean_config: BooleanConfig,
}

/// 优化函数条目（初始函数与调整条目共用）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FunctionEntry {
    pub tag: String,
    pub function_type: String,
    pub roi_name: String,
    pub weight: Value,
    /// "Objective" / "Constraint"，也接受布尔值（true 表示约束）
    pub objective_constraint: Value,
    pub restrict_beams: String,
    pub robust: Value,
    pub description: String,
}

/// 条件条目；active_round 为两段字符串，如 `"≥ 3"`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConditionEntry {
    pub name: String,
    pub condition_type: String,
    pub roi_name: String,
    pub criteria: String,
    pub active_round: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvertDoseConfig {
    pub threshold_dose: Value,
}

/// 条件 ROI 条目：method 为 "Boolean" 或 "Convert Dose"
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConditionRoiEntry {
    pub order: Value,
    pub condition: String,
    pub roi_name: String,
    pub method: String,
    pub boolean_config: Option<BooleanConfig>,
    pub convert_dose: Option<ConvertDoseConfig>,
}

/// 函数调整条目：adjustment 为 "Add NEW function" 或 "Adjust OLD Function"
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FunctionAdjustmentEntry {
    pub condition: String,
    pub adjustment: String,
    #[serde(flatten)]
    pub function: FunctionEntry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StartFlow {
    pub optimize_first: bool,
}

impl Default for StartFlow {
    fn default() -> Self {
        Self {
            optimize_first: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndFlow {
    /// 缺省时使用应用配置中的 flow.default_max_rounds
    pub max_optimize_rounds: Option<Value>,
}

/// 鲁棒设置（位置不确定度 cm，密度不确定度 %）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RobustSettingsEntry {
    pub superior: Value,
    pub inferior: Value,
    pub anterior: Value,
    pub posterior: Value,
    pub right: Value,
    pub left: Value,
    pub density_uncertainty: Value,
    pub method: String,
}
