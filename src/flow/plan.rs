//! 编译后的流程：文档在加载边界一次性解析为类型化结构，之后的逻辑不再处理字符串

use crate::core::ParseError;
use crate::criteria::Criterion;
use crate::engine::{OptimizationSettings, PlanSetup};
use crate::flow::document::{FlowDocument, MatchRoiEntry};
use crate::flow::lenient::try_float;
use crate::objectives::{entry_label, ObjectiveAdjustment, ObjectiveSpec, RobustSettings};
use crate::roi::StructureSpec;

/// 文档未给出时使用的默认值（来自应用配置）
#[derive(Debug, Clone, PartialEq)]
pub struct FlowDefaults {
    pub max_rounds: u32,
    pub optimization: OptimizationSettings,
    pub robust: RobustSettings,
    pub strict_operations: bool,
}

impl Default for FlowDefaults {
    fn default() -> Self {
        Self {
            max_rounds: 5,
            optimization: OptimizationSettings::default(),
            robust: RobustSettings::default(),
            strict_operations: false,
        }
    }
}

/// 类型化的流程
#[derive(Debug, Clone)]
pub struct FlowPlan {
    pub match_roi: Vec<MatchRoiEntry>,
    pub plan_setup: PlanSetup,
    pub automate: Vec<StructureSpec>,
    /// (条目名, 解析结果)
    pub initial: Vec<(String, Result<ObjectiveSpec, ParseError>)>,
    pub optimization: OptimizationSettings,
    pub optimize_first: bool,
    pub criteria: Vec<Criterion>,
    pub conditional: Vec<StructureSpec>,
    pub adjustments: Vec<ObjectiveAdjustment>,
    pub max_rounds: u32,
    pub robust: RobustSettings,
    pub strict_operations: bool,
}

fn max_rounds(doc: &FlowDocument, default: u32) -> u32 {
    let Some(raw) = &doc.end_flow.max_optimize_rounds else {
        return default;
    };
    match try_float(raw) {
        Some(v) if v >= 0.0 => v as u32,
        _ => {
            tracing::warn!(
                target: "planflow::fallback",
                "Invalid max_optimize_rounds '{}', using {}",
                raw,
                default
            );
            default
        }
    }
}

impl FlowPlan {
    pub fn compile(doc: &FlowDocument, defaults: &FlowDefaults) -> Self {
        let robust = doc
            .robust_settings
            .as_ref()
            .map(|entry| RobustSettings::from_entry(entry, &defaults.robust))
            .unwrap_or_else(|| defaults.robust.clone());

        Self {
            match_roi: doc.match_roi.clone(),
            plan_setup: doc.plan_setup.clone(),
            automate: doc.automate_roi.iter().map(StructureSpec::from_automate).collect(),
            initial: doc
                .initial_functions
                .iter()
                .map(|e| (entry_label(e), ObjectiveSpec::from_entry(e)))
                .collect(),
            optimization: doc
                .optimization_settings
                .clone()
                .unwrap_or_else(|| defaults.optimization.clone()),
            optimize_first: doc.start_flow.optimize_first,
            criteria: doc
                .check_conditions
                .iter()
                .map(|c| {
                    Criterion::new(
                        c.name.trim(),
                        &c.condition_type,
                        c.roi_name.trim(),
                        &c.criteria,
                        &c.active_round,
                    )
                })
                .collect(),
            conditional: doc.condition_rois.iter().map(StructureSpec::from_condition).collect(),
            adjustments: doc
                .function_adjustments
                .iter()
                .map(ObjectiveAdjustment::from_entry)
                .collect(),
            max_rounds: max_rounds(doc, defaults.max_rounds),
            robust,
            strict_operations: defaults.strict_operations,
        }
    }
}
