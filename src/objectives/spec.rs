//! 类型化的目标函数条目：加载时由 FunctionEntry 解析，之后只使用类型化形式

use serde::Serialize;

use crate::core::ParseError;
use crate::engine::{BeamRestriction, DoseFunctionParameters, FunctionKind};
use crate::flow::lenient::{to_bool, try_float};
use crate::flow::{FunctionAdjustmentEntry, FunctionEntry};
use crate::objectives::description::FunctionDescription;

/// 一个目标函数 / 约束
///
/// 约束从不携带权重；Uniformity Constraint 无论输入如何都是约束。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectiveSpec {
    /// 计划内唯一，调整时按 tag 查找
    pub tag: String,
    pub kind: FunctionKind,
    /// 符号 ROI 名，使用时经匹配表解析
    pub roi: String,
    pub weight: Option<f64>,
    pub is_constraint: bool,
    pub restriction: BeamRestriction,
    pub is_robust: bool,
    pub description: FunctionDescription,
}

fn is_constraint_flag(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::String(s) => {
            let lowered = s.trim().to_lowercase();
            if lowered.starts_with("constraint") {
                true
            } else if lowered.starts_with("objective") {
                false
            } else {
                to_bool(value)
            }
        }
        other => to_bool(other),
    }
}

impl ObjectiveSpec {
    pub fn from_entry(entry: &FunctionEntry) -> Result<Self, ParseError> {
        let tag = entry.tag.trim();
        if tag.is_empty() {
            return Err(ParseError::MissingField("tag"));
        }
        let roi = entry.roi_name.trim();
        if roi.is_empty() {
            return Err(ParseError::MissingField("roi_name"));
        }
        let kind: FunctionKind = entry.function_type.parse()?;
        let description = FunctionDescription::parse(kind, &entry.description)?;

        let is_constraint =
            kind.is_always_constraint() || is_constraint_flag(&entry.objective_constraint);
        let weight = if is_constraint {
            None
        } else {
            try_float(&entry.weight)
        };

        Ok(Self {
            tag: tag.to_string(),
            kind,
            roi: roi.to_string(),
            weight,
            is_constraint,
            restriction: BeamRestriction::parse(&entry.restrict_beams),
            is_robust: to_bool(&entry.robust),
            description,
        })
    }

    /// 写入引擎的参数：描述参数 + tag，非约束时再加权重
    pub fn parameters(&self) -> DoseFunctionParameters {
        let mut params = self.description.to_parameters();
        params.tag = Some(self.tag.clone());
        if !self.is_constraint {
            params.weight = self.weight;
        }
        params
    }
}

/// 调整方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AdjustmentMode {
    /// "Add NEW function"
    AddNew,
    /// "Adjust OLD Function"
    AdjustOld,
}

impl std::str::FromStr for AdjustmentMode {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        if lower.starts_with("add") {
            Ok(AdjustmentMode::AddNew)
        } else if lower.starts_with("adjust") || lower.starts_with("edit") {
            Ok(AdjustmentMode::AdjustOld)
        } else {
            Err(ParseError::UnknownKind {
                kind: "adjustment",
                value: s.to_string(),
            })
        }
    }
}

/// 条件触发的函数调整
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectiveAdjustment {
    pub condition: String,
    pub mode: Result<AdjustmentMode, ParseError>,
    pub spec: Result<ObjectiveSpec, ParseError>,
    /// 日志与失败记录使用的条目名
    pub label: String,
}

impl ObjectiveAdjustment {
    pub fn from_entry(entry: &FunctionAdjustmentEntry) -> Self {
        Self {
            condition: entry.condition.trim().to_string(),
            mode: entry.adjustment.parse(),
            spec: ObjectiveSpec::from_entry(&entry.function),
            label: entry_label(&entry.function),
        }
    }
}

/// 条目名：优先用 tag，否则用「类型 @ ROI」
pub fn entry_label(entry: &FunctionEntry) -> String {
    let tag = entry.tag.trim();
    if tag.is_empty() {
        format!("{} @ {}", entry.function_type.trim(), entry.roi_name.trim())
    } else {
        tag.to_string()
    }
}
