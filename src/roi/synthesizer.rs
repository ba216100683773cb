//! 结构合成：按 order 依次创建或更新 ROI
//!
//! - Automate 变体：无条件处理全部条目（仅布尔几何）
//! - Conditional 变体：仅处理所引用条件在本轮满足的条目；支持布尔几何与剂量阈值
//!
//! 同名 ROI 已存在时原地更新几何，不会重复创建。

use serde::Serialize;
use serde_json::Value;

use crate::core::{EntryFailure, EvalContext, FlowError, ParseError};
use crate::engine::PlanningEngine;
use crate::flow::lenient::{to_order, try_float};
use crate::flow::{AutomateRoiEntry, BooleanConfig, ConditionRoiEntry};
use crate::roi::algebra::SetAlgebraBuilder;

/// 结构的几何来源
#[derive(Debug, Clone, PartialEq)]
pub enum StructureMethod {
    Boolean(BooleanConfig),
    /// 阈值保留原始值，处理时再转换（失败则跳过该条目）
    DoseThreshold(Value),
}

/// 一条待合成的结构
#[derive(Debug, Clone, PartialEq)]
pub struct StructureSpec {
    pub name: String,
    pub order: f64,
    /// 条件变体中引用的条件名
    pub condition: Option<String>,
    pub method: Result<StructureMethod, ParseError>,
}

impl StructureSpec {
    pub fn from_automate(entry: &AutomateRoiEntry) -> Self {
        Self {
            name: entry.roi_name.trim().to_string(),
            order: to_order(&entry.order),
            condition: None,
            method: Ok(StructureMethod::Boolean(entry.boolean_config.clone())),
        }
    }

    pub fn from_condition(entry: &ConditionRoiEntry) -> Self {
        Self {
            name: entry.roi_name.trim().to_string(),
            order: to_order(&entry.order),
            condition: Some(entry.condition.trim().to_string()),
            method: parse_method(entry),
        }
    }
}

fn parse_method(entry: &ConditionRoiEntry) -> Result<StructureMethod, ParseError> {
    let normalized: String = entry
        .method
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect::<String>()
        .to_lowercase();
    match normalized.as_str() {
        "boolean" | "booleanoperation" | "" => entry
            .boolean_config
            .clone()
            .map(StructureMethod::Boolean)
            .ok_or(ParseError::MissingField("boolean_config")),
        "convertdose" | "dose" | "dosethreshold" => entry
            .convert_dose
            .as_ref()
            .map(|c| StructureMethod::DoseThreshold(c.threshold_dose.clone()))
            .ok_or(ParseError::MissingField("convert_dose")),
        _ => Err(ParseError::UnknownKind {
            kind: "structure method",
            value: entry.method.clone(),
        }),
    }
}

/// 合成器变体；新建 ROI 的显示颜色随变体不同（仅用于区分）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SynthesisVariant {
    Automate,
    Conditional,
}

impl SynthesisVariant {
    pub fn label(&self) -> &'static str {
        match self {
            SynthesisVariant::Automate => "Automate ROI",
            SynthesisVariant::Conditional => "Condition ROI",
        }
    }

    fn boolean_color(&self) -> &'static str {
        match self {
            SynthesisVariant::Automate => "SkyBlue",
            SynthesisVariant::Conditional => "Orange",
        }
    }

    fn dose_color(&self) -> &'static str {
        "Red"
    }
}

/// 一次合成的统计
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StructurePassSummary {
    pub total: usize,
    pub created: usize,
    pub updated: usize,
    /// 条件未满足而跳过的条目
    pub skipped: usize,
    pub failures: Vec<EntryFailure>,
}

impl StructurePassSummary {
    pub fn completed(&self) -> usize {
        self.created + self.updated
    }
}

/// 结构合成器
pub struct StructureSynthesizer<'a> {
    engine: &'a dyn PlanningEngine,
    builder: SetAlgebraBuilder,
    variant: SynthesisVariant,
}

impl<'a> StructureSynthesizer<'a> {
    pub fn new(
        engine: &'a dyn PlanningEngine,
        builder: SetAlgebraBuilder,
        variant: SynthesisVariant,
    ) -> Self {
        Self {
            engine,
            builder,
            variant,
        }
    }

    /// 按 order 升序处理（同序保持列表位置）；只有致命引擎错误会中断并返回 Err
    pub async fn run(
        &self,
        specs: &[StructureSpec],
        ctx: &EvalContext<'_>,
    ) -> Result<StructurePassSummary, FlowError> {
        let mut ordered: Vec<&StructureSpec> = specs.iter().collect();
        ordered.sort_by(|a, b| a.order.total_cmp(&b.order));

        let mut summary = StructurePassSummary {
            total: ordered.len(),
            ..Default::default()
        };
        for spec in ordered {
            if self.variant == SynthesisVariant::Conditional {
                match self.condition_met(spec, ctx) {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::debug!(
                            "{}: '{}' skipped, condition not met",
                            self.variant.label(),
                            spec.name
                        );
                        summary.skipped += 1;
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!("{}: '{}' skipped: {}", self.variant.label(), spec.name, e);
                        summary.failures.push(EntryFailure::new(&spec.name, &e));
                        continue;
                    }
                }
            }

            match self.synthesize(spec, ctx).await {
                Ok(true) => summary.created += 1,
                Ok(false) => summary.updated += 1,
                Err(e) if e.aborts_run() => {
                    tracing::error!("{}: '{}' failed: {}", self.variant.label(), spec.name, e);
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!("{}: '{}' skipped: {}", self.variant.label(), spec.name, e);
                    summary.failures.push(EntryFailure::new(&spec.name, &e));
                }
            }
        }

        tracing::info!(
            "{}: {} of {} completed, {} skipped",
            self.variant.label(),
            summary.completed(),
            summary.total,
            summary.skipped + summary.failures.len()
        );
        Ok(summary)
    }

    fn condition_met(
        &self,
        spec: &StructureSpec,
        ctx: &EvalContext<'_>,
    ) -> Result<bool, FlowError> {
        let name = spec.condition.as_deref().unwrap_or_default();
        ctx.conditions
            .and_then(|c| c.get(name))
            .ok_or_else(|| FlowError::UnknownCondition(name.to_string()))
    }

    /// 返回 true 表示新建，false 表示更新已有 ROI
    async fn synthesize(
        &self,
        spec: &StructureSpec,
        ctx: &EvalContext<'_>,
    ) -> Result<bool, FlowError> {
        if spec.name.is_empty() {
            return Err(FlowError::Config("roi_name is empty".to_string()));
        }
        let method = spec.method.as_ref().map_err(|e| FlowError::Parse(e.clone()))?;
        match method {
            StructureMethod::Boolean(config) => {
                let request = self.builder.build(config, ctx)?;
                let handle = self
                    .engine
                    .create_or_get_roi(&spec.name, self.variant.boolean_color())
                    .await?;
                self.engine.apply_boolean_geometry(&handle, &request).await?;
                tracing::info!(
                    "{}: {} '{}' ({} {} {})",
                    self.variant.label(),
                    if handle.created { "created" } else { "updated" },
                    handle.name,
                    request.expr_a.sources.join(","),
                    request.operation,
                    request.expr_b.sources.join(",")
                );
                Ok(handle.created)
            }
            StructureMethod::DoseThreshold(raw) => {
                let threshold = try_float(raw).ok_or_else(|| {
                    FlowError::Config(format!("threshold_dose '{raw}' is not a number"))
                })?;
                let dose = self.engine.latest_total_dose().await?;
                let handle = self
                    .engine
                    .create_or_get_roi(&spec.name, self.variant.dose_color())
                    .await?;
                self.engine
                    .apply_dose_threshold_geometry(&handle, &dose, threshold)
                    .await?;
                tracing::info!(
                    "{}: {} '{}' from {} at {} cGy",
                    self.variant.label(),
                    if handle.created { "created" } else { "updated" },
                    handle.name,
                    dose.label,
                    threshold
                );
                Ok(handle.created)
            }
        }
    }
}
