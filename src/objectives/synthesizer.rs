//! 目标函数合成 / 调整
//!
//! - 新建：在当前计划上添加函数，再写入剂量函数参数与 tag
//! - 调整：按 tag 找到函数（约束优先），编辑属性得到新句柄，再覆盖参数
//!
//! 每批处理结束后，若计划中存在鲁棒函数则写入一次鲁棒参数。

use serde::Serialize;

use crate::core::{EntryFailure, EvalContext, FlowError, ParseError};
use crate::engine::{FunctionEdit, FunctionHandle, NewFunction, PlanningEngine};
use crate::objectives::robust::{save_if_any_robust, RobustSettings};
use crate::objectives::spec::{AdjustmentMode, ObjectiveAdjustment, ObjectiveSpec};

/// 一批函数处理的统计
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ObjectivePassSummary {
    pub total: usize,
    pub created: usize,
    pub adjusted: usize,
    /// 条件未满足而跳过的条目
    pub skipped: usize,
    pub failures: Vec<EntryFailure>,
    pub robust_saved: bool,
}

impl ObjectivePassSummary {
    pub fn completed(&self) -> usize {
        self.created + self.adjusted
    }
}

/// 目标函数合成器
pub struct ObjectiveSynthesizer<'a> {
    engine: &'a dyn PlanningEngine,
    robust: &'a RobustSettings,
}

impl<'a> ObjectiveSynthesizer<'a> {
    pub fn new(engine: &'a dyn PlanningEngine, robust: &'a RobustSettings) -> Self {
        Self { engine, robust }
    }

    /// 新建函数
    pub async fn create(
        &self,
        spec: &ObjectiveSpec,
        ctx: &EvalContext<'_>,
    ) -> Result<FunctionHandle, FlowError> {
        let roi = ctx.resolve(&spec.roi);
        let handle = self
            .engine
            .add_optimization_function(&NewFunction {
                kind: spec.kind,
                roi: roi.to_string(),
                is_constraint: spec.is_constraint,
                restriction: spec.restriction.clone(),
                is_robust: spec.is_robust,
            })
            .await?;
        self.engine
            .set_dose_function_parameters(handle, &spec.parameters())
            .await
            .map_err(|source| FlowError::UntaggedFunction {
                handle: handle.0,
                source,
            })?;
        tracing::info!(
            "Added {} '{}' ({}) on '{}'",
            if spec.is_constraint { "constraint" } else { "objective" },
            spec.tag,
            spec.kind,
            roi
        );
        Ok(handle)
    }

    /// 按 tag 调整已有函数；编辑后旧句柄失效，参数写到新句柄上
    pub async fn adjust(
        &self,
        spec: &ObjectiveSpec,
        ctx: &EvalContext<'_>,
    ) -> Result<FunctionHandle, FlowError> {
        let handle = self
            .engine
            .find_function_by_tag(&spec.tag)
            .await?
            .ok_or_else(|| FlowError::UnknownTag(spec.tag.clone()))?;
        let roi = ctx.resolve(&spec.roi);
        let handle = self
            .engine
            .edit_optimization_function(
                handle,
                &FunctionEdit {
                    roi: roi.to_string(),
                    is_constraint: spec.is_constraint,
                    is_robust: spec.is_robust,
                    restriction: spec.restriction.clone(),
                },
            )
            .await?;
        self.engine
            .set_dose_function_parameters(handle, &spec.parameters())
            .await?;
        tracing::info!("Adjusted '{}' ({}) on '{}'", spec.tag, spec.kind, roi);
        Ok(handle)
    }

    /// 初始函数批次：全部新建
    pub async fn run_initial(
        &self,
        specs: &[(String, Result<ObjectiveSpec, ParseError>)],
        ctx: &EvalContext<'_>,
    ) -> Result<ObjectivePassSummary, FlowError> {
        let mut summary = ObjectivePassSummary {
            total: specs.len(),
            ..Default::default()
        };
        for (label, spec) in specs {
            let outcome = match spec {
                Ok(spec) => self.create(spec, ctx).await,
                Err(e) => Err(FlowError::Parse(e.clone())),
            };
            self.record(&mut summary, label, outcome, AdjustmentMode::AddNew)?;
        }
        self.finish("Initial functions", &mut summary).await?;
        Ok(summary)
    }

    /// 条件调整批次：按声明顺序处理，仅处理条件满足的条目
    pub async fn run_adjustments(
        &self,
        adjustments: &[ObjectiveAdjustment],
        ctx: &EvalContext<'_>,
    ) -> Result<ObjectivePassSummary, FlowError> {
        let mut summary = ObjectivePassSummary {
            total: adjustments.len(),
            ..Default::default()
        };
        for adjustment in adjustments {
            let met = ctx
                .conditions
                .and_then(|c| c.get(&adjustment.condition))
                .ok_or_else(|| FlowError::UnknownCondition(adjustment.condition.clone()));
            match met {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!("Function '{}' skipped, condition not met", adjustment.label);
                    summary.skipped += 1;
                    continue;
                }
                Err(e) => {
                    tracing::warn!("Function '{}' skipped: {}", adjustment.label, e);
                    summary.failures.push(EntryFailure::new(&adjustment.label, &e));
                    continue;
                }
            }

            let (mode, outcome) = match (&adjustment.mode, &adjustment.spec) {
                (Ok(mode), Ok(spec)) => {
                    let outcome = match mode {
                        AdjustmentMode::AddNew => self.create(spec, ctx).await,
                        AdjustmentMode::AdjustOld => self.adjust(spec, ctx).await,
                    };
                    (*mode, outcome)
                }
                (Err(e), _) | (_, Err(e)) => {
                    (AdjustmentMode::AdjustOld, Err(FlowError::Parse(e.clone())))
                }
            };
            self.record(&mut summary, &adjustment.label, outcome, mode)?;
        }
        self.finish("Function adjustments", &mut summary).await?;
        Ok(summary)
    }

    fn record(
        &self,
        summary: &mut ObjectivePassSummary,
        label: &str,
        outcome: Result<FunctionHandle, FlowError>,
        mode: AdjustmentMode,
    ) -> Result<(), FlowError> {
        match outcome {
            Ok(_) if mode == AdjustmentMode::AddNew => summary.created += 1,
            Ok(_) => summary.adjusted += 1,
            Err(e) if e.aborts_run() => {
                tracing::error!("Function '{}' failed: {}", label, e);
                return Err(e);
            }
            Err(e) => {
                tracing::warn!("Function '{}' skipped: {}", label, e);
                summary.failures.push(EntryFailure::new(label, &e));
            }
        }
        Ok(())
    }

    async fn finish(
        &self,
        label: &str,
        summary: &mut ObjectivePassSummary,
    ) -> Result<(), FlowError> {
        match save_if_any_robust(self.engine, self.robust).await {
            Ok(saved) => summary.robust_saved = saved,
            Err(e) if e.aborts_run() => return Err(e.into()),
            Err(e) => {
                tracing::warn!("Robustness parameters not saved: {}", e);
                summary.failures.push(EntryFailure::new("robust_settings", &e));
            }
        }
        tracing::info!(
            "{}: {} of {} completed, {} skipped",
            label,
            summary.completed(),
            summary.total,
            summary.skipped + summary.failures.len()
        );
        Ok(())
    }
}
