//! 轮次控制器：一次性准备 + 有界条件优化循环
//!
//! 阶段：Setup → InitialObjectives → OptimizeFirst → Round(1..=n) → Done；任一步骤的致命错误进入 Error。
//! 每轮：评估条件 → 若无条件满足立即结束 → 条件 ROI → 函数调整 → 运行一次优化器。
//! 终止只有两条路径：本轮无条件满足，或轮次用尽。已写入计划的修改不会回滚。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::state::{EvalContext, FlowPhase, RoundState};
use crate::core::FlowError;
use crate::criteria::{ConditionChecker, ConditionResult};
use crate::engine::{PlanSetupMode, PlanningEngine};
use crate::flow::{FlowPlan, ValidationFinding};
use crate::objectives::{ObjectivePassSummary, ObjectiveSynthesizer};
use crate::roi::{
    RoiMatchMap, RoiMatcher, SetAlgebraBuilder, StructurePassSummary, StructureSynthesizer,
    SynthesisVariant,
};

/// 循环结束原因
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TerminalReason {
    /// 该轮没有任何条件满足
    NoConditionMet { round: u32 },
    /// 用完全部轮次
    RoundBudgetExhausted { rounds: u32 },
    /// 致命错误（引擎错误等）
    Failed { phase: String, message: String },
}

/// 一轮的记录
#[derive(Debug, Clone, Serialize)]
pub struct RoundRecord {
    pub round: u32,
    pub conditions: ConditionResult,
    pub structures: Option<StructurePassSummary>,
    pub objectives: Option<ObjectivePassSummary>,
    pub optimized: bool,
}

impl RoundRecord {
    fn new(round: u32, conditions: ConditionResult) -> Self {
        Self {
            round,
            conditions,
            structures: None,
            objectives: None,
            optimized: false,
        }
    }
}

/// 一次运行的完整报告
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub phase: FlowPhase,
    pub terminal: Option<TerminalReason>,
    pub findings: Vec<ValidationFinding>,
    pub roi_map: RoiMatchMap,
    pub automate: Option<StructurePassSummary>,
    pub initial: Option<ObjectivePassSummary>,
    pub optimized_first: bool,
    pub rounds: Vec<RoundRecord>,
}

impl RunReport {
    fn start(findings: Vec<ValidationFinding>) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            finished_at: None,
            phase: FlowPhase::Setup,
            terminal: None,
            findings,
            roi_map: RoiMatchMap::new(),
            automate: None,
            initial: None,
            optimized_first: false,
            rounds: Vec::new(),
        }
    }

    pub fn failed(&self) -> bool {
        matches!(self.terminal, Some(TerminalReason::Failed { .. }))
    }

    /// 实际进入过的轮次数
    pub fn rounds_run(&self) -> u32 {
        self.rounds.len() as u32
    }
}

/// 轮次控制器：独占轮次状态与匹配表，协作者只在单次调用内借用
pub struct RoundController {
    engine: Arc<dyn PlanningEngine>,
    plan: FlowPlan,
}

impl RoundController {
    pub fn new(engine: Arc<dyn PlanningEngine>, plan: FlowPlan) -> Self {
        Self { engine, plan }
    }

    pub fn plan(&self) -> &FlowPlan {
        &self.plan
    }

    /// 运行整个流程；错误不向外抛出，而是体现在报告的 terminal 中
    pub async fn run(&self, findings: Vec<ValidationFinding>) -> RunReport {
        let mut report = RunReport::start(findings);
        tracing::info!(
            "Flow run {} started ({} conditions, max {} rounds)",
            report.run_id,
            self.plan.criteria.len(),
            self.plan.max_rounds
        );

        match self.drive(&mut report).await {
            Ok(reason) => {
                tracing::info!("Flow run {} finished: {:?}", report.run_id, reason);
                report.phase = FlowPhase::Done;
                report.terminal = Some(reason);
            }
            Err(e) => {
                tracing::error!("Flow run {} aborted in {}: {}", report.run_id, report.phase, e);
                report.terminal = Some(TerminalReason::Failed {
                    phase: report.phase.to_string(),
                    message: e.to_string(),
                });
                report.phase = FlowPhase::Error;
            }
        }
        report.finished_at = Some(Utc::now());
        report
    }

    async fn drive(&self, report: &mut RunReport) -> Result<TerminalReason, FlowError> {
        let engine = self.engine.as_ref();
        let builder = SetAlgebraBuilder::new(self.plan.strict_operations);

        // Setup
        report.phase = FlowPhase::Setup;
        report.roi_map = RoiMatcher::new(engine).build(&self.plan.match_roi).await;
        self.prepare_plan(engine, &report.roi_map).await?;
        let setup_ctx = EvalContext::new(0, &report.roi_map);
        let automate = StructureSynthesizer::new(engine, builder, SynthesisVariant::Automate)
            .run(&self.plan.automate, &setup_ctx)
            .await?;
        report.automate = Some(automate);

        // InitialObjectives
        report.phase = FlowPhase::InitialObjectives;
        let objectives = ObjectiveSynthesizer::new(engine, &self.plan.robust);
        let setup_ctx = EvalContext::new(0, &report.roi_map);
        let initial = objectives.run_initial(&self.plan.initial, &setup_ctx).await?;
        report.initial = Some(initial);
        engine
            .apply_optimization_settings(&self.plan.optimization)
            .await?;
        tracing::info!(
            "Optimization settings applied (max iterations {}, tolerance {:e})",
            self.plan.optimization.max_iterations,
            self.plan.optimization.tolerance
        );

        // OptimizeFirst
        if self.plan.optimize_first {
            report.phase = FlowPhase::OptimizeFirst;
            engine.run_optimization().await?;
            report.optimized_first = true;
            tracing::info!("Initial optimization completed");
        }

        // 条件循环
        let mut state = RoundState::new(self.plan.max_rounds);
        let checker = ConditionChecker::new(engine);
        let conditional = StructureSynthesizer::new(engine, builder, SynthesisVariant::Conditional);
        while state.can_continue() {
            let round = state.advance();
            report.phase = FlowPhase::Round(round);
            tracing::info!("Round {} of {}", round, state.max_rounds);

            let ctx = EvalContext::new(round, &report.roi_map);
            let result = checker.evaluate(&self.plan.criteria, &ctx).await;
            let mut record = RoundRecord::new(round, result.clone());
            state.last_result = Some(result);

            let Some(result) = state.last_result.as_ref().filter(|r| r.any_met()) else {
                tracing::info!("Round {}: no condition met, stopping", round);
                report.rounds.push(record);
                return Ok(TerminalReason::NoConditionMet { round });
            };

            let ctx = ctx.with_conditions(result);
            let step = async {
                record.structures = Some(conditional.run(&self.plan.conditional, &ctx).await?);
                record.objectives = Some(
                    objectives
                        .run_adjustments(&self.plan.adjustments, &ctx)
                        .await?,
                );
                engine.run_optimization().await?;
                record.optimized = true;
                Ok::<(), FlowError>(())
            }
            .await;
            report.rounds.push(record);
            step?;
            tracing::info!("Round {}: optimization completed", round);
        }

        Ok(TerminalReason::RoundBudgetExhausted {
            rounds: state.max_rounds,
        })
    }

    async fn prepare_plan(
        &self,
        engine: &dyn PlanningEngine,
        roi_map: &RoiMatchMap,
    ) -> Result<(), FlowError> {
        let setup = &self.plan.plan_setup;
        match setup.mode {
            PlanSetupMode::Skip => {
                tracing::debug!("Plan setup skipped, using the active plan");
            }
            PlanSetupMode::SelectExisting => {
                engine.select_plan(&setup.plan_name).await?;
                tracing::info!("Selected plan '{}'", setup.plan_name);
            }
            PlanSetupMode::Create => {
                let mut setup = setup.clone();
                setup.isocenter_roi = setup
                    .isocenter_roi
                    .as_deref()
                    .map(|roi| roi_map.resolve(roi).to_string());
                engine.create_plan(&setup).await?;
                tracing::info!(
                    "Created plan '{}' / beam set '{}' with {} beams",
                    setup.plan_name,
                    setup.beam_set_name,
                    setup.beams.len()
                );
            }
        }
        Ok(())
    }
}
