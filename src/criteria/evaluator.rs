//! 条件检查器：按声明顺序评估条件，得到本轮的 ConditionResult
//!
//! 未生效的条件直接记为不满足，不做任何剂量查询（查询代价高）。
//! 语法错误、引擎查询失败、ROI 体积为 0 都降级为「不满足」并记录一行诊断，其余条件继续评估。

use serde::Serialize;

use crate::core::{EngineError, EvalContext};
use crate::criteria::grammar::{Criterion, CriterionTest, VolumeUnit};
use crate::engine::{DoseStatistic, PlanningEngine};

/// 单条条件的评估结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CriterionOutcome {
    pub name: String,
    pub met: bool,
    /// 是否真正执行了评估（未生效 / 语法错误时为 false）
    pub evaluated: bool,
    /// 报告值：剂量（cGy）、体积（% 或 cc）或 AlwaysTrue 的当前轮次
    pub value: Option<f64>,
    pub note: Option<String>,
}

impl CriterionOutcome {
    fn skipped(name: &str, note: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            met: false,
            evaluated: false,
            value: None,
            note: Some(note.into()),
        }
    }
}

/// 一轮的条件结果：条件名 → 是否满足；每轮重新生成，不跨轮合并
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConditionResult {
    pub round: u32,
    pub outcomes: Vec<CriterionOutcome>,
}

impl ConditionResult {
    /// 查询条件是否满足；同名条件以后出现者为准
    pub fn get(&self, name: &str) -> Option<bool> {
        self.outcomes
            .iter()
            .rev()
            .find(|o| o.name == name)
            .map(|o| o.met)
    }

    pub fn any_met(&self) -> bool {
        self.outcomes.iter().any(|o| o.met)
    }

    pub fn met_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.met).count()
    }
}

enum Measured {
    Value { value: f64, met: bool },
    Unavailable(String),
}

/// 条件检查器
pub struct ConditionChecker<'a> {
    engine: &'a dyn PlanningEngine,
}

impl<'a> ConditionChecker<'a> {
    pub fn new(engine: &'a dyn PlanningEngine) -> Self {
        Self { engine }
    }

    pub async fn evaluate(&self, criteria: &[Criterion], ctx: &EvalContext<'_>) -> ConditionResult {
        let mut outcomes = Vec::with_capacity(criteria.len());
        for criterion in criteria {
            let outcome = self.evaluate_one(criterion, ctx).await;
            if outcome.evaluated {
                tracing::info!(
                    "Round {}: condition '{}' {} (value: {})",
                    ctx.round,
                    outcome.name,
                    if outcome.met { "met" } else { "not met" },
                    outcome
                        .value
                        .map(|v| format!("{v:.2}"))
                        .unwrap_or_else(|| "-".to_string())
                );
            }
            outcomes.push(outcome);
        }
        let result = ConditionResult {
            round: ctx.round,
            outcomes,
        };
        let skipped = result.outcomes.iter().filter(|o| !o.evaluated).count();
        tracing::info!(
            "Round {}: {} of {} conditions met, {} skipped",
            ctx.round,
            result.met_count(),
            result.outcomes.len(),
            skipped
        );
        result
    }

    async fn evaluate_one(&self, criterion: &Criterion, ctx: &EvalContext<'_>) -> CriterionOutcome {
        let name = criterion.name.as_str();
        match &criterion.active_round {
            Err(e) => {
                tracing::warn!(
                    target: "planflow::fallback",
                    "Condition '{}': invalid active round ({}), treated as not met",
                    name,
                    e
                );
                return CriterionOutcome::skipped(name, e.to_string());
            }
            Ok(gate) if !gate.is_active(ctx.round) => {
                tracing::debug!(
                    "Condition '{}' inactive in round {} (active {})",
                    name,
                    ctx.round,
                    gate.to_wire()
                );
                return CriterionOutcome::skipped(name, format!("inactive ({})", gate.to_wire()));
            }
            Ok(_) => {}
        }

        let test = match &criterion.test {
            Ok(test) => test,
            Err(e) => {
                tracing::warn!("Condition '{}': {}, treated as not met", name, e);
                return CriterionOutcome::skipped(name, e.to_string());
            }
        };

        let roi = ctx.resolve(&criterion.roi);
        match self.measure(test, roi, ctx.round).await {
            Ok(Measured::Value { value, met }) => CriterionOutcome {
                name: name.to_string(),
                met,
                evaluated: true,
                value: Some(value),
                note: None,
            },
            Ok(Measured::Unavailable(reason)) => {
                tracing::warn!("Condition '{}' on '{}': {}, treated as not met", name, roi, reason);
                CriterionOutcome {
                    name: name.to_string(),
                    met: false,
                    evaluated: true,
                    value: None,
                    note: Some(reason),
                }
            }
            Err(e) => {
                tracing::warn!("Condition '{}' on '{}': {}, treated as not met", name, roi, e);
                CriterionOutcome {
                    name: name.to_string(),
                    met: false,
                    evaluated: true,
                    value: None,
                    note: Some(e.to_string()),
                }
            }
        }
    }

    async fn measure(
        &self,
        test: &CriterionTest,
        roi: &str,
        round: u32,
    ) -> Result<Measured, EngineError> {
        match *test {
            CriterionTest::AlwaysTrue => Ok(Measured::Value {
                value: f64::from(round),
                met: true,
            }),
            CriterionTest::MaxDose(t) => {
                let value = self.engine.dose_statistic(roi, DoseStatistic::Max).await?;
                Ok(Measured::Value {
                    value,
                    met: t.comparator.holds(value, t.value),
                })
            }
            CriterionTest::MinDose(t) => {
                let value = self.engine.dose_statistic(roi, DoseStatistic::Min).await?;
                Ok(Measured::Value {
                    value,
                    met: t.comparator.holds(value, t.value),
                })
            }
            CriterionTest::MeanDose(t) => {
                let value = self
                    .engine
                    .dose_statistic(roi, DoseStatistic::Average)
                    .await?;
                Ok(Measured::Value {
                    value,
                    met: t.comparator.holds(value, t.value),
                })
            }
            CriterionTest::DoseAtVolume {
                volume,
                unit,
                comparator,
                dose,
            } => {
                let fraction = match unit {
                    VolumeUnit::Percent => volume / 100.0,
                    VolumeUnit::Cc => {
                        let total = self.engine.roi_volume(roi).await?;
                        if total <= 0.0 {
                            return Ok(Measured::Unavailable("ROI volume is zero".to_string()));
                        }
                        volume / total
                    }
                };
                let doses = self.engine.dose_at_relative_volumes(roi, &[fraction]).await?;
                let Some(value) = doses.first().copied() else {
                    return Ok(Measured::Unavailable("no dose returned".to_string()));
                };
                Ok(Measured::Value {
                    value,
                    met: comparator.holds(value, dose),
                })
            }
            CriterionTest::VolumeAtDose {
                dose,
                comparator,
                volume,
                unit,
            } => {
                let volumes = self
                    .engine
                    .relative_volume_at_dose_values(roi, &[dose])
                    .await?;
                let Some(relative) = volumes.first().copied() else {
                    return Ok(Measured::Unavailable("no volume returned".to_string()));
                };
                let value = match unit {
                    VolumeUnit::Percent => relative * 100.0,
                    VolumeUnit::Cc => relative * self.engine.roi_volume(roi).await?,
                };
                Ok(Measured::Value {
                    value,
                    met: comparator.holds(value, volume),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{RoiDose, SimulatedEngine};
    use crate::roi::{RoiMatch, RoiMatchMap};

    fn engine() -> SimulatedEngine {
        SimulatedEngine::new()
            .with_plan("Plan1")
            .with_roi(
                "PTV_actual",
                RoiDose::new(300.0)
                    .with_stats(4400.0, 3700.0, 4050.0)
                    .with_dvh(vec![(3700.0, 1.0), (3950.0, 0.95), (4400.0, 0.0)]),
            )
            .with_roi(
                "Rectum",
                RoiDose::new(150.0)
                    .with_stats(4100.0, 200.0, 1800.0)
                    .with_dvh(vec![(0.0, 1.0), (2000.0, 0.1), (4100.0, 0.0)]),
            )
            .with_roi("Empty", RoiDose::new(0.0).with_dvh(vec![(0.0, 1.0), (10.0, 0.0)]))
    }

    fn map() -> RoiMatchMap {
        let mut map = RoiMatchMap::new();
        map.insert("PTV", RoiMatch::Matched("PTV_actual".into()));
        map
    }

    #[tokio::test]
    async fn test_dose_at_volume_percent_reports_dose() {
        let engine = engine();
        let map = map();
        let ctx = EvalContext::new(1, &map);
        let criteria = vec![Criterion::new("cov", "DaV", "PTV", "D95% ≥ 3900 cGy", "≥ 0")];
        let result = ConditionChecker::new(&engine).evaluate(&criteria, &ctx).await;
        assert_eq!(result.get("cov"), Some(true));
        assert_eq!(result.outcomes[0].value, Some(3950.0));
    }

    #[tokio::test]
    async fn test_volume_at_dose_in_cc() {
        let engine = engine();
        let map = map();
        let ctx = EvalContext::new(1, &map);
        let criteria = vec![Criterion::new("v20", "VaD", "Rectum", "V2000cGy ≤ 20cc", "≥ 0")];
        let result = ConditionChecker::new(&engine).evaluate(&criteria, &ctx).await;
        assert_eq!(result.get("v20"), Some(true));
        let value = result.outcomes[0].value.unwrap();
        assert!((value - 15.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_dose_at_volume_in_cc_converts_by_roi_volume() {
        let engine = engine();
        let map = map();
        let ctx = EvalContext::new(1, &map);
        // 15cc / 150cc = 0.1 相对体积，对应 2000 cGy
        let criteria = vec![Criterion::new("d15cc", "DaV", "Rectum", "D15cc ≤ 2000 cGy", "≥ 0")];
        let result = ConditionChecker::new(&engine).evaluate(&criteria, &ctx).await;
        assert_eq!(result.get("d15cc"), Some(true));
        let value = result.outcomes[0].value.unwrap();
        assert!((value - 2000.0).abs() < 1e-9);
        assert_eq!(engine.count_calls("roi_volume").await, 1);
    }

    #[tokio::test]
    async fn test_volume_at_dose_in_percent_reports_percent() {
        let engine = engine();
        let map = map();
        let ctx = EvalContext::new(1, &map);
        let criteria = vec![
            Criterion::new("v20_pct", "VaD", "Rectum", "V2000cGy ≤ 20%", "≥ 0"),
            Criterion::new("v20_tight", "VaD", "Rectum", "V2000cGy ≤ 5%", "≥ 0"),
        ];
        let result = ConditionChecker::new(&engine).evaluate(&criteria, &ctx).await;
        assert_eq!(result.get("v20_pct"), Some(true));
        assert_eq!(result.get("v20_tight"), Some(false));
        for outcome in &result.outcomes {
            assert!((outcome.value.unwrap() - 10.0).abs() < 1e-9);
        }
        assert_eq!(engine.count_calls("roi_volume").await, 0);
    }

    #[tokio::test]
    async fn test_inclusive_comparators_match_literal_comparison() {
        let engine = engine();
        let map = map();
        let ctx = EvalContext::new(1, &map);
        let criteria = vec![
            Criterion::new("hot", "Max Dose", "PTV", "≥4400", "≥ 0"),
            Criterion::new("not_hot", "Max Dose", "PTV", "≥4400.1", "≥ 0"),
            Criterion::new("cold", "Min Dose", "PTV", "≤3700", "≤ 10"),
            Criterion::new("strict", "Max Dose", "PTV", ">4000", "≥ 0"),
        ];
        let result = ConditionChecker::new(&engine).evaluate(&criteria, &ctx).await;
        assert_eq!(result.get("hot"), Some(true));
        assert_eq!(result.get("not_hot"), Some(false));
        assert_eq!(result.get("cold"), Some(true));
        assert_eq!(result.get("strict"), Some(false));
    }

    #[tokio::test]
    async fn test_gated_criteria_are_not_queried() {
        let engine = engine();
        let map = map();
        let criteria = vec![Criterion::new("late", "Max Dose", "PTV", "≥4000", "≥ 3")];
        let checker = ConditionChecker::new(&engine);

        for round in 1..=2 {
            let result = checker.evaluate(&criteria, &EvalContext::new(round, &map)).await;
            assert_eq!(result.get("late"), Some(false));
            assert!(!result.outcomes[0].evaluated);
        }
        assert_eq!(engine.count_calls("dose_statistic").await, 0);

        let result = checker.evaluate(&criteria, &EvalContext::new(3, &map)).await;
        assert_eq!(result.get("late"), Some(true));
        assert_eq!(engine.count_calls("dose_statistic").await, 1);
    }

    #[tokio::test]
    async fn test_failures_downgrade_to_not_met_and_continue() {
        let engine = engine();
        let map = map();
        let ctx = EvalContext::new(2, &map);
        let criteria = vec![
            Criterion::new("bad_gate", "Max Dose", "PTV", "≥4000", "~ 1"),
            Criterion::new("bad_text", "Max Dose", "PTV", "high", "≥ 0"),
            Criterion::new("missing", "Max Dose", "Heart", "≥10", "≥ 0"),
            Criterion::new("zero", "DaV", "Empty", "D1cc ≥ 1 cGy", "≥ 0"),
            Criterion::new("always", "Always True", "", "", "≥ 0"),
            Criterion::new("no_gate", "Max Dose", "PTV", "≥4000", ""),
        ];
        let result = ConditionChecker::new(&engine).evaluate(&criteria, &ctx).await;
        assert_eq!(result.get("bad_gate"), Some(false));
        assert_eq!(result.get("bad_text"), Some(false));
        assert_eq!(result.get("missing"), Some(false));
        assert_eq!(result.get("zero"), Some(false));
        assert_eq!(result.get("always"), Some(true));
        assert_eq!(result.outcomes[4].value, Some(2.0));
        assert_eq!(result.get("no_gate"), Some(false));
        assert!(!result.outcomes[5].evaluated);
    }
}
