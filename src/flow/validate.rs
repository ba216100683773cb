//! 流程预检：在任何引擎调用之前找出配置问题
//!
//! 结果只是告警，不阻止运行；条目级行为仍按各批次的降级规则处理。

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::flow::plan::FlowPlan;
use crate::objectives::AdjustmentMode;
use crate::roi::{lookup_operation, StructureMethod, StructureSpec};

/// 一条预检结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationFinding {
    pub section: &'static str,
    pub entry: String,
    pub message: String,
}

impl std::fmt::Display for ValidationFinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} '{}': {}", self.section, self.entry, self.message)
    }
}

struct Findings(Vec<ValidationFinding>);

impl Findings {
    fn push(&mut self, section: &'static str, entry: &str, message: impl Into<String>) {
        self.0.push(ValidationFinding {
            section,
            entry: entry.to_string(),
            message: message.into(),
        });
    }
}

fn check_structures(
    findings: &mut Findings,
    section: &'static str,
    specs: &[StructureSpec],
    conditions: &BTreeSet<&str>,
    strict: bool,
) {
    for spec in specs {
        if let Some(condition) = &spec.condition {
            if !conditions.contains(condition.as_str()) {
                findings.push(section, &spec.name, format!("unknown condition '{condition}'"));
            }
        }
        match &spec.method {
            Err(e) => findings.push(section, &spec.name, e.to_string()),
            Ok(StructureMethod::Boolean(config)) => {
                if lookup_operation(&config.operation).is_none() {
                    let consequence = if strict {
                        "entry will be skipped"
                    } else {
                        "Union will be used"
                    };
                    findings.push(
                        section,
                        &spec.name,
                        format!("unknown operation '{}', {consequence}", config.operation),
                    );
                }
            }
            Ok(StructureMethod::DoseThreshold(_)) => {}
        }
    }
}

/// 检查重复名称、未知条件引用、无法解析的条件与描述、轮次上限为 0
pub fn validate(plan: &FlowPlan) -> Vec<ValidationFinding> {
    let mut findings = Findings(Vec::new());

    let mut seen: BTreeMap<&str, usize> = BTreeMap::new();
    for criterion in &plan.criteria {
        *seen.entry(criterion.name.as_str()).or_default() += 1;
        if let Err(e) = &criterion.test {
            findings.push("check_conditions", &criterion.name, e.to_string());
        }
        if let Err(e) = &criterion.active_round {
            findings.push("check_conditions", &criterion.name, e.to_string());
        }
    }
    for (name, count) in &seen {
        if *count > 1 {
            findings.push("check_conditions", name, format!("defined {count} times"));
        }
    }
    let conditions: BTreeSet<&str> = seen.keys().copied().collect();

    let strict = plan.strict_operations;
    check_structures(&mut findings, "automate_roi", &plan.automate, &conditions, strict);
    check_structures(&mut findings, "condition_rois", &plan.conditional, &conditions, strict);

    let mut tags: BTreeMap<&str, usize> = BTreeMap::new();
    for (label, spec) in &plan.initial {
        match spec {
            Ok(spec) => *tags.entry(spec.tag.as_str()).or_default() += 1,
            Err(e) => findings.push("initial_functions", label, e.to_string()),
        }
    }
    for adjustment in &plan.adjustments {
        if !conditions.contains(adjustment.condition.as_str()) {
            findings.push(
                "function_adjustments",
                &adjustment.label,
                format!("unknown condition '{}'", adjustment.condition),
            );
        }
        if let Err(e) = &adjustment.mode {
            findings.push("function_adjustments", &adjustment.label, e.to_string());
        }
        match (&adjustment.mode, &adjustment.spec) {
            (Ok(AdjustmentMode::AddNew), Ok(spec)) => {
                *tags.entry(spec.tag.as_str()).or_default() += 1
            }
            (_, Err(e)) => findings.push("function_adjustments", &adjustment.label, e.to_string()),
            _ => {}
        }
    }
    for (tag, count) in &tags {
        if *count > 1 {
            findings.push("functions", tag, format!("tag added {count} times"));
        }
    }

    if plan.max_rounds == 0 {
        findings.push("end_flow", "max_optimize_rounds", "is 0, no optimization rounds will run");
    }

    for finding in &findings.0 {
        tracing::warn!("Flow check: {}", finding);
    }
    findings.0
}
