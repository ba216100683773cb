//! 流程状态：阶段、轮次状态与每次调用传入的只读评估上下文

use serde::Serialize;

use crate::criteria::ConditionResult;
use crate::roi::RoiMatchMap;

/// 流程阶段：Setup → InitialObjectives → OptimizeFirst → Round(n) … → Done，任意阶段可进入 Error
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum FlowPhase {
    Setup,
    InitialObjectives,
    OptimizeFirst,
    Round(u32),
    Done,
    Error,
}

impl std::fmt::Display for FlowPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlowPhase::Setup => write!(f, "Setup"),
            FlowPhase::InitialObjectives => write!(f, "InitialObjectives"),
            FlowPhase::OptimizeFirst => write!(f, "OptimizeFirst"),
            FlowPhase::Round(n) => write!(f, "Round {n}"),
            FlowPhase::Done => write!(f, "Done"),
            FlowPhase::Error => write!(f, "Error"),
        }
    }
}

/// 轮次状态，由 RoundController 独占修改
#[derive(Clone, Debug, Default)]
pub struct RoundState {
    /// 当前轮次（从 1 开始，0 表示尚未进入循环）
    pub round: u32,
    pub max_rounds: u32,
    pub last_result: Option<ConditionResult>,
}

impl RoundState {
    pub fn new(max_rounds: u32) -> Self {
        Self {
            round: 0,
            max_rounds,
            last_result: None,
        }
    }

    pub fn can_continue(&self) -> bool {
        self.round < self.max_rounds
    }

    pub fn advance(&mut self) -> u32 {
        self.round += 1;
        self.last_result = None;
        self.round
    }
}

/// 批处理中单个条目的失败记录（条目名 + 一行诊断）
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EntryFailure {
    pub entry: String,
    pub message: String,
}

impl EntryFailure {
    pub fn new(entry: impl Into<String>, message: impl ToString) -> Self {
        Self {
            entry: entry.into(),
            message: message.to_string(),
        }
    }
}

/// 单次调用的只读上下文；协作者不得在调用之外持有
#[derive(Clone, Copy, Debug)]
pub struct EvalContext<'a> {
    pub round: u32,
    pub roi_map: &'a RoiMatchMap,
    pub conditions: Option<&'a ConditionResult>,
}

impl<'a> EvalContext<'a> {
    pub fn new(round: u32, roi_map: &'a RoiMatchMap) -> Self {
        Self {
            round,
            roi_map,
            conditions: None,
        }
    }

    pub fn with_conditions(mut self, conditions: &'a ConditionResult) -> Self {
        self.conditions = Some(conditions);
        self
    }

    pub fn resolve<'s>(&'s self, symbolic: &'s str) -> &'s str {
        self.roi_map.resolve(symbolic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_state_budget() {
        let mut state = RoundState::new(2);
        assert!(state.can_continue());
        assert_eq!(state.advance(), 1);
        assert!(state.can_continue());
        assert_eq!(state.advance(), 2);
        assert!(!state.can_continue());
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(FlowPhase::Round(3).to_string(), "Round 3");
        assert_eq!(FlowPhase::OptimizeFirst.to_string(), "OptimizeFirst");
    }
}
