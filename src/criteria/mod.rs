//! 条件检查：比较符、条件语法与评估器

pub mod comparator;
pub mod evaluator;
pub mod grammar;

pub use comparator::{Comparator, RoundGate};
pub use evaluator::{ConditionChecker, ConditionResult, CriterionOutcome};
pub use grammar::{Criterion, CriterionKind, CriterionTest, Threshold, VolumeUnit};
