//! 目标函数：描述语法、类型化条目、合成 / 调整与鲁棒设置

pub mod description;
pub mod robust;
pub mod spec;
pub mod synthesizer;

pub use description::{DvhVolume, FunctionDescription};
pub use robust::{save_if_any_robust, RobustSettings};
pub use spec::{entry_label, AdjustmentMode, ObjectiveAdjustment, ObjectiveSpec};
pub use synthesizer::{ObjectivePassSummary, ObjectiveSynthesizer};
