//! 核心层：错误分类、流程状态与轮次控制器

pub mod controller;
pub mod error;
pub mod state;

pub use controller::{RoundController, RoundRecord, RunReport, TerminalReason};
pub use error::{EngineError, FlowError, ParseError};
pub use state::{EntryFailure, EvalContext, FlowPhase, RoundState};
