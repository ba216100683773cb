//! PlanFlow - 放疗计划条件优化循环引擎
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分类、流程状态、轮次控制器与运行报告
//! - **criteria**: 剂量学条件语法与条件检查器
//! - **engine**: 计划引擎契约（async trait）与内存模拟实现
//! - **flow**: 流程配置文档、编译与预检
//! - **objectives**: 函数描述语法、目标函数合成 / 调整、鲁棒设置
//! - **observability**: tracing 日志初始化
//! - **roi**: ROI 匹配、集合代数与结构合成

pub mod config;
pub mod core;
pub mod criteria;
pub mod engine;
pub mod flow;
pub mod objectives;
pub mod observability;
pub mod roi;

pub use crate::core::{RoundController, RunReport, TerminalReason};
pub use crate::engine::{PlanningEngine, SimulatedEngine};
pub use crate::flow::{FlowDocument, FlowPlan};
