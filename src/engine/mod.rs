//! 计划引擎：外部剂量计算 / 几何 / 优化系统的抽象与模拟实现

pub mod mock;
pub mod traits;
pub mod types;

pub use mock::{RoiDose, RoiGeometry, SimulatedEngine, SimulatedFunction, SimulatedPatient};
pub use traits::PlanningEngine;
pub use types::{
    BeamRestriction, BeamSpec, BooleanGeometryRequest, DoseDistribution, DoseFunctionParameters,
    DoseStatistic, FunctionEdit, FunctionHandle, FunctionKind, FunctionSummary, GeometryOperation,
    MarginSettings, MarginType, NewFunction, OptimizationSettings, PlanSetup, PlanSetupMode,
    RoiExpression, RoiHandle, RobustMethod, RobustnessParameters,
};
