//! 计划引擎抽象
//!
//! 剂量计算、ROI 几何与优化器都由外部计划系统提供；流程只通过 PlanningEngine 访问它们。
//! 所有调用按声明顺序逐个 await，不做并发。

use async_trait::async_trait;

use crate::core::EngineError;
use crate::engine::types::{
    BooleanGeometryRequest, DoseDistribution, DoseFunctionParameters, DoseStatistic, FunctionEdit,
    FunctionHandle, FunctionSummary, NewFunction, OptimizationSettings, PlanSetup, RoiHandle,
    RobustnessParameters,
};

/// 计划引擎 trait：剂量查询、ROI 几何、优化函数、优化器
#[async_trait]
pub trait PlanningEngine: Send + Sync {
    /// 将名称解析为患者中实际存在的结构名（大小写不敏感），不存在返回 None
    async fn resolve_roi(&self, name: &str) -> Option<String>;

    async fn dose_statistic(&self, roi: &str, statistic: DoseStatistic) -> Result<f64, EngineError>;

    /// 给定相对体积（0..1）处的剂量（cGy）
    async fn dose_at_relative_volumes(
        &self,
        roi: &str,
        relative_volumes: &[f64],
    ) -> Result<Vec<f64>, EngineError>;

    /// 给定剂量（cGy）处的相对体积（0..1）
    async fn relative_volume_at_dose_values(
        &self,
        roi: &str,
        doses: &[f64],
    ) -> Result<Vec<f64>, EngineError>;

    /// ROI 绝对体积（cc）
    async fn roi_volume(&self, roi: &str) -> Result<f64, EngineError>;

    /// 获取同名 ROI；不存在时以 color 新建
    async fn create_or_get_roi(&self, name: &str, color: &str) -> Result<RoiHandle, EngineError>;

    async fn apply_boolean_geometry(
        &self,
        roi: &RoiHandle,
        request: &BooleanGeometryRequest,
    ) -> Result<(), EngineError>;

    /// 当前计划最近一次计算的总剂量
    async fn latest_total_dose(&self) -> Result<DoseDistribution, EngineError>;

    /// 以「剂量 ≥ threshold 的体素」作为 ROI 几何
    async fn apply_dose_threshold_geometry(
        &self,
        roi: &RoiHandle,
        dose: &DoseDistribution,
        threshold: f64,
    ) -> Result<(), EngineError>;

    async fn add_optimization_function(
        &self,
        function: &NewFunction,
    ) -> Result<FunctionHandle, EngineError>;

    /// 编辑函数属性；返回的新句柄替代传入的句柄
    async fn edit_optimization_function(
        &self,
        handle: FunctionHandle,
        edit: &FunctionEdit,
    ) -> Result<FunctionHandle, EngineError>;

    /// 按 tag 精确查找：先约束，后目标函数
    async fn find_function_by_tag(&self, tag: &str) -> Result<Option<FunctionHandle>, EngineError>;

    async fn set_dose_function_parameters(
        &self,
        handle: FunctionHandle,
        parameters: &DoseFunctionParameters,
    ) -> Result<(), EngineError>;

    /// 列出全部约束与目标函数
    async fn optimization_functions(&self) -> Result<Vec<FunctionSummary>, EngineError>;

    async fn save_robustness_parameters(
        &self,
        parameters: &RobustnessParameters,
    ) -> Result<(), EngineError>;

    async fn create_plan(&self, setup: &PlanSetup) -> Result<(), EngineError>;

    async fn select_plan(&self, plan_name: &str) -> Result<(), EngineError>;

    async fn apply_optimization_settings(
        &self,
        settings: &OptimizationSettings,
    ) -> Result<(), EngineError>;

    async fn run_optimization(&self) -> Result<(), EngineError>;
}
