//! 模拟计划引擎（用于测试与 dry-run，无需真实剂量计算系统）
//!
//! ROI 由体积与累积 DVH 表描述，剂量查询在表上线性插值；每次优化把所有剂量乘以
//! optimization_scale，便于模拟「多轮优化后热点下降」。所有写操作都记入调用日志。

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::core::EngineError;
use crate::engine::types::{
    BeamRestriction, BooleanGeometryRequest, DoseDistribution, DoseFunctionParameters,
    DoseStatistic, FunctionEdit, FunctionHandle, FunctionKind, FunctionSummary, GeometryOperation,
    NewFunction, OptimizationSettings, PlanSetup, RoiHandle, RobustnessParameters,
};
use crate::engine::PlanningEngine;

/// 单个 ROI 的模拟剂量数据
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RoiDose {
    pub volume_cc: f64,
    pub max: f64,
    pub min: f64,
    pub mean: f64,
    /// 累积 DVH：(剂量 cGy, 接受 ≥ 该剂量的相对体积)，剂量升序
    pub dvh: Vec<(f64, f64)>,
}

impl RoiDose {
    pub fn new(volume_cc: f64) -> Self {
        Self {
            volume_cc,
            ..Default::default()
        }
    }

    pub fn with_stats(mut self, max: f64, min: f64, mean: f64) -> Self {
        self.max = max;
        self.min = min;
        self.mean = mean;
        self
    }

    pub fn with_dvh(mut self, points: Vec<(f64, f64)>) -> Self {
        self.dvh = points;
        self
    }

    fn scale(&mut self, factor: f64) {
        self.max *= factor;
        self.min *= factor;
        self.mean *= factor;
        for point in &mut self.dvh {
            point.0 *= factor;
        }
    }

    fn dose_at_relative_volume(&self, volume: f64) -> Option<f64> {
        let first = self.dvh.first()?;
        let last = self.dvh.last()?;
        if volume >= first.1 {
            return Some(first.0);
        }
        if volume <= last.1 {
            return Some(last.0);
        }
        self.dvh.windows(2).find_map(|w| {
            let (d0, v0) = w[0];
            let (d1, v1) = w[1];
            if volume <= v0 && volume >= v1 {
                if (v0 - v1).abs() < f64::EPSILON {
                    return Some(d0);
                }
                Some(d0 + (v0 - volume) / (v0 - v1) * (d1 - d0))
            } else {
                None
            }
        })
    }

    fn relative_volume_at_dose(&self, dose: f64) -> Option<f64> {
        let first = self.dvh.first()?;
        let last = self.dvh.last()?;
        if dose <= first.0 {
            return Some(first.1);
        }
        if dose >= last.0 {
            return Some(last.1);
        }
        self.dvh.windows(2).find_map(|w| {
            let (d0, v0) = w[0];
            let (d1, v1) = w[1];
            if dose >= d0 && dose <= d1 {
                if (d1 - d0).abs() < f64::EPSILON {
                    return Some(v0);
                }
                Some(v0 + (dose - d0) / (d1 - d0) * (v1 - v0))
            } else {
                None
            }
        })
    }
}

/// 患者夹具：可从 JSON 读入，用于 dry-run
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SimulatedPatient {
    pub plans: Vec<String>,
    pub rois: BTreeMap<String, RoiDose>,
    pub optimization_scale: Option<f64>,
}

/// 写入 ROI 的几何来源
#[derive(Debug, Clone, PartialEq)]
pub enum RoiGeometry {
    Boolean(BooleanGeometryRequest),
    DoseThreshold { dose: String, threshold: f64 },
}

#[derive(Debug, Clone)]
struct SimulatedRoi {
    dose: RoiDose,
    color: String,
    geometry: Option<RoiGeometry>,
}

/// 引擎中的一个优化函数
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedFunction {
    pub handle: FunctionHandle,
    pub kind: FunctionKind,
    pub roi: String,
    pub is_constraint: bool,
    pub is_robust: bool,
    pub restriction: BeamRestriction,
    pub parameters: DoseFunctionParameters,
}

impl SimulatedFunction {
    fn summary(&self) -> FunctionSummary {
        FunctionSummary {
            handle: self.handle,
            tag: self.parameters.tag.clone(),
            kind: self.kind,
            roi: self.roi.clone(),
            is_constraint: self.is_constraint,
            is_robust: self.is_robust,
        }
    }
}

#[derive(Debug, Default)]
struct EngineState {
    plans: Vec<String>,
    active_plan: Option<String>,
    rois: BTreeMap<String, SimulatedRoi>,
    dose_available: bool,
    constraints: Vec<SimulatedFunction>,
    objectives: Vec<SimulatedFunction>,
    next_handle: u64,
    robustness: Vec<RobustnessParameters>,
    settings: Option<OptimizationSettings>,
    optimization_runs: usize,
    optimization_scale: f64,
    fail_optimization_after: Option<usize>,
    reject_parameters: bool,
    calls: Vec<String>,
}

impl EngineState {
    fn find_roi_key(&self, name: &str) -> Option<String> {
        let lower = name.trim().to_lowercase();
        self.rois
            .keys()
            .find(|k| k.to_lowercase() == lower)
            .cloned()
    }

    fn roi(&self, name: &str) -> Result<&SimulatedRoi, EngineError> {
        let key = self
            .find_roi_key(name)
            .ok_or_else(|| EngineError::RoiNotFound(name.to_string()))?;
        self.rois
            .get(&key)
            .ok_or_else(|| EngineError::RoiNotFound(name.to_string()))
    }

    fn dosed_roi(&self, name: &str) -> Result<&RoiDose, EngineError> {
        let roi = self.roi(name)?;
        if !self.dose_available {
            return Err(EngineError::NoDoseDistribution);
        }
        Ok(&roi.dose)
    }

    fn function_mut(&mut self, handle: FunctionHandle) -> Option<&mut SimulatedFunction> {
        self.constraints
            .iter_mut()
            .chain(self.objectives.iter_mut())
            .find(|f| f.handle == handle)
    }

    fn allocate_handle(&mut self) -> FunctionHandle {
        self.next_handle += 1;
        FunctionHandle(self.next_handle)
    }
}

/// 内存中的计划引擎实现
pub struct SimulatedEngine {
    state: Mutex<EngineState>,
}

impl Default for SimulatedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedEngine {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(EngineState {
                dose_available: true,
                optimization_scale: 1.0,
                ..Default::default()
            }),
        }
    }

    /// 从患者夹具构建
    pub fn from_patient(patient: SimulatedPatient) -> Self {
        let mut engine = Self::new();
        for plan in patient.plans {
            engine = engine.with_plan(plan);
        }
        for (name, dose) in patient.rois {
            engine = engine.with_roi(name, dose);
        }
        if let Some(scale) = patient.optimization_scale {
            engine = engine.with_optimization_scale(scale);
        }
        engine
    }

    pub fn with_plan(mut self, name: impl Into<String>) -> Self {
        {
            let state = self.state.get_mut();
            let name = name.into();
            if state.active_plan.is_none() {
                state.active_plan = Some(name.clone());
            }
            state.plans.push(name);
        }
        self
    }

    pub fn with_roi(mut self, name: impl Into<String>, dose: RoiDose) -> Self {
        self.state.get_mut().rois.insert(
            name.into(),
            SimulatedRoi {
                dose,
                color: "Yellow".to_string(),
                geometry: None,
            },
        );
        self
    }

    pub fn with_optimization_scale(mut self, scale: f64) -> Self {
        self.state.get_mut().optimization_scale = scale;
        self
    }

    /// 第 n 次（从 1 开始）及之后的优化调用失败
    pub fn fail_optimization_after(mut self, runs: usize) -> Self {
        self.state.get_mut().fail_optimization_after = Some(runs);
        self
    }

    /// 所有参数写入都被拒绝（函数本身仍会创建）
    pub fn reject_parameters(mut self) -> Self {
        self.state.get_mut().reject_parameters = true;
        self
    }

    pub fn without_dose(mut self) -> Self {
        self.state.get_mut().dose_available = false;
        self
    }

    pub async fn calls(&self) -> Vec<String> {
        self.state.lock().await.calls.clone()
    }

    /// 以 prefix 开头的调用次数
    pub async fn count_calls(&self, prefix: &str) -> usize {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub async fn optimization_runs(&self) -> usize {
        self.state.lock().await.optimization_runs
    }

    pub async fn roi_geometry(&self, name: &str) -> Option<RoiGeometry> {
        let state = self.state.lock().await;
        let key = state.find_roi_key(name)?;
        state.rois.get(&key).and_then(|r| r.geometry.clone())
    }

    pub async fn roi_color(&self, name: &str) -> Option<String> {
        let state = self.state.lock().await;
        let key = state.find_roi_key(name)?;
        state.rois.get(&key).map(|r| r.color.clone())
    }

    pub async fn roi_count(&self) -> usize {
        self.state.lock().await.rois.len()
    }

    /// 约束在前、目标函数在后
    pub async fn functions(&self) -> Vec<SimulatedFunction> {
        let state = self.state.lock().await;
        state
            .constraints
            .iter()
            .chain(state.objectives.iter())
            .cloned()
            .collect()
    }

    pub async fn function_by_tag(&self, tag: &str) -> Option<SimulatedFunction> {
        self.functions()
            .await
            .into_iter()
            .find(|f| f.parameters.tag.as_deref() == Some(tag))
    }

    pub async fn robustness_calls(&self) -> Vec<RobustnessParameters> {
        self.state.lock().await.robustness.clone()
    }

    pub async fn optimization_settings(&self) -> Option<OptimizationSettings> {
        self.state.lock().await.settings.clone()
    }

    pub async fn active_plan(&self) -> Option<String> {
        self.state.lock().await.active_plan.clone()
    }
}

#[async_trait]
impl PlanningEngine for SimulatedEngine {
    async fn resolve_roi(&self, name: &str) -> Option<String> {
        self.state.lock().await.find_roi_key(name)
    }

    async fn dose_statistic(
        &self,
        roi: &str,
        statistic: DoseStatistic,
    ) -> Result<f64, EngineError> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("dose_statistic:{roi}:{statistic:?}"));
        let dose = state.dosed_roi(roi)?;
        Ok(match statistic {
            DoseStatistic::Max => dose.max,
            DoseStatistic::Min => dose.min,
            DoseStatistic::Average => dose.mean,
        })
    }

    async fn dose_at_relative_volumes(
        &self,
        roi: &str,
        relative_volumes: &[f64],
    ) -> Result<Vec<f64>, EngineError> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("dose_at_relative_volumes:{roi}"));
        let dose = state.dosed_roi(roi)?;
        relative_volumes
            .iter()
            .map(|v| {
                dose.dose_at_relative_volume(*v)
                    .ok_or(EngineError::NoDoseDistribution)
            })
            .collect()
    }

    async fn relative_volume_at_dose_values(
        &self,
        roi: &str,
        doses: &[f64],
    ) -> Result<Vec<f64>, EngineError> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("relative_volume_at_dose_values:{roi}"));
        let dose = state.dosed_roi(roi)?;
        doses
            .iter()
            .map(|d| {
                dose.relative_volume_at_dose(*d)
                    .ok_or(EngineError::NoDoseDistribution)
            })
            .collect()
    }

    async fn roi_volume(&self, roi: &str) -> Result<f64, EngineError> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("roi_volume:{roi}"));
        Ok(state.roi(roi)?.dose.volume_cc)
    }

    async fn create_or_get_roi(&self, name: &str, color: &str) -> Result<RoiHandle, EngineError> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("create_or_get_roi:{name}"));
        if let Some(existing) = state.find_roi_key(name) {
            return Ok(RoiHandle {
                name: existing,
                created: false,
            });
        }
        state.rois.insert(
            name.to_string(),
            SimulatedRoi {
                dose: RoiDose::default(),
                color: color.to_string(),
                geometry: None,
            },
        );
        Ok(RoiHandle {
            name: name.to_string(),
            created: true,
        })
    }

    async fn apply_boolean_geometry(
        &self,
        roi: &RoiHandle,
        request: &BooleanGeometryRequest,
    ) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("apply_boolean_geometry:{}", roi.name));
        let b_sources: &[String] = if request.operation == GeometryOperation::None {
            &[]
        } else {
            &request.expr_b.sources
        };
        for source in request.expr_a.sources.iter().chain(b_sources.iter()) {
            if state.find_roi_key(source).is_none() {
                return Err(EngineError::RoiNotFound(source.clone()));
            }
        }
        let key = state
            .find_roi_key(&roi.name)
            .ok_or_else(|| EngineError::RoiNotFound(roi.name.clone()))?;
        if let Some(target) = state.rois.get_mut(&key) {
            target.geometry = Some(RoiGeometry::Boolean(request.clone()));
        }
        Ok(())
    }

    async fn latest_total_dose(&self) -> Result<DoseDistribution, EngineError> {
        let state = self.state.lock().await;
        let plan = state.active_plan.clone().ok_or(EngineError::NoPlan)?;
        if !state.dose_available {
            return Err(EngineError::NoDoseDistribution);
        }
        Ok(DoseDistribution {
            label: format!("{plan}/total"),
        })
    }

    async fn apply_dose_threshold_geometry(
        &self,
        roi: &RoiHandle,
        dose: &DoseDistribution,
        threshold: f64,
    ) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;
        state
            .calls
            .push(format!("apply_dose_threshold_geometry:{}:{threshold}", roi.name));
        let key = state
            .find_roi_key(&roi.name)
            .ok_or_else(|| EngineError::RoiNotFound(roi.name.clone()))?;
        if let Some(target) = state.rois.get_mut(&key) {
            target.geometry = Some(RoiGeometry::DoseThreshold {
                dose: dose.label.clone(),
                threshold,
            });
        }
        Ok(())
    }

    async fn add_optimization_function(
        &self,
        function: &NewFunction,
    ) -> Result<FunctionHandle, EngineError> {
        let mut state = self.state.lock().await;
        state
            .calls
            .push(format!("add_optimization_function:{}:{}", function.kind, function.roi));
        if state.active_plan.is_none() {
            return Err(EngineError::NoPlan);
        }
        if state.find_roi_key(&function.roi).is_none() {
            return Err(EngineError::RoiNotFound(function.roi.clone()));
        }
        let handle = state.allocate_handle();
        let created = SimulatedFunction {
            handle,
            kind: function.kind,
            roi: function.roi.clone(),
            is_constraint: function.is_constraint,
            is_robust: function.is_robust,
            restriction: function.restriction.clone(),
            parameters: DoseFunctionParameters::default(),
        };
        if function.is_constraint {
            state.constraints.push(created);
        } else {
            state.objectives.push(created);
        }
        Ok(handle)
    }

    async fn edit_optimization_function(
        &self,
        handle: FunctionHandle,
        edit: &FunctionEdit,
    ) -> Result<FunctionHandle, EngineError> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("edit_optimization_function:{}", handle.0));
        if state.find_roi_key(&edit.roi).is_none() {
            return Err(EngineError::RoiNotFound(edit.roi.clone()));
        }
        let constraint_pos = state.constraints.iter().position(|f| f.handle == handle);
        let mut function = if let Some(pos) = constraint_pos {
            state.constraints.remove(pos)
        } else if let Some(pos) = state.objectives.iter().position(|f| f.handle == handle) {
            state.objectives.remove(pos)
        } else {
            return Err(EngineError::FunctionNotFound(format!("handle {}", handle.0)));
        };

        function.handle = state.allocate_handle();
        function.roi = edit.roi.clone();
        function.is_constraint = edit.is_constraint;
        function.is_robust = edit.is_robust;
        function.restriction = edit.restriction.clone();
        if function.is_constraint {
            function.parameters.weight = None;
        }
        let new_handle = function.handle;
        if function.is_constraint {
            state.constraints.push(function);
        } else {
            state.objectives.push(function);
        }
        Ok(new_handle)
    }

    async fn find_function_by_tag(&self, tag: &str) -> Result<Option<FunctionHandle>, EngineError> {
        let state = self.state.lock().await;
        Ok(state
            .constraints
            .iter()
            .chain(state.objectives.iter())
            .find(|f| f.parameters.tag.as_deref() == Some(tag))
            .map(|f| f.handle))
    }

    async fn set_dose_function_parameters(
        &self,
        handle: FunctionHandle,
        parameters: &DoseFunctionParameters,
    ) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("set_dose_function_parameters:{}", handle.0));
        if state.reject_parameters {
            return Err(EngineError::Rejected("parameters locked".to_string()));
        }
        let function = state
            .function_mut(handle)
            .ok_or_else(|| EngineError::FunctionNotFound(format!("handle {}", handle.0)))?;
        if function.is_constraint && parameters.weight.is_some() {
            return Err(EngineError::Rejected(
                "constraints do not carry a weight".to_string(),
            ));
        }
        function.parameters.merge(parameters);
        Ok(())
    }

    async fn optimization_functions(&self) -> Result<Vec<FunctionSummary>, EngineError> {
        let state = self.state.lock().await;
        Ok(state
            .constraints
            .iter()
            .chain(state.objectives.iter())
            .map(SimulatedFunction::summary)
            .collect())
    }

    async fn save_robustness_parameters(
        &self,
        parameters: &RobustnessParameters,
    ) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;
        state.calls.push("save_robustness_parameters".to_string());
        state.robustness.push(parameters.clone());
        Ok(())
    }

    async fn create_plan(&self, setup: &PlanSetup) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("create_plan:{}", setup.plan_name));
        if setup.plan_name.trim().is_empty() {
            return Err(EngineError::Rejected("plan name is empty".to_string()));
        }
        if state.plans.iter().any(|p| p == &setup.plan_name) {
            return Err(EngineError::Rejected(format!(
                "plan '{}' already exists",
                setup.plan_name
            )));
        }
        if let Some(iso) = &setup.isocenter_roi {
            if state.find_roi_key(iso).is_none() {
                return Err(EngineError::RoiNotFound(iso.clone()));
            }
        }
        state.plans.push(setup.plan_name.clone());
        state.active_plan = Some(setup.plan_name.clone());
        Ok(())
    }

    async fn select_plan(&self, plan_name: &str) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("select_plan:{plan_name}"));
        if !state.plans.iter().any(|p| p == plan_name) {
            return Err(EngineError::NoPlan);
        }
        state.active_plan = Some(plan_name.to_string());
        Ok(())
    }

    async fn apply_optimization_settings(
        &self,
        settings: &OptimizationSettings,
    ) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;
        state.calls.push("apply_optimization_settings".to_string());
        if state.active_plan.is_none() {
            return Err(EngineError::NoPlan);
        }
        state.settings = Some(settings.clone());
        Ok(())
    }

    async fn run_optimization(&self) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;
        state.calls.push("run_optimization".to_string());
        if state.active_plan.is_none() {
            return Err(EngineError::NoPlan);
        }
        let attempt = state.optimization_runs + 1;
        if let Some(limit) = state.fail_optimization_after {
            if attempt >= limit {
                return Err(EngineError::OptimizationFailed(format!(
                    "optimizer aborted on run {attempt}"
                )));
            }
        }
        state.optimization_runs = attempt;
        let scale = state.optimization_scale;
        for roi in state.rois.values_mut() {
            roi.dose.scale(scale);
        }
        state.dose_available = true;
        Ok(())
    }
}
