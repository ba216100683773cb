//! 计划引擎契约中使用的数据类型
//!
//! 几何请求、优化函数句柄与参数、鲁棒性参数、计划/射野设置等。

use serde::{Deserialize, Serialize};

use crate::core::ParseError;

/// 剂量统计量
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DoseStatistic {
    Max,
    Min,
    Average,
}

/// 外扩或内收
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MarginType {
    #[default]
    Expand,
    Contract,
}

/// 六方向边界（cm），数值恒为非负，方向语义由 margin_type 承担
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MarginSettings {
    pub margin_type: MarginType,
    pub superior: f64,
    pub inferior: f64,
    pub anterior: f64,
    pub posterior: f64,
    pub right: f64,
    pub left: f64,
}

impl MarginSettings {
    pub fn is_zero(&self) -> bool {
        [
            self.superior,
            self.inferior,
            self.anterior,
            self.posterior,
            self.right,
            self.left,
        ]
        .iter()
        .all(|v| *v == 0.0)
    }
}

/// 布尔几何运算
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeometryOperation {
    Union,
    Intersection,
    Subtraction,
    None,
}

impl std::fmt::Display for GeometryOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GeometryOperation::Union => write!(f, "Union"),
            GeometryOperation::Intersection => write!(f, "Intersection"),
            GeometryOperation::Subtraction => write!(f, "Subtraction"),
            GeometryOperation::None => write!(f, "None"),
        }
    }
}

/// 单侧表达式：源 ROI 以「单元素并集」形式携带自身边界
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoiExpression {
    pub sources: Vec<String>,
    pub operation: GeometryOperation,
    pub margin: MarginSettings,
}

/// 发送给计划引擎的布尔几何请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BooleanGeometryRequest {
    pub expr_a: RoiExpression,
    pub operation: GeometryOperation,
    pub expr_b: RoiExpression,
    pub result_margin: MarginSettings,
}

/// ROI 句柄；created 表示本次调用新建了该 ROI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoiHandle {
    pub name: String,
    pub created: bool,
}

/// 总剂量分布的引用（由引擎给出的标签）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoseDistribution {
    pub label: String,
}

/// 优化函数类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FunctionKind {
    MaxDose,
    MinDose,
    MaxEud,
    MinEud,
    TargetEud,
    UniformDose,
    DoseFallOff,
    MaxDvh,
    MinDvh,
    UniformityConstraint,
}

impl FunctionKind {
    /// 配置文档中的函数类型名
    pub fn as_str(&self) -> &'static str {
        match self {
            FunctionKind::MaxDose => "Max Dose",
            FunctionKind::MinDose => "Min Dose",
            FunctionKind::MaxEud => "Max EUD",
            FunctionKind::MinEud => "Min EUD",
            FunctionKind::TargetEud => "Target EUD",
            FunctionKind::UniformDose => "Uniform Dose",
            FunctionKind::DoseFallOff => "Dose Fall-Off",
            FunctionKind::MaxDvh => "Max DVH",
            FunctionKind::MinDvh => "Min DVH",
            FunctionKind::UniformityConstraint => "Uniformity Constraint",
        }
    }

    /// 均匀性约束只能作为约束存在
    pub fn is_always_constraint(&self) -> bool {
        matches!(self, FunctionKind::UniformityConstraint)
    }
}

impl std::fmt::Display for FunctionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FunctionKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        match normalized.as_str() {
            "maxdose" => Ok(FunctionKind::MaxDose),
            "mindose" => Ok(FunctionKind::MinDose),
            "maxeud" => Ok(FunctionKind::MaxEud),
            "mineud" => Ok(FunctionKind::MinEud),
            "targeteud" => Ok(FunctionKind::TargetEud),
            "uniformdose" => Ok(FunctionKind::UniformDose),
            "dosefalloff" => Ok(FunctionKind::DoseFallOff),
            "maxdvh" => Ok(FunctionKind::MaxDvh),
            "mindvh" => Ok(FunctionKind::MinDvh),
            "uniformityconstraint" => Ok(FunctionKind::UniformityConstraint),
            _ => Err(ParseError::UnknownKind {
                kind: "function type",
                value: s.to_string(),
            }),
        }
    }
}

/// 射野限制范围
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BeamRestriction {
    #[default]
    None,
    AllBeamsIndividually,
    Beams(Vec<String>),
}

impl BeamRestriction {
    /// 解析配置中的限制字符串：空 / None、All、或逗号分隔的射野名
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed.to_lowercase().as_str() {
            "" | "none" | "no" => BeamRestriction::None,
            "all" | "all beams" | "all beams individually" => {
                BeamRestriction::AllBeamsIndividually
            }
            _ => BeamRestriction::Beams(
                trimmed
                    .split(',')
                    .map(|b| b.trim().to_string())
                    .filter(|b| !b.is_empty())
                    .collect(),
            ),
        }
    }
}

/// 优化函数句柄；编辑操作后旧句柄失效
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionHandle(pub u64);

/// 新建优化函数所需属性
#[derive(Debug, Clone, PartialEq)]
pub struct NewFunction {
    pub kind: FunctionKind,
    pub roi: String,
    pub is_constraint: bool,
    pub restriction: BeamRestriction,
    pub is_robust: bool,
}

/// 「编辑函数」原语可修改的属性
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionEdit {
    pub roi: String,
    pub is_constraint: bool,
    pub is_robust: bool,
    pub restriction: BeamRestriction,
}

/// 剂量函数参数；None 表示不写该字段
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DoseFunctionParameters {
    pub tag: Option<String>,
    pub weight: Option<f64>,
    pub dose_level: Option<f64>,
    pub high_dose_level: Option<f64>,
    pub low_dose_level: Option<f64>,
    pub low_dose_distance: Option<f64>,
    pub eud_parameter_a: Option<f64>,
    pub percent_volume: Option<f64>,
    pub absolute_volume: Option<f64>,
    pub is_absolute_volume: Option<bool>,
    pub percent_std_deviation: Option<f64>,
}

impl DoseFunctionParameters {
    /// 用 other 中已设置的字段覆盖 self
    pub fn merge(&mut self, other: &DoseFunctionParameters) {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if other.$field.is_some() { self.$field = other.$field.clone(); })*
            };
        }
        take!(
            tag,
            weight,
            dose_level,
            high_dose_level,
            low_dose_level,
            low_dose_distance,
            eud_parameter_a,
            percent_volume,
            absolute_volume,
            is_absolute_volume,
            percent_std_deviation
        );
    }
}

/// 当前计划中的一个优化函数概要
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionSummary {
    pub handle: FunctionHandle,
    pub tag: Option<String>,
    pub kind: FunctionKind,
    pub roi: String,
    pub is_constraint: bool,
    pub is_robust: bool,
}

/// 鲁棒优化的最坏情况方法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RobustMethod {
    #[default]
    CompositeWorstCase,
    VoxelwiseWorstCase,
}

/// 一次性写入引擎的鲁棒性参数；密度不确定度为小数
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RobustnessParameters {
    pub superior: f64,
    pub inferior: f64,
    pub anterior: f64,
    pub posterior: f64,
    pub right: f64,
    pub left: f64,
    pub density_uncertainty: f64,
    pub method: RobustMethod,
}

/// 计划准备方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanSetupMode {
    Create,
    SelectExisting,
    #[default]
    Skip,
}

/// 射野定义（角度单位：度）
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BeamSpec {
    pub name: String,
    pub gantry_angle: f64,
    pub couch_angle: f64,
    pub collimator_angle: f64,
}

/// 计划与射野设置
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanSetup {
    pub mode: PlanSetupMode,
    pub plan_name: String,
    pub beam_set_name: String,
    pub machine: String,
    pub technique: String,
    pub isocenter_roi: Option<String>,
    pub beams: Vec<BeamSpec>,
}

/// 优化器容差与迭代次数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizationSettings {
    pub max_iterations: u32,
    pub tolerance: f64,
    pub compute_final_dose: bool,
}

impl Default for OptimizationSettings {
    fn default() -> Self {
        Self {
            max_iterations: 40,
            tolerance: 1e-5,
            compute_final_dose: true,
        }
    }
}
