//! 鲁棒设置：配置中只给一次，只有当本批次后计划里存在鲁棒函数时才写入引擎

use serde::{Deserialize, Serialize};

use crate::core::EngineError;
use crate::engine::{PlanningEngine, RobustMethod, RobustnessParameters};
use crate::flow::lenient::try_float;
use crate::flow::RobustSettingsEntry;

/// 位置不确定度（cm）、密度不确定度（%）与最坏情况方法
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RobustSettings {
    pub superior: f64,
    pub inferior: f64,
    pub anterior: f64,
    pub posterior: f64,
    pub right: f64,
    pub left: f64,
    pub density_uncertainty: f64,
    pub method: RobustMethod,
}

impl Default for RobustSettings {
    fn default() -> Self {
        Self {
            superior: 0.5,
            inferior: 0.5,
            anterior: 0.5,
            posterior: 0.5,
            right: 0.5,
            left: 0.5,
            density_uncertainty: 3.0,
            method: RobustMethod::CompositeWorstCase,
        }
    }
}

fn parse_method(raw: &str) -> Option<RobustMethod> {
    let normalized: String = raw
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect::<String>()
        .to_lowercase();
    match normalized.as_str() {
        "compositeworstcase" | "composite" => Some(RobustMethod::CompositeWorstCase),
        "voxelwiseworstcase" | "voxelwise" => Some(RobustMethod::VoxelwiseWorstCase),
        _ => None,
    }
}

impl RobustSettings {
    /// 文档条目覆盖默认值；无法解析的字段保留默认值
    pub fn from_entry(entry: &RobustSettingsEntry, defaults: &RobustSettings) -> Self {
        let pick = |value: &serde_json::Value, fallback: f64| try_float(value).unwrap_or(fallback);
        let method = if entry.method.trim().is_empty() {
            defaults.method
        } else {
            parse_method(&entry.method).unwrap_or_else(|| {
                tracing::warn!(
                    target: "planflow::fallback",
                    "Unknown robust method '{}', using {:?}",
                    entry.method,
                    defaults.method
                );
                defaults.method
            })
        };
        Self {
            superior: pick(&entry.superior, defaults.superior),
            inferior: pick(&entry.inferior, defaults.inferior),
            anterior: pick(&entry.anterior, defaults.anterior),
            posterior: pick(&entry.posterior, defaults.posterior),
            right: pick(&entry.right, defaults.right),
            left: pick(&entry.left, defaults.left),
            density_uncertainty: pick(&entry.density_uncertainty, defaults.density_uncertainty),
            method,
        }
    }

    /// 引擎参数：密度不确定度由百分比换算为小数
    pub fn to_parameters(&self) -> RobustnessParameters {
        RobustnessParameters {
            superior: self.superior,
            inferior: self.inferior,
            anterior: self.anterior,
            posterior: self.posterior,
            right: self.right,
            left: self.left,
            density_uncertainty: self.density_uncertainty / 100.0,
            method: self.method,
        }
    }
}

/// 扫描全部约束与目标函数，任一为鲁棒则写入一次鲁棒参数；返回是否写入
pub async fn save_if_any_robust(
    engine: &dyn PlanningEngine,
    settings: &RobustSettings,
) -> Result<bool, EngineError> {
    let functions = engine.optimization_functions().await?;
    let robust = functions.iter().filter(|f| f.is_robust).count();
    if robust == 0 {
        return Ok(false);
    }
    engine.save_robustness_parameters(&settings.to_parameters()).await?;
    tracing::info!(
        "Robustness parameters saved ({} robust of {} functions, {:?})",
        robust,
        functions.len(),
        settings.method
    );
    Ok(true)
}
