//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `PLANFLOW__*` 覆盖（双下划线表示嵌套，如 `PLANFLOW__FLOW__DEFAULT_MAX_ROUNDS=3`）。
//! 这里只放运行参数与缺省值；流程本身（条件、ROI、函数）在 JSON 流程文档中。

use std::path::PathBuf;

use serde::Deserialize;

use crate::engine::OptimizationSettings;
use crate::flow::FlowDefaults;
use crate::objectives::RobustSettings;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub flow: FlowSection,
    pub optimizer: OptimizerSection,
    /// 流程文档未给出 robust_settings 时使用
    pub robust: RobustSettings,
    pub report: ReportSection,
}

/// [flow] 段：轮次上限缺省值、严格模式
#[derive(Debug, Clone, Deserialize)]
pub struct FlowSection {
    /// 流程文档未给出 end_flow.max_optimize_rounds 时使用
    #[serde(default = "default_max_rounds")]
    pub default_max_rounds: u32,
    /// 为 true 时未知的布尔运算名视为配置错误并跳过该条目，否则回退为 Union
    #[serde(default)]
    pub strict_operations: bool,
}

impl Default for FlowSection {
    fn default() -> Self {
        Self {
            default_max_rounds: default_max_rounds(),
            strict_operations: false,
        }
    }
}

fn default_max_rounds() -> u32 {
    5
}

/// [optimizer] 段：流程文档未给出 optimization_settings 时使用
#[derive(Debug, Clone, Deserialize)]
pub struct OptimizerSection {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    #[serde(default = "default_compute_final_dose")]
    pub compute_final_dose: bool,
}

impl Default for OptimizerSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            tolerance: default_tolerance(),
            compute_final_dose: default_compute_final_dose(),
        }
    }
}

fn default_max_iterations() -> u32 {
    40
}

fn default_tolerance() -> f64 {
    1e-5
}

fn default_compute_final_dose() -> bool {
    true
}

/// [report] 段：报告输出格式
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ReportSection {
    #[serde(default)]
    pub pretty_json: bool,
}

impl AppConfig {
    /// 编译流程时使用的缺省值
    pub fn flow_defaults(&self) -> FlowDefaults {
        FlowDefaults {
            max_rounds: self.flow.default_max_rounds,
            optimization: OptimizationSettings {
                max_iterations: self.optimizer.max_iterations,
                tolerance: self.optimizer.tolerance,
                compute_final_dose: self.optimizer.compute_final_dose,
            },
            robust: self.robust.clone(),
            strict_operations: self.flow.strict_operations,
        }
    }
}

/// 从 config 目录加载配置，环境变量 PLANFLOW__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 PLANFLOW__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        } else {
            tracing::warn!("Config file {} not found, ignored", path.display());
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("PLANFLOW")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
