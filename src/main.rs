//! PlanFlow 命令行入口
//!
//! 用法：`planflow <flow.json> [--config <app.toml>] [--patient <patient.json>]`
//!
//! 初始化日志、加载配置与流程文档、预检，然后在模拟计划引擎上运行条件优化循环，
//! 把运行报告以 JSON 打印到 stdout。流程失败时以非零状态退出。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use planflow::config::load_config;
use planflow::engine::{SimulatedEngine, SimulatedPatient};
use planflow::flow::{load_flow, validate, FlowPlan};
use planflow::{observability, RoundController};

/// 放疗计划条件优化循环
#[derive(Parser, Debug)]
#[command(name = "planflow", version)]
#[command(about = "Run a conditional plan optimization flow", long_about = None)]
struct Args {
    /// 流程文档（JSON）
    #[arg(value_name = "FLOW")]
    flow: PathBuf,

    /// 额外的应用配置文件（TOML），覆盖 config/default.toml
    #[arg(long, value_name = "APP_TOML")]
    config: Option<PathBuf>,

    /// 模拟患者数据（JSON），省略时使用空的模拟计划
    #[arg(long, value_name = "PATIENT_JSON")]
    patient: Option<PathBuf>,
}

fn load_patient(path: &Path) -> anyhow::Result<SimulatedPatient> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read patient {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid patient {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let args = Args::parse();
    let config = load_config(args.config.clone()).context("Failed to load config")?;
    let doc = load_flow(&args.flow).context("Failed to load flow")?;
    let plan = FlowPlan::compile(&doc, &config.flow_defaults());
    let findings = validate(&plan);

    let engine = match &args.patient {
        Some(path) => SimulatedEngine::from_patient(load_patient(path)?),
        None => SimulatedEngine::new().with_plan("Plan1"),
    };
    let report = RoundController::new(Arc::new(engine), plan)
        .run(findings)
        .await;

    let json = if config.report.pretty_json {
        serde_json::to_string_pretty(&report)?
    } else {
        serde_json::to_string(&report)?
    };
    println!("{json}");

    if report.failed() {
        bail!("flow run {} failed", report.run_id);
    }
    Ok(())
}
