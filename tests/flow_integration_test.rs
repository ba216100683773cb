//! 流程集成测试：从 JSON 文件加载流程，在模拟计划引擎上跑完整的轮次控制器

use std::io::Write;
use std::sync::Arc;

use planflow::config::load_config;
use planflow::core::{FlowPhase, RoundController, RunReport, TerminalReason};
use planflow::engine::{GeometryOperation, RobustMethod, RoiDose, RoiGeometry, SimulatedEngine};
use planflow::flow::{load_flow, validate, FlowDefaults, FlowPlan};

fn patient() -> SimulatedEngine {
    SimulatedEngine::new()
        .with_plan("Plan1")
        .with_roi(
            "PTV_7000",
            RoiDose::new(300.0)
                .with_stats(4500.0, 3700.0, 4100.0)
                .with_dvh(vec![(3700.0, 1.0), (3950.0, 0.95), (4500.0, 0.0)]),
        )
        .with_roi(
            "Rectum",
            RoiDose::new(150.0)
                .with_stats(4100.0, 200.0, 1800.0)
                .with_dvh(vec![(0.0, 1.0), (2000.0, 0.1), (4100.0, 0.0)]),
        )
        .with_optimization_scale(0.95)
}

fn write_flow(json: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    file.write_all(json.as_bytes()).unwrap();
    file
}

async fn run_flow(engine: Arc<SimulatedEngine>, json: &str, defaults: &FlowDefaults) -> RunReport {
    let file = write_flow(json);
    let doc = load_flow(file.path()).unwrap();
    let plan = FlowPlan::compile(&doc, defaults);
    let findings = validate(&plan);
    RoundController::new(engine, plan).run(findings).await
}

const FULL_FLOW: &str = r#"{
  "match_roi": [
    {"roi_name": "PTV", "possible_roi_name": "PTV_70, PTV_7000"},
    {"roi_name": "Rectum", "possible_roi_name": ""}
  ],
  "plan_setup": {
    "mode": "create", "plan_name": "Auto", "beam_set_name": "Arc", "machine": "Linac",
    "technique": "VMAT", "isocenter_roi": "PTV",
    "beams": [{"name": "A1", "gantry_angle": 181, "couch_angle": 0, "collimator_angle": 10}]
  },
  "automate_roi": [
    {"order": 1, "roi_name": "Rectum_PRV", "boolean_config": {
      "roi_a": "Rectum", "margin_a": {"type": "Expand", "superior": "0.3", "inferior": 0.3},
      "operation": "Subtract",
      "roi_b": "PTV", "margin_b": {"type": "Expand", "superior": 0.5},
      "output_margin": {}
    }}
  ],
  "initial_functions": [
    {"tag": "ptv_max", "function_type": "Max Dose", "roi_name": "PTV", "weight": 80,
     "objective_constraint": "Objective", "description": "Max Dose 4600 cGy"},
    {"tag": "rect_dvh", "function_type": "Max DVH", "roi_name": "Rectum_PRV", "weight": "20",
     "objective_constraint": "Objective", "robust": true,
     "description": "Max DVH 3000 cGy to 0.1cc volume"}
  ],
  "optimization_settings": {"max_iterations": 60, "tolerance": 1e-6, "compute_final_dose": true},
  "start_flow": {"optimize_first": false},
  "check_conditions": [
    {"name": "ptv_hot", "condition_type": "Max Dose", "roi_name": "PTV", "criteria": "≥4400", "active_round": "≥ 0"},
    {"name": "ptv_cov", "condition_type": "DaV", "roi_name": "PTV", "criteria": "D95% ≥ 3900 cGy", "active_round": "≥ 0"},
    {"name": "rect_v20", "condition_type": "VaD", "roi_name": "Rectum", "criteria": "V2000cGy ≤ 20cc", "active_round": "≥ 0"}
  ],
  "condition_rois": [
    {"order": 1, "condition": "ptv_hot", "roi_name": "Hot_4400", "method": "Convert Dose",
     "convert_dose": {"threshold_dose": "4400"}}
  ],
  "function_adjustments": [
    {"condition": "ptv_hot", "adjustment": "Adjust OLD Function", "tag": "ptv_max",
     "function_type": "Max Dose", "roi_name": "PTV", "weight": 100,
     "objective_constraint": "Objective", "description": "Max Dose 4300 cGy"},
    {"condition": "ptv_hot", "adjustment": "Add NEW function", "tag": "ptv_uni",
     "function_type": "Uniformity Constraint", "roi_name": "PTV", "weight": 50,
     "objective_constraint": "Objective", "description": "Uniformity Constraint Rel.std.dev 3 %"},
    {"condition": "ptv_hot", "adjustment": "Add NEW function", "tag": "hot_max",
     "function_type": "Max Dose", "roi_name": "Hot_4400", "weight": 30,
     "objective_constraint": "Objective", "description": "Max Dose 4200 cGy"}
  ],
  "end_flow": {"max_optimize_rounds": 1},
  "robust_settings": {"superior": 0.4, "density_uncertainty": "3", "method": "Composite worst case"}
}"#;

#[tokio::test]
async fn test_full_flow_single_round() {
    let engine = Arc::new(patient());
    let report = run_flow(engine.clone(), FULL_FLOW, &FlowDefaults::default()).await;

    assert!(report.findings.is_empty(), "{:?}", report.findings);
    assert_eq!(report.phase, FlowPhase::Done);
    assert_eq!(
        report.terminal,
        Some(TerminalReason::RoundBudgetExhausted { rounds: 1 })
    );
    assert_eq!(engine.active_plan().await.as_deref(), Some("Auto"));
    assert_eq!(engine.optimization_settings().await.unwrap().max_iterations, 60);

    // Setup：自动 ROI 使用匹配后的名称
    match engine.roi_geometry("Rectum_PRV").await {
        Some(RoiGeometry::Boolean(request)) => {
            assert_eq!(request.operation, GeometryOperation::Subtraction);
            assert_eq!(request.expr_a.sources, vec!["Rectum".to_string()]);
            assert_eq!(request.expr_a.margin.superior, 0.3);
            assert_eq!(request.expr_b.sources, vec!["PTV_7000".to_string()]);
            assert_eq!(request.expr_b.margin.superior, 0.5);
        }
        other => panic!("unexpected geometry: {other:?}"),
    }
    assert_eq!(report.automate.as_ref().unwrap().created, 1);
    assert_eq!(report.initial.as_ref().unwrap().created, 2);

    // 第 1 轮：三个条件都满足，报告值与剂量查询一致
    let round = &report.rounds[0];
    let value = |name: &str| {
        round
            .conditions
            .outcomes
            .iter()
            .find(|o| o.name == name)
            .and_then(|o| o.value)
            .unwrap()
    };
    assert_eq!(round.conditions.met_count(), 3);
    assert_eq!(value("ptv_hot"), 4500.0);
    assert_eq!(value("ptv_cov"), 3950.0);
    assert!((value("rect_v20") - 15.0).abs() < 1e-9);
    assert!(round.optimized);

    // 条件 ROI 与同轮依赖它的新函数
    assert!(matches!(
        engine.roi_geometry("Hot_4400").await,
        Some(RoiGeometry::DoseThreshold { threshold, .. }) if threshold == 4400.0
    ));
    let hot = engine.function_by_tag("hot_max").await.unwrap();
    assert_eq!(hot.roi, "Hot_4400");

    let ptv_max = engine.function_by_tag("ptv_max").await.unwrap();
    assert_eq!(ptv_max.roi, "PTV_7000");
    assert_eq!(ptv_max.parameters.dose_level, Some(4300.0));
    assert_eq!(ptv_max.parameters.weight, Some(100.0));

    let uni = engine.function_by_tag("ptv_uni").await.unwrap();
    assert!(uni.is_constraint);
    assert_eq!(uni.parameters.weight, None);
    assert_eq!(uni.parameters.percent_std_deviation, Some(3.0));

    let rect = engine.function_by_tag("rect_dvh").await.unwrap();
    assert_eq!(rect.parameters.is_absolute_volume, Some(true));
    assert_eq!(rect.parameters.absolute_volume, Some(0.1));

    // 每批最多写入一次鲁棒参数
    let robust = engine.robustness_calls().await;
    assert_eq!(robust.len(), 2);
    assert_eq!(robust[0].superior, 0.4);
    assert!((robust[0].density_uncertainty - 0.03).abs() < 1e-12);
    assert_eq!(robust[0].method, RobustMethod::CompositeWorstCase);
    assert_eq!(engine.optimization_runs().await, 1);
}

#[tokio::test]
async fn test_loop_stops_when_no_condition_met() {
    let engine = Arc::new(patient());
    let report = run_flow(
        engine.clone(),
        r#"{
          "match_roi": [{"roi_name": "PTV", "possible_roi_name": "PTV_7000"}],
          "start_flow": {"optimize_first": false},
          "check_conditions": [
            {"name": "hot", "condition_type": "Max Dose", "roi_name": "PTV", "criteria": "≥4400", "active_round": "≥ 0"},
            {"name": "cold", "condition_type": "Min Dose", "roi_name": "PTV", "criteria": "≤3000", "active_round": "≥ 0"},
            {"name": "rect", "condition_type": "VaD", "roi_name": "Rectum", "criteria": "V2000cGy ≥ 50%", "active_round": "≥ 0"}
          ],
          "end_flow": {"max_optimize_rounds": 5}
        }"#,
        &FlowDefaults::default(),
    )
    .await;

    assert_eq!(report.terminal, Some(TerminalReason::NoConditionMet { round: 2 }));
    assert_eq!(report.rounds_run(), 2);
    assert!(report.rounds[0].conditions.any_met());
    assert!(!report.rounds[1].conditions.any_met());
    assert!(!report.rounds[1].optimized);
    assert!(report.rounds[1].structures.is_none());
    assert_eq!(engine.optimization_runs().await, 1);
    // 第 3 轮从未开始：每轮查询一次 Max 与一次 Min
    assert_eq!(engine.count_calls("dose_statistic").await, 4);
}

#[tokio::test]
async fn test_round_gating_skips_queries_until_active() {
    let engine = Arc::new(patient());
    let report = run_flow(
        engine.clone(),
        r#"{
          "match_roi": [{"roi_name": "PTV", "possible_roi_name": "PTV_7000"}],
          "check_conditions": [
            {"name": "early", "condition_type": "Always True", "roi_name": "", "criteria": "", "active_round": "≤ 2"},
            {"name": "late", "condition_type": "Max Dose", "roi_name": "PTV", "criteria": "≥0", "active_round": "≥ 3"}
          ],
          "end_flow": {"max_optimize_rounds": 4}
        }"#,
        &FlowDefaults::default(),
    )
    .await;

    assert_eq!(report.terminal, Some(TerminalReason::RoundBudgetExhausted { rounds: 4 }));
    for record in &report.rounds {
        let late = record.conditions.outcomes.iter().find(|o| o.name == "late").unwrap();
        assert_eq!(late.evaluated, record.round >= 3, "round {}", record.round);
        assert_eq!(record.conditions.get("early"), Some(record.round <= 2));
    }
    assert_eq!(report.rounds[0].conditions.outcomes[0].value, Some(1.0));
    assert_eq!(engine.count_calls("dose_statistic").await, 2);
    // optimize_first 默认开启
    assert_eq!(engine.optimization_runs().await, 5);
}

#[tokio::test]
async fn test_optimizer_failure_aborts_remaining_rounds() {
    let engine = Arc::new(patient().fail_optimization_after(2));
    let report = run_flow(
        engine.clone(),
        r#"{
          "check_conditions": [
            {"name": "always", "condition_type": "Always True", "active_round": "≥ 0"}
          ],
          "condition_rois": [
            {"order": 1, "condition": "always", "roi_name": "Ring", "method": "Boolean",
             "boolean_config": {"roi_a": "PTV_7000", "operation": "Bogus", "roi_b": "Rectum"}}
          ],
          "end_flow": {"max_optimize_rounds": 5}
        }"#,
        &FlowDefaults::default(),
    )
    .await;

    assert_eq!(report.phase, FlowPhase::Error);
    assert!(report.failed());
    assert!(matches!(
        &report.terminal,
        Some(TerminalReason::Failed { phase, message })
            if phase == "Round 1" && message.contains("Optimization failed")
    ));
    assert_eq!(report.rounds_run(), 1);
    assert!(!report.rounds[0].optimized);
    // 已写入的结构不回滚；未知运算回退为 Union
    assert_eq!(report.rounds[0].structures.as_ref().unwrap().created, 1);
    assert!(matches!(
        engine.roi_geometry("Ring").await,
        Some(RoiGeometry::Boolean(r)) if r.operation == GeometryOperation::Union
    ));
    assert_eq!(engine.optimization_runs().await, 1);
}

#[tokio::test]
async fn test_strict_operations_from_config_file() {
    let mut config_file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(config_file, "[flow]\nstrict_operations = true\ndefault_max_rounds = 2").unwrap();
    let config = load_config(Some(config_file.path().to_path_buf())).unwrap();
    let defaults = config.flow_defaults();
    assert_eq!(defaults.max_rounds, 2);

    let engine = Arc::new(patient());
    let report = run_flow(
        engine.clone(),
        r#"{
          "start_flow": {"optimize_first": false},
          "automate_roi": [
            {"order": 2, "roi_name": "Bad", "boolean_config": {"roi_a": "PTV_7000", "operation": "Merge", "roi_b": "Rectum"}},
            {"order": 1, "roi_name": "Overlap", "boolean_config": {"roi_a": "PTV_7000", "operation": "Intersect", "roi_b": "Rectum"}}
          ]
        }"#,
        &defaults,
    )
    .await;

    let automate = report.automate.as_ref().unwrap();
    assert_eq!(automate.created, 1);
    assert_eq!(automate.failures.len(), 1);
    assert_eq!(automate.failures[0].entry, "Bad");
    assert!(engine.roi_color("Bad").await.is_none());
    assert_eq!(report.findings.len(), 1);
    // 没有条件：第 1 轮即结束
    assert_eq!(report.terminal, Some(TerminalReason::NoConditionMet { round: 1 }));
}

#[tokio::test]
async fn test_select_missing_plan_fails_in_setup() {
    let engine = Arc::new(patient());
    let report = run_flow(
        engine,
        r#"{"plan_setup": {"mode": "select_existing", "plan_name": "Nope"}}"#,
        &FlowDefaults::default(),
    )
    .await;
    assert!(matches!(
        &report.terminal,
        Some(TerminalReason::Failed { phase, .. }) if phase == "Setup"
    ));
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["terminal"]["kind"], "failed");
    assert_eq!(json["phase"], "Error");
}
