//! ROI 集合代数：把 `{roi_a, operation, roi_b, output_margin}` 配置翻译为布尔几何请求
//!
//! 每一侧都包装成「单元素并集」并携带自身边界，先各自外扩/内收，再做跨 ROI 运算，
//! 结果再套一层独立的输出边界。

use crate::core::{EvalContext, FlowError};
use crate::engine::{
    BooleanGeometryRequest, GeometryOperation, MarginSettings, MarginType, RoiExpression,
};
use crate::flow::lenient::to_float;
use crate::flow::{BooleanConfig, MarginConfig};

/// 固定的运算名表；不认识的名称返回 None
pub fn lookup_operation(name: &str) -> Option<GeometryOperation> {
    match name.trim().to_lowercase().as_str() {
        "subtract" | "subtraction" => Some(GeometryOperation::Subtraction),
        "union" => Some(GeometryOperation::Union),
        "intersect" | "intersection" => Some(GeometryOperation::Intersection),
        "none" => Some(GeometryOperation::None),
        _ => None,
    }
}

/// 运算名映射；未知名称回退为 Union，并在 `planflow::fallback` 下告警
pub fn map_operation(name: &str) -> GeometryOperation {
    lookup_operation(name).unwrap_or_else(|| {
        tracing::warn!(
            target: "planflow::fallback",
            "Unknown boolean operation '{}', defaulting to Union",
            name
        );
        GeometryOperation::Union
    })
}

fn magnitude(field: &str, value: &serde_json::Value) -> f64 {
    let v = to_float(value);
    if v < 0.0 {
        tracing::warn!(
            target: "planflow::fallback",
            "Negative margin {} = {}, using 0.0 (direction is set by the margin type)",
            field,
            v
        );
        return 0.0;
    }
    v
}

/// 边界配置 → MarginSettings；数值宽松转换，非法值为 0.0
pub fn margin_settings(config: &MarginConfig) -> MarginSettings {
    let margin_type = if config.margin_type.trim().eq_ignore_ascii_case("contract") {
        MarginType::Contract
    } else {
        MarginType::Expand
    };
    MarginSettings {
        margin_type,
        superior: magnitude("superior", &config.superior),
        inferior: magnitude("inferior", &config.inferior),
        anterior: magnitude("anterior", &config.anterior),
        posterior: magnitude("posterior", &config.posterior),
        right: magnitude("right", &config.right),
        left: magnitude("left", &config.left),
    }
}

fn single_source(roi: &str, margin: MarginSettings) -> RoiExpression {
    let sources = if roi.is_empty() {
        Vec::new()
    } else {
        vec![roi.to_string()]
    };
    RoiExpression {
        sources,
        operation: GeometryOperation::Union,
        margin,
    }
}

/// 布尔几何请求构建器
#[derive(Debug, Clone, Copy, Default)]
pub struct SetAlgebraBuilder {
    /// 严格模式：未知运算名视为配置错误，而不是回退为 Union
    pub strict: bool,
}

impl SetAlgebraBuilder {
    pub fn new(strict: bool) -> Self {
        Self { strict }
    }

    pub fn operation(&self, name: &str) -> Result<GeometryOperation, FlowError> {
        if self.strict {
            lookup_operation(name)
                .ok_or_else(|| FlowError::Config(format!("unknown boolean operation '{name}'")))
        } else {
            Ok(map_operation(name))
        }
    }

    /// 构建请求；ROI 名在此刻经匹配表解析，未匹配的名称原样透传
    pub fn build(
        &self,
        config: &BooleanConfig,
        ctx: &EvalContext<'_>,
    ) -> Result<BooleanGeometryRequest, FlowError> {
        let roi_a = config.roi_a.trim();
        if roi_a.is_empty() {
            return Err(FlowError::Config("boolean_config.roi_a is empty".to_string()));
        }
        let operation = self.operation(&config.operation)?;
        let roi_b = config.roi_b.trim();
        if roi_b.is_empty() && operation != GeometryOperation::None {
            return Err(FlowError::Config(format!(
                "boolean_config.roi_b is empty for operation {operation}"
            )));
        }

        Ok(BooleanGeometryRequest {
            expr_a: single_source(ctx.resolve(roi_a), margin_settings(&config.margin_a)),
            operation,
            expr_b: single_source(ctx.resolve(roi_b), margin_settings(&config.margin_b)),
            result_margin: margin_settings(&config.output_margin),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roi::{RoiMatch, RoiMatchMap};
    use serde_json::json;

    fn config(operation: &str) -> BooleanConfig {
        BooleanConfig {
            roi_a: "PTV".into(),
            margin_a: MarginConfig {
                margin_type: "Expand".into(),
                superior: json!("0.5"),
                inferior: json!(0.5),
                anterior: json!("abc"),
                ..Default::default()
            },
            operation: operation.into(),
            roi_b: "Rectum".into(),
            margin_b: MarginConfig {
                margin_type: "Contract".into(),
                left: json!(0.3),
                ..Default::default()
            },
            output_margin: MarginConfig::default(),
        }
    }

    #[test]
    fn test_map_operation_table() {
        assert_eq!(map_operation("Subtract"), GeometryOperation::Subtraction);
        assert_eq!(map_operation("Union"), GeometryOperation::Union);
        assert_eq!(map_operation("Intersect"), GeometryOperation::Intersection);
        assert_eq!(map_operation("Intersection"), GeometryOperation::Intersection);
        assert_eq!(map_operation("None"), GeometryOperation::None);
        assert_eq!(map_operation("Bogus"), GeometryOperation::Union);
        assert_eq!(lookup_operation("Bogus"), None);
    }

    #[test]
    fn test_margin_coercion() {
        let m = margin_settings(&config("Union").margin_a);
        assert_eq!(m.margin_type, MarginType::Expand);
        assert_eq!(m.superior, 0.5);
        assert_eq!(m.inferior, 0.5);
        assert_eq!(m.anterior, 0.0);
        let negative = margin_settings(&MarginConfig {
            right: json!(-1.0),
            ..Default::default()
        });
        assert_eq!(negative.right, 0.0);
        assert!(negative.is_zero());
    }

    #[test]
    fn test_build_resolves_names_and_wraps_each_side() {
        let mut map = RoiMatchMap::new();
        map.insert("PTV", RoiMatch::Matched("PTV_7000".into()));
        map.insert("Rectum", RoiMatch::NotMatched);
        let ctx = EvalContext::new(1, &map);

        let request = SetAlgebraBuilder::new(false)
            .build(&config("Subtract"), &ctx)
            .unwrap();
        assert_eq!(request.operation, GeometryOperation::Subtraction);
        assert_eq!(request.expr_a.sources, vec!["PTV_7000".to_string()]);
        assert_eq!(request.expr_a.operation, GeometryOperation::Union);
        assert_eq!(request.expr_b.sources, vec!["Rectum".to_string()]);
        assert_eq!(request.expr_b.margin.margin_type, MarginType::Contract);
        assert_eq!(request.expr_b.margin.left, 0.3);
        assert!(request.result_margin.is_zero());
    }

    #[test]
    fn test_strict_mode_rejects_unknown_operation() {
        let map = RoiMatchMap::new();
        let ctx = EvalContext::new(1, &map);
        let lenient = SetAlgebraBuilder::new(false).build(&config("Merge"), &ctx).unwrap();
        assert_eq!(lenient.operation, GeometryOperation::Union);
        let strict = SetAlgebraBuilder::new(true).build(&config("Merge"), &ctx);
        assert!(matches!(strict, Err(FlowError::Config(_))));
    }
}
