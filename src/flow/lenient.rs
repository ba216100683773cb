//! 宽松的数值 / 布尔转换
//!
//! 配置文档由外部编辑器生成，数值字段可能是数字、数字字符串或空串。

use serde_json::Value;

/// 解析数字字符串；失败返回 None
pub fn parse_float(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// 数字或数字字符串 → f64；其余返回 None
pub fn try_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_float(s),
        _ => None,
    }
}

/// 全函数：无法解析时返回 0.0
pub fn to_float(value: &Value) -> f64 {
    try_float(value).unwrap_or(0.0)
}

/// 字符串版本的 to_float
pub fn str_to_float(raw: &str) -> f64 {
    parse_float(raw).unwrap_or(0.0)
}

/// 布尔字段：接受 true/false、"true"/"yes"/"1"、非零数字
pub fn to_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|v| v != 0.0).unwrap_or(false),
        Value::String(s) => matches!(
            s.trim().to_lowercase().as_str(),
            "true" | "yes" | "y" | "1" | "on"
        ),
        _ => false,
    }
}

/// 排序字段：保留小数（1.5 排在 1 与 2 之间），无法解析时为 0
pub fn to_order(value: &Value) -> f64 {
    to_float(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_to_float_is_total() {
        assert_eq!(str_to_float("abc"), 0.0);
        assert_eq!(str_to_float("1.5"), 1.5);
        assert_eq!(to_float(&json!("abc")), 0.0);
        assert_eq!(to_float(&json!("1.5")), 1.5);
        assert_eq!(to_float(&json!(2)), 2.0);
        assert_eq!(to_float(&json!(null)), 0.0);
        assert_eq!(to_float(&json!([1.0])), 0.0);
        assert_eq!(try_float(&json!("")), None);
    }

    #[test]
    fn test_to_bool_and_order() {
        assert!(to_bool(&json!(true)));
        assert!(to_bool(&json!("Yes")));
        assert!(!to_bool(&json!("no")));
        assert!(!to_bool(&json!(null)));
        assert_eq!(to_order(&json!(3)), 3.0);
        assert_eq!(to_order(&json!("2")), 2.0);
        assert_eq!(to_order(&json!(1.5)), 1.5);
        assert_eq!(to_order(&json!("x")), 0.0);
    }
}
