//! 比较符与轮次门控
//!
//! 配置文档中使用 Unicode 比较符 `≥ ≤ > < =`，同时接受 ASCII 写法 `>=`、`<=`、`==`。

use serde::{Deserialize, Serialize};

use crate::core::ParseError;

/// 比较符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparator {
    GreaterOrEqual,
    Greater,
    Equal,
    Less,
    LessOrEqual,
}

impl Comparator {
    /// 线上格式使用的符号
    pub fn symbol(&self) -> &'static str {
        match self {
            Comparator::GreaterOrEqual => "≥",
            Comparator::Greater => ">",
            Comparator::Equal => "=",
            Comparator::Less => "<",
            Comparator::LessOrEqual => "≤",
        }
    }

    /// 轮次比较：五种比较符都按字面含义
    pub fn compare_round(self, round: u32, target: u32) -> bool {
        match self {
            Comparator::GreaterOrEqual => round >= target,
            Comparator::Greater => round > target,
            Comparator::Equal => round == target,
            Comparator::Less => round < target,
            Comparator::LessOrEqual => round <= target,
        }
    }

    /// 剂量学条件判断：只有 ≥ 与 ≤ 参与比较，其余比较符一律不成立
    pub fn holds(self, actual: f64, threshold: f64) -> bool {
        match self {
            Comparator::GreaterOrEqual => actual >= threshold,
            Comparator::LessOrEqual => actual <= threshold,
            Comparator::Greater | Comparator::Equal | Comparator::Less => false,
        }
    }
}

impl std::fmt::Display for Comparator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbol())
    }
}

impl std::str::FromStr for Comparator {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "≥" | ">=" => Ok(Comparator::GreaterOrEqual),
            ">" => Ok(Comparator::Greater),
            "=" | "==" => Ok(Comparator::Equal),
            "<" => Ok(Comparator::Less),
            "≤" | "<=" => Ok(Comparator::LessOrEqual),
            other => Err(ParseError::UnknownComparator(other.to_string())),
        }
    }
}

/// 条件的生效轮次：`(比较符, 轮次)`，线上格式为 `"≥ 3"` 这样的两段字符串
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundGate {
    pub comparator: Comparator,
    pub round: u32,
}

impl RoundGate {
    /// 解析 `"≥ 3"`；也接受无空格的 `"≥3"`。空串没有比较符，视为格式错误
    pub fn parse(raw: &str) -> Result<Self, ParseError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ParseError::MalformedActiveRound(raw.to_string()));
        }
        let split_at = trimmed
            .find(|c: char| c.is_ascii_digit() || c.is_whitespace())
            .ok_or_else(|| ParseError::MalformedActiveRound(raw.to_string()))?;
        let (symbol, number) = trimmed.split_at(split_at);
        if symbol.is_empty() {
            return Err(ParseError::MalformedActiveRound(raw.to_string()));
        }
        let comparator: Comparator = symbol.parse()?;
        let round = number
            .trim()
            .parse::<u32>()
            .map_err(|_| ParseError::MalformedActiveRound(raw.to_string()))?;
        Ok(Self { comparator, round })
    }

    pub fn is_active(&self, round: u32) -> bool {
        self.comparator.compare_round(round, self.round)
    }

    pub fn to_wire(&self) -> String {
        format!("{} {}", self.comparator.symbol(), self.round)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_symbols() {
        assert_eq!("≥".parse::<Comparator>(), Ok(Comparator::GreaterOrEqual));
        assert_eq!(">=".parse::<Comparator>(), Ok(Comparator::GreaterOrEqual));
        assert_eq!("≤".parse::<Comparator>(), Ok(Comparator::LessOrEqual));
        assert_eq!("=".parse::<Comparator>(), Ok(Comparator::Equal));
        assert!(matches!(
            "~".parse::<Comparator>(),
            Err(ParseError::UnknownComparator(_))
        ));
    }

    #[test]
    fn test_holds_only_for_inclusive_comparators() {
        assert!(Comparator::GreaterOrEqual.holds(4200.0, 4200.0));
        assert!(!Comparator::GreaterOrEqual.holds(4199.9, 4200.0));
        assert!(Comparator::LessOrEqual.holds(15.0, 20.0));
        assert!(!Comparator::LessOrEqual.holds(20.1, 20.0));
        assert!(!Comparator::Greater.holds(5000.0, 4200.0));
        assert!(!Comparator::Less.holds(1.0, 4200.0));
        assert!(!Comparator::Equal.holds(4200.0, 4200.0));
    }

    #[test]
    fn test_round_gate_is_exact() {
        let gate = RoundGate::parse("≥ 3").unwrap();
        assert!(!gate.is_active(1));
        assert!(!gate.is_active(2));
        assert!(gate.is_active(3));
        assert!(gate.is_active(7));

        let only_first = RoundGate::parse("= 1").unwrap();
        assert!(only_first.is_active(1));
        assert!(!only_first.is_active(2));

        let early = RoundGate::parse("<3").unwrap();
        assert!(early.is_active(2));
        assert!(!early.is_active(3));
    }

    #[test]
    fn test_round_gate_errors() {
        assert!(matches!(
            RoundGate::parse("~ 2"),
            Err(ParseError::UnknownComparator(_))
        ));
        assert!(matches!(
            RoundGate::parse("≥ two"),
            Err(ParseError::MalformedActiveRound(_))
        ));
        assert!(matches!(
            RoundGate::parse(""),
            Err(ParseError::MalformedActiveRound(_))
        ));
        assert!(matches!(
            RoundGate::parse("   "),
            Err(ParseError::MalformedActiveRound(_))
        ));
        assert_eq!(RoundGate::parse("≤ 4").unwrap().to_wire(), "≤ 4");
    }
}
