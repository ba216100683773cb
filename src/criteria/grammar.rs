//! 条件语法：把条件类型 + 条件字符串解析为类型化的 CriterionTest
//!
//! 支持的写法：
//! - Max / Min Dose、Dmean：`≥4200`、`≤ 3800 cGy`
//! - DaV：`D95% ≥ 3900 cGy`、`D2cc ≤ 4500 cGy`
//! - VaD：`V2000cGy ≤ 20cc`、`V4000cGy ≥ 95%`

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::core::ParseError;
use crate::criteria::comparator::{Comparator, RoundGate};

const CMP: &str = r"(≥|≤|>=|<=|==|>|<|=)";
const NUM: &str = r"(-?\d+(?:\.\d+)?)";

static THRESHOLD_RE: OnceLock<Regex> = OnceLock::new();
static DAV_RE: OnceLock<Regex> = OnceLock::new();
static VAD_RE: OnceLock<Regex> = OnceLock::new();

fn threshold_re() -> &'static Regex {
    THRESHOLD_RE.get_or_init(|| {
        Regex::new(&format!(r"(?i)^\s*{CMP}\s*{NUM}\s*(?:cgy)?\s*$")).unwrap()
    })
}

fn dav_re() -> &'static Regex {
    DAV_RE.get_or_init(|| {
        Regex::new(&format!(r"(?i)^\s*D\s*{NUM}\s*(%|cc)\s*{CMP}\s*{NUM}\s*cgy\s*$")).unwrap()
    })
}

fn vad_re() -> &'static Regex {
    VAD_RE.get_or_init(|| {
        Regex::new(&format!(r"(?i)^\s*V\s*{NUM}\s*cgy\s*{CMP}\s*{NUM}\s*(%|cc)\s*$")).unwrap()
    })
}

/// 条件类型（配置中的 condition_type）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CriterionKind {
    AlwaysTrue,
    MaxDose,
    MinDose,
    Dmean,
    DoseAtVolume,
    VolumeAtDose,
}

impl std::str::FromStr for CriterionKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        match normalized.as_str() {
            "alwaystrue" | "always" | "true" => Ok(CriterionKind::AlwaysTrue),
            "maxdose" | "max" => Ok(CriterionKind::MaxDose),
            "mindose" | "min" => Ok(CriterionKind::MinDose),
            "dmean" | "meandose" | "mean" => Ok(CriterionKind::Dmean),
            "dav" | "doseatvolume" => Ok(CriterionKind::DoseAtVolume),
            "vad" | "volumeatdose" => Ok(CriterionKind::VolumeAtDose),
            _ => Err(ParseError::UnknownKind {
                kind: "condition type",
                value: s.to_string(),
            }),
        }
    }
}

/// 体积单位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VolumeUnit {
    Percent,
    Cc,
}

impl VolumeUnit {
    fn parse(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("cc") {
            VolumeUnit::Cc
        } else {
            VolumeUnit::Percent
        }
    }
}

/// 阈值比较：`<比较符><数值>`
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Threshold {
    pub comparator: Comparator,
    pub value: f64,
}

/// 解析后的条件
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum CriterionTest {
    AlwaysTrue,
    MaxDose(Threshold),
    MinDose(Threshold),
    MeanDose(Threshold),
    /// D<volume><unit> <cmp> <dose>cGy
    DoseAtVolume {
        volume: f64,
        unit: VolumeUnit,
        comparator: Comparator,
        dose: f64,
    },
    /// V<dose>cGy <cmp> <volume><unit>
    VolumeAtDose {
        dose: f64,
        comparator: Comparator,
        volume: f64,
        unit: VolumeUnit,
    },
}

impl CriterionTest {
    pub fn parse(kind: CriterionKind, criteria: &str) -> Result<Self, ParseError> {
        match kind {
            CriterionKind::AlwaysTrue => Ok(CriterionTest::AlwaysTrue),
            CriterionKind::MaxDose => Ok(CriterionTest::MaxDose(parse_threshold(criteria)?)),
            CriterionKind::MinDose => Ok(CriterionTest::MinDose(parse_threshold(criteria)?)),
            CriterionKind::Dmean => Ok(CriterionTest::MeanDose(parse_threshold(criteria)?)),
            CriterionKind::DoseAtVolume => parse_dose_at_volume(criteria),
            CriterionKind::VolumeAtDose => parse_volume_at_dose(criteria),
        }
    }

    pub fn kind(&self) -> CriterionKind {
        match self {
            CriterionTest::AlwaysTrue => CriterionKind::AlwaysTrue,
            CriterionTest::MaxDose(_) => CriterionKind::MaxDose,
            CriterionTest::MinDose(_) => CriterionKind::MinDose,
            CriterionTest::MeanDose(_) => CriterionKind::Dmean,
            CriterionTest::DoseAtVolume { .. } => CriterionKind::DoseAtVolume,
            CriterionTest::VolumeAtDose { .. } => CriterionKind::VolumeAtDose,
        }
    }
}

fn number(raw: &str, input: &str, expected: &'static str) -> Result<f64, ParseError> {
    raw.parse::<f64>().map_err(|_| ParseError::MalformedCriteria {
        input: input.to_string(),
        expected,
    })
}

fn parse_threshold(criteria: &str) -> Result<Threshold, ParseError> {
    const EXPECTED: &str = "<comparator><dose>";
    let caps = threshold_re()
        .captures(criteria)
        .ok_or_else(|| ParseError::MalformedCriteria {
            input: criteria.to_string(),
            expected: EXPECTED,
        })?;
    Ok(Threshold {
        comparator: caps[1].parse()?,
        value: number(&caps[2], criteria, EXPECTED)?,
    })
}

fn parse_dose_at_volume(criteria: &str) -> Result<CriterionTest, ParseError> {
    const EXPECTED: &str = "D<volume><%|cc> <comparator> <dose>cGy";
    let caps = dav_re()
        .captures(criteria)
        .ok_or_else(|| ParseError::MalformedCriteria {
            input: criteria.to_string(),
            expected: EXPECTED,
        })?;
    Ok(CriterionTest::DoseAtVolume {
        volume: number(&caps[1], criteria, EXPECTED)?,
        unit: VolumeUnit::parse(&caps[2]),
        comparator: caps[3].parse()?,
        dose: number(&caps[4], criteria, EXPECTED)?,
    })
}

fn parse_volume_at_dose(criteria: &str) -> Result<CriterionTest, ParseError> {
    const EXPECTED: &str = "V<dose>cGy <comparator> <volume><%|cc>";
    let caps = vad_re()
        .captures(criteria)
        .ok_or_else(|| ParseError::MalformedCriteria {
            input: criteria.to_string(),
            expected: EXPECTED,
        })?;
    Ok(CriterionTest::VolumeAtDose {
        dose: number(&caps[1], criteria, EXPECTED)?,
        comparator: caps[2].parse()?,
        volume: number(&caps[3], criteria, EXPECTED)?,
        unit: VolumeUnit::parse(&caps[4]),
    })
}

/// 一条待评估的条件
#[derive(Debug, Clone, PartialEq)]
pub struct Criterion {
    pub name: String,
    /// 流程中的符号 ROI 名，评估前经 ROI 匹配表解析
    pub roi: String,
    pub test: Result<CriterionTest, ParseError>,
    pub active_round: Result<RoundGate, ParseError>,
}

impl Criterion {
    /// 从配置字段构建；语法错误保留在 test / active_round 中，评估时按不满足处理
    pub fn new(name: &str, kind: &str, roi: &str, criteria: &str, active_round: &str) -> Self {
        let test = kind
            .parse::<CriterionKind>()
            .and_then(|k| CriterionTest::parse(k, criteria));
        Self {
            name: name.to_string(),
            roi: roi.to_string(),
            test,
            active_round: RoundGate::parse(active_round),
        }
    }
}
