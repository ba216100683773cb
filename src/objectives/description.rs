//! 函数描述语法：把人类可读的描述解析为类型化的 FunctionDescription
//!
//! | 函数类型 | 描述示例 |
//! |---|---|
//! | Max / Min / Uniform Dose | `Max Dose 4500 cGy` |
//! | Max / Min / Target EUD | `Max EUD 2000 cGy, Parameter A 8` |
//! | Dose Fall-Off | `Dose fall-off [H] 4500 cGy [L] 2000 cGy, Low dose distance 1.5 cm` |
//! | Max / Min DVH | `Max DVH 500 cGy to 0.1cc volume`、`Min DVH 200 cGy to 70% volume` |
//! | Uniformity Constraint | `Uniformity Constraint Rel.std.dev 3 %` |
//!
//! EUD 参数 A 的合理范围约为 −150…150，此处不做校验。

use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde::Serialize;

use crate::core::ParseError;
use crate::engine::{DoseFunctionParameters, FunctionKind};

const NUM: &str = r"(-?\d+(?:\.\d+)?)";

static DOSE_RE: OnceLock<Regex> = OnceLock::new();
static EUD_RE: OnceLock<Regex> = OnceLock::new();
static FALL_OFF_RE: OnceLock<Regex> = OnceLock::new();
static DVH_RE: OnceLock<Regex> = OnceLock::new();
static UNIFORMITY_RE: OnceLock<Regex> = OnceLock::new();

fn dose_re() -> &'static Regex {
    DOSE_RE.get_or_init(|| {
        Regex::new(&format!(r"(?i)^\s*(max|min|uniform)\s+dose\s+{NUM}\s*cgy\s*$")).unwrap()
    })
}

fn eud_re() -> &'static Regex {
    EUD_RE.get_or_init(|| {
        Regex::new(&format!(
            r"(?i)^\s*(max|min|target)\s*eud\s+{NUM}\s*cgy\s*,\s*parameter\s*a\s*{NUM}\s*$"
        ))
        .unwrap()
    })
}

fn fall_off_re() -> &'static Regex {
    FALL_OFF_RE.get_or_init(|| {
        Regex::new(&format!(
            r"(?i)^\s*dose\s*fall-?off\s*(?:\[h\])?\s*{NUM}\s*cgy\s*(?:\[l\])?\s*{NUM}\s*cgy\s*,\s*low\s+dose\s+distance\s+{NUM}\s*cm\s*$"
        ))
        .unwrap()
    })
}

fn dvh_re() -> &'static Regex {
    DVH_RE.get_or_init(|| {
        Regex::new(&format!(
            r"(?i)^\s*(max|min)\s*dvh\s+{NUM}\s*cgy\s+to\s+{NUM}\s*(%|cc)\s*volume\s*$"
        ))
        .unwrap()
    })
}

fn uniformity_re() -> &'static Regex {
    UNIFORMITY_RE.get_or_init(|| {
        Regex::new(&format!(
            r"(?i)^\s*uniformity\s+constraint\s+rel\.?\s*std\.?\s*dev\.?\s*{NUM}\s*%\s*$"
        ))
        .unwrap()
    })
}

/// DVH 函数的体积：百分比与绝对体积互斥
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum DvhVolume {
    Percent(f64),
    Cc(f64),
}

/// 解析后的函数描述
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum FunctionDescription {
    /// Max / Min / Uniform Dose
    DoseLevel { dose: f64 },
    Eud { dose: f64, parameter_a: f64 },
    DoseFallOff { high: f64, low: f64, distance: f64 },
    Dvh { dose: f64, volume: DvhVolume },
    UniformityConstraint { std_deviation: f64 },
}

fn expected_for(kind: FunctionKind) -> &'static str {
    match kind {
        FunctionKind::MaxDose | FunctionKind::MinDose | FunctionKind::UniformDose => {
            "'<kind> <dose> cGy'"
        }
        FunctionKind::MaxEud | FunctionKind::MinEud | FunctionKind::TargetEud => {
            "'<kind> <dose> cGy, Parameter A <a>'"
        }
        FunctionKind::DoseFallOff => {
            "'Dose fall-off [H] <high> cGy [L] <low> cGy, Low dose distance <d> cm'"
        }
        FunctionKind::MaxDvh | FunctionKind::MinDvh => "'<kind> <dose> cGy to <volume><%|cc> volume'",
        FunctionKind::UniformityConstraint => "'Uniformity Constraint Rel.std.dev <p> %'",
    }
}

impl FunctionDescription {
    /// 按函数类型解析描述；描述的前缀必须与类型一致
    pub fn parse(kind: FunctionKind, text: &str) -> Result<Self, ParseError> {
        let expected = expected_for(kind);
        let malformed = || ParseError::MalformedDescription {
            input: text.to_string(),
            expected,
        };
        let num = |caps: &Captures<'_>, i: usize| -> Result<f64, ParseError> {
            caps[i].parse::<f64>().map_err(|_| malformed())
        };
        // 前缀（max/min/...）+ 函数族共同确定类型
        let prefix_matches = |prefix: &str, family: &str| -> bool {
            format!("{prefix}{family}").parse::<FunctionKind>().ok() == Some(kind)
        };

        match kind {
            FunctionKind::MaxDose | FunctionKind::MinDose | FunctionKind::UniformDose => {
                let caps = dose_re().captures(text).ok_or_else(malformed)?;
                if !prefix_matches(&caps[1], "dose") {
                    return Err(malformed());
                }
                Ok(FunctionDescription::DoseLevel { dose: num(&caps, 2)? })
            }
            FunctionKind::MaxEud | FunctionKind::MinEud | FunctionKind::TargetEud => {
                let caps = eud_re().captures(text).ok_or_else(malformed)?;
                if !prefix_matches(&caps[1], "eud") {
                    return Err(malformed());
                }
                Ok(FunctionDescription::Eud {
                    dose: num(&caps, 2)?,
                    parameter_a: num(&caps, 3)?,
                })
            }
            FunctionKind::DoseFallOff => {
                let caps = fall_off_re().captures(text).ok_or_else(malformed)?;
                Ok(FunctionDescription::DoseFallOff {
                    high: num(&caps, 1)?,
                    low: num(&caps, 2)?,
                    distance: num(&caps, 3)?,
                })
            }
            FunctionKind::MaxDvh | FunctionKind::MinDvh => {
                let caps = dvh_re().captures(text).ok_or_else(malformed)?;
                if !prefix_matches(&caps[1], "dvh") {
                    return Err(malformed());
                }
                let amount = num(&caps, 3)?;
                let volume = if caps[4].eq_ignore_ascii_case("cc") {
                    DvhVolume::Cc(amount)
                } else {
                    DvhVolume::Percent(amount)
                };
                Ok(FunctionDescription::Dvh {
                    dose: num(&caps, 2)?,
                    volume,
                })
            }
            FunctionKind::UniformityConstraint => {
                let caps = uniformity_re().captures(text).ok_or_else(malformed)?;
                Ok(FunctionDescription::UniformityConstraint {
                    std_deviation: num(&caps, 1)?,
                })
            }
        }
    }

    /// 对应的剂量函数参数（不含 tag / weight）
    pub fn to_parameters(&self) -> DoseFunctionParameters {
        let mut p = DoseFunctionParameters::default();
        match *self {
            FunctionDescription::DoseLevel { dose } => p.dose_level = Some(dose),
            FunctionDescription::Eud { dose, parameter_a } => {
                p.dose_level = Some(dose);
                p.eud_parameter_a = Some(parameter_a);
            }
            FunctionDescription::DoseFallOff {
                high,
                low,
                distance,
            } => {
                p.high_dose_level = Some(high);
                p.low_dose_level = Some(low);
                p.low_dose_distance = Some(distance);
            }
            FunctionDescription::Dvh { dose, volume } => {
                p.dose_level = Some(dose);
                match volume {
                    DvhVolume::Percent(v) => {
                        p.is_absolute_volume = Some(false);
                        p.percent_volume = Some(v);
                    }
                    DvhVolume::Cc(v) => {
                        p.is_absolute_volume = Some(true);
                        p.absolute_volume = Some(v);
                    }
                }
            }
            FunctionDescription::UniformityConstraint { std_deviation } => {
                p.percent_std_deviation = Some(std_deviation);
            }
        }
        p
    }
}
