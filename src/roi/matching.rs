//! ROI 匹配：流程中的符号名 → 患者实际结构名
//!
//! 每个条目先按自身名称（大小写不敏感）查找，再依次尝试逗号分隔的候选名，第一个命中即采用。
//! 匹配表在循环开始前构建一次，之后只读。

use std::collections::BTreeMap;

use serde::Serialize;

use crate::engine::PlanningEngine;
use crate::flow::MatchRoiEntry;

/// 单个符号名的匹配结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RoiMatch {
    Matched(String),
    NotMatched,
}

/// 符号名 → 实际名；未匹配或未登记的名称原样透传
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RoiMatchMap {
    entries: BTreeMap<String, RoiMatch>,
}

impl RoiMatchMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, symbolic: impl Into<String>, matched: RoiMatch) {
        self.entries.insert(symbolic.into(), matched);
    }

    /// 解析符号名；找不到映射时返回原名，后续引擎调用自行报错
    pub fn resolve<'a>(&'a self, symbolic: &'a str) -> &'a str {
        match self.entries.get(symbolic) {
            Some(RoiMatch::Matched(actual)) => actual.as_str(),
            _ => symbolic,
        }
    }

    pub fn get(&self, symbolic: &str) -> Option<&RoiMatch> {
        self.entries.get(symbolic)
    }

    pub fn unmatched(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(_, m)| matches!(m, RoiMatch::NotMatched))
            .map(|(k, _)| k.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 依据配置条目与计划引擎构建匹配表
pub struct RoiMatcher<'a> {
    engine: &'a dyn PlanningEngine,
}

impl<'a> RoiMatcher<'a> {
    pub fn new(engine: &'a dyn PlanningEngine) -> Self {
        Self { engine }
    }

    pub async fn build(&self, entries: &[MatchRoiEntry]) -> RoiMatchMap {
        let mut map = RoiMatchMap::new();
        for entry in entries {
            let symbolic = entry.roi_name.trim();
            if symbolic.is_empty() {
                continue;
            }
            let matched = self.match_one(symbolic, &entry.possible_roi_name).await;
            match &matched {
                RoiMatch::Matched(actual) => {
                    tracing::debug!("ROI '{}' matched to '{}'", symbolic, actual);
                }
                RoiMatch::NotMatched => {
                    tracing::warn!("ROI '{}' has no match in the current patient", symbolic);
                }
            }
            map.insert(symbolic, matched);
        }
        tracing::info!(
            "ROI matching: {} of {} matched, {} unmatched",
            map.len() - map.unmatched().len(),
            map.len(),
            map.unmatched().len()
        );
        map
    }

    async fn match_one(&self, symbolic: &str, candidates: &str) -> RoiMatch {
        if let Some(actual) = self.engine.resolve_roi(symbolic).await {
            return RoiMatch::Matched(actual);
        }
        for candidate in candidates.split(',').map(str::trim).filter(|c| !c.is_empty()) {
            if let Some(actual) = self.engine.resolve_roi(candidate).await {
                return RoiMatch::Matched(actual);
            }
        }
        RoiMatch::NotMatched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{RoiDose, SimulatedEngine};

    fn entry(name: &str, candidates: &str) -> MatchRoiEntry {
        MatchRoiEntry {
            roi_name: name.to_string(),
            possible_roi_name: candidates.to_string(),
        }
    }

    #[tokio::test]
    async fn test_build_prefers_own_name_then_candidates() {
        let engine = SimulatedEngine::new()
            .with_roi("ptv", RoiDose::new(100.0))
            .with_roi("Rectum_wall", RoiDose::new(40.0));
        let map = RoiMatcher::new(&engine)
            .build(&[
                entry("PTV", "PTV_7000"),
                entry("Rectum", "Rect, Rectum_wall"),
                entry("Bladder", "Blad, BLADDER_1"),
            ])
            .await;

        assert_eq!(map.resolve("PTV"), "ptv");
        assert_eq!(map.resolve("Rectum"), "Rectum_wall");
        assert_eq!(map.get("Bladder"), Some(&RoiMatch::NotMatched));
        assert_eq!(map.resolve("Bladder"), "Bladder");
        assert_eq!(map.resolve("Femur_L"), "Femur_L");
        assert_eq!(map.unmatched(), vec!["Bladder"]);
    }
}
