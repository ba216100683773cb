//! ROI：名称匹配、集合代数构建与结构合成

pub mod algebra;
pub mod matching;
pub mod synthesizer;

pub use algebra::{lookup_operation, map_operation, margin_settings, SetAlgebraBuilder};
pub use matching::{RoiMatch, RoiMatchMap, RoiMatcher};
pub use synthesizer::{
    StructureMethod, StructurePassSummary, StructureSpec, StructureSynthesizer, SynthesisVariant,
};
