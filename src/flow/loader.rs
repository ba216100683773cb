//! 从磁盘或字符串读取流程文档

use std::path::Path;

use crate::core::FlowError;
use crate::flow::document::FlowDocument;

pub fn parse_flow(json: &str) -> Result<FlowDocument, FlowError> {
    Ok(serde_json::from_str(json)?)
}

pub fn load_flow(path: impl AsRef<Path>) -> Result<FlowDocument, FlowError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    let doc = parse_flow(&content)?;
    tracing::info!(
        "Loaded flow {} ({} conditions, {} condition ROIs, {} adjustments)",
        path.display(),
        doc.check_conditions.len(),
        doc.condition_rois.len(),
        doc.function_adjustments.len()
    );
    Ok(doc)
}
