use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Node/edge graph drawn in the editor.
///
/// The backend never interprets the graph. It is parsed only far enough to reject documents that
/// are not a pipeline at all, then handed to the external tool as JSON text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineDescriptor {
    #[serde(default)]
    pub nodes: Vec<Value>,
    #[serde(default)]
    pub edges: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PipelineDescriptor {
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_fields_survive_serialization() {
        let text = r#"{"nodes":[{"id":"1","data":{"name":"blur"}}],"edges":[],"viewport":{"zoom":1}}"#;
        let pipeline = PipelineDescriptor::from_json(text).unwrap();
        assert_eq!(pipeline.nodes.len(), 1);
        assert_eq!(pipeline.extra.get("viewport"), Some(&json!({"zoom": 1})));

        let reparsed: Value = serde_json::from_str(&pipeline.to_json().unwrap()).unwrap();
        assert_eq!(reparsed, serde_json::from_str::<Value>(text).unwrap());
    }

    #[test]
    fn rejects_non_graph_documents() {
        assert!(PipelineDescriptor::from_json(r#"{"nodes": 3}"#).is_err());
        assert!(PipelineDescriptor::from_json("[]").is_err());
    }
}
