//! The authoring graph JSON exchanged with the flow editor.
//!
//! The editor owns most of the node and edge shape, so unknown fields are
//! carried through untouched and written back on save.

use flowline_core::FlowActionId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The node/edge graph as drawn by the author.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthorGraph {
    #[serde(default)]
    pub nodes: Vec<AuthorNode>,
    #[serde(default)]
    pub edges: Vec<AuthorEdge>,
}

/// A node of the authoring graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorNode {
    /// The author's node id.
    pub id: String,
    /// The persisted action id, round-tripped after the first save.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_id: Option<FlowActionId>,
    #[serde(rename = "type", default)]
    pub node_type: String,
    pub data: AuthorNodeData,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The `data` blob of an authoring node.
///
/// Kept loose so the compiler can report precise validation errors instead
/// of failing on deserialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorNodeData {
    pub action: String,
    #[serde(default)]
    pub wait_before: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_template: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An edge of the authoring graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorEdge {
    pub source: String,
    pub target: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AuthorGraph {
    /// Adds a node built from its id, action name and wait.
    pub fn push_node(&mut self, id: impl Into<String>, data: AuthorNodeData) -> &mut Self {
        self.nodes.push(AuthorNode {
            id: id.into(),
            internal_id: None,
            node_type: "action".to_string(),
            data,
            extra: Map::new(),
        });
        self
    }

    /// Adds an edge between two author node ids.
    pub fn push_edge(&mut self, source: impl Into<String>, target: impl Into<String>) -> &mut Self {
        self.edges.push(AuthorEdge {
            source: source.into(),
            target: target.into(),
            extra: Map::new(),
        });
        self
    }
}

impl AuthorNodeData {
    /// Creates data for the given action name.
    #[must_use]
    pub fn action(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            ..Self::default()
        }
    }

    /// Creates a `WAIT` node carrying the given minutes.
    #[must_use]
    pub fn wait(minutes: u32) -> Self {
        Self::action("WAIT").with_wait(minutes)
    }

    /// Sets `waitBefore`.
    #[must_use]
    pub fn with_wait(mut self, minutes: u32) -> Self {
        self.wait_before = minutes;
        self
    }

    /// Sets the email subject.
    #[must_use]
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Sets the body template.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body_template = Some(body.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_fields_survive_roundtrip() {
        let raw = json!({
            "nodes": [{
                "id": "n1",
                "type": "action",
                "position": {"x": 10, "y": 20},
                "data": {"action": "FLOW_START", "label": "Start"}
            }],
            "edges": [{"source": "n1", "target": "n2", "id": "e1"}]
        });

        let graph: AuthorGraph = serde_json::from_value(raw.clone()).expect("deserialize");
        assert_eq!(graph.nodes[0].data.action, "FLOW_START");
        assert_eq!(graph.nodes[0].data.wait_before, 0);

        let back = serde_json::to_value(&graph).expect("serialize");
        assert_eq!(back["nodes"][0]["position"]["x"], 10);
        assert_eq!(back["nodes"][0]["data"]["label"], "Start");
        assert_eq!(back["edges"][0]["id"], "e1");
        assert!(back["nodes"][0].get("internalId").is_none());
    }
}
