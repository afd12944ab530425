//! Graph compiler: authoring graph to persisted actions and NEXT links.
//!
//! Compilation is pure. It validates the authoring graph, folds `WAIT`
//! pseudo-nodes into the `waitBefore` of the action they lead to, assigns
//! internal ids and emits NEXT links in breadth-first order from the start
//! nodes. Persisting the result is the caller's job.

use crate::action::{ActionBody, ActionData, ActionKind, FlowAction};
use crate::author::{AuthorGraph, AuthorNode};
use crate::graph::ActionGraph;
use chrono::{DateTime, Utc};
use flowline_core::{EngineError, FlowActionId, FlowId, Result};
use std::collections::{HashMap, HashSet};

/// The output of [`compile`].
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFlow {
    /// Persistable actions, in authoring order.
    pub actions: Vec<FlowAction>,
    /// NEXT links in breadth-first order from the start actions.
    pub links: Vec<(FlowActionId, FlowActionId)>,
    /// The authoring graph with `internalId` filled in on every real action.
    pub graph: AuthorGraph,
}

impl CompiledFlow {
    /// Returns the action with the given author id.
    #[must_use]
    pub fn action_by_external_id(&self, external_id: &str) -> Option<&FlowAction> {
        self.actions.iter().find(|a| a.external_id == external_id)
    }
}

fn invalid(details: impl Into<String>) -> rootcause::Report<EngineError> {
    EngineError::invalid_graph(details).into()
}

/// Compiles an authoring graph for a flow.
///
/// # Errors
///
/// Returns `InvalidGraph` if node ids repeat, an edge references a missing
/// node, an action name is unknown, a `WAIT` node does not have exactly one
/// outgoing edge, `WAIT` nodes form a loop, no `FLOW_START` exists, a start
/// node has incoming edges, an end node has outgoing edges, an email action
/// lacks its subject or body, or the action graph has a cycle.
pub fn compile(flow_id: FlowId, author: &AuthorGraph, now: DateTime<Utc>) -> Result<CompiledFlow> {
    let mut nodes: HashMap<&str, &AuthorNode> = HashMap::new();
    let mut kinds: HashMap<&str, ActionKind> = HashMap::new();
    for node in &author.nodes {
        if nodes.insert(node.id.as_str(), node).is_some() {
            return Err(invalid(format!("duplicate node id {}", node.id)));
        }
        let kind = node
            .data
            .action
            .parse::<ActionKind>()
            .map_err(|e| invalid(format!("node {}: {e}", node.id)))?;
        kinds.insert(node.id.as_str(), kind);
    }

    let is_wait = |id: &str| kinds.get(id) == Some(&ActionKind::Wait);

    let mut wait_targets: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in &author.edges {
        for end in [&edge.source, &edge.target] {
            if !nodes.contains_key(end.as_str()) {
                return Err(invalid(format!(
                    "edge {} -> {} references missing node {end}",
                    edge.source, edge.target
                )));
            }
        }
        if is_wait(&edge.source) {
            wait_targets
                .entry(edge.source.as_str())
                .or_default()
                .push(edge.target.as_str());
        }
    }

    for (id, kind) in &kinds {
        if *kind == ActionKind::Wait {
            let outgoing = wait_targets.get(id).map_or(0, Vec::len);
            if outgoing != 1 {
                return Err(invalid(format!(
                    "WAIT node {id} must have exactly one outgoing edge, found {outgoing}"
                )));
            }
        }
    }

    let mut graph = ActionGraph::new();
    for node in &author.nodes {
        if !is_wait(&node.id) {
            graph.add_node(&node.id);
        }
    }

    let mut carried: HashMap<&str, u32> = HashMap::new();
    for edge in &author.edges {
        if is_wait(&edge.source) {
            continue;
        }
        let (target, minutes) = skip_chain(&edge.target, &kinds, &nodes, &wait_targets)?;
        let entry = carried.entry(target).or_insert(0);
        *entry = (*entry).max(minutes);
        graph.add_edge(&edge.source, target);
    }

    let mut starts: Vec<&str> = kinds
        .iter()
        .filter(|(_, kind)| **kind == ActionKind::FlowStart)
        .map(|(id, _)| *id)
        .collect();
    starts.sort_unstable();
    if starts.is_empty() {
        return Err(invalid("no FLOW_START node"));
    }

    for (id, kind) in &kinds {
        match kind {
            ActionKind::FlowStart if !graph.predecessors(id).is_empty() => {
                return Err(invalid(format!("FLOW_START node {id} has incoming edges")));
            }
            ActionKind::FlowEnd if !graph.successors(id).is_empty() => {
                return Err(invalid(format!("FLOW_END node {id} has outgoing edges")));
            }
            _ => {}
        }
    }

    if graph.is_cyclic() {
        return Err(invalid("flow graph contains a cycle"));
    }

    let mut ids: HashMap<&str, FlowActionId> = HashMap::new();
    let mut actions = Vec::new();
    let mut compiled_graph = author.clone();
    for node in &mut compiled_graph.nodes {
        let kind = kinds[node.id.as_str()];
        if kind == ActionKind::Wait {
            continue;
        }
        let original = nodes[node.id.as_str()];
        let id = original.internal_id.unwrap_or_default();
        let wait = original
            .data
            .wait_before
            .saturating_add(carried.get(node.id.as_str()).copied().unwrap_or(0));
        let body = action_body(original, kind)?;

        node.internal_id = Some(id);
        ids.insert(original.id.as_str(), id);
        actions.push(FlowAction {
            id,
            flow_id,
            external_id: original.id.clone(),
            node_type: original.node_type.clone(),
            data: ActionData::new(body).with_wait(wait),
            updated_at: now,
        });
    }

    let links = graph
        .bfs_edges(&starts)
        .into_iter()
        .filter(|(source, target)| {
            !(kinds[source] == ActionKind::FlowStart && kinds[target] == ActionKind::FlowEnd)
        })
        .map(|(source, target)| (ids[source], ids[target]))
        .collect();

    Ok(CompiledFlow {
        actions,
        links,
        graph: compiled_graph,
    })
}

/// Follows WAIT nodes from `start` to the first real action, summing waits.
fn skip_chain<'a>(
    start: &'a str,
    kinds: &HashMap<&'a str, ActionKind>,
    nodes: &HashMap<&'a str, &'a AuthorNode>,
    wait_targets: &HashMap<&'a str, Vec<&'a str>>,
) -> Result<(&'a str, u32)> {
    let mut current = start;
    let mut minutes = 0u32;
    let mut seen = HashSet::new();
    while kinds.get(current) == Some(&ActionKind::Wait) {
        if !seen.insert(current) {
            return Err(invalid(format!("WAIT nodes form a loop at {current}")));
        }
        minutes = minutes.saturating_add(nodes[current].data.wait_before);
        current = wait_targets[current][0];
    }
    Ok((current, minutes))
}

fn action_body(node: &AuthorNode, kind: ActionKind) -> Result<ActionBody> {
    let required = |value: &Option<String>, field: &str| -> Result<String> {
        match value {
            Some(v) if !v.trim().is_empty() => Ok(v.clone()),
            _ => Err(invalid(format!("{kind} node {} is missing {field}", node.id))),
        }
    };

    let body = match kind {
        ActionKind::FlowStart => ActionBody::FlowStart,
        ActionKind::FlowEnd => ActionBody::FlowEnd,
        ActionKind::EmailNew => ActionBody::EmailNew {
            subject: required(&node.data.subject, "subject")?,
            body_template: required(&node.data.body_template, "bodyTemplate")?,
        },
        ActionKind::EmailReply => ActionBody::EmailReply {
            body_template: required(&node.data.body_template, "bodyTemplate")?,
        },
        ActionKind::LinkedinConnectionRequest => ActionBody::LinkedinConnectionRequest {
            message_template: node.data.message_template.clone(),
        },
        ActionKind::LinkedinMessage => ActionBody::LinkedinMessage {
            message_template: node.data.message_template.clone(),
        },
        ActionKind::Wait => return Err(invalid(format!("WAIT node {} cannot be persisted", node.id))),
    };
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::author::AuthorNodeData;

    fn start() -> AuthorNodeData {
        AuthorNodeData::action("FLOW_START")
    }

    fn end() -> AuthorNodeData {
        AuthorNodeData::action("FLOW_END")
    }

    fn email(subject: &str) -> AuthorNodeData {
        AuthorNodeData::action("EMAIL_NEW")
            .with_subject(subject)
            .with_body("Hello {{contact_first_name}}")
    }

    fn reply() -> AuthorNodeData {
        AuthorNodeData::action("EMAIL_REPLY").with_body("Bump")
    }

    fn kind_of(compiled: &CompiledFlow, external_id: &str) -> ActionKind {
        compiled
            .action_by_external_id(external_id)
            .expect("action exists")
            .kind()
    }

    fn link_names(compiled: &CompiledFlow) -> Vec<(String, String)> {
        let by_id: HashMap<FlowActionId, &str> = compiled
            .actions
            .iter()
            .map(|a| (a.id, a.external_id.as_str()))
            .collect();
        compiled
            .links
            .iter()
            .map(|(s, t)| (by_id[s].to_string(), by_id[t].to_string()))
            .collect()
    }

    fn compile_graph(graph: &AuthorGraph) -> Result<CompiledFlow> {
        compile(FlowId::new(), graph, Utc::now())
    }

    fn assert_invalid(graph: &AuthorGraph) {
        let err = compile_graph(graph).expect_err("should be rejected");
        assert_eq!(err.current_context().tag(), "InvalidGraph");
    }

    #[test]
    fn chained_waits_sum_into_successor() {
        let mut graph = AuthorGraph::default();
        graph
            .push_node("A", start())
            .push_node("B", AuthorNodeData::wait(30))
            .push_node("C", AuthorNodeData::wait(15))
            .push_node("D", email("Hi"))
            .push_node("E", end())
            .push_edge("A", "B")
            .push_edge("B", "C")
            .push_edge("C", "D")
            .push_edge("D", "E");

        let compiled = compile_graph(&graph).expect("compiles");

        let names: Vec<&str> = compiled
            .actions
            .iter()
            .map(|a| a.external_id.as_str())
            .collect();
        assert_eq!(names, vec!["A", "D", "E"]);
        assert!(compiled.actions.iter().all(|a| a.kind() != ActionKind::Wait));
        assert_eq!(
            compiled
                .action_by_external_id("D")
                .expect("D persisted")
                .data
                .wait_before,
            45
        );
        assert_eq!(
            link_names(&compiled),
            vec![
                ("A".to_string(), "D".to_string()),
                ("D".to_string(), "E".to_string())
            ]
        );
    }

    #[test]
    fn own_wait_is_kept_and_stacks_with_wait_nodes() {
        let mut graph = AuthorGraph::default();
        graph
            .push_node("s", start())
            .push_node("w", AuthorNodeData::wait(60))
            .push_node("m", email("Hi").with_wait(5))
            .push_node("e", end())
            .push_edge("s", "w")
            .push_edge("w", "m")
            .push_edge("m", "e");

        let compiled = compile_graph(&graph).expect("compiles");
        let action = compiled.action_by_external_id("m").expect("persisted");
        assert_eq!(action.data.wait_before, 65);
        assert_eq!(kind_of(&compiled, "e"), ActionKind::FlowEnd);
    }

    #[test]
    fn internal_ids_are_assigned_and_reused() {
        let mut graph = AuthorGraph::default();
        graph
            .push_node("s", start())
            .push_node("w", AuthorNodeData::wait(10))
            .push_node("m", email("Hi"))
            .push_edge("s", "w")
            .push_edge("w", "m");

        let first = compile_graph(&graph).expect("compiles");
        let wait_node = first.graph.nodes.iter().find(|n| n.id == "w").expect("kept");
        assert!(wait_node.internal_id.is_none());
        let m_id = first.action_by_external_id("m").expect("persisted").id;
        assert_eq!(
            first.graph.nodes.iter().find(|n| n.id == "m").expect("kept").internal_id,
            Some(m_id)
        );

        let second = compile_graph(&first.graph).expect("recompiles");
        assert_eq!(second.action_by_external_id("m").expect("persisted").id, m_id);
    }

    #[test]
    fn start_to_end_link_is_skipped() {
        let mut graph = AuthorGraph::default();
        graph
            .push_node("s", start())
            .push_node("e", end())
            .push_edge("s", "e");

        let compiled = compile_graph(&graph).expect("compiles");
        assert_eq!(compiled.actions.len(), 2);
        assert!(compiled.links.is_empty());
    }

    #[test]
    fn fan_out_emits_one_link_per_branch() {
        let mut graph = AuthorGraph::default();
        graph
            .push_node("s", start())
            .push_node("a", email("A"))
            .push_node("b", email("B"))
            .push_node("r", reply())
            .push_node("e", end())
            .push_edge("s", "a")
            .push_edge("s", "b")
            .push_edge("a", "r")
            .push_edge("b", "e")
            .push_edge("r", "e");

        let compiled = compile_graph(&graph).expect("compiles");
        assert_eq!(
            link_names(&compiled),
            vec![
                ("s".to_string(), "a".to_string()),
                ("s".to_string(), "b".to_string()),
                ("a".to_string(), "r".to_string()),
                ("b".to_string(), "e".to_string()),
                ("r".to_string(), "e".to_string()),
            ]
        );
    }

    #[test]
    fn linkedin_actions_compile() {
        let mut graph = AuthorGraph::default();
        graph
            .push_node("s", start())
            .push_node("l", AuthorNodeData::action("LINKEDIN_MESSAGE"))
            .push_edge("s", "l");

        let compiled = compile_graph(&graph).expect("compiles");
        assert_eq!(kind_of(&compiled, "l"), ActionKind::LinkedinMessage);
    }

    #[test]
    fn rejects_missing_start() {
        let mut graph = AuthorGraph::default();
        graph.push_node("m", email("Hi")).push_node("e", end()).push_edge("m", "e");
        assert_invalid(&graph);
    }

    #[test]
    fn rejects_edge_to_missing_node() {
        let mut graph = AuthorGraph::default();
        graph.push_node("s", start()).push_edge("s", "ghost");
        assert_invalid(&graph);
    }

    #[test]
    fn rejects_duplicate_node_ids() {
        let mut graph = AuthorGraph::default();
        graph.push_node("s", start()).push_node("s", end());
        assert_invalid(&graph);
    }

    #[test]
    fn rejects_cycles() {
        let mut graph = AuthorGraph::default();
        graph
            .push_node("s", start())
            .push_node("a", email("A"))
            .push_node("b", reply())
            .push_edge("s", "a")
            .push_edge("a", "b")
            .push_edge("b", "a");
        assert_invalid(&graph);
    }

    #[test]
    fn rejects_wait_loops_and_dangling_waits() {
        let mut looping = AuthorGraph::default();
        looping
            .push_node("s", start())
            .push_node("w1", AuthorNodeData::wait(1))
            .push_node("w2", AuthorNodeData::wait(1))
            .push_edge("s", "w1")
            .push_edge("w1", "w2")
            .push_edge("w2", "w1");
        assert_invalid(&looping);

        let mut dangling = AuthorGraph::default();
        dangling
            .push_node("s", start())
            .push_node("w", AuthorNodeData::wait(1))
            .push_edge("s", "w");
        assert_invalid(&dangling);
    }

    #[test]
    fn rejects_email_without_subject() {
        let mut graph = AuthorGraph::default();
        graph
            .push_node("s", start())
            .push_node("m", AuthorNodeData::action("EMAIL_NEW").with_body("x"))
            .push_edge("s", "m");
        assert_invalid(&graph);
    }

    #[test]
    fn rejects_edges_into_start_and_out_of_end() {
        let mut into_start = AuthorGraph::default();
        into_start
            .push_node("s", start())
            .push_node("m", email("Hi"))
            .push_edge("s", "m")
            .push_edge("m", "s");
        assert_invalid(&into_start);

        let mut out_of_end = AuthorGraph::default();
        out_of_end
            .push_node("s", start())
            .push_node("e", end())
            .push_node("m", email("Hi"))
            .push_edge("s", "e")
            .push_edge("e", "m");
        assert_invalid(&out_of_end);
    }

    #[test]
    fn rejects_unknown_action() {
        let mut graph = AuthorGraph::default();
        graph.push_node("s", start()).push_node("x", AuthorNodeData::action("SMS"));
        assert_invalid(&graph);
    }
}
