//! Workflow DAG validation, linearization, and `if_event` conditions.
//!
//! The DAG is a linear-succession graph: every node except `start` has
//! exactly one inbound edge, every node has at most one outbound edge,
//! and everything is reachable from the single `start`. Under those
//! rules the graph is one path, which [`linearize`] walks.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;

use nx_domain::state::{CronJobSpec, CronTaskType, CronWorkflowSpec, WorkflowNode, WorkflowNodeType, WORKFLOW_VERSION};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Validate a workflow spec against every structural rule. Returns the
/// first violation as a message.
pub fn validate_workflow(spec: &CronWorkflowSpec) -> Result<(), String> {
    if spec.version != WORKFLOW_VERSION {
        return Err(format!(
            "unsupported workflow version '{}' (expected '{WORKFLOW_VERSION}')",
            spec.version
        ));
    }
    if spec.nodes.is_empty() {
        return Err("workflow has no nodes".into());
    }

    let mut ids = HashSet::new();
    let mut start_count = 0usize;
    for node in &spec.nodes {
        if node.id.is_empty() {
            return Err("node id must not be empty".into());
        }
        if !ids.insert(node.id.as_str()) {
            return Err(format!("duplicate node id '{}'", node.id));
        }
        match node.kind {
            WorkflowNodeType::Start => start_count += 1,
            WorkflowNodeType::TextEvent => {
                if node.text.trim().is_empty() {
                    return Err(format!("text_event '{}' has empty text", node.id));
                }
            }
            WorkflowNodeType::Delay => {} // any delay_seconds >= 0 is fine
            WorkflowNodeType::IfEvent => {
                parse_condition(&node.if_condition)
                    .map_err(|e| format!("if_event '{}': {e}", node.id))?;
            }
        }
    }
    if start_count != 1 {
        return Err(format!("workflow must have exactly one start node, found {start_count}"));
    }

    let start_id = spec
        .nodes
        .iter()
        .find(|n| n.kind == WorkflowNodeType::Start)
        .map(|n| n.id.as_str())
        .unwrap_or_default();

    let mut inbound: HashMap<&str, usize> = HashMap::new();
    let mut outbound: HashMap<&str, usize> = HashMap::new();
    for edge in &spec.edges {
        if !ids.contains(edge.from.as_str()) {
            return Err(format!("edge references unknown node '{}'", edge.from));
        }
        if !ids.contains(edge.to.as_str()) {
            return Err(format!("edge references unknown node '{}'", edge.to));
        }
        if edge.from == edge.to {
            return Err(format!("self-loop on node '{}'", edge.from));
        }
        *inbound.entry(edge.to.as_str()).or_default() += 1;
        *outbound.entry(edge.from.as_str()).or_default() += 1;
    }

    for node in &spec.nodes {
        let inb = inbound.get(node.id.as_str()).copied().unwrap_or(0);
        let outb = outbound.get(node.id.as_str()).copied().unwrap_or(0);
        if node.id == start_id {
            if inb != 0 {
                return Err("start node must have no inbound edge".into());
            }
            if outb < 1 {
                return Err("start node must have at least one outbound edge".into());
            }
        } else if inb != 1 {
            return Err(format!(
                "node '{}' must have exactly one inbound edge, found {inb}",
                node.id
            ));
        }
        if outb > 1 {
            return Err(format!(
                "node '{}' must have at most one outbound edge, found {outb}",
                node.id
            ));
        }
    }

    // Degree rules make the graph a path iff every node is reachable
    // from start; linearize checks reachability (and thus acyclicity).
    let path = linearize(spec)?;
    if path.len() != spec.nodes.len() - 1 {
        return Err("every non-start node must be reachable from start".into());
    }

    Ok(())
}

/// Walk the path from `start`, returning the non-start nodes in
/// execution order.
pub fn linearize(spec: &CronWorkflowSpec) -> Result<Vec<&WorkflowNode>, String> {
    let by_id: HashMap<&str, &WorkflowNode> =
        spec.nodes.iter().map(|n| (n.id.as_str(), n)).collect();
    let next: HashMap<&str, &str> = spec
        .edges
        .iter()
        .map(|e| (e.from.as_str(), e.to.as_str()))
        .collect();

    let start = spec
        .nodes
        .iter()
        .find(|n| n.kind == WorkflowNodeType::Start)
        .ok_or_else(|| "workflow has no start node".to_string())?;

    let mut order = Vec::new();
    let mut seen = HashSet::new();
    let mut cursor = start.id.as_str();
    while let Some(&to) = next.get(cursor) {
        if !seen.insert(to) {
            return Err(format!("cycle detected at node '{to}'"));
        }
        let node = by_id
            .get(to)
            .ok_or_else(|| format!("edge references unknown node '{to}'"))?;
        order.push(*node);
        cursor = to;
    }
    Ok(order)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// if_event conditions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Execution context the condition fields resolve against.
#[derive(Debug, Clone)]
pub struct ConditionCtx {
    pub job_id: String,
    pub job_name: String,
    pub channel: String,
    pub user_id: String,
    pub session_id: String,
    pub task_type: String,
}

impl ConditionCtx {
    pub fn from_job(job: &CronJobSpec) -> Self {
        Self {
            job_id: job.id.clone(),
            job_name: job.name.clone(),
            channel: job.dispatch.channel.clone(),
            user_id: job.dispatch.target.user_id.clone(),
            session_id: job.dispatch.target.session_id.clone(),
            task_type: match job.task_type {
                CronTaskType::Text => "text".into(),
                CronTaskType::Workflow => "workflow".into(),
            },
        }
    }

    fn field(&self, name: &str) -> Option<&str> {
        match name {
            "job_id" => Some(&self.job_id),
            "job_name" => Some(&self.job_name),
            "channel" => Some(&self.channel),
            "user_id" => Some(&self.user_id),
            "session_id" => Some(&self.session_id),
            "task_type" => Some(&self.task_type),
            _ => None,
        }
    }
}

fn condition_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\s*(job_id|job_name|channel|user_id|session_id|task_type)\s*(==|!=)\s*(.+?)\s*$",
        )
        .expect("condition regex is valid")
    })
}

/// Parse `<field> (==|!=) <value>` into (field, negated, value). The
/// value may be double-quoted.
pub fn parse_condition(cond: &str) -> Result<(String, bool, String), String> {
    let caps = condition_re()
        .captures(cond)
        .ok_or_else(|| format!("condition '{cond}' must be '<field> (==|!=) <value>'"))?;
    let field = caps[1].to_string();
    let negated = &caps[2] == "!=";
    let mut value = caps[3].to_string();
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        value = value[1..value.len() - 1].to_string();
    }
    Ok((field, negated, value))
}

/// Evaluate a condition against the execution context.
pub fn eval_condition(cond: &str, ctx: &ConditionCtx) -> Result<bool, String> {
    let (field, negated, value) = parse_condition(cond)?;
    let actual = ctx
        .field(&field)
        .ok_or_else(|| format!("unknown condition field '{field}'"))?;
    Ok((actual == value) != negated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nx_domain::state::WorkflowEdge;

    fn node(id: &str, kind: WorkflowNodeType) -> WorkflowNode {
        WorkflowNode {
            id: id.into(),
            kind,
            text: if kind == WorkflowNodeType::TextEvent {
                "hello".into()
            } else {
                String::new()
            },
            delay_seconds: 0,
            if_condition: if kind == WorkflowNodeType::IfEvent {
                "channel == \"console\"".into()
            } else {
                String::new()
            },
            continue_on_error: false,
        }
    }

    fn edge(from: &str, to: &str) -> WorkflowEdge {
        WorkflowEdge {
            from: from.into(),
            to: to.into(),
        }
    }

    fn linear_spec() -> CronWorkflowSpec {
        CronWorkflowSpec {
            version: WORKFLOW_VERSION.into(),
            nodes: vec![
                node("start", WorkflowNodeType::Start),
                node("a", WorkflowNodeType::TextEvent),
                node("b", WorkflowNodeType::Delay),
                node("c", WorkflowNodeType::IfEvent),
                node("d", WorkflowNodeType::TextEvent),
            ],
            edges: vec![
                edge("start", "a"),
                edge("a", "b"),
                edge("b", "c"),
                edge("c", "d"),
            ],
        }
    }

    #[test]
    fn valid_linear_workflow_passes() {
        assert!(validate_workflow(&linear_spec()).is_ok());
    }

    #[test]
    fn linearize_returns_execution_order() {
        let spec = linear_spec();
        let order: Vec<&str> = linearize(&spec).unwrap().iter().map(|n| n.id.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn rejects_wrong_version() {
        let mut spec = linear_spec();
        spec.version = "v2".into();
        assert!(validate_workflow(&spec).unwrap_err().contains("version"));
    }

    #[test]
    fn rejects_zero_or_two_starts() {
        let mut spec = linear_spec();
        spec.nodes[0].kind = WorkflowNodeType::Delay;
        assert!(validate_workflow(&spec).is_err());

        let mut spec = linear_spec();
        spec.nodes.push(node("start2", WorkflowNodeType::Start));
        assert!(validate_workflow(&spec).is_err());
    }

    #[test]
    fn rejects_empty_text_event() {
        let mut spec = linear_spec();
        spec.nodes[1].text = "  ".into();
        assert!(validate_workflow(&spec).unwrap_err().contains("empty text"));
    }

    #[test]
    fn rejects_bad_condition() {
        let mut spec = linear_spec();
        spec.nodes[3].if_condition = "channel ~= console".into();
        assert!(validate_workflow(&spec).is_err());
    }

    #[test]
    fn rejects_self_loop() {
        let mut spec = linear_spec();
        spec.edges.push(edge("d", "d"));
        assert!(validate_workflow(&spec).unwrap_err().contains("self-loop"));
    }

    #[test]
    fn rejects_second_inbound_edge() {
        let mut spec = linear_spec();
        spec.edges.push(edge("start", "d"));
        assert!(validate_workflow(&spec).is_err());
    }

    #[test]
    fn rejects_second_outbound_edge() {
        let mut spec = linear_spec();
        spec.nodes.push(node("e", WorkflowNodeType::Delay));
        spec.edges.push(edge("a", "e"));
        assert!(validate_workflow(&spec).is_err());
    }

    #[test]
    fn rejects_unreachable_node() {
        let mut spec = linear_spec();
        spec.nodes.push(node("island", WorkflowNodeType::Delay));
        // Give it an inbound edge from another island so the degree
        // rules pass but reachability fails.
        spec.nodes.push(node("island2", WorkflowNodeType::Delay));
        spec.edges.push(edge("island2", "island"));
        assert!(validate_workflow(&spec).is_err());
    }

    #[test]
    fn rejects_inbound_edge_to_start() {
        let mut spec = linear_spec();
        spec.edges.push(edge("d", "start"));
        assert!(validate_workflow(&spec).is_err());
    }

    #[test]
    fn rejects_unknown_edge_target() {
        let mut spec = linear_spec();
        spec.edges.push(edge("d", "ghost"));
        assert!(validate_workflow(&spec).unwrap_err().contains("unknown node"));
    }

    // ── Conditions ───────────────────────────────────────────────────

    fn ctx() -> ConditionCtx {
        ConditionCtx {
            job_id: "j1".into(),
            job_name: "nightly".into(),
            channel: "console".into(),
            user_id: "u".into(),
            session_id: "s".into(),
            task_type: "workflow".into(),
        }
    }

    #[test]
    fn condition_equality() {
        assert!(eval_condition("channel == \"console\"", &ctx()).unwrap());
        assert!(!eval_condition("channel == \"qq\"", &ctx()).unwrap());
    }

    #[test]
    fn condition_inequality() {
        assert!(eval_condition("channel != \"qq\"", &ctx()).unwrap());
        assert!(!eval_condition("channel != \"console\"", &ctx()).unwrap());
    }

    #[test]
    fn condition_unquoted_value() {
        assert!(eval_condition("job_id == j1", &ctx()).unwrap());
        assert!(eval_condition("task_type == workflow", &ctx()).unwrap());
    }

    #[test]
    fn condition_rejects_unknown_field() {
        assert!(eval_condition("job_owner == x", &ctx()).is_err());
    }

    #[test]
    fn condition_rejects_bad_operator() {
        assert!(parse_condition("channel >= console").is_err());
        assert!(parse_condition("channel").is_err());
    }
}
