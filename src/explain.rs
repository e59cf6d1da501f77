// Post-hoc narrative builder.
//
// Consumes an AST plus the trace a completed `eval_tree` call left behind
// and renders a human-readable account of what happened. Never re-runs the
// evaluator: everything here is read-only reconstruction from the trace's
// ordered events and the tree's parent links.

use crate::ast::{Ast, NodeData, NodeId};
use crate::tracer::{TraceEntry, TraceKind, Tracer};
use std::collections::HashSet;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    Why,
    WhyNot,
    Full,
}

pub struct Explainer;

impl Explainer {
    // Renders `trace` against `ast` in the requested `mode`. `focus`
    // narrows the narrative to the decisions/consequences that lead to a
    // particular node; required for `WhyNot`, optional otherwise.
    pub fn generate(ast: &Ast, trace: &Tracer, mode: Mode, focus: Option<NodeId>) -> String {
        let entries: Vec<&TraceEntry> = trace.entries().collect();
        let mut out = String::new();
        let mut visited = HashSet::new();
        let mut section_counts = Vec::new();

        let decision_path = collect_decision_path(&entries);
        out.push_str("== Decision Path ==\n");
        if decision_path.is_empty() {
            out.push_str("(no decisions taken)\n");
        } else {
            for (node, branch) in &decision_path {
                out.push_str(&format!("{} -> {}\n", describe_node(ast, *node), branch_label(*branch)));
            }
        }
        section_counts.push(("Decision Path", decision_path.len()));

        let conditions = collect_deduped(&entries, TraceKind::ConditionEval, &mut visited);
        out.push_str("\n== Key Condition Evaluations ==\n");
        for entry in &conditions {
            out.push_str(&format!("{}\n", entry.message));
        }
        section_counts.push(("Key Condition Evaluations", conditions.len()));

        let mut visited_consequences = HashSet::new();
        let consequences = collect_deduped(&entries, TraceKind::ConsequenceExec, &mut visited_consequences);
        out.push_str("\n== Consequences Executed ==\n");
        for entry in &consequences {
            out.push_str(&format!("{}\n", entry.message));
        }
        section_counts.push(("Consequences Executed", consequences.len()));

        let mut visited_rules = HashSet::new();
        let rules = collect_deduped(&entries, TraceKind::RuleInvoke, &mut visited_rules);
        out.push_str("\n== Rule Activations ==\n");
        for entry in &rules {
            out.push_str(&format!("{}\n", entry.message));
        }
        section_counts.push(("Rule Activations", rules.len()));

        let alternatives = if mode != Mode::Why {
            let alts = alternative_paths(ast, &entries, &decision_path, focus);
            out.push_str("\n== Alternative Paths ==\n");
            if alts.is_empty() {
                out.push_str("(none)\n");
            } else {
                for line in &alts {
                    out.push_str(line);
                    out.push('\n');
                }
            }
            alts.len()
        } else {
            0
        };
        section_counts.push(("Alternative Paths", alternatives));

        let errors: Vec<&&TraceEntry> = entries.iter().filter(|e| e.kind == TraceKind::Error).collect();
        out.push_str("\n== Errors ==\n");
        if errors.is_empty() {
            out.push_str("(none)\n");
        } else {
            for entry in &errors {
                out.push_str(&format!("{}\n", entry.message));
            }
        }
        section_counts.push(("Errors", errors.len()));

        out.push_str("\n== Summary ==\n");
        for (name, count) in &section_counts {
            out.push_str(&format!("{}: {}\n", name, count));
        }

        out
    }

    // Writes the narrative for `focus`/`mode` to a plain-text file.
    pub fn export(ast: &Ast, trace: &Tracer, mode: Mode, focus: Option<NodeId>, path: &std::path::Path) -> std::io::Result<()> {
        let text = Self::generate(ast, trace, mode, focus);
        std::fs::write(path, text)
    }
}

fn branch_label(taken_true: bool) -> &'static str {
    if taken_true {
        "TRUE"
    } else {
        "FALSE"
    }
}

fn describe_node(ast: &Ast, id: NodeId) -> String {
    match &ast.get(id).data {
        NodeData::Decision { .. } => format!("Decision#{}", id.0),
        NodeData::Consequence { action, .. } => format!("Consequence({})", action),
        NodeData::Rule { name, .. } => format!("Rule({})", name),
        NodeData::Identifier { name } => format!("Identifier({})", name),
        _ => format!("Node#{}", id.0),
    }
}

fn collect_decision_path(entries: &[&TraceEntry]) -> Vec<(NodeId, bool)> {
    entries
        .iter()
        .filter(|e| e.kind == TraceKind::DecisionBranch)
        .filter_map(|e| e.node.map(|n| (n, e.message == "TRUE")))
        .collect()
}

fn collect_deduped<'a>(
    entries: &[&'a TraceEntry],
    kind: TraceKind,
    visited: &mut HashSet<NodeId>,
) -> Vec<&'a TraceEntry> {
    let mut out = Vec::new();
    for entry in entries.iter().filter(|e| e.kind == kind) {
        match entry.node {
            Some(node) if !visited.insert(node) => continue,
            _ => {}
        }
        out.push(*entry);
    }
    out
}

// Nearest ancestor `Decision` of `node`, and whether `node` lies under its
// true or false branch.
fn enclosing_decision(ast: &Ast, node: NodeId) -> Option<(NodeId, bool)> {
    let mut current = node;
    loop {
        let parent = ast.get(current).parent?;
        if let NodeData::Decision { true_branch, false_branch, .. } = &ast.get(parent).data {
            if *true_branch == Some(current) {
                return Some((parent, true));
            }
            if *false_branch == Some(current) {
                return Some((parent, false));
            }
        }
        current = parent;
    }
}

// Locates the trace entry recording which branch `decision` actually took.
// The original implementation restarts a linear scan from the end for
// every lookup (O(n^2) over a long trace); we keep the same observable
// result (the last matching `DecisionBranch` entry for that node) via a
// single reverse pass instead of re-scanning per caller (an open
// question: behavior preserved, mechanism simplified).
fn find_decision_entry<'a>(entries: &[&'a TraceEntry], decision: NodeId) -> Option<&'a TraceEntry> {
    entries
        .iter()
        .rev()
        .find(|e| e.kind == TraceKind::DecisionBranch && e.node == Some(decision))
        .copied()
}

fn alternative_paths(
    ast: &Ast,
    entries: &[&TraceEntry],
    decision_path: &[(NodeId, bool)],
    focus: Option<NodeId>,
) -> Vec<String> {
    let mut lines = Vec::new();

    if let Some(focus_node) = focus {
        if let Some((decision, required_true)) = enclosing_decision(ast, focus_node) {
            if let Some(entry) = find_decision_entry(entries, decision) {
                let taken_true = entry.message == "TRUE";
                if taken_true != required_true {
                    lines.push(format!(
                        "took {} branch instead of required {} branch",
                        branch_label(taken_true),
                        branch_label(required_true)
                    ));
                    if let NodeData::Consequence { action, .. } = &ast.get(focus_node).data {
                        lines.push(format!("had the decision gone the other way, {} would have executed", action));
                    }
                }
            }
        }
    }

    // Every decision on the realized path whose condition was false: what
    // would have been reached had it gone the other way, when that branch
    // is simply a consequence.
    for (decision, taken_true) in decision_path {
        if *taken_true {
            continue;
        }
        if let NodeData::Decision { true_branch: Some(t), .. } = &ast.get(*decision).data {
            if let NodeData::Consequence { action, .. } = &ast.get(*t).data {
                lines.push(format!("{} would have reached consequence {}", describe_node(ast, *decision), action));
            }
        }
    }

    lines
}
