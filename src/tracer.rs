// Execution tracer.
//
// An append-only, depth-annotated log of every observable evaluator step.
// Bounded: once `max_entries` is reached, the oldest entry is evicted per
// append (FIFO), but the always-incrementing summary counters in
// `TraceStats` are never evicted. A 15-append run against a 10-entry cap
// still reports `nodes_entered == 15` even though only 10 entries survive.

use crate::ast::NodeId;
use crate::clock::Clock;
use crate::value::Value;
use chrono::Local;
use std::collections::{HashMap, VecDeque};
use std::io::Write;

pub const DEFAULT_MAX_ENTRIES: usize = 10_000;
pub const GOLF_MAX_ENTRIES: usize = 1_000;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TraceKind {
    EnterNode,
    ExitNode,
    ConditionEval,
    DecisionBranch,
    ConsequenceExec,
    RuleInvoke,
    VariableChange,
    Error,
    BeginSection,
    EndSection,
    CustomMessage,
}

impl TraceKind {
    // The uppercase snake-case name used by the JSON/CSV export contract
    // downstream tools rely on.
    pub fn name(&self) -> &'static str {
        match self {
            TraceKind::EnterNode => "ENTER_NODE",
            TraceKind::ExitNode => "EXIT_NODE",
            TraceKind::ConditionEval => "CONDITION_EVAL",
            TraceKind::DecisionBranch => "DECISION_BRANCH",
            TraceKind::ConsequenceExec => "CONSEQUENCE_EXEC",
            TraceKind::RuleInvoke => "RULE_INVOKE",
            TraceKind::VariableChange => "VARIABLE_CHANGE",
            TraceKind::Error => "ERROR",
            TraceKind::BeginSection => "BEGIN_SECTION",
            TraceKind::EndSection => "END_SECTION",
            TraceKind::CustomMessage => "CUSTOM_MESSAGE",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TraceEntry {
    pub kind: TraceKind,
    pub depth: u32,
    pub timestamp: String,
    pub elapsed_ns: u64,
    pub node: Option<NodeId>,
    pub message: String,
    pub value: Option<Value>,
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct TraceStats {
    pub nodes_entered: u64,
    pub nodes_exited: u64,
    pub conditions_evaluated: u64,
    pub decisions_made: u64,
    pub consequences_succeeded: u64,
    pub consequences_failed: u64,
    pub rules_executed: u64,
    pub variables_changed: u64,
    pub errors_occurred: u64,
}

pub struct Tracer {
    enabled: bool,
    detailed: bool,
    timestamps: bool,
    max_entries: usize,
    golf_mode: bool,
    sink: Option<Box<dyn Write>>,
    entries: VecDeque<TraceEntry>,
    cursor: usize,
    depth: u32,
    max_depth_reached: u32,
    node_counts: HashMap<NodeId, u64>,
    call_stack: Vec<NodeId>,
    clock: Clock,
    stats: TraceStats,
}

impl Tracer {
    pub fn create() -> Tracer {
        Tracer {
            enabled: true,
            detailed: true,
            timestamps: true,
            max_entries: DEFAULT_MAX_ENTRIES,
            golf_mode: false,
            sink: None,
            entries: VecDeque::new(),
            cursor: 0,
            depth: 0,
            max_depth_reached: 0,
            node_counts: HashMap::new(),
            call_stack: Vec::new(),
            clock: Clock::new(),
            stats: TraceStats::default(),
        }
    }

    pub fn destroy(self) {}

    pub fn clear(&mut self) {
        self.entries.clear();
        self.cursor = 0;
        self.depth = 0;
        self.max_depth_reached = 0;
        self.node_counts.clear();
        self.call_stack.clear();
        self.clock = Clock::new();
        self.stats = TraceStats::default();
    }

    // -- configuration ------------------------------------------------------

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn set_detailed(&mut self, detailed: bool) {
        self.detailed = detailed;
    }

    pub fn set_timestamps(&mut self, timestamps: bool) {
        self.timestamps = timestamps;
    }

    pub fn set_max_entries(&mut self, max_entries: usize) {
        self.max_entries = max_entries;
        self.enforce_cap();
    }

    pub fn set_sink(&mut self, sink: Option<Box<dyn Write>>) {
        self.sink = sink;
    }

    // Golf mode disables per-event detail and timestamps and shrinks the
    // entry cap, coordinated with the evaluator's own golf short-circuit:
    // one configuration flag with several coordinated effects, not
    // independent switches.
    pub fn set_golf_mode(&mut self, golf_mode: bool) {
        self.golf_mode = golf_mode;
        if golf_mode {
            self.detailed = false;
            self.timestamps = false;
            self.max_entries = GOLF_MAX_ENTRIES;
        } else {
            self.max_entries = DEFAULT_MAX_ENTRIES;
        }
        self.enforce_cap();
    }

    // -- sections -------------------------------------------------------

    pub fn begin(&mut self, section: &str) {
        self.append(TraceKind::BeginSection, None, format!("BEGIN {}", section), None);
        self.depth += 1;
        if self.depth > self.max_depth_reached {
            self.max_depth_reached = self.depth;
        }
    }

    pub fn end(&mut self) {
        self.depth = self.depth.saturating_sub(1);
        self.append(TraceKind::EndSection, None, "END".to_string(), None);
    }

    // -- event appenders --------------------------------------------------

    pub fn enter_node(&mut self, node: NodeId, label: &str) {
        self.call_stack.push(node);
        *self.node_counts.entry(node).or_insert(0) += 1;
        self.stats.nodes_entered += 1;
        self.depth += 1;
        if self.depth > self.max_depth_reached {
            self.max_depth_reached = self.depth;
        }
        self.append(TraceKind::EnterNode, Some(node), format!("enter {}", label), None);
    }

    pub fn exit_node(&mut self, node: NodeId, label: &str) {
        self.call_stack.pop();
        self.stats.nodes_exited += 1;
        self.append(TraceKind::ExitNode, Some(node), format!("exit {}", label), None);
        self.depth = self.depth.saturating_sub(1);
    }

    pub fn condition(&mut self, node: NodeId, value: &Value) {
        self.stats.conditions_evaluated += 1;
        self.append(
            TraceKind::ConditionEval,
            Some(node),
            format!("condition evaluated to {}", value),
            Some(value.clone()),
        );
    }

    pub fn decision(&mut self, node: NodeId, branch_true: bool) {
        self.stats.decisions_made += 1;
        let label = if branch_true { "TRUE" } else { "FALSE" };
        self.append(TraceKind::DecisionBranch, Some(node), label.to_string(), None);
    }

    pub fn consequence(&mut self, node: NodeId, action: &str, success: bool) {
        if success {
            self.stats.consequences_succeeded += 1;
        } else {
            self.stats.consequences_failed += 1;
        }
        self.append(
            TraceKind::ConsequenceExec,
            Some(node),
            format!("{} ({})", action, if success { "success" } else { "failure" }),
            None,
        );
    }

    pub fn rule_execution(&mut self, node: NodeId, name: &str) {
        self.stats.rules_executed += 1;
        self.append(TraceKind::RuleInvoke, Some(node), format!("rule {}", name), None);
    }

    pub fn variable_change(&mut self, name: &str, value: &Value) {
        self.stats.variables_changed += 1;
        self.append(
            TraceKind::VariableChange,
            None,
            format!("{} = {}", name, value),
            Some(value.clone()),
        );
    }

    pub fn error(&mut self, message: &str) {
        self.stats.errors_occurred += 1;
        self.append(TraceKind::Error, None, message.to_string(), None);
    }

    pub fn message(&mut self, text: impl Into<String>) {
        self.append(TraceKind::CustomMessage, None, text.into(), None);
    }

    fn append(&mut self, kind: TraceKind, node: Option<NodeId>, message: String, value: Option<Value>) {
        if !self.enabled {
            return;
        }
        let timestamp = if self.timestamps {
            Local::now().format("%H:%M:%S%.3f").to_string()
        } else {
            String::new()
        };
        let entry = TraceEntry {
            kind,
            depth: self.depth,
            timestamp,
            elapsed_ns: self.clock.elapsed_ns(),
            node,
            message: if self.detailed { message } else { String::new() },
            value,
        };
        if let Some(sink) = self.sink.as_mut() {
            let _ = writeln!(sink, "{:?}", entry);
        }
        self.entries.push_back(entry);
        self.enforce_cap();
    }

    fn enforce_cap(&mut self) {
        while self.entries.len() > self.max_entries {
            self.entries.pop_front();
        }
    }

    // -- iteration cursor -------------------------------------------------

    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    pub fn has_more(&self) -> bool {
        self.cursor < self.entries.len()
    }

    pub fn next(&mut self) -> Option<&TraceEntry> {
        let entry = self.entries.get(self.cursor);
        if entry.is_some() {
            self.cursor += 1;
        }
        entry
    }

    // -- query surface ------------------------------------------------------

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth_reached
    }

    pub fn node_execution_count(&self, node: NodeId) -> u64 {
        self.node_counts.get(&node).copied().unwrap_or(0)
    }

    pub fn stats(&self) -> TraceStats {
        self.stats
    }

    pub fn entries(&self) -> impl Iterator<Item = &TraceEntry> {
        self.entries.iter()
    }

    // e.g. `"TRUE → FALSE → TRUE"`, built from the surviving
    // `DecisionBranch` entries in order.
    pub fn decision_path(&self) -> String {
        self.entries
            .iter()
            .filter(|e| e.kind == TraceKind::DecisionBranch)
            .map(|e| e.message.as_str())
            .collect::<Vec<_>>()
            .join(" → ")
    }

    // Currently-entered nodes, bottom (outermost) to top (innermost).
    pub fn call_stack(&self) -> &[NodeId] {
        &self.call_stack
    }

    pub fn total_elapsed_ns(&self) -> u64 {
        self.entries.back().map(|e| e.elapsed_ns).unwrap_or(0)
    }

    pub fn average_elapsed_ns(&self) -> f64 {
        if self.entries.is_empty() {
            0.0
        } else {
            self.total_elapsed_ns() as f64 / self.entries.len() as f64
        }
    }

    // Rough footprint estimate: per-entry overhead plus message bytes.
    pub fn estimated_memory(&self) -> usize {
        const ENTRY_OVERHEAD: usize = std::mem::size_of::<TraceEntry>();
        self.entries.iter().map(|e| ENTRY_OVERHEAD + e.message.len()).sum()
    }

    // -- export ---------------------------------------------------------

    pub fn to_json(&self) -> serde_json::Value {
        let entries: Vec<serde_json::Value> = self
            .entries
            .iter()
            .map(|e| {
                let mut obj = serde_json::json!({
                    "type": e.kind.name(),
                    "depth": e.depth,
                    "timestamp": e.timestamp,
                    "elapsed_ns": e.elapsed_ns,
                    "message": e.message,
                });
                if let Some(v) = &e.value {
                    obj["value"] = serde_json::Value::String(v.to_string());
                }
                obj
            })
            .collect();

        serde_json::json!({
            "trace": {
                "entry_count": self.entries.len(),
                "max_depth": self.max_depth_reached,
                "entries": entries,
                "stats": {
                    "nodes_entered": self.stats.nodes_entered,
                    "nodes_exited": self.stats.nodes_exited,
                    "conditions_evaluated": self.stats.conditions_evaluated,
                    "decisions_made": self.stats.decisions_made,
                    "consequences_succeeded": self.stats.consequences_succeeded,
                    "consequences_failed": self.stats.consequences_failed,
                    "rules_executed": self.stats.rules_executed,
                    "variables_changed": self.stats.variables_changed,
                    "errors_occurred": self.stats.errors_occurred,
                }
            }
        })
    }

    // Header `Type,Depth,Timestamp,ElapsedNS,Message,Value`, one row per
    // entry, quoting any field containing an embedded comma.
    pub fn to_csv(&self) -> String {
        let mut out = String::from("Type,Depth,Timestamp,ElapsedNS,Message,Value\n");
        for e in &self.entries {
            let value_str = e.value.as_ref().map(|v| v.to_string()).unwrap_or_default();
            let fields = [
                e.kind.name().to_string(),
                e.depth.to_string(),
                e.timestamp.clone(),
                e.elapsed_ns.to_string(),
                e.message.clone(),
                value_str,
            ];
            let row: Vec<String> = fields.iter().map(|f| csv_quote(f)).collect();
            out.push_str(&row.join(","));
            out.push('\n');
        }
        out
    }

    // -- filtering --------------------------------------------------------

    pub fn filter_by_type(&self, kind: TraceKind) -> Tracer {
        self.filtered(|e| e.kind == kind)
    }

    pub fn filter_by_depth(&self, min: u32, max: u32) -> Tracer {
        self.filtered(|e| e.depth >= min && e.depth <= max)
    }

    fn filtered(&self, predicate: impl Fn(&TraceEntry) -> bool) -> Tracer {
        let mut out = Tracer::create();
        out.max_entries = self.max_entries;
        out.detailed = self.detailed;
        out.timestamps = self.timestamps;
        out.golf_mode = self.golf_mode;
        for e in self.entries.iter().filter(|e| predicate(e)) {
            out.entries.push_back(e.clone());
            out.max_depth_reached = out.max_depth_reached.max(e.depth);
        }
        out
    }

    // Structural equality over the ordered, surviving events.
    pub fn compare(&self, other: &Tracer) -> bool {
        self.entries == other.entries
    }
}

impl Default for Tracer {
    fn default() -> Tracer {
        Tracer::create()
    }
}

fn csv_quote(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::NodeId;

    #[test]
    fn overflow_evicts_oldest_but_keeps_stats() {
        let mut tracer = Tracer::create();
        tracer.set_max_entries(10);
        for i in 0..15 {
            tracer.message(format!("msg {}", i));
        }
        assert_eq!(tracer.entry_count(), 10);
        tracer.rewind();
        assert_eq!(tracer.next().unwrap().message, "msg 5");
        assert_eq!(tracer.stats().nodes_entered, 0); // messages aren't node events
    }

    #[test]
    fn enter_exit_pairs_balance() {
        let mut tracer = Tracer::create();
        let n = NodeId(0);
        tracer.enter_node(n, "decision");
        tracer.exit_node(n, "decision");
        assert_eq!(tracer.stats().nodes_entered, tracer.stats().nodes_exited);
        assert_eq!(tracer.node_execution_count(n), 1);
    }

    #[test]
    fn decision_path_joins_branch_labels() {
        let mut tracer = Tracer::create();
        let n = NodeId(0);
        tracer.decision(n, true);
        tracer.decision(n, false);
        tracer.decision(n, true);
        assert_eq!(tracer.decision_path(), "TRUE → FALSE → TRUE");
    }

    #[test]
    fn json_export_matches_schema_shape() {
        let mut tracer = Tracer::create();
        tracer.message("hello");
        let json = tracer.to_json();
        assert_eq!(json["trace"]["entry_count"], 1);
        assert_eq!(json["trace"]["entries"][0]["type"], "CUSTOM_MESSAGE");
        assert_eq!(json["trace"]["entries"][0]["message"], "hello");
    }

    #[test]
    fn csv_export_quotes_embedded_commas() {
        let mut tracer = Tracer::create();
        tracer.message("a, b");
        let csv = tracer.to_csv();
        assert!(csv.contains("\"a, b\""));
    }

    #[test]
    fn filter_by_type_is_independent_trace() {
        let mut tracer = Tracer::create();
        tracer.message("one");
        tracer.error("bad thing");
        let errors_only = tracer.filter_by_type(TraceKind::Error);
        assert_eq!(errors_only.entry_count(), 1);
        assert_eq!(tracer.entry_count(), 2);
    }

    #[test]
    fn golf_mode_shrinks_cap_and_disables_detail() {
        let mut tracer = Tracer::create();
        tracer.set_golf_mode(true);
        tracer.message("should be stripped of detail");
        let entry = tracer.entries().next().unwrap();
        assert_eq!(entry.message, "");
        assert_eq!(entry.timestamp, "");
    }
}
