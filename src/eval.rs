// Recursive tree-walking evaluator.
//
// `eval_tree` is the single public entry point. Everything else here is the
// per-variant dispatch it drives: the evaluation order and short-circuit
// rules are what you'd expect (And/Or skip the right operand once the left
// side decides the result), with one genuinely surprising exception kept
// intentionally: a consequence's textual message always wins over its
// boolean success flag when lifting a handler reply into a `Value`, even
// when success was true. We keep that quirk rather than "fixing" it, since
// downstream narrative generation depends on recovering the message text
// from the returned value.

use crate::ast::{Ast, ChainKind, CompareOperator, ConsequenceKind, LogicOperator, NodeData, NodeId};
use crate::env::RuntimeEnv;
use crate::error::ReasonsError;
use crate::tracer::Tracer;
use crate::value::Value;

// Extension point for a caller-supplied cache keyed by node identity (the
// C5 "memoization hook" named alongside the recursion guard and short-
// circuiting). The evaluator is correct with no memoizer attached at all;
// a caller only wires one in for nodes it knows are safe to cache given its
// own variable-binding discipline (the evaluator has no way to tell a pure
// subtree from one that reads mutable state, so it never decides this on
// its own).
pub trait Memoizer {
    fn lookup(&self, node: NodeId) -> Option<Value>;
    fn remember(&mut self, node: NodeId, value: Value);
}

// Bundles the two pieces of mutable state a walk threads through: the
// environment (variables, functions, handlers, config, stats, error slot)
// and the tracer. The AST itself is borrowed per-call so callers can
// evaluate the same tree more than once without re-threading ownership.
pub struct EvalContext<'a> {
    pub env: &'a mut RuntimeEnv,
    pub tracer: &'a mut Tracer,
    depth: u32,
    rule_stack: Vec<NodeId>,
    last_explanation: Option<String>,
    memo: Option<Box<dyn Memoizer + 'a>>,
}

impl<'a> EvalContext<'a> {
    pub fn new(env: &'a mut RuntimeEnv, tracer: &'a mut Tracer) -> EvalContext<'a> {
        EvalContext { env, tracer, depth: 0, rule_stack: Vec::new(), last_explanation: None, memo: None }
    }

    // Same as `new`, but with a memoizer attached from the start. Disabled
    // (`None`) is the default, so every existing caller of `new` keeps its
    // present behavior unchanged.
    pub fn with_memoizer(
        env: &'a mut RuntimeEnv,
        tracer: &'a mut Tracer,
        memo: Box<dyn Memoizer + 'a>,
    ) -> EvalContext<'a> {
        EvalContext { env, tracer, depth: 0, rule_stack: Vec::new(), last_explanation: None, memo: Some(memo) }
    }

    // Populated only when `explanations_enabled` was set at the time
    // `eval_tree` last ran.
    pub fn last_explanation(&self) -> Option<&str> {
        self.last_explanation.as_deref()
    }
}

// Evaluates `root` in `ast` against `ctx`. Resets the recursion depth
// counter, the rule-reentrancy stack and the trace before walking, wraps
// the walk in a single `Main Evaluation` trace section, and, when the
// environment has explanations enabled, renders a full-mode narrative into
// `ctx.last_explanation` afterward.
pub fn eval_tree(ctx: &mut EvalContext, ast: &mut Ast, root: NodeId) -> Value {
    let _span = tracing::debug_span!("eval_tree", node_count = ast.count_nodes(root)).entered();

    ctx.depth = 0;
    ctx.rule_stack.clear();
    ctx.tracer.clear();
    ctx.last_explanation = None;
    ctx.env.record_recursion_depth(0);
    ctx.env.take_pending_variable_changes(); // discard pre-population writes made before this call

    ctx.tracer.begin("Main Evaluation");
    let result = eval_node(ctx, ast, root);
    ctx.tracer.end();

    ctx.depth = 0;
    ctx.env.record_recursion_depth(0);

    if ctx.env.config().explanations_enabled {
        let text = crate::explain::Explainer::generate(ast, ctx.tracer, crate::explain::Mode::Full, None);
        ctx.last_explanation = Some(text);
    }

    result
}

fn node_label(ast: &Ast, id: NodeId) -> String {
    match &ast.get(id).data {
        NodeData::Decision { .. } => "Decision".to_string(),
        NodeData::Consequence { action, .. } => format!("Consequence({})", action),
        NodeData::Rule { name, .. } => format!("Rule({})", name),
        NodeData::LogicOp { op, .. } => format!("LogicOp({:?})", op),
        NodeData::Comparison { op, .. } => format!("Comparison({:?})", op),
        NodeData::Identifier { name } => format!("Identifier({})", name),
        NodeData::Literal { value } => format!("Literal({})", value),
        NodeData::Chain { kind, .. } => format!("Chain({:?})", kind),
        NodeData::Program { .. } => "Program".to_string(),
    }
}

fn eval_node(ctx: &mut EvalContext, ast: &mut Ast, id: NodeId) -> Value {
    let cap = ctx.env.config().max_recursion_depth;
    if ctx.depth >= cap {
        ctx.env.set_error(ReasonsError::RecursionExceeded(cap));
        ctx.tracer.error("maximum recursion depth exceeded");
        return Value::Error;
    }

    ctx.depth += 1;
    ctx.env.record_recursion_depth(ctx.depth);
    let label = node_label(ast, id);
    ctx.tracer.enter_node(id, &label);

    let data = ast.get(id).data.clone();
    // Decision, Consequence and Rule carry side effects (branch tracing,
    // handler dispatch, execution counters) that a cached result would
    // silently skip, so only the side-effect-free variants ever consult or
    // populate the memoizer.
    let memoizable = matches!(
        data,
        NodeData::Comparison { .. } | NodeData::LogicOp { .. } | NodeData::Chain { .. } | NodeData::Literal { .. }
    );
    let cached = if memoizable { ctx.memo.as_ref().and_then(|m| m.lookup(id)) } else { None };

    let result = match cached {
        Some(value) => value,
        None => {
            let value = match data {
                NodeData::Decision { condition, true_branch, false_branch, .. } => {
                    eval_decision(ctx, ast, id, condition, true_branch, false_branch)
                }
                NodeData::Consequence { kind, .. } => eval_consequence(ctx, ast, id, kind),
                NodeData::Rule { .. } => eval_rule(ctx, ast, id),
                NodeData::LogicOp { op, left, right } => eval_logic_op(ctx, ast, op, left, right),
                NodeData::Comparison { op, left, right } => eval_comparison(ctx, ast, op, left, right),
                NodeData::Identifier { name } => ctx.env.get_variable(&name),
                NodeData::Literal { value } => value,
                NodeData::Chain { first, second, kind } => eval_chain(ctx, ast, first, second, kind),
                NodeData::Program { children } => eval_program(ctx, ast, children),
            };
            if memoizable {
                if let Some(memo) = ctx.memo.as_mut() {
                    memo.remember(id, value.clone());
                }
            }
            value
        }
    };

    ctx.tracer.exit_node(id, &label);
    ctx.depth -= 1;
    ctx.env.record_recursion_depth(ctx.depth);
    result
}

fn eval_decision(
    ctx: &mut EvalContext,
    ast: &mut Ast,
    id: NodeId,
    condition: NodeId,
    true_branch: Option<NodeId>,
    false_branch: Option<NodeId>,
) -> Value {
    let cond_value = eval_node(ctx, ast, condition);
    ctx.tracer.condition(condition, &cond_value);
    let truthy = cond_value.truthy();
    ctx.tracer.decision(id, truthy);

    if truthy {
        match true_branch {
            Some(t) => eval_node(ctx, ast, t),
            None => Value::Bool(true),
        }
    } else {
        match false_branch {
            Some(f) => eval_node(ctx, ast, f),
            None => Value::Bool(false),
        }
    }
}

fn eval_consequence(ctx: &mut EvalContext, ast: &mut Ast, id: NodeId, kind: ConsequenceKind) -> Value {
    let action = match &ast.get(id).data {
        NodeData::Consequence { action, .. } => action.clone(),
        _ => unreachable!(),
    };

    let reply = ctx.env.execute_consequence(ast, id, kind);
    ctx.tracer.consequence(id, &action, reply.success);
    for (name, value) in ctx.env.take_pending_variable_changes() {
        ctx.tracer.variable_change(&name, &value);
    }

    if let NodeData::Consequence { executed, .. } = &mut ast.get_mut(id).data {
        *executed = true;
    }

    match (&reply.message, &reply.value) {
        (Some(message), _) => Value::string(message.clone()),
        (None, Some(value)) => value.clone(),
        (None, None) => Value::Bool(reply.success),
    }
}

fn eval_rule(ctx: &mut EvalContext, ast: &mut Ast, id: NodeId) -> Value {
    let (name, body, active) = match &ast.get(id).data {
        NodeData::Rule { name, body, active, .. } => (name.clone(), *body, *active),
        _ => unreachable!(),
    };

    if !active {
        return Value::Bool(false);
    }

    if ctx.rule_stack.contains(&id) {
        ctx.env.set_error(ReasonsError::RuleSelfRecursion(name.clone()));
        ctx.tracer.error(&format!("rule {} is already active on the call stack", name));
        return Value::Error;
    }

    ctx.rule_stack.push(id);
    let result = eval_node(ctx, ast, body);
    ctx.rule_stack.pop();

    if let NodeData::Rule { execution_count, .. } = &mut ast.get_mut(id).data {
        *execution_count += 1;
    }
    ctx.tracer.rule_execution(id, &name);

    result
}

fn eval_logic_op(
    ctx: &mut EvalContext,
    ast: &mut Ast,
    op: LogicOperator,
    left: NodeId,
    right: Option<NodeId>,
) -> Value {
    let left_value = eval_node(ctx, ast, left);

    match op {
        LogicOperator::Not => Value::Bool(!left_value.truthy()),
        LogicOperator::And => {
            if !left_value.truthy() {
                return Value::Bool(false);
            }
            match right {
                Some(r) => Value::Bool(eval_node(ctx, ast, r).truthy()),
                None => Value::Bool(true),
            }
        }
        LogicOperator::Or => {
            if left_value.truthy() {
                return Value::Bool(true);
            }
            match right {
                Some(r) => Value::Bool(eval_node(ctx, ast, r).truthy()),
                None => Value::Bool(false),
            }
        }
    }
}

fn eval_comparison(
    ctx: &mut EvalContext,
    ast: &mut Ast,
    op: CompareOperator,
    left: NodeId,
    right: NodeId,
) -> Value {
    let left_value = eval_node(ctx, ast, left);
    let right_value = eval_node(ctx, ast, right);

    let result = match (&left_value, &right_value) {
        (Value::Number(a), Value::Number(b)) => Some(compare_numbers(*a, *b, op)),
        (Value::String(a), Value::String(b)) => Some(compare_strings(a, b, op)),
        (Value::Bool(a), Value::Bool(b)) => match op {
            CompareOperator::Eq => Some(*a == *b),
            CompareOperator::Ne => Some(*a != *b),
            _ => None,
        },
        _ => None,
    };

    match result {
        Some(b) => Value::Bool(b),
        None => {
            let (lt, rt) = (left_value.type_name(), right_value.type_name());
            ctx.env.set_error(ReasonsError::TypeMismatch(lt, rt));
            ctx.tracer.error(&format!("type mismatch comparing {} and {}", lt, rt));
            Value::Error
        }
    }
}

fn compare_numbers(a: f64, b: f64, op: CompareOperator) -> bool {
    match op {
        CompareOperator::Eq => (a - b).abs() <= crate::value::NUMBER_EPSILON,
        CompareOperator::Ne => (a - b).abs() > crate::value::NUMBER_EPSILON,
        CompareOperator::Lt => a < b,
        CompareOperator::Le => a <= b,
        CompareOperator::Gt => a > b,
        CompareOperator::Ge => a >= b,
    }
}

fn compare_strings(a: &str, b: &str, op: CompareOperator) -> bool {
    use std::cmp::Ordering;
    let ord = a.cmp(b);
    match op {
        CompareOperator::Eq => ord == Ordering::Equal,
        CompareOperator::Ne => ord != Ordering::Equal,
        CompareOperator::Lt => ord == Ordering::Less,
        CompareOperator::Le => ord != Ordering::Greater,
        CompareOperator::Gt => ord == Ordering::Greater,
        CompareOperator::Ge => ord != Ordering::Less,
    }
}

fn eval_chain(ctx: &mut EvalContext, ast: &mut Ast, first: NodeId, second: NodeId, kind: ChainKind) -> Value {
    let first_value = eval_node(ctx, ast, first);

    if ctx.env.config().golf_mode && !first_value.truthy() {
        return Value::Bool(false);
    }

    let second_value = eval_node(ctx, ast, second);
    match kind {
        ChainKind::Sequential => Value::Bool(first_value.truthy() && second_value.truthy()),
        ChainKind::Parallel => Value::Bool(first_value.truthy() || second_value.truthy()),
    }
}

fn eval_program(ctx: &mut EvalContext, ast: &mut Ast, children: Vec<NodeId>) -> Value {
    let mut result = Value::Null;
    for child in children {
        result = eval_node(ctx, ast, child);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{ConsequenceKind, Position};
    use crate::env::HandlerReply;
    use crate::tracer::TraceKind;
    use std::rc::Rc;

    fn pos() -> Position {
        Position { line: 1, column: 1 }
    }

    // Scenario 1: a bare literal evaluates to itself and traces exactly
    // Begin, Enter/Exit, End.
    #[test]
    fn literal_scenario_traces_four_entries() {
        let mut ast = Ast::new();
        let lit = ast.create_literal(Value::Bool(true), pos());
        let mut env = RuntimeEnv::new();
        let mut tracer = Tracer::create();
        let mut ctx = EvalContext::new(&mut env, &mut tracer);

        let result = eval_tree(&mut ctx, &mut ast, lit);
        assert_eq!(result, Value::Bool(true));
        assert_eq!(tracer.entry_count(), 4);
    }

    // Scenario 2: And(false, missing) short-circuits and never touches the
    // right operand, so no undefined-variable error is raised.
    #[test]
    fn and_short_circuits_on_false_left() {
        let mut ast = Ast::new();
        let f = ast.create_literal(Value::Bool(false), pos());
        let missing = ast.create_identifier("missing", pos()).unwrap();
        let and = ast.create_logic_op(LogicOperator::And, f, Some(missing), pos()).unwrap();

        let mut env = RuntimeEnv::new();
        let mut tracer = Tracer::create();
        let mut ctx = EvalContext::new(&mut env, &mut tracer);

        let result = eval_tree(&mut ctx, &mut ast, and);
        assert_eq!(result, Value::Bool(false));
        assert!(!ctx.env.had_error());
    }

    // Scenario 3: x > 5 with x = 7 takes the TRUE branch and invokes the
    // Any handler for the "win" consequence.
    #[test]
    fn decision_dispatch_takes_true_branch() {
        let mut ast = Ast::new();
        let x = ast.create_identifier("x", pos()).unwrap();
        let five = ast.create_literal(Value::Number(5.0), pos());
        let cmp = ast.create_comparison(CompareOperator::Gt, x, five, pos()).unwrap();
        let win = ast.create_consequence("win", ConsequenceKind::Any, None, pos()).unwrap();
        let lose = ast.create_consequence("lose", ConsequenceKind::Any, None, pos()).unwrap();
        let decision = ast.create_decision(cmp, Some(win), Some(lose), 0.0, pos()).unwrap();

        let mut env = RuntimeEnv::new();
        env.set_variable("x", Value::Number(7.0));
        env.register_consequence_handler(
            ConsequenceKind::Any,
            Rc::new(|_, _, _| HandlerReply { handled: true, success: true, value: None, message: None }),
            "catch-all",
        );
        let mut tracer = Tracer::create();
        let mut ctx = EvalContext::new(&mut env, &mut tracer);

        let result = eval_tree(&mut ctx, &mut ast, decision);
        assert_eq!(result, Value::Bool(true));
        assert_eq!(tracer.decision_path(), "TRUE");
        assert_eq!(tracer.stats().consequences_succeeded, 1);
        assert_eq!(tracer.node_execution_count(win), 1);
        assert_eq!(tracer.node_execution_count(lose), 0);
    }

    // Scenario 4: a rule whose body re-enters itself yields a recursion
    // error rather than overflowing the host stack.
    #[test]
    fn rule_self_recursion_is_a_recursion_error() {
        let mut ast = Ast::new();
        let placeholder = ast.create_literal(Value::Null, pos());
        let rule = ast.create_rule("R", placeholder, true, pos()).unwrap();
        // Rewire the rule's body to point at itself, simulating a rule that
        // calls itself directly rather than through a named function.
        if let crate::ast::NodeData::Rule { body, .. } = &mut ast.get_mut(rule).data {
            *body = rule;
        }

        let mut env = RuntimeEnv::new();
        let mut tracer = Tracer::create();
        let mut ctx = EvalContext::new(&mut env, &mut tracer);

        let result = eval_tree(&mut ctx, &mut ast, rule);
        assert_eq!(result, Value::Error);
        assert_eq!(ctx.env.last_error().unwrap().code, crate::error::ErrorCode::Recursion);
        assert!(tracer.entries().any(|e| e.kind == TraceKind::Error));
    }

    #[test]
    fn recursion_depth_counter_returns_to_zero_after_eval() {
        let mut ast = Ast::new();
        let lit = ast.create_literal(Value::Number(1.0), pos());
        let decision = ast.create_decision(lit, None, None, 0.0, pos()).unwrap();
        let mut env = RuntimeEnv::new();
        let mut tracer = Tracer::create();
        let mut ctx = EvalContext::new(&mut env, &mut tracer);

        eval_tree(&mut ctx, &mut ast, decision);
        assert_eq!(ctx.env.get_stats().current_recursion_depth, 0);
    }

    #[test_log::test]
    fn nodes_entered_matches_nodes_exited() {
        let mut ast = Ast::new();
        let a = ast.create_literal(Value::Bool(true), pos());
        let b = ast.create_literal(Value::Bool(false), pos());
        let chain = ast.create_chain(a, b, ChainKind::Parallel, pos()).unwrap();
        let mut env = RuntimeEnv::new();
        let mut tracer = Tracer::create();
        let mut ctx = EvalContext::new(&mut env, &mut tracer);

        eval_tree(&mut ctx, &mut ast, chain);
        assert_eq!(tracer.stats().nodes_entered, tracer.stats().nodes_exited);
    }

    #[test]
    fn comparison_across_incompatible_types_is_type_error() {
        let mut ast = Ast::new();
        let n = ast.create_literal(Value::Number(1.0), pos());
        let s = ast.create_literal(Value::string("x"), pos());
        let cmp = ast.create_comparison(CompareOperator::Eq, n, s, pos()).unwrap();
        let mut env = RuntimeEnv::new();
        let mut tracer = Tracer::create();
        let mut ctx = EvalContext::new(&mut env, &mut tracer);

        let result = eval_tree(&mut ctx, &mut ast, cmp);
        assert_eq!(result, Value::Error);
        assert_eq!(ctx.env.last_error().unwrap().code, crate::error::ErrorCode::Type);
    }

    #[test]
    fn consequence_handler_writes_surface_as_variable_change_trace_events() {
        let mut ast = Ast::new();
        let action = ast.create_consequence("award", ConsequenceKind::Update, None, pos()).unwrap();
        let mut env = RuntimeEnv::new();
        env.register_consequence_handler(
            ConsequenceKind::Update,
            Rc::new(|env, _, _| {
                env.set_variable("score", Value::Number(10.0));
                HandlerReply { handled: true, success: true, value: None, message: None }
            }),
            "scorer",
        );
        let mut tracer = Tracer::create();
        let mut ctx = EvalContext::new(&mut env, &mut tracer);

        eval_tree(&mut ctx, &mut ast, action);
        assert!(tracer.entries().any(|e| e.kind == TraceKind::VariableChange && e.message == "score = 10"));
    }

    #[test]
    fn consequence_message_wins_over_success_flag() {
        let mut ast = Ast::new();
        let action = ast.create_consequence("notify", ConsequenceKind::Notify, None, pos()).unwrap();
        let mut env = RuntimeEnv::new();
        env.register_consequence_handler(
            ConsequenceKind::Notify,
            Rc::new(|_, _, _| HandlerReply {
                handled: true,
                success: true,
                value: None,
                message: Some("sent".to_string()),
            }),
            "notifier",
        );
        let mut tracer = Tracer::create();
        let mut ctx = EvalContext::new(&mut env, &mut tracer);

        let result = eval_tree(&mut ctx, &mut ast, action);
        assert_eq!(result, Value::string("sent"));
    }

    // A tiny in-memory memoizer for exercising the hook: records every
    // node it was asked to remember and serves it back on the next lookup.
    struct RecordingMemo {
        cache: std::collections::HashMap<NodeId, Value>,
        remembered: Vec<NodeId>,
    }

    impl Memoizer for RecordingMemo {
        fn lookup(&self, node: NodeId) -> Option<Value> {
            self.cache.get(&node).cloned()
        }

        fn remember(&mut self, node: NodeId, value: Value) {
            self.remembered.push(node);
            self.cache.insert(node, value);
        }
    }

    #[test]
    fn absent_memoizer_changes_nothing() {
        let mut ast = Ast::new();
        let x = ast.create_identifier("x", pos()).unwrap();
        let five = ast.create_literal(Value::Number(5.0), pos());
        let cmp = ast.create_comparison(CompareOperator::Gt, x, five, pos()).unwrap();
        let mut env = RuntimeEnv::new();
        env.set_variable("x", Value::Number(7.0));
        let mut tracer = Tracer::create();
        let mut ctx = EvalContext::new(&mut env, &mut tracer);

        assert_eq!(eval_tree(&mut ctx, &mut ast, cmp), Value::Bool(true));
    }

    #[test]
    fn memoizer_caches_pure_comparison_nodes() {
        let mut ast = Ast::new();
        let x = ast.create_identifier("x", pos()).unwrap();
        let five = ast.create_literal(Value::Number(5.0), pos());
        let cmp = ast.create_comparison(CompareOperator::Gt, x, five, pos()).unwrap();
        let mut env = RuntimeEnv::new();
        env.set_variable("x", Value::Number(7.0));
        let mut tracer = Tracer::create();
        let memo = RecordingMemo { cache: std::collections::HashMap::new(), remembered: Vec::new() };
        let mut ctx = EvalContext::with_memoizer(&mut env, &mut tracer, Box::new(memo));

        assert_eq!(eval_tree(&mut ctx, &mut ast, cmp), Value::Bool(true));
        assert_eq!(ctx.memo.as_ref().unwrap().lookup(cmp), Some(Value::Bool(true)));
    }

    #[test]
    fn memoizer_never_sees_rule_or_consequence_nodes() {
        let mut ast = Ast::new();
        let action = ast.create_consequence("win", ConsequenceKind::Any, None, pos()).unwrap();
        let rule = ast.create_rule("R", action, true, pos()).unwrap();
        let mut env = RuntimeEnv::new();
        env.register_consequence_handler(
            ConsequenceKind::Any,
            Rc::new(|_, _, _| HandlerReply { handled: true, success: true, value: None, message: None }),
            "catch-all",
        );
        let mut tracer = Tracer::create();
        let memo = RecordingMemo { cache: std::collections::HashMap::new(), remembered: Vec::new() };
        let mut ctx = EvalContext::with_memoizer(&mut env, &mut tracer, Box::new(memo));

        eval_tree(&mut ctx, &mut ast, rule);
        let memo_ref = ctx.memo.as_ref().unwrap();
        assert!(memo_ref.lookup(rule).is_none());
        assert!(memo_ref.lookup(action).is_none());
    }
}
