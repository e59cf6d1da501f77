// Runtime environment.
//
// Owns the scope stack, function registry, consequence-handler list,
// configuration, statistics, and the single error slot. The scope stack
// is a simple push/pop design: each scope is its own `HashMap`, innermost
// shadowing outer without disturbing them.

use crate::ast::{Ast, ConsequenceKind, NodeId};
use crate::value::Value;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Instant;

pub const VAR_ARGS: Option<u32> = None;

#[derive(Clone, Debug, PartialEq)]
pub struct ErrorInfo {
    pub code: crate::error::ErrorCode,
    pub message: String,
}

// A registered function's arity bounds. `max` of `None` means "unbounded
// above" (the `VAR_ARGS` sentinel).
#[derive(Copy, Clone, Debug)]
pub struct Arity {
    pub min: u32,
    pub max: Option<u32>,
}

impl Arity {
    pub fn accepts(&self, n: u32) -> bool {
        n >= self.min && self.max.map_or(true, |max| n <= max)
    }
}

pub type FunctionFn = Rc<dyn Fn(&mut RuntimeEnv, &[Value]) -> Value>;
pub type HandlerFn = Rc<dyn Fn(&mut RuntimeEnv, &Ast, NodeId) -> HandlerReply>;

#[derive(Clone)]
pub struct FunctionRecord {
    pub callable: FunctionFn,
    pub description: String,
    pub arity: Arity,
}

#[derive(Clone)]
struct HandlerRecord {
    kind: ConsequenceKind,
    name: String,
    handler: HandlerFn,
}

// The reply contract: "handler(env, action_node) -> {handled,
// success, value?, message?}".
#[derive(Clone, Debug, Default)]
pub struct HandlerReply {
    pub handled: bool,
    pub success: bool,
    pub value: Option<Value>,
    pub message: Option<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, serde::Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub golf_mode: bool,
    pub max_recursion_depth: u32,
    pub tracing_enabled: bool,
    pub explanations_enabled: bool,
    pub gc_threshold: usize,
}

impl Default for RuntimeConfig {
    fn default() -> RuntimeConfig {
        RuntimeConfig {
            golf_mode: true,
            max_recursion_depth: 1000,
            tracing_enabled: false,
            explanations_enabled: false,
            gc_threshold: 0,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Stats {
    pub variables_created: u64,
    pub functions_called: u64,
    pub consequences_executed: u64,
    pub consequences_succeeded: u64,
    pub consequences_failed: u64,
    pub current_recursion_depth: u32,
    pub max_recursion_depth_reached: u32,
    pub errors: u64,
    pub gc_runs: u64,
    // Rough footprint of the scope stack, function registry and handler
    // list, in bytes. Filled in by `get_stats` at snapshot time rather than
    // tracked incrementally, since it reflects current occupancy, not a
    // running count.
    pub memory_estimate: usize,
}

type Scope = HashMap<String, Value>;

// Owns everything a running evaluation reads from and writes to except the
// AST and trace, which the caller threads through separately.
pub struct RuntimeEnv {
    scopes: Vec<Scope>,
    functions: HashMap<String, FunctionRecord>,
    handlers: Vec<HandlerRecord>,
    config: RuntimeConfig,
    stats: Stats,
    last_error: Option<ErrorInfo>,
    call_stack: Vec<String>,
    start: Instant,
    pending_variable_changes: Vec<(String, Value)>,
}

impl RuntimeEnv {
    pub fn new() -> RuntimeEnv {
        RuntimeEnv {
            scopes: vec![Scope::new()],
            functions: HashMap::new(),
            handlers: Vec::new(),
            config: RuntimeConfig::default(),
            stats: Stats::default(),
            last_error: None,
            call_stack: Vec::new(),
            start: Instant::now(),
            pending_variable_changes: Vec::new(),
        }
    }

    pub fn with_config(config: RuntimeConfig) -> RuntimeEnv {
        let mut env = RuntimeEnv::new();
        env.config = config;
        env
    }

    // -- scopes -----------------------------------------------------------

    // Inserts into the innermost scope. Releases and replaces a prior
    // value if `name` already exists *in that scope*; outer scopes are
    // untouched. Increments `variables_created` only on first insertion.
    pub fn set_variable(&mut self, name: &str, value: Value) {
        self.pending_variable_changes.push((name.to_string(), value.clone()));
        let scope = self.scopes.last_mut().expect("global scope always exists");
        if scope.insert(name.to_string(), value).is_none() {
            self.stats.variables_created += 1;
        }
    }

    // Drains the log of `set_variable` calls made since the last drain, so
    // the evaluator can lift them into matching `VariableChange` trace
    // events after a consequence handler runs (handlers only see the
    // environment, not the tracer, so this is how their writes become
    // observable in the trace).
    pub(crate) fn take_pending_variable_changes(&mut self) -> Vec<(String, Value)> {
        std::mem::take(&mut self.pending_variable_changes)
    }

    // Searches innermost-to-outermost. Returns the first hit, or `Null`
    // with `last_error` set to an undefined-variable error on miss.
    pub fn get_variable(&mut self, name: &str) -> Value {
        for scope in self.scopes.iter().rev() {
            if let Some(v) = scope.get(name) {
                return v.clone();
            }
        }
        self.set_error(crate::error::ReasonsError::UndefinedVariable(name.to_string()));
        Value::Null
    }

    pub fn variable_exists(&self, name: &str) -> bool {
        self.scopes.iter().rev().any(|scope| scope.contains_key(name))
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(Scope::new());
    }

    // LIFO pop, releasing every variable in the popped scope. The global
    // scope (index 0) is never popped.
    pub fn pop_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    pub fn scope_depth(&self) -> usize {
        self.scopes.len()
    }

    // -- functions ----------------------------------------------------------

    pub fn register_function(
        &mut self,
        name: impl Into<String>,
        callable: FunctionFn,
        description: impl Into<String>,
        min_arity: u32,
        max_arity: Option<u32>,
    ) {
        self.functions.insert(
            name.into(),
            FunctionRecord {
                callable,
                description: description.into(),
                arity: Arity { min: min_arity, max: max_arity },
            },
        );
    }

    // Validates arity, pushes the call frame, invokes the callable (or
    // falls through to the builtin dispatcher for unregistered names),
    // pops the frame, updates stats.
    //
    // If the call stack depth would exceed `max_recursion_depth`, this
    // sets a recursion error and returns `Null`, not `Error`, leaving the
    // evaluator's own AST-walk recursion guard as the one that returns
    // `Error`.
    pub fn call_function(&mut self, name: &str, args: &[Value]) -> Value {
        if self.call_stack.len() as u32 >= self.config.max_recursion_depth {
            self.set_error(crate::error::ReasonsError::RecursionExceeded(self.config.max_recursion_depth));
            return Value::Null;
        }

        let arity = match self.functions.get(name) {
            Some(record) => record.arity,
            None => match crate::builtins::arity_of(name) {
                Some(a) => a,
                None => {
                    self.set_error(crate::error::ReasonsError::UnknownFunction(name.to_string()));
                    return Value::Error;
                }
            },
        };

        let n = args.len() as u32;
        if !arity.accepts(n) {
            self.set_error(crate::error::ReasonsError::ArityMismatch {
                name: name.to_string(),
                min: arity.min,
                max: arity.max.unwrap_or(u32::MAX),
                got: n,
            });
            return Value::Error;
        }

        self.call_stack.push(name.to_string());
        tracing::trace!(function = name, arity = n, "calling function");
        let callable = self.functions.get(name).map(|r| r.callable.clone());
        let result = match callable {
            Some(callable) => callable(self, args),
            None => crate::builtins::dispatch(self, name, args),
        };
        self.call_stack.pop();
        self.stats.functions_called += 1;
        result
    }

    pub fn function_description(&self, name: &str) -> Option<String> {
        self.functions.get(name).map(|r| r.description.clone())
    }

    // -- consequence handlers -------------------------------------------

    pub fn register_consequence_handler(
        &mut self,
        kind: ConsequenceKind,
        handler: HandlerFn,
        name: impl Into<String>,
    ) {
        self.handlers.push(HandlerRecord { kind, name: name.into(), handler });
    }

    // Iterates handlers in insertion order; the first whose registered
    // kind equals `kind` or is `Any` is invoked. Stops at the first reply
    // with `handled == true`.
    pub fn execute_consequence(&mut self, ast: &Ast, action_node: NodeId, kind: ConsequenceKind) -> HandlerReply {
        let handlers: Vec<HandlerFn> = self
            .handlers
            .iter()
            .filter(|h| h.kind == kind || h.kind == ConsequenceKind::Any)
            .map(|h| h.handler.clone())
            .collect();

        let mut reply = HandlerReply::default();
        for handler in handlers {
            reply = handler(self, ast, action_node);
            self.stats.consequences_executed += 1;
            if reply.success {
                self.stats.consequences_succeeded += 1;
            } else {
                self.stats.consequences_failed += 1;
            }
            if reply.handled {
                break;
            }
        }
        reply
    }

    // -- config -----------------------------------------------------------

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn set_option(&mut self, f: impl FnOnce(&mut RuntimeConfig)) {
        f(&mut self.config);
    }

    // -- error slot -------------------------------------------------------

    pub fn set_error(&mut self, err: crate::error::ReasonsError) {
        tracing::warn!(code = ?err.code(), "{}", err);
        self.stats.errors += 1;
        self.last_error = Some(ErrorInfo { code: err.code(), message: err.to_string() });
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    pub fn last_error(&self) -> Option<&ErrorInfo> {
        self.last_error.as_ref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.last_error.as_ref().map(|e| e.message.as_str())
    }

    pub fn had_error(&self) -> bool {
        self.last_error.is_some()
    }

    // -- stats --------------------------------------------------------------

    pub fn get_stats(&self) -> Stats {
        let mut stats = self.stats;
        stats.memory_estimate = self.estimate_memory();
        stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = Stats::default();
        self.start = Instant::now();
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.start.elapsed()
    }

    // Per-entry overhead plus the bytes a `Value` actually owns (a
    // `String`'s heap payload; everything else is inline), summed over
    // every scope, plus one record's worth of overhead per registered
    // function and consequence handler.
    fn estimate_memory(&self) -> usize {
        const ENTRY_OVERHEAD: usize = std::mem::size_of::<(String, Value)>();
        let scopes_bytes: usize = self
            .scopes
            .iter()
            .flat_map(|scope| scope.iter())
            .map(|(name, value)| ENTRY_OVERHEAD + name.len() + value_payload_len(value))
            .sum();
        let functions_bytes = self.functions.len() * std::mem::size_of::<FunctionRecord>();
        let handlers_bytes = self.handlers.len() * std::mem::size_of::<HandlerRecord>();
        scopes_bytes + functions_bytes + handlers_bytes
    }

    pub(crate) fn record_recursion_depth(&mut self, depth: u32) {
        self.stats.current_recursion_depth = depth;
        if depth > self.stats.max_recursion_depth_reached {
            self.stats.max_recursion_depth_reached = depth;
        }
    }

    // Advisory garbage collection hook. Scope maps are reclaimed by Rust's
    // allocator as soon as they're popped, so there is nothing for this
    // crate to reclaim; it exists so embedders with a GC-backed `Value`
    // payload have a place to hang real collection. Returns bytes "freed"
    // (always 0 here) and bumps `gc_runs`.
    pub fn gc(&mut self) -> usize {
        self.stats.gc_runs += 1;
        0
    }
}

impl Default for RuntimeEnv {
    fn default() -> RuntimeEnv {
        RuntimeEnv::new()
    }
}

fn value_payload_len(value: &Value) -> usize {
    match value {
        Value::String(s) => s.len(),
        _ => 0,
    }
}
