// Built-in function dispatcher.
//
// Unknown function names fall through here from `call_function`, which
// applies the same arity rules as user-registered functions. This is a
// deliberately small standard library, covering only the handful of
// functions named explicitly: absolute value, square root, natural log,
// power, string length, substring, mean, current timestamp.

use crate::env::{Arity, RuntimeEnv};
use crate::error::ReasonsError;
use crate::value::Value;

pub fn arity_of(name: &str) -> Option<Arity> {
    match name {
        "abs" | "sqrt" | "ln" | "strlen" | "now" => Some(Arity { min: arity_min(name), max: arity_max(name) }),
        "pow" => Some(Arity { min: 2, max: Some(2) }),
        "substring" => Some(Arity { min: 2, max: Some(3) }),
        "mean" => Some(Arity { min: 1, max: None }),
        _ => None,
    }
}

fn arity_min(name: &str) -> u32 {
    if name == "now" {
        0
    } else {
        1
    }
}

fn arity_max(name: &str) -> Option<u32> {
    if name == "now" {
        Some(0)
    } else {
        Some(1)
    }
}

fn number_arg(args: &[Value], i: usize) -> Option<f64> {
    match args.get(i) {
        Some(Value::Number(n)) => Some(*n),
        _ => None,
    }
}

fn string_arg(args: &[Value], i: usize) -> Option<std::rc::Rc<String>> {
    match args.get(i) {
        Some(Value::String(s)) => Some(s.clone()),
        _ => None,
    }
}

pub fn dispatch(env: &mut RuntimeEnv, name: &str, args: &[Value]) -> Value {
    match name {
        "abs" => match number_arg(args, 0) {
            Some(n) => Value::Number(n.abs()),
            None => type_error(env, name),
        },
        "sqrt" => match number_arg(args, 0) {
            Some(n) if n < 0.0 => domain_error(env, "sqrt of negative number"),
            Some(n) => Value::Number(n.sqrt()),
            None => type_error(env, name),
        },
        "ln" => match number_arg(args, 0) {
            Some(n) if n <= 0.0 => domain_error(env, "ln of non-positive number"),
            Some(n) => Value::Number(n.ln()),
            None => type_error(env, name),
        },
        "pow" => match (number_arg(args, 0), number_arg(args, 1)) {
            (Some(base), Some(exp)) => Value::Number(base.powf(exp)),
            _ => type_error(env, name),
        },
        "strlen" => match string_arg(args, 0) {
            Some(s) => Value::Number(s.chars().count() as f64),
            None => type_error(env, name),
        },
        "substring" => match (string_arg(args, 0), number_arg(args, 1)) {
            (Some(s), Some(start)) => {
                let start = start.max(0.0) as usize;
                let end = match number_arg(args, 2) {
                    Some(len) => start + len.max(0.0) as usize,
                    None => s.chars().count(),
                };
                let sliced: String = s.chars().skip(start).take(end.saturating_sub(start)).collect();
                Value::string(sliced)
            }
            _ => type_error(env, name),
        },
        "mean" => {
            let mut sum = 0.0;
            let mut count = 0u32;
            for (i, _) in args.iter().enumerate() {
                match number_arg(args, i) {
                    Some(n) => {
                        sum += n;
                        count += 1;
                    }
                    None => return type_error(env, name),
                }
            }
            if count == 0 {
                domain_error(env, "mean of empty argument list")
            } else {
                Value::Number(sum / count as f64)
            }
        }
        "now" => Value::Number(now_seconds()),
        _ => {
            env.set_error(ReasonsError::UnknownFunction(name.to_string()));
            Value::Error
        }
    }
}

fn type_error(env: &mut RuntimeEnv, name: &str) -> Value {
    env.set_error(ReasonsError::DomainError(format!("invalid argument types for {}", name)));
    Value::Error
}

fn domain_error(env: &mut RuntimeEnv, message: &str) -> Value {
    env.set_error(ReasonsError::DomainError(message.to_string()));
    Value::Error
}

fn now_seconds() -> f64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs_f64()).unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abs_and_sqrt() {
        let mut env = RuntimeEnv::new();
        assert_eq!(env.call_function("abs", &[Value::Number(-3.0)]), Value::Number(3.0));
        assert_eq!(env.call_function("sqrt", &[Value::Number(9.0)]), Value::Number(3.0));
    }

    #[test]
    fn sqrt_of_negative_is_domain_error() {
        let mut env = RuntimeEnv::new();
        let result = env.call_function("sqrt", &[Value::Number(-1.0)]);
        assert_eq!(result, Value::Error);
        assert!(env.had_error());
    }

    #[test]
    fn mean_of_several_numbers() {
        let mut env = RuntimeEnv::new();
        let args = [Value::Number(1.0), Value::Number(2.0), Value::Number(3.0)];
        assert_eq!(env.call_function("mean", &args), Value::Number(2.0));
    }

    #[test]
    fn substring_extracts_requested_range() {
        let mut env = RuntimeEnv::new();
        let args = [Value::string("hello world"), Value::Number(6.0), Value::Number(5.0)];
        assert_eq!(env.call_function("substring", &args), Value::string("world"));
    }

    #[test]
    fn unknown_function_is_runtime_error() {
        let mut env = RuntimeEnv::new();
        let result = env.call_function("frobnicate", &[]);
        assert_eq!(result, Value::Error);
        assert!(env.had_error());
    }
}
