// Reasons: execution core for a small decision-tree DSL.
//
// Copyright (C) 2019  Brandon Lewis
//
// This program is free software: you can redistribute it and/or
// modify it under the terms of the GNU Lesser General Public License
// as published by the Free Software Foundation, either version 3 of
// the License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public
// License along with this program.  If not, see
// <https://www.gnu.org/licenses/>.

pub mod ast;
pub mod builtins;
pub mod clock;
pub mod env;
pub mod error;
pub mod eval;
pub mod explain;
pub mod tracer;
pub mod value;

pub use ast::{Ast, NodeId};
pub use env::RuntimeEnv;
pub use error::{ErrorCode, ReasonsError};
pub use eval::{eval_tree, EvalContext, Memoizer};
pub use explain::{Explainer, Mode as ExplainMode};
pub use tracer::Tracer;
pub use value::Value;
