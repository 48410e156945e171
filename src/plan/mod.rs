//! Plan and expression ingress types (§3/§6/§9 "Plan input typing").
//!
//! The distilled spec describes the operator tree and expression nodes as
//! heterogeneous nested lists (`Kind`, `Labels`, `Params: Vec<Any>`). §9
//! resolves the open question of how to type that boundary: a tagged
//! `Param`/`ExprNode` enum, so the core never traffics in opaque any-typed
//! values internally even though the plan-building front-end (out of scope,
//! §1) may itself be dynamically typed.
use crate::value::{Labels, Val, Vals};
use std::sync::Arc;

/// One parameter of an [`OperatorNode`] or expression argument list. Strings
/// and integers cover scan/sort/join configuration; `Expr` nests an
/// expression tree; `Labels` carries a label list (e.g. a union's child
/// remap target); `Val` carries an already-encoded literal, used by `json`
/// nodes so a literal's sentinel tag survives the plan ingress unchanged.
#[derive(Clone, Debug)]
pub enum Param {
	Str(String),
	Int(i64),
	Bool(bool),
	Expr(Arc<ExprNode>),
	Labels(Labels),
	ExprList(Vec<Arc<ExprNode>>),
	Val(Val),
	/// A literal in-memory row source for `scan` leaves. The real datastore
	/// adapter (§6) is an external collaborator out of this crate's scope;
	/// literal rows are the trivial backing store this core implements
	/// directly so plans remain constructible and testable without one.
	Rows(Arc<Vec<Vals>>),
	/// A parallel string list, e.g. the `"asc"`/`"desc"` direction per
	/// sort-key position in `order-by-offset-limit`.
	Strs(Vec<String>),
}

impl Param {
	pub fn as_str(&self) -> Option<&str> {
		match self {
			Param::Str(s) => Some(s),
			_ => None,
		}
	}

	pub fn as_int(&self) -> Option<i64> {
		match self {
			Param::Int(i) => Some(*i),
			_ => None,
		}
	}

	pub fn as_bool(&self) -> Option<bool> {
		match self {
			Param::Bool(b) => Some(*b),
			_ => None,
		}
	}

	pub fn as_expr(&self) -> Option<&Arc<ExprNode>> {
		match self {
			Param::Expr(e) => Some(e),
			_ => None,
		}
	}

	pub fn as_expr_list(&self) -> Option<&[Arc<ExprNode>]> {
		match self {
			Param::ExprList(v) => Some(v),
			_ => None,
		}
	}

	pub fn as_labels(&self) -> Option<&Labels> {
		match self {
			Param::Labels(l) => Some(l),
			_ => None,
		}
	}

	pub fn as_val(&self) -> Option<&Val> {
		match self {
			Param::Val(v) => Some(v),
			_ => None,
		}
	}

	pub fn as_rows(&self) -> Option<&Arc<Vec<Vals>>> {
		match self {
			Param::Rows(r) => Some(r),
			_ => None,
		}
	}

	pub fn as_strs(&self) -> Option<&[String]> {
		match self {
			Param::Strs(s) => Some(s),
			_ => None,
		}
	}
}

/// An expression node (§3): a catalog key plus its parameters. Kept
/// separate from [`Param`] at the top level (rather than folding `key`
/// into the param list) because every catalog factory needs the key before
/// it can interpret the rest.
#[derive(Clone, Debug)]
pub struct ExprNode {
	pub key: String,
	pub params: Vec<Param>,
}

impl ExprNode {
	pub fn new(key: impl Into<String>, params: Vec<Param>) -> Arc<Self> {
		Arc::new(Self {
			key: key.into(),
			params,
		})
	}

	/// Convenience for a zero-arg/literal-free key like `valsCanonical`.
	pub fn leaf(key: impl Into<String>) -> Arc<Self> {
		Self::new(key, Vec::new())
	}

	/// A `json(s)` literal node, the only kind the expression catalog's
	/// static-folding path (§4.2) treats specially. `literal` is carried as
	/// an already-encoded `Val` so its sentinel tag (MISSING/NULL/TRUE/FALSE)
	/// survives unchanged rather than being re-parsed from text.
	pub fn json(literal: Val) -> Arc<Self> {
		Self::new("json", vec![Param::Val(literal)])
	}
}

/// An operator node (§3). Immutable after construction; `children` holds
/// zero (scan), one (filter/project/order-by/temp-capture/temp-yield), or
/// two (join/union-member) child operators.
#[derive(Clone, Debug)]
pub struct OperatorNode {
	pub kind: String,
	pub labels: Labels,
	pub params: Vec<Param>,
	pub children: Vec<Arc<OperatorNode>>,
}

impl OperatorNode {
	pub fn new(kind: impl Into<String>, labels: Labels, params: Vec<Param>, children: Vec<Arc<OperatorNode>>) -> Arc<Self> {
		Arc::new(Self {
			kind: kind.into(),
			labels,
			params,
			children,
		})
	}

	pub fn child(&self, i: usize) -> Option<&Arc<OperatorNode>> {
		self.children.get(i)
	}
}
