//! The operator runtime (§4.1): push-based recursive-descent execution of
//! a plan tree.
//!
//! Grounded on the teacher's `dbs/iterator.rs` recursive-descent plan
//! walker, but reshaped around §9's resolved coroutine mapping: each
//! operator kind is a factory producing one reusable, `Send + Sync`
//! closure (`Exec`) rather than a trait object per node, so the same
//! closure can be cloned into concurrent staging actors (§4.4) without a
//! second dispatch layer.
pub mod join;
pub mod orderby;
pub mod temp;
pub mod window;

use crate::ctx::ExecutionContext;
use crate::err::{Error, Result};
use crate::expr::{self, Catalog, ExprFunc};
use crate::plan::{OperatorNode, Param};
use crate::value::{Labels, Val, Vals};
use std::cell::{Cell, RefCell};
use std::sync::Arc;

/// Pushes one produced row. Returns `false` to request early termination
/// (§1 "early termination... across all operators"); a producer that sees
/// `false` must stop invoking this callback.
pub type YieldVals<'a> = dyn FnMut(&Vals) -> bool + 'a;

/// Terminal callback: called exactly once per operator execution, with
/// `Some(err)` on failure or `None` on clean end-of-stream (§4.1).
pub type YieldErr<'a> = dyn FnMut(Option<Error>) + 'a;

/// A built, reusable operator execution closure (§9 "explicit closures").
/// `Arc`-wrapped (not boxed) so union-all's staging actors can each hold
/// their own clone of a child's `Exec` without re-walking the plan tree.
pub type Exec = Arc<dyn Fn(&ExecutionContext, &mut YieldVals, &mut YieldErr) + Send + Sync>;

/// Builds the executable closure for `node`, recursing into children. Any
/// malformed plan shape or unsupported `kind` is reported here, at build
/// time, not per row (§7 "fatal at configuration time").
pub fn build_operator(node: &Arc<OperatorNode>) -> Result<Exec> {
	debug!(kind = %node.kind, labels = node.labels.len(), "building operator");
	match node.kind.as_str() {
		"scan" => build_scan(node),
		"filter" => build_filter(node),
		"project" => build_project(node),
		"join-inner-nl" => build_join_nl(node, false),
		"join-outerLeft-nl" => build_join_nl(node, true),
		"union-all" => build_union_all(node),
		"order-by-offset-limit" => orderby::build(node),
		"temp-capture" => temp::build_capture(node),
		"temp-yield" => temp::build_yield(node),
		kind if kind.starts_with("joinHash-") || kind.starts_with("intersect-") || kind.starts_with("except-") => {
			join::build(node)
		}
		other => Err(Error::UnsupportedFeature(format!("operator kind {other}"))),
	}
}

fn child(node: &OperatorNode, i: usize) -> Result<&Arc<OperatorNode>> {
	node.child(i).ok_or_else(|| Error::InputError(format!("operator {} missing child {i}", node.kind)))
}

fn first_expr_param(node: &OperatorNode) -> Result<Arc<crate::plan::ExprNode>> {
	node.params
		.iter()
		.find_map(Param::as_expr)
		.cloned()
		.ok_or_else(|| Error::InputError(format!("operator {} requires an expression parameter", node.kind)))
}

// --- scan --------------------------------------------------------------------

fn build_scan(node: &Arc<OperatorNode>) -> Result<Exec> {
	let rows = node
		.params
		.iter()
		.find_map(Param::as_rows)
		.cloned()
		.ok_or_else(|| Error::InputError("scan requires a Rows parameter".into()))?;
	Ok(Arc::new(move |_ctx: &ExecutionContext, yield_vals: &mut YieldVals, yield_err: &mut YieldErr| {
		for row in rows.iter() {
			if !yield_vals(row) {
				break;
			}
		}
		yield_err(None);
	}))
}

// --- filter ------------------------------------------------------------------

fn build_filter(node: &Arc<OperatorNode>) -> Result<Exec> {
	let child_exec = build_operator(child(node, 0)?)?;
	let catalog = Catalog::new();
	let pred_node = first_expr_param(node)?;
	let pred: ExprFunc = expr::build(&catalog, &node.labels, &pred_node)?;
	Ok(Arc::new(move |ctx: &ExecutionContext, yield_vals: &mut YieldVals, yield_err: &mut YieldErr| {
		let final_err: RefCell<Option<Error>> = RefCell::new(None);
		let mut cb = |row: &Vals| -> bool {
			match pred(row) {
				Ok(v) if v.is_true() => yield_vals(row),
				Ok(_) => true,
				Err(e) => {
					*final_err.borrow_mut() = Some(e);
					false
				}
			}
		};
		let mut ye = |e: Option<Error>| {
			if final_err.borrow().is_none() {
				*final_err.borrow_mut() = e;
			}
		};
		child_exec(ctx, &mut cb, &mut ye);
		yield_err(final_err.into_inner());
	}))
}

// --- project -----------------------------------------------------------------

fn build_project(node: &Arc<OperatorNode>) -> Result<Exec> {
	let child_node = child(node, 0)?;
	let child_exec = build_operator(child_node)?;
	let catalog = Catalog::new();
	let expr_nodes: Vec<Arc<crate::plan::ExprNode>> = node
		.params
		.iter()
		.find_map(Param::as_expr_list)
		.map(|l| l.to_vec())
		.ok_or_else(|| Error::InputError("project requires an expression list parameter".into()))?;
	let exprs: Vec<ExprFunc> =
		expr_nodes.iter().map(|n| expr::build(&catalog, &child_node.labels, n)).collect::<Result<_>>()?;
	Ok(Arc::new(move |ctx: &ExecutionContext, yield_vals: &mut YieldVals, yield_err: &mut YieldErr| {
		let final_err: RefCell<Option<Error>> = RefCell::new(None);
		// Reused across calls (receiver must copy if it retains); avoids a
		// fresh allocation per row.
		let scratch: RefCell<Vals> = RefCell::new(Vals(Vec::with_capacity(exprs.len())));
		let mut cb = |row: &Vals| -> bool {
			let mut out = scratch.borrow_mut();
			out.0.clear();
			for f in &exprs {
				match f(row) {
					Ok(v) => out.0.push(v),
					Err(e) => {
						*final_err.borrow_mut() = Some(e);
						return false;
					}
				}
			}
			yield_vals(&out)
		};
		let mut ye = |e: Option<Error>| {
			if final_err.borrow().is_none() {
				*final_err.borrow_mut() = e;
			}
		};
		child_exec(ctx, &mut cb, &mut ye);
		yield_err(final_err.into_inner());
	}))
}

// --- join-inner-nl / join-outerLeft-nl ----------------------------------------

fn build_join_nl(node: &Arc<OperatorNode>, outer_left: bool) -> Result<Exec> {
	let outer_node = child(node, 0)?;
	let inner_node = child(node, 1)?;
	let outer_exec = build_operator(outer_node)?;
	let inner_exec = build_operator(inner_node)?;
	let joined_labels = outer_node.labels.concat(&inner_node.labels);
	let catalog = Catalog::new();
	let pred_node = first_expr_param(node)?;
	let pred: ExprFunc = expr::build(&catalog, &joined_labels, &pred_node)?;
	let inner_width = inner_node.labels.len();
	Ok(Arc::new(move |ctx: &ExecutionContext, yield_vals: &mut YieldVals, yield_err: &mut YieldErr| {
		let final_err: RefCell<Option<Error>> = RefCell::new(None);
		let halt = Cell::new(false);
		let mut outer_cb = |outer_row: &Vals| -> bool {
			if halt.get() {
				return false;
			}
			let matched = Cell::new(false);
			let inner_final_err: RefCell<Option<Error>> = RefCell::new(None);
			let mut inner_cb = |inner_row: &Vals| -> bool {
				let row = outer_row.concat(inner_row);
				match pred(&row) {
					Ok(v) if v.is_true() => {
						matched.set(true);
						let keep = yield_vals(&row);
						if !keep {
							halt.set(true);
						}
						keep
					}
					Ok(_) => true,
					Err(e) => {
						*inner_final_err.borrow_mut() = Some(e);
						false
					}
				}
			};
			let mut inner_ye = |e: Option<Error>| {
				if inner_final_err.borrow().is_none() {
					*inner_final_err.borrow_mut() = e;
				}
			};
			inner_exec(ctx, &mut inner_cb, &mut inner_ye);
			if let Some(e) = inner_final_err.into_inner() {
				*final_err.borrow_mut() = Some(e);
				halt.set(true);
				return false;
			}
			if outer_left && !matched.get() && !halt.get() {
				let row = outer_row.concat(&Vals::all_missing(inner_width));
				if !yield_vals(&row) {
					halt.set(true);
				}
			}
			!halt.get()
		};
		let mut outer_ye = |e: Option<Error>| {
			if final_err.borrow().is_none() {
				*final_err.borrow_mut() = e;
			}
		};
		outer_exec(ctx, &mut outer_cb, &mut outer_ye);
		yield_err(final_err.into_inner());
	}))
}

// --- union-all -----------------------------------------------------------------

fn build_union_all(node: &Arc<OperatorNode>) -> Result<Exec> {
	let mut children = Vec::with_capacity(node.children.len());
	for child_node in &node.children {
		let exec = build_operator(child_node)?;
		children.push((child_node.labels.clone(), exec));
	}
	Ok(crate::stage::build_union_all(node.labels.clone(), children))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::plan::{ExprNode, OperatorNode};

	fn scan(labels: Vec<&str>, rows: Vec<Vec<&str>>) -> Arc<OperatorNode> {
		let labels = Labels::new(labels.into_iter().map(String::from).collect());
		let rows: Vec<Vals> =
			rows.into_iter().map(|r| Vals(r.into_iter().map(|s| Val::from_json_bytes(s.as_bytes().to_vec())).collect())).collect();
		OperatorNode::new("scan", labels, vec![Param::Rows(Arc::new(rows))], vec![])
	}

	fn run(exec: &Exec) -> (Vec<Vals>, Option<Error>) {
		let ctx = ExecutionContext::background();
		let mut rows = Vec::new();
		let mut yv = |row: &Vals| -> bool {
			rows.push(row.clone());
			true
		};
		let mut err = None;
		let mut ye = |e: Option<Error>| err = e;
		exec(&ctx, &mut yv, &mut ye);
		(rows, err)
	}

	#[test]
	fn filter_scenario_from_spec() {
		// Scenario 1 (§8).
		let s = scan(vec!["a"], vec![vec!["1"], vec!["2"], vec!["3"]]);
		let pred = ExprNode::new(
			"gt",
			vec![
				Param::Expr(ExprNode::new("labelPath", vec![Param::Str("a".into())])),
				Param::Expr(ExprNode::json(Val::from_json_bytes("1"))),
			],
		);
		let node = OperatorNode::new("filter", s.labels.clone(), vec![Param::Expr(pred)], vec![s]);
		let exec = build_operator(&node).unwrap();
		let (rows, err) = run(&exec);
		assert!(err.is_none());
		assert_eq!(rows, vec![Vals(vec![Val::from_json_bytes("2")]), Vals(vec![Val::from_json_bytes("3")])]);
	}

	#[test]
	fn inner_nl_join_scenario_from_spec() {
		// Scenario 2 (§8).
		let left = scan(vec!["k", "l"], vec![vec!["1", "\"x\""], vec!["2", "\"y\""]]);
		let right = scan(vec!["k", "r"], vec![vec!["2", "\"p\""], vec!["3", "\"q\""]]);
		let pred = ExprNode::new(
			"eq",
			vec![
				Param::Expr(ExprNode::new("labelPath", vec![Param::Str("k".into())])),
				Param::Expr(ExprNode::new("labelPath", vec![Param::Str("k".into())])),
			],
		);
		let joined_labels = left.labels.concat(&right.labels);
		let node = OperatorNode::new("join-inner-nl", joined_labels, vec![Param::Expr(pred)], vec![left, right]);
		let exec = build_operator(&node).unwrap();
		let (rows, err) = run(&exec);
		assert!(err.is_none());
		assert_eq!(rows.len(), 1);
		assert_eq!(
			rows[0],
			Vals(vec![
				Val::from_json_bytes("2"),
				Val::from_json_bytes("\"y\""),
				Val::from_json_bytes("2"),
				Val::from_json_bytes("\"p\""),
			])
		);
	}

	#[test]
	fn outer_left_nl_join_scenario_from_spec() {
		// Scenario 3 (§8).
		let left = scan(vec!["k", "l"], vec![vec!["1", "\"x\""], vec!["2", "\"y\""]]);
		let right = scan(vec!["k", "r"], vec![vec!["2", "\"p\""], vec!["3", "\"q\""]]);
		let pred = ExprNode::new(
			"eq",
			vec![
				Param::Expr(ExprNode::new("labelPath", vec![Param::Str("k".into())])),
				Param::Expr(ExprNode::new("labelPath", vec![Param::Str("k".into())])),
			],
		);
		let joined_labels = left.labels.concat(&right.labels);
		let node = OperatorNode::new("join-outerLeft-nl", joined_labels, vec![Param::Expr(pred)], vec![left, right]);
		let exec = build_operator(&node).unwrap();
		let (rows, err) = run(&exec);
		assert!(err.is_none());
		assert_eq!(rows.len(), 2);
		assert!(rows.iter().any(|r| r.0[0] == Val::from_json_bytes("1") && r.0[2].is_missing() && r.0[3].is_missing()));
		assert!(rows.iter().any(|r| r.0[0] == Val::from_json_bytes("2") && r.0[2] == Val::from_json_bytes("2")));
	}

	#[test]
	fn filter_stops_early_when_downstream_requests_it() {
		let s = scan(vec!["a"], vec![vec!["1"], vec!["2"], vec!["3"]]);
		// Always-true predicate: every row passes, so the early-stop signal
		// from the downstream callback is the only thing limiting output.
		let pred = ExprNode::new(
			"eq",
			vec![Param::Expr(ExprNode::json(Val::from_json_bytes("1"))), Param::Expr(ExprNode::json(Val::from_json_bytes("1")))],
		);
		let node = OperatorNode::new("filter", s.labels.clone(), vec![Param::Expr(pred)], vec![s]);
		let exec = build_operator(&node).unwrap();
		let ctx = ExecutionContext::background();
		let mut seen = 0;
		let mut yv = |_row: &Vals| -> bool {
			seen += 1;
			false
		};
		let mut err = None;
		let mut ye = |e: Option<Error>| err = e;
		exec(&ctx, &mut yv, &mut ye);
		assert!(err.is_none());
		assert_eq!(seen, 1);
	}
}
