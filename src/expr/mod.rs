//! The expression evaluator (§4.2): a dispatch catalog of factory functions
//! building per-expression closures, with constant-folding for one-sided
//! static comparisons.
//!
//! Grounded on the teacher's `fnc::run`/`fnc::synchronous` dispatch-by-name
//! style (a name maps to a handler, looked up once per call site rather
//! than via a giant match spread across the AST), but built as a registry
//! of *factories* rather than direct evaluators, since this spec's
//! closures must close over plan-build-time state (parsed literals, label
//! positions) once and be invoked per row thereafter.
use crate::err::{Error, Result};
use crate::plan::{ExprNode, Param};
use crate::value::comparer::{parse, parse_f64, Comparer, ValType};
use crate::value::{Labels, Val, Vals};
use std::sync::Arc;

/// `ExprFunc(row) -> Val` (§4.2).
pub type ExprFunc = Box<dyn Fn(&Vals) -> Result<Val> + Send + Sync>;

type Factory = fn(&Catalog, &Labels, &[Arc<ExprNode>]) -> Result<ExprFunc>;

/// Context-scoped expression catalog (§9 "Global catalog"): built fresh per
/// plan execution rather than a process-wide mutable map, so different
/// executions (or tests) never share mutable catalog state.
pub struct Catalog {
	factories: std::collections::HashMap<&'static str, Factory>,
	comparer: Comparer,
}

impl Default for Catalog {
	fn default() -> Self {
		Self::new()
	}
}

impl Catalog {
	pub fn new() -> Self {
		let mut factories: std::collections::HashMap<&'static str, Factory> = std::collections::HashMap::new();
		factories.insert("eq", |c, l, p| build_cmp(c, l, p, CmpKind::Eq));
		factories.insert("lt", |c, l, p| build_cmp(c, l, p, CmpKind::Lt));
		factories.insert("le", |c, l, p| build_cmp(c, l, p, CmpKind::Le));
		factories.insert("gt", |c, l, p| build_cmp(c, l, p, CmpKind::Gt));
		factories.insert("ge", |c, l, p| build_cmp(c, l, p, CmpKind::Ge));
		factories.insert("and", build_and);
		factories.insert("or", build_or);
		factories.insert("valsCanonical", build_vals_canonical);
		Self {
			factories,
			comparer: Comparer::new(),
		}
	}

	/// Builds the per-row closure for `node`, recursing into sub-expressions
	/// held in `Param::Expr`/`Param::ExprList` parameters.
	pub fn build(&self, node: &ExprNode, labels: &Labels) -> Result<ExprFunc> {
		let factory = self
			.factories
			.get(node.key.as_str())
			.ok_or_else(|| Error::UnknownExpressionKey(node.key.clone()))?;
		let args = expr_args(node)?;
		factory(self, labels, &args)
	}
}

/// Flattens a node's `params` into the expression-argument children the
/// binary/unary factories expect, rejecting malformed plans early (§7
/// `InputError`, "fatal at configuration time rather than per-row").
fn expr_args(node: &ExprNode) -> Result<Vec<Arc<ExprNode>>> {
	let mut out = Vec::new();
	for p in &node.params {
		match p {
			Param::Expr(e) => out.push(e.clone()),
			Param::ExprList(list) => out.extend(list.iter().cloned()),
			_ => {}
		}
	}
	Ok(out)
}

fn arg(args: &[Arc<ExprNode>], i: usize, key: &str) -> Result<Arc<ExprNode>> {
	args.get(i)
		.cloned()
		.ok_or_else(|| Error::InputError(format!("{key} expects an argument at position {i}")))
}

// --- json(s) ---------------------------------------------------------------

/// Reads a `json` node's literal parameter. Exposed so comparator factories
/// can recognize and fold a literal operand without invoking the catalog
/// for it.
fn json_literal(node: &ExprNode) -> Result<Val> {
	node.params
		.first()
		.and_then(Param::as_val)
		.cloned()
		.ok_or_else(|| Error::InputError("json expression missing its literal parameter".into()))
}

// --- labelPath(name, path...) ------------------------------------------------
//
// `labelPath`'s first parameter is a column name, not a nested expression,
// so it is built straight from the node rather than through the generic
// `args`/factory plumbing `Catalog::build` uses for the rest of the catalog.

fn build_label_path_node(labels: &Labels, node: &ExprNode) -> Result<ExprFunc> {
	let name = node
		.params
		.first()
		.and_then(Param::as_str)
		.ok_or_else(|| Error::InputError("labelPath expects a column name".into()))?
		.to_string();
	let path: Vec<PathStep> = node.params[1..]
		.iter()
		.map(|p| match p {
			Param::Str(s) => Ok(PathStep::Key(s.clone())),
			Param::Int(i) => Ok(PathStep::Index(*i as usize)),
			_ => Err(Error::InputError("labelPath path steps must be strings or integers".into())),
		})
		.collect::<Result<_>>()?;
	let idx = labels.index_of(&name);
	Ok(Box::new(move |row: &Vals| -> Result<Val> {
		if idx < 0 {
			return Ok(Val::missing());
		}
		let cell = match row.get(idx as usize) {
			Some(v) => v,
			None => return Ok(Val::missing()),
		};
		if path.is_empty() {
			return Ok(cell.clone());
		}
		let mut current = cell.to_json()?;
		for step in &path {
			current = match (step, current) {
				(PathStep::Key(k), serde_json::Value::Object(mut o)) => match o.remove(k) {
					Some(v) => v,
					None => return Ok(Val::missing()),
				},
				(PathStep::Index(i), serde_json::Value::Array(mut a)) => {
					if *i < a.len() {
						a.swap_remove(*i)
					} else {
						return Ok(Val::missing());
					}
				}
				_ => return Ok(Val::missing()),
			};
		}
		Val::from_json(&current)
	}))
}

enum PathStep {
	Key(String),
	Index(usize),
}

// --- eq/lt/le/gt/ge ----------------------------------------------------------

#[derive(Clone, Copy)]
enum CmpKind {
	Eq,
	Lt,
	Le,
	Gt,
	Ge,
}

/// The `{cmpLT, cmpEQ, cmpGT}` truth table from §4.2, expressed as which
/// `Ordering`s make the comparator true.
fn truth_table(kind: CmpKind) -> (bool, bool, bool) {
	match kind {
		CmpKind::Lt => (true, false, false),
		CmpKind::Le => (true, true, false),
		CmpKind::Eq => (false, true, false),
		// gt = lt swapped, ge = le swapped: handled by swapping operands
		// before reaching here, so they reuse Lt/Le's table.
		CmpKind::Gt => (true, false, false),
		CmpKind::Ge => (true, true, false),
	}
}

fn build_cmp(c: &Catalog, labels: &Labels, args: &[Arc<ExprNode>], kind: CmpKind) -> Result<ExprFunc> {
	let a_node = arg(args, 0, "comparator")?;
	let b_node = arg(args, 1, "comparator")?;
	// gt(a, b) = lt(b, a); ge(a, b) = le(b, a) (§4.2).
	let (a_node, b_node, kind) = match kind {
		CmpKind::Gt => (b_node, a_node, CmpKind::Lt),
		CmpKind::Ge => (b_node, a_node, CmpKind::Le),
		other => (a_node, b_node, other),
	};
	let (lt_ok, eq_ok, gt_ok) = truth_table(kind);

	let comparer = c.comparer;
	// Static folding (§4.2): one side is a `json` literal, parsed and
	// type-classified once here instead of per row.
	let a_is_json = a_node.key == "json";
	let b_is_json = b_node.key == "json";
	if a_is_json || b_is_json {
		let (literal_node, dynamic_node, literal_is_a) =
			if a_is_json { (a_node, b_node, true) } else { (b_node, a_node, false) };
		let literal_val = json_literal(&literal_node)?;
		let (literal_parsed, literal_ty) = parse(&literal_val)?;
		let literal_f64 = literal_parsed.as_ref().and_then(parse_f64);
		let dynamic_fn = build_operand(c, labels, &dynamic_node)?;
		return Ok(Box::new(move |row: &Vals| -> Result<Val> {
			if literal_parsed.is_none() {
				// "if the literal has no value, returns it directly" (§4.2).
				return Ok(literal_val.clone());
			}
			let dyn_val = dynamic_fn(row)?;
			let (dyn_parsed, dyn_ty) = parse(&dyn_val)?;
			if dyn_parsed.is_none() {
				return Ok(dyn_val);
			}
			let ordering = if literal_ty == ValType::Number && dyn_ty == ValType::Number {
				let dyn_f64 = parse_f64(dyn_parsed.as_ref().unwrap());
				match (literal_f64, dyn_f64) {
					(Some(lf), Some(df)) => {
						let (a, b) = if literal_is_a { (lf, df) } else { (df, lf) };
						a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal)
					}
					_ => {
						return Err(Error::EvaluationError("non-finite number in static comparison".into()))
					}
				}
			} else if literal_is_a {
				comparer.compare_with_type(literal_parsed.as_ref(), dyn_parsed.as_ref(), literal_ty, dyn_ty)?
			} else {
				comparer.compare_with_type(dyn_parsed.as_ref(), literal_parsed.as_ref(), dyn_ty, literal_ty)?
			};
			Ok(ordering_to_val(ordering, lt_ok, eq_ok, gt_ok))
		}));
	}

	// Dynamic path: both operands evaluated per row.
	let a_fn = build_operand(c, labels, &a_node)?;
	let b_fn = build_operand(c, labels, &b_node)?;
	Ok(Box::new(move |row: &Vals| -> Result<Val> {
		let a_val = a_fn(row)?;
		let b_val = b_fn(row)?;
		let (a_parsed, a_ty) = parse(&a_val)?;
		let (b_parsed, b_ty) = parse(&b_val)?;
		if a_parsed.is_none() {
			return Ok(a_val);
		}
		if b_parsed.is_none() {
			return Ok(b_val);
		}
		let ordering = comparer.compare_with_type(a_parsed.as_ref(), b_parsed.as_ref(), a_ty, b_ty)?;
		Ok(ordering_to_val(ordering, lt_ok, eq_ok, gt_ok))
	}))
}

fn ordering_to_val(ordering: std::cmp::Ordering, lt_ok: bool, eq_ok: bool, gt_ok: bool) -> Val {
	let ok = match ordering {
		std::cmp::Ordering::Less => lt_ok,
		std::cmp::Ordering::Equal => eq_ok,
		std::cmp::Ordering::Greater => gt_ok,
	};
	Val::bool(ok)
}

/// Builds the closure for any expression node, routing `labelPath` and
/// `json` through their dedicated builders since they carry non-expression
/// parameters that the generic `Catalog::build` path doesn't special-case.
fn build_operand(c: &Catalog, labels: &Labels, node: &ExprNode) -> Result<ExprFunc> {
	match node.key.as_str() {
		"labelPath" => build_label_path_node(labels, node),
		"json" => {
			let v = json_literal(node)?;
			Ok(Box::new(move |_row: &Vals| -> Result<Val> { Ok(v.clone()) }))
		}
		_ => c.build(node, labels),
	}
}

// --- and/or ------------------------------------------------------------------

fn build_and(c: &Catalog, labels: &Labels, args: &[Arc<ExprNode>]) -> Result<ExprFunc> {
	let a_fn = build_operand(c, labels, &arg(args, 0, "and")?)?;
	let b_fn = build_operand(c, labels, &arg(args, 1, "and")?)?;
	Ok(Box::new(move |row: &Vals| -> Result<Val> {
		let a_val = a_fn(row)?;
		if !a_val.is_true() {
			return Ok(a_val);
		}
		b_fn(row)
	}))
}

fn build_or(c: &Catalog, labels: &Labels, args: &[Arc<ExprNode>]) -> Result<ExprFunc> {
	let a_fn = build_operand(c, labels, &arg(args, 0, "or")?)?;
	let b_fn = build_operand(c, labels, &arg(args, 1, "or")?)?;
	Ok(Box::new(move |row: &Vals| -> Result<Val> {
		let a_val = a_fn(row)?;
		if a_val.is_true() {
			return Ok(Val::bool(true));
		}
		b_fn(row)
	}))
}

// --- valsCanonical -------------------------------------------------------------

fn build_vals_canonical(c: &Catalog, _labels: &Labels, _args: &[Arc<ExprNode>]) -> Result<ExprFunc> {
	let comparer = c.comparer;
	Ok(Box::new(move |row: &Vals| -> Result<Val> {
		let bytes = comparer.canonical_json_vals(row)?;
		Ok(Val::from_json_bytes(bytes))
	}))
}

/// Entry point used by operators: builds a `labelPath`/`json`-aware closure
/// for any top-level expression node, including the two special forms that
/// `Catalog::build` alone cannot route.
pub fn build(catalog: &Catalog, labels: &Labels, node: &ExprNode) -> Result<ExprFunc> {
	build_operand(catalog, labels, node)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::plan::ExprNode;

	fn row(vals: Vec<&str>) -> Vals {
		Vals(vals.into_iter().map(|s| Val::from_json_bytes(s.as_bytes().to_vec())).collect())
	}

	#[test]
	fn label_path_resolves_by_name() {
		let labels = Labels::new(vec!["a".into()]);
		let node = ExprNode::new("labelPath", vec![Param::Str("a".into())]);
		let catalog = Catalog::new();
		let f = build(&catalog, &labels, &node).unwrap();
		assert_eq!(f(&row(vec!["1"])).unwrap(), Val::from_json_bytes("1"));
	}

	#[test]
	fn label_path_missing_name_yields_missing() {
		let labels = Labels::new(vec!["a".into()]);
		let node = ExprNode::new("labelPath", vec![Param::Str("z".into())]);
		let catalog = Catalog::new();
		let f = build(&catalog, &labels, &node).unwrap();
		assert!(f(&row(vec!["1"])).unwrap().is_missing());
	}

	#[test]
	fn filter_scenario_gt_static_literal() {
		// Scenario 1 (§8): gt(labelPath("a"), json("1")).
		let labels = Labels::new(vec!["a".into()]);
		let catalog = Catalog::new();
		let node = ExprNode::new(
			"gt",
			vec![
				Param::Expr(ExprNode::new("labelPath", vec![Param::Str("a".into())])),
				Param::Expr(ExprNode::json(Val::from_json_bytes("1"))),
			],
		);
		let f = build(&catalog, &labels, &node).unwrap();
		assert!(f(&row(vec!["2"])).unwrap().is_true());
		assert!(!f(&row(vec!["1"])).unwrap().is_true());
		assert!(!f(&row(vec!["0"])).unwrap().is_true());
	}

	#[test]
	fn and_short_circuits_on_non_true() {
		let labels = Labels::default();
		let catalog = Catalog::new();
		let node = ExprNode::new(
			"and",
			vec![Param::Expr(ExprNode::json(Val::missing())), Param::Expr(ExprNode::json(Val::bool(true)))],
		);
		let f = build(&catalog, &labels, &node).unwrap();
		assert!(f(&row(vec![])).unwrap().is_missing());
	}

	#[test]
	fn eq_propagates_missing() {
		let labels = Labels::new(vec!["a".into()]);
		let catalog = Catalog::new();
		let node = ExprNode::new(
			"eq",
			vec![
				Param::Expr(ExprNode::new("labelPath", vec![Param::Str("a".into())])),
				Param::Expr(ExprNode::json(Val::from_json_bytes("1"))),
			],
		);
		let f = build(&catalog, &labels, &node).unwrap();
		let missing_row = Vals(vec![Val::missing()]);
		assert!(f(&missing_row).unwrap().is_missing());
	}
}
