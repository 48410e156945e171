//! Order-by + offset + limit (§4.5): a bounded max-heap that keeps only the
//! top `offset + limit` rows under the composite sort order, draining them
//! ascending at end-of-stream.
//!
//! Grounded on the teacher's `sql::statements::select`/`idx::planner::executor`
//! convention of streaming into an external-sort-style accumulator rather
//! than collecting then sorting in place, generalized here with a plain
//! `BinaryHeap` since the accumulator is capped at `offset + limit` (small
//! relative to the input) rather than the whole result set.
use crate::ctx::ExecutionContext;
use crate::err::{Error, Result};
use crate::expr::{self, Catalog, ExprFunc};
use crate::op::{build_operator, Exec, YieldErr, YieldVals};
use crate::plan::{OperatorNode, Param};
use crate::value::comparer::Comparer;
use crate::value::Vals;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::rc::Rc;
use std::sync::Arc;

/// Reads the `(offset, limit)` pair every order-by node carries, saturating
/// their sum to `i64::MAX` (§4.5 "overflow guard").
fn offset_limit(node: &OperatorNode) -> Result<(i64, i64)> {
	let offset = node.params.first().and_then(Param::as_int).ok_or_else(|| {
		Error::InputError("order-by-offset-limit requires an offset Int parameter".into())
	})?;
	let limit = node.params.get(1).and_then(Param::as_int).ok_or_else(|| {
		Error::InputError("order-by-offset-limit requires a limit Int parameter".into())
	})?;
	Ok((offset.max(0), limit.max(0)))
}

fn cap(offset: i64, limit: i64) -> usize {
	usize::try_from(offset.saturating_add(limit)).unwrap_or(usize::MAX)
}

/// One heap slot: the original row alongside its projected sort key.
/// Carries a shared direction list and comparer so [`Ord`] can implement
/// §4.5's `LessFunc` without threading extra state through `BinaryHeap`'s
/// trait-bound comparisons; a shared error cell captures any comparison
/// failure so it can be surfaced after the heap has finished settling
/// (`Ord::cmp` itself cannot return a `Result`).
struct Entry {
	row: Vals,
	key: Vals,
	ascending: Rc<Vec<bool>>,
	comparer: Comparer,
	err: Rc<RefCell<Option<Error>>>,
}

impl Entry {
	/// `LessFunc(self, other)` (§4.5): the first unequal projected position
	/// decides, oriented by that position's direction; all-equal is `false`.
	fn less(&self, other: &Entry) -> bool {
		for (i, asc) in self.ascending.iter().enumerate() {
			let (a, b) = match (self.key.get(i), other.key.get(i)) {
				(Some(a), Some(b)) => (a, b),
				_ => continue,
			};
			match self.comparer.compare(a, b) {
				Ok(Ordering::Equal) => continue,
				Ok(ord) => return if *asc { ord == Ordering::Less } else { ord == Ordering::Greater },
				Err(e) => {
					if self.err.borrow().is_none() {
						*self.err.borrow_mut() = Some(e);
					}
					return false;
				}
			}
		}
		false
	}
}

impl PartialEq for Entry {
	fn eq(&self, other: &Self) -> bool {
		!self.less(other) && !other.less(self)
	}
}

impl Eq for Entry {}

impl PartialOrd for Entry {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for Entry {
	fn cmp(&self, other: &Self) -> Ordering {
		if self.less(other) {
			Ordering::Less
		} else if other.less(self) {
			Ordering::Greater
		} else {
			Ordering::Equal
		}
	}
}

pub fn build(node: &Arc<OperatorNode>) -> Result<Exec> {
	let child_node = node.child(0).ok_or_else(|| Error::InputError("order-by-offset-limit missing child".into()))?;
	let child_exec = build_operator(child_node)?;
	let (offset, limit) = offset_limit(node)?;
	let take = cap(offset, limit);
	let offset = offset as usize;
	let limit = limit as usize;

	let sort_exprs = node.params.iter().find_map(Param::as_expr_list).map(|l| l.to_vec());
	let directions = node.params.iter().find_map(Param::as_strs).map(|s| s.to_vec());

	match sort_exprs {
		Some(exprs) if !exprs.is_empty() => {
			let directions = directions
				.ok_or_else(|| Error::InputError("order-by-offset-limit requires a direction per sort key".into()))?;
			if directions.len() != exprs.len() {
				return Err(Error::InputError("order-by-offset-limit direction count must match sort key count".into()));
			}
			let ascending: Vec<bool> = directions.iter().map(|d| d != "desc").collect();
			let catalog = Catalog::new();
			let projections: Vec<ExprFunc> =
				exprs.iter().map(|e| expr::build(&catalog, &child_node.labels, e)).collect::<Result<_>>()?;
			Ok(build_sorted(child_exec, projections, ascending, offset, limit, take))
		}
		_ => Ok(build_unsorted(child_exec, offset, limit)),
	}
}

fn build_sorted(
	child_exec: Exec,
	projections: Vec<ExprFunc>,
	ascending: Vec<bool>,
	offset: usize,
	limit: usize,
	take: usize,
) -> Exec {
	Arc::new(move |ctx: &ExecutionContext, yield_vals: &mut YieldVals, yield_err: &mut YieldErr| {
		let ascending = Rc::new(ascending.clone());
		let cmp_err: Rc<RefCell<Option<Error>>> = Rc::new(RefCell::new(None));
		let heap: RefCell<BinaryHeap<Entry>> = RefCell::new(BinaryHeap::new());
		let child_err: RefCell<Option<Error>> = RefCell::new(None);
		{
			let mut cb = |row: &Vals| -> bool {
				if cmp_err.borrow().is_some() {
					return false;
				}
				let mut key_vals = Vec::with_capacity(projections.len());
				for p in &projections {
					match p(row) {
						Ok(v) => key_vals.push(v),
						Err(e) => {
							*child_err.borrow_mut() = Some(e);
							return false;
						}
					}
				}
				let entry = Entry {
					row: row.clone(),
					key: Vals(key_vals),
					ascending: ascending.clone(),
					comparer: *ctx.comparer(),
					err: cmp_err.clone(),
				};
				let mut h = heap.borrow_mut();
				h.push(entry);
				if h.len() > take {
					h.pop();
				}
				true
			};
			let mut ye = |e: Option<Error>| {
				if child_err.borrow().is_none() {
					*child_err.borrow_mut() = e;
				}
			};
			child_exec(ctx, &mut cb, &mut ye);
		}
		if let Some(e) = child_err.into_inner() {
			yield_err(Some(e));
			return;
		}
		if let Some(e) = cmp_err.borrow_mut().take() {
			yield_err(Some(e));
			return;
		}
		let sorted = heap.into_inner().into_sorted_vec();
		for entry in sorted.into_iter().skip(offset).take(limit) {
			if !yield_vals(&entry.row) {
				break;
			}
		}
		yield_err(None);
	})
}

fn build_unsorted(child_exec: Exec, offset: usize, limit: usize) -> Exec {
	Arc::new(move |ctx: &ExecutionContext, yield_vals: &mut YieldVals, yield_err: &mut YieldErr| {
		let rows: RefCell<Vec<Vals>> = RefCell::new(Vec::new());
		let child_err: RefCell<Option<Error>> = RefCell::new(None);
		{
			let mut cb = |row: &Vals| -> bool {
				rows.borrow_mut().push(row.clone());
				true
			};
			let mut ye = |e: Option<Error>| {
				if child_err.borrow().is_none() {
					*child_err.borrow_mut() = e;
				}
			};
			child_exec(ctx, &mut cb, &mut ye);
		}
		if let Some(e) = child_err.into_inner() {
			yield_err(Some(e));
			return;
		}
		for row in rows.into_inner().into_iter().skip(offset).take(limit) {
			if !yield_vals(&row) {
				break;
			}
		}
		yield_err(None);
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::plan::ExprNode;
	use crate::value::{Labels, Val};

	fn scan(rows: Vec<i64>) -> Arc<OperatorNode> {
		let labels = Labels::new(vec!["x".into()]);
		let vals: Vec<Vals> = rows.into_iter().map(|x| Vals(vec![Val::from_json_bytes(x.to_string())])).collect();
		OperatorNode::new("scan", labels, vec![Param::Rows(Arc::new(vals))], vec![])
	}

	fn run(exec: &Exec) -> (Vec<i64>, Option<Error>) {
		let ctx = ExecutionContext::background();
		let mut out = Vec::new();
		let mut yv = |row: &Vals| -> bool {
			out.push(row.0[0].to_json().unwrap().as_i64().unwrap());
			true
		};
		let mut err = None;
		let mut ye = |e: Option<Error>| err = e;
		exec(&ctx, &mut yv, &mut ye);
		(out, err)
	}

	#[test]
	fn order_by_offset_limit_scenario_from_spec() {
		// Scenario 5 (§8).
		let s = scan(vec![3, 1, 2, 5, 4]);
		let sort_key = ExprNode::new("labelPath", vec![Param::Str("x".into())]);
		let node = OperatorNode::new(
			"order-by-offset-limit",
			s.labels.clone(),
			vec![
				Param::Int(1),
				Param::Int(2),
				Param::ExprList(vec![sort_key]),
				Param::Strs(vec!["asc".into()]),
			],
			vec![s],
		);
		let exec = build(&node).unwrap();
		let (rows, err) = run(&exec);
		assert!(err.is_none());
		assert_eq!(rows, vec![2, 3]);
	}

	#[test]
	fn descending_direction_reverses_order() {
		let s = scan(vec![1, 2, 3]);
		let sort_key = ExprNode::new("labelPath", vec![Param::Str("x".into())]);
		let node = OperatorNode::new(
			"order-by-offset-limit",
			s.labels.clone(),
			vec![
				Param::Int(0),
				Param::Int(3),
				Param::ExprList(vec![sort_key]),
				Param::Strs(vec!["desc".into()]),
			],
			vec![s],
		);
		let exec = build(&node).unwrap();
		let (rows, err) = run(&exec);
		assert!(err.is_none());
		assert_eq!(rows, vec![3, 2, 1]);
	}

	#[test]
	fn no_order_by_expressions_falls_back_to_plain_slice() {
		let s = scan(vec![10, 20, 30, 40]);
		let node = OperatorNode::new(
			"order-by-offset-limit",
			s.labels.clone(),
			vec![Param::Int(1), Param::Int(2)],
			vec![s],
		);
		let exec = build(&node).unwrap();
		let (rows, err) = run(&exec);
		assert!(err.is_none());
		assert_eq!(rows, vec![20, 30]);
	}
}
