//! The hash-join engine (§4.3): one polymorphic operator covering
//! `joinHash-{inner,outerLeft}` and `{intersect,except}-{all,distinct}`.
//!
//! Grounded on the teacher's `idx::planner::iterators::ThingIterator`
//! pattern of a single enum/dispatch point selecting behavior by a small
//! discriminant rather than six near-duplicate operator types, and on
//! `hashbrown`/`ahash` as the probe map's backing store — the pair the
//! teacher pulls in wherever it needs a hash map faster than `std`'s
//! SipHash default.
use crate::ctx::ExecutionContext;
use crate::err::{Error, Result};
use crate::expr::{self, Catalog, ExprFunc};
use crate::op::{build_operator, Exec, YieldErr, YieldVals};
use crate::plan::{OperatorNode, Param};
use crate::value::{Val, Vals};
use std::cell::{Cell, RefCell};
use std::sync::Arc;

/// Which of §4.3's table columns apply to a given `Kind`.
struct Family {
	tracks_probing: bool,
	yields_unprobed: bool,
	/// `joinHash-*` stores the full left row chain and yields concatenated
	/// rows; `intersect-*`/`except-*` key on the whole row's canonical JSON
	/// and yield a copy of that row.
	left_vals: bool,
	canonical_key: bool,
}

fn family_for(kind: &str) -> Result<Family> {
	Ok(match kind {
		"joinHash-inner" => Family {
			tracks_probing: false,
			yields_unprobed: false,
			left_vals: true,
			canonical_key: false,
		},
		"joinHash-outerLeft" => Family {
			tracks_probing: true,
			yields_unprobed: true,
			left_vals: true,
			canonical_key: false,
		},
		"intersect-all" => Family {
			tracks_probing: false,
			yields_unprobed: false,
			left_vals: false,
			canonical_key: true,
		},
		"intersect-distinct" => Family {
			tracks_probing: true,
			yields_unprobed: false,
			left_vals: false,
			canonical_key: true,
		},
		"except-all" => Family {
			tracks_probing: true,
			yields_unprobed: true,
			left_vals: false,
			canonical_key: true,
		},
		"except-distinct" => Family {
			tracks_probing: true,
			yields_unprobed: true,
			left_vals: false,
			canonical_key: true,
		},
		other => return Err(Error::UnsupportedFeature(format!("hash-join kind {other}"))),
	})
}

/// One map entry (§3 "probe map entry"). Kept as a plain struct with every
/// field always present rather than a byte-packed record with conditional
/// fields: Rust's sum types make the §9-recommended per-family layout free,
/// and a `bool`/`u64`/`Option<(u64,u32)>` triple costs nothing extra to
/// carry for families that don't use every field.
#[derive(Default)]
struct Entry {
	probed: bool,
	left_count: u64,
	/// Offset/size of the most recently appended chain link in `left_bytes`,
	/// or `None` for an empty chain.
	chain_head: Option<(u64, u32)>,
}

type ProbeMap = hashbrown::HashMap<Val, Entry, ahash::RandomState>;

/// Terminator for a chain link's embedded "previous" pointer (§3). Offset 0
/// never denotes a real link: [`Arena::new`] reserves a one-byte pad so no
/// real chain head can land there.
const CHAIN_END: (u64, u32) = (0, 0);

struct Arena {
	buf: Vec<u8>,
}

impl Arena {
	fn new() -> Self {
		Self {
			buf: vec![0u8],
		}
	}

	/// Appends a new chain head: `prev`'s (offset, size) followed by the
	/// row's binary encoding, prefixed with its own length (§3 "chain head
	/// is the full encoded row prefixed by the previous chain's (offset,
	/// size)").
	fn append(&mut self, prev: (u64, u32), row: &Vals) -> (u64, u32) {
		let offset = self.buf.len() as u64;
		self.buf.extend_from_slice(&prev.0.to_le_bytes());
		self.buf.extend_from_slice(&prev.1.to_le_bytes());
		let encoded = crate::value::vals_encode(row);
		self.buf.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
		self.buf.extend_from_slice(&encoded);
		let size = (self.buf.len() as u64 - offset) as u32;
		(offset, size)
	}

	fn read(&self, offset: u64, size: u32) -> Result<((u64, u32), Vals)> {
		let start = offset as usize;
		let end = start.checked_add(size as usize).ok_or(Error::CorruptChain {
			offset,
			reason: "size overflow",
		})?;
		let rec = self.buf.get(start..end).ok_or(Error::CorruptChain {
			offset,
			reason: "out of bounds",
		})?;
		if rec.len() < 16 {
			return Err(Error::CorruptChain {
				offset,
				reason: "truncated header",
			});
		}
		let prev_offset = u64::from_le_bytes(rec[0..8].try_into().unwrap());
		let prev_size = u32::from_le_bytes(rec[8..12].try_into().unwrap());
		let row_len = u32::from_le_bytes(rec[12..16].try_into().unwrap()) as usize;
		let row_bytes = rec.get(16..16 + row_len).ok_or(Error::CorruptChain {
			offset,
			reason: "truncated row body",
		})?;
		let row = crate::value::vals_decode(row_bytes)?;
		Ok(((prev_offset, prev_size), row))
	}
}

fn canonical_val_to_vals(key: &Val) -> Result<Vals> {
	let json = key.to_json()?;
	let serde_json::Value::Array(items) = json else {
		return Err(Error::Unreachable("canonical-row probe key was not a JSON array"));
	};
	let vals = items.iter().map(Val::from_json).collect::<Result<Vec<_>>>()?;
	Ok(Vals(vals))
}

pub fn build(node: &Arc<OperatorNode>) -> Result<Exec> {
	let fam = family_for(&node.kind)?;
	let left_node = node.child(0).ok_or_else(|| Error::InputError("hash-join missing left child".into()))?;
	let right_node = node.child(1).ok_or_else(|| Error::InputError("hash-join missing right child".into()))?;
	let left_exec = build_operator(left_node)?;
	let right_exec = build_operator(right_node)?;

	let (left_key, right_key): (Option<ExprFunc>, Option<ExprFunc>) = if fam.canonical_key {
		(None, None)
	} else {
		let catalog = Catalog::new();
		let lk = node.params.first().and_then(Param::as_expr).cloned().ok_or_else(|| {
			Error::InputError("joinHash requires a left key expression parameter".into())
		})?;
		let rk = node.params.get(1).and_then(Param::as_expr).cloned().ok_or_else(|| {
			Error::InputError("joinHash requires a right key expression parameter".into())
		})?;
		(Some(expr::build(&catalog, &left_node.labels, &lk)?), Some(expr::build(&catalog, &right_node.labels, &rk)?))
	};

	let kind = node.kind.clone();
	let right_width = right_node.labels.len();

	Ok(Arc::new(move |ctx: &ExecutionContext, yield_vals: &mut YieldVals, yield_err: &mut YieldErr| {
		let map: RefCell<ProbeMap> = RefCell::new(ProbeMap::default());
		let arena: RefCell<Arena> = RefCell::new(Arena::new());

		// --- Phase 1: build ---
		let build_err: RefCell<Option<Error>> = RefCell::new(None);
		{
			let mut build_cb = |row: &Vals| -> bool {
				let key = match probe_key(ctx, fam.canonical_key, left_key.as_ref(), row) {
					Ok(k) => k,
					Err(e) => {
						*build_err.borrow_mut() = Some(e);
						return false;
					}
				};
				if !key.has_value() {
					return true;
				}
				let mut m = map.borrow_mut();
				let entry = m.entry(key).or_default();
				entry.left_count += 1;
				if fam.left_vals {
					let prev = entry.chain_head.unwrap_or(CHAIN_END);
					entry.chain_head = Some(arena.borrow_mut().append(prev, row));
				}
				true
			};
			let mut build_ye = |e: Option<Error>| {
				if build_err.borrow().is_none() {
					*build_err.borrow_mut() = e;
				}
			};
			left_exec(ctx, &mut build_cb, &mut build_ye);
		}
		if let Some(e) = build_err.into_inner() {
			// §4.3 "if the left child errors, skip Phase 2".
			yield_err(Some(e));
			return;
		}

		// --- Phase 2: probe ---
		let halt = Cell::new(false);
		let op_err: RefCell<Option<Error>> = RefCell::new(None);
		{
			let mut probe_cb = |row: &Vals| -> bool {
				if halt.get() {
					return false;
				}
				let key = match probe_key(ctx, fam.canonical_key, right_key.as_ref(), row) {
					Ok(k) => k,
					Err(e) => {
						*op_err.borrow_mut() = Some(e);
						halt.set(true);
						return false;
					}
				};
				if !key.has_value() {
					return true;
				}
				// `except-all` needs the *remaining* left count after
				// subtracting every right-side occurrence (§8 invariant
				// "max(0, leftCount - rightCount)"), which the table's
				// single boolean `probed` flag can't express on its own;
				// it reuses `left_count` as a live decrementing counter
				// instead of setting the flag (see DESIGN.md).
				let snapshot = {
					let mut m = map.borrow_mut();
					m.get_mut(&key).map(|entry| {
						if kind.as_str() == "except-all" {
							entry.left_count = entry.left_count.saturating_sub(1);
						} else if fam.tracks_probing {
							entry.probed = true;
						}
						(entry.probed, entry.left_count, entry.chain_head.unwrap_or(CHAIN_END))
					})
				};
				let Some((already_probed, left_count, chain_head)) = snapshot else {
					return true;
				};
				match kind.as_str() {
					"intersect-distinct" => {
						if !already_probed && !yield_vals(row) {
							halt.set(true);
							return false;
						}
					}
					"intersect-all" => {
						for _ in 0..left_count {
							if !yield_vals(row) {
								halt.set(true);
								return false;
							}
						}
					}
					"joinHash-inner" | "joinHash-outerLeft" => {
						let mut ptr = chain_head;
						while ptr != CHAIN_END {
							let (prev, left_row) = match arena.borrow().read(ptr.0, ptr.1) {
								Ok(v) => v,
								Err(e) => {
									*op_err.borrow_mut() = Some(e);
									halt.set(true);
									return false;
								}
							};
							let out = left_row.concat(row);
							if !yield_vals(&out) {
								halt.set(true);
								return false;
							}
							ptr = prev;
						}
					}
					// except-*: probed flag is already updated above; no
					// emission happens during the probe phase.
					_ => {}
				}
				true
			};
			let mut probe_ye = |e: Option<Error>| {
				if op_err.borrow().is_none() {
					*op_err.borrow_mut() = e;
				}
			};
			right_exec(ctx, &mut probe_cb, &mut probe_ye);
		}

		if op_err.borrow().is_none() && !halt.get() && fam.yields_unprobed {
			flush_unprobed(&kind, &map, &arena, right_width, yield_vals, &halt, &op_err);
		}

		yield_err(op_err.into_inner());
	}))
}

fn probe_key(ctx: &ExecutionContext, canonical: bool, expr: Option<&ExprFunc>, row: &Vals) -> Result<Val> {
	if canonical {
		let bytes = ctx.comparer().canonical_json_vals(row)?;
		Ok(Val::from_json_bytes(bytes))
	} else {
		let f = expr.ok_or(Error::Unreachable("non-canonical families always carry a key expression"))?;
		f(row)
	}
}

/// Phase 3 (§4.3): after a successful probe, emit the entries never
/// matched by the right side.
fn flush_unprobed(
	kind: &str,
	map: &RefCell<ProbeMap>,
	arena: &RefCell<Arena>,
	right_width: usize,
	yield_vals: &mut YieldVals,
	halt: &Cell<bool>,
	op_err: &RefCell<Option<Error>>,
) {
	let m = map.borrow();
	for (key, entry) in m.iter() {
		// `except-all` visits every entry: its remaining `left_count` (after
		// probe-time decrements) is already 0 for fully-matched keys, so the
		// loop body naturally contributes nothing for them.
		if kind != "except-all" && entry.probed {
			continue;
		}
		match kind {
			"except-all" => match canonical_val_to_vals(key) {
				Ok(row) => {
					for _ in 0..entry.left_count {
						if !yield_vals(&row) {
							halt.set(true);
							break;
						}
					}
				}
				Err(e) => {
					*op_err.borrow_mut() = Some(e);
					halt.set(true);
				}
			},
			"except-distinct" => match canonical_val_to_vals(key) {
				Ok(row) => {
					if !yield_vals(&row) {
						halt.set(true);
					}
				}
				Err(e) => {
					*op_err.borrow_mut() = Some(e);
					halt.set(true);
				}
			},
			"joinHash-outerLeft" => {
				let mut ptr = entry.chain_head.unwrap_or(CHAIN_END);
				while ptr != CHAIN_END {
					match arena.borrow().read(ptr.0, ptr.1) {
						Ok((prev, left_row)) => {
							let out = left_row.concat(&Vals::all_missing(right_width));
							if !yield_vals(&out) {
								halt.set(true);
								break;
							}
							ptr = prev;
						}
						Err(e) => {
							*op_err.borrow_mut() = Some(e);
							halt.set(true);
							break;
						}
					}
				}
			}
			_ => {}
		}
		if halt.get() {
			break;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::plan::{ExprNode, OperatorNode};
	use crate::value::Labels;

	fn scan(labels: Vec<&str>, rows: Vec<Vec<&str>>) -> Arc<OperatorNode> {
		let labels = Labels::new(labels.into_iter().map(String::from).collect());
		let rows: Vec<Vals> = rows
			.into_iter()
			.map(|r| Vals(r.into_iter().map(|s| Val::from_json_bytes(s.as_bytes().to_vec())).collect()))
			.collect();
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

	fn key_node(label: &str) -> Param {
		Param::Expr(ExprNode::new("labelPath", vec![Param::Str(label.into())]))
	}

	#[test]
	fn join_hash_inner_matches_scenario() {
		let left = scan(vec!["k", "l"], vec![vec!["1", "\"x\""], vec!["2", "\"y\""]]);
		let right = scan(vec!["k", "r"], vec![vec!["2", "\"p\""], vec!["3", "\"q\""]]);
		let labels = left.labels.concat(&right.labels);
		let node = OperatorNode::new("joinHash-inner", labels, vec![key_node("k"), key_node("k")], vec![left, right]);
		let exec = build(&node).unwrap();
		let (rows, err) = run(&exec);
		assert!(err.is_none());
		assert_eq!(rows.len(), 1);
		assert_eq!(rows[0].0[0], Val::from_json_bytes("2"));
		assert_eq!(rows[0].0[3], Val::from_json_bytes("\"p\""));
	}

	#[test]
	fn join_hash_outer_left_emits_unmatched_left_rows() {
		let left = scan(vec!["k", "l"], vec![vec!["1", "\"x\""], vec!["2", "\"y\""]]);
		let right = scan(vec!["k", "r"], vec![vec!["2", "\"p\""], vec!["3", "\"q\""]]);
		let labels = left.labels.concat(&right.labels);
		let node =
			OperatorNode::new("joinHash-outerLeft", labels, vec![key_node("k"), key_node("k")], vec![left, right]);
		let exec = build(&node).unwrap();
		let (rows, err) = run(&exec);
		assert!(err.is_none());
		assert_eq!(rows.len(), 2);
		assert!(rows.iter().any(|r| r.0[0] == Val::from_json_bytes("1") && r.0[2].is_missing()));
	}

	#[test]
	fn intersect_all_vs_distinct_scenario() {
		// Scenario 4 (§8): left [a,a,b], right [a,a,a,c].
		let left = scan(vec!["v"], vec![vec!["\"a\""], vec!["\"a\""], vec!["\"b\""]]);
		let right = scan(vec!["v"], vec![vec!["\"a\""], vec!["\"a\""], vec!["\"a\""], vec!["\"c\""]]);
		let labels = left.labels.clone();
		let all_node = OperatorNode::new("intersect-all", labels.clone(), vec![], vec![left.clone(), right.clone()]);
		let distinct_node = OperatorNode::new("intersect-distinct", labels, vec![], vec![left, right]);
		let (rows_all, err_all) = run(&build(&all_node).unwrap());
		let (rows_distinct, err_distinct) = run(&build(&distinct_node).unwrap());
		assert!(err_all.is_none());
		assert!(err_distinct.is_none());
		assert_eq!(rows_all.len(), 6);
		assert_eq!(rows_distinct.len(), 1);
	}

	#[test]
	fn except_all_counts_left_minus_right() {
		let left = scan(vec!["v"], vec![vec!["\"a\""], vec!["\"a\""], vec!["\"a\""]]);
		let right = scan(vec!["v"], vec![vec!["\"a\""]]);
		let labels = left.labels.clone();
		let node = OperatorNode::new("except-all", labels, vec![], vec![left, right]);
		let (rows, err) = run(&build(&node).unwrap());
		assert!(err.is_none());
		assert_eq!(rows.len(), 2);
	}
}
