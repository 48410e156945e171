//! Temp capture / yield (§4.6): materializes a child's output into a named,
//! spillable external heap so a later part of the plan can replay it.
//!
//! Grounded on the teacher's `ctx::MutableContext` temp-table registration
//! pattern (register a resource under a name, look it up by name elsewhere
//! in the same execution), reusing this crate's [`crate::heap::ExternalHeap`]
//! as the backing store per §6.
use crate::ctx::{ExecutionContext, TempResource};
use crate::err::{Error, Result};
use crate::op::{build_operator, Exec, YieldErr, YieldVals};
use crate::plan::{OperatorNode, Param};
use crate::value::{vals_decode, vals_encode};
use std::cell::RefCell;
use std::sync::{Arc, Mutex};

fn name_param(node: &OperatorNode) -> Result<String> {
	node.params
		.first()
		.and_then(Param::as_str)
		.map(str::to_string)
		.ok_or_else(|| Error::InputError(format!("{} requires a name Str parameter", node.kind)))
}

/// `temp-capture(name)` (§4.6): consumes the child fully, encoding every row
/// into a fresh heap; registers it under `name` only on clean completion.
/// Produces no rows of its own.
pub fn build_capture(node: &Arc<OperatorNode>) -> Result<Exec> {
	let child_node = node.child(0).ok_or_else(|| Error::InputError("temp-capture missing child".into()))?;
	let child_exec = build_operator(child_node)?;
	let name = name_param(node)?;
	Ok(Arc::new(move |ctx: &ExecutionContext, _yield_vals: &mut YieldVals, yield_err: &mut YieldErr| {
		let mut heap = ctx.new_heap();
		let capture_err: RefCell<Option<Error>> = RefCell::new(None);
		{
			let mut cb = |row: &crate::value::Vals| -> bool {
				let bytes = vals_encode(row);
				match heap.push_bytes(&bytes) {
					Ok(_) => true,
					Err(e) => {
						*capture_err.borrow_mut() = Some(e);
						false
					}
				}
			};
			let mut ye = |e: Option<Error>| {
				if capture_err.borrow().is_none() {
					*capture_err.borrow_mut() = e;
				}
			};
			child_exec(ctx, &mut cb, &mut ye);
		}
		match capture_err.into_inner() {
			Some(e) => yield_err(Some(e)),
			None => {
				ctx.register_temp(name.clone(), TempResource::Heap(Arc::new(Mutex::new(heap))));
				yield_err(None);
			}
		}
	}))
}

/// `temp-yield(name)` (§4.6): replays a previously captured heap, or a
/// silent empty stream if `name` was never registered.
pub fn build_yield(node: &Arc<OperatorNode>) -> Result<Exec> {
	let name = name_param(node)?;
	Ok(Arc::new(move |ctx: &ExecutionContext, yield_vals: &mut YieldVals, yield_err: &mut YieldErr| {
		let Some(resource) = ctx.get_temp(&name) else {
			yield_err(None);
			return;
		};
		let Some(heap) = resource.as_heap() else {
			yield_err(Some(Error::Unreachable("temp registry only ever holds Heap resources today")));
			return;
		};
		let mut heap = heap.lock().unwrap();
		let len = heap.len() as u64;
		for i in 0..len {
			let bytes = match heap.get(i) {
				Ok(b) => b,
				Err(e) => {
					yield_err(Some(e));
					return;
				}
			};
			let row = match vals_decode(&bytes) {
				Ok(r) => r,
				Err(e) => {
					yield_err(Some(e));
					return;
				}
			};
			if !yield_vals(&row) {
				break;
			}
		}
		yield_err(None);
	}))
}
