//! Staging pipeline & union-all (§4.4): N concurrent producers feeding one
//! consumer through a bounded batch channel, with first-error-wins fan-in.
//!
//! Grounded on the teacher's `exe::spawn` global-executor helper for
//! concurrency, and on the general shape of `dbs/distinct.rs`-style fan-in
//! accumulation, generalized from a single-threaded accumulator into a
//! multi-actor staging point since this is the one place the spec calls for
//! real parallelism (§5).
use crate::cnf;
use crate::ctx::ExecutionContext;
use crate::err::Error;
use crate::op::{Exec, YieldErr, YieldVals};
use crate::value::{Labels, Val, Vals};
use executor::Task;
use std::cell::{Cell, RefCell};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

type Batch = Vec<Vals>;

/// A fan-in coordination point between N concurrent actors and one consumer
/// (§4.4). Actors are spawned with [`Stage::start_actor`]; the consumer
/// drains them with [`Stage::wait_for_actors`].
pub struct Stage {
	tx: crate::channel::Sender<Option<Batch>>,
	rx: crate::channel::Receiver<Option<Batch>>,
	stop: Arc<AtomicBool>,
	actor_count: AtomicUsize,
	first_error: Mutex<Option<Error>>,
	free_list: Mutex<Vec<Batch>>,
	tasks: Mutex<Vec<Task<()>>>,
}

impl Stage {
	pub fn new(batch_ch_cap: usize) -> Arc<Self> {
		let (tx, rx) = crate::channel::bounded(batch_ch_cap.max(1));
		Arc::new(Self {
			tx,
			rx,
			stop: Arc::new(AtomicBool::new(false)),
			actor_count: AtomicUsize::new(0),
			first_error: Mutex::new(None),
			free_list: Mutex::new(Vec::new()),
			tasks: Mutex::new(Vec::new()),
		})
	}

	pub fn with_default_capacity() -> Arc<Self> {
		Self::new(*cnf::STAGE_BATCH_CHANNEL_CAPACITY)
	}

	fn recycle(&self) -> Batch {
		self.free_list.lock().unwrap().pop().unwrap_or_default()
	}

	/// Spawns `exec` as one concurrent actor (§4.4 `start_actor`). The actor
	/// accumulates yielded rows into a batch; when `batch_size > 0` and the
	/// batch reaches capacity it is pushed onto the channel (or dropped if
	/// the stop signal has already tripped); `batch_size <= 0` pushes one
	/// batch at termination.
	pub fn start_actor(self: &Arc<Self>, ctx: ExecutionContext, exec: Exec, batch_size: i64) {
		self.actor_count.fetch_add(1, Ordering::SeqCst);
		let stage = self.clone();
		let actor_ctx = ctx.push_for_concurrency();
		trace!("stage actor starting, batch_size={batch_size}");
		let fut = async move {
			let mut batch = stage.recycle();
			let local_err: RefCell<Option<Error>> = RefCell::new(None);
			let observed_stop = Cell::new(false);
			{
				let mut yv = |row: &Vals| -> bool {
					batch.push(row.clone());
					if batch_size > 0 && batch.len() as i64 >= batch_size {
						if stage.stop.load(Ordering::Acquire) {
							trace!("stage actor observed stop signal");
							observed_stop.set(true);
							return false;
						}
						let full = std::mem::replace(&mut batch, stage.recycle());
						if futures::executor::block_on(stage.tx.send(Some(full))).is_err() {
							return false;
						}
					}
					true
				};
				let mut ye = |e: Option<Error>| {
					*local_err.borrow_mut() = e;
				};
				exec(&actor_ctx, &mut yv, &mut ye);
			}
			if observed_stop.get() && local_err.borrow().is_none() {
				*local_err.borrow_mut() = Some(Error::Cancelled);
			}
			if batch_size <= 0 || !batch.is_empty() {
				let _ = futures::executor::block_on(stage.tx.send(Some(batch)));
			}
			if let Some(e) = local_err.into_inner() {
				let mut guard = stage.first_error.lock().unwrap();
				if guard.is_none() {
					match e {
						Error::Cancelled => trace!("stage actor cancelled by a sibling's failure"),
						_ => warn!("stage actor failed: {e}"),
					}
					*guard = Some(e);
				}
				drop(guard);
				stage.stop.store(true, Ordering::Release);
			}
			let _ = futures::executor::block_on(stage.tx.send(None));
		};
		let task = crate::exe::spawn(fut);
		self.tasks.lock().unwrap().push(task);
	}

	/// Consumes batches until every started actor's `None` sentinel has been
	/// observed, forwarding each row downstream; then reports the first
	/// error seen by any actor, or `None` (§4.4 `wait_for_actors`).
	pub fn wait_for_actors(&self, yield_vals: &mut YieldVals, yield_err: &mut YieldErr) {
		let expected = self.actor_count.load(Ordering::SeqCst);
		let mut done = 0usize;
		while done < expected {
			match futures::executor::block_on(self.rx.recv()) {
				Ok(Some(mut batch)) => {
					for row in &batch {
						if !yield_vals(row) {
							self.stop.store(true, Ordering::Release);
						}
					}
					batch.clear();
					self.free_list.lock().unwrap().push(batch);
				}
				Ok(None) => done += 1,
				Err(_) => break,
			}
		}
		yield_err(self.first_error.lock().unwrap().take());
	}
}

/// Copies `row` (encoded against `child_labels`) into `union_labels`' order:
/// for each union label, finds the same-named child label and copies that
/// cell, else writes MISSING (§4.4 `union-all`).
fn remap_labels(union_labels: &Labels, child_labels: &Labels, row: &Vals) -> Vals {
	let mut out = Vec::with_capacity(union_labels.0.len());
	for name in &union_labels.0 {
		let idx = child_labels.index_of(name);
		let cell = if idx >= 0 {
			row.get(idx as usize).cloned().unwrap_or_else(Val::missing)
		} else {
			Val::missing()
		};
		out.push(cell);
	}
	Vals(out)
}

/// Builds the `union-all` operator (§4.4): each child becomes one staging
/// actor, remapped into the union's label order before batching.
pub fn build_union_all(union_labels: Labels, children: Vec<(Labels, Exec)>) -> Exec {
	Arc::new(move |ctx: &ExecutionContext, yield_vals: &mut YieldVals, yield_err: &mut YieldErr| {
		let stage = Stage::with_default_capacity();
		for (child_labels, child_exec) in &children {
			let union_labels = union_labels.clone();
			let child_labels = child_labels.clone();
			let child_exec = child_exec.clone();
			let remapped: Exec = Arc::new(move |ctx: &ExecutionContext, yv: &mut YieldVals, ye: &mut YieldErr| {
				let mut wrap = |row: &Vals| -> bool { yv(&remap_labels(&union_labels, &child_labels, row)) };
				child_exec(ctx, &mut wrap, ye);
			});
			stage.start_actor(ctx.clone(), remapped, cnf::DEFAULT_BATCH_SIZE);
		}
		stage.wait_for_actors(yield_vals, yield_err);
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::value::Val;

	fn literal_exec(rows: Vec<Vals>) -> Exec {
		Arc::new(move |_ctx, yield_vals: &mut YieldVals, yield_err: &mut YieldErr| {
			for row in &rows {
				if !yield_vals(row) {
					break;
				}
			}
			yield_err(None);
		})
	}

	#[test]
	fn staging_forwards_all_rows_and_reports_no_error() {
		let stage = Stage::with_default_capacity();
		let ctx = ExecutionContext::background();
		stage.start_actor(ctx.clone(), literal_exec(vec![Vals(vec![Val::from_json_bytes("1")])]), 1);
		stage.start_actor(ctx.clone(), literal_exec(vec![Vals(vec![Val::from_json_bytes("2")])]), 1);
		let mut rows = Vec::new();
		let mut yv = |row: &Vals| -> bool {
			rows.push(row.clone());
			true
		};
		let mut err = None;
		let mut ye = |e: Option<Error>| err = e;
		stage.wait_for_actors(&mut yv, &mut ye);
		assert!(err.is_none());
		assert_eq!(rows.len(), 2);
	}

	#[test]
	fn union_all_remaps_missing_columns() {
		let union_labels = Labels::new(vec!["a".into(), "b".into()]);
		let left_labels = Labels::new(vec!["a".into()]);
		let right_labels = Labels::new(vec!["b".into()]);
		let left = literal_exec(vec![Vals(vec![Val::from_json_bytes("1")])]);
		let right = literal_exec(vec![Vals(vec![Val::from_json_bytes("2")])]);
		let union = build_union_all(union_labels, vec![(left_labels, left), (right_labels, right)]);
		let ctx = ExecutionContext::background();
		let mut rows = Vec::new();
		let mut yv = |row: &Vals| -> bool {
			rows.push(row.clone());
			true
		};
		let mut err = None;
		let mut ye = |e: Option<Error>| err = e;
		union(&ctx, &mut yv, &mut ye);
		assert!(err.is_none());
		assert_eq!(rows.len(), 2);
		rows.sort_by_key(|r| r.0[0].is_missing());
		assert!(rows.iter().any(|r| r.0[0] == Val::from_json_bytes("1") && r.0[1].is_missing()));
		assert!(rows.iter().any(|r| r.0[0].is_missing() && r.0[1] == Val::from_json_bytes("2")));
	}
}
