//! The window-frame iterator (§4.7): computes, for a position within a
//! partition, the visible row range and any excluded subspans, then walks
//! forward/backward across it.
//!
//! Not a plan operator (§4.1 lists no `window` operator kind) — this is a
//! standalone component a future windowing operator would drive, bound to
//! a partition held in an [`crate::heap::ExternalHeap`]. The teacher has no
//! component that computes frame boundaries like this one; this module
//! follows the general shape of its `dbs/iterator.rs` (iteration state kept
//! separate from the collection it walks) rather than any specific frame
//! math it contains.
use crate::ctx::TempResource;
use crate::err::{Error, Result};
use crate::value::{vals_decode, Vals};
use std::sync::{Arc, Mutex};

/// `BegBoundary` (§4.7): `UnboundedPreceding` is `0`; `Num(offset)` is only
/// valid in [`FrameMode::Rows`].
#[derive(Clone, Copy, Debug)]
pub enum BegBoundary {
	UnboundedPreceding,
	Num(i64),
}

/// `EndBoundary` (§4.7): `UnboundedFollowing` is the partition length;
/// `Num(offset)` is only valid in [`FrameMode::Rows`].
#[derive(Clone, Copy, Debug)]
pub enum EndBoundary {
	UnboundedFollowing,
	Num(i64),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameMode {
	Rows,
	Range,
	Groups,
}

/// `Excludes` configuration (§4.7). `Group`/`Ties` are declared but not
/// implemented; selecting either raises [`Error::UnsupportedFeature`] at
/// [`WindowFrame::new`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExcludeMode {
	NoOthers,
	CurrentRow,
	Group,
	Ties,
}

/// A window partition: rows materialized in an external heap, read back by
/// position as the frame iterates.
pub struct Partition {
	heap: Arc<Mutex<crate::heap::ExternalHeap>>,
}

impl Partition {
	pub fn new(heap: Arc<Mutex<crate::heap::ExternalHeap>>) -> Self {
		Self {
			heap,
		}
	}

	pub fn from_temp_resource(resource: &TempResource) -> Option<Self> {
		resource.as_heap().map(Self::new)
	}

	pub fn len(&self) -> usize {
		self.heap.lock().unwrap().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn row_at(&self, i: i64) -> Result<Vals> {
		let bytes = self.heap.lock().unwrap().get(i as u64)?;
		vals_decode(&bytes)
	}
}

/// A configured, reusable window frame (§4.7). `new` is the fatal-at-
/// configuration-time point (§7): an unsupported mode/boundary/exclude
/// combination errors immediately rather than on first use.
pub struct WindowFrame {
	mode: FrameMode,
	beg: BegBoundary,
	end: EndBoundary,
	exclude: ExcludeMode,
	pos: i64,
	include: (i64, i64),
	excludes: Vec<(i64, i64)>,
}

impl WindowFrame {
	pub fn new(mode: FrameMode, beg: BegBoundary, end: EndBoundary, exclude: ExcludeMode) -> Result<Self> {
		if mode != FrameMode::Rows {
			if matches!(beg, BegBoundary::Num(_)) || matches!(end, EndBoundary::Num(_)) {
				return Err(Error::UnsupportedFeature(format!("{mode:?} frame with a NUM boundary")));
			}
		}
		if matches!(exclude, ExcludeMode::Group | ExcludeMode::Ties) {
			return Err(Error::UnsupportedFeature(format!("{exclude:?} exclude mode")));
		}
		Ok(Self {
			mode,
			beg,
			end,
			exclude,
			pos: -1,
			include: (0, 0),
			excludes: Vec::new(),
		})
	}

	/// Resets the frame for a new partition (§4.7 `partition_start`).
	pub fn partition_start(&mut self) {
		self.pos = -1;
		self.include = (0, 0);
		self.excludes.clear();
	}

	/// Recomputes `Include`/`Excludes` for `pos` within `partition_len`
	/// (§4.7 `current_update`).
	pub fn current_update(&mut self, pos: i64, partition_len: i64) {
		self.pos = pos;
		let beg = match self.beg {
			BegBoundary::UnboundedPreceding => 0,
			BegBoundary::Num(offset) => (pos + offset).max(0),
		};
		let end = match self.end {
			EndBoundary::UnboundedFollowing => partition_len,
			EndBoundary::Num(offset) => (pos + offset + 1).min(partition_len),
		};
		self.include = (beg, end);
		self.excludes = match self.exclude {
			ExcludeMode::NoOthers => Vec::new(),
			ExcludeMode::CurrentRow => vec![(pos, pos + 1)],
			ExcludeMode::Group | ExcludeMode::Ties => unreachable!("rejected at WindowFrame::new"),
		};
	}

	pub fn include(&self) -> (i64, i64) {
		self.include
	}

	pub fn excludes(&self) -> &[(i64, i64)] {
		&self.excludes
	}

	/// `next(i)` (§4.7): advances past `i`, clamping into `Include` and
	/// jumping over any exclude span it lands inside.
	pub fn next(&self, i: i64) -> (i64, bool) {
		let (beg, end) = self.include;
		let mut i = if i < beg {
			beg
		} else {
			i + 1
		};
		for &(s, e) in &self.excludes {
			if i >= s && i < e {
				i = e;
			}
		}
		(i, i < end)
	}

	/// `prev(i)` (§4.7): the symmetric reverse of [`Self::next`].
	pub fn prev(&self, i: i64) -> (i64, bool) {
		let (beg, end) = self.include;
		let mut i = if i > end - 1 {
			end - 1
		} else {
			i - 1
		};
		for &(s, e) in self.excludes.iter().rev() {
			if i >= s && i < e {
				i = s - 1;
			}
		}
		(i, i >= beg)
	}

	/// `count` (§4.7): `(End - Beg)` minus the overlap of every exclude span
	/// with `[Beg, End)`.
	pub fn count(&self) -> i64 {
		let (beg, end) = self.include;
		let total = (end - beg).max(0);
		let excluded: i64 = self
			.excludes
			.iter()
			.map(|&(s, e)| (e.min(end) - s.max(beg)).max(0))
			.sum();
		total - excluded
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn range_or_groups_with_num_boundary_is_unsupported() {
		assert!(WindowFrame::new(FrameMode::Range, BegBoundary::Num(-1), EndBoundary::UnboundedFollowing, ExcludeMode::NoOthers).is_err());
		assert!(WindowFrame::new(FrameMode::Groups, BegBoundary::UnboundedPreceding, EndBoundary::Num(1), ExcludeMode::NoOthers).is_err());
	}

	#[test]
	fn group_and_ties_excludes_are_unsupported() {
		assert!(WindowFrame::new(FrameMode::Rows, BegBoundary::UnboundedPreceding, EndBoundary::UnboundedFollowing, ExcludeMode::Group).is_err());
		assert!(WindowFrame::new(FrameMode::Rows, BegBoundary::UnboundedPreceding, EndBoundary::UnboundedFollowing, ExcludeMode::Ties).is_err());
	}

	#[test]
	fn window_frame_rows_scenario_from_spec() {
		// Scenario 6 (§8): partition of 5, Beg=NUM(-1), End=NUM(+1), exclude
		// CURRENT-ROW, at position 2.
		let mut frame =
			WindowFrame::new(FrameMode::Rows, BegBoundary::Num(-1), EndBoundary::Num(1), ExcludeMode::CurrentRow).unwrap();
		frame.partition_start();
		frame.current_update(2, 5);
		assert_eq!(frame.include(), (1, 4));
		assert_eq!(frame.excludes(), &[(2, 3)]);
		assert_eq!(frame.count(), 2);

		let mut visited = Vec::new();
		let (mut i, mut ok) = frame.next(frame.include().0 - 1);
		while ok {
			visited.push(i);
			let step = frame.next(i);
			i = step.0;
			ok = step.1;
		}
		assert_eq!(visited, vec![1, 3]);

		let mut visited_rev = Vec::new();
		let (mut i, mut ok) = frame.prev(frame.include().1);
		while ok {
			visited_rev.push(i);
			let step = frame.prev(i);
			i = step.0;
			ok = step.1;
		}
		assert_eq!(visited_rev, vec![3, 1]);
	}
}
