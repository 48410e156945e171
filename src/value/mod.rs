//! The value model (§3): `Val`/`Vals`/`Labels`, tagged sentinels, and the
//! binary framing used to push rows through channels and heaps.
//!
//! Grounded on the teacher's `sql::value::Value`/`sql::array::Array` split
//! between a single scalar type and an ordered collection of them, but
//! reduced to the byte-encoded representation this spec calls for: a `Val`
//! is a tagged byte buffer, not a parsed in-memory tree, so that operators
//! can move rows without paying parse cost until an expression actually
//! inspects their contents.
pub mod comparer;

use crate::err::{Error, Result};
use bytes::Bytes;
use std::fmt;

/// Tag byte identifying what a [`Val`]'s buffer holds. The first byte of
/// every encoded `Val` is one of these; `Json` is the only tag followed by a
/// payload, so no real encoded value can collide with a sentinel.
mod tag {
	pub const MISSING: u8 = 0;
	pub const NULL: u8 = 1;
	pub const FALSE: u8 = 2;
	pub const TRUE: u8 = 3;
	pub const JSON: u8 = 4;
}

/// A byte-encoded scalar or composite value (§3).
///
/// The three sentinels (MISSING, NULL, TRUE/FALSE) are single-byte buffers;
/// everything else is a `JSON` tag byte followed by canonical-ish JSON text.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Val(Bytes);

impl fmt::Debug for Val {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self.0.first().copied() {
			Some(tag::MISSING) => write!(f, "Val::MISSING"),
			Some(tag::NULL) => write!(f, "Val::NULL"),
			Some(tag::FALSE) => write!(f, "Val::FALSE"),
			Some(tag::TRUE) => write!(f, "Val::TRUE"),
			_ => write!(f, "Val::Json({})", String::from_utf8_lossy(&self.0[1..])),
		}
	}
}

impl Val {
	pub const MISSING: &'static [u8] = &[tag::MISSING];
	pub const NULL_BYTES: &'static [u8] = &[tag::NULL];

	pub fn missing() -> Self {
		Self(Bytes::from_static(&[tag::MISSING]))
	}

	pub fn null() -> Self {
		Self(Bytes::from_static(&[tag::NULL]))
	}

	pub fn bool(b: bool) -> Self {
		Self(Bytes::from_static(if b {
			&[tag::TRUE]
		} else {
			&[tag::FALSE]
		}))
	}

	/// Wraps raw JSON text (e.g. the literal bytes of a `json(s)` expression
	/// parameter, or a serialized `serde_json::Value`) as an encoded `Val`.
	pub fn from_json_bytes(json: impl Into<Vec<u8>>) -> Self {
		let mut buf = vec![tag::JSON];
		buf.extend(json.into());
		Self(Bytes::from(buf))
	}

	pub fn from_json(v: &serde_json::Value) -> Result<Self> {
		let mut buf = vec![tag::JSON];
		serde_json::to_writer(&mut buf, v)?;
		Ok(Self(Bytes::from(buf)))
	}

	pub fn is_missing(&self) -> bool {
		self.0.first() == Some(&tag::MISSING)
	}

	pub fn is_null(&self) -> bool {
		self.0.first() == Some(&tag::NULL)
	}

	/// "Has value" means "not MISSING and not NULL" (§3).
	pub fn has_value(&self) -> bool {
		!self.is_missing() && !self.is_null()
	}

	pub fn is_true(&self) -> bool {
		self.0.first() == Some(&tag::TRUE)
	}

	pub fn is_false(&self) -> bool {
		self.0.first() == Some(&tag::FALSE)
	}

	/// The raw JSON payload, if this `Val` carries one (i.e. it is not a
	/// sentinel).
	pub fn json_bytes(&self) -> Option<&[u8]> {
		match self.0.first() {
			Some(&tag::JSON) => Some(&self.0[1..]),
			_ => None,
		}
	}

	pub fn to_json(&self) -> Result<serde_json::Value> {
		match self.json_bytes() {
			Some(b) => Ok(serde_json::from_slice(b)?),
			None if self.is_null() => Ok(serde_json::Value::Null),
			None => Ok(serde_json::Value::Null),
		}
	}

	pub fn as_bytes(&self) -> &[u8] {
		&self.0
	}

	pub fn from_bytes(b: Bytes) -> Self {
		Self(b)
	}
}

/// An ordered sequence of [`Val`], positionally aligned with a row's labels
/// (§3).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Vals(pub Vec<Val>);

impl Vals {
	pub fn new(vals: Vec<Val>) -> Self {
		Self(vals)
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn get(&self, idx: usize) -> Option<&Val> {
		self.0.get(idx)
	}

	/// Concatenates two rows, used by nested-loop and hash joins to build
	/// the outer‖inner output row.
	pub fn concat(&self, other: &Vals) -> Vals {
		let mut v = Vec::with_capacity(self.0.len() + other.0.len());
		v.extend_from_slice(&self.0);
		v.extend_from_slice(&other.0);
		Vals(v)
	}

	/// A row of the given width, every cell MISSING. Used by outer-left join
	/// and except-flush to pad the absent side.
	pub fn all_missing(width: usize) -> Vals {
		Vals((0..width).map(|_| Val::missing()).collect())
	}
}

/// An ordered sequence of column names (§3).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Labels(pub Vec<String>);

/// Sentinel returned by [`Labels::index_of`] when the name is absent.
pub const NOT_FOUND: i32 = -1;

impl Labels {
	pub fn new(names: Vec<String>) -> Self {
		Self(names)
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Returns the label's position, or [`NOT_FOUND`] if absent.
	pub fn index_of(&self, name: &str) -> i32 {
		self.0.iter().position(|n| n == name).map(|i| i as i32).unwrap_or(NOT_FOUND)
	}

	pub fn concat(&self, other: &Labels) -> Labels {
		let mut v = Vec::with_capacity(self.0.len() + other.0.len());
		v.extend_from_slice(&self.0);
		v.extend_from_slice(&other.0);
		Labels(v)
	}
}

// --- Binary framing (§8 round-trip properties) ---------------------------
//
// `vals_encode`/`vals_decode` are the wire format used by the staging
// pipeline's batches and the external heap's chunked store: a `u32`
// little-endian count, followed by each `Val` as a `u32` length prefix plus
// its raw bytes.

pub fn vals_encode(vals: &Vals) -> Vec<u8> {
	let mut buf = Vec::new();
	buf.extend_from_slice(&(vals.0.len() as u32).to_le_bytes());
	for v in &vals.0 {
		let b = v.as_bytes();
		buf.extend_from_slice(&(b.len() as u32).to_le_bytes());
		buf.extend_from_slice(b);
	}
	buf
}

pub fn vals_decode(buf: &[u8]) -> Result<Vals> {
	let (vals, rest) = vals_decode_prefix(buf)?;
	if !rest.is_empty() {
		return Err(Error::EvaluationError("trailing bytes after encoded row".into()));
	}
	Ok(vals)
}

fn vals_decode_prefix(buf: &[u8]) -> Result<(Vals, &[u8])> {
	if buf.len() < 4 {
		return Err(Error::EvaluationError("truncated row header".into()));
	}
	let count = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
	let mut pos = 4;
	let mut vals = Vec::with_capacity(count);
	for _ in 0..count {
		if buf.len() < pos + 4 {
			return Err(Error::EvaluationError("truncated val length".into()));
		}
		let len = u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap()) as usize;
		pos += 4;
		if buf.len() < pos + len {
			return Err(Error::EvaluationError("truncated val body".into()));
		}
		vals.push(Val::from_bytes(Bytes::copy_from_slice(&buf[pos..pos + len])));
		pos += len;
	}
	Ok((Vals(vals), &buf[pos..]))
}

/// Encodes a projected sort key alongside the original row it was computed
/// from (§4.5), so the order-by heap can persist a single blob per entry.
pub fn vals_projected_encode(key: &Vals, row: &Vals) -> Vec<u8> {
	let key_blob = vals_encode(key);
	let mut buf = Vec::with_capacity(4 + key_blob.len() + 64);
	buf.extend_from_slice(&(key_blob.len() as u32).to_le_bytes());
	buf.extend_from_slice(&key_blob);
	buf.extend_from_slice(&vals_encode(row));
	buf
}

pub fn vals_projected_decode_projected(buf: &[u8]) -> Result<Vals> {
	if buf.len() < 4 {
		return Err(Error::EvaluationError("truncated projected header".into()));
	}
	let key_len = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
	if buf.len() < 4 + key_len {
		return Err(Error::EvaluationError("truncated projected key".into()));
	}
	vals_decode(&buf[4..4 + key_len])
}

pub fn vals_projected_decode_vals(buf: &[u8]) -> Result<Vals> {
	if buf.len() < 4 {
		return Err(Error::EvaluationError("truncated projected header".into()));
	}
	let key_len = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
	if buf.len() < 4 + key_len {
		return Err(Error::EvaluationError("truncated projected key".into()));
	}
	vals_decode(&buf[4 + key_len..])
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn val_sentinels_round_trip() {
		assert!(Val::missing().is_missing());
		assert!(!Val::missing().has_value());
		assert!(Val::null().is_null());
		assert!(!Val::null().has_value());
		assert!(Val::bool(true).is_true());
		assert!(Val::bool(false).is_false());
		assert!(Val::from_json(&serde_json::json!(1)).unwrap().has_value());
	}

	#[test]
	fn vals_encode_decode_is_identity() {
		let vals = Vals(vec![Val::missing(), Val::null(), Val::bool(true), Val::from_json_bytes("1")]);
		let encoded = vals_encode(&vals);
		assert_eq!(vals_decode(&encoded).unwrap(), vals);
	}

	#[test]
	fn vals_projected_round_trip_recovers_both_halves() {
		let key = Vals(vec![Val::from_json_bytes("1")]);
		let row = Vals(vec![Val::from_json_bytes("\"x\""), Val::from_json_bytes("2")]);
		let blob = vals_projected_encode(&key, &row);
		assert_eq!(vals_projected_decode_projected(&blob).unwrap(), key);
		assert_eq!(vals_projected_decode_vals(&blob).unwrap(), row);
	}

	#[test]
	fn labels_index_of_missing_is_negative() {
		let labels = Labels::new(vec!["a".into(), "b".into()]);
		assert_eq!(labels.index_of("a"), 0);
		assert_eq!(labels.index_of("b"), 1);
		assert_eq!(labels.index_of("c"), NOT_FOUND);
	}
}
