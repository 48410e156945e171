//! Pluggable value comparison and canonical JSON (§4.2/§6).
//!
//! Grounded on the teacher's separation between a cheap type-classification
//! pass (`Parse`) and the actual comparison, which lets the expression
//! catalog's static-folding path (§4.2 "Static folding") parse a `json`
//! literal once at plan-build time and reuse the classification on every
//! row instead of re-parsing per call.
use crate::err::{Error, Result};
use crate::value::Val;
use std::cmp::Ordering;

/// Coarse type classification of a parsed value, used to pick a comparison
/// strategy (numeric fast path vs. typed byte comparison) without fully
/// decoding both operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValType {
	Missing,
	Null,
	Bool,
	Number,
	String,
	Array,
	Object,
}

/// `ParseTypeHasValue` (§6): MISSING/NULL carry no comparable value.
pub fn parse_type_has_value(t: ValType) -> bool {
	!matches!(t, ValType::Missing | ValType::Null)
}

/// `ParseTypeToValType` (§6) collapses a parsed JSON value to its
/// [`ValType`]. Kept as a free function (rather than a static table) since
/// the classification is already a single match in this representation.
pub fn parse_type_to_val_type(v: &serde_json::Value) -> ValType {
	match v {
		serde_json::Value::Null => ValType::Null,
		serde_json::Value::Bool(_) => ValType::Bool,
		serde_json::Value::Number(_) => ValType::Number,
		serde_json::Value::String(_) => ValType::String,
		serde_json::Value::Array(_) => ValType::Array,
		serde_json::Value::Object(_) => ValType::Object,
	}
}

/// `Parse` (§6): classifies a `Val`, returning its decoded JSON value (or
/// `None` for a sentinel with no value) alongside its [`ValType`].
pub fn parse(v: &Val) -> Result<(Option<serde_json::Value>, ValType)> {
	if v.is_missing() {
		return Ok((None, ValType::Missing));
	}
	if v.is_null() {
		return Ok((None, ValType::Null));
	}
	if v.is_true() {
		return Ok((Some(serde_json::Value::Bool(true)), ValType::Bool));
	}
	if v.is_false() {
		return Ok((Some(serde_json::Value::Bool(false)), ValType::Bool));
	}
	let json = v.to_json()?;
	let t = parse_type_to_val_type(&json);
	Ok((Some(json), t))
}

/// `ParseFloat64` (§6): the numeric fast path used by static folding.
pub fn parse_f64(v: &serde_json::Value) -> Option<f64> {
	v.as_f64()
}

/// Reusable scratch buffer threaded through [`Comparer::canonical_json`] so
/// repeated calls (e.g. once per probe-map key) don't reallocate.
#[derive(Default)]
pub struct Scratch(Vec<u8>);

impl Scratch {
	pub fn new() -> Self {
		Self::default()
	}
}

/// The value comparer (§6): `compare`, `compare_with_type`, and
/// `canonical_json`. Stateless beyond its scratch buffers, so a single
/// instance is shared read-only across an entire plan execution (it lives
/// on the [`crate::ctx::ExecutionContext`]).
#[derive(Default, Clone, Copy)]
pub struct Comparer;

impl Comparer {
	pub fn new() -> Self {
		Self
	}

	/// `Compare(a, b)` (§6): full comparison going through [`parse`] on both
	/// sides.
	pub fn compare(&self, a: &Val, b: &Val) -> Result<Ordering> {
		let (pa, ta) = parse(a)?;
		let (pb, tb) = parse(b)?;
		self.compare_with_type(pa.as_ref(), pb.as_ref(), ta, tb)
	}

	/// `CompareWithType(a, b, typeA, typeB, cookie)` (§6). The "cookie" of
	/// the distilled spec is the pre-parsed `Option<&serde_json::Value>` —
	/// passing it in lets static folding (§4.2) parse the literal side once
	/// and reuse it on every row instead of calling [`parse`] again.
	pub fn compare_with_type(
		&self,
		a: Option<&serde_json::Value>,
		b: Option<&serde_json::Value>,
		ta: ValType,
		tb: ValType,
	) -> Result<Ordering> {
		match (a, b) {
			(None, None) => Ok(Ordering::Equal),
			(None, Some(_)) => Ok(Ordering::Less),
			(Some(_), None) => Ok(Ordering::Greater),
			(Some(a), Some(b)) => {
				if ta == ValType::Number && tb == ValType::Number {
					let fa = parse_f64(a).ok_or_else(|| {
						Error::EvaluationError("non-finite number in comparison".into())
					})?;
					let fb = parse_f64(b).ok_or_else(|| {
						Error::EvaluationError("non-finite number in comparison".into())
					})?;
					return Ok(fa.partial_cmp(&fb).unwrap_or(Ordering::Equal));
				}
				Self::compare_typed_json(a, b)
			}
		}
	}

	fn compare_typed_json(a: &serde_json::Value, b: &serde_json::Value) -> Result<Ordering> {
		use serde_json::Value::*;
		match (a, b) {
			(Bool(a), Bool(b)) => Ok(a.cmp(b)),
			(String(a), String(b)) => Ok(a.cmp(b)),
			(Number(a), Number(b)) => {
				Ok(a.as_f64().unwrap_or(0.0).partial_cmp(&b.as_f64().unwrap_or(0.0)).unwrap_or(Ordering::Equal))
			}
			(Null, Null) => Ok(Ordering::Equal),
			(Array(a), Array(b)) => {
				for (ai, bi) in a.iter().zip(b.iter()) {
					let c = Self::compare_typed_json(ai, bi)?;
					if c != Ordering::Equal {
						return Ok(c);
					}
				}
				Ok(a.len().cmp(&b.len()))
			}
			// Cross-type or composite-object comparisons fall back to
			// comparing canonical encodings byte-for-byte, which at least
			// gives a total order stable enough for sorting/grouping.
			_ => {
				let ca = canonical_json_value(a)?;
				let cb = canonical_json_value(b)?;
				Ok(ca.cmp(&cb))
			}
		}
	}

	/// `CanonicalJSON(input, scratch)` (§4.2/§6): object keys sorted
	/// lexicographically, no insignificant whitespace, normalized numbers.
	/// `scratch` is cleared and reused to avoid an allocation per call.
	pub fn canonical_json(&self, input: &Val, scratch: &mut Scratch) -> Result<Vec<u8>> {
		scratch.0.clear();
		let json = input.to_json()?;
		let bytes = canonical_json_value(&json)?;
		scratch.0.extend_from_slice(&bytes);
		Ok(scratch.0.clone())
	}

	/// Canonical JSON of a full row, used as the set-operation key by
	/// `valsCanonical` (§4.2).
	pub fn canonical_json_vals(&self, vals: &crate::value::Vals) -> Result<Vec<u8>> {
		let arr: Vec<serde_json::Value> =
			vals.0.iter().map(|v| v.to_json()).collect::<Result<_>>()?;
		canonical_json_value(&serde_json::Value::Array(arr))
	}
}

/// Rewrites a JSON value into canonical form. Relies on `serde_json`'s
/// default `Map` (a `BTreeMap` as long as the `preserve_order` feature is
/// not enabled) to get lexicographically sorted object keys for free, then
/// re-serializes every number through `serde_json::Number` so that e.g.
/// `1.0` and `1` normalize to the same representation whenever they parse
/// to the same `f64`.
fn canonical_json_value(v: &serde_json::Value) -> Result<Vec<u8>> {
	let normalized = normalize_numbers(v);
	Ok(serde_json::to_vec(&normalized)?)
}

fn normalize_numbers(v: &serde_json::Value) -> serde_json::Value {
	match v {
		serde_json::Value::Number(n) => {
			if let Some(i) = n.as_i64() {
				serde_json::Value::Number(i.into())
			} else if let Some(f) = n.as_f64() {
				serde_json::Number::from_f64(f)
					.map(serde_json::Value::Number)
					.unwrap_or(serde_json::Value::Null)
			} else {
				v.clone()
			}
		}
		serde_json::Value::Array(a) => serde_json::Value::Array(a.iter().map(normalize_numbers).collect()),
		serde_json::Value::Object(o) => {
			let mut m = serde_json::Map::new();
			for (k, v) in o {
				m.insert(k.clone(), normalize_numbers(v));
			}
			serde_json::Value::Object(m)
		}
		other => other.clone(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::value::Val;

	#[test]
	fn numbers_compare_as_floats() {
		let cmp = Comparer::new();
		let a = Val::from_json_bytes("1");
		let b = Val::from_json_bytes("2.0");
		assert_eq!(cmp.compare(&a, &b).unwrap(), Ordering::Less);
	}

	#[test]
	fn missing_or_null_has_no_value() {
		let cmp = Comparer::new();
		let a = Val::missing();
		let b = Val::from_json_bytes("1");
		// Both None on the left means comparisons here are purely ordering
		// infrastructure; callers check `has_value()` to decide whether to
		// propagate MISSING/NULL instead of comparing (§4.2).
		assert_eq!(cmp.compare(&a, &b).unwrap(), Ordering::Less);
	}

	#[test]
	fn canonical_json_sorts_object_keys_and_normalizes_numbers() {
		let cmp = Comparer::new();
		let mut scratch = Scratch::new();
		let a = Val::from_json_bytes(r#"{"b":1.0,"a":2}"#);
		let b = Val::from_json_bytes(r#"{"a":2,"b":1}"#);
		assert_eq!(
			cmp.canonical_json(&a, &mut scratch).unwrap(),
			cmp.canonical_json(&b, &mut scratch).unwrap()
		);
	}
}
