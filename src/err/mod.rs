//! Crate-wide error taxonomy (§4.8/§7).
//!
//! One `thiserror`-derived enum, in the style of the teacher's `crate::err`:
//! every fallible operator/component returns `Result<T, Error>`, variants
//! carry just enough context to log usefully, and conversions from the
//! library errors we actually bottom out in (`std::io::Error`,
//! `serde_json::Error`) are derived rather than hand-rolled.
use std::fmt;

/// Alias used throughout the crate instead of spelling out `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
	/// The plan or an expression within it was malformed.
	#[error("invalid plan input: {0}")]
	InputError(String),

	/// A catalog key or frame configuration this engine does not implement.
	#[error("unsupported feature: {0}")]
	UnsupportedFeature(String),

	/// Spill, temp-file, or allocation failure in the external heap.
	#[error("resource error: {0}")]
	ResourceError(String),

	/// Canonical-JSON or numeric parse failure where a value was required.
	#[error("evaluation error: {0}")]
	EvaluationError(String),

	/// Observed the stage's stop signal after a sibling actor failed.
	#[error("execution cancelled")]
	Cancelled,

	/// An expression catalog key has no registered factory.
	#[error("unknown expression key: {0}")]
	UnknownExpressionKey(String),

	/// A probe-map chain record was truncated or pointed out of bounds.
	#[error("corrupt probe chain at offset {offset}: {reason}")]
	CorruptChain {
		offset: u64,
		reason: &'static str,
	},

	/// An unexpected internal invariant was violated. Analogous to the
	/// teacher's `Error::Unreachable`, used instead of `unwrap()`/`panic!`
	/// so that a broken invariant surfaces through the normal error path.
	#[error("unreachable: {0}")]
	Unreachable(&'static str),

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

impl fmt::Display for ErrorKindTag {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{:?}", self)
	}
}

/// Coarse classification mirroring the five semantic categories in §7,
/// useful for callers that want to branch on error *kind* without matching
/// every variant (e.g. deciding whether a failure is retryable).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKindTag {
	Input,
	Unsupported,
	Resource,
	Evaluation,
	Cancelled,
}

impl Error {
	pub fn kind(&self) -> ErrorKindTag {
		match self {
			Error::InputError(_) | Error::UnknownExpressionKey(_) | Error::Unreachable(_) => {
				ErrorKindTag::Input
			}
			Error::UnsupportedFeature(_) => ErrorKindTag::Unsupported,
			Error::ResourceError(_) | Error::Io(_) | Error::CorruptChain {
				..
			} => ErrorKindTag::Resource,
			Error::EvaluationError(_) | Error::Json(_) => ErrorKindTag::Evaluation,
			Error::Cancelled => ErrorKindTag::Cancelled,
		}
	}
}
