#[macro_use]
extern crate tracing;

#[macro_use]
mod mac;

pub mod cnf;
pub mod ctx;
pub mod err;
pub mod expr;
pub mod heap;
pub mod op;
pub mod plan;
pub mod stage;
pub mod value;

mod exe;

pub use err::{Error, Result};

#[doc(hidden)]
/// Bounded/unbounded channels used by the staging pipeline (§4.4).
pub mod channel {
	pub use channel::bounded;
	pub use channel::unbounded;
	pub use channel::Receiver;
	pub use channel::Sender;
}
