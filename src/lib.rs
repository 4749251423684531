//! Evaluation engine for Switchover feature toggles.
//!
//! A [Client] loads the toggle payload through a [Fetcher], keeps it in a [Cache] and answers
//! toggle lookups with the caller's default whenever something goes wrong. The pieces it is built
//! from ([Evaluator], [OperatorSet], [RolloutBucketer]) can also be used directly against a toggle
//! list.

mod attribute_value;
mod cache;
mod client;
mod context;
mod eval;
mod fetch;
mod flag_value;
mod operator;
mod rollout;
mod test_common;
mod toggle;
mod util;

pub use attribute_value::*;
pub use cache::*;
pub use client::*;
pub use context::*;
pub use eval::*;
pub use fetch::*;
pub use flag_value::*;
pub use operator::*;
pub use rollout::*;
pub use toggle::*;
