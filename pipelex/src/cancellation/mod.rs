//! Cooperative cancellation for pipeline runs.
//!
//! Every run owns one [`CancellationToken`]. The engine checks it before each
//! pipe dispatch and races it against handler futures; handlers can poll it
//! through their bindings.

mod token;

pub use token::CancellationToken;
