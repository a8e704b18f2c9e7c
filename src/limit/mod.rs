//! Rate limiting engine and progressive lockout.

mod engine;
mod lockout;

pub use engine::{BlockRecord, RateLimitEngine};
pub use lockout::{LockoutState, ProgressiveLockout};
