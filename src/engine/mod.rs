//! The appointment lifecycle engine: status transitions and the resolution
//! of loosely-shaped booking input into canonical records.

pub mod lifecycle;
pub mod resolve;

pub use lifecycle::LifecycleError;
pub use resolve::ResolveError;
