//! Evaluation-context engine.
//!
//! Covers the session-scoped event bus, per-context serialized execution,
//! and the manager that routes requests to contexts.

pub mod bus;
pub mod context;
pub mod manager;

pub use bus::{EventBus, Subscription, SubscriptionId};
pub use context::{AbortReason, EvaluationContext, SubmitOutcome};
pub use manager::{EvaluationContextManager, DEFAULT_ABORT_GRACE};
