//! Convergence machinery: the reconciler merges, the poll loop and the
//! per-job event streams feed it, and the engine owns all of them.

pub mod engine;
pub mod poll;
pub mod reconciler;
pub mod subscriptions;

pub use engine::{SyncEngine, SyncEngineBuilder};
pub use poll::{ListHealth, PollLoop};
pub use reconciler::{EventOutcome, MergeSummary, Reconciler};
pub use subscriptions::{
    ExitReason, SubscriptionDelta, SubscriptionExit, SubscriptionHandle, SubscriptionKey,
    SubscriptionManager,
};
