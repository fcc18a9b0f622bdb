//! Job record store and its change notifications.

pub mod change;
pub mod job_store;

pub use change::{ChangeBroadcaster, ChangeKind, StoreChange};
pub use job_store::{JobStore, StatusCounts};
