//! Data model shared by the store, the reconciler and the transports.

pub mod event;
pub mod record;
pub mod snapshot;

pub use event::{EventKind, EventPayload, LifecycleEvent};
pub use record::{FileType, JobRecord, JobStatus, StatusCategory, CONNECTION_INTERRUPTED};
pub use snapshot::{Snapshot, UploadFile};
