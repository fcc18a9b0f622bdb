pub mod config;
pub mod error;
pub mod model;
pub mod store;
pub mod sync;
pub mod transport;

pub use config::{load_config, resolve_config, SyncConfig};
pub use error::{ConfigError, Result, SyncError};
pub use model::{
    EventKind, FileType, JobRecord, JobStatus, LifecycleEvent, Snapshot, StatusCategory,
    UploadFile,
};
pub use store::{JobStore, StatusCounts, StoreChange};
pub use sync::{ListHealth, Reconciler, SubscriptionManager, SyncEngine};
pub use transport::{
    EventStream, EventSubscriber, HttpTransport, InMemoryTransport, JobSubmitter, SnapshotFetcher,
};
