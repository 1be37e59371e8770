// ABOUTME: Persistence and publication layer for pagesnap.
// ABOUTME: Provides SQLite storage, snapshot activation and retention, lookups, and batch processors.

pub mod activator;
pub mod error;
pub mod interactor;
pub mod lookup;
pub mod notify;
pub mod processor;
pub mod retention;
pub mod sqlite;
pub mod store;
pub mod transformer;

pub use activator::{ActivationError, activate, activate_in};
pub use error::StoreError;
pub use interactor::{ContainerSpec, InteractorError, PositionUpdate};
pub use lookup::{LookupError, find_active};
pub use notify::{ChannelNotifier, Notifier, SnapshotWorker, WorkerError, WorkerSummary};
pub use processor::{BatchReport, CancelToken, ProcessError, SnapshotProcessor};
pub use retention::{RetentionError, cleanup, keep_count};
pub use sqlite::{Database, SqliteUnit};
pub use store::{BlockStore, PageFilter, PageStore, SiteStore, SnapshotStore, Storage, UnitOfWork};
pub use transformer::{BlockCache, TransformError};
