pub mod report;
pub mod service;
pub mod watch;

pub use report::{SkippedFile, SyncReport};
pub use service::{SyncOptions, SyncService};
pub use watch::WatchService;
