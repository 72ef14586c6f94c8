pub mod ignore;
pub mod store;
pub mod walker;

pub use self::ignore::IgnoreFilter;
pub use store::{checksum_bytes, FileStat, FileStore, LocalFileStore};
pub use walker::{FileWalker, ScanEntry, ScanStream};
