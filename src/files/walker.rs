//! Streaming project scanner. A blocking walk feeds a bounded channel;
//! consumers pull `(relative_path, stat)` pairs lazily.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use ignore::WalkBuilder;
use tracing::{debug, warn};

use super::ignore::IgnoreFilter;
use super::store::FileStat;

#[derive(Debug, Clone)]
pub struct ScanEntry {
    pub rel_path: String,
    pub stat: FileStat,
}

pub struct FileWalker {
    root: PathBuf,
    filter: Arc<IgnoreFilter>,
}

impl FileWalker {
    pub fn new(root: PathBuf, filter: IgnoreFilter) -> Self {
        FileWalker {
            root,
            filter: Arc::new(filter),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Start a scan. When `watermark_ms` is set, entries whose mtime is
    /// at or below it are counted but not yielded; a full scan yields
    /// everything. Per-entry failures are logged and elided.
    pub fn scan(&self, watermark_ms: Option<i64>) -> ScanStream {
        let (tx, rx) = flume::bounded(256);
        let seen = Arc::new(AtomicU64::new(0));

        let root = self.root.clone();
        let filter = self.filter.clone();
        let seen_counter = seen.clone();

        tokio::task::spawn_blocking(move || {
            let walk_root = root.clone();
            let walk_filter = filter.clone();
            let walker = WalkBuilder::new(&root)
                .standard_filters(false)
                .follow_links(false)
                .filter_entry(move |entry| {
                    if entry.depth() == 0 {
                        return true;
                    }
                    let Some(rel) = to_rel_posix(entry.path(), &walk_root) else {
                        return false;
                    };
                    let is_dir = entry.file_type().map_or(false, |t| t.is_dir());
                    !walk_filter.is_ignored(&rel, is_dir)
                })
                .build();

            for entry in walker {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(err) => {
                        debug!(%err, "skipping unreadable scan entry");
                        continue;
                    }
                };
                if !entry.file_type().map_or(false, |t| t.is_file()) {
                    continue;
                }
                let Some(rel_path) = to_rel_posix(entry.path(), &root) else {
                    continue;
                };
                let meta = match entry.metadata() {
                    Ok(meta) => meta,
                    Err(err) => {
                        warn!(%rel_path, %err, "cannot stat file; skipping");
                        continue;
                    }
                };
                let stat = FileStat::from_metadata(&meta);

                seen_counter.fetch_add(1, Ordering::Relaxed);

                if let Some(watermark) = watermark_ms {
                    if stat.modified_ms <= watermark {
                        continue;
                    }
                }

                if tx.send(ScanEntry { rel_path, stat }).is_err() {
                    // consumer went away; stop walking
                    break;
                }
            }
        });

        ScanStream {
            rx: rx.into_stream(),
            seen,
        }
    }
}

pub struct ScanStream {
    rx: flume::r#async::RecvStream<'static, ScanEntry>,
    seen: Arc<AtomicU64>,
}

impl ScanStream {
    pub async fn next(&mut self) -> Option<ScanEntry> {
        self.rx.next().await
    }

    /// Files enumerated so far, including ones suppressed by the
    /// watermark. Stable only after the stream is drained.
    pub fn files_seen(&self) -> u64 {
        self.seen.load(Ordering::Relaxed)
    }
}

fn to_rel_posix(path: &Path, root: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let joined = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    (!joined.is_empty()).then_some(joined)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(dir: &Path) -> FileWalker {
        let filter = IgnoreFilter::build(dir).unwrap();
        FileWalker::new(dir.to_path_buf(), filter)
    }

    async fn drain(mut stream: ScanStream) -> (Vec<String>, u64) {
        let mut paths = Vec::new();
        while let Some(entry) = stream.next().await {
            paths.push(entry.rel_path);
        }
        paths.sort();
        let seen = stream.files_seen();
        (paths, seen)
    }

    #[tokio::test]
    async fn walks_nested_files_and_skips_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("notes/deep")).unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join("top.md"), "a").unwrap();
        std::fs::write(dir.path().join("notes/deep/leaf.md"), "b").unwrap();
        std::fs::write(dir.path().join("notes/scratch.tmp"), "c").unwrap();
        std::fs::write(dir.path().join(".git/HEAD"), "d").unwrap();

        let (paths, seen) = drain(setup(dir.path()).scan(None)).await;
        assert_eq!(paths, vec!["notes/deep/leaf.md", "top.md"]);
        assert_eq!(seen, 2);
    }

    #[tokio::test]
    async fn watermark_suppresses_but_still_counts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("old.md"), "a").unwrap();

        let far_future = chrono::Utc::now().timestamp_millis() + 60_000;
        let (paths, seen) = drain(setup(dir.path()).scan(Some(far_future))).await;
        assert!(paths.is_empty());
        assert_eq!(seen, 1);
    }

    #[tokio::test]
    async fn full_scan_yields_stat_info() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "hello").unwrap();

        let mut stream = setup(dir.path()).scan(None);
        let entry = stream.next().await.unwrap();
        assert_eq!(entry.rel_path, "a.md");
        assert_eq!(entry.stat.len, 5);
        assert!(entry.stat.modified_ms > 0);
    }
}
