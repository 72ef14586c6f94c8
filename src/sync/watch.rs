//! Debounced filesystem watching: turn bursts of editor events into
//! sync passes.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use notify_debouncer_mini::notify::{RecursiveMode, Watcher};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, DebouncedEvent};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{CoreError, Result};

use super::service::SyncService;

const RECENT_EVENTS_KEPT: usize = 100;

#[derive(Debug, Clone, Serialize)]
pub struct WatchEvent {
    pub timestamp: DateTime<Utc>,
    pub action: &'static str,
    pub total_changes: usize,
    pub error: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct WatchState {
    pub running: bool,
    pub error_count: u64,
    pub synced_files: u64,
    pub last_scan: Option<DateTime<Utc>>,
    pub recent_events: VecDeque<WatchEvent>,
}

impl WatchState {
    fn record(&mut self, action: &'static str, total_changes: usize, error: Option<String>) {
        if error.is_some() {
            self.error_count += 1;
        }
        self.recent_events.push_front(WatchEvent {
            timestamp: Utc::now(),
            action,
            total_changes,
            error,
        });
        self.recent_events.truncate(RECENT_EVENTS_KEPT);
    }
}

pub struct WatchService {
    sync: Arc<SyncService>,
    root: PathBuf,
    debounce: Duration,
    state: tokio::sync::Mutex<WatchState>,
}

impl WatchService {
    pub fn new(sync: Arc<SyncService>, debounce: Duration) -> Self {
        let root = sync.context().root.clone();
        WatchService {
            sync,
            root,
            debounce,
            state: tokio::sync::Mutex::new(WatchState::default()),
        }
    }

    /// Watch until the process is stopped. Each debounced batch of
    /// events drives one sync pass.
    pub async fn run(&self) -> Result<()> {
        let (tx, rx) = flume::unbounded();

        let mut debouncer = new_debouncer(self.debounce, move |result: DebounceEventResult| {
            let _ = tx.send(result);
        })
        .map_err(|e| CoreError::fatal(format!("cannot start file watcher: {e}")))?;

        debouncer
            .watcher()
            .watch(&self.root, RecursiveMode::Recursive)
            .map_err(|e| {
                CoreError::fatal(format!("cannot watch {}: {e}", self.root.display()))
            })?;

        info!(root = %self.root.display(), debounce_ms = self.debounce.as_millis() as u64, "watch service started");
        self.state.lock().await.running = true;

        let mut stream = rx.into_stream();
        while let Some(result) = stream.next().await {
            match result {
                Ok(events) => self.handle_events(events).await,
                Err(errors) => {
                    warn!(?errors, "watcher reported errors");
                    self.state
                        .lock()
                        .await
                        .record("watch", 0, Some(format!("{errors:?}")));
                }
            }
        }

        self.state.lock().await.running = false;
        info!("watch service stopped");
        Ok(())
    }

    async fn handle_events(&self, events: Vec<DebouncedEvent>) {
        // a vanished event path suggests a rename or delete, which a
        // watermark-limited scan cannot see
        let force_full = events.iter().any(|event| !event.path.exists());
        debug!(events = events.len(), force_full, "filesystem activity");

        match self.sync.sync(force_full).await {
            Ok(report) => {
                let mut state = self.state.lock().await;
                state.synced_files += (report.new.len() + report.modified.len()) as u64;
                state.last_scan = Some(Utc::now());
                state.record("sync", report.total, None);
            }
            Err(err) => {
                warn!(%err, "sync triggered by watcher failed");
                self.state.lock().await.record("sync", 0, Some(err.to_string()));
            }
        }
    }

    pub async fn state_snapshot(&self) -> serde_json::Value {
        let state = self.state.lock().await;
        serde_json::to_value(&*state).unwrap_or(serde_json::Value::Null)
    }
}
