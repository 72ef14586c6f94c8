use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::sync::SyncOptions;

#[derive(Serialize, Deserialize, Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Configuration {
    /// Project directory to sync
    #[clap(long, default_value = ".")]
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Directory for all persistent state (databases, logs)
    #[clap(long, default_value_os_t = default_index_dir())]
    #[serde(default = "default_index_dir")]
    pub index_dir: PathBuf,

    /// Project name; defaults to the root directory's name
    #[clap(long)]
    #[serde(default)]
    pub project_name: Option<String>,

    /// Regenerate permalinks when files move, rewriting frontmatter
    #[clap(long, default_value_t = false)]
    #[serde(default)]
    pub update_permalinks_on_move: bool,

    /// Safety margin subtracted from the scan watermark
    #[clap(long, default_value_t = 500)]
    #[serde(default = "default_watermark_epsilon_ms")]
    pub watermark_epsilon_ms: i64,

    /// Consecutive failures before a file is quarantined
    #[clap(long, default_value_t = 3)]
    #[serde(default = "default_circuit_breaker_threshold")]
    pub circuit_breaker_threshold: u32,

    /// Debounce window for the watch service, in milliseconds
    #[clap(long, default_value_t = 500)]
    #[serde(default = "default_watch_debounce_ms")]
    pub watch_debounce_ms: u64,

    /// Ignore the watermark and rescan everything
    #[clap(long, default_value_t = false)]
    #[serde(default)]
    pub full: bool,

    /// Keep watching the project after the initial sync
    #[clap(long, default_value_t = false)]
    #[serde(default)]
    pub watch: bool,
}

impl Configuration {
    /// Directory where logs are written to
    pub fn log_dir(&self) -> PathBuf {
        self.index_dir.join("logs")
    }

    /// Sidecar database for a project
    pub fn db_path(&self, project_name: &str) -> PathBuf {
        self.index_dir.join(format!("{project_name}.db"))
    }

    pub fn resolved_project_name(&self) -> String {
        if let Some(name) = &self.project_name {
            return name.clone();
        }
        self.root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "default".to_string())
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            update_permalinks_on_move: self.update_permalinks_on_move,
            watermark_epsilon_ms: self.watermark_epsilon_ms,
            circuit_breaker_threshold: self.circuit_breaker_threshold,
        }
    }
}

fn default_root() -> PathBuf {
    ".".into()
}

fn default_index_dir() -> PathBuf {
    match directories::ProjectDirs::from("dev", "memograph", "memograph") {
        Some(dirs) => dirs.data_dir().to_owned(),
        None => "memograph_state".into(),
    }
}

fn default_watermark_epsilon_ms() -> i64 {
    500
}

fn default_circuit_breaker_threshold() -> u32 {
    3
}

fn default_watch_debounce_ms() -> u64 {
    500
}
