use std::path::{Path, PathBuf};

use memograph::application::{Application, Configuration};
use tempfile::TempDir;

pub struct TestBed {
    // owns the on-disk state for the lifetime of the test
    pub dir: TempDir,
    pub app: Application,
}

impl TestBed {
    pub fn root(&self) -> &Path {
        self.app.sync.context().root.as_path()
    }

    pub fn write(&self, rel_path: &str, content: impl AsRef<[u8]>) {
        let path = self.root().join(rel_path);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    pub fn read(&self, rel_path: &str) -> String {
        std::fs::read_to_string(self.root().join(rel_path)).unwrap()
    }

    pub fn remove(&self, rel_path: &str) {
        std::fs::remove_file(self.root().join(rel_path)).unwrap();
    }

    pub fn rename(&self, old: &str, new: &str) {
        let to = self.root().join(new);
        std::fs::create_dir_all(to.parent().unwrap()).unwrap();
        std::fs::rename(self.root().join(old), to).unwrap();
    }
}

pub async fn testbed() -> TestBed {
    testbed_with(|_| {}).await
}

pub async fn testbed_with(tweak: impl FnOnce(&mut Configuration)) -> TestBed {
    let dir = tempfile::tempdir().unwrap();
    let project_root: PathBuf = dir.path().join("project");
    std::fs::create_dir_all(&project_root).unwrap();

    let mut config = Configuration {
        root: project_root,
        index_dir: dir.path().join("state"),
        project_name: Some("test".to_string()),
        update_permalinks_on_move: false,
        watermark_epsilon_ms: 500,
        circuit_breaker_threshold: 3,
        watch_debounce_ms: 500,
        full: false,
        watch: false,
    };
    tweak(&mut config);

    let app = Application::initialize(config).await.unwrap();
    TestBed { dir, app }
}
