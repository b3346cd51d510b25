// Device-local persistent state: a small string key/value store.
//
// Holds the rate-limit window and the onboarding flag. Nothing here is synced
// anywhere; it belongs to the device running the binary.

pub mod onboarding;
pub mod rate_limiter;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::warn;

#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn get_item(&self, key: &str) -> Result<Option<String>>;
    async fn set_item(&self, key: &str, value: &str) -> Result<()>;
    async fn remove_item(&self, key: &str) -> Result<()>;
}

/// All keys in one JSON object on disk. Writes go to a temp file and are
/// renamed into place so a crash never leaves a half-written file.
pub struct FileKvStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileKvStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// `<dir>/state.json`, creating `dir` if needed.
    pub fn in_dir(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create state directory {}", dir.display()))?;
        Ok(Self::new(dir.join("state.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<BTreeMap<String, String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => serde_json::from_str(&contents)
                .with_context(|| format!("Local state at {} is corrupt", self.path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to read local state at {}", self.path.display())),
        }
    }

    /// Load for a write. A corrupt file is replaced rather than blocking
    /// every future write.
    async fn load_for_write(&self) -> Result<BTreeMap<String, String>> {
        match self.load().await {
            Ok(map) => Ok(map),
            Err(e) if self.path.exists() => {
                warn!(error = %e, "Discarding unreadable local state");
                Ok(BTreeMap::new())
            }
            Err(e) => Err(e),
        }
    }

    async fn save(&self, map: &BTreeMap<String, String>) -> Result<()> {
        let json = serde_json::to_string_pretty(map)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl LocalStore for FileKvStore {
    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.load().await?.remove(key))
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut map = self.load_for_write().await?;
        map.insert(key.to_string(), value.to_string());
        self.save(&map).await
    }

    async fn remove_item(&self, key: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut map = self.load_for_write().await?;
        if map.remove(key).is_some() {
            self.save(&map).await?;
        }
        Ok(())
    }
}

/// Non-persistent store, for tests.
#[derive(Default)]
pub struct MemoryKvStore {
    items: Mutex<BTreeMap<String, String>>,
}

#[async_trait]
impl LocalStore for MemoryKvStore {
    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.items.lock().await.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.items
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<()> {
        self.items.lock().await.remove(key);
        Ok(())
    }
}
