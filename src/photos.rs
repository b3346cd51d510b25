// Photo storage for spark attachments.
//
// Objects are named `sparks/<upload ms>_<7 base-36 chars>.jpg`. The store
// returns a URL that gets saved on the spark; nothing reads photos back
// through this module.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rand::Rng;
use tracing::info;

use crate::clock::Clock;

const PHOTO_PREFIX: &str = "sparks";
const SUFFIX_LEN: usize = 7;
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

#[async_trait]
pub trait PhotoStore: Send + Sync {
    /// Store the image bytes and return the URL to record on the spark.
    async fn upload(&self, bytes: Vec<u8>) -> Result<String>;
}

/// Writes photos under a local directory and hands out `<base_url>/sparks/<file>`.
pub struct LocalPhotoStore {
    root: PathBuf,
    base_url: String,
    clock: Arc<dyn Clock>,
}

impl LocalPhotoStore {
    /// `base_url` defaults to a `file://` URL for `root` when not given.
    pub fn new(root: impl Into<PathBuf>, base_url: Option<String>, clock: Arc<dyn Clock>) -> Self {
        let root = root.into();
        let base_url = base_url
            .unwrap_or_else(|| format!("file://{}", root.display()))
            .trim_end_matches('/')
            .to_string();
        Self {
            root,
            base_url,
            clock,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// `<timestamp_ms>_<random>.jpg`
pub fn object_name(timestamp_ms: i64) -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| BASE36[rng.random_range(0..BASE36.len())] as char)
        .collect();
    format!("{timestamp_ms}_{suffix}.jpg")
}

#[async_trait]
impl PhotoStore for LocalPhotoStore {
    async fn upload(&self, bytes: Vec<u8>) -> Result<String> {
        let dir = self.root.join(PHOTO_PREFIX);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create photo directory {}", dir.display()))?;

        let name = object_name(self.clock.now_ms());
        let path = dir.join(&name);
        let size = bytes.len();
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("Failed to write photo {}", path.display()))?;

        info!(path = %path.display(), bytes = size, "Photo stored");
        Ok(format!("{}/{PHOTO_PREFIX}/{name}", self.base_url))
    }
}
