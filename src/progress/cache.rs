use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use snafu::{Location, ResultExt, Snafu};

use crate::model::{ContentId, PlaybackPosition};

/// Local fallback for positions, read when a lesson is bound and written after each accepted send.
pub trait PositionCache: Send + Sync {
    fn load(&self, content: ContentId) -> Option<PlaybackPosition>;

    fn store(&self, content: ContentId, position: PlaybackPosition);
}

pub fn cache_key(content: ContentId) -> String {
    format!("progress:{content}")
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CacheError {
    #[snafu(display("could not read the progress cache `{}`: {source}", path.display()))]
    ReadCache {
        path: PathBuf,
        source: std::io::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("progress cache `{}` is corrupted: {source}", path.display()))]
    ParseCache {
        path: PathBuf,
        source: serde_json::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("could not write the progress cache `{}`: {source}", path.display()))]
    WriteCache {
        path: PathBuf,
        source: std::io::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("could not encode the progress cache: {source}"))]
    EncodeCache {
        source: serde_json::Error,
        #[snafu(implicit)]
        location: Location,
    },
}

#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<String, PlaybackPosition>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PositionCache for MemoryCache {
    fn load(&self, content: ContentId) -> Option<PlaybackPosition> {
        self.entries.get(&cache_key(content)).map(|entry| *entry)
    }

    fn store(&self, content: ContentId, position: PlaybackPosition) {
        self.entries.insert(cache_key(content), position);
    }
}

/// A JSON object of cache entries on disk, rewritten on every store.
///
/// Inside a tokio runtime the rewrite runs on the blocking pool, so `store` never blocks the
/// sink worker. Lookups are served from memory.
#[derive(Debug)]
pub struct FileCache {
    store: Arc<FileStore>,
}

#[derive(Debug)]
struct FileStore {
    path: PathBuf,
    entries: DashMap<String, PlaybackPosition>,
    writer: Mutex<()>,
}

impl FileCache {
    /// Open the cache at `path`, starting empty when the file does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let path = path.into();

        let entries = match std::fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => DashMap::new(),
            Ok(text) => serde_json::from_str::<BTreeMap<String, PlaybackPosition>>(&text)
                .context(ParseCacheSnafu { path: path.clone() })?
                .into_iter()
                .collect(),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => DashMap::new(),
            Err(error) => return Err(error).context(ReadCacheSnafu { path }),
        };

        tracing::debug!(path = %path.display(), entries = entries.len(), "opened progress cache");

        Ok(Self {
            store: Arc::new(FileStore {
                path,
                entries,
                writer: Mutex::new(()),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.store.path
    }
}

impl FileStore {
    fn persist_or_warn(&self, content: ContentId) {
        if let Err(error) = self.persist() {
            tracing::warn!(%error, %content, "could not persist the progress cache");
        }
    }

    fn persist(&self) -> Result<(), CacheError> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let snapshot: BTreeMap<String, PlaybackPosition> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        let text = serde_json::to_string_pretty(&snapshot).context(EncodeCacheSnafu)?;

        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).context(WriteCacheSnafu { path: &self.path })?;
        }

        let staging = self.path.with_extension("json.tmp");
        std::fs::write(&staging, text).context(WriteCacheSnafu { path: &staging })?;
        std::fs::rename(&staging, &self.path).context(WriteCacheSnafu { path: &self.path })?;

        Ok(())
    }
}

impl PositionCache for FileCache {
    fn load(&self, content: ContentId) -> Option<PlaybackPosition> {
        self.store.entries.get(&cache_key(content)).map(|entry| *entry)
    }

    fn store(&self, content: ContentId, position: PlaybackPosition) {
        self.store.entries.insert(cache_key(content), position);

        let store = self.store.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn_blocking(move || store.persist_or_warn(content));
            }
            Err(_) => store.persist_or_warn(content),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("coursetrack-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir.join("progress.json")
    }

    #[test]
    fn memory_cache_is_keyed_per_content() {
        let cache = MemoryCache::new();
        cache.store(ContentId::new(1), PlaybackPosition::new(30, 10));

        assert_eq!(cache.load(ContentId::new(1)), Some(PlaybackPosition::new(30, 10)));
        assert_eq!(cache.load(ContentId::new(2)), None);
    }

    #[test]
    fn file_cache_survives_reopening() {
        let path = scratch("reopen");

        let cache = FileCache::open(&path).unwrap();
        cache.store(ContentId::new(8), PlaybackPosition::new(55, 1_700_000_000_000));
        cache.store(ContentId::new(8), PlaybackPosition::new(61, 1_700_000_004_000));
        drop(cache);

        let reopened = FileCache::open(&path).unwrap();
        assert_eq!(
            reopened.load(ContentId::new(8)),
            Some(PlaybackPosition::new(61, 1_700_000_004_000))
        );

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(
            raw,
            serde_json::json!({ "progress:8": { "second": 61, "ts": 1_700_000_004_000_i64 } })
        );
    }

    #[tokio::test]
    async fn file_cache_is_written_from_the_blocking_pool() {
        let path = scratch("runtime");
        let cache = FileCache::open(&path).unwrap();

        cache.store(ContentId::new(3), PlaybackPosition::new(12, 1_700_000_000_000));
        assert_eq!(
            cache.load(ContentId::new(3)),
            Some(PlaybackPosition::new(12, 1_700_000_000_000))
        );

        let written = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Ok(reopened) = FileCache::open(&path) {
                    if reopened.load(ContentId::new(3)).is_some() {
                        return reopened;
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(
            written.load(ContentId::new(3)),
            Some(PlaybackPosition::new(12, 1_700_000_000_000))
        );
    }

    #[test]
    fn corrupted_file_is_reported() {
        let path = scratch("corrupt");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            FileCache::open(&path),
            Err(CacheError::ParseCache { .. })
        ));
    }
}
