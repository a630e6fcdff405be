use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::AsyncRead;
use tokio::sync::Mutex;

use super::types::{Blob, EntryMeta, PinMap, Spool, StoreError, now_ms, pin};

const BLOB_EXT: &str = "blob";
const TMP_DIR: &str = "tmp";

/// On-disk blob store. One file per artifact, an in-memory index for
/// accounting and recency, and per-key write serialization. Operations on
/// different keys never block each other.
pub struct DiskStore {
    root: PathBuf,
    tmp_dir: PathBuf,
    index: DashMap<String, EntryMeta>,
    occupied: AtomicU64,
    pins: PinMap,
    write_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl DiskStore {
    /// Opens (or creates) a store rooted at `root`. Existing blob files are
    /// re-enumerated to rebuild the index and the occupied-bytes counter;
    /// leftover spools from a previous run are discarded.
    pub async fn open(root: impl AsRef<Path>) -> Result<Arc<Self>, StoreError> {
        let root = root.as_ref().to_path_buf();
        let tmp_dir = root.join(TMP_DIR);
        tokio::fs::create_dir_all(&tmp_dir).await?;

        let store = Self {
            root,
            tmp_dir,
            index: DashMap::new(),
            occupied: AtomicU64::new(0),
            pins: Arc::new(DashMap::new()),
            write_locks: DashMap::new(),
        };

        store.clear_tmp().await?;
        store.rescan().await?;

        tracing::info!(
            "Store opened: {} entries, {} bytes occupied",
            store.index.len(),
            store.occupied.load(Ordering::Relaxed)
        );

        Ok(Arc::new(store))
    }

    async fn clear_tmp(&self) -> Result<(), StoreError> {
        let mut entries = tokio::fs::read_dir(&self.tmp_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let _ = tokio::fs::remove_file(entry.path()).await;
        }
        Ok(())
    }

    async fn rescan(&self) -> Result<(), StoreError> {
        let mut fans = tokio::fs::read_dir(&self.root).await?;
        while let Some(fan) = fans.next_entry().await? {
            if !fan.file_type().await?.is_dir() || fan.file_name() == TMP_DIR {
                continue;
            }

            let mut files = tokio::fs::read_dir(fan.path()).await?;
            while let Some(file) = files.next_entry().await? {
                let path = file.path();
                if path.extension().and_then(|e| e.to_str()) != Some(BLOB_EXT) {
                    continue;
                }
                let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                let Some(key) = decode_key(stem) else {
                    tracing::warn!("Ignoring unreadable blob file {:?}", path);
                    continue;
                };

                let meta = file.metadata().await?;
                let stamp = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|d| d.as_millis() as u64)
                    .unwrap_or_else(now_ms);

                self.occupied.fetch_add(meta.len(), Ordering::Relaxed);
                self.index.insert(
                    key,
                    EntryMeta {
                        size: meta.len(),
                        last_access: stamp,
                        last_modified: stamp,
                    },
                );
            }
        }
        Ok(())
    }

    /// Hands out a fresh spool in the store's temp dir. The caller streams a
    /// blob into it and either commits it or lets it drop.
    pub async fn spool(&self) -> Result<Spool, StoreError> {
        let name = format!("{}.spool", uuid::Uuid::new_v4());
        Spool::create(self.tmp_dir.join(name)).await
    }

    /// Commits a filled spool under `key`: atomic rename into place, index
    /// upsert (last-writer-wins), accounting adjusted by the size delta.
    /// Concurrent writers to the same key serialize here.
    pub async fn commit(&self, key: &str, spool: Spool) -> Result<u64, StoreError> {
        let path = self.blob_path(key)?;
        let len = spool.len();

        let lock = self.write_lock(key);
        let _guard = lock.lock().await;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        spool.persist_to(&path).await?;

        let now = now_ms();
        let mut delta = len as i64;
        match self.index.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                delta -= occupied.get().size as i64;
                let meta = occupied.get_mut();
                meta.size = len;
                meta.last_access = now;
                meta.last_modified = now;
            }
            Entry::Vacant(vacant) => {
                vacant.insert(EntryMeta {
                    size: len,
                    last_access: now,
                    last_modified: now,
                });
            }
        }
        self.adjust_occupied(delta);

        Ok(len)
    }

    /// Streams `reader` into the store under `key`.
    pub async fn put<R>(&self, key: &str, reader: &mut R) -> Result<u64, StoreError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        if key.is_empty() {
            return Err(StoreError::InvalidKey);
        }
        let mut spool = self.spool().await?;
        spool.copy_from(reader).await?;
        self.commit(key, spool).await
    }

    pub async fn put_bytes(&self, key: &str, bytes: &[u8]) -> Result<u64, StoreError> {
        if key.is_empty() {
            return Err(StoreError::InvalidKey);
        }
        let mut spool = self.spool().await?;
        spool.write_chunk(bytes).await?;
        self.commit(key, spool).await
    }

    /// Opens `key` for streaming. Refreshes `last_access` and pins the entry
    /// against eviction until the returned blob is dropped.
    pub async fn get(&self, key: &str) -> Result<Option<Blob>, StoreError> {
        if key.is_empty() {
            return Ok(None);
        }

        let guard = pin(&self.pins, key);

        let size = match self.index.get_mut(key) {
            Some(mut meta) => {
                meta.last_access = now_ms();
                meta.size
            }
            None => return Ok(None),
        };

        let path = self.blob_path(key)?;
        match tokio::fs::File::open(&path).await {
            Ok(file) => Ok(Some(Blob::new_pinned(size, file, guard))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Index said present but the file is gone; heal the index.
                tracing::warn!("Blob file missing for indexed key, dropping entry");
                self.forget(key);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Idempotent removal; a missing key is not an error.
    pub async fn delete(&self, key: &str) -> Result<(), StoreError> {
        if key.is_empty() {
            return Ok(());
        }

        let lock = self.write_lock(key);
        let _guard = lock.lock().await;

        self.forget(key);

        let path = self.blob_path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn meta(&self, key: &str) -> Option<EntryMeta> {
        self.index.get(key).map(|entry| entry.value().clone())
    }

    pub fn occupied_bytes(&self) -> u64 {
        self.occupied.load(Ordering::Relaxed)
    }

    pub fn entry_count(&self) -> usize {
        self.index.len()
    }

    pub fn is_pinned(&self, key: &str) -> bool {
        self.pins.get(key).map(|count| *count > 0).unwrap_or(false)
    }

    /// Index snapshot in eviction order: ascending `last_access`, key as the
    /// tiebreak so passes are deterministic.
    pub fn lru_snapshot(&self) -> Vec<(String, u64, u64)> {
        let mut entries: Vec<(String, u64, u64)> = self
            .index
            .iter()
            .map(|entry| {
                (
                    entry.key().clone(),
                    entry.value().last_access,
                    entry.value().size,
                )
            })
            .collect();
        entries.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        entries
    }

    fn forget(&self, key: &str) {
        if let Some((_, meta)) = self.index.remove(key) {
            self.occupied.fetch_sub(meta.size, Ordering::Relaxed);
        }
    }

    fn adjust_occupied(&self, delta: i64) {
        if delta >= 0 {
            self.occupied.fetch_add(delta as u64, Ordering::Relaxed);
        } else {
            self.occupied.fetch_sub((-delta) as u64, Ordering::Relaxed);
        }
    }

    fn write_lock(&self, key: &str) -> Arc<Mutex<()>> {
        self.write_locks
            .entry(key.to_string())
            .or_default()
            .clone()
    }

    fn blob_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        if key.is_empty() {
            return Err(StoreError::InvalidKey);
        }
        let encoded = encode_key(key);
        let fan = if encoded.len() >= 2 {
            &encoded[..2]
        } else {
            "_"
        };
        Ok(self
            .root
            .join(fan)
            .join(format!("{}.{}", encoded, BLOB_EXT)))
    }
}

/// Keys are opaque byte strings; filenames use a filesystem-safe encoding so
/// restart can map files back to keys.
fn encode_key(key: &str) -> String {
    base64::encode_config(key.as_bytes(), base64::URL_SAFE_NO_PAD)
}

fn decode_key(stem: &str) -> Option<String> {
    let bytes = base64::decode_config(stem, base64::URL_SAFE_NO_PAD).ok()?;
    String::from_utf8(bytes).ok()
}
