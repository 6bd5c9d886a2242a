//! Typed, reference-counted resource cache.
//!
//! A cache key is (normalized path, concrete type), so the same bytes may
//! back a parsed resource and a raw blob independently. Loads are
//! single-flight per key: the first acquirer runs the loader while everyone
//! else blocks on the key's latch and shares the result, or the error.
//!
//! Handles resolve through an indirection slot. That costs one mutex lock
//! per `get`, and buys `clear(force)` the ability to invalidate every
//! outstanding handle so stale resources fail fast instead of lingering.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::io::Read;
use std::marker::PhantomData;
use std::sync::{Arc, Condvar, Mutex};

use tracing::{debug, warn};

use crate::error::ResourceError;
use crate::vfs::{normalize_path, Vfs};

/// A cacheable asset type. Implementations parse themselves out of raw
/// bytes served by the filesystem.
pub trait Resource: Send + Sync + Sized + 'static {
    /// Short type tag used in log lines and load errors.
    const KIND: &'static str;

    fn from_bytes(path: &str, bytes: &[u8]) -> Result<Self, ResourceError>;

    /// Approximate resident size, used for the eviction budget.
    fn resident_size(&self) -> usize;
}

type Payload = Arc<dyn Any + Send + Sync>;

enum SlotState {
    Loading,
    Ready(Payload),
    Failed(ResourceError),
    Invalidated,
}

struct ResourceSlot {
    state: Mutex<SlotState>,
    ready: Condvar,
}

impl ResourceSlot {
    fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::Loading),
            ready: Condvar::new(),
        }
    }

    fn fulfill(&self, payload: Payload) {
        *self.state.lock().expect("resource slot poisoned") = SlotState::Ready(payload);
        self.ready.notify_all();
    }

    fn fail(&self, error: ResourceError) {
        *self.state.lock().expect("resource slot poisoned") = SlotState::Failed(error);
        self.ready.notify_all();
    }

    fn invalidate(&self) {
        *self.state.lock().expect("resource slot poisoned") = SlotState::Invalidated;
        self.ready.notify_all();
    }

    fn wait(&self) -> Result<Payload, ResourceError> {
        let mut state = self.state.lock().expect("resource slot poisoned");
        loop {
            match &*state {
                SlotState::Loading => {
                    state = self.ready.wait(state).expect("resource slot poisoned");
                }
                SlotState::Ready(payload) => return Ok(payload.clone()),
                SlotState::Failed(err) => return Err(err.clone()),
                SlotState::Invalidated => return Err(ResourceError::Invalidated),
            }
        }
    }
}

/// A counted reference to a cached resource. Dropping the handle releases
/// the reference; the payload stays resident until eviction needs the room.
pub struct ResourceHandle<T: Resource> {
    slot: Arc<ResourceSlot>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Resource> std::fmt::Debug for ResourceHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceHandle").finish_non_exhaustive()
    }
}

impl<T: Resource> Clone for ResourceHandle<T> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Resource> ResourceHandle<T> {
    /// Resolves the handle. Fails only after a forced cache clear.
    pub fn get(&self) -> Result<Arc<T>, ResourceError> {
        let state = self.slot.state.lock().expect("resource slot poisoned");
        match &*state {
            SlotState::Ready(payload) => payload
                .clone()
                .downcast::<T>()
                .map_err(|_| ResourceError::Invalidated),
            _ => Err(ResourceError::Invalidated),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub resident_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    path: String,
    type_id: TypeId,
}

struct CachedEntry {
    slot: Arc<ResourceSlot>,
    kind: &'static str,
    size: usize,
    last_access: u64,
}

struct CacheInner {
    entries: HashMap<CacheKey, CachedEntry>,
    resident: usize,
    tick: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// The cache proper. Shares the filesystem it reads through.
pub struct ResourceCache {
    vfs: Arc<Vfs>,
    inner: Mutex<CacheInner>,
    soft_cap: usize,
}

impl ResourceCache {
    pub fn new(vfs: Arc<Vfs>, soft_cap_bytes: usize) -> Self {
        Self {
            vfs,
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                resident: 0,
                tick: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
            soft_cap: soft_cap_bytes,
        }
    }

    pub fn vfs(&self) -> &Arc<Vfs> {
        &self.vfs
    }

    /// Fetches a resource, loading it through the filesystem if it is not
    /// already resident. Concurrent acquires of the same key run the loader
    /// exactly once; every waiter shares the result or the error.
    pub fn acquire<T: Resource>(&self, path: &str) -> Result<ResourceHandle<T>, ResourceError> {
        let normalized = normalize_path(path);
        let key = CacheKey {
            path: normalized.clone(),
            type_id: TypeId::of::<T>(),
        };

        let (slot, is_loader) = {
            let mut inner = self.inner.lock().expect("resource cache poisoned");
            inner.tick += 1;
            let tick = inner.tick;
            if let Some(entry) = inner.entries.get_mut(&key) {
                entry.last_access = tick;
                let slot = entry.slot.clone();
                inner.hits += 1;
                (slot, false)
            } else {
                inner.misses += 1;
                let slot = Arc::new(ResourceSlot::new());
                inner.entries.insert(
                    key.clone(),
                    CachedEntry {
                        slot: slot.clone(),
                        kind: T::KIND,
                        size: 0,
                        last_access: tick,
                    },
                );
                (slot, true)
            }
        };

        if is_loader {
            match self.load::<T>(&normalized) {
                Ok(value) => {
                    let size = value.resident_size();
                    slot.fulfill(Arc::new(value));
                    let mut inner = self.inner.lock().expect("resource cache poisoned");
                    if let Some(entry) = inner.entries.get_mut(&key) {
                        entry.size = size;
                        inner.resident += size;
                    }
                    Self::evict_over_cap(&mut inner, self.soft_cap);
                }
                Err(err) => {
                    // Failed keys are not cached; every current waiter sees
                    // the error, the next acquire retries the load.
                    slot.fail(err);
                    let mut inner = self.inner.lock().expect("resource cache poisoned");
                    inner.entries.remove(&key);
                }
            }
        }

        slot.wait().map(|_| ResourceHandle {
            slot,
            _marker: PhantomData,
        })
    }

    fn load<T: Resource>(&self, normalized: &str) -> Result<T, ResourceError> {
        let mut stream = self
            .vfs
            .open(normalized)
            .map_err(|err| ResourceError::Io {
                path: normalized.to_string(),
                message: err.to_string(),
            })?
            .ok_or_else(|| ResourceError::NotFound {
                path: normalized.to_string(),
            })?;
        let mut bytes = Vec::with_capacity(stream.len() as usize);
        stream.read_to_end(&mut bytes).map_err(|err| ResourceError::Io {
            path: normalized.to_string(),
            message: err.to_string(),
        })?;
        T::from_bytes(normalized, &bytes)
    }

    /// Warms the cache: each path is loaded (if absent) and immediately
    /// released, leaving it resident at reference count zero.
    pub fn preload<T: Resource>(&self, paths: &[&str]) {
        for path in paths {
            if let Err(err) = self.acquire::<T>(path) {
                debug!(path, error = %err, "preload skipped");
            }
        }
    }

    /// Drops unreferenced entries. With `force`, drops everything and
    /// invalidates outstanding handles, which fail fast from then on.
    pub fn clear(&self, force: bool) {
        let mut inner = self.inner.lock().expect("resource cache poisoned");
        if force {
            for entry in inner.entries.values() {
                entry.slot.invalidate();
            }
            inner.entries.clear();
            inner.resident = 0;
            return;
        }
        let mut freed = 0usize;
        inner.entries.retain(|_, entry| {
            let referenced = Arc::strong_count(&entry.slot) > 1;
            if !referenced {
                freed += entry.size;
            }
            referenced
        });
        inner.resident = inner.resident.saturating_sub(freed);
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().expect("resource cache poisoned");
        CacheStats {
            entries: inner.entries.len(),
            resident_bytes: inner.resident,
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
        }
    }

    /// Evicts unreferenced entries in LRU order until resident bytes drop
    /// under the soft cap. Referenced entries are never touched.
    fn evict_over_cap(inner: &mut CacheInner, soft_cap: usize) {
        while inner.resident > soft_cap {
            let victim = inner
                .entries
                .iter()
                .filter(|(_, entry)| {
                    Arc::strong_count(&entry.slot) == 1
                        && matches!(
                            *entry.slot.state.lock().expect("resource slot poisoned"),
                            SlotState::Ready(_)
                        )
                })
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(key, entry)| (key.clone(), entry.size, entry.kind));
            let Some((key, size, kind)) = victim else {
                warn!(
                    resident = inner.resident,
                    cap = soft_cap,
                    "resource cache over budget with every entry referenced"
                );
                break;
            };
            inner.entries.remove(&key);
            inner.resident = inner.resident.saturating_sub(size);
            inner.evictions += 1;
            debug!(path = %key.path, kind, size, "evicted resource");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static LOADS: AtomicUsize = AtomicUsize::new(0);

    #[derive(Debug)]
    struct Blob {
        bytes: Vec<u8>,
    }

    impl Resource for Blob {
        const KIND: &'static str = "blob";

        fn from_bytes(_path: &str, bytes: &[u8]) -> Result<Self, ResourceError> {
            LOADS.fetch_add(1, Ordering::SeqCst);
            Ok(Self {
                bytes: bytes.to_vec(),
            })
        }

        fn resident_size(&self) -> usize {
            self.bytes.len()
        }
    }

    fn disk_vfs(files: &[(&str, &[u8])]) -> (tempfile::TempDir, Arc<Vfs>) {
        let dir = tempfile::tempdir().expect("tempdir");
        for (path, bytes) in files {
            let full = dir.path().join(path);
            std::fs::create_dir_all(full.parent().expect("parent")).expect("mkdir");
            std::fs::write(full, bytes).expect("write");
        }
        let vfs = Arc::new(Vfs::new());
        vfs.mount_disk(dir.path(), 0);
        (dir, vfs)
    }

    #[test]
    fn concurrent_acquires_load_once_and_share() {
        let (_dir, vfs) = disk_vfs(&[("data/one.bin", b"payload")]);
        let cache = Arc::new(ResourceCache::new(vfs, 1 << 20));
        LOADS.store(0, Ordering::SeqCst);

        let mut workers = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            workers.push(std::thread::spawn(move || {
                cache.acquire::<Blob>("data/one.bin").expect("acquire")
            }));
        }
        let handles: Vec<_> = workers
            .into_iter()
            .map(|worker| worker.join().expect("join"))
            .collect();

        assert_eq!(LOADS.load(Ordering::SeqCst), 1, "single-flight per key");
        for handle in &handles {
            assert_eq!(handle.get().expect("resolve").bytes, b"payload");
        }
        assert_eq!(cache.stats().entries, 1);
    }

    #[test]
    fn missing_path_is_a_load_error_and_not_cached() {
        let (_dir, vfs) = disk_vfs(&[]);
        let cache = ResourceCache::new(vfs, 1 << 20);
        let err = cache.acquire::<Blob>("nope.bin").expect_err("must miss");
        assert!(matches!(err, ResourceError::NotFound { .. }));
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn eviction_respects_reference_counts_and_lru() {
        let (_dir, vfs) = disk_vfs(&[
            ("a.bin", &[1u8; 100][..]),
            ("b.bin", &[2u8; 100][..]),
            ("c.bin", &[3u8; 100][..]),
        ]);
        let cache = ResourceCache::new(vfs, 250);

        let held = cache.acquire::<Blob>("a.bin").expect("a");
        drop(cache.acquire::<Blob>("b.bin").expect("b"));
        // 200 resident, cap 250. Loading c pushes to 300: b (unreferenced,
        // least recent among evictables) goes; a survives because the handle
        // is live.
        drop(cache.acquire::<Blob>("c.bin").expect("c"));

        let stats = cache.stats();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.entries, 2);
        assert!(held.get().is_ok());

        // b reloads on the next acquire.
        drop(cache.acquire::<Blob>("b.bin").expect("b again"));
        assert!(cache.stats().misses >= 4);
    }

    #[test]
    fn forced_clear_invalidates_outstanding_handles() {
        let (_dir, vfs) = disk_vfs(&[("a.bin", b"abc")]);
        let cache = ResourceCache::new(vfs, 1 << 20);
        let handle = cache.acquire::<Blob>("a.bin").expect("a");
        assert!(handle.get().is_ok());

        cache.clear(true);
        assert_eq!(handle.get().expect_err("stale"), ResourceError::Invalidated);
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn soft_clear_keeps_referenced_entries() {
        let (_dir, vfs) = disk_vfs(&[("a.bin", b"abc"), ("b.bin", b"def")]);
        let cache = ResourceCache::new(vfs, 1 << 20);
        let held = cache.acquire::<Blob>("a.bin").expect("a");
        drop(cache.acquire::<Blob>("b.bin").expect("b"));

        cache.clear(false);
        assert_eq!(cache.stats().entries, 1);
        assert!(held.get().is_ok());
    }
}
