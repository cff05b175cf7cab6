//! Size-bounded, concurrent cache of decoded images.
//!
//! - One background decode thread per cache-miss path, never two for the same path
//! - Requests return a [`DecodeHandle`] immediately; nothing here blocks on a decode
//! - Resolved entries are kept in LRU order and evicted under a byte budget
//! - The entry table, in-flight table and size counter share one lock
//!
//! Bulk navigation and invalidation never interrupt a running decode. They stop relying on
//! in-flight results and join the workers before returning.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use flume::{Receiver, Sender};
use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use super::decoder::{Animation, DecodedImage, FileDecoder, MediaDecoder};
use super::handle::DecodeHandle;
use super::kind;
use crate::error::DecodeError;

const BYTES_PER_MB: usize = 1024 * 1024;

/// A resolved cache entry.
#[derive(Debug, Clone)]
pub struct CachedImage {
    path: PathBuf,
    image: Arc<DecodedImage>,
    memory_size: usize,
    last_access: u64,
}

impl CachedImage {
    fn new(path: PathBuf, image: Arc<DecodedImage>, last_access: u64) -> Self {
        let memory_size = image.memory_size();
        Self {
            path,
            image,
            memory_size,
            last_access,
        }
    }

    fn ping(&mut self, now: u64) {
        self.last_access = now;
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn image(&self) -> Arc<DecodedImage> {
        Arc::clone(&self.image)
    }

    pub fn memory_size(&self) -> usize {
        self.memory_size
    }

    pub fn last_access(&self) -> u64 {
        self.last_access
    }
}

/// Notifications for consumers that repaint when background work lands.
#[derive(Debug, Clone)]
pub enum CacheEvent {
    Decoded { path: PathBuf, bytes: usize },
    Failed { path: PathBuf, error: DecodeError },
    Evicted { path: PathBuf, bytes: usize },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Requests served from a resolved entry.
    pub hits: u64,
    /// Requests that started a decode.
    pub misses: u64,
    /// Requests that joined a decode already in flight.
    pub joined: u64,
    pub evictions: u64,
    pub failures: u64,
    /// Decodes that finished after bulk navigation or invalidation dropped them.
    pub discarded: u64,
}

struct InFlight {
    handle: DecodeHandle,
    worker: JoinHandle<()>,
}

struct CacheState {
    /// Resolved entries, least recently accessed first.
    entries: LruCache<PathBuf, CachedImage>,
    in_flight: HashMap<PathBuf, InFlight>,
    /// Workers no longer tracked by path but not yet joined.
    retired: Vec<JoinHandle<()>>,
    current_size: usize,
    clock: u64,
    stats: CacheStats,
    subscribers: Vec<Sender<CacheEvent>>,
}

impl CacheState {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn publish(&mut self, event: CacheEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Insert a freshly decoded image, evicting least recently accessed entries first.
    /// An image larger than the whole budget is still admitted once the cache is empty.
    fn admit(&mut self, path: PathBuf, image: Arc<DecodedImage>, max_size: usize) {
        let now = self.tick();
        let entry = CachedImage::new(path, image, now);
        let size = entry.memory_size;

        while self.current_size + size > max_size {
            let Some((evicted_path, evicted)) = self.entries.pop_lru() else {
                break;
            };
            self.current_size = self.current_size.saturating_sub(evicted.memory_size);
            self.stats.evictions += 1;
            trace!(
                path = ?evicted_path,
                evicted_bytes = evicted.memory_size,
                current_bytes = self.current_size,
                "Evicted image from cache"
            );
            self.publish(CacheEvent::Evicted {
                path: evicted_path,
                bytes: evicted.memory_size,
            });
        }

        let path = entry.path.clone();
        if let Some(replaced) = self.entries.put(path.clone(), entry) {
            self.current_size = self.current_size.saturating_sub(replaced.memory_size);
        }
        self.current_size += size;
        self.publish(CacheEvent::Decoded { path, bytes: size });
    }

    fn reap_finished(&mut self) {
        let (finished, running): (Vec<_>, Vec<_>) =
            self.retired.drain(..).partition(|worker| worker.is_finished());
        self.retired = running;
        for worker in finished {
            join_worker(worker);
        }
    }

    /// Stop tracking every in-flight decode; returns how many were dropped.
    fn retire_in_flight(&mut self) -> usize {
        let count = self.in_flight.len();
        let workers: Vec<_> = self.in_flight.drain().map(|(_, f)| f.worker).collect();
        self.retired.extend(workers);
        count
    }
}

struct Shared {
    max_size: usize,
    state: Mutex<CacheState>,
}

/// Decoded-image cache with a memory budget and at most one decode per path.
///
/// Owned by the media display; secondary consumers such as the preview strip share it
/// through an `Arc`.
pub struct MediaCache {
    shared: Arc<Shared>,
    decoder: Arc<dyn MediaDecoder>,
    worker_seq: AtomicU64,
}

impl MediaCache {
    /// Create a cache backed by the file decoder with a budget of `max_mb` megabytes.
    pub fn new(max_mb: usize) -> Self {
        Self::with_decoder(max_mb, FileDecoder)
    }

    pub fn with_decoder(max_mb: usize, decoder: impl MediaDecoder) -> Self {
        let max_size = max_mb.saturating_mul(BYTES_PER_MB);
        debug!(max_mb, "Initialized media cache");
        Self {
            shared: Arc::new(Shared {
                max_size,
                state: Mutex::new(CacheState {
                    entries: LruCache::unbounded(),
                    in_flight: HashMap::new(),
                    retired: Vec::new(),
                    current_size: 0,
                    clock: 0,
                    stats: CacheStats::default(),
                    subscribers: Vec::new(),
                }),
            }),
            decoder: Arc::new(decoder),
            worker_seq: AtomicU64::new(0),
        }
    }

    /// Get a handle for the decoded image at `path`.
    ///
    /// Returns immediately. A resolved entry is promoted and returned as a ready handle; an
    /// in-flight decode is shared; otherwise a new decode is started.
    pub fn request_image(&self, path: impl AsRef<Path>) -> DecodeHandle {
        let path = path.as_ref();
        let mut state = self.shared.state.lock();
        state.reap_finished();

        let now = state.tick();
        if let Some(entry) = state.entries.get_mut(path) {
            entry.ping(now);
            let image = entry.image();
            state.stats.hits += 1;
            trace!(?path, "Memory cache hit");
            return DecodeHandle::ready(path.to_path_buf(), image);
        }

        if let Some(flight) = state.in_flight.get(path) {
            let handle = flight.handle.clone();
            state.stats.joined += 1;
            trace!(?path, "Joined in-flight decode");
            return handle;
        }

        state.stats.misses += 1;
        self.schedule(&mut state, path.to_path_buf())
    }

    /// Open a fresh, independently playable animation. Not cached and not budgeted.
    pub fn request_animation(&self, path: impl AsRef<Path>) -> Result<Animation, DecodeError> {
        Animation::open(path.as_ref())
    }

    /// Warm the cache for `path` without handing out a handle.
    ///
    /// Does nothing for non-image files or paths already cached or in flight.
    pub fn prefetch(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        if !kind::is_image(path) {
            return;
        }

        let mut state = self.shared.state.lock();
        if state.entries.contains(path) || state.in_flight.contains_key(path) {
            return;
        }
        state.stats.misses += 1;
        self.schedule(&mut state, path.to_path_buf());
    }

    /// Announce a jump far away from the current position.
    ///
    /// Every in-flight decode is dropped from the table and waited for, so no work for the
    /// old neighborhood keeps running once this returns. Their results are not admitted.
    /// Resolved entries are kept.
    pub fn notify_bulk_navigation(&self) {
        let (dropped, workers) = {
            let mut state = self.shared.state.lock();
            let dropped = state.retire_in_flight();
            (dropped, std::mem::take(&mut state.retired))
        };

        let waited = workers.len();
        // The lock is released here; workers take it when they complete.
        for worker in workers {
            join_worker(worker);
        }
        debug!(dropped, waited, "Bulk navigation, drained in-flight decodes");
    }

    /// Wait for every outstanding decode, then drop all entries.
    pub fn invalidate_all(&self) {
        let workers = {
            let mut state = self.shared.state.lock();
            state.retire_in_flight();
            std::mem::take(&mut state.retired)
        };

        let waited = workers.len();
        // The lock is released here; workers take it when they complete.
        for worker in workers {
            join_worker(worker);
        }

        let mut state = self.shared.state.lock();
        let dropped = state.entries.len();
        state.entries.clear();
        state.current_size = 0;
        debug!(waited, dropped, "Invalidated media cache");
    }

    /// Block until every decode started so far has finished. Entries are kept.
    pub fn wait_idle(&self) {
        loop {
            let (pending, workers) = {
                let mut state = self.shared.state.lock();
                let pending: Vec<DecodeHandle> =
                    state.in_flight.values().map(|f| f.handle.clone()).collect();
                (pending, std::mem::take(&mut state.retired))
            };
            if pending.is_empty() && workers.is_empty() {
                return;
            }
            // Completed workers retire themselves, so the next pass joins them.
            for handle in pending {
                let _ = handle.wait();
            }
            for worker in workers {
                join_worker(worker);
            }
        }
    }

    /// Receive an event for every decode, failure and eviction from now on.
    pub fn subscribe(&self) -> Receiver<CacheEvent> {
        let (tx, rx) = flume::unbounded();
        self.shared.state.lock().subscribers.push(tx);
        rx
    }

    /// Whether a resolved entry exists for `path`. Does not count as an access.
    pub fn contains(&self, path: impl AsRef<Path>) -> bool {
        self.shared.state.lock().entries.contains(path.as_ref())
    }

    pub fn is_in_flight(&self, path: impl AsRef<Path>) -> bool {
        self.shared
            .state
            .lock()
            .in_flight
            .contains_key(path.as_ref())
    }

    /// Snapshot of a resolved entry. Does not count as an access.
    pub fn peek(&self, path: impl AsRef<Path>) -> Option<CachedImage> {
        self.shared.state.lock().entries.peek(path.as_ref()).cloned()
    }

    /// Number of resolved entries.
    pub fn len(&self) -> usize {
        self.shared.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn in_flight_count(&self) -> usize {
        self.shared.state.lock().in_flight.len()
    }

    /// Bytes held by resolved entries.
    pub fn current_size(&self) -> usize {
        self.shared.state.lock().current_size
    }

    pub fn max_size(&self) -> usize {
        self.shared.max_size
    }

    pub fn stats(&self) -> CacheStats {
        self.shared.state.lock().stats
    }

    /// Register a pending handle for `path` and start its decode worker.
    fn schedule(&self, state: &mut CacheState, path: PathBuf) -> DecodeHandle {
        let handle = DecodeHandle::pending(path.clone());
        let worker_id = self.worker_seq.fetch_add(1, Ordering::Relaxed);

        let shared = Arc::downgrade(&self.shared);
        let decoder = Arc::clone(&self.decoder);
        let worker_handle = handle.clone();
        let worker_path = path.clone();

        // The worker blocks on the state lock we hold until registration below is done.
        let spawned = thread::Builder::new()
            .name(format!("decode-{}", worker_id))
            .spawn(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(|| decoder.decode(&worker_path)))
                    .unwrap_or_else(|_| Err(DecodeError::Panicked(worker_path.clone())))
                    .map(Arc::new);
                complete(&shared, &worker_path, &worker_handle, result);
            });

        match spawned {
            Ok(worker) => {
                debug!(?path, worker_id, "Cache miss, decoding");
                state.in_flight.insert(
                    path,
                    InFlight {
                        handle: handle.clone(),
                        worker,
                    },
                );
                handle
            }
            Err(e) => {
                warn!(?path, error = ?e, "Failed to spawn decode worker");
                state.stats.failures += 1;
                DecodeHandle::failed(path, DecodeError::Spawn(Arc::new(e)))
            }
        }
    }
}

/// Runs on the decode worker once the decoder returns.
fn complete(
    shared: &Weak<Shared>,
    path: &Path,
    handle: &DecodeHandle,
    result: Result<Arc<DecodedImage>, DecodeError>,
) {
    if let Some(shared) = shared.upgrade() {
        let mut state = shared.state.lock();
        let tracked = state
            .in_flight
            .get(path)
            .is_some_and(|flight| flight.handle.same_decode(handle));

        if tracked {
            if let Some(flight) = state.in_flight.remove(path) {
                state.retired.push(flight.worker);
            }
            match &result {
                Ok(image) => state.admit(path.to_path_buf(), Arc::clone(image), shared.max_size),
                Err(error) => {
                    warn!(?path, error = %error, "Failed to decode image");
                    state.stats.failures += 1;
                    state.publish(CacheEvent::Failed {
                        path: path.to_path_buf(),
                        error: error.clone(),
                    });
                }
            }
        } else {
            state.stats.discarded += 1;
            debug!(?path, "Discarded decode result after bulk navigation");
        }
    }

    handle.resolve(result);
}

fn join_worker(worker: JoinHandle<()>) {
    if worker.thread().id() == thread::current().id() {
        return;
    }
    if worker.join().is_err() {
        warn!("Decode worker panicked");
    }
}

impl Drop for MediaCache {
    fn drop(&mut self) {
        let workers = {
            let mut state = self.shared.state.lock();
            state.retire_in_flight();
            std::mem::take(&mut state.retired)
        };
        for worker in workers {
            join_worker(worker);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbaImage;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Width of a synthetic image that occupies exactly `mb` megabytes at height 1024.
    fn width_for_mb(mb: usize) -> u32 {
        (mb * BYTES_PER_MB / (1024 * 4)) as u32
    }

    /// Decoder producing blank images sized by file name (`"<mb>mb-..."`), counting decodes
    /// and optionally holding every decode until released.
    #[derive(Clone, Default)]
    struct TestDecoder {
        calls: Arc<Mutex<HashMap<PathBuf, usize>>>,
        gate: Option<Receiver<()>>,
        delay: Duration,
        started: Arc<AtomicUsize>,
        finished: Arc<AtomicUsize>,
        running: Arc<AtomicUsize>,
        peak_running: Arc<AtomicUsize>,
    }

    impl TestDecoder {
        fn gated() -> (Self, Sender<()>) {
            let (tx, rx) = flume::unbounded();
            let decoder = Self {
                gate: Some(rx),
                ..Default::default()
            };
            (decoder, tx)
        }

        fn calls(&self, path: &str) -> usize {
            self.calls
                .lock()
                .get(Path::new(path))
                .copied()
                .unwrap_or(0)
        }
    }

    impl MediaDecoder for TestDecoder {
        fn decode(&self, path: &Path) -> Result<DecodedImage, DecodeError> {
            *self.calls.lock().entry(path.to_path_buf()).or_default() += 1;
            self.started.fetch_add(1, Ordering::SeqCst);
            let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_running.fetch_max(running, Ordering::SeqCst);

            let result = self.produce(path);

            self.running.fetch_sub(1, Ordering::SeqCst);
            self.finished.fetch_add(1, Ordering::SeqCst);
            result
        }
    }

    impl TestDecoder {
        fn produce(&self, path: &Path) -> Result<DecodedImage, DecodeError> {
            if let Some(gate) = &self.gate {
                let _ = gate.recv();
            }
            if !self.delay.is_zero() {
                thread::sleep(self.delay);
            }

            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if name.starts_with("broken") {
                return Err(DecodeError::NotFound(path.to_path_buf()));
            }
            if name.starts_with("panic") {
                panic!("decoder bug");
            }
            let mb = name
                .split("mb")
                .next()
                .and_then(|n| n.parse::<usize>().ok())
                .unwrap_or(1);
            Ok(DecodedImage::new(RgbaImage::new(width_for_mb(mb), 1024)))
        }
    }

    fn mb(n: usize) -> usize {
        n * BYTES_PER_MB
    }

    #[test]
    fn test_request_decodes_and_accounts() {
        let decoder = TestDecoder::default();
        let cache = MediaCache::with_decoder(10, decoder.clone());

        let image = cache.request_image("6mb-a.png").wait().unwrap();
        assert_eq!(image.memory_size(), mb(6));
        assert_eq!(cache.current_size(), mb(6));
        assert!(cache.contains("6mb-a.png"));
        assert_eq!(cache.in_flight_count(), 0);
    }

    #[test]
    fn test_hit_does_not_decode_again() {
        let decoder = TestDecoder::default();
        let cache = MediaCache::with_decoder(10, decoder.clone());

        let first = cache.request_image("2mb-a.png").wait().unwrap();
        let second = cache.request_image("2mb-a.png");
        assert!(second.is_resolved());
        assert!(Arc::ptr_eq(&first, &second.wait().unwrap()));
        assert_eq!(decoder.calls("2mb-a.png"), 1);
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn test_concurrent_requests_share_one_decode() {
        let (decoder, release) = TestDecoder::gated();
        let cache = MediaCache::with_decoder(64, decoder.clone());

        let handles: Vec<DecodeHandle> = thread::scope(|s| {
            let workers: Vec<_> = (0..8)
                .map(|_| s.spawn(|| cache.request_image("3mb-x.png")))
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });

        assert!(handles.iter().all(|h| h.same_decode(&handles[0])));
        assert!(handles.iter().all(|h| !h.is_resolved()));

        release.send(()).unwrap();
        let images: Vec<_> = handles.iter().map(|h| h.wait().unwrap()).collect();

        assert!(images.iter().all(|img| Arc::ptr_eq(img, &images[0])));
        assert_eq!(decoder.calls("3mb-x.png"), 1);
        assert_eq!(cache.stats().misses, 1);
        assert_eq!(cache.stats().joined, 7);
    }

    #[test]
    fn test_two_near_simultaneous_requests_report_same_image() {
        let (decoder, release) = TestDecoder::gated();
        let cache = MediaCache::with_decoder(64, decoder.clone());

        let a = cache.request_image("1mb-x.png");
        let b = cache.request_image("1mb-x.png");
        release.send(()).unwrap();

        let (a, b) = (a.wait().unwrap(), b.wait().unwrap());
        assert_eq!(a.dimensions(), b.dimensions());
        assert_eq!(a.memory_size(), b.memory_size());
        assert_eq!(decoder.calls("1mb-x.png"), 1);
    }

    #[test]
    fn test_request_never_blocks_on_pending_decode() {
        let (decoder, release) = TestDecoder::gated();
        let cache = MediaCache::with_decoder(64, decoder);

        let handle = cache.request_image("1mb-slow.png");
        assert!(handle.poll().is_pending());
        assert!(cache.is_in_flight("1mb-slow.png"));
        assert_eq!(cache.current_size(), 0);

        release.send(()).unwrap();
        handle.wait().unwrap();
        assert!(!cache.is_in_flight("1mb-slow.png"));
    }

    #[test]
    fn test_budget_evicts_oldest() {
        let decoder = TestDecoder::default();
        let cache = MediaCache::with_decoder(10, decoder.clone());

        cache.request_image("6mb-a.png").wait().unwrap();
        assert_eq!(cache.current_size(), mb(6));

        cache.request_image("5mb-b.png").wait().unwrap();
        assert!(!cache.contains("6mb-a.png"));
        assert!(cache.contains("5mb-b.png"));
        assert_eq!(cache.current_size(), mb(5));

        cache.request_image("6mb-a.png").wait().unwrap();
        assert_eq!(decoder.calls("6mb-a.png"), 2);
        assert_eq!(cache.stats().evictions, 2);
    }

    #[test]
    fn test_lru_evicts_least_recently_accessed_first() {
        let decoder = TestDecoder::default();
        let cache = MediaCache::with_decoder(10, decoder);

        cache.request_image("3mb-a.png").wait().unwrap();
        cache.request_image("3mb-b.png").wait().unwrap();
        cache.request_image("3mb-c.png").wait().unwrap();
        assert_eq!(cache.current_size(), mb(9));

        // D needs 5 MB: A goes first, then B.
        cache.request_image("5mb-d.png").wait().unwrap();
        assert!(!cache.contains("3mb-a.png"));
        assert!(!cache.contains("3mb-b.png"));
        assert!(cache.contains("3mb-c.png"));
        assert!(cache.contains("5mb-d.png"));
        assert_eq!(cache.current_size(), mb(8));
    }

    #[test]
    fn test_access_promotes_entry() {
        let decoder = TestDecoder::default();
        let cache = MediaCache::with_decoder(10, decoder);

        cache.request_image("3mb-a.png").wait().unwrap();
        cache.request_image("3mb-b.png").wait().unwrap();
        cache.request_image("3mb-c.png").wait().unwrap();

        let before = cache.peek("3mb-a.png").unwrap().last_access();
        cache.request_image("3mb-a.png").wait().unwrap();
        assert!(cache.peek("3mb-a.png").unwrap().last_access() > before);

        cache.request_image("2mb-d.png").wait().unwrap();
        assert!(cache.contains("3mb-a.png"));
        assert!(!cache.contains("3mb-b.png"));
    }

    #[test]
    fn test_oversized_entry_is_admitted_alone() {
        let decoder = TestDecoder::default();
        let cache = MediaCache::with_decoder(4, decoder);

        cache.request_image("2mb-a.png").wait().unwrap();
        cache.request_image("6mb-big.png").wait().unwrap();

        assert_eq!(cache.len(), 1);
        assert!(cache.contains("6mb-big.png"));
        assert_eq!(cache.current_size(), mb(6));
    }

    #[test]
    fn test_budget_holds_after_many_requests() {
        let decoder = TestDecoder::default();
        let cache = MediaCache::with_decoder(16, decoder);

        for i in 0..20 {
            let name = format!("{}mb-{}.png", 1 + i % 5, i);
            cache.request_image(&name).wait().unwrap();
            assert!(cache.current_size() <= cache.max_size());
        }
    }

    #[test]
    fn test_failed_decode_is_not_cached_and_can_retry() {
        let decoder = TestDecoder::default();
        let cache = MediaCache::with_decoder(10, decoder.clone());

        let handle = cache.request_image("broken.png");
        assert!(handle.wait().is_err());
        assert!(!cache.contains("broken.png"));
        assert!(!cache.is_in_flight("broken.png"));
        assert_eq!(cache.current_size(), 0);

        assert!(cache.request_image("broken.png").wait().is_err());
        assert_eq!(decoder.calls("broken.png"), 2);
        assert_eq!(cache.stats().failures, 2);
    }

    #[test]
    fn test_decoder_panic_resolves_handle() {
        let decoder = TestDecoder::default();
        let cache = MediaCache::with_decoder(10, decoder);

        let err = cache.request_image("panic.png").wait().unwrap_err();
        assert!(matches!(err, DecodeError::Panicked(_)));
        assert!(!cache.is_in_flight("panic.png"));
    }

    #[test]
    fn test_missing_file_fails_cleanly() {
        let cache = MediaCache::new(10);
        let err = cache
            .request_image("/nonexistent/igal/missing.png")
            .wait()
            .unwrap_err();
        assert!(matches!(err, DecodeError::NotFound(_)));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate_forces_fresh_decode() {
        let decoder = TestDecoder::default();
        let cache = MediaCache::with_decoder(10, decoder.clone());

        let first = cache.request_image("1mb-p.png").wait().unwrap();
        cache.invalidate_all();
        assert!(cache.is_empty());
        assert_eq!(cache.current_size(), 0);

        let second = cache.request_image("1mb-p.png").wait().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(decoder.calls("1mb-p.png"), 2);
    }

    #[test]
    fn test_invalidate_waits_for_in_flight_and_drops_result() {
        let (decoder, release) = TestDecoder::gated();
        let cache = MediaCache::with_decoder(10, decoder.clone());

        let pending = cache.request_image("1mb-q.png");
        thread::scope(|s| {
            s.spawn(|| {
                while decoder.started.load(Ordering::SeqCst) == 0 {
                    thread::yield_now();
                }
                release.send(()).unwrap();
            });
            cache.invalidate_all();
        });

        // The old handle still delivers its pixels, but the cache did not keep them.
        assert!(pending.wait().is_ok());
        assert!(cache.is_empty());
        assert_eq!(cache.current_size(), 0);
        assert_eq!(cache.stats().discarded, 1);
    }

    #[test]
    fn test_bulk_navigation_drains_in_flight_decodes() {
        let (decoder, release) = TestDecoder::gated();
        let cache = MediaCache::with_decoder(64, decoder.clone());

        cache.prefetch("1mb-old-1.png");
        let old = cache.request_image("1mb-old-2.png");
        assert_eq!(cache.in_flight_count(), 2);

        thread::scope(|s| {
            s.spawn(|| {
                // Release the old decodes only once they are no longer tracked.
                while cache.in_flight_count() != 0 {
                    thread::yield_now();
                }
                release.send(()).unwrap();
                release.send(()).unwrap();
            });
            cache.notify_bulk_navigation();

            // Nothing from the old neighborhood is still running.
            assert!(old.is_resolved());
            assert_eq!(decoder.finished.load(Ordering::SeqCst), 2);
            assert_eq!(decoder.running.load(Ordering::SeqCst), 0);
        });

        assert_eq!(cache.in_flight_count(), 0);
        assert!(cache.is_empty());
        assert_eq!(cache.current_size(), 0);
        assert_eq!(cache.stats().discarded, 2);

        // A fresh request for the same path starts a new decode.
        let fresh = cache.request_image("1mb-old-2.png");
        assert!(!fresh.same_decode(&old));
        release.send(()).unwrap();
        fresh.wait().unwrap();

        assert_eq!(decoder.calls("1mb-old-2.png"), 2);
        assert!(!cache.contains("1mb-old-1.png"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.current_size(), mb(1));
    }

    #[test]
    fn test_repeated_bulk_navigation_does_not_pile_up_decodes() {
        let decoder = TestDecoder {
            delay: Duration::from_millis(5),
            ..Default::default()
        };
        let cache = MediaCache::with_decoder(1024, decoder.clone());

        for round in 0..10 {
            for i in 0..7 {
                let _ = cache.request_image(format!("1mb-r{}-{}.png", round, i));
            }
            cache.notify_bulk_navigation();
            assert_eq!(decoder.running.load(Ordering::SeqCst), 0);
        }

        assert!(decoder.peak_running.load(Ordering::SeqCst) <= 7);
        assert_eq!(decoder.finished.load(Ordering::SeqCst), 70);
    }

    #[test]
    fn test_bulk_navigation_keeps_resolved_entries() {
        let decoder = TestDecoder::default();
        let cache = MediaCache::with_decoder(10, decoder);

        cache.request_image("1mb-kept.png").wait().unwrap();
        cache.notify_bulk_navigation();
        assert!(cache.contains("1mb-kept.png"));
    }

    #[test]
    fn test_prefetch_skips_non_images_and_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let png = dir.path().join("a.png");
        RgbaImage::new(4, 4).save(&png).unwrap();
        let video = dir.path().join("clip.mp4");
        std::fs::write(&video, b"not really a video").unwrap();

        let cache = MediaCache::new(10);
        cache.prefetch(&video);
        assert_eq!(cache.stats().misses, 0);

        cache.prefetch(&png);
        cache.prefetch(&png);
        cache.wait_idle();
        assert_eq!(cache.stats().misses, 1);
        assert!(cache.contains(&png));

        cache.prefetch(&png);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_subscribe_receives_events() {
        let decoder = TestDecoder::default();
        let cache = MediaCache::with_decoder(10, decoder);
        let events = cache.subscribe();

        cache.request_image("6mb-a.png").wait().unwrap();
        cache.request_image("6mb-b.png").wait().unwrap();
        cache.request_image("broken.png").wait().unwrap_err();

        let received: Vec<_> = events.try_iter().collect();
        assert!(matches!(received[0], CacheEvent::Decoded { .. }));
        assert!(matches!(received[1], CacheEvent::Evicted { .. }));
        assert!(matches!(received[2], CacheEvent::Decoded { .. }));
        assert!(matches!(received[3], CacheEvent::Failed { .. }));
    }

    #[test]
    fn test_request_animation_is_fresh_each_time() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("still.png");
        RgbaImage::new(2, 2).save(&path).unwrap();

        let cache = MediaCache::new(10);
        let mut a = cache.request_animation(&path).unwrap();
        let b = cache.request_animation(&path).unwrap();
        a.pause();
        assert!(b.is_playing());
        assert_eq!(cache.current_size(), 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_drop_joins_outstanding_workers() {
        let (decoder, release) = TestDecoder::gated();
        let started = Arc::clone(&decoder.started);
        let cache = MediaCache::with_decoder(10, decoder);
        let handle = cache.request_image("1mb-z.png");

        thread::scope(|s| {
            s.spawn(|| {
                while started.load(Ordering::SeqCst) == 0 {
                    thread::yield_now();
                }
                thread::sleep(Duration::from_millis(10));
                release.send(()).unwrap();
            });
            drop(cache);
        });

        assert!(handle.is_resolved());
    }
}
