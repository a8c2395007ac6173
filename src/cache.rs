use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;

use crate::error::{CacheContents, CacheError};
use crate::key::CacheKey;

/// The in-flight computation that all concurrent lookups for a key await together.
type SharedComputation<T> = Shared<BoxFuture<'static, CacheContents<Arc<T>>>>;

/// The lifecycle of a cache entry.
///
/// An entry starts out `Pending` and transitions exactly once to either `Resolved`
/// or `Rejected` when its computation settles.
enum EntryState<T> {
    /// The computation has not settled yet.
    Pending,
    /// The computation produced a value.
    Resolved(Arc<T>),
    /// The computation failed.
    Rejected(CacheError),
}

/// One remembered request.
struct Entry<T> {
    key: CacheKey,
    /// The settled outcome, written exactly once by the computation itself.
    state: Arc<Mutex<EntryState<T>>>,
    /// Used for deduplicating concurrent lookups while the entry is pending.
    computation: SharedComputation<T>,
}

/// A memoizing cache for asynchronous loads, keyed by a [`CacheKey`] tuple.
///
/// Looking up a key that already has an entry either serves the remembered outcome,
/// or lets the caller await the same in-flight computation as everyone else asking
/// for that key. The producer for a given key is therefore started at most once, no
/// matter how many callers race for it.
///
/// Entries live until they are explicitly [`clear`](Self::clear)ed; there is no
/// expiry and no capacity bound. Failures are sticky: a failed entry keeps serving
/// its error to every caller until it is cleared.
///
/// The cache handle is cheap to clone, and all clones share the same entries. Give
/// every consumer within a logical scope a clone of the same handle so they observe
/// the same entries.
pub struct LoaderCache<T> {
    /// Entries in insertion order. The first entry matching a key wins.
    entries: Arc<Mutex<Vec<Entry<T>>>>,
}

impl<T> Clone for LoaderCache<T> {
    fn clone(&self) -> Self {
        // https://github.com/rust-lang/rust/issues/26925
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<T> Default for LoaderCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for LoaderCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.entries.try_lock().map(|e| e.len()).unwrap_or_default();
        f.debug_struct("LoaderCache")
            .field("entries", &entries)
            .finish()
    }
}

impl<T> LoaderCache<T> {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// The number of entries currently in the cache.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Whether the cache currently has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    /// Removes the first entry whose key matches `key`. No-op if none matches.
    ///
    /// Subsequent [`remember`](Self::remember) calls for the key are treated as a
    /// cache miss and invoke their producer again. An in-flight computation
    /// belonging to the removed entry is not cancelled: callers already awaiting it
    /// still observe its eventual outcome, but new lookups will no longer find it.
    pub fn clear(&self, key: &CacheKey) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(index) = entries.iter().position(|entry| entry.key.matches(key)) {
            tracing::trace!(%key, "Clearing cache entry");
            entries.remove(index);
        }
    }
}

impl<T> LoaderCache<T>
where
    T: Send + Sync + 'static,
{
    /// Serves the outcome for `key` from the cache, or starts `producer` and
    /// remembers its outcome.
    ///
    /// Entries are scanned in insertion order and the first key match wins:
    ///
    /// - A failed entry short-circuits with the stored error before any await
    ///   point; the producer is not invoked.
    /// - A resolved entry returns the stored value; the producer is not invoked.
    /// - A pending entry lets the caller await the same in-flight computation as
    ///   all other concurrent callers for this key.
    /// - On a miss, the producer is invoked while the entry collection is still
    ///   locked, so two racing lookups cannot both miss: the producer is started at
    ///   most once per distinct key. The computation is driven to completion by a
    ///   detached task, independently of caller interest.
    ///
    /// # Panics
    ///
    /// Panics if a cache miss occurs outside of a Tokio runtime, as the computation
    /// is spawned onto the current runtime.
    pub async fn remember<F, Fut>(&self, producer: F, key: CacheKey) -> CacheContents<Arc<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheContents<T>> + Send + 'static,
    {
        let computation = {
            let mut entries = self.entries.lock().unwrap();

            if let Some(entry) = entries.iter().find(|entry| entry.key.matches(&key)) {
                match &*entry.state.lock().unwrap() {
                    EntryState::Rejected(error) => return Err(error.clone()),
                    EntryState::Resolved(value) => return Ok(Arc::clone(value)),
                    EntryState::Pending => {
                        // A concurrent lookup was deduplicated.
                        tracing::trace!(%key, "Deduplicating in-flight load");
                        entry.computation.clone()
                    }
                }
            } else {
                tracing::trace!(%key, "Starting load");

                let state = Arc::new(Mutex::new(EntryState::Pending));
                let computation = settle_into(producer(), Arc::clone(&state))
                    .boxed()
                    .shared();

                // Run the computation to completion even if every caller loses
                // interest in the meantime.
                tokio::spawn(computation.clone());

                entries.push(Entry {
                    key,
                    state,
                    computation: computation.clone(),
                });

                computation
            }
            // The entry collection stays locked from the scan until the new entry
            // is registered, which is what upholds the at-most-one-producer
            // guarantee under concurrent lookups.
        };

        computation.await
    }
}

/// Wraps a producer's future so that its outcome is additionally written into
/// `state` when it settles.
async fn settle_into<T, Fut>(
    future: Fut,
    state: Arc<Mutex<EntryState<T>>>,
) -> CacheContents<Arc<T>>
where
    Fut: Future<Output = CacheContents<T>>,
{
    match future.await {
        Ok(value) => {
            let value = Arc::new(value);
            *state.lock().unwrap() = EntryState::Resolved(Arc::clone(&value));
            Ok(value)
        }
        Err(error) => {
            *state.lock().unwrap() = EntryState::Rejected(error.clone());
            Err(error)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    fn setup() {
        tracing_subscriber::fmt()
            .with_env_filter("loader_cache=trace")
            .with_target(false)
            .pretty()
            .with_test_writer()
            .try_init()
            .ok();
    }

    #[tokio::test]
    async fn test_coalesced_loads() {
        setup();
        tokio::time::pause();

        let cache: LoaderCache<String> = LoaderCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = CacheKey::from_iter(["user", "u1"]);

        let producer = || {
            let calls = Arc::clone(&calls);
            move || {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok(String::from("Jane"))
                }
            }
        };

        // Two lookups racing for the same key before the first one resolves.
        let (first, second) = futures::join!(
            cache.remember(producer(), key.clone()),
            cache.remember(producer(), key)
        );

        assert_eq!(first.unwrap().as_str(), "Jane");
        assert_eq!(second.unwrap().as_str(), "Jane");

        // Only one of them actually invoked its producer.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_memoized_value() {
        setup();

        let cache: LoaderCache<u32> = LoaderCache::new();
        let key = CacheKey::from_iter(["answer"]);

        let value = cache
            .remember(|| async { Ok(42) }, key.clone())
            .await
            .unwrap();
        assert_eq!(*value, 42);

        // Served from the cache, regardless of the new producer.
        let again = cache
            .remember(|| async { unreachable!() }, key)
            .await
            .unwrap();
        assert_eq!(*again, 42);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_sticky_failure() {
        setup();

        let cache: LoaderCache<String> = LoaderCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = CacheKey::from_iter(["k"]);

        let first = cache
            .remember(
                || async { Err(CacheError::LoadError("boom".into())) },
                key.clone(),
            )
            .await;
        assert_eq!(first, Err(CacheError::LoadError("boom".into())));

        // The failure is remembered; the new producer is never invoked.
        let second = cache
            .remember(
                {
                    let calls = Arc::clone(&calls);
                    move || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        async move { Ok(String::from("ok")) }
                    }
                },
                key.clone(),
            )
            .await;
        assert_eq!(second, Err(CacheError::LoadError("boom".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        // Clearing the key makes the next lookup a miss again.
        cache.clear(&key);

        let third = cache
            .remember(
                {
                    let calls = Arc::clone(&calls);
                    move || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        async move { Ok(String::from("ok")) }
                    }
                },
                key,
            )
            .await;
        assert_eq!(third.unwrap().as_str(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_distinct_keys() {
        setup();

        let cache: LoaderCache<u32> = LoaderCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let producer = |value: u32| {
            let calls = Arc::clone(&calls);
            move || {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Ok(value) }
            }
        };

        let key_a = CacheKey::new(vec!["a".into(), 1i64.into()]);
        let key_b = CacheKey::new(vec!["a".into(), 2i64.into()]);

        let first = cache.remember(producer(1), key_a).await.unwrap();
        let second = cache.remember(producer(2), key_b).await.unwrap();

        assert_eq!(*first, 1);
        assert_eq!(*second, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_clear_unknown_key() {
        setup();

        let cache: LoaderCache<u32> = LoaderCache::new();
        cache.clear(&CacheKey::from_iter(["nothing"]));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_clear_does_not_cancel() {
        setup();
        tokio::time::pause();

        let cache: LoaderCache<u32> = LoaderCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = CacheKey::from_iter(["k"]);

        let first = tokio::spawn({
            let cache = cache.clone();
            let calls = Arc::clone(&calls);
            let key = key.clone();
            async move {
                cache
                    .remember(
                        move || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            async move {
                                tokio::time::sleep(Duration::from_millis(50)).await;
                                Ok(1)
                            }
                        },
                        key,
                    )
                    .await
            }
        });

        // Let the first lookup register its entry before invalidating it.
        tokio::task::yield_now().await;
        assert_eq!(cache.len(), 1);

        cache.clear(&key);
        assert!(cache.is_empty());

        // A fresh lookup is a miss and starts its own computation.
        let second = cache
            .remember(
                {
                    let calls = Arc::clone(&calls);
                    move || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        async move { Ok(2) }
                    }
                },
                key,
            )
            .await;
        assert_eq!(*second.unwrap(), 2);

        // The cleared computation still ran to completion for its original caller.
        assert_eq!(*first.await.unwrap().unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    /// An empty resolved value is served like any other value, it is never mistaken
    /// for a still-pending entry.
    #[tokio::test]
    async fn test_empty_value_is_remembered() {
        setup();

        let cache: LoaderCache<String> = LoaderCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = CacheKey::from_iter(["empty"]);

        let first = cache
            .remember(|| async { Ok(String::new()) }, key.clone())
            .await
            .unwrap();
        assert_eq!(first.as_str(), "");

        let second = cache
            .remember(
                {
                    let calls = Arc::clone(&calls);
                    move || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        async move { Ok(String::from("not empty")) }
                    }
                },
                key,
            )
            .await
            .unwrap();
        assert_eq!(second.as_str(), "");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
