//! Coalescing cache coordinator.
//!
//! Provides "compute once, serve many" semantics keyed by an opaque string.
//! The first caller that misses registers a pending computation and runs the
//! producer; concurrent callers for the same key wait on that computation for
//! at most a caller-supplied budget, then fall back to producing on their own.
//!
//! This is a stampede limiter, not a strict single-flight barrier: duplicate
//! work is bounded by the number of waiters whose budget elapsed.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use metrics::counter;
use tokio::sync::watch;
use tracing::{debug, trace};

const METRIC_HIT: &str = "vitrine_cache_hit_total";
const METRIC_MISS: &str = "vitrine_cache_miss_total";
const METRIC_COALESCED: &str = "vitrine_cache_coalesced_total";
const METRIC_FALLBACK: &str = "vitrine_cache_fallback_total";
const METRIC_PRODUCER_FAILED: &str = "vitrine_cache_producer_failed_total";
const METRIC_INVALIDATE: &str = "vitrine_cache_invalidate_total";
const METRIC_CLEAR: &str = "vitrine_cache_clear_total";

/// What waiters observe once the owner of a pending computation finishes.
#[derive(Clone)]
enum Settled<V> {
    /// A cacheable result every waiter may reuse.
    Shared(V),
    /// The producer failed or its result must not leave the owning request.
    Withheld,
}

/// Transient record for a computation in progress.
///
/// The result slot doubles as the completion signal: it is written exactly
/// once by the owner, and the channel closes when the owner goes away.
struct PendingComputation<V> {
    slot: watch::Receiver<Option<Settled<V>>>,
}

/// Held by the caller that registered a pending computation.
///
/// Dropping the guard unregisters the record, including when the owning
/// future is cancelled mid-production; waiters then see a closed channel.
struct OwnerGuard<'a, V> {
    pending: &'a DashMap<String, Arc<PendingComputation<V>>>,
    key: &'a str,
    record: Arc<PendingComputation<V>>,
    slot: watch::Sender<Option<Settled<V>>>,
}

impl<V> OwnerGuard<'_, V> {
    fn settle(&self, outcome: Settled<V>) {
        self.slot.send_replace(Some(outcome));
    }
}

impl<V> Drop for OwnerGuard<'_, V> {
    fn drop(&mut self) {
        self.pending
            .remove_if(self.key, |_, record| Arc::ptr_eq(record, &self.record));
    }
}

enum Registration<'a, V> {
    Owner(OwnerGuard<'a, V>),
    Waiter(Arc<PendingComputation<V>>),
}

/// Key-addressed cache with coalesced, budget-bounded production.
///
/// Entries and pending computations live in separate sharded maps so that
/// unrelated keys never contend on a shared lock. Producers never run while a
/// map shard is locked.
pub struct CoalescingCache<V> {
    name: &'static str,
    entries: DashMap<String, V>,
    pending: DashMap<String, Arc<PendingComputation<V>>>,
}

impl<V> CoalescingCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create an empty cache. `name` labels logs and metrics.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: DashMap::new(),
            pending: DashMap::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Read the entry for `key` without blocking or triggering computation.
    pub fn try_get(&self, key: &str) -> Option<V> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Return the cached value for `key`, or produce it.
    ///
    /// A caller that finds a computation already pending waits for it at most
    /// `wait_budget`. When the budget elapses, or the owner fails or withholds
    /// its result, the caller runs `producer` itself without re-registering.
    /// Producer errors are returned to the caller that ran the producer and
    /// are never cached.
    pub async fn get_or_compute<F, Fut, E, C>(
        &self,
        key: &str,
        producer: F,
        is_cacheable: C,
        wait_budget: Duration,
    ) -> Result<V, E>
    where
        F: FnOnce(&str) -> Fut,
        Fut: Future<Output = Result<V, E>>,
        C: Fn(&V) -> bool,
    {
        if let Some(value) = self.try_get(key) {
            counter!(METRIC_HIT, "cache" => self.name).increment(1);
            trace!(cache = self.name, key, outcome = "hit", "cache lookup");
            return Ok(value);
        }
        counter!(METRIC_MISS, "cache" => self.name).increment(1);

        let registration = match self.pending.entry(key.to_owned()) {
            Entry::Occupied(occupied) => Registration::Waiter(Arc::clone(occupied.get())),
            Entry::Vacant(vacant) => {
                let (tx, rx) = watch::channel(None);
                let record = Arc::new(PendingComputation { slot: rx });
                vacant.insert(Arc::clone(&record));
                Registration::Owner(OwnerGuard {
                    pending: &self.pending,
                    key,
                    record,
                    slot: tx,
                })
            }
        };

        match registration {
            Registration::Owner(guard) => {
                self.produce_as_owner(key, guard, producer, is_cacheable).await
            }
            Registration::Waiter(record) => {
                if let Some(value) = self.await_owner(key, &record, wait_budget).await {
                    counter!(METRIC_COALESCED, "cache" => self.name).increment(1);
                    return Ok(value);
                }
                counter!(METRIC_FALLBACK, "cache" => self.name).increment(1);
                self.produce_detached(key, producer, is_cacheable).await
            }
        }
    }

    /// Remove the entry for `key`. In-flight computations are unaffected.
    pub fn invalidate(&self, key: &str) -> bool {
        let removed = self.entries.remove(key).is_some();
        if removed {
            counter!(METRIC_INVALIDATE, "cache" => self.name).increment(1);
        }
        removed
    }

    /// Remove every entry whose key satisfies `predicate`.
    pub fn invalidate_matching(&self, predicate: impl Fn(&str) -> bool) -> usize {
        let mut removed = 0usize;
        self.entries.retain(|key, _| {
            let matched = predicate(key);
            removed += usize::from(matched);
            !matched
        });
        if removed > 0 {
            counter!(METRIC_INVALIDATE, "cache" => self.name).increment(removed as u64);
        }
        removed
    }

    /// Remove all entries.
    pub fn clear(&self) {
        self.entries.clear();
        counter!(METRIC_CLEAR, "cache" => self.name).increment(1);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of computations currently registered as pending.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    async fn produce_as_owner<F, Fut, E, C>(
        &self,
        key: &str,
        guard: OwnerGuard<'_, V>,
        producer: F,
        is_cacheable: C,
    ) -> Result<V, E>
    where
        F: FnOnce(&str) -> Fut,
        Fut: Future<Output = Result<V, E>>,
        C: Fn(&V) -> bool,
    {
        // The previous owner may have finished between the lookup and the
        // registration above.
        if let Some(value) = self.try_get(key) {
            guard.settle(Settled::Shared(value.clone()));
            return Ok(value);
        }

        debug!(cache = self.name, key, role = "owner", "producing entry");
        match producer(key).await {
            Ok(value) => {
                if is_cacheable(&value) {
                    self.entries.insert(key.to_owned(), value.clone());
                    guard.settle(Settled::Shared(value.clone()));
                } else {
                    debug!(cache = self.name, key, "result not cacheable");
                    guard.settle(Settled::Withheld);
                }
                Ok(value)
            }
            Err(err) => {
                counter!(METRIC_PRODUCER_FAILED, "cache" => self.name).increment(1);
                guard.settle(Settled::Withheld);
                Err(err)
            }
        }
    }

    async fn produce_detached<F, Fut, E, C>(
        &self,
        key: &str,
        producer: F,
        is_cacheable: C,
    ) -> Result<V, E>
    where
        F: FnOnce(&str) -> Fut,
        Fut: Future<Output = Result<V, E>>,
        C: Fn(&V) -> bool,
    {
        debug!(cache = self.name, key, role = "fallback", "producing entry");
        match producer(key).await {
            Ok(value) => {
                if is_cacheable(&value) {
                    self.entries.insert(key.to_owned(), value.clone());
                }
                Ok(value)
            }
            Err(err) => {
                counter!(METRIC_PRODUCER_FAILED, "cache" => self.name).increment(1);
                Err(err)
            }
        }
    }

    /// Wait for the owner of `record`, returning its shared result if one
    /// arrives within `budget`.
    async fn await_owner(
        &self,
        key: &str,
        record: &PendingComputation<V>,
        budget: Duration,
    ) -> Option<V> {
        let mut slot = record.slot.clone();

        if let Some(settled) = slot.borrow().as_ref() {
            return shared_value(settled);
        }

        let waited = tokio::time::timeout(budget, slot.wait_for(Option::is_some)).await;
        match waited {
            Ok(Ok(settled)) => (*settled).as_ref().and_then(shared_value),
            Ok(Err(_)) => {
                debug!(cache = self.name, key, "owner abandoned computation");
                None
            }
            Err(_) => {
                debug!(
                    cache = self.name,
                    key,
                    budget_ms = budget.as_millis() as u64,
                    "wait budget elapsed"
                );
                None
            }
        }
    }
}

fn shared_value<V: Clone>(settled: &Settled<V>) -> Option<V> {
    match settled {
        Settled::Shared(value) => Some(value.clone()),
        Settled::Withheld => None,
    }
}
