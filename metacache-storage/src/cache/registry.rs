//! Tier registries: get-or-create, reset and sweep.
//!
//! A [`Registry`] maps keys to [`CacheEntry`] records behind a single tier
//! lock. The tier lock only guards map structure and short bookkeeping
//! (entry creation, token issuance, sweep transitions); builds run under the
//! per-entry lock so unrelated keys never wait on each other.
//!
//! Entries evicted by [`Registry::clear`] while their token is still alive
//! are parked on a side-list. The sweeper tears down their auxiliary
//! resource once the token dies.

use super::entry::{CacheEntry, EntryStage, SweepAction, TokenGrant};
use metacache_core::{
    AuxiliaryResource, CacheError, CacheKey, CacheResult, CacheToken, LoadError, Loaded,
    ReadAuthorizer, TierKind,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

/// Result of a get-or-create lookup.
pub struct CacheLookup<T: ?Sized, A> {
    /// The built collection, reference-identical for every caller of the key.
    pub collection: Arc<T>,
    /// The entry's auxiliary resource.
    pub auxiliary: Arc<A>,
    /// Liveness token; keep it reachable for as long as the collection is in use.
    pub token: CacheToken,
}

impl<T: ?Sized, A> fmt::Debug for CacheLookup<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheLookup")
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

/// Counts produced by one sweep over a tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub marked: u64,
    pub demoted: u64,
    pub waiting: u64,
    pub purged: u64,
    pub torn_down: u64,
    pub teardown_failures: u64,
}

impl SweepReport {
    /// Whether the sweep changed anything.
    pub fn is_idle(&self) -> bool {
        self.marked == 0 && self.demoted == 0 && self.purged == 0 && self.torn_down == 0
    }

    /// Sum of two reports.
    pub fn merge(self, other: SweepReport) -> SweepReport {
        SweepReport {
            marked: self.marked + other.marked,
            demoted: self.demoted + other.demoted,
            waiting: self.waiting + other.waiting,
            purged: self.purged + other.purged,
            torn_down: self.torn_down + other.torn_down,
            teardown_failures: self.teardown_failures + other.teardown_failures,
        }
    }
}

struct TierState<T: ?Sized, A> {
    entries: HashMap<CacheKey, Arc<CacheEntry<T, A>>>,
    /// Entries reset while still in use, awaiting deferred teardown.
    evicted: Vec<Arc<CacheEntry<T, A>>>,
}

/// Key-to-entry map for one tier.
pub struct Registry<T: ?Sized, A> {
    tier: TierKind,
    log_purges: bool,
    state: Mutex<TierState<T, A>>,
}

impl<T, A> Registry<T, A>
where
    T: ?Sized + Send + Sync + 'static,
    A: AuxiliaryResource,
{
    pub fn new(tier: TierKind) -> Self {
        Self {
            tier,
            log_purges: true,
            state: Mutex::new(TierState {
                entries: HashMap::new(),
                evicted: Vec::new(),
            }),
        }
    }

    /// Enable or disable the per-entry purge log event.
    pub fn with_log_purges(mut self, enabled: bool) -> Self {
        self.log_purges = enabled;
        self
    }

    pub fn tier(&self) -> TierKind {
        self.tier
    }

    fn lock(&self) -> CacheResult<MutexGuard<'_, TierState<T, A>>> {
        self.state
            .lock()
            .map_err(|_| CacheError::LockPoisoned { tier: self.tier })
    }

    /// Find or insert the entry for `key` and obtain its token.
    ///
    /// An entry whose result is no longer reachable is swapped for a fresh
    /// one under the same tier lock; the old entry is returned for teardown.
    fn acquire(
        &self,
        key: &CacheKey,
    ) -> CacheResult<(Arc<CacheEntry<T, A>>, CacheToken, Option<Arc<CacheEntry<T, A>>>)> {
        let mut state = self.lock()?;
        let mut retired = None;

        if let Some(entry) = state.entries.get(key).cloned() {
            match entry.ensure_token() {
                TokenGrant::Shared(token) | TokenGrant::Issued(token) => {
                    return Ok((entry, token, None));
                }
                TokenGrant::Resurrected(token) => {
                    tracing::debug!(tier = %self.tier, key = %key, "Cache entry resurrected");
                    return Ok((entry, token, None));
                }
                TokenGrant::Unreachable => {
                    tracing::debug!(tier = %self.tier, key = %key, "Cache entry unreachable, replacing");
                    retired = Some(entry);
                }
            }
        }

        let entry = Arc::new(CacheEntry::new(key.clone()));
        let token = entry
            .ensure_token()
            .into_token()
            .ok_or_else(|| CacheError::Reclaimed {
                key: key.to_string(),
            })?;
        state.entries.insert(key.clone(), Arc::clone(&entry));
        tracing::debug!(tier = %self.tier, key = %key, "Cache entry created");
        Ok((entry, token, retired))
    }

    /// Drop `entry` from the map if it is still the one registered for `key`.
    ///
    /// Teardown is deferred through the side-list while a token is alive.
    fn evict(&self, key: &CacheKey, entry: &Arc<CacheEntry<T, A>>) -> CacheResult<()> {
        let dead = {
            let mut state = self.lock()?;
            let registered = state
                .entries
                .get(key)
                .map(|current| Arc::ptr_eq(current, entry))
                .unwrap_or(false);
            if registered {
                state.entries.remove(key);
            }
            if !A::REQUIRES_TEARDOWN {
                false
            } else if entry.token_alive() {
                state.evicted.push(Arc::clone(entry));
                false
            } else {
                true
            }
        };
        if dead {
            self.teardown(entry);
        }
        Ok(())
    }

    /// Return the collection for `key`, building it with `loader` at most once.
    ///
    /// 1. Under the tier lock, find or insert the entry and obtain its token.
    ///    An entry whose result is no longer reachable is replaced there.
    /// 2. If the entry is not loaded, build it under the per-entry lock.
    ///    Concurrent callers for the same key block there and reuse the build.
    /// 3. If the entry was already loaded, re-validate the caller against the
    ///    paths the original build had to read.
    ///
    /// A failed build leaves the entry unloaded and the error is returned;
    /// nothing is cached for the failure. A loaded entry found without a
    /// result is evicted and the lookup retried against a fresh entry.
    pub fn get_or_create<F>(
        &self,
        key: &CacheKey,
        authorizer: &dyn ReadAuthorizer,
        loader: F,
    ) -> CacheResult<CacheLookup<T, A>>
    where
        F: FnOnce(&CacheKey) -> Result<Loaded<T, A>, LoadError>,
    {
        let mut loader = Some(loader);
        loop {
            let (entry, token, retired) = self.acquire(key)?;
            if let Some(stale) = retired {
                self.teardown(&stale);
            }

            if entry.is_loaded() {
                if let Err(err) = entry.demand(authorizer) {
                    tracing::warn!(
                        tier = %self.tier,
                        key = %key,
                        error = %err,
                        "Read authorization failed on cache hit"
                    );
                    return Err(err.into());
                }
            } else {
                let load = loader.take().ok_or_else(|| CacheError::Reclaimed {
                    key: key.to_string(),
                })?;
                entry.load_with(load)?;
            }

            if let (Some(collection), Some(auxiliary)) = (entry.collection(), entry.auxiliary()) {
                return Ok(CacheLookup {
                    collection,
                    auxiliary,
                    token,
                });
            }

            tracing::warn!(tier = %self.tier, key = %key, "Cached result reclaimed, rebuilding");
            drop(token);
            self.evict(key, &entry)?;
        }
    }

    /// Advance every entry one lifecycle step and remove dead entries.
    ///
    /// Side-listed entries whose token has died are torn down first.
    /// Teardown runs after the tier lock is released; a failing teardown is
    /// logged and counted without stopping the sweep.
    pub fn sweep(&self) -> CacheResult<SweepReport> {
        let mut report = SweepReport::default();
        let mut finished = Vec::new();

        {
            let mut state = self.lock()?;

            state.evicted.retain(|entry| {
                if entry.token_alive() {
                    true
                } else {
                    finished.push(Arc::clone(entry));
                    false
                }
            });

            let tier = self.tier;
            let log_purges = self.log_purges;
            state.entries.retain(|key, entry| match entry.sweep_step() {
                SweepAction::Active => true,
                SweepAction::Marked => {
                    tracing::trace!(tier = %tier, key = %key, "Cache entry marked for cleanup");
                    report.marked += 1;
                    true
                }
                SweepAction::Demoted => {
                    tracing::trace!(tier = %tier, key = %key, "Cache entry released strong result");
                    report.demoted += 1;
                    true
                }
                SweepAction::Waiting => {
                    report.waiting += 1;
                    true
                }
                SweepAction::Remove => {
                    if log_purges {
                        tracing::debug!(tier = %tier, key = %key, "Cache entry purged");
                    }
                    report.purged += 1;
                    finished.push(Arc::clone(entry));
                    false
                }
            });
        }

        for entry in &finished {
            match self.teardown(entry) {
                Some(true) => report.torn_down += 1,
                Some(false) => report.teardown_failures += 1,
                None => {}
            }
        }

        Ok(report)
    }

    /// Discard every entry.
    ///
    /// Tiers without auxiliary resources simply drop their map. Otherwise an
    /// entry whose token is still alive moves to the side-list, and every
    /// other entry is torn down before this returns. Callers that obtained a
    /// token before the reset keep a valid, now map-orphaned, result.
    pub fn clear(&self) -> CacheResult<()> {
        let mut dead = Vec::new();
        let (discarded, deferred) = {
            let mut state = self.lock()?;
            let entries = std::mem::take(&mut state.entries);
            let discarded = entries.len();
            let mut deferred = 0usize;
            if A::REQUIRES_TEARDOWN {
                for (_, entry) in entries {
                    if entry.token_alive() {
                        state.evicted.push(entry);
                        deferred += 1;
                    } else {
                        dead.push(entry);
                    }
                }
            }
            (discarded, deferred)
        };

        for entry in &dead {
            self.teardown(entry);
        }

        tracing::debug!(
            tier = %self.tier,
            discarded = discarded,
            deferred = deferred,
            "Cache tier cleared"
        );
        Ok(())
    }

    /// Tear down an entry's auxiliary resource, logging failures.
    ///
    /// `Some(true)` on success, `Some(false)` on failure, `None` when there
    /// was nothing left to tear down.
    fn teardown(&self, entry: &CacheEntry<T, A>) -> Option<bool> {
        match entry.teardown_auxiliary()? {
            Ok(()) => {
                tracing::debug!(tier = %self.tier, key = %entry.key(), "Auxiliary resource torn down");
                Some(true)
            }
            Err(err) => {
                tracing::error!(
                    tier = %self.tier,
                    key = %entry.key(),
                    error = %err,
                    "Failed to tear down auxiliary resource"
                );
                Some(false)
            }
        }
    }

    /// Lifecycle stage of the entry for `key`, if present in the map.
    pub fn stage(&self, key: &CacheKey) -> CacheResult<Option<EntryStage>> {
        Ok(self.lock()?.entries.get(key).map(|entry| entry.stage()))
    }

    pub fn contains(&self, key: &CacheKey) -> CacheResult<bool> {
        Ok(self.lock()?.entries.contains_key(key))
    }

    pub fn len(&self) -> CacheResult<usize> {
        Ok(self.lock()?.entries.len())
    }

    pub fn is_empty(&self) -> CacheResult<bool> {
        Ok(self.lock()?.entries.is_empty())
    }

    /// Number of entries awaiting deferred teardown.
    pub fn evicted_len(&self) -> CacheResult<usize> {
        Ok(self.lock()?.evicted.len())
    }
}

#[cfg(test)]
impl<T: ?Sized, A> Registry<T, A> {
    /// Poison the tier lock by panicking while it is held.
    pub(crate) fn poison(&self) {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = self.state.lock();
            panic!("poisoning {} tier lock", self.tier);
        }));
    }
}
