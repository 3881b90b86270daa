//! Per-key cache entries and their lifecycle.
//!
//! An entry moves through the following stages:
//!
//! ```text
//! Created ── load ──→ Active ── token dropped ──→ Stale
//!                       ↑                           │ sweep
//!                       │                           ↓
//!                       ├──── ensure_token ──── Marked
//!                       │                           │ sweep (strong result released)
//!                       │                           ↓
//!                       └──── ensure_token ──── Demoted ── sweep, result unreachable ──→ purged
//! ```
//!
//! A demoted entry whose result became unreachable is never handed a new
//! token; the registry replaces it with a fresh entry instead.
//!
//! The entry keeps a strong reference to the built collection, a weak mirror
//! of it, and a weak reference to the last token it issued. Releasing the
//! strong reference always happens one sweep *after* marking, so a caller that
//! comes back between the token dying and the next sweep still finds a strong
//! result and resurrects the entry without a rebuild.
//!
//! Lifecycle bookkeeping sits behind a short-lived state mutex that is only
//! touched while the owning registry holds its tier lock, or while the one
//! successful build publishes its result. The build itself runs inside a
//! [`OnceCell`], which is the per-entry lock: same-key callers block there
//! while unrelated keys build in parallel.

use metacache_core::{
    AuthorizationError, AuxiliaryResource, CacheKey, CacheToken, LoadError, Loaded,
    ReadAuthorizer, ReadPermission, TeardownError, WeakToken,
};
use once_cell::sync::OnceCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Instant;

/// Observable lifecycle stage of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryStage {
    /// Inserted in the map, no successful build yet.
    Created,
    /// Loaded and its token is still reachable.
    Active,
    /// Loaded, token dropped, not yet observed by a sweep.
    Stale,
    /// Token death observed; the strong result is still held.
    Marked,
    /// Strong result released; reachable only through external holders.
    Demoted,
}

/// Outcome of applying one sweep step to an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SweepAction {
    /// Token alive, nothing to do.
    Active,
    /// Token death observed, entry marked for cleanup.
    Marked,
    /// Strong result released.
    Demoted,
    /// Waiting for external holders of the result to let go.
    Waiting,
    /// Nothing references the result any more; remove the entry.
    Remove,
}

/// Outcome of [`CacheEntry::ensure_token`].
#[derive(Debug)]
pub enum TokenGrant {
    /// The last issued token is still alive and is handed out again.
    Shared(CacheToken),
    /// A new token for an entry that has not been loaded yet.
    Issued(CacheToken),
    /// A new token for a loaded entry whose token had died.
    Resurrected(CacheToken),
    /// The entry is loaded but nothing holds its result any more.
    Unreachable,
}

impl TokenGrant {
    /// The granted token, if any.
    pub fn into_token(self) -> Option<CacheToken> {
        match self {
            TokenGrant::Shared(token) | TokenGrant::Issued(token) | TokenGrant::Resurrected(token) => {
                Some(token)
            }
            TokenGrant::Unreachable => None,
        }
    }
}

struct EntryState<T: ?Sized> {
    result: Option<Arc<T>>,
    token: WeakToken,
    marked: bool,
}

/// State written once by the successful build.
struct Published<T: ?Sized, A> {
    weak_result: Weak<T>,
    permission: ReadPermission,
    auxiliary: Arc<A>,
}

/// One key's cache record.
pub struct CacheEntry<T: ?Sized, A> {
    key: CacheKey,
    state: Mutex<EntryState<T>>,
    published: OnceCell<Published<T, A>>,
    torn_down: AtomicBool,
}

impl<T, A> CacheEntry<T, A>
where
    T: ?Sized + Send + Sync + 'static,
    A: AuxiliaryResource,
{
    pub fn new(key: CacheKey) -> Self {
        Self {
            key,
            state: Mutex::new(EntryState {
                result: None,
                token: WeakToken::dangling(),
                marked: false,
            }),
            published: OnceCell::new(),
            torn_down: AtomicBool::new(false),
        }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    // No user code runs under this lock, so a poisoned guard still holds
    // consistent state.
    fn state(&self) -> MutexGuard<'_, EntryState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the one successful build has published its result.
    pub fn is_loaded(&self) -> bool {
        self.published.get().is_some()
    }

    fn weak_result_alive(&self) -> bool {
        self.published
            .get()
            .map(|published| published.weak_result.strong_count() > 0)
            .unwrap_or(false)
    }

    /// Whether the last issued token is still reachable.
    pub fn token_alive(&self) -> bool {
        self.state().token.is_alive()
    }

    /// Return a token that is reachable at the moment of return.
    ///
    /// A live token is shared. Otherwise a new token is issued; if the entry
    /// was demoted but its result is still reachable through an external
    /// holder, the strong reference is restored from the weak one. This is
    /// the only place the cleanup mark is cleared.
    ///
    /// A loaded entry whose result is no longer reachable is left untouched
    /// and reported as [`TokenGrant::Unreachable`]; the check and the
    /// restore happen under one acquisition of the state lock.
    pub fn ensure_token(&self) -> TokenGrant {
        let mut state = self.state();
        if let Some(token) = state.token.upgrade() {
            return TokenGrant::Shared(token);
        }

        let resurrected = match self.published.get() {
            Some(published) => {
                if state.result.is_none() {
                    state.result = published.weak_result.upgrade();
                }
                if state.result.is_none() {
                    return TokenGrant::Unreachable;
                }
                true
            }
            None => false,
        };

        let token = CacheToken::issue();
        state.token = token.downgrade();
        state.marked = false;
        if resurrected {
            TokenGrant::Resurrected(token)
        } else {
            TokenGrant::Issued(token)
        }
    }

    /// Run `loader` unless another caller already built this entry.
    ///
    /// Concurrent callers block on the entry until the first build finishes.
    /// A failed build publishes nothing, so the next caller retries it.
    /// Returns true when this call performed the build.
    pub fn load_with<F>(&self, loader: F) -> Result<bool, LoadError>
    where
        F: FnOnce(&CacheKey) -> Result<Loaded<T, A>, LoadError>,
    {
        let mut built = false;
        self.published.get_or_try_init(|| {
            let started = Instant::now();
            tracing::debug!(key = %self.key, "Building cache entry");

            let loaded = loader(&self.key)?;
            let weak_result = Arc::downgrade(&loaded.collection);
            self.state().result = Some(loaded.collection);
            built = true;

            tracing::debug!(
                key = %self.key,
                elapsed_ms = started.elapsed().as_millis() as u64,
                required_paths = loaded.permission.paths().len(),
                "Cache entry built"
            );

            Ok(Published {
                weak_result,
                permission: loaded.permission,
                auxiliary: Arc::new(loaded.auxiliary),
            })
        })?;
        Ok(built)
    }

    /// Re-validate the caller against the paths the build had to read.
    pub fn demand(&self, authorizer: &dyn ReadAuthorizer) -> Result<(), AuthorizationError> {
        match self.published.get() {
            Some(published) => published.permission.demand(authorizer),
            None => Ok(()),
        }
    }

    /// The built collection, if it is still reachable.
    pub fn collection(&self) -> Option<Arc<T>> {
        if let Some(result) = self.state().result.clone() {
            return Some(result);
        }
        self.published.get()?.weak_result.upgrade()
    }

    /// The entry's auxiliary resource, once loaded.
    pub fn auxiliary(&self) -> Option<Arc<A>> {
        self.published
            .get()
            .map(|published| Arc::clone(&published.auxiliary))
    }

    /// Paths captured by the build.
    pub fn permission(&self) -> Option<&ReadPermission> {
        self.published.get().map(|published| &published.permission)
    }

    pub fn stage(&self) -> EntryStage {
        let state = self.state();
        if !self.is_loaded() {
            EntryStage::Created
        } else if state.token.is_alive() {
            EntryStage::Active
        } else if !state.marked {
            EntryStage::Stale
        } else if state.result.is_some() {
            EntryStage::Marked
        } else {
            EntryStage::Demoted
        }
    }

    /// Advance the entry one lifecycle step.
    pub fn sweep_step(&self) -> SweepAction {
        let mut state = self.state();
        if state.token.is_alive() {
            return SweepAction::Active;
        }
        if !state.marked {
            state.marked = true;
            return SweepAction::Marked;
        }
        if state.result.take().is_some() {
            return SweepAction::Demoted;
        }
        if self.weak_result_alive() {
            SweepAction::Waiting
        } else {
            SweepAction::Remove
        }
    }

    /// Tear down the auxiliary resource.
    ///
    /// Returns `None` when this entry was already torn down or never loaded.
    /// A panicking teardown is reported as a [`TeardownError`].
    pub fn teardown_auxiliary(&self) -> Option<Result<(), TeardownError>> {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return None;
        }
        let auxiliary = self.auxiliary()?;
        let outcome = catch_unwind(AssertUnwindSafe(|| auxiliary.teardown())).unwrap_or_else(|_| {
            Err(TeardownError {
                resource: self.key.to_string(),
                reason: "teardown panicked".to_string(),
            })
        });
        Some(outcome)
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metacache_core::{NoAuxiliary, RootedAuthorizer, Unrestricted};
    use metacache_test_utils::{RecordingResource, SchemaGraph};

    type SchemaEntry = CacheEntry<SchemaGraph, NoAuxiliary>;

    fn loaded_entry(key: &str) -> (SchemaEntry, CacheToken, Arc<SchemaGraph>) {
        let entry = SchemaEntry::new(CacheKey::new(key));
        let token = entry.ensure_token().into_token().unwrap();
        let graph = Arc::new(SchemaGraph::named(key));
        let published = Arc::clone(&graph);
        entry
            .load_with(move |_| Ok(Loaded::new(published, ReadPermission::none())))
            .unwrap();
        (entry, token, graph)
    }

    #[test]
    fn test_live_token_is_shared() {
        let entry = SchemaEntry::new(CacheKey::new("a"));
        let first = entry.ensure_token();
        assert!(matches!(first, TokenGrant::Issued(_)));
        let first = first.into_token().unwrap();
        match entry.ensure_token() {
            TokenGrant::Shared(second) => assert!(first.ptr_eq(&second)),
            other => panic!("expected shared token, got {:?}", other),
        }
    }

    #[test]
    fn test_dead_token_is_replaced() {
        let entry = SchemaEntry::new(CacheKey::new("a"));
        let first = entry.ensure_token().into_token().unwrap();
        let weak = first.downgrade();
        drop(first);
        let second = entry.ensure_token().into_token().unwrap();
        assert!(!weak.is_alive());
        assert!(entry.token_alive());
        drop(second);
        assert!(!entry.token_alive());
    }

    #[test]
    fn test_load_runs_once() {
        let (entry, _token, graph) = loaded_entry("a");
        let built = entry
            .load_with(|_| panic!("loader must not run twice"))
            .unwrap();
        assert!(!built);
        assert!(Arc::ptr_eq(&entry.collection().unwrap(), &graph));
    }

    #[test]
    fn test_failed_load_publishes_nothing() {
        let entry = SchemaEntry::new(CacheKey::new("a"));
        let err = entry
            .load_with(|key| {
                Err(LoadError::InvalidArtifact {
                    location: key.to_string(),
                    reason: "bad".to_string(),
                })
            })
            .unwrap_err();
        assert!(matches!(err, LoadError::InvalidArtifact { .. }));
        assert!(!entry.is_loaded());
        assert!(entry.collection().is_none());
        assert_eq!(entry.stage(), EntryStage::Created);
    }

    #[test]
    fn test_sweep_steps_mark_then_demote_then_remove() {
        let (entry, token, graph) = loaded_entry("a");
        assert_eq!(entry.sweep_step(), SweepAction::Active);
        assert_eq!(entry.stage(), EntryStage::Active);

        drop(token);
        assert_eq!(entry.stage(), EntryStage::Stale);
        assert_eq!(entry.sweep_step(), SweepAction::Marked);
        assert_eq!(entry.stage(), EntryStage::Marked);
        assert!(entry.collection().is_some());

        assert_eq!(entry.sweep_step(), SweepAction::Demoted);
        assert_eq!(entry.stage(), EntryStage::Demoted);

        // An external holder keeps the result reachable.
        assert_eq!(entry.sweep_step(), SweepAction::Waiting);
        drop(graph);
        assert_eq!(entry.sweep_step(), SweepAction::Remove);
        assert!(matches!(entry.ensure_token(), TokenGrant::Unreachable));
    }

    #[test]
    fn test_resurrection_from_marked_keeps_result() {
        let (entry, token, graph) = loaded_entry("a");
        drop(token);
        assert_eq!(entry.sweep_step(), SweepAction::Marked);

        let token = match entry.ensure_token() {
            TokenGrant::Resurrected(token) => token,
            other => panic!("expected resurrection, got {:?}", other),
        };
        assert_eq!(entry.stage(), EntryStage::Active);
        assert_eq!(entry.sweep_step(), SweepAction::Active);
        assert!(Arc::ptr_eq(&entry.collection().unwrap(), &graph));
        drop(token);
    }

    #[test]
    fn test_resurrection_from_demoted_restores_strong_result() {
        let (entry, token, graph) = loaded_entry("a");
        drop(token);
        entry.sweep_step();
        entry.sweep_step();
        assert_eq!(entry.stage(), EntryStage::Demoted);

        let _token = match entry.ensure_token() {
            TokenGrant::Resurrected(token) => token,
            other => panic!("expected resurrection, got {:?}", other),
        };
        drop(graph);
        // The entry holds the strong reference again, so the result survives.
        assert!(entry.collection().is_some());
        assert_eq!(entry.stage(), EntryStage::Active);
    }

    #[test]
    fn test_unloaded_entry_with_dead_token_is_removed_after_mark() {
        let entry = SchemaEntry::new(CacheKey::new("a"));
        let token = entry.ensure_token().into_token().unwrap();
        drop(token);
        assert_eq!(entry.sweep_step(), SweepAction::Marked);
        assert_eq!(entry.sweep_step(), SweepAction::Remove);
    }

    #[test]
    fn test_result_dropped_after_demotion_is_never_resurrected_empty() {
        let (entry, token, graph) = loaded_entry("a");
        drop(token);
        entry.sweep_step();
        entry.sweep_step();
        assert_eq!(entry.stage(), EntryStage::Demoted);

        // The last external holder lets go between a lookup deciding to reuse
        // the entry and the entry issuing its token.
        drop(graph);
        assert!(matches!(entry.ensure_token(), TokenGrant::Unreachable));

        // Nothing was mutated: the entry stays demoted and keeps refusing.
        assert_eq!(entry.stage(), EntryStage::Demoted);
        assert!(!entry.token_alive());
        assert!(matches!(entry.ensure_token(), TokenGrant::Unreachable));
        assert_eq!(entry.sweep_step(), SweepAction::Remove);
    }

    #[test]
    fn test_demand_checks_captured_paths() {
        let entry = SchemaEntry::new(CacheKey::new("a"));
        let _token = entry.ensure_token().into_token().unwrap();
        entry
            .load_with(|_| {
                Ok(Loaded::new(
                    Arc::new(SchemaGraph::named("a")),
                    ReadPermission::new(["/srv/models/a.csdl"]),
                ))
            })
            .unwrap();

        assert!(entry.demand(&Unrestricted).is_ok());
        assert!(entry.demand(&RootedAuthorizer::new(["/srv/models"])).is_ok());
        assert!(entry.demand(&RootedAuthorizer::new(["/tmp"])).is_err());
    }

    #[test]
    fn test_teardown_runs_at_most_once() {
        let entry: CacheEntry<SchemaGraph, RecordingResource> = CacheEntry::new(CacheKey::new("s"));
        let resource = RecordingResource::new();
        let recorder = resource.clone();
        entry
            .load_with(move |_| {
                Ok(Loaded::with_auxiliary(
                    Arc::new(SchemaGraph::named("s")),
                    ReadPermission::none(),
                    resource,
                ))
            })
            .unwrap();

        assert_eq!(entry.teardown_auxiliary(), Some(Ok(())));
        assert_eq!(entry.teardown_auxiliary(), None);
        assert_eq!(recorder.teardowns(), 1);
        assert!(entry.is_torn_down());
    }

    #[test]
    fn test_panicking_teardown_is_reported() {
        let entry: CacheEntry<SchemaGraph, RecordingResource> = CacheEntry::new(CacheKey::new("s"));
        entry
            .load_with(|_| {
                Ok(Loaded::with_auxiliary(
                    Arc::new(SchemaGraph::named("s")),
                    ReadPermission::none(),
                    RecordingResource::panicking(),
                ))
            })
            .unwrap();

        let outcome = entry.teardown_auxiliary().expect("first teardown");
        assert_eq!(outcome.unwrap_err().reason, "teardown panicked");
    }
}
