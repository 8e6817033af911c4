//! Cascading set with target convergence.
//!
//! A [`LinkedSet`] is a thread-safe set of keys, each carrying an optional
//! payload. Mutations cascade to every set connected to it, and callers can
//! declare a target membership and block until the set reaches it.
//!
//! Cascades run after the originating set has released its own lock, so
//! each set's lock is held only while its own state changes. A cascaded add
//! of a key that is already present, or a cascaded remove of a key that is
//! already gone, stops there. Link cycles (A -> B -> A) therefore terminate
//! and cannot deadlock.

pub mod filter;

use std::any::Any;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use arc_swap::ArcSwap;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;

use crate::error::MirrorError;

use self::filter::{AllMembers, TargetFilter};

/// Bounds every set key satisfies.
pub trait SetKey: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static {}

impl<T> SetKey for T where T: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static {}

/// Bounds every payload satisfies.
pub trait Payload: Clone + Send + Sync + 'static {}

impl<T> Payload for T where T: Clone + Send + Sync + 'static {}

/// Links are associations, not ownership: a dropped set silently leaves
/// the cascade.
type Links<K, R> = Vec<Weak<LinkedSet<K, R>>>;

struct Inner<K, R> {
    /// Members and their payloads. A member may carry no payload.
    members: FxHashMap<K, Option<R>>,
    /// Keys that ignore cascaded mutations.
    exclusive: FxHashSet<K>,
    /// Active target, cleared once reached.
    target: Option<FxHashSet<K>>,
    /// Convergence signal. Stays set until the next `set_target`/`clear_target`.
    reached: bool,
}

pub struct LinkedSet<K, R = ()> {
    inner: Mutex<Inner<K, R>>,
    reached_cv: Condvar,
    links: ArcSwap<Links<K, R>>,
    filter: Arc<dyn TargetFilter<K>>,
}

impl<K: SetKey, R: Payload> Default for LinkedSet<K, R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: SetKey, R: Payload> LinkedSet<K, R> {
    /// Create an empty set in which every member counts toward targets.
    pub fn new() -> Self {
        Self::with_filter(AllMembers)
    }

    /// Create an empty set using `filter` for target comparisons.
    pub fn with_filter(filter: impl TargetFilter<K> + 'static) -> Self {
        Self {
            inner: Mutex::new(Inner {
                members: FxHashMap::default(),
                exclusive: FxHashSet::default(),
                target: None,
                reached: false,
            }),
            reached_cv: Condvar::new(),
            links: ArcSwap::from_pointee(Vec::new()),
            filter: Arc::new(filter),
        }
    }

    /// Create a set pre-populated with `keys`, none of them carrying a payload.
    pub fn from_keys(keys: impl IntoIterator<Item = K>) -> Self {
        let set = Self::new();
        set.lock()
            .members
            .extend(keys.into_iter().map(|k| (k, None)));
        set
    }

    fn lock(&self) -> MutexGuard<'_, Inner<K, R>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    /// Add `key` with an optional payload and cascade it to every linked set.
    ///
    /// Adding a key that is already a member changes nothing: the stored
    /// payload is kept and nothing cascades.
    pub fn add(&self, key: K, payload: Option<R>) {
        self.insert(key, payload, false);
    }

    fn insert(&self, key: K, payload: Option<R>, cascaded: bool) {
        {
            let mut inner = self.lock();
            if cascaded && inner.exclusive.contains(&key) {
                log::trace!("cascaded add of {key:?} suppressed by unlink");
                return;
            }
            if inner.members.contains_key(&key) {
                self.check_target(&mut inner);
                return;
            }
            inner.members.insert(key.clone(), payload.clone());
            self.check_target(&mut inner);
        }

        for link in self.live_links() {
            log::trace!("cascading add of {key:?}");
            link.insert(key.clone(), payload.clone(), true);
        }
    }

    /// Remove `key` and cascade the removal to every linked set holding it.
    ///
    /// Fails with [`MirrorError::KeyNotFound`] if `key` is not a member of
    /// this set. Linked sets that lack the key are skipped.
    pub fn remove(&self, key: &K) -> Result<(), MirrorError> {
        {
            let mut inner = self.lock();
            if inner.members.remove(key).is_none() {
                return Err(MirrorError::KeyNotFound(format!("{key:?}")));
            }
            self.check_target(&mut inner);
        }
        self.cascade_remove(key);
        Ok(())
    }

    fn remove_cascaded(&self, key: &K) {
        {
            let mut inner = self.lock();
            if inner.exclusive.contains(key) {
                log::trace!("cascaded remove of {key:?} suppressed by unlink");
                return;
            }
            if inner.members.remove(key).is_none() {
                return;
            }
            self.check_target(&mut inner);
        }
        self.cascade_remove(key);
    }

    fn cascade_remove(&self, key: &K) {
        for link in self.live_links() {
            log::trace!("cascading remove of {key:?}");
            link.remove_cascaded(key);
        }
    }

    // -----------------------------------------------------------------------
    // Target convergence
    // -----------------------------------------------------------------------

    /// Declare the desired membership and clear the convergence signal.
    ///
    /// The target is checked immediately, so a set that already matches it
    /// signals without waiting for another mutation.
    pub fn set_target(&self, desired: impl IntoIterator<Item = K>) {
        let mut inner = self.lock();
        inner.target = Some(desired.into_iter().collect());
        inner.reached = false;
        self.check_target(&mut inner);
    }

    /// Drop any active target and clear the convergence signal.
    pub fn clear_target(&self) {
        let mut inner = self.lock();
        inner.target = None;
        inner.reached = false;
    }

    /// Compare filtered members with the filtered target. Reaching the
    /// target deactivates it and wakes every waiter.
    fn check_target(&self, inner: &mut Inner<K, R>) {
        let matched = match inner.target.as_ref() {
            None => return,
            Some(target) => {
                let current: FxHashSet<&K> = inner
                    .members
                    .keys()
                    .filter(|k| self.filter.counts(k))
                    .collect();
                let wanted: FxHashSet<&K> =
                    target.iter().filter(|k| self.filter.counts(k)).collect();
                current == wanted
            }
        };
        if matched {
            log::debug!("target reached with {} members", inner.members.len());
            inner.target = None;
            inner.reached = true;
            self.reached_cv.notify_all();
        }
    }

    /// Block until the target is reached or `timeout` elapses.
    ///
    /// `None` waits without a deadline. Returns whether the convergence
    /// signal was observed set.
    pub fn wait_for_target(&self, timeout: Option<Duration>) -> bool {
        let inner = self.lock();
        match timeout {
            None => {
                let inner = self
                    .reached_cv
                    .wait_while(inner, |i| !i.reached)
                    .unwrap_or_else(PoisonError::into_inner);
                inner.reached
            }
            Some(timeout) => {
                let (inner, _) = self
                    .reached_cv
                    .wait_timeout_while(inner, timeout, |i| !i.reached)
                    .unwrap_or_else(PoisonError::into_inner);
                inner.reached
            }
        }
    }

    pub fn has_target(&self) -> bool {
        self.lock().target.is_some()
    }

    pub fn is_reached(&self) -> bool {
        self.lock().reached
    }

    // -----------------------------------------------------------------------
    // Cascade exclusion
    // -----------------------------------------------------------------------

    /// Exclude `key` from cascaded updates. Direct mutations still apply.
    pub fn unlink(&self, key: K) {
        self.lock().exclusive.insert(key);
    }

    /// Accept cascaded updates for `key` again.
    pub fn relink(&self, key: &K) -> Result<(), MirrorError> {
        if self.lock().exclusive.remove(key) {
            Ok(())
        } else {
            Err(MirrorError::KeyNotExcluded(format!("{key:?}")))
        }
    }

    // -----------------------------------------------------------------------
    // Links
    // -----------------------------------------------------------------------

    /// Cascade future mutations of this set into `other`.
    ///
    /// Existing members are not copied over.
    pub fn connect(&self, other: &Arc<Self>) {
        let weak = Arc::downgrade(other);
        self.links.rcu(|links| {
            let mut next = links.to_vec();
            next.push(weak.clone());
            next
        });
    }

    /// Connect a type-erased object, failing unless it is a set of the same
    /// key and payload types.
    pub fn connect_any(&self, other: Arc<dyn Any + Send + Sync>) -> Result<(), MirrorError> {
        let other = other
            .downcast::<Self>()
            .map_err(|_| MirrorError::TypeMismatch {
                expected: std::any::type_name::<Self>(),
            })?;
        self.connect(&other);
        Ok(())
    }

    /// Stop cascading into `other`. Removes the earliest matching link.
    pub fn disconnect(&self, other: &Arc<Self>) -> Result<(), MirrorError> {
        let target = Arc::as_ptr(other);
        let mut found = false;
        self.links.rcu(|links| {
            let mut next = links.to_vec();
            found = match next.iter().position(|w| std::ptr::eq(w.as_ptr(), target)) {
                Some(pos) => {
                    next.remove(pos);
                    true
                }
                None => false,
            };
            next
        });
        if found {
            Ok(())
        } else {
            Err(MirrorError::LinkNotFound)
        }
    }

    /// Linked sets still alive, in connection order. Links to dropped sets
    /// are pruned from the list.
    fn live_links(&self) -> Vec<Arc<Self>> {
        let links = self.links.load();
        let live: Vec<Arc<Self>> = links.iter().filter_map(Weak::upgrade).collect();
        if live.len() != links.len() {
            drop(links);
            let mut pruned = 0;
            self.links.rcu(|links| {
                let next: Links<K, R> = links
                    .iter()
                    .filter(|w| w.strong_count() > 0)
                    .cloned()
                    .collect();
                pruned = links.len() - next.len();
                next
            });
            if pruned > 0 {
                log::warn!("pruned {pruned} dropped link(s) during cascade");
            }
        }
        live
    }

    pub fn link_count(&self) -> usize {
        self.links.load().len()
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub fn contains(&self, key: &K) -> bool {
        self.lock().members.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().members.is_empty()
    }

    pub fn keys(&self) -> Vec<K> {
        self.lock().members.keys().cloned().collect()
    }

    /// Payload stored with `key`. `None` if `key` is absent or has no payload.
    pub fn get(&self, key: &K) -> Option<R> {
        self.lock().members.get(key).cloned().flatten()
    }

    /// Point-in-time copy of the set, suitable for serialization.
    pub fn snapshot(&self) -> Snapshot<K, R> {
        let inner = self.lock();
        Snapshot {
            entries: inner
                .members
                .iter()
                .map(|(key, payload)| Entry {
                    key: key.clone(),
                    payload: payload.clone(),
                })
                .collect(),
            target: inner.target.as_ref().map(|t| t.iter().cloned().collect()),
            reached: inner.reached,
        }
    }
}

impl<K: SetKey, R: Payload> fmt::Debug for LinkedSet<K, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.lock().members.keys()).finish()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Entry<K, R> {
    pub key: K,
    pub payload: Option<R>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Snapshot<K, R> {
    pub entries: Vec<Entry<K, R>>,
    pub target: Option<Vec<K>>,
    pub reached: bool,
}
