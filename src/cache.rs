//! Query cache for task list views
//!
//! One mutex guards every view, so a multi-view operation (optimistic write,
//! restore, invalidation) is applied to all matching views or to none.
//!
//! Each entry carries an epoch. Fetches are tagged with the epoch they started
//! under and are dropped if anything bumped it in the meantime, which keeps a
//! slow response from overwriting a newer optimistic write.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::models::{Task, ViewFilter, ViewKey};

/// Selects a set of cached views
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewPattern {
    owner: Option<String>,
    filter: Option<ViewFilter>,
}

impl ViewPattern {
    /// Every task view of every owner
    pub fn all() -> Self {
        Self::default()
    }

    pub fn owner(owner: &str) -> Self {
        Self {
            owner: Some(owner.to_string()),
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: ViewFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn matches(&self, key: &ViewKey) -> bool {
        self.owner.as_ref().is_none_or(|owner| owner == &key.owner)
            && self.filter.is_none_or(|filter| filter == key.filter)
    }
}

/// What a view currently holds
#[derive(Debug, Clone, PartialEq)]
pub struct CachedView {
    pub data: Vec<Task>,
    pub stale: bool,
}

/// Pre-mutation copy of a set of views
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    views: Vec<(ViewKey, Option<Vec<Task>>)>,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    pub fn get(&self, key: &ViewKey) -> Option<&[Task]> {
        self.views
            .iter()
            .find(|(k, _)| k == key)
            .and_then(|(_, data)| data.as_deref())
    }
}

/// Handed out when a fetch starts; redeemed with `complete_fetch`
#[derive(Debug)]
pub struct FetchTicket {
    key: ViewKey,
    epoch: u64,
}

impl FetchTicket {
    pub fn key(&self) -> &ViewKey {
        &self.key
    }
}

#[derive(Debug)]
struct Entry {
    // None until the first fetch lands
    data: Option<Vec<Task>>,
    stale: bool,
    epoch: u64,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<ViewKey, Entry>,
    // Global so an evicted and re-created view never reuses an epoch
    epoch: u64,
}

impl Inner {
    fn next_epoch(&mut self) -> u64 {
        self.epoch += 1;
        self.epoch
    }
}

#[derive(Debug, Default)]
pub struct QueryCache {
    inner: Mutex<Inner>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Cache state stays consistent even if a holder panicked
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn read(&self, key: &ViewKey) -> Option<CachedView> {
        let inner = self.lock();
        let entry = inner.entries.get(key)?;
        entry.data.as_ref().map(|data| CachedView {
            data: data.clone(),
            stale: entry.stale,
        })
    }

    /// Store fresh data for a view
    pub fn write(&self, key: ViewKey, data: Vec<Task>) {
        let mut inner = self.lock();
        let epoch = inner.next_epoch();
        inner.entries.insert(
            key,
            Entry {
                data: Some(data),
                stale: false,
                epoch,
            },
        );
    }

    /// Mark matching views stale and supersede their in-flight fetches.
    /// Returns how many views were touched.
    pub fn invalidate(&self, pattern: &ViewPattern) -> usize {
        let mut inner = self.lock();
        let epoch = inner.next_epoch();
        let mut touched = 0;
        for (key, entry) in inner.entries.iter_mut() {
            if pattern.matches(key) {
                entry.stale = true;
                entry.epoch = epoch;
                touched += 1;
            }
        }
        touched
    }

    /// Supersede in-flight fetches without touching data
    pub fn cancel(&self, pattern: &ViewPattern) {
        let mut inner = self.lock();
        let epoch = inner.next_epoch();
        for (key, entry) in inner.entries.iter_mut() {
            if pattern.matches(key) {
                entry.epoch = epoch;
            }
        }
    }

    pub fn begin_fetch(&self, key: ViewKey) -> FetchTicket {
        let mut inner = self.lock();
        if !inner.entries.contains_key(&key) {
            let epoch = inner.next_epoch();
            inner.entries.insert(
                key.clone(),
                Entry {
                    data: None,
                    stale: true,
                    epoch,
                },
            );
        }
        let epoch = inner.entries.get(&key).map_or(0, |e| e.epoch);
        FetchTicket { key, epoch }
    }

    /// Land a fetch result. Returns false (and drops the data) when the view
    /// was written, invalidated or evicted after the fetch began.
    pub fn complete_fetch(&self, ticket: FetchTicket, data: Vec<Task>) -> bool {
        let mut inner = self.lock();
        match inner.entries.get_mut(&ticket.key) {
            Some(entry) if entry.epoch == ticket.epoch => {
                entry.data = Some(data);
                entry.stale = false;
                true
            }
            _ => false,
        }
    }

    pub fn snapshot(&self, pattern: &ViewPattern) -> Snapshot {
        let inner = self.lock();
        Snapshot {
            views: inner
                .entries
                .iter()
                .filter(|(key, _)| pattern.matches(key))
                .map(|(key, entry)| (key.clone(), entry.data.clone()))
                .collect(),
        }
    }

    /// Put snapshotted views back. Views evicted since the snapshot stay gone.
    pub fn restore(&self, snapshot: Snapshot) -> usize {
        let mut inner = self.lock();
        let epoch = inner.next_epoch();
        let mut restored = 0;
        for (key, data) in snapshot.views {
            if let Some(entry) = inner.entries.get_mut(&key) {
                entry.data = data;
                entry.epoch = epoch;
                restored += 1;
            }
        }
        restored
    }

    /// Edit the loaded data of every matching view
    pub fn modify<F>(&self, pattern: &ViewPattern, mut edit: F) -> usize
    where
        F: FnMut(&ViewKey, &mut Vec<Task>),
    {
        let mut inner = self.lock();
        let epoch = inner.next_epoch();
        modify_entries(&mut inner, pattern, epoch, &mut edit)
    }

    /// Cancel in-flight fetches, snapshot, and edit matching views in one step
    pub fn apply_optimistic<F>(&self, pattern: &ViewPattern, mut edit: F) -> Snapshot
    where
        F: FnMut(&ViewKey, &mut Vec<Task>),
    {
        let mut inner = self.lock();
        let snapshot = Snapshot {
            views: inner
                .entries
                .iter()
                .filter(|(key, _)| pattern.matches(key))
                .map(|(key, entry)| (key.clone(), entry.data.clone()))
                .collect(),
        };
        let epoch = inner.next_epoch();
        modify_entries(&mut inner, pattern, epoch, &mut edit);
        snapshot
    }

    /// Drop matching views entirely
    pub fn evict(&self, pattern: &ViewPattern) -> usize {
        let mut inner = self.lock();
        let before = inner.entries.len();
        inner.entries.retain(|key, _| !pattern.matches(key));
        before - inner.entries.len()
    }

    pub fn keys(&self, pattern: &ViewPattern) -> Vec<ViewKey> {
        let inner = self.lock();
        inner
            .entries
            .keys()
            .filter(|key| pattern.matches(key))
            .cloned()
            .collect()
    }

    /// Views that need a refetch
    pub fn stale_keys(&self, pattern: &ViewPattern) -> Vec<ViewKey> {
        let inner = self.lock();
        inner
            .entries
            .iter()
            .filter(|(key, entry)| pattern.matches(key) && entry.stale)
            .map(|(key, _)| key.clone())
            .collect()
    }
}

fn modify_entries<F>(inner: &mut Inner, pattern: &ViewPattern, epoch: u64, edit: &mut F) -> usize
where
    F: FnMut(&ViewKey, &mut Vec<Task>),
{
    let mut touched = 0;
    for (key, entry) in inner.entries.iter_mut() {
        if !pattern.matches(key) {
            continue;
        }
        entry.epoch = epoch;
        if let Some(data) = entry.data.as_mut() {
            edit(key, data);
            touched += 1;
        }
    }
    touched
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewTask, ViewSort};
    use chrono::Utc;

    fn key(owner: &str, filter: ViewFilter) -> ViewKey {
        ViewKey::new(owner, filter, ViewSort::Newest)
    }

    fn task(title: &str) -> Task {
        Task::optimistic("alice", &NewTask::new(title), Utc::now())
    }

    #[test]
    fn pattern_matching() {
        let alice_all = key("alice", ViewFilter::All);
        let bob_all = key("bob", ViewFilter::All);
        assert!(ViewPattern::all().matches(&bob_all));
        assert!(ViewPattern::owner("alice").matches(&alice_all));
        assert!(!ViewPattern::owner("alice").matches(&bob_all));
        assert!(
            !ViewPattern::owner("alice")
                .with_filter(ViewFilter::Active)
                .matches(&alice_all)
        );
    }

    #[test]
    fn invalidate_supersedes_in_flight_fetch() {
        let cache = QueryCache::new();
        let k = key("alice", ViewFilter::All);
        let ticket = cache.begin_fetch(k.clone());
        cache.invalidate(&ViewPattern::all());
        assert!(!cache.complete_fetch(ticket, vec![task("old")]));
        assert!(cache.read(&k).is_none());

        let ticket = cache.begin_fetch(k.clone());
        assert!(cache.complete_fetch(ticket, vec![task("new")]));
        let view = cache.read(&k).unwrap();
        assert!(!view.stale);
        assert_eq!(view.data[0].title, "new");
    }

    #[test]
    fn optimistic_write_beats_slow_fetch() {
        let cache = QueryCache::new();
        let k = key("alice", ViewFilter::All);
        cache.write(k.clone(), vec![]);

        let ticket = cache.begin_fetch(k.clone());
        let pending = task("pending");
        cache.apply_optimistic(&ViewPattern::owner("alice"), |_, tasks| {
            tasks.insert(0, pending.clone())
        });

        assert!(!cache.complete_fetch(ticket, vec![]));
        assert_eq!(cache.read(&k).unwrap().data, vec![pending]);
    }

    #[test]
    fn restore_is_exact() {
        let cache = QueryCache::new();
        let all = key("alice", ViewFilter::All);
        let active = key("alice", ViewFilter::Active);
        cache.write(all.clone(), vec![task("a"), task("b")]);
        cache.write(active.clone(), vec![task("c")]);
        let before_all = cache.read(&all).unwrap();
        let before_active = cache.read(&active).unwrap();

        let snapshot = cache.apply_optimistic(&ViewPattern::owner("alice"), |_, tasks| {
            tasks.clear()
        });
        assert_eq!(snapshot.len(), 2);
        assert!(cache.read(&all).unwrap().data.is_empty());

        assert_eq!(cache.restore(snapshot), 2);
        assert_eq!(cache.read(&all).unwrap(), before_all);
        assert_eq!(cache.read(&active).unwrap(), before_active);
    }

    #[test]
    fn restore_skips_evicted_views() {
        let cache = QueryCache::new();
        let k = key("alice", ViewFilter::All);
        cache.write(k.clone(), vec![task("a")]);
        let snapshot = cache.snapshot(&ViewPattern::owner("alice"));

        assert_eq!(cache.evict(&ViewPattern::owner("alice")), 1);
        assert_eq!(cache.restore(snapshot), 0);
        assert!(cache.read(&k).is_none());
    }

    #[test]
    fn stale_keys_follow_invalidation() {
        let cache = QueryCache::new();
        cache.write(key("alice", ViewFilter::All), vec![]);
        cache.write(key("bob", ViewFilter::All), vec![]);
        assert!(cache.stale_keys(&ViewPattern::all()).is_empty());

        assert_eq!(cache.invalidate(&ViewPattern::owner("bob")), 1);
        assert_eq!(
            cache.stale_keys(&ViewPattern::all()),
            vec![key("bob", ViewFilter::All)]
        );
    }
}
