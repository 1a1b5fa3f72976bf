//! Bookkeeping that bridges the gaps between a scheduler's status sources.
//!
//! A job moves from the live listing to the accounting store with some lag,
//! and a job deleted before it ever showed up is in neither. The reconciler
//! remembers:
//! - when each job was last seen (at submission or in a listing), so a job
//!   missing from every source within the grace window reads as pending
//!   instead of unknown;
//! - which jobs were deleted before any listing showed them, so exactly one
//!   later query reports them as cancelled, or the terminal record that
//!   does show up is attributed to the cancellation.
//!
//! Both expire once older than the grace window.
//!
//! A connection owns one reconciler behind one mutex. The lock is never held
//! while a scheduler command runs.

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
struct Seen {
    at: Instant,
    /// Appeared in a live listing at least once.
    listed: bool,
    /// Already reported as done.
    done: bool,
    /// Its terminal record followed a delete before it was visible.
    canceled: bool,
}

impl Seen {
    fn new(at: Instant) -> Self {
        Self {
            at,
            listed: false,
            done: false,
            canceled: false,
        }
    }
}

#[derive(Debug)]
pub struct Reconciler {
    grace: Duration,
    last_seen: HashMap<String, Seen>,
    /// Deleted before visible, with the time of the delete.
    deleted: HashMap<String, Instant>,
}

impl Reconciler {
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            last_seen: HashMap::new(),
            deleted: HashMap::new(),
        }
    }

    fn within_grace(&self, seen: &Seen, now: Instant) -> bool {
        now.saturating_duration_since(seen.at) <= self.grace
    }

    fn prune(&mut self, now: Instant) {
        let grace = self.grace;
        self.last_seen
            .retain(|_, seen| now.saturating_duration_since(seen.at) <= grace);
        self.deleted
            .retain(|_, at| now.saturating_duration_since(*at) <= grace);
    }

    /// Record a freshly submitted job.
    pub fn register(&mut self, id: &str) {
        let now = Instant::now();
        self.last_seen.insert(id.to_string(), Seen::new(now));
        self.prune(now);
    }

    /// Refresh every job present in a live listing.
    pub fn observe_listing<'a, I>(&mut self, ids: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let now = Instant::now();
        for id in ids {
            let seen = self
                .last_seen
                .entry(id.to_string())
                .or_insert_with(|| Seen::new(now));
            seen.at = now;
            seen.listed = true;
        }
        self.prune(now);
    }

    /// Whether any listing has shown the job.
    pub fn was_listed(&self, id: &str) -> bool {
        self.last_seen.get(id).is_some_and(|seen| seen.listed)
    }

    /// Whether a terminal status was already reported for the job.
    pub fn is_done(&self, id: &str) -> bool {
        self.last_seen.get(id).is_some_and(|seen| seen.done)
    }

    /// Remember that a terminal status was reported for the job, so the
    /// grace window cannot turn it back into a pending one.
    pub fn mark_done(&mut self, id: &str) {
        let now = Instant::now();
        self.last_seen
            .entry(id.to_string())
            .or_insert_with(|| Seen::new(now))
            .done = true;
    }

    /// Record a terminal record seen in the listing or in accounting.
    ///
    /// A pending deleted-before-visible flag is used up here and turned into
    /// a lasting mark, so every later sighting of the record reads the same.
    /// Returns whether the job's end is attributed to the cancellation.
    pub fn settle(&mut self, id: &str) -> bool {
        let now = Instant::now();
        let flagged = self.deleted.remove(id).is_some();
        let seen = self
            .last_seen
            .entry(id.to_string())
            .or_insert_with(|| Seen::new(now));
        seen.at = now;
        seen.done = true;
        seen.canceled |= flagged;
        seen.canceled
    }

    /// Whether a job missing from every source should still read as pending.
    pub fn recently_seen(&mut self, id: &str) -> bool {
        let now = Instant::now();
        self.prune(now);
        self.last_seen
            .get(id)
            .is_some_and(|seen| !seen.done && self.within_grace(seen, now))
    }

    pub fn mark_deleted(&mut self, id: &str) {
        self.deleted.insert(id.to_string(), Instant::now());
    }

    pub fn is_deleted(&self, id: &str) -> bool {
        self.deleted.contains_key(id)
    }

    /// Remove the deleted-before-visible flag, returning whether it was set.
    pub fn take_deleted(&mut self, id: &str) -> bool {
        self.deleted.remove(id).is_some()
    }

    pub fn clear(&mut self) {
        self.last_seen.clear();
        self.deleted.clear();
    }
}
