//! Queue names and per-queue job history.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum QueueKind {
    #[default]
    Single,
    Multi,
    Unlimited,
}

impl QueueKind {
    pub const ALL: [QueueKind; 3] = [QueueKind::Single, QueueKind::Multi, QueueKind::Unlimited];

    pub fn name(self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Multi => "multi",
            Self::Unlimited => "unlimited",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Submission order of the jobs each queue still remembers.
#[derive(Debug, Default)]
pub struct History {
    queues: [VecDeque<String>; 3],
}

impl History {
    pub fn push(&mut self, queue: QueueKind, id: impl Into<String>) {
        self.queues[queue.index()].push_back(id.into());
    }

    pub fn ids(&self, queue: QueueKind) -> impl Iterator<Item = &str> {
        self.queues[queue.index()].iter().map(String::as_str)
    }

    pub fn len(&self, queue: QueueKind) -> usize {
        self.queues[queue.index()].len()
    }

    /// Drop the oldest finished jobs until `queue` holds at most `max`
    /// entries. Unfinished jobs are never dropped, so the queue may stay
    /// longer than `max`. Returns the dropped ids.
    pub fn purge<F>(&mut self, queue: QueueKind, max: usize, is_finished: F) -> Vec<String>
    where
        F: Fn(&str) -> bool,
    {
        let entries = &mut self.queues[queue.index()];
        let mut excess = entries.len().saturating_sub(max);
        let mut dropped = Vec::new();
        entries.retain(|id| {
            if excess > 0 && is_finished(id) {
                excess -= 1;
                dropped.push(id.clone());
                false
            } else {
                true
            }
        });
        dropped
    }

    pub fn clear(&mut self) {
        self.queues.iter_mut().for_each(VecDeque::clear);
    }
}
