//! Dependency- and priority-ordered task source.

use std::collections::HashSet;

use crate::core::task::ScheduledTask;
use crate::infra::source::TaskSource;
use crate::util::serde::{Priority, TaskKey};

struct DagEntry<T> {
    task: ScheduledTask<T>,
    depends_on: Vec<TaskKey>,
    priority: Priority,
    seq: u64,
}

/// Task source governed by a directed acyclic graph of task-key
/// dependencies, with a priority function breaking ties.
///
/// A task becomes eligible once every task it depends on has been
/// dispatched. Among eligible tasks, higher priority wins; within equal
/// priority, submission order (FIFO) wins. A dependency cycle leaves its
/// members permanently ineligible; `peek` then returns `None` and a warning
/// is logged.
pub struct DagTaskSource<T> {
    entries: Vec<DagEntry<T>>,
    dispatched: HashSet<TaskKey>,
    next_seq: u64,
}

impl<T> DagTaskSource<T> {
    /// Create an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            dispatched: HashSet::new(),
            next_seq: 0,
        }
    }

    /// Add a task with its dependencies and priority.
    pub fn push(
        &mut self,
        task: ScheduledTask<T>,
        depends_on: Vec<TaskKey>,
        priority: Priority,
    ) {
        self.entries.push(DagEntry {
            task,
            depends_on,
            priority,
            seq: self.next_seq,
        });
        self.next_seq += 1;
    }

    /// Index of the best eligible entry: highest priority, then FIFO.
    fn select(&self) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (idx, entry) in self.entries.iter().enumerate() {
            let eligible = entry
                .depends_on
                .iter()
                .all(|dep| self.dispatched.contains(dep));
            if !eligible {
                continue;
            }
            best = match best {
                None => Some(idx),
                Some(cur) => {
                    let current = &self.entries[cur];
                    if (entry.priority, std::cmp::Reverse(entry.seq))
                        > (current.priority, std::cmp::Reverse(current.seq))
                    {
                        Some(idx)
                    } else {
                        Some(cur)
                    }
                }
            };
        }
        if best.is_none() && !self.entries.is_empty() {
            tracing::warn!(
                blocked = self.entries.len(),
                "no eligible task; dependency cycle or missing dependency"
            );
        }
        best
    }
}

impl<T> Default for DagTaskSource<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> TaskSource<T> for DagTaskSource<T> {
    fn peek(&mut self) -> Option<&ScheduledTask<T>> {
        self.select().map(|idx| &self.entries[idx].task)
    }

    fn next(&mut self) -> Option<ScheduledTask<T>> {
        let idx = self.select()?;
        let entry = self.entries.remove(idx);
        self.dispatched.insert(entry.task.key.clone());
        Some(entry.task)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
