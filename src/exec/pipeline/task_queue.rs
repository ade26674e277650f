// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Multi-level feedback task queue, one priority queue per core.
//!
//! Responsibilities:
//! - Time-slices runnable tasks across cores: FIFO within a level, levels
//!   keyed by exponentially growing cumulative-runtime bands.
//! - Provides round-robin work stealing for idle cores and a starvation
//!   promotion sweep for long-waiting tasks.
//! - Optionally arbitrates between task groups by share-normalized
//!   consumption before draining a group's per-core queue.
//!
//! Key exported interfaces:
//! - Types: `TaskQueue`.
//!
//! Locking discipline: one mutex + condvar per core. A worker never holds
//! its own core's mutex while locking another core's (steal locks exactly
//! one core queue at a time), and no lock is held across an `execute` call.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use super::pipeline_task::PipelineTask;
use crate::runtime::task_group::TaskGroup;

// How long an idle worker parks before retrying its steal pass.
const WORKER_PARK_TIMEOUT: Duration = Duration::from_millis(100);

// A task waiting in level k (k >= 1) longer than k times this base is
// promoted one level toward 0 by the starvation sweep.
const STARVATION_PROMOTE_BASE: Duration = Duration::from_millis(1000);

/// Per-core MLFQ: one FIFO per priority level.
struct PriorityTaskQueue {
    levels: Vec<VecDeque<Box<PipelineTask>>>,
}

impl PriorityTaskQueue {
    fn new(level_count: usize) -> Self {
        Self {
            levels: (0..level_count).map(|_| VecDeque::new()).collect(),
        }
    }

    fn push(&mut self, task: Box<PipelineTask>, level: usize) {
        let level = level.min(self.levels.len() - 1);
        self.levels[level].push_back(task);
    }

    fn pop_first(&mut self) -> Option<Box<PipelineTask>> {
        for level in self.levels.iter_mut() {
            if let Some(task) = level.pop_front() {
                return Some(task);
            }
        }
        None
    }

    /// Steal candidate: the head of the first non-empty level, taken only
    /// if its pipeline allows stealing.
    fn steal_first(&mut self) -> Option<Box<PipelineTask>> {
        for level in self.levels.iter_mut() {
            let Some(head) = level.front() else {
                continue;
            };
            if head.can_steal() {
                return level.pop_front();
            }
        }
        None
    }

    fn is_empty(&self) -> bool {
        self.levels.iter().all(|level| level.is_empty())
    }

    fn len(&self) -> usize {
        self.levels.iter().map(|level| level.len()).sum()
    }

    fn promote_starved(&mut self, now: Instant) {
        for level in (1..self.levels.len()).rev() {
            let threshold = STARVATION_PROMOTE_BASE * level as u32;
            loop {
                let overdue = self.levels[level]
                    .front()
                    .and_then(|task| task.enqueued_at())
                    .map(|at| now.saturating_duration_since(at) > threshold)
                    .unwrap_or(false);
                if !overdue {
                    break;
                }
                let mut task = self.levels[level].pop_front().expect("checked front");
                task.update_queue_level(level - 1);
                task.reset_enqueued_at();
                self.levels[level - 1].push_back(task);
            }
        }
    }
}

struct GroupSubQueue {
    group: Arc<TaskGroup>,
    queue: PriorityTaskQueue,
}

struct CoreQueueSlots {
    queue: PriorityTaskQueue,
    groups: Vec<GroupSubQueue>,
}

impl CoreQueueSlots {
    fn new(level_count: usize) -> Self {
        Self {
            queue: PriorityTaskQueue::new(level_count),
            groups: Vec::new(),
        }
    }

    fn group_queue_mut(&mut self, group: &Arc<TaskGroup>, level_count: usize) -> &mut PriorityTaskQueue {
        if let Some(pos) = self.groups.iter().position(|g| g.group.id() == group.id()) {
            return &mut self.groups[pos].queue;
        }
        self.groups.push(GroupSubQueue {
            group: Arc::clone(group),
            queue: PriorityTaskQueue::new(level_count),
        });
        &mut self.groups.last_mut().expect("just pushed").queue
    }

    /// Pick the task group that is furthest behind its CPU entitlement and
    /// drain one task from it; without groups, the plain per-core queue.
    fn pop(&mut self) -> Option<Box<PipelineTask>> {
        let mut best: Option<usize> = None;
        for (idx, sub) in self.groups.iter().enumerate() {
            if sub.queue.is_empty() {
                continue;
            }
            best = match best {
                None => Some(idx),
                Some(cur)
                    if sub.group.normalized_consumption()
                        < self.groups[cur].group.normalized_consumption() =>
                {
                    Some(idx)
                }
                other => other,
            };
        }
        if let Some(idx) = best {
            return self.groups[idx].queue.pop_first();
        }
        self.queue.pop_first()
    }

    fn steal(&mut self) -> Option<Box<PipelineTask>> {
        if let Some(task) = self.queue.steal_first() {
            return Some(task);
        }
        for sub in self.groups.iter_mut() {
            if let Some(task) = sub.queue.steal_first() {
                return Some(task);
            }
        }
        None
    }

    fn is_empty(&self) -> bool {
        self.queue.is_empty() && self.groups.iter().all(|g| g.queue.is_empty())
    }

    fn len(&self) -> usize {
        self.queue.len() + self.groups.iter().map(|g| g.queue.len()).sum::<usize>()
    }

    fn promote_starved(&mut self, now: Instant) {
        self.queue.promote_starved(now);
        for sub in self.groups.iter_mut() {
            sub.queue.promote_starved(now);
        }
    }
}

struct CoreQueue {
    mu: Mutex<CoreQueueSlots>,
    cv: Condvar,
}

/// Runnable-task queue for the whole scheduler: one MLFQ per core plus the
/// shared shutdown/steal machinery.
pub struct TaskQueue {
    cores: Vec<CoreQueue>,
    level_count: usize,
    t0_ns: u64,
    group_scheduling: bool,
    default_group: Arc<TaskGroup>,
    next_core: AtomicUsize,
    shutdown: AtomicBool,
}

impl TaskQueue {
    pub fn new(
        core_count: usize,
        level_count: usize,
        t0_ns: u64,
        group_scheduling: bool,
        default_group_cpu_share: u64,
    ) -> Self {
        let core_count = core_count.max(1);
        let level_count = level_count.max(2);
        Self {
            cores: (0..core_count)
                .map(|_| CoreQueue {
                    mu: Mutex::new(CoreQueueSlots::new(level_count)),
                    cv: Condvar::new(),
                })
                .collect(),
            level_count,
            t0_ns: t0_ns.max(1),
            group_scheduling,
            default_group: Arc::new(TaskGroup::new("default", default_group_cpu_share)),
            next_core: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn core_count(&self) -> usize {
        self.cores.len()
    }

    pub fn group_scheduling(&self) -> bool {
        self.group_scheduling
    }

    /// Group a task is accounted under: its fragment's group, or the shared
    /// default group.
    pub fn resolve_group(&self, task: &PipelineTask) -> Arc<TaskGroup> {
        task.fragment()
            .task_group()
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.default_group))
    }

    /// Smallest level whose upper runtime bound exceeds the cumulative
    /// runtime: level k covers `[2^k * t0, 2^(k+1) * t0)`.
    pub fn level_for_runtime(&self, runtime_ns: u64) -> usize {
        let mut bound = self.t0_ns.saturating_mul(2);
        for level in 0..self.level_count - 1 {
            if runtime_ns < bound {
                return level;
            }
            bound = bound.saturating_mul(2);
        }
        self.level_count - 1
    }

    fn resolve_core(&self, task: &PipelineTask) -> usize {
        let hint = task.previous_core_id();
        if hint >= 0 && (hint as usize) < self.cores.len() {
            return hint as usize;
        }
        self.next_core.fetch_add(1, Ordering::Relaxed) % self.cores.len()
    }

    /// Enqueues a runnable task on its preferred core at the level matching
    /// its cumulative runtime.
    pub fn push(&self, task: Box<PipelineTask>) {
        let core = self.resolve_core(&task);
        self.push_to_core(task, core);
    }

    pub fn push_to_core(&self, mut task: Box<PipelineTask>, core_id: usize) {
        let core_id = core_id.min(self.cores.len() - 1);
        let level = self.level_for_runtime(task.runtime_ns());
        task.update_queue_level(level);
        task.put_in_runnable_queue();
        let core = &self.cores[core_id];
        {
            let mut slots = core.mu.lock().expect("task queue core lock");
            if self.group_scheduling {
                let group = self.resolve_group(&task);
                slots
                    .group_queue_mut(&group, self.level_count)
                    .push(task, level);
            } else {
                slots.queue.push(task, level);
            }
        }
        core.cv.notify_one();
    }

    /// Dequeues the next runnable task for a worker on `core_id`: local
    /// levels first, then a round-robin steal pass over the other cores,
    /// then a bounded park. Returns None only on shutdown.
    pub fn take(&self, core_id: usize) -> Option<Box<PipelineTask>> {
        let core_id = core_id.min(self.cores.len() - 1);
        loop {
            {
                let mut slots = self.cores[core_id].mu.lock().expect("task queue core lock");
                if let Some(mut task) = slots.pop() {
                    drop(slots);
                    task.pop_out_runnable_queue();
                    return Some(task);
                }
            }

            for offset in 1..self.cores.len() {
                let target = (core_id + offset) % self.cores.len();
                let mut slots = self.cores[target].mu.lock().expect("task queue core lock");
                if let Some(mut task) = slots.steal() {
                    drop(slots);
                    task.pop_out_runnable_queue();
                    return Some(task);
                }
            }

            if self.shutdown.load(Ordering::Acquire) {
                return None;
            }

            let slots = self.cores[core_id].mu.lock().expect("task queue core lock");
            if !slots.is_empty() {
                continue;
            }
            let _ = self.cores[core_id]
                .cv
                .wait_timeout(slots, WORKER_PARK_TIMEOUT)
                .expect("task queue core condvar wait");
        }
    }

    /// One pass of the starvation sweep: any task waiting longer than its
    /// level's threshold moves one level toward 0.
    pub fn promote_starved(&self) {
        let now = Instant::now();
        for core in self.cores.iter() {
            let mut slots = core.mu.lock().expect("task queue core lock");
            slots.promote_starved(now);
        }
    }

    pub fn len(&self) -> usize {
        self.cores
            .iter()
            .map(|core| core.mu.lock().expect("task queue core lock").len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        for core in self.cores.iter() {
            core.cv.notify_all();
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}
