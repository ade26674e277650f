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
//! Blocked-task poller for wake-up scheduling.
//!
//! Responsibilities:
//! - Parks tasks that cannot make progress (dependency, source, sink,
//!   runtime filters, pending finish) and periodically rechecks their wake
//!   predicates.
//! - Hands woken tasks back to the task queue; cancellation is checked
//!   first on every pass and wins over all other predicates.
//!
//! Key exported interfaces:
//! - Types: `BlockedTaskScheduler`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use super::pipeline_task::{PipelineTask, PipelineTaskState};
use super::task_queue::TaskQueue;
use crate::flintrocks_logging::debug;

/// Single polling thread holding every blocked task of the scheduler.
pub struct BlockedTaskScheduler {
    task_queue: Arc<TaskQueue>,
    blocked: Mutex<VecDeque<Box<PipelineTask>>>,
    cv: Condvar,
    cv_mutex: Mutex<()>,
    poll_interval: Duration,
    shutdown: AtomicBool,
    started: AtomicBool,
}

impl BlockedTaskScheduler {
    pub fn new(task_queue: Arc<TaskQueue>, poll_interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            task_queue,
            blocked: Mutex::new(VecDeque::new()),
            cv: Condvar::new(),
            cv_mutex: Mutex::new(()),
            poll_interval,
            shutdown: AtomicBool::new(false),
            started: AtomicBool::new(false),
        })
    }

    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let this = Arc::clone(self);
        thread::Builder::new()
            .name("blocked_task_scheduler".to_string())
            .spawn(move || this.run())
            .expect("blocked task scheduler thread");
    }

    pub fn add_blocked(&self, mut task: Box<PipelineTask>) {
        task.start_schedule_watcher();
        let mut blocked = self.blocked.lock().expect("blocked scheduler lock");
        blocked.push_back(task);
        drop(blocked);
        self.cv.notify_one();
    }

    pub fn blocked_count(&self) -> usize {
        self.blocked.lock().expect("blocked scheduler lock").len()
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.cv.notify_all();
    }

    fn run(self: Arc<Self>) {
        debug!(
            "BlockedTaskScheduler started with poll_interval={:?}",
            self.poll_interval
        );
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }

            self.poll_once();

            let guard = self.cv_mutex.lock().expect("blocked scheduler cv lock");
            let _ = self
                .cv
                .wait_timeout(guard, self.poll_interval)
                .expect("blocked scheduler cv wait");
        }
    }

    /// One sweep over the blocked list: wake everything whose predicate
    /// holds, keep the rest parked.
    fn poll_once(&self) {
        let mut local = {
            let mut blocked = self.blocked.lock().expect("blocked scheduler lock");
            std::mem::take(&mut *blocked)
        };

        let mut still_blocked = VecDeque::with_capacity(local.len());
        while let Some(mut task) = local.pop_front() {
            if Self::should_wake(&mut task) {
                task.stop_schedule_watcher();
                self.task_queue.push(task);
            } else {
                still_blocked.push_back(task);
            }
        }

        if !still_blocked.is_empty() {
            let mut blocked = self.blocked.lock().expect("blocked scheduler lock");
            // Newly parked tasks may have arrived while polling.
            while let Some(task) = blocked.pop_front() {
                still_blocked.push_back(task);
            }
            *blocked = still_blocked;
        }
    }

    /// Wake predicate per state. Cancellation wins over everything: a
    /// canceled task is handed back so a worker finalizes it.
    fn should_wake(task: &mut PipelineTask) -> bool {
        if task.fragment().is_canceled() {
            return true;
        }
        match task.state() {
            PipelineTaskState::BlockedForDependency => {
                if task.has_unfinished_dependency() {
                    return false;
                }
                task.set_state(PipelineTaskState::Runnable);
                true
            }
            PipelineTaskState::BlockedForSource => {
                if !task.source_can_read() {
                    return false;
                }
                task.set_state(PipelineTaskState::Runnable);
                true
            }
            PipelineTaskState::BlockedForSink => {
                if !task.sink_can_write() {
                    return false;
                }
                task.set_state(PipelineTaskState::Runnable);
                true
            }
            PipelineTaskState::BlockedForRf => {
                if !task.runtime_filters_are_ready_or_timeout() {
                    return false;
                }
                task.set_state(PipelineTaskState::Runnable);
                true
            }
            // Stays PENDING_FINISH; the worker completes the close once the
            // async release has drained.
            PipelineTaskState::PendingFinish => !task.is_pending_finish(),
            // Anything else has no business staying parked; let a worker
            // sort it out.
            _ => true,
        }
    }
}
