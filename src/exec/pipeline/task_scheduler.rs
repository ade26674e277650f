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
//! Worker pool driving pipeline tasks.
//!
//! Responsibilities:
//! - Owns one worker thread per core; each pops a runnable task, runs one
//!   execute slice, and reclassifies it by the resulting state.
//! - Finalizes terminal tasks: close, profile flush, dependency
//!   notification, fragment completion reporting.
//!
//! Key exported interfaces:
//! - Types: `TaskSchedulerOptions`, `TaskScheduler`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use super::blocked_task_scheduler::BlockedTaskScheduler;
use super::pipeline_task::{PipelineTask, PipelineTaskState};
use super::task_queue::TaskQueue;
use crate::common::config;
use crate::flintrocks_logging::{debug, error, warn};

const STARVATION_SWEEP_INTERVAL: Duration = Duration::from_millis(500);

/// Knobs for one scheduler instance. `default()` reads the process config.
#[derive(Clone, Debug)]
pub struct TaskSchedulerOptions {
    pub worker_count: usize,
    pub queue_level_count: usize,
    pub level_t0_ns: u64,
    pub blocked_poll_interval: Duration,
    pub group_scheduling: bool,
    pub default_group_cpu_share: u64,
}

impl Default for TaskSchedulerOptions {
    fn default() -> Self {
        Self {
            worker_count: config::pipeline_task_thread_count(),
            queue_level_count: config::pipeline_task_queue_level_count(),
            level_t0_ns: config::pipeline_task_level_t0_ns(),
            blocked_poll_interval: Duration::from_millis(
                config::blocked_scheduler_poll_interval_ms(),
            ),
            group_scheduling: config::task_group_enabled(),
            default_group_cpu_share: config::task_group_cpu_share_default(),
        }
    }
}

/// Cooperative scheduler: W worker threads multiplex pipeline tasks, one
/// time slice at a time, with the blocked poller handling parked tasks.
pub struct TaskScheduler {
    task_queue: Arc<TaskQueue>,
    blocked_scheduler: Arc<BlockedTaskScheduler>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
    shutdown: AtomicBool,
    started: AtomicBool,
}

impl TaskScheduler {
    pub fn new() -> Arc<Self> {
        Self::with_options(TaskSchedulerOptions::default())
    }

    pub fn with_options(options: TaskSchedulerOptions) -> Arc<Self> {
        let task_queue = Arc::new(TaskQueue::new(
            options.worker_count,
            options.queue_level_count,
            options.level_t0_ns,
            options.group_scheduling,
            options.default_group_cpu_share,
        ));
        let blocked_scheduler =
            BlockedTaskScheduler::new(Arc::clone(&task_queue), options.blocked_poll_interval);
        Arc::new(Self {
            task_queue,
            blocked_scheduler,
            workers: Mutex::new(Vec::new()),
            shutdown: AtomicBool::new(false),
            started: AtomicBool::new(false),
        })
    }

    pub fn task_queue(&self) -> &Arc<TaskQueue> {
        &self.task_queue
    }

    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        self.blocked_scheduler.start();

        let mut workers = self.workers.lock().expect("task scheduler workers lock");
        for core_id in 0..self.task_queue.core_count() {
            let this = Arc::clone(self);
            let handle = thread::Builder::new()
                .name(format!("pip_task_worker_{core_id}"))
                .spawn(move || this.worker_loop(core_id))
                .expect("pipeline task worker thread");
            workers.push(handle);
        }

        let this = Arc::clone(self);
        let sweeper = thread::Builder::new()
            .name("pip_task_promoter".to_string())
            .spawn(move || this.starvation_sweep_loop())
            .expect("pipeline task promoter thread");
        workers.push(sweeper);
    }

    /// Prepares and enqueues a batch of freshly built tasks. Tasks whose
    /// dependencies are already satisfied become runnable immediately; the
    /// rest park under the blocked scheduler.
    pub fn submit(&self, tasks: Vec<PipelineTask>) -> Result<(), String> {
        for task in tasks {
            let mut task = Box::new(task);
            match task.prepare() {
                Ok(()) => match task.state() {
                    PipelineTaskState::Runnable => self.task_queue.push(task),
                    PipelineTaskState::BlockedForDependency => {
                        self.blocked_scheduler.add_blocked(task)
                    }
                    state => {
                        return Err(format!(
                            "pipeline task prepared into unexpected state {}",
                            state.name()
                        ));
                    }
                },
                Err(err) => {
                    error!("pipeline task prepare failed: {}", err);
                    task.fragment().cancel(err);
                    Self::finalize_task(task, PipelineTaskState::Canceled);
                }
            }
        }
        Ok(())
    }

    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        self.blocked_scheduler.shutdown();
        self.task_queue.shutdown();
        let handles = {
            let mut workers = self.workers.lock().expect("task scheduler workers lock");
            std::mem::take(&mut *workers)
        };
        for handle in handles {
            let _ = handle.join();
        }
    }

    fn starvation_sweep_loop(self: Arc<Self>) {
        let nap = Duration::from_millis(50);
        let mut slept = Duration::ZERO;
        while !self.shutdown.load(Ordering::Acquire) {
            thread::sleep(nap);
            slept += nap;
            if slept >= STARVATION_SWEEP_INTERVAL {
                slept = Duration::ZERO;
                self.task_queue.promote_starved();
            }
        }
    }

    fn worker_loop(self: Arc<Self>, core_id: usize) {
        loop {
            let Some(mut task) = self.task_queue.take(core_id) else {
                // take returns None only on shutdown.
                return;
            };

            task.set_core_id(core_id);
            task.set_previous_core_id(core_id as i64);

            // Cancellation wins over every other predicate.
            if task.fragment().is_canceled() {
                Self::finalize_task(task, PipelineTaskState::Canceled);
                continue;
            }

            match task.state() {
                PipelineTaskState::Runnable => {}
                PipelineTaskState::PendingFinish => {
                    if task.is_pending_finish() {
                        self.blocked_scheduler.add_blocked(task);
                    } else {
                        Self::finalize_task(task, PipelineTaskState::Finished);
                    }
                    continue;
                }
                state => {
                    // The owning-location invariant is broken; this worker
                    // cannot continue safely.
                    panic!(
                        "pipeline task dequeued in impossible state {}: {}",
                        state.name(),
                        task.debug_string()
                    );
                }
            }

            let mut eos = false;
            let exec_start = Instant::now();
            let result = task.execute(&mut eos);
            let delta_ns = u64::try_from(exec_start.elapsed().as_nanos()).unwrap_or(u64::MAX);
            task.inc_runtime_ns(delta_ns);
            self.task_queue.resolve_group(&task).add_runtime_ns(delta_ns);

            if let Err(err) = result {
                error!("pipeline task failed: {}: {}", task.debug_string(), err);
                task.fragment().cancel(err);
                Self::finalize_task(task, PipelineTaskState::Canceled);
                continue;
            }

            if eos {
                if let Err(err) = task.try_close() {
                    error!("pipeline task try_close failed: {}", err);
                    task.fragment().cancel(err);
                    Self::finalize_task(task, PipelineTaskState::Canceled);
                    continue;
                }
                if task.is_pending_finish() {
                    task.set_state(PipelineTaskState::PendingFinish);
                    self.blocked_scheduler.add_blocked(task);
                } else {
                    Self::finalize_task(task, PipelineTaskState::Finished);
                }
                continue;
            }

            match task.state() {
                PipelineTaskState::Runnable => {
                    // Time-slice yield: back into the queue on this core.
                    self.task_queue.push_to_core(task, core_id);
                }
                state if state.is_blocked() => {
                    self.blocked_scheduler.add_blocked(task);
                }
                state => {
                    panic!(
                        "pipeline task left execute in impossible state {}: {}",
                        state.name(),
                        task.debug_string()
                    );
                }
            }
        }
    }

    /// Terminal path: teardown, counter flush, dependency notification and
    /// fragment completion. Close failures are reported but never override
    /// an earlier status.
    fn finalize_task(mut task: Box<PipelineTask>, terminal_state: PipelineTaskState) {
        debug_assert!(terminal_state.is_terminal());
        if let Err(err) = task.try_close() {
            warn!("pipeline task try_close during finalize failed: {}", err);
        }
        if let Err(err) = task.close() {
            warn!("pipeline task close failed: {}", err);
        }
        task.set_state(terminal_state);
        task.finalize();
        task.notify_pipeline_finished();
        debug!("Pipeline task finalized: {}", task.debug_string());
        task.fragment().report_completion(&task);
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.blocked_scheduler.shutdown();
        self.task_queue.shutdown();
    }
}
