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
//! Pipeline task state machine and single-slice execution.
//!
//! Responsibilities:
//! - Runs one operator chain instance with cooperative scheduling semantics:
//!   polls the source chain for blocks and hands them to the sink until
//!   end-of-stream.
//! - Tracks task state transitions, blocking classification, time-slice
//!   yielding, and per-task profile counters.
//!
//! Key exported interfaces:
//! - Types: `PipelineTaskState`, `PipelineTask`.
//!
//! A task is owned by exactly one component at any time (a task queue level,
//! the blocked scheduler, a worker's execute frame, or the terminal set);
//! the single-dequeue handoff makes its mutable state safe without a lock.

use std::sync::Arc;
use std::time::{Duration, Instant};

use super::fragment_context::FragmentContext;
use super::operator::{Operator, SourceState};
use super::pipeline::Pipeline;
use crate::common::config;
use crate::common::util::MonotonicStopWatch;
use crate::exec::block::Block;
use crate::runtime::profile::{CounterRef, RuntimeProfile, ScopedTimer, TUnit, clamp_u128_to_i64};

/// All possible states of a pipeline task.
///
/// ```text
///                  |------------------------------------------------------|
///                  |---|                                                  |
///                      |-------> BLOCKED_* ------|                        |--------------> CANCELED
///               |------|                         |                        |        |
/// NOT_READY ----|                                |-----> RUNNABLE --------|-> PENDING_FINISH
///               |                                |          ^  |          |        |
///               |--------------------------------|          |--|          |--------+----> FINISHED
///                                                          (yield)
/// ```
///
/// BLOCKED_* is one of BLOCKED_FOR_DEPENDENCY, BLOCKED_FOR_SOURCE,
/// BLOCKED_FOR_SINK and BLOCKED_FOR_RF. Initial state is NOT_READY;
/// FINISHED and CANCELED are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineTaskState {
    NotReady,
    BlockedForDependency,
    BlockedForSource,
    BlockedForSink,
    BlockedForRf,
    Runnable,
    PendingFinish,
    Finished,
    Canceled,
}

impl PipelineTaskState {
    pub fn name(&self) -> &'static str {
        match self {
            PipelineTaskState::NotReady => "NOT_READY",
            PipelineTaskState::BlockedForDependency => "BLOCKED_FOR_DEPENDENCY",
            PipelineTaskState::BlockedForSource => "BLOCKED_FOR_SOURCE",
            PipelineTaskState::BlockedForSink => "BLOCKED_FOR_SINK",
            PipelineTaskState::BlockedForRf => "BLOCKED_FOR_RF",
            PipelineTaskState::Runnable => "RUNNABLE",
            PipelineTaskState::PendingFinish => "PENDING_FINISH",
            PipelineTaskState::Finished => "FINISHED",
            PipelineTaskState::Canceled => "CANCELED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineTaskState::Finished | PipelineTaskState::Canceled
        )
    }

    pub fn is_blocked(&self) -> bool {
        matches!(
            self,
            PipelineTaskState::BlockedForDependency
                | PipelineTaskState::BlockedForSource
                | PipelineTaskState::BlockedForSink
                | PipelineTaskState::BlockedForRf
        )
    }
}

struct TaskCounters {
    task_cpu_time: CounterRef,
    prepare_time: CounterRef,
    open_time: CounterRef,
    exec_time: CounterRef,
    get_block_time: CounterRef,
    sink_time: CounterRef,
    finalize_time: CounterRef,
    close_time: CounterRef,
    block_count: CounterRef,
    blocked_by_source: CounterRef,
    blocked_by_sink: CounterRef,
    schedule_count: CounterRef,
    wait_source_time: CounterRef,
    wait_sink_time: CounterRef,
    wait_worker_time: CounterRef,
    wait_schedule_time: CounterRef,
    yield_count: CounterRef,
    core_change_times: CounterRef,
}

impl TaskCounters {
    fn new(profile: &RuntimeProfile) -> Self {
        Self {
            task_cpu_time: profile.add_timer("TaskCpuTime"),
            prepare_time: profile.add_timer("PrepareTime"),
            open_time: profile.add_timer("OpenTime"),
            exec_time: profile.add_timer("ExecTime"),
            get_block_time: profile.add_timer("GetBlockTime"),
            sink_time: profile.add_timer("SinkTime"),
            finalize_time: profile.add_timer("FinalizeTime"),
            close_time: profile.add_timer("CloseTime"),
            block_count: profile.add_counter("BlockCount", TUnit::Unit),
            blocked_by_source: profile.add_counter("BlockedBySource", TUnit::Unit),
            blocked_by_sink: profile.add_counter("BlockedBySink", TUnit::Unit),
            schedule_count: profile.add_counter("ScheduleCount", TUnit::Unit),
            wait_source_time: profile.add_timer("WaitSourceTime"),
            wait_sink_time: profile.add_timer("WaitSinkTime"),
            wait_worker_time: profile.add_timer("WaitWorkerTime"),
            wait_schedule_time: profile.add_timer("WaitScheduleTime"),
            yield_count: profile.add_counter("YieldCount", TUnit::Unit),
            core_change_times: profile.add_counter("CoreChangeTimes", TUnit::Unit),
        }
    }
}

/// One concrete execution instance of a pipeline at a given parallelism
/// index. Drives the operator chain one time slice at a time.
pub struct PipelineTask {
    index: u32,
    pipeline: Arc<Pipeline>,
    fragment: Arc<FragmentContext>,
    // Source chain: front is the source, back is the chain root polled by
    // `execute`. The sink is held separately.
    operators: Vec<Box<dyn Operator>>,
    sink: Box<dyn Operator>,

    prepared: bool,
    opened: bool,
    try_closed: bool,
    closed: bool,
    can_steal: bool,
    cur_state: PipelineTaskState,
    data_state: SourceState,
    block: Block,
    time_slice: Duration,

    // Scheduling telemetry. Visited by worker and blocked-scheduler threads,
    // but only ever by the component currently holding the task.
    runtime_ns: u64,
    queue_level: usize,
    core_id: usize,
    previous_core_id: i64,
    schedule_time: u32,
    enqueued_at: Option<Instant>,

    wait_source_watcher: MonotonicStopWatch,
    wait_sink_watcher: MonotonicStopWatch,
    wait_worker_watcher: MonotonicStopWatch,
    wait_schedule_watcher: MonotonicStopWatch,

    task_profile: RuntimeProfile,
    counters: TaskCounters,
}

impl PipelineTask {
    pub fn new(
        pipeline: &Arc<Pipeline>,
        index: u32,
        fragment: Arc<FragmentContext>,
    ) -> Result<Self, String> {
        let mut operators = pipeline.make_operators(index)?;
        let sink = operators
            .pop()
            .ok_or_else(|| format!("pipeline {} has no sink operator", pipeline.id()))?;
        if operators.is_empty() {
            return Err(format!(
                "pipeline {} needs at least a source and a sink",
                pipeline.id()
            ));
        }
        let task_profile = fragment
            .profile()
            .child(format!("Pipeline (id={})", pipeline.id()))
            .child(format!("PipelineTask (index={index})"));
        let counters = TaskCounters::new(&task_profile);
        pipeline.task_started();
        fragment.register_tasks(1);
        Ok(Self {
            index,
            pipeline: Arc::clone(pipeline),
            fragment,
            operators,
            sink,
            prepared: false,
            opened: false,
            try_closed: false,
            closed: false,
            can_steal: pipeline.can_steal(),
            cur_state: PipelineTaskState::NotReady,
            data_state: SourceState::DependOnSource,
            block: Block::empty(),
            time_slice: Duration::from_nanos(config::pipeline_time_slice_ns()),
            runtime_ns: 0,
            queue_level: 0,
            core_id: 0,
            previous_core_id: -1,
            schedule_time: 0,
            enqueued_at: None,
            wait_source_watcher: MonotonicStopWatch::new(),
            wait_sink_watcher: MonotonicStopWatch::new(),
            wait_worker_watcher: MonotonicStopWatch::new(),
            wait_schedule_watcher: MonotonicStopWatch::new(),
            task_profile,
            counters,
        })
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn fragment(&self) -> &Arc<FragmentContext> {
        &self.fragment
    }

    pub fn state(&self) -> PipelineTaskState {
        self.cur_state
    }

    pub fn data_state(&self) -> SourceState {
        self.data_state
    }

    pub fn can_steal(&self) -> bool {
        self.can_steal
    }

    pub fn profile(&self) -> &RuntimeProfile {
        &self.task_profile
    }

    /// Override the execution time slice. Intended for the embedding
    /// scheduler; defaults to `pipeline_time_slice_ns` from config.
    pub fn set_time_slice(&mut self, time_slice: Duration) {
        self.time_slice = time_slice;
    }

    pub fn time_slice(&self) -> Duration {
        self.time_slice
    }

    /// All state changes go through here so blocked-wait timers stay
    /// consistent with the state the task is actually in.
    pub fn set_state(&mut self, state: PipelineTaskState) {
        if self.cur_state == state {
            return;
        }
        match self.cur_state {
            PipelineTaskState::BlockedForSource => {
                if state == PipelineTaskState::Runnable {
                    self.wait_source_watcher.stop();
                }
            }
            PipelineTaskState::BlockedForSink => {
                if state == PipelineTaskState::Runnable {
                    self.wait_sink_watcher.stop();
                }
            }
            _ => {}
        }
        match state {
            PipelineTaskState::BlockedForSource => self.wait_source_watcher.start(),
            PipelineTaskState::BlockedForSink => self.wait_sink_watcher.start(),
            _ => {}
        }
        self.cur_state = state;
    }

    pub fn source_can_read(&self) -> bool {
        self.operators.first().map(|op| op.can_read()).unwrap_or(false)
    }

    pub fn sink_can_write(&self) -> bool {
        self.sink.can_write()
    }

    pub fn runtime_filters_are_ready_or_timeout(&self) -> bool {
        self.operators
            .first()
            .map(|op| op.runtime_filters_are_ready_or_timeout())
            .unwrap_or(true)
    }

    pub fn is_pending_finish(&self) -> bool {
        let source_pending = self
            .operators
            .first()
            .map(|op| op.is_pending_finish())
            .unwrap_or(false);
        source_pending || self.sink.is_pending_finish()
    }

    pub fn has_unfinished_dependency(&self) -> bool {
        self.pipeline.has_unfinished_dependency()
    }

    /// Runs `prepare` over the whole chain and computes the initial
    /// dependency state. Operator `open` is deferred to the first `execute`.
    pub fn prepare(&mut self) -> Result<(), String> {
        debug_assert_eq!(self.cur_state, PipelineTaskState::NotReady);
        {
            let _t = ScopedTimer::new(Arc::clone(&self.counters.prepare_time));
            let state = Arc::clone(self.fragment.runtime_state());
            for op in self.operators.iter_mut() {
                op.prepare(&state)?;
            }
            self.sink.prepare(&state)?;
        }
        self.prepared = true;
        if self.pipeline.has_unfinished_dependency() {
            self.set_state(PipelineTaskState::BlockedForDependency);
        } else {
            self.set_state(PipelineTaskState::Runnable);
        }
        Ok(())
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    fn open_operators(&mut self) -> Result<(), String> {
        let _t = ScopedTimer::new(Arc::clone(&self.counters.open_time));
        let state = Arc::clone(self.fragment.runtime_state());
        for op in self.operators.iter_mut() {
            op.open(&state)?;
        }
        self.sink.open(&state)?;
        self.opened = true;
        Ok(())
    }

    /// One time slice of execution. Alternately asks the source chain for a
    /// block and hands it to the sink until the slice is exhausted, a
    /// blocking condition is hit, or the stream finishes (`eos` set).
    ///
    /// Between successive calls on the same task all memory writes of the
    /// previous call are visible; the task-queue handoff establishes the
    /// happens-before edge. A task is never executed concurrently with
    /// itself.
    pub fn execute(&mut self, eos: &mut bool) -> Result<(), String> {
        debug_assert_eq!(self.cur_state, PipelineTaskState::Runnable);
        *eos = false;
        let _exec_timer = ScopedTimer::new(Arc::clone(&self.counters.exec_time));

        if self.fragment.is_canceled() {
            return Err(self
                .fragment
                .cancel_reason()
                .unwrap_or_else(|| "fragment canceled".to_string()));
        }
        if !self.opened {
            self.open_operators()?;
        }

        let state = Arc::clone(self.fragment.runtime_state());
        let start = Instant::now();
        loop {
            if self.fragment.is_canceled() {
                return Err(self
                    .fragment
                    .cancel_reason()
                    .unwrap_or_else(|| "fragment canceled".to_string()));
            }
            // Yield if time slice exceeded; the task stays RUNNABLE and is
            // re-enqueued by the scheduler.
            if start.elapsed() >= self.time_slice {
                self.counters.yield_count.add(1);
                return Ok(());
            }
            if !self.sink_can_write() {
                self.counters.blocked_by_sink.add(1);
                self.set_state(PipelineTaskState::BlockedForSink);
                return Ok(());
            }
            if self.block.is_empty() && !self.runtime_filters_are_ready_or_timeout() {
                self.set_state(PipelineTaskState::BlockedForRf);
                return Ok(());
            }
            if self.block.is_empty() && !self.source_can_read() {
                self.counters.blocked_by_source.add(1);
                self.set_state(PipelineTaskState::BlockedForSource);
                return Ok(());
            }

            self.data_state = {
                let _t = ScopedTimer::new(Arc::clone(&self.counters.get_block_time));
                self.operators
                    .last_mut()
                    .expect("pipeline task has a source chain")
                    .get_block(&state, &mut self.block)?
            };
            if !self.block.is_empty() {
                self.counters.block_count.add(1);
            }
            if !self.block.is_empty() || self.data_state == SourceState::Finished {
                {
                    let _t = ScopedTimer::new(Arc::clone(&self.counters.sink_time));
                    self.sink.sink(&state, &mut self.block, self.data_state)?;
                }
                self.block.clear();
            }
            if self.data_state == SourceState::Finished {
                *eos = true;
                return Ok(());
            }
        }
    }

    /// Initiates teardown on every operator in chain order. Safe to call
    /// from any state; repeated calls are no-ops.
    pub fn try_close(&mut self) -> Result<(), String> {
        if self.try_closed {
            return Ok(());
        }
        self.try_closed = true;
        let state = Arc::clone(self.fragment.runtime_state());
        let mut first_error = None;
        for op in self.operators.iter_mut() {
            if let Err(err) = op.try_close(&state) {
                first_error.get_or_insert(err);
            }
        }
        if let Err(err) = self.sink.try_close(&state) {
            first_error.get_or_insert(err);
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Completes teardown. Called exactly once after the task reaches a
    /// terminal state; close failures are reported but never override an
    /// earlier status.
    pub fn close(&mut self) -> Result<(), String> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let _t = ScopedTimer::new(Arc::clone(&self.counters.close_time));
        let state = Arc::clone(self.fragment.runtime_state());
        let mut first_error = None;
        self.block.clear();
        for op in self.operators.iter_mut() {
            if let Err(err) = op.close(&state) {
                first_error.get_or_insert(err);
            }
        }
        if let Err(err) = self.sink.close(&state) {
            first_error.get_or_insert(err);
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Flushes watcher-based counters after the task reached a terminal
    /// state, so the profile reflects the whole task lifetime.
    pub fn finalize(&mut self) {
        let _t = ScopedTimer::new(Arc::clone(&self.counters.finalize_time));
        self.wait_source_watcher.stop();
        self.wait_sink_watcher.stop();
        self.wait_worker_watcher.stop();
        self.wait_schedule_watcher.stop();
        self.counters
            .schedule_count
            .set(i64::from(self.schedule_time));
        self.counters
            .wait_source_time
            .set(self.wait_source_watcher.elapsed_ns());
        self.counters
            .wait_sink_time
            .set(self.wait_sink_watcher.elapsed_ns());
        self.counters
            .wait_worker_time
            .set(self.wait_worker_watcher.elapsed_ns());
        self.counters
            .wait_schedule_time
            .set(self.wait_schedule_watcher.elapsed_ns());
    }

    /// Reports this task's terminal state to its pipeline; the last task of
    /// a pipeline releases one dependency on every parent.
    pub fn notify_pipeline_finished(&self) {
        self.pipeline.task_finished(self.previous_core_id);
    }

    // Queue bookkeeping.

    pub(crate) fn put_in_runnable_queue(&mut self) {
        self.schedule_time += 1;
        self.wait_worker_watcher.start();
        self.enqueued_at = Some(Instant::now());
    }

    pub(crate) fn pop_out_runnable_queue(&mut self) {
        self.wait_worker_watcher.stop();
        self.enqueued_at = None;
    }

    pub(crate) fn start_schedule_watcher(&mut self) {
        self.wait_schedule_watcher.start();
    }

    pub(crate) fn stop_schedule_watcher(&mut self) {
        self.wait_schedule_watcher.stop();
    }

    pub(crate) fn enqueued_at(&self) -> Option<Instant> {
        self.enqueued_at
    }

    pub(crate) fn reset_enqueued_at(&mut self) {
        self.enqueued_at = Some(Instant::now());
    }

    #[cfg(test)]
    pub(crate) fn backdate_enqueued_at(&mut self, at: Instant) {
        self.enqueued_at = Some(at);
    }

    // Time-slice accounting for the priority queue.

    pub fn inc_runtime_ns(&mut self, delta: u64) {
        self.runtime_ns += delta;
        self.counters
            .task_cpu_time
            .add(clamp_u128_to_i64(u128::from(delta)));
    }

    pub fn runtime_ns(&self) -> u64 {
        self.runtime_ns
    }

    pub fn update_queue_level(&mut self, queue_level: usize) {
        self.queue_level = queue_level;
    }

    pub fn queue_level(&self) -> usize {
        self.queue_level
    }

    pub fn set_core_id(&mut self, core_id: usize) {
        self.core_id = core_id;
    }

    pub fn core_id(&self) -> usize {
        self.core_id
    }

    /// Remembers the core this task last ran on; bumps the core-change
    /// counter when it moved.
    pub fn set_previous_core_id(&mut self, id: i64) {
        if id == self.previous_core_id {
            return;
        }
        if self.previous_core_id != -1 {
            self.counters.core_change_times.add(1);
        }
        self.previous_core_id = id;
    }

    pub fn previous_core_id(&self) -> i64 {
        if self.previous_core_id != -1 {
            self.previous_core_id
        } else {
            self.pipeline.previous_core_id()
        }
    }

    pub fn schedule_time(&self) -> u32 {
        self.schedule_time
    }

    pub fn debug_string(&self) -> String {
        let op_names: Vec<&str> = self.operators.iter().map(|op| op.name()).collect();
        format!(
            "PipelineTask(pipeline_id={} index={} state={} prepared={} opened={} operators={:?} sink={} runtime_ns={} queue_level={})",
            self.pipeline.id(),
            self.index,
            self.cur_state.name(),
            self.prepared,
            self.opened,
            op_names,
            self.sink.name(),
            self.runtime_ns,
            self.queue_level
        )
    }
}
