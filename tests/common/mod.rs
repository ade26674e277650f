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
//! Scripted operators shared by the scheduler integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arrow::array::Int32Array;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;

use flintrocks::exec::block::Block;
use flintrocks::exec::pipeline::operator::{Operator, OperatorFactory, SourceState};
use flintrocks::exec::pipeline::pipeline::Pipeline;
use flintrocks::runtime::runtime_state::RuntimeState;

/// Test-harness logging: keeps worker/poller output attributable when a
/// scenario fails. Idempotent, so every helper below can call it.
pub fn init_test_logging() {
    flintrocks::common::logging::init_with_level("warn");
}

pub fn int_batch(values: Vec<i32>) -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int32, false)]));
    let array = Arc::new(Int32Array::from(values)) as arrow::array::ArrayRef;
    RecordBatch::try_new(schema, vec![array]).expect("record batch")
}

pub fn batch_values(batch: &RecordBatch) -> Vec<i32> {
    let col = batch
        .column(0)
        .as_any()
        .downcast_ref::<Int32Array>()
        .expect("int32 column");
    (0..batch.num_rows()).map(|i| col.value(i)).collect()
}

/// Builds a finalized single chain pipeline from the given factories.
pub fn build_pipeline(id: u32, factories: Vec<Arc<dyn OperatorFactory>>) -> Arc<Pipeline> {
    init_test_logging();
    let pipeline = Pipeline::new(id, 1);
    for factory in factories {
        pipeline.append_operator(factory).expect("append operator");
    }
    pipeline.finalize().expect("finalize pipeline");
    pipeline
}

// ---------------------------------------------------------------------------
// Vector-backed source: emits a fixed list of batches, the last one together
// with FINISHED.
// ---------------------------------------------------------------------------

pub struct VecSourceFactory {
    batches: Vec<RecordBatch>,
}

impl VecSourceFactory {
    pub fn new(batches: Vec<RecordBatch>) -> Arc<Self> {
        Arc::new(Self { batches })
    }
}

impl OperatorFactory for VecSourceFactory {
    fn name(&self) -> &str {
        "VEC_SOURCE"
    }

    fn is_source(&self) -> bool {
        true
    }

    fn create(&self, _dop: u32, _index: u32) -> Box<dyn Operator> {
        Box::new(VecSource {
            pending: self.batches.clone().into(),
        })
    }
}

struct VecSource {
    pending: VecDeque<RecordBatch>,
}

impl Operator for VecSource {
    fn name(&self) -> &str {
        "VEC_SOURCE"
    }

    fn can_read(&self) -> bool {
        !self.pending.is_empty()
    }

    fn get_block(&mut self, _state: &RuntimeState, block: &mut Block) -> Result<SourceState, String> {
        match self.pending.pop_front() {
            Some(batch) => {
                block.set_batch(batch);
                if self.pending.is_empty() {
                    Ok(SourceState::Finished)
                } else {
                    Ok(SourceState::MoreData)
                }
            }
            None => Ok(SourceState::Finished),
        }
    }
}

// ---------------------------------------------------------------------------
// Gated source: the test feeds batches (and eventually eos) through a shared
// handle; an empty gate reports can_read = false.
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct SourceGate {
    queue: Arc<Mutex<VecDeque<RecordBatch>>>,
    finished: Arc<AtomicBool>,
}

impl SourceGate {
    pub fn new() -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::new())),
            finished: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn feed(&self, batch: RecordBatch) {
        self.queue.lock().expect("source gate lock").push_back(batch);
    }

    pub fn finish(&self) {
        self.finished.store(true, Ordering::Release);
    }
}

pub struct GatedSourceFactory {
    gate: SourceGate,
}

impl GatedSourceFactory {
    pub fn new(gate: SourceGate) -> Arc<Self> {
        Arc::new(Self { gate })
    }
}

impl OperatorFactory for GatedSourceFactory {
    fn name(&self) -> &str {
        "GATED_SOURCE"
    }

    fn is_source(&self) -> bool {
        true
    }

    fn create(&self, _dop: u32, _index: u32) -> Box<dyn Operator> {
        Box::new(GatedSource {
            gate: self.gate.clone(),
        })
    }
}

struct GatedSource {
    gate: SourceGate,
}

impl Operator for GatedSource {
    fn name(&self) -> &str {
        "GATED_SOURCE"
    }

    fn can_read(&self) -> bool {
        !self.gate.queue.lock().expect("source gate lock").is_empty()
            || self.gate.finished.load(Ordering::Acquire)
    }

    fn get_block(&mut self, _state: &RuntimeState, block: &mut Block) -> Result<SourceState, String> {
        let popped = self.gate.queue.lock().expect("source gate lock").pop_front();
        match popped {
            Some(batch) => {
                block.set_batch(batch);
                Ok(SourceState::DependOnSource)
            }
            None => {
                if self.gate.finished.load(Ordering::Acquire) {
                    Ok(SourceState::Finished)
                } else {
                    Ok(SourceState::DependOnSource)
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Collecting sink with controllable writability and pending-finish release.
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct SinkHandle {
    batches: Arc<Mutex<Vec<RecordBatch>>>,
    sink_calls: Arc<AtomicUsize>,
    writable: Arc<AtomicBool>,
    saw_eos: Arc<AtomicBool>,
    pending_finish: Arc<AtomicBool>,
}

impl SinkHandle {
    pub fn new() -> Self {
        Self {
            batches: Arc::new(Mutex::new(Vec::new())),
            sink_calls: Arc::new(AtomicUsize::new(0)),
            writable: Arc::new(AtomicBool::new(true)),
            saw_eos: Arc::new(AtomicBool::new(false)),
            pending_finish: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn take_batches(&self) -> Vec<RecordBatch> {
        std::mem::take(&mut *self.batches.lock().expect("sink handle lock"))
    }

    pub fn collected_values(&self) -> Vec<i32> {
        let guard = self.batches.lock().expect("sink handle lock");
        guard.iter().flat_map(batch_values).collect()
    }

    pub fn sink_calls(&self) -> usize {
        self.sink_calls.load(Ordering::Acquire)
    }

    pub fn set_writable(&self, writable: bool) {
        self.writable.store(writable, Ordering::Release);
    }

    pub fn saw_eos(&self) -> bool {
        self.saw_eos.load(Ordering::Acquire)
    }

    pub fn set_pending_finish(&self, pending: bool) {
        self.pending_finish.store(pending, Ordering::Release);
    }
}

pub struct CollectSinkFactory {
    handle: SinkHandle,
}

impl CollectSinkFactory {
    pub fn new(handle: SinkHandle) -> Arc<Self> {
        Arc::new(Self { handle })
    }
}

impl OperatorFactory for CollectSinkFactory {
    fn name(&self) -> &str {
        "COLLECT_SINK"
    }

    fn is_sink(&self) -> bool {
        true
    }

    fn create(&self, _dop: u32, _index: u32) -> Box<dyn Operator> {
        Box::new(CollectSink {
            handle: self.handle.clone(),
        })
    }
}

struct CollectSink {
    handle: SinkHandle,
}

impl Operator for CollectSink {
    fn name(&self) -> &str {
        "COLLECT_SINK"
    }

    fn can_write(&self) -> bool {
        self.handle.writable.load(Ordering::Acquire)
    }

    fn sink(
        &mut self,
        _state: &RuntimeState,
        block: &mut Block,
        source_state: SourceState,
    ) -> Result<(), String> {
        self.handle.sink_calls.fetch_add(1, Ordering::AcqRel);
        if let Some(batch) = block.take().into_batch() {
            self.handle
                .batches
                .lock()
                .expect("sink handle lock")
                .push(batch);
        }
        if source_state == SourceState::Finished {
            self.handle.saw_eos.store(true, Ordering::Release);
        }
        Ok(())
    }

    fn is_pending_finish(&self) -> bool {
        self.handle.pending_finish.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// Source gated on runtime-filter readiness.
// ---------------------------------------------------------------------------

pub struct RfGatedSourceFactory {
    inner: Arc<VecSourceFactory>,
    rf_ready: Arc<AtomicBool>,
}

impl RfGatedSourceFactory {
    pub fn new(batches: Vec<RecordBatch>, rf_ready: Arc<AtomicBool>) -> Arc<Self> {
        Arc::new(Self {
            inner: VecSourceFactory::new(batches),
            rf_ready,
        })
    }
}

impl OperatorFactory for RfGatedSourceFactory {
    fn name(&self) -> &str {
        "RF_GATED_SOURCE"
    }

    fn is_source(&self) -> bool {
        true
    }

    fn create(&self, dop: u32, index: u32) -> Box<dyn Operator> {
        Box::new(RfGatedSource {
            inner: self.inner.create(dop, index),
            rf_ready: Arc::clone(&self.rf_ready),
        })
    }
}

struct RfGatedSource {
    inner: Box<dyn Operator>,
    rf_ready: Arc<AtomicBool>,
}

impl Operator for RfGatedSource {
    fn name(&self) -> &str {
        "RF_GATED_SOURCE"
    }

    fn can_read(&self) -> bool {
        self.inner.can_read()
    }

    fn get_block(&mut self, state: &RuntimeState, block: &mut Block) -> Result<SourceState, String> {
        self.inner.get_block(state, block)
    }

    fn runtime_filters_are_ready_or_timeout(&self) -> bool {
        self.rf_ready.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// Slow source: emits a fixed number of single-row batches, sleeping inside
// each get_block to exercise time-slice yielding.
// ---------------------------------------------------------------------------

pub struct SlowSourceFactory {
    blocks: usize,
    step: Duration,
}

impl SlowSourceFactory {
    pub fn new(blocks: usize, step: Duration) -> Arc<Self> {
        Arc::new(Self { blocks, step })
    }
}

impl OperatorFactory for SlowSourceFactory {
    fn name(&self) -> &str {
        "SLOW_SOURCE"
    }

    fn is_source(&self) -> bool {
        true
    }

    fn create(&self, _dop: u32, _index: u32) -> Box<dyn Operator> {
        Box::new(SlowSource {
            remaining: self.blocks,
            step: self.step,
        })
    }
}

struct SlowSource {
    remaining: usize,
    step: Duration,
}

impl Operator for SlowSource {
    fn name(&self) -> &str {
        "SLOW_SOURCE"
    }

    fn can_read(&self) -> bool {
        self.remaining > 0
    }

    fn get_block(&mut self, _state: &RuntimeState, block: &mut Block) -> Result<SourceState, String> {
        std::thread::sleep(self.step);
        if self.remaining == 0 {
            return Ok(SourceState::Finished);
        }
        self.remaining -= 1;
        block.set_batch(int_batch(vec![self.remaining as i32]));
        if self.remaining == 0 {
            Ok(SourceState::Finished)
        } else {
            Ok(SourceState::MoreData)
        }
    }
}

// ---------------------------------------------------------------------------
// Source that fails on the first get_block, for error propagation tests.
// ---------------------------------------------------------------------------

pub struct FailingSourceFactory {
    message: String,
}

impl FailingSourceFactory {
    pub fn new(message: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            message: message.into(),
        })
    }
}

impl OperatorFactory for FailingSourceFactory {
    fn name(&self) -> &str {
        "FAILING_SOURCE"
    }

    fn is_source(&self) -> bool {
        true
    }

    fn create(&self, _dop: u32, _index: u32) -> Box<dyn Operator> {
        Box::new(FailingSource {
            message: self.message.clone(),
        })
    }
}

struct FailingSource {
    message: String,
}

impl Operator for FailingSource {
    fn name(&self) -> &str {
        "FAILING_SOURCE"
    }

    fn can_read(&self) -> bool {
        true
    }

    fn get_block(&mut self, _state: &RuntimeState, _block: &mut Block) -> Result<SourceState, String> {
        Err(self.message.clone())
    }
}

// ---------------------------------------------------------------------------
// Close-tracking source, for lifecycle invariants.
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct CloseTracker {
    pub prepare_calls: Arc<AtomicUsize>,
    pub open_calls: Arc<AtomicUsize>,
    pub try_close_calls: Arc<AtomicUsize>,
    pub close_calls: Arc<AtomicUsize>,
}

impl CloseTracker {
    pub fn new() -> Self {
        Self::default()
    }
}

pub struct TrackedSourceFactory {
    inner: Arc<VecSourceFactory>,
    tracker: CloseTracker,
}

impl TrackedSourceFactory {
    pub fn new(batches: Vec<RecordBatch>, tracker: CloseTracker) -> Arc<Self> {
        Arc::new(Self {
            inner: VecSourceFactory::new(batches),
            tracker,
        })
    }
}

impl OperatorFactory for TrackedSourceFactory {
    fn name(&self) -> &str {
        "TRACKED_SOURCE"
    }

    fn is_source(&self) -> bool {
        true
    }

    fn create(&self, dop: u32, index: u32) -> Box<dyn Operator> {
        Box::new(TrackedSource {
            inner: self.inner.create(dop, index),
            tracker: self.tracker.clone(),
        })
    }
}

struct TrackedSource {
    inner: Box<dyn Operator>,
    tracker: CloseTracker,
}

impl Operator for TrackedSource {
    fn name(&self) -> &str {
        "TRACKED_SOURCE"
    }

    fn prepare(&mut self, state: &RuntimeState) -> Result<(), String> {
        self.tracker.prepare_calls.fetch_add(1, Ordering::AcqRel);
        self.inner.prepare(state)
    }

    fn open(&mut self, state: &RuntimeState) -> Result<(), String> {
        self.tracker.open_calls.fetch_add(1, Ordering::AcqRel);
        self.inner.open(state)
    }

    fn can_read(&self) -> bool {
        self.inner.can_read()
    }

    fn get_block(&mut self, state: &RuntimeState, block: &mut Block) -> Result<SourceState, String> {
        self.inner.get_block(state, block)
    }

    fn try_close(&mut self, state: &RuntimeState) -> Result<(), String> {
        self.tracker.try_close_calls.fetch_add(1, Ordering::AcqRel);
        self.inner.try_close(state)
    }

    fn close(&mut self, state: &RuntimeState) -> Result<(), String> {
        self.tracker.close_calls.fetch_add(1, Ordering::AcqRel);
        self.inner.close(state)
    }
}
