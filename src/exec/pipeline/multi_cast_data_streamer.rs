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
//! Multicast data-stream buffer for cross-pipeline fanout.
//!
//! Responsibilities:
//! - Fans one producer's block stream out to N consumer pipelines with
//!   independent read cursors and FIFO-per-consumer delivery.
//! - Retains each block until the last consumer has read it; bounds
//!   buffered blocks with a watermark for producer backpressure.
//!
//! Key exported interfaces:
//! - Types: `MultiCastDataStreamer`, `MultiCastDataStreamSourceFactory`,
//!   `MultiCastDataStreamSinkFactory`.
//!
//! The mutex guards the entry queue only; `can_read`/`can_write` read
//! atomics so blocked-task polling stays cheap. No lock is held across any
//! operator call.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::operator::{Operator, OperatorFactory, SourceState};
use crate::common::config;
use crate::exec::block::Block;
use crate::flintrocks_logging::debug;
use crate::runtime::runtime_state::RuntimeState;

struct StreamEntry {
    block: Block,
    remaining: usize,
}

struct StreamerInner {
    entries: VecDeque<StreamEntry>,
    // Absolute sequence number of the entry at the queue front.
    base_seq: usize,
}

/// Shared broadcast buffer between one producing pipeline and N consumer
/// pipelines.
///
/// Entry lifetime invariant: a block is retained until every consumer
/// cursor has passed it, then released. Since cursors only move forward and
/// a consumer passing entry k has passed all entries before k, fully-read
/// entries always form a prefix of the queue.
pub struct MultiCastDataStreamer {
    inner: Mutex<StreamerInner>,
    cursors: Vec<AtomicUsize>,
    consumer_blocked: Vec<AtomicBool>,
    tail_seq: AtomicUsize,
    eos: AtomicBool,
    buffered: AtomicUsize,
    watermark: usize,
}

impl MultiCastDataStreamer {
    pub fn new(consumer_count: usize) -> Arc<Self> {
        Self::with_watermark(consumer_count, config::multicast_buffer_watermark_blocks())
    }

    pub fn with_watermark(consumer_count: usize, watermark: usize) -> Arc<Self> {
        assert!(consumer_count > 0, "multicast streamer needs a consumer");
        Arc::new(Self {
            inner: Mutex::new(StreamerInner {
                entries: VecDeque::new(),
                base_seq: 0,
            }),
            cursors: (0..consumer_count).map(|_| AtomicUsize::new(0)).collect(),
            consumer_blocked: (0..consumer_count).map(|_| AtomicBool::new(false)).collect(),
            tail_seq: AtomicUsize::new(0),
            eos: AtomicBool::new(false),
            buffered: AtomicUsize::new(0),
            watermark: watermark.max(1),
        })
    }

    pub fn consumer_count(&self) -> usize {
        self.cursors.len()
    }

    pub fn is_eos(&self) -> bool {
        self.eos.load(Ordering::Acquire)
    }

    pub fn buffered_blocks(&self) -> usize {
        self.buffered.load(Ordering::Acquire)
    }

    /// True iff consumer `i` has an unread entry or the stream has ended.
    pub fn can_read(&self, consumer_id: usize) -> bool {
        let cursor = self.cursors[consumer_id].load(Ordering::Acquire);
        cursor < self.tail_seq.load(Ordering::Acquire) || self.is_eos()
    }

    /// Bounded-memory backpressure for the producer side.
    pub fn can_write(&self) -> bool {
        self.buffered.load(Ordering::Acquire) < self.watermark
    }

    /// Consulted when waking parked reader tasks.
    pub fn consumer_is_blocked(&self, consumer_id: usize) -> bool {
        self.consumer_blocked[consumer_id].load(Ordering::Acquire)
    }

    /// Appends a block for every consumer. A `Finished` source state seals
    /// the stream; sealing twice is a no-op.
    pub fn push(&self, block: &mut Block, source_state: SourceState) -> Result<(), String> {
        let mut inner = self.inner.lock().expect("multicast streamer lock");
        if self.is_eos() {
            if block.is_empty() && source_state == SourceState::Finished {
                return Ok(());
            }
            return Err("multicast streamer pushed after end-of-stream".to_string());
        }
        if !block.is_empty() {
            inner.entries.push_back(StreamEntry {
                block: block.take(),
                remaining: self.consumer_count(),
            });
            self.tail_seq.fetch_add(1, Ordering::AcqRel);
            self.buffered.fetch_add(1, Ordering::AcqRel);
        }
        if source_state == SourceState::Finished {
            self.eos.store(true, Ordering::Release);
            debug!(
                "Multicast streamer sealed: consumers={} buffered={}",
                self.consumer_count(),
                self.buffered_blocks()
            );
        }
        // Anything new to read clears the consumers' parked markers.
        for blocked in self.consumer_blocked.iter() {
            blocked.store(false, Ordering::Release);
        }
        Ok(())
    }

    /// Reads the next entry for consumer `i`. The last consumer to read an
    /// entry moves the block out; earlier readers get a copy.
    pub fn pull(&self, consumer_id: usize, block: &mut Block) -> Result<SourceState, String> {
        if consumer_id >= self.consumer_count() {
            return Err(format!(
                "multicast consumer id {} out of range (consumers={})",
                consumer_id,
                self.consumer_count()
            ));
        }
        let mut inner = self.inner.lock().expect("multicast streamer lock");
        let cursor = self.cursors[consumer_id].load(Ordering::Acquire);
        let tail = self.tail_seq.load(Ordering::Acquire);
        if cursor >= tail {
            if self.is_eos() {
                return Ok(SourceState::Finished);
            }
            self.consumer_blocked[consumer_id].store(true, Ordering::Release);
            return Ok(SourceState::DependOnSource);
        }

        let idx = cursor - inner.base_seq;
        let entry = inner
            .entries
            .get_mut(idx)
            .ok_or_else(|| "multicast cursor outside buffered window".to_string())?;
        entry.remaining -= 1;
        *block = if entry.remaining == 0 {
            entry.block.take()
        } else {
            entry.block.clone()
        };
        self.cursors[consumer_id].store(cursor + 1, Ordering::Release);

        // Fully-read entries are a prefix; release them.
        while inner
            .entries
            .front()
            .map(|entry| entry.remaining == 0)
            .unwrap_or(false)
        {
            inner.entries.pop_front();
            inner.base_seq += 1;
            self.buffered.fetch_sub(1, Ordering::AcqRel);
        }

        let next = cursor + 1;
        if next < tail {
            Ok(SourceState::MoreData)
        } else if self.is_eos() {
            Ok(SourceState::Finished)
        } else {
            Ok(SourceState::DependOnSource)
        }
    }
}

/// Factory for the consumer-side source operator of one multicast stream.
pub struct MultiCastDataStreamSourceFactory {
    name: String,
    consumer_id: usize,
    streamer: Arc<MultiCastDataStreamer>,
}

impl MultiCastDataStreamSourceFactory {
    pub fn new(consumer_id: usize, streamer: Arc<MultiCastDataStreamer>) -> Self {
        Self {
            name: format!("MULTI_CAST_DATA_STREAM_SOURCE (consumer={consumer_id})"),
            consumer_id,
            streamer,
        }
    }
}

impl OperatorFactory for MultiCastDataStreamSourceFactory {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_source(&self) -> bool {
        true
    }

    fn create(&self, _dop: u32, _index: u32) -> Box<dyn Operator> {
        Box::new(MultiCastDataStreamSourceOperator {
            name: self.name.clone(),
            consumer_id: self.consumer_id,
            streamer: Arc::clone(&self.streamer),
        })
    }
}

struct MultiCastDataStreamSourceOperator {
    name: String,
    consumer_id: usize,
    streamer: Arc<MultiCastDataStreamer>,
}

impl Operator for MultiCastDataStreamSourceOperator {
    fn name(&self) -> &str {
        &self.name
    }

    fn can_read(&self) -> bool {
        self.streamer.can_read(self.consumer_id)
    }

    fn get_block(&mut self, _state: &RuntimeState, block: &mut Block) -> Result<SourceState, String> {
        self.streamer.pull(self.consumer_id, block)
    }
}

/// Factory for the producer-side sink operator of one multicast stream.
pub struct MultiCastDataStreamSinkFactory {
    name: String,
    streamer: Arc<MultiCastDataStreamer>,
}

impl MultiCastDataStreamSinkFactory {
    pub fn new(streamer: Arc<MultiCastDataStreamer>) -> Self {
        Self {
            name: "MULTI_CAST_DATA_STREAM_SINK".to_string(),
            streamer,
        }
    }
}

impl OperatorFactory for MultiCastDataStreamSinkFactory {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_sink(&self) -> bool {
        true
    }

    fn create(&self, _dop: u32, _index: u32) -> Box<dyn Operator> {
        Box::new(MultiCastDataStreamSinkOperator {
            name: self.name.clone(),
            streamer: Arc::clone(&self.streamer),
        })
    }
}

struct MultiCastDataStreamSinkOperator {
    name: String,
    streamer: Arc<MultiCastDataStreamer>,
}

impl Operator for MultiCastDataStreamSinkOperator {
    fn name(&self) -> &str {
        &self.name
    }

    fn can_write(&self) -> bool {
        self.streamer.can_write()
    }

    fn sink(
        &mut self,
        _state: &RuntimeState,
        block: &mut Block,
        source_state: SourceState,
    ) -> Result<(), String> {
        self.streamer.push(block, source_state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Int32Array;
    use arrow::datatypes::{DataType, Field, Schema};
    use arrow::record_batch::RecordBatch;

    fn int_block(values: Vec<i32>) -> Block {
        let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int32, false)]));
        let array = Arc::new(Int32Array::from(values)) as arrow::array::ArrayRef;
        Block::new(RecordBatch::try_new(schema, vec![array]).expect("record batch"))
    }

    #[test]
    fn every_consumer_sees_fifo_order_and_blocks_release() {
        let streamer = MultiCastDataStreamer::with_watermark(3, 16);
        for v in [1, 2, 3] {
            let mut block = int_block(vec![v]);
            streamer
                .push(&mut block, SourceState::DependOnSource)
                .expect("push");
        }
        let mut eos_block = Block::empty();
        streamer
            .push(&mut eos_block, SourceState::Finished)
            .expect("push eos");
        assert_eq!(streamer.buffered_blocks(), 3);

        for consumer in 0..3 {
            let mut seen = Vec::new();
            loop {
                let mut block = Block::empty();
                let state = streamer.pull(consumer, &mut block).expect("pull");
                if !block.is_empty() {
                    let batch = block.batch().expect("batch");
                    let col = batch
                        .column(0)
                        .as_any()
                        .downcast_ref::<Int32Array>()
                        .expect("int column");
                    seen.push(col.value(0));
                }
                if state == SourceState::Finished {
                    break;
                }
            }
            assert_eq!(seen, vec![1, 2, 3]);
        }
        // Released after the third consumer read them.
        assert_eq!(streamer.buffered_blocks(), 0);
    }

    #[test]
    fn entries_retained_until_slowest_consumer_passes() {
        let streamer = MultiCastDataStreamer::with_watermark(2, 16);
        let mut block = int_block(vec![7]);
        streamer
            .push(&mut block, SourceState::DependOnSource)
            .expect("push");

        let mut out = Block::empty();
        streamer.pull(0, &mut out).expect("pull");
        assert_eq!(streamer.buffered_blocks(), 1, "consumer 1 still unread");

        let mut out = Block::empty();
        streamer.pull(1, &mut out).expect("pull");
        assert_eq!(streamer.buffered_blocks(), 0);
    }

    #[test]
    fn empty_buffer_marks_consumer_blocked_until_next_push() {
        let streamer = MultiCastDataStreamer::with_watermark(1, 16);
        let mut out = Block::empty();
        let state = streamer.pull(0, &mut out).expect("pull");
        assert_eq!(state, SourceState::DependOnSource);
        assert!(streamer.consumer_is_blocked(0));
        assert!(!streamer.can_read(0));

        let mut block = int_block(vec![1]);
        streamer
            .push(&mut block, SourceState::DependOnSource)
            .expect("push");
        assert!(!streamer.consumer_is_blocked(0));
        assert!(streamer.can_read(0));
    }

    #[test]
    fn watermark_gates_can_write() {
        let streamer = MultiCastDataStreamer::with_watermark(1, 2);
        assert!(streamer.can_write());
        for v in [1, 2] {
            let mut block = int_block(vec![v]);
            streamer
                .push(&mut block, SourceState::DependOnSource)
                .expect("push");
        }
        assert!(!streamer.can_write());

        let mut out = Block::empty();
        streamer.pull(0, &mut out).expect("pull");
        assert!(streamer.can_write());
    }

    #[test]
    fn pushing_eos_twice_is_a_noop() {
        let streamer = MultiCastDataStreamer::with_watermark(1, 16);
        let mut block = Block::empty();
        streamer
            .push(&mut block, SourceState::Finished)
            .expect("first eos");
        let mut block = Block::empty();
        streamer
            .push(&mut block, SourceState::Finished)
            .expect("second eos is a no-op");
        assert!(streamer.is_eos());

        let mut data = int_block(vec![1]);
        assert!(streamer.push(&mut data, SourceState::MoreData).is_err());
    }

    #[test]
    fn eos_makes_every_consumer_readable() {
        let streamer = MultiCastDataStreamer::with_watermark(2, 16);
        assert!(!streamer.can_read(0));
        let mut block = Block::empty();
        streamer
            .push(&mut block, SourceState::Finished)
            .expect("eos");
        assert!(streamer.can_read(0));
        assert!(streamer.can_read(1));
        let mut out = Block::empty();
        assert_eq!(
            streamer.pull(1, &mut out).expect("pull"),
            SourceState::Finished
        );
        assert!(out.is_empty());
    }
}
