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
use arrow::record_batch::RecordBatch;

/// A columnar row batch handed between pipeline operators.
///
/// The scheduler treats blocks as opaque: it only moves them from a source
/// chain into a sink and asks for the row count. Ownership is unique along
/// the pipeline; the multicast buffer clones the underlying Arc'd columns
/// when more than one consumer still needs an entry.
#[derive(Clone, Debug, Default)]
pub struct Block {
    batch: Option<RecordBatch>,
}

impl Block {
    pub fn empty() -> Self {
        Self { batch: None }
    }

    pub fn new(batch: RecordBatch) -> Self {
        Self { batch: Some(batch) }
    }

    pub fn len(&self) -> usize {
        self.batch.as_ref().map(|b| b.num_rows()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn estimated_bytes(&self) -> usize {
        self.batch
            .as_ref()
            .map(|b| b.get_array_memory_size())
            .unwrap_or(0)
    }

    pub fn batch(&self) -> Option<&RecordBatch> {
        self.batch.as_ref()
    }

    pub fn set_batch(&mut self, batch: RecordBatch) {
        self.batch = Some(batch);
    }

    /// Move the content out, leaving this block empty.
    pub fn take(&mut self) -> Block {
        Block {
            batch: self.batch.take(),
        }
    }

    pub fn into_batch(self) -> Option<RecordBatch> {
        self.batch
    }

    pub fn clear(&mut self) {
        self.batch = None;
    }

    pub fn swap(&mut self, other: &mut Block) {
        std::mem::swap(&mut self.batch, &mut other.batch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Int32Array;
    use arrow::datatypes::{DataType, Field, Schema};
    use std::sync::Arc;

    fn int_block(values: Vec<i32>) -> Block {
        let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int32, false)]));
        let array = Arc::new(Int32Array::from(values)) as arrow::array::ArrayRef;
        Block::new(RecordBatch::try_new(schema, vec![array]).expect("record batch"))
    }

    #[test]
    fn take_moves_content_out() {
        let mut block = int_block(vec![1, 2, 3]);
        assert_eq!(block.len(), 3);
        let taken = block.take();
        assert_eq!(taken.len(), 3);
        assert!(block.is_empty());
    }

    #[test]
    fn empty_block_reports_zero_rows() {
        let block = Block::empty();
        assert!(block.is_empty());
        assert_eq!(block.estimated_bytes(), 0);
        assert!(block.batch().is_none());
    }

    #[test]
    fn swap_exchanges_batches() {
        let mut a = int_block(vec![1]);
        let mut b = Block::empty();
        a.swap(&mut b);
        assert!(a.is_empty());
        assert_eq!(b.len(), 1);
    }
}
