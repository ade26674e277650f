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
//! Core operator contract and end-of-stream signaling.
//!
//! Responsibilities:
//! - Defines the push/pull verbs every physical operator honors and the
//!   readiness predicates the scheduler uses to classify blocked tasks.
//! - Defines operator factories from which pipelines instantiate per-task
//!   operator chains.
//!
//! Key exported interfaces:
//! - Types: `SourceState`, `Operator`, `OperatorFactory`.

use crate::exec::block::Block;
use crate::runtime::profile::RuntimeProfile;
use crate::runtime::runtime_state::RuntimeState;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Source signal returned alongside every produced block.
pub enum SourceState {
    /// More input expected, keep polling.
    DependOnSource,
    /// An immediate follow-up block is available.
    MoreData,
    /// Definitive end-of-stream; no more blocks ever.
    Finished,
}

impl SourceState {
    pub fn name(&self) -> &'static str {
        match self {
            SourceState::DependOnSource => "DEPEND_ON_SOURCE",
            SourceState::MoreData => "MORE_DATA",
            SourceState::Finished => "FINISHED",
        }
    }
}

/// Contract implemented by every physical operator in a pipeline.
///
/// Source operators implement `get_block`/`can_read`; sink operators
/// implement `sink`/`can_write`; interior operators implement both. The
/// default bodies of the data verbs reject the call so a miswired pipeline
/// surfaces as an explicit runtime error rather than silent fallback.
///
/// Lifecycle invariants: `prepare` precedes `open`; `open` precedes any
/// `get_block`/`sink`; `try_close` is idempotent; after `close` no other
/// method is called. `can_read`/`can_write` must be pure, side-effect-free,
/// and cheap. `get_block` must return promptly: when no block can be
/// produced without blocking it returns Ok with a zero-row block and leaves
/// `can_read` false until upstream makes progress.
pub trait Operator: Send {
    fn name(&self) -> &str;

    fn set_profile(&mut self, profile: RuntimeProfile) {
        let _ = profile;
    }

    fn prepare(&mut self, state: &RuntimeState) -> Result<(), String> {
        let _ = state;
        Ok(())
    }

    fn open(&mut self, state: &RuntimeState) -> Result<(), String> {
        let _ = state;
        Ok(())
    }

    fn can_read(&self) -> bool {
        false
    }

    fn get_block(&mut self, state: &RuntimeState, block: &mut Block) -> Result<SourceState, String> {
        let _ = (state, block);
        Err(format!("operator {} does not produce blocks", self.name()))
    }

    fn can_write(&self) -> bool {
        false
    }

    fn sink(
        &mut self,
        state: &RuntimeState,
        block: &mut Block,
        source_state: SourceState,
    ) -> Result<(), String> {
        let _ = (state, block, source_state);
        Err(format!("operator {} does not accept blocks", self.name()))
    }

    /// True while asynchronous resource release is still outstanding after
    /// `try_close`.
    fn is_pending_finish(&self) -> bool {
        false
    }

    /// Initiates teardown; may leave the operator in pending-finish.
    /// Must be idempotent.
    fn try_close(&mut self, state: &RuntimeState) -> Result<(), String> {
        let _ = state;
        Ok(())
    }

    fn close(&mut self, state: &RuntimeState) -> Result<(), String> {
        let _ = state;
        Ok(())
    }

    /// Sources report readiness of the runtime filters they wait for; a
    /// per-source timeout resolves to ready. Sinks and interiors return true.
    fn runtime_filters_are_ready_or_timeout(&self) -> bool {
        true
    }
}

/// Factory from which a pipeline instantiates one operator per task.
pub trait OperatorFactory: Send + Sync {
    fn name(&self) -> &str;

    fn is_source(&self) -> bool {
        false
    }

    fn is_sink(&self) -> bool {
        false
    }

    fn create(&self, dop: u32, index: u32) -> Box<dyn Operator>;
}
