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
//! Pipeline structure metadata.
//!
//! Responsibilities:
//! - Represents one pipeline: an ordered operator factory chain plus the
//!   dependency edges of the fragment DAG.
//! - Tracks child-completion counting used to unblock dependent pipelines.
//!
//! Key exported interfaces:
//! - Types: `Pipeline`.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use super::operator::{Operator, OperatorFactory};
use crate::flintrocks_logging::debug;

/// One pipeline definition: an operator chain (source first, sink last) and
/// its position in the fragment DAG.
///
/// Parent pipelines are held as weak back-references; ownership of all
/// pipelines lives with the enclosing fragment. A pipeline with unfinished
/// child dependencies keeps its tasks in the dependency-blocked state until
/// every child task has reached a terminal state.
pub struct Pipeline {
    id: u32,
    dop: u32,
    op_factories: Mutex<Vec<Arc<dyn OperatorFactory>>>,
    finalized: AtomicBool,
    can_steal: AtomicBool,
    parents: Mutex<Vec<Weak<Pipeline>>>,
    unfinished_dependencies: AtomicUsize,
    active_tasks: AtomicUsize,
    // Core last used by a finished child task; new tasks prefer it.
    previous_core_id: AtomicI64,
}

impl Pipeline {
    pub fn new(id: u32, dop: u32) -> Arc<Self> {
        Arc::new(Self {
            id,
            dop: dop.max(1),
            op_factories: Mutex::new(Vec::new()),
            finalized: AtomicBool::new(false),
            can_steal: AtomicBool::new(true),
            parents: Mutex::new(Vec::new()),
            unfinished_dependencies: AtomicUsize::new(0),
            active_tasks: AtomicUsize::new(0),
            previous_core_id: AtomicI64::new(-1),
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn dop(&self) -> u32 {
        self.dop
    }

    pub fn can_steal(&self) -> bool {
        self.can_steal.load(Ordering::Acquire)
    }

    pub fn set_can_steal(&self, can_steal: bool) {
        self.can_steal.store(can_steal, Ordering::Release);
    }

    /// Build-phase only. Operators are appended source first, sink last.
    pub fn append_operator(&self, factory: Arc<dyn OperatorFactory>) -> Result<(), String> {
        if self.finalized.load(Ordering::Acquire) {
            return Err(format!(
                "pipeline {} is finalized; cannot append operator {}",
                self.id,
                factory.name()
            ));
        }
        let mut guard = self.op_factories.lock().expect("pipeline factories lock");
        guard.push(factory);
        Ok(())
    }

    /// Locks the chain and verifies the source/sink endpoints.
    pub fn finalize(&self) -> Result<(), String> {
        let guard = self.op_factories.lock().expect("pipeline factories lock");
        if guard.is_empty() {
            return Err(format!("pipeline {} has no operators", self.id));
        }
        let first = guard.first().expect("non-empty");
        if !first.is_source() {
            return Err(format!(
                "pipeline {} source must be the first operator, got {}",
                self.id,
                first.name()
            ));
        }
        let last = guard.last().expect("non-empty");
        if !last.is_sink() {
            return Err(format!(
                "pipeline {} sink must be the last operator, got {}",
                self.id,
                last.name()
            ));
        }
        for factory in guard.iter().take(guard.len() - 1).skip(1) {
            if factory.is_source() || factory.is_sink() {
                return Err(format!(
                    "pipeline {} has endpoint operator {} in interior position",
                    self.id,
                    factory.name()
                ));
            }
        }
        self.finalized.store(true, Ordering::Release);
        Ok(())
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::Acquire)
    }

    /// Declares that `self` must not start until `child` has completed.
    pub fn add_dependency(self: &Arc<Self>, child: &Arc<Pipeline>) {
        {
            let mut parents = child.parents.lock().expect("pipeline parents lock");
            parents.push(Arc::downgrade(self));
        }
        self.unfinished_dependencies.fetch_add(1, Ordering::AcqRel);
    }

    pub fn has_unfinished_dependency(&self) -> bool {
        self.unfinished_dependencies.load(Ordering::Acquire) > 0
    }

    /// One child reported completion; remembers the core it ran on as a
    /// placement hint for this pipeline's tasks.
    pub fn finish_one_dependency(&self, core_hint: i64) {
        if core_hint >= 0 {
            self.previous_core_id.store(core_hint, Ordering::Release);
        }
        let prev = self.unfinished_dependencies.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "finish_one_dependency underflow");
        if prev == 1 {
            debug!("Pipeline dependencies satisfied: pipeline_id={}", self.id);
        }
    }

    pub fn previous_core_id(&self) -> i64 {
        self.previous_core_id.load(Ordering::Acquire)
    }

    /// Instantiates one operator chain for the task at `index`.
    pub(crate) fn make_operators(&self, index: u32) -> Result<Vec<Box<dyn Operator>>, String> {
        if !self.is_finalized() {
            return Err(format!(
                "pipeline {} must be finalized before instantiating tasks",
                self.id
            ));
        }
        let guard = self.op_factories.lock().expect("pipeline factories lock");
        let mut operators = Vec::with_capacity(guard.len());
        for factory in guard.iter() {
            operators.push(factory.create(self.dop, index));
        }
        Ok(operators)
    }

    pub(crate) fn task_started(&self) {
        self.active_tasks.fetch_add(1, Ordering::AcqRel);
    }

    /// A task of this pipeline reached a terminal state. When the last one
    /// does, every parent sheds one child dependency.
    pub(crate) fn task_finished(&self, core_hint: i64) {
        let prev = self.active_tasks.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "task_finished underflow");
        if prev != 1 {
            return;
        }
        let parents = {
            let guard = self.parents.lock().expect("pipeline parents lock");
            guard.clone()
        };
        for parent in parents {
            if let Some(parent) = parent.upgrade() {
                parent.finish_one_dependency(core_hint);
            }
        }
    }

}
