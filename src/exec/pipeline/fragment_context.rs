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
//! Fragment-level pipeline runtime context.
//!
//! Responsibilities:
//! - Holds shared state required by all tasks of one fragment execution:
//!   cancellation flag, first-error status, task-group handle, completion
//!   counting.
//!
//! Key exported interfaces:
//! - Types: `FragmentContext`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::exec::pipeline::pipeline_task::PipelineTask;
use crate::flintrocks_logging::debug;
use crate::runtime::profile::RuntimeProfile;
use crate::runtime::runtime_state::RuntimeState;
use crate::runtime::task_group::TaskGroup;

/// Fragment-scoped runtime context shared across tasks and operator
/// instances. Cancellation is a single atomic flag checked before every
/// other scheduling predicate; the first observed error status wins.
pub struct FragmentContext {
    fragment_id: u32,
    runtime_state: Arc<RuntimeState>,
    task_group: Option<Arc<TaskGroup>>,
    profile: RuntimeProfile,
    cancelled: AtomicBool,
    final_error: Mutex<Option<String>>,
    remaining_tasks: Mutex<usize>,
    completion_cv: Condvar,
}

impl FragmentContext {
    pub fn new(
        fragment_id: u32,
        runtime_state: Arc<RuntimeState>,
        task_group: Option<Arc<TaskGroup>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            fragment_id,
            runtime_state,
            task_group,
            profile: RuntimeProfile::new(format!("Fragment (id={fragment_id})")),
            cancelled: AtomicBool::new(false),
            final_error: Mutex::new(None),
            remaining_tasks: Mutex::new(0),
            completion_cv: Condvar::new(),
        })
    }

    pub fn fragment_id(&self) -> u32 {
        self.fragment_id
    }

    pub fn runtime_state(&self) -> &Arc<RuntimeState> {
        &self.runtime_state
    }

    pub fn task_group(&self) -> Option<&Arc<TaskGroup>> {
        self.task_group.as_ref()
    }

    pub fn profile(&self) -> &RuntimeProfile {
        &self.profile
    }

    pub fn is_canceled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Cancels the fragment with the given status. The first caller wins;
    /// later statuses are dropped. Returns whether this call set the status.
    pub fn cancel(&self, status: String) -> bool {
        let first = {
            let mut guard = self.final_error.lock().expect("fragment final error lock");
            if guard.is_some() {
                false
            } else {
                *guard = Some(status.clone());
                true
            }
        };
        self.cancelled.store(true, Ordering::Release);
        if first {
            self.runtime_state.error_state().set_error(status.clone());
            debug!(
                "Fragment canceled: fragment_id={} status={}",
                self.fragment_id, status
            );
        }
        first
    }

    pub fn cancel_reason(&self) -> Option<String> {
        self.final_error
            .lock()
            .expect("fragment final error lock")
            .clone()
    }

    pub fn final_status(&self) -> Result<(), String> {
        match self.cancel_reason() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub(crate) fn register_tasks(&self, count: usize) {
        let mut guard = self.remaining_tasks.lock().expect("fragment completion lock");
        *guard += count;
    }

    /// A task reached a terminal state and was closed; its counters are
    /// final. The last completion wakes any `wait` callers.
    pub fn report_completion(&self, task: &PipelineTask) {
        debug!(
            "Pipeline task completed: fragment_id={} pipeline_id={} index={} state={}",
            self.fragment_id,
            task.pipeline().id(),
            task.index(),
            task.state().name()
        );
        let mut guard = self.remaining_tasks.lock().expect("fragment completion lock");
        if *guard == 0 {
            return;
        }
        *guard -= 1;
        if *guard == 0 {
            self.completion_cv.notify_all();
        }
    }

    /// Blocks until every registered task has completed, then returns the
    /// aggregated fragment status.
    pub fn wait(&self) -> Result<(), String> {
        let mut guard = self.remaining_tasks.lock().expect("fragment completion lock");
        while *guard > 0 {
            guard = self
                .completion_cv
                .wait(guard)
                .unwrap_or_else(|e| e.into_inner());
        }
        drop(guard);
        self.final_status()
    }

    /// Like `wait` but bounded; returns false on timeout.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut guard = self.remaining_tasks.lock().expect("fragment completion lock");
        while *guard > 0 {
            let now = std::time::Instant::now();
            if now >= deadline {
                return false;
            }
            let (g, _res) = self
                .completion_cv
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            guard = g;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_idempotent_and_first_status_wins() {
        let ctx = FragmentContext::new(0, Arc::new(RuntimeState::default()), None);
        assert!(!ctx.is_canceled());
        assert!(ctx.cancel("first".to_string()));
        assert!(!ctx.cancel("second".to_string()));
        assert!(ctx.is_canceled());
        assert_eq!(ctx.final_status(), Err("first".to_string()));
        assert_eq!(ctx.runtime_state().error(), Some("first".to_string()));
    }

    #[test]
    fn wait_returns_immediately_with_no_tasks() {
        let ctx = FragmentContext::new(0, Arc::new(RuntimeState::default()), None);
        assert_eq!(ctx.wait(), Ok(()));
        assert!(ctx.wait_for(Duration::from_millis(1)));
    }
}
