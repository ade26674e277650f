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
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

static NEXT_TASK_GROUP_ID: AtomicUsize = AtomicUsize::new(1);

/// Workload class used for proportional CPU accounting. Tasks attached to a
/// group charge their execution slices here; the task queue prefers the group
/// with the smallest share-normalized consumption.
#[derive(Debug)]
pub struct TaskGroup {
    id: usize,
    name: String,
    cpu_share: u64,
    consumed_ns: AtomicU64,
}

impl TaskGroup {
    pub fn new(name: impl Into<String>, cpu_share: u64) -> Self {
        Self {
            id: NEXT_TASK_GROUP_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            cpu_share: cpu_share.max(1),
            consumed_ns: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cpu_share(&self) -> u64 {
        self.cpu_share
    }

    pub fn add_runtime_ns(&self, delta: u64) {
        self.consumed_ns.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn consumed_ns(&self) -> u64 {
        self.consumed_ns.load(Ordering::Relaxed)
    }

    /// Consumed nanoseconds normalized by the CPU share weight. Smaller means
    /// the group is behind its entitlement and should be scheduled next.
    pub fn normalized_consumption(&self) -> u64 {
        self.consumed_ns() / self.cpu_share
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_consumption_weighs_by_share() {
        let light = TaskGroup::new("etl", 100);
        let heavy = TaskGroup::new("adhoc", 400);
        light.add_runtime_ns(1_000_000);
        heavy.add_runtime_ns(1_000_000);
        assert!(heavy.normalized_consumption() < light.normalized_consumption());
    }

    #[test]
    fn zero_share_is_clamped() {
        let group = TaskGroup::new("bad", 0);
        assert_eq!(group.cpu_share(), 1);
        group.add_runtime_ns(5);
        assert_eq!(group.normalized_consumption(), 5);
    }
}
