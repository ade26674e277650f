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
use crate::flintrocks_config::config as flintrocks_app_config;

pub(crate) fn pipeline_task_thread_count() -> usize {
    flintrocks_app_config()
        .ok()
        .map(|c| c.runtime.actual_exec_threads())
        .unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
}

pub(crate) fn pipeline_task_queue_level_count() -> usize {
    flintrocks_app_config()
        .ok()
        .map(|c| c.runtime.pipeline_task_queue_level_count)
        .unwrap_or(6)
}

pub(crate) fn pipeline_task_level_t0_ns() -> u64 {
    flintrocks_app_config()
        .ok()
        .map(|c| c.runtime.pipeline_task_level_t0_ns)
        .unwrap_or(1_000_000_000)
}

pub(crate) fn pipeline_time_slice_ns() -> u64 {
    flintrocks_app_config()
        .ok()
        .map(|c| c.runtime.pipeline_time_slice_ns)
        .unwrap_or(100_000_000)
}

pub(crate) fn blocked_scheduler_poll_interval_ms() -> u64 {
    flintrocks_app_config()
        .ok()
        .map(|c| c.runtime.blocked_scheduler_poll_interval_ms)
        .unwrap_or(10)
}

pub(crate) fn multicast_buffer_watermark_blocks() -> usize {
    flintrocks_app_config()
        .ok()
        .map(|c| c.runtime.multicast_buffer_watermark_blocks)
        .unwrap_or(128)
}

pub(crate) fn task_group_enabled() -> bool {
    flintrocks_app_config()
        .ok()
        .map(|c| c.runtime.task_group_enabled)
        .unwrap_or(false)
}

pub(crate) fn task_group_cpu_share_default() -> u64 {
    flintrocks_app_config()
        .ok()
        .map(|c| c.runtime.task_group_cpu_share_default)
        .unwrap_or(100)
}
