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
use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static CONFIG: OnceLock<FlintrocksConfig> = OnceLock::new();

fn default_log_level() -> String {
    "info".to_string()
}

pub fn init_from_path(path: impl AsRef<Path>) -> Result<&'static FlintrocksConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let path = path.as_ref().to_path_buf();
    let cfg = FlintrocksConfig::load_from_file(&path)?;
    let _ = CONFIG.set(cfg);
    Ok(CONFIG.get().expect("CONFIG set"))
}

pub fn init_from_env_or_default() -> Result<&'static FlintrocksConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let path = config_path_from_env_or_default()?;
    let cfg = FlintrocksConfig::load_from_file(&path)?;
    let _ = CONFIG.set(cfg);
    Ok(CONFIG.get().expect("CONFIG set"))
}

pub fn config() -> Result<&'static FlintrocksConfig> {
    init_from_env_or_default()
}

fn config_path_from_env_or_default() -> Result<PathBuf> {
    if let Ok(p) = std::env::var("FLINTROCKS_CONFIG") {
        if !p.trim().is_empty() {
            return Ok(PathBuf::from(p));
        }
    }

    let candidates = [PathBuf::from("flintrocks.toml")];
    for p in candidates {
        if p.exists() {
            return Ok(p);
        }
    }

    Err(anyhow!(
        "missing config file: set $FLINTROCKS_CONFIG or create ./flintrocks.toml"
    ))
}

#[derive(Clone, Deserialize)]
pub struct FlintrocksConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional full tracing EnvFilter expression.
    /// If set, this takes precedence over `log_level`.
    /// Example: "flintrocks=debug"
    #[serde(default)]
    pub log_filter: Option<String>,

    #[serde(default)]
    pub runtime: RuntimeConfig,
}

impl FlintrocksConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read config file: {}", path.display()))?;
        let cfg: FlintrocksConfig =
            toml::from_str(&s).with_context(|| format!("parse toml: {}", path.display()))?;
        Ok(cfg)
    }
}

impl Default for FlintrocksConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_filter: None,
            runtime: RuntimeConfig::default(),
        }
    }
}

#[derive(Clone, Deserialize)]
pub struct RuntimeConfig {
    /// Pipeline execution worker count. 0 means "use the core count".
    #[serde(default)]
    pub pipeline_task_thread_count: usize,

    #[serde(default = "default_queue_level_count")]
    pub pipeline_task_queue_level_count: usize,

    /// Base runtime band of the lowest queue level, in nanoseconds.
    #[serde(default = "default_level_t0_ns")]
    pub pipeline_task_level_t0_ns: u64,

    #[serde(default = "default_time_slice_ns")]
    pub pipeline_time_slice_ns: u64,

    #[serde(default = "default_blocked_poll_interval_ms")]
    pub blocked_scheduler_poll_interval_ms: u64,

    #[serde(default = "default_multicast_watermark")]
    pub multicast_buffer_watermark_blocks: usize,

    #[serde(default)]
    pub task_group_enabled: bool,

    #[serde(default = "default_task_group_cpu_share")]
    pub task_group_cpu_share_default: u64,
}

fn default_queue_level_count() -> usize {
    6
}
fn default_level_t0_ns() -> u64 {
    1_000_000_000
}
fn default_time_slice_ns() -> u64 {
    100_000_000
}
fn default_blocked_poll_interval_ms() -> u64 {
    10
}
fn default_multicast_watermark() -> usize {
    128
}
fn default_task_group_cpu_share() -> u64 {
    100
}

impl RuntimeConfig {
    pub fn actual_exec_threads(&self) -> usize {
        if self.pipeline_task_thread_count > 0 {
            return self.pipeline_task_thread_count;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            pipeline_task_thread_count: 0,
            pipeline_task_queue_level_count: default_queue_level_count(),
            pipeline_task_level_t0_ns: default_level_t0_ns(),
            pipeline_time_slice_ns: default_time_slice_ns(),
            blocked_scheduler_poll_interval_ms: default_blocked_poll_interval_ms(),
            multicast_buffer_watermark_blocks: default_multicast_watermark(),
            task_group_enabled: false,
            task_group_cpu_share_default: default_task_group_cpu_share(),
        }
    }
}
