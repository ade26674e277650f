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
use std::fmt;
use std::sync::OnceLock;

use chrono::Local;
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, fmt as tracing_fmt};

use crate::flintrocks_config;

static INIT: OnceLock<()> = OnceLock::new();

/// Scheduler log line: glog-style level and timestamp followed by the
/// emitting thread's name. The scheduler names every thread it spawns
/// (`pip_task_worker_N`, `blocked_task_scheduler`, `pip_task_promoter`),
/// which keeps interleaved worker/poller output attributable.
struct TaskLogFormatter;

impl<S, N> FormatEvent<S, N> for TaskLogFormatter
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &tracing_fmt::FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();

        // Level (single character like glog)
        let level_char = match *metadata.level() {
            tracing::Level::ERROR => 'E',
            tracing::Level::WARN => 'W',
            tracing::Level::INFO => 'I',
            tracing::Level::DEBUG => 'D',
            tracing::Level::TRACE => 'T',
        };

        let timestamp = Local::now().format("%Y%m%d %H:%M:%S%.6f");
        let file = metadata.file().unwrap_or("unknown");
        let line = metadata.line().unwrap_or(0);

        // Lyyyymmdd hh:mm:ss.uuuuuu thread file:line] message
        let current = std::thread::current();
        match current.name() {
            Some(name) => write!(writer, "{level_char}{timestamp} {name} {file}:{line}] ")?,
            None => write!(
                writer,
                "{level_char}{timestamp} {:?} {file}:{line}] ",
                current.id()
            )?,
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

/// Installs the subscriber once; later calls are no-ops. `level` is a full
/// tracing `EnvFilter` expression (e.g. "flintrocks=debug").
pub fn init_with_level(level: &str) {
    INIT.get_or_init(|| {
        let env_filter = EnvFilter::new(level);
        // Output goes to log files or test harnesses; never emit ANSI codes.
        let _ = tracing_fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .event_format(TaskLogFormatter)
            .try_init();
    });
}

/// Initializes from the process config: `log_filter` takes precedence over
/// `log_level`, falling back to "info" when no config is present.
pub fn init_from_config() {
    let filter = flintrocks_config::config()
        .ok()
        .map(|c| c.log_filter.clone().unwrap_or_else(|| c.log_level.clone()))
        .unwrap_or_else(|| "info".to_string());
    init_with_level(&filter);
}

pub use tracing::{debug, error, info, trace, warn};
