// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use super::config::LogConfig;
use super::{AppError, AppResult};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Console-only subscriber for tests and local runs, filtered by `RUST_LOG`.
///
/// Safe to call more than once; later calls keep the first subscriber.
pub fn setup_local_tracing() -> AppResult<()> {
    let timer = ChronoLocal::new(TIME_FORMAT.to_string());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_timer(timer)
        .with_target(true)
        .with_thread_names(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_test_writer();
    let _ = tracing_subscriber::registry()
        .with(fmt_layer)
        .with(EnvFilter::from_default_env())
        .try_init();
    Ok(())
}

/// Subscriber for the binary: stdout plus an optional hourly rolling file.
///
/// `RUST_LOG` wins over `log.filter`. Keep the returned guard alive for as
/// long as the process logs, dropping it flushes the file writer.
pub fn setup_tracing(log_config: &LogConfig) -> AppResult<Option<WorkerGuard>> {
    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.is_empty() => EnvFilter::new(directives),
        _ => EnvFilter::try_new(&log_config.filter).map_err(|e| {
            AppError::InvalidValue(format!("log filter '{}': {}", log_config.filter, e))
        })?,
    };
    let timer = ChronoLocal::new(TIME_FORMAT.to_string());

    match &log_config.dir {
        Some(dir) => {
            let file_appender = tracing_appender::rolling::hourly(dir, &log_config.file_prefix);
            let (non_blocking, worker_guard) = tracing_appender::non_blocking(file_appender);
            let writer = non_blocking.and(std::io::stdout);
            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_timer(timer)
                .with_target(true)
                .with_thread_names(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_ansi(false)
                .with_writer(writer);
            tracing_subscriber::registry()
                .with(fmt_layer)
                .with(filter)
                .try_init()
                .map_err(|e| AppError::IllegalStateError(format!("tracing init: {e}")))?;
            Ok(Some(worker_guard))
        }
        None => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_timer(timer)
                .with_target(true)
                .with_thread_names(true)
                .with_thread_ids(true)
                .with_line_number(true)
                .with_ansi(true);
            tracing_subscriber::registry()
                .with(fmt_layer)
                .with(filter)
                .try_init()
                .map_err(|e| AppError::IllegalStateError(format!("tracing init: {e}")))?;
            Ok(None)
        }
    }
}
