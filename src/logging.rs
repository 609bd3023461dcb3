// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Logging bridge (spec §10.1 ambient stack): a `log::Log` implementation
//! that writes syslog-formatted lines to stderr, filtered by an
//! `env_filter` directive string. Adapted from the teacher's OTEL log
//! bridge with the OTEL export leg removed — there is no metrics/tracing
//! backend in this crate's scope.

use std::time::SystemTime;

use log::Record;

use crate::config::LoggingConfig;
use crate::syslog_writer;

struct StderrLogger {
    service_name: String,
    host_name: String,
    enabled: bool,
}

impl log::Log for StderrLogger {
    fn enabled(&self, _metadata: &log::Metadata<'_>) -> bool {
        self.enabled
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled {
            return;
        }
        syslog_writer::write_syslog_format(record, &self.service_name, &self.host_name, &SystemTime::now());
    }

    fn flush(&self) {}
}

/// Install the process-wide logger from `config`. Call once at startup;
/// a second call returns `Err` from `log::set_boxed_logger`, same as the
/// underlying `log` crate.
pub fn init_logging(config: &LoggingConfig) -> Result<(), log::SetLoggerError> {
    let host_name = nix::unistd::gethostname()
        .map(|h| h.into_string().unwrap_or_else(|h| h.to_string_lossy().into_owned()))
        .unwrap_or_default();

    let logger = StderrLogger {
        service_name: config.service_name.clone(),
        host_name,
        enabled: config.emit_logs_to_stderr,
    };

    let env_filter = env_filter::Builder::new().parse(&config.level).build();
    let level_filter = env_filter.filter();

    log::set_boxed_logger(Box::new(env_filter::FilteredLog::new(logger, env_filter)))?;
    log::set_max_level(level_filter);
    Ok(())
}
