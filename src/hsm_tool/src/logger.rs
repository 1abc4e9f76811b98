// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0
use std::time::{Duration, Instant};

use log::{Level, LevelFilter, Log, Metadata, Record};

use crate::config;
use crate::defs;

/// Writes one line per record to stderr:
///
/// [<uptime>] |LEVEL | message
///
/// with the uptime part present only when timestamps are enabled. HSM frames are logged at
/// `Debug` by the session, so they only show up at `Debug` or `Trace`.
pub struct Logger {
    max_level: LevelFilter,
    /// Start of the uptime clock; `None` when timestamps are off.
    started: Option<Instant>,
}

impl Logger {
    pub fn new(log_config: Option<config::Log>) -> Self {
        let (level, timestamps) = match log_config {
            Some(cfg) => (
                Level::from(cfg.level),
                cfg.enable_timestamp.unwrap_or(defs::DEFAULT_LOG_TIMESTAMP),
            ),
            None => (defs::DEFAULT_LOG_LEVEL, defs::DEFAULT_LOG_TIMESTAMP),
        };
        Self {
            max_level: level.to_level_filter(),
            started: if timestamps { Some(Instant::now()) } else { None },
        }
    }

    /// Make this the process-wide `log` backend.
    pub fn install(self) {
        let max_level = self.max_level;
        match log::set_boxed_logger(Box::new(self)) {
            Ok(()) => log::set_max_level(max_level),
            Err(e) => eprintln!("Warning: failed to initialize logger: {:?}", e),
        }
    }

    fn line(&self, record: &Record) -> String {
        let text = format!("|{:6}| {}", record.level(), record.args());
        match self.started {
            Some(started) => format!("[{}] {}", uptime(started.elapsed()), text),
            None => text,
        }
    }
}

/// `HH:MM:SS.mmm`, with hours growing past 24 as needed.
fn uptime(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!(
        "{:02}:{:02}:{:02}.{:03}",
        secs / 3600,
        secs / 60 % 60,
        secs % 60,
        elapsed.subsec_millis()
    )
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("{}", self.line(record));
        }
    }

    fn flush(&self) {}
}
