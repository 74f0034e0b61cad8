// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use crate::LoggingConfig;
use anyhow::Result;

/// Startup settings for a dpu tool, consumed by [`crate::cli_main`].
pub struct Config {
    pub(crate) logging: LoggingConfig,
    pub(crate) log_command_line: bool,
}

impl Config {
    /// Logs as the `DPU_LOG_*` variables ask, and logs the command line.
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(LoggingConfig::from_env()?))
    }

    pub fn new(logging: LoggingConfig) -> Self {
        Self {
            logging,
            log_command_line: true,
        }
    }

    /// Leaves the command line out of the log, for tools whose log output is
    /// compared verbatim.
    pub fn without_command_line(mut self) -> Self {
        self.log_command_line = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn silent() -> LoggingConfig {
        LoggingConfig {
            log_file: None,
            console_logger: None,
        }
    }

    #[test]
    fn logs_command_line_by_default() {
        let config = Config::new(silent());
        assert!(config.log_command_line);
        assert!(config.logging.console_logger.is_none());
    }

    #[test]
    fn command_line_logging_can_be_disabled() {
        assert!(!Config::new(silent()).without_command_line().log_command_line);
    }
}
