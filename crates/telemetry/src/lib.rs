// Copyright 2024 tison <wander4096@gmail.com>
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

use logforth::append;
use logforth::filter::env_filter::EnvFilterBuilder;
use logforth::filter::EnvFilter;
use logforth::layout;
use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TelemetryConfig {
    pub log: LogConfig,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        TelemetryConfig {
            log: LogConfig {
                stderr: Some(StderrAppenderConfig {
                    filter: "INFO".to_string(),
                }),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<StderrAppenderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StderrAppenderConfig {
    pub filter: String,
}

pub fn init(config: &TelemetryConfig) {
    let mut builder = logforth::builder();

    // stderr logger
    if let Some(ref stderr) = config.log.stderr {
        let filter = make_rust_log_filter_with_default_env(&stderr.filter);
        builder = builder.dispatch(|d| {
            d.filter(filter)
                .append(append::Stderr::default().with_layout(layout::TextLayout::default()))
        });
    }

    let _ = builder.try_apply();
}

fn make_rust_log_filter(filter: &str) -> EnvFilter {
    let builder = EnvFilterBuilder::new()
        .try_parse(filter)
        .unwrap_or_else(|_| panic!("failed to parse filter: {filter}"));
    EnvFilter::new(builder)
}

fn make_rust_log_filter_with_default_env(filter: &str) -> EnvFilter {
    if let Ok(filter) = std::env::var("RUST_LOG") {
        make_rust_log_filter(&filter)
    } else {
        make_rust_log_filter(filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_enables_info_level_stderr_logging() {
        let config = TelemetryConfig::default();
        let stderr = config.log.stderr.expect("default config logs to stderr");
        assert_eq!(stderr.filter, "INFO");
    }

    #[test]
    fn disabled_stderr_appender_is_a_valid_config() {
        let config = TelemetryConfig {
            log: LogConfig { stderr: None },
        };
        // must not panic: no dispatch is registered when every appender is
        // turned off, which is a legal (if quiet) configuration.
        init(&config);
    }

    #[test]
    fn init_accepts_the_default_config_without_panicking() {
        init(&TelemetryConfig::default());
    }
}
