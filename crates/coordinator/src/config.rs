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

use serde::Deserialize;
use serde::Serialize;

/// The offsets-topic name used when the naming service has no better answer
/// (deployments may configure a different name; the core otherwise treats
/// this purely as a constant label it passes on to the storage layer).
pub const OFFSETS_TOPIC: &str = "__consumer_offsets";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoordinatorConfig {
    /// Fallback partition count used when the naming service reports the
    /// offsets topic does not exist yet.
    pub offsets_topic_num_partitions: i32,
    /// Codec identifier passed verbatim to the append-batch builder.
    pub offsets_topic_compression_codec: String,
    pub offset_commit_timeout_ms: i64,
    pub offset_commit_required_acks: i16,
    pub load_buffer_size: usize,
    /// Retention for v0-compatibility and for sentinel-valued v1 records.
    pub offsets_retention_ms: i64,
    pub offsets_retention_check_interval_ms: i64,
    pub max_metadata_size: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        CoordinatorConfig {
            offsets_topic_num_partitions: 50,
            offsets_topic_compression_codec: "none".to_string(),
            offset_commit_timeout_ms: 5_000,
            offset_commit_required_acks: -1,
            load_buffer_size: 5 * 1024 * 1024,
            offsets_retention_ms: 7 * 24 * 60 * 60 * 1000,
            offsets_retention_check_interval_ms: 10 * 60 * 1000,
            max_metadata_size: 4_096,
        }
    }
}
