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

//! Interfaces to the external collaborators this core consults but does not
//! implement: the replication/append engine and the naming service.

use std::sync::Arc;

/// A single decoded record read back from an offsets-topic partition.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub offset: i64,
    pub key: Vec<u8>,
    /// `None` marks a tombstone.
    pub value: Option<Vec<u8>>,
}

impl LogRecord {
    pub fn next_offset(&self) -> i64 {
        self.offset + 1
    }
}

/// A read-only view onto one local replica of an offsets-topic partition.
pub trait PartitionLog: Send + Sync {
    fn base_offset(&self) -> i64;

    /// Largest fully-replicated offset, or `-1` if this node is not the
    /// local leader for the partition.
    fn high_watermark(&self) -> i64;

    /// Reads records starting at `offset`, up to approximately `max_bytes`.
    fn read(&self, offset: i64, max_bytes: usize) -> Vec<LogRecord>;
}

/// One partition's worth of records to append in a single batch.
#[derive(Debug, Clone)]
pub struct AppendBatch {
    pub partition: i32,
    /// `(key, value)` pairs; a `None` value is a tombstone.
    pub records: Vec<(Vec<u8>, Option<Vec<u8>>)>,
}

#[derive(Debug)]
pub struct AppendRequest {
    pub timeout_ms: i64,
    pub required_acks: i16,
    pub internal_topic_allowed: bool,
    pub batches: Vec<AppendBatch>,
}

/// Storage-layer error kinds the append path can report, abstracted away
/// from any particular wire protocol's numeric codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    None,
    UnknownTopicOrPartition,
    NotLeaderForPartition,
    MessageSizeTooLarge,
    MessageSetSizeTooLarge,
    InvalidFetchSize,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionAppendResult {
    pub partition: i32,
    pub error: StorageError,
}

/// The replication/append engine, consumed but not implemented by this
/// core (the real coordinator calls this collaborator `ReplicaManager`).
pub trait AppendLog: Send + Sync + 'static {
    /// Resolves the local replica for `(OFFSETS_TOPIC, partition)`, or
    /// `None` if no such log exists on this node.
    fn get_log(&self, partition: i32) -> Option<Arc<dyn PartitionLog>>;

    /// Submits a non-blocking append. `on_complete` is invoked once per
    /// call, from any thread, with one result per batch in the request, in
    /// the same order the batches were submitted.
    fn append_messages(
        &self,
        request: AppendRequest,
        on_complete: Box<dyn FnOnce(Vec<PartitionAppendResult>) + Send>,
    );
}

/// Cluster/topic discovery, consumed but not implemented by this core.
pub trait PartitionAssignment: Send + Sync + 'static {
    /// Returns the current partition count for `topic`, or `None` if the
    /// topic does not exist yet.
    fn partition_count(&self, topic: &str) -> Option<i32>;
}
