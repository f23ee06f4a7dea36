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

//! Small in-crate test doubles for the storage/append collaborator, in the
//! spirit of the runtime crate's own colocated fakes rather than a separate
//! mocking dependency.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

use crate::collaborators::AppendLog;
use crate::collaborators::AppendRequest;
use crate::collaborators::LogRecord;
use crate::collaborators::PartitionAppendResult;
use crate::collaborators::PartitionAssignment;
use crate::collaborators::PartitionLog;
use crate::collaborators::StorageError;

#[derive(Default)]
struct PartitionState {
    records: Vec<LogRecord>,
    high_watermark: i64,
    force_error: Option<StorageError>,
}

/// A synchronous, in-memory stand-in for the replication/append engine.
/// Completion callbacks run inline rather than on a separate thread --
/// correctness here depends on ordering and error translation, not actual
/// concurrency, so keeping it synchronous keeps tests deterministic.
#[derive(Default)]
pub struct FakeAppendLog {
    partitions: Mutex<BTreeMap<i32, PartitionState>>,
}

impl FakeAppendLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one pre-existing record to `partition`'s log, as if it had
    /// been written before the test started, and advances the high
    /// watermark past it.
    pub fn seed(&self, partition: i32, key: Vec<u8>, value: Option<Vec<u8>>) {
        let mut partitions = self.partitions.lock().unwrap();
        let state = partitions.entry(partition).or_default();
        let offset = state.records.len() as i64;
        state.records.push(LogRecord { offset, key, value });
        state.high_watermark = state.records.len() as i64;
    }

    /// Makes every future append to `partition` fail with `error`.
    pub fn force_error(&self, partition: i32, error: StorageError) {
        self.partitions
            .lock()
            .unwrap()
            .entry(partition)
            .or_default()
            .force_error = Some(error);
    }
}

struct FakePartitionLog {
    records: Vec<LogRecord>,
    high_watermark: i64,
}

impl PartitionLog for FakePartitionLog {
    fn base_offset(&self) -> i64 {
        0
    }

    fn high_watermark(&self) -> i64 {
        self.high_watermark
    }

    fn read(&self, offset: i64, _max_bytes: usize) -> Vec<LogRecord> {
        self.records
            .iter()
            .filter(|r| r.offset >= offset)
            .cloned()
            .collect()
    }
}

impl AppendLog for FakeAppendLog {
    fn get_log(&self, partition: i32) -> Option<Arc<dyn PartitionLog>> {
        let partitions = self.partitions.lock().unwrap();
        let state = partitions.get(&partition)?;
        Some(Arc::new(FakePartitionLog {
            records: state.records.clone(),
            high_watermark: state.high_watermark,
        }))
    }

    fn append_messages(
        &self,
        request: AppendRequest,
        on_complete: Box<dyn FnOnce(Vec<PartitionAppendResult>) + Send>,
    ) {
        let mut results = Vec::new();
        {
            let mut partitions = self.partitions.lock().unwrap();
            for batch in &request.batches {
                let state = partitions.entry(batch.partition).or_default();
                if let Some(error) = state.force_error {
                    results.push(PartitionAppendResult {
                        partition: batch.partition,
                        error,
                    });
                    continue;
                }
                for (key, value) in &batch.records {
                    let offset = state.records.len() as i64;
                    state.records.push(LogRecord {
                        offset,
                        key: key.clone(),
                        value: value.clone(),
                    });
                }
                state.high_watermark = state.records.len() as i64;
                results.push(PartitionAppendResult {
                    partition: batch.partition,
                    error: StorageError::None,
                });
            }
        }
        on_complete(results);
    }
}

/// A naming service fake with a fixed answer (or none, to exercise the
/// config fallback).
pub struct FixedPartitionAssignment(pub Option<i32>);

impl PartitionAssignment for FixedPartitionAssignment {
    fn partition_count(&self, _topic: &str) -> Option<i32> {
        self.0
    }
}
