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

//! Periodic scan -> tombstone append -> cache eviction, run under the
//! offset-expire write lock to exclude the load pipeline.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::cache::MetadataCache;
use crate::codec::encode_offset_key;
use crate::collaborators::AppendBatch;
use crate::collaborators::AppendLog;
use crate::collaborators::AppendRequest;
use crate::collaborators::StorageError;
use crate::lock_order;
use crate::partitioning::partition_for;

/// Runs one sweep cycle and returns the number of offsets found expired.
/// Cache eviction happens unconditionally once an offset is snapshotted as
/// expired; the tombstone append to the log is fire-and-forget, and
/// per-partition failures are only logged -- a lost tombstone is re-emitted
/// by the next cycle, or by whichever node next becomes leader for that
/// partition and replays its own sweep.
pub fn run_once(
    cache: &MetadataCache,
    expire_lock: &RwLock<()>,
    appender: &dyn AppendLog,
    num_partitions: i32,
    now_ms: i64,
) -> usize {
    let _ticket = lock_order::acquire(lock_order::EXPIRE);
    let _guard = expire_lock.write();

    let expired = cache.snapshot_expired(now_ms);
    for (key, _) in &expired {
        cache.remove_offset(key);
    }

    let mut by_partition: BTreeMap<i32, Vec<Vec<u8>>> = BTreeMap::new();
    for (key, _) in &expired {
        by_partition
            .entry(partition_for(&key.group, num_partitions))
            .or_default()
            .push(encode_offset_key(key));
    }

    for (partition, keys) in by_partition {
        let count = keys.len();
        let records = keys.into_iter().map(|k| (k, None)).collect();
        let request = AppendRequest {
            timeout_ms: 0,
            required_acks: 0,
            internal_topic_allowed: true,
            batches: vec![AppendBatch { partition, records }],
        };
        appender.append_messages(
            request,
            Box::new(move |results| {
                for result in results {
                    if result.error != StorageError::None {
                        log::warn!(
                            "failed to append {count} offset tombstones for partition {}: {:?}; \
                             will retry next sweep",
                            result.partition,
                            result.error
                        );
                    }
                }
            }),
        );
    }

    expired.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::OffsetKey;
    use crate::codec::OffsetValue;
    use crate::test_support::FakeAppendLog;

    #[test]
    fn sweep_evicts_and_tombstones_expired_offsets() {
        let cache = MetadataCache::new();
        cache.put_offset(
            OffsetKey {
                group: "g1".to_string(),
                topic: "t".to_string(),
                partition: 0,
            },
            OffsetValue {
                offset: 1,
                metadata: String::new(),
                commit_timestamp: 0,
                expire_timestamp: 1_000,
            },
        );
        cache.put_offset(
            OffsetKey {
                group: "g2".to_string(),
                topic: "t".to_string(),
                partition: 0,
            },
            OffsetValue {
                offset: 1,
                metadata: String::new(),
                commit_timestamp: 0,
                expire_timestamp: i64::MAX,
            },
        );

        let expire_lock = RwLock::new(());
        let appender = FakeAppendLog::new();
        let removed = run_once(&cache, &expire_lock, &appender, 4, 2_000);

        assert_eq!(removed, 1);
        assert_eq!(cache.metrics().num_offsets(), 1);
        assert!(cache
            .get_offset(&OffsetKey {
                group: "g2".to_string(),
                topic: "t".to_string(),
                partition: 0,
            })
            .is_some());
    }

    #[test]
    fn sweep_never_leaves_an_expired_offset_cached() {
        let cache = MetadataCache::new();
        for i in 0..20 {
            cache.put_offset(
                OffsetKey {
                    group: format!("g{i}"),
                    topic: "t".to_string(),
                    partition: 0,
                },
                OffsetValue {
                    offset: i as i64,
                    metadata: String::new(),
                    commit_timestamp: 0,
                    expire_timestamp: if i % 2 == 0 { 500 } else { i64::MAX },
                },
            );
        }

        let expire_lock = RwLock::new(());
        let appender = FakeAppendLog::new();
        run_once(&cache, &expire_lock, &appender, 4, 1_000);

        for i in 0..20 {
            if i % 2 == 0 {
                continue;
            }
            assert!(cache
                .get_offset(&OffsetKey {
                    group: format!("g{i}"),
                    topic: "t".to_string(),
                    partition: 0,
                })
                .is_some());
        }
    }

    #[test]
    fn append_failure_is_logged_and_swallowed() {
        let cache = MetadataCache::new();
        let key = OffsetKey {
            group: "g1".to_string(),
            topic: "t".to_string(),
            partition: 0,
        };
        cache.put_offset(
            key.clone(),
            OffsetValue {
                offset: 1,
                metadata: String::new(),
                commit_timestamp: 0,
                expire_timestamp: 0,
            },
        );

        let expire_lock = RwLock::new(());
        let appender = FakeAppendLog::new();
        appender.force_error(partition_for(&key.group, 4), StorageError::NotLeaderForPartition);

        let removed = run_once(&cache, &expire_lock, &appender, 4, 1_000);
        // cache eviction is optimistic and independent of append success
        assert_eq!(removed, 1);
        assert!(cache.get_offset(&key).is_none());
    }
}
