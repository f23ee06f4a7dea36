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

//! Two-phase store pipeline: prepare an append batch, then hand it to the
//! external appender together with a completion callback that updates the
//! cache.

use std::collections::BTreeMap;

use crate::cache::MetadataCache;
use crate::codec::encode_group_key;
use crate::codec::encode_group_value;
use crate::codec::encode_offset_key;
use crate::codec::encode_offset_value;
use crate::codec::GroupKey;
use crate::codec::GroupValueRecord;
use crate::codec::OffsetKey;
use crate::codec::OffsetValue;
use crate::collaborators::AppendBatch;
use crate::collaborators::PartitionAppendResult;
use crate::error::CoordinatorErrorCode;
use crate::partitioning::partition_for;

/// Carries the decisions made at prepare time (what was filtered, what was
/// kept, and for which partition) through to the completion callback,
/// without re-deriving them from the append result.
pub struct OffsetCommitPlan {
    pub partition: i32,
    pub kept: Vec<(OffsetKey, OffsetValue)>,
    pub too_large: Vec<OffsetKey>,
}

/// `prepareStoreOffsets`: filters oversize metadata, builds the append
/// batch targeting `partition_for(group_id)`. The `consumer_id`/
/// `generation_id` parameters mirror the real commit request shape; this
/// core has no use for them beyond the interface boundary (liveness and
/// generation fencing are the membership subsystem's concern).
pub fn prepare_store_offsets(
    group_id: &str,
    _consumer_id: &str,
    _generation_id: i32,
    offsets: Vec<(OffsetKey, OffsetValue)>,
    num_partitions: i32,
    max_metadata_size: usize,
) -> (OffsetCommitPlan, AppendBatch) {
    let mut kept = Vec::new();
    let mut too_large = Vec::new();
    for (key, value) in offsets {
        if value.metadata.len() > max_metadata_size {
            too_large.push(key);
        } else {
            kept.push((key, value));
        }
    }

    let partition = partition_for(group_id, num_partitions);
    let records = kept
        .iter()
        .map(|(k, v)| (encode_offset_key(k), Some(encode_offset_value(v))))
        .collect();

    (
        OffsetCommitPlan {
            partition,
            kept,
            too_large,
        },
        AppendBatch { partition, records },
    )
}

/// Applies a single-partition append result to the plan built by
/// [`prepare_store_offsets`]: on success, inserts every kept offset into the
/// cache; either way, returns a per-offset status covering both the kept
/// and the filtered-out offsets.
pub fn handle_offset_commit_result(
    plan: OffsetCommitPlan,
    cache: &MetadataCache,
    results: &[PartitionAppendResult],
) -> BTreeMap<OffsetKey, CoordinatorErrorCode> {
    assert_eq!(
        results.len(),
        1,
        "offset commit append must report exactly one partition status"
    );
    let result = &results[0];
    assert_eq!(
        result.partition, plan.partition,
        "append completion reported the wrong partition"
    );

    let translated = CoordinatorErrorCode::for_offset_commit(result.error);
    if translated == CoordinatorErrorCode::NoError {
        for (key, value) in &plan.kept {
            cache.put_offset(key.clone(), value.clone());
        }
    }

    let mut statuses = BTreeMap::new();
    for key in plan.too_large {
        statuses.insert(key, CoordinatorErrorCode::OffsetMetadataTooLarge);
    }
    for (key, _) in plan.kept {
        statuses.insert(key, translated);
    }
    statuses
}

pub struct GroupStorePlan {
    pub partition: i32,
}

/// `prepareStoreGroup`: builds the group value record from `group` plus the
/// per-member `assignment` bytes supplied by the membership subsystem. No
/// cache update happens here or in the completion callback on success --
/// the group object in the cache was already constructed by the membership
/// subsystem before this was called; this only persists it.
pub fn prepare_store_group(
    group_id: &str,
    record: &GroupValueRecord,
    num_partitions: i32,
) -> (GroupStorePlan, AppendBatch) {
    let partition = partition_for(group_id, num_partitions);
    let key = encode_group_key(&GroupKey {
        group: group_id.to_string(),
    });
    let value = encode_group_value(record);
    (
        GroupStorePlan { partition },
        AppendBatch {
            partition,
            records: vec![(key, Some(value))],
        },
    )
}

pub fn handle_group_store_result(
    plan: &GroupStorePlan,
    results: &[PartitionAppendResult],
) -> CoordinatorErrorCode {
    assert_eq!(
        results.len(),
        1,
        "group store append must report exactly one partition status"
    );
    let result = &results[0];
    assert_eq!(
        result.partition, plan.partition,
        "append completion reported the wrong partition"
    );
    CoordinatorErrorCode::for_group_store(result.error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::StorageError;

    fn offset(group: &str, metadata: &str) -> (OffsetKey, OffsetValue) {
        (
            OffsetKey {
                group: group.to_string(),
                topic: "t".to_string(),
                partition: 0,
            },
            OffsetValue {
                offset: 1,
                metadata: metadata.to_string(),
                commit_timestamp: 0,
                expire_timestamp: i64::MAX,
            },
        )
    }

    #[test]
    fn oversize_metadata_is_filtered_and_reported_separately() {
        let small = offset("g", "abcd");
        let big = offset("g", &"x".repeat(100));
        let (plan, batch) =
            prepare_store_offsets("g", "consumer-1", 1, vec![small.clone(), big.clone()], 4, 16);

        assert_eq!(plan.kept.len(), 1);
        assert_eq!(plan.too_large.len(), 1);
        assert_eq!(batch.records.len(), 1);

        let cache = MetadataCache::new();
        let statuses = handle_offset_commit_result(
            plan,
            &cache,
            &[PartitionAppendResult {
                partition: batch.partition,
                error: StorageError::None,
            }],
        );
        assert_eq!(statuses[&small.0], CoordinatorErrorCode::NoError);
        assert_eq!(
            statuses[&big.0],
            CoordinatorErrorCode::OffsetMetadataTooLarge
        );
        assert!(cache.get_offset(&small.0).is_some());
        assert!(cache.get_offset(&big.0).is_none());
    }

    #[test]
    fn storage_failure_maps_to_not_coordinator_and_skips_cache() {
        let small = offset("g", "abcd");
        let (plan, batch) = prepare_store_offsets("g", "c", 1, vec![small.clone()], 4, 16);
        let cache = MetadataCache::new();
        let statuses = handle_offset_commit_result(
            plan,
            &cache,
            &[PartitionAppendResult {
                partition: batch.partition,
                error: StorageError::NotLeaderForPartition,
            }],
        );
        assert_eq!(
            statuses[&small.0],
            CoordinatorErrorCode::NotCoordinatorForGroup
        );
        assert!(cache.get_offset(&small.0).is_none());
    }

    #[test]
    #[should_panic(expected = "exactly one partition status")]
    fn wrong_result_count_is_a_fatal_invariant_violation() {
        let small = offset("g", "abcd");
        let (plan, _batch) = prepare_store_offsets("g", "c", 1, vec![small], 4, 16);
        let cache = MetadataCache::new();
        let _ = handle_offset_commit_result(plan, &cache, &[]);
    }

    #[test]
    fn group_store_does_not_touch_cache_on_success() {
        let record = GroupValueRecord {
            protocol_type: None,
            generation_id: 0,
            protocol: None,
            leader_id: None,
            members: Default::default(),
        };
        let (plan, batch) = prepare_store_group("g", &record, 4);
        let code = handle_group_store_result(
            &plan,
            &[PartitionAppendResult {
                partition: batch.partition,
                error: StorageError::None,
            }],
        );
        assert_eq!(code, CoordinatorErrorCode::NoError);
    }
}
