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

//! The in-memory metadata cache: two sharded maps (offsets, groups) plus the
//! per-group monitors that every state transition must hold.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::codec::GroupValueRecord;
use crate::codec::MemberMetadata;
use crate::codec::OffsetKey;
use crate::codec::OffsetValue;
use crate::lock_order;
use crate::metrics::CoordinatorMetrics;
use crate::partitioning::partition_for;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    PreparingRebalance,
    AwaitingSync,
    Stable,
    Dead,
}

/// Opaque to this core beyond `transition_to`, `add`, and
/// `all_member_metadata`. The membership subsystem owns everything else
/// about what a group "means".
#[derive(Debug, Clone)]
pub struct GroupMetadata {
    pub group_id: String,
    pub protocol_type: Option<String>,
    pub generation_id: i32,
    pub protocol: Option<String>,
    pub leader_id: Option<String>,
    pub state: GroupState,
    pub members: BTreeMap<String, MemberMetadata>,
}

impl GroupMetadata {
    fn new(group_id: impl Into<String>, protocol_type: Option<String>) -> Self {
        GroupMetadata {
            group_id: group_id.into(),
            protocol_type,
            generation_id: 0,
            protocol: None,
            leader_id: None,
            state: GroupState::PreparingRebalance,
            members: BTreeMap::new(),
        }
    }

    fn from_record(group_id: String, record: GroupValueRecord) -> Self {
        let state = if record.members.is_empty() {
            GroupState::PreparingRebalance
        } else {
            GroupState::Stable
        };
        GroupMetadata {
            group_id,
            protocol_type: record.protocol_type,
            generation_id: record.generation_id,
            protocol: record.protocol,
            leader_id: record.leader_id,
            state,
            members: record.members,
        }
    }

    pub fn transition_to(&mut self, new_state: GroupState) {
        log::debug!(
            "group {} transitioning {:?} -> {:?}",
            self.group_id,
            self.state,
            new_state
        );
        self.state = new_state;
    }

    pub fn add(&mut self, member_id: impl Into<String>, member: MemberMetadata) {
        self.members.insert(member_id.into(), member);
    }

    pub fn all_member_metadata(&self) -> impl Iterator<Item = &MemberMetadata> {
        self.members.values()
    }
}

pub struct MetadataCache {
    offsets: DashMap<OffsetKey, OffsetValue>,
    groups: DashMap<String, Arc<Mutex<GroupMetadata>>>,
    metrics: CoordinatorMetrics,
}

impl Default for MetadataCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataCache {
    pub fn new() -> Self {
        MetadataCache {
            offsets: DashMap::new(),
            groups: DashMap::new(),
            metrics: CoordinatorMetrics::default(),
        }
    }

    pub fn metrics(&self) -> &CoordinatorMetrics {
        &self.metrics
    }

    pub fn get_offset(&self, key: &OffsetKey) -> Option<OffsetValue> {
        self.offsets.get(key).map(|e| e.value().clone())
    }

    pub fn put_offset(&self, key: OffsetKey, value: OffsetValue) {
        if self.offsets.insert(key, value).is_none() {
            self.metrics.offset_inserted();
        }
    }

    pub fn remove_offset(&self, key: &OffsetKey) {
        if self.offsets.remove(key).is_some() {
            self.metrics.offsets_removed(1);
        }
    }

    pub fn offsets_for_group(&self, group_id: &str) -> Vec<(OffsetKey, OffsetValue)> {
        self.offsets
            .iter()
            .filter(|e| e.key().group == group_id)
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    pub fn get_group(&self, group_id: &str) -> Option<Arc<Mutex<GroupMetadata>>> {
        self.groups.get(group_id).map(|e| e.value().clone())
    }

    /// Inserts an empty group if absent and returns it; otherwise returns
    /// the existing group. Atomic with respect to concurrent `add_group`
    /// calls for the same `group_id`.
    pub fn add_group(&self, group_id: &str, protocol_type: Option<String>) -> Arc<Mutex<GroupMetadata>> {
        let metrics = &self.metrics;
        let entry = self
            .groups
            .entry(group_id.to_string())
            .or_insert_with(|| {
                metrics.group_inserted();
                Arc::new(Mutex::new(GroupMetadata::new(group_id, protocol_type)))
            });
        entry.value().clone()
    }

    /// Replaces the in-memory value for `group_id` unconditionally, used by
    /// the load pipeline replaying the compacted log. Does not touch
    /// `offsets`.
    pub fn put_group_from_record(&self, group_id: String, record: GroupValueRecord) {
        let group = GroupMetadata::from_record(group_id.clone(), record);
        if self
            .groups
            .insert(group_id, Arc::new(Mutex::new(group)))
            .is_none()
        {
            self.metrics.group_inserted();
        }
    }

    /// Handles a group tombstone read during load: removes the group and,
    /// if it was present, transitions it to `Dead` under its own monitor.
    pub fn remove_group_on_tombstone(&self, group_id: &str) {
        if let Some((_, group)) = self.groups.remove(group_id) {
            self.metrics.groups_removed(1);
            let _ticket = lock_order::acquire(lock_order::GROUP);
            group.lock().transition_to(GroupState::Dead);
        }
    }

    /// Equivalent to the real coordinator's `removeGroup`, which requires
    /// the caller to already hold the group's monitor; Rust's `Mutex` is not
    /// reentrant, so this variant acquires the monitor itself for the
    /// duration of the call. Transitions the group to `Dead`, removes it
    /// from the map (logging loudly if the map entry had already been
    /// replaced by a different object — that would mean two removals raced,
    /// which the membership subsystem's own locking is supposed to prevent),
    /// and appends a group tombstone. Tombstone append failure is logged and
    /// swallowed: a later sweep or a new leader's load will re-tombstone.
    pub fn remove_group(
        &self,
        group_id: &str,
        num_partitions: i32,
        appender: &dyn crate::collaborators::AppendLog,
    ) -> bool {
        use crate::codec::encode_group_key;
        use crate::codec::GroupKey;
        use crate::collaborators::AppendBatch;
        use crate::collaborators::AppendRequest;
        use crate::collaborators::StorageError;

        let Some(group_arc) = self.get_group(group_id) else {
            return false;
        };

        let _ticket = lock_order::acquire(lock_order::GROUP);
        let mut guard = group_arc.lock();
        guard.transition_to(GroupState::Dead);
        drop(guard);

        let removed = self
            .groups
            .remove_if(group_id, |_, v| Arc::ptr_eq(v, &group_arc));
        if removed.is_none() {
            log::error!(
                "group {group_id} was replaced concurrently in the cache; skipping removal"
            );
            return false;
        }
        self.metrics.groups_removed(1);

        let partition = partition_for(group_id, num_partitions);
        let key = encode_group_key(&GroupKey {
            group: group_id.to_string(),
        });
        let request = AppendRequest {
            timeout_ms: 0,
            required_acks: 0,
            internal_topic_allowed: true,
            batches: vec![AppendBatch {
                partition,
                records: vec![(key, None)],
            }],
        };
        let group_id_owned = group_id.to_string();
        appender.append_messages(
            request,
            Box::new(move |results| {
                for result in results {
                    if result.error != StorageError::None {
                        log::warn!(
                            "failed to append tombstone for group {group_id_owned} on partition {}: {:?}",
                            result.partition,
                            result.error
                        );
                    }
                }
            }),
        );
        true
    }

    /// Removes every cache entry (offset or group) routed to `partition`.
    /// Called while the caller holds the partition registry lock.
    pub fn evict_partition(&self, partition: i32, num_partitions: i32) {
        let before_offsets = self.offsets.len();
        self.offsets
            .retain(|k, _| partition_for(&k.group, num_partitions) != partition);
        let removed_offsets = (before_offsets - self.offsets.len()) as i64;
        self.metrics.offsets_removed(removed_offsets);

        let before_groups = self.groups.len();
        self.groups
            .retain(|g, _| partition_for(g, num_partitions) != partition);
        let removed_groups = (before_groups - self.groups.len()) as i64;
        self.metrics.groups_removed(removed_groups);

        log::info!(
            "evicted {removed_offsets} offsets and {removed_groups} groups for partition {partition}"
        );
    }

    pub fn snapshot_expired(&self, now_ms: i64) -> Vec<(OffsetKey, OffsetValue)> {
        self.offsets
            .iter()
            .filter(|e| e.value().expire_timestamp < now_ms)
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    pub fn current_groups(&self) -> Vec<GroupMetadata> {
        self.groups
            .iter()
            .map(|e| e.value().lock().clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeAppendLog;

    #[test]
    fn add_group_is_idempotent_for_same_id() {
        let cache = MetadataCache::new();
        let a = cache.add_group("g1", Some("consumer".to_string()));
        let b = cache.add_group("g1", Some("consumer".to_string()));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.metrics().num_groups(), 1);
    }

    #[test]
    fn put_offset_then_remove_tracks_metrics() {
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
                expire_timestamp: 100,
            },
        );
        assert_eq!(cache.metrics().num_offsets(), 1);
        cache.remove_offset(&key);
        assert_eq!(cache.metrics().num_offsets(), 0);
    }

    #[test]
    fn remove_group_requires_dead_transition_and_tombstones() {
        let cache = MetadataCache::new();
        cache.add_group("g1", None);
        let appender = FakeAppendLog::new();
        assert!(cache.remove_group("g1", 4, &appender));
        assert!(cache.get_group("g1").is_none());
        assert_eq!(cache.metrics().num_groups(), 0);
    }

    #[test]
    fn remove_group_is_false_for_unknown_group() {
        let cache = MetadataCache::new();
        let appender = FakeAppendLog::new();
        assert!(!cache.remove_group("missing", 4, &appender));
    }

    #[test]
    fn evict_partition_restricts_to_routed_groups() {
        let cache = MetadataCache::new();
        // Find two groups that land on different partitions out of 4.
        let mut by_partition: BTreeMap<i32, &str> = BTreeMap::new();
        for g in ["a", "b", "c", "d", "e", "f"] {
            by_partition.entry(partition_for(g, 4)).or_insert(g);
        }
        assert!(by_partition.len() >= 2, "fixture needs >=2 distinct partitions");
        let mut iter = by_partition.into_iter();
        let (p0, g0) = iter.next().unwrap();
        let (p1, g1) = iter.next().unwrap();

        cache.add_group(g0, None);
        cache.add_group(g1, None);
        cache.evict_partition(p0, 4);

        assert!(cache.get_group(g0).is_none());
        assert!(cache.get_group(g1).is_some());
        let _ = p1;
    }
}
