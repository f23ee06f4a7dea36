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

//! Tracks which offsets-topic partitions this node owns, is loading, or
//! neither. All operations on either set are serialized by a single mutex,
//! the outermost lock in the mandatory acquisition order.

use std::collections::BTreeSet;

use parking_lot::Mutex;

use crate::cache::MetadataCache;
use crate::codec::OffsetKey;
use crate::error::GetOffsetsResult;
use crate::error::OffsetFetchEntry;
use crate::lock_order;
use crate::partitioning::partition_for;

#[derive(Debug, Default)]
struct RegistryState {
    owned: BTreeSet<i32>,
    loading: BTreeSet<i32>,
}

pub enum PromotionOutcome {
    /// No load job was scheduled because one was already in flight.
    AlreadyLoading,
    /// Caller must schedule a load job for the returned partition.
    ScheduleLoad,
}

pub struct PartitionRegistry {
    state: Mutex<RegistryState>,
    num_partitions: i32,
}

impl PartitionRegistry {
    pub fn new(num_partitions: i32) -> Self {
        assert!(num_partitions > 0, "num_partitions must be positive");
        PartitionRegistry {
            state: Mutex::new(RegistryState::default()),
            num_partitions,
        }
    }

    pub fn num_partitions(&self) -> i32 {
        self.num_partitions
    }

    pub fn is_group_local(&self, group: &str) -> bool {
        let partition = partition_for(group, self.num_partitions);
        let _ticket = lock_order::acquire(lock_order::REGISTRY);
        self.state.lock().owned.contains(&partition)
    }

    pub fn is_group_loading(&self, group: &str) -> bool {
        let partition = partition_for(group, self.num_partitions);
        let _ticket = lock_order::acquire(lock_order::REGISTRY);
        self.state.lock().loading.contains(&partition)
    }

    pub fn is_loading(&self) -> bool {
        let _ticket = lock_order::acquire(lock_order::REGISTRY);
        !self.state.lock().loading.is_empty()
    }

    /// `owned.add(p)`; schedules a load job unless one is already in flight.
    /// Idempotent: re-promoting an already-owned, already-loading partition
    /// is a logged no-op.
    pub fn promote(&self, partition: i32) -> PromotionOutcome {
        let _ticket = lock_order::acquire(lock_order::REGISTRY);
        let mut state = self.state.lock();
        if !state.owned.insert(partition) {
            log::info!("partition {partition} already owned; promotion is idempotent");
        }
        if state.loading.insert(partition) {
            PromotionOutcome::ScheduleLoad
        } else {
            log::info!("partition {partition} load already in flight; skipping duplicate load job");
            PromotionOutcome::AlreadyLoading
        }
    }

    pub fn finish_loading(&self, partition: i32) {
        let _ticket = lock_order::acquire(lock_order::REGISTRY);
        self.state.lock().loading.remove(&partition);
    }

    /// `owned.remove(p)` and evicts every cache entry routed to `p`, all
    /// under the registry lock, closing the "leader-local check then fetch"
    /// race against concurrent `get_offsets` calls.
    pub fn demote(&self, partition: i32, cache: &MetadataCache) {
        let _ticket = lock_order::acquire(lock_order::REGISTRY);
        let mut state = self.state.lock();
        state.owned.remove(&partition);
        cache.evict_partition(partition, self.num_partitions);
    }

    /// Checks ownership and reads the cache under the same lock hold, so a
    /// concurrent demotion's cache eviction either happens entirely before
    /// or entirely after this call observes it -- never a value read mid
    /// eviction.
    pub fn get_offsets(
        &self,
        cache: &MetadataCache,
        group: &str,
        requested: &[(String, i32)],
    ) -> GetOffsetsResult {
        let partition = partition_for(group, self.num_partitions);
        let _ticket = lock_order::acquire(lock_order::REGISTRY);
        let state = self.state.lock();

        if !state.owned.contains(&partition) {
            let missing = if requested.is_empty() {
                Vec::new()
            } else {
                requested
                    .iter()
                    .map(|(topic, p)| OffsetKey {
                        group: group.to_string(),
                        topic: topic.clone(),
                        partition: *p,
                    })
                    .collect()
            };
            return GetOffsetsResult::NotCoordinator(missing);
        }

        if requested.is_empty() {
            let entries = cache
                .offsets_for_group(group)
                .into_iter()
                .map(|(k, v)| OffsetFetchEntry::Found(k, v))
                .collect();
            return GetOffsetsResult::Found(entries);
        }

        let entries = requested
            .iter()
            .map(|(topic, p)| {
                let key = OffsetKey {
                    group: group.to_string(),
                    topic: topic.clone(),
                    partition: *p,
                };
                match cache.get_offset(&key) {
                    Some(value) => OffsetFetchEntry::Found(key, value),
                    None => OffsetFetchEntry::NoOffset(key),
                }
            })
            .collect();
        GetOffsetsResult::Found(entries)
    }
}
