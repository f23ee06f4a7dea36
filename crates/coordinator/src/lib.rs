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

//! The group-and-offset metadata manager core: a sharded in-memory cache of
//! consumer-group metadata and committed offsets, backed by a compacted
//! log, with a leadership lifecycle that loads and evicts cache state as
//! partition ownership changes, and a periodic sweeper that tombstones
//! expired offsets.
//!
//! This crate owns none of replication, group-membership rebalance
//! semantics, wire-protocol decoding, or the offsets-topic log itself --
//! those are external collaborators represented by the [`collaborators`]
//! traits.

pub mod cache;
pub mod codec;
pub mod collaborators;
pub mod config;
pub mod error;
mod load;
mod lock_order;
pub mod metrics;
mod partitioning;
pub mod registry;
mod store;
mod sweeper;
#[cfg(test)]
pub mod test_support;

use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use cache::GroupMetadata;
use cache::MetadataCache;
use codec::GroupValueRecord;
use codec::OffsetKey;
use codec::OffsetValue;
use collaborators::AppendLog;
use collaborators::AppendRequest;
use collaborators::PartitionAssignment;
use config::CoordinatorConfig;
use config::OFFSETS_TOPIC;
use coordinator_runtime::schedule_with_fixed_delay;
use coordinator_runtime::Runtime;
use coordinator_runtime::ScheduledTask;
use coordinator_runtime::TaskFn;
use error::CoordinatorErrorCode;
use error::GetOffsetsResult;
use metrics::CoordinatorMetrics;
use parking_lot::Mutex as SyncMutex;
use parking_lot::RwLock;
use registry::PartitionRegistry;

pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the unix epoch")
        .as_millis() as i64
}

/// Resolves `offsetsTopicNumPartitions` via the naming service, falling
/// back to configuration if the offsets topic does not exist yet.
pub fn resolve_num_partitions(naming: &dyn PartitionAssignment, config: &CoordinatorConfig) -> i32 {
    match naming.partition_count(OFFSETS_TOPIC) {
        Some(n) => n,
        None => {
            log::warn!(
                "offsets topic not found via naming service; falling back to configured {} partitions",
                config.offsets_topic_num_partitions
            );
            config.offsets_topic_num_partitions
        }
    }
}

/// Ties together the partition ownership registry, the metadata cache, and
/// the load/store/sweep pipelines into the lifecycle and lookup API that
/// the rest of the broker drives.
pub struct Coordinator {
    registry: PartitionRegistry,
    cache: MetadataCache,
    expire_lock: RwLock<()>,
    storage: Arc<dyn AppendLog>,
    config: CoordinatorConfig,
    runtime: Runtime,
    shutting_down: Arc<AtomicBool>,
    sweep_task: SyncMutex<Option<ScheduledTask<()>>>,
}

impl Coordinator {
    pub fn new(
        storage: Arc<dyn AppendLog>,
        naming: &dyn PartitionAssignment,
        config: CoordinatorConfig,
        runtime: Runtime,
    ) -> Arc<Self> {
        let num_partitions = resolve_num_partitions(naming, &config);
        Arc::new(Coordinator {
            registry: PartitionRegistry::new(num_partitions),
            cache: MetadataCache::new(),
            expire_lock: RwLock::new(()),
            storage,
            config,
            runtime,
            shutting_down: Arc::new(AtomicBool::new(false)),
            sweep_task: SyncMutex::new(None),
        })
    }

    pub fn partition_for(&self, group: &str) -> i32 {
        partitioning::partition_for(group, self.registry.num_partitions())
    }

    pub fn current_groups(&self) -> Vec<GroupMetadata> {
        self.cache.current_groups()
    }

    pub fn is_group_local(&self, group: &str) -> bool {
        self.registry.is_group_local(group)
    }

    pub fn is_group_loading(&self, group: &str) -> bool {
        self.registry.is_group_loading(group)
    }

    pub fn is_loading(&self) -> bool {
        self.registry.is_loading()
    }

    pub fn get_group(&self, group_id: &str) -> Option<Arc<parking_lot::Mutex<GroupMetadata>>> {
        self.cache.get_group(group_id)
    }

    pub fn add_group(
        &self,
        group_id: &str,
        protocol_type: Option<String>,
    ) -> Arc<parking_lot::Mutex<GroupMetadata>> {
        self.cache.add_group(group_id, protocol_type)
    }

    pub fn remove_group(&self, group_id: &str) -> bool {
        self.cache
            .remove_group(group_id, self.registry.num_partitions(), self.storage.as_ref())
    }

    pub fn get_offsets(&self, group: &str, requested: &[(String, i32)]) -> GetOffsetsResult {
        self.registry.get_offsets(&self.cache, group, requested)
    }

    pub fn metrics(&self) -> &CoordinatorMetrics {
        self.cache.metrics()
    }

    /// Promotes `partition` to owned, scheduling a load job on this
    /// coordinator's runtime unless one is already in flight.
    pub fn promote_partition(self: &Arc<Self>, partition: i32) {
        match self.registry.promote(partition) {
            registry::PromotionOutcome::AlreadyLoading => {}
            registry::PromotionOutcome::ScheduleLoad => {
                let this = self.clone();
                self.runtime.spawn(async move {
                    load::load_partition(
                        partition,
                        &this.registry,
                        &this.cache,
                        &this.expire_lock,
                        this.storage.as_ref(),
                        this.config.offsets_retention_ms,
                        this.config.load_buffer_size,
                        &this.shutting_down,
                    )
                    .await;
                });
            }
        }
    }

    pub fn demote_partition(&self, partition: i32) {
        self.registry.demote(partition, &self.cache);
    }

    /// `prepareStoreOffsets` + `store`: builds the append batch, submits it,
    /// and invokes `respond` with the per-offset status once the append
    /// completes.
    pub fn store_offsets(
        self: &Arc<Self>,
        group_id: String,
        consumer_id: String,
        generation_id: i32,
        offsets: Vec<(OffsetKey, OffsetValue)>,
        respond: impl FnOnce(BTreeMap<OffsetKey, CoordinatorErrorCode>) + Send + 'static,
    ) {
        let (plan, batch) = store::prepare_store_offsets(
            &group_id,
            &consumer_id,
            generation_id,
            offsets,
            self.registry.num_partitions(),
            self.config.max_metadata_size,
        );
        let this = self.clone();
        let request = AppendRequest {
            timeout_ms: self.config.offset_commit_timeout_ms,
            required_acks: self.config.offset_commit_required_acks,
            internal_topic_allowed: true,
            batches: vec![batch],
        };
        self.storage.append_messages(
            request,
            Box::new(move |results| {
                let statuses = store::handle_offset_commit_result(plan, &this.cache, &results);
                respond(statuses);
            }),
        );
    }

    /// `prepareStoreGroup` + `store`: persists `group` (the membership
    /// subsystem already updated the in-memory cache entry); no cache
    /// mutation happens here.
    pub fn store_group(
        self: &Arc<Self>,
        group_id: String,
        record: GroupValueRecord,
        respond: impl FnOnce(CoordinatorErrorCode) + Send + 'static,
    ) {
        let (plan, batch) =
            store::prepare_store_group(&group_id, &record, self.registry.num_partitions());
        let request = AppendRequest {
            timeout_ms: self.config.offset_commit_timeout_ms,
            required_acks: self.config.offset_commit_required_acks,
            internal_topic_allowed: true,
            batches: vec![batch],
        };
        self.storage.append_messages(
            request,
            Box::new(move |results| {
                let code = store::handle_group_store_result(&plan, &results);
                respond(code);
            }),
        );
    }

    pub fn run_sweep_once(&self, now_ms: i64) -> usize {
        sweeper::run_once(
            &self.cache,
            &self.expire_lock,
            self.storage.as_ref(),
            self.registry.num_partitions(),
            now_ms,
        )
    }

    /// Starts the periodic expiration sweeper. The returned handle is also
    /// kept internally so [`Coordinator::shutdown`] can cancel it.
    pub fn start_sweeper(self: &Arc<Self>) {
        let this = self.clone();
        let interval = Duration::from_millis(
            self.config.offsets_retention_check_interval_ms.max(0) as u64
        );
        let task = schedule_with_fixed_delay(
            "offsets-expiration-sweep",
            &self.runtime,
            None,
            interval,
            SweepTask { coordinator: this },
        );
        *self.sweep_task.lock() = Some(task);
    }

    /// Flips the shutting-down flag (in-flight loads abort at the next
    /// record boundary) and cancels the scheduled sweeper. Does not wait
    /// for in-flight appends to complete, nor does it clear the caches --
    /// see DESIGN.md for why that is the chosen behavior.
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        if let Some(task) = self.sweep_task.lock().take() {
            task.cancel();
        }
    }
}

struct SweepTask {
    coordinator: Arc<Coordinator>,
}

impl TaskFn for SweepTask {
    type Error = std::convert::Infallible;

    async fn call(&mut self) -> Result<(), Self::Error> {
        self.coordinator.run_sweep_once(now_millis());
        Ok(())
    }
}
