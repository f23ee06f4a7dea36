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

//! Rebuilds cache state for a partition by replaying its compacted log,
//! triggered when the partition registry moves a partition into `Loading`.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use parking_lot::RwLock;

use crate::cache::MetadataCache;
use crate::codec;
use crate::collaborators::AppendLog;
use crate::lock_order;
use crate::registry::PartitionRegistry;

/// Ensures `loading.remove(partition)` runs on every exit path -- Rust has
/// no `finally`, so the cleanup is expressed as a guard whose `Drop` always
/// runs, success, early return, or panic alike.
struct FinishLoadGuard<'a> {
    registry: &'a PartitionRegistry,
    partition: i32,
}

impl Drop for FinishLoadGuard<'_> {
    fn drop(&mut self) {
        self.registry.finish_loading(self.partition);
    }
}

/// Loads partition `partition`'s compacted log into `cache`. Holds the
/// offset-expire write lock for the whole loop to exclude the sweeper.
pub async fn load_partition(
    partition: i32,
    registry: &PartitionRegistry,
    cache: &MetadataCache,
    expire_lock: &RwLock<()>,
    storage: &dyn AppendLog,
    retention_ms: i64,
    load_buffer_size: usize,
    shutting_down: &AtomicBool,
) {
    let _finish_guard = FinishLoadGuard { registry, partition };

    let Some(log) = storage.get_log(partition) else {
        log::warn!("no log found for offsets partition {partition}; nothing to load");
        return;
    };

    let _ticket = lock_order::acquire(lock_order::EXPIRE);
    let _expire_guard = expire_lock.write();

    let mut curr_offset = log.base_offset();
    'load: loop {
        if shutting_down.load(Ordering::Relaxed) {
            log::info!(
                "coordinator shutting down; aborting load of partition {partition} at offset {curr_offset}"
            );
            break;
        }

        let hw = log.high_watermark();
        if hw < 0 {
            log::info!("lost local leadership of partition {partition} while loading; stopping");
            break;
        }
        if curr_offset >= hw {
            break;
        }

        let batch = log.read(curr_offset, load_buffer_size);
        if batch.is_empty() {
            break;
        }

        for record in &batch {
            match codec::decode_key(&record.key) {
                Ok(codec::DecodedKey::Offset(key)) => match &record.value {
                    None => cache.remove_offset(&key),
                    Some(value_bytes) => match codec::decode_offset_value(value_bytes, retention_ms) {
                        Ok(value) => cache.put_offset(key, value),
                        Err(err) => {
                            log::error!(
                                "failed to decode offset value while loading partition {partition}: {err}"
                            );
                            break 'load;
                        }
                    },
                },
                Ok(codec::DecodedKey::Group(key)) => match &record.value {
                    Some(value_bytes) => match codec::decode_group_value(value_bytes) {
                        Ok(decoded) => cache.put_group_from_record(key.group, decoded),
                        Err(err) => {
                            log::error!(
                                "failed to decode group value while loading partition {partition}: {err}"
                            );
                            break 'load;
                        }
                    },
                    None => cache.remove_group_on_tombstone(&key.group),
                },
                Err(err) => {
                    log::error!("failed to decode key while loading partition {partition}: {err}");
                    break 'load;
                }
            }
            curr_offset = record.next_offset();
        }
    }

    log::info!("finished loading offsets partition {partition} up to offset {curr_offset}");
}
