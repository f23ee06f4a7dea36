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

use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;

/// `NumOffsets`/`NumGroups` gauges, updated alongside the cache mutations
/// that change cardinality. Exposed as plain accessors so a host process can
/// poll them into whatever observability registry it already uses.
#[derive(Debug, Default)]
pub struct CoordinatorMetrics {
    num_offsets: AtomicI64,
    num_groups: AtomicI64,
}

impl CoordinatorMetrics {
    pub fn num_offsets(&self) -> i64 {
        self.num_offsets.load(Ordering::Relaxed)
    }

    pub fn num_groups(&self) -> i64 {
        self.num_groups.load(Ordering::Relaxed)
    }

    pub(crate) fn offset_inserted(&self) {
        self.num_offsets.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn offsets_removed(&self, count: i64) {
        self.num_offsets.fetch_sub(count, Ordering::Relaxed);
    }

    pub(crate) fn group_inserted(&self) {
        self.num_groups.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn groups_removed(&self, count: i64) {
        self.num_groups.fetch_sub(count, Ordering::Relaxed);
    }
}
