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

//! Runtime assertion that the three named locks (partition registry, offset
//! expire, group monitor) are only ever acquired in that order on a given
//! thread. Cheap enough to compile in for every build; it only touches a
//! thread-local stack, never a real lock.

use std::cell::RefCell;

pub const REGISTRY: u8 = 1;
pub const EXPIRE: u8 = 2;
pub const GROUP: u8 = 3;

thread_local! {
    static HELD: RefCell<Vec<u8>> = const { RefCell::new(Vec::new()) };
}

#[must_use = "dropping this immediately acquires-then-releases the tier, asserting nothing"]
pub struct Ticket(u8);

impl Drop for Ticket {
    fn drop(&mut self) {
        HELD.with(|held| {
            let mut held = held.borrow_mut();
            debug_assert_eq!(
                held.last().copied(),
                Some(self.0),
                "lock order ticket released out of stack order"
            );
            held.pop();
        });
    }
}

/// Records that the calling thread is about to acquire the given tier.
/// Panics if a higher-numbered tier is already held, which would mean the
/// caller is about to violate the mandatory registry -> expire -> group
/// acquisition order.
pub fn acquire(tier: u8) -> Ticket {
    HELD.with(|held| {
        let mut held = held.borrow_mut();
        if let Some(&top) = held.last() {
            assert!(
                tier > top,
                "lock order violation: attempted to acquire tier {tier} while holding tier {top}"
            );
        }
        held.push(tier);
    });
    Ticket(tier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_in_order_is_fine() {
        let _registry = acquire(REGISTRY);
        let _expire = acquire(EXPIRE);
        let _group = acquire(GROUP);
    }

    #[test]
    #[should_panic(expected = "lock order violation")]
    fn out_of_order_panics() {
        let _expire = acquire(EXPIRE);
        let _registry = acquire(REGISTRY);
    }

    #[test]
    fn sequential_reacquisition_is_fine() {
        {
            let _registry = acquire(REGISTRY);
        }
        let _registry = acquire(REGISTRY);
    }
}
