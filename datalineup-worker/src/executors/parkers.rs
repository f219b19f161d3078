// Copyright 2024-2025 Golem Cloud
//
// Licensed under the Golem Source License v1.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://license.golem.cloud/LICENSE
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// A counted park/unpark gate. Any number of pipeline stages may park; the
/// gate is locked while at least one token is parked. Waiters must re-check
/// their predicate after waking.
#[derive(Clone, Default)]
pub struct Parkers {
    inner: Arc<ParkersInner>,
}

#[derive(Default)]
struct ParkersInner {
    parked: Mutex<HashSet<u64>>,
    next_token: AtomicU64,
    unparked: Notify,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParkToken(u64);

impl Parkers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn park(&self) -> ParkToken {
        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
        self.inner.parked.lock().unwrap().insert(token);
        ParkToken(token)
    }

    pub fn unpark(&self, token: ParkToken) {
        let mut parked = self.inner.parked.lock().unwrap();
        parked.remove(&token.0);
        let unlocked = parked.is_empty();
        drop(parked);
        if unlocked {
            self.inner.unparked.notify_waiters();
        }
    }

    pub fn locked(&self) -> bool {
        !self.inner.parked.lock().unwrap().is_empty()
    }

    /// Waits until no token is parked.
    pub async fn wait(&self) {
        loop {
            let unparked = self.inner.unparked.notified();
            if !self.locked() {
                return;
            }
            unparked.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;

    #[test]
    async fn gate_locks_while_any_token_is_parked() {
        let parkers = Parkers::new();
        assert!(!parkers.locked());

        let first = parkers.park();
        let second = parkers.park();
        assert!(parkers.locked());

        parkers.unpark(first);
        assert!(parkers.locked());

        let waiter = {
            let parkers = parkers.clone();
            tokio::spawn(async move { parkers.wait().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        parkers.unpark(second);
        waiter.await.unwrap();
        assert!(!parkers.locked());
    }
}
