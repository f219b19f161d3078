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

use crate::error::WorkerError;
use crate::resources::limits::RateLimits;
use chrono::{DateTime, Utc};
use datalineup_common::model::{ResourceItem, ResourceRateLimit};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct ResourceData {
    pub name: String,
    pub type_name: String,
    pub data: HashMap<String, Value>,
    pub default_delay: Duration,
    pub rate_limit: Option<ResourceRateLimit>,
}

impl From<ResourceItem> for ResourceData {
    fn from(item: ResourceItem) -> Self {
        Self {
            name: item.name,
            type_name: item.type_name,
            data: item.data,
            default_delay: Duration::from_secs_f64(item.default_delay.max(0.0)),
            rate_limit: item.rate_limit,
        }
    }
}

struct Slot {
    data: Arc<ResourceData>,
    limits: Option<RateLimits>,
    unavailable_until: Option<Instant>,
    last_used: Instant,
    in_use: bool,
    retired: bool,
    provider: Option<String>,
}

#[derive(Default)]
struct Pool {
    slots: Vec<Slot>,
    missing_logged: bool,
}

#[derive(Default)]
struct ManagerState {
    pools: HashMap<String, Pool>,
}

/// Why an acquisition could not be satisfied right away.
pub enum AcquireBlocked {
    /// No resource of this type is registered; wait for a sync to add one.
    NoneRegistered,
    /// All instances are leased, delayed or rate limited.
    Busy { retry_at: Option<Instant> },
}

/// The typed resource pool shared by all pipelines of a worker. Acquisition
/// prefers the least-recently-used ready instance; release re-admits after
/// the resource's delay.
#[derive(Clone, Default)]
pub struct ResourcesManager {
    inner: Arc<ManagerInner>,
}

#[derive(Default)]
struct ManagerInner {
    state: Mutex<ManagerState>,
    notify: Notify,
}

impl ResourcesManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, data: ResourceData) -> Result<(), WorkerError> {
        self.add_from(data, None)
    }

    pub(crate) fn add_from(
        &self,
        data: ResourceData,
        provider: Option<String>,
    ) -> Result<(), WorkerError> {
        let limits = data
            .rate_limit
            .as_ref()
            .map(RateLimits::parse)
            .transpose()?;

        let mut state = self.inner.state.lock().unwrap();
        let pool = state.pools.entry(data.type_name.clone()).or_default();
        if pool.slots.iter().any(|slot| slot.data.name == data.name) {
            return Err(WorkerError::configuration(format!(
                "duplicate resource name: {}",
                data.name
            )));
        }
        info!(resource = data.name, r#type = data.type_name, "resource added");
        pool.slots.push(Slot {
            data: Arc::new(data),
            limits,
            unavailable_until: None,
            last_used: Instant::now(),
            in_use: false,
            retired: false,
            provider,
        });
        drop(state);
        self.inner.notify.notify_waiters();
        Ok(())
    }

    /// Marks a resource for removal; leased instances disappear once their
    /// lease completes.
    pub fn remove(&self, name: &str) {
        let mut state = self.inner.state.lock().unwrap();
        for pool in state.pools.values_mut() {
            for slot in &mut pool.slots {
                if slot.data.name == name {
                    slot.retired = true;
                }
            }
            pool.slots.retain(|slot| !(slot.retired && !slot.in_use));
        }
    }

    /// Retires every resource contributed by the given provider.
    pub fn remove_provider_resources(&self, provider: &str) {
        let mut state = self.inner.state.lock().unwrap();
        for pool in state.pools.values_mut() {
            for slot in &mut pool.slots {
                if slot.provider.as_deref() == Some(provider) {
                    slot.retired = true;
                }
            }
            pool.slots.retain(|slot| !(slot.retired && !slot.in_use));
        }
    }

    pub fn available_count(&self, type_name: &str) -> usize {
        let state = self.inner.state.lock().unwrap();
        state
            .pools
            .get(type_name)
            .map(|pool| {
                pool.slots
                    .iter()
                    .filter(|slot| !slot.in_use && !slot.retired)
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn try_acquire(&self, type_name: &str) -> Result<ResourceLease, AcquireBlocked> {
        let mut state = self.inner.state.lock().unwrap();
        let Some(pool) = state.pools.get_mut(type_name) else {
            return Err(AcquireBlocked::NoneRegistered);
        };
        if pool.slots.iter().all(|slot| slot.retired) {
            return Err(AcquireBlocked::NoneRegistered);
        }

        let now = Instant::now();
        let mut retry_at: Option<Instant> = None;
        let mut candidates: Vec<usize> = (0..pool.slots.len())
            .filter(|index| {
                let slot = &pool.slots[*index];
                !slot.in_use && !slot.retired
            })
            .collect();
        candidates.sort_by_key(|index| pool.slots[*index].last_used);

        for index in candidates {
            let slot = &mut pool.slots[index];
            if let Some(until) = slot.unavailable_until {
                if until > now {
                    retry_at = Some(retry_at.map_or(until, |at| at.min(until)));
                    continue;
                }
            }
            match slot.limits.as_ref().map(RateLimits::try_admit) {
                Some(Err(wait)) => {
                    let at = now + wait;
                    retry_at = Some(retry_at.map_or(at, |current| current.min(at)));
                    continue;
                }
                _ => {
                    slot.in_use = true;
                    slot.last_used = now;
                    return Ok(ResourceLease {
                        inner: self.inner.clone(),
                        data: slot.data.clone(),
                        released: false,
                    });
                }
            }
        }

        Err(AcquireBlocked::Busy { retry_at })
    }

    /// Acquires one resource of the given type, parking the caller until an
    /// instance frees up. Acquiring a type with no registered resource waits
    /// for a sync to add one, logging once per type.
    pub async fn acquire(&self, type_name: &str) -> ResourceLease {
        loop {
            let notified = self.inner.notify.notified();
            match self.try_acquire(type_name) {
                Ok(lease) => return lease,
                Err(AcquireBlocked::NoneRegistered) => {
                    {
                        let mut state = self.inner.state.lock().unwrap();
                        let pool = state.pools.entry(type_name.to_string()).or_default();
                        if !pool.missing_logged {
                            pool.missing_logged = true;
                            warn!(r#type = type_name, "no resource of required type registered");
                        }
                    }
                    notified.await;
                }
                Err(AcquireBlocked::Busy { retry_at }) => match retry_at {
                    Some(at) => {
                        tokio::select! {
                            _ = notified => {}
                            _ = tokio::time::sleep_until(at) => {}
                        }
                    }
                    None => notified.await,
                },
            }
        }
    }

    /// Acquires one resource per type, in sorted type order so concurrent
    /// multi-type acquisitions cannot deadlock.
    pub async fn acquire_many(&self, type_names: &[String]) -> Vec<ResourceLease> {
        let mut sorted: Vec<&String> = type_names.iter().collect();
        sorted.sort();
        sorted.dedup();

        let mut leases = Vec::with_capacity(sorted.len());
        for type_name in sorted {
            leases.push(self.acquire(type_name).await);
        }
        leases
    }

    /// True when every type can be satisfied right now; on failure all
    /// partially acquired leases are returned to the pool immediately.
    pub fn try_acquire_many(&self, type_names: &[String]) -> Option<Vec<ResourceLease>> {
        let mut sorted: Vec<&String> = type_names.iter().collect();
        sorted.sort();
        sorted.dedup();

        let mut leases = Vec::with_capacity(sorted.len());
        for type_name in sorted {
            match self.try_acquire(type_name) {
                Ok(lease) => leases.push(lease),
                Err(_) => {
                    for lease in leases {
                        lease.release_now();
                    }
                    return None;
                }
            }
        }
        Some(leases)
    }

    fn release_slot(inner: &ManagerInner, name: &str, type_name: &str, release_at: Option<Instant>) {
        let mut state = inner.state.lock().unwrap();
        let Some(pool) = state.pools.get_mut(type_name) else {
            return;
        };
        let Some(index) = pool.slots.iter().position(|slot| slot.data.name == name) else {
            return;
        };
        if pool.slots[index].retired {
            pool.slots.remove(index);
        } else {
            let slot = &mut pool.slots[index];
            slot.in_use = false;
            slot.unavailable_until = release_at;
        }
        drop(state);
        inner.notify.notify_waiters();
    }
}

/// An exclusive hold on one resource instance. Dropping a lease without an
/// explicit release re-admits the resource after its default delay, so a
/// cancelled pipeline cannot leak it.
pub struct ResourceLease {
    inner: Arc<ManagerInner>,
    data: Arc<ResourceData>,
    released: bool,
}

impl ResourceLease {
    pub fn data(&self) -> &Arc<ResourceData> {
        &self.data
    }

    pub fn type_name(&self) -> &str {
        &self.data.type_name
    }

    fn release_deadline(&self, release_at: Option<DateTime<Utc>>) -> Option<Instant> {
        let now = Instant::now();
        let delay = if self.data.default_delay > Duration::ZERO {
            Some(now + self.data.default_delay)
        } else {
            None
        };
        let requested = release_at.and_then(|at| {
            let remaining = (at - Utc::now()).to_std().ok()?;
            Some(now + remaining)
        });
        match (delay, requested) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    /// Re-admits the resource, unavailable until `max(release_at, now +
    /// default_delay)`.
    pub fn release(mut self, release_at: Option<DateTime<Utc>>) {
        let deadline = self.release_deadline(release_at);
        self.released = true;
        ResourcesManager::release_slot(&self.inner, &self.data.name, &self.data.type_name, deadline);
    }

    fn release_now(mut self) {
        self.released = true;
        ResourcesManager::release_slot(&self.inner, &self.data.name, &self.data.type_name, None);
    }
}

impl Drop for ResourceLease {
    fn drop(&mut self) {
        if !self.released {
            let deadline = self.release_deadline(None);
            ResourcesManager::release_slot(&self.inner, &self.data.name, &self.data.type_name, deadline);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;

    fn resource(name: &str, type_name: &str) -> ResourceData {
        ResourceData {
            name: name.to_string(),
            type_name: type_name.to_string(),
            data: HashMap::new(),
            default_delay: Duration::ZERO,
            rate_limit: None,
        }
    }

    #[test]
    async fn pool_never_exceeds_capacity() {
        let manager = ResourcesManager::new();
        manager.add(resource("r1", "T")).unwrap();
        manager.add(resource("r2", "T")).unwrap();

        let first = manager.acquire("T").await;
        let second = manager.acquire("T").await;
        assert!(matches!(
            manager.try_acquire("T"),
            Err(AcquireBlocked::Busy { .. })
        ));

        first.release(None);
        let third = manager.acquire("T").await;
        drop(second);
        drop(third);
        assert_eq!(manager.available_count("T"), 2);
    }

    #[test]
    async fn waiter_wakes_on_release() {
        let manager = ResourcesManager::new();
        manager.add(resource("r1", "T")).unwrap();

        let lease = manager.acquire("T").await;
        let waiter = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.acquire("T").await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        lease.release(None);
        let lease = waiter.await.unwrap();
        assert_eq!(lease.data().name, "r1");
    }

    #[test]
    async fn default_delay_defers_readmission() {
        let manager = ResourcesManager::new();
        let mut data = resource("r1", "T");
        data.default_delay = Duration::from_millis(50);
        manager.add(data).unwrap();

        let started = Instant::now();
        let lease = manager.acquire("T").await;
        lease.release(None);
        let _lease = manager.acquire("T").await;
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    async fn duplicate_names_are_rejected() {
        let manager = ResourcesManager::new();
        manager.add(resource("r1", "T")).unwrap();
        assert!(manager.add(resource("r1", "T")).is_err());
    }

    #[test]
    async fn least_recently_used_wins_ties() {
        let manager = ResourcesManager::new();
        manager.add(resource("r1", "T")).unwrap();
        manager.add(resource("r2", "T")).unwrap();

        let first = manager.acquire("T").await;
        assert_eq!(first.data().name, "r1");
        first.release(None);

        // r2 has now been idle longer than r1.
        let second = manager.acquire("T").await;
        assert_eq!(second.data().name, "r2");
    }
}
