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
use crate::executors::executable::ExecutableQueue;
use crate::resources::{ResourceData, ResourcesProvider};
use crate::services::WorkerServices;
use crate::work_factory;
use chrono::{DateTime, Utc};
use datalineup_common::model::{
    ComponentDefinition, JobId, LockResponse, QueueItemWithState, ResourcesProviderItem,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::warn;

#[derive(Default)]
pub struct ItemsSync<T> {
    pub add: Vec<T>,
    pub drop: Vec<T>,
}

impl<T> ItemsSync<T> {
    pub fn empty() -> Self {
        Self {
            add: Vec::new(),
            drop: Vec::new(),
        }
    }
}

#[derive(Clone)]
pub struct ProviderEntry {
    pub item: ResourcesProviderItem,
    pub provider: Arc<dyn ResourcesProvider>,
}

/// The delta between two consecutive lock responses, already materialized
/// into runtime objects.
pub struct WorkSync {
    pub queues: ItemsSync<Arc<ExecutableQueue>>,
    pub resources: ItemsSync<ResourceData>,
    pub resources_providers: ItemsSync<ProviderEntry>,
    pub executors: ItemsSync<ComponentDefinition>,
}

/// Reconciles the manager's authoritative assignment into live sets of
/// queues, resources, providers and executors. Additions come before drops;
/// a queue that fails to build is skipped and retried on the next sync.
pub struct WorkManager {
    services: Arc<WorkerServices>,
    queues: HashMap<JobId, Arc<ExecutableQueue>>,
    resources: HashMap<String, ResourceData>,
    providers: HashMap<String, ProviderEntry>,
    executors: HashMap<String, ComponentDefinition>,
    last_sync_at: Option<DateTime<Utc>>,
}

impl WorkManager {
    pub fn new(services: Arc<WorkerServices>) -> Self {
        Self {
            services,
            queues: HashMap::new(),
            resources: HashMap::new(),
            providers: HashMap::new(),
            executors: HashMap::new(),
            last_sync_at: None,
        }
    }

    /// Waits out the rest of the sync period, then fetches and diffs the
    /// current assignment.
    pub async fn sync(&mut self) -> Result<WorkSync, WorkerError> {
        if let Some(last_sync_at) = self.last_sync_at {
            let elapsed = (Utc::now() - last_sync_at)
                .to_std()
                .unwrap_or_default();
            let period = self.services.config.sync_period;
            if elapsed < period {
                tokio::time::sleep(period - elapsed).await;
            }
        }
        self.last_sync_at = Some(Utc::now());

        let lock_response = self.services.client.lock().await?;
        Ok(WorkSync {
            queues: self.load_queues(&lock_response).await,
            resources: self.load_resources(&lock_response),
            resources_providers: self.load_resources_providers(&lock_response),
            executors: self.load_executors(&lock_response),
        })
    }

    pub fn queue_by_name(&self, name: &JobId) -> Option<&Arc<ExecutableQueue>> {
        self.queues.get(name)
    }

    async fn load_queues(&mut self, lock_response: &LockResponse) -> ItemsSync<Arc<ExecutableQueue>> {
        let current: HashSet<JobId> = self.queues.keys().cloned().collect();
        let incoming: HashMap<JobId, &QueueItemWithState> = lock_response
            .items
            .iter()
            .map(|item| (item.item.name.clone(), item))
            .collect();
        let incoming_names: HashSet<JobId> = incoming.keys().cloned().collect();

        let mut add = Vec::new();
        for name in incoming_names.difference(&current) {
            let item = incoming[name];
            match self.build_queue_for_worker_item(item).await {
                Some(queue) => {
                    self.queues.insert(name.clone(), queue.clone());
                    add.push(queue);
                }
                None => {
                    // Retried on the next sync.
                }
            }
        }

        let mut dropped = Vec::new();
        for name in current.difference(&incoming_names) {
            if let Some(queue) = self.queues.remove(name) {
                dropped.push(queue);
            }
        }

        ItemsSync { add, drop: dropped }
    }

    async fn build_queue_for_worker_item(
        &self,
        item: &QueueItemWithState,
    ) -> Option<Arc<ExecutableQueue>> {
        match work_factory::build(item.clone(), &self.services) {
            Ok(queue) => {
                self.services.hooks.work_queue_built.emit(item).await;
                Some(Arc::new(queue))
            }
            Err(error) => {
                warn!(job = %item.item.name, error = %error, "failed to build queue");
                None
            }
        }
    }

    fn load_resources(&mut self, lock_response: &LockResponse) -> ItemsSync<ResourceData> {
        let current: HashSet<String> = self.resources.keys().cloned().collect();
        let incoming: HashMap<String, ResourceData> = lock_response
            .resources
            .iter()
            .map(|item| (item.name.clone(), ResourceData::from(item.clone())))
            .collect();
        let incoming_names: HashSet<String> = incoming.keys().cloned().collect();

        let mut add = Vec::new();
        for name in incoming_names.difference(&current) {
            let data = incoming[name].clone();
            self.resources.insert(name.clone(), data.clone());
            add.push(data);
        }
        let mut dropped = Vec::new();
        for name in current.difference(&incoming_names) {
            if let Some(data) = self.resources.remove(name) {
                dropped.push(data);
            }
        }

        ItemsSync { add, drop: dropped }
    }

    fn load_resources_providers(&mut self, lock_response: &LockResponse) -> ItemsSync<ProviderEntry> {
        let current: HashSet<String> = self.providers.keys().cloned().collect();
        let incoming: HashMap<String, &ResourcesProviderItem> = lock_response
            .resources_providers
            .iter()
            .map(|item| (item.name.clone(), item))
            .collect();
        let incoming_names: HashSet<String> = incoming.keys().cloned().collect();

        let mut add = Vec::new();
        for name in incoming_names.difference(&current) {
            let item = incoming[name];
            match work_factory::build_resources_provider(item, &self.services) {
                Ok(provider) => {
                    let entry = ProviderEntry {
                        item: item.clone(),
                        provider,
                    };
                    self.providers.insert(name.clone(), entry.clone());
                    add.push(entry);
                }
                Err(error) => {
                    warn!(provider = name, error = %error, "failed to build resources provider");
                }
            }
        }
        let mut dropped = Vec::new();
        for name in current.difference(&incoming_names) {
            if let Some(entry) = self.providers.remove(name) {
                dropped.push(entry);
            }
        }

        ItemsSync { add, drop: dropped }
    }

    fn load_executors(&mut self, lock_response: &LockResponse) -> ItemsSync<ComponentDefinition> {
        let current: HashSet<String> = self.executors.keys().cloned().collect();
        let incoming: HashMap<String, &ComponentDefinition> = lock_response
            .executors
            .iter()
            .map(|item| (item.name.clone(), item))
            .collect();
        let incoming_names: HashSet<String> = incoming.keys().cloned().collect();

        let mut add = Vec::new();
        for name in incoming_names.difference(&current) {
            let definition = incoming[name].clone();
            self.executors.insert(name.clone(), definition.clone());
            add.push(definition);
        }
        let mut dropped = Vec::new();
        for name in current.difference(&incoming_names) {
            if let Some(definition) = self.executors.remove(name) {
                dropped.push(definition);
            }
        }

        ItemsSync { add, drop: dropped }
    }
}
