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
use crate::resources::manager::{ResourceData, ResourcesManager};
use async_trait::async_trait;
use datalineup_common::model::ResourcesProviderItem;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct ProvidedResource {
    pub name: String,
    #[serde(default)]
    pub data: HashMap<String, Value>,
}

/// The manager-side handle given to a provider; contributed resources join
/// the pool under the provider's declared resource type and are retired
/// together when the provider is dropped.
#[derive(Clone)]
pub struct ProviderHandle {
    manager: ResourcesManager,
    definition: ResourcesProviderItem,
}

impl ProviderHandle {
    pub fn new(manager: ResourcesManager, definition: ResourcesProviderItem) -> Self {
        Self {
            manager,
            definition,
        }
    }

    pub fn definition(&self) -> &ResourcesProviderItem {
        &self.definition
    }

    pub fn add(&self, resource: ProvidedResource) -> Result<(), WorkerError> {
        self.manager.add_from(
            ResourceData {
                name: resource.name,
                type_name: self.definition.resource_type.clone(),
                data: resource.data,
                default_delay: Duration::ZERO,
                rate_limit: None,
            },
            Some(self.definition.name.clone()),
        )
    }
}

/// A long-running contributor of resources to the pool.
#[async_trait]
pub trait ResourcesProvider: Send + Sync {
    async fn open(&self, handle: &ProviderHandle) -> Result<(), WorkerError>;

    async fn close(&self) {}
}

#[derive(Debug, Clone, Deserialize)]
pub struct StaticResourcesProviderOptions {
    pub resources: Vec<ProvidedResource>,
}

/// Contributes a fixed set of resources when opened.
pub struct StaticResourcesProvider {
    options: StaticResourcesProviderOptions,
}

impl StaticResourcesProvider {
    pub fn new(options: StaticResourcesProviderOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl ResourcesProvider for StaticResourcesProvider {
    async fn open(&self, handle: &ProviderHandle) -> Result<(), WorkerError> {
        for resource in &self.options.resources {
            handle.add(resource.clone())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;

    fn definition() -> ResourcesProviderItem {
        ResourcesProviderItem {
            name: "provider-1".to_string(),
            type_name: "StaticResourcesProvider".to_string(),
            resource_type: "ProvidedKey".to_string(),
            options: HashMap::new(),
        }
    }

    #[test]
    async fn provider_contributions_join_and_leave_the_pool() {
        let manager = ResourcesManager::new();
        let handle = ProviderHandle::new(manager.clone(), definition());
        let provider = StaticResourcesProvider::new(StaticResourcesProviderOptions {
            resources: vec![ProvidedResource {
                name: "fake-resource".to_string(),
                data: HashMap::from([("foo".to_string(), serde_json::json!("bar"))]),
            }],
        });

        provider.open(&handle).await.unwrap();
        assert_eq!(manager.available_count("ProvidedKey"), 1);

        // Dropping the provider while a lease is out defers the removal.
        let lease = manager.acquire("ProvidedKey").await;
        provider.close().await;
        manager.remove_provider_resources("provider-1");
        lease.release(None);
        assert_eq!(manager.available_count("ProvidedKey"), 0);
    }
}
