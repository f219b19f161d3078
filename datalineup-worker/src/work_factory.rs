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
use crate::executors::executable::{ExecutableQueue, OutputChannel, OutputMap};
use crate::inventories::chained::ChainedInventory;
use crate::inventories::fanin::{FanIn, PriorityFanIn};
use crate::inventories::loop_::{LoopInventory, LoopInventoryOptions};
use crate::inventories::periodic::{PeriodicInventory, PeriodicInventoryOptions};
use crate::inventories::static_::{StaticInventory, StaticInventoryOptions};
use crate::inventories::topic::TopicAdapter;
use crate::inventory::Inventory;
use crate::job::Job;
use crate::resources::provider::{
    StaticResourcesProvider, StaticResourcesProviderOptions,
};
use crate::resources::ResourcesProvider;
use crate::services::WorkerServices;
use crate::topics::file::{FileTopic, FileTopicOptions};
use crate::topics::logging::{LoggingTopic, LoggingTopicOptions};
use crate::topics::memory::{MemoryTopic, MemoryTopicOptions};
use crate::topics::null::{NullTopic, NullTopicOptions};
use crate::topics::static_::{StaticTopic, StaticTopicOptions};
use crate::topics::Topic;
use datalineup_common::model::{
    ComponentDefinition, OutputElement, QueueItemWithState, ResourcesProviderItem,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Deserializes a component's options map, with the definition name merged
/// in under `name` unless the options override it.
pub fn parse_options<T: DeserializeOwned>(
    definition: &ComponentDefinition,
) -> Result<T, WorkerError> {
    let mut map = serde_json::Map::new();
    map.insert("name".to_string(), Value::String(definition.name.clone()));
    for (key, value) in &definition.options {
        map.insert(key.clone(), value.clone());
    }
    serde_json::from_value(Value::Object(map)).map_err(|error| {
        WorkerError::configuration(format!(
            "invalid options for {}: {error}",
            definition.name
        ))
    })
}

pub type InventoryBuilder = Arc<
    dyn Fn(&ComponentDefinition, &Arc<WorkerServices>) -> Result<Arc<dyn Inventory>, WorkerError>
        + Send
        + Sync,
>;
pub type TopicBuilder = Arc<
    dyn Fn(&ComponentDefinition, &Arc<WorkerServices>) -> Result<Arc<dyn Topic>, WorkerError>
        + Send
        + Sync,
>;
pub type ProviderBuilder = Arc<
    dyn Fn(&ResourcesProviderItem, &Arc<WorkerServices>) -> Result<Arc<dyn ResourcesProvider>, WorkerError>
        + Send
        + Sync,
>;

/// Static registry of built-in component types plus whatever the embedding
/// application registers before the worker starts.
#[derive(Default)]
pub struct ComponentRegistry {
    inventories: Mutex<HashMap<String, InventoryBuilder>>,
    topics: Mutex<HashMap<String, TopicBuilder>>,
    providers: Mutex<HashMap<String, ProviderBuilder>>,
}

#[derive(Debug, Clone, Deserialize)]
struct FanInOptions {
    inputs: Vec<ComponentDefinition>,
}

#[derive(Debug, Clone, Deserialize)]
struct PriorityFanInInput {
    priority: u64,
    inventory: ComponentDefinition,
}

#[derive(Debug, Clone, Deserialize)]
struct PriorityFanInOptions {
    inputs: Vec<PriorityFanInInput>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChainedInventoryOptions {
    inventories: Vec<ComponentDefinition>,
}

#[derive(Debug, Clone, Deserialize)]
struct TopicAdapterOptions {
    topic: ComponentDefinition,
}

impl ComponentRegistry {
    pub fn with_builtins() -> Self {
        let registry = Self::default();

        registry.register_inventory("StaticInventory", |definition, _services| {
            let options: StaticInventoryOptions = parse_options(definition)?;
            Ok(Arc::new(StaticInventory::new(&definition.name, options)))
        });
        registry.register_inventory("PeriodicInventory", |definition, _services| {
            let options: PeriodicInventoryOptions = parse_options(definition)?;
            Ok(Arc::new(PeriodicInventory::new(&definition.name, options)))
        });
        registry.register_inventory("LoopInventory", |definition, _services| {
            let options: LoopInventoryOptions = parse_options(definition)?;
            Ok(Arc::new(LoopInventory::new(&definition.name, options)))
        });
        registry.register_inventory("ChainedInventory", |definition, services| {
            let options: ChainedInventoryOptions = parse_options(definition)?;
            let mut children = Vec::with_capacity(options.inventories.len());
            for child in &options.inventories {
                children.push((child.name.clone(), build_inventory(child, services)?));
            }
            Ok(Arc::new(ChainedInventory::new(&definition.name, children)))
        });
        registry.register_inventory("FanIn", |definition, services| {
            let options: FanInOptions = parse_options(definition)?;
            let mut children = Vec::with_capacity(options.inputs.len());
            for child in &options.inputs {
                children.push((child.name.clone(), build_inventory(child, services)?));
            }
            Ok(Arc::new(FanIn::new(&definition.name, children)))
        });
        registry.register_inventory("PriorityFanIn", |definition, services| {
            let options: PriorityFanInOptions = parse_options(definition)?;
            let mut children = Vec::with_capacity(options.inputs.len());
            for input in &options.inputs {
                children.push((
                    input.inventory.name.clone(),
                    input.priority,
                    build_inventory(&input.inventory, services)?,
                ));
            }
            Ok(Arc::new(PriorityFanIn::new(&definition.name, children)))
        });
        registry.register_inventory("TopicAdapter", |definition, services| {
            let options: TopicAdapterOptions = parse_options(definition)?;
            let topic = build_topic(&options.topic, services)?;
            Ok(Arc::new(TopicAdapter::new(&definition.name, topic)))
        });

        registry.register_topic("MemoryTopic", |definition, _services| {
            let options: MemoryTopicOptions = parse_options(definition)?;
            Ok(Arc::new(MemoryTopic::new(options)))
        });
        registry.register_topic("FileTopic", |definition, _services| {
            let options: FileTopicOptions = parse_options(definition)?;
            Ok(Arc::new(FileTopic::new(options)))
        });
        registry.register_topic("StaticTopic", |definition, _services| {
            let options: StaticTopicOptions = parse_options(definition)?;
            Ok(Arc::new(StaticTopic::new(options)))
        });
        registry.register_topic("NullTopic", |definition, _services| {
            let options: NullTopicOptions = parse_options(definition)?;
            Ok(Arc::new(NullTopic::new(options)))
        });
        registry.register_topic("LoggingTopic", |definition, _services| {
            let options: LoggingTopicOptions = parse_options(definition)?;
            Ok(Arc::new(LoggingTopic::new(options)))
        });

        registry.register_provider("StaticResourcesProvider", |item, _services| {
            let options: StaticResourcesProviderOptions =
                serde_json::from_value(serde_json::to_value(&item.options)?)
                    .map_err(WorkerError::from)?;
            Ok(Arc::new(StaticResourcesProvider::new(options)))
        });

        registry
    }

    pub fn register_inventory<F>(&self, type_name: &str, builder: F)
    where
        F: Fn(&ComponentDefinition, &Arc<WorkerServices>) -> Result<Arc<dyn Inventory>, WorkerError>
            + Send
            + Sync
            + 'static,
    {
        self.inventories
            .lock()
            .unwrap()
            .insert(type_name.to_string(), Arc::new(builder));
    }

    pub fn register_topic<F>(&self, type_name: &str, builder: F)
    where
        F: Fn(&ComponentDefinition, &Arc<WorkerServices>) -> Result<Arc<dyn Topic>, WorkerError>
            + Send
            + Sync
            + 'static,
    {
        self.topics
            .lock()
            .unwrap()
            .insert(type_name.to_string(), Arc::new(builder));
    }

    pub fn register_provider<F>(&self, type_name: &str, builder: F)
    where
        F: Fn(&ResourcesProviderItem, &Arc<WorkerServices>) -> Result<Arc<dyn ResourcesProvider>, WorkerError>
            + Send
            + Sync
            + 'static,
    {
        self.providers
            .lock()
            .unwrap()
            .insert(type_name.to_string(), Arc::new(builder));
    }

    fn inventory_builder(&self, type_name: &str) -> Option<InventoryBuilder> {
        self.inventories.lock().unwrap().get(type_name).cloned()
    }

    fn topic_builder(&self, type_name: &str) -> Option<TopicBuilder> {
        self.topics.lock().unwrap().get(type_name).cloned()
    }

    fn provider_builder(&self, type_name: &str) -> Option<ProviderBuilder> {
        self.providers.lock().unwrap().get(type_name).cloned()
    }
}

pub fn build_inventory(
    definition: &ComponentDefinition,
    services: &Arc<WorkerServices>,
) -> Result<Arc<dyn Inventory>, WorkerError> {
    let builder = services
        .registry
        .inventory_builder(&definition.type_name)
        .ok_or_else(|| {
            WorkerError::configuration(format!(
                "unknown inventory type: {}",
                definition.type_name
            ))
        })?;
    builder(definition, services)
}

pub fn build_topic(
    definition: &ComponentDefinition,
    services: &Arc<WorkerServices>,
) -> Result<Arc<dyn Topic>, WorkerError> {
    let builder = services
        .registry
        .topic_builder(&definition.type_name)
        .ok_or_else(|| {
            WorkerError::configuration(format!("unknown topic type: {}", definition.type_name))
        })?;
    builder(definition, services)
}

pub fn build_resources_provider(
    item: &ResourcesProviderItem,
    services: &Arc<WorkerServices>,
) -> Result<Arc<dyn ResourcesProvider>, WorkerError> {
    let builder = services
        .registry
        .provider_builder(&item.type_name)
        .ok_or_else(|| {
            WorkerError::configuration(format!(
                "unknown resources provider type: {}",
                item.type_name
            ))
        })?;
    builder(item, services)
}

/// Builds the runtime queue for one assigned item: the input (an inventory
/// wrapped into a job, or a topic consumed directly) and the resolved
/// output channels.
pub fn build(
    queue_item: QueueItemWithState,
    services: &Arc<WorkerServices>,
) -> Result<ExecutableQueue, WorkerError> {
    let input: Arc<dyn Topic> =
        if services.registry.inventory_builder(&queue_item.item.input.type_name).is_some() {
            let inventory = build_inventory(&queue_item.item.input, services)?;
            Arc::new(Job::new(
                inventory,
                queue_item.clone(),
                services.job_state.clone(),
            ))
        } else {
            build_topic(&queue_item.item.input, services)?
        };

    let mut output: OutputMap = HashMap::new();
    for (channel_name, elements) in &queue_item.item.output {
        let mut channel = OutputChannel::default();
        for element in elements {
            match element {
                OutputElement::Topic(definition) => {
                    channel.topics.push(build_topic(definition, services)?);
                }
                OutputElement::Handler(handler) => {
                    channel.handler = Some(handler.clone());
                }
            }
        }
        output.insert(channel_name.clone(), channel);
    }

    Ok(ExecutableQueue::new(
        queue_item,
        input,
        output,
        services.hooks.clone(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkerConfig;
    use datalineup_client::{ClientError, WorkerManagerClient};
    use datalineup_common::model::{
        FetchCursorsStatesInput, FetchCursorsStatesResponse, JobsStatesSyncInput,
        JobsStatesSyncResponse, LockResponse,
    };
    use serde_json::json;
    use test_r::test;

    struct NullClient;

    #[async_trait::async_trait]
    impl WorkerManagerClient for NullClient {
        async fn lock(&self) -> Result<LockResponse, ClientError> {
            Ok(LockResponse::default())
        }

        async fn sync_jobs_states(
            &self,
            _input: JobsStatesSyncInput,
        ) -> Result<JobsStatesSyncResponse, ClientError> {
            Ok(JobsStatesSyncResponse::default())
        }

        async fn fetch_cursors_states(
            &self,
            _input: FetchCursorsStatesInput,
        ) -> Result<FetchCursorsStatesResponse, ClientError> {
            Ok(FetchCursorsStatesResponse::default())
        }

        async fn sync_jobs(&self) -> Result<(), ClientError> {
            Ok(())
        }
    }

    fn services() -> Arc<WorkerServices> {
        WorkerServices::new(WorkerConfig::default(), Arc::new(NullClient))
    }

    #[test]
    async fn builds_nested_fanin_from_definitions() {
        let services = services();
        let definition = ComponentDefinition::new("fanin", "FanIn").with_options(
            HashMap::from([(
                "inputs".to_string(),
                json!([
                    {"name": "a", "type": "StaticInventory", "options": {"items": [{"n": 1}]}},
                    {"name": "b", "type": "StaticInventory", "options": {"items": [{"n": 2}]}},
                ]),
            )]),
        );

        let inventory = build_inventory(&definition, &services).unwrap();
        assert_eq!(inventory.name(), "fanin");
    }

    #[test]
    async fn unknown_types_are_configuration_errors() {
        let services = services();
        let definition = ComponentDefinition::new("x", "NotAThing");
        assert!(matches!(
            build_inventory(&definition, &services),
            Err(WorkerError::ConfigurationInvalid(_))
        ));
    }
}
