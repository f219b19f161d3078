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

use crate::declarative::{
    self, BaseObject, ComponentSpec, DynamicTopologySpec, InputRef, JobDefinitionSpec, JobSpec,
    OutputRef, ResourceSpec, ResourcesProviderSpec,
};
use crate::error::ManagerError;
use datalineup_common::model::{
    ComponentDefinition, JobDefinitionItem, JobId, OutputElement, QueueItem, QueuePipeline,
    PipelineInfo, ResourceItem, ResourcesProviderItem,
};
use std::collections::HashMap;

/// Every declared object, compiled and cross-referenced.
#[derive(Debug, Clone, Default)]
pub struct StaticDefinitions {
    pub topics: HashMap<String, ComponentDefinition>,
    pub inventories: HashMap<String, ComponentDefinition>,
    pub executors: HashMap<String, ComponentDefinition>,
    pub resources: HashMap<String, ResourceItem>,
    pub resources_providers: HashMap<String, ResourcesProviderItem>,
    pub jobs: HashMap<JobId, QueueItem>,
    pub job_definitions: HashMap<String, JobDefinitionItem>,
}

fn spec_as<T: serde::de::DeserializeOwned>(object: &BaseObject) -> Result<T, ManagerError> {
    serde_json::from_value(object.spec.clone()).map_err(|error| {
        ManagerError::invalid_object(format!(
            "invalid {} spec for {}: {error}",
            object.kind, object.metadata.name
        ))
    })
}

fn component(object: &BaseObject) -> Result<ComponentDefinition, ManagerError> {
    let spec: ComponentSpec = spec_as(object)?;
    Ok(ComponentDefinition {
        name: object.metadata.name.clone(),
        type_name: spec.type_name,
        options: spec.options,
    })
}

fn insert_unique<T>(
    map: &mut HashMap<String, T>,
    name: &str,
    kind: &str,
    value: T,
) -> Result<(), ManagerError> {
    if map.insert(name.to_string(), value).is_some() {
        return Err(ManagerError::invalid_object(format!(
            "duplicate {kind} name: {name}"
        )));
    }
    Ok(())
}

impl StaticDefinitions {
    /// Compiles declarative objects: components first, then jobs and job
    /// definitions whose references must resolve.
    pub fn compile(objects: &[BaseObject]) -> Result<Self, ManagerError> {
        let mut definitions = StaticDefinitions::default();

        for object in objects {
            let name = &object.metadata.name;
            match object.kind.as_str() {
                declarative::KIND_TOPIC => {
                    let value = component(object)?;
                    insert_unique(&mut definitions.topics, name, "topic", value)?;
                }
                declarative::KIND_INVENTORY => {
                    let value = component(object)?;
                    insert_unique(&mut definitions.inventories, name, "inventory", value)?;
                }
                declarative::KIND_EXECUTOR => {
                    let value = component(object)?;
                    insert_unique(&mut definitions.executors, name, "executor", value)?;
                }
                declarative::KIND_RESOURCE => {
                    let spec: ResourceSpec = spec_as(object)?;
                    let value = ResourceItem {
                        name: name.clone(),
                        type_name: spec.type_name,
                        data: spec.data,
                        default_delay: spec.default_delay,
                        rate_limit: spec.rate_limit,
                    };
                    insert_unique(&mut definitions.resources, name, "resource", value)?;
                }
                declarative::KIND_RESOURCES_PROVIDER => {
                    let spec: ResourcesProviderSpec = spec_as(object)?;
                    let value = ResourcesProviderItem {
                        name: name.clone(),
                        type_name: spec.type_name,
                        resource_type: spec.resource_type,
                        options: spec.options,
                    };
                    insert_unique(
                        &mut definitions.resources_providers,
                        name,
                        "resources provider",
                        value,
                    )?;
                }
                declarative::KIND_JOB | declarative::KIND_JOB_DEFINITION
                | declarative::KIND_DYNAMIC_TOPOLOGY => {
                    // Second pass below.
                }
                other => {
                    return Err(ManagerError::invalid_object(format!(
                        "unknown kind: {other}"
                    )));
                }
            }
        }

        for object in objects {
            let name = &object.metadata.name;
            match object.kind.as_str() {
                declarative::KIND_JOB => {
                    let spec: JobSpec = spec_as(object)?;
                    let item = definitions.compile_job(name, &object.metadata.labels, &spec)?;
                    if definitions
                        .jobs
                        .insert(item.name.clone(), item)
                        .is_some()
                    {
                        return Err(ManagerError::invalid_object(format!(
                            "duplicate job name: {name}"
                        )));
                    }
                }
                declarative::KIND_JOB_DEFINITION => {
                    let spec: JobDefinitionSpec = spec_as(object)?;
                    let template =
                        definitions.compile_job(name, &object.metadata.labels, &spec.template)?;
                    let value = JobDefinitionItem {
                        name: name.clone(),
                        template,
                        minimal_interval: spec.minimal_interval,
                    };
                    insert_unique(
                        &mut definitions.job_definitions,
                        name,
                        "job definition",
                        value,
                    )?;
                }
                _ => {}
            }
        }

        Ok(definitions)
    }

    /// Compiles with dynamic topology patches merged over matching objects.
    pub fn compile_with_patches(
        objects: &[BaseObject],
        patches: &[BaseObject],
    ) -> Result<Self, ManagerError> {
        let mut flattened: Vec<BaseObject> = Vec::new();
        for object in objects {
            if object.kind == declarative::KIND_DYNAMIC_TOPOLOGY {
                let spec: DynamicTopologySpec = spec_as(object)?;
                flattened.extend(spec.patches);
            } else {
                flattened.push(object.clone());
            }
        }

        for patch in patches {
            match flattened
                .iter_mut()
                .find(|object| object.kind == patch.kind && object.metadata.name == patch.metadata.name)
            {
                Some(object) => *object = apply_patch(object, patch)?,
                None => flattened.push(patch.clone()),
            }
        }

        Self::compile(&flattened)
    }

    fn compile_job(
        &self,
        name: &str,
        labels: &HashMap<String, String>,
        spec: &JobSpec,
    ) -> Result<QueueItem, ManagerError> {
        let input = match &spec.input {
            InputRef::Inventory { inventory } => self
                .inventories
                .get(inventory)
                .cloned()
                .ok_or_else(|| {
                    ManagerError::invalid_object(format!(
                        "job {name} references unknown inventory: {inventory}"
                    ))
                })?,
            InputRef::Topic { topic } => self.topics.get(topic).cloned().ok_or_else(|| {
                ManagerError::invalid_object(format!(
                    "job {name} references unknown topic: {topic}"
                ))
            })?,
        };

        let mut output = HashMap::new();
        for (channel, refs) in &spec.output {
            let mut elements = Vec::with_capacity(refs.len());
            for output_ref in refs {
                match output_ref {
                    OutputRef::Topic { topic } => {
                        let definition = self.topics.get(topic).cloned().ok_or_else(|| {
                            ManagerError::invalid_object(format!(
                                "job {name} references unknown topic: {topic}"
                            ))
                        })?;
                        elements.push(OutputElement::Topic(definition));
                    }
                    OutputRef::Handler { error_handler } => {
                        elements.push(OutputElement::Handler(error_handler.clone()));
                    }
                }
            }
            output.insert(channel.clone(), elements);
        }

        Ok(QueueItem {
            name: JobId::from(name),
            input,
            output,
            pipeline: QueuePipeline {
                info: PipelineInfo {
                    name: spec.pipeline.name.clone(),
                    resources: spec.pipeline.resources.clone(),
                },
                args: spec.pipeline.args.clone(),
            },
            labels: labels.clone(),
            executor: spec.executor.clone(),
            config: spec.config.clone(),
        })
    }
}

/// Merges a patch object over a base object of the same kind and name.
pub fn apply_patch(base: &BaseObject, patch: &BaseObject) -> Result<BaseObject, ManagerError> {
    let base_value = serde_json::to_value(base)?;
    let patch_value = serde_json::to_value(patch)?;
    let merged = declarative::merge_patch(&base_value, &patch_value);
    Ok(serde_json::from_value(merged)?)
}
