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

use crate::error::ManagerError;
use datalineup_common::model::{ErrorHandler, ResourceRateLimit};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

pub const API_VERSION: &str = "datalineup.khulnasoft.io/v1alpha1";

pub const KIND_JOB: &str = "DatalineupJob";
pub const KIND_JOB_DEFINITION: &str = "DatalineupJobDefinition";
pub const KIND_INVENTORY: &str = "DatalineupInventory";
pub const KIND_TOPIC: &str = "DatalineupTopic";
pub const KIND_EXECUTOR: &str = "DatalineupExecutor";
pub const KIND_DYNAMIC_TOPOLOGY: &str = "DatalineupDynamicTopology";
pub const KIND_RESOURCE: &str = "DatalineupResource";
pub const KIND_RESOURCES_PROVIDER: &str = "DatalineupResourcesProvider";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub name: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

/// One declarative document. The spec stays untyped here and is interpreted
/// per kind during compilation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseObject {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMetadata,
    #[serde(default)]
    pub spec: Value,
}

/// Component-shaped specs (topics, inventories, executors).
#[derive(Debug, Clone, Deserialize)]
pub struct ComponentSpec {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub options: HashMap<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResourceSpec {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub data: HashMap<String, Value>,
    #[serde(default)]
    pub default_delay: f64,
    #[serde(default)]
    pub rate_limit: Option<ResourceRateLimit>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResourcesProviderSpec {
    #[serde(rename = "type")]
    pub type_name: String,
    pub resource_type: String,
    #[serde(default)]
    pub options: HashMap<String, Value>,
}

/// A job's input, referencing a declared inventory or topic by name.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum InputRef {
    Inventory { inventory: String },
    Topic { topic: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OutputRef {
    Topic { topic: String },
    Handler { error_handler: ErrorHandler },
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSpec {
    pub name: String,
    #[serde(default)]
    pub resources: BTreeMap<String, String>,
    #[serde(default)]
    pub args: HashMap<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobSpec {
    pub input: InputRef,
    #[serde(default)]
    pub output: HashMap<String, Vec<OutputRef>>,
    pub pipeline: PipelineSpec,
    #[serde(default = "default_executor")]
    pub executor: String,
    #[serde(default)]
    pub config: HashMap<String, Value>,
}

fn default_executor() -> String {
    "default".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobDefinitionSpec {
    pub template: JobSpec,
    #[serde(rename = "minimalInterval", with = "humantime_serde")]
    pub minimal_interval: Duration,
}

/// A dynamic topology carries patches applied over the static definitions.
#[derive(Debug, Clone, Deserialize)]
pub struct DynamicTopologySpec {
    #[serde(default)]
    pub patches: Vec<BaseObject>,
}

pub fn load_objects_from_str(definitions: &str) -> Result<Vec<BaseObject>, ManagerError> {
    let mut objects = Vec::new();
    for document in serde_yaml::Deserializer::from_str(definitions) {
        let value = Value::deserialize(document).map_err(|error| {
            ManagerError::invalid_object(format!("invalid yaml document: {error}"))
        })?;
        if value.is_null() {
            continue;
        }
        let object: BaseObject = serde_json::from_value(value)?;
        if object.api_version != API_VERSION {
            return Err(ManagerError::invalid_object(format!(
                "apiVersion was {}, only {} is supported",
                object.api_version, API_VERSION
            )));
        }
        objects.push(object);
    }
    Ok(objects)
}

pub fn load_objects_from_path(path: &Path) -> Result<Vec<BaseObject>, ManagerError> {
    if path.is_dir() {
        return load_objects_from_directory(path);
    }
    let content = std::fs::read_to_string(path)?;
    load_objects_from_str(&content)
}

pub fn load_objects_from_directory(directory: &Path) -> Result<Vec<BaseObject>, ManagerError> {
    let mut objects = Vec::new();
    let mut entries: Vec<_> = std::fs::read_dir(directory)?
        .collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|entry| entry.path());

    for entry in entries {
        let path = entry.path();
        if path.is_dir() {
            objects.extend(load_objects_from_directory(&path)?);
        } else if path.extension().is_some_and(|ext| ext == "yaml") {
            let content = std::fs::read_to_string(&path)?;
            objects.extend(load_objects_from_str(&content)?);
        }
    }
    Ok(objects)
}

/// Recursively merges `patch` over `base`: objects merge key by key,
/// anything else is replaced.
pub fn merge_patch(base: &Value, patch: &Value) -> Value {
    match (base, patch) {
        (Value::Object(base), Value::Object(patch)) => {
            let mut merged = base.clone();
            for (key, patch_value) in patch {
                let merged_value = match merged.get(key) {
                    Some(base_value) => merge_patch(base_value, patch_value),
                    None => patch_value.clone(),
                };
                merged.insert(key.clone(), merged_value);
            }
            Value::Object(merged)
        }
        (_, patch) => patch.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_r::test;

    #[test]
    fn loads_multi_document_yaml() {
        let objects = load_objects_from_str(
            r#"
apiVersion: datalineup.khulnasoft.io/v1alpha1
kind: DatalineupTopic
metadata:
  name: out
spec:
  type: MemoryTopic
---
apiVersion: datalineup.khulnasoft.io/v1alpha1
kind: DatalineupInventory
metadata:
  name: source
  labels:
    owner: team-datalineup
spec:
  type: StaticInventory
  options:
    items:
      - n: 1
"#,
        )
        .unwrap();

        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0].kind, KIND_TOPIC);
        assert_eq!(objects[1].metadata.labels["owner"], "team-datalineup");
    }

    #[test]
    fn rejects_unsupported_api_versions() {
        let result = load_objects_from_str(
            r#"
apiVersion: datalineup.khulnasoft.io/v2
kind: DatalineupTopic
metadata:
  name: out
spec:
  type: MemoryTopic
"#,
        );
        assert!(matches!(result, Err(ManagerError::InvalidObject(_))));
    }

    #[test]
    fn patch_merges_objects_and_replaces_scalars() {
        let base = json!({"spec": {"type": "MemoryTopic", "options": {"maxsize": 10}}});
        let patch = json!({"spec": {"options": {"maxsize": 1}}});
        let merged = merge_patch(&base, &patch);
        assert_eq!(
            merged,
            json!({"spec": {"type": "MemoryTopic", "options": {"maxsize": 1}}})
        );
    }
}
